// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-endpoint quirk tables. Each supported device kind gets one static
//! implementation of [`EpConfig`]; the channel configuration selects it by
//! compatible string.

use crate::cap::CapOffsets;
use crate::config::ChannelConfig;
use crate::hw::Hardware;
use crate::hw::Window;
use crate::regs::*;

/// Reset and power sequencing delays, in the units the names say.
#[derive(Copy, Clone, Debug)]
pub struct PerstDelays {
    /// Settle time between PHY setup and PERST deassert.
    pub udelay_before_perst: u32,
    /// Time the endpoint needs after PERST deassert before it answers
    /// configuration requests.
    pub udelay_after_perst: u32,
    /// Drain time before PERST assert on power-off.
    pub mdelay_before_perst_low: u32,
    /// Hold time after PERST assert before the PHY is powered down.
    pub mdelay_after_perst_low: u32,
}

impl Default for PerstDelays {
    fn default() -> Self {
        PerstDelays {
            udelay_before_perst: 0,
            udelay_after_perst: 18_000,
            mdelay_before_perst_low: 0,
            mdelay_after_perst_low: 0,
        }
    }
}

/// L1 substate timing constants an endpoint negotiates best with.
#[derive(Copy, Clone, Debug)]
pub struct L1ssTiming {
    /// TPOWERON encoding for L1SS control 2.
    pub tpoweron: u32,
    /// Common mode restore time field for L1SS control 1.
    pub common_restore_time: u32,
    /// LTR L1.2 threshold (value and scale fields) for L1SS control 1.
    pub ltr_threshold: u32,
}

impl Default for L1ssTiming {
    fn default() -> Self {
        L1ssTiming {
            tpoweron: PCI_L1SS_CTL2_TPOWERON_180US,
            common_restore_time: PCI_L1SS_TCOMMON_70US,
            ltr_threshold: PCI_L1SS_CTL1_LTR_THRE_VAL,
        }
    }
}

/// Behavior that varies by the endpoint soldered to the channel.
///
/// Every method has a conservative default so a new device kind only
/// overrides what its errata demand.
pub trait EpConfig: Send + Sync {
    fn name(&self) -> &'static str;

    fn delays(&self) -> PerstDelays {
        PerstDelays::default()
    }

    /// Overrides the channel's link-up retry budget.
    fn linkup_max_count(&self) -> Option<u32> {
        None
    }

    /// Skips the post-L0 negotiated speed verification.
    fn no_speed_check(&self) -> bool {
        false
    }

    /// Invokes the link-down callback synchronously from the interrupt path
    /// instead of only from the deferred worker.
    fn linkdn_callback_direct(&self) -> bool {
        false
    }

    fn l1ss_timing(&self) -> L1ssTiming {
        L1ssTiming::default()
    }

    /// Per-device MSI setup after link-up. The default arms the rising-edge
    /// aggregate path with every vector of controller block 0 unmasked.
    fn msi_init(&self, hw: &dyn Hardware, _config: &ChannelConfig) {
        hw.write(Window::Dbi, PCIE_MSI_INTR0_ENABLE, 0xFFFF_FFFF);
        hw.write(Window::Dbi, PCIE_MSI_INTR0_MASK, 0x0);
        let en = hw.read(Window::Elbi, PCIE_IRQ2_EN);
        hw.write(Window::Elbi, PCIE_IRQ2_EN, en | IRQ_MSI_CTRL_EN_RISING_EDG);
    }

    /// Extra endpoint register writes when L1SS is enabled or disabled.
    fn l1ss_ep_specific(&self, _hw: &dyn Hardware, _ep_caps: &CapOffsets, _enable: bool) {}

    /// Adjusts a raw endpoint config read before it is returned. `msi_cap`
    /// is the cached MSI capability offset, once discovered.
    fn fixup_ep_read(&self, _offset: u32, val: u32, _msi_cap: Option<u32>) -> u32 {
        val
    }

    /// Programs the I/O access sequencer for doorbell forwarding.
    fn set_ia(&self, _hw: &dyn Hardware) {}
}

/// Samsung modem over the chip-to-chip link.
struct SamsungModem;

impl EpConfig for SamsungModem {
    fn name(&self) -> &'static str {
        "samsung_cp"
    }

    fn msi_init(&self, hw: &dyn Hardware, config: &ChannelConfig) {
        // The modem rings its doorbell by writing the shared memory MSI
        // address directly, so the translation target is pinned there and
        // every vector set the modem uses must stay enabled across link
        // cycles.
        hw.write(Window::Dbi, PCIE_MSI_ADDR_LO, config.msi_doorbell_addr as u32);
        hw.write(Window::Dbi, PCIE_MSI_ADDR_HI, (config.msi_doorbell_addr >> 32) as u32);
        hw.write(Window::Dbi, PCIE_MSI_INTR0_ENABLE, 0xFFFF_FFFF);
        hw.write(Window::Dbi, PCIE_MSI_INTR0_MASK, 0x0);
        let en = hw.read(Window::Elbi, PCIE_IRQ2_EN);
        hw.write(Window::Elbi, PCIE_IRQ2_EN, en | IRQ_MSI_CTRL_EN_RISING_EDG);
    }

    fn set_ia(&self, hw: &dyn Hardware) {
        // Sequencer program: on doorbell write, mirror it into the modem
        // mailbox and raise the completion bit.
        hw.write(Window::Ia, 0x000, 0x1);
        hw.write(Window::Ia, 0x010, 0x2);
    }

    fn fixup_ep_read(&self, offset: u32, val: u32, msi_cap: Option<u32>) -> u32 {
        fixup_network_class_and_msi(offset, val, msi_cap, 0x4)
    }
}

/// Qualcomm WLAN. Short reset timing, but the firmware is easily wedged by a
/// late recovery, hence the direct callback and small retry budget.
struct QcWifi;

impl EpConfig for QcWifi {
    fn name(&self) -> &'static str {
        "qc_wifi"
    }

    fn delays(&self) -> PerstDelays {
        PerstDelays {
            udelay_before_perst: 10_000,
            udelay_after_perst: 1_000,
            ..PerstDelays::default()
        }
    }

    fn linkup_max_count(&self) -> Option<u32> {
        Some(3)
    }

    fn no_speed_check(&self) -> bool {
        true
    }

    fn linkdn_callback_direct(&self) -> bool {
        true
    }
}

/// Broadcom WLAN.
struct BcmWifi;

impl EpConfig for BcmWifi {
    fn name(&self) -> &'static str {
        "bcm_wifi"
    }

    fn delays(&self) -> PerstDelays {
        PerstDelays {
            udelay_after_perst: 20_000,
            ..PerstDelays::default()
        }
    }

    fn l1ss_timing(&self) -> L1ssTiming {
        L1ssTiming {
            common_restore_time: PCI_L1SS_TCOMMON_32US,
            ltr_threshold: PCI_L1SS_CTL1_LTR_THRE_VAL_0US,
            ..L1ssTiming::default()
        }
    }

    fn l1ss_ep_specific(&self, hw: &dyn Hardware, ep_caps: &CapOffsets, enable: bool) {
        // The device ships with a max snoop latency too small for L1.2
        // residency to pay off.
        if let (true, Some(ltr)) = (enable, ep_caps.ltr) {
            hw.write(Window::EpCfg, ltr + PCI_LTR_MAX_SNOOP_LAT, BCM_MAX_SNOOP_LAT_VAL);
        }
    }
}

/// Samsung WLAN.
struct SamsungWifi;

impl EpConfig for SamsungWifi {
    fn name(&self) -> &'static str {
        "samsung_wifi"
    }

    fn fixup_ep_read(&self, offset: u32, val: u32, msi_cap: Option<u32>) -> u32 {
        fixup_network_class_and_msi(offset, val, msi_cap, 0x5)
    }
}

/// Some endpoints report a blank class code until their firmware boots, and a
/// multiple-message-capable field of zero even though more vectors work.
/// Claim a network device and `1 << mmc` vectors instead.
fn fixup_network_class_and_msi(offset: u32, val: u32, msi_cap: Option<u32>, mmc: u32) -> u32 {
    if offset == PCI_CLASS_REVISION && (val >> 8) == 0 {
        return val | (PCI_CLASS_NETWORK_OTHER << 16);
    }
    if let Some(cap) = msi_cap {
        if offset == cap && (val >> 16) & PCI_MSI_FLAGS_QMASK == 0 {
            return val | ((mmc << 1) << 16);
        }
    }
    val
}

static SAMSUNG_MODEM: SamsungModem = SamsungModem;
static QC_WIFI: QcWifi = QcWifi;
static BCM_WIFI: BcmWifi = BcmWifi;
static SAMSUNG_WIFI: SamsungWifi = SamsungWifi;

/// Looks up the quirk table for a device-tree compatible string.
pub fn from_compatible(compatible: &str) -> Option<&'static dyn EpConfig> {
    match compatible {
        "exynos-pcie-rc,cp_ss" => Some(&SAMSUNG_MODEM),
        "exynos-pcie-rc,wifi_qc" => Some(&QC_WIFI),
        "exynos-pcie-rc,wifi_bcm" => Some(&BCM_WIFI),
        "exynos-pcie-rc,wifi_ss" => Some(&SAMSUNG_WIFI),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_lookup() {
        assert_eq!(
            from_compatible("exynos-pcie-rc,cp_ss").unwrap().name(),
            "samsung_cp"
        );
        assert_eq!(
            from_compatible("exynos-pcie-rc,wifi_qc").unwrap().name(),
            "qc_wifi"
        );
        assert!(from_compatible("exynos-pcie-rc,nvme").is_none());
    }

    #[test]
    fn qc_wifi_quirks() {
        let ep = from_compatible("exynos-pcie-rc,wifi_qc").unwrap();
        assert_eq!(ep.linkup_max_count(), Some(3));
        assert!(ep.no_speed_check());
        assert!(ep.linkdn_callback_direct());
        assert_eq!(ep.delays().udelay_before_perst, 10_000);
    }

    #[test]
    fn defaults_are_conservative() {
        let ep = from_compatible("exynos-pcie-rc,wifi_ss").unwrap();
        assert_eq!(ep.linkup_max_count(), None);
        assert!(!ep.no_speed_check());
        assert_eq!(ep.delays().udelay_after_perst, 18_000);
    }

    #[test]
    fn read_fixups() {
        let cp = from_compatible("exynos-pcie-rc,cp_ss").unwrap();
        // Blank class code becomes a network device.
        assert_eq!(
            cp.fixup_ep_read(PCI_CLASS_REVISION, 0x0000_0001, None),
            (PCI_CLASS_NETWORK_OTHER << 16) | 0x0000_0001
        );
        // A populated class code is left alone.
        assert_eq!(
            cp.fixup_ep_read(PCI_CLASS_REVISION, 0x0108_0000, None),
            0x0108_0000
        );
        // Zero multiple-message-capable claims 16 vectors (32 for the
        // Samsung WLAN).
        assert_eq!(cp.fixup_ep_read(0x50, 0x0081_0005, Some(0x50)), 0x0089_0005);
        let ss = from_compatible("exynos-pcie-rc,wifi_ss").unwrap();
        assert_eq!(ss.fixup_ep_read(0x50, 0x0081_0005, Some(0x50)), 0x008B_0005);
        // Untracked offsets pass through.
        assert_eq!(cp.fixup_ep_read(0x50, 0x0081_0005, None), 0x0081_0005);
    }
}
