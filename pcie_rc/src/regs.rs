// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Register layout of the Exynos PCIe sub-controller (ELBI), the DBI-mapped
//! configuration space and the unrolled outbound iATU regions.

// ELBI (sub-controller) registers.
pub const PCIE_IRQ0: u32 = 0x000; // INTx / PM message bank
pub const PCIE_IRQ1: u32 = 0x004; // link state bank
pub const PCIE_IRQ2: u32 = 0x008; // error / MSI aggregate bank
pub const PCIE_IRQ0_EN: u32 = 0x00C;
pub const PCIE_IRQ1_EN: u32 = 0x010;
pub const PCIE_IRQ2_EN: u32 = 0x014;
pub const PCIE_APP_LTSSM_ENABLE: u32 = 0x054;
pub const PCIE_APP_REQ_EXIT_L1: u32 = 0x06C;
pub const PCIE_APP_REQ_EXIT_L1_MODE: u32 = 0x070;
pub const XMIT_PME_TURNOFF: u32 = 0x118;
pub const PCIE_ELBI_RDLH_LINKUP: u32 = 0x304; // current LTSSM state in the low 6 bits
pub const PCIE_PM_DSTATE: u32 = 0x308;
pub const PCIE_SOFT_RESET: u32 = 0x3A4;
pub const PCIE_QCH_SEL: u32 = 0x3A8;
pub const PCIE_MSTR_PEND_SEL_NAK: u32 = 0x474;
pub const PCIE_STATE_HISTORY_CHECK: u32 = 0xC00;
pub const PCIE_STATE_POWER_S: u32 = 0xC04;
pub const PCIE_STATE_POWER_M: u32 = 0xC08;
pub const PCIE_HISTORY_REG_BASE: u32 = 0xC0C; // 32 ring entries
pub const PCIE_QCH_AUX: u32 = 0xD5C;

pub const PCIE_ELBI_LTSSM_ENABLE: u32 = 0x1;
pub const PCIE_ELBI_LTSSM_DISABLE: u32 = 0x0;
pub const APP_REQ_EXIT_L1_MODE: u32 = 0x1;
pub const L1_REQ_NAK_CONTROL_MASTER: u32 = 0x2;
pub const NACK_ENABLE: u32 = 0x1;
pub const SOFT_PWR_RESET: u32 = 1 << 0;
pub const HISTORY_BUFFER_ENABLE: u32 = 1 << 31;
pub const HISTORY_BUFFER_CONDITION_SEL: u32 = 1 << 16;
pub const HISTORY_RING_ENTRIES: u32 = 32;

// IRQ0 bits.
pub const IRQ_INTA_ASSERT: u32 = 1 << 0;
pub const IRQ_INTB_ASSERT: u32 = 1 << 2;
pub const IRQ_INTC_ASSERT: u32 = 1 << 4;
pub const IRQ_INTD_ASSERT: u32 = 1 << 6;
pub const IRQ_RADM_PM_TO_ACK: u32 = 1 << 18;

// IRQ1 bits.
pub const IRQ_LINK_DOWN: u32 = 1 << 10;

// IRQ2 bits.
pub const IRQ_MSI_RISING_ASSERT: u32 = 1 << 8;
pub const IRQ_MSI_CTRL_EN_RISING_EDG: u32 = 1 << 12;
pub const IRQ_RADM_CPL_TIMEOUT: u32 = 1 << 24;

// LTSSM state codes (PCIE_ELBI_RDLH_LINKUP low bits).
pub const S_DETECT_QUIET: u32 = 0x00;
pub const S_CFG_LINKWD_START: u32 = 0x0D;
pub const S_L0: u32 = 0x11;
pub const S_L1_IDLE: u32 = 0x14;
pub const S_L2_IDLE: u32 = 0x15;
pub const LTSSM_STATE_MASK: u32 = 0x3F;
pub const LINK_ACTIVE_MASK: u32 = 0x1F;

// Standard configuration space.
pub const PCI_VENDOR_ID: u32 = 0x00;
pub const PCI_DEVICE_ID: u32 = 0x02;
pub const PCI_CLASS_REVISION: u32 = 0x08;
pub const PCI_CLASS_NETWORK_OTHER: u32 = 0x0280;
pub const PCI_CAPABILITY_LIST: u32 = 0x34;
pub const PCI_EXT_CAP_BASE: u32 = 0x100;

pub const PCI_CAP_ID_PM: u8 = 0x01;
pub const PCI_CAP_ID_MSI: u8 = 0x05;
// Multiple-message-capable field of the MSI message control word, which sits
// in the upper half of the dword at the capability offset.
pub const PCI_MSI_FLAGS_QMASK: u32 = 0x000E;
pub const PCI_CAP_ID_EXP: u8 = 0x10;
pub const PCI_EXT_CAP_ID_LTR: u16 = 0x18;
pub const PCI_EXT_CAP_ID_L1SS: u16 = 0x1E;

pub const PCI_VENDOR_ID_SAMSUNG: u32 = 0x144D;
pub const PCI_DEVICE_ID_EXYNOS: u32 = 0xECEC;

// PCI Express capability registers, relative to the capability offset.
pub const PCI_EXP_DEVCAP: u32 = 0x04;
pub const PCI_EXP_DEVCAP_PAYLOAD: u32 = 0x07;
pub const PCI_EXP_LNKCAP: u32 = 0x0C;
pub const PCI_EXP_LNKCAP_L1EL: u32 = 0x0003_8000;
pub const PCI_EXP_LNKCAP_L1EL_64USEC: u32 = 0x0003_0000;
pub const PCI_EXP_LNKCAP_MLW_SHIFT: u32 = 4;
pub const PCI_EXP_DEVCTL: u32 = 0x08;
pub const PCI_EXP_DEVCTL_PAYLOAD: u32 = 0x00E0;
pub const PCI_EXP_DEVCTL_PAYLOAD_SHIFT: u32 = 5;
pub const PCI_EXP_LNKCTL: u32 = 0x10;
pub const PCI_EXP_LNKCTL_ASPMC: u32 = 0x0003;
pub const PCI_EXP_LNKCTL_ASPM_L1: u32 = 0x0002;
pub const PCI_EXP_LNKCTL_CCC: u32 = 0x0040;
pub const PCI_EXP_LNKCTL_CLKREQ_EN: u32 = 0x0100;
pub const PCI_EXP_LNKSTA_CLS: u32 = 0x000F;
pub const PCI_EXP_LNKSTA_NLW: u32 = 0x03F0;
pub const PCI_EXP_LNKSTA_SPEED_SHIFT: u32 = 16;
pub const PCI_EXP_LNKSTA_LANE_SHIFT: u32 = 20;
pub const PCI_EXP_DEVCTL2: u32 = 0x28;
pub const PCI_EXP_DEVCTL2_COMP_TIMEOUT: u32 = 0x000F;
pub const PCI_EXP_DEVCTL2_COMP_TOUT_6_2MS: u32 = 0x0002;
pub const PCI_EXP_DEVCTL2_LTR_EN: u32 = 0x0400;
pub const PCI_EXP_LNKCTL2: u32 = 0x30;
pub const PCI_EXP_LNKCTL2_TLS: u32 = 0x000F;

// L1 substates extended capability, relative to the capability offset.
pub const PCI_L1SS_CTL1: u32 = 0x08;
pub const PCI_L1SS_CTL2: u32 = 0x0C;
pub const PCI_L1SS_CTL1_ALL_PM_EN: u32 = 0x0000_000F;
pub const PCI_L1SS_CTL1_CM_RESTORE_TIME: u32 = 0x0000_FF00;
pub const PCI_L1SS_CTL1_LTR_L12_TH_VALUE: u32 = 0x03FF_0000;
pub const PCI_L1SS_CTL1_LTR_L12_TH_SCALE: u32 = 0xE000_0000;

// L1SS timing encodings shared by the endpoint configuration tables.
pub const PCI_L1SS_CTL2_TPOWERON_180US: u32 = 0x00F9;
pub const PCI_L1SS_TCOMMON_32US: u32 = 0x2000;
pub const PCI_L1SS_TCOMMON_70US: u32 = 0x4600;
pub const PCI_L1SS_CTL1_LTR_THRE_VAL: u32 = 0x4003_0000;
pub const PCI_L1SS_CTL1_LTR_THRE_VAL_0US: u32 = 0x0000_0000;

// LTR extended capability.
pub const PCI_LTR_MAX_SNOOP_LAT: u32 = 0x04;
pub const BCM_MAX_SNOOP_LAT_VAL: u32 = 0x1003_1003;

// DesignWare port logic registers (DBI).
pub const PCIE_PORT_AFR: u32 = 0x70C;
pub const PORT_AFR_L1_ENTRANCE_LAT_MASK: u32 = 0x0700_0000;
pub const PORT_AFR_L1_ENTRANCE_LAT_64US: u32 = 0x0700_0000;
pub const PCIE_LINK_WIDTH_SPEED_CONTROL: u32 = 0x80C;
pub const PORT_LOGIC_SPEED_CHANGE: u32 = 1 << 17;
pub const PCIE_MSI_ADDR_LO: u32 = 0x820;
pub const PCIE_MSI_ADDR_HI: u32 = 0x824;
pub const PCIE_MSI_INTR0_ENABLE: u32 = 0x828;
pub const PCIE_MSI_INTR0_MASK: u32 = 0x82C;
pub const PCIE_MSI_INTR0_STATUS: u32 = 0x830;
pub const MSI_REG_CTRL_BLOCK_SIZE: u32 = 0xC;
pub const PCIE_PORT_COHERENCY_CTR_3: u32 = 0x8E8;
pub const PCIE_MISC_CONTROL_1_OFF: u32 = 0x8BC;
pub const PCIE_DBI_RO_WR_EN: u32 = 1 << 0;
pub const PCIE_PORT_MULTI_LANE_CTRL: u32 = 0x8C0;
pub const PORT_MLTI_DIR_LANE_CHANGE: u32 = 1 << 6;
pub const PCIE_PORT_AUX_CLK_FREQ: u32 = 0xB40;
pub const PORT_AUX_CLK_FREQ_76MHZ: u32 = 0x4C;
pub const PCIE_PORT_L1_SUBSTATES: u32 = 0xB44;
pub const PORT_L1_SUBSTATES_VAL: u32 = 0xA3;

// Unrolled outbound iATU regions (DBI). Region stride is 0x200.
pub const PCIE_ATU_OUTBOUND_BASE: u32 = 0x30_0000;
pub const PCIE_ATU_REGION_STRIDE: u32 = 0x200;
pub const PCIE_ATU_CR1: u32 = 0x00;
pub const PCIE_ATU_CR2: u32 = 0x04;
pub const PCIE_ATU_LOWER_BASE: u32 = 0x08;
pub const PCIE_ATU_UPPER_BASE: u32 = 0x0C;
pub const PCIE_ATU_LIMIT: u32 = 0x10;
pub const PCIE_ATU_LOWER_TARGET: u32 = 0x14;
pub const PCIE_ATU_UPPER_TARGET: u32 = 0x18;
pub const PCIE_ATU_TYPE_MEM: u32 = 0x0;
pub const PCIE_ATU_TYPE_CFG0: u32 = 0x4;
pub const PCIE_ATU_ENABLE: u32 = 1 << 31;

/// Region indices of the three outbound viewports.
pub const ATU_REGION_CFG0: u32 = 0;
pub const ATU_REGION_MEM: u32 = 1;
pub const ATU_REGION_BTL: u32 = 2;

/// Byte offset of an unrolled outbound iATU register.
pub fn atu_outbound_reg(region: u32, reg: u32) -> u32 {
    PCIE_ATU_OUTBOUND_BASE + region * PCIE_ATU_REGION_STRIDE + reg
}

/// Encoded bus/device/function target of the CFG0 viewport.
pub fn atu_busdev(bus: u8, dev: u8, func: u8) -> u32 {
    ((bus as u32) << 24) | ((dev as u32) << 19) | ((func as u32) << 16)
}

// Bounded polling budgets, in 10 microsecond steps unless noted.
pub const MAX_LINK_UP_TIMEOUT: u32 = 12_000; // 120ms
pub const MAX_SPEED_CHECK_TIMEOUT: u32 = 10_000; // 100ms
pub const MAX_L2_TIMEOUT: u32 = 2_000; // 20ms
pub const MAX_L1_EXIT_TIMEOUT: u32 = 300; // 3ms
pub const MAX_PME_TURNOFF_RETRIES: u32 = 5;
pub const DEFAULT_LINK_UP_RETRIES: u32 = 10;

pub const MAX_RC_NUM: usize = 2;

/// Human readable LTSSM state for log output.
pub fn ltssm_state_name(state: u32) -> &'static str {
    match state {
        0x00..=0x03 => "DETECT",
        0x04..=0x08 => "POLLING",
        0x09..=0x0C => "CONFIG",
        0x0D..=0x10 => "RECOVERY",
        0x11 => "L0",
        0x12 => "L0S",
        0x13..=0x14 => "L1",
        0x15..=0x17 => "L2",
        0x18..=0x1F => "DISABLED",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busdev_encoding() {
        assert_eq!(atu_busdev(1, 0, 0), 0x0100_0000);
        assert_eq!(atu_busdev(2, 3, 1), 0x0219_0000);
    }

    #[test]
    fn atu_region_layout() {
        assert_eq!(atu_outbound_reg(0, PCIE_ATU_CR1), 0x30_0000);
        assert_eq!(atu_outbound_reg(1, PCIE_ATU_LOWER_BASE), 0x30_0208);
        assert_eq!(atu_outbound_reg(2, PCIE_ATU_UPPER_TARGET), 0x30_0418);
    }
}
