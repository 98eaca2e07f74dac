// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scriptable in-memory hardware backend.
//!
//! `FakeHw` models just enough of the sub-controller for the state machine to
//! run end to end: a programmable LTSSM answer sequence, write-one-to-clear
//! interrupt banks, an automatic PME turn-off handshake and prebuilt root and
//! endpoint configuration spaces with realistic capability chains. Every
//! register write is logged so tests can assert on exact write sequences.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use sync::Mutex;

use crate::hw::Hardware;
use crate::hw::PhyOps;
use crate::hw::Platform;
use crate::hw::Window;
use crate::regs::*;

// Capability layout of the prebuilt config spaces.
const CAP_PM: u32 = 0x40;
const CAP_MSI: u32 = 0x50;
const CAP_EXP: u32 = 0x70;
const EXT_CAP_LTR: u32 = 0x140;

#[derive(Default)]
struct Regs {
    map: BTreeMap<(Window, u32), u32>,
}

impl Regs {
    fn get(&self, window: Window, offset: u32) -> u32 {
        self.map.get(&(window, offset)).copied().unwrap_or(0)
    }

    fn set(&mut self, window: Window, offset: u32, val: u32) {
        self.map.insert((window, offset), val);
    }
}

pub struct FakeHw {
    regs: Mutex<Regs>,
    write_log: Mutex<Vec<(Window, u32, u32)>>,
    // Pending LTSSM poll answers; once drained the live register value wins.
    ltssm_script: Mutex<VecDeque<u32>>,
    link_trains: AtomicBool,
    ack_pme: AtomicBool,
    perst: AtomicBool,
    perst_deasserts: AtomicU32,
    udelay_us: AtomicU64,
    msleep_ms: AtomicU64,
    active: AtomicBool,
    platform_log: Mutex<Vec<&'static str>>,
    phy_log: Mutex<Vec<&'static str>>,
    phy_seq: Mutex<Vec<phycal::SeqEntry>>,
    qos_khz: AtomicU32,
}

impl FakeHw {
    pub fn new() -> FakeHw {
        let hw = FakeHw {
            regs: Mutex::new(Regs::default()),
            write_log: Mutex::new(Vec::new()),
            ltssm_script: Mutex::new(VecDeque::new()),
            link_trains: AtomicBool::new(true),
            ack_pme: AtomicBool::new(true),
            perst: AtomicBool::new(false),
            perst_deasserts: AtomicU32::new(0),
            udelay_us: AtomicU64::new(0),
            msleep_ms: AtomicU64::new(0),
            active: AtomicBool::new(false),
            platform_log: Mutex::new(Vec::new()),
            phy_log: Mutex::new(Vec::new()),
            phy_seq: Mutex::new(Vec::new()),
            qos_khz: AtomicU32::new(0),
        };
        hw.build_config_spaces();
        hw
    }

    fn build_config_spaces(&self) {
        let mut regs = self.regs.lock();

        for window in [Window::Dbi, Window::EpCfg] {
            regs.set(window, PCI_CAPABILITY_LIST, CAP_PM);
            regs.set(window, CAP_PM, (CAP_MSI << 8) | PCI_CAP_ID_PM as u32);
            regs.set(window, CAP_MSI, (CAP_EXP << 8) | PCI_CAP_ID_MSI as u32);
            regs.set(window, CAP_EXP, PCI_CAP_ID_EXP as u32);
            // Gen3 x1 supported, currently linked at gen3 x1.
            regs.set(window, CAP_EXP + PCI_EXP_LNKCAP, 0x0000_0013);
            regs.set(window, CAP_EXP + PCI_EXP_LNKCTL, 0x0013_0000);
            // Max payload 256 bytes.
            regs.set(window, CAP_EXP + PCI_EXP_DEVCAP, 0x0000_0001);
        }
        regs.set(
            Window::Dbi,
            PCI_VENDOR_ID,
            (0xA544 << 16) | PCI_VENDOR_ID_SAMSUNG,
        );
        regs.set(Window::EpCfg, PCI_VENDOR_ID, 0x1101_17CB);

        // Root port: L1SS only. Endpoint: L1SS chained to LTR.
        regs.set(Window::Dbi, PCI_EXT_CAP_BASE, 0x0001_0000 | PCI_EXT_CAP_ID_L1SS as u32);
        regs.set(
            Window::EpCfg,
            PCI_EXT_CAP_BASE,
            (EXT_CAP_LTR << 20) | 0x0001_0000 | PCI_EXT_CAP_ID_L1SS as u32,
        );
        regs.set(Window::EpCfg, EXT_CAP_LTR, 0x0001_0000 | PCI_EXT_CAP_ID_LTR as u32);

        regs.set(Window::Elbi, PCIE_ELBI_RDLH_LINKUP, S_DETECT_QUIET);
    }

    /// Offsets of the fake PCI Express, MSI and L1SS capabilities, identical
    /// in both config spaces.
    pub fn exp_cap() -> u32 {
        CAP_EXP
    }

    pub fn msi_cap() -> u32 {
        CAP_MSI
    }

    pub fn l1ss_cap() -> u32 {
        PCI_EXT_CAP_BASE
    }

    /// LTR capability offset, endpoint side only.
    pub fn ltr_cap() -> u32 {
        EXT_CAP_LTR
    }

    pub fn reg(&self, window: Window, offset: u32) -> u32 {
        self.regs.lock().get(window, offset)
    }

    pub fn set_reg(&self, window: Window, offset: u32, val: u32) {
        self.regs.lock().set(window, offset, val);
    }

    /// Answers the next `polls` LTSSM reads with a recovery state before the
    /// link reaches L0.
    pub fn link_up_after(&self, polls: u32) {
        let mut script = self.ltssm_script.lock();
        for _ in 0..polls {
            script.push_back(S_CFG_LINKWD_START);
        }
    }

    /// The link never trains, regardless of how often LTSSM is re-enabled.
    pub fn never_link_up(&self) {
        self.link_trains.store(false, Ordering::SeqCst);
        self.set_reg(Window::Elbi, PCIE_ELBI_RDLH_LINKUP, S_CFG_LINKWD_START);
    }

    /// Suppresses the automatic PME turn-off acknowledge.
    pub fn drop_pme_ack(&self) {
        self.ack_pme.store(false, Ordering::SeqCst);
    }

    /// Raises interrupt bits as the hardware would; `handle_irq` reads and
    /// acks them.
    pub fn inject_irq(&self, bank: u32, bits: u32) {
        let mut regs = self.regs.lock();
        let old = regs.get(Window::Elbi, bank);
        regs.set(Window::Elbi, bank, old | bits);
    }

    pub fn perst_deasserts(&self) -> u32 {
        self.perst_deasserts.load(Ordering::SeqCst)
    }

    pub fn udelay_total_us(&self) -> u64 {
        self.udelay_us.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_log.lock().len()
    }

    pub fn writes_to(&self, window: Window) -> Vec<(u32, u32)> {
        self.write_log
            .lock()
            .iter()
            .filter(|(w, _, _)| *w == window)
            .map(|(_, offset, val)| (*offset, *val))
            .collect()
    }

    pub fn clear_write_log(&self) {
        self.write_log.lock().clear();
    }

    pub fn platform_calls(&self) -> Vec<&'static str> {
        self.platform_log.lock().clone()
    }

    pub fn phy_calls(&self) -> Vec<&'static str> {
        self.phy_log.lock().clone()
    }

    pub fn qos_khz(&self) -> u32 {
        self.qos_khz.load(Ordering::SeqCst)
    }

    /// Installs a calibration sequence replayed by [`PhyOps::config`].
    pub fn load_phy_sequence(&self, entries: Vec<phycal::SeqEntry>) {
        *self.phy_seq.lock() = entries;
    }

    fn phy_window(id: u8) -> Window {
        match id {
            0 => Window::Phy,
            1 => Window::PhyPcs,
            2 => Window::Sysreg,
            _ => Window::Elbi,
        }
    }
}

impl Default for FakeHw {
    fn default() -> Self {
        FakeHw::new()
    }
}

impl Hardware for FakeHw {
    fn read(&self, window: Window, offset: u32) -> u32 {
        if window == Window::Elbi && offset == PCIE_ELBI_RDLH_LINKUP {
            let scripted = {
                let mut script = self.ltssm_script.lock();
                script.pop_front().map(|state| (state, script.is_empty()))
            };
            if let Some((state, drained)) = scripted {
                // Once the script drains the link has trained.
                let next = if drained && self.link_trains.load(Ordering::SeqCst) {
                    S_L0
                } else {
                    state
                };
                self.regs.lock().set(window, offset, next);
                return state;
            }
        }
        self.regs.lock().get(window, offset)
    }

    fn write(&self, window: Window, offset: u32, val: u32) {
        self.write_log.lock().push((window, offset, val));
        let mut regs = self.regs.lock();
        if window == Window::Elbi {
            match offset {
                // Interrupt banks are write-one-to-clear.
                PCIE_IRQ0 | PCIE_IRQ1 | PCIE_IRQ2 => {
                    let old = regs.get(window, offset);
                    regs.set(window, offset, old & !val);
                    return;
                }
                PCIE_APP_LTSSM_ENABLE => {
                    regs.set(window, offset, val);
                    if self.ltssm_script.lock().is_empty() && self.link_trains.load(Ordering::SeqCst)
                    {
                        let state = if val == PCIE_ELBI_LTSSM_ENABLE {
                            S_L0
                        } else {
                            S_DETECT_QUIET
                        };
                        regs.set(window, PCIE_ELBI_RDLH_LINKUP, state);
                    }
                    return;
                }
                XMIT_PME_TURNOFF => {
                    regs.set(window, offset, val);
                    if self.ack_pme.load(Ordering::SeqCst) {
                        let irq0 = regs.get(window, PCIE_IRQ0);
                        regs.set(window, PCIE_IRQ0, irq0 | IRQ_RADM_PM_TO_ACK);
                        if self.link_trains.load(Ordering::SeqCst) {
                            regs.set(window, PCIE_ELBI_RDLH_LINKUP, S_L2_IDLE);
                        }
                    }
                    return;
                }
                _ => {}
            }
        }
        if window == Window::Dbi {
            // MSI status registers are write-one-to-clear.
            if offset >= PCIE_MSI_INTR0_STATUS
                && offset < PCIE_MSI_INTR0_STATUS + 8 * MSI_REG_CTRL_BLOCK_SIZE
                && (offset - PCIE_MSI_INTR0_STATUS) % MSI_REG_CTRL_BLOCK_SIZE == 0
            {
                let old = regs.get(window, offset);
                regs.set(window, offset, old & !val);
                return;
            }
            // Renegotiation requests take effect immediately: a target speed
            // or lane count lands in the link status fields.
            if offset == CAP_EXP + PCI_EXP_LNKCTL2 {
                regs.set(window, offset, val);
                let target = (val & PCI_EXP_LNKCTL2_TLS).clamp(1, 3);
                let lnkctl = CAP_EXP + PCI_EXP_LNKCTL;
                let old = regs.get(window, lnkctl);
                let sta = ((old >> 16) & !PCI_EXP_LNKSTA_CLS) | target;
                regs.set(window, lnkctl, (old & 0xFFFF) | (sta << 16));
                return;
            }
            if offset == PCIE_PORT_MULTI_LANE_CTRL {
                regs.set(window, offset, val);
                let lanes = (val & 0x1F).clamp(1, 2);
                let lnkctl = CAP_EXP + PCI_EXP_LNKCTL;
                let old = regs.get(window, lnkctl);
                let sta = ((old >> 16) & !PCI_EXP_LNKSTA_NLW) | (lanes << 4);
                regs.set(window, lnkctl, (old & 0xFFFF) | (sta << 16));
                return;
            }
        }
        regs.set(window, offset, val);
    }

    fn set_perst(&self, on: bool) {
        if on && !self.perst.swap(on, Ordering::SeqCst) {
            self.perst_deasserts.fetch_add(1, Ordering::SeqCst);
        } else {
            self.perst.store(on, Ordering::SeqCst);
        }
    }

    fn perst(&self) -> bool {
        self.perst.load(Ordering::SeqCst)
    }

    fn udelay(&self, us: u32) {
        self.udelay_us.fetch_add(us.into(), Ordering::SeqCst);
    }

    fn msleep(&self, ms: u32) {
        self.msleep_ms.fetch_add(ms.into(), Ordering::SeqCst);
    }
}

impl Platform for FakeHw {
    fn runtime_get(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.platform_log.lock().push("runtime_get");
    }

    fn runtime_put(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.platform_log.lock().push("runtime_put");
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn sysmmu_enable(&self) {
        self.platform_log.lock().push("sysmmu_enable");
    }

    fn sysmmu_disable(&self) {
        self.platform_log.lock().push("sysmmu_disable");
    }

    fn pinctrl_active(&self) {
        self.platform_log.lock().push("pinctrl_active");
    }

    fn pinctrl_idle(&self) {
        self.platform_log.lock().push("pinctrl_idle");
    }

    fn qos_request(&self, min_khz: u32) {
        self.qos_khz.store(min_khz, Ordering::SeqCst);
        self.platform_log.lock().push("qos_request");
    }

    fn qos_release(&self) {
        self.qos_khz.store(0, Ordering::SeqCst);
        self.platform_log.lock().push("qos_release");
    }

    fn idle_ip_active(&self) {
        self.platform_log.lock().push("idle_ip_active");
    }

    fn idle_ip_idle(&self) {
        self.platform_log.lock().push("idle_ip_idle");
    }
}

impl PhyOps for FakeHw {
    fn config(&self) {
        self.phy_log.lock().push("config");
        let entries = self.phy_seq.lock().clone();
        for entry in entries {
            let window = FakeHw::phy_window(entry.window);
            match entry.op {
                phycal::PhyRegOp::Write => {
                    self.write(window, entry.offset, entry.val);
                }
                phycal::PhyRegOp::Update => {
                    let old = self.read(window, entry.offset);
                    self.write(window, entry.offset, (old & !entry.mask) | (entry.val & entry.mask));
                }
                phycal::PhyRegOp::Delay => self.udelay(entry.delay_us),
            }
        }
    }

    fn all_pwrdn(&self) {
        self.phy_log.lock().push("all_pwrdn");
    }

    fn all_pwrdn_clear(&self) {
        self.phy_log.lock().push("all_pwrdn_clear");
    }

    fn check_rx_elecidle(&self, ignore: bool) {
        self.phy_log
            .lock()
            .push(if ignore { "elecidle_ignore" } else { "elecidle_enable" });
    }

    fn phy_clock_enable(&self, enable: bool) {
        self.phy_log
            .lock()
            .push(if enable { "phyclk_on" } else { "phyclk_off" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_banks_are_write_one_to_clear() {
        let hw = FakeHw::new();
        hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN | 0x1);
        let val = hw.read(Window::Elbi, PCIE_IRQ1);
        hw.write(Window::Elbi, PCIE_IRQ1, IRQ_LINK_DOWN);
        assert_eq!(val, IRQ_LINK_DOWN | 0x1);
        assert_eq!(hw.read(Window::Elbi, PCIE_IRQ1), 0x1);
    }

    #[test]
    fn ltssm_script_then_live_value() {
        let hw = FakeHw::new();
        hw.link_up_after(2);
        hw.write(Window::Elbi, PCIE_APP_LTSSM_ENABLE, PCIE_ELBI_LTSSM_ENABLE);
        assert_eq!(hw.read(Window::Elbi, PCIE_ELBI_RDLH_LINKUP), S_CFG_LINKWD_START);
        assert_eq!(hw.read(Window::Elbi, PCIE_ELBI_RDLH_LINKUP), S_CFG_LINKWD_START);
        // Script drained: the link has trained.
        assert_eq!(hw.read(Window::Elbi, PCIE_ELBI_RDLH_LINKUP), S_L0);
        assert_eq!(hw.read(Window::Elbi, PCIE_ELBI_RDLH_LINKUP), S_L0);
    }

    #[test]
    fn pme_turnoff_acks_and_reaches_l2() {
        let hw = FakeHw::new();
        hw.write(Window::Elbi, XMIT_PME_TURNOFF, 0x1);
        assert_ne!(hw.read(Window::Elbi, PCIE_IRQ0) & IRQ_RADM_PM_TO_ACK, 0);
        assert_eq!(hw.read(Window::Elbi, PCIE_ELBI_RDLH_LINKUP), S_L2_IDLE);
    }

    #[test]
    fn perst_deasserts_counted_on_rising_edge_only() {
        let hw = FakeHw::new();
        hw.set_perst(true);
        hw.set_perst(true);
        hw.set_perst(false);
        hw.set_perst(true);
        assert_eq!(hw.perst_deasserts(), 2);
    }

    #[test]
    fn phy_config_replays_sequence() {
        let hw = FakeHw::new();
        hw.load_phy_sequence(vec![
            phycal::SeqEntry {
                op: phycal::PhyRegOp::Write,
                window: 0,
                offset: 0x10,
                val: 0xAB,
                mask: 0,
                delay_us: 0,
            },
            phycal::SeqEntry {
                op: phycal::PhyRegOp::Update,
                window: 0,
                offset: 0x10,
                val: 0x100,
                mask: 0xF00,
                delay_us: 0,
            },
            phycal::SeqEntry {
                op: phycal::PhyRegOp::Delay,
                window: 0,
                offset: 0,
                val: 0,
                mask: 0,
                delay_us: 7,
            },
        ]);
        hw.config();
        assert_eq!(hw.reg(Window::Phy, 0x10), 0x1AB);
        assert_eq!(hw.udelay_total_us(), 7);
    }
}
