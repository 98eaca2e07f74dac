// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The per-channel controller: power state machine, configuration space
//! accessors and diagnostics. Link training lives in `link.rs`, L1 substate
//! control in `l1ss.rs`, interrupt handling in `irq.rs` and MSI plumbing in
//! `msi.rs`.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::sync::Weak;
use std::thread;
use std::thread::JoinHandle;

use enumn::N;
use log::debug;
use log::error;
use log::info;
use log::warn;
use sync::Mutex;

use crate::atu::Atu;
use crate::cap;
use crate::cap::CapOffsets;
use crate::config::ChannelConfig;
use crate::ep_cfg;
use crate::ep_cfg::EpConfig;
use crate::events::EventRegistry;
use crate::hw::Hardware;
use crate::hw::Platform;
use crate::hw::PhyOps;
use crate::hw::Window;
use crate::irq::RecoveryWork;
use crate::l1ss::L1ssCtrlId;
use crate::msi::MsiHandler;
use crate::msi::MAX_MSI_CTRLS;
use crate::regs::*;
use crate::Error;
use crate::Result;

/// Link state of a channel. Stored atomically so the interrupt path and
/// status queries can read it without taking `conf_lock`.
#[derive(N, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum LinkState {
    Down = 0,
    UpTry = 1,
    DownTry = 2,
    Up = 3,
    /// PHY powered down with the link logically kept alive. Entered only by
    /// endpoint-coordinated power optimization, never by this driver itself.
    PhyOptOff = 4,
}

// Dwords of endpoint config space saved across power cycles.
const EP_SAVE_DWORDS: u32 = 64;

/// State guarded by `conf_lock`: the L1SS inhibit mask, cached capability
/// offsets and the saved endpoint config image.
pub(crate) struct ConfState {
    pub l1ss_disable_mask: L1ssCtrlId,
    pub rc_caps: Option<CapOffsets>,
    pub ep_caps: Option<CapOffsets>,
    pub saved_ep_config: Option<Vec<u32>>,
}

pub struct ExynosPcieRc {
    pub(crate) config: ChannelConfig,
    pub(crate) ep: &'static dyn EpConfig,
    pub(crate) hw: Arc<dyn Hardware>,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) phy: Arc<dyn PhyOps>,
    pub(crate) atu: Atu,
    state: AtomicU32,
    irq_enabled: AtomicBool,
    pub(crate) sudden_linkdown: AtomicBool,
    pub(crate) cpl_timeout_recovery: AtomicBool,
    ep_scanned: AtomicBool,
    // MSI capability offset of the endpoint, zero until discovered. Kept out
    // of `conf` because read fixups run with the conf lock already held.
    ep_msi_cap: AtomicU32,
    pub(crate) linkdown_cnt: AtomicU32,
    /// Serializes raw register access, including the link-down DBI bracket.
    pub(crate) reg_lock: Mutex<()>,
    pub(crate) conf: Mutex<ConfState>,
    pub(crate) l1_exit_lock: Mutex<()>,
    pub(crate) events: EventRegistry,
    pub(crate) sep_msi: Mutex<[Option<MsiHandler>; MAX_MSI_CTRLS]>,
    pub(crate) msi_demux_count: AtomicU32,
    work_tx: Mutex<Option<Sender<RecoveryWork>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExynosPcieRc {
    pub fn new(
        config: ChannelConfig,
        hw: Arc<dyn Hardware>,
        platform: Arc<dyn Platform>,
        phy: Arc<dyn PhyOps>,
    ) -> Result<Arc<ExynosPcieRc>> {
        let ep = ep_cfg::from_compatible(&config.compatible)
            .ok_or_else(|| Error::UnknownEndpoint(config.compatible.clone()))?;

        let (work_tx, work_rx) = mpsc::channel();
        let (weak_tx, weak_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name(format!("pcie{}_recovery", config.ch_num))
            .spawn(move || {
                // The controller does not exist yet when this thread starts;
                // its handle arrives once construction finishes.
                let weak: Weak<ExynosPcieRc> = match weak_rx.recv() {
                    Ok(weak) => weak,
                    Err(_) => return,
                };
                crate::irq::recovery_worker(weak, work_rx);
            })
            .map_err(Error::SpawnWorker)?;

        let rc = Arc::new(ExynosPcieRc {
            atu: Atu::new(hw.clone()),
            config,
            ep,
            hw,
            platform,
            phy,
            state: AtomicU32::new(LinkState::Down as u32),
            irq_enabled: AtomicBool::new(false),
            sudden_linkdown: AtomicBool::new(false),
            cpl_timeout_recovery: AtomicBool::new(false),
            ep_scanned: AtomicBool::new(false),
            ep_msi_cap: AtomicU32::new(0),
            linkdown_cnt: AtomicU32::new(0),
            reg_lock: Mutex::new(()),
            conf: Mutex::new(ConfState {
                l1ss_disable_mask: L1ssCtrlId::empty(),
                rc_caps: None,
                ep_caps: None,
                saved_ep_config: None,
            }),
            l1_exit_lock: Mutex::new(()),
            events: EventRegistry::default(),
            sep_msi: Mutex::new(Default::default()),
            msi_demux_count: AtomicU32::new(0),
            work_tx: Mutex::new(Some(work_tx)),
            worker: Mutex::new(Some(worker)),
        });
        if weak_tx.send(Arc::downgrade(&rc)).is_err() {
            warn!("pcie{}: recovery worker exited early", rc.config.ch_num);
        }
        Ok(rc)
    }

    pub fn ch_num(&self) -> u32 {
        self.config.ch_num
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        LinkState::n(self.state.load(Ordering::Acquire)).unwrap_or(LinkState::Down)
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Brings the channel up: power rails, PHY, link training and endpoint
    /// enumeration. No-op if the link is already up. On failure everything is
    /// unwound through [`ExynosPcieRc::poweroff`].
    pub fn poweron(&self) -> Result<()> {
        match self.state() {
            LinkState::Down => {}
            LinkState::Up => return Ok(()),
            state => return Err(Error::WrongState(state)),
        }
        info!("pcie{}: power on", self.config.ch_num);

        self.platform.runtime_get();
        self.platform.idle_ip_active();
        if self.config.int_min_lock_khz > 0 {
            self.platform.qos_request(self.config.int_min_lock_khz);
        }
        if self.config.use_sysmmu {
            self.platform.sysmmu_enable();
        }
        self.platform.pinctrl_active();
        self.phy.all_pwrdn_clear();
        self.set_state(LinkState::UpTry);
        self.enable_irq();

        if let Err(e) = self.establish_link() {
            error!("pcie{}: link bring-up failed: {}", self.config.ch_num, e);
            // Force the state the unwind path acts on.
            self.set_state(LinkState::Up);
            self.poweroff();
            return Err(e);
        }

        self.set_state(LinkState::Up);
        self.sudden_linkdown.store(false, Ordering::SeqCst);
        if let Err(e) = self.finish_link_up() {
            error!(
                "pcie{}: post link-up setup failed: {}",
                self.config.ch_num, e
            );
            self.poweroff();
            return Err(e);
        }
        info!("pcie{}: power on done", self.config.ch_num);
        Ok(())
    }

    /// Endpoint-facing setup once the link holds L0. Failures here unwind
    /// through [`ExynosPcieRc::poweroff`] just like a training failure, and a
    /// failed first enumeration is retried on the next power cycle.
    fn finish_link_up(&self) -> Result<()> {
        self.ep.msi_init(self.hw.as_ref(), &self.config);
        if self.config.use_separated_msi {
            self.enable_sep_msi();
        }
        if !self.ep_scanned.load(Ordering::SeqCst) {
            self.scan_endpoint()?;
            self.ep_scanned.store(true, Ordering::SeqCst);
        } else {
            self.restore_ep_config();
        }
        self.cpl_timeout_recovery.store(false, Ordering::SeqCst);
        self.check_max_payload()?;
        self.apply_l1ss_after_linkup()
    }

    /// Takes the link down and releases every resource `poweron` claimed.
    /// Callable from any context; does nothing when the link is already down.
    pub fn poweroff(&self) {
        match self.state() {
            LinkState::Up | LinkState::DownTry => {}
            state => {
                debug!("pcie{}: power off skipped in {:?}", self.config.ch_num, state);
                return;
            }
        }
        info!("pcie{}: power off", self.config.ch_num);
        self.set_state(LinkState::DownTry);
        self.disable_irq();
        {
            let _conf = self.conf.lock();
            self.send_pme_turn_off();
        }
        self.set_state(LinkState::Down);

        let delays = self.ep.delays();
        if delays.mdelay_before_perst_low > 0 {
            self.hw.msleep(delays.mdelay_before_perst_low);
        }
        if self.config.use_sysmmu {
            self.platform.sysmmu_disable();
        }
        if self.config.use_ia {
            self.hw.write(Window::Ia, 0x000, 0x0);
        }
        self.disable_history_buffer();
        self.hw.set_perst(false);
        if delays.mdelay_after_perst_low > 0 {
            self.hw.msleep(delays.mdelay_after_perst_low);
        }
        self.hw
            .write(Window::Elbi, PCIE_APP_LTSSM_ENABLE, PCIE_ELBI_LTSSM_DISABLE);
        {
            let _reg = self.reg_lock.lock();
            self.hw.write(Window::Elbi, PCIE_SOFT_RESET, SOFT_PWR_RESET);
            self.hw.udelay(20);
            self.hw.write(Window::Elbi, PCIE_SOFT_RESET, 0x0);
        }
        self.phy.all_pwrdn();
        self.atu.invalidate();
        self.platform.pinctrl_idle();
        if self.config.int_min_lock_khz > 0 {
            self.platform.qos_release();
        }
        self.platform.idle_ip_idle();
        self.platform.runtime_put();
        info!("pcie{}: power off done", self.config.ch_num);
    }

    pub fn power_cycle(&self) -> Result<()> {
        self.poweroff();
        self.poweron()
    }

    pub fn pm_suspend(&self) {
        if self.state() == LinkState::Up {
            info!("pcie{}: suspend", self.config.ch_num);
            self.poweroff();
        }
    }

    pub fn pm_resume(&self) -> Result<()> {
        self.poweron()
    }

    /// PME turn-off handshake: ask the endpoint to stop initiating traffic,
    /// wait for the acknowledge message and then for the link to settle in
    /// L2. Best effort with a bounded number of re-sends; a stuck endpoint
    /// gets its reset yanked regardless.
    fn send_pme_turn_off(&self) {
        for attempt in 1..=MAX_PME_TURNOFF_RETRIES {
            self.hw.write(Window::Elbi, XMIT_PME_TURNOFF, 0x1);

            let mut acked = false;
            for _ in 0..MAX_L2_TIMEOUT {
                let irq0 = self.hw.read(Window::Elbi, PCIE_IRQ0);
                if irq0 & IRQ_RADM_PM_TO_ACK != 0 {
                    self.hw.write(Window::Elbi, PCIE_IRQ0, IRQ_RADM_PM_TO_ACK);
                    acked = true;
                    break;
                }
                self.hw.udelay(10);
            }
            if !acked {
                debug!(
                    "pcie{}: no PME turn-off ack (attempt {})",
                    self.config.ch_num, attempt
                );
                continue;
            }
            for _ in 0..MAX_L2_TIMEOUT {
                if self.ltssm() == S_L2_IDLE {
                    debug!("pcie{}: link entered L2", self.config.ch_num);
                    return;
                }
                self.hw.udelay(10);
            }
        }
        warn!(
            "pcie{}: PME turn-off handshake failed, forcing link down",
            self.config.ch_num
        );
    }

    pub(crate) fn ltssm(&self) -> u32 {
        self.hw.read(Window::Elbi, PCIE_ELBI_RDLH_LINKUP) & LTSSM_STATE_MASK
    }

    /// Whether the link is in an operational LTSSM state. Usable from any
    /// context as a cheap health probe.
    pub fn chk_link_status(&self) -> bool {
        if !self.platform.is_active() {
            return false;
        }
        let state = self.hw.read(Window::Elbi, PCIE_ELBI_RDLH_LINKUP) & LINK_ACTIVE_MASK;
        (S_CFG_LINKWD_START..=S_L1_IDLE).contains(&state)
    }

    pub fn set_perst(&self, on: bool) {
        info!(
            "pcie{}: PERST {}",
            self.config.ch_num,
            if on { "deassert" } else { "assert" }
        );
        self.hw.set_perst(on);
    }

    /// Quiesces the channel ahead of an externally coordinated completion
    /// timeout recovery: the remote side reboots while we hold it in reset.
    pub fn set_ready_cto_recovery(&self) {
        info!("pcie{}: preparing for CPL timeout recovery", self.config.ch_num);
        self.disable_irq();
        self.hw.set_perst(false);
        self.hw
            .write(Window::Elbi, PCIE_APP_LTSSM_ENABLE, PCIE_ELBI_LTSSM_DISABLE);
    }

    pub fn linkdown_count(&self) -> u32 {
        self.linkdown_cnt.load(Ordering::SeqCst)
    }

    pub fn is_cpl_timeout_recovery(&self) -> bool {
        self.cpl_timeout_recovery.load(Ordering::SeqCst)
    }

    pub fn set_cpl_timeout_recovery(&self, active: bool) {
        self.cpl_timeout_recovery.store(active, Ordering::SeqCst);
    }

    // Configuration space accessors.
    //
    // Own (root port) config lives behind the DBI. While the link is down the
    // access must be bracketed: clock path forced on and receiver electrical
    // idle detection ignored, otherwise the read fabricates all-ones.

    pub fn rd_own_conf(&self, offset: u32) -> Result<u32> {
        self.own_conf_access(offset, None)
    }

    pub fn wr_own_conf(&self, offset: u32, val: u32) -> Result<()> {
        self.own_conf_access(offset, Some(val)).map(drop)
    }

    fn own_conf_access(&self, offset: u32, write: Option<u32>) -> Result<u32> {
        if !self.platform.is_active() {
            return Err(Error::DeviceNotFound);
        }
        let _lock = self.reg_lock.lock();
        let bracket = self.state() != LinkState::Up;
        if bracket {
            self.phy.phy_clock_enable(true);
            self.phy.check_rx_elecidle(true);
        }
        let val = match write {
            Some(val) => {
                self.hw.write(Window::Dbi, offset, val);
                val
            }
            None => self.hw.read(Window::Dbi, offset),
        };
        if bracket {
            self.phy.check_rx_elecidle(false);
            self.phy.phy_clock_enable(false);
        }
        Ok(val)
    }

    pub fn rd_ep_conf(&self, offset: u32) -> Result<u32> {
        self.check_ep_access()?;
        let val = {
            let _lock = self.reg_lock.lock();
            self.hw.read(Window::EpCfg, offset)
        };
        let msi_cap = match self.ep_msi_cap.load(Ordering::SeqCst) {
            0 => None,
            cap => Some(cap),
        };
        Ok(self.ep.fixup_ep_read(offset, val, msi_cap))
    }

    pub fn wr_ep_conf(&self, offset: u32, val: u32) -> Result<()> {
        self.check_ep_access()?;
        let _lock = self.reg_lock.lock();
        self.hw.write(Window::EpCfg, offset, val);
        Ok(())
    }

    fn check_ep_access(&self) -> Result<()> {
        if !self.platform.is_active() {
            return Err(Error::DeviceNotFound);
        }
        match self.state() {
            LinkState::Up | LinkState::UpTry => Ok(()),
            state => Err(Error::WrongState(state)),
        }
    }

    /// Offset of the root port's PCI Express capability, walking the chain on
    /// first use.
    pub(crate) fn rc_pcie_cap(&self) -> Result<u32> {
        let mut conf = self.conf.lock();
        let caps = conf
            .rc_caps
            .get_or_insert_with(|| cap::walk(self.hw.as_ref(), Window::Dbi));
        caps.pcie.ok_or(Error::NoCapability("pcie"))
    }

    pub(crate) fn enable_irq(&self) {
        if self.irq_enabled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Clear bits latched while the line was off.
        for bank in [PCIE_IRQ0, PCIE_IRQ1, PCIE_IRQ2] {
            let pending = self.hw.read(Window::Elbi, bank);
            self.hw.write(Window::Elbi, bank, pending);
        }
        self.hw.write(
            Window::Elbi,
            PCIE_IRQ0_EN,
            IRQ_INTA_ASSERT | IRQ_INTB_ASSERT | IRQ_INTC_ASSERT | IRQ_INTD_ASSERT,
        );
        self.hw.write(Window::Elbi, PCIE_IRQ1_EN, IRQ_LINK_DOWN);
        self.hw.write(Window::Elbi, PCIE_IRQ2_EN, IRQ_RADM_CPL_TIMEOUT);
    }

    pub(crate) fn disable_irq(&self) {
        if !self.irq_enabled.swap(false, Ordering::SeqCst) {
            return;
        }
        self.hw.write(Window::Elbi, PCIE_IRQ0_EN, 0x0);
        self.hw.write(Window::Elbi, PCIE_IRQ1_EN, 0x0);
        self.hw.write(Window::Elbi, PCIE_IRQ2_EN, 0x0);
    }

    /// First link-up work: discover capabilities on both ends, log the
    /// endpoint identity, program the doorbell sequencer and save the
    /// endpoint config image for fast restore on later cycles.
    fn scan_endpoint(&self) -> Result<()> {
        let rc_caps = cap::walk(self.hw.as_ref(), Window::Dbi);
        let ep_caps = cap::walk(self.hw.as_ref(), Window::EpCfg);
        let id = self.rd_ep_conf(PCI_VENDOR_ID)?;
        info!(
            "pcie{}: endpoint {:04x}:{:04x}",
            self.config.ch_num,
            id & 0xFFFF,
            id >> 16
        );
        self.ep_msi_cap
            .store(ep_caps.msi.unwrap_or(0), Ordering::SeqCst);
        {
            let mut conf = self.conf.lock();
            conf.rc_caps = Some(rc_caps);
            conf.ep_caps = Some(ep_caps);
        }
        if self.config.use_ia {
            self.ep.set_ia(self.hw.as_ref());
        }
        self.save_ep_config();
        Ok(())
    }

    fn save_ep_config(&self) {
        let mut saved = Vec::with_capacity(EP_SAVE_DWORDS as usize);
        for i in 0..EP_SAVE_DWORDS {
            saved.push(self.hw.read(Window::EpCfg, i * 4));
        }
        self.conf.lock().saved_ep_config = Some(saved);
    }

    fn restore_ep_config(&self) {
        let saved = self.conf.lock().saved_ep_config.clone();
        if let Some(saved) = saved {
            for (i, val) in saved.iter().enumerate() {
                self.hw.write(Window::EpCfg, (i as u32) * 4, *val);
            }
            debug!("pcie{}: endpoint config restored", self.config.ch_num);
        }
    }

    /// Clamps both ends to the smaller of the two supported max payload
    /// sizes. A mismatch here causes silent malformed-TLP drops.
    fn check_max_payload(&self) -> Result<()> {
        let rc_exp = self.rc_pcie_cap()?;
        let ep_exp = {
            let conf = self.conf.lock();
            conf.ep_caps
                .as_ref()
                .and_then(|caps| caps.pcie)
                .ok_or(Error::NoCapability("endpoint pcie"))?
        };
        let rc_sup = self.rd_own_conf(rc_exp + PCI_EXP_DEVCAP)? & PCI_EXP_DEVCAP_PAYLOAD;
        let ep_sup = self.rd_ep_conf(ep_exp + PCI_EXP_DEVCAP)? & PCI_EXP_DEVCAP_PAYLOAD;
        let mps = rc_sup.min(ep_sup);
        if rc_sup != ep_sup {
            warn!(
                "pcie{}: max payload mismatch (rc {} ep {}), clamping to {}",
                self.config.ch_num, rc_sup, ep_sup, mps
            );
        }
        let devctl = self.rd_own_conf(rc_exp + PCI_EXP_DEVCTL)?;
        self.wr_own_conf(
            rc_exp + PCI_EXP_DEVCTL,
            (devctl & !PCI_EXP_DEVCTL_PAYLOAD) | (mps << PCI_EXP_DEVCTL_PAYLOAD_SHIFT),
        )?;
        let devctl = self.rd_ep_conf(ep_exp + PCI_EXP_DEVCTL)?;
        self.wr_ep_conf(
            ep_exp + PCI_EXP_DEVCTL,
            (devctl & !PCI_EXP_DEVCTL_PAYLOAD) | (mps << PCI_EXP_DEVCTL_PAYLOAD_SHIFT),
        )?;
        Ok(())
    }

    // Diagnostics.

    pub(crate) fn enable_history_buffer(&self) {
        self.hw.write(Window::Elbi, PCIE_STATE_POWER_S, 0xFFFF_FFFF);
        self.hw.write(Window::Elbi, PCIE_STATE_POWER_M, 0xFFFF_FFFF);
        self.hw.write(
            Window::Elbi,
            PCIE_STATE_HISTORY_CHECK,
            HISTORY_BUFFER_ENABLE | HISTORY_BUFFER_CONDITION_SEL,
        );
    }

    fn disable_history_buffer(&self) {
        self.hw.write(Window::Elbi, PCIE_STATE_HISTORY_CHECK, 0x0);
    }

    /// Raw LTSSM history ring, oldest entry first.
    pub fn link_history(&self) -> Vec<u32> {
        (0..HISTORY_RING_ENTRIES)
            .map(|i| self.hw.read(Window::Elbi, PCIE_HISTORY_REG_BASE + i * 4))
            .collect()
    }

    pub(crate) fn dump_link_history(&self) {
        for (i, entry) in self.link_history().iter().enumerate() {
            debug!(
                "pcie{}: history[{:02}]: {} ({:#010x})",
                self.config.ch_num,
                i,
                ltssm_state_name(entry & LTSSM_STATE_MASK),
                entry
            );
        }
    }

    /// Snapshot of the registers worth looking at when the link misbehaves.
    pub fn register_dump(&self) -> Vec<(&'static str, u32)> {
        let elbi = |offset| self.hw.read(Window::Elbi, offset);
        vec![
            ("IRQ0", elbi(PCIE_IRQ0)),
            ("IRQ1", elbi(PCIE_IRQ1)),
            ("IRQ2", elbi(PCIE_IRQ2)),
            ("IRQ0_EN", elbi(PCIE_IRQ0_EN)),
            ("IRQ1_EN", elbi(PCIE_IRQ1_EN)),
            ("IRQ2_EN", elbi(PCIE_IRQ2_EN)),
            ("LTSSM_ENABLE", elbi(PCIE_APP_LTSSM_ENABLE)),
            ("RDLH_LINKUP", elbi(PCIE_ELBI_RDLH_LINKUP)),
            ("PM_DSTATE", elbi(PCIE_PM_DSTATE)),
            ("QCH_SEL", elbi(PCIE_QCH_SEL)),
            ("HISTORY_CHECK", elbi(PCIE_STATE_HISTORY_CHECK)),
        ]
    }

    pub(crate) fn log_register_dump(&self) {
        for (name, val) in self.register_dump() {
            debug!("pcie{}: {}: {:#010x}", self.config.ch_num, name, val);
        }
    }

    pub(crate) fn queue_work(&self, work: RecoveryWork) {
        if let Some(tx) = self.work_tx.lock().as_ref() {
            if tx.send(work).is_err() {
                warn!("pcie{}: recovery worker is gone", self.config.ch_num);
            }
        }
    }
}

impl Drop for ExynosPcieRc {
    fn drop(&mut self) {
        // Closing the channel stops the worker.
        self.work_tx.get_mut().take();
        if let Some(handle) = self.worker.get_mut().take() {
            // The worker itself may drop the last strong reference.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeHw;

    fn make_rc(config: ChannelConfig) -> (Arc<FakeHw>, Arc<ExynosPcieRc>) {
        let hw = Arc::new(FakeHw::new());
        let rc = ExynosPcieRc::new(config, hw.clone(), hw.clone(), hw.clone()).unwrap();
        (hw, rc)
    }

    #[test]
    fn rejects_unknown_compatible() {
        let hw = Arc::new(FakeHw::new());
        let config = ChannelConfig {
            compatible: "exynos-pcie-rc,nvme".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            ExynosPcieRc::new(config, hw.clone(), hw.clone(), hw),
            Err(Error::UnknownEndpoint(_))
        ));
    }

    #[test]
    fn poweron_reaches_link_up() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        assert_eq!(rc.state(), LinkState::Up);
        assert_eq!(hw.perst_deasserts(), 1);
        assert!(rc.chk_link_status());
    }

    #[test]
    fn poweron_when_up_is_a_noop() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        let writes = hw.write_count();
        rc.poweron().unwrap();
        assert_eq!(hw.write_count(), writes);
    }

    #[test]
    fn poweroff_when_down_writes_nothing() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        assert_eq!(rc.state(), LinkState::Down);
        rc.poweroff();
        assert_eq!(hw.write_count(), 0);
        assert!(hw.platform_calls().is_empty());
    }

    #[test]
    fn power_cycle_restores_link() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        rc.poweroff();
        assert_eq!(rc.state(), LinkState::Down);
        assert!(!hw.is_active());
        rc.poweron().unwrap();
        assert_eq!(rc.state(), LinkState::Up);
        assert_eq!(hw.perst_deasserts(), 2);
    }

    #[test]
    fn poweroff_releases_platform_in_reverse_order() {
        let mut config = ChannelConfig::default();
        config.use_sysmmu = true;
        config.int_min_lock_khz = 1_000_000;
        let (hw, rc) = make_rc(config);
        rc.poweron().unwrap();
        assert_eq!(hw.qos_khz(), 1_000_000);
        rc.poweroff();
        assert_eq!(hw.qos_khz(), 0);
        let calls = hw.platform_calls();
        let pos = |name| calls.iter().rposition(|c| *c == name).unwrap();
        assert!(pos("sysmmu_disable") < pos("pinctrl_idle"));
        assert!(pos("pinctrl_idle") < pos("qos_release"));
        assert!(pos("qos_release") < pos("idle_ip_idle"));
        assert!(pos("idle_ip_idle") < pos("runtime_put"));
    }

    #[test]
    fn pme_turnoff_retries_are_bounded() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        hw.drop_pme_ack();
        hw.clear_write_log();
        // Never aborts, even with no ack at all.
        rc.poweroff();
        assert_eq!(rc.state(), LinkState::Down);
        let pme_sends = hw
            .writes_to(Window::Elbi)
            .iter()
            .filter(|(offset, _)| *offset == XMIT_PME_TURNOFF)
            .count();
        assert_eq!(pme_sends, MAX_PME_TURNOFF_RETRIES as usize);
    }

    #[test]
    fn own_conf_rejected_while_powered_down() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        assert!(matches!(
            rc.rd_own_conf(PCI_VENDOR_ID),
            Err(Error::DeviceNotFound)
        ));
    }

    #[test]
    fn own_conf_bracketed_while_link_down() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        hw.runtime_get();
        let id = rc.rd_own_conf(PCI_VENDOR_ID).unwrap();
        assert_eq!(id & 0xFFFF, PCI_VENDOR_ID_SAMSUNG);
        let calls = hw.phy_calls();
        assert_eq!(
            calls,
            vec!["phyclk_on", "elecidle_ignore", "elecidle_enable", "phyclk_off"]
        );
    }

    #[test]
    fn ep_conf_readable_with_conf_state_held() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        // The L1SS programming path reads endpoint config while holding the
        // conf state; the accessor must not take that lock itself.
        let _conf = rc.conf.lock();
        rc.rd_ep_conf(PCI_VENDOR_ID).unwrap();
    }

    #[test]
    fn ep_msi_fixup_uses_discovered_cap() {
        let config = ChannelConfig {
            compatible: "exynos-pcie-rc,cp_ss".to_owned(),
            ..Default::default()
        };
        let (_hw, rc) = make_rc(config);
        rc.poweron().unwrap();
        // The modem quirk inflates a zero multiple-message-capable field at
        // the enumerated MSI capability.
        let msgctl = rc.rd_ep_conf(FakeHw::msi_cap()).unwrap();
        assert_eq!((msgctl >> 16) & PCI_MSI_FLAGS_QMASK, 0x4 << 1);
    }

    #[test]
    fn post_link_failure_unwinds_power() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        // An endpoint with an empty capability list trains fine but cannot
        // finish bring-up.
        hw.set_reg(Window::EpCfg, PCI_CAPABILITY_LIST, 0);
        assert!(matches!(rc.poweron(), Err(Error::NoCapability(_))));
        assert_eq!(rc.state(), LinkState::Down);
        assert!(!hw.is_active());
        assert!(!hw.perst());
    }

    #[test]
    fn ep_conf_requires_link() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        hw.runtime_get();
        assert!(matches!(
            rc.rd_ep_conf(PCI_VENDOR_ID),
            Err(Error::WrongState(LinkState::Down))
        ));
    }

    #[test]
    fn irq_enable_is_level_tracked() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.enable_irq();
        let writes = hw.write_count();
        // Second enable must not touch hardware again.
        rc.enable_irq();
        assert_eq!(hw.write_count(), writes);
        rc.disable_irq();
        rc.disable_irq();
        assert_eq!(hw.reg(Window::Elbi, PCIE_IRQ1_EN), 0x0);
    }

    #[test]
    fn suspend_resume_round_trip() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        rc.pm_suspend();
        assert_eq!(rc.state(), LinkState::Down);
        rc.pm_resume().unwrap();
        assert_eq!(rc.state(), LinkState::Up);
    }

    #[test]
    fn history_ring_has_expected_size() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        assert_eq!(rc.link_history().len(), HISTORY_RING_ENTRIES as usize);
    }
}
