// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! L1 substate control.
//!
//! Several independent parties (modem driver, WLAN driver, boot code, test
//! tools) may veto L1 substates. The controller keeps a mask of vetoes and
//! touches hardware only when the mask transitions between empty and
//! non-empty, so repeated requests from the same party never re-program the
//! registers. Requests arriving while the link is down are recorded and
//! applied on the next link-up.

use bitflags::bitflags;
use log::debug;
use log::info;

use crate::cap::CapOffsets;
use crate::controller::ConfState;
use crate::controller::ExynosPcieRc;
use crate::controller::LinkState;
use crate::hw::Window;
use crate::regs::*;
use crate::Error;
use crate::Result;

bitflags! {
    /// Who is vetoing L1 substates right now.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct L1ssCtrlId: u32 {
        const CP = 1 << 0;
        const WIFI = 1 << 1;
        const BOOT = 1 << 2;
        const TEST = 1 << 3;
    }
}

/// What an [`ExynosPcieRc::l1ss_ctrl`] call did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum L1ssOutcome {
    /// Hardware was reprogrammed.
    Applied,
    /// Only the veto mask changed; another party still holds the opposite.
    NoChange,
    /// Link is down; the mask was recorded for the next link-up.
    Deferred,
}

impl ExynosPcieRc {
    /// Enables or disables L1 substates on behalf of `id`.
    pub fn l1ss_ctrl(&self, enable: bool, id: L1ssCtrlId) -> Result<L1ssOutcome> {
        if self.state() != LinkState::Up {
            let mut conf = self.conf.lock();
            conf.l1ss_disable_mask.set(id, !enable);
            debug!(
                "pcie{}: L1SS request deferred, veto mask {:?}",
                self.config.ch_num, conf.l1ss_disable_mask
            );
            return Ok(L1ssOutcome::Deferred);
        }

        let mut guard = self.conf.lock();
        let conf = &mut *guard;
        let was_empty = conf.l1ss_disable_mask.is_empty();
        conf.l1ss_disable_mask.set(id, !enable);
        let now_empty = conf.l1ss_disable_mask.is_empty();

        let outcome = if enable && !was_empty && now_empty {
            self.l1ss_enable_hw(conf)?;
            L1ssOutcome::Applied
        } else if !enable && was_empty && !now_empty {
            self.l1ss_disable_hw(conf)?;
            L1ssOutcome::Applied
        } else {
            L1ssOutcome::NoChange
        };
        info!(
            "pcie{}: L1SS {} by {:?}: {:?}",
            self.config.ch_num,
            if enable { "enable" } else { "disable" },
            id,
            outcome
        );
        Ok(outcome)
    }

    /// Current veto mask; empty means L1 substates are allowed.
    pub fn l1ss_veto_mask(&self) -> L1ssCtrlId {
        self.conf.lock().l1ss_disable_mask
    }

    /// Applies the recorded veto mask after a fresh link-up. The hardware
    /// comes out of reset with L1 substates off, so only the all-clear case
    /// needs programming.
    pub(crate) fn apply_l1ss_after_linkup(&self) -> Result<()> {
        let mut guard = self.conf.lock();
        let conf = &mut *guard;
        if conf.l1ss_disable_mask.is_empty() {
            self.l1ss_enable_hw(conf)?;
        } else {
            debug!(
                "pcie{}: L1SS stays off after link-up, veto mask {:?}",
                self.config.ch_num, conf.l1ss_disable_mask
            );
        }
        Ok(())
    }

    fn caps(conf: &ConfState) -> Result<(CapOffsets, CapOffsets)> {
        let rc = conf.rc_caps.ok_or(Error::NoCapability("pcie"))?;
        let ep = conf.ep_caps.ok_or(Error::NoCapability("endpoint pcie"))?;
        Ok((rc, ep))
    }

    /// Programs both ends for L1.1/L1.2 entry. Root port first so it can
    /// accept whatever the endpoint negotiates, enables last.
    fn l1ss_enable_hw(&self, conf: &ConfState) -> Result<()> {
        let (rc, ep) = Self::caps(conf)?;
        let rc_l1ss = rc.l1ss.ok_or(Error::NoCapability("l1ss"))?;
        let rc_exp = rc.pcie.ok_or(Error::NoCapability("pcie"))?;
        let ep_l1ss = ep.l1ss.ok_or(Error::NoCapability("endpoint l1ss"))?;
        let ep_exp = ep.pcie.ok_or(Error::NoCapability("endpoint pcie"))?;
        let timing = self.ep.l1ss_timing();

        // Timing parameters before any enable bit.
        self.wr_own_conf(rc_l1ss + PCI_L1SS_CTL2, timing.tpoweron)?;
        let ctl1 = self.rd_own_conf(rc_l1ss + PCI_L1SS_CTL1)?;
        self.wr_own_conf(
            rc_l1ss + PCI_L1SS_CTL1,
            (ctl1
                & !(PCI_L1SS_CTL1_CM_RESTORE_TIME
                    | PCI_L1SS_CTL1_LTR_L12_TH_VALUE
                    | PCI_L1SS_CTL1_LTR_L12_TH_SCALE))
                | timing.common_restore_time
                | timing.ltr_threshold,
        )?;

        self.wr_ep_conf(ep_l1ss + PCI_L1SS_CTL2, timing.tpoweron)?;
        let ctl1 = self.rd_ep_conf(ep_l1ss + PCI_L1SS_CTL1)?;
        self.wr_ep_conf(
            ep_l1ss + PCI_L1SS_CTL1,
            (ctl1
                & !(PCI_L1SS_CTL1_CM_RESTORE_TIME
                    | PCI_L1SS_CTL1_LTR_L12_TH_VALUE
                    | PCI_L1SS_CTL1_LTR_L12_TH_SCALE))
                | timing.common_restore_time
                | timing.ltr_threshold,
        )?;
        let devctl2 = self.rd_ep_conf(ep_exp + PCI_EXP_DEVCTL2)?;
        self.wr_ep_conf(ep_exp + PCI_EXP_DEVCTL2, devctl2 | PCI_EXP_DEVCTL2_LTR_EN)?;

        self.ep.l1ss_ep_specific(self.hw.as_ref(), &ep, true);

        let ctl1 = self.rd_own_conf(rc_l1ss + PCI_L1SS_CTL1)?;
        self.wr_own_conf(rc_l1ss + PCI_L1SS_CTL1, ctl1 | PCI_L1SS_CTL1_ALL_PM_EN)?;
        let ctl1 = self.rd_ep_conf(ep_l1ss + PCI_L1SS_CTL1)?;
        self.wr_ep_conf(ep_l1ss + PCI_L1SS_CTL1, ctl1 | PCI_L1SS_CTL1_ALL_PM_EN)?;

        let lnkctl = self.rd_own_conf(rc_exp + PCI_EXP_LNKCTL)?;
        self.wr_own_conf(
            rc_exp + PCI_EXP_LNKCTL,
            lnkctl | PCI_EXP_LNKCTL_ASPM_L1 | PCI_EXP_LNKCTL_CCC,
        )?;
        let lnkctl = self.rd_ep_conf(ep_exp + PCI_EXP_LNKCTL)?;
        self.wr_ep_conf(
            ep_exp + PCI_EXP_LNKCTL,
            lnkctl | PCI_EXP_LNKCTL_ASPM_L1 | PCI_EXP_LNKCTL_CCC | PCI_EXP_LNKCTL_CLKREQ_EN,
        )?;
        Ok(())
    }

    /// Reverse of [`ExynosPcieRc::l1ss_enable_hw`]: endpoint first, ASPM
    /// before the substate enables.
    fn l1ss_disable_hw(&self, conf: &ConfState) -> Result<()> {
        let (rc, ep) = Self::caps(conf)?;
        let rc_l1ss = rc.l1ss.ok_or(Error::NoCapability("l1ss"))?;
        let rc_exp = rc.pcie.ok_or(Error::NoCapability("pcie"))?;
        let ep_l1ss = ep.l1ss.ok_or(Error::NoCapability("endpoint l1ss"))?;
        let ep_exp = ep.pcie.ok_or(Error::NoCapability("endpoint pcie"))?;

        let lnkctl = self.rd_ep_conf(ep_exp + PCI_EXP_LNKCTL)?;
        self.wr_ep_conf(ep_exp + PCI_EXP_LNKCTL, lnkctl & !PCI_EXP_LNKCTL_ASPMC)?;
        let lnkctl = self.rd_own_conf(rc_exp + PCI_EXP_LNKCTL)?;
        self.wr_own_conf(rc_exp + PCI_EXP_LNKCTL, lnkctl & !PCI_EXP_LNKCTL_ASPMC)?;

        let ctl1 = self.rd_ep_conf(ep_l1ss + PCI_L1SS_CTL1)?;
        self.wr_ep_conf(ep_l1ss + PCI_L1SS_CTL1, ctl1 & !PCI_L1SS_CTL1_ALL_PM_EN)?;
        let ctl1 = self.rd_own_conf(rc_l1ss + PCI_L1SS_CTL1)?;
        self.wr_own_conf(rc_l1ss + PCI_L1SS_CTL1, ctl1 & !PCI_L1SS_CTL1_ALL_PM_EN)?;

        let devctl2 = self.rd_ep_conf(ep_exp + PCI_EXP_DEVCTL2)?;
        self.wr_ep_conf(ep_exp + PCI_EXP_DEVCTL2, devctl2 & !PCI_EXP_DEVCTL2_LTR_EN)?;
        self.ep.l1ss_ep_specific(self.hw.as_ref(), &ep, false);
        Ok(())
    }

    /// Forces the link out of L1 and holds it in L0 long enough for a
    /// latency-critical doorbell write. No-op while L1 substates are vetoed,
    /// the link cannot be in L1 then.
    pub fn l1_exit(&self) -> Result<()> {
        if !self.l1ss_veto_mask().is_empty() {
            return Ok(());
        }
        let _lock = self.l1_exit_lock.lock();
        self.hw.write(Window::Elbi, PCIE_APP_REQ_EXIT_L1, 0x1);
        // Hand L1 entry control to software while we force the exit.
        self.hw.write(Window::Elbi, PCIE_APP_REQ_EXIT_L1_MODE, 0x0);
        let mut reached_l0 = false;
        for _ in 0..MAX_L1_EXIT_TIMEOUT {
            if self.ltssm() == S_L0 {
                reached_l0 = true;
                break;
            }
            self.hw.udelay(10);
        }
        self.hw
            .write(Window::Elbi, PCIE_APP_REQ_EXIT_L1_MODE, APP_REQ_EXIT_L1_MODE);
        self.hw.write(Window::Elbi, PCIE_APP_REQ_EXIT_L1, 0x0);
        if !reached_l0 {
            return Err(Error::L1ExitTimeout);
        }
        Ok(())
    }
}
