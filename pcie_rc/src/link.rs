// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Link training and renegotiation.

use log::debug;
use log::error;
use log::info;

use crate::controller::ExynosPcieRc;
use crate::controller::LinkState;
use crate::hw::Window;
use crate::regs::*;
use crate::Error;
use crate::Result;

// Q-channel clock gating control values.
const QCH_GATING_ON: u32 = 0x3;
const QCH_GATING_OFF: u32 = 0x0;

// Bounded wait for a lane count change, in 10ms steps.
const LANE_CHANGE_TIMEOUT: u32 = 100;

impl ExynosPcieRc {
    /// Brings the link to L0: PHY calibration, reset sequencing, root port
    /// setup, LTSSM training and speed verification. Each failed attempt
    /// costs one full PHY reset and PERST cycle; the retry counter advances
    /// exactly once per attempt no matter which stage failed.
    pub(crate) fn establish_link(&self) -> Result<()> {
        let max_retries = self
            .ep
            .linkup_max_count()
            .unwrap_or(DEFAULT_LINK_UP_RETRIES);
        let delays = self.ep.delays();
        let mut try_cnt = 0;
        loop {
            self.phy.config();
            // Clock gating must stay off while the LTSSM trains.
            self.hw.write(Window::Elbi, PCIE_QCH_SEL, QCH_GATING_OFF);
            self.hw.write(Window::Elbi, PCIE_QCH_AUX, QCH_GATING_OFF);
            if delays.udelay_before_perst > 0 {
                self.hw.udelay(delays.udelay_before_perst);
            }
            self.hw.set_perst(true);
            self.hw.udelay(delays.udelay_after_perst);
            self.hw
                .write(Window::Elbi, PCIE_MSTR_PEND_SEL_NAK, NACK_ENABLE);
            self.setup_rc()?;
            self.enable_history_buffer();
            self.hw
                .write(Window::Elbi, PCIE_APP_LTSSM_ENABLE, PCIE_ELBI_LTSSM_ENABLE);

            if self.wait_for_l0() && self.check_link_speed() {
                // The endpoint may still be renegotiating; confirm L0 held.
                if self.wait_for_l0() {
                    self.hw.write(Window::Elbi, PCIE_QCH_SEL, QCH_GATING_ON);
                    self.hw.write(Window::Elbi, PCIE_QCH_AUX, QCH_GATING_ON);
                    self.atu.program_cfg0(&self.config, atu_busdev(1, 0, 0));
                    self.atu.program_mem_outbound(&self.config)?;
                    info!(
                        "pcie{}: link up, gen{} x{}",
                        self.config.ch_num,
                        self.link_speed().unwrap_or(0),
                        self.link_width().unwrap_or(0)
                    );
                    return Ok(());
                }
            }

            try_cnt += 1;
            error!(
                "pcie{}: link up failed (attempt {}/{}), LTSSM: {}",
                self.config.ch_num,
                try_cnt,
                max_retries,
                ltssm_state_name(self.ltssm())
            );
            if try_cnt >= max_retries {
                self.dump_link_history();
                self.log_register_dump();
                return Err(Error::LinkFail { retries: try_cnt });
            }
            self.hw.set_perst(false);
            self.hw
                .write(Window::Elbi, PCIE_APP_LTSSM_ENABLE, PCIE_ELBI_LTSSM_DISABLE);
        }
    }

    fn wait_for_l0(&self) -> bool {
        for _ in 0..MAX_LINK_UP_TIMEOUT {
            if self.ltssm() == S_L0 {
                return true;
            }
            self.hw.udelay(10);
        }
        false
    }

    /// Polls until the negotiated speed matches the channel maximum.
    fn check_link_speed(&self) -> bool {
        if self.ep.no_speed_check() {
            return true;
        }
        let Ok(exp) = self.rc_pcie_cap() else {
            return false;
        };
        for _ in 0..MAX_SPEED_CHECK_TIMEOUT {
            match self.rd_own_conf(exp + PCI_EXP_LNKCTL) {
                Ok(lnkctl) => {
                    if (lnkctl >> PCI_EXP_LNKSTA_SPEED_SHIFT) & PCI_EXP_LNKSTA_CLS
                        == self.config.max_link_speed
                    {
                        return true;
                    }
                }
                Err(_) => return false,
            }
            self.hw.udelay(10);
        }
        debug!("pcie{}: negotiated speed below maximum", self.config.ch_num);
        false
    }

    /// Root port DBI setup, done before every training attempt since the
    /// soft power reset clears it.
    fn setup_rc(&self) -> Result<()> {
        let misc = self.rd_own_conf(PCIE_MISC_CONTROL_1_OFF)?;
        self.wr_own_conf(PCIE_MISC_CONTROL_1_OFF, misc | PCIE_DBI_RO_WR_EN)?;

        self.wr_own_conf(
            PCI_VENDOR_ID,
            (PCI_DEVICE_ID_EXYNOS << 16) | PCI_VENDOR_ID_SAMSUNG,
        )?;

        let exp = self.rc_pcie_cap()?;
        // Advertise 64us L1 entrance latency.
        let lnkcap = self.rd_own_conf(exp + PCI_EXP_LNKCAP)?;
        self.wr_own_conf(
            exp + PCI_EXP_LNKCAP,
            (lnkcap & !PCI_EXP_LNKCAP_L1EL) | PCI_EXP_LNKCAP_L1EL_64USEC,
        )?;
        let afr = self.rd_own_conf(PCIE_PORT_AFR)?;
        self.wr_own_conf(
            PCIE_PORT_AFR,
            (afr & !PORT_AFR_L1_ENTRANCE_LAT_MASK) | PORT_AFR_L1_ENTRANCE_LAT_64US,
        )?;

        self.wr_own_conf(PCIE_PORT_AUX_CLK_FREQ, PORT_AUX_CLK_FREQ_76MHZ)?;
        self.wr_own_conf(PCIE_PORT_L1_SUBSTATES, PORT_L1_SUBSTATES_VAL)?;

        // 6.2ms completion timeout, the shortest range the core supports
        // above the recovery watchdog granularity.
        let devctl2 = self.rd_own_conf(exp + PCI_EXP_DEVCTL2)?;
        self.wr_own_conf(
            exp + PCI_EXP_DEVCTL2,
            (devctl2 & !PCI_EXP_DEVCTL2_COMP_TIMEOUT) | PCI_EXP_DEVCTL2_COMP_TOUT_6_2MS,
        )?;

        let lnkctl2 = self.rd_own_conf(exp + PCI_EXP_LNKCTL2)?;
        self.wr_own_conf(
            exp + PCI_EXP_LNKCTL2,
            (lnkctl2 & !PCI_EXP_LNKCTL2_TLS) | self.config.max_link_speed,
        )?;

        let misc = self.rd_own_conf(PCIE_MISC_CONTROL_1_OFF)?;
        self.wr_own_conf(PCIE_MISC_CONTROL_1_OFF, misc & !PCIE_DBI_RO_WR_EN)?;
        Ok(())
    }

    pub fn link_speed(&self) -> Result<u32> {
        let exp = self.rc_pcie_cap()?;
        Ok((self.rd_own_conf(exp + PCI_EXP_LNKCTL)? >> PCI_EXP_LNKSTA_SPEED_SHIFT)
            & PCI_EXP_LNKSTA_CLS)
    }

    pub fn link_width(&self) -> Result<u32> {
        let exp = self.rc_pcie_cap()?;
        Ok((self.rd_own_conf(exp + PCI_EXP_LNKCTL)? >> PCI_EXP_LNKSTA_LANE_SHIFT) & 0x3F)
    }

    /// Renegotiates the link to `target_gen` without a retrain from scratch.
    pub fn speed_change(&self, target_gen: u32) -> Result<()> {
        if self.state() != LinkState::Up {
            return Err(Error::WrongState(self.state()));
        }
        if target_gen == 0 || target_gen > self.config.max_link_speed {
            return Err(Error::InvalidLinkSpeed(target_gen));
        }
        if self.link_speed()? == target_gen {
            return Ok(());
        }
        // Speed changes are only accepted in L0.
        self.l1_exit()?;

        let exp = self.rc_pcie_cap()?;
        let lnkctl2 = self.rd_own_conf(exp + PCI_EXP_LNKCTL2)?;
        self.wr_own_conf(
            exp + PCI_EXP_LNKCTL2,
            (lnkctl2 & !PCI_EXP_LNKCTL2_TLS) | target_gen,
        )?;
        let ctrl = self.rd_own_conf(PCIE_LINK_WIDTH_SPEED_CONTROL)?;
        self.wr_own_conf(PCIE_LINK_WIDTH_SPEED_CONTROL, ctrl & !PORT_LOGIC_SPEED_CHANGE)?;
        self.wr_own_conf(PCIE_LINK_WIDTH_SPEED_CONTROL, ctrl | PORT_LOGIC_SPEED_CHANGE)?;

        if !self.wait_for_l0() {
            return Err(Error::LinkSpeedFail {
                got: 0,
                want: target_gen,
            });
        }
        let got = self.link_speed()?;
        if got != target_gen {
            return Err(Error::LinkSpeedFail {
                got,
                want: target_gen,
            });
        }
        info!("pcie{}: link speed now gen{}", self.config.ch_num, got);
        Ok(())
    }

    /// Changes the active lane count through the multi-lane control
    /// register.
    pub fn lane_change(&self, target_lanes: u32) -> Result<()> {
        if self.state() != LinkState::Up {
            return Err(Error::WrongState(self.state()));
        }
        if target_lanes == 0 || target_lanes > self.config.num_lanes {
            return Err(Error::InvalidLaneCount(target_lanes));
        }
        if self.link_width()? == target_lanes {
            return Ok(());
        }
        self.l1_exit()?;
        self.wr_own_conf(
            PCIE_PORT_MULTI_LANE_CTRL,
            target_lanes | PORT_MLTI_DIR_LANE_CHANGE,
        )?;
        for _ in 0..LANE_CHANGE_TIMEOUT {
            if self.link_width()? == target_lanes {
                info!("pcie{}: link width now x{}", self.config.ch_num, target_lanes);
                return Ok(());
            }
            self.hw.msleep(10);
        }
        Err(Error::LaneChangeFail(target_lanes))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::fake::FakeHw;
    use crate::hw::Platform;

    fn make_rc(config: ChannelConfig) -> (Arc<FakeHw>, Arc<ExynosPcieRc>) {
        let hw = Arc::new(FakeHw::new());
        let rc = ExynosPcieRc::new(config, hw.clone(), hw.clone(), hw.clone()).unwrap();
        (hw, rc)
    }

    #[test]
    fn immediate_l0_costs_one_perst_cycle() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        assert_eq!(hw.perst_deasserts(), 1);
        assert_eq!(hw.phy_calls().iter().filter(|c| **c == "config").count(), 1);
    }

    #[test]
    fn slow_training_succeeds_within_budget() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        hw.link_up_after(100);
        rc.poweron().unwrap();
        assert_eq!(rc.state(), LinkState::Up);
        // Still a single attempt.
        assert_eq!(hw.perst_deasserts(), 1);
    }

    #[test]
    fn retry_bound_is_exact() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        hw.never_link_up();
        let err = rc.poweron().unwrap_err();
        assert!(matches!(
            err,
            Error::LinkFail {
                retries: DEFAULT_LINK_UP_RETRIES
            }
        ));
        // One full PHY reset and PERST cycle per attempt, no double counting.
        assert_eq!(hw.perst_deasserts(), DEFAULT_LINK_UP_RETRIES);
        assert_eq!(
            hw.phy_calls().iter().filter(|c| **c == "config").count() as u32,
            DEFAULT_LINK_UP_RETRIES
        );
        // The failed bring-up unwound completely.
        assert_eq!(rc.state(), LinkState::Down);
        assert!(!hw.is_active());
    }

    #[test]
    fn endpoint_retry_override_applies() {
        let config = ChannelConfig {
            compatible: "exynos-pcie-rc,wifi_qc".to_owned(),
            ..Default::default()
        };
        let (hw, rc) = make_rc(config);
        hw.never_link_up();
        let err = rc.poweron().unwrap_err();
        assert!(matches!(err, Error::LinkFail { retries: 3 }));
        assert_eq!(hw.perst_deasserts(), 3);
    }

    #[test]
    fn setup_rc_programs_identity_and_timeouts() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        assert_eq!(
            hw.reg(Window::Dbi, PCI_VENDOR_ID),
            (PCI_DEVICE_ID_EXYNOS << 16) | PCI_VENDOR_ID_SAMSUNG
        );
        assert_eq!(
            hw.reg(Window::Dbi, PCIE_PORT_AUX_CLK_FREQ),
            PORT_AUX_CLK_FREQ_76MHZ
        );
        let exp = FakeHw::exp_cap();
        assert_eq!(
            hw.reg(Window::Dbi, exp + PCI_EXP_DEVCTL2) & PCI_EXP_DEVCTL2_COMP_TIMEOUT,
            PCI_EXP_DEVCTL2_COMP_TOUT_6_2MS
        );
        // RO write enable must not be left set.
        assert_eq!(
            hw.reg(Window::Dbi, PCIE_MISC_CONTROL_1_OFF) & PCIE_DBI_RO_WR_EN,
            0
        );
    }

    #[test]
    fn linkup_programs_both_viewports() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        let config = ChannelConfig::default();
        assert_eq!(
            hw.reg(Window::Dbi, atu_outbound_reg(ATU_REGION_CFG0, PCIE_ATU_LOWER_TARGET)),
            atu_busdev(1, 0, 0)
        );
        assert_eq!(
            hw.reg(Window::Dbi, atu_outbound_reg(ATU_REGION_CFG0, PCIE_ATU_CR2)),
            PCIE_ATU_ENABLE
        );
        assert_eq!(
            hw.reg(Window::Dbi, atu_outbound_reg(ATU_REGION_MEM, PCIE_ATU_LOWER_BASE)),
            config.mem_base as u32
        );
        assert_eq!(
            hw.reg(Window::Dbi, atu_outbound_reg(ATU_REGION_MEM, PCIE_ATU_CR2)),
            PCIE_ATU_ENABLE
        );
    }

    #[test]
    fn missing_mem_window_fails_bring_up() {
        let config = ChannelConfig {
            mem_size: 0,
            ..Default::default()
        };
        let (_hw, rc) = make_rc(config);
        assert!(matches!(rc.poweron(), Err(Error::NoMemWindow)));
        assert_eq!(rc.state(), LinkState::Down);
    }

    #[test]
    fn speed_change_renegotiates() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        assert_eq!(rc.link_speed().unwrap(), 3);
        rc.speed_change(1).unwrap();
        assert_eq!(rc.link_speed().unwrap(), 1);
        // Already there: no-op.
        rc.speed_change(1).unwrap();
        assert!(matches!(
            rc.speed_change(4),
            Err(Error::InvalidLinkSpeed(4))
        ));
    }

    #[test]
    fn speed_change_requires_link_up() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        assert!(matches!(
            rc.speed_change(1),
            Err(Error::WrongState(LinkState::Down))
        ));
    }

    #[test]
    fn lane_change_takes_effect() {
        let config = ChannelConfig {
            num_lanes: 2,
            ..Default::default()
        };
        let (_hw, rc) = make_rc(config);
        rc.poweron().unwrap();
        rc.lane_change(2).unwrap();
        assert_eq!(rc.link_width().unwrap(), 2);
    }

    #[test]
    fn lane_change_rejects_unwired_lanes() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        // The default channel is wired x1.
        assert!(matches!(rc.lane_change(2), Err(Error::InvalidLaneCount(2))));
        assert!(matches!(rc.lane_change(0), Err(Error::InvalidLaneCount(0))));
    }
}
