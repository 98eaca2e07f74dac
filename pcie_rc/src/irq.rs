// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interrupt handling and deferred link recovery.
//!
//! `handle_irq` is the interrupt-context analog: it only reads and acks the
//! three ELBI banks, flips state flags and queues work. The heavy lifting
//! (diagnostics, callbacks, optional self-heal) runs on a dedicated worker
//! thread so the two recovery flavors stay strictly ordered.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Weak;

use log::error;
use log::info;

use crate::controller::ExynosPcieRc;
use crate::controller::LinkState;
use crate::events::EventKind;
use crate::hw::Window;
use crate::regs::*;

/// Deferred recovery jobs, processed in arrival order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum RecoveryWork {
    Dislink,
    CplTimeout,
}

pub(crate) fn recovery_worker(rc: Weak<ExynosPcieRc>, work_rx: Receiver<RecoveryWork>) {
    while let Ok(work) = work_rx.recv() {
        let Some(rc) = rc.upgrade() else {
            break;
        };
        rc.handle_recovery(work);
    }
}

impl ExynosPcieRc {
    /// Services the channel interrupt. Safe to call spuriously; all pending
    /// bits are acknowledged whether or not they are acted on.
    pub fn handle_irq(&self) {
        let irq0 = self.hw.read(Window::Elbi, PCIE_IRQ0);
        self.hw.write(Window::Elbi, PCIE_IRQ0, irq0);
        let irq1 = self.hw.read(Window::Elbi, PCIE_IRQ1);
        self.hw.write(Window::Elbi, PCIE_IRQ1, irq1);
        let irq2 = self.hw.read(Window::Elbi, PCIE_IRQ2);
        self.hw.write(Window::Elbi, PCIE_IRQ2, irq2);

        if irq1 & IRQ_LINK_DOWN != 0 {
            if self.is_cpl_timeout_recovery() {
                // Expected while the endpoint reboots under PERST.
                info!(
                    "pcie{}: link down during CPL timeout recovery, ignored",
                    self.config.ch_num
                );
            } else {
                error!("pcie{}: sudden link down", self.config.ch_num);
                self.sudden_linkdown.store(true, Ordering::SeqCst);
                self.set_state(LinkState::DownTry);
                if self.ep.linkdn_callback_direct() {
                    self.events.dispatch(EventKind::LinkDown, self.config.ch_num);
                }
                self.queue_work(RecoveryWork::Dislink);
            }
        }

        if irq2 & IRQ_RADM_CPL_TIMEOUT != 0 {
            if self.sudden_linkdown.load(Ordering::SeqCst) {
                info!(
                    "pcie{}: CPL timeout while handling link down, ignored",
                    self.config.ch_num
                );
            } else {
                error!("pcie{}: completion timeout", self.config.ch_num);
                self.set_cpl_timeout_recovery(true);
                self.set_state(LinkState::DownTry);
                self.queue_work(RecoveryWork::CplTimeout);
            }
        }

        if irq2 & IRQ_MSI_RISING_ASSERT != 0 && !self.config.use_separated_msi {
            self.handle_msi_irq();
        }
    }

    pub(crate) fn handle_recovery(&self, work: RecoveryWork) {
        match work {
            RecoveryWork::Dislink => {
                let count = self.linkdown_cnt.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    "pcie{}: link down recovery (count {})",
                    self.config.ch_num, count
                );
                self.dump_link_history();
                self.log_register_dump();
                let consumed = self.events.dispatch(EventKind::LinkDown, self.config.ch_num);
                if !consumed && self.config.force_recover_linkdown {
                    info!("pcie{}: no consumer, self-healing", self.config.ch_num);
                    self.poweroff();
                    if let Err(e) = self.poweron() {
                        error!("pcie{}: self-heal failed: {}", self.config.ch_num, e);
                    }
                }
            }
            RecoveryWork::CplTimeout => {
                error!("pcie{}: CPL timeout recovery", self.config.ch_num);
                self.dump_link_history();
                self.log_register_dump();
                // Recovery is owned by the endpoint driver; it clears the
                // flag via set_cpl_timeout_recovery when done.
                self.events
                    .dispatch(EventKind::CplTimeout, self.config.ch_num);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::fake::FakeHw;

    fn make_rc(config: ChannelConfig) -> (Arc<FakeHw>, Arc<ExynosPcieRc>) {
        let hw = Arc::new(FakeHw::new());
        let rc = ExynosPcieRc::new(config, hw.clone(), hw.clone(), hw.clone()).unwrap();
        (hw, rc)
    }

    #[test]
    fn linkdown_irq_queues_recovery() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        let (tx, rx) = mpsc::channel();
        rc.register_event(
            EventKind::LinkDown,
            Box::new(move |ev| {
                tx.send(ev.ch_num).unwrap();
            }),
        )
        .unwrap();

        hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN);
        rc.handle_irq();
        assert_eq!(rc.state(), LinkState::DownTry);
        // Ack happened.
        assert_eq!(hw.reg(Window::Elbi, PCIE_IRQ1), 0);

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        assert_eq!(rc.linkdown_count(), 1);
    }

    #[test]
    fn cpl_timeout_suppresses_later_linkdown() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        hw.inject_irq(PCIE_IRQ2, IRQ_RADM_CPL_TIMEOUT);
        rc.handle_irq();
        assert!(rc.is_cpl_timeout_recovery());

        // The link drop caused by recovery PERST must not count as a sudden
        // link down.
        hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN);
        rc.handle_irq();
        assert_eq!(rc.linkdown_count(), 0);
        assert!(!rc.sudden_linkdown.load(Ordering::SeqCst));
    }

    #[test]
    fn linkdown_suppresses_later_cpl_timeout() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN);
        rc.handle_irq();

        hw.inject_irq(PCIE_IRQ2, IRQ_RADM_CPL_TIMEOUT);
        rc.handle_irq();
        assert!(!rc.is_cpl_timeout_recovery());
    }

    #[test]
    fn both_bits_in_one_irq_yield_one_recovery() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        let downs = Arc::new(AtomicU32::new(0));
        let timeouts = Arc::new(AtomicU32::new(0));
        let (d, t) = (downs.clone(), timeouts.clone());
        let (tx, rx) = mpsc::channel();
        rc.register_event(
            EventKind::LinkDown,
            Box::new(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            }),
        )
        .unwrap();
        rc.register_event(
            EventKind::CplTimeout,
            Box::new(move |_| {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN);
        hw.inject_irq(PCIE_IRQ2, IRQ_RADM_CPL_TIMEOUT);
        rc.handle_irq();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(downs.load(Ordering::SeqCst), 1);
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn direct_callback_fires_from_irq_context() {
        let config = ChannelConfig {
            compatible: "exynos-pcie-rc,wifi_qc".to_owned(),
            ..Default::default()
        };
        let (hw, rc) = make_rc(config);
        rc.poweron().unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        rc.register_event(
            EventKind::LinkDown,
            Box::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN);
        rc.handle_irq();
        // Dispatched synchronously, before the worker gets a chance.
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn self_heal_without_consumer() {
        let config = ChannelConfig {
            force_recover_linkdown: true,
            ..Default::default()
        };
        let (hw, rc) = make_rc(config);
        rc.poweron().unwrap();
        hw.inject_irq(PCIE_IRQ1, IRQ_LINK_DOWN);
        rc.handle_irq();
        // Wait for the worker to run the power cycle.
        for _ in 0..500 {
            if rc.state() == LinkState::Up && rc.linkdown_count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(rc.state(), LinkState::Up);
        assert_eq!(hw.perst_deasserts(), 2);
    }
}
