// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! MSI plumbing. Two schemes:
//!
//! - Default: every vector funnels into the aggregate rising-edge interrupt
//!   and `handle_msi_irq` demuxes the per-block status registers.
//! - Separated: a consumer claims a whole controller block (32 vectors) and
//!   gets its own handler, bypassing the demux. Block 0 always stays on the
//!   default path for legacy consumers.

use std::sync::atomic::Ordering;

use log::debug;
use log::info;

use crate::controller::ExynosPcieRc;
use crate::hw::Window;
use crate::regs::*;
use crate::Error;
use crate::Result;

/// MSI controller blocks of the core, 32 vectors each.
pub const MAX_MSI_CTRLS: usize = 8;

pub type MsiHandler = Box<dyn Fn() + Send + Sync>;

fn ctrl_reg(base: u32, ctrl: usize) -> u32 {
    base + (ctrl as u32) * MSI_REG_CTRL_BLOCK_SIZE
}

impl ExynosPcieRc {
    /// Claims the next free separated MSI controller block and returns its
    /// vector base. The claim persists across link cycles;
    /// [`ExynosPcieRc::enable_sep_msi`] re-arms it after every link-up.
    pub fn register_separated_msi_vector(&self, handler: MsiHandler) -> Result<u32> {
        let mut slots = self.sep_msi.lock();
        for (ctrl, slot) in slots.iter_mut().enumerate().skip(1) {
            if slot.is_none() {
                *slot = Some(handler);
                self.arm_sep_vector(ctrl);
                info!(
                    "pcie{}: separated MSI block {} claimed",
                    self.config.ch_num, ctrl
                );
                return Ok((ctrl as u32) * 32);
            }
        }
        Err(Error::SepMsiExhausted)
    }

    fn arm_sep_vector(&self, ctrl: usize) {
        let enable = self.hw.read(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_ENABLE, ctrl));
        self.hw
            .write(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_ENABLE, ctrl), enable | 0x1);
        let mask = self.hw.read(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_MASK, ctrl));
        self.hw
            .write(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_MASK, ctrl), mask & !0x1);
    }

    /// Re-programs every claimed separated vector. The enables live in the
    /// core and are lost on each soft power reset.
    pub(crate) fn enable_sep_msi(&self) {
        let slots = self.sep_msi.lock();
        for (ctrl, slot) in slots.iter().enumerate().skip(1) {
            if slot.is_some() {
                self.arm_sep_vector(ctrl);
            }
        }
    }

    /// Dispatches one separated MSI interrupt for controller block `ctrl`.
    pub fn handle_msi_vector(&self, ctrl: usize) {
        let status_reg = ctrl_reg(PCIE_MSI_INTR0_STATUS, ctrl);
        let status = self.hw.read(Window::Dbi, status_reg);
        if status != 0 {
            self.hw.write(Window::Dbi, status_reg, status);
        }
        let slots = self.sep_msi.lock();
        if let Some(handler) = slots.get(ctrl).and_then(|slot| slot.as_ref()) {
            handler();
        } else {
            debug!(
                "pcie{}: spurious separated MSI on block {}",
                self.config.ch_num, ctrl
            );
        }
    }

    /// Default-scheme demux: clear every pending vector, then pulse the mask
    /// so a level still pending re-raises the edge interrupt.
    pub(crate) fn handle_msi_irq(&self) {
        for ctrl in 0..MAX_MSI_CTRLS {
            let status_reg = ctrl_reg(PCIE_MSI_INTR0_STATUS, ctrl);
            let status = self.hw.read(Window::Dbi, status_reg);
            if status == 0 {
                continue;
            }
            self.hw.write(Window::Dbi, status_reg, status);
            self.msi_demux_count.fetch_add(1, Ordering::SeqCst);

            let mask_reg = ctrl_reg(PCIE_MSI_INTR0_MASK, ctrl);
            let mask = self.hw.read(Window::Dbi, mask_reg);
            self.hw.write(Window::Dbi, mask_reg, 0xFFFF_FFFF);
            self.hw.write(Window::Dbi, mask_reg, mask);
        }
    }

    /// Demuxed MSI count, for the simulator's status output.
    pub fn msi_count(&self) -> u32 {
        self.msi_demux_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::fake::FakeHw;

    fn make_rc(config: ChannelConfig) -> (Arc<FakeHw>, Arc<ExynosPcieRc>) {
        let hw = Arc::new(FakeHw::new());
        let rc = ExynosPcieRc::new(config, hw.clone(), hw.clone(), hw.clone()).unwrap();
        (hw, rc)
    }

    #[test]
    fn separated_vectors_allocate_from_block_one() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        assert_eq!(rc.register_separated_msi_vector(Box::new(|| {})).unwrap(), 32);
        assert_eq!(rc.register_separated_msi_vector(Box::new(|| {})).unwrap(), 64);
    }

    #[test]
    fn separated_vectors_exhaust() {
        let (_hw, rc) = make_rc(ChannelConfig::default());
        for _ in 1..MAX_MSI_CTRLS {
            rc.register_separated_msi_vector(Box::new(|| {})).unwrap();
        }
        assert!(matches!(
            rc.register_separated_msi_vector(Box::new(|| {})),
            Err(Error::SepMsiExhausted)
        ));
    }

    #[test]
    fn separated_dispatch_clears_status() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let base = rc
            .register_separated_msi_vector(Box::new(move || {
                hits2.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(base, 32);

        hw.set_reg(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_STATUS, 1), 0x4);
        rc.handle_msi_vector(1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(hw.reg(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_STATUS, 1)), 0x0);
    }

    #[test]
    fn claimed_vectors_rearmed_after_linkup() {
        let config = ChannelConfig {
            use_separated_msi: true,
            ..Default::default()
        };
        let (hw, rc) = make_rc(config);
        rc.register_separated_msi_vector(Box::new(|| {})).unwrap();
        rc.poweron().unwrap();
        assert_eq!(hw.reg(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_ENABLE, 1)) & 0x1, 0x1);
    }

    #[test]
    fn default_demux_pulses_mask() {
        let (hw, rc) = make_rc(ChannelConfig::default());
        rc.poweron().unwrap();
        hw.set_reg(Window::Dbi, ctrl_reg(PCIE_MSI_INTR0_STATUS, 0), 0x2);
        hw.clear_write_log();
        rc.handle_msi_irq();
        assert_eq!(rc.msi_count(), 1);
        let mask_reg = ctrl_reg(PCIE_MSI_INTR0_MASK, 0);
        let writes = hw.writes_to(Window::Dbi);
        let mask_writes: Vec<_> = writes.iter().filter(|(o, _)| *o == mask_reg).collect();
        assert_eq!(mask_writes.len(), 2);
        assert_eq!(mask_writes[0].1, 0xFFFF_FFFF);
        // Restored to the pre-pulse value.
        assert_eq!(mask_writes[1].1, 0x0);
    }
}
