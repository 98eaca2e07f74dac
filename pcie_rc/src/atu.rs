// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Outbound iATU viewport programming.
//!
//! The controller owns three outbound regions: CFG0 for type-0 configuration
//! requests, MEM for the endpoint BARs, and a second memory region used as a
//! bounce window for doorbell forwarding. Reprogramming CFG0 is on the config
//! access hot path, so the last target is cached and repeat requests are
//! elided.

use std::sync::Arc;

use sync::Mutex;

use crate::config::ChannelConfig;
use crate::hw::Hardware;
use crate::hw::Window;
use crate::regs::*;
use crate::Error;
use crate::Result;

// Offset of the doorbell bounce window inside the MEM resource.
const BTL_WINDOW_OFFSET: u64 = 0x20_0000;

pub struct Atu {
    hw: Arc<dyn Hardware>,
    cfg0_busdev: Mutex<Option<u32>>,
}

impl Atu {
    pub fn new(hw: Arc<dyn Hardware>) -> Atu {
        Atu {
            hw,
            cfg0_busdev: Mutex::new(None),
        }
    }

    fn program_region(&self, region: u32, kind: u32, base: u64, size: u64, target: u64) {
        let hw = &self.hw;
        hw.write(Window::Dbi, atu_outbound_reg(region, PCIE_ATU_CR1), kind);
        hw.write(
            Window::Dbi,
            atu_outbound_reg(region, PCIE_ATU_LOWER_BASE),
            base as u32,
        );
        hw.write(
            Window::Dbi,
            atu_outbound_reg(region, PCIE_ATU_UPPER_BASE),
            (base >> 32) as u32,
        );
        hw.write(
            Window::Dbi,
            atu_outbound_reg(region, PCIE_ATU_LIMIT),
            (base + size - 1) as u32,
        );
        hw.write(
            Window::Dbi,
            atu_outbound_reg(region, PCIE_ATU_LOWER_TARGET),
            target as u32,
        );
        hw.write(
            Window::Dbi,
            atu_outbound_reg(region, PCIE_ATU_UPPER_TARGET),
            (target >> 32) as u32,
        );
        hw.write(
            Window::Dbi,
            atu_outbound_reg(region, PCIE_ATU_CR2),
            PCIE_ATU_ENABLE,
        );
    }

    /// Points the CFG0 viewport at `busdev` (see [`atu_busdev`]). No-op when
    /// the viewport already targets it.
    pub fn program_cfg0(&self, config: &ChannelConfig, busdev: u32) {
        let mut cached = self.cfg0_busdev.lock();
        if *cached == Some(busdev) {
            return;
        }
        self.program_region(
            ATU_REGION_CFG0,
            PCIE_ATU_TYPE_CFG0,
            config.cfg0_base,
            config.cfg0_size,
            busdev.into(),
        );
        *cached = Some(busdev);
    }

    /// Identity-maps the MEM resource window toward the endpoint.
    pub fn program_mem_outbound(&self, config: &ChannelConfig) -> Result<()> {
        if config.mem_size == 0 {
            return Err(Error::NoMemWindow);
        }
        self.program_region(
            ATU_REGION_MEM,
            PCIE_ATU_TYPE_MEM,
            config.mem_base,
            config.mem_size,
            config.mem_base,
        );
        Ok(())
    }

    /// Maps `size` bytes at `target + offset` through the doorbell bounce
    /// region and retargets the endpoint's BAR2 at it.
    pub fn set_outbound_atu(&self, config: &ChannelConfig, target: u64, offset: u32, size: u32) -> Result<()> {
        if config.mem_size == 0 || BTL_WINDOW_OFFSET + u64::from(size) > config.mem_size {
            return Err(Error::NoMemWindow);
        }
        let base = config.mem_base + BTL_WINDOW_OFFSET;
        let target = target + u64::from(offset);
        self.program_region(ATU_REGION_BTL, PCIE_ATU_TYPE_MEM, base, size.into(), target);
        self.hw.write(Window::EpCfg, 0x18, target as u32 & 0xFFFF_FFF0);
        self.hw.write(Window::EpCfg, 0x1C, (target >> 32) as u32);
        Ok(())
    }

    /// Forgets the cached CFG0 target. Required after any link or power
    /// transition that resets the iATU.
    pub fn invalidate(&self) {
        *self.cfg0_busdev.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeHw;

    fn setup() -> (Arc<FakeHw>, Atu, ChannelConfig) {
        let hw = Arc::new(FakeHw::new());
        let atu = Atu::new(hw.clone());
        (hw, atu, ChannelConfig::default())
    }

    #[test]
    fn cfg0_repeat_target_writes_nothing() {
        let (hw, atu, config) = setup();
        atu.program_cfg0(&config, atu_busdev(1, 0, 0));
        assert_eq!(hw.write_count(), 7);
        atu.program_cfg0(&config, atu_busdev(1, 0, 0));
        assert_eq!(hw.write_count(), 7);
    }

    #[test]
    fn cfg0_new_target_reprograms() {
        let (hw, atu, config) = setup();
        atu.program_cfg0(&config, atu_busdev(1, 0, 0));
        hw.clear_write_log();
        atu.program_cfg0(&config, atu_busdev(2, 0, 0));
        let writes = hw.writes_to(Window::Dbi);
        assert_eq!(writes.len(), 7);
        assert!(writes.contains(&(
            atu_outbound_reg(ATU_REGION_CFG0, PCIE_ATU_LOWER_TARGET),
            atu_busdev(2, 0, 0)
        )));
        // Enable comes last.
        assert_eq!(
            *writes.last().unwrap(),
            (atu_outbound_reg(ATU_REGION_CFG0, PCIE_ATU_CR2), PCIE_ATU_ENABLE)
        );
    }

    #[test]
    fn cfg0_invalidate_forces_rewrite() {
        let (hw, atu, config) = setup();
        atu.program_cfg0(&config, atu_busdev(1, 0, 0));
        atu.invalidate();
        hw.clear_write_log();
        atu.program_cfg0(&config, atu_busdev(1, 0, 0));
        assert_eq!(hw.write_count(), 7);
    }

    #[test]
    fn mem_outbound_requires_window() {
        let (_hw, atu, mut config) = setup();
        atu.program_mem_outbound(&config).unwrap();
        config.mem_size = 0;
        assert!(matches!(
            atu.program_mem_outbound(&config),
            Err(Error::NoMemWindow)
        ));
    }

    #[test]
    fn btl_window_retargets_bar2() {
        let (hw, atu, config) = setup();
        atu.set_outbound_atu(&config, 0x8_0000_0000, 0x100, 0x1000).unwrap();
        assert_eq!(
            hw.reg(Window::Dbi, atu_outbound_reg(ATU_REGION_BTL, PCIE_ATU_LOWER_BASE)),
            (config.mem_base + BTL_WINDOW_OFFSET) as u32
        );
        assert_eq!(hw.reg(Window::EpCfg, 0x18), 0x100);
        assert_eq!(hw.reg(Window::EpCfg, 0x1C), 0x8);
    }
}
