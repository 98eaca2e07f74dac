// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware seams of the controller: register windows, platform services and
//! the PHY control surface. Production code backs these with MMIO mappings;
//! tests and the simulator use [`crate::fake::FakeHw`].

/// One MMIO window of the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Window {
    /// Sub-controller (application logic) registers.
    Elbi,
    /// PHY analog registers.
    Phy,
    /// PHY PCS registers.
    PhyPcs,
    /// System register block shared with other IP.
    Sysreg,
    /// I/O access sequencer.
    Ia,
    /// Root complex configuration space and port logic.
    Dbi,
    /// Endpoint configuration space, reached through the CFG0 viewport.
    EpCfg,
}

/// Raw register access plus the PERST line and bounded delays.
pub trait Hardware: Send + Sync {
    fn read(&self, window: Window, offset: u32) -> u32;
    fn write(&self, window: Window, offset: u32, val: u32);

    /// Drives the fundamental reset line to the endpoint. `true` deasserts
    /// reset (device running), `false` asserts it.
    fn set_perst(&self, on: bool);
    fn perst(&self) -> bool;

    fn udelay(&self, us: u32);
    fn msleep(&self, ms: u32);
}

/// Platform services the controller sequences around link transitions.
///
/// All methods are infallible; a backend that can fail (e.g. a regulator that
/// refuses to come up) must resolve that before the controller is built.
pub trait Platform: Send + Sync {
    fn runtime_get(&self);
    fn runtime_put(&self);
    /// Whether the power domain is up. Register access while this is false
    /// would fault on real hardware, so the DBI accessors refuse it.
    fn is_active(&self) -> bool;

    fn sysmmu_enable(&self);
    fn sysmmu_disable(&self);

    fn pinctrl_active(&self);
    fn pinctrl_idle(&self);

    /// Pins the interconnect at the configured floor frequency.
    fn qos_request(&self, min_khz: u32);
    fn qos_release(&self);

    /// Marks the channel busy/idle for the system idle governor.
    fn idle_ip_active(&self);
    fn idle_ip_idle(&self);
}

/// PHY control surface. Implementations apply the calibration sequences for
/// their silicon revision; the fake replays `phycal` records.
pub trait PhyOps: Send + Sync {
    /// Full PHY reset and (re)calibration. Runs before every link attempt.
    fn config(&self);
    /// Powers down every PHY lane and the common block.
    fn all_pwrdn(&self);
    fn all_pwrdn_clear(&self);
    /// Controls whether the receiver ignores electrical idle. Ignoring it is
    /// required while poking DBI registers with the link down.
    fn check_rx_elecidle(&self, ignore: bool);
    /// Ungates the PHY-side clock path for link-down DBI access.
    fn phy_clock_enable(&self, enable: bool);
}
