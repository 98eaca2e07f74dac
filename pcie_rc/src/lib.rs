// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Link establishment and power sequencing core of the Exynos PCIe root
//! complex, driven through trait-based hardware backends.
//!
//! The entry point is [`ExynosPcieRc`]: one instance per channel, built from
//! a [`config::ChannelConfig`] and the [`hw`] trait objects. [`fake::FakeHw`]
//! backs the simulator and the tests.

pub mod atu;
pub mod cap;
pub mod config;
mod controller;
pub mod ep_cfg;
pub mod events;
pub mod fake;
pub mod hw;
mod irq;
mod l1ss;
mod link;
mod msi;
pub mod regs;

use remain::sorted;
use thiserror::Error;

pub use crate::controller::ExynosPcieRc;
pub use crate::controller::LinkState;
pub use crate::l1ss::L1ssCtrlId;
pub use crate::l1ss::L1ssOutcome;
pub use crate::msi::MsiHandler;
pub use crate::msi::MAX_MSI_CTRLS;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    /// Register access attempted while the power domain is down.
    #[error("device not accessible while powered down")]
    DeviceNotFound,
    #[error("{0:?} event slot already in use")]
    EventBusy(events::EventKind),
    #[error("requested lane count x{0} exceeds the channel width")]
    InvalidLaneCount(u32),
    #[error("requested link speed gen{0} exceeds the channel maximum")]
    InvalidLinkSpeed(u32),
    #[error("timed out forcing L1 exit")]
    L1ExitTimeout,
    #[error("lane change to x{0} did not take effect")]
    LaneChangeFail(u32),
    #[error("link did not train after {retries} attempts")]
    LinkFail { retries: u32 },
    #[error("link trained at gen{got}, wanted gen{want}")]
    LinkSpeedFail { got: u32, want: u32 },
    #[error("no {0} capability")]
    NoCapability(&'static str),
    #[error("no outbound memory window configured")]
    NoMemWindow,
    #[error("all separated MSI vectors are claimed")]
    SepMsiExhausted,
    #[error("failed to spawn recovery worker: {0}")]
    SpawnWorker(std::io::Error),
    #[error("unsupported endpoint compatible \"{0}\"")]
    UnknownEndpoint(String),
    #[error("operation not allowed in link state {0:?}")]
    WrongState(LinkState),
}

pub type Result<T> = std::result::Result<T, Error>;
