// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Static per-channel configuration, the analog of the device-tree node in
//! the reference platform. Deserialized from JSON by the simulator binary.

use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Root complex channel number.
    pub ch_num: u32,
    /// Selects the endpoint quirk table, see [`crate::ep_cfg`].
    pub compatible: String,
    /// Highest link speed (PCIe generation) this channel may train to.
    pub max_link_speed: u32,
    pub num_lanes: u32,
    /// Outbound window carrying type-0 configuration requests.
    pub cfg0_base: u64,
    pub cfg0_size: u64,
    /// Outbound memory window handed to the endpoint BARs.
    pub mem_base: u64,
    pub mem_size: u64,
    /// Whether the I/O access sequencer forwards doorbells for this channel.
    pub use_ia: bool,
    pub use_sysmmu: bool,
    /// Interconnect floor while the link is up, in kHz. Zero skips PM-QoS.
    pub int_min_lock_khz: u32,
    /// Power-cycle the link from the recovery worker when a link-down fires
    /// with no registered consumer.
    pub force_recover_linkdown: bool,
    /// Claimable per-vector MSI lines instead of the aggregate demux.
    pub use_separated_msi: bool,
    /// Translation target of the MSI doorbell for shared-memory endpoints.
    pub msi_doorbell_addr: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            ch_num: 0,
            compatible: "exynos-pcie-rc,wifi_ss".to_owned(),
            max_link_speed: 3,
            num_lanes: 1,
            cfg0_base: 0x4000_0000,
            cfg0_size: 0x1000,
            mem_base: 0x4010_0000,
            mem_size: 0x3F_0000,
            use_ia: false,
            use_sysmmu: false,
            int_min_lock_khz: 0,
            force_recover_linkdown: false,
            use_separated_msi: false,
            msi_doorbell_addr: 0,
        }
    }
}
