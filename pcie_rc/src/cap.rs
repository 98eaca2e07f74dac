// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Configuration-space capability discovery for the root port and the
//! endpoint behind it. Offsets are cached once per link-up because the chain
//! cannot change while the link stays up.

use crate::hw::Hardware;
use crate::hw::Window;
use crate::regs::*;

/// Cached capability offsets of one configuration space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CapOffsets {
    pub pcie: Option<u32>,
    pub pm: Option<u32>,
    pub msi: Option<u32>,
    pub l1ss: Option<u32>,
    pub ltr: Option<u32>,
}

// A malformed chain could loop forever; 48 is more capabilities than a
// config space has room for.
const MAX_CAP_WALK: usize = 48;

/// Walks the classic (0x34) and extended (0x100) capability chains.
pub fn walk(hw: &dyn Hardware, window: Window) -> CapOffsets {
    let mut caps = CapOffsets::default();

    let mut pos = hw.read(window, PCI_CAPABILITY_LIST) & 0xFF;
    for _ in 0..MAX_CAP_WALK {
        if pos == 0 {
            break;
        }
        let header = hw.read(window, pos);
        match (header & 0xFF) as u8 {
            PCI_CAP_ID_PM => caps.pm = Some(pos),
            PCI_CAP_ID_MSI => caps.msi = Some(pos),
            PCI_CAP_ID_EXP => caps.pcie = Some(pos),
            _ => {}
        }
        pos = (header >> 8) & 0xFF;
    }

    let mut pos = PCI_EXT_CAP_BASE;
    for _ in 0..MAX_CAP_WALK {
        let header = hw.read(window, pos);
        if header == 0 || header == 0xFFFF_FFFF {
            break;
        }
        match (header & 0xFFFF) as u16 {
            PCI_EXT_CAP_ID_L1SS => caps.l1ss = Some(pos),
            PCI_EXT_CAP_ID_LTR => caps.ltr = Some(pos),
            _ => {}
        }
        pos = header >> 20;
        if pos == 0 {
            break;
        }
    }

    caps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeHw;

    #[test]
    fn finds_all_endpoint_caps() {
        let hw = FakeHw::new();
        let caps = walk(&hw, Window::EpCfg);
        assert!(caps.pcie.is_some());
        assert!(caps.pm.is_some());
        // The discovered offsets must agree with the fake's own helpers, the
        // L1SS and LTR writes land at these addresses.
        assert_eq!(caps.msi, Some(FakeHw::msi_cap()));
        assert_eq!(caps.l1ss, Some(FakeHw::l1ss_cap()));
        assert_eq!(caps.ltr, Some(FakeHw::ltr_cap()));
    }

    #[test]
    fn root_port_has_no_ltr() {
        let hw = FakeHw::new();
        let caps = walk(&hw, Window::Dbi);
        assert_eq!(caps.l1ss, Some(FakeHw::l1ss_cap()));
        assert_eq!(caps.ltr, None);
    }

    #[test]
    fn empty_space_yields_nothing() {
        let hw = FakeHw::new();
        // The IA window carries no config space.
        let caps = walk(&hw, Window::Ia);
        assert_eq!(caps, CapOffsets::default());
    }
}
