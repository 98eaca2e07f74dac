// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Loader for PHY calibration firmware images.
//!
//! The image carries the register sequences the PHY driver replays instead of
//! baking per-revision magic numbers into the code. Layout, all little
//! endian:
//!
//! ```text
//! magic (4) | total size (4) | crc32 (4) | revision (16)
//! then per record:
//! entry bytes (4) | channel (1) | sequence id (1) | pad (2) | entries...
//! ```
//!
//! The checksum covers everything after the checksum field itself. Each entry
//! is one register operation: a plain write, a masked update, or a delay.

use std::fs;
use std::path::Path;

use remain::sorted;
use thiserror::Error;
use zerocopy::little_endian::U32 as Le32;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// "YKH@", the calibration image signature.
pub const PHYCAL_MAGIC: u32 = 0x4048_4B59;

const REVISION_LEN: usize = 16;

#[sorted]
#[derive(Error, Debug)]
pub enum Error {
    #[error("checksum mismatch, image is corrupt")]
    BadChecksum,
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unknown register op {0}")]
    BadOp(u8),
    #[error("failed to read image: {0}")]
    ReadImage(std::io::Error),
    #[error("declared size {declared} does not match image size {actual}")]
    SizeMismatch { declared: u32, actual: usize },
    #[error("image truncated")]
    Truncated,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RawHeader {
    magic: Le32,
    size: Le32,
    checksum: Le32,
    revision: [u8; REVISION_LEN],
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RawRecordHeader {
    entry_bytes: Le32,
    channel: u8,
    seq_id: u8,
    _pad: [u8; 2],
}

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct RawEntry {
    op: u8,
    window: u8,
    _pad: [u8; 2],
    offset: Le32,
    val: Le32,
    mask: Le32,
    delay_us: Le32,
}

/// One register operation of a calibration sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PhyRegOp {
    /// Write `val` to `offset`.
    Write,
    /// Read-modify-write of the bits in `mask`.
    Update,
    /// Wait `delay_us` microseconds.
    Delay,
}

impl PhyRegOp {
    fn from_raw(op: u8) -> Result<PhyRegOp> {
        match op {
            0 => Ok(PhyRegOp::Write),
            1 => Ok(PhyRegOp::Update),
            2 => Ok(PhyRegOp::Delay),
            _ => Err(Error::BadOp(op)),
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            PhyRegOp::Write => 0,
            PhyRegOp::Update => 1,
            PhyRegOp::Delay => 2,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeqEntry {
    pub op: PhyRegOp,
    /// Register window id, interpreted by the PHY driver.
    pub window: u8,
    pub offset: u32,
    pub val: u32,
    pub mask: u32,
    pub delay_us: u32,
}

/// One calibration sequence, addressed by channel and sequence id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub channel: u8,
    pub seq_id: u8,
    pub entries: Vec<SeqEntry>,
}

/// A parsed, checksum-verified calibration image.
#[derive(Clone, Debug)]
pub struct Image {
    revision: String,
    records: Vec<Record>,
}

impl Image {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Image> {
        let bytes = fs::read(path).map_err(Error::ReadImage)?;
        Image::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Image> {
        let (header, mut rest) = RawHeader::read_from_prefix(bytes).map_err(|_| Error::Truncated)?;
        if header.magic.get() != PHYCAL_MAGIC {
            return Err(Error::BadMagic(header.magic.get()));
        }
        if header.size.get() as usize != bytes.len() {
            return Err(Error::SizeMismatch {
                declared: header.size.get(),
                actual: bytes.len(),
            });
        }
        // Everything after the checksum field is covered.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&bytes[12..]);
        if hasher.finalize() != header.checksum.get() {
            return Err(Error::BadChecksum);
        }

        let mut records = Vec::new();
        while !rest.is_empty() {
            let (rec_header, after) =
                RawRecordHeader::read_from_prefix(rest).map_err(|_| Error::Truncated)?;
            let entry_bytes = rec_header.entry_bytes.get() as usize;
            if after.len() < entry_bytes {
                return Err(Error::Truncated);
            }
            let (mut entry_data, tail) = after.split_at(entry_bytes);
            let mut entries = Vec::new();
            while !entry_data.is_empty() {
                let (raw, next) =
                    RawEntry::read_from_prefix(entry_data).map_err(|_| Error::Truncated)?;
                entries.push(SeqEntry {
                    op: PhyRegOp::from_raw(raw.op)?,
                    window: raw.window,
                    offset: raw.offset.get(),
                    val: raw.val.get(),
                    mask: raw.mask.get(),
                    delay_us: raw.delay_us.get(),
                });
                entry_data = next;
            }
            records.push(Record {
                channel: rec_header.channel,
                seq_id: rec_header.seq_id,
                entries,
            });
            rest = tail;
        }

        let revision_end = header
            .revision
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(REVISION_LEN);
        Ok(Image {
            revision: String::from_utf8_lossy(&header.revision[..revision_end]).into_owned(),
            records,
        })
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Sequences destined for one root complex channel.
    pub fn records_for(&self, channel: u8) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(move |r| r.channel == channel)
    }
}

/// Serializes records into a valid image, filling in size and checksum.
pub fn build_image(revision: &str, records: &[Record]) -> Vec<u8> {
    let mut revision_bytes = [0u8; REVISION_LEN];
    let len = revision.len().min(REVISION_LEN);
    revision_bytes[..len].copy_from_slice(&revision.as_bytes()[..len]);

    let mut body = Vec::new();
    for record in records {
        let raw_header = RawRecordHeader {
            entry_bytes: Le32::new((record.entries.len() * std::mem::size_of::<RawEntry>()) as u32),
            channel: record.channel,
            seq_id: record.seq_id,
            _pad: [0; 2],
        };
        body.extend_from_slice(raw_header.as_bytes());
        for entry in &record.entries {
            let raw = RawEntry {
                op: entry.op.to_raw(),
                window: entry.window,
                _pad: [0; 2],
                offset: Le32::new(entry.offset),
                val: Le32::new(entry.val),
                mask: Le32::new(entry.mask),
                delay_us: Le32::new(entry.delay_us),
            };
            body.extend_from_slice(raw.as_bytes());
        }
    }

    let total = std::mem::size_of::<RawHeader>() + body.len();
    let mut header = RawHeader {
        magic: Le32::new(PHYCAL_MAGIC),
        size: Le32::new(total as u32),
        checksum: Le32::new(0),
        revision: revision_bytes,
    };
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&revision_bytes);
    hasher.update(&body);
    header.checksum = Le32::new(hasher.finalize());

    let mut image = Vec::with_capacity(total);
    image.extend_from_slice(header.as_bytes());
    image.extend_from_slice(&body);
    image
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn sample_records() -> Vec<Record> {
        vec![
            Record {
                channel: 0,
                seq_id: 1,
                entries: vec![
                    SeqEntry {
                        op: PhyRegOp::Write,
                        window: 0,
                        offset: 0x404,
                        val: 0xFF,
                        mask: 0,
                        delay_us: 0,
                    },
                    SeqEntry {
                        op: PhyRegOp::Delay,
                        window: 0,
                        offset: 0,
                        val: 0,
                        mask: 0,
                        delay_us: 10,
                    },
                ],
            },
            Record {
                channel: 1,
                seq_id: 1,
                entries: vec![SeqEntry {
                    op: PhyRegOp::Update,
                    window: 1,
                    offset: 0x188,
                    val: 0x4,
                    mask: 0xC,
                    delay_us: 0,
                }],
            },
        ]
    }

    #[test]
    fn parse_built_image() {
        let image = Image::parse(&build_image("EVT1.1", &sample_records())).unwrap();
        assert_eq!(image.revision(), "EVT1.1");
        assert_eq!(image.records().len(), 2);
        assert_eq!(image.records()[0].entries.len(), 2);
        assert_eq!(image.records_for(1).count(), 1);
        assert_eq!(image.records_for(2).count(), 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_image("EVT1.1", &sample_records());
        bytes[0] = 0;
        assert!(matches!(Image::parse(&bytes), Err(Error::BadMagic(_))));
    }

    #[test]
    fn rejects_corrupt_body() {
        let mut bytes = build_image("EVT1.1", &sample_records());
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(Image::parse(&bytes), Err(Error::BadChecksum)));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = build_image("EVT1.1", &sample_records());
        // Truncation is either a record cut short or a wrong declared size.
        assert!(matches!(
            Image::parse(&bytes[..bytes.len() - 4]),
            Err(Error::SizeMismatch { .. })
        ));
        assert!(matches!(Image::parse(&bytes[..8]), Err(Error::Truncated)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&build_image("EVT0", &sample_records())).unwrap();
        let image = Image::load(file.path()).unwrap();
        assert_eq!(image.revision(), "EVT0");
    }
}
