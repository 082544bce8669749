// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Format descriptors: the per-controller constants that configure the PLL,
//! the code translator, and the record state machine.

use fluxion_core::errors::{config_error, decode_error, Result};

/// The encoding family of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coding {
    Fm,
    Mfm,
    RllSeagate,
    RllAdaptec,
    RllAdaptec4070,
    RllWd,
    RllOmti,
    /// Data Technology Corporation DTC7287. Experimental: the sector mapping
    /// and marks of this controller are not fully understood.
    RllDtc7287,
    /// A user-defined format built with [`CustomFormat`].
    Custom,
}

/// The code table used to translate half-bit windows into data bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codemap {
    /// Interleaved clock and data cells; the data cells are the code unit.
    FmMfm,
    /// RLL (2,7) variable-length prefix code, IBM variant.
    RllIbm,
    /// RLL (2,7) variable-length prefix code, Western Digital variant. The
    /// WD table differs from the IBM one only in the branches taken for the
    /// raw patterns 0b000100 and 0b100100.
    RllWd,
}

/// Allowed pulse widths, in half-bit cells, for each run-length class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellLimits {
    /// (0,1) RLL: pulses span 1 or 2 half-bit cells.
    Fm,
    /// (1,3) RLL: pulses span 2 to 4 half-bit cells.
    Mfm,
    /// (2,7) RLL: pulses span 3 to 8 half-bit cells.
    Rll,
}

impl CellLimits {
    pub fn min(&self) -> u32 {
        match *self {
            CellLimits::Fm => 1,
            CellLimits::Mfm => 2,
            CellLimits::Rll => 3,
        }
    }

    pub fn max(&self) -> u32 {
        match *self {
            CellLimits::Fm => 2,
            CellLimits::Mfm => 4,
            CellLimits::Rll => 8,
        }
    }

    pub fn contains(&self, cells: u32) -> bool {
        cells >= self.min() && cells <= self.max()
    }
}

/// A set of mark byte values.
///
/// The wildcard set matches every byte; it is useful when reverse-engineering
/// an unknown format with a custom descriptor.
#[derive(Clone, Debug, Default)]
pub struct MarkSet {
    any: bool,
    bytes: Vec<u8>,
}

impl MarkSet {
    /// An empty set.
    pub fn none() -> MarkSet {
        Default::default()
    }

    /// A set holding the given byte values.
    pub fn of(bytes: &[u8]) -> MarkSet {
        MarkSet { any: false, bytes: bytes.to_vec() }
    }

    /// The wildcard set.
    pub fn any() -> MarkSet {
        MarkSet { any: true, bytes: Vec::new() }
    }

    pub fn contains(&self, val: u8) -> bool {
        self.any || self.bytes.contains(&val)
    }

    pub fn is_empty(&self) -> bool {
        !self.any && self.bytes.is_empty()
    }
}

/// An immutable description of one on-disk format. Shared by reference
/// between the PLL and the record state machine; never mutated after
/// construction.
#[derive(Clone, Debug)]
pub struct FormatDescriptor {
    pub coding: Coding,
    pub limits: CellLimits,
    pub codemap: Codemap,
    /// Pulse width, in half-bit cells, of the lock-on preamble.
    pub sync_pulse: u32,
    /// Pulse-width sequences that terminate the preamble and align the byte
    /// boundary.
    pub sync_marks: Vec<Vec<u8>>,
    /// Per-sync-mark count of half-bit windows already shifted in when the
    /// mark matches, pre-adjusted so that the final pulse of the mark, which
    /// is accounted during decoding, lands the byte boundary correctly.
    shift_index: Vec<i32>,
    /// Value xored into the raw shift register when an 8-cell pulse is seen
    /// while scanning for an RLL sync mark. Rewrites the encoded illegal
    /// sequence that embeds the mark into a legal codeword.
    pub mark_xor: u32,
    /// Marks that start a record whose kind is decided by the next byte.
    pub iddata_mark: MarkSet,
    /// Marks that go straight to an ID record.
    pub id_mark: MarkSet,
    /// Marks that go straight to a data record.
    pub data_mark: MarkSet,
    /// Marks that turn the following `iddata_mark` into an ID mark.
    pub id_prefix_mark: MarkSet,
    /// Inert marks.
    pub nop_mark: MarkSet,
    /// Inert marks that seed the A1 accumulator.
    pub nop_a1_mark: MarkSet,
}

impl FormatDescriptor {
    /// Builds the descriptor of one of the preset formats.
    pub fn preset(coding: Coding) -> Result<FormatDescriptor> {
        let limits: CellLimits;
        let codemap: Codemap;
        let sync_pulse: u32;
        let sync_marks: &[&[u8]];
        let shift_index: &[i32];

        let mut iddata_mark = MarkSet::none();
        let mut id_mark = MarkSet::none();
        let mut data_mark = MarkSet::none();
        let mut id_prefix_mark = MarkSet::none();
        let mut nop_mark = MarkSet::none();

        match coding {
            Coding::Fm => {
                limits = CellLimits::Fm;
                codemap = Codemap::FmMfm;
                sync_pulse = 2;
                // The three agreed-upon FM address mark spellings: IDAM (FE
                // with C7 clock), DAM (FB with C7 clock), IAM (FC with D7
                // clock).
                sync_marks = &[
                    &[1, 1, 1, 2, 2, 2, 1, 1, 1, 1, 1, 2],
                    &[1, 1, 1, 2, 2, 2, 1, 2, 1, 1, 1],
                    &[1, 1, 1, 2, 1, 1, 2, 1, 1, 1, 2, 2],
                ];
                shift_index = &[17];
                id_mark = MarkSet::of(&[0xfe]);
                data_mark = MarkSet::of(&[0xfb]);
            }
            Coding::Mfm => {
                limits = CellLimits::Mfm;
                codemap = Codemap::FmMfm;
                sync_pulse = 2;
                sync_marks = &[&[3, 4, 3, 4, 3], &[3, 2, 3, 4, 3, 4]];
                shift_index = &[16, 18];
                iddata_mark = MarkSet::of(&[0xa1]);
            }
            // Seagate ST11M/21M.
            Coding::RllSeagate => {
                limits = CellLimits::Rll;
                codemap = Codemap::RllIbm;
                sync_pulse = 3;
                sync_marks = &[&[4, 3, 8, 3], &[5, 6, 8, 3]];
                shift_index = &[18];
                iddata_mark = MarkSet::of(&[0xa1]);
                id_prefix_mark = MarkSet::of(&[0x1e]);
                nop_mark = MarkSet::of(&[0xde]);
            }
            // Adaptec ACB-237x.
            Coding::RllAdaptec => {
                limits = CellLimits::Rll;
                codemap = Codemap::RllIbm;
                sync_pulse = 3;
                sync_marks = &[&[4, 3, 8, 3], &[5, 6, 8, 3], &[8, 3]];
                shift_index = &[18];
                id_mark = MarkSet::of(&[0xa1]);
                iddata_mark = MarkSet::of(&[0xa0]);
                nop_mark = MarkSet::of(&[0x1e, 0x5e, 0xde]);
            }
            // Adaptec ACB-4070, an RLL to SCSI bridge storing LBAs in its
            // headers.
            Coding::RllAdaptec4070 => {
                limits = CellLimits::Rll;
                codemap = Codemap::RllIbm;
                sync_pulse = 3;
                sync_marks = &[&[4, 3, 8, 3], &[5, 6, 8, 3], &[8, 3]];
                shift_index = &[18];
                id_mark = MarkSet::of(&[0xa1]);
                data_mark = MarkSet::of(&[0xa0]);
                nop_mark = MarkSet::of(&[0x1e, 0x5e, 0xde]);
            }
            Coding::RllWd => {
                limits = CellLimits::Rll;
                codemap = Codemap::RllWd;
                sync_pulse = 3;
                sync_marks = &[&[8, 3], &[5, 8, 3], &[7, 8, 3]];
                shift_index = &[12];
                iddata_mark = MarkSet::of(&[0xf0]);
            }
            // OMTI-8247. "At SAM time a 2 of 7 pattern is searched for
            // consisting of a nrz 62 with a pulse one clock delayed", hence
            // the distinct mark fix-up value.
            Coding::RllOmti => {
                limits = CellLimits::Rll;
                codemap = Codemap::RllIbm;
                sync_pulse = 4;
                sync_marks = &[&[6, 8, 3, 3], &[5, 3, 8, 3, 3]];
                shift_index = &[17];
                iddata_mark = MarkSet::of(&[0x62]);
            }
            // DTC7287. Tentative: sync marks look almost ESDI-like and the
            // header layout is only partially reverse engineered.
            Coding::RllDtc7287 => {
                limits = CellLimits::Rll;
                codemap = Codemap::RllWd;
                sync_pulse = 4;
                sync_marks = &[
                    &[
                        5, 4, 4, 4, 4, 3, 8, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
                        4, 6, 6, 7,
                    ],
                    &[
                        5, 4, 4, 4, 4, 3, 8, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4,
                        6, 6, 7,
                    ],
                    &[
                        5, 4, 4, 4, 4, 3, 8, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 6,
                        6, 7,
                    ],
                ];
                shift_index = &[18];
                id_mark = MarkSet::of(&[0x90, 0x91, 0x92, 0x93, 0x95, 0x96, 0x97]);
                data_mark = MarkSet::of(&[0x02, 0x03]);
                nop_mark = MarkSet::of(&[0x36, 0x83]);
            }
            Coding::Custom => {
                return config_error("format: the custom format requires an explicit definition");
            }
        }

        FormatDescriptor::build(
            coding,
            limits,
            codemap,
            sync_pulse,
            sync_marks.iter().map(|m| m.to_vec()).collect(),
            shift_index.to_vec(),
            iddata_mark,
            id_mark,
            data_mark,
            id_prefix_mark,
            nop_mark,
            MarkSet::none(),
        )
    }

    /// Builds a descriptor from a user-defined format.
    pub fn custom(spec: CustomFormat) -> Result<FormatDescriptor> {
        // FM and MFM streams have exactly one codemap.
        let codemap = match spec.limits {
            CellLimits::Fm | CellLimits::Mfm => Codemap::FmMfm,
            CellLimits::Rll => spec.codemap,
        };

        FormatDescriptor::build(
            Coding::Custom,
            spec.limits,
            codemap,
            spec.sync_pulse,
            spec.sync_marks,
            spec.shift_index,
            spec.iddata_mark,
            spec.id_mark,
            spec.data_mark,
            spec.id_prefix_mark,
            spec.nop_mark,
            spec.nop_a1_mark,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        coding: Coding,
        limits: CellLimits,
        codemap: Codemap,
        sync_pulse: u32,
        sync_marks: Vec<Vec<u8>>,
        mut shift_index: Vec<i32>,
        iddata_mark: MarkSet,
        id_mark: MarkSet,
        data_mark: MarkSet,
        id_prefix_mark: MarkSet,
        nop_mark: MarkSet,
        nop_a1_mark: MarkSet,
    ) -> Result<FormatDescriptor> {
        if sync_pulse == 0 {
            return config_error("format: sync pulse width must be at least one half-bit cell");
        }
        if sync_marks.is_empty() || sync_marks.iter().any(|m| m.is_empty()) {
            return config_error("format: at least one non-empty sync mark is required");
        }

        // One common shift index may be given for all sync marks. The offsets
        // are stored minus the final pulse of the mark because the decoding
        // state accounts that pulse before the first code unit is extracted.
        if shift_index.len() == 1 {
            let common = shift_index[0] - i32::from(*sync_marks[0].last().unwrap());
            shift_index = vec![common; sync_marks.len()];
        }
        else if shift_index.len() != sync_marks.len() {
            return config_error(
                "format: shift_index requires either one common value or one value per sync mark",
            );
        }
        else {
            for (si, mark) in shift_index.iter_mut().zip(&sync_marks) {
                *si -= i32::from(*mark.last().unwrap());
            }
        }

        let mark_xor = if coding == Coding::RllOmti { 3 } else { 16 };

        Ok(FormatDescriptor {
            coding,
            limits,
            codemap,
            sync_pulse,
            sync_marks,
            shift_index,
            mark_xor,
            iddata_mark,
            id_mark,
            data_mark,
            id_prefix_mark,
            nop_mark,
            nop_a1_mark,
        })
    }

    /// The pre-adjusted shift index of one sync-mark variant.
    pub(crate) fn shift_index_for(&self, variant: usize) -> i32 {
        self.shift_index[variant]
    }
}

/// A user-defined format definition.
#[derive(Clone, Debug)]
pub struct CustomFormat {
    pub limits: CellLimits,
    pub codemap: Codemap,
    pub sync_pulse: u32,
    pub sync_marks: Vec<Vec<u8>>,
    /// One common value, or one value per sync mark.
    pub shift_index: Vec<i32>,
    pub iddata_mark: MarkSet,
    pub id_mark: MarkSet,
    pub data_mark: MarkSet,
    pub id_prefix_mark: MarkSet,
    pub nop_mark: MarkSet,
    pub nop_a1_mark: MarkSet,
}

/// The decoded subfields of an ID record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdRecord {
    /// Cylinder number.
    pub cyl: u32,
    /// Side (head) number.
    pub side: u8,
    /// Sector number.
    pub sector: u8,
    /// Raw sector length code.
    pub len_code: u8,
    /// Sector payload length in bytes.
    pub len: u32,
}

/// The on-disk layout of an ID record, selecting one of the known header
/// decoders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderLayout {
    /// Three header bytes; cylinder high bits ride in the address mark.
    ThreeByte,
    /// Four header bytes: cylinder, side, sector, length code.
    FourByte,
    /// Seagate ST11M/21M packing, fixed 512-byte sectors.
    Seagate,
    /// OMTI packing with a full 16-bit cylinder, fixed 512-byte sectors.
    Omti,
    /// Adaptec ACB-237x packing, fixed 512-byte sectors.
    Adaptec,
    /// Adaptec ACB-4070: a 24-bit LBA assuming 6 heads and 26 sectors per
    /// track, fixed 512-byte sectors.
    Adaptec4070,
    /// DTC7287, experimental: all input bytes are xored with 0xFF.
    Dtc7287,
}

impl HeaderLayout {
    /// The header size in bytes.
    pub fn size(&self) -> usize {
        match *self {
            HeaderLayout::ThreeByte | HeaderLayout::Dtc7287 => 3,
            _ => 4,
        }
    }

    /// Decodes the raw header bytes, and for the layouts that need it the
    /// address mark, into the ID subfields.
    pub fn decode(&self, mark: Option<u8>, rec: &[u8]) -> Result<IdRecord> {
        debug_assert_eq!(rec.len(), self.size());

        let id = match *self {
            HeaderLayout::ThreeByte => {
                let mark = match mark {
                    Some(mark) => mark,
                    None => {
                        return decode_error(
                            "header: 3-byte layout requires an address mark carrying cylinder bits",
                        );
                    }
                };
                // The mark encodes three bits of the cylinder high byte:
                // bit 0 straight, bits 1 and 3 inverted.
                let msb = u32::from((mark ^ 0x0e) & 0x0f);
                IdRecord {
                    cyl: ((msb & 0b11) << 8) + ((msb & 0b1000) << 7) + u32::from(rec[0]),
                    side: rec[1] & 0x0f,
                    sector: rec[2],
                    len_code: rec[1] >> 4,
                    len: 128 << ((rec[1] >> 4) & 7),
                }
            }
            HeaderLayout::FourByte => IdRecord {
                cyl: u32::from(rec[0]),
                side: rec[1],
                sector: rec[2],
                len_code: rec[3],
                len: 128 << (rec[3] & 7),
            },
            HeaderLayout::Seagate => IdRecord {
                cyl: (u32::from(rec[0] & 0b1100_0000) << 2) + u32::from(rec[1]),
                side: rec[0] & 0x0f,
                // Quirk: the spare unused sector is marked with sector 254.
                sector: rec[2],
                len_code: 2,
                len: 512,
            },
            HeaderLayout::Omti => IdRecord {
                cyl: (u32::from(rec[0]) << 8) + u32::from(rec[1]),
                side: rec[2],
                sector: rec[3],
                len_code: 2,
                len: 512,
            },
            HeaderLayout::Adaptec => IdRecord {
                cyl: (u32::from(rec[1] & 0xf0) << 4) + u32::from(rec[0]),
                side: rec[1] & 0x0f,
                sector: rec[2],
                len_code: 2,
                len: 512,
            },
            HeaderLayout::Adaptec4070 => {
                let lba =
                    (u32::from(rec[0]) << 16) + (u32::from(rec[1]) << 8) + u32::from(rec[2]);
                let track = lba / 26;
                let cyl = track / 6;
                IdRecord {
                    cyl,
                    side: (track - cyl * 6) as u8,
                    sector: (lba - track * 26) as u8,
                    len_code: 2,
                    len: 512,
                }
            }
            HeaderLayout::Dtc7287 => {
                let mark = match mark {
                    Some(mark) => mark ^ 0xff,
                    None => {
                        return decode_error(
                            "header: DTC7287 layout requires an address mark carrying cylinder bits",
                        );
                    }
                };
                let r = [rec[0] ^ 0xff, rec[1] ^ 0xff, rec[2] ^ 0xff];
                let msb = u32::from((mark ^ 0x0c) & 0x0f);
                let mut side = (r[1] & 0x0f) >> 1;
                if side == 7 {
                    side = 5;
                }
                let mut id = IdRecord {
                    cyl: ((msb & 0b11) << 8) + ((msb & 0b1000) << 7) + u32::from(r[0] >> 1),
                    side,
                    sector: (r[2] & 0b11_1110) >> 1,
                    len_code: 2,
                    len: 512,
                };
                // Special headers leave a bizarre 64-byte data remnant with a
                // hardcoded sector number of 254.
                if r[1] & 0b0000_0001 != 0 {
                    id.len = 64;
                    id.sector = 254;
                }
                id
            }
        };

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CellLimits, Codemap, Coding, CustomFormat, FormatDescriptor, HeaderLayout, MarkSet,
    };

    #[test]
    fn verify_cell_limits() {
        assert!(CellLimits::Fm.contains(1) && CellLimits::Fm.contains(2));
        assert!(!CellLimits::Fm.contains(3));
        assert!(CellLimits::Mfm.contains(2) && CellLimits::Mfm.contains(4));
        assert!(!CellLimits::Mfm.contains(1) && !CellLimits::Mfm.contains(5));
        assert!(CellLimits::Rll.contains(3) && CellLimits::Rll.contains(8));
        assert!(!CellLimits::Rll.contains(0) && !CellLimits::Rll.contains(9));
    }

    #[test]
    fn verify_mark_set() {
        let marks = MarkSet::of(&[0x1e, 0x5e, 0xde]);
        assert!(marks.contains(0x5e));
        assert!(!marks.contains(0xa1));
        assert!(MarkSet::any().contains(0x42));
        assert!(MarkSet::none().is_empty());
    }

    #[test]
    fn verify_common_shift_index_adjustment() {
        // MFM gives one shift index per sync mark; each is reduced by its own
        // final pulse width.
        let mfm = FormatDescriptor::preset(Coding::Mfm).unwrap();
        assert_eq!(mfm.shift_index_for(0), 16 - 3);
        assert_eq!(mfm.shift_index_for(1), 18 - 4);

        // FM gives one common value; the first mark's final pulse width is
        // used for every variant.
        let fm = FormatDescriptor::preset(Coding::Fm).unwrap();
        assert_eq!(fm.shift_index_for(0), 15);
        assert_eq!(fm.shift_index_for(1), 15);
        assert_eq!(fm.shift_index_for(2), 15);
    }

    #[test]
    fn verify_custom_format_validation() {
        let spec = CustomFormat {
            limits: CellLimits::Rll,
            codemap: Codemap::RllIbm,
            sync_pulse: 3,
            sync_marks: vec![vec![4, 3, 8, 3], vec![5, 6, 8, 3]],
            shift_index: vec![18, 18, 18],
            iddata_mark: MarkSet::of(&[0xa1]),
            id_mark: MarkSet::none(),
            data_mark: MarkSet::none(),
            id_prefix_mark: MarkSet::none(),
            nop_mark: MarkSet::none(),
            nop_a1_mark: MarkSet::none(),
        };
        assert!(FormatDescriptor::custom(spec).is_err());
    }

    #[test]
    fn verify_custom_fm_mfm_codemap_is_forced() {
        let spec = CustomFormat {
            limits: CellLimits::Mfm,
            codemap: Codemap::RllIbm,
            sync_pulse: 2,
            sync_marks: vec![vec![3, 4, 3, 4, 3]],
            shift_index: vec![16],
            iddata_mark: MarkSet::of(&[0xa1]),
            id_mark: MarkSet::none(),
            data_mark: MarkSet::none(),
            id_prefix_mark: MarkSet::none(),
            nop_mark: MarkSet::none(),
            nop_a1_mark: MarkSet::none(),
        };
        let fmt = FormatDescriptor::custom(spec).unwrap();
        assert_eq!(fmt.codemap, Codemap::FmMfm);
    }

    #[test]
    fn verify_omti_mark_fixup() {
        assert_eq!(FormatDescriptor::preset(Coding::RllOmti).unwrap().mark_xor, 3);
        assert_eq!(FormatDescriptor::preset(Coding::RllSeagate).unwrap().mark_xor, 16);
    }

    #[test]
    fn verify_preset_requires_concrete_coding() {
        assert!(FormatDescriptor::preset(Coding::Custom).is_err());
    }

    #[test]
    fn verify_header_three_byte() {
        // Mark 0xFF carries cylinder bit 8.
        let id = HeaderLayout::ThreeByte.decode(Some(0xff), &[0x12, 0x21, 7]).unwrap();
        assert_eq!(id.cyl, 0x112);
        assert_eq!(id.side, 1);
        assert_eq!(id.sector, 7);
        assert_eq!(id.len_code, 2);
        assert_eq!(id.len, 512);

        // A plain 0xFE mark contributes no high cylinder bits.
        let id = HeaderLayout::ThreeByte.decode(Some(0xfe), &[0x55, 0x01, 1]).unwrap();
        assert_eq!(id.cyl, 0x55);
        assert_eq!(id.len, 128);

        assert!(HeaderLayout::ThreeByte.decode(None, &[0, 0, 0]).is_err());
    }

    #[test]
    fn verify_header_four_byte() {
        let id = HeaderLayout::FourByte.decode(None, &[5, 1, 9, 2]).unwrap();
        assert_eq!(id.cyl, 5);
        assert_eq!(id.side, 1);
        assert_eq!(id.sector, 9);
        assert_eq!(id.len, 512);

        // The length code wraps at 3 bits.
        let id = HeaderLayout::FourByte.decode(None, &[0, 0, 0, 0x0f]).unwrap();
        assert_eq!(id.len, 128 << 7);
    }

    #[test]
    fn verify_header_seagate() {
        let id = HeaderLayout::Seagate.decode(None, &[0x81, 0x02, 0x03, 0]).unwrap();
        assert_eq!(id.cyl, 0x202);
        assert_eq!(id.side, 1);
        assert_eq!(id.sector, 3);
        assert_eq!(id.len, 512);
    }

    #[test]
    fn verify_header_omti() {
        let id = HeaderLayout::Omti.decode(None, &[0x01, 0x00, 2, 9]).unwrap();
        assert_eq!(id.cyl, 256);
        assert_eq!(id.side, 2);
        assert_eq!(id.sector, 9);
    }

    #[test]
    fn verify_header_adaptec() {
        let id = HeaderLayout::Adaptec.decode(None, &[0x34, 0x12, 5, 0]).unwrap();
        assert_eq!(id.cyl, 0x134);
        assert_eq!(id.side, 2);
        assert_eq!(id.sector, 5);
    }

    #[test]
    fn verify_header_adaptec4070() {
        // LBA 394 with 6 heads and 26 sectors/track is cylinder 2, head 3,
        // sector 4.
        let id = HeaderLayout::Adaptec4070.decode(None, &[0x00, 0x01, 0x8a]).unwrap();
        assert_eq!(id.cyl, 2);
        assert_eq!(id.side, 3);
        assert_eq!(id.sector, 4);
        assert_eq!(id.len, 512);
    }

    #[test]
    fn verify_header_dtc7287() {
        // All input is xored with 0xFF before unpacking.
        let id = HeaderLayout::Dtc7287.decode(Some(0xf3), &[245, 251, 237]).unwrap();
        assert_eq!(id.cyl, 5);
        assert_eq!(id.side, 2);
        assert_eq!(id.sector, 9);
        assert_eq!(id.len, 512);

        // The special-header bit forces a 64-byte remnant with sector 254.
        let id = HeaderLayout::Dtc7287.decode(Some(0xf3), &[245, 250, 237]).unwrap();
        assert_eq!(id.sector, 254);
        assert_eq!(id.len, 64);
    }
}
