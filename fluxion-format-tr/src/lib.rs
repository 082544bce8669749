// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reader for the dgesswein/mfm transition and emulator disk-image formats.
//!
//! Both variants share a 16-byte preamble and a little-endian header. A
//! *transition* file stores, per track, a delta-encoded stream of flux
//! transition times sampled at the transition count rate, protected by a
//! CRC-32. An *emulator* file stores fixed-size track images without
//! per-track checksums.

use fluxion_core::checksum::{Crc, CrcParams};
use fluxion_core::errors::{decode_error, end_of_stream_error, unsupported_error, Error, Result};
use fluxion_core::io::{MediaSource, MonitorStream, ReadBytes, SourceStream};
use fluxion_core::pulse::{Channels, PulseEvent, PulseSource};

use log::warn;

/// The 8-byte file preamble.
const TR_STREAM_MARKER: [u8; 8] = [0xee, b'M', b'F', b'M', 0x0d, 0x0a, 0x1a, 0x00];

/// The emulator track header marker.
const TR_EMU_TRACK_MARKER: u32 = 0x1234_5678;

/// CRC-32 protecting the file header and each transition track.
const TR_CRC: CrcParams = CrcParams::new(32, 0x140a_0445, 0xffff_ffff);

/// Transition files are only defined for a 200 MHz transition count rate.
const TR_TRANSITION_RATE: u32 = 200_000_000;

/// The file variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrVariant {
    /// Delta-encoded flux transitions with per-track CRCs.
    Transition,
    /// Fixed-size decoded track images.
    Emulator,
}

/// The parsed file header.
#[derive(Clone, Debug)]
pub struct TrHeader {
    pub variant: TrVariant,
    pub major_version: u8,
    pub minor_version: u8,
    /// Offset of the first track header; also the file header size.
    pub offset_first_track: u32,
    /// Fixed per-track data size. Emulator files only.
    pub track_data_size: Option<u32>,
    pub track_header_size: u32,
    pub num_cylinders: u32,
    pub num_heads: u32,
    /// Transition count rate (transition files) or bit rate (emulator
    /// files), in Hz.
    pub bit_rate: u32,
    pub command_line: String,
    pub note: String,
    pub start_time_ns: u32,
}

/// One track of pulse data.
#[derive(Clone, Debug)]
pub struct Track {
    pub cylinder: u32,
    pub head: u32,
    /// Sample deltas between consecutive flux transitions.
    pub deltas: Vec<u32>,
    sample_rate: u32,
}

impl Track {
    /// A pulse source replaying this track's transitions.
    pub fn pulses(&self) -> TrackPulses<'_> {
        TrackPulses { deltas: &self.deltas, next: 0, sample: 0, sample_rate: self.sample_rate }
    }
}

/// A [`PulseSource`] over one track's delta stream.
pub struct TrackPulses<'a> {
    deltas: &'a [u32],
    next: usize,
    sample: u64,
    sample_rate: u32,
}

impl<'a> PulseSource for TrackPulses<'a> {
    fn next_edge(&mut self) -> Result<PulseEvent> {
        if self.next >= self.deltas.len() {
            return end_of_stream_error();
        }
        self.sample += u64::from(self.deltas[self.next]);
        self.next += 1;
        Ok(PulseEvent { sample: self.sample, channels: Channels::DATA })
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }
}

/// Transition/emulator file reader.
pub struct TrReader {
    reader: SourceStream,
    header: TrHeader,
}

impl TrReader {
    pub fn try_new(source: Box<dyn MediaSource>) -> Result<TrReader> {
        let mut reader = SourceStream::new(source);

        // The whole header, preamble included, is covered by the trailing
        // CRC-32 of transition files.
        let mut crc_reader = MonitorStream::new(&mut reader, Crc::new(TR_CRC));

        let mut marker = [0u8; 8];
        crc_reader.read_buf_bytes(&mut marker)?;
        if marker != TR_STREAM_MARKER {
            return unsupported_error("tr: missing file marker");
        }

        // File type and version, packed (type << 24) | (major << 16) |
        // (minor << 8).
        let file_type_version = crc_reader.read_u32()?;
        let variant = match file_type_version >> 24 {
            1 => TrVariant::Transition,
            2 => TrVariant::Emulator,
            _ => return unsupported_error("tr: unknown file type"),
        };
        let major_version = (file_type_version >> 16) as u8;
        let minor_version = (file_type_version >> 8) as u8;
        if file_type_version & 0xff != 0 {
            warn!("tr: reserved version byte is non-zero");
        }

        let offset_first_track = crc_reader.read_u32()?;

        let track_data_size = match variant {
            TrVariant::Emulator => Some(crc_reader.read_u32()?),
            TrVariant::Transition => None,
        };

        let track_header_size = crc_reader.read_u32()?;
        let num_cylinders = crc_reader.read_u32()?;
        let num_heads = crc_reader.read_u32()?;
        let bit_rate = crc_reader.read_u32()?;

        if variant == TrVariant::Transition && bit_rate != TR_TRANSITION_RATE {
            return unsupported_error("tr: only a 200 MHz transition count rate is supported");
        }

        let command_line = read_lpstring(&mut crc_reader)?;
        let note = read_lpstring(&mut crc_reader)?;
        let start_time_ns = crc_reader.read_u32()?;

        match variant {
            TrVariant::Transition => {
                // Consume any padding up to the stored CRC, which occupies
                // the final four header bytes.
                let crc_pos = u64::from(offset_first_track).checked_sub(4);
                match crc_pos {
                    Some(crc_pos) if crc_pos >= crc_reader.pos() => {
                        let pad = crc_pos - crc_reader.pos();
                        for _ in 0..pad {
                            crc_reader.read_u8()?;
                        }
                    }
                    _ => return decode_error("tr: header overruns its declared size"),
                }

                let computed = crc_reader.monitor().crc() as u32;
                let stored = reader.read_u32()?;
                if computed != stored {
                    warn!("tr: header crc mismatch, stored {:08x}, computed {:08x}", stored, computed);
                }
            }
            TrVariant::Emulator => {
                if u64::from(offset_first_track) < reader.pos() {
                    return decode_error("tr: header overruns its declared size");
                }
                let skip = u64::from(offset_first_track) - reader.pos();
                reader.ignore_bytes(skip)?;
            }
        }

        let header = TrHeader {
            variant,
            major_version,
            minor_version,
            offset_first_track,
            track_data_size,
            track_header_size,
            num_cylinders,
            num_heads,
            bit_rate,
            command_line,
            note,
            start_time_ns,
        };

        Ok(TrReader { reader, header })
    }

    pub fn header(&self) -> &TrHeader {
        &self.header
    }

    /// Reads the next track, or `None` at the end-of-file marker or the end
    /// of the stream.
    pub fn next_track(&mut self) -> Result<Option<Track>> {
        match self.header.variant {
            TrVariant::Transition => self.next_transition_track(),
            TrVariant::Emulator => self.next_emulator_track(),
        }
    }

    /// Skips one track without decoding it. Returns `false` at the end
    /// marker or the end of the stream.
    pub fn skip_track(&mut self) -> Result<bool> {
        match self.header.variant {
            TrVariant::Transition => {
                let cylinder = match self.reader.read_i32() {
                    Ok(cylinder) => cylinder,
                    Err(Error::EndOfStream) => return Ok(false),
                    Err(err) => return Err(err),
                };
                let head = self.reader.read_i32()?;
                let num_data_bytes = self.reader.read_u32()?;
                if cylinder == -1 && head == -1 {
                    return Ok(false);
                }
                // Data plus the trailing CRC.
                self.reader.ignore_bytes(u64::from(num_data_bytes) + 4)?;
                Ok(true)
            }
            TrVariant::Emulator => {
                let marker = match self.reader.read_u32() {
                    Ok(marker) => marker,
                    Err(Error::EndOfStream) => return Ok(false),
                    Err(err) => return Err(err),
                };
                if marker != TR_EMU_TRACK_MARKER {
                    warn!("tr: invalid emulator track marker {:08x}", marker);
                }
                let cylinder = self.reader.read_i32()?;
                let head = self.reader.read_i32()?;
                if cylinder == -1 && head == -1 {
                    return Ok(false);
                }
                self.reader.ignore_bytes(u64::from(self.header.track_data_size.unwrap_or(0)))?;
                Ok(true)
            }
        }
    }

    fn next_transition_track(&mut self) -> Result<Option<Track>> {
        // The per-track CRC covers the track header and the data bytes.
        let mut crc_reader = MonitorStream::new(&mut self.reader, Crc::new(TR_CRC));

        let cylinder = match crc_reader.read_i32() {
            Ok(cylinder) => cylinder,
            Err(Error::EndOfStream) => return Ok(None),
            Err(err) => return Err(err),
        };
        let head = crc_reader.read_i32()?;
        let num_data_bytes = crc_reader.read_u32()?;

        if cylinder == -1 && head == -1 {
            return Ok(None);
        }
        if cylinder < 0
            || head < 0
            || cylinder as u32 >= self.header.num_cylinders
            || head as u32 >= self.header.num_heads
        {
            return decode_error("tr: track header out of bounds");
        }

        let mut data = vec![0u8; num_data_bytes as usize];
        crc_reader.read_buf_bytes(&mut data)?;

        let computed = crc_reader.monitor().crc() as u32;
        let stored = self.reader.read_u32()?;
        if computed != stored {
            warn!(
                "tr: track ({}, {}) crc mismatch, stored {:08x}, computed {:08x}",
                cylinder, head, stored, computed
            );
        }

        Ok(Some(Track {
            cylinder: cylinder as u32,
            head: head as u32,
            deltas: unpack_deltas(&data)?,
            sample_rate: self.header.bit_rate,
        }))
    }

    fn next_emulator_track(&mut self) -> Result<Option<Track>> {
        let marker = match self.reader.read_u32() {
            Ok(marker) => marker,
            Err(Error::EndOfStream) => return Ok(None),
            Err(err) => return Err(err),
        };
        if marker != TR_EMU_TRACK_MARKER {
            warn!("tr: invalid emulator track marker {:08x}", marker);
        }

        let cylinder = self.reader.read_i32()?;
        let head = self.reader.read_i32()?;
        if cylinder == -1 && head == -1 {
            return Ok(None);
        }

        let size = self.header.track_data_size.unwrap_or(0);
        let mut data = vec![0u8; size as usize];
        self.reader.read_buf_bytes(&mut data)?;

        Ok(Some(Track {
            cylinder: cylinder.max(0) as u32,
            head: head.max(0) as u32,
            deltas: unpack_deltas(&data)?,
            sample_rate: self.header.bit_rate,
        }))
    }
}

/// Reads a length-prefixed, NUL-padded string.
fn read_lpstring<B: ReadBytes>(reader: &mut B) -> Result<String> {
    let len = reader.read_u32()?;
    let mut buf = vec![0u8; len as usize];
    reader.read_buf_bytes(&mut buf)?;
    while buf.last() == Some(&0) {
        buf.pop();
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Decodes the delta stream: a byte 0..253 is a literal delta, 254 prefixes
/// a 2-byte little-endian delta, 255 a 3-byte one.
fn unpack_deltas(data: &[u8]) -> Result<Vec<u32>> {
    let mut deltas = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            255 => {
                if i + 3 >= data.len() {
                    return decode_error("tr: truncated 3-byte delta");
                }
                deltas.push(
                    u32::from(data[i + 1])
                        | (u32::from(data[i + 2]) << 8)
                        | (u32::from(data[i + 3]) << 16),
                );
                i += 4;
            }
            254 => {
                if i + 2 >= data.len() {
                    return decode_error("tr: truncated 2-byte delta");
                }
                deltas.push(u32::from(data[i + 1]) | (u32::from(data[i + 2]) << 8));
                i += 3;
            }
            literal => {
                deltas.push(u32::from(literal));
                i += 1;
            }
        }
    }
    Ok(deltas)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use fluxion_core::checksum::Crc;
    use fluxion_core::io::Monitor;
    use fluxion_core::pulse::PulseSource;

    use super::{unpack_deltas, TrReader, TrVariant, TR_CRC};

    fn crc32_of(data: &[u8]) -> u32 {
        let mut crc = Crc::new(TR_CRC);
        crc.process_buf_bytes(data);
        crc.crc() as u32
    }

    /// Builds a minimal transition file with the given tracks.
    fn transition_fixture(tracks: &[(i32, i32, &[u8])]) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(&[0xee, b'M', b'F', b'M', 0x0d, 0x0a, 0x1a, 0x00]);
        header.extend_from_slice(&0x0102_0200u32.to_le_bytes());
        // Offset of the first track: preamble (16) + 7 fields (28) + CRC (4).
        header.extend_from_slice(&48u32.to_le_bytes());
        header.extend_from_slice(&12u32.to_le_bytes()); // track_header_size
        header.extend_from_slice(&306u32.to_le_bytes()); // num_cylinders
        header.extend_from_slice(&4u32.to_le_bytes()); // num_heads
        header.extend_from_slice(&200_000_000u32.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes()); // cmd_line_len
        header.extend_from_slice(&0u32.to_le_bytes()); // note_len
        header.extend_from_slice(&0u32.to_le_bytes()); // start_time_ns
        let crc = crc32_of(&header);
        header.extend_from_slice(&crc.to_le_bytes());

        for &(cyl, head, data) in tracks {
            let mut track = Vec::new();
            track.extend_from_slice(&cyl.to_le_bytes());
            track.extend_from_slice(&head.to_le_bytes());
            track.extend_from_slice(&(data.len() as u32).to_le_bytes());
            track.extend_from_slice(data);
            let crc = crc32_of(&track);
            header.extend_from_slice(&track);
            header.extend_from_slice(&crc.to_le_bytes());
        }

        // End-of-file marker track.
        header.extend_from_slice(&(-1i32).to_le_bytes());
        header.extend_from_slice(&(-1i32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());

        header
    }

    #[test]
    fn verify_transition_header() {
        let file = transition_fixture(&[]);
        let reader = TrReader::try_new(Box::new(Cursor::new(file))).unwrap();

        let header = reader.header();
        assert_eq!(header.variant, TrVariant::Transition);
        assert_eq!(header.major_version, 2);
        assert_eq!(header.minor_version, 2);
        assert_eq!(header.offset_first_track, 48);
        assert_eq!(header.num_cylinders, 306);
        assert_eq!(header.num_heads, 4);
        assert_eq!(header.bit_rate, 200_000_000);
        assert_eq!(header.track_data_size, None);
    }

    #[test]
    fn verify_bad_marker_is_rejected() {
        let mut file = transition_fixture(&[]);
        file[0] = 0x00;
        assert!(TrReader::try_new(Box::new(Cursor::new(file))).is_err());
    }

    #[test]
    fn verify_transition_tracks_and_deltas() {
        // Deltas 10, 0x1234 (2-byte escape), and 7.
        let data = [10u8, 254, 0x34, 0x12, 7];
        let file = transition_fixture(&[(0, 0, &data), (0, 1, &[40u8, 40, 40])]);
        let mut reader = TrReader::try_new(Box::new(Cursor::new(file))).unwrap();

        let track = reader.next_track().unwrap().unwrap();
        assert_eq!((track.cylinder, track.head), (0, 0));
        assert_eq!(track.deltas, vec![10, 0x1234, 7]);

        // The pulse source accumulates deltas into sample indices.
        let mut pulses = track.pulses();
        assert_eq!(pulses.sample_rate(), Some(200_000_000));
        assert_eq!(pulses.next_edge().unwrap().sample, 10);
        assert_eq!(pulses.next_edge().unwrap().sample, 10 + 0x1234);
        assert_eq!(pulses.next_edge().unwrap().sample, 10 + 0x1234 + 7);
        assert!(pulses.next_edge().is_err());

        let track = reader.next_track().unwrap().unwrap();
        assert_eq!((track.cylinder, track.head), (0, 1));

        // End-of-file marker.
        assert!(reader.next_track().unwrap().is_none());
    }

    #[test]
    fn verify_skip_track() {
        let file =
            transition_fixture(&[(0, 0, &[1u8, 2, 3]), (0, 1, &[4u8, 5]), (1, 0, &[6u8])]);
        let mut reader = TrReader::try_new(Box::new(Cursor::new(file))).unwrap();

        assert!(reader.skip_track().unwrap());
        assert!(reader.skip_track().unwrap());
        let track = reader.next_track().unwrap().unwrap();
        assert_eq!((track.cylinder, track.head), (1, 0));
        assert!(!reader.skip_track().unwrap());
    }

    #[test]
    fn verify_out_of_bounds_track_is_rejected() {
        let file = transition_fixture(&[(400, 0, &[1u8])]);
        let mut reader = TrReader::try_new(Box::new(Cursor::new(file))).unwrap();
        assert!(reader.next_track().is_err());
    }

    /// Builds a minimal emulator file with one track.
    fn emulator_fixture(track_data: &[u8]) -> Vec<u8> {
        let mut file = Vec::new();
        file.extend_from_slice(&[0xee, b'M', b'F', b'M', 0x0d, 0x0a, 0x1a, 0x00]);
        file.extend_from_slice(&0x0202_0200u32.to_le_bytes());
        // Preamble (16) + track_data_size + 7 fields (32 total).
        file.extend_from_slice(&48u32.to_le_bytes());
        file.extend_from_slice(&(track_data.len() as u32).to_le_bytes());
        file.extend_from_slice(&12u32.to_le_bytes());
        file.extend_from_slice(&306u32.to_le_bytes());
        file.extend_from_slice(&4u32.to_le_bytes());
        file.extend_from_slice(&10_000_000u32.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes());
        file.extend_from_slice(&0u32.to_le_bytes());

        file.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        file.extend_from_slice(&3i32.to_le_bytes());
        file.extend_from_slice(&1i32.to_le_bytes());
        file.extend_from_slice(track_data);

        file.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        file.extend_from_slice(&(-1i32).to_le_bytes());
        file.extend_from_slice(&(-1i32).to_le_bytes());

        file
    }

    #[test]
    fn verify_emulator_variant() {
        let file = emulator_fixture(&[20u8, 30, 40]);
        let mut reader = TrReader::try_new(Box::new(Cursor::new(file))).unwrap();

        let header = reader.header();
        assert_eq!(header.variant, TrVariant::Emulator);
        assert_eq!(header.track_data_size, Some(3));
        assert_eq!(header.bit_rate, 10_000_000);

        let track = reader.next_track().unwrap().unwrap();
        assert_eq!((track.cylinder, track.head), (3, 1));
        assert_eq!(track.deltas, vec![20, 30, 40]);

        assert!(reader.next_track().unwrap().is_none());
    }

    #[test]
    fn verify_delta_escapes() {
        assert_eq!(
            unpack_deltas(&[0, 253, 254, 0xff, 0xff, 255, 1, 2, 3]).unwrap(),
            vec![0, 253, 0xffff, 0x0302_01]
        );
        assert!(unpack_deltas(&[254, 1]).is_err());
        assert!(unpack_deltas(&[255, 1, 2]).is_err());
    }
}
