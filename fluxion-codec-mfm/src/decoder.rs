// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The decoder: drives the PLL over a pulse source, annotates every pulse,
//! window, bit, byte, and field it observes, and reconstructs ID and data
//! records through a mark-driven state machine with CRC verification.

use fluxion_core::annotate::{AnnotationSink, BinaryChunk, BinaryKind, Region, Row};
use fluxion_core::checksum::{Crc, CrcParams};
use fluxion_core::errors::{config_error, decode_error, Error, Result};
use fluxion_core::io::Monitor;
use fluxion_core::pulse::PulseSource;
use fluxion_core::units::{TimeBase, TimeUnit};

use log::{debug, warn};

use crate::format::{CellLimits, Codemap, Coding, FormatDescriptor, HeaderLayout, IdRecord};
use crate::pll::{Pll, PllOutcome};

/// Sector payload length policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SectorSize {
    /// Take the payload length from each decoded ID record.
    #[default]
    Auto,
    /// A fixed payload length in bytes.
    Fixed(usize),
}

/// Which field triggers a counter report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportTrigger {
    #[default]
    None,
    Iam,
    Idam,
    Dam,
    Ddam,
}

/// Decoder configuration. The option surface mirrors the common controller
/// settings; everything has a sensible MFM hard-disk default.
#[derive(Clone, Copy, Debug)]
pub struct DecoderOptions {
    /// Nominal data rate of the medium in bits/s.
    pub data_rate: u32,
    /// The ID header layout.
    pub header_layout: HeaderLayout,
    pub sector_size: SectorSize,
    pub header_crc: CrcParams,
    pub data_crc: CrcParams,
    /// Unit used for pulse-interval annotations.
    pub time_unit: TimeUnit,
    /// Include sample numbers in pulse and window annotations.
    pub show_sample_num: bool,
    pub report: ReportTrigger,
    /// Emit a report every this many trigger fields.
    pub report_qty: u32,
    /// PI filter proportional gain.
    pub pll_kp: f64,
    /// PI filter integral gain.
    pub pll_ki: f64,
    /// Tolerated deviation while catching the lock-on preamble, as a
    /// fraction of the nominal half-bit.
    pub pll_sync_tolerance: f64,
}

impl Default for DecoderOptions {
    fn default() -> DecoderOptions {
        DecoderOptions {
            data_rate: 5_000_000,
            header_layout: HeaderLayout::FourByte,
            sector_size: SectorSize::Auto,
            header_crc: CrcParams::new(16, 0x1021, 0xffff),
            data_crc: CrcParams::new(32, 0x00a0_0805, 0xffff_ffff),
            time_unit: TimeUnit::Ns,
            show_sample_num: false,
            report: ReportTrigger::None,
            report_qty: 9,
            pll_kp: 0.5,
            pll_ki: 0.0005,
            pll_sync_tolerance: 0.25,
        }
    }
}

/// Running statistics of a decode run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    /// Index marks.
    pub iams: u64,
    /// ID address marks.
    pub idams: u64,
    /// Data address marks.
    pub dams: u64,
    /// Deleted-data address marks.
    pub ddams: u64,
    pub crc_ok: u64,
    pub crc_err: u64,
    /// Extra pulses inside an already-pulsed half-bit window.
    pub eipw: u64,
    /// Bits with clocking errors.
    pub cker: u64,
    /// Out-of-tolerance leading-edge intervals.
    pub ooti: u64,
    /// All leading-edge intervals.
    pub intervals: u64,
}

impl Counters {
    fn clear(&mut self) {
        *self = Default::default();
    }
}

/// States of the record machine. One byte is consumed per step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordState {
    SyncMark,
    /// Collecting the second and third 0xA1 of an MFM floppy prefix, or the
    /// byte deciding between an ID and a data record.
    IdDataMark,
    SecondC2Prefix,
    ThirdC2Prefix,
    IndexMark,
    IdRecord,
    IdRecordCrc,
    DataRecord,
    DataRecordCrc,
    FirstGapByte,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldKind {
    IndexMark,
    IdAddressMark,
    DataAddressMark,
    DeletedDataMark,
    IdRecord,
    DataRecord,
    CrcOk,
    CrcError,
    UnknownByte,
    Sync,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WindowClass {
    Clock,
    Data,
}

/// Formats pulse intervals in the configured unit.
struct PulseFormatter {
    multi: f64,
    unit: &'static str,
    window_size: f64,
    windows: bool,
}

impl PulseFormatter {
    fn new(unit: TimeUnit, sample_rate: u32, halfbit_nom: f64) -> PulseFormatter {
        let tb = TimeBase::new(sample_rate);
        let (multi, suffix, windows) = match unit {
            TimeUnit::Ns => (tb.ns_per_sample(), "ns", false),
            TimeUnit::Us => (tb.us_per_sample(), "us", false),
            TimeUnit::Auto => {
                if tb.ns_per_sample() * halfbit_nom > 1000.0 {
                    (tb.us_per_sample(), "us", false)
                }
                else {
                    (tb.ns_per_sample(), "ns", false)
                }
            }
            TimeUnit::Window => (0.0, "", true),
        };
        PulseFormatter { multi, unit: suffix, window_size: halfbit_nom, windows }
    }

    fn format(&self, ticks: u64) -> String {
        if self.windows {
            format!("{}", (ticks as f64 / self.window_size).round() as u64)
        }
        else {
            format!("{}{}", (ticks as f64 * self.multi).round() as u64, self.unit)
        }
    }
}

/// FM/MFM/RLL pulse-stream decoder.
///
/// Create one per decode run with [`MfmDecoder::try_new`] and feed it a
/// [`PulseSource`] with [`MfmDecoder::decode`]. The decoder is strictly
/// edge-driven: it suspends only on the pulse source and terminates when the
/// source reports end of stream.
pub struct MfmDecoder {
    format: FormatDescriptor,
    opts: DecoderOptions,

    header_size: usize,
    header_crc: Crc,
    data_crc: Crc,
    header_crc_bytes: usize,
    data_crc_bytes: usize,

    // Record machine state.
    state: RecordState,
    byte_cnt: usize,
    id_rec: Vec<u8>,
    dr_rec: Vec<u8>,
    id_crc_stored: u64,
    dr_crc_stored: u64,
    crc_accum: u64,
    a1: Vec<u8>,
    id_mark: Option<u8>,
    dr_mark: Option<u8>,
    id: IdRecord,
    sector_size: usize,
    sector_size_auto: bool,

    // Annotation bookkeeping, in sample indices.
    byte_start: u64,
    byte_end: u64,
    field_start: u64,

    counters: Counters,
    report_start: u64,
    reports_called: u64,
    report_last: Option<FieldKind>,
}

impl MfmDecoder {
    pub fn try_new(format: FormatDescriptor, opts: &DecoderOptions) -> Result<MfmDecoder> {
        if opts.data_rate == 0 {
            return config_error("decoder: a non-zero data rate is required");
        }
        if !matches!(opts.header_crc.width, 16 | 32) {
            return config_error("decoder: header CRC width must be 16 or 32 bits");
        }
        if !matches!(opts.data_crc.width, 16 | 32 | 48 | 56) {
            return config_error("decoder: data CRC width must be 16, 32, 48, or 56 bits");
        }
        if opts.report != ReportTrigger::None && opts.report_qty == 0 {
            return config_error("decoder: report quantity must be at least one");
        }

        let sector_size = match opts.sector_size {
            SectorSize::Auto => 0,
            SectorSize::Fixed(0) => {
                return config_error("decoder: a fixed sector size must be non-zero");
            }
            SectorSize::Fixed(size) => size,
        };

        let header_size = opts.header_layout.size();

        Ok(MfmDecoder {
            header_size,
            header_crc: Crc::new(opts.header_crc),
            data_crc: Crc::new(opts.data_crc),
            header_crc_bytes: opts.header_crc.width as usize / 8,
            data_crc_bytes: opts.data_crc.width as usize / 8,
            state: RecordState::SyncMark,
            byte_cnt: 0,
            id_rec: vec![0; header_size],
            dr_rec: vec![0; sector_size],
            id_crc_stored: 0,
            dr_crc_stored: 0,
            crc_accum: 0,
            a1: Vec::with_capacity(3),
            id_mark: None,
            dr_mark: None,
            id: Default::default(),
            sector_size,
            sector_size_auto: opts.sector_size == SectorSize::Auto,
            byte_start: 0,
            byte_end: 0,
            field_start: 0,
            counters: Default::default(),
            report_start: 0,
            reports_called: 0,
            report_last: None,
            format,
            opts: *opts,
        })
    }

    /// The format this decoder was built for.
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Consumes a pulse source to exhaustion and returns the final counter
    /// snapshot. Annotations and binary records are delivered to `sink` as
    /// they are produced.
    pub fn decode<S, A>(&mut self, source: &mut S, sink: &mut A) -> Result<Counters>
    where
        S: PulseSource,
        A: AnnotationSink,
    {
        let sample_rate = match source.sample_rate() {
            Some(rate) if rate > 0 => rate,
            _ => return config_error("decoder: cannot decode without a sample rate"),
        };

        let halfbit_nom = f64::from(sample_rate) / (2.0 * f64::from(self.opts.data_rate));
        let timer = PulseFormatter::new(self.opts.time_unit, sample_rate, halfbit_nom);

        let mut pll =
            Pll::new(&self.format, halfbit_nom, self.opts.pll_kp, self.opts.pll_ki, self.opts.pll_sync_tolerance);

        loop {
            let event = match source.next_edge() {
                Ok(event) => event,
                Err(Error::EndOfStream) => break,
                Err(err) => return Err(err),
            };

            self.counters.intervals += 1;

            let outcome = pll.edge(&self.format, event.sample)?;

            self.annotate_pulse(&pll, sink, &timer, event.sample);

            match outcome {
                PllOutcome::Byte(val) => {
                    if !self.process_byte(&mut pll, sink, val)? {
                        debug!("decoder: resync after byte {:02x}", val);
                        pll.reset();
                        self.reset_record();
                    }
                }
                PllOutcome::Resync => self.reset_record(),
                PllOutcome::Pending => (),
            }
        }

        Ok(self.counters)
    }

    /// Returns the record machine to the sync-mark hunt. Counters and
    /// annotation bookkeeping persist.
    fn reset_record(&mut self) {
        self.state = RecordState::SyncMark;
        self.a1.clear();
        self.id_mark = None;
        self.dr_mark = None;
    }

    /// Annotates the leading-edge interval that just completed: its duration
    /// if the width is legal, an extra-pulse or out-of-tolerance marker
    /// otherwise.
    fn annotate_pulse<A: AnnotationSink>(
        &mut self,
        pll: &Pll,
        sink: &mut A,
        timer: &PulseFormatter,
        sample: u64,
    ) {
        let cells = pll.halfbit_cells;
        let start = pll.pulse_start;

        if self.format.limits.contains(cells) {
            let dur = timer.format(pll.pulse_ticks);
            let variants = if self.opts.show_sample_num {
                vec![format!("{} s{} - {}", dur, start, sample), dur]
            }
            else {
                vec![dur]
            };
            sink.put(Region::new(start, sample, Row::Pulses, variants));
        }
        else if cells == 0 {
            // A second edge landed inside the half-bit window of the previous
            // one.
            self.counters.eipw += 1;
            let variants = if self.opts.show_sample_num {
                vec![format!("Extra Pulse s{}", start), "EP".to_string()]
            }
            else {
                vec!["Extra Pulse".to_string(), "EP".to_string()]
            };
            sink.put(Region::new(start, sample, Row::Windows, variants));
        }
        else {
            self.counters.ooti += 1;
            let msg = if cells < self.format.limits.min() {
                &["Pulse too short Error", "OoTI Error", "Err", "E"]
            }
            else {
                &["Pulse too long Error", "OoTI Error", "Err", "E"]
            };
            sink.put(Region::of(start, sample, Row::Errors, msg));

            let dur = timer.format(pll.pulse_ticks);
            let variants = if self.opts.show_sample_num {
                vec![
                    format!("{} out-of-tolerance leading edge s{}", dur, start),
                    format!("{} OoTI s{}", dur, start),
                    format!("{} OoTI", dur),
                    "OoTI".to_string(),
                ]
            }
            else {
                vec![
                    format!("{} out-of-tolerance leading edge", dur),
                    format!("{} OoTI", dur),
                    "OoTI".to_string(),
                ]
            };
            sink.put(Region::new(start, sample, Row::Pulses, variants));
        }
    }

    /// State machine consuming one code unit. Returns `false` when the
    /// decoder reached the start of a gap or an unrecognizable byte and the
    /// PLL must resynchronize.
    fn process_byte<A: AnnotationSink>(
        &mut self,
        pll: &mut Pll,
        sink: &mut A,
        val: u8,
    ) -> Result<bool> {
        match self.state {
            RecordState::SyncMark => {
                self.annotate_byte(pll, sink, val, true);
                self.display_field(pll, sink, FieldKind::Sync);
                self.byte_cnt = 0;
                self.id_crc_stored = 0;
                self.dr_crc_stored = 0;

                if self.format.iddata_mark.contains(val) {
                    self.a1.clear();
                    self.a1.push(0xa1);
                    self.state = RecordState::IdDataMark;
                    if self.id_mark.is_some() {
                        // A retained ID prefix mark turns this mark into the
                        // ID address mark proper. The prefix byte itself is
                        // not part of the checksummed header.
                        self.id_mark = None;
                        self.display_field(pll, sink, FieldKind::IdAddressMark);
                        self.state = RecordState::IdRecord;
                    }
                }
                else if self.format.id_mark.contains(val) {
                    self.id_mark = Some(val);
                    self.display_field(pll, sink, FieldKind::IdAddressMark);
                    self.state = RecordState::IdRecord;
                }
                else if self.format.data_mark.contains(val) {
                    self.dr_mark = Some(val);
                    self.display_field(pll, sink, FieldKind::DataAddressMark);
                    self.state = RecordState::DataRecord;
                }
                else if self.format.id_prefix_mark.contains(val) {
                    self.id_mark = Some(val);
                }
                else if self.format.nop_mark.contains(val) {
                    // Inert.
                }
                else if self.format.nop_a1_mark.contains(val) {
                    self.a1.clear();
                    self.a1.push(0xa1);
                }
                else if val == 0xfc {
                    // FM index mark.
                    self.display_field(pll, sink, FieldKind::IndexMark);
                    self.state = RecordState::FirstGapByte;
                }
                else if val == 0xc2 {
                    // MFM floppy index mark preamble.
                    self.state = RecordState::SecondC2Prefix;
                }
                else {
                    self.display_field(pll, sink, FieldKind::UnknownByte);
                    return Ok(false);
                }
            }

            RecordState::IdDataMark => {
                // An MFM floppy sends three 0xA1 prefixes before the address
                // mark; hard-disk formats go straight to the deciding byte.
                if val == 0xa1 {
                    self.annotate_byte(pll, sink, val, true);
                    self.a1.push(0xa1);
                    return Ok(true);
                }
                self.annotate_byte(pll, sink, val, false);
                self.display_field(pll, sink, FieldKind::Sync);
                if (val & 0xf4) == 0xf4 {
                    // FC..FF: ID address mark. The 3-byte header layout
                    // stores cylinder bits in the low bits of the mark.
                    self.id_mark = Some(val);
                    self.display_field(pll, sink, FieldKind::IdAddressMark);
                    self.state = RecordState::IdRecord;
                }
                else if val >= 0xf8 && val <= 0xfb {
                    self.dr_mark = Some(val);
                    self.display_field(pll, sink, FieldKind::DataAddressMark);
                    self.state = RecordState::DataRecord;
                }
                else {
                    self.display_field(pll, sink, FieldKind::UnknownByte);
                    return Ok(false);
                }
            }

            RecordState::IdRecord => {
                self.annotate_byte(pll, sink, val, false);
                self.id_rec[self.byte_cnt] = val;
                self.byte_cnt += 1;
                if self.byte_cnt == self.header_size {
                    self.id = self.opts.header_layout.decode(self.id_mark, &self.id_rec)?;
                    sink.put_binary(BinaryChunk {
                        start: self.field_start,
                        end: self.byte_end,
                        kind: BinaryKind::Id,
                        data: self.id_rec.clone().into_boxed_slice(),
                    });
                    self.display_field(pll, sink, FieldKind::IdRecord);
                    if self.sector_size_auto && self.sector_size != self.id.len as usize {
                        self.sector_size = self.id.len as usize;
                        self.dr_rec = vec![0; self.sector_size];
                    }
                    self.byte_cnt = 0;
                    self.state = RecordState::IdRecordCrc;
                }
            }

            RecordState::IdRecordCrc => {
                self.annotate_byte(pll, sink, val, false);
                self.id_crc_stored = (self.id_crc_stored << 8) | u64::from(val);
                self.byte_cnt += 1;
                if self.byte_cnt == self.header_crc_bytes {
                    self.header_crc.reset();
                    self.header_crc.process_buf_bytes(&self.a1);
                    if let Some(mark) = self.id_mark {
                        self.header_crc.process_byte(mark);
                    }
                    self.header_crc.process_buf_bytes(&self.id_rec);
                    self.crc_accum = self.header_crc.crc();

                    sink.put_binary(BinaryChunk {
                        start: self.field_start,
                        end: self.byte_end,
                        kind: BinaryKind::IdCrc,
                        data: self.framed_record(true),
                    });

                    if self.crc_accum == self.id_crc_stored {
                        self.display_field(pll, sink, FieldKind::CrcOk);
                    }
                    else {
                        self.display_field(pll, sink, FieldKind::CrcError);
                    }
                    self.state = RecordState::FirstGapByte;
                }
            }

            RecordState::DataRecord => {
                self.annotate_byte(pll, sink, val, false);
                if self.byte_cnt >= self.sector_size {
                    return decode_error(
                        "decoder: data record exceeds the sector buffer; configure a fixed sector size",
                    );
                }
                self.dr_rec[self.byte_cnt] = val;
                self.byte_cnt += 1;
                if self.byte_cnt == self.sector_size {
                    self.display_field(pll, sink, FieldKind::DataRecord);
                    self.byte_cnt = 0;
                    self.state = RecordState::DataRecordCrc;
                }
            }

            RecordState::DataRecordCrc => {
                self.annotate_byte(pll, sink, val, false);
                self.dr_crc_stored = (self.dr_crc_stored << 8) | u64::from(val);
                self.byte_cnt += 1;
                if self.byte_cnt == self.data_crc_bytes {
                    self.data_crc.reset();
                    self.data_crc.process_buf_bytes(&self.a1);
                    if let Some(mark) = self.dr_mark {
                        self.data_crc.process_byte(mark);
                    }
                    self.data_crc.process_buf_bytes(&self.dr_rec);
                    self.crc_accum = self.data_crc.crc();

                    sink.put_binary(BinaryChunk {
                        start: self.field_start,
                        end: self.byte_end,
                        kind: BinaryKind::Data,
                        data: self.dr_rec.clone().into_boxed_slice(),
                    });
                    let mut iddata = self.id_rec.clone();
                    iddata.extend_from_slice(&self.dr_rec);
                    sink.put_binary(BinaryChunk {
                        start: self.field_start,
                        end: self.byte_end,
                        kind: BinaryKind::IdData,
                        data: iddata.into_boxed_slice(),
                    });
                    sink.put_binary(BinaryChunk {
                        start: self.field_start,
                        end: self.byte_end,
                        kind: BinaryKind::DataCrc,
                        data: self.framed_record(false),
                    });

                    if self.crc_accum == self.dr_crc_stored {
                        self.display_field(pll, sink, FieldKind::CrcOk);
                    }
                    else {
                        self.display_field(pll, sink, FieldKind::CrcError);
                    }
                    self.state = RecordState::FirstGapByte;
                }
            }

            RecordState::SecondC2Prefix | RecordState::ThirdC2Prefix => {
                self.annotate_byte(pll, sink, val, true);
                if val == 0xc2 {
                    self.state = if self.state == RecordState::SecondC2Prefix {
                        RecordState::ThirdC2Prefix
                    }
                    else {
                        RecordState::IndexMark
                    };
                }
                else {
                    self.display_field(pll, sink, FieldKind::UnknownByte);
                    return Ok(false);
                }
            }

            RecordState::IndexMark => {
                self.annotate_byte(pll, sink, val, false);
                if val == 0xfc {
                    self.display_field(pll, sink, FieldKind::IndexMark);
                    self.state = RecordState::FirstGapByte;
                }
                else {
                    self.display_field(pll, sink, FieldKind::UnknownByte);
                    return Ok(false);
                }
            }

            RecordState::FirstGapByte => {
                // One terminal byte after a CRC or index mark, then unsync.
                self.annotate_byte(pll, sink, val, false);
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Assembles the framed form of a record: A1 prefix bytes, address mark,
    /// record bytes, and the stored CRC in big-endian order.
    fn framed_record(&self, header: bool) -> Box<[u8]> {
        let (mark, rec, crc, crc_bytes) = if header {
            (self.id_mark, &self.id_rec, self.id_crc_stored, self.header_crc_bytes)
        }
        else {
            (self.dr_mark, &self.dr_rec, self.dr_crc_stored, self.data_crc_bytes)
        };

        let mut framed = Vec::with_capacity(self.a1.len() + 1 + rec.len() + crc_bytes);
        framed.extend_from_slice(&self.a1);
        if let Some(mark) = mark {
            framed.push(mark);
        }
        framed.extend_from_slice(rec);
        framed.extend_from_slice(&crc.to_be_bytes()[8 - crc_bytes..]);
        framed.into_boxed_slice()
    }

    /// Emits the annotation of a completed field and maintains the counters
    /// and report triggers.
    fn display_field<A: AnnotationSink>(&mut self, pll: &mut Pll, sink: &mut A, kind: FieldKind) {
        match kind {
            FieldKind::IndexMark => {
                self.counters.iams += 1;
                sink.put(Region::of(
                    self.field_start,
                    self.byte_end,
                    Row::Fields,
                    &["Index Mark", "IAM", "I"],
                ));
                self.report_last = Some(FieldKind::IndexMark);
                if self.opts.report == ReportTrigger::Iam {
                    self.reports_called = self.counters.iams;
                    self.display_report(sink);
                }
            }

            FieldKind::IdAddressMark => {
                self.counters.idams += 1;
                sink.put(Region::of(
                    self.field_start,
                    self.byte_end,
                    Row::Fields,
                    &["ID Address Mark", "IDAM", "M"],
                ));
                self.report_last = Some(FieldKind::IdAddressMark);
                if self.opts.report == ReportTrigger::Idam {
                    self.reports_called = self.counters.idams;
                    self.display_report(sink);
                }
            }

            FieldKind::DataAddressMark => {
                // Deleted-data marks exist only on ancient FM floppies.
                let deleted = self.format.coding == Coding::Fm
                    && matches!(self.dr_mark, Some(0xf8..=0xfa));
                if deleted {
                    self.counters.ddams += 1;
                    sink.put(Region::of(
                        self.field_start,
                        self.byte_end,
                        Row::Fields,
                        &["Deleted Data Address Mark", "Deleted Data Mark", "DDAM", "M"],
                    ));
                    self.report_last = Some(FieldKind::DeletedDataMark);
                    if self.opts.report == ReportTrigger::Ddam {
                        self.reports_called = self.counters.ddams;
                    }
                }
                else {
                    self.counters.dams += 1;
                    sink.put(Region::of(
                        self.field_start,
                        self.byte_end,
                        Row::Fields,
                        &["Data Address Mark", "Data Mark", "DAM", "M"],
                    ));
                    self.report_last = Some(FieldKind::DataAddressMark);
                    if self.opts.report == ReportTrigger::Dam {
                        self.reports_called = self.counters.dams;
                    }
                }
            }

            FieldKind::DeletedDataMark => {
                unreachable!("DeletedDataMark is only ever set as report_last, never passed as kind")
            }

            FieldKind::IdRecord => {
                sink.put(Region::new(
                    self.field_start,
                    self.byte_end,
                    Row::Fields,
                    vec![
                        format!(
                            "ID Record: cyl={}, sid={}, sec={}, len={}",
                            self.id.cyl, self.id.side, self.id.sector, self.id.len
                        ),
                        "ID Record".to_string(),
                        "Irec".to_string(),
                        "R".to_string(),
                    ],
                ));
            }

            FieldKind::DataRecord => {
                sink.put(Region::of(
                    self.field_start,
                    self.byte_end,
                    Row::Fields,
                    &["Data Record", "Drec", "R"],
                ));
            }

            FieldKind::CrcOk => {
                self.counters.crc_ok += 1;
                sink.put(Region::new(
                    self.field_start,
                    self.byte_end,
                    Row::Fields,
                    vec![
                        format!("CRC OK {:02X}", self.crc_accum),
                        "CRC OK".to_string(),
                        "CRC".to_string(),
                        "C".to_string(),
                    ],
                ));
                if matches!(
                    self.report_last,
                    Some(FieldKind::DataAddressMark) | Some(FieldKind::DeletedDataMark)
                ) {
                    // Deferred to the CRC so the report covers the whole data
                    // field.
                    self.display_report(sink);
                }
            }

            FieldKind::CrcError => {
                self.counters.crc_err += 1;
                warn!(
                    "decoder: crc mismatch, stored {:02x}, computed {:02x}",
                    if self.state == RecordState::IdRecordCrc {
                        self.id_crc_stored
                    }
                    else {
                        self.dr_crc_stored
                    },
                    self.crc_accum
                );
                sink.put(Region::of(
                    self.byte_end.saturating_sub(1),
                    self.byte_end,
                    Row::Errors,
                    &["Error", "Err", "E"],
                ));
                sink.put(Region::new(
                    self.field_start,
                    self.byte_end,
                    Row::Fields,
                    vec![
                        format!("CRC error {:02X}", self.crc_accum),
                        "CRC error".to_string(),
                        "CRC".to_string(),
                        "C".to_string(),
                    ],
                ));
                if matches!(
                    self.report_last,
                    Some(FieldKind::DataAddressMark) | Some(FieldKind::DeletedDataMark)
                ) {
                    self.display_report(sink);
                }
            }

            FieldKind::UnknownByte => {
                sink.put(Region::of(
                    self.byte_start,
                    self.byte_end,
                    Row::Errors,
                    &["Unknown byte Error", "Error", "Err", "E"],
                ));
            }

            FieldKind::Sync => {
                if let Some(sync_start) = pll.sync_start.take() {
                    let n_bytes =
                        u64::from(pll.sync_lock_count() * pll.sync_pulse()) / 16;
                    sink.put(Region::new(
                        sync_start,
                        self.byte_start,
                        Row::Fields,
                        vec![
                            format!("Sync pattern {} bytes", n_bytes),
                            "Sync".to_string(),
                            "S".to_string(),
                        ],
                    ));
                    self.field_start = self.byte_start;
                }
                return;
            }
        }

        self.field_start = self.byte_end;
    }

    /// Emits a counter report if the configured number of trigger fields has
    /// been reached, then clears the counters.
    fn display_report<A: AnnotationSink>(&mut self, sink: &mut A) {
        if self.reports_called < u64::from(self.opts.report_qty) {
            return;
        }

        let c = &self.counters;
        sink.put(Region::new(
            self.report_start,
            self.byte_start,
            Row::Reports,
            vec![format!(
                "Summary: IAM={}, IDAM={}, DAM={}, DDAM={}, CRC_OK={}, CRC_err={}, EiPW={}, CkEr={}, OoTI={}/{}",
                c.iams,
                c.idams,
                c.dams,
                c.ddams,
                c.crc_ok,
                c.crc_err,
                c.eipw,
                c.cker,
                c.ooti,
                c.intervals
            )],
        ));

        self.counters.clear();
        self.report_start = self.byte_end;
        self.reports_called = 0;
    }

    /// Annotates one half-bit cell window.
    fn annotate_window<A: AnnotationSink>(
        &self,
        sink: &mut A,
        class: WindowClass,
        start: u64,
        end: u64,
        set: bool,
    ) {
        let tag = match class {
            WindowClass::Clock => " c",
            WindowClass::Data => " d",
        };
        let value = u8::from(set);
        let variants = if self.opts.show_sample_num {
            vec![format!("{}{} s{}", value, tag, start), format!("{}", value)]
        }
        else {
            vec![format!("{}{}", value, tag), format!("{}", value)]
        };
        sink.put(Region::new(start, end, Row::Windows, variants));
    }

    /// Annotates the 16 windows and 8 bits of an FM/MFM byte from the PLL
    /// window ring.
    ///
    /// Address marks are spelled with omitted clock pulses, so callers pass
    /// `special_clock` to suppress clock-error accounting on them.
    fn annotate_bits_fm_mfm<A: AnnotationSink>(
        &mut self,
        pll: &Pll,
        sink: &mut A,
        special_clock: bool,
    ) {
        let offset = -pll.shift_index;

        // The clock rule needs three consecutive windows; seed the history
        // with the final data window of the previous byte, whose end is also
        // where this byte starts.
        let prev = pll.ring_read(offset - 16);
        self.byte_start = prev.end;
        let mut shift3: u32 = u32::from(prev.set);

        let mut bit_end = 0;
        for bitn in (0..8).rev() {
            let clock = pll.ring_read(offset - bitn * 2 - 1);
            let bit_start = clock.start;
            shift3 = (shift3 << 1) | u32::from(clock.set);
            self.annotate_window(sink, WindowClass::Clock, clock.start, clock.end, clock.set);

            let data = pll.ring_read(offset - bitn * 2);
            shift3 = (shift3 << 1) | u32::from(data.set);
            self.annotate_window(sink, WindowClass::Data, data.start, data.end, data.set);
            bit_end = data.end;

            // FM omits no clocks in data; MFM omits them between adjacent
            // ones and after a one.
            let clock_error = match self.format.limits {
                CellLimits::Fm => (shift3 & 0b10) == 0,
                _ => matches!(shift3 & 0b111, 0b000 | 0b011 | 0b110 | 0b111),
            };

            if clock_error {
                if !special_clock {
                    sink.put(Region::of(
                        bit_start,
                        bit_end,
                        Row::Errors,
                        &["Clock Error", "Error", "Err", "E"],
                    ));
                    self.counters.cker += 1;
                }
                sink.put(Region::new(
                    bit_start,
                    bit_end,
                    Row::Bits,
                    vec![format!("{} (clock error)", u8::from(data.set)), format!("{}", u8::from(data.set))],
                ));
            }
            else {
                sink.put(Region::new(
                    bit_start,
                    bit_end,
                    Row::Bits,
                    vec![format!("{}", u8::from(data.set))],
                ));
            }
        }

        self.byte_end = bit_end;
    }

    /// Annotates the 16 windows and 8 bits of an RLL byte from the PLL
    /// window ring.
    ///
    /// With `special_clock` set, windows whose values differ from the raw
    /// shift register are flagged: those are the cells the sync-mark fix-up
    /// rewrote.
    fn annotate_bits_rll<A: AnnotationSink>(
        &mut self,
        pll: &Pll,
        sink: &mut A,
        val: u8,
        special_clock: bool,
    ) {
        let offset = pll.shift_decoded_1 + pll.shift_index;
        let shift_win = pll.shift >> offset.max(0) as u32;

        self.byte_start = pll.ring_read(-offset - 16).end;

        let mut bit_end = 0;
        for bitn in (0..8).rev() {
            let w1 = pll.ring_read(-offset - bitn * 2 - 1);
            let bit_start = w1.start;
            self.annotate_window(sink, WindowClass::Data, w1.start, w1.end, w1.set);

            let w2 = pll.ring_read(-offset - bitn * 2);
            self.annotate_window(sink, WindowClass::Data, w2.start, w2.end, w2.set);
            bit_end = w2.end;

            let bit_val = (val >> bitn) & 1;

            let glitch = special_clock
                && ((u32::from(w1.set) ^ (shift_win >> (bitn * 2 + 1) as u32 & 1))
                    | (u32::from(w2.set) ^ (shift_win >> (bitn * 2) as u32 & 1)))
                    != 0;

            if glitch {
                sink.put(Region::new(
                    bit_start,
                    bit_end,
                    Row::Bits,
                    vec![format!("{} (clock error)", bit_val), format!("{}", bit_val)],
                ));
            }
            else {
                sink.put(Region::new(
                    bit_start,
                    bit_end,
                    Row::Bits,
                    vec![format!("{}", bit_val)],
                ));
            }
        }

        self.byte_end = bit_end;
    }

    /// Annotates one byte together with its bits and windows.
    fn annotate_byte<A: AnnotationSink>(
        &mut self,
        pll: &Pll,
        sink: &mut A,
        val: u8,
        special_clock: bool,
    ) {
        match self.format.codemap {
            Codemap::FmMfm => self.annotate_bits_fm_mfm(pll, sink, special_clock),
            Codemap::RllIbm | Codemap::RllWd => {
                self.annotate_bits_rll(pll, sink, val, special_clock)
            }
        }

        let short = format!("{:02X}", val);
        let variants = if (32..127).contains(&val) {
            vec![format!("{:02X} '{}'", val, val as char), short]
        }
        else {
            vec![short]
        };
        sink.put(Region::new(self.byte_start, self.byte_end, Row::Bytes, variants));
    }
}

#[cfg(test)]
mod tests {
    use fluxion_core::annotate::{BinaryKind, MemorySink, Row};
    use fluxion_core::checksum::{Crc, CrcParams};
    use fluxion_core::io::Monitor;
    use fluxion_core::pulse::BufPulseSource;

    use super::{Counters, DecoderOptions, MfmDecoder, ReportTrigger, SectorSize};
    use crate::format::{Coding, FormatDescriptor, HeaderLayout};

    /// Raw half-bit windows of one MFM byte, clock bits derived from the
    /// previous data bit.
    fn mfm_encode(prev: &mut u8, byte: u8) -> u16 {
        let mut out = 0u16;
        let mut prev_bit = *prev & 1;
        for i in (0..8).rev() {
            let bit = (byte >> i) & 1;
            let clock = u16::from(prev_bit == 0 && bit == 0);
            out = (out << 2) | (clock << 1) | u16::from(bit);
            prev_bit = bit;
        }
        *prev = prev_bit;
        out
    }

    /// Raw half-bit windows of one FM byte: a clock pulse in front of every
    /// data bit.
    fn fm_encode(byte: u8) -> u16 {
        let mut out = 0u16;
        for i in (0..8).rev() {
            out = (out << 2) | 0b10 | u16::from((byte >> i) & 1);
        }
        out
    }

    fn push_windows(windows: &mut Vec<bool>, raw: u16) {
        for i in (0..16).rev() {
            windows.push(raw >> i & 1 != 0);
        }
    }

    /// Converts a window stream to edge sample indices. Window `i` spans
    /// `[base + i*halfbit, base + (i+1)*halfbit)`; the edge is placed on the
    /// window origin.
    fn windows_to_edges(windows: &[bool], halfbit: u64, base: u64) -> Vec<u64> {
        windows
            .iter()
            .enumerate()
            .filter(|(_, &set)| set)
            .map(|(i, _)| base + i as u64 * halfbit)
            .collect()
    }

    fn crc_over(params: CrcParams, parts: &[&[u8]]) -> u64 {
        let mut crc = Crc::new(params);
        for part in parts {
            crc.process_buf_bytes(part);
        }
        crc.crc()
    }

    /// The MFM sync-marked A1: 0xA1 with the clock pulse between bits 2 and
    /// 3 omitted.
    const MFM_SYNC_A1: u16 = 0x4489;

    /// Builds an MFM stream: preamble, three sync A1s, the given bytes, two
    /// CRC bytes, and a tail of gap bytes, at 20 samples per half-bit.
    fn mfm_stream(record: &[u8], crc: &[u8]) -> Vec<u64> {
        let mut windows = Vec::new();
        let mut prev = 0u8;
        for _ in 0..20 {
            push_windows(&mut windows, mfm_encode(&mut prev, 0x00));
        }
        for _ in 0..3 {
            push_windows(&mut windows, MFM_SYNC_A1);
        }
        prev = 1;
        for &byte in record.iter().chain(crc) {
            push_windows(&mut windows, mfm_encode(&mut prev, byte));
        }
        for _ in 0..3 {
            push_windows(&mut windows, mfm_encode(&mut prev, 0x00));
        }
        windows_to_edges(&windows, 20, 40)
    }

    fn decode_mfm(opts: &DecoderOptions, edges: Vec<u64>) -> (Counters, MemorySink) {
        let fmt = FormatDescriptor::preset(Coding::Mfm).unwrap();
        let mut decoder = MfmDecoder::try_new(fmt, opts).unwrap();
        let mut source = BufPulseSource::new(edges, 200_000_000);
        let mut sink = MemorySink::new();
        let counters = decoder.decode(&mut source, &mut sink).unwrap();
        (counters, sink)
    }

    #[test]
    fn verify_mfm_id_record() {
        // An ID address mark with an all-zero four-byte header: cylinder 0,
        // side 0, sector 0, length code 0 (128 bytes).
        let record = [0xfe, 0x00, 0x00, 0x00, 0x00];
        let params = CrcParams::new(16, 0x1021, 0xffff);
        let crc = crc_over(params, &[&[0xa1, 0xa1, 0xa1], &record]);
        let crc = [(crc >> 8) as u8, crc as u8];

        let (counters, sink) = decode_mfm(&DecoderOptions::default(), mfm_stream(&record, &crc));

        assert_eq!(counters.idams, 1);
        assert_eq!(counters.crc_ok, 1);
        assert_eq!(counters.crc_err, 0);
        assert_eq!(counters.cker, 0);
        assert_eq!(counters.ooti, 0);
        assert_eq!(counters.eipw, 0);

        assert!(sink.row(Row::Fields).any(|r| r.label() == "ID Address Mark"));
        assert!(sink
            .row(Row::Fields)
            .any(|r| r.label() == "ID Record: cyl=0, sid=0, sec=0, len=128"));

        let id = sink.binary.iter().find(|b| b.kind == BinaryKind::Id).unwrap();
        assert_eq!(&id.data[..], &[0x00, 0x00, 0x00, 0x00]);

        let idcrc = sink.binary.iter().find(|b| b.kind == BinaryKind::IdCrc).unwrap();
        assert_eq!(idcrc.data.len(), 3 + 1 + 4 + 2);
        assert_eq!(&idcrc.data[..5], &[0xa1, 0xa1, 0xa1, 0xfe, 0x00]);
        assert_eq!(&idcrc.data[8..], &crc[..]);
    }

    #[test]
    fn verify_mfm_data_record() {
        let payload = [0xde, 0xad, 0xbe, 0xef];
        let record = [0xfb, 0xde, 0xad, 0xbe, 0xef];
        let params = CrcParams::new(32, 0x00a0_0805, 0xffff_ffff);
        let crc = crc_over(params, &[&[0xa1, 0xa1, 0xa1], &record]);
        let crc = crc.to_be_bytes()[4..].to_vec();

        let opts = DecoderOptions {
            sector_size: SectorSize::Fixed(4),
            ..Default::default()
        };
        let (counters, sink) = decode_mfm(&opts, mfm_stream(&record, &crc));

        assert_eq!(counters.dams, 1);
        assert_eq!(counters.ddams, 0);
        assert_eq!(counters.crc_ok, 1);

        let data = sink.binary.iter().find(|b| b.kind == BinaryKind::Data).unwrap();
        assert_eq!(&data.data[..], &payload[..]);

        let iddata = sink.binary.iter().find(|b| b.kind == BinaryKind::IdData).unwrap();
        assert_eq!(iddata.data.len(), 4 + 4);

        let framed = sink.binary.iter().find(|b| b.kind == BinaryKind::DataCrc).unwrap();
        assert_eq!(&framed.data[..4], &[0xa1, 0xa1, 0xa1, 0xfb]);
        assert_eq!(&framed.data[8..], &crc[..]);
    }

    #[test]
    fn verify_mfm_crc_error_is_counted_and_emitted() {
        let record = [0xfe, 0x01, 0x00, 0x05, 0x01];
        // Corrupt the stored CRC by one bit.
        let params = CrcParams::new(16, 0x1021, 0xffff);
        let bad = crc_over(params, &[&[0xa1, 0xa1, 0xa1], &record]) ^ 1;
        let bad = [(bad >> 8) as u8, bad as u8];
        let (counters, sink) = decode_mfm(&DecoderOptions::default(), mfm_stream(&record, &bad));

        assert_eq!(counters.crc_ok, 0);
        assert_eq!(counters.crc_err, 1);
        // The record is still annotated and emitted.
        assert!(sink.row(Row::Fields).any(|r| r.label().starts_with("CRC error")));
        assert!(sink.binary.iter().any(|b| b.kind == BinaryKind::IdCrc));
    }

    #[test]
    fn verify_extra_pulse_resyncs() {
        // A locked preamble with a second edge 8 samples after a legal one:
        // it lands inside the previous half-bit window.
        let mut edges: Vec<u64> = (1..=24).map(|i| i * 40).collect();
        edges.push(24 * 40 + 8);

        let (counters, _) = decode_mfm(&DecoderOptions::default(), edges);
        assert_eq!(counters.eipw, 1);
        assert_eq!(counters.ooti, 0);
    }

    #[test]
    fn verify_reporter_law() {
        // Two data records with report-on-DAM every 2: exactly one report,
        // and counters are cleared by the snapshot.
        let record = [0xfb, 0x11, 0x22];
        let params = CrcParams::new(32, 0x00a0_0805, 0xffff_ffff);
        let crc = crc_over(params, &[&[0xa1, 0xa1, 0xa1], &record]).to_be_bytes()[4..].to_vec();

        let mut windows = Vec::new();
        for _ in 0..2 {
            let mut prev = 0u8;
            for _ in 0..20 {
                push_windows(&mut windows, mfm_encode(&mut prev, 0x00));
            }
            for _ in 0..3 {
                push_windows(&mut windows, MFM_SYNC_A1);
            }
            prev = 1;
            for &byte in record.iter().chain(&crc) {
                push_windows(&mut windows, mfm_encode(&mut prev, byte));
            }
            for _ in 0..3 {
                push_windows(&mut windows, mfm_encode(&mut prev, 0x00));
            }
        }
        let edges = windows_to_edges(&windows, 20, 40);

        let opts = DecoderOptions {
            sector_size: SectorSize::Fixed(2),
            report: ReportTrigger::Dam,
            report_qty: 2,
            ..Default::default()
        };
        let (counters, sink) = decode_mfm(&opts, edges);

        let reports: Vec<_> = sink.row(Row::Reports).collect();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].label().starts_with("Summary: "));
        assert!(reports[0].label().contains("DAM=2"));

        // Counters were snapshot and cleared.
        assert_eq!(counters.dams, 0);
        assert_eq!(counters.crc_ok, 0);
    }

    #[test]
    fn verify_fm_index_mark() {
        // FM at 250 kbit/s sampled at 20 MHz: 40 samples per half-bit. The
        // index mark is 0xFC with a D7 clock.
        let mut windows = Vec::new();
        for _ in 0..12 {
            push_windows(&mut windows, fm_encode(0x00));
        }
        push_windows(&mut windows, 0xf77a);
        for _ in 0..2 {
            push_windows(&mut windows, fm_encode(0x00));
        }
        let edges = windows_to_edges(&windows, 40, 80);

        let opts = DecoderOptions { data_rate: 250_000, ..Default::default() };
        let fmt = FormatDescriptor::preset(Coding::Fm).unwrap();
        let mut decoder = MfmDecoder::try_new(fmt, &opts).unwrap();
        let mut source = BufPulseSource::new(edges, 20_000_000);
        let mut sink = MemorySink::new();
        let counters = decoder.decode(&mut source, &mut sink).unwrap();

        assert_eq!(counters.iams, 1);
        assert_eq!(counters.ooti, 0);
        assert!(sink.row(Row::Fields).any(|r| r.label() == "Index Mark"));
    }

    /// Greedy RLL (2,7) encoder over the IBM table, for building test
    /// streams.
    fn rll_encode_ibm(bits: &str) -> String {
        const MAP: &[(&str, &str)] = &[
            ("11", "1000"),
            ("10", "0100"),
            ("000", "000100"),
            ("010", "100100"),
            ("011", "001000"),
            ("0010", "00100100"),
            ("0011", "00001000"),
        ];
        let mut raw = String::new();
        let mut rest = bits;
        'outer: while !rest.is_empty() {
            for &(data, code) in MAP {
                if rest.starts_with(data) {
                    raw.push_str(code);
                    rest = &rest[data.len()..];
                    continue 'outer;
                }
            }
            // Trailing bits shorter than any codeword.
            break;
        }
        raw
    }

    fn byte_bits(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:08b}", b)).collect()
    }

    /// Builds a Seagate RLL stream at 20 samples per half-bit: a lock-on
    /// preamble, the given sync-mark cell runs (with the illegal on-disk
    /// eight-cell run intact), and the encoded continuation of the decoded
    /// bit stream.
    ///
    /// Both Seagate marks leave the raw cells `1001` pending and their first
    /// decoded byte short by one bit; the two-cell filler completes the
    /// codeword 100100 and the continuation carries the next byte onward
    /// from its third bit.
    fn rll_seagate_stream(mark_runs: &[&str], decoded_tail: &str) -> Vec<u64> {
        let mut raw = String::new();
        for _ in 0..16 {
            raw.push_str("001");
        }
        for run in mark_runs {
            raw.push_str(run);
        }
        raw.push_str("00");
        raw.push_str(&rll_encode_ibm(decoded_tail));

        let windows: Vec<bool> = raw.chars().map(|c| c == '1').collect();
        windows_to_edges(&windows, 20, 0)
    }

    #[test]
    fn verify_rll_seagate_id_record() {
        // A Seagate ID field: the sync mark decodes to the retained 0x1E
        // prefix, then 0xA1 completes the ID address mark, followed by a
        // four-byte header and a 16-bit CRC.
        let header = [0x41u8, 0x02, 0x03, 0x00];
        let params = CrcParams::new(16, 0x1021, 0xffff);
        // The retained prefix byte is not checksummed; the A1 accumulator and
        // the header bytes are.
        let crc = crc_over(params, &[&[0xa1], &header]);
        let crc = [(crc >> 8) as u8, crc as u8];

        // The [4, 3, 8, 3] mark decodes to 0x1E; the continuation carries
        // 0xA1 onward from its third bit.
        let mut decoded = String::from("100001");
        decoded.push_str(&byte_bits(&header));
        decoded.push_str(&byte_bits(&crc));
        decoded.push_str(&byte_bits(&[0xff, 0xff, 0xff]));

        let edges = rll_seagate_stream(&["0001", "001", "00000001", "001"], &decoded);

        let opts = DecoderOptions {
            header_layout: HeaderLayout::Seagate,
            ..Default::default()
        };
        let fmt = FormatDescriptor::preset(Coding::RllSeagate).unwrap();
        let mut decoder = MfmDecoder::try_new(fmt, &opts).unwrap();
        let mut source = BufPulseSource::new(edges, 200_000_000);
        let mut sink = MemorySink::new();
        let counters = decoder.decode(&mut source, &mut sink).unwrap();

        assert_eq!(counters.idams, 1);
        assert_eq!(counters.crc_ok, 1);
        assert_eq!(counters.crc_err, 0);
        assert!(sink
            .row(Row::Fields)
            .any(|r| r.label() == "ID Record: cyl=258, sid=1, sec=3, len=512"));

        let id = sink.binary.iter().find(|b| b.kind == BinaryKind::Id).unwrap();
        assert_eq!(&id.data[..], &header[..]);
    }

    #[test]
    fn verify_rll_seagate_data_record() {
        // A Seagate data field: the [5, 6, 8, 3] sync mark decodes to the
        // inert 0xDE, then 0xA1 opens the mark and 0xFB is the data address
        // mark, followed by a 512-byte payload and a 32-bit CRC. The byte
        // after the 0xA1 must be an address mark in 0xF8..=0xFB (or an ID
        // mark); no other value reaches the data-record path.
        let payload: Vec<u8> = (0..512).map(|i| (i % 256) as u8).collect();
        let params = CrcParams::new(32, 0x00a0_0805, 0xffff_ffff);
        let crc = crc_over(params, &[&[0xa1, 0xfb], &payload]).to_be_bytes()[4..].to_vec();

        // The continuation carries 0xA1 onward from its third bit.
        let mut decoded = String::from("100001");
        decoded.push_str(&byte_bits(&[0xfb]));
        decoded.push_str(&byte_bits(&payload));
        decoded.push_str(&byte_bits(&crc));
        decoded.push_str(&byte_bits(&[0xff, 0xff, 0xff]));

        let edges = rll_seagate_stream(&["00001", "000001", "00000001", "001"], &decoded);

        let opts = DecoderOptions {
            header_layout: HeaderLayout::Seagate,
            sector_size: SectorSize::Fixed(512),
            ..Default::default()
        };
        let fmt = FormatDescriptor::preset(Coding::RllSeagate).unwrap();
        let mut decoder = MfmDecoder::try_new(fmt, &opts).unwrap();
        let mut source = BufPulseSource::new(edges, 200_000_000);
        let mut sink = MemorySink::new();
        let counters = decoder.decode(&mut source, &mut sink).unwrap();

        assert_eq!(counters.dams, 1);
        assert_eq!(counters.ddams, 0);
        assert_eq!(counters.crc_ok, 1);
        assert_eq!(counters.crc_err, 0);
        assert!(sink.row(Row::Fields).any(|r| r.label() == "Data Address Mark"));

        // The emitted binary record is exactly the 512-byte payload.
        let data = sink.binary.iter().find(|b| b.kind == BinaryKind::Data).unwrap();
        assert_eq!(data.data.len(), 512);
        assert_eq!(&data.data[..], &payload[..]);

        let framed = sink.binary.iter().find(|b| b.kind == BinaryKind::DataCrc).unwrap();
        assert_eq!(framed.data.len(), 2 + 512 + 4);
        assert_eq!(&framed.data[..2], &[0xa1, 0xfb]);
        assert_eq!(&framed.data[2..514], &payload[..]);
        assert_eq!(&framed.data[514..], &crc[..]);
    }

    #[test]
    fn verify_missing_sample_rate_is_rejected() {
        struct NoRate;
        impl fluxion_core::pulse::PulseSource for NoRate {
            fn next_edge(&mut self) -> fluxion_core::errors::Result<fluxion_core::pulse::PulseEvent> {
                fluxion_core::errors::end_of_stream_error()
            }
            fn sample_rate(&self) -> Option<u32> {
                None
            }
        }

        let fmt = FormatDescriptor::preset(Coding::Mfm).unwrap();
        let mut decoder = MfmDecoder::try_new(fmt, &DecoderOptions::default()).unwrap();
        let mut sink = MemorySink::new();
        assert!(decoder.decode(&mut NoRate, &mut sink).is_err());
    }

    #[test]
    fn verify_invalid_options_are_rejected() {
        let fmt = FormatDescriptor::preset(Coding::Mfm).unwrap();

        let opts = DecoderOptions { data_rate: 0, ..Default::default() };
        assert!(MfmDecoder::try_new(fmt.clone(), &opts).is_err());

        let opts = DecoderOptions {
            header_crc: CrcParams::new(24, 0x1021, 0),
            ..Default::default()
        };
        assert!(MfmDecoder::try_new(fmt.clone(), &opts).is_err());

        let opts = DecoderOptions {
            report: ReportTrigger::Dam,
            report_qty: 0,
            ..Default::default()
        };
        assert!(MfmDecoder::try_new(fmt, &opts).is_err());
    }
}
