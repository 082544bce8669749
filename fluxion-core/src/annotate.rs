// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `annotate` module defines the region and binary-record output contract
//! of a decoder.
//!
//! A decoder describes everything it observed as *regions*: sample-index
//! spans tagged with a display row and a list of label variants ordered from
//! longest to shortest, so a consumer can pick the longest label that fits.
//! Completed byte records are additionally emitted as *binary chunks*.

/// The display row a region belongs to.
///
/// Regions are produced in non-decreasing start order within each row. The
/// relative order of regions on different rows over the same span is
/// unspecified but stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Row {
    Pulses,
    Windows,
    Prefixes,
    Bits,
    Bytes,
    Fields,
    Errors,
    Reports,
}

impl Row {
    /// A short ASCII name for the row.
    pub fn name(&self) -> &'static str {
        match *self {
            Row::Pulses => "pulses",
            Row::Windows => "windows",
            Row::Prefixes => "prefixes",
            Row::Bits => "bits",
            Row::Bytes => "bytes",
            Row::Fields => "fields",
            Row::Errors => "errors",
            Row::Reports => "reports",
        }
    }
}

/// An annotated span of the sample stream.
#[derive(Clone, Debug)]
pub struct Region {
    /// First sample index covered by the region.
    pub start: u64,
    /// One past the last sample index covered by the region.
    pub end: u64,
    /// The display row.
    pub row: Row,
    /// Label variants, longest first.
    pub variants: Vec<String>,
}

impl Region {
    pub fn new(start: u64, end: u64, row: Row, variants: Vec<String>) -> Region {
        Region { start, end, row, variants }
    }

    /// Builds a region from a list of static label variants.
    pub fn of(start: u64, end: u64, row: Row, variants: &[&str]) -> Region {
        Region { start, end, row, variants: variants.iter().map(|v| v.to_string()).collect() }
    }

    /// The longest label variant.
    pub fn label(&self) -> &str {
        self.variants.first().map(|v| v.as_str()).unwrap_or("")
    }
}

/// The kind of a binary record chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryKind {
    /// Raw ID record (header data fields).
    Id,
    /// Raw data record, in on-track order.
    Data,
    /// Combined ID + data record.
    IdData,
    /// Whole header including address mark and stored CRC.
    IdCrc,
    /// Whole data field including address mark and stored CRC.
    DataCrc,
    /// Transition-file track image.
    Tr,
    /// Extracted-sector file image.
    Ex,
}

/// A completed byte record with the sample span it was decoded from.
#[derive(Clone, Debug)]
pub struct BinaryChunk {
    pub start: u64,
    pub end: u64,
    pub kind: BinaryKind,
    pub data: Box<[u8]>,
}

/// An `AnnotationSink` receives the regions and binary records produced by a
/// decoder.
pub trait AnnotationSink {
    fn put(&mut self, region: Region);

    fn put_binary(&mut self, chunk: BinaryChunk);
}

/// A sink that collects everything in memory.
#[derive(Default)]
pub struct MemorySink {
    pub regions: Vec<Region>,
    pub binary: Vec<BinaryChunk>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        Default::default()
    }

    /// Iterates the regions of one row.
    pub fn row(&self, row: Row) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(move |r| r.row == row)
    }
}

impl AnnotationSink for MemorySink {
    fn put(&mut self, region: Region) {
        self.regions.push(region);
    }

    fn put_binary(&mut self, chunk: BinaryChunk) {
        self.binary.push(chunk);
    }
}
