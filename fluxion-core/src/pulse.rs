// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `pulse` module defines the contract between a source of flux
//! transitions and a decoder.

use bitflags::bitflags;

use crate::errors::{end_of_stream_error, Result};

bitflags! {
    /// The channels a pulse event may be observed on.
    ///
    /// A pulse on the EXTRA channel is treated identically to a DATA channel
    /// pulse at the same sample index. A high level on the SUPPRESS channel
    /// gates all edges; a source must not deliver suppressed edges.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Channels: u32 {
        const DATA = 0b001;
        const EXTRA = 0b010;
        const SUPPRESS = 0b100;
    }
}

/// A single leading edge detected on the read-data line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseEvent {
    /// Sample index of the edge. Monotonically non-decreasing across a
    /// stream.
    pub sample: u64,
    /// The channel(s) the edge was observed on.
    pub channels: Channels,
}

/// A `PulseSource` produces a stream of leading-edge events.
///
/// `next_edge` blocks until the next edge is available and returns
/// [`Error::EndOfStream`](crate::errors::Error::EndOfStream) once the stream
/// is exhausted. A decoder drives its whole state machine from these calls;
/// there are no other suspension points.
pub trait PulseSource {
    /// Returns the next leading edge, or `Error::EndOfStream`.
    fn next_edge(&mut self) -> Result<PulseEvent>;

    /// The sampling rate of the edge stream in Hz, if known.
    fn sample_rate(&self) -> Option<u32>;

    /// The nominal data rate of the medium in bits/s, if the source knows it.
    fn data_rate(&self) -> Option<u32> {
        None
    }
}

/// A `BufPulseSource` replays a pre-recorded list of edge sample indices.
pub struct BufPulseSource {
    edges: Vec<u64>,
    next: usize,
    sample_rate: u32,
}

impl BufPulseSource {
    pub fn new(edges: Vec<u64>, sample_rate: u32) -> BufPulseSource {
        BufPulseSource { edges, next: 0, sample_rate }
    }
}

impl PulseSource for BufPulseSource {
    fn next_edge(&mut self) -> Result<PulseEvent> {
        if self.next >= self.edges.len() {
            return end_of_stream_error();
        }
        let sample = self.edges[self.next];
        self.next += 1;
        Ok(PulseEvent { sample, channels: Channels::DATA })
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::{BufPulseSource, PulseSource};
    use crate::errors::Error;

    #[test]
    fn verify_buf_pulse_source() {
        let mut source = BufPulseSource::new(vec![40, 80, 120], 200_000_000);

        assert_eq!(source.sample_rate(), Some(200_000_000));
        assert_eq!(source.next_edge().unwrap().sample, 40);
        assert_eq!(source.next_edge().unwrap().sample, 80);
        assert_eq!(source.next_edge().unwrap().sample, 120);
        assert!(matches!(source.next_edge(), Err(Error::EndOfStream)));
    }
}
