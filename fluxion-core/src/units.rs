// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `units` module provides definitions for common units.

/// The unit used to annotate pulse intervals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeUnit {
    /// Nanoseconds.
    #[default]
    Ns,
    /// Microseconds.
    Us,
    /// Microseconds if a half-bit window exceeds 1 us, nanoseconds otherwise.
    Auto,
    /// Half-bit windows of nominal size.
    Window,
}

/// A `TimeBase` converts sample indices of a stream with a known sampling
/// rate into time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeBase {
    sample_rate: u32,
}

impl TimeBase {
    pub fn new(sample_rate: u32) -> TimeBase {
        debug_assert!(sample_rate > 0);
        TimeBase { sample_rate }
    }

    /// Duration of one sample in nanoseconds.
    pub fn ns_per_sample(&self) -> f64 {
        1_000_000_000.0 / f64::from(self.sample_rate)
    }

    /// Duration of one sample in microseconds.
    pub fn us_per_sample(&self) -> f64 {
        1_000_000.0 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::TimeBase;

    #[test]
    fn verify_time_base() {
        let tb = TimeBase::new(200_000_000);
        assert_eq!(tb.ns_per_sample(), 5.0);
        assert_eq!(tb.us_per_sample(), 0.005);
    }
}
