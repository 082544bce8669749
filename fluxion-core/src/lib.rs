// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fluxion is a decoder framework for the raw magnetic read signal of floppy
//! and hard disk drives. The input is a timed stream of flux transitions; the
//! output is a sequence of annotated regions (pulses, half-bit windows, bits,
//! bytes, fields) and the extracted byte records (ID headers, sector
//! payloads) with their CRCs verified.
//!
//! `fluxion-core` contains the traits and support structures shared by all
//! Fluxion crates. Pulse sources (for example, a transition-file reader),
//! decoders, and annotation sinks are implemented in their own crates and
//! communicate exclusively through the interfaces defined here.

pub mod annotate;
pub mod checksum;
pub mod errors;
pub mod io;
pub mod pulse;
pub mod units;
