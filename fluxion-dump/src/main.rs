// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::exit;

use fluxion_core::annotate::{AnnotationSink, BinaryChunk, BinaryKind, Region, Row};
use fluxion_core::checksum::CrcParams;
use fluxion_core::errors::{Error, Result};
use fluxion_core::units::TimeUnit;

use fluxion_codec_mfm::{
    CellLimits, Codemap, Coding, CustomFormat, DecoderOptions, FormatDescriptor, HeaderLayout,
    MarkSet, MfmDecoder, ReportTrigger, SectorSize,
};
use fluxion_format_tr::TrReader;

use clap::{Arg, ArgMatches, Command};
use log::{info, warn};

fn main() {
    pretty_env_logger::init();

    let matches = Command::new("Fluxion Dump")
        .version("0.1.0")
        .about("Decode FM/MFM/RLL pulse streams from transition files")
        .arg(
            Arg::new("INPUT")
                .help("The transition (.tr) or emulator file to decode")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .short('l')
                .help("List the file header and tracks, then exit"),
        )
        .arg(
            Arg::new("track")
                .long("track")
                .short('t')
                .takes_value(true)
                .default_value("0")
                .help("Index of the track to decode"),
        )
        .arg(
            Arg::new("leading-edge")
                .long("leading-edge")
                .takes_value(true)
                .possible_values(["rising", "falling"])
                .default_value("rising")
                .help("Capture polarity (informational for transition files)"),
        )
        .arg(
            Arg::new("data-rate")
                .long("data-rate")
                .takes_value(true)
                .possible_values([
                    "125000", "150000", "250000", "300000", "500000", "5000000", "7500000",
                    "10000000",
                ])
                .default_value("5000000")
                .help("Data rate in bits/s"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .takes_value(true)
                .possible_values([
                    "FM",
                    "MFM",
                    "RLL_Seagate",
                    "RLL_Adaptec",
                    "RLL_Adaptec4070",
                    "RLL_WD",
                    "RLL_OMTI",
                    "RLL_DTC7287_unknown",
                    "custom",
                ])
                .default_value("MFM")
                .help("Encoding format, a preset or custom"),
        )
        .arg(
            Arg::new("header-format")
                .long("header-format")
                .takes_value(true)
                .possible_values([
                    "3",
                    "4",
                    "Seagate",
                    "OMTI",
                    "Adaptec",
                    "Adaptec4070",
                    "DTC7287",
                ])
                .default_value("4")
                .help("ID header layout"),
        )
        .arg(
            Arg::new("sector-size")
                .long("sector-size")
                .takes_value(true)
                .possible_values([
                    "auto", "128", "256", "512", "1024", "2048", "4096", "8192", "16384",
                ])
                .default_value("auto")
                .help("Sector payload length in bytes"),
        )
        .arg(
            Arg::new("header-crc-size")
                .long("header-crc-size")
                .takes_value(true)
                .possible_values(["16", "32"])
                .default_value("16")
                .help("Header CRC width in bits"),
        )
        .arg(
            Arg::new("header-crc-poly")
                .long("header-crc-poly")
                .takes_value(true)
                .default_value("0x1021")
                .help("Header CRC polynomial"),
        )
        .arg(
            Arg::new("header-crc-init")
                .long("header-crc-init")
                .takes_value(true)
                .default_value("0xffffffff")
                .help("Header CRC initial value"),
        )
        .arg(
            Arg::new("data-crc-size")
                .long("data-crc-size")
                .takes_value(true)
                .possible_values(["16", "32", "48", "56"])
                .default_value("32")
                .help("Data CRC width in bits"),
        )
        .arg(
            Arg::new("data-crc-poly")
                .long("data-crc-poly")
                .takes_value(true)
                .default_value("0xA00805")
                .help("Data CRC polynomial"),
        )
        .arg(
            Arg::new("data-crc-init")
                .long("data-crc-init")
                .takes_value(true)
                .default_value("0xffffffffffffff")
                .help("Data CRC initial value"),
        )
        .arg(
            Arg::new("time-unit")
                .long("time-unit")
                .takes_value(true)
                .possible_values(["ns", "us", "auto", "window"])
                .default_value("ns")
                .help("Unit for pulse-interval annotations"),
        )
        .arg(
            Arg::new("show-sample-num")
                .long("show-sample-num")
                .help("Include sample numbers in pulse and window annotations"),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .takes_value(true)
                .possible_values(["no", "IAM", "IDAM", "DAM", "DDAM"])
                .default_value("no")
                .help("Emit a counter report after this field"),
        )
        .arg(
            Arg::new("report-qty")
                .long("report-qty")
                .takes_value(true)
                .default_value("9")
                .help("Report every this many marks"),
        )
        .arg(
            Arg::new("pll-sync-tolerance")
                .long("pll-sync-tolerance")
                .takes_value(true)
                .possible_values(["15%", "20%", "25%", "33%", "50%"])
                .default_value("25%")
                .help("Initial tolerance when catching the synchronization sequence"),
        )
        .arg(
            Arg::new("pll-kp")
                .long("pll-kp")
                .takes_value(true)
                .default_value("0.5")
                .help("PI filter proportional gain"),
        )
        .arg(
            Arg::new("pll-ki")
                .long("pll-ki")
                .takes_value(true)
                .default_value("0.0005")
                .help("PI filter integral gain"),
        )
        .arg(
            Arg::new("custom-limits")
                .long("custom-limits")
                .takes_value(true)
                .possible_values(["FM", "MFM", "RLL"])
                .default_value("RLL")
                .help("Custom format: run-length class"),
        )
        .arg(
            Arg::new("custom-codemap")
                .long("custom-codemap")
                .takes_value(true)
                .possible_values(["FM/MFM", "IBM", "WD"])
                .default_value("IBM")
                .help("Custom format: codemap"),
        )
        .arg(
            Arg::new("custom-sync-pulse")
                .long("custom-sync-pulse")
                .takes_value(true)
                .possible_values(["2", "3", "4"])
                .default_value("4")
                .help("Custom format: sync pulse width in half-bit cells"),
        )
        .arg(
            Arg::new("custom-sync-marks")
                .long("custom-sync-marks")
                .takes_value(true)
                .help("Custom format: sync marks, e.g. 8-3-5_5-8-3-5 or [8,3,5],[5,8,3,5]"),
        )
        .arg(
            Arg::new("custom-shift-index")
                .long("custom-shift-index")
                .takes_value(true)
                .help("Custom format: shift index, one common value or one per sync mark"),
        )
        .arg(
            Arg::new("custom-iddata-mark")
                .long("custom-iddata-mark")
                .takes_value(true)
                .help("Custom format: IDData marks, e.g. 0xA1"),
        )
        .arg(
            Arg::new("custom-id-mark")
                .long("custom-id-mark")
                .takes_value(true)
                .help("Custom format: ID marks"),
        )
        .arg(
            Arg::new("custom-data-mark")
                .long("custom-data-mark")
                .takes_value(true)
                .help("Custom format: data marks"),
        )
        .arg(
            Arg::new("custom-id-prefix-mark")
                .long("custom-id-prefix-mark")
                .takes_value(true)
                .help("Custom format: ID prefix marks"),
        )
        .arg(
            Arg::new("custom-nop-mark")
                .long("custom-nop-mark")
                .takes_value(true)
                .help("Custom format: inert marks; * matches every byte"),
        )
        .arg(
            Arg::new("custom-nop-a1-mark")
                .long("custom-nop-a1-mark")
                .takes_value(true)
                .help("Custom format: inert marks that seed the A1 accumulator"),
        )
        .arg(
            Arg::new("rows")
                .long("rows")
                .takes_value(true)
                .default_value("fields,errors,reports")
                .help("Annotation rows to print, comma separated, or 'all'"),
        )
        .arg(
            Arg::new("bin")
                .long("bin")
                .takes_value(true)
                .possible_values(["id", "data", "iddata", "idcrc", "datacrc"])
                .help("Binary record stream to write"),
        )
        .arg(
            Arg::new("bin-out")
                .long("bin-out")
                .takes_value(true)
                .requires("bin")
                .help("Output file for the selected binary stream"),
        )
        .get_matches();

    match run(&matches) {
        Ok(()) => (),
        Err(err) => {
            eprintln!("error: {}", err);
            exit(1);
        }
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let path = Path::new(matches.value_of("INPUT").unwrap());
    let file = Box::new(File::open(path)?);
    let mut reader = TrReader::try_new(file)?;

    if matches.is_present("list") {
        return list_tracks(&mut reader);
    }

    let format = build_format(matches)?;
    let opts = build_options(matches)?;

    let track_index: u32 = parse_num(matches.value_of("track").unwrap(), "track")? as u32;
    for _ in 0..track_index {
        if !reader.skip_track()? {
            return Err(Error::Unsupported("track index beyond end of file"));
        }
    }
    let track = match reader.next_track()? {
        Some(track) => track,
        None => return Err(Error::Unsupported("track index beyond end of file")),
    };

    info!(
        "decoding track cylinder {} head {} ({} transitions)",
        track.cylinder,
        track.head,
        track.deltas.len()
    );

    let mut sink = CliSink::new(matches)?;
    let mut decoder = MfmDecoder::try_new(format, &opts)?;
    let counters = decoder.decode(&mut track.pulses(), &mut sink)?;

    sink.finish(matches)?;

    println!(
        "totals: IAM={}, IDAM={}, DAM={}, DDAM={}, CRC_OK={}, CRC_err={}, EiPW={}, CkEr={}, OoTI={}/{}",
        counters.iams,
        counters.idams,
        counters.dams,
        counters.ddams,
        counters.crc_ok,
        counters.crc_err,
        counters.eipw,
        counters.cker,
        counters.ooti,
        counters.intervals
    );

    Ok(())
}

fn list_tracks(reader: &mut TrReader) -> Result<()> {
    let header = reader.header().clone();
    println!("variant: {:?} v{}.{}", header.variant, header.major_version, header.minor_version);
    println!("cylinders: {}, heads: {}", header.num_cylinders, header.num_heads);
    println!("rate: {} Hz", header.bit_rate);
    if !header.command_line.is_empty() {
        println!("command line: {}", header.command_line);
    }
    if !header.note.is_empty() {
        println!("note: {}", header.note);
    }

    let mut index = 0;
    while let Some(track) = reader.next_track()? {
        println!(
            "track {:4}: cylinder {:4}, head {}, {} transitions",
            index,
            track.cylinder,
            track.head,
            track.deltas.len()
        );
        index += 1;
    }
    Ok(())
}

fn build_format(matches: &ArgMatches) -> Result<FormatDescriptor> {
    let coding = match matches.value_of("format").unwrap() {
        "FM" => Coding::Fm,
        "MFM" => Coding::Mfm,
        "RLL_Seagate" => Coding::RllSeagate,
        "RLL_Adaptec" => Coding::RllAdaptec,
        "RLL_Adaptec4070" => Coding::RllAdaptec4070,
        "RLL_WD" => Coding::RllWd,
        "RLL_OMTI" => Coding::RllOmti,
        "RLL_DTC7287_unknown" => Coding::RllDtc7287,
        "custom" => return build_custom_format(matches),
        _ => unreachable!(),
    };
    FormatDescriptor::preset(coding)
}

fn build_custom_format(matches: &ArgMatches) -> Result<FormatDescriptor> {
    let limits = match matches.value_of("custom-limits").unwrap() {
        "FM" => CellLimits::Fm,
        "MFM" => CellLimits::Mfm,
        _ => CellLimits::Rll,
    };
    let codemap = match matches.value_of("custom-codemap").unwrap() {
        "FM/MFM" => Codemap::FmMfm,
        "WD" => Codemap::RllWd,
        _ => Codemap::RllIbm,
    };
    let sync_pulse = parse_num(matches.value_of("custom-sync-pulse").unwrap(), "sync pulse")? as u32;

    let sync_marks = match matches.value_of("custom-sync-marks") {
        Some(value) => parse_list_of_lists(value)?
            .into_iter()
            .map(|list| list.into_iter().map(|v| v as u8).collect())
            .collect(),
        None => return Err(Error::ConfigError("the custom format requires sync marks")),
    };
    let shift_index = match matches.value_of("custom-shift-index") {
        Some(value) => parse_list(value)?.into_iter().map(|v| v as i32).collect(),
        None => return Err(Error::ConfigError("the custom format requires a shift index")),
    };

    Ok(FormatDescriptor::custom(CustomFormat {
        limits,
        codemap,
        sync_pulse,
        sync_marks,
        shift_index,
        iddata_mark: parse_marks(matches.value_of("custom-iddata-mark"))?,
        id_mark: parse_marks(matches.value_of("custom-id-mark"))?,
        data_mark: parse_marks(matches.value_of("custom-data-mark"))?,
        id_prefix_mark: parse_marks(matches.value_of("custom-id-prefix-mark"))?,
        nop_mark: parse_marks(matches.value_of("custom-nop-mark"))?,
        nop_a1_mark: parse_marks(matches.value_of("custom-nop-a1-mark"))?,
    })?)
}

fn build_options(matches: &ArgMatches) -> Result<DecoderOptions> {
    let header_layout = match matches.value_of("header-format").unwrap() {
        "3" => HeaderLayout::ThreeByte,
        "4" => HeaderLayout::FourByte,
        "Seagate" => HeaderLayout::Seagate,
        "OMTI" => HeaderLayout::Omti,
        "Adaptec" => HeaderLayout::Adaptec,
        "Adaptec4070" => HeaderLayout::Adaptec4070,
        "DTC7287" => HeaderLayout::Dtc7287,
        _ => unreachable!(),
    };

    let sector_size = match matches.value_of("sector-size").unwrap() {
        "auto" => SectorSize::Auto,
        fixed => SectorSize::Fixed(parse_num(fixed, "sector size")? as usize),
    };

    let header_crc_size = parse_num(matches.value_of("header-crc-size").unwrap(), "crc size")?;
    let header_crc_mask = (1u64 << header_crc_size) - 1;
    let data_crc_size = parse_num(matches.value_of("data-crc-size").unwrap(), "crc size")?;
    let data_crc_mask = if data_crc_size == 64 { u64::MAX } else { (1u64 << data_crc_size) - 1 };

    let report = match matches.value_of("report").unwrap() {
        "no" => ReportTrigger::None,
        "IAM" => ReportTrigger::Iam,
        "IDAM" => ReportTrigger::Idam,
        "DAM" => ReportTrigger::Dam,
        "DDAM" => ReportTrigger::Ddam,
        _ => unreachable!(),
    };

    let time_unit = match matches.value_of("time-unit").unwrap() {
        "ns" => TimeUnit::Ns,
        "us" => TimeUnit::Us,
        "auto" => TimeUnit::Auto,
        "window" => TimeUnit::Window,
        _ => unreachable!(),
    };

    let tolerance = matches.value_of("pll-sync-tolerance").unwrap();
    let tolerance = parse_num(tolerance.trim_end_matches('%'), "tolerance")? as f64 * 0.01;

    Ok(DecoderOptions {
        data_rate: parse_num(matches.value_of("data-rate").unwrap(), "data rate")? as u32,
        header_layout,
        sector_size,
        header_crc: CrcParams::new(
            header_crc_size as u32,
            parse_num(matches.value_of("header-crc-poly").unwrap(), "crc polynomial")?
                & header_crc_mask,
            parse_num(matches.value_of("header-crc-init").unwrap(), "crc init")? & header_crc_mask,
        ),
        data_crc: CrcParams::new(
            data_crc_size as u32,
            parse_num(matches.value_of("data-crc-poly").unwrap(), "crc polynomial")?
                & data_crc_mask,
            parse_num(matches.value_of("data-crc-init").unwrap(), "crc init")? & data_crc_mask,
        ),
        time_unit,
        show_sample_num: matches.is_present("show-sample-num"),
        report,
        report_qty: parse_num(matches.value_of("report-qty").unwrap(), "report quantity")? as u32,
        pll_kp: parse_float(matches.value_of("pll-kp").unwrap(), "pll kp")?,
        pll_ki: parse_float(matches.value_of("pll-ki").unwrap(), "pll ki")?,
        pll_sync_tolerance: tolerance,
    })
}

/// Parses an integer, accepting `0x`/`0o`/`0b` prefixes.
fn parse_num(value: &str, what: &'static str) -> Result<u64> {
    let value = value.trim();
    let (digits, radix) = if let Some(hex) = value.strip_prefix("0x").or(value.strip_prefix("0X")) {
        (hex, 16)
    }
    else if let Some(oct) = value.strip_prefix("0o") {
        (oct, 8)
    }
    else if let Some(bin) = value.strip_prefix("0b") {
        (bin, 2)
    }
    else {
        (value, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|_| bad_value(what))
}

fn parse_float(value: &str, what: &'static str) -> Result<f64> {
    value.trim().parse().map_err(|_| bad_value(what))
}

fn bad_value(what: &'static str) -> Error {
    Error::ConfigError(what)
}

/// Parses `8-3-5_5-8-3-5`, `8,3,5`, or `[8,3,5],[5,8,3,5]` into lists of
/// integers.
fn parse_list_of_lists(value: &str) -> Result<Vec<Vec<u64>>> {
    let mut s: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if s.contains(&['[', ']', ','][..]) {
        s = s
            .replace("],[", "_")
            .replace("][", "_")
            .replace(&['[', ']'][..], "")
            .replace(',', "-");
    }
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.split('-')
                .filter(|x| !x.is_empty())
                .map(|x| parse_num(x, "list entry"))
                .collect()
        })
        .collect()
}

/// Parses a single list of integers.
fn parse_list(value: &str) -> Result<Vec<u64>> {
    let lists = parse_list_of_lists(value)?;
    match lists.len() {
        1 => Ok(lists.into_iter().next().unwrap()),
        _ => Err(Error::ConfigError("expected a single list of values")),
    }
}

/// Parses a mark set; `*` is the wildcard.
fn parse_marks(value: Option<&str>) -> Result<MarkSet> {
    match value {
        None => Ok(MarkSet::none()),
        Some(value) if value.contains('*') => Ok(MarkSet::any()),
        Some(value) => {
            let bytes: Vec<u8> = parse_list(value)?.into_iter().map(|v| v as u8).collect();
            Ok(MarkSet::of(&bytes))
        }
    }
}

/// Sink printing selected annotation rows and collecting one binary stream.
struct CliSink {
    rows: Vec<Row>,
    bin_kind: Option<BinaryKind>,
    bin_data: Vec<u8>,
    bin_chunks: usize,
}

impl CliSink {
    fn new(matches: &ArgMatches) -> Result<CliSink> {
        const ALL: [Row; 8] = [
            Row::Pulses,
            Row::Windows,
            Row::Prefixes,
            Row::Bits,
            Row::Bytes,
            Row::Fields,
            Row::Errors,
            Row::Reports,
        ];

        let spec = matches.value_of("rows").unwrap();
        let rows = if spec == "all" {
            ALL.to_vec()
        }
        else {
            spec.split(',')
                .map(|name| {
                    ALL.iter()
                        .find(|row| row.name() == name.trim())
                        .copied()
                        .ok_or(Error::ConfigError("unknown annotation row"))
                })
                .collect::<Result<Vec<Row>>>()?
        };

        let bin_kind = match matches.value_of("bin") {
            Some("id") => Some(BinaryKind::Id),
            Some("data") => Some(BinaryKind::Data),
            Some("iddata") => Some(BinaryKind::IdData),
            Some("idcrc") => Some(BinaryKind::IdCrc),
            Some("datacrc") => Some(BinaryKind::DataCrc),
            _ => None,
        };

        Ok(CliSink { rows, bin_kind, bin_data: Vec::new(), bin_chunks: 0 })
    }

    fn finish(&self, matches: &ArgMatches) -> Result<()> {
        if self.bin_kind.is_none() {
            return Ok(());
        }
        match matches.value_of("bin-out") {
            Some(path) => {
                let mut out = File::create(path)?;
                out.write_all(&self.bin_data)?;
                info!("wrote {} records ({} bytes) to {}", self.bin_chunks, self.bin_data.len(), path);
            }
            None => warn!("--bin given without --bin-out, discarding {} records", self.bin_chunks),
        }
        Ok(())
    }
}

impl AnnotationSink for CliSink {
    fn put(&mut self, region: Region) {
        if self.rows.contains(&region.row) {
            println!("{:>8} {:>12} {:>12}  {}", region.row.name(), region.start, region.end, region.label());
        }
    }

    fn put_binary(&mut self, chunk: BinaryChunk) {
        if Some(chunk.kind) == self.bin_kind {
            self.bin_data.extend_from_slice(&chunk.data);
            self.bin_chunks += 1;
        }
    }
}
