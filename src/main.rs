// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// LimeSDR utility.
///
/// - `lms_util list`: print every board that can be opened.
/// - `lms_util info [-d <info>]`: open a board and print its versions.
/// - `lms_util rx -f <Hz> -s <rate> -n <samples> -o <file> [-d <info>]`:
///   receive interleaved little-endian int16 I/Q into a file. Ctrl-C stops
///   the capture early.
///
/// Repeat `-v` to raise log verbosity.
use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use log::{info, warn};
use num_complex::Complex;

use limesuite_rs::{device_list, DataFormat, LimeSdr, Result, StreamConfig, StreamMeta};

const DEFAULT_FREQUENCY: f64 = 100e6;
const DEFAULT_SAMPLE_RATE: f64 = 5e6;
const DEFAULT_SAMPLES: usize = 1_000_000;
const DEFAULT_GAIN: f64 = 0.7;
const BLOCK_SIZE: usize = 16 * 1024;
const RX_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, PartialEq)]
enum Command {
    List,
    Info,
    Rx,
}

struct Options {
    command: Command,
    device: Option<String>,
    frequency: f64,
    sample_rate: f64,
    samples: usize,
    output: Option<String>,
    verbosity: usize,
}

fn usage() -> ! {
    eprintln!("Usage: lms_util <list|info|rx> [-d info] [-f Hz] [-s rate] [-n samples] [-o file] [-v]");
    process::exit(1);
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> T {
    match value.map(|v| v.parse::<T>()) {
        Some(Ok(v)) => v,
        _ => {
            eprintln!("Error: {} needs a valid value.", flag);
            usage();
        }
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut args_iter = args.iter();
    let command = match args_iter.next().map(String::as_str) {
        Some("list") => Command::List,
        Some("info") => Command::Info,
        Some("rx") => Command::Rx,
        _ => usage(),
    };
    let mut opts = Options {
        command,
        device: None,
        frequency: DEFAULT_FREQUENCY,
        sample_rate: DEFAULT_SAMPLE_RATE,
        samples: DEFAULT_SAMPLES,
        output: None,
        verbosity: 1,
    };
    while let Some(arg) = args_iter.next() {
        match arg.as_str() {
            "--device" | "-d" => opts.device = Some(parse_value(arg, args_iter.next())),
            "--freq" | "-f" => opts.frequency = parse_value(arg, args_iter.next()),
            "--rate" | "-s" => opts.sample_rate = parse_value(arg, args_iter.next()),
            "--samples" | "-n" => opts.samples = parse_value(arg, args_iter.next()),
            "--output" | "-o" => opts.output = Some(parse_value(arg, args_iter.next())),
            "-v" => opts.verbosity += 1,
            other => {
                eprintln!("Unknown argument: '{}'.", other);
                usage();
            }
        }
    }
    opts
}

fn main() {
    let opts = parse_args();
    if let Err(e) = stderrlog::new().verbosity(opts.verbosity).init() {
        eprintln!("Logger setup failed: {}", e);
    }
    let result = match opts.command {
        Command::List => list(),
        Command::Info => print_info(&opts),
        Command::Rx => receive(&opts),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn list() -> Result<()> {
    let devices = device_list()?;
    if devices.is_empty() {
        eprintln!("No supported devices found.");
        return Ok(());
    }
    println!("Found {} device(s):", devices.len());
    for (i, dev) in devices.iter().enumerate() {
        println!("  {}:  {}", i, dev);
    }
    Ok(())
}

fn print_info(opts: &Options) -> Result<()> {
    let sdr = LimeSdr::open(opts.device.as_deref())?;
    let info = sdr.device_info()?;
    println!("Device:     {}", info.device_name);
    println!("Expansion:  {}", info.expansion_name);
    println!("Firmware:   {}", info.firmware_version);
    println!("Hardware:   {}", info.hardware_version);
    println!("Protocol:   {}", info.protocol_version);
    println!("Serial:     0x{:016X}", info.board_serial_number);
    println!("Channels:   {}", sdr.num_channels(false));
    let range = sdr.sample_rate_range(false);
    println!("Rate range: {:.0} - {:.0} S/s", range.min, range.max);
    Ok(())
}

fn receive(opts: &Options) -> Result<()> {
    let Some(path) = opts.output.as_deref() else {
        eprintln!("Error: rx needs -o <file>.");
        usage();
    };
    let mut sdr = LimeSdr::open(opts.device.as_deref())?;
    sdr.init()?;
    sdr.enable_channel(false, 0, true)?;
    sdr.set_sample_rate(opts.sample_rate, 0)?;
    sdr.set_lo_frequency(false, 0, opts.frequency)?;
    sdr.set_normalized_gain(false, 0, DEFAULT_GAIN)?;
    let (host, _) = sdr.sample_rate(false, 0)?;
    println!("Tuned to {} Hz, sampling at {} S/s.", opts.frequency, host);

    sdr.setup_stream(StreamConfig {
        format: DataFormat::I16,
        ..StreamConfig::new(false, 0)
    })?;
    sdr.start_stream(false)?;

    static SHUTDOWN: AtomicBool = AtomicBool::new(false);
    if let Err(e) = ctrlc::set_handler(|| SHUTDOWN.store(true, Ordering::Relaxed)) {
        warn!("Ctrl-C handler not installed: {}", e);
    }

    let mut out = BufWriter::new(File::create(path)?);
    let mut buf = vec![Complex::new(0i16, 0i16); BLOCK_SIZE];
    let mut meta = StreamMeta::default();
    let mut total = 0;
    while total < opts.samples && !SHUTDOWN.load(Ordering::Relaxed) {
        let want = BLOCK_SIZE.min(opts.samples - total);
        let n = sdr.recv_stream(&mut buf[..want], &mut meta, RX_TIMEOUT)?;
        for s in &buf[..n] {
            out.write_i16::<LittleEndian>(s.re)?;
            out.write_i16::<LittleEndian>(s.im)?;
        }
        total += n;
    }
    out.flush()?;
    let status = sdr.stream_status(false)?;
    info!(
        "Overruns {}, dropped packets {}",
        status.overrun, status.dropped_packets
    );
    sdr.stop_stream(false)?;
    println!("Wrote {} samples to {}.", total, path);
    Ok(())
}
