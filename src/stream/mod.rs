//! Sample streaming over the board's stream endpoints.
//!
//! A stream either transfers synchronously on the caller's thread (direct
//! mode, `fifo_size == 0`) or runs a worker thread that moves whole FPGA
//! packets through a bounded channel (FIFO mode).

pub mod packet;
#[cfg(test)]
mod stream_test;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use num_complex::Complex;

use crate::connection::{self, SharedConnection};
use crate::error::{LimeError, Result};
use packet::{
    encode_packet, unpack_samples, LinkFormat, PacketHeader, FLAG_IGNORE_TIMESTAMP, HEADER_SIZE,
    PACKET_SIZE,
};

const FPGA_CHANNEL_ENABLE: u16 = 0x0007;
const FPGA_SAMPLE_WIDTH: u16 = 0x0008;
const FPGA_COUNTER_RESET: u16 = 0x0009;
const FPGA_STREAM_ENABLE: u16 = 0x000A;

const WORKER_POLL: Duration = Duration::from_millis(100);

/// Default FIFO size in samples when a stream is started without setup.
pub const DEFAULT_FIFO_SIZE: usize = 1024 * 1024;

/// Sample format exchanged with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    F32 = 0,
    I16 = 1,
    I12 = 2,
}

impl DataFormat {
    pub fn from_raw(val: u32) -> Option<DataFormat> {
        match val {
            0 => Some(DataFormat::F32),
            1 => Some(DataFormat::I16),
            2 => Some(DataFormat::I12),
            _ => None,
        }
    }

    pub fn link(&self) -> LinkFormat {
        match self {
            DataFormat::I16 => LinkFormat::I16,
            _ => LinkFormat::I12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    pub is_tx: bool,
    pub channel: usize,
    /// FIFO size in samples; 0 selects direct mode.
    pub fifo_size: usize,
    pub throughput_vs_latency: f32,
    pub format: DataFormat,
}

impl StreamConfig {
    pub fn new(is_tx: bool, channel: usize) -> StreamConfig {
        StreamConfig {
            is_tx,
            channel,
            fifo_size: DEFAULT_FIFO_SIZE,
            throughput_vs_latency: 0.5,
            format: DataFormat::I16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamMeta {
    pub timestamp: u64,
    pub wait_for_timestamp: bool,
    pub flush_partial_packet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StreamStatus {
    pub active: bool,
    pub fifo_filled_count: u32,
    pub fifo_size: u32,
    pub underrun: u32,
    pub overrun: u32,
    pub dropped_packets: u32,
    pub sample_rate: f64,
    pub link_rate: f64,
    pub timestamp: u64,
}

#[derive(Default)]
struct Counters {
    underrun: AtomicU32,
    overrun: AtomicU32,
    dropped: AtomicU32,
    timestamp: AtomicU64,
    bytes: AtomicU64,
}

struct RxPacket {
    timestamp: u64,
    samples: Vec<Complex<i16>>,
}

enum Fifo {
    Rx(Receiver<RxPacket>),
    Tx(Sender<Vec<u8>>),
}

struct Stream {
    config: StreamConfig,
    link: LinkFormat,
    active: Arc<AtomicBool>,
    counters: Arc<Counters>,
    fifo: Option<Fifo>,
    worker: Option<JoinHandle<()>>,
    started: Option<Instant>,
    /// Samples received but not yet handed out, with the timestamp of the
    /// front sample.
    rx_pending: VecDeque<Complex<i16>>,
    rx_pending_ts: u64,
    last_counter: Option<u64>,
    /// TX samples waiting for a full packet.
    tx_pending: Vec<Complex<i16>>,
    tx_pending_ts: u64,
}

impl Stream {
    fn new(config: StreamConfig) -> Stream {
        Stream {
            config,
            link: config.format.link(),
            active: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            fifo: None,
            worker: None,
            started: None,
            rx_pending: VecDeque::new(),
            rx_pending_ts: 0,
            last_counter: None,
            tx_pending: Vec::new(),
            tx_pending_ts: 0,
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn capacity_packets(&self) -> usize {
        (self.config.fifo_size / self.link.samples_per_packet()).max(1)
    }

    fn spawn_worker(&mut self, conn: SharedConnection) -> Result<()> {
        let active = self.active.clone();
        let counters = self.counters.clone();
        let link = self.link;
        let capacity = self.capacity_packets();
        let name = if self.config.is_tx { "lime-tx" } else { "lime-rx" };
        let worker = if self.config.is_tx {
            let (tx, rx) = bounded(capacity);
            self.fifo = Some(Fifo::Tx(tx));
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || tx_worker(conn, rx, active, counters))?
        } else {
            let (tx, rx) = bounded(capacity);
            self.fifo = Some(Fifo::Rx(rx));
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || rx_worker(conn, tx, link, active, counters))?
        };
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_worker(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        // dropping the TX sender lets the worker drain and exit
        self.fifo = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Stream worker panicked");
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Track the RX sample counter and count gaps as dropped packets.
fn check_counter(last: &mut Option<u64>, counter: u64, spp: u64, counters: &Counters) {
    if let Some(prev) = *last {
        let expected = prev + spp;
        if counter != expected {
            let lost = (counter.saturating_sub(expected) / spp).max(1);
            counters.dropped.fetch_add(lost as u32, Ordering::Relaxed);
            debug!("RX timestamp gap: expected {}, got {}", expected, counter);
        }
    }
    *last = Some(counter);
}

fn rx_worker(
    conn: SharedConnection,
    fifo: Sender<RxPacket>,
    link: LinkFormat,
    active: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let mut buf = vec![0u8; PACKET_SIZE];
    let mut last = None;
    let spp = link.samples_per_packet() as u64;
    while active.load(Ordering::SeqCst) {
        let received = match connection::lock(&conn) {
            Ok(mut c) => c.receive_stream(&mut buf, WORKER_POLL),
            Err(e) => Err(e),
        };
        match received {
            Ok(n) if n >= PACKET_SIZE => {}
            Ok(_) | Err(LimeError::Usb(rusb::Error::Timeout)) => continue,
            Err(e) => {
                warn!("RX stream transfer failed: {}", e);
                thread::sleep(WORKER_POLL);
                continue;
            }
        }
        counters.bytes.fetch_add(PACKET_SIZE as u64, Ordering::Relaxed);
        let header = PacketHeader::decode(&buf);
        check_counter(&mut last, header.counter, spp, &counters);
        counters.timestamp.store(header.counter, Ordering::Relaxed);
        let mut samples = Vec::with_capacity(spp as usize);
        unpack_samples(&buf[HEADER_SIZE..], link, &mut samples);
        match fifo.try_send(RxPacket {
            timestamp: header.counter,
            samples,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counters.overrun.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    debug!("RX worker exiting");
}

fn tx_worker(
    conn: SharedConnection,
    fifo: Receiver<Vec<u8>>,
    active: Arc<AtomicBool>,
    counters: Arc<Counters>,
) {
    let mut sent_any = false;
    loop {
        let pkt = match fifo.recv_timeout(WORKER_POLL) {
            Ok(pkt) => pkt,
            Err(RecvTimeoutError::Timeout) => {
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                if sent_any {
                    counters.underrun.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if !active.load(Ordering::SeqCst) {
            break;
        }
        let result = match connection::lock(&conn) {
            Ok(mut c) => c.send_stream(&pkt, WORKER_POLL),
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => {
                sent_any = true;
                counters.bytes.fetch_add(pkt.len() as u64, Ordering::Relaxed);
                counters
                    .timestamp
                    .store(PacketHeader::decode(&pkt).counter, Ordering::Relaxed);
            }
            Err(e) => warn!("TX stream transfer failed: {}", e),
        }
    }
    debug!("TX worker exiting");
}

/// Owns at most one RX and one TX stream on a board's stream port.
pub struct Streamer {
    conn: SharedConnection,
    rx: Option<Stream>,
    tx: Option<Stream>,
    rx_rate: f64,
    tx_rate: f64,
}

impl Streamer {
    pub fn new(conn: SharedConnection) -> Streamer {
        Streamer {
            conn,
            rx: None,
            tx: None,
            rx_rate: 0.0,
            tx_rate: 0.0,
        }
    }

    /// Host sample rates reported in the stream status.
    pub fn set_sample_rates(&mut self, rx: f64, tx: f64) {
        self.rx_rate = rx;
        self.tx_rate = tx;
    }

    fn slot(&mut self, tx: bool) -> &mut Option<Stream> {
        if tx {
            &mut self.tx
        } else {
            &mut self.rx
        }
    }

    fn stream(&mut self, tx: bool) -> Result<&mut Stream> {
        self.slot(tx)
            .as_mut()
            .ok_or_else(|| LimeError::invalid("Stream is not set up."))
    }

    pub fn is_setup(&self, tx: bool) -> bool {
        if tx {
            self.tx.is_some()
        } else {
            self.rx.is_some()
        }
    }

    /// Configure the stream of `config.is_tx`, replacing any previous one.
    pub fn setup(&mut self, config: StreamConfig) -> Result<()> {
        let other = if config.is_tx { &self.rx } else { &self.tx };
        if let Some(other) = other {
            if other.config.channel != config.channel {
                return Err(LimeError::invalid(
                    "RX and TX streams must use the same channel.",
                ));
            }
            if other.link != config.format.link() {
                return Err(LimeError::invalid(
                    "RX and TX streams must use the same link format.",
                ));
            }
        }
        if let Some(mut old) = self.slot(config.is_tx).take() {
            self.stop_stream(&mut old)?;
        }
        debug!("Stream setup: {:?}", config);
        *self.slot(config.is_tx) = Some(Stream::new(config));
        Ok(())
    }

    pub fn destroy(&mut self, tx: bool) -> Result<()> {
        if let Some(mut old) = self.slot(tx).take() {
            self.stop_stream(&mut old)?;
        }
        Ok(())
    }

    fn modify_fpga(&self, addr: u16, f: impl FnOnce(u16) -> u16) -> Result<()> {
        let mut c = connection::lock(&self.conn)?;
        let val = c.read_fpga(&[addr])?.first().copied().unwrap_or(0);
        c.write_fpga(&[(addr, f(val))])
    }

    pub fn start(&mut self, tx: bool) -> Result<()> {
        let conn = self.conn.clone();
        let stream = self.stream(tx)?;
        if stream.is_active() {
            return Ok(());
        }
        let link = stream.link;
        let channel = stream.config.channel;
        let fifo_mode = stream.config.fifo_size > 0;
        {
            let mut c = connection::lock(&conn)?;
            let width = c.read_fpga(&[FPGA_SAMPLE_WIDTH])?.first().copied().unwrap_or(0);
            c.write_fpga(&[
                (FPGA_SAMPLE_WIDTH, (width & !0x3) | link.fpga_width()),
                (FPGA_CHANNEL_ENABLE, 1 << channel),
                (FPGA_COUNTER_RESET, 0x3),
                (FPGA_COUNTER_RESET, 0x0),
            ])?;
            c.reset_stream_buffers()?;
        }
        let stream = self.stream(tx)?;
        stream.rx_pending.clear();
        stream.tx_pending.clear();
        stream.last_counter = None;
        stream.active.store(true, Ordering::SeqCst);
        stream.started = Some(Instant::now());
        if fifo_mode {
            if let Err(e) = stream.spawn_worker(conn) {
                stream.stop_worker();
                return Err(e);
            }
        }
        let bit = if tx { 0x2 } else { 0x1 };
        if let Err(e) = self.modify_fpga(FPGA_STREAM_ENABLE, |v| v | bit) {
            warn!("Stream enable failed, stopping worker: {}", e);
            if let Ok(stream) = self.stream(tx) {
                stream.stop_worker();
            }
            return Err(e);
        }
        info!("{} stream started on channel {}", if tx { "TX" } else { "RX" }, channel);
        Ok(())
    }

    fn stop_stream(&self, stream: &mut Stream) -> Result<()> {
        if !stream.is_active() {
            return Ok(());
        }
        let bit = if stream.config.is_tx { 0x2 } else { 0x1 };
        stream.stop_worker();
        self.modify_fpga(FPGA_STREAM_ENABLE, |v| v & !bit)?;
        info!("{} stream stopped", if stream.config.is_tx { "TX" } else { "RX" });
        Ok(())
    }

    /// Stopping an inactive or missing stream is a no-op.
    pub fn stop(&mut self, tx: bool) -> Result<()> {
        match self.slot(tx).take() {
            Some(mut stream) => {
                let result = self.stop_stream(&mut stream);
                *self.slot(tx) = Some(stream);
                result
            }
            None => Ok(()),
        }
    }

    pub fn link_format(&self, tx: bool) -> Option<LinkFormat> {
        let stream = if tx { &self.tx } else { &self.rx };
        stream.as_ref().map(|s| s.link)
    }

    pub fn data_format(&self, tx: bool) -> Option<DataFormat> {
        let stream = if tx { &self.tx } else { &self.rx };
        stream.as_ref().map(|s| s.config.format)
    }

    /// Receive raw link samples. Returns the number written, which is less
    /// than requested only when the timeout expires.
    pub fn recv(
        &mut self,
        samples: &mut [Complex<i16>],
        meta: &mut StreamMeta,
        timeout: Duration,
    ) -> Result<usize> {
        let conn = self.conn.clone();
        let stream = self.stream(false)?;
        if !stream.is_active() {
            return Err(LimeError::invalid("Stream is not active."));
        }
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        let mut first_ts = None;
        while filled < samples.len() {
            if stream.rx_pending.is_empty() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let Some(pkt) = fetch_rx_packet(stream, &conn, remaining)? else {
                    break;
                };
                stream.rx_pending.extend(pkt.samples);
                stream.rx_pending_ts = pkt.timestamp;
            }
            first_ts.get_or_insert(stream.rx_pending_ts);
            let take = (samples.len() - filled).min(stream.rx_pending.len());
            for (dst, src) in samples[filled..filled + take]
                .iter_mut()
                .zip(stream.rx_pending.drain(..take))
            {
                *dst = src;
            }
            stream.rx_pending_ts += take as u64;
            filled += take;
        }
        meta.timestamp = first_ts.unwrap_or(stream.rx_pending_ts);
        Ok(filled)
    }

    /// Queue raw link samples for transmission. A trailing partial packet is
    /// held back unless `flush_partial_packet` is set.
    pub fn send(
        &mut self,
        samples: &[Complex<i16>],
        meta: &StreamMeta,
        timeout: Duration,
    ) -> Result<usize> {
        let conn = self.conn.clone();
        let stream = self.stream(true)?;
        if !stream.is_active() {
            return Err(LimeError::invalid("Stream is not active."));
        }
        let spp = stream.link.samples_per_packet();
        let flags = if meta.wait_for_timestamp {
            0
        } else {
            FLAG_IGNORE_TIMESTAMP
        };
        if stream.tx_pending.is_empty() {
            stream.tx_pending_ts = meta.timestamp;
        }
        let deadline = Instant::now() + timeout;
        let mut accepted = 0;
        for chunk in samples.chunks(spp) {
            let room = spp - stream.tx_pending.len();
            let take = room.min(chunk.len());
            stream.tx_pending.extend_from_slice(&chunk[..take]);
            accepted += take;
            if stream.tx_pending.len() == spp {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !push_tx_packet(stream, &conn, flags, remaining)? {
                    accepted -= take;
                    stream.tx_pending.truncate(stream.tx_pending.len() - take);
                    return Ok(accepted);
                }
                stream.tx_pending.extend_from_slice(&chunk[take..]);
                accepted += chunk.len() - take;
            }
        }
        if meta.flush_partial_packet && !stream.tx_pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            push_tx_packet(stream, &conn, flags, remaining)?;
        }
        Ok(accepted)
    }

    pub fn status(&self, tx: bool) -> Result<StreamStatus> {
        let stream = if tx { &self.tx } else { &self.rx };
        let stream = stream
            .as_ref()
            .ok_or_else(|| LimeError::invalid("Stream is not set up."))?;
        let spp = stream.link.samples_per_packet();
        let (queued, fifo_size) = match &stream.fifo {
            Some(Fifo::Rx(rx)) => (rx.len() * spp + stream.rx_pending.len(), stream.capacity_packets() * spp),
            Some(Fifo::Tx(tx)) => (tx.len() * spp + stream.tx_pending.len(), stream.capacity_packets() * spp),
            None => (stream.rx_pending.len() + stream.tx_pending.len(), 0),
        };
        let bytes = stream.counters.bytes.load(Ordering::Relaxed) as f64;
        let link_rate = match stream.started {
            Some(t) if t.elapsed().as_secs_f64() > 0.0 => bytes / t.elapsed().as_secs_f64(),
            _ => 0.0,
        };
        Ok(StreamStatus {
            active: stream.is_active(),
            fifo_filled_count: queued as u32,
            fifo_size: fifo_size as u32,
            underrun: stream.counters.underrun.load(Ordering::Relaxed),
            overrun: stream.counters.overrun.load(Ordering::Relaxed),
            dropped_packets: stream.counters.dropped.load(Ordering::Relaxed),
            sample_rate: if tx { self.tx_rate } else { self.rx_rate },
            link_rate,
            timestamp: stream.counters.timestamp.load(Ordering::Relaxed),
        })
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        for tx in [false, true] {
            if let Err(e) = self.stop(tx) {
                warn!("Failed to stop stream: {}", e);
            }
        }
    }
}

/// Next RX packet, or `None` when the timeout passes first.
fn fetch_rx_packet(
    stream: &mut Stream,
    conn: &SharedConnection,
    timeout: Duration,
) -> Result<Option<RxPacket>> {
    if let Some(Fifo::Rx(rx)) = &stream.fifo {
        return match rx.recv_timeout(timeout) {
            Ok(pkt) => Ok(Some(pkt)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LimeError::io("RX worker stopped")),
        };
    }
    let mut buf = vec![0u8; PACKET_SIZE];
    let received = connection::lock(conn)?.receive_stream(&mut buf, timeout);
    match received {
        Ok(n) if n >= PACKET_SIZE => {}
        Ok(_) | Err(LimeError::Usb(rusb::Error::Timeout)) => return Ok(None),
        Err(e) => return Err(e),
    }
    stream.counters.bytes.fetch_add(PACKET_SIZE as u64, Ordering::Relaxed);
    let header = PacketHeader::decode(&buf);
    let spp = stream.link.samples_per_packet() as u64;
    check_counter(&mut stream.last_counter, header.counter, spp, &stream.counters);
    stream.counters.timestamp.store(header.counter, Ordering::Relaxed);
    let mut samples = Vec::with_capacity(spp as usize);
    unpack_samples(&buf[HEADER_SIZE..], stream.link, &mut samples);
    Ok(Some(RxPacket {
        timestamp: header.counter,
        samples,
    }))
}

/// Encode the pending TX samples and hand them on. Returns `false` if the
/// FIFO stayed full for the whole timeout.
fn push_tx_packet(
    stream: &mut Stream,
    conn: &SharedConnection,
    flags: u8,
    timeout: Duration,
) -> Result<bool> {
    let header = PacketHeader {
        flags,
        counter: stream.tx_pending_ts,
    };
    let pkt = encode_packet(header, &stream.tx_pending, stream.link);
    match &stream.fifo {
        Some(Fifo::Tx(tx)) => match tx.send_timeout(pkt, timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => return Ok(false),
            Err(SendTimeoutError::Disconnected(_)) => return Err(LimeError::io("TX worker stopped")),
        },
        _ => {
            connection::lock(conn)?.send_stream(&pkt, timeout)?;
            stream.counters.bytes.fetch_add(pkt.len() as u64, Ordering::Relaxed);
            stream.counters.timestamp.store(header.counter, Ordering::Relaxed);
        }
    }
    stream.tx_pending_ts += stream.tx_pending.len() as u64;
    stream.tx_pending.clear();
    Ok(true)
}
