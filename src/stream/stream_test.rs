// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use num_complex::Complex;

use super::packet::{PacketHeader, FLAG_IGNORE_TIMESTAMP};
use super::*;
use crate::connection::fake_connection::FakeConnection;
use crate::connection::MockConnection;

const TIMEOUT: Duration = Duration::from_millis(500);

fn direct(is_tx: bool) -> StreamConfig {
    StreamConfig {
        fifo_size: 0,
        ..StreamConfig::new(is_tx, 0)
    }
}

#[test]
fn test_start_programs_fpga() {
    let (fake, conn) = FakeConnection::shared();
    let mut streamer = Streamer::new(conn);
    streamer
        .setup(StreamConfig {
            format: DataFormat::F32,
            ..direct(false)
        })
        .unwrap();
    streamer.start(false).unwrap();
    {
        let fake = fake.lock().unwrap();
        assert_eq!(fake.fpga[&0x0008] & 0x3, 2);
        assert_eq!(fake.fpga[&0x0007], 1);
        assert_eq!(fake.fpga[&0x0009], 0);
        assert_eq!(fake.fpga[&0x000A], 1);
        assert_eq!(fake.fifo_resets, 1);
    }
    streamer.stop(false).unwrap();
    assert_eq!(fake.lock().unwrap().fpga[&0x000A], 0);
}

#[test]
fn test_direct_rx_timestamps() {
    let (_fake, conn) = FakeConnection::shared();
    let mut streamer = Streamer::new(conn);
    streamer.setup(direct(false)).unwrap();
    streamer.start(false).unwrap();

    let mut buf = vec![Complex::new(0i16, 0i16); 2040];
    let mut meta = StreamMeta::default();
    assert_eq!(streamer.recv(&mut buf, &mut meta, TIMEOUT).unwrap(), 2040);
    assert_eq!(meta.timestamp, 0);
    assert_eq!(streamer.recv(&mut buf[..100], &mut meta, TIMEOUT).unwrap(), 100);
    assert_eq!(meta.timestamp, 2040);
    assert_eq!(streamer.recv(&mut buf[..100], &mut meta, TIMEOUT).unwrap(), 100);
    assert_eq!(meta.timestamp, 2140);
}

#[test]
fn test_rx_gap_counts_dropped_packet() {
    let (fake, conn) = FakeConnection::shared();
    fake.lock().unwrap().rx_gap_after = Some(1);
    let mut streamer = Streamer::new(conn);
    streamer.setup(direct(false)).unwrap();
    streamer.start(false).unwrap();
    let mut buf = vec![Complex::new(0i16, 0i16); 3 * 1020];
    let mut meta = StreamMeta::default();
    streamer.recv(&mut buf, &mut meta, TIMEOUT).unwrap();
    assert_eq!(streamer.status(false).unwrap().dropped_packets, 1);
}

#[test]
fn test_inactive_stream_rules() {
    let (_fake, conn) = FakeConnection::shared();
    let mut streamer = Streamer::new(conn);
    let mut meta = StreamMeta::default();
    let mut buf = [Complex::new(0i16, 0i16); 4];
    assert!(streamer.recv(&mut buf, &mut meta, TIMEOUT).is_err());
    // stopping something that never started is fine
    streamer.stop(true).unwrap();
    streamer.setup(direct(false)).unwrap();
    streamer.stop(false).unwrap();
    assert!(streamer.recv(&mut buf, &mut meta, TIMEOUT).is_err());
    assert!(!streamer.status(false).unwrap().active);
}

#[test]
fn test_fifo_rx_delivers_samples() {
    let (fake, conn) = FakeConnection::shared();
    fake.lock().unwrap().rx_fill = 0x01;
    let mut streamer = Streamer::new(conn);
    streamer
        .setup(StreamConfig {
            fifo_size: 1020 * 8,
            ..StreamConfig::new(false, 0)
        })
        .unwrap();
    streamer.start(false).unwrap();
    let mut buf = vec![Complex::new(0i16, 0i16); 1020];
    let mut meta = StreamMeta::default();
    assert_eq!(streamer.recv(&mut buf, &mut meta, Duration::from_secs(2)).unwrap(), 1020);
    assert_eq!(buf[0], Complex::new(0x0101, 0x0101));
    let status = streamer.status(false).unwrap();
    assert!(status.active);
    assert_eq!(status.fifo_size, 1020 * 8);
    streamer.stop(false).unwrap();
    assert!(!streamer.status(false).unwrap().active);
}

#[test]
fn test_direct_tx_holds_partial_packet() {
    let (fake, conn) = FakeConnection::shared();
    let mut streamer = Streamer::new(conn);
    streamer.setup(direct(true)).unwrap();
    streamer.start(true).unwrap();

    let samples = vec![Complex::new(100i16, -100i16); 1500];
    let meta = StreamMeta::default();
    assert_eq!(streamer.send(&samples, &meta, TIMEOUT).unwrap(), 1500);
    assert_eq!(fake.lock().unwrap().sent.len(), 1);

    let flush = StreamMeta {
        flush_partial_packet: true,
        ..StreamMeta::default()
    };
    assert_eq!(streamer.send(&[], &flush, TIMEOUT).unwrap(), 0);
    let fake = fake.lock().unwrap();
    assert_eq!(fake.sent.len(), 2);
    assert_eq!(fake.sent[0][0], FLAG_IGNORE_TIMESTAMP);
    assert_eq!(PacketHeader::decode(&fake.sent[1]).counter, 1020);
}

#[test]
fn test_tx_timestamp_flag() {
    let (fake, conn) = FakeConnection::shared();
    let mut streamer = Streamer::new(conn);
    streamer.setup(direct(true)).unwrap();
    streamer.start(true).unwrap();
    let meta = StreamMeta {
        timestamp: 5000,
        wait_for_timestamp: true,
        flush_partial_packet: true,
    };
    streamer.send(&[Complex::new(1i16, 1i16); 10], &meta, TIMEOUT).unwrap();
    let fake = fake.lock().unwrap();
    let header = PacketHeader::decode(&fake.sent[0]);
    assert_eq!(header.flags, 0);
    assert_eq!(header.counter, 5000);
}

#[test]
fn test_fifo_tx_reaches_board() {
    let (fake, conn) = FakeConnection::shared();
    let mut streamer = Streamer::new(conn);
    streamer.setup(StreamConfig::new(true, 0)).unwrap();
    streamer.start(true).unwrap();
    let samples = vec![Complex::new(7i16, 7i16); 2040];
    assert_eq!(
        streamer.send(&samples, &StreamMeta::default(), TIMEOUT).unwrap(),
        2040
    );
    let start = Instant::now();
    while fake.lock().unwrap().sent.len() < 2 && start.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(fake.lock().unwrap().sent.len(), 2);
    streamer.stop(true).unwrap();
}

#[test]
fn test_streams_share_channel_and_link() {
    let (_fake, conn) = FakeConnection::shared();
    let mut streamer = Streamer::new(conn);
    streamer.setup(direct(false)).unwrap();
    assert!(streamer
        .setup(StreamConfig {
            channel: 1,
            ..direct(true)
        })
        .is_err());
    assert!(streamer
        .setup(StreamConfig {
            format: DataFormat::I12,
            ..direct(true)
        })
        .is_err());
    streamer.setup(direct(true)).unwrap();
    assert!(streamer.is_setup(true));
}

#[test]
fn test_failed_enable_stops_worker() {
    let receives = Arc::new(AtomicUsize::new(0));
    let mut mock = MockConnection::new();
    mock.expect_read_fpga()
        .returning(|addrs| Ok(vec![0; addrs.len()]));
    mock.expect_write_fpga().returning(|regs| {
        if regs.iter().any(|(addr, _)| *addr == FPGA_STREAM_ENABLE) {
            Err(LimeError::io("enable write failed"))
        } else {
            Ok(())
        }
    });
    mock.expect_reset_stream_buffers().times(1).returning(|| Ok(()));
    let counter = receives.clone();
    mock.expect_receive_stream().returning(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        Err(LimeError::Usb(rusb::Error::Timeout))
    });
    let mut streamer = Streamer::new(Arc::new(Mutex::new(mock)));
    streamer.setup(StreamConfig::new(false, 0)).unwrap();

    assert_eq!(streamer.start(false).unwrap_err().code(), 5);
    let seen = receives.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(receives.load(Ordering::SeqCst), seen);

    let mut buf = vec![Complex::new(0i16, 0i16); 16];
    let mut meta = StreamMeta::default();
    assert_eq!(streamer.recv(&mut buf, &mut meta, TIMEOUT).unwrap_err().code(), 22);
}
