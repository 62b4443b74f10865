// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use num_complex::Complex;

use super::*;
use crate::connection::fake_connection::FakeConnection;
use crate::connection::McuProgMode;
use crate::lms7002m::params::*;
use crate::lms7002m::{GfirFilter, TestSignal};
use crate::stream::packet::HEADER_SIZE;
use crate::stream::DataFormat;

const TIMEOUT: Duration = Duration::from_millis(500);
// MCU mailbox register that receives the procedure id
const MCU_P0: u16 = 0x0000;

fn device() -> (Arc<Mutex<FakeConnection>>, Lms7Device) {
    let (fake, conn) = FakeConnection::shared();
    let dev = Lms7Device::with_connection(conn).unwrap();
    (fake, dev)
}

fn device_named(name: &str) -> (Arc<Mutex<FakeConnection>>, Lms7Device) {
    let (fake, conn) = FakeConnection::shared();
    fake.lock().unwrap().info.device_name = name.to_string();
    let dev = Lms7Device::with_connection(conn).unwrap();
    (fake, dev)
}

fn field(fake: &Arc<Mutex<FakeConnection>>, ch: usize, param: &Parameter) -> u16 {
    param.get(fake.lock().unwrap().channel_reg(ch, param.address))
}

fn mcu_procedures(fake: &Arc<Mutex<FakeConnection>>) -> Vec<u16> {
    fake.lock()
        .unwrap()
        .lms_writes
        .iter()
        .filter(|(addr, _)| *addr == MCU_P0)
        .map(|(_, val)| *val)
        .collect()
}

#[test]
fn test_board_kind_sets_channel_count() {
    let (_fake, dev) = device();
    assert_eq!(dev.board_kind(), BoardKind::LimeSdrUsb);
    assert_eq!(dev.num_channels(false), 2);

    let (_fake, mut mini) = device_named("LimeSDR-Mini");
    assert_eq!(mini.num_channels(true), 1);
    let err = mini.enable_channel(true, 1, true).unwrap_err();
    assert_eq!(err.code(), 22);
    assert_eq!(err.to_string(), "Invalid channel number.");
}

#[test]
fn test_enable_channel_touches_only_its_channel() {
    let (fake, mut dev) = device();
    dev.enable_channel(true, 1, false).unwrap();
    assert_eq!(field(&fake, 1, &EN_G_TRF), 0);
    assert_eq!(field(&fake, 1, &EN_TXTSP), 0);
    assert_eq!(field(&fake, 0, &EN_G_TRF), 1);
    dev.enable_channel(false, 0, false).unwrap();
    assert_eq!(field(&fake, 0, &EN_G_RBB), 0);
    assert_eq!(field(&fake, 0, &EN_RXTSP), 0);
}

#[test]
fn test_sample_rate_picks_largest_ratio() {
    let (fake, mut dev) = device();
    dev.set_sample_rate(10e6, 0).unwrap();
    assert_eq!(field(&fake, 0, &HBD_OVR_RXTSP), 3);
    assert_eq!(field(&fake, 1, &HBI_OVR_TXTSP), 3);
    let (host, rf) = dev.sample_rate(false, 0).unwrap();
    assert!((host - 10e6).abs() < 1e3);
    assert!((rf - 160e6).abs() < 1e4);
    let (tx, rx) = fake.lock().unwrap().rates;
    assert!((tx - 10e6).abs() < 1e3);
    assert!((rx - 10e6).abs() < 1e3);
}

#[test]
fn test_sample_rate_programs_interface_plls() {
    let (fake, mut dev) = device();
    dev.set_sample_rate(10e6, 0).unwrap();
    let (host, _) = dev.sample_rate(false, 0).unwrap();
    let fake = fake.lock().unwrap();
    assert_eq!(fake.fpga[&0x0005] & 0x3, 0);
    let m_word = fake.fpga[&0x0027];
    let m = (m_word >> 8) + (m_word & 0xFF);
    let vco = 2.0 * host * m as f64;
    assert!((600e6..=1300e6).contains(&vco), "vco {}", vco);
    assert_eq!(fake.fpga[&0x002E], m_word);
    assert_eq!(fake.fpga[&0x002F], m_word);
    // both PLLs were started, RX last
    let starts: Vec<u16> = fake
        .fpga_writes
        .iter()
        .filter(|(a, v)| *a == 0x0023 && v & 0x1 != 0)
        .map(|(_, v)| (v >> 3) & 0x1F)
        .collect();
    assert_eq!(starts, vec![0, 1]);
    // 90 degree shift on the second output: two steps per C count
    assert_eq!(fake.fpga[&0x0024], 2 * m);
}

#[test]
fn test_sample_rate_fails_when_fpga_pll_fails() {
    let (fake, mut dev) = device();
    fake.lock().unwrap().fpga_pll_error = true;
    assert_eq!(dev.set_sample_rate(10e6, 0).unwrap_err().code(), 5);
}

#[test]
fn test_sample_rate_oversample_overrides() {
    let (fake, mut dev) = device();
    dev.set_sample_rate(5e6, 1).unwrap();
    assert_eq!(field(&fake, 0, &HBD_OVR_RXTSP), 7);
    let (host, rf) = dev.sample_rate(true, 0).unwrap();
    assert!((host - rf).abs() < 1e-6);
    assert!((host - 5e6).abs() < 1e3);

    dev.set_sample_rate(5e6, 3).unwrap();
    assert_eq!(field(&fake, 0, &HBD_OVR_RXTSP), 1);
    assert!(dev.set_sample_rate(0.0, 0).is_err());
}

#[test]
fn test_sample_rate_dir_keeps_other_ratio() {
    let (fake, mut dev) = device();
    dev.set_sample_rate(10e6, 4).unwrap();
    dev.set_sample_rate_dir(true, 10e6, 2).unwrap();
    assert_eq!(field(&fake, 0, &HBI_OVR_TXTSP), 0);
    assert_eq!(field(&fake, 0, &HBD_OVR_RXTSP), 1);
    let (rx, _) = dev.sample_rate(false, 0).unwrap();
    assert!((rx - 5e6).abs() < 1e3);
}

#[test]
fn test_qlime_tracks_dac_rate_separately() {
    let (_fake, mut dev) = device_named("qLimeSDR");
    assert_eq!(dev.board_kind(), BoardKind::QLimeSdr);
    dev.set_sample_rate(10e6, 4).unwrap();
    dev.set_sample_rate_dir(true, 5e6, 2).unwrap();
    let (tx, tx_rf) = dev.sample_rate(true, 0).unwrap();
    assert!((tx - 5e6).abs() < 1e-6);
    assert!((tx_rf - 10e6).abs() < 1e-6);
    let (rx, _) = dev.sample_rate(false, 0).unwrap();
    assert!((rx - 10e6).abs() < 1e3);
}

#[test]
fn test_sample_rate_range_per_board() {
    let (_fake, dev) = device();
    assert_eq!(dev.sample_rate_range(false).max, 61.44e6);
    let (_fake, mini) = device_named("LimeSDR-Mini");
    assert_eq!(mini.sample_rate_range(true).max, 30.72e6);
}

#[test]
fn test_clock_rules() {
    let (fake, mut dev) = device();
    assert_eq!(
        dev.set_clock_freq(ClockId::RxTsp, 1e6).unwrap_err().code(),
        95
    );
    assert_eq!(dev.set_clock_freq(ClockId::Ref, -1.0).unwrap_err().code(), 22);
    dev.set_clock_freq(ClockId::Ref, 40e6).unwrap();
    assert_eq!(dev.clock_freq(ClockId::Ref).unwrap(), 40e6);
    dev.set_clock_freq(ClockId::Ref, 30.72e6).unwrap();

    dev.set_clock_freq(ClockId::Cgen, 400e6).unwrap();
    assert!((dev.clock_freq(ClockId::Cgen).unwrap() - 400e6).abs() < 1e3);
    let rx_tsp = dev.clock_freq(ClockId::RxTsp).unwrap();
    let (_, rx) = fake.lock().unwrap().rates;
    let (host, _) = dev.sample_rate(false, 0).unwrap();
    assert!((rx - host).abs() < 1e-6);
    assert!(host < rx_tsp);

    // re-tune at the current setting
    dev.set_clock_freq(ClockId::Sxr, 0.0).unwrap();
    assert!(ClockId::from_raw(6).is_none());
}

#[test]
fn test_reference_clock_range() {
    let (_fake, mut dev) = device();
    assert_eq!(dev.set_reference_clock(4e9).unwrap_err().code(), 22);
    assert_eq!(dev.set_reference_clock(1e3).unwrap_err().code(), 22);
    assert_eq!(dev.reference_clock(), 30.72e6);
    dev.set_lo_frequency(false, 0, 1e9).unwrap();
    dev.set_sample_rate(10e6, 0).unwrap();
}

#[test]
fn test_vco_ranges() {
    let (_fake, mut dev) = device();
    assert!(dev.vco_range(4).is_err());
    let range = Range::new(1900e6, 3000e6, 0.0);
    dev.set_vco_range(3, range).unwrap();
    assert_eq!(dev.vco_range(3).unwrap(), range);
    assert_eq!(dev.vco_range(0).unwrap().min, 3800e6);
}

#[test]
fn test_vctcxo_upper_half_round_trips() {
    let (_fake, mut dev) = device();
    for val in [32768u16, 40001, 65531, u16::MAX] {
        dev.vctcxo_write(val).unwrap();
        assert_eq!(dev.vctcxo_read().unwrap(), val);
    }
}

#[test]
fn test_vctcxo_and_board_params() {
    let (fake, mut dev) = device();
    dev.vctcxo_write(125).unwrap();
    assert_eq!(fake.lock().unwrap().custom[&0].value, 125.0);
    assert_eq!(dev.vctcxo_read().unwrap(), 125);

    dev.write_custom_board_param(1, 25.5, "C").unwrap();
    let (value, units) = dev.read_custom_board_param(1).unwrap();
    assert!((value - 25.5).abs() < 1e-9);
    assert_eq!(units, "C");
}

#[test]
fn test_lo_frequency() {
    let (_fake, mut dev) = device();
    assert!(dev.set_lo_frequency(false, 0, 10e6).is_err());
    assert!(dev.set_lo_frequency(false, 2, 1e9).is_err());
    dev.set_lo_frequency(false, 0, 1e9).unwrap();
    assert!((dev.lo_frequency(false, 1).unwrap() - 1e9).abs() < 100.0);
    assert_eq!(dev.lo_frequency_range(true).max, 3.8e9);
}

#[test]
fn test_antenna_selection() {
    let (fake, mut dev) = device();
    assert_eq!(dev.antenna_list(false, 0).unwrap().len(), 6);
    assert_eq!(dev.antenna_list(true, 0).unwrap(), &TX_ANTENNAS);

    dev.set_antenna(false, 1, 4).unwrap();
    assert_eq!(field(&fake, 1, &SEL_PATH_RFE), 3);
    assert_eq!(field(&fake, 1, &EN_INSHSW_LB1_RFE), 0);
    assert_eq!(dev.antenna(false, 1).unwrap(), 4);
    assert_eq!(dev.antenna(false, 0).unwrap(), 1);

    dev.set_antenna(true, 0, 2).unwrap();
    assert_eq!(field(&fake, 0, &SEL_BAND1_TRF), 0);
    assert_eq!(field(&fake, 0, &SEL_BAND2_TRF), 1);
    assert_eq!(dev.antenna(true, 0).unwrap(), 2);

    assert!(dev.set_antenna(false, 0, 6).is_err());
    assert!(dev.set_antenna(true, 0, 3).is_err());
    let bw = dev.antenna_bw(false, 0, 2).unwrap();
    assert_eq!((bw.min, bw.max), (0.7e9, 0.9e9));
    assert!(dev.antenna_bw(true, 0, 3).is_err());
}

#[test]
fn test_lpf_bandwidth_runs_mcu_tuning() {
    let (fake, mut dev) = device();
    assert!(dev.set_lpf_bw(false, 0, 1e6).is_err());
    dev.set_lpf_bw(false, 0, 10e6).unwrap();
    assert_eq!(dev.lpf_bw(false, 0).unwrap(), 10e6);
    assert_eq!(dev.bandwidth(false, 0).unwrap(), 10e6);
    assert_eq!(field(&fake, 0, &PD_LPFL_RBB), 0);
    assert_eq!(field(&fake, 0, &INPUT_CTL_PGA_RBB), 0);
    assert_eq!(mcu_procedures(&fake).last(), Some(&6));

    dev.set_lpf(false, 0, false).unwrap();
    assert_eq!(field(&fake, 0, &INPUT_CTL_PGA_RBB), 2);
    assert_eq!(dev.bandwidth_range(true).min, 5e6);
}

#[test]
fn test_tune_filter_dispatches_each_kind() {
    let (fake, mut dev) = device();
    assert!(dev.tune_filter(0, FilterKind::TxLowChain, &[5e6]).is_err());
    dev.tune_filter(0, FilterKind::TxLowChain, &[5e6, 6e6]).unwrap();
    assert_eq!(field(&fake, 0, &PD_LPFLAD_TBB), 0);
    assert_eq!(field(&fake, 0, &PD_LPFS5_TBB), 0);
    assert_eq!(field(&fake, 0, &PD_LPFH_TBB), 1);

    dev.tune_filter(1, FilterKind::RxLpfHighband, &[40e6]).unwrap();
    assert_eq!(field(&fake, 1, &PD_LPFH_RBB), 0);
    assert_eq!(field(&fake, 1, &INPUT_CTL_PGA_RBB), 1);
    assert_eq!(mcu_procedures(&fake).last(), Some(&6));
    assert!(FilterKind::from_raw(7).is_none());
}

#[test]
fn test_rx_gain_fills_lna_then_tia_then_pga() {
    let (fake, mut dev) = device();
    dev.set_normalized_gain(false, 0, 1.0).unwrap();
    assert_eq!(field(&fake, 0, &G_LNA_RFE), 15);
    assert_eq!(field(&fake, 0, &G_TIA_RFE), 3);
    assert_eq!(field(&fake, 0, &G_PGA_RBB), 31);
    assert_eq!(dev.normalized_gain(false, 0).unwrap(), 1.0);

    dev.set_normalized_gain(false, 0, -3.0).unwrap();
    assert_eq!(field(&fake, 0, &G_LNA_RFE), 1);
    assert_eq!(field(&fake, 0, &G_TIA_RFE), 1);
    assert_eq!(field(&fake, 0, &G_PGA_RBB), 0);
    assert_eq!(dev.normalized_gain(false, 0).unwrap(), 0.0);

    // 40 dB above the floor: LNA 30 + TIA 9 + PGA 1
    dev.set_normalized_gain(false, 1, 40.0 / 73.0).unwrap();
    assert_eq!(field(&fake, 1, &G_LNA_RFE), 15);
    assert_eq!(field(&fake, 1, &G_TIA_RFE), 2);
    assert_eq!(field(&fake, 1, &G_PGA_RBB), 1);
}

#[test]
fn test_tx_gain_sets_pad_loss() {
    let (fake, mut dev) = device();
    dev.set_normalized_gain(true, 0, 0.5).unwrap();
    assert_eq!(field(&fake, 0, &LOSS_MAIN_TXPAD_TRF), 16);
    assert_eq!(field(&fake, 0, &LOSS_LIN_TXPAD_TRF), 16);
    let g = dev.normalized_gain(true, 0).unwrap();
    assert!((g - 15.0 / 31.0).abs() < 1e-9);
}

#[test]
fn test_calibrate_selects_procedure() {
    let (fake, mut dev) = device();
    dev.calibrate(true, 0, 10e6, 0).unwrap();
    assert_eq!(mcu_procedures(&fake).last(), Some(&1));
    dev.calibrate(false, 1, 10e6, 1).unwrap();
    assert_eq!(mcu_procedures(&fake).last(), Some(&18));

    fake.lock().unwrap().mcu_result = 3;
    assert!(dev.calibrate(false, 0, 10e6, 0).is_err());
}

#[test]
fn test_gfir_lpf_designs_gfir3() {
    let (fake, mut dev) = device();
    dev.set_sample_rate(10e6, 0).unwrap();
    dev.set_gfir_lpf(false, 0, true, 2e6).unwrap();
    assert_eq!(field(&fake, 0, &GFIR3_L_RXTSP), 7);
    assert_eq!(field(&fake, 0, &GFIR3_N_RXTSP), 15);
    assert_eq!(field(&fake, 0, &GFIR3_BYP_RXTSP), 0);
    let coef = dev.gfir_coeff(false, 0, GfirFilter::Gfir3).unwrap();
    assert!(coef.iter().take(120).any(|c| *c != 0.0));

    assert!(dev.set_gfir_lpf(false, 0, true, 30e6).is_err());
    dev.set_gfir_lpf(false, 0, false, 0.0).unwrap();
    assert_eq!(field(&fake, 0, &GFIR3_BYP_RXTSP), 1);
}

#[test]
fn test_tsp_wrappers_use_channel() {
    let (fake, mut dev) = device();
    dev.set_test_signal(true, 1, TestSignal::NcoDiv4, 0, 0).unwrap();
    assert_eq!(dev.test_signal(true, 1).unwrap(), TestSignal::NcoDiv4);
    assert_eq!(dev.test_signal(true, 0).unwrap(), TestSignal::None);
    assert_eq!(field(&fake, 1, &INSEL_TXTSP), 1);

    dev.set_gfir(false, 1, GfirFilter::Gfir1, true).unwrap();
    assert_eq!(field(&fake, 1, &GFIR1_BYP_RXTSP), 0);
    assert_eq!(field(&fake, 0, &GFIR1_BYP_RXTSP), 1);
}

#[test]
fn test_raw_register_access() {
    let (fake, mut dev) = device();
    assert!(dev.write_lms_reg(0x1_0000, 0).is_err());
    dev.write_lms_reg(0x0113, 0x0123).unwrap();
    assert_eq!(dev.read_lms_reg(0x0113).unwrap(), 0x0123);

    dev.write_fpga_reg(0x0003, 5).unwrap();
    assert_eq!(dev.read_fpga_reg(0x0003).unwrap(), 5);
    assert_eq!(fake.lock().unwrap().fpga[&0x0003], 5);

    dev.write_param(&G_TIA_RFE, 2).unwrap();
    assert_eq!(dev.read_param(&G_TIA_RFE).unwrap(), 2);
    assert!(dev.read_param(&Parameter::new(0x0100, 3, 5)).is_err());
    dev.register_test().unwrap();
}

#[test]
fn test_gpio_and_data_log() {
    let (_fake, mut dev) = device();
    dev.gpio_write(&[0x5A, 0x01]).unwrap();
    assert_eq!(dev.gpio_read(2).unwrap(), vec![0x5A, 0x01]);

    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    dev.set_data_log_callback(Some(Box::new(move |sent, _| {
        if sent {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    })))
    .unwrap();
    dev.write_lms_reg(0x0113, 0).unwrap();
    assert!(count.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_init_and_reset() {
    let (fake, mut dev) = device();
    dev.set_reference_clock(40e6).unwrap();
    dev.init().unwrap();
    assert_eq!(fake.lock().unwrap().chip_resets, 1);
    assert_eq!(dev.reference_clock(), 30.72e6);
    dev.reset().unwrap();
    assert_eq!(fake.lock().unwrap().chip_resets, 2);
    dev.synchronize(true).unwrap();
    dev.synchronize(false).unwrap();
}

#[test]
fn test_disconnect_drops_connection() {
    let (_fake, mut dev) = device();
    assert!(dev.is_open(0));
    assert!(dev.is_open(1));
    assert!(!dev.is_open(2));
    dev.disconnect();
    assert!(!dev.is_open(0));
    assert_eq!(dev.read_fpga_reg(0).unwrap_err().code(), 107);
    assert_eq!(dev.connect().unwrap_err().code(), 19);
}

#[test]
fn test_board_calls_lock_and_release_connection() {
    let (fake, mut dev) = device();
    assert_eq!(dev.device_info().unwrap().board_serial_number, 0x1234);
    dev.vctcxo_write(128).unwrap();
    dev.write_fpga_reg(0x0003, 7).unwrap();
    dev.gpio_write(&[0x0F]).unwrap();
    assert_eq!(dev.gpio_read(1).unwrap(), vec![0x0F]);
    dev.program_lms_mcu(&[1], ProgramTarget::Ram, None).unwrap();
    // every guard was dropped on return
    assert!(fake.try_lock().is_ok());

    dev.disconnect();
    assert_eq!(dev.device_info().unwrap_err().code(), 107);
    assert_eq!(dev.vctcxo_write(128).unwrap_err().code(), 107);
    assert_eq!(dev.write_fpga_reg(0x0003, 7).unwrap_err().code(), 107);
    assert_eq!(dev.gpio_write(&[0x0F]).unwrap_err().code(), 107);
    assert_eq!(dev.gpio_read(1).unwrap_err().code(), 107);
    assert_eq!(
        dev.program_lms_mcu(&[1], ProgramTarget::Ram, None)
            .unwrap_err()
            .code(),
        107
    );
}

#[test]
fn test_si5351c_and_adf4002() {
    let (fake, mut dev) = device();
    let mut clocks = [0.0; 8];
    clocks[0] = 27e6;
    clocks[1] = -27e6;
    dev.configure_si5351c(30.72e6, Some(clocks), PllSource::Xtal)
        .unwrap();
    assert!(!fake.lock().unwrap().si5351_writes.is_empty());

    {
        let mut fake = fake.lock().unwrap();
        fake.si5351[0] = 0xA0;
        fake.si5351[1] = 0x10;
    }
    assert_eq!(dev.status_si5351c().unwrap().to_u32(), 0x61);
    dev.clear_status_si5351c().unwrap();

    let mut conf = Adf4002Config {
        f_ref: 10.0,
        f_vco: 30.72,
        ..Default::default()
    };
    dev.configure_adf4002(&mut conf).unwrap();
    assert_eq!(conf.reference_counter, 125);
    let fake = fake.lock().unwrap();
    assert_eq!(fake.adf4002.len(), 1);
    assert_eq!(fake.adf4002[0].0, 0x30);
    assert_eq!(fake.adf4002[0].1, conf.latch_words().to_vec());
}

#[test]
fn test_start_stream_without_setup() {
    let (fake, mut dev) = device();
    assert!(dev.stream_status(false).is_err());
    dev.stop_stream(false).unwrap();
    dev.start_stream(false).unwrap();
    let status = dev.stream_status(false).unwrap();
    assert!(status.active);
    assert!(status.fifo_size > 0);
    dev.stop_stream(false).unwrap();
    assert_eq!(fake.lock().unwrap().fpga[&0x000A] & 1, 0);
}

#[test]
fn test_setup_stream_checks_channel() {
    let (_fake, mut dev) = device_named("LimeSDR-Mini");
    assert!(dev.setup_stream(StreamConfig::new(false, 1)).is_err());
}

#[test]
fn test_float_streams_scale_by_link() {
    let (fake, mut dev) = device();
    fake.lock().unwrap().rx_fill = 0x01;
    for tx in [false, true] {
        dev.setup_stream(StreamConfig {
            fifo_size: 0,
            format: DataFormat::F32,
            ..StreamConfig::new(tx, 0)
        })
        .unwrap();
        dev.start_stream(tx).unwrap();
    }

    let mut buf = vec![Complex::new(0f32, 0f32); 16];
    let mut meta = StreamMeta::default();
    assert_eq!(dev.recv_stream_f32(&mut buf, &mut meta, TIMEOUT).unwrap(), 16);
    assert_eq!(buf[0], Complex::new(257.0 / 2048.0, 16.0 / 2048.0));

    let meta = StreamMeta {
        flush_partial_packet: true,
        ..StreamMeta::default()
    };
    dev.send_stream_f32(&[Complex::new(2.0, -1.0)], &meta, TIMEOUT)
        .unwrap();
    let fake = fake.lock().unwrap();
    assert_eq!(&fake.sent[0][HEADER_SIZE..HEADER_SIZE + 3], &[0xFF, 0x17, 0x80]);
}

#[test]
fn test_program_fpga_reports_progress() {
    let (fake, mut dev) = device();
    let mut calls = Vec::new();
    let mut cb = |sent: usize, total: usize| {
        calls.push((sent, total));
        false
    };
    dev.program_fpga(&[0u8; 70], ProgramTarget::Flash, Some(&mut cb))
        .unwrap();
    assert_eq!(calls, vec![(32, 70), (64, 70), (70, 70)]);
    let log = fake.lock().unwrap().program_log.clone();
    assert_eq!(log.len(), 4);
    assert_eq!(log[3], (ProgramDevice::Fpga, ProgramTarget::Flash, 3, 0));
}

#[test]
fn test_program_abort() {
    let (fake, mut dev) = device();
    let mut abort = |_: usize, _: usize| true;
    let err = dev
        .program_firmware(&[0u8; 70], ProgramTarget::Ram, Some(&mut abort))
        .unwrap_err();
    assert_eq!(err.code(), 4);
    assert_eq!(fake.lock().unwrap().program_log.len(), 1);
}

#[test]
fn test_program_lms_mcu() {
    let (fake, mut dev) = device();
    dev.program_lms_mcu(&[1, 2, 3], ProgramTarget::Ram, None)
        .unwrap();
    assert_eq!(fake.lock().unwrap().mcu_images, vec![(3, McuProgMode::Sram)]);
    dev.reset_lms_mcu().unwrap();
}

#[test]
fn test_program_lms_mcu_honours_abort() {
    let (fake, mut dev) = device();
    let mut calls = Vec::new();
    let mut abort_first = |sent: usize, total: usize| {
        calls.push((sent, total));
        true
    };
    let err = dev
        .program_lms_mcu(&[1, 2, 3], ProgramTarget::Ram, Some(&mut abort_first))
        .unwrap_err();
    assert_eq!(err.code(), 4);
    assert_eq!(calls, vec![(0, 3)]);
    assert!(fake.lock().unwrap().mcu_images.is_empty());

    let mut seen = Vec::new();
    let mut abort_last = |sent: usize, total: usize| {
        seen.push(sent);
        sent == total
    };
    let err = dev
        .program_lms_mcu(&[1, 2, 3], ProgramTarget::Ram, Some(&mut abort_last))
        .unwrap_err();
    assert_eq!(err.code(), 4);
    assert_eq!(seen, vec![0, 3]);
    assert_eq!(fake.lock().unwrap().mcu_images.len(), 1);

    let mut keep = |_: usize, _: usize| false;
    dev.program_lms_mcu(&[1, 2, 3], ProgramTarget::Ram, Some(&mut keep))
        .unwrap();
}
