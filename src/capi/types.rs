//! `#[repr(C)]` mirrors of the LimeSuite header types.

use std::os::raw::{c_char, c_int, c_uint};

use crate::adf4002::{Adf4002Config, LatchSettings};
use crate::lms7002m::params::Parameter;
use crate::stream::{DataFormat, StreamConfig, StreamMeta, StreamStatus};
use crate::{LimeError, Range, Result};

/// `lms_info_str_t`
pub type LmsInfoStr = [c_char; 256];
/// `lms_name_t`
pub type LmsName = [c_char; 16];

/// `lms_prog_callback_t`: `(bytes_sent, total, message)`, returning `true`
/// aborts.
pub type LmsProgCallback = Option<extern "C" fn(c_int, c_int, *const c_char) -> bool>;

/// Data log hook: `(is_tx, data, length)`.
pub type LmsLogCallback = Option<extern "C" fn(bool, *const u8, c_uint)>;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LmsRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl From<Range> for LmsRange {
    fn from(r: Range) -> Self {
        LmsRange {
            min: r.min,
            max: r.max,
            step: r.step,
        }
    }
}

impl From<LmsRange> for Range {
    fn from(r: LmsRange) -> Self {
        Range::new(r.min, r.max, r.step)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmsStreamConf {
    pub is_tx: bool,
    pub channel: u32,
    pub fifo_size: u32,
    pub throughput_vs_latency: f32,
    pub data_fmt: c_int,
}

impl TryFrom<LmsStreamConf> for StreamConfig {
    type Error = LimeError;

    fn try_from(conf: LmsStreamConf) -> Result<Self> {
        let format = u32::try_from(conf.data_fmt)
            .ok()
            .and_then(DataFormat::from_raw)
            .ok_or_else(|| LimeError::invalid("Invalid data format."))?;
        Ok(StreamConfig {
            is_tx: conf.is_tx,
            channel: conf.channel as usize,
            fifo_size: conf.fifo_size as usize,
            throughput_vs_latency: conf.throughput_vs_latency,
            format,
        })
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LmsStreamMeta {
    pub timestamp: u64,
    pub wait_for_timestamp: bool,
    pub flush_partial_packet: bool,
}

impl From<LmsStreamMeta> for StreamMeta {
    fn from(m: LmsStreamMeta) -> Self {
        StreamMeta {
            timestamp: m.timestamp,
            wait_for_timestamp: m.wait_for_timestamp,
            flush_partial_packet: m.flush_partial_packet,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LmsStreamStatus {
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

impl From<StreamStatus> for LmsStreamStatus {
    fn from(s: StreamStatus) -> Self {
        LmsStreamStatus {
            active: s.active,
            fifo_filled_count: s.fifo_filled_count,
            fifo_size: s.fifo_size,
            underrun: s.underrun,
            overrun: s.overrun,
            dropped_packets: s.dropped_packets,
            sample_rate: s.sample_rate,
            link_rate: s.link_rate,
            timestamp: s.timestamp,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LmsDevInfo {
    pub device_name: [c_char; 32],
    pub expansion_name: [c_char; 32],
    pub firmware_version: [c_char; 16],
    pub hardware_version: [c_char; 16],
    pub protocol_version: [c_char; 16],
    pub board_serial_number: u64,
}

impl Default for LmsDevInfo {
    fn default() -> Self {
        LmsDevInfo {
            device_name: [0; 32],
            expansion_name: [0; 32],
            firmware_version: [0; 16],
            hardware_version: [0; 16],
            protocol_version: [0; 16],
            board_serial_number: 0,
        }
    }
}

/// `struct LMS7Parameter`. Only the address and bit span are used.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Lms7Parameter {
    pub address: u16,
    pub msb: u8,
    pub lsb: u8,
    pub default_value: u16,
    pub name: *const c_char,
    pub tooltip: *const c_char,
}

impl From<Lms7Parameter> for Parameter {
    fn from(p: Lms7Parameter) -> Self {
        Parameter::new(p.address, p.msb, p.lsb)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LmsAdf4002Conf {
    pub lock_detect_prec: c_int,
    pub anti_backlash: c_int,
    pub reference_counter: c_int,
    pub cp_gain: c_int,
    pub n_counter: c_int,
    pub fl_current1: c_int,
    pub fl_current2: c_int,
    pub fl_timer_counter: c_int,
    pub fl_fastlock: c_int,
    pub fl_mux_ctrl: c_int,
    pub fl_pd_polarity: c_int,
    pub fl_pd1: c_int,
    pub fl_pd2: c_int,
    pub fl_counter_reset: c_int,
    pub fl_cp_state: c_int,
    pub il_current1: c_int,
    pub il_current2: c_int,
    pub il_timer_counter: c_int,
    pub il_fastlock: c_int,
    pub il_mux_ctrl: c_int,
    pub il_pd_polarity: c_int,
    pub il_pd1: c_int,
    pub il_pd2: c_int,
    pub il_counter_reset: c_int,
    pub il_cp_state: c_int,
    pub f_ref: f64,
    pub f_vco: f64,
}

impl From<&LmsAdf4002Conf> for Adf4002Config {
    fn from(c: &LmsAdf4002Conf) -> Self {
        Adf4002Config {
            lock_detect_prec: c.lock_detect_prec as u8,
            anti_backlash: c.anti_backlash as u8,
            reference_counter: c.reference_counter as u32,
            cp_gain: c.cp_gain as u8,
            n_counter: c.n_counter as u32,
            function: LatchSettings {
                current1: c.fl_current1 as u8,
                current2: c.fl_current2 as u8,
                timer_counter: c.fl_timer_counter as u8,
                fastlock: c.fl_fastlock as u8,
                mux_ctrl: c.fl_mux_ctrl as u8,
                pd_polarity: c.fl_pd_polarity as u8,
                pd1: c.fl_pd1 as u8,
                pd2: c.fl_pd2 as u8,
                counter_reset: c.fl_counter_reset as u8,
                cp_state: c.fl_cp_state as u8,
            },
            initialization: LatchSettings {
                current1: c.il_current1 as u8,
                current2: c.il_current2 as u8,
                timer_counter: c.il_timer_counter as u8,
                fastlock: c.il_fastlock as u8,
                mux_ctrl: c.il_mux_ctrl as u8,
                pd_polarity: c.il_pd_polarity as u8,
                pd1: c.il_pd1 as u8,
                pd2: c.il_pd2 as u8,
                counter_reset: c.il_counter_reset as u8,
                cp_state: c.il_cp_state as u8,
            },
            f_ref: c.f_ref,
            f_vco: c.f_vco,
        }
    }
}

/// Copy `src` into a fixed C string buffer, truncating and NUL-terminating.
pub(crate) fn copy_str(dst: &mut [c_char], src: &str) {
    let Some(last) = dst.len().checked_sub(1) else {
        return;
    };
    let n = src.len().min(last);
    for (d, s) in dst.iter_mut().zip(&src.as_bytes()[..n]) {
        *d = *s as c_char;
    }
    dst[n..].fill(0);
}
