//! LimeSuite-compatible C API.
//!
//! Every function returns 0 on success and -1 on failure, except where noted
//! (counts, pointers, `LMS_IsOpen`). On failure the error code and message are
//! recorded per thread and can be read with `LMS_GetLastError` and
//! `LMS_GetLastErrorMessage`.
//!
//! # Safety
//! All pointer arguments must be null or valid for the access the function
//! documents. A device handle must come from `LMS_Open` and must not be used
//! after `LMS_Close`, nor from two threads at once.

#![allow(non_snake_case)]

mod types;

pub use types::*;

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::path::Path;
use std::ptr;
use std::slice;
use std::time::Duration;

use num_complex::Complex;

use crate::adf4002::Adf4002Config;
use crate::connection::ProgramTarget;
use crate::device::{ClockId, FilterKind, Lms7Device, ProgressCallback};
use crate::error::{self, LimeError, Result};
use crate::lms7002m::{GfirFilter, TestSignal};
use crate::si5351c::PllSource;
use crate::stream::{DataFormat, StreamConfig, StreamMeta};
use crate::{gfir, device_list};

/// Number of NCO frequency or phase values per direction.
pub const LMS_NCO_VAL_COUNT: usize = 16;

const PROGRESS_MSG: &[u8] = b"Programming\0";

/// `lms_device_t`: the device plus the buffers handed out by pointer.
pub struct LmsDevice {
    dev: Lms7Device,
    info: LmsDevInfo,
    status: LmsStreamStatus,
}

impl LmsDevice {
    pub(crate) fn new(dev: Lms7Device) -> LmsDevice {
        LmsDevice {
            dev,
            info: LmsDevInfo::default(),
            status: LmsStreamStatus::default(),
        }
    }
}

fn status(f: impl FnOnce() -> Result<()>) -> c_int {
    match f() {
        Ok(()) => 0,
        Err(e) => {
            error::report_error(&e);
            -1
        }
    }
}

fn count(f: impl FnOnce() -> Result<usize>) -> c_int {
    match f() {
        Ok(n) => n.min(c_int::MAX as usize) as c_int,
        Err(e) => {
            error::report_error(&e);
            -1
        }
    }
}

unsafe fn handle<'a>(device: *mut LmsDevice) -> Result<&'a mut LmsDevice> {
    device
        .as_mut()
        .ok_or_else(|| LimeError::invalid("Device cannot be NULL."))
}

unsafe fn dev<'a>(device: *mut LmsDevice) -> Result<&'a mut Lms7Device> {
    Ok(&mut handle(device)?.dev)
}

unsafe fn out<'a, T>(ptr: *mut T) -> Result<&'a mut T> {
    ptr.as_mut()
        .ok_or_else(|| LimeError::invalid("Output pointer cannot be NULL."))
}

unsafe fn c_str<'a>(s: *const c_char) -> Result<&'a str> {
    if s.is_null() {
        return Err(LimeError::invalid("String cannot be NULL."));
    }
    CStr::from_ptr(s)
        .to_str()
        .map_err(|_| LimeError::invalid("String is not valid UTF-8."))
}

unsafe fn in_slice<'a, T>(ptr: *const T, len: usize) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(LimeError::invalid("Buffer cannot be NULL."));
    }
    Ok(slice::from_raw_parts(ptr, len))
}

unsafe fn out_slice<'a, T>(ptr: *mut T, len: usize) -> Result<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(LimeError::invalid("Buffer cannot be NULL."));
    }
    Ok(slice::from_raw_parts_mut(ptr, len))
}

fn gfir_filter(filt: c_uint) -> Result<GfirFilter> {
    GfirFilter::from_raw(filt).ok_or_else(|| LimeError::invalid("Invalid GFIR filter."))
}

fn clock_id(id: usize) -> Result<ClockId> {
    ClockId::from_raw(id).ok_or_else(|| LimeError::invalid("Invalid clock ID."))
}

/// Run `f` with the C progress callback adapted to a Rust closure.
fn with_progress<T>(
    callback: LmsProgCallback,
    f: impl FnOnce(Option<ProgressCallback>) -> Result<T>,
) -> Result<T> {
    match callback {
        Some(cb) => {
            let mut bridge = |sent: usize, total: usize| {
                cb(
                    sent.min(c_int::MAX as usize) as c_int,
                    total.min(c_int::MAX as usize) as c_int,
                    PROGRESS_MSG.as_ptr() as *const c_char,
                )
            };
            f(Some(&mut bridge))
        }
        None => f(None),
    }
}

// lifecycle

/// Fill `dev_list` with up to as many entries as there are devices and
/// return the device count. With a null list only the count is returned.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetDeviceList(dev_list: *mut LmsInfoStr) -> c_int {
    count(|| {
        let list = device_list()?;
        if let Some(entries) = dev_list.as_mut() {
            let entries = slice::from_raw_parts_mut(entries, list.len());
            for (dst, src) in entries.iter_mut().zip(&list) {
                copy_str(dst, src);
            }
        }
        Ok(list.len())
    })
}

/// Open the first free device, or the one matching `info`. A non-null
/// `*device` is disconnected and reused; otherwise a new handle is allocated.
/// `args` is ignored.
#[no_mangle]
pub unsafe extern "C" fn LMS_Open(
    device: *mut *mut LmsDevice,
    info: *const c_char,
    _args: *mut c_void,
) -> c_int {
    status(|| {
        let slot = device
            .as_mut()
            .ok_or_else(|| LimeError::invalid("Device pointer cannot be NULL."))?;
        if let Some(existing) = (*slot).as_mut() {
            existing.dev.disconnect();
        }
        let info = if info.is_null() {
            None
        } else {
            Some(c_str(info)?)
        };
        let opened = Lms7Device::open(info)?;
        match (*slot).as_mut() {
            Some(existing) => existing.dev = opened,
            None => *slot = Box::into_raw(Box::new(LmsDevice::new(opened))),
        }
        Ok(())
    })
}

/// Disconnect and free the handle.
#[no_mangle]
pub unsafe extern "C" fn LMS_Close(device: *mut LmsDevice) -> c_int {
    status(|| {
        handle(device)?;
        let mut boxed = Box::from_raw(device);
        boxed.dev.disconnect();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_Disconnect(device: *mut LmsDevice) -> c_int {
    status(|| {
        dev(device)?.disconnect();
        Ok(())
    })
}

/// `false` for a null handle.
#[no_mangle]
pub unsafe extern "C" fn LMS_IsOpen(device: *mut LmsDevice, port: c_int) -> bool {
    match device.as_ref() {
        Some(h) => h.dev.is_open(port),
        None => false,
    }
}

#[no_mangle]
pub unsafe extern "C" fn LMS_Reset(device: *mut LmsDevice) -> c_int {
    status(|| dev(device)?.reset())
}

#[no_mangle]
pub unsafe extern "C" fn LMS_Init(device: *mut LmsDevice) -> c_int {
    status(|| dev(device)?.init())
}

#[no_mangle]
pub unsafe extern "C" fn LMS_Synchronize(device: *mut LmsDevice, to_chip: bool) -> c_int {
    status(|| dev(device)?.synchronize(to_chip))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_EnableCalibCache(device: *mut LmsDevice, enable: bool) -> c_int {
    status(|| {
        dev(device)?.enable_calib_cache(enable);
        Ok(())
    })
}

/// Returns the channel count.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetNumChannels(device: *mut LmsDevice, dir_tx: bool) -> c_int {
    count(|| Ok(dev(device)?.num_channels(dir_tx)))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_EnableChannel(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    enabled: bool,
) -> c_int {
    status(|| dev(device)?.enable_channel(dir_tx, chan, enabled))
}

/// Handle-owned device info, valid until the next call on the same handle.
/// Null on error.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetDeviceInfo(device: *mut LmsDevice) -> *const LmsDevInfo {
    let result = (|| -> Result<*const LmsDevInfo> {
        let h = handle(device)?;
        let info = h.dev.device_info()?;
        let mut out = LmsDevInfo::default();
        copy_str(&mut out.device_name, &info.device_name);
        copy_str(&mut out.expansion_name, &info.expansion_name);
        copy_str(&mut out.firmware_version, &info.firmware_version);
        copy_str(&mut out.hardware_version, &info.hardware_version);
        copy_str(&mut out.protocol_version, &info.protocol_version);
        out.board_serial_number = info.board_serial_number;
        h.info = out;
        Ok(&h.info as *const LmsDevInfo)
    })();
    result.unwrap_or_else(|e| {
        error::report_error(&e);
        ptr::null()
    })
}

// sample rate and clocks

#[no_mangle]
pub unsafe extern "C" fn LMS_SetSampleRate(
    device: *mut LmsDevice,
    rate: f64,
    oversample: usize,
) -> c_int {
    status(|| dev(device)?.set_sample_rate(rate, oversample))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetSampleRateDir(
    device: *mut LmsDevice,
    dir_tx: bool,
    rate: f64,
    oversample: usize,
) -> c_int {
    status(|| dev(device)?.set_sample_rate_dir(dir_tx, rate, oversample))
}

/// Either output may be null.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetSampleRate(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    host_hz: *mut f64,
    rf_hz: *mut f64,
) -> c_int {
    status(|| {
        let (host, rf) = dev(device)?.sample_rate(dir_tx, chan)?;
        if let Some(p) = host_hz.as_mut() {
            *p = host;
        }
        if let Some(p) = rf_hz.as_mut() {
            *p = rf;
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetSampleRateRange(
    device: *mut LmsDevice,
    dir_tx: bool,
    range: *mut LmsRange,
) -> c_int {
    status(|| {
        let r = dev(device)?.sample_rate_range(dir_tx);
        *out(range)? = r.into();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetReferenceClock(device: *mut LmsDevice, clock_hz: f64) -> c_int {
    status(|| dev(device)?.set_reference_clock(clock_hz))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetReferenceClock(device: *mut LmsDevice, clock_hz: *mut f64) -> c_int {
    status(|| {
        *out(clock_hz)? = dev(device)?.reference_clock();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetClockFreq(
    device: *mut LmsDevice,
    clk_id: usize,
    freq: *mut f64,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let f = d.clock_freq(clock_id(clk_id)?)?;
        *out(freq)? = f;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetClockFreq(device: *mut LmsDevice, clk_id: usize, freq: f64) -> c_int {
    status(|| {
        let d = dev(device)?;
        d.set_clock_freq(clock_id(clk_id)?, freq)
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetVCORange(
    device: *mut LmsDevice,
    vco_id: usize,
    range: *mut LmsRange,
) -> c_int {
    status(|| {
        let r = dev(device)?.vco_range(vco_id)?;
        *out(range)? = r.into();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetVCORange(device: *mut LmsDevice, vco_id: usize, range: LmsRange) -> c_int {
    status(|| dev(device)?.set_vco_range(vco_id, range.into()))
}

// board parameters

/// `units` may be null; otherwise it receives up to 15 characters.
#[no_mangle]
pub unsafe extern "C" fn LMS_ReadCustomBoardParam(
    device: *mut LmsDevice,
    param_id: u8,
    val: *mut f64,
    units: *mut c_char,
) -> c_int {
    status(|| {
        let (value, unit) = dev(device)?.read_custom_board_param(param_id)?;
        *out(val)? = value;
        if !units.is_null() {
            copy_str(slice::from_raw_parts_mut(units, 16), &unit);
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_WriteCustomBoardParam(
    device: *mut LmsDevice,
    param_id: u8,
    val: f64,
    units: *const c_char,
) -> c_int {
    status(|| {
        let units = if units.is_null() { "" } else { c_str(units)? };
        dev(device)?.write_custom_board_param(param_id, val, units)
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_VCTCXOWrite(device: *mut LmsDevice, val: u16) -> c_int {
    status(|| dev(device)?.vctcxo_write(val))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_VCTCXORead(device: *mut LmsDevice, val: *mut u16) -> c_int {
    status(|| {
        let v = dev(device)?.vctcxo_read()?;
        *out(val)? = v;
        Ok(())
    })
}

// LO and antennas

#[no_mangle]
pub unsafe extern "C" fn LMS_SetLOFrequency(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    frequency: f64,
) -> c_int {
    status(|| dev(device)?.set_lo_frequency(dir_tx, chan, frequency))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetLOFrequency(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    frequency: *mut f64,
) -> c_int {
    status(|| {
        let f = dev(device)?.lo_frequency(dir_tx, chan)?;
        *out(frequency)? = f;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetLOFrequencyRange(
    device: *mut LmsDevice,
    dir_tx: bool,
    range: *mut LmsRange,
) -> c_int {
    status(|| {
        let r = dev(device)?.lo_frequency_range(dir_tx);
        *out(range)? = r.into();
        Ok(())
    })
}

/// Returns the number of antenna paths, filling `list` when it is not null.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetAntennaList(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    list: *mut LmsName,
) -> c_int {
    count(|| {
        let names = dev(device)?.antenna_list(dir_tx, chan)?;
        if !list.is_null() {
            let entries = slice::from_raw_parts_mut(list, names.len());
            for (dst, name) in entries.iter_mut().zip(names) {
                copy_str(dst, name);
            }
        }
        Ok(names.len())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetAntenna(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    path: usize,
) -> c_int {
    status(|| dev(device)?.set_antenna(dir_tx, chan, path))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetAntenna(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    path: *mut usize,
) -> c_int {
    status(|| {
        let p = dev(device)?.antenna(dir_tx, chan)?;
        *out(path)? = p;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetAntennaBW(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    path: usize,
    range: *mut LmsRange,
) -> c_int {
    status(|| {
        let r = dev(device)?.antenna_bw(dir_tx, chan, path)?;
        *out(range)? = r.into();
        Ok(())
    })
}

// bandwidth and filters

#[no_mangle]
pub unsafe extern "C" fn LMS_SetBW(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    bandwidth: f64,
) -> c_int {
    status(|| dev(device)?.set_bandwidth(dir_tx, chan, bandwidth))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetBW(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    bandwidth: *mut f64,
) -> c_int {
    status(|| {
        let bw = dev(device)?.bandwidth(dir_tx, chan)?;
        *out(bandwidth)? = bw;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetBWRange(
    device: *mut LmsDevice,
    dir_tx: bool,
    range: *mut LmsRange,
) -> c_int {
    status(|| {
        let r = dev(device)?.bandwidth_range(dir_tx);
        *out(range)? = r.into();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetLPFBW(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    bandwidth: f64,
) -> c_int {
    status(|| dev(device)?.set_lpf_bw(dir_tx, chan, bandwidth))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetLPFBW(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    bandwidth: *mut f64,
) -> c_int {
    status(|| {
        let bw = dev(device)?.lpf_bw(dir_tx, chan)?;
        *out(bandwidth)? = bw;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetLPFBWRange(
    device: *mut LmsDevice,
    dir_tx: bool,
    range: *mut LmsRange,
) -> c_int {
    status(|| {
        let r = dev(device)?.lpf_bw_range(dir_tx);
        *out(range)? = r.into();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetLPF(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    enabled: bool,
) -> c_int {
    status(|| dev(device)?.set_lpf(dir_tx, chan, enabled))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetGFIRLPF(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    enabled: bool,
    bandwidth: f64,
) -> c_int {
    status(|| dev(device)?.set_gfir_lpf(dir_tx, chan, enabled, bandwidth))
}

/// `bw` points to one bandwidth, or two for `LMS_TX_LPF_LOWCHAIN` (ladder,
/// then real pole).
#[no_mangle]
pub unsafe extern "C" fn LMS_TuneFilter(
    device: *mut LmsDevice,
    chan: usize,
    filt: c_uint,
    bw: *const f64,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let kind = FilterKind::from_raw(filt)
            .ok_or_else(|| LimeError::invalid("Invalid filter parameter"))?;
        let n = if kind == FilterKind::TxLowChain { 2 } else { 1 };
        d.tune_filter(chan, kind, in_slice(bw, n)?)
    })
}

// gain and calibration

#[no_mangle]
pub unsafe extern "C" fn LMS_SetNormalizedGain(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    gain: f64,
) -> c_int {
    status(|| dev(device)?.set_normalized_gain(dir_tx, chan, gain))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetNormalizedGain(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    gain: *mut f64,
) -> c_int {
    status(|| {
        let g = dev(device)?.normalized_gain(dir_tx, chan)?;
        *out(gain)? = g;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_Calibrate(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    bw: f64,
    flags: c_uint,
) -> c_int {
    status(|| dev(device)?.calibrate(dir_tx, chan, bw, flags))
}

// configuration files

#[no_mangle]
pub unsafe extern "C" fn LMS_LoadConfig(device: *mut LmsDevice, filename: *const c_char) -> c_int {
    status(|| {
        let path = c_str(filename)?;
        dev(device)?.load_config(Path::new(path))
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SaveConfig(device: *mut LmsDevice, filename: *const c_char) -> c_int {
    status(|| {
        let path = c_str(filename)?;
        dev(device)?.save_config(Path::new(path))
    })
}

// TSP

#[no_mangle]
pub unsafe extern "C" fn LMS_SetTestSignal(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    sig: c_uint,
    dc_i: i16,
    dc_q: i16,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let sig = TestSignal::from_raw(sig).ok_or_else(|| LimeError::invalid("Invalid signal."))?;
        d.set_test_signal(dir_tx, chan, sig, dc_i, dc_q)
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetTestSignal(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    sig: *mut c_uint,
) -> c_int {
    status(|| {
        let s = dev(device)?.test_signal(dir_tx, chan)?;
        *out(sig)? = s as c_uint;
        Ok(())
    })
}

/// `freq` holds `LMS_NCO_VAL_COUNT` frequencies in Hz.
#[no_mangle]
pub unsafe extern "C" fn LMS_SetNCOFrequency(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    freq: *const f64,
    pho: f64,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        d.set_nco_frequency(dir_tx, chan, in_slice(freq, LMS_NCO_VAL_COUNT)?, pho)
    })
}

/// `freq` receives `LMS_NCO_VAL_COUNT` values. `pho` may be null.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetNCOFrequency(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    freq: *mut f64,
    pho: *mut f64,
) -> c_int {
    status(|| {
        let (freqs, phase) = dev(device)?.nco_frequency(dir_tx, chan)?;
        let dst = out_slice(freq, LMS_NCO_VAL_COUNT)?;
        for (d, f) in dst.iter_mut().zip(freqs) {
            *d = f;
        }
        if let Some(p) = pho.as_mut() {
            *p = phase;
        }
        Ok(())
    })
}

/// `phase` holds `LMS_NCO_VAL_COUNT` phase offsets in degrees.
#[no_mangle]
pub unsafe extern "C" fn LMS_SetNCOPhase(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    phase: *const f64,
    fcw: f64,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        d.set_nco_phase(dir_tx, chan, in_slice(phase, LMS_NCO_VAL_COUNT)?, fcw)
    })
}

/// `index` is accepted for compatibility and ignored; all phases are
/// returned.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetNCOPhase(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    _index: usize,
    phase: *mut f64,
    fcw: *mut f64,
) -> c_int {
    status(|| {
        let (phases, freq) = dev(device)?.nco_phase(dir_tx, chan)?;
        let dst = out_slice(phase, LMS_NCO_VAL_COUNT)?;
        for (d, p) in dst.iter_mut().zip(phases) {
            *d = p;
        }
        if let Some(f) = fcw.as_mut() {
            *f = freq;
        }
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetNCOIndex(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    index: usize,
    down: bool,
) -> c_int {
    status(|| dev(device)?.set_nco_index(dir_tx, chan, index, down))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GetNCOIndex(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    index: *mut usize,
) -> c_int {
    status(|| {
        let i = dev(device)?.nco_index(dir_tx, chan)?;
        *out(index)? = i;
        Ok(())
    })
}

/// Design an `n`-tap low-pass into `coef`. Needs no device.
#[no_mangle]
pub unsafe extern "C" fn LMS_GenerateLPFCoef(
    n: usize,
    w1: f64,
    w2: f64,
    g_stop: f64,
    coef: *mut f64,
) -> c_int {
    status(|| {
        let taps = gfir::generate_lpf_coef(n, w1, w2, g_stop)?;
        out_slice(coef, n)?.copy_from_slice(&taps[..n]);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetGFIRCoeff(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    filt: c_uint,
    coef: *const f64,
    count: usize,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        d.set_gfir_coeff(dir_tx, chan, gfir_filter(filt)?, in_slice(coef, count)?)
    })
}

/// `coef` receives 40 values for GFIR1/GFIR2 and 120 for GFIR3.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetGFIRCoeff(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    filt: c_uint,
    coef: *mut f64,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let filt = gfir_filter(filt)?;
        let taps = d.gfir_coeff(dir_tx, chan, filt)?;
        out_slice(coef, taps.len())?.copy_from_slice(&taps);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_SetGFIR(
    device: *mut LmsDevice,
    dir_tx: bool,
    chan: usize,
    filt: c_uint,
    enabled: bool,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        d.set_gfir(dir_tx, chan, gfir_filter(filt)?, enabled)
    })
}

// raw register access

#[no_mangle]
pub unsafe extern "C" fn LMS_ReadLMSReg(device: *mut LmsDevice, address: u32, val: *mut u16) -> c_int {
    status(|| {
        let v = dev(device)?.read_lms_reg(address)?;
        *out(val)? = v;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_WriteLMSReg(device: *mut LmsDevice, address: u32, val: u16) -> c_int {
    status(|| dev(device)?.write_lms_reg(address, val))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_RegisterTest(device: *mut LmsDevice) -> c_int {
    status(|| dev(device)?.register_test())
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ReadFPGAReg(device: *mut LmsDevice, address: u32, val: *mut u16) -> c_int {
    status(|| {
        let v = dev(device)?.read_fpga_reg(address)?;
        *out(val)? = v;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_WriteFPGAReg(device: *mut LmsDevice, address: u32, val: u16) -> c_int {
    status(|| dev(device)?.write_fpga_reg(address, val))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ReadParam(
    device: *mut LmsDevice,
    param: Lms7Parameter,
    val: *mut u16,
) -> c_int {
    status(|| {
        let v = dev(device)?.read_param(&param.into())?;
        *out(val)? = v;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_WriteParam(device: *mut LmsDevice, param: Lms7Parameter, val: u16) -> c_int {
    status(|| dev(device)?.write_param(&param.into(), val))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GPIORead(device: *mut LmsDevice, buffer: *mut u8, len: usize) -> c_int {
    status(|| {
        let data = dev(device)?.gpio_read(len)?;
        let dst = out_slice(buffer, len)?;
        let n = data.len().min(len);
        dst[..n].copy_from_slice(&data[..n]);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_GPIOWrite(device: *mut LmsDevice, buffer: *const u8, len: usize) -> c_int {
    status(|| {
        let d = dev(device)?;
        d.gpio_write(in_slice(buffer, len)?)
    })
}

/// Install, or with a null `func` remove, a hook that sees every raw control
/// packet.
#[no_mangle]
pub unsafe extern "C" fn LMS_SetDataLogCallback(device: *mut LmsDevice, func: LmsLogCallback) -> c_int {
    status(|| {
        let callback = func.map(|f| {
            Box::new(move |tx: bool, data: &[u8]| f(tx, data.as_ptr(), data.len() as c_uint))
                as crate::connection::DataLogCallback
        });
        dev(device)?.set_data_log_callback(callback)
    })
}

// peripherals

#[no_mangle]
pub unsafe extern "C" fn LMS_LoadConfigSi5351C(device: *mut LmsDevice, filename: *const c_char) -> c_int {
    status(|| {
        let path = c_str(filename)?;
        dev(device)?.load_config_si5351c(Path::new(path))
    })
}

/// `clks` holds eight output frequencies in Hz: negative inverts an output,
/// 0 disables it. A null `clks` powers all outputs down.
#[no_mangle]
pub unsafe extern "C" fn LMS_ConfigureSi5351C(
    device: *mut LmsDevice,
    clkin: f64,
    clks: *mut f64,
    src: c_uint,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let clocks = if clks.is_null() {
            None
        } else {
            let mut all = [0.0; 8];
            all.copy_from_slice(slice::from_raw_parts(clks, 8));
            Some(all)
        };
        d.configure_si5351c(clkin, clocks, PllSource::from_raw(src))
    })
}

/// With a non-null `status` the packed status bits are read; with null the
/// sticky bits are cleared.
#[no_mangle]
pub unsafe extern "C" fn LMS_StatusSi5351C(device: *mut LmsDevice, status_out: *mut u32) -> c_int {
    status(|| {
        let d = dev(device)?;
        match status_out.as_mut() {
            Some(s) => {
                *s = d.status_si5351c()?.to_u32();
                Ok(())
            }
            None => d.clear_status_si5351c(),
        }
    })
}

/// Writes the four latches. When `f_ref` and `f_vco` are both positive, R
/// and N are derived from them and the achieved comparison and VCO
/// frequencies are written back.
#[no_mangle]
pub unsafe extern "C" fn LMS_ConfigureADF4002(device: *mut LmsDevice, config: *mut LmsAdf4002Conf) -> c_int {
    status(|| {
        let d = dev(device)?;
        let conf = out(config)?;
        let mut adf = Adf4002Config::from(&*conf);
        d.configure_adf4002(&mut adf)?;
        conf.f_ref = adf.f_ref;
        conf.f_vco = adf.f_vco;
        Ok(())
    })
}

// streaming

#[no_mangle]
pub unsafe extern "C" fn LMS_SetupStream(device: *mut LmsDevice, conf: LmsStreamConf) -> c_int {
    status(|| {
        let d = dev(device)?;
        d.setup_stream(StreamConfig::try_from(conf)?)
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_StartStream(device: *mut LmsDevice, dir_tx: bool) -> c_int {
    status(|| dev(device)?.start_stream(dir_tx))
}

#[no_mangle]
pub unsafe extern "C" fn LMS_StopStream(device: *mut LmsDevice, dir_tx: bool) -> c_int {
    status(|| dev(device)?.stop_stream(dir_tx))
}

/// Receive into `samples[0]`: interleaved float pairs for `LMS_FMT_F32`,
/// int16 pairs otherwise. Returns the number of samples received. `meta`
/// may be null.
#[no_mangle]
pub unsafe extern "C" fn LMS_RecvStream(
    device: *mut LmsDevice,
    samples: *mut *mut c_void,
    sample_count: usize,
    meta: *mut LmsStreamMeta,
    timeout_ms: c_uint,
) -> c_int {
    count(|| {
        let d = dev(device)?;
        let buf = *out(samples)?;
        let timeout = Duration::from_millis(timeout_ms as u64);
        let mut m = StreamMeta::default();
        let n = match d.stream_format(false) {
            Some(DataFormat::F32) => {
                let buf = out_slice(buf as *mut Complex<f32>, sample_count)?;
                d.recv_stream_f32(buf, &mut m, timeout)?
            }
            _ => {
                let buf = out_slice(buf as *mut Complex<i16>, sample_count)?;
                d.recv_stream(buf, &mut m, timeout)?
            }
        };
        if let Some(meta) = meta.as_mut() {
            meta.timestamp = m.timestamp;
        }
        Ok(n)
    })
}

/// Send from `samples[0]` in the configured format. Returns the number of
/// samples accepted. `meta` may be null.
#[no_mangle]
pub unsafe extern "C" fn LMS_SendStream(
    device: *mut LmsDevice,
    samples: *const *const c_void,
    sample_count: usize,
    meta: *const LmsStreamMeta,
    timeout_ms: c_uint,
) -> c_int {
    count(|| {
        let d = dev(device)?;
        if samples.is_null() {
            return Err(LimeError::invalid("Buffer cannot be NULL."));
        }
        let buf = *samples;
        let timeout = Duration::from_millis(timeout_ms as u64);
        let m: StreamMeta = meta.as_ref().copied().unwrap_or_default().into();
        match d.stream_format(true) {
            Some(DataFormat::F32) => {
                let buf = in_slice(buf as *const Complex<f32>, sample_count)?;
                d.send_stream_f32(buf, &m, timeout)
            }
            _ => {
                let buf = in_slice(buf as *const Complex<i16>, sample_count)?;
                d.send_stream(buf, &m, timeout)
            }
        }
    })
}

/// Status of the RX stream, or of TX when only TX is set up. The pointer is
/// owned by the handle and valid until the next call on it. Null on error.
#[no_mangle]
pub unsafe extern "C" fn LMS_GetStreamStatus(device: *mut LmsDevice) -> *const LmsStreamStatus {
    let result = (|| -> Result<*const LmsStreamStatus> {
        let h = handle(device)?;
        let tx = h.dev.stream_format(false).is_none() && h.dev.stream_format(true).is_some();
        h.status = h.dev.stream_status(tx)?.into();
        Ok(&h.status as *const LmsStreamStatus)
    })();
    result.unwrap_or_else(|e| {
        error::report_error(&e);
        ptr::null()
    })
}

// programming

fn program_target(target: c_uint) -> Result<ProgramTarget> {
    ProgramTarget::from_raw(target)
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ProgramFPGA(
    device: *mut LmsDevice,
    data: *const c_char,
    size: usize,
    target: c_uint,
    callback: LmsProgCallback,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let data = in_slice(data as *const u8, size)?;
        let target = program_target(target)?;
        with_progress(callback, |cb| d.program_fpga(data, target, cb))
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ProgramFPGAFile(
    device: *mut LmsDevice,
    file: *const c_char,
    target: c_uint,
    callback: LmsProgCallback,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let path = c_str(file)?;
        let target = program_target(target)?;
        with_progress(callback, |cb| d.program_fpga_file(Path::new(path), target, cb))
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ProgramFirmware(
    device: *mut LmsDevice,
    data: *const c_char,
    size: usize,
    target: c_uint,
    callback: LmsProgCallback,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let data = in_slice(data as *const u8, size)?;
        let target = program_target(target)?;
        with_progress(callback, |cb| d.program_firmware(data, target, cb))
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ProgramFirmwareFile(
    device: *mut LmsDevice,
    file: *const c_char,
    target: c_uint,
    callback: LmsProgCallback,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let path = c_str(file)?;
        let target = program_target(target)?;
        with_progress(callback, |cb| d.program_firmware_file(Path::new(path), target, cb))
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ProgramLMSMCU(
    device: *mut LmsDevice,
    data: *const c_char,
    size: usize,
    target: c_uint,
    callback: LmsProgCallback,
) -> c_int {
    status(|| {
        let d = dev(device)?;
        let data = in_slice(data as *const u8, size)?;
        let target = program_target(target)?;
        with_progress(callback, |cb| d.program_lms_mcu(data, target, cb))
    })
}

#[no_mangle]
pub unsafe extern "C" fn LMS_ResetLMSMCU(device: *mut LmsDevice) -> c_int {
    status(|| dev(device)?.reset_lms_mcu())
}

// errors

#[no_mangle]
pub extern "C" fn LMS_GetLastError() -> c_int {
    error::last_error()
}

/// Valid until the next error is reported on the calling thread.
#[no_mangle]
pub extern "C" fn LMS_GetLastErrorMessage() -> *const c_char {
    error::last_error_message_ptr()
}
