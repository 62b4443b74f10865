//! Board-level device object. It owns the control connection, the LMS7002M
//! model and the sample streamer, and is what every `LMS_*` call lands on.

mod rf;
#[cfg(test)]
mod device_test;

pub use rf::{FilterKind, RX_ANTENNAS, TX_ANTENNAS};

use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use num_complex::Complex;

use crate::adf4002::Adf4002Config;
use crate::connection::constants::{PROGRAM_CHUNK_SIZE, VCTCXO_PARAM_ID};
use crate::connection::{
    self, BoardKind, ConnectionHandle, CustomParam, DataLogCallback, DeviceInfo, ProgramDevice,
    ProgramTarget, SharedConnection,
};
use crate::error::{ErrorCode, LimeError, Result};
use crate::fpga_pll;
use crate::lms7002m::params::{
    Parameter, CLKH_OV_CLKL_CGEN, EN_ADCCLKH_CLKGN, HBD_OVR_RXTSP, HBI_OVR_TXTSP,
};
use crate::lms7002m::{
    Lms7002m, Vco, CGEN_MAX_FREQ, DEFAULT_REF_CLK, REF_CLK_MAX, REF_CLK_MIN,
};
use crate::si5351c::{PllSource, Si5351c, StatusBits};
use crate::stream::{DataFormat, StreamConfig, StreamMeta, StreamStatus, Streamer};
use crate::Range;

const MIN_SAMPLE_RATE: f64 = 100e3;
const MAX_OVERSAMPLE: usize = 32;

/// Clocks addressable through `clock_freq` and `set_clock_freq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    Ref = 0,
    Sxr = 1,
    Sxt = 2,
    Cgen = 3,
    RxTsp = 4,
    TxTsp = 5,
}

impl ClockId {
    pub fn from_raw(val: usize) -> Option<ClockId> {
        match val {
            0 => Some(ClockId::Ref),
            1 => Some(ClockId::Sxr),
            2 => Some(ClockId::Sxt),
            3 => Some(ClockId::Cgen),
            4 => Some(ClockId::RxTsp),
            5 => Some(ClockId::TxTsp),
            _ => None,
        }
    }
}

/// Progress callback for programming: `(bytes_sent, total)`, returning
/// `true` aborts the transfer.
pub type ProgressCallback<'a> = &'a mut dyn FnMut(usize, usize) -> bool;

/// Half-band ratio for a requested oversampling factor.
fn interpolation_ratio(rate: f64, oversample: usize) -> u32 {
    match oversample {
        0 => [32u32, 16, 8, 4, 2]
            .into_iter()
            .find(|r| rate * 4.0 * *r as f64 <= CGEN_MAX_FREQ)
            .unwrap_or(1),
        1 => 1,
        n => (n.min(MAX_OVERSAMPLE) as u32).next_power_of_two().clamp(2, 32),
    }
}

/// HBD_OVR/HBI_OVR code for a ratio; 7 bypasses the half-band chain.
fn hb_code(ratio: u32) -> u16 {
    if ratio <= 1 {
        7
    } else {
        (ratio.trailing_zeros() - 1) as u16
    }
}

pub struct Lms7Device {
    conn: Option<SharedConnection>,
    handle: Option<ConnectionHandle>,
    kind: BoardKind,
    lms: Lms7002m,
    streamer: Option<Streamer>,
    /// Last analog LPF bandwidth, indexed `[tx][channel]`.
    lpf_bw: [[f64; 2]; 2],
    /// qLimeSDR DAC clock, independent of CGEN.
    dac_rate: f64,
}

impl Default for Lms7Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Lms7Device {
    /// An unconnected device with a default register model.
    pub fn new() -> Lms7Device {
        Lms7Device {
            conn: None,
            handle: None,
            kind: BoardKind::LimeSdrUsb,
            lms: Lms7002m::new(),
            streamer: None,
            lpf_bw: [[130e6; 2]; 2],
            dac_rate: 0.0,
        }
    }

    /// Open the first usable board, or the one whose serialized handle equals
    /// `info`.
    pub fn open(info: Option<&str>) -> Result<Lms7Device> {
        let handles = connection::find_connections()?;
        for handle in handles
            .iter()
            .filter(|h| info.map_or(true, |s| h.serialize() == s))
        {
            match connection::make_connection(handle) {
                Ok(conn) => {
                    let mut dev = Self::with_connection(conn)?;
                    dev.handle = Some(handle.clone());
                    return Ok(dev);
                }
                Err(e) if info.is_none() && e.code() == ErrorCode::Busy as i32 => {
                    warn!("Skipping busy device {}", handle);
                }
                Err(e) => return Err(e),
            }
        }
        Err(LimeError::new(
            ErrorCode::NoDevice,
            match info {
                Some(_) => "Specified device could not be found",
                None => "No devices found",
            },
        ))
    }

    /// Wrap an already open connection.
    pub fn with_connection(conn: SharedConnection) -> Result<Lms7Device> {
        let mut dev = Lms7Device::new();
        dev.attach(conn)?;
        Ok(dev)
    }

    fn attach(&mut self, conn: SharedConnection) -> Result<()> {
        let info = connection::lock(&conn)?.device_info()?;
        self.kind = BoardKind::from_device_name(&info.device_name);
        info!(
            "Attached {} ({:?}), serial {:016X}",
            info.device_name, self.kind, info.board_serial_number
        );
        self.lms.set_connection(Some(conn.clone()));
        self.conn = Some(conn);
        self.lms.download_all()?;
        if self.kind == BoardKind::QLimeSdr {
            self.dac_rate = self.lms.reference_clk_tsp(true)?;
        }
        Ok(())
    }

    fn conn(&self) -> Result<&SharedConnection> {
        self.conn.as_ref().ok_or_else(LimeError::not_connected)
    }

    pub fn board_kind(&self) -> BoardKind {
        self.kind
    }

    /// Direct access to the chip model.
    pub fn lms(&mut self) -> &mut Lms7002m {
        &mut self.lms
    }

    /// Reopen the board this device was opened from.
    pub fn connect(&mut self) -> Result<()> {
        let handle = self
            .handle
            .clone()
            .ok_or_else(|| LimeError::new(ErrorCode::NoDevice, "No device to connect to."))?;
        self.disconnect();
        let conn = connection::make_connection(&handle)?;
        self.attach(conn)
    }

    /// Drop the streamer and the connection. The register cache is kept.
    pub fn disconnect(&mut self) {
        if self.conn.is_some() {
            info!("Disconnecting");
        }
        self.streamer = None;
        self.lms.set_connection(None);
        self.conn = None;
    }

    /// Port 0 is the control port, 1 the stream port. Both share one
    /// connection.
    pub fn is_open(&self, port: i32) -> bool {
        match (port, self.conn.as_ref()) {
            (0 | 1, Some(conn)) => connection::lock(conn).map_or(false, |c| c.is_open()),
            _ => false,
        }
    }

    pub fn reset(&mut self) -> Result<()> {
        self.lms.reset_chip()?;
        self.lms.download_all()
    }

    /// Put the chip in a known default state.
    pub fn init(&mut self) -> Result<()> {
        info!("Initializing {:?}", self.kind);
        self.lms.reset_chip()?;
        self.lms.load_defaults();
        self.lms.upload_all()?;
        self.set_reference_clock(DEFAULT_REF_CLK)
    }

    /// Push the cache to the chip (`to_chip`) or refresh it from the chip.
    pub fn synchronize(&mut self, to_chip: bool) -> Result<()> {
        if to_chip {
            self.lms.upload_all()
        } else {
            self.lms.download_all()
        }
    }

    pub fn num_channels(&self, _tx: bool) -> usize {
        self.kind.num_channels()
    }

    fn check_channel(&self, tx: bool, ch: usize) -> Result<()> {
        if ch >= self.num_channels(tx) {
            return Err(LimeError::invalid("Invalid channel number."));
        }
        Ok(())
    }

    /// Run `f` with MAC selecting channel `ch`.
    fn on_channel<T>(
        &mut self,
        tx: bool,
        ch: usize,
        f: impl FnOnce(&mut Lms7002m) -> Result<T>,
    ) -> Result<T> {
        self.check_channel(tx, ch)?;
        self.lms.with_mac(ch as u16 + 1, f)
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        let conn = self.conn()?;
        let mut c = connection::lock(conn)?;
        c.device_info()
    }

    // sample rate

    pub fn set_sample_rate(&mut self, rate: f64, oversample: usize) -> Result<()> {
        if rate <= 0.0 {
            return Err(LimeError::invalid("Invalid sample rate."));
        }
        let ratio = interpolation_ratio(rate, oversample);
        let hb = hb_code(ratio);
        debug!("Sample rate {:.3} MHz, ratio {}", rate / 1e6, ratio);
        self.lms.with_mac(3, |c| {
            c.modify_param(&HBD_OVR_RXTSP, hb)?;
            c.modify_param(&HBI_OVR_TXTSP, hb)
        })?;
        let cgen = rate * 4.0 * ratio as f64;
        if self.kind == BoardKind::QLimeSdr {
            self.dac_rate = rate * ratio as f64;
        }
        self.apply_cgen(cgen)
    }

    /// Change the rate of one direction. Except on qLimeSDR both directions
    /// share CGEN, so the other direction keeps its ratio and follows the new
    /// clock.
    pub fn set_sample_rate_dir(&mut self, tx: bool, rate: f64, oversample: usize) -> Result<()> {
        if rate <= 0.0 {
            return Err(LimeError::invalid("Invalid sample rate."));
        }
        let ratio = interpolation_ratio(rate, oversample);
        let hb = hb_code(ratio);
        let param = if tx { HBI_OVR_TXTSP } else { HBD_OVR_RXTSP };
        self.lms.with_mac(3, |c| c.modify_param(&param, hb))?;
        if tx && self.kind == BoardKind::QLimeSdr {
            self.dac_rate = rate * ratio as f64;
            return self.update_data_rates();
        }
        self.apply_cgen(rate * 4.0 * ratio as f64)
    }

    fn apply_cgen(&mut self, cgen: f64) -> Result<()> {
        self.lms.modify_param(&CLKH_OV_CLKL_CGEN, 2)?;
        self.lms.modify_param(&EN_ADCCLKH_CLKGN, 0)?;
        self.lms.set_frequency_cgen(cgen)?;
        self.update_data_rates()
    }

    fn update_data_rates(&mut self) -> Result<()> {
        let channels = self.num_channels(false);
        let mut rates = Vec::with_capacity(channels);
        for ch in 0..channels {
            rates.push((self.sample_rate(true, ch)?.0, self.sample_rate(false, ch)?.0));
        }
        if let (Some(streamer), Some((tx, rx))) = (self.streamer.as_mut(), rates.first()) {
            streamer.set_sample_rates(*rx, *tx);
        }
        if let Some(conn) = self.conn.as_ref() {
            let mut c = connection::lock(conn)?;
            // both channels share the LML port clocks
            if let Some((tx, rx)) = rates.first() {
                fpga_pll::set_interface_frequency(&mut *c, *tx, *rx)?;
            }
            for (ch, (tx, rx)) in rates.into_iter().enumerate() {
                c.update_external_data_rate(ch, tx, rx)?;
            }
        }
        Ok(())
    }

    /// `(host_hz, rf_hz)` of one channel.
    pub fn sample_rate(&mut self, tx: bool, ch: usize) -> Result<(f64, f64)> {
        let ratio = self.on_channel(tx, ch, |c| c.hb_ratio(tx))?;
        let rf = if tx && self.kind == BoardKind::QLimeSdr {
            self.dac_rate
        } else {
            self.lms.reference_clk_tsp(tx)?
        };
        Ok((rf / ratio as f64, rf))
    }

    pub fn sample_rate_range(&self, _tx: bool) -> Range {
        Range::new(MIN_SAMPLE_RATE, self.kind.max_sample_rate(), 0.0)
    }

    // clocks

    /// Reference clock of the SX and CGEN synthesizers, 10 to 52 MHz.
    pub fn set_reference_clock(&mut self, freq: f64) -> Result<()> {
        if !(REF_CLK_MIN..=REF_CLK_MAX).contains(&freq) {
            return Err(LimeError::invalid(format!(
                "Reference clock {:.3} MHz outside {}..{} MHz",
                freq / 1e6,
                REF_CLK_MIN / 1e6,
                REF_CLK_MAX / 1e6
            )));
        }
        self.lms.set_reference_clk_sx(false, freq);
        self.lms.set_reference_clk_sx(true, freq);
        Ok(())
    }

    pub fn reference_clock(&self) -> f64 {
        self.lms.reference_clk_sx(false)
    }

    pub fn clock_freq(&mut self, id: ClockId) -> Result<f64> {
        match id {
            ClockId::Ref => Ok(self.lms.reference_clk_sx(false)),
            ClockId::Sxr => self.lms.frequency_sx(false),
            ClockId::Sxt => self.lms.frequency_sx(true),
            ClockId::Cgen => self.lms.frequency_cgen(),
            ClockId::RxTsp => self.lms.reference_clk_tsp(false),
            ClockId::TxTsp => self.lms.reference_clk_tsp(true),
        }
    }

    /// A non-positive frequency on SXR, SXT or CGEN re-tunes the VCO at the
    /// current setting.
    pub fn set_clock_freq(&mut self, id: ClockId, freq: f64) -> Result<()> {
        match id {
            ClockId::Ref => self.set_reference_clock(freq),
            ClockId::Sxr | ClockId::Sxt => {
                let tx = id == ClockId::Sxt;
                if freq <= 0.0 {
                    self.lms.tune_vco(if tx { Vco::Sxt } else { Vco::Sxr })
                } else {
                    self.lms.set_frequency_sx(tx, freq)
                }
            }
            ClockId::Cgen => {
                if freq <= 0.0 {
                    self.lms.tune_vco(Vco::Cgen)?;
                } else {
                    self.lms.set_frequency_cgen(freq)?;
                }
                self.update_data_rates()
            }
            ClockId::RxTsp | ClockId::TxTsp => Err(LimeError::not_supported(
                "Setting TSP clocks is not supported.",
            )),
        }
    }

    /// Ids 0 to 2 are the SX VCOs, 3 is CGEN.
    pub fn vco_range(&self, id: usize) -> Result<Range> {
        match id {
            0..=2 => Ok(self.lms.vco_sx[id]),
            3 => Ok(self.lms.vco_cgen),
            _ => Err(LimeError::invalid("Invalid VCO ID.")),
        }
    }

    pub fn set_vco_range(&mut self, id: usize, range: Range) -> Result<()> {
        match id {
            0..=2 => self.lms.vco_sx[id] = range,
            3 => self.lms.vco_cgen = range,
            _ => return Err(LimeError::invalid("Invalid VCO ID.")),
        }
        Ok(())
    }

    // board parameters

    pub fn vctcxo_write(&mut self, val: u16) -> Result<()> {
        self.write_custom_board_param(VCTCXO_PARAM_ID, val as f64, "")
    }

    pub fn vctcxo_read(&mut self) -> Result<u16> {
        let (value, _) = self.read_custom_board_param(VCTCXO_PARAM_ID)?;
        Ok(value.round().clamp(0.0, u16::MAX as f64) as u16)
    }

    /// Value and units of a board parameter.
    pub fn read_custom_board_param(&mut self, id: u8) -> Result<(f64, String)> {
        let params = connection::lock(self.conn()?)?.custom_param_read(&[id])?;
        let param = params
            .into_iter()
            .next()
            .ok_or_else(|| LimeError::io("Empty custom parameter reply"))?;
        Ok((param.value, param.units))
    }

    pub fn write_custom_board_param(&mut self, id: u8, value: f64, units: &str) -> Result<()> {
        let param = CustomParam {
            id,
            value,
            units: units.to_string(),
        };
        let mut c = connection::lock(self.conn()?)?;
        c.custom_param_write(&[param])
    }

    // configuration files and raw access

    pub fn load_config(&mut self, path: &Path) -> Result<()> {
        self.lms.load_config(path)?;
        if self.conn.is_some() {
            self.update_data_rates()?;
        }
        Ok(())
    }

    pub fn save_config(&mut self, path: &Path) -> Result<()> {
        self.lms.save_config(path)
    }

    fn register_address(addr: u32) -> Result<u16> {
        u16::try_from(addr).map_err(|_| LimeError::invalid("Invalid register address."))
    }

    pub fn read_lms_reg(&mut self, addr: u32) -> Result<u16> {
        let addr = Self::register_address(addr)?;
        self.lms.spi_read(addr, true)
    }

    pub fn write_lms_reg(&mut self, addr: u32, val: u16) -> Result<()> {
        let addr = Self::register_address(addr)?;
        self.lms.spi_write(addr, val)
    }

    pub fn register_test(&mut self) -> Result<()> {
        self.lms.registers_test()
    }

    pub fn read_fpga_reg(&mut self, addr: u32) -> Result<u16> {
        let addr = Self::register_address(addr)?;
        let vals = connection::lock(self.conn()?)?.read_fpga(&[addr])?;
        vals.first()
            .copied()
            .ok_or_else(|| LimeError::io("Empty FPGA register read"))
    }

    pub fn write_fpga_reg(&mut self, addr: u32, val: u16) -> Result<()> {
        let addr = Self::register_address(addr)?;
        let mut c = connection::lock(self.conn()?)?;
        c.write_fpga(&[(addr, val)])
    }

    pub fn read_param(&mut self, param: &Parameter) -> Result<u16> {
        if !param.is_valid() {
            return Err(LimeError::invalid("Invalid register field."));
        }
        self.lms.get_param(param)
    }

    pub fn write_param(&mut self, param: &Parameter, val: u16) -> Result<()> {
        self.lms.modify_param(param, val)
    }

    pub fn gpio_read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut c = connection::lock(self.conn()?)?;
        c.gpio_read(len)
    }

    pub fn gpio_write(&mut self, data: &[u8]) -> Result<()> {
        let mut c = connection::lock(self.conn()?)?;
        c.gpio_write(data)
    }

    pub fn enable_calib_cache(&mut self, enable: bool) {
        debug!("Register values cache {}", if enable { "on" } else { "off" });
        self.lms.enable_values_cache(enable);
    }

    pub fn set_data_log_callback(&mut self, callback: Option<DataLogCallback>) -> Result<()> {
        connection::lock(self.conn()?)?.set_data_log_callback(callback);
        Ok(())
    }

    // peripherals

    pub fn load_config_si5351c(&mut self, path: &Path) -> Result<()> {
        let mut si = Si5351c::new();
        si.load_reg_values_from_file(path)?;
        let mut c = connection::lock(self.conn()?)?;
        si.upload_configuration(&mut *c)
    }

    /// Program the clock generator. `clocks` gives the eight output
    /// frequencies in Hz, negative for an inverted output and 0 for off. With
    /// `None` the default register map is uploaded.
    pub fn configure_si5351c(
        &mut self,
        clkin: f64,
        clocks: Option<[f64; 8]>,
        src: PllSource,
    ) -> Result<()> {
        let mut si = Si5351c::new();
        match clocks {
            Some(clocks) => {
                si.set_pll(0, clkin, src)?;
                si.set_pll(1, clkin, src)?;
                for (i, f) in clocks.iter().enumerate() {
                    si.set_clock(i, f.abs(), *f != 0.0, *f < 0.0)?;
                }
                si.configure_clocks()?;
            }
            None => si.reset(),
        }
        let mut c = connection::lock(self.conn()?)?;
        si.upload_configuration(&mut *c)
    }

    pub fn status_si5351c(&mut self) -> Result<StatusBits> {
        let mut c = connection::lock(self.conn()?)?;
        Si5351c::status_bits(&mut *c)
    }

    pub fn clear_status_si5351c(&mut self) -> Result<()> {
        let mut c = connection::lock(self.conn()?)?;
        Si5351c::clear_status(&mut *c)
    }

    /// Write the ADF4002 latches. When both frequencies are set, R and N are
    /// derived from them first and `config` receives the achieved values.
    pub fn configure_adf4002(&mut self, config: &mut Adf4002Config) -> Result<()> {
        if config.f_ref > 0.0 && config.f_vco > 0.0 {
            config.set_fref_fvco(config.f_ref, config.f_vco)?;
        }
        let mut c = connection::lock(self.conn()?)?;
        let addr = c.device_info()?.addr_adf4002;
        c.write_adf4002(addr, &config.latch_words())
    }

    // streaming

    /// Configure one stream direction, creating the streamer on first use.
    pub fn setup_stream(&mut self, config: StreamConfig) -> Result<()> {
        self.check_channel(config.is_tx, config.channel)?;
        let conn = self.conn()?.clone();
        let streamer = self.streamer.get_or_insert_with(|| Streamer::new(conn));
        streamer.setup(config)?;
        self.update_data_rates()
    }

    /// Start a stream. Without a prior setup a FIFO stream in the default
    /// format is created on channel 0.
    pub fn start_stream(&mut self, tx: bool) -> Result<()> {
        let conn = self.conn()?.clone();
        let streamer = self.streamer.get_or_insert_with(|| Streamer::new(conn));
        if !streamer.is_setup(tx) {
            streamer.setup(StreamConfig::new(tx, 0))?;
        }
        self.update_data_rates()?;
        self.streamer_mut()?.start(tx)
    }

    pub fn stop_stream(&mut self, tx: bool) -> Result<()> {
        match self.streamer.as_mut() {
            Some(streamer) => streamer.stop(tx),
            None => Ok(()),
        }
    }

    fn streamer_mut(&mut self) -> Result<&mut Streamer> {
        self.streamer
            .as_mut()
            .ok_or_else(|| LimeError::invalid("Stream is not set up."))
    }

    pub fn recv_stream(
        &mut self,
        samples: &mut [Complex<i16>],
        meta: &mut StreamMeta,
        timeout: Duration,
    ) -> Result<usize> {
        self.streamer_mut()?.recv(samples, meta, timeout)
    }

    /// Receive samples scaled to [-1, 1).
    pub fn recv_stream_f32(
        &mut self,
        samples: &mut [Complex<f32>],
        meta: &mut StreamMeta,
        timeout: Duration,
    ) -> Result<usize> {
        let streamer = self.streamer_mut()?;
        let scale = streamer
            .link_format(false)
            .ok_or_else(|| LimeError::invalid("Stream is not set up."))?
            .full_scale();
        let mut raw = vec![Complex::new(0i16, 0i16); samples.len()];
        let n = streamer.recv(&mut raw, meta, timeout)?;
        for (dst, src) in samples.iter_mut().zip(&raw[..n]) {
            *dst = Complex::new(src.re as f32 / scale, src.im as f32 / scale);
        }
        Ok(n)
    }

    pub fn send_stream(
        &mut self,
        samples: &[Complex<i16>],
        meta: &StreamMeta,
        timeout: Duration,
    ) -> Result<usize> {
        self.streamer_mut()?.send(samples, meta, timeout)
    }

    /// Send samples in [-1, 1]; values outside are clipped.
    pub fn send_stream_f32(
        &mut self,
        samples: &[Complex<f32>],
        meta: &StreamMeta,
        timeout: Duration,
    ) -> Result<usize> {
        let streamer = self.streamer_mut()?;
        let max = streamer
            .link_format(true)
            .ok_or_else(|| LimeError::invalid("Stream is not set up."))?
            .full_scale()
            - 1.0;
        let raw: Vec<Complex<i16>> = samples
            .iter()
            .map(|s| {
                Complex::new(
                    (s.re.clamp(-1.0, 1.0) * max).round() as i16,
                    (s.im.clamp(-1.0, 1.0) * max).round() as i16,
                )
            })
            .collect();
        streamer.send(&raw, meta, timeout)
    }

    pub fn stream_status(&self, tx: bool) -> Result<StreamStatus> {
        self.streamer
            .as_ref()
            .ok_or_else(|| LimeError::invalid("Stream is not set up."))?
            .status(tx)
    }

    /// Host sample format of a configured stream.
    pub fn stream_format(&self, tx: bool) -> Option<DataFormat> {
        self.streamer.as_ref()?.data_format(tx)
    }

    // programming

    fn program(
        &mut self,
        device: ProgramDevice,
        data: &[u8],
        target: ProgramTarget,
        mut progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let conn = self.conn()?.clone();
        let total = data.len();
        info!("Programming {:?} to {:?}, {} bytes", device, target, total);
        let mut index = 0u32;
        for chunk in data.chunks(PROGRAM_CHUNK_SIZE) {
            connection::lock(&conn)?.program_chunk(device, target, index, chunk)?;
            index += 1;
            let sent = (index as usize * PROGRAM_CHUNK_SIZE).min(total);
            if let Some(cb) = progress.as_mut() {
                if cb(sent, total) {
                    warn!("Programming aborted at {}/{} bytes", sent, total);
                    return Err(LimeError::cancelled("Programming aborted."));
                }
            }
        }
        connection::lock(&conn)?.program_chunk(device, target, index, &[])?;
        info!("Programming {:?} done", device);
        Ok(())
    }

    pub fn program_fpga(
        &mut self,
        data: &[u8],
        target: ProgramTarget,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        self.program(ProgramDevice::Fpga, data, target, progress)
    }

    pub fn program_fpga_file(
        &mut self,
        path: &Path,
        target: ProgramTarget,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let data = fs::read(path)?;
        self.program_fpga(&data, target, progress)
    }

    pub fn program_firmware(
        &mut self,
        data: &[u8],
        target: ProgramTarget,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        self.program(ProgramDevice::Firmware, data, target, progress)
    }

    pub fn program_firmware_file(
        &mut self,
        path: &Path,
        target: ProgramTarget,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let data = fs::read(path)?;
        self.program_firmware(&data, target, progress)
    }

    /// Load an image into the LMS7002M MCU.
    pub fn program_lms_mcu(
        &mut self,
        data: &[u8],
        target: ProgramTarget,
        mut progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let total = data.len();
        if let Some(cb) = progress.as_mut() {
            if cb(0, total) {
                warn!("MCU programming aborted before transfer");
                return Err(LimeError::cancelled("Programming aborted."));
            }
        }
        self.lms.program_mcu(data, target.into())?;
        if let Some(cb) = progress.as_mut() {
            // the image went out in one transfer; aborting now leaves the MCU in reset
            if cb(total, total) {
                warn!("MCU programming aborted after transfer");
                self.lms.reset_mcu()?;
                return Err(LimeError::cancelled("Programming aborted."));
            }
        }
        Ok(())
    }

    pub fn reset_lms_mcu(&mut self) -> Result<()> {
        self.lms.reset_mcu()
    }
}
