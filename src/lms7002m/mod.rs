//! LMS7002M transceiver model: register cache, clock synthesizers, NCO,
//! GFIR memories and the TSP test signal generator.

pub mod mcu;
pub mod params;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::connection::{self, SharedConnection};
use crate::error::{LimeError, Result};
use crate::Range;
use params::*;

pub const DEFAULT_REF_CLK: f64 = 30.72e6;
pub const CGEN_MAX_FREQ: f64 = 640e6;
/// Reference clock limits of the SX and CGEN synthesizers.
pub const REF_CLK_MIN: f64 = 10e6;
pub const REF_CLK_MAX: f64 = 52e6;
/// Largest value of the 10-bit INT_SDM fields.
const INT_SDM_MAX: u16 = (1 << 10) - 1;

const VCO_SETTLE: Duration = Duration::from_micros(50);
const FRAC_SCALE: f64 = 1048576.0;
const NCO_SCALE: f64 = 4294967296.0;

const CONFIG_TYPE: &str = "lms7002m_minimal_config";

/// Scratch registers exercised by the register test.
const TEST_REGISTERS: [u16; 8] = [
    0x0242, 0x0243, 0x0280, 0x0281, 0x0442, 0x0443, 0x0480, 0x0481,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vco {
    Sxr,
    Sxt,
    Cgen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestSignal {
    None = 0,
    NcoDiv8 = 1,
    NcoDiv4 = 2,
    NcoDiv8Full = 3,
    NcoDiv4Full = 4,
    Dc = 5,
}

impl TestSignal {
    pub fn from_raw(val: u32) -> Option<TestSignal> {
        match val {
            0 => Some(TestSignal::None),
            1 => Some(TestSignal::NcoDiv8),
            2 => Some(TestSignal::NcoDiv4),
            3 => Some(TestSignal::NcoDiv8Full),
            4 => Some(TestSignal::NcoDiv4Full),
            5 => Some(TestSignal::Dc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfirFilter {
    Gfir1 = 0,
    Gfir2 = 1,
    Gfir3 = 2,
}

impl GfirFilter {
    pub fn from_raw(val: u32) -> Option<GfirFilter> {
        match val {
            0 => Some(GfirFilter::Gfir1),
            1 => Some(GfirFilter::Gfir2),
            2 => Some(GfirFilter::Gfir3),
            _ => None,
        }
    }

    /// Number of taps in the coefficient memory.
    pub fn capacity(&self) -> usize {
        match self {
            GfirFilter::Gfir3 => 120,
            _ => 40,
        }
    }

    fn taps_per_length_step(&self) -> usize {
        match self {
            GfirFilter::Gfir3 => 15,
            _ => 5,
        }
    }
}

pub struct Lms7002m {
    conn: Option<SharedConnection>,
    /// Register values of channels A and B. Shared registers live in A.
    regs: [BTreeMap<u16, u16>; 2],
    use_cache: bool,
    ref_clk_sxr: f64,
    ref_clk_sxt: f64,
    pub vco_sx: [Range; 3],
    pub vco_cgen: Range,
}

impl Default for Lms7002m {
    fn default() -> Self {
        Self::new()
    }
}

impl Lms7002m {
    pub fn new() -> Lms7002m {
        let mut chip = Lms7002m {
            conn: None,
            regs: [BTreeMap::new(), BTreeMap::new()],
            use_cache: false,
            ref_clk_sxr: DEFAULT_REF_CLK,
            ref_clk_sxt: DEFAULT_REF_CLK,
            vco_sx: [
                Range::new(3800e6, 5222e6, 0.0),
                Range::new(4961e6, 6754e6, 0.0),
                Range::new(6306e6, 7714e6, 0.0),
            ],
            vco_cgen: Range::new(1930e6, 2940e6, 0.0),
        };
        chip.load_defaults();
        chip
    }

    pub fn set_connection(&mut self, conn: Option<SharedConnection>) {
        self.conn = conn;
    }

    pub fn connection(&self) -> Option<&SharedConnection> {
        self.conn.as_ref()
    }

    pub fn enable_values_cache(&mut self, enable: bool) {
        self.use_cache = enable;
    }

    pub fn values_cache_enabled(&self) -> bool {
        self.use_cache
    }

    /// Reset the register cache to power-on values.
    pub fn load_defaults(&mut self) {
        for map in self.regs.iter_mut() {
            map.clear();
        }
        for addr in register_addresses() {
            let val = default_value(addr);
            self.regs[0].insert(addr, val);
            if addr >= 0x0100 {
                self.regs[1].insert(addr, val);
            }
        }
    }

    fn mac(&self) -> u16 {
        self.regs[0].get(&MAC.address).copied().unwrap_or(0) & 0x3
    }

    fn read_index(&self, addr: u16) -> usize {
        if addr >= 0x0100 && self.mac() == 2 {
            1
        } else {
            0
        }
    }

    fn store(&mut self, addr: u16, val: u16) {
        if addr < 0x0100 {
            self.regs[0].insert(addr, val);
            return;
        }
        let mac = self.mac();
        if mac & 1 != 0 {
            self.regs[0].insert(addr, val);
        }
        if mac & 2 != 0 {
            self.regs[1].insert(addr, val);
        }
    }

    pub fn spi_write(&mut self, addr: u16, val: u16) -> Result<()> {
        self.spi_write_batch(&[(addr, val)])
    }

    pub fn spi_write_batch(&mut self, regs: &[(u16, u16)]) -> Result<()> {
        if let Some(conn) = self.conn.as_ref() {
            connection::lock(conn)?.write_lms(regs)?;
        }
        for &(addr, val) in regs {
            self.store(addr, val);
        }
        Ok(())
    }

    /// Read a register, from the cache when allowed, otherwise from the chip.
    pub fn spi_read(&mut self, addr: u16, from_chip: bool) -> Result<u16> {
        let conn = match self.conn.as_ref() {
            Some(conn) if from_chip || !self.use_cache => conn.clone(),
            _ => {
                let idx = self.read_index(addr);
                return Ok(self.regs[idx].get(&addr).copied().unwrap_or(0));
            }
        };
        let val = connection::lock(&conn)?
            .read_lms(&[addr])?
            .first()
            .copied()
            .ok_or_else(|| LimeError::io("Empty register read"))?;
        let idx = self.read_index(addr);
        self.regs[idx].insert(addr, val);
        Ok(val)
    }

    pub fn read_param(&mut self, param: &Parameter, from_chip: bool) -> Result<u16> {
        Ok(param.get(self.spi_read(param.address, from_chip)?))
    }

    pub fn get_param(&mut self, param: &Parameter) -> Result<u16> {
        self.read_param(param, false)
    }

    pub fn modify_param(&mut self, param: &Parameter, val: u16) -> Result<()> {
        if !param.is_valid() {
            return Err(LimeError::invalid("Invalid register field."));
        }
        let reg = self.spi_read(param.address, false)?;
        self.spi_write(param.address, param.set(reg, val))
    }

    /// Run `f` with MAC set to `mac`, then restore the previous selection.
    pub fn with_mac<T>(&mut self, mac: u16, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.get_param(&MAC)?;
        self.modify_param(&MAC, mac)?;
        let out = f(self);
        let restored = self.modify_param(&MAC, saved);
        let out = out?;
        restored?;
        Ok(out)
    }

    /// Pulse the hardware reset and return the cache to power-on values.
    pub fn reset_chip(&mut self) -> Result<()> {
        let conn = self.conn.clone().ok_or_else(LimeError::not_connected)?;
        connection::lock(&conn)?.reset_chip()?;
        self.load_defaults();
        info!("LMS7002M reset");
        Ok(())
    }

    fn section_registers(&self, channel: usize) -> Vec<u16> {
        register_addresses()
            .filter(|a| *a != MAC.address)
            .filter(|a| channel == 0 || *a >= 0x0100)
            .collect()
    }

    /// Write the whole cache to the chip.
    pub fn upload_all(&mut self) -> Result<()> {
        let conn = self.conn.clone().ok_or_else(LimeError::not_connected)?;
        let mac_reg = self.regs[0].get(&MAC.address).copied().unwrap_or(0);
        let mut c = connection::lock(&conn)?;
        for ch in 0..2 {
            c.write_lms(&[(MAC.address, MAC.set(mac_reg, ch as u16 + 1))])?;
            let regs: Vec<(u16, u16)> = self
                .section_registers(ch)
                .into_iter()
                .map(|a| (a, self.regs[ch].get(&a).copied().unwrap_or(0)))
                .collect();
            c.write_lms(&regs)?;
        }
        c.write_lms(&[(MAC.address, mac_reg)])?;
        debug!("Uploaded register cache");
        Ok(())
    }

    /// Refresh the whole cache from the chip.
    pub fn download_all(&mut self) -> Result<()> {
        let conn = self.conn.clone().ok_or_else(LimeError::not_connected)?;
        let mut c = connection::lock(&conn)?;
        let mac_reg = c
            .read_lms(&[MAC.address])?
            .first()
            .copied()
            .ok_or_else(|| LimeError::io("Empty register read"))?;
        for ch in 0..2 {
            c.write_lms(&[(MAC.address, MAC.set(mac_reg, ch as u16 + 1))])?;
            let addrs = self.section_registers(ch);
            let values = c.read_lms(&addrs)?;
            for (addr, val) in addrs.into_iter().zip(values) {
                self.regs[ch].insert(addr, val);
            }
        }
        c.write_lms(&[(MAC.address, mac_reg)])?;
        self.regs[0].insert(MAC.address, mac_reg);
        debug!("Downloaded register cache");
        Ok(())
    }

    /// Write test patterns to scratch registers of both channels.
    pub fn registers_test(&mut self) -> Result<()> {
        if self.conn.is_none() {
            return Err(LimeError::not_connected());
        }
        let saved_mac = self.get_param(&MAC)?;
        let mut failure = None;
        for mac in [1, 2] {
            self.modify_param(&MAC, mac)?;
            let mut originals = Vec::with_capacity(TEST_REGISTERS.len());
            for addr in TEST_REGISTERS {
                originals.push((addr, self.spi_read(addr, true)?));
            }
            'patterns: for pattern in [0x5A5A, 0xA5A5] {
                let writes: Vec<(u16, u16)> = TEST_REGISTERS.iter().map(|a| (*a, pattern)).collect();
                self.spi_write_batch(&writes)?;
                for addr in TEST_REGISTERS {
                    let got = self.spi_read(addr, true)?;
                    if got != pattern {
                        failure = Some((addr, pattern, got));
                        break 'patterns;
                    }
                }
            }
            self.spi_write_batch(&originals)?;
            if failure.is_some() {
                break;
            }
        }
        self.modify_param(&MAC, saved_mac)?;
        match failure {
            Some((addr, wrote, read)) => Err(LimeError::io(format!(
                "Register test failed at 0x{:04X}: wrote 0x{:04X}, read 0x{:04X}",
                addr, wrote, read
            ))),
            None => {
                info!("Register test passed");
                Ok(())
            }
        }
    }

    pub fn save_config(&mut self, path: &Path) -> Result<()> {
        if self.conn.is_some() {
            self.download_all()?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "[file_info]")?;
        writeln!(out, "type={}", CONFIG_TYPE)?;
        writeln!(out, "version=1")?;
        writeln!(out, "[lms7002_registers_a]")?;
        for (addr, val) in self.regs[0].iter() {
            writeln!(out, "0x{:04X}=0x{:04X}", addr, val)?;
        }
        writeln!(out, "[lms7002_registers_b]")?;
        for (addr, val) in self.regs[1].iter().filter(|(a, _)| **a >= 0x0100) {
            writeln!(out, "0x{:04X}=0x{:04X}", addr, val)?;
        }
        writeln!(out, "[reference_clocks]")?;
        writeln!(out, "sxt_ref_clk_mhz={}", self.ref_clk_sxt / 1e6)?;
        writeln!(out, "sxr_ref_clk_mhz={}", self.ref_clk_sxr / 1e6)?;
        out.flush()?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn load_config(&mut self, path: &Path) -> Result<()> {
        let reader = BufReader::new(File::open(path)?);
        let mut section = String::new();
        let mut file_type = None;
        let mut regs: [Vec<(u16, u16)>; 2] = [Vec::new(), Vec::new()];
        let mut ref_sxt = None;
        let mut ref_sxr = None;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_string();
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| LimeError::invalid(format!("Malformed config line: {}", line)))?;
            let (key, value) = (key.trim(), value.trim());
            match section.as_str() {
                "file_info" if key == "type" => file_type = Some(value.to_string()),
                "lms7002_registers_a" => regs[0].push((parse_hex(key)?, parse_hex(value)?)),
                "lms7002_registers_b" => regs[1].push((parse_hex(key)?, parse_hex(value)?)),
                "reference_clocks" => {
                    let mhz: f64 = value
                        .parse()
                        .map_err(|_| LimeError::invalid(format!("Bad clock value: {}", value)))?;
                    match key {
                        "sxt_ref_clk_mhz" => ref_sxt = Some(mhz * 1e6),
                        "sxr_ref_clk_mhz" => ref_sxr = Some(mhz * 1e6),
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        if file_type.as_deref() != Some(CONFIG_TYPE) {
            return Err(LimeError::invalid(format!(
                "{} is not an LMS7002M configuration file",
                path.display()
            )));
        }
        for (ch, list) in regs.iter().enumerate() {
            for &(addr, val) in list {
                if ch == 0 || addr >= 0x0100 {
                    self.regs[ch].insert(addr, val);
                }
            }
        }
        if let Some(f) = ref_sxt {
            self.ref_clk_sxt = f;
        }
        if let Some(f) = ref_sxr {
            self.ref_clk_sxr = f;
        }
        if self.conn.is_some() {
            self.upload_all()?;
        }
        info!("Loaded configuration from {}", path.display());
        Ok(())
    }

    pub fn reference_clk_sx(&self, tx: bool) -> f64 {
        if tx {
            self.ref_clk_sxt
        } else {
            self.ref_clk_sxr
        }
    }

    pub fn set_reference_clk_sx(&mut self, tx: bool, freq: f64) {
        if tx {
            self.ref_clk_sxt = freq;
        } else {
            self.ref_clk_sxr = freq;
        }
    }

    pub fn frequency_cgen(&mut self) -> Result<f64> {
        let ref_clk = self.reference_clk_sx(false);
        let div = self.get_param(&DIV_OUTCH_CGEN)? as f64;
        let int = self.get_param(&INT_SDM_CGEN)? as f64;
        let frac = ((self.get_param(&FRAC_SDM_CGEN_MSB)? as u32) << 16)
            | self.get_param(&FRAC_SDM_CGEN_LSB)? as u32;
        Ok((ref_clk / 2.0) / (div + 1.0) * (int + 1.0 + frac as f64 / FRAC_SCALE))
    }

    pub fn set_frequency_cgen(&mut self, freq: f64) -> Result<()> {
        if freq <= 0.0 || freq > CGEN_MAX_FREQ {
            return Err(LimeError::invalid(format!(
                "CGEN frequency {:.3} MHz out of range",
                freq / 1e6
            )));
        }
        let candidates: Vec<u16> = (0u16..=255)
            .filter(|div| self.vco_cgen.contains(freq * 2.0 * (*div as f64 + 1.0)))
            .collect();
        if candidates.is_empty() {
            return Err(LimeError::invalid(format!(
                "CGEN: no divider reaches {:.3} MHz",
                freq / 1e6
            )));
        }
        let div = candidates[candidates.len() / 2];
        let vco = freq * 2.0 * (div as f64 + 1.0);
        let n = vco / self.reference_clk_sx(false);
        let (int, frac) = sdm_words(n, 1, "CGEN")?;
        self.modify_param(&INT_SDM_CGEN, int)?;
        self.modify_param(&FRAC_SDM_CGEN_LSB, (frac & 0xFFFF) as u16)?;
        self.modify_param(&FRAC_SDM_CGEN_MSB, (frac >> 16) as u16)?;
        self.modify_param(&DIV_OUTCH_CGEN, div)?;
        debug!(
            "CGEN: {:.3} MHz, VCO {:.3} MHz, INT={} FRAC={} DIV_OUTCH={}",
            freq / 1e6,
            vco / 1e6,
            int,
            frac,
            div
        );
        self.tune_vco(Vco::Cgen)
    }

    /// Clock feeding the TxTSP or RxTSP block.
    pub fn reference_clk_tsp(&mut self, tx: bool) -> Result<f64> {
        let cgen = self.frequency_cgen()?;
        let clkl = cgen / 2f64.powi(self.get_param(&CLKH_OV_CLKL_CGEN)? as i32);
        let adc_from_clkh = self.get_param(&EN_ADCCLKH_CLKGN)? != 0;
        Ok(match (adc_from_clkh, tx) {
            (false, true) => clkl,
            (false, false) => cgen / 4.0,
            (true, true) => cgen,
            (true, false) => clkl / 4.0,
        })
    }

    pub fn frequency_sx(&mut self, tx: bool) -> Result<f64> {
        let ref_clk = self.reference_clk_sx(tx);
        self.with_mac(if tx { 2 } else { 1 }, |c| {
            let int = c.get_param(&INT_SDM)? as f64;
            let frac = ((c.get_param(&FRAC_SDM_MSB)? as u32) << 16)
                | c.get_param(&FRAC_SDM_LSB)? as u32;
            let div_loch = c.get_param(&DIV_LOCH)? as i32;
            let en_div2 = c.get_param(&EN_DIV2_DIVPROG)? as f64;
            Ok(ref_clk / 2f64.powi(div_loch + 1)
                * (en_div2 + 1.0)
                * (int + 4.0 + frac as f64 / FRAC_SCALE))
        })
    }

    pub fn set_frequency_sx(&mut self, tx: bool, freq: f64) -> Result<()> {
        if freq <= 0.0 {
            return Err(LimeError::invalid("Invalid frequency value."));
        }
        let (div_loch, vco) = (0..=6)
            .rev()
            .map(|div: i32| (div, freq * 2f64.powi(div + 1)))
            .find(|(_, vco)| self.vco_sx.iter().any(|r| r.contains(*vco)))
            .ok_or_else(|| {
                LimeError::invalid(format!("SX: {:.3} MHz cannot be synthesized", freq / 1e6))
            })?;
        let en_div2 = vco > 5.5e9;
        let n = vco / (self.reference_clk_sx(tx) * if en_div2 { 2.0 } else { 1.0 });
        let (int, frac) = sdm_words(n, 4, if tx { "SXT" } else { "SXR" })?;
        let candidates: Vec<u16> = (0..3u16)
            .filter(|i| self.vco_sx[*i as usize].contains(vco))
            .collect();
        let vco_id = if tx { Vco::Sxt } else { Vco::Sxr };
        self.with_mac(if tx { 2 } else { 1 }, |c| {
            c.modify_param(&EN_DIV2_DIVPROG, en_div2 as u16)?;
            c.modify_param(&INT_SDM, int)?;
            c.modify_param(&FRAC_SDM_LSB, (frac & 0xFFFF) as u16)?;
            c.modify_param(&FRAC_SDM_MSB, (frac >> 16) as u16)?;
            c.modify_param(&DIV_LOCH, div_loch as u16)?;
            Ok(())
        })?;
        for sel in candidates {
            self.with_mac(if tx { 2 } else { 1 }, |c| c.modify_param(&SEL_VCO, sel))?;
            match self.tune_vco(vco_id) {
                Ok(()) => {
                    debug!(
                        "{:?}: {:.3} MHz, VCO{} {:.3} MHz, DIV_LOCH={}",
                        vco_id,
                        freq / 1e6,
                        sel,
                        vco / 1e6,
                        div_loch
                    );
                    return Ok(());
                }
                Err(e) => debug!("{:?}: VCO{} not usable: {}", vco_id, sel, e),
            }
        }
        Err(LimeError::io(format!(
            "{:?}: VCO failed to lock at {:.3} MHz",
            vco_id,
            freq / 1e6
        )))
    }

    /// Search the VCO capacitor bank for a setting where the comparators
    /// report lock.
    pub fn tune_vco(&mut self, vco: Vco) -> Result<()> {
        match vco {
            Vco::Sxr => self.with_mac(1, |c| c.tune_csw(vco, &CSW_VCO, &VCO_CMPHO, &VCO_CMPLO)),
            Vco::Sxt => self.with_mac(2, |c| c.tune_csw(vco, &CSW_VCO, &VCO_CMPHO, &VCO_CMPLO)),
            Vco::Cgen => self.tune_csw(vco, &CSW_VCO_CGEN, &VCO_CMPHO_CGEN, &VCO_CMPLO_CGEN),
        }
    }

    fn tune_csw(
        &mut self,
        vco: Vco,
        csw: &Parameter,
        cmpho: &Parameter,
        cmplo: &Parameter,
    ) -> Result<()> {
        let mut value: u16 = 0;
        for bit in (0..8).rev() {
            value |= 1 << bit;
            self.modify_param(csw, value)?;
            thread::sleep(VCO_SETTLE);
            if self.read_param(cmplo, true)? != 0 {
                value &= !(1 << bit);
            }
        }
        self.modify_param(csw, value)?;
        thread::sleep(VCO_SETTLE);
        let hi = self.read_param(cmpho, true)?;
        let lo = self.read_param(cmplo, true)?;
        if hi == 1 && lo == 0 {
            debug!("{:?} locked, CSW={}", vco, value);
            Ok(())
        } else {
            Err(LimeError::io(format!(
                "{:?} VCO not locked (CMPHO={}, CMPLO={})",
                vco, hi, lo
            )))
        }
    }

    /// Load up to 16 NCO frequencies (FCW mode) with a common phase offset
    /// in degrees.
    pub fn set_nco_frequencies(&mut self, tx: bool, freqs: &[f64], pho: f64) -> Result<()> {
        if freqs.len() > 16 {
            return Err(LimeError::invalid("At most 16 NCO frequencies."));
        }
        let ref_clk = self.reference_clk_tsp(tx)?;
        let t = tsp(tx);
        let mut writes = Vec::with_capacity(33);
        for (i, f) in freqs.iter().enumerate() {
            let fcw = (f / ref_clk * NCO_SCALE).round() as i64 as u32;
            writes.push((t.nco_base + 2 + 2 * i as u16, (fcw >> 16) as u16));
            writes.push((t.nco_base + 3 + 2 * i as u16, fcw as u16));
        }
        writes.push((t.nco_base + 1, phase_word(pho)));
        self.spi_write_batch(&writes)?;
        self.modify_param(&t.nco_mode, 0)
    }

    pub fn nco_frequencies(&mut self, tx: bool) -> Result<(Vec<f64>, f64)> {
        let ref_clk = self.reference_clk_tsp(tx)?;
        let t = tsp(tx);
        let mut freqs = Vec::with_capacity(16);
        for i in 0..16u16 {
            let hi = self.spi_read(t.nco_base + 2 + 2 * i, false)? as u32;
            let lo = self.spi_read(t.nco_base + 3 + 2 * i, false)? as u32;
            freqs.push(((hi << 16) | lo) as f64 * ref_clk / NCO_SCALE);
        }
        let pho = phase_degrees(self.spi_read(t.nco_base + 1, false)?);
        Ok((freqs, pho))
    }

    /// Load up to 16 NCO phase offsets in degrees (PHO mode) with a common
    /// frequency.
    pub fn set_nco_phases(&mut self, tx: bool, phases: &[f64], fcw: f64) -> Result<()> {
        if phases.len() > 16 {
            return Err(LimeError::invalid("At most 16 NCO phases."));
        }
        let ref_clk = self.reference_clk_tsp(tx)?;
        let t = tsp(tx);
        let word = (fcw / ref_clk * NCO_SCALE).round() as i64 as u32;
        let mut writes = vec![
            (t.nco_base + 2, (word >> 16) as u16),
            (t.nco_base + 3, word as u16),
        ];
        for (i, p) in phases.iter().enumerate() {
            writes.push((t.nco_base + 4 + i as u16, phase_word(*p)));
        }
        self.spi_write_batch(&writes)?;
        self.modify_param(&t.nco_mode, 1)
    }

    pub fn nco_phases(&mut self, tx: bool) -> Result<(Vec<f64>, f64)> {
        let ref_clk = self.reference_clk_tsp(tx)?;
        let t = tsp(tx);
        let mut phases = Vec::with_capacity(16);
        for i in 0..16u16 {
            phases.push(phase_degrees(self.spi_read(t.nco_base + 4 + i, false)?));
        }
        let hi = self.spi_read(t.nco_base + 2, false)? as u32;
        let lo = self.spi_read(t.nco_base + 3, false)? as u32;
        Ok((phases, ((hi << 16) | lo) as f64 * ref_clk / NCO_SCALE))
    }

    pub fn set_nco_index(&mut self, tx: bool, index: usize, down: bool) -> Result<()> {
        if index > 15 {
            return Err(LimeError::invalid("NCO index out of range."));
        }
        let t = tsp(tx);
        self.modify_param(&t.cmix_byp, 0)?;
        self.modify_param(&t.nco_sel, index as u16)?;
        self.modify_param(&t.cmix_sc, down as u16)
    }

    pub fn nco_index(&mut self, tx: bool) -> Result<usize> {
        let t = tsp(tx);
        if self.get_param(&t.cmix_byp)? != 0 {
            return Err(LimeError::invalid("NCO is disabled."));
        }
        Ok(self.get_param(&t.nco_sel)? as usize)
    }

    fn gfir_address(tx: bool, filt: GfirFilter, tap: usize) -> u16 {
        let base = tsp(tx).gfir_base[filt as usize];
        match filt {
            GfirFilter::Gfir3 => base + 0x40 * (tap / 40) as u16 + (tap % 40) as u16,
            _ => base + tap as u16,
        }
    }

    /// Decimation/interpolation ratio of the TSP half-band chain.
    pub fn hb_ratio(&mut self, tx: bool) -> Result<u32> {
        let hb = self.get_param(&tsp(tx).hb_ovr)?;
        Ok(if hb == 7 { 1 } else { 2 << hb })
    }

    /// Coefficients with |c| <= 1 are scaled to Q15, anything else is
    /// written as integers.
    pub fn set_gfir_coef(&mut self, tx: bool, filt: GfirFilter, coef: &[f64]) -> Result<()> {
        let capacity = filt.capacity();
        if coef.len() > capacity {
            return Err(LimeError::invalid(format!(
                "{:?} holds at most {} coefficients",
                filt, capacity
            )));
        }
        let scale = if coef.iter().all(|c| c.abs() <= 1.0) {
            32767.0
        } else {
            1.0
        };
        let writes: Vec<(u16, u16)> = (0..capacity)
            .map(|tap| {
                let v = coef.get(tap).copied().unwrap_or(0.0) * scale;
                let v = v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                (Self::gfir_address(tx, filt, tap), v as u16)
            })
            .collect();
        self.spi_write_batch(&writes)?;
        let per_step = filt.taps_per_length_step();
        let length = ((coef.len() + per_step - 1) / per_step).clamp(1, 8) - 1;
        let ratio = self.hb_ratio(tx)?;
        let t = tsp(tx);
        self.modify_param(&t.gfir_l[filt as usize], length as u16)?;
        self.modify_param(&t.gfir_n[filt as usize], (ratio - 1) as u16)
    }

    pub fn gfir_coef(&mut self, tx: bool, filt: GfirFilter) -> Result<Vec<f64>> {
        (0..filt.capacity())
            .map(|tap| {
                let raw = self.spi_read(Self::gfir_address(tx, filt, tap), false)? as i16;
                Ok(raw as f64 / 32767.0)
            })
            .collect()
    }

    pub fn enable_gfir(&mut self, tx: bool, filt: GfirFilter, enabled: bool) -> Result<()> {
        self.modify_param(&tsp(tx).gfir_byp[filt as usize], !enabled as u16)
    }

    pub fn set_test_signal(&mut self, tx: bool, sig: TestSignal, dc_i: i16, dc_q: i16) -> Result<()> {
        let t = tsp(tx);
        match sig {
            TestSignal::None => self.modify_param(&t.insel, 0),
            TestSignal::Dc => {
                self.modify_param(&t.insel, 1)?;
                self.modify_param(&t.tsgmode, 1)?;
                self.load_dc(&t.dc_reg, &t.tsgdcldi, dc_i as u16)?;
                self.load_dc(&t.dc_reg, &t.tsgdcldq, dc_q as u16)
            }
            _ => {
                let (fcw, full) = match sig {
                    TestSignal::NcoDiv8 => (1, 0),
                    TestSignal::NcoDiv4 => (2, 0),
                    TestSignal::NcoDiv8Full => (1, 1),
                    _ => (2, 1),
                };
                self.modify_param(&t.insel, 1)?;
                self.modify_param(&t.tsgmode, 0)?;
                self.modify_param(&t.tsgfcw, fcw)?;
                self.modify_param(&t.tsgfc, full)
            }
        }
    }

    fn load_dc(&mut self, dc_reg: &Parameter, strobe: &Parameter, val: u16) -> Result<()> {
        self.modify_param(dc_reg, val)?;
        self.modify_param(strobe, 0)?;
        self.modify_param(strobe, 1)?;
        self.modify_param(strobe, 0)
    }

    pub fn test_signal(&mut self, tx: bool) -> Result<TestSignal> {
        let t = tsp(tx);
        if self.get_param(&t.insel)? == 0 {
            return Ok(TestSignal::None);
        }
        if self.get_param(&t.tsgmode)? != 0 {
            return Ok(TestSignal::Dc);
        }
        let fcw = self.get_param(&t.tsgfcw)?;
        let full = self.get_param(&t.tsgfc)? != 0;
        Ok(match (fcw, full) {
            (1, false) => TestSignal::NcoDiv8,
            (1, true) => TestSignal::NcoDiv8Full,
            (_, false) => TestSignal::NcoDiv4,
            (_, true) => TestSignal::NcoDiv4Full,
        })
    }
}

fn parse_hex(s: &str) -> Result<u16> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|_| LimeError::invalid(format!("Bad hex value: {}", s)))
}

/// Integer and 20-bit fractional part of a synthesizer ratio.
fn split_fraction(n: f64) -> (f64, u32) {
    let mut int = n.floor();
    let mut frac = ((n - int) * FRAC_SCALE).round() as u32;
    if frac >= 1 << 20 {
        int += 1.0;
        frac = 0;
    }
    (int, frac)
}

/// INT_SDM code (integer part minus `offset`) and fraction for ratio `n`.
/// The code must fit the 10-bit INT_SDM field.
fn sdm_words(n: f64, offset: u16, name: &str) -> Result<(u16, u32)> {
    let (int, frac) = split_fraction(n);
    let min = offset as f64;
    let max = (offset + INT_SDM_MAX) as f64;
    if !(min..=max).contains(&int) {
        return Err(LimeError::out_of_range(format!(
            "{}: divider ratio {:.3} outside {}..{}",
            name,
            n,
            min,
            max + 1.0
        )));
    }
    Ok((int as u16 - offset, frac))
}

fn phase_word(degrees: f64) -> u16 {
    (degrees.rem_euclid(360.0) / 360.0 * 65536.0).round() as u32 as u16
}

fn phase_degrees(word: u16) -> f64 {
    word as f64 * 360.0 / 65536.0
}
