//! Si5351C clock generator on the LimeSDR-USB board, reached over the
//! board's I2C bridge.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use bitflags::bitflags;
use log::{debug, info};

use crate::connection::Connection;
use crate::error::{LimeError, Result};

const REG_STATUS: u8 = 0;
const REG_STATUS_STICKY: u8 = 1;
const REG_OUTPUT_ENABLE: u8 = 3;
const REG_PLL_INPUT: u8 = 15;
const REG_CLK_CONTROL: u8 = 16;
const REG_PLL_A: u8 = 26;
const REG_PLL_B: u8 = 34;
const REG_MS0: u8 = 42;
const REG_MS6: u8 = 90;
const REG_MS67_RDIV: u8 = 92;
const REG_PLL_RESET: u8 = 177;

const FRAC_DENOM: u32 = 1_048_575;
const PLL_MIN: f64 = 600e6;
const PLL_MAX: f64 = 900e6;
const PLL_DEFAULT: f64 = 800e6;
const OUT_MIN: f64 = 8e3;
const OUT_MAX: f64 = 200e6;
const PFD_MAX: f64 = 40e6;

bitflags! {
    /// Device status flags of registers 0 and 1.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceStatus: u8 {
        const SYS_INIT = 0b1000_0000;
        const LOL_B = 0b0100_0000;
        const LOL_A = 0b0010_0000;
        const LOS = 0b0001_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ClockControl: u8 {
        const CLK_PDN = 0b1000_0000;
        const MS_INT = 0b0100_0000;
        const MS_SRC_PLLB = 0b0010_0000;
        const CLK_INV = 0b0001_0000;
        const CLK_SRC_MS = 0b0000_1100;
        const CLK_DRV_8MA = 0b0000_0011;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusBits {
    pub current: DeviceStatus,
    pub sticky: DeviceStatus,
}

impl StatusBits {
    /// Pack as `lol_a, lol_a_stky, lol_b, lol_b_stky, los, los_stky,
    /// sys_init, sys_init_stky` from bit 0 upwards.
    pub fn to_u32(&self) -> u32 {
        [
            DeviceStatus::LOL_A,
            DeviceStatus::LOL_B,
            DeviceStatus::LOS,
            DeviceStatus::SYS_INIT,
        ]
        .iter()
        .enumerate()
        .fold(0, |acc, (i, flag)| {
            acc | (self.current.contains(*flag) as u32) << (2 * i)
                | (self.sticky.contains(*flag) as u32) << (2 * i + 1)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PllSource {
    Xtal = 0,
    Clkin = 1,
}

impl PllSource {
    pub fn from_raw(val: u32) -> PllSource {
        if val == 0 {
            PllSource::Xtal
        } else {
            PllSource::Clkin
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pll {
    input_freq: f64,
    source: PllSource,
    vco_freq: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Output {
    freq: f64,
    enabled: bool,
    inverted: bool,
}

/// `a + b/c` divider encoded as the P1/P2/P3 register triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Multisynth {
    p1: u32,
    p2: u32,
    p3: u32,
}

impl Multisynth {
    fn from_ratio(ratio: f64) -> Multisynth {
        let a = ratio.floor() as u32;
        let b = ((ratio - a as f64) * FRAC_DENOM as f64).round() as u32;
        let (a, b) = if b >= FRAC_DENOM { (a + 1, 0) } else { (a, b) };
        let c = FRAC_DENOM;
        let floor = (128 * b as u64 / c as u64) as u32;
        Multisynth {
            p1: 128 * a + floor - 512,
            p2: 128 * b - c * floor,
            p3: c,
        }
    }

    fn registers(&self, rdiv: u8) -> [u8; 8] {
        let (p1, p2, p3) = (self.p1, self.p2, self.p3);
        [
            (p3 >> 8) as u8,
            p3 as u8,
            (rdiv << 4) | ((p1 >> 16) & 0x03) as u8,
            (p1 >> 8) as u8,
            p1 as u8,
            (((p3 >> 12) & 0xF0) | ((p2 >> 16) & 0x0F)) as u8,
            (p2 >> 8) as u8,
            p2 as u8,
        ]
    }
}

pub struct Si5351c {
    plls: [Pll; 2],
    outputs: [Output; 8],
    regs: BTreeMap<u8, u8>,
}

impl Default for Si5351c {
    fn default() -> Self {
        Self::new()
    }
}

impl Si5351c {
    pub fn new() -> Si5351c {
        let pll = Pll {
            input_freq: 27e6,
            source: PllSource::Xtal,
            vco_freq: PLL_DEFAULT,
        };
        Si5351c {
            plls: [pll; 2],
            outputs: [Output::default(); 8],
            regs: BTreeMap::new(),
        }
    }

    pub fn set_pll(&mut self, index: usize, input_freq: f64, source: PllSource) -> Result<()> {
        let pll = self
            .plls
            .get_mut(index)
            .ok_or_else(|| LimeError::invalid("Invalid PLL index."))?;
        pll.input_freq = input_freq;
        pll.source = source;
        Ok(())
    }

    pub fn set_clock(&mut self, index: usize, freq: f64, enabled: bool, inverted: bool) -> Result<()> {
        let out = self
            .outputs
            .get_mut(index)
            .ok_or_else(|| LimeError::invalid("Invalid clock index."))?;
        *out = Output {
            freq,
            enabled,
            inverted,
        };
        Ok(())
    }

    /// Register image that `upload_configuration` will write.
    pub fn registers(&self) -> &BTreeMap<u8, u8> {
        &self.regs
    }

    /// Outputs 0-3 run from PLL A, 4-7 from PLL B.
    fn pll_of(output: usize) -> usize {
        if output < 4 {
            0
        } else {
            1
        }
    }

    fn pick_pll_freq(freqs: &[f64]) -> f64 {
        let Some(first) = freqs.first() else {
            return PLL_DEFAULT;
        };
        let lo = (PLL_MIN / first).ceil() as u64;
        let hi = (PLL_MAX / first).floor() as u64;
        (lo..=hi)
            .map(|m| first * m as f64)
            .find(|vco| freqs.iter().all(|f| ((vco / f) - (vco / f).round()).abs() < 1e-9))
            .unwrap_or(PLL_DEFAULT)
    }

    /// Compute PLL and multisynth settings for the requested outputs.
    pub fn configure_clocks(&mut self) -> Result<()> {
        for (i, out) in self.outputs.iter().enumerate() {
            if out.enabled && !(OUT_MIN..=OUT_MAX).contains(&out.freq) {
                return Err(LimeError::invalid(format!(
                    "Si5351C: CLK{} frequency {} Hz out of range",
                    i, out.freq
                )));
            }
        }
        let mut regs = BTreeMap::new();
        let mut input_ctrl = 0u8;
        for (p, reg_base) in [REG_PLL_A, REG_PLL_B].into_iter().enumerate() {
            let freqs: Vec<f64> = (0..8)
                .filter(|i| Self::pll_of(*i) == p && self.outputs[*i].enabled)
                .map(|i| self.outputs[i].freq)
                .collect();
            let pll = &mut self.plls[p];
            pll.vco_freq = Self::pick_pll_freq(&freqs);
            let mut div = 1u8;
            let mut pfd = pll.input_freq;
            if pll.source == PllSource::Clkin {
                while pfd > PFD_MAX && div < 8 {
                    div *= 2;
                    pfd /= 2.0;
                }
                input_ctrl |= (div.trailing_zeros() as u8) << 6;
                input_ctrl |= 1 << (2 + p);
            }
            let feedback = Multisynth::from_ratio(pll.vco_freq / pfd);
            for (k, val) in feedback.registers(0).into_iter().enumerate() {
                regs.insert(reg_base + k as u8, val);
            }
            debug!("Si5351C PLL{}: {:.3} MHz", p, pll.vco_freq / 1e6);
        }
        regs.insert(REG_PLL_INPUT, input_ctrl);

        let mut enable_mask = 0u8;
        for (i, out) in self.outputs.iter().enumerate() {
            let pll = self.plls[Self::pll_of(i)];
            let mut ctrl = ClockControl::CLK_SRC_MS | ClockControl::CLK_DRV_8MA;
            if Self::pll_of(i) == 1 {
                ctrl |= ClockControl::MS_SRC_PLLB;
            }
            if out.inverted {
                ctrl |= ClockControl::CLK_INV;
            }
            if !out.enabled {
                regs.insert(REG_CLK_CONTROL + i as u8, (ctrl | ClockControl::CLK_PDN).bits());
                continue;
            }
            enable_mask |= 1 << i;
            let ratio = pll.vco_freq / out.freq;
            let integer = (ratio - ratio.round()).abs() < 1e-9;
            if i >= 6 {
                let div = ratio.round() as u32;
                if !integer || div % 2 != 0 || !(6..=254).contains(&div) {
                    return Err(LimeError::invalid(format!(
                        "Si5351C: CLK{} needs an even integer divider, got {:.3}",
                        i, ratio
                    )));
                }
                regs.insert(REG_MS6 + (i - 6) as u8, div as u8);
                ctrl |= ClockControl::MS_INT;
            } else {
                let mut rdiv = 0u8;
                let mut ms_ratio = ratio;
                while ms_ratio > 2048.0 && rdiv < 7 {
                    rdiv += 1;
                    ms_ratio /= 2.0;
                }
                if !(8.0..=2048.0).contains(&ms_ratio) {
                    return Err(LimeError::invalid(format!(
                        "Si5351C: CLK{} cannot reach {} Hz",
                        i, out.freq
                    )));
                }
                let ms = Multisynth::from_ratio(ms_ratio);
                for (k, val) in ms.registers(rdiv).into_iter().enumerate() {
                    regs.insert(REG_MS0 + 8 * i as u8 + k as u8, val);
                }
                if ms.p2 == 0 && (ms_ratio - ms_ratio.round()).abs() < 1e-9 {
                    ctrl |= ClockControl::MS_INT;
                }
            }
            regs.insert(REG_CLK_CONTROL + i as u8, ctrl.bits());
            debug!("Si5351C CLK{}: {:.3} MHz, divider {:.4}", i, out.freq / 1e6, ratio);
        }
        regs.insert(REG_MS67_RDIV, 0);
        regs.insert(REG_OUTPUT_ENABLE, !enable_mask);
        self.regs = regs;
        Ok(())
    }

    /// Power down every output.
    pub fn reset(&mut self) {
        self.outputs = [Output::default(); 8];
        self.regs.clear();
        for i in 0..8 {
            self.regs.insert(REG_CLK_CONTROL + i, ClockControl::CLK_PDN.bits());
        }
        self.regs.insert(REG_OUTPUT_ENABLE, 0xFF);
    }

    /// Read a ClockBuilder register export: `addr,valueh` per line.
    pub fn load_reg_values_from_file(&mut self, path: &Path) -> Result<()> {
        let reader = BufReader::new(File::open(path)?);
        self.regs.clear();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (addr, val) = line
                .split_once(',')
                .ok_or_else(|| LimeError::invalid(format!("Malformed register line: {}", line)))?;
            let addr: u8 = addr
                .trim()
                .parse()
                .map_err(|_| LimeError::invalid(format!("Bad register address: {}", addr)))?;
            let val = val.trim().trim_end_matches(['h', 'H']);
            let val = u8::from_str_radix(val.trim_start_matches("0x"), 16)
                .map_err(|_| LimeError::invalid(format!("Bad register value: {}", val)))?;
            self.regs.insert(addr, val);
        }
        info!("Loaded {} Si5351C registers from {}", self.regs.len(), path.display());
        Ok(())
    }

    /// Write the register image: outputs off, settings, PLL reset, outputs on.
    pub fn upload_configuration(&self, conn: &mut dyn Connection) -> Result<()> {
        let mut writes = vec![(REG_OUTPUT_ENABLE, 0xFF)];
        writes.extend(
            self.regs
                .iter()
                .filter(|(a, _)| ![REG_OUTPUT_ENABLE, REG_PLL_RESET].contains(*a))
                .map(|(a, v)| (*a, *v)),
        );
        writes.push((REG_PLL_RESET, 0xAC));
        writes.push((
            REG_OUTPUT_ENABLE,
            self.regs.get(&REG_OUTPUT_ENABLE).copied().unwrap_or(0xFF),
        ));
        conn.si5351_write(&writes)?;
        debug!("Si5351C: wrote {} registers", writes.len());
        Ok(())
    }

    pub fn status_bits(conn: &mut dyn Connection) -> Result<StatusBits> {
        let regs = conn.si5351_read(&[REG_STATUS, REG_STATUS_STICKY])?;
        if regs.len() < 2 {
            return Err(LimeError::io("Short Si5351C status read"));
        }
        Ok(StatusBits {
            current: DeviceStatus::from_bits_truncate(regs[0]),
            sticky: DeviceStatus::from_bits_truncate(regs[1]),
        })
    }

    pub fn clear_status(conn: &mut dyn Connection) -> Result<()> {
        conn.si5351_write(&[(REG_STATUS_STICKY, 0)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::fake_connection::FakeConnection;

    #[test]
    fn test_integer_outputs_share_pll_a() {
        let mut si = Si5351c::new();
        si.set_pll(0, 27e6, PllSource::Xtal).unwrap();
        si.set_clock(0, 10e6, true, false).unwrap();
        si.set_clock(1, 20e6, true, true).unwrap();
        si.configure_clocks().unwrap();
        let regs = si.registers();
        // MS0 = 600 MHz / 10 MHz = 60, P1 = 128 * 60 - 512
        assert_eq!(regs[&(REG_MS0 + 2)], 0x00);
        assert_eq!(regs[&(REG_MS0 + 3)], 0x1C);
        assert_eq!(regs[&(REG_MS0 + 4)], 0x00);
        assert_eq!(regs[&REG_OUTPUT_ENABLE], 0xFC);
        assert_eq!(regs[&REG_CLK_CONTROL], 0x4F);
        assert_eq!(regs[&(REG_CLK_CONTROL + 1)], 0x5F);
        assert_eq!(regs[&(REG_CLK_CONTROL + 2)] & 0x80, 0x80);
    }

    #[test]
    fn test_out_of_range_output_fails() {
        let mut si = Si5351c::new();
        si.set_clock(2, 5e3, true, false).unwrap();
        assert!(si.configure_clocks().is_err());
        assert!(si.set_clock(8, 1e6, true, false).is_err());
    }

    #[test]
    fn test_ms6_uses_integer_divider() {
        let mut si = Si5351c::new();
        si.set_clock(6, 7e6, true, false).unwrap();
        si.configure_clocks().unwrap();
        assert_eq!(si.registers()[&REG_MS6], 86);
    }

    #[test]
    fn test_upload_brackets_with_output_disable() {
        let mut si = Si5351c::new();
        si.reset();
        let mut fake = FakeConnection::new();
        si.upload_configuration(&mut fake).unwrap();
        assert_eq!(fake.si5351_writes.first(), Some(&(REG_OUTPUT_ENABLE, 0xFF)));
        assert_eq!(fake.si5351_writes.last(), Some(&(REG_OUTPUT_ENABLE, 0xFF)));
        assert!(fake.si5351_writes.contains(&(REG_PLL_RESET, 0xAC)));
        assert_eq!(fake.si5351[REG_CLK_CONTROL as usize + 7], 0x80);
    }

    #[test]
    fn test_status_bits_packing() {
        let mut fake = FakeConnection::new();
        fake.si5351[0] = 0xA0;
        fake.si5351[1] = 0x10;
        let status = Si5351c::status_bits(&mut fake).unwrap();
        assert_eq!(status.to_u32(), 0x61);
        Si5351c::clear_status(&mut fake).unwrap();
        assert_eq!(fake.si5351[1], 0);
    }

    #[test]
    fn test_load_clockbuilder_export() {
        let path = std::env::temp_dir().join("limesuite_rs_si5351c.txt");
        std::fs::write(&path, "# header\n15,00h\n16,4Fh\n\n").unwrap();
        let mut si = Si5351c::new();
        si.load_reg_values_from_file(&path).unwrap();
        assert_eq!(si.registers()[&16], 0x4F);
        assert_eq!(si.registers().len(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
