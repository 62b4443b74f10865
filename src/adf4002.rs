//! ADF4002 phase detector used to lock the board VCTCXO to an external
//! reference.

use log::debug;

use crate::error::{LimeError, Result};

const R_MAX: u32 = 0x3FFF;
const N_MAX: u32 = 0x1FFF;

/// Settings shared by the function and initialization latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatchSettings {
    pub current1: u8,
    pub current2: u8,
    pub timer_counter: u8,
    /// 0 disabled, 1 fastlock mode 1, 2 fastlock mode 2.
    pub fastlock: u8,
    pub mux_ctrl: u8,
    pub pd_polarity: u8,
    pub pd1: u8,
    pub pd2: u8,
    pub counter_reset: u8,
    pub cp_state: u8,
}

impl LatchSettings {
    fn word(&self, control: u32) -> u32 {
        let fastlock = match self.fastlock {
            0 => 0b00,
            1 => 0b01,
            _ => 0b11,
        };
        control
            | (self.counter_reset as u32 & 1) << 2
            | (self.pd1 as u32 & 1) << 3
            | (self.mux_ctrl as u32 & 0x7) << 4
            | (self.pd_polarity as u32 & 1) << 7
            | (self.cp_state as u32 & 1) << 8
            | fastlock << 9
            | (self.timer_counter as u32 & 0xF) << 11
            | (self.current1 as u32 & 0x7) << 15
            | (self.current2 as u32 & 0x7) << 18
            | (self.pd2 as u32 & 1) << 21
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Adf4002Config {
    pub lock_detect_prec: u8,
    pub anti_backlash: u8,
    pub reference_counter: u32,
    pub cp_gain: u8,
    pub n_counter: u32,
    pub function: LatchSettings,
    pub initialization: LatchSettings,
    /// Reference frequency in MHz; replaced by the achieved fcomp.
    pub f_ref: f64,
    /// VCO frequency in MHz; replaced by the achieved value.
    pub f_vco: f64,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Adf4002Config {
    /// Derive R and N from fRef and fVCO using their common comparison
    /// frequency. Returns `(fcomp, fvco)` in MHz.
    pub fn set_fref_fvco(&mut self, f_ref: f64, f_vco: f64) -> Result<(f64, f64)> {
        let ref_hz = (f_ref * 1e6).round() as u64;
        let vco_hz = (f_vco * 1e6).round() as u64;
        if ref_hz == 0 || vco_hz == 0 {
            return Err(LimeError::invalid("ADF4002 frequencies must be positive."));
        }
        let fcomp = gcd(ref_hz, vco_hz) as f64 / 1e6;
        let r = (f_ref / fcomp).round() as u32;
        let n = (f_vco / fcomp).round() as u32;
        if r > R_MAX || n > N_MAX {
            return Err(LimeError::invalid(format!(
                "ADF4002: R={} N={} exceed the counter range",
                r, n
            )));
        }
        self.reference_counter = r;
        self.n_counter = n;
        let fvco = fcomp * n as f64;
        self.f_ref = fcomp;
        self.f_vco = fvco;
        debug!("ADF4002: fcomp {} MHz, R={}, N={}", fcomp, r, n);
        Ok((fcomp, fvco))
    }

    pub fn reference_latch(&self) -> u32 {
        (self.reference_counter & R_MAX) << 2
            | (self.anti_backlash as u32 & 0x3) << 16
            | (self.lock_detect_prec as u32 & 1) << 20
    }

    pub fn n_latch(&self) -> u32 {
        0b01 | (self.n_counter & N_MAX) << 8 | (self.cp_gain as u32 & 1) << 21
    }

    /// Initialization, function, reference and N latches, in write order.
    pub fn latch_words(&self) -> [u32; 4] {
        [
            self.initialization.word(0b11),
            self.function.word(0b10),
            self.reference_latch(),
            self.n_latch(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fref_fvco_counters() {
        let mut conf = Adf4002Config::default();
        let (fcomp, fvco) = conf.set_fref_fvco(10.0, 30.72).unwrap();
        assert!((fcomp - 0.08).abs() < 1e-12);
        assert!((fvco - 30.72).abs() < 1e-9);
        assert_eq!(conf.reference_counter, 125);
        assert_eq!(conf.n_counter, 384);
        assert!(conf.set_fref_fvco(0.0, 30.72).is_err());
    }

    #[test]
    fn test_latch_words() {
        let conf = Adf4002Config {
            lock_detect_prec: 1,
            anti_backlash: 0,
            reference_counter: 125,
            cp_gain: 1,
            n_counter: 384,
            function: LatchSettings {
                mux_ctrl: 1,
                pd_polarity: 1,
                current1: 7,
                current2: 7,
                ..Default::default()
            },
            initialization: LatchSettings::default(),
            f_ref: 10.0,
            f_vco: 30.72,
        };
        let words = conf.latch_words();
        assert_eq!(words[0], 0b11);
        assert_eq!(words[1], 0b10 | 1 << 4 | 1 << 7 | 7 << 15 | 7 << 18);
        assert_eq!(words[2], 125 << 2 | 1 << 20);
        assert_eq!(words[3], 0b01 | 384 << 8 | 1 << 21);
        assert!(words.iter().all(|w| *w < 1 << 24));
    }
}
