//! Per-channel RF controls: LO, antennas, filters, gain and the TSP blocks.

use log::{debug, info};

use super::Lms7Device;
use crate::error::{LimeError, Result};
use crate::gfir;
use crate::lms7002m::mcu::{McuParameter, McuProcedure};
use crate::lms7002m::params::*;
use crate::lms7002m::{GfirFilter, Lms7002m, TestSignal};
use crate::Range;

pub const RX_ANTENNAS: [&str; 6] = ["NONE", "LNAH", "LNAL", "LNAW", "LB1", "LB2"];
pub const TX_ANTENNAS: [&str; 3] = ["NONE", "BAND1", "BAND2"];

const LO_MIN: f64 = 30e6;
const LO_MAX: f64 = 3.8e9;

const RX_LPF_MIN: f64 = 1.4001e6;
const TX_LPF_MIN: f64 = 5e6;
const LPF_MAX: f64 = 130e6;
/// RX switches from the low to the high band LPF above this bandwidth.
const RX_LPFL_MAX: f64 = 20e6;
/// TX uses the ladder/real-pole chain up to this bandwidth.
const TX_LOW_CHAIN_MAX: f64 = 18e6;

// RBB PGA input selection
const PGA_INPUT_LPFL: u16 = 0;
const PGA_INPUT_LPFH: u16 = 1;
const PGA_INPUT_BYPASS: u16 = 2;

/// LNA gain in dB for codes 1..=15.
const LNA_GAIN_DB: [u16; 15] = [0, 3, 6, 9, 12, 15, 18, 21, 24, 25, 26, 27, 28, 29, 30];
/// TIA gain in dB for codes 1..=3.
const TIA_GAIN_DB: [u16; 3] = [0, 9, 12];
const PGA_MAX_CODE: u16 = 31;
/// RX gain span in dB, from -12 to +61.
const RX_GAIN_SPAN: f64 = 73.0;
const TX_PAD_MAX_LOSS: f64 = 31.0;

/// Analog filter stages that can be tuned individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    RxTia = 0,
    RxLpfLowband,
    RxLpfHighband,
    TxHighband,
    TxRealPole,
    TxLadder,
    /// Ladder followed by the real pole; takes two bandwidths.
    TxLowChain,
}

impl FilterKind {
    pub fn from_raw(val: u32) -> Option<FilterKind> {
        match val {
            0 => Some(FilterKind::RxTia),
            1 => Some(FilterKind::RxLpfLowband),
            2 => Some(FilterKind::RxLpfHighband),
            3 => Some(FilterKind::TxHighband),
            4 => Some(FilterKind::TxRealPole),
            5 => Some(FilterKind::TxLadder),
            6 => Some(FilterKind::TxLowChain),
            _ => None,
        }
    }

    pub fn is_tx(&self) -> bool {
        !matches!(
            self,
            FilterKind::RxTia | FilterKind::RxLpfLowband | FilterKind::RxLpfHighband
        )
    }
}

/// Power the RBB/TBB filter stages for `kind`.
fn select_filter_path(c: &mut Lms7002m, kind: FilterKind) -> Result<()> {
    match kind {
        FilterKind::RxTia => {
            c.modify_param(&PD_LPFL_RBB, 1)?;
            c.modify_param(&PD_LPFH_RBB, 1)?;
            c.modify_param(&INPUT_CTL_PGA_RBB, PGA_INPUT_BYPASS)
        }
        FilterKind::RxLpfLowband => {
            c.modify_param(&PD_LPFL_RBB, 0)?;
            c.modify_param(&PD_LPFH_RBB, 1)?;
            c.modify_param(&INPUT_CTL_PGA_RBB, PGA_INPUT_LPFL)
        }
        FilterKind::RxLpfHighband => {
            c.modify_param(&PD_LPFL_RBB, 1)?;
            c.modify_param(&PD_LPFH_RBB, 0)?;
            c.modify_param(&INPUT_CTL_PGA_RBB, PGA_INPUT_LPFH)
        }
        FilterKind::TxHighband => tbb_stages(c, true, false, false),
        FilterKind::TxRealPole => tbb_stages(c, false, false, true),
        FilterKind::TxLadder => tbb_stages(c, false, true, false),
        FilterKind::TxLowChain => tbb_stages(c, false, true, true),
    }
}

fn tbb_stages(c: &mut Lms7002m, high: bool, ladder: bool, real_pole: bool) -> Result<()> {
    c.modify_param(&PD_LPFH_TBB, !high as u16)?;
    c.modify_param(&PD_LPFLAD_TBB, !ladder as u16)?;
    c.modify_param(&PD_LPFS5_TBB, !real_pole as u16)?;
    c.modify_param(&BYPLADDER_TBB, (!high && !ladder) as u16)
}

/// Run the MCU filter tuning for one direction at `bw` Hz.
fn tune_with_mcu(c: &mut Lms7002m, tx: bool, bw: f64) -> Result<()> {
    let ref_clk = c.reference_clk_sx(false);
    c.set_mcu_parameter(McuParameter::RefClk, ref_clk)?;
    c.set_mcu_parameter(McuParameter::Bandwidth, bw)?;
    c.call_mcu(if tx {
        McuProcedure::TuneTxFilter
    } else {
        McuProcedure::TuneRxFilter
    })
}

impl Lms7Device {
    pub fn enable_channel(&mut self, tx: bool, ch: usize, enabled: bool) -> Result<()> {
        let on = enabled as u16;
        debug!(
            "{} channel {} {}",
            if tx { "TX" } else { "RX" },
            ch,
            if enabled { "enabled" } else { "disabled" }
        );
        self.on_channel(tx, ch, |c| {
            if tx {
                c.modify_param(&EN_G_TRF, on)?;
                c.modify_param(&EN_G_TBB, on)?;
            } else {
                c.modify_param(&EN_G_RFE, on)?;
                c.modify_param(&EN_G_RBB, on)?;
            }
            c.modify_param(&tsp(tx).en, on)
        })
    }

    // LO

    pub fn set_lo_frequency(&mut self, tx: bool, ch: usize, freq: f64) -> Result<()> {
        self.check_channel(tx, ch)?;
        if !(LO_MIN..=LO_MAX).contains(&freq) {
            return Err(LimeError::invalid("Frequency out of range."));
        }
        info!("{} LO {:.6} MHz", if tx { "TX" } else { "RX" }, freq / 1e6);
        self.lms.set_frequency_sx(tx, freq)
    }

    pub fn lo_frequency(&mut self, tx: bool, ch: usize) -> Result<f64> {
        self.check_channel(tx, ch)?;
        self.lms.frequency_sx(tx)
    }

    pub fn lo_frequency_range(&self, _tx: bool) -> Range {
        Range::new(LO_MIN, LO_MAX, 0.0)
    }

    // antennas

    pub fn antenna_list(&self, tx: bool, ch: usize) -> Result<&'static [&'static str]> {
        self.check_channel(tx, ch)?;
        Ok(if tx { &TX_ANTENNAS } else { &RX_ANTENNAS })
    }

    pub fn set_antenna(&mut self, tx: bool, ch: usize, path: usize) -> Result<()> {
        if path >= self.antenna_list(tx, ch)?.len() {
            return Err(LimeError::invalid("Invalid antenna path."));
        }
        self.on_channel(tx, ch, |c| {
            if tx {
                c.modify_param(&SEL_BAND1_TRF, (path == 1) as u16)?;
                return c.modify_param(&SEL_BAND2_TRF, (path == 2) as u16);
            }
            // loopbacks reuse the LNAW and LNAL paths with their switch closed
            let (sel, lb1, lb2) = match path {
                4 => (3, 0, 1),
                5 => (2, 1, 0),
                p => (p as u16, 1, 1),
            };
            c.modify_param(&SEL_PATH_RFE, sel)?;
            c.modify_param(&EN_INSHSW_LB1_RFE, lb1)?;
            c.modify_param(&EN_INSHSW_LB2_RFE, lb2)
        })
    }

    pub fn antenna(&mut self, tx: bool, ch: usize) -> Result<usize> {
        self.on_channel(tx, ch, |c| {
            if tx {
                return Ok(if c.get_param(&SEL_BAND1_TRF)? != 0 {
                    1
                } else if c.get_param(&SEL_BAND2_TRF)? != 0 {
                    2
                } else {
                    0
                });
            }
            let sel = c.get_param(&SEL_PATH_RFE)? as usize;
            let lb1 = c.get_param(&EN_INSHSW_LB1_RFE)?;
            let lb2 = c.get_param(&EN_INSHSW_LB2_RFE)?;
            Ok(match (sel, lb1, lb2) {
                (3, 0, _) => 4,
                (2, _, 0) => 5,
                (p, _, _) => p,
            })
        })
    }

    pub fn antenna_bw(&self, tx: bool, ch: usize, path: usize) -> Result<Range> {
        if path >= self.antenna_list(tx, ch)?.len() {
            return Err(LimeError::invalid("Invalid antenna path."));
        }
        let band1 = Range::new(2e9, 2.6e9, 0.0);
        let band2 = Range::new(30e6, 1.9e9, 0.0);
        Ok(match (tx, path) {
            (_, 0) => Range::new(0.0, 0.0, 0.0),
            (true, 1) | (false, 4) | (false, 1) => band1,
            (true, _) | (false, 5) => band2,
            (false, 2) => Range::new(0.7e9, 0.9e9, 0.0),
            (false, _) => Range::new(0.7e9, 2.6e9, 0.0),
        })
    }

    // bandwidth and filters

    pub fn lpf_bw_range(&self, tx: bool) -> Range {
        Range::new(if tx { TX_LPF_MIN } else { RX_LPF_MIN }, LPF_MAX, 0.0)
    }

    /// Tune the analog LPF of a channel to `bw` Hz with the MCU.
    pub fn set_lpf_bw(&mut self, tx: bool, ch: usize, bw: f64) -> Result<()> {
        self.check_channel(tx, ch)?;
        if !self.lpf_bw_range(tx).contains(bw) {
            return Err(LimeError::invalid("Bandwidth out of range."));
        }
        self.lpf_bw[tx as usize][ch] = bw;
        self.set_lpf(tx, ch, true)?;
        info!("{} LPF {:.3} MHz on channel {}", if tx { "TX" } else { "RX" }, bw / 1e6, ch);
        self.on_channel(tx, ch, |c| tune_with_mcu(c, tx, bw))?;
        self.lms.download_all()
    }

    pub fn lpf_bw(&self, tx: bool, ch: usize) -> Result<f64> {
        self.check_channel(tx, ch)?;
        Ok(self.lpf_bw[tx as usize][ch])
    }

    pub fn set_bandwidth(&mut self, tx: bool, ch: usize, bw: f64) -> Result<()> {
        self.set_lpf_bw(tx, ch, bw)
    }

    pub fn bandwidth(&self, tx: bool, ch: usize) -> Result<f64> {
        self.lpf_bw(tx, ch)
    }

    pub fn bandwidth_range(&self, tx: bool) -> Range {
        self.lpf_bw_range(tx)
    }

    /// Route the baseband through the LPF suited to the last bandwidth, or
    /// bypass it.
    pub fn set_lpf(&mut self, tx: bool, ch: usize, enabled: bool) -> Result<()> {
        self.check_channel(tx, ch)?;
        let bw = self.lpf_bw[tx as usize][ch];
        self.on_channel(tx, ch, |c| {
            match (tx, enabled) {
                (false, false) => select_filter_path(c, FilterKind::RxTia),
                (false, true) if bw < RX_LPFL_MAX => select_filter_path(c, FilterKind::RxLpfLowband),
                (false, true) => select_filter_path(c, FilterKind::RxLpfHighband),
                (true, false) => tbb_stages(c, false, false, false),
                (true, true) if bw <= TX_LOW_CHAIN_MAX => select_filter_path(c, FilterKind::TxLowChain),
                (true, true) => select_filter_path(c, FilterKind::TxHighband),
            }
        })
    }

    /// Use GFIR3 as a digital low-pass of `bw` Hz.
    pub fn set_gfir_lpf(&mut self, tx: bool, ch: usize, enabled: bool, bw: f64) -> Result<()> {
        self.check_channel(tx, ch)?;
        if !enabled {
            return self.on_channel(tx, ch, |c| c.enable_gfir(tx, GfirFilter::Gfir3, false));
        }
        let (host_rate, _) = self.sample_rate(tx, ch)?;
        let ratio = self.on_channel(tx, ch, |c| c.hb_ratio(tx))?;
        let w = (bw / 2.0) / host_rate;
        if bw <= 0.0 || w > 0.5 {
            return Err(LimeError::invalid(
                "GFIR bandwidth must be positive and below the sample rate.",
            ));
        }
        let w2 = (w * 1.2).min(0.5);
        let taps = ratio.min(8) as usize * 15;
        let coef = gfir::generate_filter(taps, w, w2, 1.0, 0.0)?;
        debug!("GFIR LPF: {} taps, w={:.4} w2={:.4}", taps, w, w2);
        self.on_channel(tx, ch, |c| {
            c.set_gfir_coef(tx, GfirFilter::Gfir3, &coef)?;
            c.enable_gfir(tx, GfirFilter::Gfir3, true)
        })
    }

    /// Tune a single filter stage. `TxLowChain` takes the ladder and the
    /// real-pole bandwidths, every other kind one bandwidth.
    pub fn tune_filter(&mut self, ch: usize, kind: FilterKind, bw: &[f64]) -> Result<()> {
        let tx = kind.is_tx();
        self.check_channel(tx, ch)?;
        let needed = if kind == FilterKind::TxLowChain { 2 } else { 1 };
        if bw.len() < needed {
            return Err(LimeError::invalid("Missing filter bandwidth."));
        }
        self.on_channel(tx, ch, |c| {
            if kind == FilterKind::TxLowChain {
                select_filter_path(c, FilterKind::TxLadder)?;
                tune_with_mcu(c, tx, bw[0])?;
                select_filter_path(c, FilterKind::TxRealPole)?;
                tune_with_mcu(c, tx, bw[1])?;
            }
            select_filter_path(c, kind)?;
            if kind != FilterKind::TxLowChain {
                tune_with_mcu(c, tx, bw[0])?;
            }
            Ok(())
        })?;
        self.lms.download_all()
    }

    // gain

    /// Set gain as a fraction of the full range, clamped to [0, 1].
    pub fn set_normalized_gain(&mut self, tx: bool, ch: usize, gain: f64) -> Result<()> {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        if tx {
            let loss = ((1.0 - gain) * TX_PAD_MAX_LOSS).round() as u16;
            return self.on_channel(tx, ch, |c| {
                c.modify_param(&LOSS_LIN_TXPAD_TRF, loss)?;
                c.modify_param(&LOSS_MAIN_TXPAD_TRF, loss)
            });
        }
        // fill LNA first, then TIA, leaving the rest to the PGA
        let mut remaining = (gain * RX_GAIN_SPAN).round() as u16;
        let lna = LNA_GAIN_DB
            .iter()
            .rposition(|g| *g <= remaining)
            .unwrap_or(0);
        remaining -= LNA_GAIN_DB[lna];
        let tia = TIA_GAIN_DB
            .iter()
            .rposition(|g| *g <= remaining)
            .unwrap_or(0);
        remaining -= TIA_GAIN_DB[tia];
        let pga = remaining.min(PGA_MAX_CODE);
        debug!("RX gain: LNA {} TIA {} PGA {}", lna + 1, tia + 1, pga);
        self.on_channel(tx, ch, |c| {
            c.modify_param(&G_LNA_RFE, lna as u16 + 1)?;
            c.modify_param(&G_TIA_RFE, tia as u16 + 1)?;
            c.modify_param(&G_PGA_RBB, pga)
        })
    }

    pub fn normalized_gain(&mut self, tx: bool, ch: usize) -> Result<f64> {
        self.on_channel(tx, ch, |c| {
            if tx {
                let loss = c.get_param(&LOSS_MAIN_TXPAD_TRF)? as f64;
                return Ok(1.0 - loss.min(TX_PAD_MAX_LOSS) / TX_PAD_MAX_LOSS);
            }
            let lna = c.get_param(&G_LNA_RFE)? as usize;
            let tia = c.get_param(&G_TIA_RFE)? as usize;
            let pga = c.get_param(&G_PGA_RBB)?;
            let lna_db = LNA_GAIN_DB[lna.clamp(1, LNA_GAIN_DB.len()) - 1];
            let tia_db = TIA_GAIN_DB[tia.clamp(1, TIA_GAIN_DB.len()) - 1];
            Ok((lna_db + tia_db + pga) as f64 / RX_GAIN_SPAN)
        })
    }

    /// Run the MCU DC/IQ calibration. Non-zero `flags` select the external
    /// loopback variant.
    pub fn calibrate(&mut self, tx: bool, ch: usize, bw: f64, flags: u32) -> Result<()> {
        let proc = match (tx, flags != 0) {
            (true, false) => McuProcedure::CalibrateTx,
            (false, false) => McuProcedure::CalibrateRx,
            (true, true) => McuProcedure::CalibrateTxExternal,
            (false, true) => McuProcedure::CalibrateRxExternal,
        };
        info!("Calibrating channel {} with {:?}, bw {:.3} MHz", ch, proc, bw / 1e6);
        self.on_channel(tx, ch, |c| {
            let ref_clk = c.reference_clk_sx(false);
            c.set_mcu_parameter(McuParameter::RefClk, ref_clk)?;
            c.set_mcu_parameter(McuParameter::Bandwidth, bw)?;
            c.call_mcu(proc)
        })?;
        self.lms.download_all()
    }

    // TSP

    pub fn set_test_signal(
        &mut self,
        tx: bool,
        ch: usize,
        sig: TestSignal,
        dc_i: i16,
        dc_q: i16,
    ) -> Result<()> {
        self.on_channel(tx, ch, |c| c.set_test_signal(tx, sig, dc_i, dc_q))
    }

    pub fn test_signal(&mut self, tx: bool, ch: usize) -> Result<TestSignal> {
        self.on_channel(tx, ch, |c| c.test_signal(tx))
    }

    pub fn set_nco_frequency(&mut self, tx: bool, ch: usize, freqs: &[f64], pho: f64) -> Result<()> {
        self.on_channel(tx, ch, |c| c.set_nco_frequencies(tx, freqs, pho))
    }

    /// The 16 NCO frequencies and the shared phase offset in degrees.
    pub fn nco_frequency(&mut self, tx: bool, ch: usize) -> Result<(Vec<f64>, f64)> {
        self.on_channel(tx, ch, |c| c.nco_frequencies(tx))
    }

    pub fn set_nco_phase(&mut self, tx: bool, ch: usize, phases: &[f64], fcw: f64) -> Result<()> {
        self.on_channel(tx, ch, |c| c.set_nco_phases(tx, phases, fcw))
    }

    /// The 16 NCO phases in degrees and the shared frequency.
    pub fn nco_phase(&mut self, tx: bool, ch: usize) -> Result<(Vec<f64>, f64)> {
        self.on_channel(tx, ch, |c| c.nco_phases(tx))
    }

    pub fn set_nco_index(&mut self, tx: bool, ch: usize, index: usize, down: bool) -> Result<()> {
        self.on_channel(tx, ch, |c| c.set_nco_index(tx, index, down))
    }

    pub fn nco_index(&mut self, tx: bool, ch: usize) -> Result<usize> {
        self.on_channel(tx, ch, |c| c.nco_index(tx))
    }

    pub fn set_gfir_coeff(
        &mut self,
        tx: bool,
        ch: usize,
        filt: GfirFilter,
        coef: &[f64],
    ) -> Result<()> {
        self.on_channel(tx, ch, |c| c.set_gfir_coef(tx, filt, coef))
    }

    pub fn gfir_coeff(&mut self, tx: bool, ch: usize, filt: GfirFilter) -> Result<Vec<f64>> {
        self.on_channel(tx, ch, |c| c.gfir_coef(tx, filt))
    }

    pub fn set_gfir(&mut self, tx: bool, ch: usize, filt: GfirFilter, enabled: bool) -> Result<()> {
        self.on_channel(tx, ch, |c| c.enable_gfir(tx, filt, enabled))
    }
}
