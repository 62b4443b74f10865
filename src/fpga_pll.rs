//! Interface clock PLLs inside the board FPGA. The LMS7002M LML port clocks
//! are fed back through these PLLs, one for TX and one for RX, so they have
//! to follow every sample rate change.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::connection::Connection;
use crate::error::{ErrorCode, LimeError, Result};

const REG_DIRECT_CLK: u16 = 0x0005;
const REG_STATUS: u16 = 0x0021;
const REG_CONTROL: u16 = 0x0023;
const REG_PHASE_STEPS: u16 = 0x0024;
const REG_NM_MODE: u16 = 0x0025;
const REG_N_COUNT: u16 = 0x0026;
const REG_M_COUNT: u16 = 0x0027;
const REG_C_MODE: u16 = 0x002A;
const REG_C_COUNT: u16 = 0x002E;

const PLLCFG_START: u16 = 1 << 0;
const PHCFG_START: u16 = 1 << 1;
const PLLRST_START: u16 = 1 << 2;
const PLL_INDEX_SHIFT: u16 = 3;
const CNT_INDEX_SHIFT: u16 = 8;
const PHCFG_UPDN: u16 = 1 << 13;

const STATUS_DONE: u16 = 1 << 0;
const STATUS_ERROR: u16 = 1 << 1;

const VCO_MIN: f64 = 600e6;
const VCO_MAX: f64 = 1300e6;
const COUNT_MAX: u32 = 510;
/// Below this the PLL can't lock and the LML clock is used directly.
pub const DIRECT_CLOCK_MAX: f64 = 5e6;

pub const TX_PLL: u8 = 0;
pub const RX_PLL: u8 = 1;

const DONE_TIMEOUT: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One PLL output counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PllOutput {
    pub index: u8,
    pub phase_deg: f64,
}

/// Counter settings for one PLL, with `f_out = f_in * m / (n * c)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllCounters {
    pub n: u32,
    pub m: u32,
    pub c: u32,
}

impl PllCounters {
    /// Lowest `m` that puts the VCO inside its range with `n = 1` and the
    /// output at the input frequency.
    pub fn for_frequency(freq: f64) -> Result<PllCounters> {
        if !freq.is_finite() || freq <= 0.0 {
            return Err(LimeError::invalid(format!("FPGA PLL: bad frequency {}", freq)));
        }
        let m = (VCO_MIN / freq).ceil().max(1.0) as u32;
        if m > COUNT_MAX || freq * m as f64 > VCO_MAX {
            return Err(LimeError::out_of_range(format!(
                "FPGA PLL: no VCO setting for {:.3} MHz",
                freq / 1e6
            )));
        }
        Ok(PllCounters { n: 1, m, c: m })
    }

    pub fn vco(&self, freq: f64) -> f64 {
        freq * self.m as f64 / self.n as f64
    }
}

/// High/low split of a counter: `(count_word, mode_bits)` where mode bit 0
/// is bypass and bit 1 marks an odd count.
fn counter_word(count: u32) -> (u16, u16) {
    if count <= 1 {
        return (0, 0b01);
    }
    let low = count / 2;
    let high = low + count % 2;
    (((high as u16) << 8) | low as u16, ((count % 2) as u16) << 1)
}

fn read_reg(conn: &mut dyn Connection, addr: u16) -> Result<u16> {
    Ok(conn.read_fpga(&[addr])?.first().copied().unwrap_or(0))
}

fn wait_done(conn: &mut dyn Connection, what: &str) -> Result<()> {
    let start = Instant::now();
    loop {
        let status = read_reg(conn, REG_STATUS)?;
        if status & STATUS_ERROR != 0 {
            return Err(LimeError::io(format!("FPGA PLL {} failed", what)));
        }
        if status & STATUS_DONE != 0 {
            return Ok(());
        }
        if start.elapsed() > DONE_TIMEOUT {
            return Err(LimeError::new(
                ErrorCode::TimedOut,
                format!("FPGA PLL {} timed out", what),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn set_direct_clocking(conn: &mut dyn Connection, pll: u8, enable: bool) -> Result<()> {
    let reg = read_reg(conn, REG_DIRECT_CLK)?;
    let reg = if enable {
        reg | 1 << pll
    } else {
        reg & !(1 << pll)
    };
    conn.write_fpga(&[(REG_DIRECT_CLK, reg)])
}

/// Lock PLL `pll` to `freq` and apply the output phase offsets.
pub fn set_pll_frequency(
    conn: &mut dyn Connection,
    pll: u8,
    freq: f64,
    outputs: &[PllOutput],
) -> Result<()> {
    let counters = PllCounters::for_frequency(freq)?;
    debug!(
        "FPGA PLL{}: {:.3} MHz, VCO {:.1} MHz, M={} C={}",
        pll,
        freq / 1e6,
        counters.vco(freq) / 1e6,
        counters.m,
        counters.c
    );
    set_direct_clocking(conn, pll, false)?;

    let base = read_reg(conn, REG_CONTROL)?
        & !(0x1F << PLL_INDEX_SHIFT | 0x1F << CNT_INDEX_SHIFT)
        & !(PLLCFG_START | PHCFG_START | PLLRST_START | PHCFG_UPDN);
    let base = base | (pll as u16) << PLL_INDEX_SHIFT;
    conn.write_fpga(&[(REG_CONTROL, base | PLLRST_START), (REG_CONTROL, base)])?;

    let (n_word, n_mode) = counter_word(counters.n);
    let (m_word, m_mode) = counter_word(counters.m);
    let (c_word, c_mode) = counter_word(counters.c);
    let mut regs = vec![
        (REG_NM_MODE, n_mode | m_mode << 2),
        (REG_N_COUNT, n_word),
        (REG_M_COUNT, m_word),
    ];
    let mut c_modes = 0u32;
    for out in outputs {
        c_modes |= (c_mode as u32) << (2 * out.index as u32);
        regs.push((REG_C_COUNT + out.index as u16, c_word));
    }
    regs.push((REG_C_MODE, c_modes as u16));
    regs.push((REG_C_MODE + 1, (c_modes >> 16) as u16));
    conn.write_fpga(&regs)?;
    conn.write_fpga(&[(REG_CONTROL, base | PLLCFG_START)])?;
    wait_done(conn, "configuration")?;
    conn.write_fpga(&[(REG_CONTROL, base)])?;

    // one phase step is an eighth of a VCO period
    let steps_per_turn = 8.0 * counters.c as f64;
    for out in outputs.iter().filter(|o| o.phase_deg != 0.0) {
        let steps = (out.phase_deg / 360.0 * steps_per_turn).round();
        let updn = if steps >= 0.0 { PHCFG_UPDN } else { 0 };
        let cnt = ((out.index as u16 + 2) & 0x1F) << CNT_INDEX_SHIFT;
        conn.write_fpga(&[
            (REG_PHASE_STEPS, steps.abs() as u16),
            (REG_CONTROL, base | cnt | updn),
            (REG_CONTROL, base | cnt | updn | PHCFG_START),
        ])?;
        wait_done(conn, "phase shift")?;
        conn.write_fpga(&[(REG_CONTROL, base)])?;
    }
    Ok(())
}

/// Program both interface PLLs for the given host sample rates. The LML
/// clock runs at twice the sample rate and output 1 trails output 0 by a
/// quarter period.
pub fn set_interface_frequency(conn: &mut dyn Connection, tx_rate: f64, rx_rate: f64) -> Result<()> {
    for (pll, rate) in [(TX_PLL, tx_rate), (RX_PLL, rx_rate)] {
        if rate <= 0.0 {
            continue;
        }
        let clk = 2.0 * rate;
        if clk < DIRECT_CLOCK_MAX {
            debug!("FPGA PLL{}: direct clocking at {:.3} MHz", pll, clk / 1e6);
            set_direct_clocking(conn, pll, true)?;
        } else {
            let outputs = [
                PllOutput { index: 0, phase_deg: 0.0 },
                PllOutput { index: 1, phase_deg: 90.0 },
            ];
            set_pll_frequency(conn, pll, clk, &outputs)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::fake_connection::FakeConnection;

    #[test]
    fn test_counters_keep_vco_in_range() {
        for freq in [5e6, 10e6, 20e6, 61.44e6, 122.88e6] {
            let c = PllCounters::for_frequency(freq).unwrap();
            let vco = c.vco(freq);
            assert!((VCO_MIN..=VCO_MAX).contains(&vco), "{} -> {}", freq, vco);
            assert_eq!(c.m, c.c);
        }
        assert!(PllCounters::for_frequency(0.0).is_err());
        assert_eq!(PllCounters::for_frequency(1e3).unwrap_err().code(), 34);
    }

    #[test]
    fn test_counter_word_split() {
        assert_eq!(counter_word(1), (0, 0b01));
        assert_eq!(counter_word(30), (0x0F0F, 0));
        assert_eq!(counter_word(61), (0x1F1E, 0b10));
    }

    #[test]
    fn test_slow_interface_uses_direct_clock() {
        let mut fake = FakeConnection::new();
        fake.fpga.insert(REG_DIRECT_CLK, 0x0003);
        set_interface_frequency(&mut fake, 1e6, 10e6).unwrap();
        // TX stays direct, RX goes back through its PLL
        assert_eq!(fake.fpga[&REG_DIRECT_CLK], 0x0001);
        assert_eq!(fake.fpga[&REG_M_COUNT], 0x0F0F);
    }

    #[test]
    fn test_pll_error_is_reported() {
        let mut fake = FakeConnection::new();
        fake.fpga_pll_error = true;
        let err = set_interface_frequency(&mut fake, 10e6, 10e6).unwrap_err();
        assert_eq!(err.code(), 5);
    }
}
