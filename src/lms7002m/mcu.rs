//! Mailbox of the LMS7002M's embedded 8051. Procedures are started by
//! writing an id to P0 and raising interrupt 6; the result shows up in P1.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use super::Lms7002m;
use crate::connection::{self, McuProgMode};
use crate::error::{ErrorCode, LimeError, Result};

const MCU_P0: u16 = 0x0000;
const MCU_P1: u16 = 0x0001;
const MCU_CTRL: u16 = 0x0002;
const MCU_SPI_SWITCH: u16 = 0x0006;
const MCU_INTERRUPT6: u16 = 0x0008;
const MCU_BUSY: u16 = 0xFF;

pub const MCU_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum McuProcedure {
    CalibrateTx = 1,
    CalibrateRx = 2,
    UpdateBandwidth = 3,
    UpdateRefClk = 4,
    TuneTxFilter = 5,
    TuneRxFilter = 6,
    CalibrateTxExternal = 17,
    CalibrateRxExternal = 18,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuParameter {
    RefClk,
    Bandwidth,
}

impl Lms7002m {
    pub fn run_mcu_procedure(&mut self, id: u8) -> Result<()> {
        self.spi_write_batch(&[(MCU_SPI_SWITCH, (id != 0) as u16), (MCU_P0, id as u16)])?;
        let ctrl = self.spi_read(MCU_CTRL, true)? & 0xFF;
        self.spi_write(MCU_CTRL, ctrl | MCU_INTERRUPT6)?;
        self.spi_write(MCU_CTRL, ctrl & !MCU_INTERRUPT6)
    }

    /// Poll P1 until the MCU leaves the busy state, returning its status code.
    pub fn wait_for_mcu(&mut self, timeout: Duration) -> Result<u8> {
        let start = Instant::now();
        loop {
            let value = self.spi_read(MCU_P1, true)? & 0xFF;
            if value != MCU_BUSY {
                self.spi_write(MCU_SPI_SWITCH, 0)?;
                return Ok((value & 0x7F) as u8);
            }
            if start.elapsed() > timeout {
                self.spi_write(MCU_SPI_SWITCH, 0)?;
                return Err(LimeError::new(ErrorCode::TimedOut, "MCU procedure timed out"));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Run a procedure to completion. A non-zero MCU status is an error.
    pub fn call_mcu(&mut self, proc: McuProcedure) -> Result<()> {
        debug!("MCU: running {:?}", proc);
        self.run_mcu_procedure(proc as u8)?;
        match self.wait_for_mcu(MCU_TIMEOUT)? {
            0 => Ok(()),
            code => Err(LimeError::io(format!("MCU {:?} failed with code {}", proc, code))),
        }
    }

    /// Pass a frequency to the MCU as integer MHz plus thousandths.
    pub fn set_mcu_parameter(&mut self, param: McuParameter, hz: f64) -> Result<()> {
        let mhz = hz / 1e6;
        let int = mhz.floor();
        let thousandths = ((mhz - int) * 1000.0).round() as u16;
        for byte in [int as u8, (thousandths >> 8) as u8, thousandths as u8] {
            self.run_mcu_procedure(byte)?;
            self.wait_for_mcu(MCU_TIMEOUT)?;
        }
        self.call_mcu(match param {
            McuParameter::RefClk => McuProcedure::UpdateRefClk,
            McuParameter::Bandwidth => McuProcedure::UpdateBandwidth,
        })
    }

    pub fn reset_mcu(&mut self) -> Result<()> {
        self.spi_write(MCU_CTRL, 0)
    }

    pub fn program_mcu(&mut self, image: &[u8], mode: McuProgMode) -> Result<()> {
        let conn = self.connection().cloned().ok_or_else(LimeError::not_connected)?;
        let mut c = connection::lock(&conn)?;
        c.program_mcu(image, mode)
    }
}
