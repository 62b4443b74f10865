//! # limesuite-rs
//! Library for controlling LimeSDR boards built around the LMS7002M
//! transceiver. The Rust API is [`LimeSdr`]; the `LMS_*` C functions in
//! [`capi`] wrap it for C callers.

pub mod adf4002;
pub mod capi;
pub mod connection;
mod device;
pub mod error;
pub mod fpga_pll;
pub mod gfir;
pub mod lms7002m;
pub mod si5351c;
pub mod stream;

pub use connection::{BoardKind, ConnectionHandle, DeviceInfo, ProgramTarget};
pub use device::{
    ClockId, FilterKind, Lms7Device as LimeSdr, ProgressCallback, RX_ANTENNAS, TX_ANTENNAS,
};
pub use error::{ErrorCode, LimeError, Result};
pub use lms7002m::params::Parameter;
pub use lms7002m::{GfirFilter, TestSignal};
pub use si5351c::{PllSource, StatusBits};
pub use stream::{DataFormat, StreamConfig, StreamMeta, StreamStatus};

/// Closed interval `[min, max]` with an optional step (0 for continuous).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64, step: f64) -> Range {
        Range { min, max, step }
    }

    pub fn contains(&self, val: f64) -> bool {
        val >= self.min && val <= self.max
    }
}

/// List the boards that can be opened, as serialized connection handles.
pub fn device_list() -> Result<Vec<String>> {
    Ok(connection::find_connections()?
        .iter()
        .map(ConnectionHandle::serialize)
        .collect())
}
