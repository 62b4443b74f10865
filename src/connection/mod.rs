//! Board-side transport. Everything above this module talks to the hardware
//! through the `Connection` trait.

pub mod constants;
pub mod protocol;
mod usb;
pub mod usb_handle;
#[cfg(test)]
mod mock_usb_handle;
#[cfg(test)]
pub(crate) mod fake_connection;

pub use constants::BoardKind;
pub use usb::UsbConnection;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::info;
#[cfg(test)]
use mockall::automock;

use crate::error::{ErrorCode, LimeError, Result};

/// Callback receiving every raw control packet: `true` for sent, `false`
/// for received.
pub type DataLogCallback = Box<dyn FnMut(bool, &[u8]) + Send>;

pub type SharedConnection = Arc<Mutex<dyn Connection>>;

pub fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, dyn Connection + 'static>> {
    conn.lock()
        .map_err(|_| LimeError::io("Connection lock poisoned"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_name: String,
    pub expansion_name: String,
    pub firmware_version: String,
    pub hardware_version: String,
    pub protocol_version: String,
    pub board_serial_number: u64,
    /// SPI address of the ADF4002 reference PLL.
    pub addr_adf4002: u8,
}

/// Analog board value such as the VCTCXO DAC or a temperature sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomParam {
    pub id: u8,
    pub value: f64,
    pub units: String,
}

pub const PARAM_UNITS: [&str; 6] = ["", "V", "A", "Ohm", "W", "C"];

impl CustomParam {
    /// 4-byte wire block: `[id, (exp << 4) | unit, hi, lo]`. Unitless
    /// parameters carry a raw unsigned word with exponent 0; the others a
    /// signed mantissa scaled by a power of ten.
    pub fn encode(&self) -> [u8; 4] {
        let unit = PARAM_UNITS
            .iter()
            .position(|u| *u == self.units)
            .unwrap_or(0) as u8;
        if unit == 0 {
            let raw = self.value.round().clamp(0.0, u16::MAX as f64) as u16;
            let [hi, lo] = raw.to_be_bytes();
            return [self.id, 0, hi, lo];
        }
        let mut value = self.value;
        let mut exp: i8 = 0;
        while value.abs() > i16::MAX as f64 && exp < 7 {
            value /= 10.0;
            exp += 1;
        }
        while value.fract() != 0.0 && (value * 10.0).abs() <= i16::MAX as f64 && exp > -8 {
            value *= 10.0;
            exp -= 1;
        }
        let raw = value.round() as i16;
        let [hi, lo] = raw.to_be_bytes();
        [self.id, (((exp as u8) & 0x0F) << 4) | unit, hi, lo]
    }

    pub fn decode(block: &[u8]) -> CustomParam {
        // sign-extend the 4-bit exponent
        let exp = ((block[1] as i8) >> 4) as i32;
        let unit = (block[1] & 0x0F) as usize;
        let mantissa = if unit == 0 {
            u16::from_be_bytes([block[2], block[3]]) as f64
        } else {
            i16::from_be_bytes([block[2], block[3]]) as f64
        };
        CustomParam {
            id: block[0],
            value: mantissa * 10f64.powi(exp),
            units: PARAM_UNITS.get(unit).copied().unwrap_or("").to_string(),
        }
    }
}

/// Which image a program transfer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramDevice {
    Fpga,
    Firmware,
}

/// Where the programmed image ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramTarget {
    Ram = 0,
    Flash = 1,
    Boot = 2,
}

impl ProgramTarget {
    pub fn from_raw(val: u32) -> Result<ProgramTarget> {
        match val {
            0 => Ok(ProgramTarget::Ram),
            1 => Ok(ProgramTarget::Flash),
            2 => Ok(ProgramTarget::Boot),
            _ => Err(LimeError::invalid("Invalid programming target.")),
        }
    }
}

/// LMS7002M MCU programming modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McuProgMode {
    EepromAndSram = 1,
    Sram = 2,
    BootFromEeprom = 3,
}

impl From<ProgramTarget> for McuProgMode {
    fn from(target: ProgramTarget) -> Self {
        match target {
            ProgramTarget::Ram => McuProgMode::Sram,
            ProgramTarget::Flash => McuProgMode::EepromAndSram,
            ProgramTarget::Boot => McuProgMode::BootFromEeprom,
        }
    }
}

/// Board-side operations used by the chip and device layers.
#[cfg_attr(test, automock)]
pub trait Connection: Send {
    fn is_open(&self) -> bool;
    fn device_info(&mut self) -> Result<DeviceInfo>;
    /// Pulse the LMS7002M hardware reset line.
    fn reset_chip(&mut self) -> Result<()>;
    fn write_lms(&mut self, regs: &[(u16, u16)]) -> Result<()>;
    fn read_lms(&mut self, addrs: &[u16]) -> Result<Vec<u16>>;
    fn write_fpga(&mut self, regs: &[(u16, u16)]) -> Result<()>;
    fn read_fpga(&mut self, addrs: &[u16]) -> Result<Vec<u16>>;
    fn si5351_write(&mut self, regs: &[(u8, u8)]) -> Result<()>;
    fn si5351_read(&mut self, addrs: &[u8]) -> Result<Vec<u8>>;
    fn write_adf4002(&mut self, spi_addr: u8, words: &[u32]) -> Result<()>;
    fn gpio_write(&mut self, data: &[u8]) -> Result<()>;
    fn gpio_read(&mut self, len: usize) -> Result<Vec<u8>>;
    fn custom_param_write(&mut self, params: &[CustomParam]) -> Result<()>;
    fn custom_param_read(&mut self, ids: &[u8]) -> Result<Vec<CustomParam>>;
    /// Send one chunk of an FPGA or firmware image. An empty chunk ends the
    /// transfer.
    fn program_chunk(
        &mut self,
        device: ProgramDevice,
        target: ProgramTarget,
        index: u32,
        chunk: &[u8],
    ) -> Result<()>;
    fn program_mcu(&mut self, image: &[u8], mode: McuProgMode) -> Result<()>;
    fn update_external_data_rate(&mut self, channel: usize, tx_rate: f64, rx_rate: f64)
        -> Result<()>;
    fn external_data_rate(&self) -> (f64, f64);
    fn set_data_log_callback(&mut self, callback: Option<DataLogCallback>);
    fn reset_stream_buffers(&mut self) -> Result<()>;
    fn receive_stream(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn send_stream(&mut self, buf: &[u8], timeout: Duration) -> Result<usize>;
}

/// Enumerated device that can be reopened with `make_connection`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub name: String,
    pub media: String,
    pub addr: String,
    pub serial: String,
    /// USB bus and address; not part of the serialized form.
    pub location: Option<(u8, u8)>,
}

impl ConnectionHandle {
    pub fn serialize(&self) -> String {
        format!(
            "{}, media={}, addr={}, serial={}",
            self.name, self.media, self.addr, self.serial
        )
    }

    fn matches(&self, other: &ConnectionHandle) -> bool {
        self.addr == other.addr && (other.serial.is_empty() || self.serial == other.serial)
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for ConnectionHandle {
    type Err = LimeError;

    fn from_str(s: &str) -> Result<Self> {
        let mut handle = ConnectionHandle::default();
        for (i, field) in s.split(',').map(str::trim).enumerate() {
            match field.split_once('=') {
                Some(("media", v)) => handle.media = v.to_string(),
                Some(("addr", v)) => handle.addr = v.to_string(),
                Some(("serial", v)) => handle.serial = v.to_string(),
                Some((k, _)) => {
                    return Err(LimeError::invalid(format!("Unknown handle key: {}", k)))
                }
                None if i == 0 => handle.name = field.to_string(),
                None => return Err(LimeError::invalid(format!("Malformed handle: {}", s))),
            }
        }
        Ok(handle)
    }
}

/// Find all attached boards.
pub fn find_connections() -> Result<Vec<ConnectionHandle>> {
    let handles = usb_handle::enumerate()?
        .into_iter()
        .map(|d| ConnectionHandle {
            name: d.description.to_string(),
            media: "USB".to_string(),
            addr: format!("{:04x}:{:04x}", d.vid, d.pid),
            serial: d.serial,
            location: Some((d.bus, d.address)),
        })
        .collect::<Vec<_>>();
    info!("Found {} device(s)", handles.len());
    Ok(handles)
}

/// Open the board described by `handle`.
pub fn make_connection(handle: &ConnectionHandle) -> Result<SharedConnection> {
    let descriptor = usb_handle::enumerate()?
        .into_iter()
        .find(|d| {
            let candidate = ConnectionHandle {
                addr: format!("{:04x}:{:04x}", d.vid, d.pid),
                serial: d.serial.clone(),
                ..Default::default()
            };
            match handle.location {
                Some(loc) => loc == (d.bus, d.address),
                None => candidate.matches(handle),
            }
        })
        .ok_or_else(|| {
            LimeError::new(
                ErrorCode::NoDevice,
                format!("Device not found: {}", handle.serialize()),
            )
        })?;
    let conn = UsbConnection::open(descriptor.bus, descriptor.address, descriptor.kind)
        .map_err(|e| match e {
            LimeError::Usb(rusb::Error::Busy) | LimeError::Usb(rusb::Error::Access) => {
                LimeError::new(ErrorCode::Busy, "Failed to open. Device is busy.")
            }
            e => e,
        })?;
    info!("Opened {}", handle.serialize());
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_serialize_and_parse() {
        let handle = ConnectionHandle {
            name: "LimeSDR-USB".to_string(),
            media: "USB".to_string(),
            addr: "1d50:6108".to_string(),
            serial: "0009060B00471B22".to_string(),
            location: None,
        };
        let s = handle.serialize();
        assert_eq!(
            s,
            "LimeSDR-USB, media=USB, addr=1d50:6108, serial=0009060B00471B22"
        );
        let parsed: ConnectionHandle = s.parse().unwrap();
        assert_eq!(parsed, handle);
    }

    #[test]
    fn test_handle_parse_rejects_unknown_keys() {
        assert!("LimeSDR-USB, bogus=1".parse::<ConnectionHandle>().is_err());
    }

    #[test]
    fn test_custom_param_encoding() {
        let p = CustomParam {
            id: 0,
            value: 125.0,
            units: String::new(),
        };
        assert_eq!(p.encode(), [0, 0, 0, 125]);

        let t = CustomParam {
            id: 1,
            value: 25.5,
            units: "C".to_string(),
        };
        let block = t.encode();
        // 255 * 10^-1, unit index 5
        assert_eq!(block[1], 0xF5);
        assert_eq!(&block[2..], &[0x00, 0xFF]);
        let back = CustomParam::decode(&block);
        assert_eq!(back.units, "C");
        assert!((back.value - 25.5).abs() < 1e-9);
    }

    #[test]
    fn test_unitless_custom_param_is_raw_unsigned_word() {
        for value in [32767.0, 32768.0, 40001.0, 65531.0, 65535.0] {
            let p = CustomParam {
                id: 0,
                value,
                units: String::new(),
            };
            let block = p.encode();
            assert_eq!(block[1], 0);
            assert_eq!(CustomParam::decode(&block).value, value);
        }
        assert_eq!(CustomParam::decode(&[0, 0, 0x80, 0x00]).value, 32768.0);
    }

    #[test]
    fn test_custom_param_large_value_scales_down() {
        let p = CustomParam {
            id: 2,
            value: 100000.0,
            units: "Ohm".to_string(),
        };
        let back = CustomParam::decode(&p.encode());
        assert!((back.value - 100000.0).abs() < 1.0);
        assert_eq!(back.units, "Ohm");
    }

    #[test]
    fn test_program_target_maps_to_mcu_mode() {
        assert_eq!(McuProgMode::from(ProgramTarget::Ram), McuProgMode::Sram);
        assert_eq!(
            McuProgMode::from(ProgramTarget::Flash),
            McuProgMode::EepromAndSram
        );
        assert!(ProgramTarget::from_raw(7).is_err());
    }
}
