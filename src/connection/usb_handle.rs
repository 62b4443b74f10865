use std::time::Duration;

use log::{debug, warn};
use rusb::{Context, UsbContext};

use crate::error::{ErrorCode, LimeError, Result};

use super::constants::{BoardKind, KNOWN_DEVICES};

/// A supported board seen on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceDescriptor {
    pub bus: u8,
    pub address: u8,
    pub vid: u16,
    pub pid: u16,
    pub kind: BoardKind,
    pub description: &'static str,
    pub serial: String,
}

/// List every attached board from `KNOWN_DEVICES`.
pub fn enumerate() -> Result<Vec<UsbDeviceDescriptor>> {
    let context = Context::new()?;
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        let desc = device.device_descriptor()?;
        let sig = match KNOWN_DEVICES
            .iter()
            .find(|d| d.vid == desc.vendor_id() && d.pid == desc.product_id())
        {
            Some(sig) => sig,
            None => continue,
        };
        // A board claimed by another process still gets listed, just without serial
        let serial = match device.open() {
            Ok(handle) => handle
                .read_serial_number_string_ascii(&desc)
                .unwrap_or_default(),
            Err(e) => {
                debug!("Unable to read serial of {}: {}", sig.description, e);
                String::new()
            }
        };
        found.push(UsbDeviceDescriptor {
            bus: device.bus_number(),
            address: device.address(),
            vid: sig.vid,
            pid: sig.pid,
            kind: sig.kind,
            description: sig.description,
            serial,
        });
    }
    Ok(found)
}

#[derive(Debug)]
pub struct UsbHandle {
    handle: rusb::DeviceHandle<Context>,
    interfaces: Vec<u8>,
}

impl UsbHandle {
    pub fn open(bus: u8, address: u8, interfaces: &[u8]) -> Result<Self> {
        let context = Context::new()?;
        for device in context.devices()?.iter() {
            if device.bus_number() != bus || device.address() != address {
                continue;
            }
            let mut handle = device.open()?;
            for iface in interfaces {
                handle.claim_interface(*iface)?;
            }
            return Ok(UsbHandle {
                handle,
                interfaces: interfaces.to_vec(),
            });
        }
        Err(LimeError::new(
            ErrorCode::NoDevice,
            format!("No USB device at bus {} address {}", bus, address),
        ))
    }

    pub fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.handle.read_bulk(endpoint, buf, timeout)?)
    }

    pub fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> Result<usize> {
        Ok(self.handle.write_bulk(endpoint, buf, timeout)?)
    }
}

impl Drop for UsbHandle {
    fn drop(&mut self) {
        for iface in &self.interfaces {
            if let Err(e) = self.handle.release_interface(*iface) {
                warn!("Failed to release interface {}: {}", iface, e);
            }
        }
    }
}
