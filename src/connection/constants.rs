use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardKind {
    LimeSdrUsb,
    LimeSdrMini,
    QLimeSdr,
}

pub struct UsbDeviceSignature {
    pub vid: u16,
    pub pid: u16,
    pub kind: BoardKind,
    pub description: &'static str,
}

pub const KNOWN_DEVICES: &[UsbDeviceSignature] = &[
    UsbDeviceSignature {
        vid: 0x1d50,
        pid: 0x6108,
        kind: BoardKind::LimeSdrUsb,
        description: "LimeSDR-USB",
    },
    UsbDeviceSignature {
        vid: 0x0403,
        pid: 0x601f,
        kind: BoardKind::LimeSdrMini,
        description: "LimeSDR-Mini",
    },
];

/// Bulk endpoints for one board family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub ctrl_out: u8,
    pub ctrl_in: u8,
    pub stream_out: u8,
    pub stream_in: u8,
}

pub const USB_ENDPOINTS: Endpoints = Endpoints {
    ctrl_out: 0x0F,
    ctrl_in: 0x8F,
    stream_out: 0x01,
    stream_in: 0x81,
};

pub const MINI_ENDPOINTS: Endpoints = Endpoints {
    ctrl_out: 0x02,
    ctrl_in: 0x82,
    stream_out: 0x03,
    stream_in: 0x83,
};

impl BoardKind {
    pub fn endpoints(&self) -> Endpoints {
        match self {
            BoardKind::LimeSdrMini => MINI_ENDPOINTS,
            _ => USB_ENDPOINTS,
        }
    }

    pub fn num_channels(&self) -> usize {
        match self {
            BoardKind::LimeSdrMini => 1,
            _ => 2,
        }
    }

    /// Board family from the name the firmware reports. Unknown names are
    /// treated as LimeSDR-USB.
    pub fn from_device_name(name: &str) -> BoardKind {
        let name = name.to_ascii_lowercase();
        if name.starts_with("qlimesdr") {
            BoardKind::QLimeSdr
        } else if name.contains("mini") {
            BoardKind::LimeSdrMini
        } else {
            BoardKind::LimeSdrUsb
        }
    }

    /// Highest host sample rate the board's link sustains.
    pub fn max_sample_rate(&self) -> f64 {
        match self {
            BoardKind::LimeSdrMini => 30.72e6,
            _ => 61.44e6,
        }
    }
}

pub const USB_INTERFACE: u8 = 0;
pub const CTRL_TIMEOUT: Duration = Duration::from_millis(1000);

// Peripheral id used in the LMS64C header
pub const PERIPH_LMS7002: u8 = 0;

// Custom parameter id holding the VCTCXO trim DAC
pub const VCTCXO_PARAM_ID: u8 = 0;

/// Default SPI address of the ADF4002 on LimeSDR-USB.
pub const ADF4002_SPI_ADDR: u8 = 0x30;

pub const MCU_PROGRAM_SIZE: usize = 16 * 1024;
pub const PROGRAM_CHUNK_SIZE: usize = 32;
