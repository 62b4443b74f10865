//! In-memory board used by the behavioural tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::{
    Connection, CustomParam, DataLogCallback, DeviceInfo, McuProgMode, ProgramDevice,
    ProgramTarget, SharedConnection,
};
use crate::error::{LimeError, Result};
use crate::lms7002m::params::default_value;

pub const FAKE_PACKET_SIZE: usize = 4096;

pub struct FakeConnection {
    pub open: bool,
    pub info: DeviceInfo,
    /// Channel A (with shared registers) and channel B.
    pub lms: [BTreeMap<u16, u16>; 2],
    pub lms_writes: Vec<(u16, u16)>,
    /// Value the MCU reports in P1 when polled.
    pub mcu_result: u16,
    pub chip_resets: usize,
    pub fpga: BTreeMap<u16, u16>,
    pub fpga_writes: Vec<(u16, u16)>,
    /// Report an error instead of done when an FPGA PLL job starts.
    pub fpga_pll_error: bool,
    pub si5351: [u8; 256],
    pub si5351_writes: Vec<(u8, u8)>,
    pub adf4002: Vec<(u8, Vec<u32>)>,
    pub gpio: Vec<u8>,
    pub custom: BTreeMap<u8, CustomParam>,
    pub program_log: Vec<(ProgramDevice, ProgramTarget, u32, usize)>,
    pub mcu_images: Vec<(usize, McuProgMode)>,
    pub rates: (f64, f64),
    pub fifo_resets: usize,
    pub rx_counter: u64,
    pub rx_packets: u64,
    /// Skip one packet worth of timestamps after this many RX packets.
    pub rx_gap_after: Option<u64>,
    pub rx_fill: u8,
    pub sent: Vec<Vec<u8>>,
    data_log: Option<DataLogCallback>,
}

impl FakeConnection {
    pub fn new() -> FakeConnection {
        FakeConnection {
            open: true,
            info: DeviceInfo {
                device_name: "LimeSDR-USB".to_string(),
                expansion_name: "N/A".to_string(),
                firmware_version: "4".to_string(),
                hardware_version: "2".to_string(),
                protocol_version: "1".to_string(),
                board_serial_number: 0x1234,
                addr_adf4002: 0x30,
            },
            lms: [BTreeMap::new(), BTreeMap::new()],
            lms_writes: Vec::new(),
            mcu_result: 0,
            chip_resets: 0,
            fpga: BTreeMap::new(),
            fpga_writes: Vec::new(),
            fpga_pll_error: false,
            si5351: [0; 256],
            si5351_writes: Vec::new(),
            adf4002: Vec::new(),
            gpio: vec![0; 4],
            custom: BTreeMap::new(),
            program_log: Vec::new(),
            mcu_images: Vec::new(),
            rates: (0.0, 0.0),
            fifo_resets: 0,
            rx_counter: 0,
            rx_packets: 0,
            rx_gap_after: None,
            rx_fill: 0,
            sent: Vec::new(),
            data_log: None,
        }
    }

    pub fn shared() -> (Arc<Mutex<FakeConnection>>, SharedConnection) {
        let fake = Arc::new(Mutex::new(FakeConnection::new()));
        let conn: SharedConnection = fake.clone();
        (fake, conn)
    }

    fn mac(&self) -> u16 {
        self.lms[0].get(&0x0020).copied().unwrap_or(0xFFFF) & 0x3
    }

    fn lms_value(&self, addr: u16) -> u16 {
        let bank = if addr >= 0x0100 && self.mac() == 2 { 1 } else { 0 };
        self.lms[bank]
            .get(&addr)
            .copied()
            .unwrap_or_else(|| default_value(addr))
    }

    /// Register value of channel `ch`, ignoring MAC.
    pub fn channel_reg(&self, ch: usize, addr: u16) -> u16 {
        let bank = if addr < 0x0100 { 0 } else { ch };
        self.lms[bank]
            .get(&addr)
            .copied()
            .unwrap_or_else(|| default_value(addr))
    }

    fn log(&mut self, sent: bool, data: &[u8]) {
        if let Some(cb) = self.data_log.as_mut() {
            cb(sent, data);
        }
    }

    fn samples_per_packet(&self) -> u64 {
        if self.fpga.get(&0x0008).copied().unwrap_or(0) & 0x3 == 2 {
            1360
        } else {
            1020
        }
    }
}

impl Connection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open
    }

    fn device_info(&mut self) -> Result<DeviceInfo> {
        Ok(self.info.clone())
    }

    fn reset_chip(&mut self) -> Result<()> {
        self.chip_resets += 1;
        self.lms[0].clear();
        self.lms[1].clear();
        Ok(())
    }

    fn write_lms(&mut self, regs: &[(u16, u16)]) -> Result<()> {
        self.log(true, &[0x21]);
        for &(addr, val) in regs {
            self.lms_writes.push((addr, val));
            if addr < 0x0100 {
                self.lms[0].insert(addr, val);
                continue;
            }
            let mac = self.mac();
            if mac & 1 != 0 {
                self.lms[0].insert(addr, val);
            }
            if mac & 2 != 0 {
                self.lms[1].insert(addr, val);
            }
        }
        Ok(())
    }

    fn read_lms(&mut self, addrs: &[u16]) -> Result<Vec<u16>> {
        Ok(addrs
            .iter()
            .map(|&addr| match addr {
                0x0001 => self.mcu_result,
                // VCO comparators always report lock
                0x008C | 0x0123 => (self.lms_value(addr) & !0x3000) | 0x2000,
                _ => self.lms_value(addr),
            })
            .collect())
    }

    fn write_fpga(&mut self, regs: &[(u16, u16)]) -> Result<()> {
        for &(addr, val) in regs {
            self.fpga.insert(addr, val);
            self.fpga_writes.push((addr, val));
            // PLL control: a start bit finishes the job at once
            if addr == 0x0023 {
                let status = match (val & 0x3 != 0, self.fpga_pll_error) {
                    (false, _) => 0,
                    (true, false) => 0x1,
                    (true, true) => 0x2,
                };
                self.fpga.insert(0x0021, status);
            }
        }
        Ok(())
    }

    fn read_fpga(&mut self, addrs: &[u16]) -> Result<Vec<u16>> {
        Ok(addrs
            .iter()
            .map(|a| self.fpga.get(a).copied().unwrap_or(0))
            .collect())
    }

    fn si5351_write(&mut self, regs: &[(u8, u8)]) -> Result<()> {
        for &(addr, val) in regs {
            self.si5351[addr as usize] = val;
            self.si5351_writes.push((addr, val));
        }
        Ok(())
    }

    fn si5351_read(&mut self, addrs: &[u8]) -> Result<Vec<u8>> {
        Ok(addrs.iter().map(|a| self.si5351[*a as usize]).collect())
    }

    fn write_adf4002(&mut self, spi_addr: u8, words: &[u32]) -> Result<()> {
        self.adf4002.push((spi_addr, words.to_vec()));
        Ok(())
    }

    fn gpio_write(&mut self, data: &[u8]) -> Result<()> {
        self.gpio = data.to_vec();
        Ok(())
    }

    fn gpio_read(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = self.gpio.clone();
        out.resize(len, 0);
        Ok(out)
    }

    fn custom_param_write(&mut self, params: &[CustomParam]) -> Result<()> {
        for p in params {
            // keep only what survives the wire encoding
            self.custom.insert(p.id, CustomParam::decode(&p.encode()));
        }
        Ok(())
    }

    fn custom_param_read(&mut self, ids: &[u8]) -> Result<Vec<CustomParam>> {
        Ok(ids
            .iter()
            .map(|id| {
                self.custom.get(id).cloned().unwrap_or(CustomParam {
                    id: *id,
                    value: 0.0,
                    units: String::new(),
                })
            })
            .collect())
    }

    fn program_chunk(
        &mut self,
        device: ProgramDevice,
        target: ProgramTarget,
        index: u32,
        chunk: &[u8],
    ) -> Result<()> {
        self.program_log.push((device, target, index, chunk.len()));
        Ok(())
    }

    fn program_mcu(&mut self, image: &[u8], mode: McuProgMode) -> Result<()> {
        self.mcu_images.push((image.len(), mode));
        Ok(())
    }

    fn update_external_data_rate(&mut self, _channel: usize, tx_rate: f64, rx_rate: f64) -> Result<()> {
        self.rates = (tx_rate, rx_rate);
        Ok(())
    }

    fn external_data_rate(&self) -> (f64, f64) {
        self.rates
    }

    fn set_data_log_callback(&mut self, callback: Option<DataLogCallback>) {
        self.data_log = callback;
    }

    fn reset_stream_buffers(&mut self) -> Result<()> {
        self.fifo_resets += 1;
        Ok(())
    }

    fn receive_stream(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.fpga.get(&0x000A).copied().unwrap_or(0) & 0x1 == 0 {
            thread::sleep(timeout.min(Duration::from_millis(5)));
            return Err(LimeError::Usb(rusb::Error::Timeout));
        }
        thread::sleep(Duration::from_micros(100));
        let spp = self.samples_per_packet();
        let mut filled = 0;
        for packet in buf.chunks_exact_mut(FAKE_PACKET_SIZE) {
            packet.fill(self.rx_fill);
            packet[..16].fill(0);
            packet[8..16].copy_from_slice(&self.rx_counter.to_le_bytes());
            self.rx_packets += 1;
            self.rx_counter += spp;
            if self.rx_gap_after == Some(self.rx_packets) {
                self.rx_counter += spp;
            }
            filled += FAKE_PACKET_SIZE;
        }
        Ok(filled)
    }

    fn send_stream(&mut self, buf: &[u8], _timeout: Duration) -> Result<usize> {
        if self.fpga.get(&0x000A).copied().unwrap_or(0) & 0x2 == 0 {
            return Err(LimeError::Usb(rusb::Error::Timeout));
        }
        for packet in buf.chunks(FAKE_PACKET_SIZE) {
            self.sent.push(packet.to_vec());
        }
        Ok(buf.len())
    }
}
