use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};

#[cfg(not(test))]
use super::usb_handle::UsbHandle;
#[cfg(test)]
use super::mock_usb_handle::MockUsbHandle as UsbHandle;

use super::constants::*;
use super::protocol::{split_blocks, Command, Packet, Status, PACKET_SIZE};
use super::{
    Connection, CustomParam, DataLogCallback, DeviceInfo, McuProgMode, ProgramDevice,
    ProgramTarget,
};
use crate::error::{LimeError, Result};

/// LMS64C control and sample streaming over USB bulk endpoints.
pub struct UsbConnection {
    pub(super) handle: UsbHandle,
    pub(super) kind: BoardKind,
    pub(super) endpoints: Endpoints,
    pub(super) data_log: Option<DataLogCallback>,
    pub(super) tx_rate: f64,
    pub(super) rx_rate: f64,
}

impl UsbConnection {
    pub fn open(bus: u8, address: u8, kind: BoardKind) -> Result<UsbConnection> {
        let interfaces: &[u8] = match kind {
            BoardKind::LimeSdrMini => &[0, 1],
            _ => &[USB_INTERFACE],
        };
        let handle = UsbHandle::open(bus, address, interfaces)?;
        info!("Opened {:?} at bus {} address {}", kind, bus, address);
        Ok(UsbConnection {
            handle,
            kind,
            endpoints: kind.endpoints(),
            data_log: None,
            tx_rate: 0.0,
            rx_rate: 0.0,
        })
    }

    pub fn kind(&self) -> BoardKind {
        self.kind
    }

    /// Send one control packet and wait for its reply.
    pub fn transact(&mut self, pkt: &Packet) -> Result<Packet> {
        let out = pkt.encode();
        if let Some(cb) = self.data_log.as_mut() {
            cb(true, &out);
        }
        let len = self
            .handle
            .write_bulk(self.endpoints.ctrl_out, &out, CTRL_TIMEOUT)?;
        if len != PACKET_SIZE {
            return Err(LimeError::io(format!(
                "Control write incomplete: {} of {} bytes",
                len, PACKET_SIZE
            )));
        }
        let mut reply = [0u8; PACKET_SIZE];
        let len = self
            .handle
            .read_bulk(self.endpoints.ctrl_in, &mut reply, CTRL_TIMEOUT)?;
        if let Some(cb) = self.data_log.as_mut() {
            cb(false, &reply[..len]);
        }
        let reply = Packet::decode(&reply[..len])?;
        debug!(
            "{:?}: {} block(s), status {}",
            reply.cmd, reply.block_count, reply.status
        );
        if reply.status != Status::Completed {
            return Err(LimeError::Protocol(reply.status));
        }
        Ok(reply)
    }

    /// Send `data` split into packets and collect the reply blocks.
    fn transact_blocks(&mut self, cmd: Command, periph_id: u8, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for pkt in split_blocks(cmd, periph_id, data) {
            let reply = self.transact(&pkt)?;
            out.extend_from_slice(reply.response_blocks());
        }
        Ok(out)
    }

    fn write_spi16(&mut self, cmd: Command, regs: &[(u16, u16)]) -> Result<()> {
        let mut data = vec![0u8; regs.len() * 4];
        for (block, (addr, val)) in data.chunks_mut(4).zip(regs) {
            BigEndian::write_u16(&mut block[0..2], *addr);
            BigEndian::write_u16(&mut block[2..4], *val);
        }
        self.transact_blocks(cmd, PERIPH_LMS7002, &data)?;
        Ok(())
    }

    fn read_spi16(&mut self, cmd: Command, addrs: &[u16]) -> Result<Vec<u16>> {
        let mut data = vec![0u8; addrs.len() * 2];
        for (block, addr) in data.chunks_mut(2).zip(addrs) {
            BigEndian::write_u16(block, *addr);
        }
        let reply = self.transact_blocks(cmd, PERIPH_LMS7002, &data)?;
        if reply.len() < addrs.len() * 4 {
            return Err(LimeError::io("Register read returned too few values"));
        }
        Ok(reply
            .chunks(4)
            .take(addrs.len())
            .map(|b| BigEndian::read_u16(&b[2..4]))
            .collect())
    }
}

fn device_name(id: u8) -> &'static str {
    match id {
        12 => "LimeSDR-USB",
        14 => "LimeSDR-QPCIe",
        15 => "LimeSDR-Mini",
        _ => "UNKNOWN",
    }
}

fn expansion_name(id: u8) -> &'static str {
    match id {
        0 => "UNKNOWN",
        1 => "N/A",
        _ => "UNSUPPORTED",
    }
}

impl Connection for UsbConnection {
    fn is_open(&self) -> bool {
        true
    }

    fn device_info(&mut self) -> Result<DeviceInfo> {
        let reply = self.transact(&Packet::new(Command::GetInfo))?;
        let p = &reply.payload;
        Ok(DeviceInfo {
            device_name: device_name(p[1]).to_string(),
            expansion_name: expansion_name(p[4]).to_string(),
            firmware_version: p[0].to_string(),
            hardware_version: p[3].to_string(),
            protocol_version: p[2].to_string(),
            board_serial_number: BigEndian::read_u64(&p[10..18]),
            addr_adf4002: ADF4002_SPI_ADDR,
        })
    }

    fn reset_chip(&mut self) -> Result<()> {
        let mut pkt = Packet::new(Command::Lms7002Reset);
        pkt.block_count = 1;
        // 0 = low, 1 = high, 2 = pulse
        pkt.payload[0] = 2;
        self.transact(&pkt)?;
        Ok(())
    }

    fn write_lms(&mut self, regs: &[(u16, u16)]) -> Result<()> {
        self.write_spi16(Command::Lms7002Write, regs)
    }

    fn read_lms(&mut self, addrs: &[u16]) -> Result<Vec<u16>> {
        self.read_spi16(Command::Lms7002Read, addrs)
    }

    fn write_fpga(&mut self, regs: &[(u16, u16)]) -> Result<()> {
        self.write_spi16(Command::BoardSpiWrite, regs)
    }

    fn read_fpga(&mut self, addrs: &[u16]) -> Result<Vec<u16>> {
        self.read_spi16(Command::BoardSpiRead, addrs)
    }

    fn si5351_write(&mut self, regs: &[(u8, u8)]) -> Result<()> {
        let data: Vec<u8> = regs.iter().flat_map(|(a, v)| [*a, *v]).collect();
        self.transact_blocks(Command::Si5351Write, 0, &data)?;
        Ok(())
    }

    fn si5351_read(&mut self, addrs: &[u8]) -> Result<Vec<u8>> {
        let reply = self.transact_blocks(Command::Si5351Read, 0, addrs)?;
        Ok(reply.chunks(2).take(addrs.len()).map(|b| b[1]).collect())
    }

    fn write_adf4002(&mut self, spi_addr: u8, words: &[u32]) -> Result<()> {
        let data: Vec<u8> = words
            .iter()
            .flat_map(|w| [(w >> 16) as u8, (w >> 8) as u8, *w as u8])
            .collect();
        self.transact_blocks(Command::Adf4002Write, spi_addr, &data)?;
        Ok(())
    }

    fn gpio_write(&mut self, data: &[u8]) -> Result<()> {
        self.transact_blocks(Command::GpioWrite, 0, data)?;
        Ok(())
    }

    fn gpio_read(&mut self, len: usize) -> Result<Vec<u8>> {
        let index: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let mut reply = self.transact_blocks(Command::GpioRead, 0, &index)?;
        reply.truncate(len);
        Ok(reply)
    }

    fn custom_param_write(&mut self, params: &[CustomParam]) -> Result<()> {
        let data: Vec<u8> = params.iter().flat_map(|p| p.encode()).collect();
        self.transact_blocks(Command::AnalogValueWrite, 0, &data)?;
        Ok(())
    }

    fn custom_param_read(&mut self, ids: &[u8]) -> Result<Vec<CustomParam>> {
        let reply = self.transact_blocks(Command::AnalogValueRead, 0, ids)?;
        Ok(reply
            .chunks(4)
            .take(ids.len())
            .map(CustomParam::decode)
            .collect())
    }

    fn program_chunk(
        &mut self,
        device: ProgramDevice,
        target: ProgramTarget,
        index: u32,
        chunk: &[u8],
    ) -> Result<()> {
        if chunk.len() > PROGRAM_CHUNK_SIZE {
            return Err(LimeError::invalid("Program chunk too large"));
        }
        let cmd = match device {
            ProgramDevice::Fpga => Command::FpgaGatewareWrite,
            ProgramDevice::Firmware => Command::MemoryWrite,
        };
        let mut pkt = Packet::new(cmd);
        pkt.block_count = 1;
        pkt.payload[0] = target as u8;
        BigEndian::write_u32(&mut pkt.payload[1..5], index);
        pkt.payload[5] = chunk.len() as u8;
        pkt.payload[24..24 + chunk.len()].copy_from_slice(chunk);
        self.transact(&pkt)?;
        Ok(())
    }

    fn program_mcu(&mut self, image: &[u8], mode: McuProgMode) -> Result<()> {
        if image.len() > MCU_PROGRAM_SIZE {
            return Err(LimeError::invalid("MCU image exceeds 16 KiB"));
        }
        let mut padded = image.to_vec();
        padded.resize(MCU_PROGRAM_SIZE, 0);
        for (i, chunk) in padded.chunks(PROGRAM_CHUNK_SIZE).enumerate() {
            let mut pkt = Packet::new(Command::ProgramMcu);
            pkt.block_count = 1;
            pkt.payload[0] = mode as u8;
            pkt.payload[1] = i as u8;
            pkt.payload[2..2 + PROGRAM_CHUNK_SIZE].copy_from_slice(chunk);
            self.transact(&pkt)?;
        }
        info!("MCU programmed ({:?})", mode);
        Ok(())
    }

    fn update_external_data_rate(
        &mut self,
        channel: usize,
        tx_rate: f64,
        rx_rate: f64,
    ) -> Result<()> {
        debug!(
            "Interface rate ch{}: tx {:.3} MHz, rx {:.3} MHz",
            channel,
            tx_rate / 1e6,
            rx_rate / 1e6
        );
        self.tx_rate = tx_rate;
        self.rx_rate = rx_rate;
        Ok(())
    }

    fn external_data_rate(&self) -> (f64, f64) {
        (self.tx_rate, self.rx_rate)
    }

    fn set_data_log_callback(&mut self, callback: Option<DataLogCallback>) {
        self.data_log = callback;
    }

    fn reset_stream_buffers(&mut self) -> Result<()> {
        let mut pkt = Packet::new(Command::UsbFifoReset);
        pkt.block_count = 1;
        self.transact(&pkt)?;
        Ok(())
    }

    fn receive_stream(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.handle.read_bulk(self.endpoints.stream_in, buf, timeout)
    }

    fn send_stream(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        self.handle.write_bulk(self.endpoints.stream_out, buf, timeout)
    }
}
