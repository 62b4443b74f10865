//! LMS64C control packets, as spoken by the LimeSDR board firmware.

use std::fmt;

use crate::error::{LimeError, Result};

pub const PACKET_SIZE: usize = 64;
pub const HEADER_SIZE: usize = 8;
pub const PAYLOAD_SIZE: usize = PACKET_SIZE - HEADER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    GetInfo = 0x00,
    Si5351Write = 0x13,
    Si5351Read = 0x14,
    Lms7002Reset = 0x20,
    Lms7002Write = 0x21,
    Lms7002Read = 0x22,
    ProgramMcu = 0x2C,
    Adf4002Write = 0x31,
    UsbFifoReset = 0x40,
    GpioWrite = 0x51,
    GpioRead = 0x52,
    FpgaGatewareWrite = 0x53,
    BoardSpiWrite = 0x55,
    BoardSpiRead = 0x56,
    AnalogValueWrite = 0x61,
    AnalogValueRead = 0x62,
    MemoryWrite = 0x8C,
}

impl Command {
    pub fn from_u8(val: u8) -> Option<Command> {
        use Command::*;
        let cmd = match val {
            0x00 => GetInfo,
            0x13 => Si5351Write,
            0x14 => Si5351Read,
            0x20 => Lms7002Reset,
            0x21 => Lms7002Write,
            0x22 => Lms7002Read,
            0x2C => ProgramMcu,
            0x31 => Adf4002Write,
            0x40 => UsbFifoReset,
            0x51 => GpioWrite,
            0x52 => GpioRead,
            0x53 => FpgaGatewareWrite,
            0x55 => BoardSpiWrite,
            0x56 => BoardSpiRead,
            0x61 => AnalogValueWrite,
            0x62 => AnalogValueRead,
            0x8C => MemoryWrite,
            _ => return None,
        };
        Some(cmd)
    }

    /// Bytes each block occupies in the request payload.
    pub fn request_block_size(&self) -> usize {
        use Command::*;
        match self {
            Lms7002Write | BoardSpiWrite | AnalogValueWrite => 4,
            Lms7002Read | BoardSpiRead | Si5351Write => 2,
            Adf4002Write => 3,
            Si5351Read | GpioWrite | GpioRead | AnalogValueRead => 1,
            GetInfo | Lms7002Reset | ProgramMcu | UsbFifoReset | FpgaGatewareWrite
            | MemoryWrite => PAYLOAD_SIZE,
        }
    }

    /// Bytes each block occupies in the response payload.
    pub fn response_block_size(&self) -> usize {
        use Command::*;
        match self {
            Lms7002Read | BoardSpiRead | AnalogValueRead => 4,
            Si5351Read => 2,
            _ => self.request_block_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Undefined,
    Completed,
    UnknownCommand,
    Busy,
    TooManyBlocks,
    Error,
    WrongOrder,
    ResourceDenied,
    Unrecognized(u8),
}

impl Status {
    pub fn from_u8(val: u8) -> Status {
        match val {
            0 => Status::Undefined,
            1 => Status::Completed,
            2 => Status::UnknownCommand,
            3 => Status::Busy,
            4 => Status::TooManyBlocks,
            5 => Status::Error,
            6 => Status::WrongOrder,
            7 => Status::ResourceDenied,
            x => Status::Unrecognized(x),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Status::Undefined => 0,
            Status::Completed => 1,
            Status::UnknownCommand => 2,
            Status::Busy => 3,
            Status::TooManyBlocks => 4,
            Status::Error => 5,
            Status::WrongOrder => 6,
            Status::ResourceDenied => 7,
            Status::Unrecognized(x) => x,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Undefined => f.write_str("Undefined/Failure"),
            Status::Completed => f.write_str("Completed"),
            Status::UnknownCommand => f.write_str("Unknown command"),
            Status::Busy => f.write_str("Busy"),
            Status::TooManyBlocks => f.write_str("Too many blocks"),
            Status::Error => f.write_str("Error"),
            Status::WrongOrder => f.write_str("Wrong order"),
            Status::ResourceDenied => f.write_str("Resource denied"),
            Status::Unrecognized(x) => write!(f, "Unrecognized status 0x{:02x}", x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub cmd: Command,
    pub status: Status,
    pub block_count: u8,
    pub periph_id: u8,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl Packet {
    pub fn new(cmd: Command) -> Packet {
        Packet {
            cmd,
            status: Status::Undefined,
            block_count: 0,
            periph_id: 0,
            payload: [0; PAYLOAD_SIZE],
        }
    }

    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.cmd as u8;
        buf[1] = self.status.to_u8();
        buf[2] = self.block_count;
        buf[3] = self.periph_id;
        buf[HEADER_SIZE..].copy_from_slice(&self.payload);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Packet> {
        if buf.len() < PACKET_SIZE {
            return Err(LimeError::io(format!(
                "Short control packet: {} bytes",
                buf.len()
            )));
        }
        let cmd = Command::from_u8(buf[0])
            .ok_or_else(|| LimeError::io(format!("Unknown command in reply: 0x{:02x}", buf[0])))?;
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&buf[HEADER_SIZE..PACKET_SIZE]);
        Ok(Packet {
            cmd,
            status: Status::from_u8(buf[1]),
            block_count: buf[2],
            periph_id: buf[3],
            payload,
        })
    }

    /// Payload bytes of the blocks carried by a response packet.
    pub fn response_blocks(&self) -> &[u8] {
        let len = (self.block_count as usize * self.cmd.response_block_size()).min(PAYLOAD_SIZE);
        &self.payload[..len]
    }
}

/// Split `data` made of `cmd`-sized request blocks into as many packets as
/// needed.
pub fn split_blocks(cmd: Command, periph_id: u8, data: &[u8]) -> Vec<Packet> {
    let block_size = cmd.request_block_size();
    // replies must also fit in one payload
    let per_packet = (PAYLOAD_SIZE / block_size).min(PAYLOAD_SIZE / cmd.response_block_size());
    assert!(data.len() % block_size == 0);
    data.chunks(per_packet * block_size)
        .map(|chunk| {
            let mut pkt = Packet::new(cmd);
            pkt.periph_id = periph_id;
            pkt.block_count = (chunk.len() / block_size) as u8;
            pkt.payload[..chunk.len()].copy_from_slice(chunk);
            pkt
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_header_layout() {
        let mut pkt = Packet::new(Command::Lms7002Write);
        pkt.block_count = 1;
        pkt.periph_id = 2;
        pkt.payload[..4].copy_from_slice(&[0x00, 0x20, 0xff, 0xfd]);
        let buf = pkt.encode();
        assert_eq!(&buf[..8], &[0x21, 0x00, 0x01, 0x02, 0, 0, 0, 0]);
        assert_eq!(&buf[8..12], &[0x00, 0x20, 0xff, 0xfd]);
    }

    #[test]
    fn test_decode_reply() {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = 0x22;
        buf[1] = 0x01;
        buf[2] = 2;
        buf[8..16].copy_from_slice(&[0x00, 0x20, 0xff, 0xfd, 0x00, 0x21, 0x0e, 0x9f]);
        let pkt = Packet::decode(&buf).unwrap();
        assert_eq!(pkt.cmd, Command::Lms7002Read);
        assert_eq!(pkt.status, Status::Completed);
        assert_eq!(pkt.response_blocks().len(), 8);
    }

    #[test]
    fn test_decode_rejects_short_and_unknown() {
        assert!(Packet::decode(&[0x21; 10]).is_err());
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = 0xEE;
        assert!(Packet::decode(&buf).is_err());
    }

    #[test]
    fn test_split_blocks_respects_payload_limits() {
        // 20 register writes at 4 bytes each need two packets of 14 + 6
        let data = vec![0u8; 20 * 4];
        let pkts = split_blocks(Command::Lms7002Write, 0, &data);
        assert_eq!(pkts.len(), 2);
        assert_eq!(pkts[0].block_count, 14);
        assert_eq!(pkts[1].block_count, 6);

        // reads are limited by the 4-byte reply blocks, not the 2-byte request
        let data = vec![0u8; 20 * 2];
        let pkts = split_blocks(Command::Lms7002Read, 0, &data);
        assert_eq!(pkts[0].block_count, 14);
    }

    #[test]
    fn test_status_round_trip_unrecognized() {
        assert_eq!(Status::from_u8(0x42), Status::Unrecognized(0x42));
        assert_eq!(Status::Unrecognized(0x42).to_u8(), 0x42);
    }
}
