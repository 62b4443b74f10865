//! FPGA sample packets: a 16-byte header followed by packed IQ samples.

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex;

pub const PACKET_SIZE: usize = 4096;
pub const HEADER_SIZE: usize = 16;
pub const PAYLOAD_SIZE: usize = PACKET_SIZE - HEADER_SIZE;

/// TX header flag: transmit as soon as possible.
pub const FLAG_IGNORE_TIMESTAMP: u8 = 1 << 4;

/// Sample width on the USB link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFormat {
    I12,
    I16,
}

impl LinkFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            LinkFormat::I12 => 3,
            LinkFormat::I16 => 4,
        }
    }

    pub fn samples_per_packet(&self) -> usize {
        PAYLOAD_SIZE / self.bytes_per_sample()
    }

    /// Value of the FPGA sample width field.
    pub fn fpga_width(&self) -> u16 {
        match self {
            LinkFormat::I12 => 2,
            LinkFormat::I16 => 0,
        }
    }

    /// Full scale of a sample for float conversion.
    pub fn full_scale(&self) -> f32 {
        match self {
            LinkFormat::I12 => 2048.0,
            LinkFormat::I16 => 32768.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: u8,
    pub counter: u64,
}

impl PacketHeader {
    pub fn decode(buf: &[u8]) -> PacketHeader {
        PacketHeader {
            flags: buf[0],
            counter: LittleEndian::read_u64(&buf[8..16]),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].fill(0);
        buf[0] = self.flags;
        LittleEndian::write_u64(&mut buf[8..16], self.counter);
    }
}

fn sign_extend_12(v: u16) -> i16 {
    ((v << 4) as i16) >> 4
}

/// Append the samples of `payload` to `out`.
pub fn unpack_samples(payload: &[u8], link: LinkFormat, out: &mut Vec<Complex<i16>>) {
    match link {
        LinkFormat::I16 => out.extend(
            payload
                .chunks_exact(4)
                .map(|b| Complex::new(LittleEndian::read_i16(&b[0..2]), LittleEndian::read_i16(&b[2..4]))),
        ),
        LinkFormat::I12 => out.extend(payload.chunks_exact(3).map(|b| {
            let i = b[0] as u16 | ((b[1] as u16 & 0x0F) << 8);
            let q = (b[1] as u16 >> 4) | ((b[2] as u16) << 4);
            Complex::new(sign_extend_12(i), sign_extend_12(q))
        })),
    }
}

// saturate instead of wrapping into the opposite sign
fn clamp_12(v: i16) -> u16 {
    v.clamp(-2048, 2047) as u16 & 0x0FFF
}

/// Pack `samples` into `payload`, zero-filling the remainder.
pub fn pack_samples(samples: &[Complex<i16>], link: LinkFormat, payload: &mut [u8]) {
    payload.fill(0);
    match link {
        LinkFormat::I16 => {
            for (s, b) in samples.iter().zip(payload.chunks_exact_mut(4)) {
                LittleEndian::write_i16(&mut b[0..2], s.re);
                LittleEndian::write_i16(&mut b[2..4], s.im);
            }
        }
        LinkFormat::I12 => {
            for (s, b) in samples.iter().zip(payload.chunks_exact_mut(3)) {
                let i = clamp_12(s.re);
                let q = clamp_12(s.im);
                b[0] = i as u8;
                b[1] = ((i >> 8) as u8) | ((q as u8 & 0x0F) << 4);
                b[2] = (q >> 4) as u8;
            }
        }
    }
}

/// Build one complete packet.
pub fn encode_packet(header: PacketHeader, samples: &[Complex<i16>], link: LinkFormat) -> Vec<u8> {
    let mut buf = vec![0u8; PACKET_SIZE];
    header.encode(&mut buf);
    pack_samples(samples, link, &mut buf[HEADER_SIZE..]);
    buf
}
