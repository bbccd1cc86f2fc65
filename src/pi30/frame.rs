use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::command::Command;
use crate::error::ProtocolError;

pub const START: u8 = b'(';
pub const TERMINATOR: u8 = b'\r';
pub const LINE_FEED: u8 = b'\n';

// CRC-16/XMODEM (poly 0x1021), one entry per nibble
const CRC_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a,
    0xb16b, 0xc18c, 0xd1ad, 0xe1ce, 0xf1ef,
];

/// Raw CRC of `data`, before any escaping. Seed is zero, so the CRC of an
/// empty slice is 0.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;

    for &byte in data {
        let index = ((crc >> 12) as u8 ^ (byte >> 4)) as usize;
        crc = (crc << 4) ^ CRC_TABLE[index];

        let index = ((crc >> 12) as u8 ^ (byte & 0x0f)) as usize;
        crc = (crc << 4) ^ CRC_TABLE[index];
    }

    crc
}

fn escape(byte: u8) -> u8 {
    match byte {
        START | TERMINATOR | LINE_FEED => byte + 1,
        _ => byte,
    }
}

/// The two checksum bytes as they appear on the wire, high byte first.
/// Each byte is bumped by one if it would collide with a delimiter.
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let crc = crc16(data);
    [escape((crc >> 8) as u8), escape((crc & 0xff) as u8)]
}

/// Full outgoing frame: command, checksum, CR.
pub fn encode(command: &Command) -> Vec<u8> {
    let bytes = command.as_bytes();

    let mut frame = Vec::with_capacity(bytes.len() + 3);
    frame.extend_from_slice(bytes);
    frame.extend_from_slice(&checksum(bytes));
    frame.push(TERMINATOR);

    frame
}

/// Check a complete received frame. The checksum covers everything before
/// the two checksum bytes, including the leading `(`.
pub fn verify(frame: &[u8]) -> Result<(), ProtocolError> {
    let len = frame.len();
    if len < 4 {
        return Err(ProtocolError::ShortFrame(len));
    }

    let expected = checksum(&frame[..len - 3]);
    let received = [frame[len - 3], frame[len - 2]];

    if expected != received {
        return Err(ProtocolError::Framing {
            received: u16::from_be_bytes(received),
            calculated: u16::from_be_bytes(expected),
        });
    }

    Ok(())
}

/// Text between the start marker and the checksum.
pub fn payload(frame: &[u8]) -> Result<String, ProtocolError> {
    let len = frame.len();
    if len < 4 {
        return Err(ProtocolError::ShortFrame(len));
    }

    Ok(String::from_utf8_lossy(&frame[1..len - 3]).into_owned())
}

pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits the inbound byte stream into frames running from `(` to CR
/// inclusive. Anything before a start marker is noise and is dropped.
///
/// A frame that grows past `max_len` without a terminator is thrown away
/// and reported once as `Oversize`; the decoder then goes back to hunting
/// for a start marker.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_len: usize,
}

impl FrameDecoder {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Decoder for FrameDecoder {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|&b| b == START) {
            Some(0) => {}
            Some(skip) => src.advance(skip),
            None => {
                src.clear();
                return Ok(None);
            }
        }

        if let Some(end) = src[1..].iter().position(|&b| b == TERMINATOR) {
            let frame = src.split_to(end + 2);
            if frame.len() > self.max_len {
                return Err(ProtocolError::Oversize {
                    limit: self.max_len,
                });
            }
            return Ok(Some(frame));
        }

        if src.len() > self.max_len {
            src.clear();
            return Err(ProtocolError::Oversize {
                limit: self.max_len,
            });
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(payload: &str) -> Vec<u8> {
        let mut frame = vec![START];
        frame.extend_from_slice(payload.as_bytes());
        let crc = checksum(&frame);
        frame.extend_from_slice(&crc);
        frame.push(TERMINATOR);
        frame
    }

    #[test]
    fn empty_input_has_zero_crc() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn known_command_frames() {
        assert_eq!(
            encode(&Command::new("QPIGS")),
            vec![b'Q', b'P', b'I', b'G', b'S', 0xb7, 0xa9, b'\r']
        );
        assert_eq!(
            encode(&Command::new("QMOD")),
            vec![b'Q', b'M', b'O', b'D', 0x49, 0xc1, b'\r']
        );
    }

    #[test]
    fn escaped_bytes_never_collide_with_delimiters() {
        // find inputs whose raw crc has a delimiter byte and check it was bumped
        let mut seen = 0;
        for n in 0u32..20000 {
            let data = format!("Q{}", n);
            let raw = crc16(data.as_bytes());
            let [hi, lo] = checksum(data.as_bytes());

            for (raw, escaped) in [((raw >> 8) as u8, hi), ((raw & 0xff) as u8, lo)] {
                if [START, TERMINATOR, LINE_FEED].contains(&raw) {
                    assert_eq!(escaped, raw + 1);
                    seen += 1;
                } else {
                    assert_eq!(escaped, raw);
                }
            }
        }
        assert!(seen > 0);
    }

    #[test]
    fn verify_accepts_valid_and_rejects_corrupt() {
        let frame = reply("230.0 50.0");
        assert!(verify(&frame).is_ok());
        assert_eq!(payload(&frame).unwrap(), "230.0 50.0");

        let mut corrupt = frame.clone();
        let at = corrupt.len() - 2;
        corrupt[at] ^= 0x40;
        assert!(matches!(
            verify(&corrupt),
            Err(ProtocolError::Framing { .. })
        ));

        assert!(matches!(verify(b"(\r"), Err(ProtocolError::ShortFrame(2))));
    }

    #[test]
    fn decoder_skips_noise_and_splits_frames() {
        let mut decoder = FrameDecoder::new(512);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"\x00garbage");
        buf.extend_from_slice(&reply("ACK"));
        buf.extend_from_slice(&reply("B"));

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload(&first).unwrap(), "ACK");
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload(&second).unwrap(), "B");
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn decoder_waits_for_terminator() {
        let mut decoder = FrameDecoder::new(512);
        let frame = reply("NAK");
        let mut buf = BytesMut::from(&frame[..3]);

        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[3..]);
        assert_eq!(&decoder.decode(&mut buf).unwrap().unwrap()[..], &frame[..]);
    }

    #[test]
    fn decoder_discards_oversize_frames() {
        let mut decoder = FrameDecoder::new(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"(0123456789012345678");

        assert!(matches!(
            decoder.decode(&mut buf),
            Err(ProtocolError::Oversize { limit: 16 })
        ));
        assert!(buf.is_empty());

        buf.extend_from_slice(b"tail\r");
        buf.extend_from_slice(&reply("ACK"));
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(payload(&frame).unwrap(), "ACK");
    }
}
