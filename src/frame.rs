//! ESP3 frame scanning and serialisation (§4.2, §6.1).
//!
//! [`FrameScanner`] owns a rolling byte buffer and implements the
//! `WAIT_SYNC -> READ_HEADER -> READ_BODY -> EMIT_PACKET` state machine:
//! each call to [`FrameScanner::try_parse`] either returns a complete,
//! CRC-checked [`Frame`], reports that more bytes are needed, or silently
//! resynchronises past a bad sync byte / bad header CRC, bumping the error
//! counter.

use crate::crc::{crc8, Crc8Builder};
use crate::error::FrameError;

const SYNC_BYTE: u8 = 0x55;
const HEADER_LEN: usize = 6; // sync + 2 (data_len) + 1 (opt_len) + 1 (type) + 1 (crc8h)

/// A CRC-checked ESP3 frame: the packet type byte plus its data and
/// optional-data regions. Classification into a [`crate::packet::Packet`]
/// happens one layer up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub packet_type: u8,
    pub data: Vec<u8>,
    pub optional: Vec<u8>,
}

impl Frame {
    pub fn new(packet_type: u8, data: Vec<u8>, optional: Vec<u8>) -> Self {
        Self { packet_type, data, optional }
    }

    /// Serialises to the wire form: `SYNC | len_hi | len_lo | opt_len | type | crc8h | data | optional | crc8d`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let data_len = self.data.len() as u16;
        let opt_len = self.optional.len() as u8;

        let mut header = [
            SYNC_BYTE,
            (data_len >> 8) as u8,
            (data_len & 0xff) as u8,
            opt_len,
            self.packet_type,
            0,
        ];
        header[5] = crc8(&header[1..5]);

        let data_crc = Crc8Builder::from(&self.data[..]).extend(&self.optional).finish();

        let mut out = Vec::with_capacity(header.len() + self.data.len() + self.optional.len() + 1);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.optional);
        out.push(data_crc);
        out
    }
}

/// Owns the controller's rolling input buffer and implements the frame
/// scan/resync state machine. Bytes arrive via [`FrameScanner::feed`];
/// [`FrameScanner::try_parse`] drains at most one frame per call so the
/// caller can interleave other work (transmit-queue drains, stop-flag
/// checks) between frames.
#[derive(Debug, Default)]
pub struct FrameScanner {
    buf: Vec<u8>,
    crc_errors: u64,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self { buf: Vec::new(), crc_errors: 0 }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    /// Attempts to parse a single frame out of the buffer.
    ///
    /// Returns `Ok(None)` (not an error) when the buffer holds an
    /// incomplete frame, so the caller should wait for more bytes.
    /// A header or body CRC mismatch silently drops bytes and resyncs;
    /// the scanner's internal error counter is incremented and the next
    /// call continues the scan - it is not an `Err` to the caller for
    /// the common case of a single corrupted header, only the `Err` case
    /// of a fundamentally malformed tail (see `try_parse` loop below).
    pub fn try_parse(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            let sync = match self.buf.iter().position(|&b| b == SYNC_BYTE) {
                Some(i) => i,
                None => {
                    self.buf.clear();
                    return Ok(None);
                }
            };
            if sync > 0 {
                self.buf.drain(0..sync);
            }

            if self.buf.len() < HEADER_LEN {
                return Ok(None);
            }

            let header_crc = crc8(&self.buf[1..5]);
            if header_crc != self.buf[5] {
                self.crc_errors += 1;
                // Drop just the sync byte and look for the next one.
                self.buf.drain(0..1);
                continue;
            }

            let data_len = ((self.buf[1] as usize) << 8) | self.buf[2] as usize;
            let opt_len = self.buf[3] as usize;
            let packet_type = self.buf[4];
            let total_len = HEADER_LEN + data_len + opt_len + 1;

            if self.buf.len() < total_len {
                return Ok(None);
            }

            let body = &self.buf[HEADER_LEN..HEADER_LEN + data_len + opt_len];
            let body_crc = crc8(body);
            let data_crc_byte = self.buf[total_len - 1];
            if body_crc != data_crc_byte {
                self.crc_errors += 1;
                self.buf.drain(0..HEADER_LEN); // drop header, keep scanning body for another sync
                continue;
            }

            let data = self.buf[HEADER_LEN..HEADER_LEN + data_len].to_vec();
            let optional = self.buf[HEADER_LEN + data_len..HEADER_LEN + data_len + opt_len].to_vec();
            self.buf.drain(0..total_len);

            return Ok(Some(Frame::new(packet_type, data, optional)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(packet_type: u8, data: &[u8], optional: &[u8]) -> Vec<u8> {
        Frame::new(packet_type, data.to_vec(), optional.to_vec()).to_bytes()
    }

    #[test]
    fn empty_buffer_is_incomplete() {
        let mut scanner = FrameScanner::new();
        assert!(scanner.try_parse().unwrap().is_none());
    }

    #[test]
    fn lone_sync_byte_is_incomplete() {
        let mut scanner = FrameScanner::new();
        scanner.feed(&[0x55]);
        assert!(scanner.try_parse().unwrap().is_none());
    }

    #[test]
    fn zero_length_generic_frame_parses() {
        let bytes = assemble(0x04, &[], &[]);
        let mut scanner = FrameScanner::new();
        scanner.feed(&bytes);
        let frame = scanner.try_parse().unwrap().unwrap();
        assert_eq!(frame.packet_type, 0x04);
        assert!(frame.data.is_empty());
        assert!(frame.optional.is_empty());
    }

    #[test]
    fn two_concatenated_frames_parse_in_order() {
        let a = assemble(0x01, &[0xAA, 0xBB], &[]);
        let b = assemble(0x02, &[0x00], &[]);
        let mut scanner = FrameScanner::new();
        scanner.feed(&a);
        scanner.feed(&b);

        let first = scanner.try_parse().unwrap().unwrap();
        assert_eq!(first.data, vec![0xAA, 0xBB]);
        let second = scanner.try_parse().unwrap().unwrap();
        assert_eq!(second.data, vec![0x00]);
        assert!(scanner.try_parse().unwrap().is_none());
    }

    #[test]
    fn header_crc_mismatch_resyncs_to_next_valid_frame() {
        let mut garbage = vec![0x55, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let good = assemble(0x01, &[0xA5, 0x00], &[]);
        garbage.extend_from_slice(&good);

        let mut scanner = FrameScanner::new();
        scanner.feed(&garbage);
        let frame = scanner.try_parse().unwrap().unwrap();
        assert_eq!(frame.data, vec![0xA5, 0x00]);
        assert_eq!(scanner.crc_errors(), 1);
    }

    #[test]
    fn incomplete_frame_remembers_sync_and_waits() {
        let full = assemble(0x01, &[0xA5, 0x00, 0x00, 0x00], &[0x03, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
        let mut scanner = FrameScanner::new();
        scanner.feed(&full[..full.len() - 3]);
        assert!(scanner.try_parse().unwrap().is_none());
        scanner.feed(&full[full.len() - 3..]);
        let frame = scanner.try_parse().unwrap().unwrap();
        assert_eq!(frame.packet_type, 0x01);
    }

    #[test]
    fn known_a50401_message_parses() {
        let received = [
            85u8, 0, 10, 7, 1, 235, 165, 0, 229, 204, 10, 5, 17, 114, 247, 0, 1, 255, 255, 255,
            255, 54, 0, 213,
        ];
        let mut scanner = FrameScanner::new();
        scanner.feed(&received);
        let frame = scanner.try_parse().unwrap().unwrap();
        assert_eq!(frame.packet_type, 0x01);
        assert_eq!(frame.data.len(), 10);
        assert_eq!(frame.optional.len(), 7);
    }

    #[test]
    fn round_trip_through_to_bytes_and_back() {
        let frame = Frame::new(0x05, vec![0x08], vec![]);
        let bytes = frame.to_bytes();
        let mut scanner = FrameScanner::new();
        scanner.feed(&bytes);
        let parsed = scanner.try_parse().unwrap().unwrap();
        assert_eq!(parsed, frame);
    }
}
