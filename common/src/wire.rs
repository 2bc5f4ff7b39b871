//! Framing del stream de perfiles.
//!
//! ```text
//! varint32 version
//! varint32 header_len | RecordingHeader | varint32 adler32(version..header)
//! ( varint32 wse_len | Wse | varint32 adler32(wse_len..wse) )*
//! varint32 0            <- marcador de fin
//! ```

use bytes::{BufMut, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::proto::{RecordingHeader, Wse};

pub const PROTOCOL_VERSION: u32 = 1;

/// Un varint32 ocupa como mucho 5 bytes.
pub const MAX_VARINT32_LEN: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed varint32 at offset {offset}")]
    MalformedVarint { offset: usize },
}

/// Lee un varint32 desde el inicio de `buf`.
///
/// `Ok(None)` si faltan bytes para completarlo; en ese caso no se consumió nada.
pub fn decode_varint32(buf: &[u8]) -> Result<Option<(u32, usize)>, WireError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().take(MAX_VARINT32_LEN).enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            if value > u32::MAX as u64 {
                return Err(WireError::MalformedVarint { offset: i });
            }
            return Ok(Some((value as u32, i + 1)));
        }
    }
    if buf.len() >= MAX_VARINT32_LEN {
        return Err(WireError::MalformedVarint {
            offset: MAX_VARINT32_LEN - 1,
        });
    }
    Ok(None)
}

pub fn encode_varint32(value: u32, buf: &mut impl BufMut) {
    prost::encoding::encode_varint(value as u64, buf);
}

pub fn checksum(bytes: &[u8]) -> u32 {
    adler::adler32_slice(bytes)
}

/// Escribe versión + header + checksum.
pub fn encode_header(header: &RecordingHeader, out: &mut BytesMut) {
    let mut frame = BytesMut::new();
    encode_varint32(PROTOCOL_VERSION, &mut frame);
    encode_varint32(header.encoded_len() as u32, &mut frame);
    frame.extend_from_slice(&header.encode_to_vec());
    let sum = checksum(&frame);
    out.extend_from_slice(&frame);
    encode_varint32(sum, out);
}

/// Escribe una entrada con su checksum.
pub fn encode_wse(wse: &Wse, out: &mut BytesMut) {
    let mut frame = BytesMut::new();
    encode_varint32(wse.encoded_len() as u32, &mut frame);
    frame.extend_from_slice(&wse.encode_to_vec());
    let sum = checksum(&frame);
    out.extend_from_slice(&frame);
    encode_varint32(sum, out);
}

pub fn encode_end_marker(out: &mut BytesMut) {
    encode_varint32(0, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_needs_all_bytes() {
        let mut buf = BytesMut::new();
        encode_varint32(300, &mut buf);
        assert_eq!(buf.len(), 2);

        assert_eq!(decode_varint32(&buf[..1]), Ok(None));
        assert_eq!(decode_varint32(&buf), Ok(Some((300, 2))));
    }

    #[test]
    fn varint_longer_than_five_bytes_is_rejected() {
        let raw = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert!(decode_varint32(&raw).is_err());
    }

    #[test]
    fn varint_overflowing_u32_is_rejected() {
        // 5 bytes pero con bits por encima de 2^32
        let raw = [0xff, 0xff, 0xff, 0xff, 0x7f];
        assert!(decode_varint32(&raw).is_err());
    }

    #[test]
    fn empty_cpu_entry_has_a_non_zero_length() {
        use crate::proto::WorkType;

        let mut buf = BytesMut::new();
        encode_wse(&Wse::of_type(WorkType::CpuSampleWork), &mut buf);
        assert_ne!(buf[0], 0);
        assert_eq!(decode_varint32(&buf), Ok(Some((2, 1))));
    }

    #[test]
    fn end_marker_is_a_single_zero_byte() {
        let mut buf = BytesMut::new();
        encode_end_marker(&mut buf);
        assert_eq!(&buf[..], &[0u8]);
    }
}
