//! Parsers incrementales de header y entradas.
//!
//! Sólo consumen bytes del buffer cuando el frame completo (checksum incluido)
//! está disponible; si no, devuelven `Ok(None)` y dejan el buffer intacto.

use bytes::{Buf, BytesMut};
use common::proto::{RecordingHeader, Wse};
use common::wire::{self, PROTOCOL_VERSION};
use prost::Message;

use crate::error::ParseError;

#[derive(Debug, PartialEq)]
pub enum EntryFrame {
    Entry(Wse),
    EndMarker,
}

/// Lee un varint a partir de `pos`; `None` si falta algún byte.
fn varint_at(buf: &[u8], pos: usize) -> Result<Option<(u32, usize)>, ParseError> {
    Ok(wire::decode_varint32(&buf[pos..])?.map(|(v, n)| (v, pos + n)))
}

pub fn parse_header(
    buf: &mut BytesMut,
    max_header_bytes: u32,
) -> Result<Option<RecordingHeader>, ParseError> {
    let Some((version, pos)) = varint_at(buf, 0)? else {
        return Ok(None);
    };
    if version != PROTOCOL_VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }

    let Some((header_len, body_start)) = varint_at(buf, pos)? else {
        return Ok(None);
    };
    if header_len > max_header_bytes {
        return Err(ParseError::FrameTooLarge {
            frame: "recording header",
            len: header_len,
            max: max_header_bytes,
        });
    }
    let body_end = body_start + header_len as usize;
    if buf.len() < body_end {
        return Ok(None);
    }

    let Some((expected, frame_end)) = varint_at(buf, body_end)? else {
        return Ok(None);
    };
    let computed = wire::checksum(&buf[..body_end]);
    if expected != computed {
        return Err(ParseError::ChecksumMismatch {
            frame: "recording header",
            expected,
            computed,
        });
    }

    let header = RecordingHeader::decode(&buf[body_start..body_end]).map_err(|source| {
        ParseError::Decode {
            frame: "recording header",
            source,
        }
    })?;
    if header.work_assignment.is_none() {
        return Err(ParseError::MissingWorkAssignment);
    }

    buf.advance(frame_end);
    Ok(Some(header))
}

pub fn parse_entry(
    buf: &mut BytesMut,
    max_entry_bytes: u32,
) -> Result<Option<EntryFrame>, ParseError> {
    let Some((entry_len, body_start)) = varint_at(buf, 0)? else {
        return Ok(None);
    };
    if entry_len == 0 {
        buf.advance(body_start);
        return Ok(Some(EntryFrame::EndMarker));
    }
    if entry_len > max_entry_bytes {
        return Err(ParseError::FrameTooLarge {
            frame: "wse",
            len: entry_len,
            max: max_entry_bytes,
        });
    }
    let body_end = body_start + entry_len as usize;
    if buf.len() < body_end {
        return Ok(None);
    }

    let Some((expected, frame_end)) = varint_at(buf, body_end)? else {
        return Ok(None);
    };
    let computed = wire::checksum(&buf[..body_end]);
    if expected != computed {
        return Err(ParseError::ChecksumMismatch {
            frame: "wse",
            expected,
            computed,
        });
    }

    let entry = Wse::decode(&buf[body_start..body_end])
        .map_err(|source| ParseError::Decode { frame: "wse", source })?;

    buf.advance(frame_end);
    Ok(Some(EntryFrame::Entry(entry)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::proto::{IndexedData, TraceContext, WorkAssignment, WorkType};

    fn header() -> RecordingHeader {
        RecordingHeader {
            recorder_version: 1,
            controller_version: 2,
            controller_id: 3,
            work_assignment: Some(WorkAssignment {
                work_id: 42,
                ..Default::default()
            }),
            work_description: "test".to_string(),
        }
    }

    #[test]
    fn header_is_parsed_only_when_complete() {
        let mut encoded = BytesMut::new();
        wire::encode_header(&header(), &mut encoded);

        // byte a byte: nada hasta el último
        let mut buf = BytesMut::new();
        for (i, b) in encoded.iter().enumerate() {
            buf.extend_from_slice(&[*b]);
            let parsed = parse_header(&mut buf, 1024).unwrap();
            if i + 1 < encoded.len() {
                assert!(parsed.is_none());
            } else {
                assert_eq!(parsed, Some(header()));
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn header_checksum_is_verified() {
        let mut buf = BytesMut::new();
        wire::encode_header(&header(), &mut buf);
        // rompemos un byte del cuerpo
        buf[3] ^= 0xff;
        assert!(matches!(
            parse_header(&mut buf, 1024),
            Err(ParseError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buf = BytesMut::new();
        wire::encode_varint32(7, &mut buf);
        assert!(matches!(
            parse_header(&mut buf, 1024),
            Err(ParseError::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn header_without_assignment_is_rejected() {
        let mut buf = BytesMut::new();
        wire::encode_header(
            &RecordingHeader {
                work_assignment: None,
                ..header()
            },
            &mut buf,
        );
        assert!(matches!(
            parse_header(&mut buf, 1024),
            Err(ParseError::MissingWorkAssignment)
        ));
    }

    #[test]
    fn oversized_length_fails_before_the_body_arrives() {
        let mut buf = BytesMut::new();
        wire::encode_varint32(5000, &mut buf);
        assert!(matches!(
            parse_entry(&mut buf, 4096),
            Err(ParseError::FrameTooLarge { len: 5000, .. })
        ));
    }

    #[test]
    fn entries_then_end_marker() {
        let wse = Wse {
            w_type: Some(WorkType::CpuSampleWork as i32),
            indexed_data: Some(IndexedData {
                method_info: vec![],
                trace_ctx: vec![TraceContext {
                    trace_id: 1,
                    trace_name: "t".to_string(),
                    coverage_pct: 1,
                }],
            }),
            cpu_sample_entry: None,
        };
        let mut buf = BytesMut::new();
        wire::encode_wse(&wse, &mut buf);
        wire::encode_end_marker(&mut buf);

        assert_eq!(
            parse_entry(&mut buf, 1024).unwrap(),
            Some(EntryFrame::Entry(wse))
        );
        assert_eq!(parse_entry(&mut buf, 1024).unwrap(), Some(EntryFrame::EndMarker));
        assert!(buf.is_empty());
        assert_eq!(parse_entry(&mut buf, 1024).unwrap(), None);
    }

    #[test]
    fn entry_checksum_is_verified() {
        let wse = Wse {
            w_type: Some(WorkType::ThreadSampleWork as i32),
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        wire::encode_wse(&wse, &mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0x01;
        assert!(matches!(
            parse_entry(&mut buf, 1024),
            Err(ParseError::ChecksumMismatch { frame: "wse", .. })
        ));
    }
}
