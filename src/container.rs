//! Object payload container with optional typed-embedded frames.
//!
//! When a caller opts into embedding, the payload travels as a sequence of
//! self-describing TLV frames; otherwise the bytes are the object body
//! verbatim. Frame header on wire: `size: u64 BE, type: u32 BE, flags: u32 BE`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProxyError, Result};

const FRAME_HEADER_BYTES: usize = 16;
const TIMESTAMP_BODY_BYTES: usize = 16;

const FRAME_DATA: u32 = 1;
const FRAME_TIMESTAMP: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    pub sec: u64,
    pub nsec: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataContainer {
    pub data: Bytes,
    pub timestamp: Option<Timespec>,
}

impl DataContainer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(data: impl Into<Bytes>, timestamp: Timespec) -> Self {
        Self {
            data: data.into(),
            timestamp: Some(timestamp),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialize for the wire. Without embedded fields the body is emitted
    /// verbatim; with them, frames are prepended in fixed order (timestamp,
    /// then the data frame holding the payload).
    pub fn pack(&self) -> Bytes {
        let Some(timestamp) = self.timestamp else {
            return self.data.clone();
        };

        let mut buf = BytesMut::with_capacity(
            2 * FRAME_HEADER_BYTES + TIMESTAMP_BODY_BYTES + self.data.len(),
        );

        buf.put_u64(TIMESTAMP_BODY_BYTES as u64);
        buf.put_u32(FRAME_TIMESTAMP);
        buf.put_u32(0);
        buf.put_u64(timestamp.sec);
        buf.put_u64(timestamp.nsec);

        buf.put_u64(self.data.len() as u64);
        buf.put_u32(FRAME_DATA);
        buf.put_u32(0);
        buf.put_slice(&self.data);

        buf.freeze()
    }

    /// Decode wire bytes. With `embedded` unset the bytes are taken as the
    /// body verbatim. With it set, frames are scanned until the input is
    /// exhausted; unknown frame types are skipped.
    pub fn unpack(raw: Bytes, embedded: bool) -> Result<Self> {
        if !embedded {
            return Ok(Self {
                data: raw,
                timestamp: None,
            });
        }

        let mut buf = raw;
        let mut data = None;
        let mut timestamp = None;

        while buf.has_remaining() {
            if buf.remaining() < FRAME_HEADER_BYTES {
                return Err(ProxyError::Corrupt(format!(
                    "truncated frame header: {} bytes left",
                    buf.remaining()
                )));
            }

            let size = buf.get_u64();
            let frame_type = buf.get_u32();
            let _flags = buf.get_u32();

            if size > buf.remaining() as u64 {
                return Err(ProxyError::Corrupt(format!(
                    "frame of type {} declares {} bytes but only {} remain",
                    frame_type,
                    size,
                    buf.remaining()
                )));
            }

            let mut body = buf.copy_to_bytes(size as usize);
            match frame_type {
                FRAME_TIMESTAMP => {
                    if body.len() < TIMESTAMP_BODY_BYTES {
                        return Err(ProxyError::Corrupt(format!(
                            "timestamp frame too short: {} bytes",
                            body.len()
                        )));
                    }
                    timestamp = Some(Timespec {
                        sec: body.get_u64(),
                        nsec: body.get_u64(),
                    });
                }
                FRAME_DATA => {
                    data = Some(body);
                }
                _ => {}
            }
        }

        Ok(Self {
            data: data.unwrap_or_default(),
            timestamp,
        })
    }
}
