//! Bounds-checked little-endian reader over a message body.

use bytes::Buf;

use crate::error::ProtoError;

pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
    body_len: usize,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(body: &'a [u8]) -> Self {
        Self {
            buf: body,
            body_len: body.len(),
        }
    }

    /// Fail unless the body is exactly `len` bytes long.
    pub(crate) fn exact(body: &'a [u8], len: usize) -> Result<Self, ProtoError> {
        if body.len() != len {
            return Err(ProtoError::LengthMismatch {
                declared: len,
                actual: body.len(),
            });
        }
        Ok(Self::new(body))
    }

    fn need(&self, n: usize) -> Result<(), ProtoError> {
        if self.buf.remaining() < n {
            return Err(ProtoError::TooShort);
        }
        Ok(())
    }

    pub(crate) fn u32(&mut self) -> Result<u32, ProtoError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn i32(&mut self) -> Result<i32, ProtoError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtoError> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Read a record count and check that `count * record_len` bytes remain,
    /// exactly, before any record is touched.
    pub(crate) fn count(&mut self, record_len: usize) -> Result<usize, ProtoError> {
        let count = self.u32()?;
        let needed = (count as usize)
            .checked_mul(record_len)
            .ok_or(ProtoError::CountOverrun {
                count,
                body_len: self.body_len,
            })?;
        let remaining = self.buf.remaining();
        if needed > remaining {
            return Err(ProtoError::CountOverrun {
                count,
                body_len: self.body_len,
            });
        }
        if needed < remaining {
            return Err(ProtoError::LengthMismatch {
                declared: self.body_len - remaining + needed,
                actual: self.body_len,
            });
        }
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::BodyReader;
    use crate::error::ProtoError;

    #[test]
    fn count_rejects_overrun_before_reading_records() {
        let mut body = 3u32.to_le_bytes().to_vec();
        body.extend_from_slice(&[0u8; 8]);
        let mut r = BodyReader::new(&body);
        assert_eq!(
            r.count(4),
            Err(ProtoError::CountOverrun {
                count: 3,
                body_len: 12
            })
        );
    }

    #[test]
    fn count_rejects_trailing_bytes() {
        let mut body = 1u32.to_le_bytes().to_vec();
        body.extend_from_slice(&[0u8; 6]);
        let mut r = BodyReader::new(&body);
        assert!(matches!(
            r.count(4),
            Err(ProtoError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn huge_count_does_not_overflow() {
        let body = u32::MAX.to_le_bytes();
        let mut r = BodyReader::new(&body);
        assert!(matches!(r.count(52), Err(ProtoError::CountOverrun { .. })));
    }
}
