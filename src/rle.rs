//! Expansion of the run length encoded base payload.
//!
//! The build tool ships the base as the header prefix (copied verbatim)
//! followed by an RLE stream over the font bytes: a leading `u32` with the
//! expanded size, then a sequence of operations. Each operation starts with an
//! op byte whose high bits select the action (`0xC0` copy literal bytes,
//! `0xC8` replicate a fill byte) and whose low three bits give the width of
//! the following count field (1, 2 or 4 bytes). Offsets in the header prefix
//! refer to the *expanded* font, so the expansion must be reproduced exactly.

use read_fonts::FontData;

use crate::error::FontError;

const OP_MASK: u8 = 0xF8;
const SIZE_MASK: u8 = 0x07;
const OP_COPY: u8 = 0xC0;
const OP_FILL: u8 = 0xC8;

const TRUNCATED: FontError = FontError::CorruptRle("stream truncated");

struct Reader<'a> {
    data: FontData<'a>,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, FontError> {
        let b = self.data.read_at::<u8>(self.pos).map_err(|_| TRUNCATED)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, FontError> {
        let v = self.data.read_at::<u16>(self.pos).map_err(|_| TRUNCATED)?;
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32, FontError> {
        let v = self.data.read_at::<u32>(self.pos).map_err(|_| TRUNCATED)?;
        self.pos += 4;
        Ok(v)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FontError> {
        let end = self.pos.checked_add(len).ok_or(TRUNCATED)?;
        let bytes = self
            .data
            .slice(self.pos..end)
            .ok_or(TRUNCATED)?
            .as_bytes();
        self.pos = end;
        Ok(bytes)
    }

    fn count(&mut self, size_code: u8) -> Result<usize, FontError> {
        Ok(match size_code {
            1 => self.u8()? as usize,
            2 => self.u16()? as usize,
            3 => self.u32()? as usize,
            _ => return Err(FontError::CorruptRle("bad operand size code")),
        })
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Expand an RLE encoded base payload.
///
/// `data` is the full server response: `header_size` bytes of prefix followed
/// by the RLE stream. The result is the prefix copied verbatim plus the
/// expanded font bytes; the stream must produce exactly the size it declares
/// and consume its input exactly.
pub fn expand_base(header_size: usize, data: &[u8]) -> Result<Vec<u8>, FontError> {
    let stream = data
        .get(header_size..)
        .ok_or(FontError::CorruptRle("payload shorter than header prefix"))?;
    let mut reader = Reader {
        data: FontData::new(stream),
        pos: 0,
    };

    let total_size = reader.u32()? as usize;
    let mut out = Vec::with_capacity(header_size + total_size);
    out.extend_from_slice(&data[..header_size]);

    while out.len() - header_size < total_size {
        let op = reader.u8()?;
        let count = reader.count(op & SIZE_MASK)?;
        if out.len() - header_size + count > total_size {
            return Err(FontError::CorruptRle("operation overruns declared size"));
        }
        match op & OP_MASK {
            OP_COPY => out.extend_from_slice(reader.take(count)?),
            OP_FILL => {
                let value = reader.u8()?;
                out.resize(out.len() + count, value);
            }
            _ => return Err(FontError::CorruptRle("unknown opcode")),
        }
    }

    if !reader.at_end() {
        return Err(FontError::CorruptRle("trailing bytes after expansion"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(prefix: &[u8], total: u32, ops: &[u8]) -> Vec<u8> {
        let mut data = prefix.to_vec();
        data.extend_from_slice(&total.to_be_bytes());
        data.extend_from_slice(ops);
        data
    }

    #[test]
    fn copy_and_fill() {
        // copy 3 literal bytes, then fill 4 bytes of 0xAA
        let data = payload(b"HD", 7, &[OP_COPY | 1, 3, 1, 2, 3, OP_FILL | 1, 4, 0xAA]);
        let out = expand_base(2, &data).unwrap();
        assert_eq!(out, [b'H', b'D', 1, 2, 3, 0xAA, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn wide_count_fields() {
        let mut ops = vec![OP_FILL | 2];
        ops.extend_from_slice(&300u16.to_be_bytes());
        ops.push(0);
        ops.push(OP_COPY | 3);
        ops.extend_from_slice(&2u32.to_be_bytes());
        ops.extend_from_slice(&[7, 8]);
        let data = payload(&[], 302, &ops);
        let out = expand_base(0, &data).unwrap();
        assert_eq!(out.len(), 302);
        assert_eq!(&out[300..], &[7, 8]);
        assert!(out[..300].iter().all(|&b| b == 0));
    }

    #[test]
    fn prefix_is_copied_verbatim() {
        let data = payload(&[9, 8, 7], 1, &[OP_COPY | 1, 1, 0x55]);
        let out = expand_base(3, &data).unwrap();
        assert_eq!(out, [9, 8, 7, 0x55]);
    }

    #[test]
    fn unknown_opcode() {
        let data = payload(&[], 1, &[0xF0 | 1, 1, 0]);
        assert!(matches!(
            expand_base(0, &data),
            Err(FontError::CorruptRle("unknown opcode"))
        ));
    }

    #[test]
    fn bad_size_code() {
        let data = payload(&[], 1, &[OP_COPY | 7, 1, 0]);
        assert!(matches!(
            expand_base(0, &data),
            Err(FontError::CorruptRle("bad operand size code"))
        ));
    }

    #[test]
    fn overrun_is_rejected() {
        let data = payload(&[], 2, &[OP_FILL | 1, 5, 0]);
        assert!(matches!(
            expand_base(0, &data),
            Err(FontError::CorruptRle("operation overruns declared size"))
        ));
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let data = payload(&[], 4, &[OP_COPY | 1, 4, 1]);
        assert!(matches!(
            expand_base(0, &data),
            Err(FontError::CorruptRle("stream truncated"))
        ));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let data = payload(&[], 1, &[OP_COPY | 1, 1, 0, 0xEE]);
        assert!(matches!(
            expand_base(0, &data),
            Err(FontError::CorruptRle("trailing bytes after expansion"))
        ));
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(matches!(
            expand_base(8, &[0, 1]),
            Err(FontError::CorruptRle(_))
        ));
    }
}
