//! Random access reader/writer over a mutable font buffer.
//!
//! All of the table surgery in this crate goes through [`FontEditor`]: a
//! bounds checked big-endian cursor plus the two OpenType aware helpers the
//! patching code needs (loca / CharStrings INDEX entry access and hmtx/vmtx
//! side bearing writes).
//!
//! The editor carries a *base offset*. Offsets recorded in the header prefix
//! are relative to the start of the font proper (the bytes following the
//! prefix), so an editor constructed with `base = header_size` lets callers
//! use those offsets directly.

use font_types::{FixedSize, Scalar};

use crate::error::FontError;

const OUT_OF_BOUNDS: FontError = FontError::CorruptFont("access out of bounds");

/// A stateful cursor over a mutable byte buffer.
pub struct FontEditor<'a> {
    data: &'a mut [u8],
    base: usize,
    pos: usize,
}

impl<'a> FontEditor<'a> {
    /// Wrap `data`, with all positions interpreted relative to `base`.
    pub fn new(data: &'a mut [u8], base: usize) -> Self {
        FontEditor { data, base, pos: 0 }
    }

    /// Move the cursor to `pos` (relative to the base offset).
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Advance the cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    /// The current cursor position (relative to the base offset).
    pub fn tell(&self) -> usize {
        self.pos
    }

    fn read_at<T: Scalar>(&self, pos: usize) -> Result<T, FontError> {
        let abs = self.base.checked_add(pos).ok_or(OUT_OF_BOUNDS)?;
        self.data
            .get(abs..abs.checked_add(T::RAW_BYTE_LEN).ok_or(OUT_OF_BOUNDS)?)
            .and_then(T::read)
            .ok_or(OUT_OF_BOUNDS)
    }

    fn write_bytes_at(&mut self, pos: usize, bytes: &[u8]) -> Result<(), FontError> {
        let abs = self.base.checked_add(pos).ok_or(OUT_OF_BOUNDS)?;
        self.data
            .get_mut(abs..abs.checked_add(bytes.len()).ok_or(OUT_OF_BOUNDS)?)
            .ok_or(OUT_OF_BOUNDS)?
            .copy_from_slice(bytes);
        Ok(())
    }

    fn take<T: Scalar>(&mut self) -> Result<T, FontError> {
        let value = self.read_at::<T>(self.pos)?;
        self.pos += T::RAW_BYTE_LEN;
        Ok(value)
    }

    pub fn get_u8(&mut self) -> Result<u8, FontError> {
        self.take::<u8>()
    }

    pub fn get_i8(&mut self) -> Result<i8, FontError> {
        self.take::<i8>()
    }

    pub fn get_u16(&mut self) -> Result<u16, FontError> {
        self.take::<u16>()
    }

    pub fn get_i16(&mut self) -> Result<i16, FontError> {
        self.take::<i16>()
    }

    pub fn get_u32(&mut self) -> Result<u32, FontError> {
        self.take::<u32>()
    }

    pub fn get_i32(&mut self) -> Result<i32, FontError> {
        self.take::<i32>()
    }

    pub fn set_u8(&mut self, value: u8) -> Result<(), FontError> {
        let raw: [u8; 1] = value.to_raw();
        self.write_bytes_at(self.pos, &raw)?;
        self.pos += raw.len();
        Ok(())
    }

    pub fn set_i8(&mut self, value: i8) -> Result<(), FontError> {
        let raw: [u8; 1] = value.to_raw();
        self.write_bytes_at(self.pos, &raw)?;
        self.pos += raw.len();
        Ok(())
    }

    pub fn set_u16(&mut self, value: u16) -> Result<(), FontError> {
        let raw: [u8; 2] = value.to_raw();
        self.write_bytes_at(self.pos, &raw)?;
        self.pos += raw.len();
        Ok(())
    }

    pub fn set_i16(&mut self, value: i16) -> Result<(), FontError> {
        let raw: [u8; 2] = value.to_raw();
        self.write_bytes_at(self.pos, &raw)?;
        self.pos += raw.len();
        Ok(())
    }

    pub fn set_u32(&mut self, value: u32) -> Result<(), FontError> {
        let raw: [u8; 4] = value.to_raw();
        self.write_bytes_at(self.pos, &raw)?;
        self.pos += raw.len();
        Ok(())
    }

    pub fn set_i32(&mut self, value: i32) -> Result<(), FontError> {
        let raw: [u8; 4] = value.to_raw();
        self.write_bytes_at(self.pos, &raw)?;
        self.pos += raw.len();
        Ok(())
    }

    /// Copy `out.len()` bytes from the cursor into `out`, advancing past them.
    pub fn get_bytes(&mut self, out: &mut [u8]) -> Result<(), FontError> {
        let abs = self.base.checked_add(self.pos).ok_or(OUT_OF_BOUNDS)?;
        let src = self
            .data
            .get(abs..abs.checked_add(out.len()).ok_or(OUT_OF_BOUNDS)?)
            .ok_or(OUT_OF_BOUNDS)?;
        out.copy_from_slice(src);
        self.pos += out.len();
        Ok(())
    }

    /// Write `bytes` at the cursor, advancing past them.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> Result<(), FontError> {
        self.write_bytes_at(self.pos, bytes)?;
        self.pos += bytes.len();
        Ok(())
    }

    /// Read the stored loca / CharStrings INDEX entry for `glyph_id`.
    ///
    /// `offset_size` selects 16 bit (2) or 32 bit (4) entries; the value is
    /// returned exactly as stored. Short loca entries hold the byte offset
    /// divided by two; converting is the caller's business.
    pub fn glyph_data_offset(
        &self,
        table_offset: u32,
        offset_size: u8,
        glyph_id: usize,
    ) -> Result<u32, FontError> {
        let table_offset = table_offset as usize;
        match offset_size {
            2 => Ok(self.read_at::<u16>(table_offset + glyph_id * 2)? as u32),
            4 => self.read_at::<u32>(table_offset + glyph_id * 4),
            _ => Err(FontError::CorruptFont("unsupported glyph offset size")),
        }
    }

    /// Store a loca / CharStrings INDEX entry for `glyph_id`.
    ///
    /// The value is written exactly as given; see [`Self::glyph_data_offset`].
    pub fn set_glyph_data_offset(
        &mut self,
        table_offset: u32,
        offset_size: u8,
        glyph_id: usize,
        value: u32,
    ) -> Result<(), FontError> {
        let table_offset = table_offset as usize;
        match offset_size {
            2 => {
                let value = u16::try_from(value)
                    .map_err(|_| FontError::CorruptFont("glyph offset overflows short entry"))?;
                let raw: [u8; 2] = value.to_raw();
                self.write_bytes_at(table_offset + glyph_id * 2, &raw)
            }
            4 => {
                let raw: [u8; 4] = value.to_raw();
                self.write_bytes_at(table_offset + glyph_id * 4, &raw)
            }
            _ => Err(FontError::CorruptFont("unsupported glyph offset size")),
        }
    }

    /// Write the hmtx/vmtx side bearing for `glyph_id`.
    ///
    /// Glyphs below `long_metric_count` occupy a long record (advance + side
    /// bearing); the rest share the trailing run of bare side bearings.
    pub fn set_mtx_side_bearing(
        &mut self,
        table_offset: u32,
        long_metric_count: u16,
        glyph_id: u16,
        value: i16,
    ) -> Result<(), FontError> {
        let table_offset = table_offset as usize;
        let pos = if glyph_id < long_metric_count {
            table_offset + glyph_id as usize * 4 + 2
        } else {
            table_offset
                + long_metric_count as usize * 4
                + (glyph_id - long_metric_count) as usize * 2
        };
        let raw: [u8; 2] = value.to_raw();
        self.write_bytes_at(pos, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trip() {
        let mut buf = vec![0u8; 16];
        let mut ed = FontEditor::new(&mut buf, 0);
        ed.set_u16(0xABCD).unwrap();
        ed.set_u32(0x01020304).unwrap();
        ed.set_i16(-2).unwrap();
        assert_eq!(ed.tell(), 8);

        ed.seek(0);
        assert_eq!(ed.get_u16().unwrap(), 0xABCD);
        assert_eq!(ed.get_u32().unwrap(), 0x01020304);
        assert_eq!(ed.get_i16().unwrap(), -2);
    }

    #[test]
    fn base_offset_applies_to_every_access() {
        let mut buf = vec![0u8; 8];
        let mut ed = FontEditor::new(&mut buf, 4);
        ed.seek(0);
        ed.set_u32(0xDEADBEEF).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
        assert_eq!(&buf[4..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn out_of_bounds_is_corrupt_font() {
        let mut buf = vec![0u8; 2];
        let mut ed = FontEditor::new(&mut buf, 0);
        ed.seek(1);
        assert!(matches!(ed.get_u16(), Err(FontError::CorruptFont(_))));
        ed.seek(1);
        assert!(matches!(ed.set_u32(1), Err(FontError::CorruptFont(_))));
    }

    #[test]
    fn short_loca_entries() {
        let mut buf = vec![0u8; 8];
        {
            let mut ed = FontEditor::new(&mut buf, 0);
            ed.set_glyph_data_offset(0, 2, 1, 0x1234).unwrap();
            assert_eq!(ed.glyph_data_offset(0, 2, 1).unwrap(), 0x1234);
            assert_eq!(ed.glyph_data_offset(0, 2, 0).unwrap(), 0);
        }
        assert_eq!(&buf[2..4], &[0x12, 0x34]);
    }

    #[test]
    fn long_loca_entries() {
        let mut buf = vec![0u8; 12];
        let mut ed = FontEditor::new(&mut buf, 0);
        ed.set_glyph_data_offset(0, 4, 2, 0x0102_0304).unwrap();
        assert_eq!(ed.glyph_data_offset(0, 4, 2).unwrap(), 0x0102_0304);
    }

    #[test]
    fn rejects_unknown_offset_size() {
        let mut buf = vec![0u8; 8];
        let ed = FontEditor::new(&mut buf, 0);
        assert!(matches!(
            ed.glyph_data_offset(0, 3, 0),
            Err(FontError::CorruptFont(_))
        ));
    }

    #[test]
    fn short_entry_overflow_is_an_error() {
        let mut buf = vec![0u8; 4];
        let mut ed = FontEditor::new(&mut buf, 0);
        assert!(ed.set_glyph_data_offset(0, 2, 0, 0x1_0000).is_err());
    }

    #[test]
    fn side_bearing_long_and_short_records() {
        // Two long records followed by two bare side bearings.
        let mut buf = vec![0u8; 2 * 4 + 2 * 2];
        let mut ed = FontEditor::new(&mut buf, 0);
        ed.set_mtx_side_bearing(0, 2, 1, -7).unwrap();
        ed.set_mtx_side_bearing(0, 2, 3, 9).unwrap();

        ed.seek(6);
        assert_eq!(ed.get_i16().unwrap(), -7);
        ed.seek(10);
        assert_eq!(ed.get_i16().unwrap(), 9);
    }
}
