//! Parsing of glyph bundles delivered by the backend.
//!
//! Wire format (big-endian): `u16 flags`, `u16 glyphCount`, then per glyph
//! `u16 glyphId`, an optional `u16` hmtx and/or vmtx side bearing (presence
//! governed by the flags), `u32 offset` into the base's glyph region,
//! `u16 length`, and `length` bytes of glyph data.

use read_fonts::FontData;

use crate::error::FontError;

const TRUNCATED: FontError = FontError::Backend("glyph bundle truncated");

/// Bundle header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleFlags(u16);

impl BundleFlags {
    pub const HAS_HMTX: u16 = 1 << 0;
    pub const HAS_VMTX: u16 = 1 << 1;
    pub const HAS_CFF: u16 = 1 << 2;

    pub fn new(bits: u16) -> Self {
        BundleFlags(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn has_hmtx(self) -> bool {
        self.0 & Self::HAS_HMTX != 0
    }

    pub fn has_vmtx(self) -> bool {
        self.0 & Self::HAS_VMTX != 0
    }

    pub fn has_cff(self) -> bool {
        self.0 & Self::HAS_CFF != 0
    }
}

/// One glyph delivered by a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphRecord<'a> {
    pub glyph_id: u16,
    pub hmtx: Option<u16>,
    pub vmtx: Option<u16>,
    /// Placement inside the base's glyph region, in bytes.
    pub offset: u32,
    pub length: u16,
    pub data: &'a [u8],
}

/// A parsed glyph bundle, borrowing the response bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBundle<'a> {
    pub flags: BundleFlags,
    pub glyphs: Vec<GlyphRecord<'a>>,
}

impl<'a> GlyphBundle<'a> {
    /// Parse a backend response. The whole payload must be consumed.
    pub fn read(data: &'a [u8]) -> Result<Self, FontError> {
        let font_data = FontData::new(data);
        let mut pos = 0usize;
        let u16_at = |pos: &mut usize| -> Result<u16, FontError> {
            let v = font_data.read_at::<u16>(*pos).map_err(|_| TRUNCATED)?;
            *pos += 2;
            Ok(v)
        };

        let flags = BundleFlags::new(u16_at(&mut pos)?);
        let glyph_count = u16_at(&mut pos)?;
        let mut glyphs = Vec::with_capacity(glyph_count as usize);
        for _ in 0..glyph_count {
            let glyph_id = u16_at(&mut pos)?;
            let hmtx = flags.has_hmtx().then(|| u16_at(&mut pos)).transpose()?;
            let vmtx = flags.has_vmtx().then(|| u16_at(&mut pos)).transpose()?;
            let offset = font_data.read_at::<u32>(pos).map_err(|_| TRUNCATED)?;
            pos += 4;
            let length = u16_at(&mut pos)?;
            let data = font_data
                .slice(pos..pos + length as usize)
                .ok_or(TRUNCATED)?
                .as_bytes();
            pos += length as usize;
            glyphs.push(GlyphRecord {
                glyph_id,
                hmtx,
                vmtx,
                offset,
                length,
                data,
            });
        }
        if pos != data.len() {
            return Err(FontError::Backend("trailing bytes after glyph bundle"));
        }
        Ok(GlyphBundle { flags, glyphs })
    }

    /// Total glyph data bytes carried by this bundle.
    ///
    /// A bundle of only empty glyphs changes offsets but delivers no
    /// renderable data, which the manager uses to skip a font face swap.
    pub fn data_len(&self) -> usize {
        self.glyphs.iter().map(|g| g.length as usize).sum()
    }
}
