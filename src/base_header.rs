//! Parsing of the build tool's header prefix.
//!
//! A preprocessed base arrives as a small tagged-record preamble followed by
//! the font proper. The preamble is decoded once into a [`FileInfo`] and never
//! consulted again as bytes; every later table write is driven by the decoded
//! record. All offsets stored in the prefix are relative to the first byte
//! after it, which is also how [`crate::editor::FontEditor`] is instantiated.
//!
//! Layout: magic `BSAC`, one byte each of major/minor version, `u32` total
//! prefix length, `u16` record count, then `(tag, u32 offset)` pairs pointing
//! at the record payloads inside the prefix.

use font_types::Tag;
use read_fonts::FontData;

use crate::error::FontError;

/// Magic number identifying a preprocessed base.
pub const MAGIC: Tag = Tag::new(b"BSAC");
/// The header major version this engine understands.
pub const VERSION_MAJOR: u8 = 1;

const TAG_TYPE: Tag = Tag::new(b"TYPE");
const TAG_GLYPH_OFFSET: Tag = Tag::new(b"GLOF");
const TAG_GLYPH_COUNT: Tag = Tag::new(b"GLCN");
const TAG_LOCA_OFFSET: Tag = Tag::new(b"LCOF");
const TAG_LOCA_FORMAT: Tag = Tag::new(b"LCFM");
const TAG_HMTX_OFFSET: Tag = Tag::new(b"HMOF");
const TAG_HMETRIC_COUNT: Tag = Tag::new(b"HMMC");
const TAG_VMTX_OFFSET: Tag = Tag::new(b"VMOF");
const TAG_VMETRIC_COUNT: Tag = Tag::new(b"VMMC");
const TAG_CMAP4: Tag = Tag::new(b"CM04");
const TAG_CMAP12: Tag = Tag::new(b"CM12");
const TAG_COMPACT_CMAP: Tag = Tag::new(b"CCMP");
const TAG_CHARSET: Tag = Tag::new(b"CS02");

/// Location of the cmap format 4 subtable inside the font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cmap4Location {
    pub offset: u32,
    pub length: u32,
}

/// Location of the cmap format 12 subtable inside the font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cmap12Location {
    pub offset: u32,
    pub n_groups: u32,
}

/// A compact cmap format 4 segment descriptor produced by the build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cmap4Segment {
    pub start_code: u16,
    pub end_code: u16,
    pub id_delta: u16,
    pub id_range_offset: u16,
}

/// A compact cmap format 12 segment descriptor produced by the build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cmap12Segment {
    pub start_code: u32,
    pub length: u32,
    pub start_glyph_id: u32,
}

/// The authoritative compact cmap segment arrays.
///
/// These drive every cmap write; the in-font subtables are overwritten from
/// them at base load and re-activated from them per glyph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactGos {
    pub cmap4: Vec<Cmap4Segment>,
    pub glyph_id_array: Vec<u16>,
    pub cmap12: Vec<Cmap12Segment>,
}

/// One range of a CFF format 2 charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharsetRange {
    pub first: u16,
    pub n_left: u16,
}

/// CFF charset location and ranges, retained from the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharsetInfo {
    pub offset: u32,
    pub gos_type: u8,
    pub segments: Vec<CharsetRange>,
}

/// The decoded header prefix.
///
/// Input-only after parsing; the engine never writes it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Total prefix length; the font proper starts at this buffer offset.
    pub header_size: u32,
    /// True for TrueType (glyf + loca), false for CFF.
    pub is_ttf: bool,
    /// Offset of the glyph data region.
    pub glyph_offset: u32,
    /// Offset of the loca table / CharStrings INDEX offset array.
    pub glyph_data_offset: u32,
    /// Width of one offset entry: 2 or 4.
    pub offset_size: u8,
    pub num_glyphs: u16,
    pub hmtx_offset: u32,
    pub hmetric_count: u16,
    pub vmtx_offset: u32,
    pub vmetric_count: u16,
    pub cmap4: Option<Cmap4Location>,
    pub cmap12: Option<Cmap12Location>,
    pub charset_fmt: Option<CharsetInfo>,
    pub compact_gos: CompactGos,
    /// True when every compact segment covers exactly one code point, which
    /// lets the engine keep the cmap pointing at .notdef until a glyph's
    /// bytes have actually arrived.
    pub has_one_char_per_seg: bool,
}

impl FileInfo {
    /// The loca divisor: stored entry values are byte offsets divided by
    /// this (2 for short loca, otherwise 1).
    pub fn offset_divisor(&self) -> u32 {
        if self.is_ttf && self.offset_size == 2 {
            2
        } else {
            1
        }
    }
}

struct Cursor<'a> {
    data: FontData<'a>,
    pos: usize,
}

impl Cursor<'_> {
    fn u8(&mut self) -> Result<u8, FontError> {
        let v = self.read_at::<u8>(self.pos)?;
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16, FontError> {
        let v = self.read_at::<u16>(self.pos)?;
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32, FontError> {
        let v = self.read_at::<u32>(self.pos)?;
        self.pos += 4;
        Ok(v)
    }

    fn tag(&mut self) -> Result<Tag, FontError> {
        let bytes: [u8; 4] = [self.u8()?, self.u8()?, self.u8()?, self.u8()?];
        Ok(Tag::new(&bytes))
    }

    fn read_at<T: font_types::Scalar>(&self, pos: usize) -> Result<T, FontError> {
        self.data
            .read_at::<T>(pos)
            .map_err(|_| FontError::CorruptFont("header prefix truncated"))
    }
}

/// Decode the header prefix at the front of `data`.
///
/// `data` may extend past the prefix (it usually holds the whole base or the
/// RLE payload); only the prefix is read.
pub fn parse_base_header(data: &[u8]) -> Result<FileInfo, FontError> {
    let mut cursor = Cursor {
        data: FontData::new(data),
        pos: 0,
    };

    if cursor.tag()? != MAGIC {
        return Err(FontError::CorruptFont("bad header magic"));
    }
    let major = cursor.u8()?;
    let _minor = cursor.u8()?;
    if major != VERSION_MAJOR {
        return Err(FontError::CorruptFont("unsupported header version"));
    }

    let header_size = cursor.u32()?;
    if header_size as usize > data.len() {
        return Err(FontError::CorruptFont("header size exceeds payload"));
    }
    let count = cursor.u16()?;

    let mut is_ttf = None;
    let mut glyph_offset = None;
    let mut glyph_data_offset = None;
    let mut offset_size = None;
    let mut num_glyphs = None;
    let mut hmtx_offset = 0;
    let mut hmetric_count = 0;
    let mut vmtx_offset = 0;
    let mut vmetric_count = 0;
    let mut cmap4 = None;
    let mut cmap12 = None;
    let mut charset_fmt = None;
    let mut compact_gos = CompactGos::default();

    for _ in 0..count {
        let tag = cursor.tag()?;
        let record_offset = cursor.u32()? as usize;
        if record_offset >= header_size as usize {
            return Err(FontError::CorruptFont("header record outside prefix"));
        }
        // record payloads may not reach past the prefix
        let mut record = Cursor {
            data: FontData::new(&data[..header_size as usize]),
            pos: record_offset,
        };
        if tag == TAG_TYPE {
            is_ttf = Some(record.u8()? == 1);
        } else if tag == TAG_GLYPH_OFFSET {
            glyph_offset = Some(record.u32()?);
        } else if tag == TAG_GLYPH_COUNT {
            num_glyphs = Some(record.u16()?);
        } else if tag == TAG_LOCA_OFFSET {
            glyph_data_offset = Some(record.u32()?);
        } else if tag == TAG_LOCA_FORMAT {
            offset_size = Some(record.u8()?);
        } else if tag == TAG_HMTX_OFFSET {
            hmtx_offset = record.u32()?;
        } else if tag == TAG_HMETRIC_COUNT {
            hmetric_count = record.u16()?;
        } else if tag == TAG_VMTX_OFFSET {
            vmtx_offset = record.u32()?;
        } else if tag == TAG_VMETRIC_COUNT {
            vmetric_count = record.u16()?;
        } else if tag == TAG_CMAP4 {
            cmap4 = Some(Cmap4Location {
                offset: record.u32()?,
                length: record.u32()?,
            });
        } else if tag == TAG_CMAP12 {
            cmap12 = Some(Cmap12Location {
                offset: record.u32()?,
                n_groups: record.u32()?,
            });
        } else if tag == TAG_COMPACT_CMAP {
            compact_gos = parse_compact_gos(&mut record)?;
        } else if tag == TAG_CHARSET {
            let offset = record.u32()?;
            let gos_type = record.u8()?;
            let n_segments = record.u16()?;
            let mut segments = Vec::with_capacity(n_segments as usize);
            for _ in 0..n_segments {
                segments.push(CharsetRange {
                    first: record.u16()?,
                    n_left: record.u16()?,
                });
            }
            charset_fmt = Some(CharsetInfo {
                offset,
                gos_type,
                segments,
            });
        } else {
            log::warn!("skipping unknown header record {tag}");
        }
    }

    let info = FileInfo {
        header_size,
        is_ttf: is_ttf.ok_or(FontError::CorruptFont("missing font type record"))?,
        glyph_offset: glyph_offset.ok_or(FontError::CorruptFont("missing glyph offset record"))?,
        glyph_data_offset: glyph_data_offset
            .ok_or(FontError::CorruptFont("missing loca offset record"))?,
        offset_size: offset_size.ok_or(FontError::CorruptFont("missing loca format record"))?,
        num_glyphs: num_glyphs.ok_or(FontError::CorruptFont("missing glyph count record"))?,
        hmtx_offset,
        hmetric_count,
        vmtx_offset,
        vmetric_count,
        cmap4,
        cmap12,
        charset_fmt,
        has_one_char_per_seg: one_char_per_seg(&compact_gos),
        compact_gos,
    };
    if info.offset_size != 2 && info.offset_size != 4 {
        return Err(FontError::CorruptFont("unsupported glyph offset size"));
    }
    Ok(info)
}

fn parse_compact_gos(record: &mut Cursor) -> Result<CompactGos, FontError> {
    let mut gos = CompactGos::default();
    let blocks = record.u8()?;
    for _ in 0..blocks {
        match record.u8()? {
            4 => {
                let seg_count = record.u16()?;
                for _ in 0..seg_count {
                    gos.cmap4.push(Cmap4Segment {
                        start_code: record.u16()?,
                        end_code: record.u16()?,
                        id_delta: record.u16()?,
                        id_range_offset: record.u16()?,
                    });
                }
                let array_len = record.u16()?;
                for _ in 0..array_len {
                    gos.glyph_id_array.push(record.u16()?);
                }
            }
            12 => {
                let n_groups = record.u32()?;
                for _ in 0..n_groups {
                    gos.cmap12.push(Cmap12Segment {
                        start_code: record.u32()?,
                        length: record.u32()?,
                        start_glyph_id: record.u32()?,
                    });
                }
            }
            _ => return Err(FontError::CorruptFont("unknown compact cmap block")),
        }
    }
    Ok(gos)
}

fn one_char_per_seg(gos: &CompactGos) -> bool {
    if gos.cmap4.is_empty() && gos.cmap12.is_empty() {
        return false;
    }
    gos.cmap4
        .iter()
        .all(|seg| seg.start_code == seg.end_code && seg.id_range_offset == 0)
        && gos.cmap12.iter().all(|seg| seg.length == 1)
}
