//! Maintenance of the cmap format 4 and format 12 subtables.
//!
//! The build step emits *compact* segment descriptors in the header prefix;
//! the in-font subtables are treated as write-only targets regenerated from
//! them. In the one-char-per-segment regime the initial write points every
//! code point at glyph 0 (.notdef) and a segment is flipped to the real glyph
//! id only once that glyph's bytes have been injected, so the font never
//! claims a glyph it cannot render. Fonts without that property arrive with a
//! fully populated cmap and are left untouched.

use std::collections::HashMap;

use read_fonts::FontData;

use crate::base_header::FileInfo;
use crate::editor::FontEditor;
use crate::error::FontError;

/// Cmap placement of a single code point, derived from the compact segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharCmapInfo {
    pub code_point: u32,
    pub glyph_id: u16,
    /// Index of the format 4 segment covering this code point, if any.
    pub format4_seg: Option<u16>,
    /// Index of the format 12 group covering this code point, if any.
    pub format12_seg: Option<u32>,
}

/// Code point to [`CharCmapInfo`] mapping for one font.
///
/// Built once per font from the header prefix; never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct CmapMapping {
    map: HashMap<u32, CharCmapInfo>,
}

impl CmapMapping {
    /// Derive the mapping from the compact segment descriptors.
    ///
    /// Format 12 groups are authoritative for glyph ids; the format 4 pass
    /// attaches segment indices for BMP code points and fills in entries the
    /// format 12 table does not cover. Entries resolving to glyph 0 are not
    /// recorded (that includes the 0xFFFF sentinel segment).
    pub fn from_file_info(info: &FileInfo) -> Self {
        let mut map = HashMap::new();
        for (index, seg) in info.compact_gos.cmap12.iter().enumerate() {
            for k in 0..seg.length {
                let code_point = seg.start_code + k;
                map.insert(
                    code_point,
                    CharCmapInfo {
                        code_point,
                        glyph_id: (seg.start_glyph_id + k) as u16,
                        format4_seg: None,
                        format12_seg: Some(index as u32),
                    },
                );
            }
        }
        for (index, seg) in info.compact_gos.cmap4.iter().enumerate() {
            for code_point in seg.start_code..=seg.end_code {
                let glyph_id = if seg.id_range_offset == 0 {
                    code_point.wrapping_add(seg.id_delta)
                } else {
                    let array_index =
                        seg.id_range_offset as usize / 2 + (code_point - seg.start_code) as usize;
                    match info.compact_gos.glyph_id_array.get(array_index) {
                        Some(&0) | None => 0,
                        Some(&gid) => gid.wrapping_add(seg.id_delta),
                    }
                };
                if let Some(entry) = map.get_mut(&(code_point as u32)) {
                    entry.format4_seg = Some(index as u16);
                } else if glyph_id != 0 {
                    map.insert(
                        code_point as u32,
                        CharCmapInfo {
                            code_point: code_point as u32,
                            glyph_id,
                            format4_seg: Some(index as u16),
                            format12_seg: None,
                        },
                    );
                }
            }
        }
        CmapMapping { map }
    }

    pub fn get(&self, code_point: u32) -> Option<&CharCmapInfo> {
        self.map.get(&code_point)
    }

    pub fn insert(&mut self, info: CharCmapInfo) {
        self.map.insert(info.code_point, info);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Group `code_points` by the glyph that renders them, dropping code
    /// points with no mapping.
    pub fn glyphs_for_code_points(
        &self,
        code_points: impl IntoIterator<Item = u32>,
    ) -> HashMap<u16, Vec<u32>> {
        let mut by_glyph: HashMap<u16, Vec<u32>> = HashMap::new();
        for code_point in code_points {
            if let Some(info) = self.map.get(&code_point) {
                by_glyph.entry(info.glyph_id).or_default().push(code_point);
            }
        }
        by_glyph
    }

    /// The full glyph-to-code-points view of the mapping.
    pub fn reverse(&self) -> HashMap<u16, Vec<u32>> {
        self.glyphs_for_code_points(self.map.keys().copied().collect::<Vec<_>>())
    }
}

/// Overwrite the in-font cmap format 12 group array from the compact
/// descriptors.
///
/// With one char per segment, every group's start glyph id is written as 0 so
/// lookups resolve to .notdef until the glyph is activated.
pub fn write_cmap12(info: &FileInfo, buf: &mut [u8]) -> Result<(), FontError> {
    let Some(loc) = info.cmap12 else {
        return Ok(());
    };
    let segments = &info.compact_gos.cmap12;
    if segments.len() != loc.n_groups as usize {
        return Err(FontError::CorruptFont("cmap12 group count mismatch"));
    }
    let mut ed = FontEditor::new(buf, info.header_size as usize);
    ed.seek(loc.offset as usize + 16);
    for seg in segments {
        if seg.length == 0 {
            return Err(FontError::CorruptFont("empty cmap12 segment"));
        }
        ed.set_u32(seg.start_code)?;
        ed.set_u32(seg.start_code + seg.length - 1)?;
        ed.set_u32(if info.has_one_char_per_seg {
            0
        } else {
            seg.start_glyph_id
        })?;
    }
    Ok(())
}

/// Overwrite the in-font cmap format 4 payload from the compact descriptors.
///
/// With one char per segment, each idDelta maps its single code point to
/// glyph 0 until activation rewrites it.
pub fn write_cmap4(info: &FileInfo, buf: &mut [u8]) -> Result<(), FontError> {
    let Some(loc) = info.cmap4 else {
        return Ok(());
    };
    let segments = &info.compact_gos.cmap4;
    let seg_count = segments.len();
    let mut ed = FontEditor::new(buf, info.header_size as usize);

    ed.seek(loc.offset as usize + 6);
    if ed.get_u16()? as usize != seg_count * 2 {
        return Err(FontError::CorruptFont("cmap4 segment count mismatch"));
    }

    ed.seek(loc.offset as usize + 14);
    for seg in segments {
        ed.set_u16(seg.end_code)?;
    }
    ed.set_u16(0)?; // reservedPad
    for seg in segments {
        ed.set_u16(seg.start_code)?;
    }
    for seg in segments {
        let id_delta = if info.has_one_char_per_seg {
            0u16.wrapping_sub(seg.start_code)
        } else {
            seg.id_delta
        };
        ed.set_u16(id_delta)?;
    }
    for seg in segments {
        ed.set_u16(seg.id_range_offset)?;
    }

    let room = (loc.length as usize).saturating_sub(16 + seg_count * 8) / 2;
    let array = &info.compact_gos.glyph_id_array;
    if array.len() != room {
        log::warn!(
            "glyph id array length {} disagrees with cmap4 subtable room {room}",
            array.len()
        );
    }
    for &gid in array.iter().take(room) {
        ed.set_u16(gid)?;
    }
    Ok(())
}

/// Flip the format 12 groups for newly injected glyphs to their real ids.
///
/// `pairs` holds `(glyph id, code point)` for every injected glyph reachable
/// from a requested character. No-op unless the base has one char per
/// segment.
pub fn set_format12_glyph_ids(
    info: &FileInfo,
    buf: &mut [u8],
    pairs: &[(u16, u32)],
    mapping: &CmapMapping,
) -> Result<(), FontError> {
    if !info.has_one_char_per_seg {
        return Ok(());
    }
    let Some(loc) = info.cmap12 else {
        return Ok(());
    };
    let segments = &info.compact_gos.cmap12;
    let mut ed = FontEditor::new(buf, info.header_size as usize);
    for &(glyph_id, code_point) in pairs {
        let Some(char_info) = mapping.get(code_point) else {
            log::warn!("no cmap mapping for injected code point U+{code_point:04X}");
            continue;
        };
        let Some(seg_index) = char_info.format12_seg else {
            continue;
        };
        let seg = segments
            .get(seg_index as usize)
            .ok_or(FontError::CorruptFont("cmap12 segment index out of range"))?;
        if seg.start_code != code_point {
            return Err(FontError::CorruptFont(
                "cmap12 segment does not cover its code point",
            ));
        }
        if char_info.glyph_id != glyph_id {
            log::warn!(
                "bundle delivered glyph {glyph_id} for U+{code_point:04X}, mapping says {}",
                char_info.glyph_id
            );
        }
        ed.seek(loc.offset as usize + 16 + seg_index as usize * 12 + 8);
        ed.set_u32(seg.start_glyph_id)?;
    }
    Ok(())
}

/// Flip the format 4 idDelta entries for newly injected glyphs.
///
/// A BMP code point whose mapping lacks a format 4 segment is inconsistent
/// metadata and fails the font; supplementary-plane code points simply have
/// nothing to do here. No-op unless the base has one char per segment.
pub fn set_format4_glyph_ids(
    info: &FileInfo,
    buf: &mut [u8],
    pairs: &[(u16, u32)],
    mapping: &CmapMapping,
) -> Result<(), FontError> {
    if !info.has_one_char_per_seg {
        return Ok(());
    }
    let Some(loc) = info.cmap4 else {
        return Ok(());
    };
    let segments = &info.compact_gos.cmap4;
    let seg_count = segments.len();
    let mut ed = FontEditor::new(buf, info.header_size as usize);

    ed.seek(loc.offset as usize + 6);
    if ed.get_u16()? as usize != seg_count * 2 {
        return Err(FontError::CorruptFont("cmap4 segment count mismatch"));
    }

    for &(_, code_point) in pairs {
        let Some(char_info) = mapping.get(code_point) else {
            log::warn!("no cmap mapping for injected code point U+{code_point:04X}");
            continue;
        };
        let Some(seg_index) = char_info.format4_seg else {
            if code_point <= 0xFFFF {
                return Err(FontError::CorruptFont(
                    "BMP code point has no format 4 segment",
                ));
            }
            continue;
        };
        let seg = segments
            .get(seg_index as usize)
            .ok_or(FontError::CorruptFont("cmap4 segment index out of range"))?;
        if seg.start_code as u32 != code_point || seg.end_code as u32 != code_point {
            return Err(FontError::CorruptFont(
                "cmap4 segment does not cover its code point",
            ));
        }
        ed.seek(loc.offset as usize + 16 + seg_count * 4 + seg_index as usize * 2);
        ed.set_u16(seg.id_delta)?;
    }
    Ok(())
}

/// Resolve `code_point` through the in-font format 4 subtable.
///
/// Returns glyph 0 for unmapped code points, like a renderer would.
pub fn lookup_cmap4(info: &FileInfo, buf: &[u8], code_point: u16) -> Result<u16, FontError> {
    let loc = info
        .cmap4
        .ok_or(FontError::CorruptFont("no format 4 subtable"))?;
    let data = FontData::new(buf);
    let table = loc.offset as usize + info.header_size as usize;
    let read_u16 = |pos: usize| -> Result<u16, FontError> {
        data.read_at::<u16>(table + pos)
            .map_err(|_| FontError::CorruptFont("cmap4 read out of bounds"))
    };

    let seg_count = read_u16(6)? as usize / 2;
    for i in 0..seg_count {
        let end = read_u16(14 + 2 * i)?;
        if end < code_point {
            continue;
        }
        let start = read_u16(16 + seg_count * 2 + 2 * i)?;
        if start > code_point {
            return Ok(0);
        }
        let id_delta = read_u16(16 + seg_count * 4 + 2 * i)?;
        let id_range_offset = read_u16(16 + seg_count * 6 + 2 * i)?;
        if id_range_offset == 0 {
            return Ok(code_point.wrapping_add(id_delta));
        }
        // idRangeOffset is relative to its own slot in the offset array
        let slot = 16 + seg_count * 6 + 2 * i;
        let glyph = read_u16(slot + id_range_offset as usize + 2 * (code_point - start) as usize)?;
        return Ok(if glyph == 0 {
            0
        } else {
            glyph.wrapping_add(id_delta)
        });
    }
    Ok(0)
}

/// Resolve `code_point` through the in-font format 12 subtable.
pub fn lookup_cmap12(info: &FileInfo, buf: &[u8], code_point: u32) -> Result<u32, FontError> {
    let loc = info
        .cmap12
        .ok_or(FontError::CorruptFont("no format 12 subtable"))?;
    let data = FontData::new(buf);
    let table = loc.offset as usize + info.header_size as usize;
    let read_u32 = |pos: usize| -> Result<u32, FontError> {
        data.read_at::<u32>(table + pos)
            .map_err(|_| FontError::CorruptFont("cmap12 read out of bounds"))
    };

    for i in 0..loc.n_groups as usize {
        let start = read_u32(16 + i * 12)?;
        let end = read_u32(16 + i * 12 + 4)?;
        if code_point < start {
            break;
        }
        if code_point <= end {
            let start_glyph = read_u32(16 + i * 12 + 8)?;
            if start_glyph == 0 {
                return Ok(0);
            }
            return Ok(start_glyph + (code_point - start));
        }
    }
    Ok(0)
}
