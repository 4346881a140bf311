//! Sentinel installation for a freshly expanded base.
//!
//! The expanded base's glyph region is mostly empty, but a sanitizer gate
//! demands that every glyph slot parse. For TrueType we drop a composite
//! glyph header (`numberOfContours == -1`) at the head of every populated
//! loca block; for CFF we pull collapsed CharStrings INDEX offsets apart by
//! one byte each and fill the gap with `endchar`, the shortest valid
//! charstring.

use crate::base_header::FileInfo;
use crate::editor::FontEditor;
use crate::error::FontError;

/// Loca entries are spot checked one per block of this many glyphs.
pub const LOCA_BLOCK_SIZE: usize = 64;

/// The CFF `endchar` operator.
pub(crate) const CFF_ENDCHAR: u8 = 14;

/// Patch the glyph region of a freshly expanded base so every slot parses.
///
/// The caller is responsible for marking the base dirty afterwards.
pub fn sanitize_base(info: &FileInfo, buf: &mut [u8]) -> Result<(), FontError> {
    if info.is_ttf {
        sanitize_truetype(info, buf)
    } else {
        sanitize_cff(info, buf)
    }
}

fn sanitize_truetype(info: &FileInfo, buf: &mut [u8]) -> Result<(), FontError> {
    let divisor = info.offset_divisor();
    let mut ed = FontEditor::new(buf, info.header_size as usize);
    let mut gid = LOCA_BLOCK_SIZE - 1;
    while gid < info.num_glyphs as usize {
        let this_one = ed.glyph_data_offset(info.glyph_data_offset, info.offset_size, gid)?;
        let next_one = ed.glyph_data_offset(info.glyph_data_offset, info.offset_size, gid + 1)?;
        if next_one > this_one {
            ed.seek((info.glyph_offset + this_one * divisor) as usize);
            ed.set_i16(-1)?;
        }
        gid += LOCA_BLOCK_SIZE;
    }
    Ok(())
}

fn sanitize_cff(info: &FileInfo, buf: &mut [u8]) -> Result<(), FontError> {
    let mut ed = FontEditor::new(buf, info.header_size as usize);
    let mut last_real = ed.glyph_data_offset(info.glyph_data_offset, info.offset_size, 0)?;
    let mut delta = 1u32;
    for i in 1..=info.num_glyphs as usize {
        let raw = ed.glyph_data_offset(info.glyph_data_offset, info.offset_size, i)?;
        if raw == last_real {
            let fixed = raw + delta;
            ed.set_glyph_data_offset(info.glyph_data_offset, info.offset_size, i, fixed)?;
            delta += 1;
            ed.seek((info.glyph_offset + fixed - 1) as usize);
            ed.set_u8(CFF_ENDCHAR)?;
        } else {
            last_real = raw;
            delta = 1;
        }
    }
    Ok(())
}
