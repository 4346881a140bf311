//! Splicing of glyph bundles into the base font.
//!
//! Each bundle record carries glyph bytes plus their placement in the glyph
//! region. Injection rewrites the loca table (TrueType) or CharStrings INDEX
//! offsets (CFF) around the new glyph, repairs the sentinel slots the
//! rewrite disturbed, fixes side bearings, copies the bytes in, and finally
//! activates the cmap entries for the delivered code points. The buffer is a
//! structurally valid font before and after every call.

use std::collections::HashMap;

use crate::base_header::FileInfo;
use crate::bundle::{GlyphBundle, GlyphRecord};
use crate::cmap::{self, CmapMapping};
use crate::editor::FontEditor;
use crate::error::FontError;
use crate::sanitize::CFF_ENDCHAR;

/// Inject every record of `bundle` into `buf` and activate the cmap entries
/// for the code points in `glyph_to_code`.
///
/// Records are processed in the order received. `glyph_to_code` maps glyph
/// ids to the requested code points they render; delivered glyphs without an
/// entry are injected but not activated.
pub fn inject_glyph_bundle(
    info: &FileInfo,
    buf: &mut [u8],
    bundle: &GlyphBundle,
    mapping: &CmapMapping,
    glyph_to_code: &HashMap<u16, Vec<u32>>,
) -> Result<(), FontError> {
    {
        let mut ed = FontEditor::new(buf, info.header_size as usize);
        for record in &bundle.glyphs {
            if record.glyph_id >= info.num_glyphs {
                return Err(FontError::CorruptFont("bundle glyph id out of range"));
            }
            if bundle.flags.has_hmtx() {
                // presence is guaranteed by the parser when the flag is set
                let hmtx = record.hmtx.unwrap_or_default();
                ed.set_mtx_side_bearing(
                    info.hmtx_offset,
                    info.hmetric_count,
                    record.glyph_id,
                    hmtx as i16,
                )?;
            }
            if bundle.flags.has_vmtx() {
                let vmtx = record.vmtx.unwrap_or_default();
                ed.set_mtx_side_bearing(
                    info.vmtx_offset,
                    info.vmetric_count,
                    record.glyph_id,
                    vmtx as i16,
                )?;
            }

            if info.is_ttf {
                inject_truetype_record(info, &mut ed, record)?;
            } else {
                inject_cff_record(info, &mut ed, record)?;
            }

            ed.seek((info.glyph_offset + record.offset) as usize);
            ed.set_bytes(record.data)?;
        }
    }

    let mut pairs: Vec<(u16, u32)> = Vec::new();
    for record in &bundle.glyphs {
        if let Some(code_points) = glyph_to_code.get(&record.glyph_id) {
            pairs.extend(code_points.iter().map(|&cp| (record.glyph_id, cp)));
        } else {
            log::debug!("glyph {} injected without cmap activation", record.glyph_id);
        }
    }
    cmap::set_format12_glyph_ids(info, buf, &pairs, mapping)?;
    cmap::set_format4_glyph_ids(info, buf, &pairs, mapping)?;
    Ok(())
}

fn inject_truetype_record(
    info: &FileInfo,
    ed: &mut FontEditor,
    record: &GlyphRecord,
) -> Result<(), FontError> {
    let table = info.glyph_data_offset;
    let size = info.offset_size;
    let divisor = info.offset_divisor();
    let id = record.glyph_id as usize;
    let end_bytes = record.offset + record.length as u32;
    // stored units: short loca holds byte offsets halved
    let offset = record.offset / divisor;
    let end = end_bytes / divisor;

    ed.set_glyph_data_offset(table, size, id, offset)?;
    let old_next_one = ed.glyph_data_offset(table, size, id + 1)?;
    ed.set_glyph_data_offset(table, size, id + 1, end)?;

    // repair sentinel-sparse entries left of the injection
    let mut prev = id;
    while prev > 0 {
        prev -= 1;
        if ed.glyph_data_offset(table, size, prev)? <= offset {
            break;
        }
        ed.set_glyph_data_offset(table, size, prev, offset)?;
    }

    if old_next_one != end && id + 1 < info.num_glyphs as usize {
        if record.length > 0 {
            // keep the next slot a parseable composite sentinel
            ed.seek((info.glyph_offset + end_bytes) as usize);
            ed.set_i16(-1)?;
        } else {
            ed.seek((info.glyph_offset + end_bytes) as usize);
            let word0 = ed.get_u32()?;
            let word1 = ed.get_u32()?;
            if word0 == 0 && word1 == 0 {
                ed.seek((info.glyph_offset + end_bytes) as usize);
                ed.set_i16(-1)?;
            }
        }
    }
    Ok(())
}

fn inject_cff_record(
    info: &FileInfo,
    ed: &mut FontEditor,
    record: &GlyphRecord,
) -> Result<(), FontError> {
    let table = info.glyph_data_offset;
    let size = info.offset_size;
    let id = record.glyph_id as usize;
    let end = record.offset + record.length as u32;
    let offset_count = info.num_glyphs as usize + 1;

    ed.set_glyph_data_offset(table, size, id, record.offset)?;
    let old_next_one = ed.glyph_data_offset(table, size, id + 1)?;
    ed.set_glyph_data_offset(table, size, id + 1, end)?;

    if old_next_one < end && id + 1 < info.num_glyphs as usize {
        // the displaced slot starts over the new glyph's tail; give it an
        // endchar and walk the following empties back to monotone
        ed.seek((info.glyph_offset + end) as usize);
        ed.set_u8(CFF_ENDCHAR)?;

        let mut current = end;
        let mut next_id = id + 2;
        while next_id < offset_count {
            let next_one = ed.glyph_data_offset(table, size, next_id)?;
            if next_one > current {
                break;
            }
            current += 1;
            ed.set_glyph_data_offset(table, size, next_id, current)?;
            if next_id < offset_count - 1 {
                ed.seek((info.glyph_offset + current) as usize);
                ed.set_u8(CFF_ENDCHAR)?;
            }
            next_id += 1;
        }
    }
    Ok(())
}
