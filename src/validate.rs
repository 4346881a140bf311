//! Standalone structural checks over a patched base.
//!
//! These mirror what a font sanitizer gate verifies before accepting a font:
//! glyph offsets monotone and in bounds, cmap segments sorted and
//! non-overlapping. The engine's invariant is that every public operation
//! leaves the base in a state that passes [`check_base`]; the property tests
//! call it after each mutation.

use read_fonts::FontData;

use crate::base_header::FileInfo;
use crate::error::FontError;

/// Verify the structural invariants of a base buffer.
pub fn check_base(info: &FileInfo, buf: &[u8]) -> Result<(), FontError> {
    check_glyph_offsets(info, buf)?;
    if info.cmap4.is_some() {
        check_cmap4(info, buf)?;
    }
    if info.cmap12.is_some() {
        check_cmap12(info, buf)?;
    }
    Ok(())
}

fn check_glyph_offsets(info: &FileInfo, buf: &[u8]) -> Result<(), FontError> {
    let data = FontData::new(buf);
    let table = info.header_size as usize + info.glyph_data_offset as usize;
    let read = |gid: usize| -> Result<u32, FontError> {
        let err = FontError::CorruptFont("glyph offset array out of bounds");
        match info.offset_size {
            2 => Ok(data.read_at::<u16>(table + gid * 2).map_err(|_| err)? as u32),
            4 => data.read_at::<u32>(table + gid * 4).map_err(|_| err),
            _ => Err(FontError::CorruptFont("unsupported glyph offset size")),
        }
    };

    let mut prev = read(0)?;
    for gid in 1..=info.num_glyphs as usize {
        let this = read(gid)?;
        if this < prev {
            return Err(FontError::CorruptFont("glyph offsets not monotone"));
        }
        prev = this;
    }

    let end_bytes = prev as u64 * info.offset_divisor() as u64;
    let region_start = info.header_size as u64 + info.glyph_offset as u64;
    if region_start + end_bytes > buf.len() as u64 {
        return Err(FontError::CorruptFont("glyph region overruns buffer"));
    }
    Ok(())
}

fn check_cmap4(info: &FileInfo, buf: &[u8]) -> Result<(), FontError> {
    let data = FontData::new(buf);
    let table = info.header_size as usize + info.cmap4.unwrap().offset as usize;
    let read = |pos: usize| -> Result<u16, FontError> {
        data.read_at::<u16>(table + pos)
            .map_err(|_| FontError::CorruptFont("cmap4 subtable out of bounds"))
    };

    let seg_count = read(6)? as usize / 2;
    if seg_count == 0 {
        return Err(FontError::CorruptFont("cmap4 has no segments"));
    }
    let mut prev_end: Option<u16> = None;
    for i in 0..seg_count {
        let end = read(14 + 2 * i)?;
        let start = read(16 + seg_count * 2 + 2 * i)?;
        if end < start {
            return Err(FontError::CorruptFont("cmap4 segment ends before start"));
        }
        if let Some(prev) = prev_end {
            if start <= prev {
                return Err(FontError::CorruptFont("cmap4 segments overlap"));
            }
        }
        prev_end = Some(end);
    }
    if prev_end != Some(0xFFFF) {
        return Err(FontError::CorruptFont("cmap4 missing 0xFFFF sentinel"));
    }
    Ok(())
}

fn check_cmap12(info: &FileInfo, buf: &[u8]) -> Result<(), FontError> {
    let data = FontData::new(buf);
    let loc = info.cmap12.unwrap();
    let table = info.header_size as usize + loc.offset as usize;
    let read = |pos: usize| -> Result<u32, FontError> {
        data.read_at::<u32>(table + pos)
            .map_err(|_| FontError::CorruptFont("cmap12 subtable out of bounds"))
    };

    let mut prev_end: Option<u32> = None;
    for i in 0..loc.n_groups as usize {
        let start = read(16 + i * 12)?;
        let end = read(16 + i * 12 + 4)?;
        if end < start {
            return Err(FontError::CorruptFont("cmap12 group ends before start"));
        }
        if let Some(prev) = prev_end {
            if start <= prev {
                return Err(FontError::CorruptFont("cmap12 groups overlap"));
            }
        }
        prev_end = Some(end);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_header::parse_base_header;
    use crate::cmap::{write_cmap12, write_cmap4};
    use crate::editor::FontEditor;
    use crate::test_helpers::BaseSpec;

    fn loaded() -> (FileInfo, Vec<u8>) {
        let mut base = BaseSpec::ttf(&[(0x61, 1), (0x62, 2)], 4, 64).build();
        let info = parse_base_header(&base).unwrap();
        write_cmap12(&info, &mut base).unwrap();
        write_cmap4(&info, &mut base).unwrap();
        (info, base)
    }

    #[test]
    fn fresh_base_passes() {
        let (info, base) = loaded();
        check_base(&info, &base).unwrap();
    }

    #[test]
    fn non_monotone_loca_fails() {
        let (info, mut base) = loaded();
        let mut ed = FontEditor::new(&mut base, info.header_size as usize);
        ed.set_glyph_data_offset(info.glyph_data_offset, info.offset_size, 1, 30)
            .unwrap();
        assert_eq!(
            check_base(&info, &base),
            Err(FontError::CorruptFont("glyph offsets not monotone"))
        );
    }

    #[test]
    fn glyph_region_overrun_fails() {
        let (info, mut base) = loaded();
        let mut ed = FontEditor::new(&mut base, info.header_size as usize);
        for gid in 0..=4 {
            ed.set_glyph_data_offset(info.glyph_data_offset, info.offset_size, gid, 0x7000)
                .unwrap();
        }
        assert_eq!(
            check_base(&info, &base),
            Err(FontError::CorruptFont("glyph region overruns buffer"))
        );
    }

    #[test]
    fn overlapping_cmap4_segments_fail() {
        let (info, mut base) = loaded();
        let table = info.header_size as usize + info.cmap4.unwrap().offset as usize;
        // make startCode[1] overlap endCode[0]
        let seg_count = info.compact_gos.cmap4.len();
        let start_codes = table + 16 + seg_count * 2;
        base[start_codes + 2] = 0;
        base[start_codes + 3] = 0x61;
        assert_eq!(
            check_base(&info, &base),
            Err(FontError::CorruptFont("cmap4 segments overlap"))
        );
    }

    #[test]
    fn unsorted_cmap12_groups_fail() {
        let (info, mut base) = loaded();
        let table = info.header_size as usize + info.cmap12.unwrap().offset as usize;
        // move the second group's start below the first group's end
        base[table + 16 + 12] = 0;
        base[table + 16 + 12 + 1] = 0;
        base[table + 16 + 12 + 2] = 0;
        base[table + 16 + 12 + 3] = 0x60;
        assert_eq!(
            check_base(&info, &base),
            Err(FontError::CorruptFont("cmap12 groups overlap"))
        );
    }
}
