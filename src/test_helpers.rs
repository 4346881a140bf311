//! Shared fixtures: a big-endian buffer builder, synthetic preprocessed
//! bases, bundle serialization, and scriptable collaborator doubles.

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use font_types::Scalar;

use crate::backend::{BackendService, FontInfo};
use crate::base_header::{Cmap4Segment, Cmap12Segment};
use crate::error::FontError;
use crate::font_face::FontFaceBinder;
use crate::persist::{PersistentStore, Slot};

/// A convenience builder for buffers of big-endian scalars.
#[derive(Debug, Clone, Default)]
pub struct BeBuffer {
    data: Vec<u8>,
}

impl BeBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(mut self, item: impl Scalar) -> Self {
        let raw = item.to_raw();
        self.data.extend_from_slice(raw.as_ref());
        self
    }

    pub fn push_slice(mut self, bytes: &[u8]) -> Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn extend<T: Scalar>(mut self, iter: impl IntoIterator<Item = T>) -> Self {
        for item in iter {
            self = self.push(item);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Blueprint for a synthetic preprocessed base.
///
/// The font region is laid out hmtx, (vmtx), cmap4, cmap12, loca/CharStrings
/// offsets, glyph data; the prefix records point at all of it. Default glyph
/// offsets follow the build layout of [`glyph_slot_data`]: glyph `g` owns
/// bytes `[g*8, g*8+8)` of the glyph region.
pub struct BaseSpec {
    pub is_ttf: bool,
    pub offset_size: u8,
    pub num_glyphs: u16,
    pub glyph_region: usize,
    pub cmap4_segments: Vec<Cmap4Segment>,
    pub glyph_id_array: Vec<u16>,
    pub cmap12_segments: Vec<Cmap12Segment>,
    /// Initial loca / CharStrings offsets, in stored units.
    pub offsets: Vec<u32>,
    pub with_vmtx: bool,
}

impl BaseSpec {
    pub fn ttf(cps: &[(u32, u16)], num_glyphs: u16, glyph_region: usize) -> Self {
        Self::with_format(true, 2, cps, num_glyphs, glyph_region)
    }

    pub fn cff(cps: &[(u32, u16)], num_glyphs: u16, glyph_region: usize) -> Self {
        Self::with_format(false, 4, cps, num_glyphs, glyph_region)
    }

    fn with_format(
        is_ttf: bool,
        offset_size: u8,
        cps: &[(u32, u16)],
        num_glyphs: u16,
        glyph_region: usize,
    ) -> Self {
        let mut sorted: Vec<(u32, u16)> = cps.to_vec();
        sorted.sort_unstable();

        let cmap12_segments = sorted
            .iter()
            .map(|&(cp, gid)| Cmap12Segment {
                start_code: cp,
                length: 1,
                start_glyph_id: gid as u32,
            })
            .collect();

        let mut cmap4_segments: Vec<Cmap4Segment> = sorted
            .iter()
            .filter(|&&(cp, _)| cp < 0xFFFF)
            .map(|&(cp, gid)| Cmap4Segment {
                start_code: cp as u16,
                end_code: cp as u16,
                id_delta: gid.wrapping_sub(cp as u16),
                id_range_offset: 0,
            })
            .collect();
        cmap4_segments.push(Cmap4Segment {
            start_code: 0xFFFF,
            end_code: 0xFFFF,
            id_delta: 1, // maps the sentinel to glyph 0
            id_range_offset: 0,
        });

        let divisor = if is_ttf && offset_size == 2 { 2 } else { 1 };
        let offsets = (0..=num_glyphs as u32)
            .map(|g| (g * 8).min(glyph_region as u32) / divisor)
            .collect();

        BaseSpec {
            is_ttf,
            offset_size,
            num_glyphs,
            glyph_region,
            cmap4_segments,
            glyph_id_array: Vec::new(),
            cmap12_segments,
            offsets,
            with_vmtx: false,
        }
    }

    /// Assemble the full expanded base (prefix + font).
    pub fn build(&self) -> Vec<u8> {
        let n = self.num_glyphs as usize;
        assert_eq!(self.offsets.len(), n + 1, "offsets must cover every glyph");

        // font region layout
        let hmtx_size = n * 4;
        let vmtx_size = if self.with_vmtx { n * 4 } else { 0 };
        let mut pos = hmtx_size + vmtx_size;
        let cmap4 = (!self.cmap4_segments.is_empty()).then(|| {
            let s = self.cmap4_segments.len();
            let length = 16 + 8 * s + 2 * self.glyph_id_array.len();
            let offset = pos;
            pos += length;
            (offset, length)
        });
        let cmap12 = (!self.cmap12_segments.is_empty()).then(|| {
            let length = 16 + 12 * self.cmap12_segments.len();
            let offset = pos;
            pos += length;
            (offset, length)
        });
        let loca_offset = pos;
        pos += (n + 1) * self.offset_size as usize;
        let glyph_offset = pos;
        pos += self.glyph_region;
        let font_size = pos;

        let mut font = BeBuffer::new().push_slice(&vec![0u8; hmtx_size + vmtx_size]);
        if let Some((_, length)) = cmap4 {
            let s = self.cmap4_segments.len() as u16;
            let mut search_range = 2u16;
            let mut entry_selector = 0u16;
            while search_range * 2 <= s * 2 {
                search_range *= 2;
                entry_selector += 1;
            }
            font = font
                .push(4u16)
                .push(length as u16)
                .push(0u16)
                .push(s * 2)
                .push(search_range)
                .push(entry_selector)
                .push(s * 2 - search_range)
                .push_slice(&vec![0u8; length - 14]);
        }
        if let Some((_, length)) = cmap12 {
            font = font
                .push(12u16)
                .push(0u16)
                .push(length as u32)
                .push(0u32)
                .push(self.cmap12_segments.len() as u32)
                .push_slice(&vec![0u8; length - 16]);
        }
        for &value in &self.offsets {
            font = match self.offset_size {
                2 => font.push(value as u16),
                _ => font.push(value),
            };
        }
        font = font.push_slice(&vec![0u8; self.glyph_region]);
        let font = font.into_vec();
        assert_eq!(font.len(), font_size);

        // prefix records
        let mut records: Vec<([u8; 4], Vec<u8>)> = vec![
            (*b"TYPE", vec![self.is_ttf as u8]),
            (*b"GLOF", BeBuffer::new().push(glyph_offset as u32).into_vec()),
            (*b"GLCN", BeBuffer::new().push(self.num_glyphs).into_vec()),
            (*b"LCOF", BeBuffer::new().push(loca_offset as u32).into_vec()),
            (*b"LCFM", vec![self.offset_size]),
            (*b"HMOF", BeBuffer::new().push(0u32).into_vec()),
            (*b"HMMC", BeBuffer::new().push(self.num_glyphs).into_vec()),
        ];
        if self.with_vmtx {
            records.push((
                *b"VMOF",
                BeBuffer::new().push(hmtx_size as u32).into_vec(),
            ));
            records.push((*b"VMMC", BeBuffer::new().push(self.num_glyphs).into_vec()));
        }
        if let Some((offset, length)) = cmap4 {
            records.push((
                *b"CM04",
                BeBuffer::new()
                    .push(offset as u32)
                    .push(length as u32)
                    .into_vec(),
            ));
        }
        if let Some((offset, _)) = cmap12 {
            records.push((
                *b"CM12",
                BeBuffer::new()
                    .push(offset as u32)
                    .push(self.cmap12_segments.len() as u32)
                    .into_vec(),
            ));
        }
        let mut ccmp = BeBuffer::new()
            .push(2u8)
            .push(4u8)
            .push(self.cmap4_segments.len() as u16);
        for seg in &self.cmap4_segments {
            ccmp = ccmp
                .push(seg.start_code)
                .push(seg.end_code)
                .push(seg.id_delta)
                .push(seg.id_range_offset);
        }
        ccmp = ccmp
            .push(self.glyph_id_array.len() as u16)
            .extend(self.glyph_id_array.iter().copied())
            .push(12u8)
            .push(self.cmap12_segments.len() as u32);
        for seg in &self.cmap12_segments {
            ccmp = ccmp
                .push(seg.start_code)
                .push(seg.length)
                .push(seg.start_glyph_id);
        }
        records.push((*b"CCMP", ccmp.into_vec()));

        let directory_size = 12 + 8 * records.len();
        let header_size =
            directory_size + records.iter().map(|(_, data)| data.len()).sum::<usize>();

        let mut prefix = BeBuffer::new()
            .push_slice(b"BSAC")
            .push(1u8)
            .push(0u8)
            .push(header_size as u32)
            .push(records.len() as u16);
        let mut payload_offset = directory_size;
        for (tag, data) in &records {
            prefix = prefix.push_slice(tag).push(payload_offset as u32);
            payload_offset += data.len();
        }
        for (_, data) in &records {
            prefix = prefix.push_slice(data);
        }
        assert_eq!(prefix.len(), header_size);

        let mut base = prefix.into_vec();
        base.extend_from_slice(&font);
        base
    }

    /// The server wire form of this base: prefix + RLE stream.
    pub fn rle_payload(&self) -> Vec<u8> {
        let full = self.build();
        let header_size = u32::from_be_bytes(full[6..10].try_into().unwrap()) as usize;
        let font = &full[header_size..];
        let mut payload = full[..header_size].to_vec();
        payload.extend_from_slice(&(font.len() as u32).to_be_bytes());
        payload.push(0xC0 | 3); // single literal copy op
        payload.extend_from_slice(&(font.len() as u32).to_be_bytes());
        payload.extend_from_slice(font);
        payload
    }
}

/// One record for [`bundle_bytes`].
pub struct BundleRec {
    pub gid: u16,
    pub hmtx: u16,
    pub vmtx: u16,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl BundleRec {
    pub fn new(gid: u16, offset: u32, data: &[u8]) -> Self {
        BundleRec {
            gid,
            hmtx: 0,
            vmtx: 0,
            offset,
            data: data.to_vec(),
        }
    }
}

/// Serialize a glyph bundle in the backend wire format.
pub fn bundle_bytes(flags: u16, records: &[BundleRec]) -> Vec<u8> {
    let mut buf = BeBuffer::new().push(flags).push(records.len() as u16);
    for rec in records {
        buf = buf.push(rec.gid);
        if flags & crate::bundle::BundleFlags::HAS_HMTX != 0 {
            buf = buf.push(rec.hmtx);
        }
        if flags & crate::bundle::BundleFlags::HAS_VMTX != 0 {
            buf = buf.push(rec.vmtx);
        }
        buf = buf
            .push(rec.offset)
            .push(rec.data.len() as u16)
            .push_slice(&rec.data);
    }
    buf.into_vec()
}

/// The glyph bytes the scripted backend serves for `gid`: 8 bytes filling
/// the glyph's build layout slot.
pub fn glyph_slot_data(gid: u16) -> Vec<u8> {
    let raw = gid.to_be_bytes();
    vec![raw[0], raw[1], raw[0], raw[1], raw[0], raw[1], raw[0], raw[1]]
}

#[derive(Debug, Default)]
pub struct StoreState {
    pub version: Option<u32>,
    pub base: Option<Vec<u8>>,
    pub char_list: Option<Vec<u8>>,
    pub puts: Vec<Slot>,
    pub opens: Vec<(String, u32)>,
    pub fail_puts: bool,
}

/// A cloneable in-memory store; clones share state so tests can inspect it
/// after handing one to a manager.
#[derive(Clone, Default)]
pub struct SharedStore {
    state: Rc<RefCell<StoreState>>,
}

impl SharedStore {
    pub fn state(&self) -> RefMut<'_, StoreState> {
        self.state.borrow_mut()
    }
}

impl PersistentStore for SharedStore {
    fn open(&mut self, name: &str, version: u32) -> Result<(), FontError> {
        let mut state = self.state.borrow_mut();
        state.opens.push((name.to_string(), version));
        if state.version != Some(version) {
            state.base = None;
            state.char_list = None;
            state.version = Some(version);
        }
        Ok(())
    }

    fn get(&mut self, slot: Slot) -> Result<Option<Vec<u8>>, FontError> {
        let state = self.state.borrow();
        Ok(match slot {
            Slot::Base => state.base.clone(),
            Slot::CharList => state.char_list.clone(),
        })
    }

    fn put(&mut self, slot: Slot, data: &[u8]) -> Result<(), FontError> {
        let mut state = self.state.borrow_mut();
        if state.fail_puts {
            return Err(FontError::PersistIo("scripted put failure"));
        }
        match slot {
            Slot::Base => state.base = Some(data.to_vec()),
            Slot::CharList => state.char_list = Some(data.to_vec()),
        }
        state.puts.push(slot);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct BackendState {
    pub base_payload: Vec<u8>,
    pub plan: HashMap<u32, u16>,
    pub code_point_requests: Vec<Vec<u32>>,
    pub base_requests: u32,
    pub fail_next_base: bool,
    pub fail_next_bundle: bool,
    pub corrupt_base: bool,
    pub empty_glyphs: bool,
}

/// A backend double that serves a canned base and synthesizes bundles from a
/// code point to glyph plan, using the build layout of [`glyph_slot_data`].
#[derive(Clone)]
pub struct ScriptedBackend {
    state: Rc<RefCell<BackendState>>,
}

impl ScriptedBackend {
    pub fn new(base_payload: Vec<u8>, plan: Vec<(u32, u16)>) -> Self {
        ScriptedBackend {
            state: Rc::new(RefCell::new(BackendState {
                base_payload,
                plan: plan.into_iter().collect(),
                ..Default::default()
            })),
        }
    }

    pub fn state(&self) -> RefMut<'_, BackendState> {
        self.state.borrow_mut()
    }
}

impl BackendService for ScriptedBackend {
    fn request_font_base(&mut self, _font: &FontInfo) -> Result<Vec<u8>, FontError> {
        let mut state = self.state.borrow_mut();
        state.base_requests += 1;
        if state.fail_next_base {
            state.fail_next_base = false;
            return Err(FontError::Backend("scripted base failure"));
        }
        if state.corrupt_base {
            return Ok(b"this is not a preprocessed base".to_vec());
        }
        Ok(state.base_payload.clone())
    }

    fn request_code_points(
        &mut self,
        _font: &FontInfo,
        code_points: &[u32],
    ) -> Result<Vec<u8>, FontError> {
        let mut state = self.state.borrow_mut();
        state.code_point_requests.push(code_points.to_vec());
        if state.fail_next_bundle {
            state.fail_next_bundle = false;
            return Err(FontError::Backend("scripted bundle failure"));
        }
        let gids: BTreeSet<u16> = code_points
            .iter()
            .filter_map(|cp| state.plan.get(cp))
            .copied()
            .collect();
        let records: Vec<BundleRec> = gids
            .iter()
            .map(|&gid| {
                let data = if state.empty_glyphs {
                    Vec::new()
                } else {
                    glyph_slot_data(gid)
                };
                BundleRec {
                    gid,
                    hmtx: 0,
                    vmtx: 0,
                    offset: gid as u32 * 8,
                    data,
                }
            })
            .collect();
        Ok(bundle_bytes(0, &records))
    }
}

#[derive(Debug, Default)]
pub struct BinderState {
    pub faces: HashMap<(String, u16), Vec<u8>>,
    pub visibility: HashMap<String, bool>,
    pub log: Vec<String>,
    pub fail_define: bool,
}

/// A font face binder double recording rule operations in order.
#[derive(Clone, Default)]
pub struct MockBinder {
    state: Rc<RefCell<BinderState>>,
}

impl MockBinder {
    pub fn state(&self) -> RefMut<'_, BinderState> {
        self.state.borrow_mut()
    }
}

impl FontFaceBinder for MockBinder {
    fn set_class_visibility(&mut self, family: &str, visible: bool) {
        let mut state = self.state.borrow_mut();
        state.visibility.insert(family.to_string(), visible);
        state.log.push(format!("visibility {family} {visible}"));
    }

    fn define_face(&mut self, family: &str, weight: u16, data: &[u8]) -> Result<(), FontError> {
        let mut state = self.state.borrow_mut();
        if state.fail_define {
            return Err(FontError::CorruptFont("face rejected"));
        }
        state
            .faces
            .insert((family.to_string(), weight), data.to_vec());
        state.log.push(format!("define {family}"));
        Ok(())
    }

    fn delete_face(&mut self, family: &str, weight: u16) {
        let mut state = self.state.borrow_mut();
        state.faces.remove(&(family.to_string(), weight));
        state.log.push(format!("delete {family}"));
    }

    fn rename_face(
        &mut self,
        family: &str,
        weight: u16,
        new_family: &str,
    ) -> Result<(), FontError> {
        let mut state = self.state.borrow_mut();
        let data = state
            .faces
            .remove(&(family.to_string(), weight))
            .ok_or(FontError::CorruptFont("renaming a face that is not installed"))?;
        state.faces.insert((new_family.to_string(), weight), data);
        state.log.push(format!("rename {family} -> {new_family}"));
        Ok(())
    }

    fn preload(&mut self, family: &str, weight: u16) -> Result<(), FontError> {
        let mut state = self.state.borrow_mut();
        if !state.faces.contains_key(&(family.to_string(), weight)) {
            return Err(FontError::CorruptFont("preloading a face that is not installed"));
        }
        state.log.push(format!("preload {family}"));
        Ok(())
    }
}
