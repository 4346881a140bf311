//! The per font facade.
//!
//! A [`FontManager`] owns one base buffer and everything that may touch it:
//! character loads, persistence, and font face installs. The original design
//! for this kind of engine chains deferred computations off shared tail
//! pointers; here the same ordering guarantees come from an explicit FIFO
//! task queue plus two timer deadlines, all driven from [`FontManager::pump`]
//! on a single logical task. Between `pump` calls nothing runs, so state
//! transitions are atomic.
//!
//! Ordering guarantees:
//! - character loads run strictly one at a time, in submission order;
//! - persistence reads the base only between tasks, never mid injection;
//! - a font face install uses a snapshot of the base taken at entry, so a
//!   later load cannot tear it.

use std::collections::{BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use read_fonts::collections::IntSet;

use crate::backend::{BackendService, FontInfo};
use crate::base_header::{parse_base_header, FileInfo};
use crate::bundle::GlyphBundle;
use crate::cmap::{self, CmapMapping};
use crate::error::FontError;
use crate::font_face::{FontFaceBinder, TMP_FAMILY_PREFIX};
use crate::inject::inject_glyph_bundle;
use crate::persist::{
    decode_char_list, encode_char_list, store_name, PersistentStore, Slot, SCHEMA_VERSION,
};
use crate::rle::expand_base;
use crate::sanitize::sanitize_base;

/// Engine time, in milliseconds. The embedder supplies the clock.
pub type Millis = u64;

/// Delay between a mutation and the persist that writes it out.
pub const PERSIST_TIMEOUT: Millis = 1000;

/// Requests smaller than this get padded with spurious code points.
pub const MINIMUM_NON_OBFUSCATION_LENGTH: usize = 20;

/// Width of the window spurious code points are drawn from.
pub const OBFUSCATION_RANGE: u32 = 256;

/// Initial CSS visibility of the font's class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Knobs accepted at manager creation.
#[derive(Debug, Clone)]
pub struct FontManagerOptions {
    pub visibility: Visibility,
    /// Upper bound on how long text may stay hidden, in milliseconds.
    pub max_visibility_timeout: Millis,
    /// Maximum code points per backend request.
    pub req_size: usize,
    /// When false, the persistent store is never touched.
    pub persist_data: bool,
}

impl Default for FontManagerOptions {
    fn default() -> Self {
        FontManagerOptions {
            visibility: Visibility::Hidden,
            max_visibility_timeout: 3000,
            req_size: 2200,
            persist_data: true,
        }
    }
}

/// Lifecycle of a managed font.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Created; the persistent store has not been opened yet.
    Opening,
    /// Store open, base being brought into memory.
    Loading,
    /// Base in memory; character loads are accepted.
    Ready,
    /// Unrecoverable error; only the visibility guard still runs.
    Failed,
}

#[derive(Debug, Default)]
struct PersistState {
    base_dirty: bool,
    char_list_dirty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    LoadChars,
    SetFont,
}

/// The per font facade over base, store, backend and style sheet.
pub struct FontManager {
    font: FontInfo,
    options: FontManagerOptions,
    store: Box<dyn PersistentStore>,
    backend: Box<dyn BackendService>,
    binder: Box<dyn FontFaceBinder>,
    rng: StdRng,

    state: ManagerState,
    base: Option<Vec<u8>>,
    file_info: Option<FileInfo>,
    mapping: CmapMapping,
    /// Code points whose glyphs are known present in the base. Superset of
    /// everything ever injected; the dedup source for future requests.
    char_list: IntSet<u32>,
    chars_to_load: BTreeSet<u32>,

    persist_state: PersistState,
    tasks: VecDeque<Task>,
    visibility_deadline: Option<Millis>,
    persist_deadline: Option<Millis>,
    need_to_set_font: bool,
    visible: bool,
    last_error: Option<FontError>,
}

impl FontManager {
    /// Create a manager for `font`.
    ///
    /// Installs the configured class visibility immediately and, when
    /// hidden, arms the timer that unconditionally reveals text after
    /// `max_visibility_timeout` regardless of loading progress.
    pub fn new(
        font: FontInfo,
        options: FontManagerOptions,
        store: Box<dyn PersistentStore>,
        backend: Box<dyn BackendService>,
        mut binder: Box<dyn FontFaceBinder>,
        now: Millis,
    ) -> Self {
        let visible = options.visibility == Visibility::Visible;
        binder.set_class_visibility(&font.family_name, visible);
        let visibility_deadline = (!visible).then(|| now + options.max_visibility_timeout);
        FontManager {
            font,
            options,
            store,
            backend,
            binder,
            rng: StdRng::from_entropy(),
            state: ManagerState::Opening,
            base: None,
            file_info: None,
            mapping: CmapMapping::default(),
            char_list: IntSet::empty(),
            chars_to_load: BTreeSet::new(),
            persist_state: PersistState::default(),
            tasks: VecDeque::new(),
            visibility_deadline,
            persist_deadline: None,
            need_to_set_font: false,
            visible,
            last_error: None,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn base_bytes(&self) -> Option<&[u8]> {
        self.base.as_deref()
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        self.file_info.as_ref()
    }

    pub fn mapping(&self) -> &CmapMapping {
        &self.mapping
    }

    pub fn char_list(&self) -> &IntSet<u32> {
        &self.char_list
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The most recent recoverable failure, if any.
    pub fn last_error(&self) -> Option<&FontError> {
        self.last_error.as_ref()
    }

    /// Make the obfuscation draw deterministic (for tests and replay).
    pub fn seed_obfuscation(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Bring the base into memory: from the store when present, otherwise
    /// from the backend (expand, sanitize, write cmaps, schedule persist).
    pub fn load(&mut self, now: Millis) -> Result<(), FontError> {
        self.state = ManagerState::Loading;
        match self.try_load(now) {
            Ok(()) => {
                self.state = ManagerState::Ready;
                Ok(())
            }
            Err(err) => {
                if err.is_fatal() {
                    self.fail(err.clone());
                } else {
                    // leave the manager retryable
                    self.state = ManagerState::Opening;
                    self.note_error(err.clone());
                }
                Err(err)
            }
        }
    }

    fn try_load(&mut self, now: Millis) -> Result<(), FontError> {
        let mut stored = None;
        if self.options.persist_data {
            self.store
                .open(&store_name(&self.font.name), SCHEMA_VERSION)?;
            stored = self.store.get(Slot::Base)?;
        }

        let (mut buf, fetched) = match stored {
            Some(bytes) => (bytes, false),
            None => {
                if self.options.persist_data {
                    // recovered by fetching from the backend
                    log::debug!(
                        "font {}: {}",
                        self.font.name,
                        FontError::PersistMiss(Slot::Base)
                    );
                }
                let payload = self.backend.request_font_base(&self.font)?;
                let info = parse_base_header(&payload)?;
                (expand_base(info.header_size as usize, &payload)?, true)
            }
        };

        let info = parse_base_header(&buf)?;
        if fetched {
            sanitize_base(&info, &mut buf)?;
            cmap::write_cmap12(&info, &mut buf)?;
            cmap::write_cmap4(&info, &mut buf)?;
        }
        self.mapping = CmapMapping::from_file_info(&info);

        if self.options.persist_data {
            match self.store.get(Slot::CharList)? {
                Some(blob) => match decode_char_list(&blob) {
                    Ok(chars) => self.char_list = chars,
                    Err(err) => {
                        // an unreadable char list only costs re-requests
                        log::warn!("dropping persisted char list: {err}");
                        self.char_list = IntSet::empty();
                    }
                },
                None => self.char_list = IntSet::empty(),
            }
        }

        self.binder
            .define_face(&self.font.family_name, self.font.weight, &buf)?;
        self.base = Some(buf);
        self.file_info = Some(info);
        self.make_visible();

        if fetched {
            self.persist_delayed(Slot::Base, now);
        }
        log::debug!(
            "font {} loaded ({} persisted chars)",
            self.font.name,
            self.char_list.iter().count()
        );
        Ok(())
    }

    /// Queue characters for loading and schedule a load pass.
    pub fn request_chars(&mut self, chars: impl IntoIterator<Item = u32>) {
        self.chars_to_load.extend(chars);
        if !self.chars_to_load.is_empty() {
            self.tasks.push_back(Task::LoadChars);
        }
    }

    /// Queue every character of `text` for loading.
    pub fn request_text(&mut self, text: &str) {
        self.request_chars(text.chars().map(|c| c as u32));
    }

    /// Mark a slot dirty and arm the delayed persist timer.
    ///
    /// Rapid calls coalesce: the flags are sticky and one firing drains
    /// whatever is dirty at that moment.
    pub fn persist_delayed(&mut self, slot: Slot, now: Millis) {
        match slot {
            Slot::Base => self.persist_state.base_dirty = true,
            Slot::CharList => self.persist_state.char_list_dirty = true,
        }
        self.persist_deadline.get_or_insert(now + PERSIST_TIMEOUT);
    }

    /// Run everything that is due at `now`: the visibility guard, a fired
    /// persist timer, and queued tasks in FIFO order.
    ///
    /// Recoverable failures are logged and recorded ([`Self::last_error`])
    /// without poisoning later tasks; fatal ones move the font to `Failed`
    /// and are returned.
    pub fn pump(&mut self, now: Millis) -> Result<(), FontError> {
        if let Some(deadline) = self.visibility_deadline {
            if now >= deadline {
                self.make_visible();
            }
        }
        if self.state == ManagerState::Failed {
            return Ok(());
        }

        if let Some(deadline) = self.persist_deadline {
            if now >= deadline {
                self.persist_deadline = None;
                if let Err(err) = self.persist() {
                    self.note_error(err);
                }
            }
        }

        while let Some(task) = self.tasks.pop_front() {
            let result = match task {
                Task::LoadChars => self.load_chars(now).map(|_| ()),
                Task::SetFont => self.set_font(),
            };
            if let Err(err) = result {
                if err.is_fatal() {
                    self.fail(err.clone());
                    return Err(err);
                }
                self.note_error(err);
            }
        }
        Ok(())
    }

    /// One serialized character load pass. Returns whether glyphs were
    /// requested and injected.
    fn load_chars(&mut self, now: Millis) -> Result<bool, FontError> {
        if self.state != ManagerState::Ready || self.chars_to_load.is_empty() {
            return Ok(false);
        }

        let requested: Vec<u32> = self.chars_to_load.iter().copied().collect();
        let mut needed: Vec<u32> = Vec::new();
        for code_point in requested {
            if self.char_list.contains(code_point) {
                // already present; nothing left to do for it
                self.chars_to_load.remove(&code_point);
            } else {
                needed.push(code_point);
            }
        }
        if needed.is_empty() {
            return Ok(false);
        }

        let mut needed = obfuscate(needed, &self.char_list, &mut self.rng);
        needed.sort_unstable();

        let request: Vec<u32> = if needed.len() > self.options.req_size {
            // drain the rest on a later pass
            self.tasks.push_back(Task::LoadChars);
            needed.truncate(self.options.req_size);
            needed
        } else {
            needed
        };

        let bundle_bytes = self.backend.request_code_points(&self.font, &request)?;
        // the fetch succeeded; from here on the chars count as present
        for &code_point in &request {
            self.char_list.insert(code_point);
            self.chars_to_load.remove(&code_point);
        }

        let bundle = GlyphBundle::read(&bundle_bytes)?;
        let glyph_to_code = self.mapping.glyphs_for_code_points(request.iter().copied());

        let info = self
            .file_info
            .as_ref()
            .ok_or(FontError::CorruptFont("no base loaded"))?;
        let base = self
            .base
            .as_mut()
            .ok_or(FontError::CorruptFont("no base loaded"))?;
        inject_glyph_bundle(info, base, &bundle, &self.mapping, &glyph_to_code)?;
        log::debug!(
            "font {}: injected {} glyphs for {} code points",
            self.font.name,
            bundle.glyphs.len(),
            request.len()
        );

        if bundle.data_len() > 0 {
            self.need_to_set_font = true;
            self.tasks.push_back(Task::SetFont);
        }
        self.persist_delayed(Slot::Base, now);
        self.persist_delayed(Slot::CharList, now);
        Ok(true)
    }

    /// Write out whatever is dirty. Failed writes re-mark their slot so the
    /// next delayed persist retries.
    fn persist(&mut self) -> Result<(), FontError> {
        if !self.options.persist_data {
            self.persist_state = PersistState::default();
            return Ok(());
        }
        let base_dirty = std::mem::take(&mut self.persist_state.base_dirty);
        let char_list_dirty = std::mem::take(&mut self.persist_state.char_list_dirty);

        if base_dirty {
            if let Some(base) = &self.base {
                if let Err(err) = self.store.put(Slot::Base, base) {
                    self.persist_state.base_dirty = true;
                    return Err(err);
                }
            }
        }
        if char_list_dirty {
            let blob = encode_char_list(&self.char_list);
            if let Err(err) = self.store.put(Slot::CharList, &blob) {
                self.persist_state.char_list_dirty = true;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Swap the current base bytes into the live font face.
    ///
    /// The new bytes go in under a temporary family first and are preloaded
    /// there, so the moment the real family's rule is replaced the renderer
    /// already has rasterized glyphs and text never blanks.
    fn set_font(&mut self) -> Result<(), FontError> {
        if !self.need_to_set_font {
            return Ok(());
        }
        let Some(snapshot) = self.base.clone() else {
            return Ok(());
        };
        self.need_to_set_font = false;

        let tmp_family = format!("{TMP_FAMILY_PREFIX}{}", self.font.family_name);
        self.binder
            .define_face(&tmp_family, self.font.weight, &snapshot)?;
        self.binder.preload(&tmp_family, self.font.weight)?;
        self.binder
            .delete_face(&self.font.family_name, self.font.weight);
        self.binder
            .rename_face(&tmp_family, self.font.weight, &self.font.family_name)?;
        self.make_visible();
        Ok(())
    }

    fn make_visible(&mut self) {
        if !self.visible {
            self.binder
                .set_class_visibility(&self.font.family_name, true);
            self.visible = true;
        }
        self.visibility_deadline = None;
    }

    fn fail(&mut self, err: FontError) {
        log::warn!("font {} failed: {err}", self.font.name);
        self.state = ManagerState::Failed;
        self.tasks.clear();
        self.last_error = Some(err);
        // the visibility deadline stays armed so fallback text appears
    }

    fn note_error(&mut self, err: FontError) {
        log::warn!("font {}: {err}", self.font.name);
        self.last_error = Some(err);
    }
}

/// Pad a small request with spurious code points.
///
/// A passive observer of backend traffic sees which characters a page uses;
/// mixing real requests into a cloud of neighbors from the same
/// [`OBFUSCATION_RANGE`] window hides the text. Requests of at least
/// [`MINIMUM_NON_OBFUSCATION_LENGTH`] code points are left alone, as are
/// code points already in `char_list`.
pub fn obfuscate(needed: Vec<u32>, char_list: &IntSet<u32>, rng: &mut impl Rng) -> Vec<u32> {
    if needed.len() >= MINIMUM_NON_OBFUSCATION_LENGTH {
        return needed;
    }
    let deficit = MINIMUM_NON_OBFUSCATION_LENGTH - needed.len();
    let mut working: BTreeSet<u32> = needed.iter().copied().collect();
    let attempts = 10 * deficit + 100;
    for attempt in 0..attempts {
        if working.len() >= MINIMUM_NON_OBFUSCATION_LENGTH {
            break;
        }
        let center = needed[attempt % needed.len()];
        let low = center.saturating_sub(OBFUSCATION_RANGE / 2);
        let high = center + OBFUSCATION_RANGE / 2;
        let candidate = rng.gen_range(low..=high);
        if !working.contains(&candidate) && !char_list.contains(candidate) {
            working.insert(candidate);
        }
    }
    working.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmap::{lookup_cmap12, lookup_cmap4};
    use crate::test_helpers::{BaseSpec, MockBinder, ScriptedBackend, SharedStore};

    // the fourth char sits outside the obfuscation window of the others
    const CPS: &[(u32, u16)] = &[(0x61, 1), (0x62, 2), (0x63, 3), (0x1000, 4)];

    fn fixture(cps: &[(u32, u16)], num_glyphs: u16) -> (SharedStore, ScriptedBackend, MockBinder) {
        let spec = BaseSpec::ttf(cps, num_glyphs, num_glyphs as usize * 8);
        let backend = ScriptedBackend::new(spec.rle_payload(), cps.to_vec());
        (SharedStore::default(), backend, MockBinder::default())
    }

    fn manager(
        store: &SharedStore,
        backend: &ScriptedBackend,
        binder: &MockBinder,
        options: FontManagerOptions,
    ) -> FontManager {
        let mut mgr = FontManager::new(
            FontInfo::new("TestFont", "Test Family", 400),
            options,
            Box::new(store.clone()),
            Box::new(backend.clone()),
            Box::new(binder.clone()),
            0,
        );
        mgr.seed_obfuscation(7);
        mgr
    }

    #[test]
    fn cold_start_three_ascii_chars() {
        let (store, backend, binder) = fixture(CPS, 8);
        let mut mgr = manager(&store, &backend, &binder, Default::default());

        mgr.load(0).unwrap();
        assert_eq!(mgr.state(), ManagerState::Ready);
        assert_eq!(backend.state().base_requests, 1);

        mgr.request_chars([0x61, 0x62, 0x63]);
        mgr.pump(0).unwrap();

        let requests = backend.state().code_point_requests.clone();
        assert_eq!(requests.len(), 1);
        // obfuscation padded the request but kept the real chars in it
        assert!(requests[0].len() >= MINIMUM_NON_OBFUSCATION_LENGTH);
        for cp in [0x61, 0x62, 0x63] {
            assert!(requests[0].contains(&cp));
            assert!(mgr.char_list().contains(cp));
        }

        let info = mgr.file_info().unwrap().clone();
        let base = mgr.base_bytes().unwrap();
        for &(cp, gid) in &CPS[..3] {
            assert_eq!(lookup_cmap12(&info, base, cp).unwrap(), gid as u32);
            assert_eq!(lookup_cmap4(&info, base, cp as u16).unwrap(), gid);
        }
        crate::validate::check_base(&info, base).unwrap();

        // nothing persisted yet; the delayed persist fires at 1000 ms
        assert!(store.state().puts.is_empty());
        mgr.pump(1000).unwrap();
        let puts = store.state().puts.clone();
        assert_eq!(puts.iter().filter(|s| **s == Slot::Base).count(), 1);
        assert_eq!(puts.iter().filter(|s| **s == Slot::CharList).count(), 1);
    }

    #[test]
    fn warm_start_requests_only_missing_chars() {
        let (store, backend, binder) = fixture(CPS, 8);
        {
            let mut mgr = manager(&store, &backend, &binder, Default::default());
            mgr.load(0).unwrap();
            mgr.request_chars([0x61, 0x62, 0x63]);
            mgr.pump(0).unwrap();
            mgr.pump(1000).unwrap();
        }
        backend.state().code_point_requests.clear();
        backend.state().base_requests = 0;

        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(2000).unwrap();
        // warm start: base came from the store
        assert_eq!(backend.state().base_requests, 0);
        for cp in [0x61, 0x62, 0x63] {
            assert!(mgr.char_list().contains(cp));
        }

        mgr.request_chars([0x61, 0x1000]);
        mgr.pump(2000).unwrap();

        let requests = backend.state().code_point_requests.clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].contains(&0x1000));
        // chars already present are never re-requested, even as padding
        for cp in [0x61, 0x62, 0x63] {
            assert!(!requests[0].contains(&cp));
        }
    }

    #[test]
    fn warm_start_round_trips_state() {
        let (store, backend, binder) = fixture(CPS, 8);
        let (base_before, chars_before) = {
            let mut mgr = manager(&store, &backend, &binder, Default::default());
            mgr.load(0).unwrap();
            mgr.request_chars([0x61, 0x62]);
            mgr.pump(0).unwrap();
            mgr.pump(1000).unwrap();
            (
                mgr.base_bytes().unwrap().to_vec(),
                mgr.char_list().iter().collect::<Vec<_>>(),
            )
        };

        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(5000).unwrap();
        assert_eq!(mgr.base_bytes().unwrap(), base_before.as_slice());
        assert_eq!(mgr.char_list().iter().collect::<Vec<_>>(), chars_before);
    }

    #[test]
    fn oversized_request_is_split() {
        // 20 chars so obfuscation stays out of the way
        let cps: Vec<(u32, u16)> = (0..20).map(|i| (0x30 + i, (i + 1) as u16)).collect();
        let (store, backend, binder) = fixture(&cps, 24);
        let mut mgr = manager(
            &store,
            &backend,
            &binder,
            FontManagerOptions {
                req_size: 18,
                ..Default::default()
            },
        );
        mgr.load(0).unwrap();
        mgr.request_chars(cps.iter().map(|&(cp, _)| cp));
        mgr.pump(0).unwrap();

        let requests = backend.state().code_point_requests.clone();
        assert_eq!(requests.len(), 2);
        // the first batch was at the obfuscation threshold and is exact
        assert_eq!(requests[0], (0x30..0x42).collect::<Vec<u32>>());
        // the remainder is small, so it went out padded
        assert!(requests[1].contains(&0x42) && requests[1].contains(&0x43));
        for cp in &requests[0] {
            assert!(!requests[1].contains(cp));
        }

        let info = mgr.file_info().unwrap().clone();
        let base = mgr.base_bytes().unwrap();
        for &(cp, gid) in &cps {
            assert_eq!(lookup_cmap12(&info, base, cp).unwrap(), gid as u32);
        }
        crate::validate::check_base(&info, base).unwrap();
    }

    #[test]
    fn rapid_persist_requests_coalesce() {
        let (store, backend, binder) = fixture(CPS, 8);
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(0).unwrap();
        mgr.pump(1000).unwrap();
        store.state().puts.clear();

        for now in [0u64, 20, 40, 60, 80] {
            mgr.persist_delayed(Slot::Base, 2000 + now);
        }
        mgr.pump(2900).unwrap();
        assert!(store.state().puts.is_empty());
        mgr.pump(3000).unwrap();
        assert_eq!(store.state().puts.as_slice(), &[Slot::Base]);

        // the timer is single shot; nothing further fires
        mgr.pump(5000).unwrap();
        assert_eq!(store.state().puts.as_slice(), &[Slot::Base]);
    }

    #[test]
    fn backend_failure_leaves_state_retryable() {
        let (store, backend, binder) = fixture(CPS, 8);
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(0).unwrap();

        backend.state().fail_next_bundle = true;
        mgr.request_chars([0x61]);
        mgr.pump(0).unwrap();
        assert!(matches!(mgr.last_error(), Some(FontError::Backend(_))));
        assert!(!mgr.char_list().contains(0x61));
        assert_eq!(mgr.state(), ManagerState::Ready);

        // a second pass reissues the request (padding is drawn fresh)
        mgr.request_chars([] as [u32; 0]);
        mgr.pump(0).unwrap();
        let requests = backend.state().code_point_requests.clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains(&0x61) && requests[1].contains(&0x61));
        assert!(mgr.char_list().contains(0x61));
    }

    #[test]
    fn queued_loads_match_sequential_submission() {
        let run = |batched: bool| -> Vec<u8> {
            let (store, backend, binder) = fixture(CPS, 8);
            let mut mgr = manager(&store, &backend, &binder, Default::default());
            mgr.load(0).unwrap();
            if batched {
                mgr.request_chars([0x61, 0x62]);
                mgr.request_chars([0x63, 0x1000]);
                mgr.pump(0).unwrap();
            } else {
                mgr.request_chars([0x61, 0x62]);
                mgr.pump(0).unwrap();
                mgr.request_chars([0x63, 0x1000]);
                mgr.pump(0).unwrap();
            }
            mgr.base_bytes().unwrap().to_vec()
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn two_stage_swap_preloads_before_replacing() {
        let (store, backend, binder) = fixture(CPS, 8);
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(0).unwrap();
        binder.state().log.clear();

        mgr.request_chars([0x61]);
        mgr.pump(0).unwrap();

        let log = binder.state().log.clone();
        let defined = log
            .iter()
            .position(|e| e == "define tmp-Test Family")
            .unwrap();
        let preloaded = log
            .iter()
            .position(|e| e == "preload tmp-Test Family")
            .unwrap();
        let deleted = log.iter().position(|e| e == "delete Test Family").unwrap();
        let renamed = log
            .iter()
            .position(|e| e == "rename tmp-Test Family -> Test Family")
            .unwrap();
        assert!(defined < preloaded && preloaded < deleted && deleted < renamed);

        // the live face now carries the patched base
        let faces = binder.state().faces.clone();
        assert_eq!(
            faces.get(&("Test Family".to_string(), 400)).unwrap(),
            &mgr.base_bytes().unwrap().to_vec()
        );
        assert!(!faces.contains_key(&("tmp-Test Family".to_string(), 400)));
    }

    #[test]
    fn empty_bundle_skips_the_swap() {
        let (store, backend, binder) = fixture(CPS, 8);
        backend.state().empty_glyphs = true;
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(0).unwrap();
        binder.state().log.clear();

        mgr.request_chars([0x61]);
        mgr.pump(0).unwrap();
        assert!(binder.state().log.is_empty());
    }

    #[test]
    fn visibility_guard_reveals_text_unconditionally() {
        let (store, backend, binder) = fixture(CPS, 8);
        backend.state().fail_next_base = true;
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        assert!(!mgr.is_visible());
        assert_eq!(binder.state().visibility.get("Test Family"), Some(&false));

        assert!(mgr.load(0).is_err());
        mgr.pump(2999).unwrap();
        assert!(!mgr.is_visible());
        mgr.pump(3000).unwrap();
        assert!(mgr.is_visible());
        assert_eq!(binder.state().visibility.get("Test Family"), Some(&true));
    }

    #[test]
    fn successful_load_reveals_text_early() {
        let (store, backend, binder) = fixture(CPS, 8);
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(0).unwrap();
        assert!(mgr.is_visible());
    }

    #[test]
    fn corrupt_base_fails_the_font_but_keeps_the_guard() {
        let (store, backend, binder) = fixture(CPS, 8);
        backend.state().corrupt_base = true;
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        assert!(mgr.load(0).is_err());
        assert_eq!(mgr.state(), ManagerState::Failed);

        mgr.request_chars([0x61]);
        mgr.pump(100).unwrap();
        assert!(backend.state().code_point_requests.is_empty());

        mgr.pump(3000).unwrap();
        assert!(mgr.is_visible());
    }

    #[test]
    fn persist_data_false_never_touches_the_store() {
        let (store, backend, binder) = fixture(CPS, 8);
        let mut mgr = manager(
            &store,
            &backend,
            &binder,
            FontManagerOptions {
                persist_data: false,
                ..Default::default()
            },
        );
        mgr.load(0).unwrap();
        mgr.request_chars([0x61]);
        mgr.pump(0).unwrap();
        mgr.pump(2000).unwrap();
        assert!(store.state().puts.is_empty());
        assert!(store.state().opens.is_empty());
    }

    #[test]
    fn persist_failure_retries_on_next_delayed_persist() {
        let (store, backend, binder) = fixture(CPS, 8);
        let mut mgr = manager(&store, &backend, &binder, Default::default());
        mgr.load(0).unwrap();

        store.state().fail_puts = true;
        mgr.pump(1000).unwrap();
        assert!(matches!(mgr.last_error(), Some(FontError::PersistIo(_))));
        assert!(store.state().puts.is_empty());

        store.state().fail_puts = false;
        mgr.persist_delayed(Slot::CharList, 2000);
        mgr.pump(3000).unwrap();
        // the failed base write retried alongside the char list
        let puts = store.state().puts.clone();
        assert!(puts.contains(&Slot::Base));
        assert!(puts.contains(&Slot::CharList));
    }

    #[test]
    fn obfuscation_pads_small_requests() {
        let mut rng = StdRng::seed_from_u64(42);
        let char_list = IntSet::empty();
        let needed = vec![0x61, 0x62, 0x63];
        let padded = obfuscate(needed.clone(), &char_list, &mut rng);

        assert!(padded.len() >= MINIMUM_NON_OBFUSCATION_LENGTH);
        for cp in needed {
            assert!(padded.contains(&cp));
        }
        let mut sorted = padded.clone();
        sorted.sort_unstable();
        assert_eq!(padded, sorted);
    }

    #[test]
    fn obfuscation_leaves_large_requests_alone() {
        let mut rng = StdRng::seed_from_u64(42);
        let needed: Vec<u32> = (0..MINIMUM_NON_OBFUSCATION_LENGTH as u32).collect();
        assert_eq!(
            obfuscate(needed.clone(), &IntSet::empty(), &mut rng),
            needed
        );
    }

    #[test]
    fn obfuscation_skips_chars_already_present() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut char_list = IntSet::empty();
        for cp in 0..0x200u32 {
            char_list.insert(cp);
        }
        char_list.remove(0x61);
        // every candidate in range is already present; only 0x61 survives
        let padded = obfuscate(vec![0x61], &char_list, &mut rng);
        assert_eq!(padded, vec![0x61]);
    }
}
