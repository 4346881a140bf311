//! The style sheet collaborator that makes patched bytes visible.
//!
//! Rewriting the live `@font-face` rule would stall rendering while the new
//! bytes are re-checked and rasterized, blanking already drawn text. The
//! manager therefore installs every update under a temporary family first,
//! preloads it so the bytes are accepted and rasterized, and only then swaps
//! it in under the real name. The binder exposes the primitive rule
//! operations; the swap choreography lives in the manager.

use crate::error::FontError;

/// Prefix for the temporary family used during a two stage swap.
pub const TMP_FAMILY_PREFIX: &str = "tmp-";

/// Style sheet and font face operations, supplied by the embedder.
///
/// All calls happen on the font's single logical task. `define_face` and
/// `preload` surface sanitizer rejection as [`FontError::CorruptFont`].
pub trait FontFaceBinder {
    /// Set the CSS visibility of the elements classed for `family`.
    fn set_class_visibility(&mut self, family: &str, visible: bool);

    /// Install (or replace) a `@font-face` rule for `family`/`weight`
    /// pointing at `data`.
    fn define_face(&mut self, family: &str, weight: u16, data: &[u8]) -> Result<(), FontError>;

    /// Remove any `@font-face` rule for `family`/`weight`. Removing a rule
    /// that does not exist is a no-op.
    fn delete_face(&mut self, family: &str, weight: u16);

    /// Rename an installed rule's family, keeping its data.
    fn rename_face(
        &mut self,
        family: &str,
        weight: u16,
        new_family: &str,
    ) -> Result<(), FontError>;

    /// Synchronously lay out a short string in `family` so the face is
    /// parsed and rasterized before it goes live.
    fn preload(&mut self, family: &str, weight: u16) -> Result<(), FontError>;
}
