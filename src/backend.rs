//! The backend service that supplies base fonts and glyph bundles.

use crate::error::FontError;

/// Identity of one font the engine manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontInfo {
    /// Storage key; also names the persistent database.
    pub name: String,
    /// CSS family the font is installed under.
    pub family_name: String,
    pub weight: u16,
}

impl FontInfo {
    pub fn new(name: &str, family_name: &str, weight: u16) -> Self {
        FontInfo {
            name: name.to_string(),
            family_name: family_name.to_string(),
            weight,
        }
    }
}

/// Transport to the font server.
///
/// Implementations own retries and timeouts; the engine treats any error as
/// [`FontError::Backend`] and leaves its own state untouched so the request
/// can be reissued.
pub trait BackendService {
    /// Fetch the preprocessed base: header prefix plus RLE encoded body.
    fn request_font_base(&mut self, font: &FontInfo) -> Result<Vec<u8>, FontError>;

    /// Fetch a glyph bundle covering `code_points`.
    ///
    /// Callers keep requests within the configured size limit; the response
    /// is the raw bundle wire format.
    fn request_code_points(
        &mut self,
        font: &FontInfo,
        code_points: &[u32],
    ) -> Result<Vec<u8>, FontError>;
}
