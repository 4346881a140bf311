//! Error taxonomy for incremental font loading.

use crate::persist::Slot;

/// An error raised while loading, patching or persisting an incremental font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontError {
    /// The base font (or a table inside it) failed a structural check.
    ///
    /// Fatal for the affected font: the manager enters `Failed` and stops
    /// accepting work for it.
    CorruptFont(&'static str),
    /// The run length encoded base payload is malformed.
    CorruptRle(&'static str),
    /// A persistent slot that was expected to hold data is empty.
    ///
    /// Recoverable: the manager falls back to fetching from the backend.
    PersistMiss(Slot),
    /// The persistent store failed to read or write.
    ///
    /// Recoverable: dirty flags stay set so a later persist retries.
    PersistIo(&'static str),
    /// A backend request was rejected or failed.
    ///
    /// Recoverable: no state was updated, so the next load retries.
    Backend(&'static str),
}

impl std::fmt::Display for FontError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FontError::CorruptFont(msg) => write!(f, "corrupt font: {msg}"),
            FontError::CorruptRle(msg) => write!(f, "corrupt rle stream: {msg}"),
            FontError::PersistMiss(slot) => write!(f, "persistent slot {slot:?} is empty"),
            FontError::PersistIo(msg) => write!(f, "persistent store failure: {msg}"),
            FontError::Backend(msg) => write!(f, "backend request failed: {msg}"),
        }
    }
}

impl std::error::Error for FontError {}

impl FontError {
    /// Whether this error permanently fails the font it was raised for.
    ///
    /// Non-fatal errors leave the manager operational; the failed step is
    /// observed by the next one in the chain instead of poisoning it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FontError::CorruptFont(_) | FontError::CorruptRle(_))
    }
}
