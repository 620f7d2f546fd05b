use thiserror::Error;

/// Contract violations reported by `ReferenceEntry`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    /// `mark_loaded` ran a second time for the same entry.
    #[error("entry `{key}` was already marked loaded")]
    AlreadyLoaded { key: String },
    /// `acquire` ran against an entry whose last hold was already released.
    #[error("entry `{key}` was already unloaded")]
    Unloaded { key: String },
    /// The completion signal of a pending acquire was dropped unresolved.
    #[error("pending acquire of `{key}` lost its completion signal")]
    Abandoned { key: String },
}

/// Negative lookup result of `ReferenceRegistry::try_get`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NotFound;
