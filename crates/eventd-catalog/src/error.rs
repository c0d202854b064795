use eventd_core::EventKey;
use thiserror::Error;

/// Errors from the durable event catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// INSERT with an identity that already exists.
    #[error("Event already exists: {key}")]
    DuplicateName { key: EventKey },

    /// UPDATE/DELETE referencing an identity with no row.
    #[error("Event not found: {key}")]
    NotFound { key: EventKey },

    /// A stored row could not be decoded (bad schedule JSON, bad timestamp).
    #[error("Corrupt catalog row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
