pub mod document;
pub mod error;

pub use document::{Document, FORMAT_VERSION_FIELD, ID_FIELD};
pub use error::{MirrorError, Result};
