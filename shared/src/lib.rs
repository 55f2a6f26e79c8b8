pub mod canonical;
pub mod error;
pub mod hash;
pub mod types;

pub use canonical::{Canonical, CanonicalValue};
pub use error::HashFormatError;
pub use hash::Hash256;
pub use types::{ArtifactId, BlockIndex, CaseId, ContentHash};
