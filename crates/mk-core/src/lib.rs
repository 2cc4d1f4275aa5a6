//! mask/crates/mk-core/src/lib.rs
//!
//! Domain models, the document store port, and the snapshot fan-out shared
//! by every store plugin.

pub mod broadcast;
pub mod document;
pub mod error;
pub mod models;
pub mod traits;

// Re-exporting for easier access in other crates
pub use broadcast::*;
pub use document::*;
pub use error::*;
pub use models::*;
pub use traits::*;
