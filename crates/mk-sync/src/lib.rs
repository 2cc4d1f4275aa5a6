//! # mk-sync
//!
//! The space directory and the post feed synchronizer: everything the UI
//! layer calls, expressed against the `DocumentStore` port.

pub mod directory;
pub mod feed;
pub mod ids;
pub mod projection;

pub use directory::SpaceDirectory;
pub use feed::{FeedSubscription, PostFeed, PostStream};
pub use ids::generate_reply_id;
pub use projection::project_post;

use mk_core::{CollectionPath, SpaceCode};

/// `spaces`, holding one presence marker per created space.
pub fn spaces_collection() -> CollectionPath {
    CollectionPath::new("spaces")
}

/// `spaces/{code}/posts`
pub fn posts_collection(space: &SpaceCode) -> CollectionPath {
    CollectionPath::new(format!("spaces/{space}/posts"))
}
