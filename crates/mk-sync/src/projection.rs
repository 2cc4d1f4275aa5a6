//! Maps raw post documents to the `Post` view model.

use chrono::{DateTime, Utc};
use mk_core::{fields, Document, Identity, Post, Reply};
use serde_json::Value;
use tracing::debug;

/// Projects a post document as seen by `identity`.
///
/// Missing fields get defaults: empty content, an empty reply list, and
/// "now" for a timestamp the store has not assigned yet.
pub fn project_post(doc: &Document, identity: &Identity) -> Post {
    let content = doc
        .get(fields::CONTENT)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let timestamp = doc
        .get(fields::TIMESTAMP)
        .and_then(Value::as_i64)
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    let liked_by = doc
        .get(fields::LIKED_BY)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let liked = liked_by
        .iter()
        .any(|token| token.as_str() == Some(identity.token()));

    let replies = doc
        .get(fields::REPLIES)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match serde_json::from_value::<Reply>(item.clone()) {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        debug!(post = %doc.id, error = %e, "skipping malformed reply");
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Post {
        id: doc.id.clone(),
        content,
        timestamp,
        likes: liked_by.len(),
        liked,
        replies,
    }
}
