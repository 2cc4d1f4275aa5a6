//! # Domain Models
//!
//! These structs represent the core entities of Mask: spaces, the identity
//! that likes posts, and the post/reply view models handed to the UI.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Field names of a post document as persisted in the store.
pub mod fields {
    pub const CONTENT: &str = "content";
    pub const TIMESTAMP: &str = "timestamp";
    pub const LIKED_BY: &str = "likedBy";
    pub const REPLIES: &str = "replies";
    pub const CREATED_AT: &str = "createdAt";
}

/// Token of the single anonymous identity every action is attributed to.
pub const ANONYMOUS_TOKEN: &str = "anon";

/// Longest code accepted from user input.
const MAX_CODE_LEN: usize = 64;

/// Length of generated space codes.
pub const SPACE_CODE_LEN: usize = 8;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random lowercase base-36 string. Guessable; not for secrets.
pub fn random_base36(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect()
}

/// The short uppercase code a space is identified and shared by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SpaceCode(String);

impl SpaceCode {
    /// Normalizes raw user input (trimmed, upper-cased) into a code.
    ///
    /// Only structural problems are rejected here; whether the space
    /// exists is the directory's call.
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(AppError::validation("space code is empty"));
        }
        if code.len() > MAX_CODE_LEN {
            return Err(AppError::validation("space code is too long"));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AppError::validation(format!(
                "space code {code:?} may only contain letters and digits"
            )));
        }
        Ok(Self(code))
    }

    /// A fresh 8-character code, e.g. `AB3DK9Q2`. Collisions are not
    /// checked.
    pub fn generate() -> Self {
        Self(random_base36(SPACE_CODE_LEN).to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Link other participants open to land in this space,
    /// e.g. `https://mask.example?space=AB3DK9Q2`.
    pub fn share_url(&self, origin: &str) -> String {
        format!("{}?space={}", origin.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for SpaceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who likes are attributed to. Only the anonymous identity exists today.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS_TOKEN.to_string())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// A message attached to a post. Stored inline in the post's `replies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub content: String,
    /// Client-side creation time, persisted as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// The view of a post document as seen by one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Number of identities in `likedBy`
    pub likes: usize,
    /// Whether the viewing identity is in `likedBy`
    pub liked: bool,
    pub replies: Vec<Reply>,
}
