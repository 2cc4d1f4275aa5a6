//! Client-generated reply ids.

use mk_core::random_base36;

pub const REPLY_ID_LEN: usize = 6;

/// A 6-character lowercase base-36 reply id. Uniqueness is not checked;
/// replies are addressed by their position in the post.
pub fn generate_reply_id() -> String {
    random_base36(REPLY_ID_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_ids_are_six_lowercase_alphanumerics() {
        let id = generate_reply_id();
        assert_eq!(id.len(), REPLY_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
