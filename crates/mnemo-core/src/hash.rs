//! Content hasher (C2).
//!
//! `content_hash` is the memory's primary key: a deterministic 64-hex
//! SHA-256 over canonicalized content and sorted tags. Two `store()` calls
//! with the same content and tag *set* (any order) must produce the same
//! hash, so dedup works regardless of the order tags were supplied in.

use sha2::{Digest, Sha256};

/// Non-textual separator between the canonicalized content and the joined
/// tag list. `\x1f` (ASCII unit separator) can't appear in normal text, so
/// it can't be forged by crafting content that collides with a tag boundary.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Canonicalize content for hashing: trim trailing whitespace and normalize
/// line endings to `\n`. Leading whitespace and internal spacing are left
/// alone — only trailing-whitespace/line-ending variance is squashed, since
/// that's what differs across editors/copy-paste without changing meaning.
pub fn normalize_content(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    normalized.trim_end().to_string()
}

/// Canonicalize a tag set: dedupe and sort lexicographically. Order in the
/// caller-supplied `tags` never affects identity; [`crate::memory::Memory`]
/// still preserves original order for display.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = tags.to_vec();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Compute the 64-hex `content_hash` for `(content, tags)`.
///
/// Bit-exact definition: `SHA256(normalize(content) || 0x1f || sorted_tags.join(","))`,
/// hex-encoded lowercase. Any reimplementation of this engine's wire format
/// must match this exactly, or cross-backend dedup breaks.
pub fn content_hash(content: &str, tags: &[String]) -> String {
    let normalized_content = normalize_content(content);
    let normalized_tags = normalize_tags(tags).join(",");

    let mut hasher = Sha256::new();
    hasher.update(normalized_content.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(normalized_tags.as_bytes());

    hex::encode(hasher.finalize())
}

/// Length of a full `content_hash`.
pub const HASH_LEN: usize = 64;

/// Minimum accepted length for a hash *prefix* lookup (`get_by_hash` accepts
/// an 8-char prefix per spec §4.3).
pub const MIN_HASH_PREFIX_LEN: usize = 8;

/// Whether `s` looks like a usable hash or hash-prefix lookup key: lowercase
/// hex, between [`MIN_HASH_PREFIX_LEN`] and [`HASH_LEN`] characters.
pub fn is_hash_like(s: &str) -> bool {
    (MIN_HASH_PREFIX_LEN..=HASH_LEN).contains(&s.len())
        && s.chars().all(|c| c.is_ascii_hexdigit())
}
