//! Content fingerprints for conversation snapshots.
//!
//! A fingerprint is the first 64 bits of a SHA-256 over a length-prefixed,
//! order-preserving encoding of `(role, content)` pairs, rendered as 16 hex
//! characters. Collisions are possible in principle and are not treated as
//! a correctness concern anywhere in the crate.

use sha2::{Digest, Sha256};
use shared_types::Message;

const FINGERPRINT_BYTES: usize = 8;

/// Deterministic identity of a snapshot's content.
pub fn fingerprint(messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((messages.len() as u64).to_le_bytes());
    for message in messages {
        let role = message.role.as_str().as_bytes();
        hasher.update([role.len() as u8]);
        hasher.update(role);
        hasher.update((message.content.len() as u64).to_le_bytes());
        hasher.update(message.content.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<Message> {
        vec![Message::user("hi"), Message::assistant("hello")]
    }

    #[test]
    fn test_fingerprint_is_repeatable() {
        assert_eq!(fingerprint(&snapshot()), fingerprint(&snapshot()));
        assert_eq!(fingerprint(&snapshot()).len(), 16);
    }

    #[test]
    fn test_fingerprint_changes_with_content_role_and_order() {
        let base = fingerprint(&snapshot());

        let edited = vec![Message::user("hi"), Message::assistant("hello!")];
        assert_ne!(base, fingerprint(&edited));

        let swapped_roles = vec![Message::assistant("hi"), Message::user("hello")];
        assert_ne!(base, fingerprint(&swapped_roles));

        let reordered = vec![Message::assistant("hello"), Message::user("hi")];
        assert_ne!(base, fingerprint(&reordered));

        let mut appended = snapshot();
        appended.push(Message::user("more"));
        appended.push(Message::assistant("ok"));
        assert_ne!(base, fingerprint(&appended));
    }

    #[test]
    fn test_fingerprint_is_not_fooled_by_content_boundaries() {
        let a = vec![Message::user("ab"), Message::user("c")];
        let b = vec![Message::user("a"), Message::user("bc")];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprints_differ_across_a_corpus() {
        let mut seen = std::collections::HashSet::new();
        let mut messages = Vec::new();
        for turn in 0..200 {
            messages.push(Message::user(format!("question {turn}")));
            messages.push(Message::assistant(format!("answer {turn}")));
            seen.insert(fingerprint(&messages));
        }
        assert_eq!(seen.len(), 200);
    }
}
