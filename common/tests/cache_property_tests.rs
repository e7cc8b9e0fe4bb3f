// Property-based tests for the content-addressed cache fingerprint.

use common::cache::fingerprint;
use proptest::prelude::*;

/// Fingerprinting the same parts twice always produces the same digest.
#[test]
fn fingerprint_is_deterministic_for_any_input() {
    proptest!(|(parts in proptest::collection::vec("[a-zA-Z0-9:/._-]{0,32}", 0..4))| {
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        prop_assert_eq!(fingerprint(&refs), fingerprint(&refs));
    });
}

/// Splitting a single part into two adjacent parts never collides with the
/// unsplit fingerprint, since parts are separated by a NUL byte internally.
#[test]
fn fingerprint_distinguishes_concatenation_from_split() {
    proptest!(|(a in "[a-zA-Z0-9]{1,16}", b in "[a-zA-Z0-9]{1,16}")| {
        let joined = format!("{a}{b}");
        prop_assert_ne!(fingerprint(&[&joined]), fingerprint(&[&a, &b]));
    });
}
