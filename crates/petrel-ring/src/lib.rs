//! Ring accessor: partition-of-key lookup and device placement.
//!
//! The proxy core only ever *reads* a ring: given an (account, container,
//! object) key it needs the partition, the ordered primary devices for that
//! partition, and a lazy stream of additional (handoff) devices to try when
//! a primary fails. Ring construction and rebalancing live outside the core;
//! [`StaticRing`] is the immutable snapshot form the daemon builds from
//! configuration.

mod ring;

pub use ring::{Handoffs, Ring, StaticRing};

/// Hash an object path the way the backend servers do.
///
/// The digest input is `{prefix}/{account}[/{container}[/{object}]]{suffix}`;
/// the result is the first 16 bytes of the BLAKE3 digest as 32 lowercase hex
/// characters. Nursery entries on disk are named by this string, and its
/// first 8 hex characters are the 32-bit prefix partitions derive from.
pub fn object_hash(
    hash_prefix: &str,
    account: &str,
    container: &str,
    object: &str,
    hash_suffix: &str,
) -> String {
    let digest = path_digest(hash_prefix, account, container, object, hash_suffix);
    let mut out = String::with_capacity(32);
    for byte in &digest.as_bytes()[..16] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// The 32-bit big-endian prefix of the object-path digest.
///
/// Equal to the first 8 hex characters of [`object_hash`] parsed as an
/// integer, so placement computed from a key and placement computed from an
/// on-disk hash name always agree.
pub fn hash_prefix(
    hash_prefix: &str,
    account: &str,
    container: &str,
    object: &str,
    hash_suffix: &str,
) -> u32 {
    let digest = path_digest(hash_prefix, account, container, object, hash_suffix);
    let bytes: [u8; 4] = digest.as_bytes()[..4].try_into().expect("4 bytes");
    u32::from_be_bytes(bytes)
}

fn path_digest(
    prefix: &str,
    account: &str,
    container: &str,
    object: &str,
    suffix: &str,
) -> blake3::Hash {
    let mut path = String::with_capacity(
        prefix.len() + account.len() + container.len() + object.len() + suffix.len() + 3,
    );
    path.push_str(prefix);
    path.push('/');
    path.push_str(account);
    if !container.is_empty() {
        path.push('/');
        path.push_str(container);
        if !object.is_empty() {
            path.push('/');
            path.push_str(object);
        }
    }
    path.push_str(suffix);
    blake3::hash(path.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_hash_deterministic() {
        let a = object_hash("prefix", "AUTH_test", "photos", "cat.jpg", "suffix");
        let b = object_hash("prefix", "AUTH_test", "photos", "cat.jpg", "suffix");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_object_hash_differs_by_component() {
        let base = object_hash("p", "a", "c", "o", "s");
        assert_ne!(base, object_hash("p", "a2", "c", "o", "s"));
        assert_ne!(base, object_hash("p", "a", "c2", "o", "s"));
        assert_ne!(base, object_hash("p", "a", "c", "o2", "s"));
        assert_ne!(base, object_hash("p2", "a", "c", "o", "s"));
        assert_ne!(base, object_hash("p", "a", "c", "o", "s2"));
    }

    #[test]
    fn test_hash_prefix_matches_hash_string() {
        let hash = object_hash("p", "acct", "cont", "obj", "s");
        let parsed = u32::from_str_radix(&hash[..8], 16).unwrap();
        assert_eq!(parsed, hash_prefix("p", "acct", "cont", "obj", "s"));
    }

    #[test]
    fn test_account_only_path_ignores_empty_tail() {
        // An empty container must not be distinguishable from a missing one.
        let with_empty = object_hash("p", "acct", "", "", "s");
        let explicit = object_hash("p", "acct", "", "", "s");
        assert_eq!(with_empty, explicit);
    }
}
