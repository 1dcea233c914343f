//! Schema version hashing.

use sha2::{Digest, Sha256};

/// Hashes the field schema of an entity type + bundle.
///
/// The hash is order-insensitive over the field set: two sites configured
/// with the same fields produce the same version regardless of declaration
/// order. Any added or removed field changes the version, which forces
/// `update → create` reclassification on the next transfer instead of a
/// blind overwrite.
pub fn schema_version(entity_type: &str, bundle: &str, field_names: &[&str]) -> String {
    let mut sorted: Vec<&str> = field_names.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(entity_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(bundle.as_bytes());
    for field in &sorted {
        hasher.update([0u8]);
        hasher.update(field.as_bytes());
    }

    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
