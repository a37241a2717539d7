//! Utility functions for identifiers and hashing

use bech32::Bech32m;
use uuid7::uuid7;

pub const DRAFT_HRP: &str = "draft_";
pub const SUBMISSION_HRP: &str = "sub_";
pub const UPLOAD_HRP: &str = "upload_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Time-ordered id for a stored row. The prefixes above are valid hrps, so the
/// plain uuid fallback is never hit in practice.
pub fn new_row_id(hrp: &'static str) -> String {
    new_uuid_to_bech32(hrp).unwrap_or_else(|_| format!("{hrp}{}", uuid7()))
}

/// Identity of an upload's content as seen by the metadata store.
pub fn content_hash(category: &str, object_key: &str, size: u64, storage_ref: &str) -> String {
    sha256::digest(format!("{category}\n{object_key}\n{size}\n{storage_ref}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_ids_carry_prefix_and_are_unique() {
        let a = new_row_id(DRAFT_HRP);
        let b = new_row_id(DRAFT_HRP);
        assert!(a.starts_with("draft_1"));
        assert_ne!(a, b);
        assert!(new_row_id(SUBMISSION_HRP).starts_with("sub_1"));
    }

    #[test]
    fn content_hash_depends_on_every_field() {
        let base = content_hash("evidence", "a.pdf", 10, "s3://b/a.pdf");
        assert_eq!(base, content_hash("evidence", "a.pdf", 10, "s3://b/a.pdf"));
        assert_ne!(base, content_hash("evidence", "a.pdf", 11, "s3://b/a.pdf"));
        assert_ne!(base, content_hash("other", "a.pdf", 10, "s3://b/a.pdf"));
    }
}
