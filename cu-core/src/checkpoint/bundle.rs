use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::domain::{sha256_hex, EvalCursor, Tag};
use crate::gateway::{DataItem, SignedDataItem};

use super::{CheckpointError, Result};

/// Signing seam. The wallet format and signature scheme live outside the
/// core; the unit only needs an address for `healthcheck` and a signature
/// over the data item digest.
pub trait DataItemSigner: Send + Sync {
    fn address(&self) -> String;
    fn sign(&self, digest: &[u8]) -> std::result::Result<Vec<u8>, String>;
}

/// Assemble the unsigned checkpoint data item: the raw memory as payload,
/// the evaluation position and content hash as tags. Tag order is part of
/// the signed material and must stay stable.
pub fn build_checkpoint_item(
    cursor: &EvalCursor,
    module_id: &str,
    content_hash: &str,
    memory: Vec<u8>,
) -> DataItem {
    let mut tags = vec![
        Tag::new("Type", "Checkpoint"),
        Tag::new("Data-Protocol", "ao"),
        Tag::new("Process", cursor.process_id.clone()),
        Tag::new("Module", module_id),
        Tag::new("Ordinate", cursor.ordinate.as_str()),
        Tag::new("Timestamp", cursor.timestamp.to_string()),
        Tag::new("Block-Height", cursor.block_height.to_string()),
        Tag::new("Epoch", cursor.epoch.to_string()),
        Tag::new("Nonce", cursor.nonce.to_string()),
        Tag::new("Content-Hash", content_hash),
    ];
    if let Some(cron) = &cursor.cron {
        tags.push(Tag::new("Cron", cron.clone()));
    }
    DataItem { data: memory, tags }
}

/// Sign a data item. The signed digest covers payload and tag list; the
/// item id is derived from the signature, which is what makes the upload
/// content-addressed.
pub fn sign_data_item(signer: &dyn DataItemSigner, item: DataItem) -> Result<SignedDataItem> {
    let mut hasher = Sha256::new();
    hasher.update(&item.data);
    for tag in &item.tags {
        hasher.update(tag.name.as_bytes());
        hasher.update([0x1e]);
        hasher.update(tag.value.as_bytes());
        hasher.update([0x1e]);
    }
    let digest = hasher.finalize();
    let signature = signer.sign(&digest).map_err(CheckpointError::Signing)?;
    let id = sha256_hex(&signature);
    Ok(SignedDataItem {
        id,
        owner: signer.address(),
        signature: BASE64.encode(&signature),
        tags: item.tags,
        data: BASE64.encode(&item.data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Ordinate;

    struct StubSigner;

    impl DataItemSigner for StubSigner {
        fn address(&self) -> String {
            "unit-wallet".to_string()
        }

        fn sign(&self, digest: &[u8]) -> std::result::Result<Vec<u8>, String> {
            Ok(digest.to_vec())
        }
    }

    #[test]
    fn checkpoint_item_carries_position_tags() {
        let mut cursor = EvalCursor::cold_start("p1");
        cursor.ordinate = Ordinate::new("42");
        cursor.timestamp = 1700;
        cursor.block_height = 9;
        let item = build_checkpoint_item(&cursor, "m1", "beef", vec![1, 2, 3]);
        let get = |name: &str| {
            item.tags
                .iter()
                .find(|t| t.name == name)
                .map(|t| t.value.clone())
        };
        assert_eq!(get("Type").as_deref(), Some("Checkpoint"));
        assert_eq!(get("Process").as_deref(), Some("p1"));
        assert_eq!(get("Ordinate").as_deref(), Some("42"));
        assert_eq!(get("Content-Hash").as_deref(), Some("beef"));
        assert_eq!(get("Cron"), None);
    }

    #[test]
    fn signing_is_deterministic_and_id_derives_from_signature() {
        let cursor = EvalCursor::cold_start("p1");
        let item = build_checkpoint_item(&cursor, "m1", "beef", vec![7; 16]);
        let a = sign_data_item(&StubSigner, item.clone()).unwrap();
        let b = sign_data_item(&StubSigner, item).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.owner, "unit-wallet");
        assert_eq!(a.id, sha256_hex(&BASE64.decode(&a.signature).unwrap()));
    }
}
