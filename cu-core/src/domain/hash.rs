use sha2::{Digest, Sha256};

use super::message::ScheduledMessage;

/// Hex-encoded SHA-256, the content hash used for memory snapshots and
/// checkpoint verification.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap());
        out.push(char::from_digit((b & 0xf) as u32, 16).unwrap());
    }
    out
}

/// Dedup identity for cranked messages. Two deliveries of the same pushed
/// message through different assignments hash identically: the fields the
/// forwarding hop cannot change are covered, the scheduler envelope
/// (ordinate, epoch, nonce, assignment id) is not.
pub fn deep_hash(process_id: &str, message: &ScheduledMessage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(process_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(message.owner.as_bytes());
    hasher.update([0x1f]);
    if let Some(data) = &message.data {
        hasher.update(data.as_bytes());
    }
    hasher.update([0x1f]);
    for tag in &message.tags {
        hasher.update(tag.name.as_bytes());
        hasher.update([0x1e]);
        hasher.update(tag.value.as_bytes());
        hasher.update([0x1e]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push(char::from_digit((b >> 4) as u32, 16).unwrap());
        out.push(char::from_digit((b & 0xf) as u32, 16).unwrap());
    }
    out
}
