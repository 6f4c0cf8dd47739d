use sha2::{Digest, Sha256};

/// Checksummed cache entry bound to the key it was stored under.
///
/// The checksum covers both the key and the payload, so an entry copied under a different
/// place id fails validation just like a modified payload does.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatedCacheEntry {
    /// Cache key (place id) the entry belongs to.
    pub key: String,
    /// Cached JSON payload.
    pub data: String,
    /// Hex SHA-256 of `key` and `data`.
    pub checksum: String,
}

impl ValidatedCacheEntry {
    pub fn new(key: impl Into<String>, data: String) -> Self {
        let key = key.into();
        let checksum = Self::compute_checksum(&key, &data);
        Self {
            key,
            data,
            checksum,
        }
    }

    fn compute_checksum(key: &str, data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid_for(&self, key: &str) -> bool {
        self.key == key && Self::compute_checksum(&self.key, &self.data) == self.checksum
    }

    pub fn serialize(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Payload of `serialized` if it parses and validates for `key`.
    pub fn deserialize_and_validate(serialized: &str, key: &str) -> Option<String> {
        let entry: ValidatedCacheEntry = serde_json::from_str(serialized).ok()?;

        if entry.is_valid_for(key) {
            Some(entry.data)
        } else {
            tracing::warn!(
                "Cache validation failed for key '{}' (stored under '{}', {} bytes)",
                key,
                entry.key,
                entry.data.len()
            );
            None
        }
    }
}

/// SHA-256 hex digest of a bearer token; sessions are stored by hash only.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_for_same_key() {
        let entry = ValidatedCacheEntry::new("place-1", r#"{"title":"Cafe"}"#.to_string());
        let restored = ValidatedCacheEntry::deserialize_and_validate(&entry.serialize(), "place-1");
        assert_eq!(restored.as_deref(), Some(r#"{"title":"Cafe"}"#));
    }

    #[test]
    fn test_entry_rejected_under_other_key() {
        let entry = ValidatedCacheEntry::new("place-1", "{}".to_string());
        assert!(ValidatedCacheEntry::deserialize_and_validate(&entry.serialize(), "place-2").is_none());
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let entry = ValidatedCacheEntry::new("place-1", r#"{"phone":"555"}"#.to_string());
        let tampered = entry.serialize().replace("555", "666");
        assert!(ValidatedCacheEntry::deserialize_and_validate(&tampered, "place-1").is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ValidatedCacheEntry::deserialize_and_validate("not json", "place-1").is_none());
    }

    #[test]
    fn test_hash_token_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 64);
    }
}
