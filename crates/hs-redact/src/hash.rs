//! Content hashing for redaction tokens.
//!
//! A token is the lowercase hex digest of the raw bytes of the redacted
//! value, optionally trimmed to a prefix. Plain SHA-256/SHA-512 give tokens
//! that are comparable across machines; HMAC-SHA256 with a local key stops
//! dictionary attacks on short values such as usernames or hostnames.

use crate::error::{RedactionError, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;

/// Key file schema version.
pub const KEY_SCHEMA_VERSION: &str = "1.0.0";

type HmacSha256 = Hmac<Sha256>;

/// Digest algorithm used to build tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    Sha512,
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
}

impl HashAlgorithm {
    /// Length of the untrimmed hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::HmacSha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// Returns whether the algorithm needs key material.
    pub fn is_keyed(&self) -> bool {
        matches!(self, HashAlgorithm::HmacSha256)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::HmacSha256 => "hmac-sha256",
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = RedactionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            "hmac-sha256" | "hmac" => Ok(HashAlgorithm::HmacSha256),
            other => Err(RedactionError::config(format!(
                "unsupported hash algorithm '{}' (expected sha256, sha512 or hmac-sha256)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Number of hex characters kept from each digest. Zero keeps the full digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrimLength(usize);

impl TrimLength {
    /// Full-length digests.
    pub const FULL: TrimLength = TrimLength(0);

    pub fn new(chars: usize) -> Self {
        TrimLength(chars)
    }

    /// Build from a signed value as given on a command line.
    pub fn from_signed(value: i64) -> Result<Self> {
        if value < 0 {
            return Err(RedactionError::config(format!(
                "trim length must not be negative, got {}",
                value
            )));
        }
        usize::try_from(value)
            .map(TrimLength)
            .map_err(|_| RedactionError::config(format!("trim length {} is too large", value)))
    }

    pub fn chars(&self) -> usize {
        self.0
    }

    pub fn is_full(&self) -> bool {
        self.0 == 0
    }
}

impl std::str::FromStr for TrimLength {
    type Err = RedactionError;

    fn from_str(s: &str) -> Result<Self> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| RedactionError::config(format!("invalid trim length '{}'", s)))?;
        TrimLength::from_signed(value)
    }
}

impl std::fmt::Display for TrimLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Algorithm and trim length for one output artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashConfig {
    pub algorithm: HashAlgorithm,
    pub trim: TrimLength,
}

impl HashConfig {
    pub fn new(algorithm: HashAlgorithm, trim: TrimLength) -> Self {
        Self { algorithm, trim }
    }

    /// Check the trim length against the algorithm's digest length.
    pub fn validate(&self) -> Result<()> {
        if self.trim.chars() > self.algorithm.hex_len() {
            return Err(RedactionError::config(format!(
                "trim length {} exceeds the {} hex digest length of {}",
                self.trim,
                self.algorithm.hex_len(),
                self.algorithm
            )));
        }
        Ok(())
    }

    /// Length of every token produced under this configuration.
    pub fn token_len(&self) -> usize {
        if self.trim.is_full() {
            self.algorithm.hex_len()
        } else {
            self.trim.chars()
        }
    }
}

/// Produces redaction tokens for one configuration.
#[derive(Clone)]
pub struct Hasher {
    config: HashConfig,
    mac: Option<HmacSha256>,
}

impl Hasher {
    /// Build a hasher, validating the configuration.
    ///
    /// Keyed algorithms require key material; unkeyed ones ignore it.
    pub fn new(config: HashConfig, key: Option<&KeyMaterial>) -> Result<Self> {
        config.validate()?;
        let mac = if config.algorithm.is_keyed() {
            let key = key.ok_or_else(|| {
                RedactionError::Key(format!("{} requires a key file", config.algorithm))
            })?;
            Some(
                HmacSha256::new_from_slice(&key.key)
                    .map_err(|e| RedactionError::Key(format!("invalid hmac key: {}", e)))?,
            )
        } else {
            None
        };
        Ok(Self { config, mac })
    }

    pub fn config(&self) -> HashConfig {
        self.config
    }

    /// Hash raw bytes into a token.
    pub fn token(&self, value: &[u8]) -> String {
        let hex = match (&self.config.algorithm, &self.mac) {
            (HashAlgorithm::HmacSha256, Some(mac)) => {
                let mut mac = mac.clone();
                mac.update(value);
                hex::encode(mac.finalize().into_bytes())
            }
            (HashAlgorithm::Sha512, _) => hex::encode(Sha512::digest(value)),
            _ => hex::encode(Sha256::digest(value)),
        };
        trim_hex(hex, self.config.trim)
    }
}

fn trim_hex(mut hex: String, trim: TrimLength) -> String {
    if !trim.is_full() && trim.chars() < hex.len() {
        hex.truncate(trim.chars());
    }
    hex
}

/// Key material for HMAC-SHA256.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; 32],
    /// Key identifier within the key file.
    pub key_id: String,
}

impl KeyMaterial {
    /// Create new key material with a random key.
    pub fn generate(key_id: &str) -> Result<Self> {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key)
            .map_err(|e| RedactionError::Key(format!("failed to generate random key: {}", e)))?;
        Ok(Self {
            key,
            key_id: key_id.to_string(),
        })
    }

    /// Create key material from raw bytes.
    pub fn from_bytes(key: [u8; 32], key_id: &str) -> Self {
        Self {
            key,
            key_id: key_id.to_string(),
        }
    }

    /// Create key material from a base64-encoded string.
    pub fn from_base64(encoded: &str, key_id: &str) -> Result<Self> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RedactionError::Key(format!("invalid base64: {}", e)))?;

        if decoded.len() != 32 {
            return Err(RedactionError::Key(format!(
                "key must be 32 bytes, got {}",
                decoded.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(Self {
            key,
            key_id: key_id.to_string(),
        })
    }

    /// Export key material as base64.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.key)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// On-disk key file.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyManager {
    pub schema_version: String,
    pub keys: std::collections::BTreeMap<String, KeyEntry>,
    pub active_key_id: String,
}

/// Entry in the key file.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyEntry {
    pub created_at: String,
    /// Always hmac-sha256.
    pub algorithm: String,
    /// Base64-encoded key material.
    pub key_material: String,
}

impl KeyManager {
    /// Create a key manager holding one fresh key.
    pub fn generate() -> Result<Self> {
        let key = KeyMaterial::generate("k1")?;
        let mut keys = std::collections::BTreeMap::new();
        keys.insert(
            key.key_id.clone(),
            KeyEntry {
                created_at: chrono::Utc::now().to_rfc3339(),
                algorithm: HashAlgorithm::HmacSha256.as_str().to_string(),
                key_material: key.to_base64(),
            },
        );
        Ok(Self {
            schema_version: KEY_SCHEMA_VERSION.to_string(),
            keys,
            active_key_id: key.key_id,
        })
    }

    /// Load a key file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manager: KeyManager = serde_json::from_str(&content)?;
        Ok(manager)
    }

    /// Save the key file, readable by the owner only.
    ///
    /// Refuses to overwrite an existing file: replacing a key silently
    /// breaks correlation with previously sanitized artifacts.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        #[cfg(not(unix))]
        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
            file.write_all(content.as_bytes())?;
        }

        Ok(())
    }

    /// Get the active key material.
    pub fn active_key(&self) -> Result<KeyMaterial> {
        let entry = self.keys.get(&self.active_key_id).ok_or_else(|| {
            RedactionError::Key(format!("active key '{}' not found", self.active_key_id))
        })?;

        KeyMaterial::from_base64(&entry.key_material, &self.active_key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha256(trim: usize) -> Hasher {
        Hasher::new(
            HashConfig::new(HashAlgorithm::Sha256, TrimLength::new(trim)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_known_sha256_digest() {
        assert_eq!(
            sha256(0).token(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_value_hashes_to_empty_digest() {
        let token = sha256(0).token(b"");
        assert_eq!(
            token,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_trim_is_prefix() {
        let full = sha256(0).token(b"SECRET123");
        let trimmed = sha256(12).token(b"SECRET123");
        assert_eq!(trimmed.len(), 12);
        assert_eq!(trimmed, full[..12]);
    }

    #[test]
    fn test_trim_exceeding_digest_rejected() {
        let config = HashConfig::new(HashAlgorithm::Sha256, TrimLength::new(65));
        assert!(config.validate().is_err());
        let config = HashConfig::new(HashAlgorithm::Sha512, TrimLength::new(65));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_trim_rejected() {
        assert!(TrimLength::from_signed(-1).is_err());
        assert!("-12".parse::<TrimLength>().is_err());
        assert_eq!("12".parse::<TrimLength>().unwrap(), TrimLength::new(12));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!(
            "hmac-sha256".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::HmacSha256
        );
        assert!("md5".parse::<HashAlgorithm>().is_err());
        assert!("sha1".parse::<HashAlgorithm>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_hmac_requires_key() {
        let config = HashConfig::new(HashAlgorithm::HmacSha256, TrimLength::FULL);
        assert!(matches!(
            Hasher::new(config, None),
            Err(RedactionError::Key(_))
        ));
    }

    #[test]
    fn test_different_keys_different_tokens() {
        let config = HashConfig::new(HashAlgorithm::HmacSha256, TrimLength::FULL);
        let k1 = KeyMaterial::from_bytes([0u8; 32], "k1");
        let k2 = KeyMaterial::from_bytes([1u8; 32], "k2");
        let h1 = Hasher::new(config, Some(&k1)).unwrap();
        let h2 = Hasher::new(config, Some(&k2)).unwrap();
        assert_eq!(h1.token(b"alice"), h1.token(b"alice"));
        assert_ne!(h1.token(b"alice"), h2.token(b"alice"));
        assert_ne!(h1.token(b"alice"), sha256(0).token(b"alice"));
    }

    #[test]
    fn test_key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        let manager = KeyManager::generate().unwrap();
        manager.save(&path).unwrap();
        let loaded = KeyManager::load(&path).unwrap();
        assert_eq!(loaded.active_key_id, "k1");
        assert_eq!(
            loaded.active_key().unwrap().to_base64(),
            manager.active_key().unwrap().to_base64()
        );
        // Existing key files are never overwritten.
        assert!(manager.save(&path).is_err());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let key = KeyMaterial::from_bytes([7u8; 32], "k1");
        let shown = format!("{:?}", key);
        assert!(shown.contains("k1"));
        assert!(!shown.contains(&key.to_base64()));
    }
}
