//! Cache key computation.

use std::fmt;

use crate::config::{NormalizedConfig, TransformConfig};
use crate::entry::SCHEMA_VERSION;
use crate::transform::TransformerIdentity;
use crate::CacheError;

/// Domain separator fed to the hasher before any input field.
const KEY_DOMAIN: &[u8] = b"kura-cache-key/v1";

/// Length of a key in bytes.
pub const KEY_LEN: usize = 32;

/// Opaque fixed-length digest identifying one
/// (configuration, identifier, source, environment) tuple.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; KEY_LEN]);

impl CacheKey {
    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Returns the lowercase hex encoding used for file names and database keys.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// Parses a hex-encoded key.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != KEY_LEN * 2 {
            return None;
        }
        blake3::Hash::from_hex(hex)
            .ok()
            .map(|hash| Self(*hash.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

/// Computes cache keys.
///
/// Key computation is pure: it performs no I/O and touches no shared state.
/// Every field is length-prefixed before hashing, so moving bytes from one
/// field to its neighbour always changes the key.
pub struct Fingerprinter;

impl Fingerprinter {
    /// Computes the key for an already normalized configuration.
    ///
    /// Fields are combined in a fixed order: configuration, identifier,
    /// source, environment discriminator.
    pub fn compute_key(
        source: &[u8],
        config: &NormalizedConfig,
        identifier: &str,
        env_discriminator: &str,
    ) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(KEY_DOMAIN);
        for field in [
            config.as_bytes(),
            identifier.as_bytes(),
            source,
            env_discriminator.as_bytes(),
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        CacheKey(*hasher.finalize().as_bytes())
    }

    /// Normalizes `config` and computes the key.
    ///
    /// Fails with [`CacheError::ConfigNotHashable`] if the configuration
    /// references a plugin without a declared identity.
    pub fn key_for(
        source: &[u8],
        config: &TransformConfig,
        identifier: &str,
        env_discriminator: &str,
    ) -> Result<CacheKey, CacheError> {
        let normalized = config.normalize()?;
        Ok(Self::compute_key(
            source,
            &normalized,
            identifier,
            env_discriminator,
        ))
    }

    /// Derives the default cache identifier.
    ///
    /// The identifier is `kura/<schema>;<transformer>@<version>;` followed by
    /// the sorted set of preset and plugin identities, each terminated by `;`.
    /// Supplying `cacheIdentifier` replaces it entirely.
    pub fn default_identifier(
        transformer: &TransformerIdentity,
        config: &TransformConfig,
    ) -> Result<String, CacheError> {
        let mut identifier = format!(
            "kura/{};{}@{};",
            SCHEMA_VERSION, transformer.name, transformer.version
        );
        for identity in config.plugin_identities()? {
            identifier.push_str(&identity);
            identifier.push(';');
        }
        Ok(identifier)
    }

    /// Returns the environment discriminator for `config`.
    ///
    /// Empty unless the configuration is environment-sensitive.
    pub fn env_discriminator(config: &TransformConfig, env_name: &str) -> String {
        if config.env_sensitive {
            format!(
                "env={};caller={}",
                env_name,
                config.caller.as_deref().unwrap_or_default()
            )
        } else {
            String::new()
        }
    }
}
