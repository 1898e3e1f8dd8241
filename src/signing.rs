//! Plugin signing and verification using a host-held shared secret.

use std::path::Path;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::{HostError, HostResult};

type HmacSha256 = Hmac<Sha256>;

/// Verifies plugin signatures against a single shared HMAC key.
pub struct SignatureManager {
    key: Vec<u8>,
    require_signatures: bool,
}

impl SignatureManager {
    pub fn new(key: Vec<u8>, require_signatures: bool) -> Self {
        Self {
            key,
            require_signatures,
        }
    }

    /// Verifies the `.sig` sidecar next to `plugin_dir`'s manifest, if present.
    ///
    /// `manifest_path` and `plugin_dir` together determine the canonical byte
    /// sequence that was signed: the raw manifest bytes, followed by the
    /// SHA-256 hash of every `.rs` file under `plugin_dir` sorted by relative
    /// path, each hash prefixed by its path's UTF-8 bytes.
    pub async fn verify_plugin(&self, manifest_path: &Path, plugin_dir: &Path) -> HostResult<()> {
        let sig_path = manifest_path.with_extension("sig");

        if !sig_path.exists() {
            if self.require_signatures {
                return Err(HostError::Signature {
                    id: plugin_dir.display().to_string(),
                    reason: "signature file not found".to_string(),
                });
            }
            tracing::warn!(plugin = %plugin_dir.display(), "no signature present; continuing unsigned");
            return Ok(());
        }

        let sig_data = fs::read_to_string(&sig_path).await?;
        let signature: PluginSignature = serde_json::from_str(&sig_data).map_err(|e| {
            HostError::Signature {
                id: plugin_dir.display().to_string(),
                reason: format!("invalid signature file: {}", e),
            }
        })?;

        let canonical = canonicalize(manifest_path, plugin_dir)?;
        self.verify_signature(&canonical, &signature, plugin_dir)
    }

    pub fn verify_signature(
        &self,
        canonical_bytes: &[u8],
        signature: &PluginSignature,
        plugin_id: &Path,
    ) -> HostResult<()> {
        let mut mac = HmacSha256::new_from_slice(&self.key)?;
        mac.update(canonical_bytes);

        mac.verify_slice(&signature.signature).map_err(|_| HostError::Signature {
            id: plugin_id.display().to_string(),
            reason: "signature verification failed".to_string(),
        })?;

        let hash = calculate_hash(canonical_bytes);
        if hash != signature.hash {
            return Err(HostError::Signature {
                id: plugin_id.display().to_string(),
                reason: "content hash mismatch".to_string(),
            });
        }

        Ok(())
    }
}

/// Produces signatures over a plugin's manifest + source tree.
pub struct PluginSigner {
    key: Vec<u8>,
}

impl PluginSigner {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    pub async fn sign_plugin(
        &self,
        manifest_path: &Path,
        plugin_dir: &Path,
    ) -> HostResult<PluginSignature> {
        let canonical = canonicalize(manifest_path, plugin_dir)?;

        let mut mac = HmacSha256::new_from_slice(&self.key)?;
        mac.update(&canonical);
        let tag = mac.finalize().into_bytes();

        let signature = PluginSignature {
            version: 1,
            algorithm: "hmac-sha256".to_string(),
            hash: calculate_hash(&canonical),
            signature: tag.into(),
            metadata: SignatureMetadata {
                signed_at: chrono::Utc::now(),
            },
        };

        let sig_path = manifest_path.with_extension("sig");
        let sig_json = serde_json::to_string_pretty(&signature)?;
        fs::write(&sig_path, sig_json).await?;

        tracing::info!(path = %sig_path.display(), "plugin signed");
        Ok(signature)
    }
}

fn calculate_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Builds the exact byte sequence that gets signed/verified: raw manifest
/// bytes, then each source file's relative path and SHA-256 digest, sorted
/// by path for determinism.
fn canonicalize(manifest_path: &Path, plugin_dir: &Path) -> HostResult<Vec<u8>> {
    let mut buf = std::fs::read(manifest_path)?;

    let mut files = Vec::new();
    let mut stack = vec![plugin_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                files.push(path);
            }
        }
    }
    files.sort();

    for file in files {
        let relative = file
            .strip_prefix(plugin_dir)
            .unwrap_or(&file)
            .to_string_lossy()
            .into_owned();
        let contents = std::fs::read(&file)?;
        let digest = calculate_hash(&contents);

        buf.extend_from_slice(relative.as_bytes());
        buf.extend_from_slice(&digest);
    }

    Ok(buf)
}

/// Signature sidecar persisted alongside a plugin's manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSignature {
    pub version: u32,
    pub algorithm: String,
    #[serde(with = "hex_serde")]
    pub hash: [u8; 32],
    #[serde(with = "hex_serde")]
    pub signature: [u8; 32],
    pub metadata: SignatureMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureMetadata {
    pub signed_at: chrono::DateTime<chrono::Utc>,
}

mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;

        if bytes.len() != N {
            return Err(serde::de::Error::custom(format!(
                "expected {} bytes, got {}",
                N,
                bytes.len()
            )));
        }

        let mut array = [0u8; N];
        array.copy_from_slice(&bytes);
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plugin(dir: &Path) {
        std::fs::write(dir.join("plugin.toml"), "name = \"x\"\n").unwrap();
        std::fs::write(dir.join("lib.rs"), "pub fn noop() {}").unwrap();
    }

    #[tokio::test]
    async fn sign_then_verify_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path());
        let manifest_path = dir.path().join("plugin.toml");

        let signer = PluginSigner::new(b"test-secret-key".to_vec());
        signer
            .sign_plugin(&manifest_path, dir.path())
            .await
            .unwrap();

        let manager = SignatureManager::new(b"test-secret-key".to_vec(), true);
        manager
            .verify_plugin(&manifest_path, dir.path())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_key_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path());
        let manifest_path = dir.path().join("plugin.toml");

        let signer = PluginSigner::new(b"key-a".to_vec());
        signer
            .sign_plugin(&manifest_path, dir.path())
            .await
            .unwrap();

        let manager = SignatureManager::new(b"key-b".to_vec(), true);
        let result = manager.verify_plugin(&manifest_path, dir.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_signature_fails_when_required() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path());
        let manifest_path = dir.path().join("plugin.toml");

        let manager = SignatureManager::new(b"key".to_vec(), true);
        let result = manager.verify_plugin(&manifest_path, dir.path()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_signature_is_allowed_when_not_required() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path());
        let manifest_path = dir.path().join("plugin.toml");

        let manager = SignatureManager::new(b"key".to_vec(), false);
        manager
            .verify_plugin(&manifest_path, dir.path())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tampered_source_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path());
        let manifest_path = dir.path().join("plugin.toml");

        let signer = PluginSigner::new(b"test-secret-key".to_vec());
        signer
            .sign_plugin(&manifest_path, dir.path())
            .await
            .unwrap();

        std::fs::write(dir.path().join("lib.rs"), "pub fn noop() { /* tampered */ }").unwrap();

        let manager = SignatureManager::new(b"test-secret-key".to_vec(), true);
        let result = manager.verify_plugin(&manifest_path, dir.path()).await;
        assert!(result.is_err());
    }
}
