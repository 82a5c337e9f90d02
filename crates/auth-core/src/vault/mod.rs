//! Credential vault
//!
//! Long-lived service secrets (upstream API keys and the like) are kept
//! encrypted in memory. Each secret is sealed with AES-256-GCM under a key
//! derived from the master passphrase with its own salt, so reads and
//! rotations pay one PBKDF2 derivation each. Derivation and encryption run on
//! the blocking pool; the registry lock only guards the record swap, so a
//! rotation in progress never blocks readers of the current version.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

pub mod audit;
pub mod crypto;
pub mod rotation;

pub use audit::{AuditEntry, AuditLog, AuditOperation};
pub use crypto::SealedSecret;
pub use rotation::{RandomSecretGenerator, RotationHandle, SecretGenerator};

/// Shortest accepted master passphrase, in bytes
pub const MIN_PASSPHRASE_LEN: usize = 16;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub master_passphrase: String,
    pub kdf_iterations: u32,
    /// Default interval for secrets stored without one
    pub rotation_interval_secs: u64,
    /// How often the rotation task looks for due secrets
    pub rotation_check_interval_secs: u64,
    pub max_audit_entries: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_passphrase: String::new(),
            kdf_iterations: 600_000,
            rotation_interval_secs: 86_400,
            rotation_check_interval_secs: 60,
            max_audit_entries: 10_000,
        }
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("master_passphrase", &"<redacted>")
            .field("kdf_iterations", &self.kdf_iterations)
            .field("rotation_interval_secs", &self.rotation_interval_secs)
            .field("rotation_check_interval_secs", &self.rotation_check_interval_secs)
            .field("max_audit_entries", &self.max_audit_entries)
            .finish()
    }
}

/// Everything about a secret except its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub rotation_interval_secs: u64,
    pub next_rotation: DateTime<Utc>,
}

impl SecretMetadata {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_rotation <= now
    }
}

struct SecretRecord {
    metadata: SecretMetadata,
    sealed: SealedSecret,
}

pub struct CredentialVault {
    passphrase: Arc<Zeroizing<Vec<u8>>>,
    iterations: NonZeroU32,
    default_rotation: Duration,
    check_interval: Duration,
    secrets: RwLock<HashMap<String, Arc<SecretRecord>>>,
    audit: AuditLog,
}

fn next_rotation(from: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| from.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl CredentialVault {
    pub fn new(config: VaultConfig) -> Result<Self> {
        if config.master_passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(AuthError::ConfigError(format!(
                "vault master passphrase must be at least {} bytes",
                MIN_PASSPHRASE_LEN
            )));
        }
        let iterations = NonZeroU32::new(config.kdf_iterations)
            .ok_or_else(|| AuthError::ConfigError("kdf_iterations must be greater than zero".to_string()))?;

        Ok(Self {
            passphrase: Arc::new(Zeroizing::new(config.master_passphrase.as_bytes().to_vec())),
            iterations,
            default_rotation: Duration::from_secs(config.rotation_interval_secs),
            check_interval: Duration::from_secs(config.rotation_check_interval_secs.max(1)),
            secrets: RwLock::new(HashMap::new()),
            audit: AuditLog::new(config.max_audit_entries),
        })
    }

    async fn seal(&self, secret_id: &str, value: &str) -> Result<SealedSecret> {
        let passphrase = Arc::clone(&self.passphrase);
        let iterations = self.iterations;
        let aad = secret_id.as_bytes().to_vec();
        let value = Zeroizing::new(value.as_bytes().to_vec());
        tokio::task::spawn_blocking(move || crypto::seal(&passphrase, iterations, &aad, &value))
            .await
            .map_err(|e| AuthError::InternalError(format!("encryption task failed: {}", e)))?
    }

    async fn open(&self, record: Arc<SecretRecord>) -> Result<Zeroizing<String>> {
        let passphrase = Arc::clone(&self.passphrase);
        let bytes = tokio::task::spawn_blocking(move || {
            crypto::open(&passphrase, record.metadata.id.as_bytes(), &record.sealed)
        })
        .await
        .map_err(|e| AuthError::InternalError(format!("decryption task failed: {}", e)))??;

        let text = std::str::from_utf8(&bytes)
            .map_err(|_| AuthError::DecryptionFailed("secret is not valid UTF-8".to_string()))?;
        Ok(Zeroizing::new(text.to_string()))
    }

    fn record(&self, secret_id: &str) -> Option<Arc<SecretRecord>> {
        self.secrets.read().get(secret_id).cloned()
    }

    fn audit_result<T>(&self, operation: AuditOperation, secret_id: &str, result: &Result<T>) {
        match result {
            Ok(_) => self.audit.record(operation, secret_id, true, None),
            Err(e) => self.audit.record(operation, secret_id, false, Some(e.to_string())),
        }
    }

    /// Encrypt and store a new secret
    pub async fn store_secret(
        &self,
        name: &str,
        value: &str,
        rotation_interval: Option<Duration>,
    ) -> Result<SecretMetadata> {
        let id = Uuid::new_v4().to_string();
        let result = self.store_inner(&id, name, value, rotation_interval).await;
        self.audit_result(AuditOperation::Create, &id, &result);
        result
    }

    async fn store_inner(
        &self,
        id: &str,
        name: &str,
        value: &str,
        rotation_interval: Option<Duration>,
    ) -> Result<SecretMetadata> {
        if name.is_empty() {
            return Err(AuthError::InvalidRequest("secret name must not be empty".to_string()));
        }
        let sealed = self.seal(id, value).await?;

        let interval = rotation_interval.unwrap_or(self.default_rotation);
        let now = Utc::now();
        let metadata = SecretMetadata {
            id: id.to_string(),
            name: name.to_string(),
            version: 1,
            created_at: now,
            rotated_at: None,
            rotation_interval_secs: interval.as_secs(),
            next_rotation: next_rotation(now, interval),
        };

        self.secrets.write().insert(
            id.to_string(),
            Arc::new(SecretRecord {
                metadata: metadata.clone(),
                sealed,
            }),
        );
        info!(secret_id = %id, name = %name, "Secret stored");
        Ok(metadata)
    }

    /// Decrypt the current version of a secret
    pub async fn get_secret(&self, secret_id: &str) -> Result<Zeroizing<String>> {
        let result = match self.record(secret_id) {
            Some(record) => self.open(record).await,
            None => Err(AuthError::SecretNotFound(secret_id.to_string())),
        };
        self.audit_result(AuditOperation::Read, secret_id, &result);
        result
    }

    /// Replace a secret's value; readers keep seeing the previous version until the swap.
    pub async fn rotate_secret(&self, secret_id: &str, new_value: &str) -> Result<SecretMetadata> {
        let result = self.rotate_inner(secret_id, new_value).await;
        self.audit_result(AuditOperation::Rotate, secret_id, &result);
        result
    }

    async fn rotate_inner(&self, secret_id: &str, new_value: &str) -> Result<SecretMetadata> {
        if self.record(secret_id).is_none() {
            return Err(AuthError::SecretNotFound(secret_id.to_string()));
        }

        let sealed = self.seal(secret_id, new_value).await?;

        let mut secrets = self.secrets.write();
        // Deleted while the new value was being sealed
        let current = secrets
            .get(secret_id)
            .ok_or_else(|| AuthError::SecretNotFound(secret_id.to_string()))?;

        let now = Utc::now();
        let mut metadata = current.metadata.clone();
        metadata.version += 1;
        metadata.rotated_at = Some(now);
        metadata.next_rotation = next_rotation(now, Duration::from_secs(metadata.rotation_interval_secs));

        secrets.insert(
            secret_id.to_string(),
            Arc::new(SecretRecord {
                metadata: metadata.clone(),
                sealed,
            }),
        );
        drop(secrets);

        info!(secret_id = %secret_id, version = metadata.version, "Secret rotated");
        Ok(metadata)
    }

    pub fn delete_secret(&self, secret_id: &str) -> Result<()> {
        let result = match self.secrets.write().remove(secret_id) {
            Some(_) => Ok(()),
            None => Err(AuthError::SecretNotFound(secret_id.to_string())),
        };
        self.audit_result(AuditOperation::Delete, secret_id, &result);
        if result.is_ok() {
            info!(secret_id = %secret_id, "Secret deleted");
        }
        result
    }

    /// Metadata of every stored secret, oldest first
    pub fn list_secrets(&self) -> Vec<SecretMetadata> {
        let mut list: Vec<SecretMetadata> = self
            .secrets
            .read()
            .values()
            .map(|record| record.metadata.clone())
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn secret_metadata(&self, secret_id: &str) -> Option<SecretMetadata> {
        self.record(secret_id).map(|record| record.metadata.clone())
    }

    pub fn secrets_due_for_rotation(&self) -> Vec<SecretMetadata> {
        let now = Utc::now();
        let due: Vec<SecretMetadata> = self
            .list_secrets()
            .into_iter()
            .filter(|metadata| metadata.is_due(now))
            .collect();
        debug!(count = due.len(), "Secrets due for rotation");
        due
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.entries()
    }

    /// Spawn the periodic rotation task. Must be called within a tokio runtime.
    pub fn start_rotation(self: &Arc<Self>, generator: Arc<dyn SecretGenerator>) -> RotationHandle {
        rotation::spawn(Arc::clone(self), generator, self.check_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> CredentialVault {
        CredentialVault::new(VaultConfig {
            master_passphrase: "unit-test-master-passphrase".into(),
            kdf_iterations: 1_000,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_passphrase_length_enforced() {
        let err = CredentialVault::new(VaultConfig {
            master_passphrase: "short".into(),
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, AuthError::ConfigError(_)));
    }

    #[test]
    fn test_debug_redacts_passphrase() {
        let config = VaultConfig {
            master_passphrase: "super-secret-passphrase".into(),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[tokio::test]
    async fn test_store_get_delete() {
        let vault = vault();
        let meta = vault.store_secret("upstream", "sk-live-123", None).await.unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.rotation_interval_secs, 86_400);
        assert_eq!(vault.get_secret(&meta.id).await.unwrap().as_str(), "sk-live-123");

        vault.delete_secret(&meta.id).unwrap();
        let err = vault.get_secret(&meta.id).await.unwrap_err();
        assert_eq!(err.to_string(), format!("Secret {} not found", meta.id));
    }

    #[tokio::test]
    async fn test_rotate_bumps_version() {
        let vault = vault();
        let meta = vault.store_secret("upstream", "v1", None).await.unwrap();
        let rotated = vault.rotate_secret(&meta.id, "v2").await.unwrap();
        assert_eq!(rotated.version, 2);
        assert!(rotated.rotated_at.is_some());
        assert_eq!(vault.get_secret(&meta.id).await.unwrap().as_str(), "v2");
    }

    #[tokio::test]
    async fn test_due_for_rotation() {
        let vault = vault();
        let due = vault.store_secret("due", "a", Some(Duration::ZERO)).await.unwrap();
        vault.store_secret("later", "b", Some(Duration::from_secs(3600))).await.unwrap();

        let ids: Vec<String> = vault.secrets_due_for_rotation().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![due.id]);
    }

    #[tokio::test]
    async fn test_audit_trail() {
        let vault = vault();
        let meta = vault.store_secret("upstream", "v1", None).await.unwrap();
        vault.get_secret(&meta.id).await.unwrap();
        vault.rotate_secret(&meta.id, "v2").await.unwrap();
        vault.delete_secret(&meta.id).unwrap();
        assert!(vault.delete_secret(&meta.id).is_err());

        let ops: Vec<(AuditOperation, bool)> = vault.audit_log().iter().map(|e| (e.operation, e.success)).collect();
        assert_eq!(
            ops,
            vec![
                (AuditOperation::Create, true),
                (AuditOperation::Read, true),
                (AuditOperation::Rotate, true),
                (AuditOperation::Delete, true),
                (AuditOperation::Delete, false),
            ]
        );
    }
}
