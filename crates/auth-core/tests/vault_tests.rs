//! Credential vault storage, rotation and audit behaviour

use std::sync::Arc;
use std::time::Duration;

use edgegate_auth_core::vault::{AuditOperation, RandomSecretGenerator};
use edgegate_auth_core::{AuthError, CredentialVault, SecretGenerator, SecretMetadata, VaultConfig};
use zeroize::Zeroizing;

fn config(iterations: u32) -> VaultConfig {
    VaultConfig {
        master_passphrase: "integration-master-passphrase".to_string(),
        kdf_iterations: iterations,
        rotation_check_interval_secs: 1,
        ..Default::default()
    }
}

fn vault() -> Arc<CredentialVault> {
    Arc::new(CredentialVault::new(config(1_000)).unwrap())
}

struct FixedGenerator(&'static str);

impl SecretGenerator for FixedGenerator {
    fn generate(&self, _metadata: &SecretMetadata) -> edgegate_auth_core::Result<Zeroizing<String>> {
        Ok(Zeroizing::new(self.0.to_string()))
    }
}

#[tokio::test]
async fn multi_kilobyte_secret_round_trips() {
    let vault = vault();
    let pem_like: String = (0..8 * 1024)
        .map(|i| char::from(b'A' + (i % 26) as u8))
        .collect::<String>()
        + "\n-----END PRIVATE KEY-----\n";

    let meta = vault.store_secret("origin-tls-key", &pem_like, None).await.unwrap();
    let value = vault.get_secret(&meta.id).await.unwrap();
    assert_eq!(value.as_str(), pem_like);
}

#[tokio::test]
async fn metadata_never_contains_value() {
    let vault = vault();
    vault.store_secret("upstream-a", "value-a-1234", None).await.unwrap();
    vault.store_secret("upstream-b", "value-b-5678", None).await.unwrap();

    let listed = vault.list_secrets();
    assert_eq!(listed.len(), 2);
    let serialized = serde_json::to_string(&listed).unwrap();
    assert!(!serialized.contains("value-a-1234"));
    assert!(!serialized.contains("value-b-5678"));
}

#[tokio::test]
async fn unknown_secret_operations_fail() {
    let vault = vault();
    assert!(matches!(vault.get_secret("nope").await, Err(AuthError::SecretNotFound(_))));
    assert!(matches!(vault.rotate_secret("nope", "x").await, Err(AuthError::SecretNotFound(_))));
    assert!(matches!(vault.delete_secret("nope"), Err(AuthError::SecretNotFound(_))));

    let failures = vault.audit_log().iter().filter(|e| !e.success).count();
    assert_eq!(failures, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reads_continue_during_rotation() {
    // Slow enough that reads overlap the rotation's key derivation
    let vault = Arc::new(CredentialVault::new(config(50_000)).unwrap());
    let meta = vault.store_secret("upstream", "old-value", None).await.unwrap();

    let rotating = {
        let vault = Arc::clone(&vault);
        let id = meta.id.clone();
        tokio::spawn(async move { vault.rotate_secret(&id, "new-value").await })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let vault = Arc::clone(&vault);
        let id = meta.id.clone();
        readers.push(tokio::spawn(async move { vault.get_secret(&id).await }));
    }

    for reader in readers {
        let value = reader.await.unwrap().unwrap();
        assert!(value.as_str() == "old-value" || value.as_str() == "new-value");
    }
    let rotated = rotating.await.unwrap().unwrap();
    assert_eq!(rotated.version, 2);
    assert_eq!(vault.get_secret(&meta.id).await.unwrap().as_str(), "new-value");
}

#[tokio::test]
async fn rotation_task_rotates_due_secrets() {
    let vault = vault();
    let due = vault.store_secret("due", "initial", Some(Duration::ZERO)).await.unwrap();
    let later = vault
        .store_secret("later", "initial", Some(Duration::from_secs(3600)))
        .await
        .unwrap();

    let handle = vault.start_rotation(Arc::new(FixedGenerator("generated-value")));
    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.stop().await;

    assert_eq!(vault.get_secret(&due.id).await.unwrap().as_str(), "generated-value");
    assert!(vault.secret_metadata(&due.id).unwrap().version >= 2);
    assert_eq!(vault.get_secret(&later.id).await.unwrap().as_str(), "initial");
    assert_eq!(vault.secret_metadata(&later.id).unwrap().version, 1);

    assert!(vault
        .audit_log()
        .iter()
        .any(|e| e.operation == AuditOperation::Rotate && e.secret_id == due.id && e.success));
}

#[tokio::test]
async fn detached_rotation_task_keeps_running() {
    let vault = vault();
    drop(vault.start_rotation(Arc::new(FixedGenerator("rotated"))));

    // Stored after the first pass, so only a later tick can rotate it
    tokio::time::sleep(Duration::from_millis(200)).await;
    let due = vault.store_secret("due", "initial", Some(Duration::ZERO)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(vault.get_secret(&due.id).await.unwrap().as_str(), "rotated");
}

#[tokio::test]
async fn rotate_due_with_random_generator() {
    let vault = vault();
    let due = vault.store_secret("due", "initial", Some(Duration::ZERO)).await.unwrap();

    let rotated = edgegate_auth_core::vault::rotation::rotate_due_secrets(&vault, &RandomSecretGenerator).await;
    assert_eq!(rotated, 1);

    let value = vault.get_secret(&due.id).await.unwrap();
    assert_ne!(value.as_str(), "initial");
    assert_eq!(value.len(), 64);
}

#[tokio::test]
async fn audit_log_is_bounded() {
    let vault = CredentialVault::new(VaultConfig {
        max_audit_entries: 5,
        ..config(1_000)
    })
    .unwrap();
    let meta = vault.store_secret("s", "v", None).await.unwrap();
    for _ in 0..10 {
        vault.get_secret(&meta.id).await.unwrap();
    }

    let log = vault.audit_log();
    assert_eq!(log.len(), 5);
    assert!(log.iter().all(|e| e.operation == AuditOperation::Read));
}
