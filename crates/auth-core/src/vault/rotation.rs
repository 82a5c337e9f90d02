//! Scheduled secret rotation

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

use super::{CredentialVault, SecretMetadata};
use crate::error::Result;

/// Produces replacement values for secrets that are due for rotation
pub trait SecretGenerator: Send + Sync {
    fn generate(&self, metadata: &SecretMetadata) -> Result<Zeroizing<String>>;
}

/// 48 random bytes, base64url without padding
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSecretGenerator;

impl SecretGenerator for RandomSecretGenerator {
    fn generate(&self, _metadata: &SecretMetadata) -> Result<Zeroizing<String>> {
        let mut bytes = Zeroizing::new([0u8; 48]);
        OsRng.fill_bytes(&mut bytes[..]);
        Ok(Zeroizing::new(URL_SAFE_NO_PAD.encode(&bytes[..])))
    }
}

/// Handle to a running rotation task.
///
/// Dropping it detaches the task, which keeps rotating until the runtime shuts
/// down. Use [`RotationHandle::stop`] to end it.
pub struct RotationHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    /// Signal the task and wait for it to finish its current pass
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!(error = %e, "Secret rotation task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Rotate every due secret once; returns how many were rotated.
pub async fn rotate_due_secrets(vault: &CredentialVault, generator: &dyn SecretGenerator) -> usize {
    let mut rotated = 0;
    for metadata in vault.secrets_due_for_rotation() {
        let value = match generator.generate(&metadata) {
            Ok(value) => value,
            Err(e) => {
                error!(secret_id = %metadata.id, error = %e, "Secret generation failed");
                continue;
            }
        };
        match vault.rotate_secret(&metadata.id, value.as_str()).await {
            Ok(_) => rotated += 1,
            Err(e) => error!(secret_id = %metadata.id, error = %e, "Automatic secret rotation failed"),
        }
    }
    rotated
}

pub(super) fn spawn(
    vault: Arc<CredentialVault>,
    generator: Arc<dyn SecretGenerator>,
    check_interval: Duration,
) -> RotationHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_interval);
        info!(interval_secs = check_interval.as_secs(), "Secret rotation task started");

        let mut listening = true;
        loop {
            tokio::select! {
                received = &mut shutdown_rx, if listening => match received {
                    Ok(()) => break,
                    Err(_) => {
                        debug!("Rotation handle dropped, task keeps running");
                        listening = false;
                    }
                },
                _ = interval.tick() => {
                    let rotated = rotate_due_secrets(&vault, generator.as_ref()).await;
                    if rotated > 0 {
                        info!(rotated, "Rotated due secrets");
                    } else {
                        debug!("No secrets due for rotation");
                    }
                }
            }
        }

        info!("Secret rotation task stopped");
    });

    RotationHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata() -> SecretMetadata {
        SecretMetadata {
            id: "id".into(),
            name: "upstream".into(),
            version: 1,
            created_at: Utc::now(),
            rotated_at: None,
            rotation_interval_secs: 60,
            next_rotation: Utc::now(),
        }
    }

    #[test]
    fn test_random_generator() {
        let a = RandomSecretGenerator.generate(&metadata()).unwrap();
        let b = RandomSecretGenerator.generate(&metadata()).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a.as_str(), b.as_str());
    }
}
