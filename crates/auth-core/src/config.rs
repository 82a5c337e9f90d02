//! Configuration for auth-core

use std::path::Path;

use config::{Environment, File};
use serde::Deserialize;

use crate::authz::AuthorizationConfig;
use crate::error::{AuthError, Result};
use crate::oauth::OAuth21Config;
use crate::token::TokenValidatorConfig;
use crate::vault::{VaultConfig, MIN_PASSPHRASE_LEN};

/// Prefix of environment overrides, e.g. `EDGEGATE__TOKEN__ISSUER`
pub const ENV_PREFIX: &str = "EDGEGATE";

const PKCE_VERIFIER_MIN: usize = 43;
const PKCE_VERIFIER_MAX: usize = 128;

/// Main configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthCoreConfig {
    pub authorization: AuthorizationConfig,
    pub token: TokenValidatorConfig,
    pub oauth: OAuth21Config,
    pub vault: VaultConfig,
}

impl AuthCoreConfig {
    /// Load from a file (format from its extension) with environment overrides on top
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let oauth = &self.oauth;
        if oauth.min_code_verifier_length > oauth.max_code_verifier_length {
            return Err(AuthError::ConfigError(
                "min_code_verifier_length must not exceed max_code_verifier_length".to_string(),
            ));
        }
        if oauth.min_code_verifier_length < PKCE_VERIFIER_MIN || oauth.max_code_verifier_length > PKCE_VERIFIER_MAX {
            return Err(AuthError::ConfigError(format!(
                "code verifier length bounds must lie within {}..={}",
                PKCE_VERIFIER_MIN, PKCE_VERIFIER_MAX
            )));
        }

        let ttls = [
            ("token.valid_token_cache_ttl", self.token.valid_token_cache_ttl),
            ("token.invalid_token_cache_ttl", self.token.invalid_token_cache_ttl),
            ("token.jwks_cache_ttl", self.token.jwks_cache_ttl),
            ("token.http_timeout_ms", self.token.http_timeout_ms),
            ("oauth.metadata_cache_ttl", oauth.metadata_cache_ttl),
            ("oauth.dpop_proof_max_age", oauth.dpop_proof_max_age),
            ("oauth.http_timeout_ms", oauth.http_timeout_ms),
            ("vault.rotation_check_interval_secs", self.vault.rotation_check_interval_secs),
        ];
        if let Some((name, _)) = ttls.iter().find(|(_, value)| *value == 0) {
            return Err(AuthError::ConfigError(format!("{} must be greater than zero", name)));
        }

        if self.vault.master_passphrase.len() < MIN_PASSPHRASE_LEN {
            return Err(AuthError::ConfigError(format!(
                "vault.master_passphrase must be at least {} bytes",
                MIN_PASSPHRASE_LEN
            )));
        }
        if self.vault.kdf_iterations == 0 {
            return Err(AuthError::ConfigError("vault.kdf_iterations must be greater than zero".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> AuthCoreConfig {
        let mut config = AuthCoreConfig::default();
        config.vault.master_passphrase = "a-long-enough-passphrase".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = AuthCoreConfig::default();
        assert!(config.authorization.seed_system_roles);
        assert_eq!(config.token.allowed_algorithms, vec!["RS256", "ES256"]);
        assert_eq!(config.oauth.min_code_verifier_length, 43);
        assert_eq!(config.vault.kdf_iterations, 600_000);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_rejects_short_passphrase() {
        let err = AuthCoreConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("master_passphrase"));
    }

    #[test]
    fn test_rejects_bad_verifier_bounds() {
        let mut config = valid();
        config.oauth.min_code_verifier_length = 100;
        config.oauth.max_code_verifier_length = 50;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.oauth.min_code_verifier_length = 20;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.oauth.max_code_verifier_length = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let mut config = valid();
        config.token.valid_token_cache_ttl = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("valid_token_cache_ttl"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[token]
issuer = "https://as.example.com"
allowed_algorithms = ["ES256"]

[oauth]
trusted_authorization_servers = ["https://as.example.com"]

[vault]
master_passphrase = "file-provided-passphrase"
kdf_iterations = 1000
"#
        )
        .unwrap();

        let config = AuthCoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.token.issuer.as_deref(), Some("https://as.example.com"));
        assert_eq!(config.token.allowed_algorithms, vec!["ES256"]);
        assert_eq!(config.token.clock_skew_seconds, 60);
        assert_eq!(config.oauth.trusted_authorization_servers.len(), 1);
        assert_eq!(config.vault.kdf_iterations, 1000);
    }
}
