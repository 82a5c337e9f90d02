//! RFC 7662 token introspection

use serde::Deserialize;

use super::claims::TokenClaims;
use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(flatten)]
    pub claims: TokenClaims,
}

/// Endpoint plus the client credentials used for HTTP Basic auth
#[derive(Debug, Clone)]
pub struct IntrospectionClient {
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

impl IntrospectionClient {
    pub async fn introspect(&self, http: &reqwest::Client, token: &str) -> Result<IntrospectionResponse> {
        let response = http
            .post(&self.endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("token", token), ("token_type_hint", "access_token")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ProviderError(format!("Introspection failed: {}", status.as_u16())));
        }

        Ok(response.json::<IntrospectionResponse>().await?)
    }
}
