//! Outbound HTTP client shared by JWKS, introspection and discovery fetches

use std::time::Duration;

use crate::error::Result;

const USER_AGENT: &str = concat!("edgegate-auth-core/", env!("CARGO_PKG_VERSION"));

/// Build a client whose every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client() {
        assert!(build_client(Duration::from_millis(250)).is_ok());
    }
}
