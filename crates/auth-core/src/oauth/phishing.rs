//! Redirect URI heuristics for consent-phishing detection

use std::net::IpAddr;

pub const INDICATOR_INVALID_URI: &str = "Redirect URI is not a valid absolute URL";
pub const INDICATOR_IP_HOST: &str = "Redirect URI uses an IP address instead of a domain name";
pub const INDICATOR_HOMOGRAPH: &str = "Redirect URI host contains non-ASCII or punycode characters (possible homograph attack)";
pub const INDICATOR_SUSPICIOUS_PATTERN: &str = "Redirect URI host contains suspicious patterns";

pub fn default_high_risk_tlds() -> Vec<String> {
    [".tk", ".ml", ".ga", ".cf", ".gq", ".xyz", ".top", ".click", ".zip", ".mov", ".country", ".work"]
        .iter()
        .map(|tld| tld.to_string())
        .collect()
}

/// Host as written, without scheme, userinfo, port, path, query or fragment
fn raw_host(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("://")?;
    let authority = rest.split(|c| matches!(c, '/' | '?' | '#')).next()?;
    let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
    let host = if host_port.starts_with('[') {
        host_port.split_once(']').map(|(h, _)| &h[1..])?
    } else {
        host_port.split(':').next()?
    };
    (!host.is_empty()).then_some(host)
}

fn is_suspicious_structure(host: &str) -> bool {
    if host.contains("..") || host.starts_with('.') || host.starts_with('-') {
        return true;
    }
    host.split('.').any(|label| {
        let label = label.strip_prefix("xn--").unwrap_or(label);
        label.contains("--") || label.ends_with('-')
    })
}

/// Every issue found in `redirect_uri`; empty when the URI looks clean.
pub fn check_phishing_indicators(redirect_uri: &str, high_risk_tlds: &[String]) -> Vec<String> {
    let Some(host) = raw_host(redirect_uri) else {
        return vec![INDICATOR_INVALID_URI.to_string()];
    };
    let host_lower = host.to_ascii_lowercase();
    let mut indicators = Vec::new();

    if host.parse::<IpAddr>().is_ok() {
        indicators.push(INDICATOR_IP_HOST.to_string());
    }

    if let Some(tld) = high_risk_tlds
        .iter()
        .find(|tld| host_lower.ends_with(&tld.to_ascii_lowercase()))
    {
        indicators.push(format!("Redirect URI uses high-risk TLD: {}", tld));
    }

    if !host.is_ascii() || host_lower.split('.').any(|label| label.starts_with("xn--")) {
        indicators.push(INDICATOR_HOMOGRAPH.to_string());
    }

    if is_suspicious_structure(&host_lower) {
        indicators.push(INDICATOR_SUSPICIOUS_PATTERN.to_string());
    }

    indicators
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(uri: &str) -> Vec<String> {
        check_phishing_indicators(uri, &default_high_risk_tlds())
    }

    #[test]
    fn test_clean_uri() {
        assert!(check("https://app.example.com/callback?x=1").is_empty());
        assert!(check("https://my-app.example.com:8443/cb").is_empty());
    }

    #[test]
    fn test_ip_hosts() {
        assert_eq!(check("https://192.168.1.10/cb"), vec![INDICATOR_IP_HOST.to_string()]);
        assert_eq!(check("https://[::1]:8080/cb"), vec![INDICATOR_IP_HOST.to_string()]);
    }

    #[test]
    fn test_high_risk_tld() {
        assert_eq!(check("https://login.example.tk/cb"), vec!["Redirect URI uses high-risk TLD: .tk".to_string()]);
    }

    #[test]
    fn test_homograph() {
        assert_eq!(check("https://exаmple.com/cb"), vec![INDICATOR_HOMOGRAPH.to_string()]);
        assert_eq!(check("https://xn--exmple-cua.com/cb"), vec![INDICATOR_HOMOGRAPH.to_string()]);
    }

    #[test]
    fn test_suspicious_patterns() {
        assert_eq!(check("https://paypal--secure.com/cb"), vec![INDICATOR_SUSPICIOUS_PATTERN.to_string()]);
        assert_eq!(check("https://example..com/cb"), vec![INDICATOR_SUSPICIOUS_PATTERN.to_string()]);
    }

    #[test]
    fn test_multiple_issues_reported_together() {
        let indicators = check("https://secure--lоgin.tk/cb");
        assert_eq!(indicators.len(), 3);
    }

    #[test]
    fn test_userinfo_is_not_the_host() {
        assert!(check("https://10.0.0.1@app.example.com/cb").is_empty());
    }

    #[test]
    fn test_not_a_url() {
        assert_eq!(check("not a url"), vec![INDICATOR_INVALID_URI.to_string()]);
    }
}
