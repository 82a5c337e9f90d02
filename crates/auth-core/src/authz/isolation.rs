//! Per-customer resource isolation, applied after a grant has matched

use std::collections::HashMap;

use super::types::{AuthorizationRequest, CustomerIsolationPolicy, IsolationLevel};

pub const REASON_DENIED_ID: &str = "Resource explicitly denied by isolation policy";
pub const REASON_NOT_ALLOWED: &str = "Resource not in allowed list";
pub const REASON_CONDITIONS: &str = "Resource access conditions not met";
pub const REASON_STRICT: &str = "Strict isolation - resource not explicitly allowed";

/// Outcome of isolation evaluation; `Err` carries the deny reason
pub type IsolationOutcome = std::result::Result<(), &'static str>;

/// Every key in `required` must be present in `metadata` with the same value
pub(crate) fn metadata_satisfies(required: &HashMap<String, String>, metadata: &HashMap<String, String>) -> bool {
    required
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

pub fn evaluate(policy: &CustomerIsolationPolicy, request: &AuthorizationRequest) -> IsolationOutcome {
    let restriction = policy
        .resource_restrictions
        .iter()
        .find(|r| r.resource_type == request.resource);

    let Some(restriction) = restriction else {
        return match policy.isolation_level {
            IsolationLevel::Strict => Err(REASON_STRICT),
            IsolationLevel::Partial => Ok(()),
        };
    };

    // Deny wins over allow for the same id.
    if let (Some(resource_id), Some(denied)) = (&request.resource_id, &restriction.denied_ids) {
        if denied.contains(resource_id) {
            return Err(REASON_DENIED_ID);
        }
    }

    if let Some(allowed) = restriction.allowed_ids.as_ref().filter(|ids| !ids.is_empty()) {
        let listed = request
            .resource_id
            .as_ref()
            .map(|id| allowed.contains(id))
            .unwrap_or(false);
        if !listed {
            return Err(REASON_NOT_ALLOWED);
        }
    }

    if let Some(conditions) = &restriction.conditions {
        if !metadata_satisfies(conditions, &request.metadata) {
            return Err(REASON_CONDITIONS);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::ResourceRestriction;

    fn policy(level: IsolationLevel, restrictions: Vec<ResourceRestriction>) -> CustomerIsolationPolicy {
        CustomerIsolationPolicy {
            id: "iso".into(),
            customer_id: "acme".into(),
            isolation_level: level,
            resource_restrictions: restrictions,
        }
    }

    #[test]
    fn test_strict_denies_unlisted_type() {
        let p = policy(IsolationLevel::Strict, vec![]);
        let req = AuthorizationRequest::new("dns", "read");
        assert_eq!(evaluate(&p, &req), Err(REASON_STRICT));
    }

    #[test]
    fn test_partial_allows_unlisted_type() {
        let p = policy(IsolationLevel::Partial, vec![]);
        let req = AuthorizationRequest::new("dns", "read");
        assert_eq!(evaluate(&p, &req), Ok(()));
    }

    #[test]
    fn test_deny_overrides_allow() {
        let p = policy(
            IsolationLevel::Partial,
            vec![ResourceRestriction {
                resource_type: "property".into(),
                allowed_ids: Some(vec!["p-1".into()]),
                denied_ids: Some(vec!["p-1".into()]),
                conditions: None,
            }],
        );
        let req = AuthorizationRequest::new("property", "read").with_resource_id("p-1");
        assert_eq!(evaluate(&p, &req), Err(REASON_DENIED_ID));
    }

    #[test]
    fn test_allowed_list_requires_resource_id() {
        let p = policy(
            IsolationLevel::Partial,
            vec![ResourceRestriction {
                resource_type: "property".into(),
                allowed_ids: Some(vec!["p-1".into()]),
                ..Default::default()
            }],
        );
        let req = AuthorizationRequest::new("property", "list");
        assert_eq!(evaluate(&p, &req), Err(REASON_NOT_ALLOWED));
    }

    #[test]
    fn test_empty_allowed_list_is_ignored() {
        let p = policy(
            IsolationLevel::Strict,
            vec![ResourceRestriction {
                resource_type: "property".into(),
                allowed_ids: Some(vec![]),
                ..Default::default()
            }],
        );
        let req = AuthorizationRequest::new("property", "read").with_resource_id("anything");
        assert_eq!(evaluate(&p, &req), Ok(()));
    }

    #[test]
    fn test_conditions_missing_key() {
        let mut conditions = HashMap::new();
        conditions.insert("accessLevel".to_string(), "full".to_string());
        let p = policy(
            IsolationLevel::Partial,
            vec![ResourceRestriction {
                resource_type: "property".into(),
                conditions: Some(conditions),
                ..Default::default()
            }],
        );
        let req = AuthorizationRequest::new("property", "read");
        assert_eq!(evaluate(&p, &req), Err(REASON_CONDITIONS));
    }
}
