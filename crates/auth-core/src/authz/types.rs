//! Policy data model

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wildcard accepted in `Permission::resource` and `Permission::actions`
pub const WILDCARD: &str = "*";

/// Where a permission applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionScope {
    Global,
    Customer,
}

/// A grant of actions on a resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub resource: String,
    pub actions: Vec<String>,
    pub scope: PermissionScope,
    /// Every entry must equal the same key in the request metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<HashMap<String, String>>,
}

impl Permission {
    pub fn new(
        id: impl Into<String>,
        resource: impl Into<String>,
        actions: &[&str],
        scope: PermissionScope,
    ) -> Self {
        Self {
            id: id.into(),
            resource: resource.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            scope,
            constraints: None,
        }
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub(crate) fn covers_resource(&self, resource: &str) -> bool {
        self.resource == resource || self.resource == WILDCARD
    }

    pub(crate) fn covers_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action || a == WILDCARD)
    }
}

/// Named bundle of permissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub priority: i32,
}

/// Partial update applied by `AuthorizationManager::update_role`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<Permission>>,
    pub priority: Option<i32>,
}

/// Customer the caller acts for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerContext {
    pub customer_id: String,
    pub customer_name: String,
    /// Role ids
    pub roles: Vec<String>,
    /// Direct grants
    #[serde(default)]
    pub permissions: Vec<Permission>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Verified caller identity as produced by the token validator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationContext {
    pub identity: Identity,
    /// `None` is a malformed input and always denies
    pub customer_context: Option<CustomerContext>,
    /// Request-scoped direct grants, evaluated before role grants
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub resource: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AuthorizationRequest {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub applied_policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_permissions: Option<Vec<Permission>>,
}

impl AuthorizationDecision {
    pub fn allow(applied_policies: Vec<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            applied_policies,
            missing_permissions: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            applied_policies: Vec::new(),
            missing_permissions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// Resource types without a restriction entry are denied
    Strict,
    /// Resource types without a restriction entry are allowed
    Partial,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRestriction {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIsolationPolicy {
    pub id: String,
    pub customer_id: String,
    pub isolation_level: IsolationLevel,
    #[serde(default)]
    pub resource_restrictions: Vec<ResourceRestriction>,
}
