//! Policy decision point
//!
//! [`AuthorizationManager`] renders allow/deny decisions for a validated
//! identity acting for a customer. Grants come from request-scoped direct
//! permissions and from registered roles; a matching grant is then checked
//! against the customer's isolation policy.
//!
//! The role registry and the isolation policies sit behind read/write locks:
//! concurrent `authorize` calls only take read locks, and registry mutations
//! are serialized against them so a reader never sees a half-written role.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{AuthError, Result};

pub mod isolation;
pub mod roles;
pub mod types;

pub use roles::{is_reserved_role_id, system_roles, ROLE_ADMIN, ROLE_DEVELOPER, ROLE_OPERATOR, ROLE_VIEWER};
pub use types::{
    AuthorizationContext, AuthorizationDecision, AuthorizationRequest, CustomerContext, CustomerIsolationPolicy,
    Identity, IsolationLevel, Permission, PermissionScope, ResourceRestriction, Role, RoleUpdate, WILDCARD,
};

pub const REASON_NO_PERMISSIONS: &str = "No matching permissions";
pub const REASON_NO_ROLE_PERMISSIONS: &str = "No matching role permissions";
pub const REASON_ERROR: &str = "Authorization error";

/// Authorization configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Register the built-in `system:*` roles at construction
    pub seed_system_roles: bool,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self { seed_system_roles: true }
    }
}

/// A permission together with the policy that grants it
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveGrant {
    /// Permission id for direct grants, role id for role grants
    pub source: String,
    pub permission: Permission,
}

struct RegisteredRole {
    role: Arc<Role>,
    seq: u64,
}

#[derive(Default)]
struct RoleRegistry {
    roles: HashMap<String, RegisteredRole>,
    next_seq: u64,
}

impl RoleRegistry {
    fn insert(&mut self, role: Role) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.roles.insert(role.id.clone(), RegisteredRole { role: Arc::new(role), seq });
    }
}

pub struct AuthorizationManager {
    roles: RwLock<RoleRegistry>,
    isolation_policies: RwLock<HashMap<String, CustomerIsolationPolicy>>,
}

impl AuthorizationManager {
    pub fn new() -> Self {
        Self::with_config(AuthorizationConfig::default())
    }

    pub fn with_config(config: AuthorizationConfig) -> Self {
        let mut registry = RoleRegistry::default();
        if config.seed_system_roles {
            for role in system_roles() {
                registry.insert(role);
            }
        }

        Self {
            roles: RwLock::new(registry),
            isolation_policies: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether `context` may perform `request`.
    ///
    /// Never fails: malformed input is logged and denied with
    /// `"Authorization error"`.
    pub fn authorize(&self, context: &AuthorizationContext, request: &AuthorizationRequest) -> AuthorizationDecision {
        match self.evaluate(context, request) {
            Ok(decision) => {
                debug!(
                    subject = %context.identity.subject,
                    resource = %request.resource,
                    action = %request.action,
                    allowed = decision.allowed,
                    reason = decision.reason.as_deref().unwrap_or(""),
                    "Authorization decision"
                );
                decision
            }
            Err(e) => {
                error!(
                    error = %e,
                    subject = %context.identity.subject,
                    resource = %request.resource,
                    action = %request.action,
                    "Authorization error"
                );
                AuthorizationDecision::deny(REASON_ERROR)
            }
        }
    }

    fn evaluate(&self, context: &AuthorizationContext, request: &AuthorizationRequest) -> Result<AuthorizationDecision> {
        let customer = context
            .customer_context
            .as_ref()
            .ok_or(AuthError::MissingCustomerContext)?;

        if request.resource.is_empty() || request.action.is_empty() {
            return Err(AuthError::InternalError("request needs a resource and an action".to_string()));
        }

        let roles = self.resolve_roles(&customer.roles);
        let grant_count =
            context.permissions.len() + roles.iter().map(|r| r.permissions.len()).sum::<usize>();

        let direct = context
            .permissions
            .iter()
            .find(|p| permission_matches(p, customer, request))
            .map(|p| p.id.clone());

        let winner = direct.or_else(|| {
            roles.iter().find_map(|role| {
                role.permissions
                    .iter()
                    .any(|p| permission_matches(p, customer, request))
                    .then(|| role.id.clone())
            })
        });

        let Some(winner) = winner else {
            let reason = if grant_count == 0 {
                REASON_NO_PERMISSIONS
            } else {
                REASON_NO_ROLE_PERMISSIONS
            };
            let required = Permission::new(
                format!("required:{}:{}", request.resource, request.action),
                request.resource.clone(),
                &[request.action.as_str()],
                PermissionScope::Customer,
            );
            return Ok(AuthorizationDecision {
                allowed: false,
                reason: Some(reason.to_string()),
                applied_policies: Vec::new(),
                missing_permissions: Some(vec![required]),
            });
        };

        let policies = self.isolation_policies.read();
        let Some(policy) = policies.get(&customer.customer_id) else {
            return Ok(AuthorizationDecision::allow(vec![winner]));
        };

        let applied = vec![winner, policy.id.clone()];
        match isolation::evaluate(policy, request) {
            Ok(()) => Ok(AuthorizationDecision::allow(applied)),
            Err(reason) => Ok(AuthorizationDecision {
                allowed: false,
                reason: Some(reason.to_string()),
                applied_policies: applied,
                missing_permissions: None,
            }),
        }
    }

    /// Roles referenced by id, highest priority first, ties in registration order
    fn resolve_roles(&self, role_ids: &[String]) -> Vec<Arc<Role>> {
        let registry = self.roles.read();
        let mut resolved: Vec<(&RegisteredRole, Arc<Role>)> = Vec::with_capacity(role_ids.len());
        for id in role_ids {
            match registry.roles.get(id) {
                Some(entry) if !resolved.iter().any(|(e, _)| e.seq == entry.seq) => {
                    resolved.push((entry, entry.role.clone()));
                }
                Some(_) => {}
                None => debug!(role_id = %id, "Ignoring unknown role"),
            }
        }
        resolved.sort_by(|(a, _), (b, _)| b.role.priority.cmp(&a.role.priority).then(a.seq.cmp(&b.seq)));
        resolved.into_iter().map(|(_, role)| role).collect()
    }

    /// Candidate grants in evaluation order
    pub fn effective_permissions(&self, context: &AuthorizationContext) -> Vec<EffectiveGrant> {
        let mut grants: Vec<EffectiveGrant> = context
            .permissions
            .iter()
            .map(|p| EffectiveGrant {
                source: p.id.clone(),
                permission: p.clone(),
            })
            .collect();

        if let Some(customer) = &context.customer_context {
            for role in self.resolve_roles(&customer.roles) {
                grants.extend(role.permissions.iter().map(|p| EffectiveGrant {
                    source: role.id.clone(),
                    permission: p.clone(),
                }));
            }
        }
        grants
    }

    pub fn create_role(&self, role: Role) -> Result<Role> {
        if role.is_system || is_reserved_role_id(&role.id) {
            warn!(role_id = %role.id, "Rejected system role creation");
            return Err(AuthError::SystemRoleCreate);
        }
        validate_role(&role)?;

        let mut registry = self.roles.write();
        if registry.roles.contains_key(&role.id) {
            return Err(AuthError::RoleAlreadyExists(role.id));
        }
        registry.insert(role.clone());
        info!(role_id = %role.id, priority = role.priority, "Role created");
        Ok(role)
    }

    pub fn update_role(&self, id: &str, update: RoleUpdate) -> Result<Role> {
        let mut registry = self.roles.write();
        let entry = registry
            .roles
            .get_mut(id)
            .ok_or_else(|| AuthError::RoleNotFound(id.to_string()))?;
        if entry.role.is_system {
            warn!(role_id = %id, "Rejected system role update");
            return Err(AuthError::SystemRoleUpdate);
        }

        let mut updated = (*entry.role).clone();
        if let Some(name) = update.name {
            updated.name = name;
        }
        if let Some(description) = update.description {
            updated.description = Some(description);
        }
        if let Some(permissions) = update.permissions {
            updated.permissions = permissions;
        }
        if let Some(priority) = update.priority {
            updated.priority = priority;
        }
        validate_role(&updated)?;

        entry.role = Arc::new(updated.clone());
        info!(role_id = %id, "Role updated");
        Ok(updated)
    }

    pub fn delete_role(&self, id: &str) -> Result<()> {
        let mut registry = self.roles.write();
        match registry.roles.get(id) {
            None => Err(AuthError::RoleNotFound(id.to_string())),
            Some(entry) if entry.role.is_system => {
                warn!(role_id = %id, "Rejected system role deletion");
                Err(AuthError::SystemRoleDelete)
            }
            Some(_) => {
                registry.roles.remove(id);
                info!(role_id = %id, "Role deleted");
                Ok(())
            }
        }
    }

    pub fn get_role(&self, id: &str) -> Option<Role> {
        self.roles.read().roles.get(id).map(|entry| (*entry.role).clone())
    }

    /// All roles in registration order
    pub fn list_roles(&self) -> Vec<Role> {
        let registry = self.roles.read();
        let mut entries: Vec<&RegisteredRole> = registry.roles.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| (*entry.role).clone()).collect()
    }

    /// Replace the isolation policy of `policy.customer_id`
    pub fn set_customer_isolation_policy(&self, policy: CustomerIsolationPolicy) {
        info!(
            customer_id = %policy.customer_id,
            policy_id = %policy.id,
            level = ?policy.isolation_level,
            restrictions = policy.resource_restrictions.len(),
            "Customer isolation policy set"
        );
        self.isolation_policies
            .write()
            .insert(policy.customer_id.clone(), policy);
    }

    pub fn get_customer_isolation_policy(&self, customer_id: &str) -> Option<CustomerIsolationPolicy> {
        self.isolation_policies.read().get(customer_id).cloned()
    }

    pub fn remove_customer_isolation_policy(&self, customer_id: &str) -> Option<CustomerIsolationPolicy> {
        let removed = self.isolation_policies.write().remove(customer_id);
        if removed.is_some() {
            info!(customer_id = %customer_id, "Customer isolation policy removed");
        }
        removed
    }
}

impl Default for AuthorizationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationContext {
    /// Context whose direct grants are the customer's own permissions
    pub fn for_customer(identity: Identity, customer: CustomerContext) -> Self {
        Self {
            identity,
            permissions: customer.permissions.clone(),
            customer_context: Some(customer),
        }
    }
}

fn permission_matches(permission: &Permission, customer: &CustomerContext, request: &AuthorizationRequest) -> bool {
    if !permission.covers_resource(&request.resource) || !permission.covers_action(&request.action) {
        return false;
    }

    let scope_ok = match permission.scope {
        PermissionScope::Global => true,
        PermissionScope::Customer => !customer.customer_id.is_empty(),
    };
    if !scope_ok {
        return false;
    }

    permission
        .constraints
        .as_ref()
        .map(|constraints| isolation::metadata_satisfies(constraints, &request.metadata))
        .unwrap_or(true)
}

fn validate_role(role: &Role) -> Result<()> {
    if role.id.trim().is_empty() {
        return Err(AuthError::InvalidRole("role id must not be empty".to_string()));
    }
    if role.name.trim().is_empty() {
        return Err(AuthError::InvalidRole(format!("role {} needs a name", role.id)));
    }
    for permission in &role.permissions {
        if permission.resource.is_empty() || permission.actions.is_empty() {
            return Err(AuthError::InvalidRole(format!(
                "permission {} needs a resource and at least one action",
                permission.id
            )));
        }
    }
    Ok(())
}
