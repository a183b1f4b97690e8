//! Permission gate: method-keyed validators checked before a resource handles the request.

mod wrapper;

pub use wrapper::{auth_gate, resource_validators, AuthWrapper};

use crate::extractors::RestRequest;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Role that admits every active user in a permission rule.
pub const ANY_ROLE: &str = "*";

/// User as provided by the authentication layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

fn default_active() -> bool {
    true
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        AuthUser {
            id: id.into(),
            is_active: true,
            is_superuser: false,
            roles: Vec::new(),
        }
    }

    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Whether a role rule admits the user. `None` or `"*"` admits any active user; superusers pass
/// every rule.
pub fn roles_allow(rule: Option<&[String]>, user: Option<&AuthUser>) -> bool {
    let Some(user) = user.filter(|u| u.is_active) else {
        return false;
    };
    if user.is_superuser {
        return true;
    }
    match rule {
        None => true,
        Some(roles) => roles.iter().any(|r| r == ANY_ROLE || user.has_role(r)),
    }
}

pub type PermissionValidator = Arc<dyn Fn(&RestRequest) -> bool + Send + Sync>;

/// One validator or an ordered list; a list passes when any member passes.
#[derive(Clone)]
pub enum Validators {
    One(PermissionValidator),
    Many(Vec<PermissionValidator>),
}

impl Validators {
    fn as_slice(&self) -> &[PermissionValidator] {
        match self {
            Validators::One(v) => std::slice::from_ref(v),
            Validators::Many(vs) => vs.as_slice(),
        }
    }
}

#[derive(Clone, Default)]
pub struct PermissionValidators(HashMap<Method, Validators>);

impl PermissionValidators {
    pub fn new() -> Self {
        PermissionValidators::default()
    }

    pub fn with<F>(mut self, method: Method, validator: F) -> Self
    where
        F: Fn(&RestRequest) -> bool + Send + Sync + 'static,
    {
        self.0.insert(method, Validators::One(Arc::new(validator)));
        self
    }

    pub fn with_all(mut self, method: Method, validators: Vec<PermissionValidator>) -> Self {
        self.0.insert(method, Validators::Many(validators));
        self
    }

    pub fn get(&self, method: &Method) -> Option<&Validators> {
        self.0.get(method)
    }
}

pub struct Auth {
    validators: PermissionValidators,
}

impl Auth {
    pub fn new(validators: PermissionValidators) -> Self {
        Auth { validators }
    }

    /// Active user and at least one validator registered for the method passes.
    pub fn is_authenticated(&self, request: &RestRequest) -> bool {
        if !request.is_active_user() {
            return false;
        }
        match self.validators.get(&request.method) {
            Some(validators) => validators.as_slice().iter().any(|v| v(request)),
            None => false,
        }
    }
}
