use uuid::Uuid;

/// The billable identity behind a request.
///
/// Quotas, budgets and balances are all tracked against the scope key
/// derived from this, never against raw headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Authenticated user with a credit wallet.
    User { id: Uuid },
    /// Anonymous device-scoped demo principal.
    Demo { device_fingerprint: String },
}

/// Resolved identity for one request.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub principal: Principal,
    /// `user:<id>` or `demo:<fingerprint>`.
    pub scope_key: String,
    pub device_fingerprint: String,
}

impl RequestIdentity {
    pub fn user(id: Uuid, device_fingerprint: String) -> Self {
        Self {
            principal: Principal::User { id },
            scope_key: format!("user:{id}"),
            device_fingerprint,
        }
    }

    pub fn demo(device_fingerprint: String) -> Self {
        Self {
            principal: Principal::Demo {
                device_fingerprint: device_fingerprint.clone(),
            },
            scope_key: format!("demo:{device_fingerprint}"),
            device_fingerprint,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match &self.principal {
            Principal::User { id } => Some(*id),
            Principal::Demo { .. } => None,
        }
    }

    pub fn is_demo(&self) -> bool {
        matches!(self.principal, Principal::Demo { .. })
    }
}
