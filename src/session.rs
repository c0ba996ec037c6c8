// 🔐 Session Context - who is calling
//
// Passed explicitly into every directory operation. There is no ambient
// "current user".

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DirectoryError, Result};
use crate::sources::AccountsSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    /// Anything other than "admin" is a student
    pub fn from_label(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_lowercase()) {
            Some(r) if r == "admin" => Role::Admin,
            _ => Role::Student,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    pub role: Role,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        SessionContext {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }

    /// Look up the user's role in the accounts source.
    ///
    /// Unknown users get a Student session, which every admin operation rejects.
    pub async fn resolve(accounts: &dyn AccountsSource, user_id: &str) -> Result<Self> {
        let role = accounts
            .find_role(user_id)
            .await
            .map_err(|e| DirectoryError::SourceUnavailable(format!("{:#}", e)))?;
        let role = Role::from_label(role.as_deref());
        debug!(user_id, ?role, "resolved session");
        Ok(SessionContext::new(user_id, role))
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(DirectoryError::AccessDenied(self.user_id.clone()))
        }
    }
}
