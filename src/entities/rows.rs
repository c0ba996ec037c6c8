// 📥 Boundary Rows - upstream shapes, validated once
//
// Accounts come from the `profiles` table, records from `patient_records`.
// Every column except the id is optional upstream, so every column except
// the id is optional here. Normalization happens in StudentEntry, nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::StudentStatus;

// ============================================================================
// ACCOUNT ROW (login-capable profile)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRow {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// Raw status label ("Ativo", "Pausado", "Inativo" or anything else)
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub status_changed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub inactivated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub auto_eval_enabled: Option<bool>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// "admin" for studio staff, anything else for students
    #[serde(default)]
    pub role: Option<String>,
}

impl AccountRow {
    /// Staff profile; never listed as a student
    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"))
    }
}

// ============================================================================
// RECORD ROW (administratively entered patient file)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RecordRow {
    /// New record as the registration screen creates it: fresh UUID, created now
    pub fn register(name: Option<String>, email: Option<String>) -> Self {
        RecordRow {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            email,
            created_at: Some(Utc::now()),
        }
    }
}

// ============================================================================
// ACCOUNT UPDATE (partial write by account id)
// ============================================================================

/// Any subset of the writable account columns.
///
/// `inactivated_at` is doubly optional: `None` leaves the column alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StudentStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivated_at: Option<Option<DateTime<Utc>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_eval_enabled: Option<bool>,
}

impl AccountUpdate {
    /// Payload for a status change made at `now`
    pub fn status_change(status: StudentStatus, now: DateTime<Utc>) -> Self {
        AccountUpdate {
            status: Some(status),
            status_changed_at: Some(now),
            inactivated_at: Some(if status == StudentStatus::Inactive {
                Some(now)
            } else {
                None
            }),
            auto_eval_enabled: None,
        }
    }

    pub fn self_eval(enabled: bool) -> Self {
        AccountUpdate {
            auto_eval_enabled: Some(enabled),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.status_changed_at.is_none()
            && self.inactivated_at.is_none()
            && self.auto_eval_enabled.is_none()
    }

    /// Apply this update to a row in place (used by stores and event folding)
    pub fn apply_to(&self, row: &mut AccountRow) {
        if let Some(status) = self.status {
            row.status = Some(status.as_str().to_string());
        }
        if let Some(changed_at) = self.status_changed_at {
            row.status_changed_at = Some(changed_at);
        }
        if let Some(inactivated_at) = self.inactivated_at {
            row.inactivated_at = inactivated_at;
        }
        if let Some(enabled) = self.auto_eval_enabled {
            row.auto_eval_enabled = Some(enabled);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
