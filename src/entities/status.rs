// 🟢 Student Status - login states plus the record-only classification
//
// Active / Paused / Inactive transition freely, always admin-triggered.
// NoLogin is never a transition target: it only classifies record-only entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DirectoryError;

// ============================================================================
// STUDENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StudentStatus {
    #[serde(rename = "Ativo")]
    Active,

    #[serde(rename = "Pausado")]
    Paused,

    #[serde(rename = "Inativo")]
    Inactive,

    /// Record-only entry, no account to log in with
    #[serde(rename = "Sem login")]
    NoLogin,
}

impl StudentStatus {
    /// Label as stored in the accounts source
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "Ativo",
            StudentStatus::Paused => "Pausado",
            StudentStatus::Inactive => "Inativo",
            StudentStatus::NoLogin => "Sem login",
        }
    }

    /// Normalize a raw account status column.
    ///
    /// Missing or unrecognized labels fall back to Active, matching how the
    /// dashboard has always displayed accounts without an explicit status.
    pub fn from_account_label(raw: Option<&str>) -> Self {
        raw.and_then(Self::parse_login_state)
            .unwrap_or(StudentStatus::Active)
    }

    fn parse_login_state(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "ativo" | "active" => Some(StudentStatus::Active),
            "pausado" | "paused" => Some(StudentStatus::Paused),
            "inativo" | "inactive" => Some(StudentStatus::Inactive),
            _ => None,
        }
    }

    pub fn is_login_state(&self) -> bool {
        !matches!(self, StudentStatus::NoLogin)
    }
}

impl fmt::Display for StudentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a status change target. Only the three login states are accepted.
impl FromStr for StudentStatus {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_login_state(s).ok_or_else(|| DirectoryError::InvalidStatus(s.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
