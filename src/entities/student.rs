// 🧘 Student Entry - the unified directory view-model
//
// "Identity persists, values change": an entry is identified by where it
// came from (account or record) plus the upstream id. Everything else is a
// value copied from the source row when the snapshot was built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::rows::{AccountRow, RecordRow};
use super::status::StudentStatus;
use crate::error::DirectoryError;

// ============================================================================
// IDENTITY
// ============================================================================

/// Tagged identifier: `account:<id>` or `record:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identity {
    Account(String),
    Record(String),
}

impl Identity {
    pub fn account_id(&self) -> Option<&str> {
        match self {
            Identity::Account(id) => Some(id),
            Identity::Record(_) => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Account(id) => write!(f, "account:{}", id),
            Identity::Record(id) => write!(f, "record:{}", id),
        }
    }
}

impl FromStr for Identity {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DirectoryError::InvalidIdentity(s.to_string());
        let (tag, id) = s.split_once(':').ok_or_else(invalid)?;
        if id.is_empty() {
            return Err(invalid());
        }
        match tag {
            "account" => Ok(Identity::Account(id.to_string())),
            "record" => Ok(Identity::Record(id.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Identity {
    type Error = DirectoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

// ============================================================================
// STUDENT ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentEntry {
    pub identity: Identity,

    /// Display name, empty when the source has none
    pub name: String,

    pub email: Option<String>,

    /// First appearance in its source
    pub created_at: Option<DateTime<Utc>>,

    pub status: StudentStatus,

    pub status_changed_at: Option<DateTime<Utc>>,

    pub inactivated_at: Option<DateTime<Utc>>,

    /// Self-evaluation access; always false for record-only entries
    pub self_eval_enabled: bool,

    /// True iff backed by an account; gates which mutations are allowed
    pub has_login: bool,
}

impl StudentEntry {
    pub fn from_account(row: &AccountRow) -> Self {
        StudentEntry {
            identity: Identity::Account(row.id.clone()),
            name: row.name.clone().unwrap_or_default(),
            email: non_blank(row.email.as_deref()),
            created_at: row.created_at,
            status: StudentStatus::from_account_label(row.status.as_deref()),
            status_changed_at: row.status_changed_at,
            inactivated_at: row.inactivated_at,
            self_eval_enabled: row.auto_eval_enabled.unwrap_or(false),
            has_login: true,
        }
    }

    pub fn from_record(row: &RecordRow) -> Self {
        StudentEntry {
            identity: Identity::Record(row.id.clone()),
            name: row.name.clone().unwrap_or_default(),
            email: non_blank(row.email.as_deref()),
            created_at: row.created_at,
            status: StudentStatus::NoLogin,
            status_changed_at: None,
            inactivated_at: None,
            self_eval_enabled: false,
            has_login: false,
        }
    }

    /// Trimmed, lowercased email; None when absent or blank
    pub fn normalized_email(&self) -> Option<String> {
        self.email.as_deref().and_then(normalize_email)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Email key used for cross-source deduplication
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

// ============================================================================
// NAME COLLATION
// ============================================================================

/// Locale-aware, case-insensitive name comparison.
///
/// Primary level ignores accents and case ("Ágata" == "agata"), secondary
/// level puts the unaccented form first. Equal names compare Equal so a
/// stable sort keeps source order.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let (a_primary, a_secondary) = collation_key(a);
    let (b_primary, b_secondary) = collation_key(b);
    a_primary
        .cmp(&b_primary)
        .then_with(|| a_secondary.cmp(&b_secondary))
}

fn collation_key(name: &str) -> (String, String) {
    let secondary: String = name.trim().nfd().flat_map(char::to_lowercase).collect();
    let primary: String = secondary
        .chars()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    (primary, secondary)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_and_parse() {
        let id = Identity::Account("1".into());
        assert_eq!(id.to_string(), "account:1");
        assert_eq!("account:1".parse::<Identity>().unwrap(), id);
        assert_eq!(
            "record:abc-123".parse::<Identity>().unwrap(),
            Identity::Record("abc-123".into())
        );
    }

    #[test]
    fn test_identity_parse_rejects_garbage() {
        assert!("account:".parse::<Identity>().is_err());
        assert!("user:1".parse::<Identity>().is_err());
        assert!("1".parse::<Identity>().is_err());
    }

    #[test]
    fn test_identity_serializes_as_string() {
        let json = serde_json::to_string(&Identity::Record("9".into())).unwrap();
        assert_eq!(json, "\"record:9\"");
        let back: Identity = serde_json::from_str("\"account:7\"").unwrap();
        assert_eq!(back.account_id(), Some("7"));
    }

    #[test]
    fn test_from_account_defaults() {
        let row = AccountRow {
            id: "1".into(),
            email: Some("  a@x.com ".into()),
            ..Default::default()
        };
        let entry = StudentEntry::from_account(&row);

        assert_eq!(entry.identity.to_string(), "account:1");
        assert_eq!(entry.name, "");
        assert_eq!(entry.email.as_deref(), Some("a@x.com"));
        assert_eq!(entry.status, StudentStatus::Active);
        assert!(entry.has_login);
        assert!(!entry.self_eval_enabled);
    }

    #[test]
    fn test_from_record_forces_no_login() {
        let row = RecordRow {
            id: "9".into(),
            name: Some("Bea".into()),
            email: Some("   ".into()),
            created_at: None,
        };
        let entry = StudentEntry::from_record(&row);

        assert_eq!(entry.status, StudentStatus::NoLogin);
        assert!(!entry.has_login);
        assert!(!entry.self_eval_enabled);
        assert!(entry.email.is_none());
        assert!(entry.normalized_email().is_none());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" A@X.com "), Some("a@x.com".to_string()));
        assert_eq!(normalize_email(""), None);
        assert_eq!(normalize_email("  "), None);
    }

    #[test]
    fn test_compare_names_case_and_accent_insensitive() {
        assert_eq!(compare_names("ana", "Ana"), Ordering::Equal);
        assert_eq!(compare_names("Ágata", "Bruno"), Ordering::Less);
        assert_eq!(compare_names("Érica", "eduardo"), Ordering::Greater);
        assert_eq!(compare_names("", "Ana"), Ordering::Less);
        assert_eq!(compare_names("Jose", "José"), Ordering::Less);
    }
}
