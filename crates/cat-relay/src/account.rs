//! Account lookup
//!
//! The relay never manages accounts. It asks an [`AccountDirectory`] whether a
//! username/password pair is valid and what the account may do.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RelayError;

/// Account role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Operator,
}

/// What the lookup knows about an authenticated user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub role: Role,
    pub approved: bool,
    /// May register a transceiver
    pub trx: bool,
}

impl Account {
    /// Whether this account may hold a control grant
    pub fn may_operate(&self) -> bool {
        self.role == Role::Admin || self.approved
    }
}

/// Source of truth for credentials
pub trait AccountDirectory: Send + Sync {
    /// Return the account if the credentials match
    fn authenticate(&self, username: &str, password: &str) -> Option<Account>;
}

/// Hex-encoded SHA-256 of a password, as stored in account files
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// One entry of an account file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub password_sha256: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub trx: bool,
}

impl AccountRecord {
    fn to_account(&self, username: &str) -> Account {
        Account {
            username: username.to_string(),
            role: self.role,
            approved: self.approved,
            trx: self.trx,
        }
    }
}

/// Accounts read once from a JSON file
///
/// ```json
/// { "alice": { "password_sha256": "…", "role": "admin", "approved": true, "trx": true } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileAccounts {
    records: HashMap<String, AccountRecord>,
}

impl FileAccounts {
    /// Load and parse an account file
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|e| RelayError::Accounts {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content).map_err(|e| RelayError::Accounts {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Parse account records from JSON text
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            records: serde_json::from_str(content)?,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AccountDirectory for FileAccounts {
    fn authenticate(&self, username: &str, password: &str) -> Option<Account> {
        let record = self.records.get(username)?;
        (record.password_sha256.eq_ignore_ascii_case(&hash_password(password)))
            .then(|| record.to_account(username))
    }
}

/// In-memory directory with plaintext passwords
#[derive(Debug, Clone, Default)]
pub struct MemoryAccounts {
    accounts: HashMap<String, (String, Account)>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account
    pub fn insert(&mut self, account: Account, password: &str) {
        self.accounts
            .insert(account.username.clone(), (password.to_string(), account));
    }

    /// Builder form of [`MemoryAccounts::insert`]
    pub fn with(mut self, account: Account, password: &str) -> Self {
        self.insert(account, password);
        self
    }
}

impl AccountDirectory for MemoryAccounts {
    fn authenticate(&self, username: &str, password: &str) -> Option<Account> {
        self.accounts
            .get(username)
            .filter(|(stored, _)| stored == password)
            .map(|(_, account)| account.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(name: &str, approved: bool, trx: bool) -> Account {
        Account {
            username: name.into(),
            role: Role::Operator,
            approved,
            trx,
        }
    }

    #[test]
    fn test_may_operate() {
        assert!(operator("a", true, false).may_operate());
        assert!(!operator("a", false, false).may_operate());

        let admin = Account {
            role: Role::Admin,
            ..operator("root", false, false)
        };
        assert!(admin.may_operate());
    }

    #[test]
    fn test_hash_password() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_accounts() {
        let json = format!(
            r#"{{
                "alice": {{"password_sha256": "{}", "role": "admin", "approved": true, "trx": true}},
                "bob": {{"password_sha256": "{}"}}
            }}"#,
            hash_password("secret"),
            hash_password("hunter2").to_uppercase()
        );
        let accounts = FileAccounts::from_json(&json).unwrap();
        assert_eq!(accounts.len(), 2);

        let alice = accounts.authenticate("alice", "secret").unwrap();
        assert_eq!(alice.role, Role::Admin);
        assert!(alice.trx);

        let bob = accounts.authenticate("bob", "hunter2").unwrap();
        assert_eq!(bob.role, Role::Operator);
        assert!(!bob.approved);
        assert!(!bob.trx);

        assert!(accounts.authenticate("alice", "wrong").is_none());
        assert!(accounts.authenticate("mallory", "secret").is_none());
    }

    #[test]
    fn test_missing_file_is_accounts_error() {
        let err = FileAccounts::load(Path::new("/nonexistent/riglink/accounts.json")).unwrap_err();
        assert!(matches!(err, RelayError::Accounts { .. }));
    }

    #[test]
    fn test_memory_accounts() {
        let accounts = MemoryAccounts::new().with(operator("carol", true, true), "pw");
        assert_eq!(accounts.authenticate("carol", "pw").unwrap().username, "carol");
        assert!(accounts.authenticate("carol", "PW").is_none());
    }
}
