//! Account and character persistence.
//!
//! [`CredentialStore`] is the data-access seam used by admission control and session teardown.
//! [`AccountStore`] keeps accounts in memory and, when given a path, writes the whole database to
//! disk with `bincode` after every change.

use crate::content::StartPosition;
use crate::inventory::{Equipment, Inventory};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::protocol::{StatType, WireEnum};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("account database I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("account database is corrupt: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("no account named `{0}`")]
    UnknownAccount(String),
}

/// Base character statistics, indexed by [`StatType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    values: [u16; 6],
}

impl Default for Stats {
    fn default() -> Self {
        let mut stats = Self { values: [1; 6] };
        stats.set(StatType::MaxHp, 50);
        stats.set(StatType::MaxMp, 50);
        stats
    }
}

impl Stats {
    pub fn get(&self, stat: StatType) -> u16 {
        self.values[stat.to_index() as usize]
    }

    pub fn set(&mut self, stat: StatType, value: u16) {
        self.values[stat.to_index() as usize] = value;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub name: String,
    pub map: u16,
    pub x: f32,
    pub y: f32,
    pub stats: Stats,
    pub stat_points: u16,
    pub hp: u16,
    pub mp: u16,
    pub cash: u32,
    pub inventory: Inventory,
    pub equipment: Equipment,
}

impl CharacterRecord {
    /// A fresh level-one character at `start`.
    pub fn new(name: &str, start: StartPosition) -> Self {
        let stats = Stats::default();
        Self {
            name: name.to_string(),
            map: start.map,
            x: start.x,
            y: start.y,
            hp: stats.get(StatType::MaxHp),
            mp: stats.get(StatType::MaxMp),
            stats,
            stat_points: 5,
            cash: 100,
            inventory: Inventory::new(),
            equipment: Equipment::default(),
        }
    }
}

/// The database collaborator of the server core.
pub trait CredentialStore: Send + Sync {
    fn verify(&self, name: &str, password: &str) -> Result<bool, DbError>;

    /// Returns `Ok(false)` if the name is taken.
    fn create_account(
        &self,
        name: &str,
        password: &str,
        email: &str,
        starting: CharacterRecord,
    ) -> Result<bool, DbError>;

    fn characters(&self, account: &str) -> Result<Vec<CharacterRecord>, DbError>;

    fn save_character(&self, account: &str, record: &CharacterRecord) -> Result<(), DbError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    name: String,
    password: String,
    email: String,
    characters: Vec<CharacterRecord>,
}

fn account_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: RwLock<HashMap<String, AccountRecord>>,
    path: Option<PathBuf>,
}

impl AccountStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the database at `path`, starting empty if the file does not exist yet.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let accounts = if path.exists() {
            let bytes = fs::read(path)?;
            let accounts: HashMap<String, AccountRecord> = bincode::deserialize(&bytes)?;
            info!("Loaded {} accounts from {}", accounts.len(), path.display());
            accounts
        } else {
            info!("No account database at {}, starting empty", path.display());
            HashMap::new()
        };

        Ok(Self {
            accounts: RwLock::new(accounts),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, accounts: &HashMap<String, AccountRecord>) -> Result<(), DbError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = bincode::serialize(accounts)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        debug!("Wrote {} accounts to {}", accounts.len(), path.display());
        Ok(())
    }
}

impl CredentialStore for AccountStore {
    fn verify(&self, name: &str, password: &str) -> Result<bool, DbError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(accounts
            .get(&account_key(name))
            .is_some_and(|account| account.password == password))
    }

    fn create_account(
        &self,
        name: &str,
        password: &str,
        email: &str,
        starting: CharacterRecord,
    ) -> Result<bool, DbError> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let key = account_key(name);
        if accounts.contains_key(&key) {
            return Ok(false);
        }

        accounts.insert(
            key.clone(),
            AccountRecord {
                name: name.to_string(),
                password: password.to_string(),
                email: email.to_string(),
                characters: vec![starting],
            },
        );

        if let Err(e) = self.persist(&accounts) {
            accounts.remove(&key);
            return Err(e);
        }
        Ok(true)
    }

    fn characters(&self, account: &str) -> Result<Vec<CharacterRecord>, DbError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        accounts
            .get(&account_key(account))
            .map(|account| account.characters.clone())
            .ok_or_else(|| DbError::UnknownAccount(account.to_string()))
    }

    fn save_character(&self, account: &str, record: &CharacterRecord) -> Result<(), DbError> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        let entry = accounts
            .get_mut(&account_key(account))
            .ok_or_else(|| DbError::UnknownAccount(account.to_string()))?;

        match entry
            .characters
            .iter_mut()
            .find(|character| character.name.eq_ignore_ascii_case(&record.name))
        {
            Some(existing) => *existing = record.clone(),
            None => entry.characters.push(record.clone()),
        }

        self.persist(&accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn start() -> StartPosition {
        StartPosition {
            map: 1,
            x: 10.0,
            y: 20.0,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("netgore-{}-{}.db", name, std::process::id()))
    }

    #[test]
    fn test_create_and_verify() {
        let store = AccountStore::in_memory();
        let created = assert_ok!(store.create_account(
            "Alice",
            "correct",
            "alice@example.com",
            CharacterRecord::new("Alice", start())
        ));
        assert!(created);

        assert!(assert_ok!(store.verify("alice", "correct")));
        assert!(assert_ok!(store.verify("ALICE", "correct")));
        assert!(!assert_ok!(store.verify("alice", "wrong")));
        assert!(!assert_ok!(store.verify("bob", "correct")));
    }

    #[test]
    fn test_names_are_unique_ignoring_case() {
        let store = AccountStore::in_memory();
        let record = CharacterRecord::new("alice", start());
        assert!(assert_ok!(store.create_account("alice", "pw1", "a@b", record.clone())));
        assert!(!assert_ok!(store.create_account("ALICE", "pw2", "a@b", record)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_new_account_has_starting_character() {
        let store = AccountStore::in_memory();
        store
            .create_account("bob", "pw", "b@c", CharacterRecord::new("bob", start()))
            .unwrap();

        let characters = store.characters("bob").unwrap();
        assert_eq!(characters.len(), 1);
        assert_eq!(characters[0].name, "bob");
        assert_eq!(characters[0].map, 1);
        assert_eq!(characters[0].hp, characters[0].stats.get(StatType::MaxHp));
        assert_err!(store.characters("nobody"));
    }

    #[test]
    fn test_save_character_replaces_by_name() {
        let store = AccountStore::in_memory();
        let mut record = CharacterRecord::new("bob", start());
        store.create_account("bob", "pw", "b@c", record.clone()).unwrap();

        record.cash = 999;
        record.x = 55.0;
        store.save_character("bob", &record).unwrap();

        let characters = store.characters("bob").unwrap();
        assert_eq!(characters.len(), 1);
        assert_eq!(characters[0].cash, 999);
        assert!(matches!(
            store.save_character("ghost", &record),
            Err(DbError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_file_backed_store_survives_reopen() {
        let path = temp_path("reopen");
        let _ = fs::remove_file(&path);

        {
            let store = AccountStore::open(&path).unwrap();
            assert!(store.is_empty());
            let mut record = CharacterRecord::new("carol", start());
            store
                .create_account("carol", "secret", "c@d", record.clone())
                .unwrap();
            record.inventory.add(3, 7);
            store.save_character("carol", &record).unwrap();
        }

        let store = AccountStore::open(&path).unwrap();
        assert!(store.verify("carol", "secret").unwrap());
        let characters = store.characters("carol").unwrap();
        assert_eq!(characters[0].inventory.get(0).unwrap().amount, 7);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let path = temp_path("corrupt");
        fs::write(&path, [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]).unwrap();
        assert!(AccountStore::open(&path).is_err());
        let _ = fs::remove_file(&path);
    }
}
