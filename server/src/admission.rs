//! Login admission control.
//!
//! A login attempt moves through three checks: the credentials are verified, the account must not
//! already be online, and the account name is reserved. All three run under one lock, so two
//! concurrent attempts for the same account can never both pass the online check. The loser gets
//! [`LoginRejection::AlreadyOnline`].
//!
//! A granted login yields a [`PendingAccount`], which becomes a playing session once the client
//! selects one of its characters.

use crate::accounts::{CharacterRecord, CredentialStore, DbError};
use crate::content::StartPosition;
use log::{error, info};
use shared::protocol::{GameMessage, MAX_EMAIL_LENGTH, MAX_NAME_LENGTH, MAX_PASSWORD_LENGTH};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginRejection {
    #[error("invalid account name or password")]
    BadCredentials,
    #[error("account is already online")]
    AlreadyOnline,
    #[error(transparent)]
    Store(#[from] DbError),
}

impl LoginRejection {
    pub fn message(&self) -> GameMessage {
        match self {
            Self::BadCredentials => GameMessage::LoginInvalidNamePassword,
            Self::AlreadyOnline => GameMessage::LoginUserAlreadyOnline,
            Self::Store(_) => GameMessage::LoginServerError,
        }
    }
}

#[derive(Debug, Error)]
pub enum CreateAccountError {
    #[error("invalid account name")]
    InvalidName,
    #[error("invalid password")]
    InvalidPassword,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("account name is in use")]
    NameInUse,
    #[error(transparent)]
    Store(#[from] DbError),
}

impl CreateAccountError {
    pub fn message(&self) -> GameMessage {
        match self {
            Self::InvalidName => GameMessage::CreateAccountInvalidName,
            Self::InvalidPassword => GameMessage::CreateAccountInvalidPassword,
            Self::InvalidEmail => GameMessage::CreateAccountInvalidEmail,
            Self::NameInUse => GameMessage::CreateAccountNameInUse,
            Self::Store(_) => GameMessage::CreateAccountServerError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no character at index {0}")]
    InvalidIndex(u8),
    #[error("a character was already selected")]
    AlreadySelected,
}

pub fn is_valid_account_name(name: &str) -> bool {
    (3..=MAX_NAME_LENGTH).contains(&name.len()) && name.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn is_valid_password(password: &str) -> bool {
    (3..=MAX_PASSWORD_LENGTH).contains(&password.len())
        && !password.chars().any(char::is_whitespace)
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LENGTH
        && email
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && !domain.is_empty())
}

/// An account that passed login and has not chosen a character yet.
#[derive(Debug, Clone)]
pub struct PendingAccount {
    account: String,
    characters: Vec<CharacterRecord>,
    selected: bool,
}

impl PendingAccount {
    pub fn new(account: &str, characters: Vec<CharacterRecord>) -> Self {
        Self {
            account: account.to_string(),
            characters,
            selected: false,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn character_names(&self) -> Vec<String> {
        self.characters
            .iter()
            .map(|character| character.name.clone())
            .collect()
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Picks the character the session will play. Only the first valid selection succeeds.
    pub fn select(&mut self, index: u8) -> Result<CharacterRecord, SelectionError> {
        if self.selected {
            return Err(SelectionError::AlreadySelected);
        }
        let record = self
            .characters
            .get(index as usize)
            .cloned()
            .ok_or(SelectionError::InvalidIndex(index))?;
        self.selected = true;
        Ok(record)
    }
}

pub struct AdmissionControl {
    store: Arc<dyn CredentialStore>,
    start: StartPosition,
    /// Lower-cased names of every account that is logged in. The lock also serialises the whole
    /// login path.
    online: Mutex<HashSet<String>>,
}

impl AdmissionControl {
    pub fn new(store: Arc<dyn CredentialStore>, start: StartPosition) -> Self {
        Self {
            store,
            start,
            online: Mutex::new(HashSet::new()),
        }
    }

    pub fn login(&self, name: &str, password: &str) -> Result<PendingAccount, LoginRejection> {
        let mut online = self.online.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.store.verify(name, password)? {
            info!("Login failed for `{}`: bad credentials", name);
            return Err(LoginRejection::BadCredentials);
        }

        let key = name.to_ascii_lowercase();
        if online.contains(&key) {
            info!("Login failed for `{}`: already online", name);
            return Err(LoginRejection::AlreadyOnline);
        }

        let characters = self.store.characters(name)?;
        online.insert(key);
        info!("Account `{}` logged in", name);
        Ok(PendingAccount::new(name, characters))
    }

    /// Frees the account name for future logins. Returns false if it was not online.
    pub fn release(&self, account: &str) -> bool {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&account.to_ascii_lowercase())
    }

    pub fn is_online(&self, account: &str) -> bool {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&account.to_ascii_lowercase())
    }

    pub fn online_count(&self) -> usize {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn create_account(
        &self,
        name: &str,
        password: &str,
        email: &str,
    ) -> Result<(), CreateAccountError> {
        if !is_valid_account_name(name) {
            return Err(CreateAccountError::InvalidName);
        }
        if !is_valid_password(password) {
            return Err(CreateAccountError::InvalidPassword);
        }
        if !is_valid_email(email) {
            return Err(CreateAccountError::InvalidEmail);
        }

        let starting = CharacterRecord::new(name, self.start);
        match self.store.create_account(name, password, email, starting) {
            Ok(true) => {
                info!("Created account `{}`", name);
                Ok(())
            }
            Ok(false) => Err(CreateAccountError::NameInUse),
            Err(e) => {
                error!("Failed to create account `{}`: {}", name, e);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountStore;
    use std::sync::Barrier;
    use std::thread;

    fn start() -> StartPosition {
        StartPosition {
            map: 1,
            x: 0.0,
            y: 0.0,
        }
    }

    fn admission_with(accounts: &[(&str, &str)]) -> AdmissionControl {
        let admission = AdmissionControl::new(Arc::new(AccountStore::in_memory()), start());
        for (name, password) in accounts {
            admission
                .create_account(name, password, "someone@example.com")
                .unwrap();
        }
        admission
    }

    #[test]
    fn test_login_grants_pending_account() {
        let admission = admission_with(&[("alice", "correct")]);
        let pending = admission.login("alice", "correct").unwrap();
        assert_eq!(pending.account(), "alice");
        assert_eq!(pending.character_names(), vec!["alice".to_string()]);
        assert!(admission.is_online("ALICE"));
    }

    #[test]
    fn test_bad_credentials_do_not_reserve() {
        let admission = admission_with(&[("alice", "correct")]);
        assert!(matches!(
            admission.login("alice", "wrong"),
            Err(LoginRejection::BadCredentials)
        ));
        assert!(matches!(
            admission.login("nobody", "correct"),
            Err(LoginRejection::BadCredentials)
        ));
        assert_eq!(admission.online_count(), 0);
    }

    #[test]
    fn test_second_login_is_already_online_until_released() {
        let admission = admission_with(&[("alice", "correct")]);
        admission.login("alice", "correct").unwrap();

        let rejection = admission.login("Alice", "correct").unwrap_err();
        assert!(matches!(rejection, LoginRejection::AlreadyOnline));
        assert_eq!(rejection.message(), GameMessage::LoginUserAlreadyOnline);

        assert!(admission.release("alice"));
        assert!(!admission.release("alice"));
        assert!(admission.login("alice", "correct").is_ok());
    }

    #[test]
    fn test_concurrent_logins_admit_exactly_one() {
        const ATTEMPTS: usize = 16;

        let admission = Arc::new(admission_with(&[("alice", "correct")]));
        let barrier = Arc::new(Barrier::new(ATTEMPTS));

        let workers: Vec<_> = (0..ATTEMPTS)
            .map(|_| {
                let admission = Arc::clone(&admission);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    admission.login("alice", "correct")
                })
            })
            .collect();

        let results: Vec<_> = workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect();

        let granted = results.iter().filter(|result| result.is_ok()).count();
        let already_online = results
            .iter()
            .filter(|result| matches!(result, Err(LoginRejection::AlreadyOnline)))
            .count();
        assert_eq!(granted, 1);
        assert_eq!(already_online, ATTEMPTS - 1);
        assert_eq!(admission.online_count(), 1);
    }

    #[test]
    fn test_selection_happens_once() {
        let admission = admission_with(&[("alice", "correct")]);
        let mut pending = admission.login("alice", "correct").unwrap();

        assert_eq!(pending.select(3), Err(SelectionError::InvalidIndex(3)));
        assert!(!pending.is_selected());

        let record = pending.select(0).unwrap();
        assert_eq!(record.name, "alice");
        assert_eq!(pending.select(0), Err(SelectionError::AlreadySelected));
    }

    #[test]
    fn test_account_creation_validation() {
        let admission = admission_with(&[("alice", "correct")]);
        let check = |name: &str, password: &str, email: &str| {
            admission
                .create_account(name, password, email)
                .map_err(|e| e.message())
        };

        assert_eq!(
            check("al", "password", "a@b"),
            Err(GameMessage::CreateAccountInvalidName)
        );
        assert_eq!(
            check("bad name", "password", "a@b"),
            Err(GameMessage::CreateAccountInvalidName)
        );
        assert_eq!(
            check("bob", "pass word", "a@b"),
            Err(GameMessage::CreateAccountInvalidPassword)
        );
        assert_eq!(
            check("bob", "password", "nowhere"),
            Err(GameMessage::CreateAccountInvalidEmail)
        );
        assert_eq!(
            check("ALICE", "password", "a@b"),
            Err(GameMessage::CreateAccountNameInUse)
        );
        assert_eq!(check("bob", "password", "a@b"), Ok(()));
    }
}
