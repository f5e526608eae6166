//! User records and the store that keeps them.
//!
//! The game core only talks to [`UserStore`]; two implementations are
//! provided, an in-memory table and a JSON file that is rewritten after every
//! mutation.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Store-assigned key of a user record, of the form `user-N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered user as it is stored.
///
/// The password is kept in clear text and compared verbatim on login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub password: String,
    pub score: u32,
    #[serde(default)]
    pub asked_question_ids: BTreeSet<String>,
}

/// A single-field write against a user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    /// Adds to the score under the store lock, saturating at `u32::MAX`.
    AddScore(u32),
    /// Replaces the set of questions already served to the user.
    AskedQuestions(BTreeSet<String>),
}

/// Failures reported by a [`UserStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("no user with id {0}")]
    MissingUser(UserId),
    #[error("username {0} already exists")]
    DuplicateUsername(String),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed document store holding every registered user.
///
/// Calls are synchronous and may block; the server only invokes them from its
/// worker pool.
pub trait UserStore: Send + Sync {
    /// Looks a user up by exact username.
    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Registers a new user with a zero score and no question history.
    fn create(&self, username: &str, password: &str) -> Result<UserRecord, StoreError>;

    /// Applies one field write atomically. Fails with
    /// [`StoreError::MissingUser`] if `id` is unknown.
    fn update_field(&self, id: &UserId, update: FieldUpdate) -> Result<(), StoreError>;

    /// Users ordered by descending score, ties broken by username.
    fn top_n_by_score(&self, n: usize) -> Result<Vec<UserRecord>, StoreError>;
}

/// The user table shared by both store implementations.
#[derive(Debug, Default, Clone)]
struct Users {
    records: HashMap<UserId, UserRecord>,
    next_id: u64,
}

impl Users {
    fn from_records(records: Vec<UserRecord>) -> Self {
        let next_id = records
            .iter()
            .filter_map(|record| record.id.0.strip_prefix("user-")?.parse::<u64>().ok())
            .max()
            .map_or(1, |highest| highest + 1);

        Self {
            records: records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
            next_id,
        }
    }

    fn find_by_username(&self, username: &str) -> Option<UserRecord> {
        self.records
            .values()
            .find(|record| record.username == username)
            .cloned()
    }

    fn create(&mut self, username: &str, password: &str) -> Result<UserRecord, StoreError> {
        if self.find_by_username(username).is_some() {
            return Err(StoreError::DuplicateUsername(username.to_owned()));
        }

        self.next_id = self.next_id.max(1);
        let id = UserId(format!("user-{}", self.next_id));
        self.next_id += 1;

        let record = UserRecord {
            id: id.clone(),
            username: username.to_owned(),
            password: password.to_owned(),
            score: 0,
            asked_question_ids: BTreeSet::new(),
        };
        self.records.insert(id, record.clone());
        Ok(record)
    }

    fn update_field(&mut self, id: &UserId, update: FieldUpdate) -> Result<(), StoreError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::MissingUser(id.clone()))?;

        match update {
            FieldUpdate::AddScore(points) => record.score = record.score.saturating_add(points),
            FieldUpdate::AskedQuestions(asked) => record.asked_question_ids = asked,
        }
        Ok(())
    }

    fn ranked(&self) -> Vec<UserRecord> {
        let mut ranked: Vec<UserRecord> = self.records.values().cloned().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.username.cmp(&b.username)));
        ranked
    }

    fn snapshot(&self) -> Vec<UserRecord> {
        let mut records: Vec<UserRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

fn lock_users(users: &Mutex<Users>) -> Result<MutexGuard<'_, Users>, StoreError> {
    users
        .lock()
        .map_err(|_| StoreError::Unavailable("user table lock poisoned".to_owned()))
}

/// Users kept in process memory; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: Mutex<Users>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for MemoryUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(lock_users(&self.users)?.find_by_username(username))
    }

    fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(lock_users(&self.users)?.records.get(id).cloned())
    }

    fn create(&self, username: &str, password: &str) -> Result<UserRecord, StoreError> {
        lock_users(&self.users)?.create(username, password)
    }

    fn update_field(&self, id: &UserId, update: FieldUpdate) -> Result<(), StoreError> {
        lock_users(&self.users)?.update_field(id, update)
    }

    fn top_n_by_score(&self, n: usize) -> Result<Vec<UserRecord>, StoreError> {
        let mut ranked = lock_users(&self.users)?.ranked();
        ranked.truncate(n);
        Ok(ranked)
    }
}

/// Users persisted as a JSON array, rewritten after each mutation.
#[derive(Debug)]
pub struct JsonFileUserStore {
    path: PathBuf,
    users: Mutex<Users>,
}

impl JsonFileUserStore {
    /// Loads the file at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<UserRecord> = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            Vec::new()
        };
        info!("Loaded {} users from {}", records.len(), path.display());

        Ok(Self {
            path,
            users: Mutex::new(Users::from_records(records)),
        })
    }

    /// Writes `users` to a sibling temporary file, then renames it over the
    /// store file.
    fn persist(&self, users: &Users) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&users.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                debug!("Could not remove {}: {}", tmp.display(), cleanup);
            }
            return Err(e.into());
        }
        debug!("Persisted {} users to {}", users.records.len(), self.path.display());
        Ok(())
    }

    /// Runs `change` on a copy of the table and keeps the copy only once it
    /// is on disk.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut Users) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut users = lock_users(&self.users)?;
        let mut staged = users.clone();
        let output = change(&mut staged)?;
        if let Err(e) = self.persist(&staged) {
            warn!("Keeping previous users, {} not written: {}", self.path.display(), e);
            return Err(e);
        }
        *users = staged;
        Ok(output)
    }
}

impl UserStore for JsonFileUserStore {
    fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(lock_users(&self.users)?.find_by_username(username))
    }

    fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(lock_users(&self.users)?.records.get(id).cloned())
    }

    fn create(&self, username: &str, password: &str) -> Result<UserRecord, StoreError> {
        self.commit(|users| users.create(username, password))
    }

    fn update_field(&self, id: &UserId, update: FieldUpdate) -> Result<(), StoreError> {
        self.commit(|users| users.update_field(id, update))
    }

    fn top_n_by_score(&self, n: usize) -> Result<Vec<UserRecord>, StoreError> {
        let mut ranked = lock_users(&self.users)?.ranked();
        ranked.truncate(n);
        Ok(ranked)
    }
}
