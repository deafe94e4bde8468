use std::path::Path;

use sled::{Db, Tree};

use super::{
    sort_by_total_desc, Account, AccountStore, Statistics, StudentRecord, StudentStore,
    StudentUpdate,
};
use crate::Result;

const STUDENTS_TREE: &str = "students";
const ACCOUNTS_TREE: &str = "accounts";

/// A persistent store backed by the `sled` embedded database.
///
/// Records are JSON-encoded under their key. `sled::Db` is internally
/// `Arc`-based, so every clone is a cheap, thread-safe handle.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    students: Tree,
    accounts: Tree,
}

impl SledStore {
    /// Creates a `SledStore` from an already-opened sled `Db`.
    pub fn new(db: Db) -> Result<Self> {
        let students = db.open_tree(STUDENTS_TREE)?;
        let accounts = db.open_tree(ACCOUNTS_TREE)?;
        Ok(Self {
            db,
            students,
            accounts,
        })
    }

    /// Opens (or creates) a store in `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(sled::open(path)?)
    }
}

impl StudentStore for SledStore {
    fn create(&self, record: StudentRecord) -> Result<bool> {
        let value = serde_json::to_vec(&record)?;
        // Insert only if absent so two racing creates cannot both win.
        let inserted = self
            .students
            .compare_and_swap(
                record.student_id.as_bytes(),
                None as Option<&[u8]>,
                Some(value),
            )?
            .is_ok();
        if inserted {
            self.db.flush()?;
        }
        Ok(inserted)
    }

    fn delete(&self, student_id: &str) -> Result<bool> {
        let removed = self.students.remove(student_id.as_bytes())?.is_some();
        if removed {
            self.db.flush()?;
        }
        Ok(removed)
    }

    fn update(&self, update: &StudentUpdate) -> Result<bool> {
        let key = update.student_id.as_bytes();
        loop {
            let Some(current) = self.students.get(key)? else {
                return Ok(false);
            };
            let mut record: StudentRecord = serde_json::from_slice(&current)?;
            update.apply_to(&mut record);
            let value = serde_json::to_vec(&record)?;

            // Lost a race with another writer: retry against the fresh value.
            if self
                .students
                .compare_and_swap(key, Some(&current[..]), Some(value))?
                .is_ok()
            {
                self.db.flush()?;
                return Ok(true);
            }
        }
    }

    fn read(&self, student_id: &str) -> Result<Option<StudentRecord>> {
        match self.students.get(student_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_sorted_by_total_desc(&self) -> Result<Vec<StudentRecord>> {
        let mut records = self
            .students
            .iter()
            .values()
            .map(|bytes| -> Result<StudentRecord> { Ok(serde_json::from_slice(&bytes?)?) })
            .collect::<Result<Vec<_>>>()?;
        sort_by_total_desc(&mut records);
        Ok(records)
    }

    fn aggregate(&self) -> Result<Statistics> {
        let records = self.list_sorted_by_total_desc()?;
        Ok(Statistics::from_records(&records))
    }
}

impl AccountStore for SledStore {
    fn account(&self, username: &str) -> Result<Option<Account>> {
        match self.accounts.get(username.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_account(&self, account: Account) -> Result<()> {
        let value = serde_json::to_vec(&account)?;
        self.accounts.insert(account.username.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn set_password_hash(&self, username: &str, password_hash: String) -> Result<bool> {
        let key = username.as_bytes();
        loop {
            let Some(current) = self.accounts.get(key)? else {
                return Ok(false);
            };
            let mut account: Account = serde_json::from_slice(&current)?;
            account.password_hash = password_hash.clone();
            let value = serde_json::to_vec(&account)?;
            if self
                .accounts
                .compare_and_swap(key, Some(&current[..]), Some(value))?
                .is_ok()
            {
                self.db.flush()?;
                return Ok(true);
            }
        }
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        self.accounts
            .iter()
            .values()
            .map(|bytes| -> Result<Account> { Ok(serde_json::from_slice(&bytes?)?) })
            .collect()
    }
}
