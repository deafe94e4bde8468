use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{
    sort_by_total_desc, Account, AccountStore, Statistics, StudentRecord, StudentStore,
    StudentUpdate,
};
use crate::{GradebookError, Result};

/// A non-persistent store held in process memory.
///
/// Clones share the same maps. Readers take the `RwLock` concurrently;
/// writers serialize on it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    students: Arc<RwLock<BTreeMap<String, StudentRecord>>>,
    accounts: Arc<RwLock<BTreeMap<String, Account>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> GradebookError {
    GradebookError::StringError("memory store lock poisoned".to_owned())
}

impl StudentStore for MemoryStore {
    fn create(&self, record: StudentRecord) -> Result<bool> {
        let mut students = self.students.write().map_err(poisoned)?;
        if students.contains_key(&record.student_id) {
            return Ok(false);
        }
        students.insert(record.student_id.clone(), record);
        Ok(true)
    }

    fn delete(&self, student_id: &str) -> Result<bool> {
        let mut students = self.students.write().map_err(poisoned)?;
        Ok(students.remove(student_id).is_some())
    }

    fn update(&self, update: &StudentUpdate) -> Result<bool> {
        let mut students = self.students.write().map_err(poisoned)?;
        match students.get_mut(&update.student_id) {
            Some(record) => {
                update.apply_to(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read(&self, student_id: &str) -> Result<Option<StudentRecord>> {
        let students = self.students.read().map_err(poisoned)?;
        Ok(students.get(student_id).cloned())
    }

    fn list_sorted_by_total_desc(&self) -> Result<Vec<StudentRecord>> {
        let mut records: Vec<StudentRecord> = {
            let students = self.students.read().map_err(poisoned)?;
            students.values().cloned().collect()
        };
        sort_by_total_desc(&mut records);
        Ok(records)
    }

    fn aggregate(&self) -> Result<Statistics> {
        let students = self.students.read().map_err(poisoned)?;
        Ok(Statistics::from_records(students.values()))
    }
}

impl AccountStore for MemoryStore {
    fn account(&self, username: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.get(username).cloned())
    }

    fn put_account(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        accounts.insert(account.username.clone(), account);
        Ok(())
    }

    fn set_password_hash(&self, username: &str, password_hash: String) -> Result<bool> {
        let mut accounts = self.accounts.write().map_err(poisoned)?;
        match accounts.get_mut(username) {
            Some(account) => {
                account.password_hash = password_hash;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().map_err(poisoned)?;
        Ok(accounts.values().cloned().collect())
    }
}
