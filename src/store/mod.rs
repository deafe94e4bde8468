use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::Result;

/// One student's scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    /// Unique key.
    pub student_id: String,
    /// Display name.
    pub name: String,
    /// Free-form gender label.
    pub gender: String,
    /// Score for subject 1.
    pub score1: f64,
    /// Score for subject 2.
    pub score2: f64,
    /// Score for subject 3.
    pub score3: f64,
}

impl StudentRecord {
    /// Sum of the three scores. Never stored.
    pub fn total(&self) -> f64 {
        self.score1 + self.score2 + self.score3
    }
}

/// A partial update. `None` leaves the stored field untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudentUpdate {
    /// Record to change.
    pub student_id: String,
    /// New name.
    pub name: Option<String>,
    /// New gender.
    pub gender: Option<String>,
    /// New subject 1 score.
    pub score1: Option<f64>,
    /// New subject 2 score.
    pub score2: Option<f64>,
    /// New subject 3 score.
    pub score3: Option<f64>,
}

impl StudentUpdate {
    /// An update for `student_id` that changes nothing yet.
    pub fn new(student_id: impl Into<String>) -> Self {
        StudentUpdate {
            student_id: student_id.into(),
            ..Default::default()
        }
    }

    /// Returns true when no field would change.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.gender.is_none()
            && self.score1.is_none()
            && self.score2.is_none()
            && self.score3.is_none()
    }

    /// Writes every present field into `record`.
    pub fn apply_to(&self, record: &mut StudentRecord) {
        if let Some(name) = &self.name {
            record.name = name.clone();
        }
        if let Some(gender) = &self.gender {
            record.gender = gender.clone();
        }
        if let Some(score) = self.score1 {
            record.score1 = score;
        }
        if let Some(score) = self.score2 {
            record.score2 = score;
        }
        if let Some(score) = self.score3 {
            record.score3 = score;
        }
    }
}

/// Average and maximum of one subject.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubjectStats {
    /// Mean score.
    pub average: f64,
    /// Highest score.
    pub max: f64,
}

/// Per-subject aggregates over the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    /// Subject 1.
    pub subject1: SubjectStats,
    /// Subject 2.
    pub subject2: SubjectStats,
    /// Subject 3.
    pub subject3: SubjectStats,
}

impl Statistics {
    /// Aggregates `records`. An empty input yields all zeros.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a StudentRecord>) -> Self {
        let mut count = 0usize;
        let mut sums = [0.0f64; 3];
        let mut maxima = [f64::NEG_INFINITY; 3];
        for record in records {
            count += 1;
            for (i, score) in [record.score1, record.score2, record.score3]
                .into_iter()
                .enumerate()
            {
                sums[i] += score;
                maxima[i] = maxima[i].max(score);
            }
        }
        if count == 0 {
            return Statistics::default();
        }
        let subject = |i: usize| SubjectStats {
            average: sums[i] / count as f64,
            max: maxima[i],
        };
        Statistics {
            subject1: subject(0),
            subject2: subject(1),
            subject3: subject(2),
        }
    }
}

/// A login account. The password is only ever held as a one-way hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Login name.
    pub username: String,
    /// Lowercase hex SHA-256 of the password.
    pub password_hash: String,
    /// Stored role string, resolved to a permission by the auth layer.
    pub role: String,
}

/// Create/read/update/delete/list/aggregate over student records.
///
/// Implementations must serialize conflicting writes; callers make no
/// ordering promise beyond one request at a time per connection.
pub trait StudentStore {
    /// Inserts `record`. Returns `false` without touching the store when
    /// the id already exists.
    fn create(&self, record: StudentRecord) -> Result<bool>;

    /// Removes a record. Returns `false` when the id is unknown.
    fn delete(&self, student_id: &str) -> Result<bool>;

    /// Applies a partial update. Returns `false` when the id is unknown.
    fn update(&self, update: &StudentUpdate) -> Result<bool>;

    /// Looks up one record.
    fn read(&self, student_id: &str) -> Result<Option<StudentRecord>>;

    /// All records, highest total first, ties by ascending id.
    fn list_sorted_by_total_desc(&self) -> Result<Vec<StudentRecord>>;

    /// Per-subject average and maximum.
    fn aggregate(&self) -> Result<Statistics>;
}

/// Storage for login accounts.
pub trait AccountStore {
    /// Looks up an account by username.
    fn account(&self, username: &str) -> Result<Option<Account>>;

    /// Inserts or replaces an account.
    fn put_account(&self, account: Account) -> Result<()>;

    /// Replaces the stored hash. Returns `false` when the user is unknown.
    fn set_password_hash(&self, username: &str, password_hash: String) -> Result<bool>;

    /// Every account, ordered by username.
    fn accounts(&self) -> Result<Vec<Account>>;
}

/// A complete backend: students plus accounts.
///
/// Cloning yields a new handle onto the same data; the server gives every
/// connection its own clone and drops it when the connection closes.
pub trait DataStore: StudentStore + AccountStore + Clone + Send + 'static {}

impl<T> DataStore for T where T: StudentStore + AccountStore + Clone + Send + 'static {}

fn by_total_desc(a: &StudentRecord, b: &StudentRecord) -> Ordering {
    b.total()
        .total_cmp(&a.total())
        .then_with(|| a.student_id.cmp(&b.student_id))
}

pub(crate) fn sort_by_total_desc(records: &mut [StudentRecord]) {
    records.sort_by(by_total_desc);
}

mod memory;
mod sled_store;

pub use self::memory::MemoryStore;
pub use self::sled_store::SledStore;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, scores: [f64; 3]) -> StudentRecord {
        StudentRecord {
            student_id: id.to_owned(),
            name: format!("name-{id}"),
            gender: "F".to_owned(),
            score1: scores[0],
            score2: scores[1],
            score3: scores[2],
        }
    }

    fn exercise<S: DataStore>(store: S) {
        assert!(store.create(record("a", [40.0, 30.0, 30.0])).unwrap());
        assert!(store.create(record("b", [90.0, 80.0, 80.0])).unwrap());
        assert!(store.create(record("c", [60.0, 60.0, 60.0])).unwrap());

        let mut dup = record("a", [1.0, 1.0, 1.0]);
        dup.name = "intruder".to_owned();
        assert!(!store.create(dup).unwrap());
        assert_eq!(store.read("a").unwrap().unwrap().name, "name-a");

        let order: Vec<String> = store
            .list_sorted_by_total_desc()
            .unwrap()
            .into_iter()
            .map(|r| r.student_id)
            .collect();
        assert_eq!(order, ["b", "c", "a"]);

        let mut update = StudentUpdate::new("a");
        update.score1 = Some(0.0);
        assert!(store.update(&update).unwrap());
        let a = store.read("a").unwrap().unwrap();
        assert_eq!(a.score1, 0.0);
        assert_eq!(a.score2, 30.0);
        assert_eq!(a.name, "name-a");
        assert!(!store.update(&StudentUpdate::new("zzz")).unwrap());

        let stats = store.aggregate().unwrap();
        assert_eq!(stats.subject1.max, 90.0);
        assert_eq!(stats.subject1.average, 50.0);

        assert!(store.delete("c").unwrap());
        assert!(!store.delete("c").unwrap());
        assert!(store.read("c").unwrap().is_none());
        assert_eq!(store.list_sorted_by_total_desc().unwrap().len(), 2);

        store
            .put_account(Account {
                username: "bob".to_owned(),
                password_hash: "h1".to_owned(),
                role: "user".to_owned(),
            })
            .unwrap();
        assert!(store.set_password_hash("bob", "h2".to_owned()).unwrap());
        assert!(!store.set_password_hash("nobody", "h".to_owned()).unwrap());
        assert_eq!(store.account("bob").unwrap().unwrap().password_hash, "h2");
        assert_eq!(store.accounts().unwrap().len(), 1);
    }

    #[test]
    fn memory_store_contract() {
        exercise(MemoryStore::new());
    }

    #[test]
    fn sled_store_contract() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        exercise(SledStore::new(db).unwrap());
    }

    #[test]
    fn empty_statistics_are_zero() {
        assert_eq!(Statistics::from_records(&[]), Statistics::default());
    }

    #[test]
    fn update_distinguishes_absent_from_zero() {
        let mut r = record("x", [10.0, 20.0, 30.0]);
        let mut update = StudentUpdate::new("x");
        assert!(update.is_empty());
        update.score2 = Some(0.0);
        assert!(!update.is_empty());
        update.apply_to(&mut r);
        assert_eq!((r.score1, r.score2, r.score3), (10.0, 0.0, 30.0));
    }
}
