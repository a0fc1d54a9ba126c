//! Dispatch row persistence. The sled repository applies every row
//! mutation inside one tree transaction: the update's fields land together
//! or not at all.

use crate::model::{Dispatch, DispatchUpdate};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("dispatch not found: {0}")]
    NotFound(String),
    #[error("dispatch already exists: {0}")]
    Duplicate(String),
    #[error("repository storage error: {0}")]
    Storage(String),
    #[error("row codec error: {0}")]
    Codec(String),
}

impl From<sled::Error> for RepoError {
    fn from(err: sled::Error) -> Self {
        RepoError::Storage(err.to_string())
    }
}

pub trait DispatchRepository: Send + Sync {
    fn insert(&self, row: &Dispatch) -> Result<(), RepoError>;
    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Dispatch>, RepoError>;
    /// Atomically read-modify-write one row. Returns the row as persisted.
    fn update(&self, external_id: &str, update: &DispatchUpdate) -> Result<Dispatch, RepoError>;
    fn list(&self) -> Result<Vec<Dispatch>, RepoError>;
}

pub struct SledRepository {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let db = sled::open(path)?;
        let tree = db.open_tree("dispatches")?;
        Ok(Self { db, tree })
    }

    /// Allocate a monotonic row id. Never reused, even across restarts or
    /// after deletions.
    pub fn next_id(&self) -> Result<u64, RepoError> {
        Ok(self.db.generate_id()?)
    }
}

fn decode_row(raw: &[u8]) -> Result<Dispatch, RepoError> {
    serde_json::from_slice(raw).map_err(|e| RepoError::Codec(e.to_string()))
}

fn encode_row(row: &Dispatch) -> Result<Vec<u8>, RepoError> {
    serde_json::to_vec(row).map_err(|e| RepoError::Codec(e.to_string()))
}

impl DispatchRepository for SledRepository {
    fn insert(&self, row: &Dispatch) -> Result<(), RepoError> {
        let key = row.external_id.as_bytes();
        if self.tree.get(key)?.is_some() {
            return Err(RepoError::Duplicate(row.external_id.clone()));
        }
        self.tree.insert(key, encode_row(row)?)?;
        Ok(())
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Dispatch>, RepoError> {
        match self.tree.get(external_id.as_bytes())? {
            Some(raw) => Ok(Some(decode_row(&raw)?)),
            None => Ok(None),
        }
    }

    fn update(&self, external_id: &str, update: &DispatchUpdate) -> Result<Dispatch, RepoError> {
        let result = self.tree.transaction(|tx| {
            let raw = tx.get(external_id.as_bytes())?.ok_or_else(|| {
                ConflictableTransactionError::Abort(RepoError::NotFound(external_id.to_string()))
            })?;
            let mut row = decode_row(&raw).map_err(ConflictableTransactionError::Abort)?;
            update.apply(&mut row);
            let encoded = encode_row(&row).map_err(ConflictableTransactionError::Abort)?;
            tx.insert(external_id.as_bytes(), encoded)?;
            Ok(row)
        });

        match result {
            Ok(row) => Ok(row),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(RepoError::Storage(err.to_string())),
        }
    }

    fn list(&self) -> Result<Vec<Dispatch>, RepoError> {
        let mut out = Vec::new();
        for item in self.tree.iter() {
            let (_k, v) = item?;
            out.push(decode_row(&v)?);
        }
        out.sort_by_key(|d| d.id);
        Ok(out)
    }
}

/// In-memory repository for tests and demos.
#[derive(Default)]
pub struct MemoryRepository {
    rows: Mutex<HashMap<String, Dispatch>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchRepository for MemoryRepository {
    fn insert(&self, row: &Dispatch) -> Result<(), RepoError> {
        let mut rows = self.rows.lock().map_err(|e| RepoError::Storage(e.to_string()))?;
        if rows.contains_key(&row.external_id) {
            return Err(RepoError::Duplicate(row.external_id.clone()));
        }
        rows.insert(row.external_id.clone(), row.clone());
        Ok(())
    }

    fn find_by_external_id(&self, external_id: &str) -> Result<Option<Dispatch>, RepoError> {
        let rows = self.rows.lock().map_err(|e| RepoError::Storage(e.to_string()))?;
        Ok(rows.get(external_id).cloned())
    }

    fn update(&self, external_id: &str, update: &DispatchUpdate) -> Result<Dispatch, RepoError> {
        let mut rows = self.rows.lock().map_err(|e| RepoError::Storage(e.to_string()))?;
        let row = rows
            .get_mut(external_id)
            .ok_or_else(|| RepoError::NotFound(external_id.to_string()))?;
        update.apply(row);
        Ok(row.clone())
    }

    fn list(&self) -> Result<Vec<Dispatch>, RepoError> {
        let rows = self.rows.lock().map_err(|e| RepoError::Storage(e.to_string()))?;
        let mut out: Vec<Dispatch> = rows.values().cloned().collect();
        out.sort_by_key(|d| d.id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gre_core::DispatchState;

    fn sample(external_id: &str) -> Dispatch {
        Dispatch {
            id: 7,
            external_id: external_id.into(),
            document_type_id: "09".into(),
            series: "T001".into(),
            number: 1,
            filename: "20601234567-09-T001-1".into(),
            ticket: None,
            reception_date: None,
            state: DispatchState::Pending,
            has_cdr: false,
            qr_url: None,
        }
    }

    #[test]
    fn sled_round_trip_and_atomic_update() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path()).unwrap();

        repo.insert(&sample("ext-1")).unwrap();
        assert!(matches!(
            repo.insert(&sample("ext-1")),
            Err(RepoError::Duplicate(_))
        ));

        let update = DispatchUpdate {
            state: Some(DispatchState::Sent),
            ticket: Some("1609".into()),
            reception_date: Some("2026-08-30T10:00:00".into()),
            ..Default::default()
        };
        let row = repo.update("ext-1", &update).unwrap();
        assert_eq!(row.state, DispatchState::Sent);

        let reread = repo.find_by_external_id("ext-1").unwrap().unwrap();
        assert_eq!(reread.ticket.as_deref(), Some("1609"));
        assert_eq!(reread.state, DispatchState::Sent);
    }

    #[test]
    fn generated_ids_never_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path()).unwrap();

        let first = repo.next_id().unwrap();
        let second = repo.next_id().unwrap();
        assert!(second > first);

        // unaffected by row churn
        repo.insert(&sample("ext-1")).unwrap();
        let third = repo.next_id().unwrap();
        assert!(third > second);
    }

    #[test]
    fn updating_a_missing_row_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SledRepository::open(dir.path()).unwrap();
        assert!(matches!(
            repo.update("nope", &DispatchUpdate::default()),
            Err(RepoError::NotFound(_))
        ));
    }
}
