//! Document storage: signed XMLs going out, receipt payloads coming back.
//! The store is deliberately dumb - content-addressed by the canonical
//! document filename plus an artifact kind.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    SignedXml,
    /// Receipt exactly as the gateway handed it over, before decoding.
    CdrBase64,
    /// Decoded receipt XML.
    Cdr,
}

impl FileKind {
    fn dir(&self) -> &'static str {
        match self {
            FileKind::SignedXml => "signed",
            FileKind::CdrBase64 => "cdr_b64",
            FileKind::Cdr => "cdr",
        }
    }

    fn file_name(&self, name: &str) -> String {
        match self {
            FileKind::SignedXml => format!("{name}.xml"),
            FileKind::CdrBase64 => format!("{name}.b64"),
            // Receipt files carry the authority's R- prefix.
            FileKind::Cdr => format!("R-{name}.xml"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("signed document not found: {0}")]
    Missing(String),
}

pub trait SignedDocumentStore: Send + Sync {
    fn get_signed_xml(&self, filename: &str) -> Result<Vec<u8>, StoreError>;
    fn upload_raw(&self, filename: &str, bytes: &[u8], kind: FileKind) -> Result<(), StoreError>;
    fn get_cdr(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn upload_cdr(&self, filename: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.upload_raw(filename, bytes, FileKind::Cdr)
    }
}

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, filename: &str, kind: FileKind) -> PathBuf {
        self.root.join(kind.dir()).join(kind.file_name(filename))
    }
}

impl SignedDocumentStore for FsStore {
    fn get_signed_xml(&self, filename: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(filename, FileKind::SignedXml);
        if !path.exists() {
            return Err(StoreError::Missing(filename.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn upload_raw(&self, filename: &str, bytes: &[u8], kind: FileKind) -> Result<(), StoreError> {
        let path = self.path_for(filename, kind);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn get_cdr(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(filename, FileKind::Cdr);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<(FileKind, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, filename: &str, bytes: &[u8], kind: FileKind) {
        self.files
            .lock()
            .expect("store lock")
            .insert((kind, filename.to_string()), bytes.to_vec());
    }

    pub fn get(&self, filename: &str, kind: FileKind) -> Option<Vec<u8>> {
        self.files
            .lock()
            .expect("store lock")
            .get(&(kind, filename.to_string()))
            .cloned()
    }
}

impl SignedDocumentStore for MemoryStore {
    fn get_signed_xml(&self, filename: &str) -> Result<Vec<u8>, StoreError> {
        self.get(filename, FileKind::SignedXml)
            .ok_or_else(|| StoreError::Missing(filename.to_string()))
    }

    fn upload_raw(&self, filename: &str, bytes: &[u8], kind: FileKind) -> Result<(), StoreError> {
        self.put(filename, bytes, kind);
        Ok(())
    }

    fn get_cdr(&self, filename: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get(filename, FileKind::Cdr))
    }
}
