//! Durable per-invoice records on the local filesystem.
//!
//! One JSON file per processed invoice, stored flat in a single directory.
//! The store doubles as the dedup ledger: a record's existence on disk is
//! the authoritative "already processed" signal, mirrored by an in-memory
//! cache seeded from a directory scan at open. The cache may briefly lag
//! the disk during startup but never leads it.
//!
//! Writes are atomic from a reader's perspective: records are fully
//! written into a `.pending/` scratch subdirectory and then renamed into
//! place. The scratch dir lives inside the store directory so the rename
//! never crosses a filesystem boundary; it is wiped at open since it can
//! only contain leftovers from a crash mid-write.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use anyhow::Context;
use pobox_api::{InvoiceRecord, PoNumber};
use thiserror::Error;
use tracing::{debug, info, warn};

const PENDING_DIR: &str = ".pending";
const RECORD_EXT: &str = ".json";
const CANONICAL_PREFIX: &str = "invoice_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no record for invoice {0}")]
    NotFound(PoNumber),
    /// PNs become filenames; one that cannot is refused outright.
    #[error("invoice number {0:?} cannot name a file")]
    InvalidKey(String),
    #[error("invoice record io")]
    Io(#[from] io::Error),
    #[error("invoice record corrupt")]
    Corrupt(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The on-disk invoice store (dedup ledger + retrieval source).
pub struct InvoiceStore {
    base_dir: PathBuf,
    pending_dir: PathBuf,
    /// PNs known to exist on disk. Guards only itself; file reads are
    /// lock-free.
    cache: Mutex<HashSet<PoNumber>>,
    /// Distinguishes concurrent scratch files. Writers never share a
    /// scratch path, so a rename always publishes a complete record.
    scratch_seq: AtomicU64,
}

impl InvoiceStore {
    /// Open (creating if needed) the store at `base_dir` and seed the
    /// dedup cache from the records already present.
    pub fn open(base_dir: PathBuf) -> anyhow::Result<Self> {
        fs::create_dir_all(&base_dir).with_context(|| {
            format!("could not create invoice dir {}", base_dir.display())
        })?;

        let pending_dir = base_dir.join(PENDING_DIR);
        remove_dir_all_idempotent(&pending_dir)
            .context("could not clear pending-write dir")?;
        fs::create_dir(&pending_dir)
            .context("could not create pending-write dir")?;

        let store = Self {
            base_dir,
            pending_dir,
            cache: Mutex::new(HashSet::new()),
            scratch_seq: AtomicU64::new(0),
        };
        let seeded = store.seed_cache().context("invoice dir scan failed")?;
        info!(
            "invoice store open at {} ({seeded} records)",
            store.base_dir.display(),
        );
        Ok(store)
    }

    /// Whether a record for `po` exists. O(1); consults only the cache.
    pub fn has(&self, po: &PoNumber) -> bool {
        self.cache.lock().unwrap().contains(po)
    }

    /// Persist a record for `po` and mark it processed. Records are
    /// immutable; overwriting an existing PN is a caller bug upstream but
    /// harmless here (same-content rename over the same path).
    pub fn put(
        &self,
        po: &PoNumber,
        record: &InvoiceRecord,
    ) -> Result<(), StoreError> {
        validate_key(po)?;
        let json = serde_json::to_vec_pretty(record)?;

        let seq = self.scratch_seq.fetch_add(1, Ordering::Relaxed);
        let scratch = self.pending_dir.join(format!("{seq:016x}"));
        let dest = self.canonical_path(po);

        fs::write(&scratch, &json)?;
        fs::rename(&scratch, &dest)?;

        self.cache.lock().unwrap().insert(po.clone());
        debug!("persisted invoice {po} to {}", dest.display());
        Ok(())
    }

    /// Read the record for `po`, canonical filename first, then the
    /// legacy `<PN>.json` form older deployments wrote.
    ///
    /// A miss for a PN the cache believes present is retried once: a
    /// writer may be mid-rename.
    pub fn get(&self, po: &PoNumber) -> Result<InvoiceRecord, StoreError> {
        validate_key(po)?;
        match self.read_once(po) {
            Err(err) if err.is_not_found() && self.has(po) => {
                debug!("retrying read of invoice {po} (rename window)");
                self.read_once(po)
            }
            other => other,
        }
    }

    /// Snapshot of all processed PNs.
    pub fn list(&self) -> Vec<PoNumber> {
        let mut pos: Vec<PoNumber> =
            self.cache.lock().unwrap().iter().cloned().collect();
        pos.sort();
        pos
    }

    /// Administrative removal of a record (both filename forms).
    pub fn delete(&self, po: &PoNumber) -> Result<(), StoreError> {
        validate_key(po)?;
        let mut removed = false;
        for path in [self.canonical_path(po), self.legacy_path(po)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(err) if err.kind() == io::ErrorKind::NotFound => (),
                Err(err) => return Err(err.into()),
            }
        }
        self.cache.lock().unwrap().remove(po);
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound(po.clone()))
        }
    }

    /// Where a record for `po` canonically lives (whether or not it
    /// exists yet). Recorded inside the record itself as `filePath`.
    pub fn record_path(&self, po: &PoNumber) -> PathBuf {
        self.canonical_path(po)
    }

    fn canonical_path(&self, po: &PoNumber) -> PathBuf {
        self.base_dir
            .join(format!("{CANONICAL_PREFIX}{po}{RECORD_EXT}"))
    }

    fn legacy_path(&self, po: &PoNumber) -> PathBuf {
        self.base_dir.join(format!("{po}{RECORD_EXT}"))
    }

    fn read_once(&self, po: &PoNumber) -> Result<InvoiceRecord, StoreError> {
        for path in [self.canonical_path(po), self.legacy_path(po)] {
            match fs::read(&path) {
                Ok(bytes) => {
                    let record: InvoiceRecord =
                        serde_json::from_slice(&bytes)?;
                    if !record.size_matches() {
                        warn!(
                            "record {} fileSize disagrees with payload",
                            path.display(),
                        );
                    }
                    return Ok(record);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => (),
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::NotFound(po.clone()))
    }

    fn seed_cache(&self) -> io::Result<usize> {
        let mut cache = self.cache.lock().unwrap();
        for entry in self.base_dir.read_dir()? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            // Skip non-UTF-8 names; we never write them.
            let Some(name) = entry.file_name().to_str().map(str::to_owned)
            else {
                continue;
            };
            if let Some(po) = po_from_filename(&name) {
                cache.insert(po);
            }
        }
        Ok(cache.len())
    }
}

/// `invoice_<PN>.json` or legacy `<PN>.json` to PN.
fn po_from_filename(name: &str) -> Option<PoNumber> {
    let stem = name.strip_suffix(RECORD_EXT)?;
    let po = stem.strip_prefix(CANONICAL_PREFIX).unwrap_or(stem);
    if po.is_empty() {
        None
    } else {
        Some(PoNumber::from(po))
    }
}

fn validate_key(po: &PoNumber) -> Result<(), StoreError> {
    let s = po.as_str();
    let bad = s.is_empty()
        || s.contains(['/', '\\'])
        || s == "."
        || s == "..";
    if bad {
        return Err(StoreError::InvalidKey(s.to_owned()));
    }
    Ok(())
}

fn remove_dir_all_idempotent(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
