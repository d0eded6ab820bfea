// 📎 Payment Proofs - opaque blobs forwarded to long-term storage
//
// The ledger never inspects a proof. It only needs to know whether one was
// supplied since the actor's last registration, to mention it in the outcome.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

use crate::error::PersistenceError;
use crate::persistence::json::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProofReceipt {
    pub actor_id: String,
    /// SHA-256 of the blob, hex encoded
    pub digest: String,
    pub size: usize,
}

impl ProofReceipt {
    fn for_blob(actor_id: &str, blob: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(blob);
        ProofReceipt {
            actor_id: actor_id.to_string(),
            digest: format!("{:x}", hasher.finalize()),
            size: blob.len(),
        }
    }
}

pub trait AttachmentStore: Send + Sync {
    fn store_proof(&self, actor_id: &str, blob: &[u8]) -> Result<ProofReceipt, PersistenceError>;

    /// Consume the "proof pending" flag for `actor_id`
    fn take_pending(&self, actor_id: &str) -> bool;
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// FILESYSTEM STORE
// ============================================================================

/// Blobs under `<root>/<actor>/<sha256>.bin`; identical uploads dedupe by name
pub struct FsAttachmentStore {
    root: PathBuf,
    pending: Mutex<HashSet<String>>,
}

impl FsAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsAttachmentStore {
            root: root.into(),
            pending: Mutex::new(HashSet::new()),
        }
    }

    fn actor_dir(&self, actor_id: &str) -> PathBuf {
        // ids come from the chat platform; keep them path-safe
        let safe: String = actor_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(safe)
    }

    pub fn proof_path(&self, receipt: &ProofReceipt) -> PathBuf {
        self.actor_dir(&receipt.actor_id)
            .join(format!("{}.bin", receipt.digest))
    }
}

impl AttachmentStore for FsAttachmentStore {
    fn store_proof(&self, actor_id: &str, blob: &[u8]) -> Result<ProofReceipt, PersistenceError> {
        let receipt = ProofReceipt::for_blob(actor_id, blob);
        let target = self.proof_path(&receipt);

        if !target.exists() {
            let tmp = target.with_extension("bin.tmp");
            write_atomic(&target, &tmp, blob)?;
        }

        info!(actor = %actor_id, digest = %receipt.digest, size = receipt.size, "payment proof stored");
        lock(&self.pending).insert(actor_id.to_string());
        Ok(receipt)
    }

    fn take_pending(&self, actor_id: &str) -> bool {
        lock(&self.pending).remove(actor_id)
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Default)]
pub struct MemoryAttachmentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    pending: Mutex<HashSet<String>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_count(&self) -> usize {
        lock(&self.blobs).len()
    }
}

impl AttachmentStore for MemoryAttachmentStore {
    fn store_proof(&self, actor_id: &str, blob: &[u8]) -> Result<ProofReceipt, PersistenceError> {
        let receipt = ProofReceipt::for_blob(actor_id, blob);
        lock(&self.blobs).insert(receipt.digest.clone(), blob.to_vec());
        lock(&self.pending).insert(actor_id.to_string());
        Ok(receipt)
    }

    fn take_pending(&self, actor_id: &str) -> bool {
        lock(&self.pending).remove(actor_id)
    }
}
