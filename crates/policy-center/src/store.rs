//! In-memory hierarchical document store.
//!
//! The committed document lives behind an [`ArcSwap`], so read transactions are
//! a single atomic load. Write transactions copy the document, apply patches to
//! the copy and publish it on commit with a compare-and-swap against the
//! document they started from.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PolicyError;

/// Slash separated location inside the document; `/` is the root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(doc, |node, segment| node.as_object()?.get(segment))
    }
}

impl FromStr for StorePath {
    type Err = PolicyError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(PolicyError::Invalid(format!(
                "store path '{raw}' must start with '/'"
            )));
        };
        let segments: Vec<String> = rest
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self(segments))
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
}

/// One Add/Remove instruction against the document.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: StorePath,
    pub value: Value,
}

impl PatchOperation {
    pub fn add(path: StorePath, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path,
            value,
        }
    }

    pub fn remove(path: StorePath) -> Self {
        Self {
            op: PatchOp::Remove,
            path,
            value: Value::Null,
        }
    }
}

impl fmt::Display for PatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            PatchOp::Add => write!(f, "add {} = {}", self.path, self.value),
            PatchOp::Remove => write!(f, "remove {}", self.path),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnMode {
    Read,
    Write,
}

/// Unit of work against a [`PolicyStore`].
pub struct Transaction {
    id: u64,
    base: Arc<Value>,
    working: Option<Value>,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> TxnMode {
        if self.working.is_some() {
            TxnMode::Write
        } else {
            TxnMode::Read
        }
    }

    /// Document as seen by this transaction, including its own uncommitted writes.
    pub fn document(&self) -> &Value {
        self.working.as_ref().unwrap_or(&self.base)
    }

    pub fn get(&self, path: &StorePath) -> Option<&Value> {
        path.resolve(self.document())
    }
}

pub struct PolicyStore {
    current: ArcSwap<Value>,
    revision: AtomicU64,
    next_txn: AtomicU64,
}

impl PolicyStore {
    pub fn new(document: Value) -> Self {
        Self {
            current: ArcSwap::from_pointee(document),
            revision: AtomicU64::new(1),
            next_txn: AtomicU64::new(1),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn begin(&self, mode: TxnMode) -> Transaction {
        let base = self.current.load_full();
        let working = match mode {
            TxnMode::Read => None,
            TxnMode::Write => Some(Value::clone(&base)),
        };
        Transaction {
            id: self.next_txn.fetch_add(1, Ordering::Relaxed),
            base,
            working,
        }
    }

    pub fn read(&self, txn: &Transaction, path: &StorePath) -> Result<Value, PolicyError> {
        txn.get(path)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(path.to_string()))
    }

    pub fn write(
        &self,
        txn: &mut Transaction,
        op: PatchOp,
        path: &StorePath,
        value: Value,
    ) -> Result<(), PolicyError> {
        let Some(doc) = txn.working.as_mut() else {
            return Err(PolicyError::PatchApplication(format!(
                "transaction {} is read-only",
                txn.id
            )));
        };
        match op {
            PatchOp::Add => add_at(doc, path, value),
            PatchOp::Remove => {
                remove_at(doc, path);
                Ok(())
            }
        }
    }

    pub fn apply(&self, txn: &mut Transaction, patch: &PatchOperation) -> Result<(), PolicyError> {
        self.write(txn, patch.op, &patch.path, patch.value.clone())
    }

    /// Publishes the transaction's writes and returns the new revision.
    /// Read transactions commit trivially.
    pub fn commit(&self, txn: Transaction) -> Result<u64, PolicyError> {
        let Transaction { id, base, working } = txn;
        let Some(doc) = working else {
            return Ok(self.revision());
        };
        let previous = self.current.compare_and_swap(&base, Arc::new(doc));
        if !Arc::ptr_eq(&previous, &base) {
            return Err(PolicyError::PatchApplication(format!(
                "transaction {id} lost a race with a concurrent commit"
            )));
        }
        Ok(self.revision.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn abort(&self, txn: Transaction) {
        drop(txn);
    }
}

fn add_at(doc: &mut Value, path: &StorePath, value: Value) -> Result<(), PolicyError> {
    let Some((last, parents)) = path.segments().split_last() else {
        *doc = value;
        return Ok(());
    };
    let mut node = doc;
    for segment in parents {
        node = node
            .as_object_mut()
            .and_then(|map| map.get_mut(segment))
            .ok_or_else(|| {
                PolicyError::PatchApplication(format!("parent of {path} does not exist"))
            })?;
    }
    let map: &mut Map<String, Value> = node.as_object_mut().ok_or_else(|| {
        PolicyError::PatchApplication(format!("parent of {path} is not an object"))
    })?;
    map.insert(last.clone(), value);
    Ok(())
}

fn remove_at(doc: &mut Value, path: &StorePath) {
    let Some((last, parents)) = path.segments().split_last() else {
        *doc = Value::Object(Map::new());
        return;
    };
    let mut node = doc;
    for segment in parents {
        match node.as_object_mut().and_then(|map| map.get_mut(segment)) {
            Some(next) => node = next,
            None => return,
        }
    }
    if let Some(map) = node.as_object_mut() {
        map.remove(last);
    }
}
