use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use pf_columnar::Column;
use pf_types::FrameId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{Frame, FrameError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("unknown frame: {0}")]
    UnknownFrame(FrameId),
    #[error("derived column '{name}' is missing values for {frame}")]
    MissingFrame { name: String, frame: FrameId },
    #[error("column '{0}' already exists")]
    ColumnExists(String),
    #[error("no derived column named '{0}'")]
    UnknownColumn(String),
    #[error("store rejected the write: {0}")]
    Rejected(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Read access to the time-indexed point cloud plus the single write path
/// used for derived columns.
pub trait DataStore: Send + Sync {
    fn frame_ids(&self) -> Vec<FrameId>;

    fn get_frame(&self, id: FrameId) -> Result<Arc<Frame>, StoreError>;

    /// Raw (imported) column names.
    fn list_columns(&self) -> BTreeSet<String>;

    /// Derived column names mapped to their defining formula text.
    fn list_derived_columns(&self) -> BTreeMap<String, String>;

    /// Persist a derived column for every frame at once. Implementations must
    /// either make every frame's values visible or none of them.
    fn persist_derived_column(
        &self,
        name: &str,
        formula: &str,
        values: BTreeMap<FrameId, Column>,
    ) -> Result<(), StoreError>;

    /// Returns `true` when a column was removed.
    fn drop_derived_column(&self, name: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct DataInner {
    frames: BTreeMap<FrameId, Arc<Frame>>,
    raw_columns: BTreeSet<String>,
    derived: BTreeMap<String, String>,
}

/// Frames held in memory; readers get `Arc` snapshots, writers swap frames
/// under one write lock.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    inner: RwLock<DataInner>,
}

impl MemoryDataStore {
    /// Every frame must expose the same column names.
    pub fn new(frames: Vec<Frame>) -> Result<Self, StoreError> {
        let raw_columns: BTreeSet<String> = frames
            .first()
            .map(|frame| frame.column_names().map(str::to_owned).collect())
            .unwrap_or_default();

        let mut by_id = BTreeMap::new();
        for frame in frames {
            let names: BTreeSet<String> = frame.column_names().map(str::to_owned).collect();
            if names != raw_columns {
                return Err(FrameError::SchemaMismatch {
                    frame: frame.id(),
                    detail: format!("expected columns {raw_columns:?}, found {names:?}"),
                }
                .into());
            }
            by_id.insert(frame.id(), Arc::new(frame));
        }

        Ok(Self {
            inner: RwLock::new(DataInner {
                frames: by_id,
                raw_columns,
                derived: BTreeMap::new(),
            }),
        })
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.inner.read().frames.len()
    }
}

impl DataStore for MemoryDataStore {
    fn frame_ids(&self) -> Vec<FrameId> {
        self.inner.read().frames.keys().copied().collect()
    }

    fn get_frame(&self, id: FrameId) -> Result<Arc<Frame>, StoreError> {
        self.inner
            .read()
            .frames
            .get(&id)
            .cloned()
            .ok_or(StoreError::UnknownFrame(id))
    }

    fn list_columns(&self) -> BTreeSet<String> {
        self.inner.read().raw_columns.clone()
    }

    fn list_derived_columns(&self) -> BTreeMap<String, String> {
        self.inner.read().derived.clone()
    }

    fn persist_derived_column(
        &self,
        name: &str,
        formula: &str,
        mut values: BTreeMap<FrameId, Column>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.raw_columns.contains(name) || inner.derived.contains_key(name) {
            return Err(StoreError::ColumnExists(name.to_owned()));
        }
        if let Some(extra) = values.keys().find(|id| !inner.frames.contains_key(id)) {
            return Err(StoreError::UnknownFrame(*extra));
        }

        // Build every replacement frame before touching shared state.
        let mut replaced = BTreeMap::new();
        for (id, frame) in &inner.frames {
            let column = values.remove(id).ok_or_else(|| StoreError::MissingFrame {
                name: name.to_owned(),
                frame: *id,
            })?;
            replaced.insert(*id, Arc::new(frame.with_column(name, column)?));
        }

        inner.frames = replaced;
        inner.derived.insert(name.to_owned(), formula.to_owned());
        info!(column = name, frames = inner.frames.len(), "persisted derived column");
        Ok(())
    }

    fn drop_derived_column(&self, name: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        if inner.raw_columns.contains(name) {
            return Err(StoreError::Rejected(format!(
                "'{name}' is a raw column and cannot be dropped"
            )));
        }
        let existed = inner.derived.remove(name).is_some();
        // Frames are scrubbed even without a registry entry so a half-applied
        // external write cannot linger.
        let frames = inner
            .frames
            .iter()
            .map(|(id, frame)| {
                let frame = if frame.column(name).is_some() {
                    Arc::new(frame.without_column(name))
                } else {
                    Arc::clone(frame)
                };
                (*id, frame)
            })
            .collect();
        inner.frames = frames;
        debug!(column = name, existed, "dropped derived column");
        Ok(existed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConstant {
    pub name: String,
    pub value: f64,
    /// Store version at which this value was published; always >= 1.
    pub version: u64,
    /// Defining formula text, when the value came from a formula.
    pub formula: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantUpdate {
    pub name: String,
    pub value: f64,
    pub formula: Option<String>,
}

impl ConstantUpdate {
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            formula: None,
        }
    }

    #[must_use]
    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }
}

/// Immutable view of every constant at one store version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantSnapshot {
    version: u64,
    constants: BTreeMap<String, GlobalConstant>,
}

impl ConstantSnapshot {
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&GlobalConstant> {
        self.constants.get(name)
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|constant| constant.value)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GlobalConstant> {
        self.constants.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

/// Named dataset-wide scalars behind a monotonically increasing version.
pub trait ConstantStore: Send + Sync {
    /// The latest published snapshot. Later publications never mutate it.
    fn snapshot(&self) -> Arc<ConstantSnapshot>;

    /// Publish a batch atomically; returns the new store version.
    fn publish(&self, updates: Vec<ConstantUpdate>) -> Result<u64, StoreError>;

    /// Remove constants atomically; returns the store version afterwards.
    fn remove(&self, names: &[&str]) -> Result<u64, StoreError>;

    fn get_constant(&self, name: &str) -> Option<GlobalConstant> {
        self.snapshot().get(name).cloned()
    }

    fn current_version(&self) -> u64 {
        self.snapshot().version()
    }
}

#[derive(Debug, Default)]
pub struct MemoryConstantStore {
    current: RwLock<Arc<ConstantSnapshot>>,
}

impl MemoryConstantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConstantStore for MemoryConstantStore {
    fn snapshot(&self) -> Arc<ConstantSnapshot> {
        Arc::clone(&self.current.read())
    }

    fn publish(&self, updates: Vec<ConstantUpdate>) -> Result<u64, StoreError> {
        let mut current = self.current.write();
        if updates.is_empty() {
            return Ok(current.version);
        }

        let version = current.version + 1;
        let mut constants = current.constants.clone();
        for update in updates {
            debug!(constant = %update.name, value = update.value, version, "publishing constant");
            constants.insert(
                update.name.clone(),
                GlobalConstant {
                    name: update.name,
                    value: update.value,
                    version,
                    formula: update.formula,
                },
            );
        }
        *current = Arc::new(ConstantSnapshot { version, constants });
        Ok(version)
    }

    fn remove(&self, names: &[&str]) -> Result<u64, StoreError> {
        let mut current = self.current.write();
        if !names.iter().any(|name| current.constants.contains_key(*name)) {
            return Ok(current.version);
        }
        let version = current.version + 1;
        let mut constants = current.constants.clone();
        for name in names {
            constants.remove(*name);
        }
        *current = Arc::new(ConstantSnapshot { version, constants });
        Ok(version)
    }
}
