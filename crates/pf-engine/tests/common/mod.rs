#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use pf_columnar::Column;
use pf_engine::ComputationCore;
use pf_frame::{
    DataStore, Frame, MemoryConstantStore, MemoryDataStore, StoreError,
};
use pf_runtime::EngineConfig;
use pf_types::{FrameId, GridResolution};

/// `n x n` lattice on `[0, n-1]^2`, row-major along y, with extra columns
/// computed from the coordinates.
pub fn lattice(id: u64, n: usize, extra: &[(&str, fn(f64, f64) -> f64)]) -> Frame {
    let mut xs = Vec::with_capacity(n * n);
    let mut ys = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            xs.push(j as f64);
            ys.push(i as f64);
        }
    }
    let mut data: Vec<(&str, Vec<f64>)> = extra
        .iter()
        .map(|(name, f)| (*name, xs.iter().zip(&ys).map(|(x, y)| f(*x, *y)).collect()))
        .collect();
    data.push(("x", xs));
    data.push(("y", ys));
    Frame::from_dict(FrameId(id), data).expect("lattice frame")
}

pub fn config(grid: usize) -> EngineConfig {
    EngineConfig::interactive()
        .with_resolution(GridResolution::new(grid, grid).expect("resolution"))
}

pub fn core_with(frames: Vec<Frame>, config: EngineConfig) -> ComputationCore {
    ComputationCore::new(
        Arc::new(MemoryDataStore::new(frames).expect("store")),
        Arc::new(MemoryConstantStore::new()),
        config,
    )
    .expect("core")
}

/// Delegates reads to an in-memory store and rejects every derived write.
pub struct RejectingStore {
    pub inner: MemoryDataStore,
}

impl DataStore for RejectingStore {
    fn frame_ids(&self) -> Vec<FrameId> {
        self.inner.frame_ids()
    }

    fn get_frame(&self, id: FrameId) -> Result<Arc<Frame>, StoreError> {
        self.inner.get_frame(id)
    }

    fn list_columns(&self) -> BTreeSet<String> {
        self.inner.list_columns()
    }

    fn list_derived_columns(&self) -> BTreeMap<String, String> {
        self.inner.list_derived_columns()
    }

    fn persist_derived_column(
        &self,
        _name: &str,
        _formula: &str,
        _values: BTreeMap<FrameId, Column>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Rejected("disk full".to_owned()))
    }

    fn drop_derived_column(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.drop_derived_column(name)
    }
}
