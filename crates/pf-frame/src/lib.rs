#![forbid(unsafe_code)]

mod store;

use std::collections::BTreeMap;

use pf_columnar::{Column, ColumnError};
use pf_types::FrameId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{
    ConstantSnapshot, ConstantStore, ConstantUpdate, DataStore, GlobalConstant,
    MemoryConstantStore, MemoryDataStore, StoreError,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("column '{column}' has {found} values but the frame has {expected} points")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("frame has no column named '{0}'")]
    MissingColumn(String),
    #[error("frame {frame} does not share the dataset schema: {detail}")]
    SchemaMismatch { frame: FrameId, detail: String },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// One time step of the point cloud: equally long named columns, two of
/// which hold the point coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    id: FrameId,
    len: usize,
    columns: BTreeMap<String, Column>,
}

impl Frame {
    pub fn new(id: FrameId, columns: BTreeMap<String, Column>) -> Result<Self, FrameError> {
        let len = columns.values().next().map_or(0, Column::len);
        for (name, column) in &columns {
            if column.len() != len {
                return Err(FrameError::LengthMismatch {
                    column: name.clone(),
                    expected: len,
                    found: column.len(),
                });
            }
        }
        Ok(Self { id, len, columns })
    }

    pub fn from_dict(id: FrameId, data: Vec<(&str, Vec<f64>)>) -> Result<Self, FrameError> {
        let columns = data
            .into_iter()
            .map(|(name, values)| (name.to_owned(), Column::new(values)))
            .collect();
        Self::new(id, columns)
    }

    #[must_use]
    pub fn id(&self) -> FrameId {
        self.id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<String, Column> {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, FrameError> {
        self.column(name)
            .ok_or_else(|| FrameError::MissingColumn(name.to_owned()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// The (x, y) coordinate columns under the given names.
    pub fn coordinates(&self, x: &str, y: &str) -> Result<(&Column, &Column), FrameError> {
        Ok((self.require_column(x)?, self.require_column(y)?))
    }

    /// Copy-on-write insertion used when a derived column is persisted.
    pub fn with_column(&self, name: impl Into<String>, column: Column) -> Result<Self, FrameError> {
        let name = name.into();
        if column.len() != self.len && !self.columns.is_empty() {
            return Err(FrameError::LengthMismatch {
                column: name,
                expected: self.len,
                found: column.len(),
            });
        }
        let mut columns = self.columns.clone();
        columns.insert(name, column);
        Self::new(self.id, columns)
    }

    #[must_use]
    pub fn without_column(&self, name: &str) -> Self {
        let mut columns = self.columns.clone();
        columns.remove(name);
        Self {
            id: self.id,
            len: self.len,
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use pf_columnar::Column;
    use pf_types::FrameId;

    use super::{Frame, FrameError};

    #[test]
    fn frame_rejects_ragged_columns() {
        let err = Frame::from_dict(
            FrameId(0),
            vec![("x", vec![0.0, 1.0]), ("y", vec![0.0, 1.0, 2.0])],
        )
        .expect_err("ragged");
        assert!(matches!(
            err,
            FrameError::LengthMismatch { ref column, expected: 2, found: 3 } if column == "y"
        ));
    }

    #[test]
    fn with_column_leaves_original_untouched() {
        let frame = Frame::from_dict(FrameId(3), vec![("x", vec![0.0, 1.0])]).expect("frame");
        let extended = frame
            .with_column("speed", Column::new(vec![5.0, 6.0]))
            .expect("extend");

        assert!(frame.column("speed").is_none());
        assert_eq!(
            extended.column("speed").expect("speed").values(),
            &[5.0, 6.0]
        );
        assert_eq!(extended.id(), FrameId(3));
        assert_eq!(extended.without_column("speed"), frame);
    }

    #[test]
    fn with_column_checks_point_count() {
        let frame = Frame::from_dict(FrameId(0), vec![("x", vec![0.0, 1.0])]).expect("frame");
        let err = frame
            .with_column("bad", Column::new(vec![1.0]))
            .expect_err("short column");
        assert!(matches!(err, FrameError::LengthMismatch { found: 1, .. }));
    }

    #[test]
    fn coordinates_report_missing_axis() {
        let frame = Frame::from_dict(FrameId(0), vec![("x", vec![0.0])]).expect("frame");
        let err = frame.coordinates("x", "y").expect_err("no y");
        assert_eq!(err, FrameError::MissingColumn("y".to_owned()));
    }
}
