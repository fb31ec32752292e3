use std::path::{Path, PathBuf};

use pointvlad_model::PointCloudBatch;

use crate::error::EvalError;

/// Reads batches of fixed-size point clouds from file references.
pub trait PointCloudLoader {
    /// Load the referenced clouds, in order, into one batch.
    fn load(&self, files: &[&Path]) -> Result<PointCloudBatch, EvalError>;
}

/// Loader for raw little-endian `f64` files of `num_points` `[x, y, z]` triples.
///
/// Relative references are resolved against `root`.
#[derive(Debug, Clone)]
pub struct BinPointCloudLoader {
    root: PathBuf,
    num_points: usize,
}

impl BinPointCloudLoader {
    /// Create a loader expecting `num_points` points per file.
    pub fn new(root: impl Into<PathBuf>, num_points: usize) -> Self {
        Self {
            root: root.into(),
            num_points,
        }
    }

    /// Points per cloud.
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// Read one cloud as `[N * 3]` `f32` coordinates.
    pub fn read_cloud(&self, file: &Path) -> Result<Vec<f32>, EvalError> {
        let path = self.root.join(file);
        let bytes = std::fs::read(&path)?;

        let expected = self.num_points * 3;
        let found = bytes.len() / std::mem::size_of::<f64>();
        if found != expected || bytes.len() % std::mem::size_of::<f64>() != 0 {
            return Err(EvalError::PointCloudSize {
                path,
                expected,
                found,
            });
        }

        bytes
            .chunks_exact(std::mem::size_of::<f64>())
            .map(|b| {
                let value: [u8; 8] = b.try_into().map_err(|_| EvalError::PointCloudSize {
                    path: path.clone(),
                    expected,
                    found,
                })?;
                Ok(f64::from_le_bytes(value) as f32)
            })
            .collect()
    }
}

impl PointCloudLoader for BinPointCloudLoader {
    fn load(&self, files: &[&Path]) -> Result<PointCloudBatch, EvalError> {
        let mut data = Vec::with_capacity(files.len() * self.num_points * 3);
        for file in files {
            data.extend(self.read_cloud(file)?);
        }
        Ok(PointCloudBatch::new(data, files.len(), self.num_points)?)
    }
}
