use crate::error::ModelError;

/// A batch of point clouds with the same number of points, `[B, N, 3]`.
///
/// Point order inside a cloud carries no meaning; the network consumes each
/// cloud as a set.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudBatch {
    data: Vec<f32>,
    batch_size: usize,
    num_points: usize,
}

impl PointCloudBatch {
    /// Create a batch from flat `[B, N, 3]` coordinates.
    pub fn new(data: Vec<f32>, batch_size: usize, num_points: usize) -> Result<Self, ModelError> {
        if data.len() != batch_size * num_points * 3 {
            return Err(ModelError::ShapeMismatch(
                vec![batch_size, num_points, 3],
                vec![data.len()],
            ));
        }
        Ok(Self {
            data,
            batch_size,
            num_points,
        })
    }

    /// Create a batch from individual clouds; every cloud must have the same size.
    pub fn from_clouds(clouds: &[Vec<[f32; 3]>]) -> Result<Self, ModelError> {
        let num_points = clouds.first().map_or(0, |c| c.len());
        let mut data = Vec::with_capacity(clouds.len() * num_points * 3);
        for cloud in clouds {
            if cloud.len() != num_points {
                return Err(ModelError::ShapeMismatch(
                    vec![num_points, 3],
                    vec![cloud.len(), 3],
                ));
            }
            data.extend(cloud.iter().flatten());
        }
        Self::new(data, clouds.len(), num_points)
    }

    /// Number of clouds in the batch.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of points per cloud.
    #[inline]
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// True when the batch holds no cloud.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.batch_size == 0
    }

    /// Flat `[B, N, 3]` coordinates.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Flat `[N, 3]` coordinates of one cloud.
    pub fn cloud(&self, index: usize) -> Option<&[f32]> {
        let stride = self.num_points * 3;
        self.data.get(index * stride..(index + 1) * stride)
    }
}

/// A row-major matrix of descriptors, one row per point cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptors {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl Descriptors {
    /// Wrap flat `[rows, dim]` values.
    pub fn new(data: Vec<f32>, rows: usize, dim: usize) -> Result<Self, ModelError> {
        if data.len() != rows * dim {
            return Err(ModelError::ShapeMismatch(vec![rows, dim], vec![data.len()]));
        }
        Ok(Self { data, rows, dim })
    }

    /// A `[0, dim]` matrix.
    pub fn empty(dim: usize) -> Self {
        Self {
            data: Vec::new(),
            rows: 0,
            dim,
        }
    }

    /// Build from individual rows of equal width.
    pub fn from_rows(rows: &[Vec<f32>], dim: usize) -> Result<Self, ModelError> {
        let mut data = Vec::with_capacity(rows.len() * dim);
        for row in rows {
            if row.len() != dim {
                return Err(ModelError::ShapeMismatch(vec![dim], vec![row.len()]));
            }
            data.extend_from_slice(row);
        }
        Self::new(data, rows.len(), dim)
    }

    /// Number of descriptors.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows
    }

    /// True when there is no descriptor.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Descriptor width.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// One descriptor.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        self.data.get(index * self.dim..(index + 1) * self.dim)
    }

    /// Iterate over descriptors in order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(self.dim.max(1)).take(self.rows)
    }

    /// Flat `[rows, dim]` values.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Append the rows of `other` below the current rows.
    pub fn append(&mut self, other: &Descriptors) -> Result<(), ModelError> {
        if other.dim != self.dim {
            return Err(ModelError::ShapeMismatch(vec![self.dim], vec![other.dim]));
        }
        self.data.extend_from_slice(&other.data);
        self.rows += other.rows;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_cloud_batch() -> Result<(), ModelError> {
        let clouds = vec![
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            vec![[0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        ];
        let batch = PointCloudBatch::from_clouds(&clouds)?;
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.num_points(), 2);
        assert_eq!(batch.cloud(1), Some(&[0.0, 1.0, 0.0, 0.0, 0.0, 1.0][..]));
        assert_eq!(batch.cloud(2), None);
        Ok(())
    }

    #[test]
    fn test_point_cloud_batch_ragged() {
        let clouds = vec![vec![[0.0; 3]; 2], vec![[0.0; 3]; 3]];
        assert!(matches!(
            PointCloudBatch::from_clouds(&clouds),
            Err(ModelError::ShapeMismatch(_, _))
        ));
    }

    #[test]
    fn test_descriptors_append() -> Result<(), ModelError> {
        let mut a = Descriptors::empty(2);
        assert!(a.is_empty());
        a.append(&Descriptors::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2)?)?;
        a.append(&Descriptors::from_rows(&[vec![5.0, 6.0]], 2)?)?;
        assert_eq!(a.len(), 3);
        assert_eq!(a.row(2), Some(&[5.0, 6.0][..]));
        assert_eq!(a.iter().count(), 3);
        assert!(a.append(&Descriptors::empty(3)).is_err());
        Ok(())
    }
}
