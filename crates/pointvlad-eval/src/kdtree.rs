use std::cmp::Ordering;
use std::collections::BinaryHeap;

use pointvlad_model::Descriptors;

use crate::error::EvalError;

/// A database descriptor returned by a nearest-neighbor query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row of the descriptor in the database.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
}

/// Heap entry ordered by `(squared distance, index)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance_sq: f32,
    index: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_sq
            .total_cmp(&other.distance_sq)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Node {
    index: usize,
    split_dimension: usize,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

impl Node {
    fn new(indices: &mut [usize], data: &[f32], dim: usize) -> Option<Box<Node>> {
        if indices.is_empty() {
            return None;
        }

        let split_dimension = widest_dimension(indices, data, dim);

        indices.sort_by(|&a, &b| {
            data[a * dim + split_dimension]
                .total_cmp(&data[b * dim + split_dimension])
                .then(a.cmp(&b))
        });
        let median = indices.len() / 2;
        let index = indices[median];

        let (left, rest) = indices.split_at_mut(median);
        let right = &mut rest[1..];

        Some(Box::new(Node {
            index,
            split_dimension,
            left: Node::new(left, data, dim),
            right: Node::new(right, data, dim),
        }))
    }

    fn knn_search(
        &self,
        data: &[f32],
        dim: usize,
        query: &[f32],
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        let point = &data[self.index * dim..(self.index + 1) * dim];
        let candidate = Candidate {
            distance_sq: squared_distance(point, query),
            index: self.index,
        };

        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }

        let split_distance = query[self.split_dimension] - point[self.split_dimension];
        let (nearer, further) = if split_distance < 0.0 {
            (&self.left, &self.right)
        } else {
            (&self.right, &self.left)
        };

        if let Some(node) = nearer {
            node.knn_search(data, dim, query, k, heap);
        }

        // equal distances may still hide a lower index on the far side
        let visit_further = heap.len() < k
            || heap
                .peek()
                .is_some_and(|worst| split_distance * split_distance <= worst.distance_sq);
        if visit_further {
            if let Some(node) = further {
                node.knn_search(data, dim, query, k, heap);
            }
        }
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// The dimension along which the given points spread the most.
fn widest_dimension(indices: &[usize], data: &[f32], dim: usize) -> usize {
    (0..dim)
        .map(|d| {
            let (lo, hi) = indices.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &i| {
                let v = data[i * dim + d];
                (lo.min(v), hi.max(v))
            });
            (d, hi - lo)
        })
        .fold((0, f32::NEG_INFINITY), |best, (d, spread)| {
            if spread > best.1 {
                (d, spread)
            } else {
                best
            }
        })
        .0
}

/// Exact k-nearest-neighbor index over descriptors of any width.
///
/// Results are ordered by Euclidean distance, ties by database row, so a query
/// always yields the same ranking.
pub struct DescriptorTree {
    data: Vec<f32>,
    dim: usize,
    len: usize,
    root: Option<Box<Node>>,
}

impl DescriptorTree {
    /// Index a copy of `descriptors`.
    pub fn new(descriptors: &Descriptors) -> Self {
        let dim = descriptors.dim();
        let len = descriptors.len();
        let data = descriptors.as_slice().to_vec();
        let mut indices = (0..len).collect::<Vec<_>>();
        let root = if dim == 0 {
            None
        } else {
            Node::new(&mut indices, &data, dim)
        };
        Self {
            data,
            dim,
            len,
            root,
        }
    }

    /// Number of indexed descriptors.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Width of the indexed descriptors.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The `min(k, len)` nearest descriptors, closest first.
    pub fn knn(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, EvalError> {
        if query.len() != self.dim {
            return Err(EvalError::DimensionMismatch(self.dim, query.len()));
        }

        let k = k.min(self.len);
        let mut heap = BinaryHeap::with_capacity(k + 1);
        match &self.root {
            Some(root) if k > 0 => root.knn_search(&self.data, self.dim, query, k, &mut heap),
            _ => {}
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                index: c.index,
                distance: c.distance_sq.sqrt(),
            })
            .collect())
    }
}
