use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// One point cloud of a submap and its ground truth in the other submaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmapEntry {
    /// Reference to the point cloud file.
    #[serde(rename = "query")]
    pub file: PathBuf,
    /// Indices of matching point clouds, keyed by target submap index.
    #[serde(default)]
    pub neighbors: BTreeMap<usize, Vec<usize>>,
}

impl SubmapEntry {
    /// Ground-truth matches in submap `target`; empty when none are known.
    pub fn true_neighbors(&self, target: usize) -> &[usize] {
        self.neighbors.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One traversal: point clouds indexed `0..len`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Submap {
    /// Human-readable identifier used in logs.
    pub name: String,
    /// Point clouds in index order.
    pub entries: Vec<SubmapEntry>,
}

impl Submap {
    /// Create a submap from entries already in index order.
    pub fn new(name: impl Into<String>, entries: Vec<SubmapEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    /// Build a submap from an index-keyed map; the keys must be exactly `0..len`.
    pub fn from_indexed(
        name: impl Into<String>,
        indexed: BTreeMap<usize, SubmapEntry>,
    ) -> Result<Self, EvalError> {
        let name = name.into();
        if let Some((position, key)) = indexed.keys().enumerate().find(|(i, k)| i != *k) {
            return Err(EvalError::InvalidRegistry(
                name,
                format!("expected index {position}, found {key}"),
            ));
        }
        Ok(Self::new(name, indexed.into_values().collect()))
    }

    /// Number of point clouds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the submap has no point cloud.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File references in index order.
    pub fn files(&self) -> impl Iterator<Item = &Path> + '_ {
        self.entries.iter().map(|e| e.file.as_path())
    }
}

/// Source of submaps by dataset identifier.
pub trait SubmapRegistry {
    /// All submaps of `dataset`, in submap index order.
    fn submaps(&self, dataset: &str) -> Result<Vec<Submap>, EvalError>;
}

/// Registry reading `<root>/<dataset>.json`.
///
/// The file holds an array of submaps, each an object from point cloud index
/// to `{"query": <file>, "neighbors": {<target submap>: [<index>, ...]}}`.
/// Unknown fields, such as positions, are ignored.
#[derive(Debug, Clone)]
pub struct JsonSubmapRegistry {
    root: PathBuf,
}

impl JsonSubmapRegistry {
    /// Create a registry over the files in `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read the submaps stored in one JSON file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<Submap>, EvalError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let raw: Vec<BTreeMap<usize, SubmapEntry>> = serde_json::from_str(&contents)?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let submaps = raw
            .into_iter()
            .enumerate()
            .map(|(i, indexed)| Submap::from_indexed(format!("{stem}[{i}]"), indexed))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!(
            "read {} submaps ({} point clouds) from {}",
            submaps.len(),
            submaps.iter().map(Submap::len).sum::<usize>(),
            path.display()
        );
        Ok(submaps)
    }
}

impl SubmapRegistry for JsonSubmapRegistry {
    fn submaps(&self, dataset: &str) -> Result<Vec<Submap>, EvalError> {
        Self::load_file(self.root.join(format!("{dataset}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATASET: &str = r#"[
        {
            "0": {"query": "a/0.bin", "northing": 1.0, "neighbors": {"1": [0, 2]}},
            "1": {"query": "a/1.bin"}
        },
        {
            "0": {"query": "b/0.bin", "neighbors": {"0": [0], "2": []}}
        }
    ]"#;

    #[test]
    fn test_json_registry() -> Result<(), EvalError> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("oxford_query.json"), DATASET)?;

        let registry = JsonSubmapRegistry::new(dir.path());
        let submaps = registry.submaps("oxford_query")?;
        assert_eq!(submaps.len(), 2);
        assert_eq!(submaps[0].name, "oxford_query[0]");
        assert_eq!(submaps[0].len(), 2);
        assert_eq!(submaps[0].entries[0].true_neighbors(1), &[0, 2]);
        assert!(submaps[0].entries[1].true_neighbors(1).is_empty());
        assert!(submaps[1].entries[0].true_neighbors(2).is_empty());
        assert_eq!(
            submaps[1].files().collect::<Vec<_>>(),
            vec![Path::new("b/0.bin")]
        );
        Ok(())
    }

    #[test]
    fn test_non_contiguous_indices() {
        let mut indexed = BTreeMap::new();
        for i in [0, 2] {
            indexed.insert(
                i,
                SubmapEntry {
                    file: PathBuf::from(format!("{i}.bin")),
                    neighbors: BTreeMap::new(),
                },
            );
        }
        assert!(matches!(
            Submap::from_indexed("gap", indexed),
            Err(EvalError::InvalidRegistry(_, _))
        ));
    }

    #[test]
    fn test_missing_dataset() {
        let registry = JsonSubmapRegistry::new("does/not/exist");
        assert!(matches!(registry.submaps("oxford"), Err(EvalError::Io(_))));
    }
}
