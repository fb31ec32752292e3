use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use bincode::{Decode, Encode};

use crate::error::NnError;

/// Format version written at the head of every checkpoint file.
pub const CHECKPOINT_VERSION: u32 = 1;

/// A named parameter: its shape and row-major values.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ParamTensor {
    /// Shape of the parameter.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f32>,
}

/// Parameters keyed by dotted names such as `net_vlad.bn2.running_var`.
pub type StateDict = BTreeMap<String, ParamTensor>;

/// Outcome of a non-strict state load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Keys copied into the module.
    pub loaded: Vec<String>,
    /// Keys the module expected but the state did not contain.
    pub missing: Vec<String>,
    /// Keys present in both with incompatible shapes: `(key, expected, found)`.
    pub mismatched: Vec<(String, Vec<usize>, Vec<usize>)>,
    /// Keys in the state that no parameter of the module consumed.
    pub unexpected: Vec<String>,
}

impl LoadReport {
    /// Fill [`LoadReport::unexpected`] with the keys of `state` the module never asked for.
    pub fn finish(&mut self, state: &StateDict) {
        let visited = self
            .loaded
            .iter()
            .chain(self.missing.iter())
            .chain(self.mismatched.iter().map(|(k, _, _)| k))
            .collect::<BTreeSet<_>>();
        self.unexpected = state
            .keys()
            .filter(|k| !visited.contains(k))
            .cloned()
            .collect();
    }

    /// True when every expected key was loaded and nothing was left over.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty() && self.unexpected.is_empty()
    }
}

/// Modules whose parameters can be exported to and restored from a [`StateDict`].
pub trait Parameterized {
    /// Insert every parameter under `prefix`.
    fn save_state(&self, prefix: &str, state: &mut StateDict);

    /// Copy every matching parameter under `prefix`, recording the outcome in `report`.
    ///
    /// Parameters without a compatible entry keep their current values.
    fn load_state(&mut self, prefix: &str, state: &StateDict, report: &mut LoadReport);
}

/// Join a module prefix and a parameter name with a dot.
pub fn join_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Insert a single parameter.
pub fn save_param(state: &mut StateDict, prefix: &str, name: &str, shape: &[usize], data: &[f32]) {
    state.insert(
        join_key(prefix, name),
        ParamTensor {
            shape: shape.to_vec(),
            data: data.to_vec(),
        },
    );
}

/// Copy a single parameter if the state holds it with a matching shape.
pub fn load_param(
    state: &StateDict,
    prefix: &str,
    name: &str,
    shape: &[usize],
    dst: &mut [f32],
    report: &mut LoadReport,
) {
    let key = join_key(prefix, name);
    match state.get(&key) {
        None => report.missing.push(key),
        Some(param) => {
            let numel = shape.iter().product::<usize>();
            // trailing unit axes (e.g. 1x1 convolution kernels) do not change the layout
            let squeezed = |s: &[usize]| {
                s.iter()
                    .copied()
                    .filter(|&d| d != 1)
                    .collect::<Vec<_>>()
            };
            if param.data.len() != numel
                || dst.len() != numel
                || squeezed(&param.shape) != squeezed(shape)
            {
                report
                    .mismatched
                    .push((key, shape.to_vec(), param.shape.clone()));
            } else {
                dst.copy_from_slice(&param.data);
                report.loaded.push(key);
            }
        }
    }
}

/// Export all parameters of a module.
pub fn state_dict<M: Parameterized + ?Sized>(module: &M) -> StateDict {
    let mut state = StateDict::new();
    module.save_state("", &mut state);
    state
}

/// Restore all parameters of a module non-strictly and log the outcome.
pub fn load_state_dict<M: Parameterized + ?Sized>(module: &mut M, state: &StateDict) -> LoadReport {
    let mut report = LoadReport::default();
    module.load_state("", state, &mut report);
    report.finish(state);

    log::info!(
        "loaded {} parameters ({} missing, {} mismatched, {} unexpected)",
        report.loaded.len(),
        report.missing.len(),
        report.mismatched.len(),
        report.unexpected.len()
    );
    for key in &report.missing {
        log::warn!("missing parameter: {key}");
    }
    for (key, expected, found) in &report.mismatched {
        log::warn!("shape mismatch for {key}: expected {expected:?}, found {found:?}");
    }
    for key in &report.unexpected {
        log::debug!("unexpected parameter: {key}");
    }

    report
}

/// A training snapshot: counters plus the model state.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct Checkpoint {
    /// Last completed epoch.
    pub epoch: u64,
    /// Total number of optimizer iterations.
    pub iteration: u64,
    /// Model parameters.
    pub state: StateDict,
}

impl Checkpoint {
    /// Wrap a bare state dictionary.
    pub fn from_state(state: StateDict) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Persist the checkpoint to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), NnError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        let config = bincode::config::standard();

        bincode::encode_into_std_write(CHECKPOINT_VERSION, &mut writer, config)
            .map_err(|e| NnError::Bincode(e.to_string()))?;
        bincode::encode_into_std_write(self, &mut writer, config)
            .map_err(|e| NnError::Bincode(e.to_string()))?;

        Ok(())
    }

    /// Load a checkpoint from a file and verify its format version.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NnError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let config = bincode::config::standard();

        let version: u32 = bincode::decode_from_std_read(&mut reader, config)
            .map_err(|e| NnError::Bincode(e.to_string()))?;
        if version != CHECKPOINT_VERSION {
            return Err(NnError::UnsupportedVersion(version));
        }

        let checkpoint: Checkpoint = bincode::decode_from_std_read(&mut reader, config)
            .map_err(|e| NnError::Bincode(e.to_string()))?;

        Ok(checkpoint)
    }
}
