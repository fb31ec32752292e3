use rayon::prelude::*;

/// Device type enumeration for layer execution.
///
/// Only the CPU is backed by an implementation; the enum keeps the device an
/// explicit part of every call instead of an implicit global placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU device
    Cpu,
}

impl Device {
    /// Returns the device type as a string.
    pub fn device_type(&self) -> &str {
        match self {
            Device::Cpu => "cpu",
        }
    }

    /// Returns true if the device is CPU.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.device_type())
    }
}

/// Controls how per-sample work is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Run sequentially on the current thread.
    #[default]
    Serial,

    /// Use the global Rayon thread pool to process independent samples in parallel.
    Parallel,
}

/// Whether normalization layers use and update batch statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Batch statistics normalize the input and update the running statistics.
    Train,
    /// Running statistics normalize the input and stay frozen.
    Eval,
}

impl Mode {
    /// Returns true in training mode.
    #[inline]
    pub fn is_training(self) -> bool {
        matches!(self, Mode::Train)
    }
}

/// Explicit execution context threaded through every forward and evaluation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Device the computation runs on.
    pub device: Device,
    /// How independent samples are scheduled.
    pub strategy: ExecutionStrategy,
}

impl ExecutionContext {
    /// Create a context for the given device and strategy.
    pub fn new(device: Device, strategy: ExecutionStrategy) -> Self {
        Self { device, strategy }
    }

    /// Single-threaded CPU context.
    pub fn cpu() -> Self {
        Self::new(Device::Cpu, ExecutionStrategy::Serial)
    }

    /// CPU context fanning samples out over the Rayon pool.
    pub fn cpu_parallel() -> Self {
        Self::new(Device::Cpu, ExecutionStrategy::Parallel)
    }

    /// Map every index in `0..len` through `f`, preserving order.
    pub fn map_indices<R, F>(&self, len: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Send + Sync,
    {
        match self.strategy {
            ExecutionStrategy::Serial => (0..len).map(f).collect(),
            ExecutionStrategy::Parallel => (0..len).into_par_iter().map(f).collect(),
        }
    }

    /// Apply `f` to consecutive chunks of `data`, passing the chunk index.
    pub fn for_each_chunk_mut<T, F>(&self, data: &mut [T], chunk_size: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Send + Sync,
    {
        if chunk_size == 0 {
            return;
        }
        match self.strategy {
            ExecutionStrategy::Serial => data
                .chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk)),
            ExecutionStrategy::Parallel => data
                .par_chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i, chunk)),
        }
    }

    /// Release cached device memory.
    ///
    /// The CPU backend holds no caches, so this only records the call.
    pub fn release_cache(&self) {
        log::trace!("releasing {} memory caches", self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_indices_preserves_order() {
        for ctx in [ExecutionContext::cpu(), ExecutionContext::cpu_parallel()] {
            let out = ctx.map_indices(100, |i| i * 2);
            assert_eq!(out, (0..100).map(|i| i * 2).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_for_each_chunk_mut() {
        for ctx in [ExecutionContext::cpu(), ExecutionContext::cpu_parallel()] {
            let mut data = vec![0usize; 10];
            ctx.for_each_chunk_mut(&mut data, 3, |i, chunk| chunk.iter_mut().for_each(|v| *v = i));
            assert_eq!(data, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 3]);
        }
    }

    #[test]
    fn test_device() {
        let ctx = ExecutionContext::cpu();
        assert!(ctx.device.is_cpu());
        assert_eq!(ctx.device.to_string(), "cpu");
        assert!(Mode::Train.is_training());
        assert!(!Mode::Eval.is_training());
    }
}
