// THEORY:
// `EngineConfig` gathers the knobs that shape how the engine runs, as opposed to
// the `ViewportCtx`, which describes *what* is being binned. Nothing in here changes
// the numeric result of a redraw except `min_weight` and the shuffle seed; the rest
// trades memory for contention (shards) or latency for throughput (threads, batch).
//
// Values come from `Default`, can be overridden from `DISTVIEW_*` environment
// variables, and are then refined with the chained setters. `check` must pass before
// the config is handed to the engine.

use crate::errors::ConfigError;
use log::LevelFilter;

const DEFAULT_MIN_WEIGHT: f32 = 1.0;
const DEFAULT_VERTEX_BATCH: usize = 4096;
const SHARDS_PER_CPU: usize = 4;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads for the data-parallel passes. 0 picks one per logical CPU.
    pub worker_threads: usize,
    /// Lock shards per label histogram. Must be a power of two.
    pub shards: usize,
    /// Bins lighter than this are left out of the flat index.
    pub min_weight: f32,
    /// Shuffle the flat index before vertex generation so no label is always drawn last.
    pub shuffle: bool,
    /// Fixed seed for the shuffle; `None` draws a fresh one per redraw.
    pub shuffle_seed: Option<u64>,
    /// Index entries handled between two generation checks in the vertex pass.
    pub vertex_batch: usize,
    pub log_level: LevelFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            shards: (num_cpus::get() * SHARDS_PER_CPU).next_power_of_two(),
            min_weight: DEFAULT_MIN_WEIGHT,
            shuffle: true,
            shuffle_seed: None,
            vertex_batch: DEFAULT_VERTEX_BATCH,
            log_level: LevelFilter::Info,
        }
    }
}

impl EngineConfig {
    /// Starts from the defaults and applies any `DISTVIEW_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("DISTVIEW_THREADS")? {
            config.worker_threads = v;
        }
        if let Some(v) = env_parse::<usize>("DISTVIEW_SHARDS")? {
            config.shards = v;
        }
        if let Some(v) = env_parse::<f32>("DISTVIEW_MIN_WEIGHT")? {
            config.min_weight = v;
        }
        if let Some(v) = env_parse::<u64>("DISTVIEW_SEED")? {
            config.shuffle_seed = Some(v);
        }
        if let Some(v) = env_parse::<LevelFilter>("DISTVIEW_LOG")? {
            config.log_level = v;
        }
        Ok(config)
    }

    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn min_weight(mut self, min_weight: f32) -> Self {
        self.min_weight = min_weight;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn vertex_batch(mut self, vertex_batch: usize) -> Self {
        self.vertex_batch = vertex_batch;
        self
    }

    pub fn log_level(mut self, log_level: LevelFilter) -> Self {
        self.log_level = log_level;
        self
    }

    /// Threads actually used once the 0 = auto convention is resolved.
    pub fn resolved_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.shards == 0 || !self.shards.is_power_of_two() {
            return Err(ConfigError::Shards(self.shards));
        }
        if self.vertex_batch == 0 {
            return Err(ConfigError::VertexBatch);
        }
        if !self.min_weight.is_finite() || self.min_weight < 0.0 {
            return Err(ConfigError::MinWeight(self.min_weight));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Env { name, value }),
        Err(_) => Ok(None),
    }
}
