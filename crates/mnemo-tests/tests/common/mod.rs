//! Shared harness for the journey tests: an isolated engine over a temp
//! data directory, wired to the deterministic hash embedder so semantic
//! scores are reproducible without downloading a real model.

use mnemo_core::{Config, Engine};

/// An engine bound to a throwaway data directory. The `TempDir` is kept
/// alive alongside the engine so the directory isn't cleaned up underneath
/// an in-progress test.
pub struct TestEngine {
    pub engine: Engine,
    _dir: tempfile::TempDir,
}

impl TestEngine {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = Engine::open(test_config(dir.path())).expect("engine open");
        Self { engine, _dir: dir }
    }

    pub fn with_config(mutate: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(dir.path());
        mutate(&mut config);
        let engine = Engine::open(config).expect("engine open");
        Self { engine, _dir: dir }
    }
}

impl TestEngine {
    pub fn data_dir(&self) -> &std::path::Path {
        self._dir.path()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.engine
    }
}

/// A small, deterministic configuration: the hash embedder (no model
/// download), no remote endpoint (pure local store), consolidation enabled
/// but never scheduled (tests trigger it explicitly).
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.to_path_buf();
    config.embedding_model = "hash".to_string();
    config.embedding_dim = 32;
    config.remote.endpoint = String::new();
    config.schedule.daily = None;
    config.schedule.weekly = None;
    config.schedule.monthly = None;
    config
}
