//! Lane executors: how a batch of plugins is run.
//!
//! The handler decides WHAT runs in which lane; an executor decides HOW a lane
//! runs (in order, on a thread pool, or in isolated workers). Every executor
//! returns outputs in submission order.

use crate::plugin::{Affinity, Plugin, PluginOutput, PluginSpec};
use crate::report::Framework;
use crate::registry::PluginRegistry;
use crate::worker;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Execution lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Sequential,
    Thread,
    Process,
}

impl Lane {
    /// Lanes in execution order.
    pub const ORDER: [Lane; 3] = [Lane::Sequential, Lane::Thread, Lane::Process];

    /// Lane for a plugin of `affinity`. Without `parallel`, everything runs
    /// sequentially.
    pub fn for_affinity(affinity: Affinity, parallel: bool) -> Lane {
        if !parallel {
            return Lane::Sequential;
        }
        match affinity {
            Affinity::Sequential => Lane::Sequential,
            Affinity::MultiThread => Lane::Thread,
            Affinity::MultiProcess => Lane::Process,
        }
    }
}

/// How the process lane isolates plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Isolation {
    /// In-process workers: each plugin is rebuilt from its serialized spec
    /// with a fresh store, and its output is serialized back.
    #[default]
    Isolated,
    /// One child process per plugin: JSON request on stdin, JSON output on
    /// stdout.
    Subprocess {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

/// Runs one lane of plugins to completion.
pub trait Executor: Send + Sync {
    /// Execute every plugin. Output order matches input order.
    fn execute_batch(&self, plugins: Vec<Box<dyn Plugin>>) -> Vec<PluginOutput>;
}

/// Runs plugins one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn execute_batch(&self, plugins: Vec<Box<dyn Plugin>>) -> Vec<PluginOutput> {
        plugins.into_iter().map(|plugin| plugin.execute()).collect()
    }
}

/// Runs plugins on a rayon pool, sharing the driver's store instances.
#[derive(Debug, Clone, Copy)]
pub struct ThreadPoolExecutor {
    num_worker: usize,
}

impl ThreadPoolExecutor {
    pub fn new(num_worker: usize) -> Self {
        Self {
            num_worker: num_worker.max(1),
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute_batch(&self, plugins: Vec<Box<dyn Plugin>>) -> Vec<PluginOutput> {
        let execute = |plugin: Box<dyn Plugin>| plugin.execute();
        match build_pool(self.num_worker) {
            Some(pool) => pool.install(|| plugins.into_par_iter().map(execute).collect()),
            None => plugins.into_par_iter().map(execute).collect(),
        }
    }
}

/// Runs plugins in isolated workers. Only the `PluginSpec` crosses into the worker;
/// the live plugin (and its store handles) is dropped on the driver side.
pub struct ProcessPoolExecutor {
    num_worker: usize,
    isolation: Isolation,
    registry: Arc<PluginRegistry>,
}

impl ProcessPoolExecutor {
    pub fn new(num_worker: usize, isolation: Isolation, registry: Arc<PluginRegistry>) -> Self {
        Self {
            num_worker: num_worker.max(1),
            isolation,
            registry,
        }
    }
}

impl Executor for ProcessPoolExecutor {
    fn execute_batch(&self, plugins: Vec<Box<dyn Plugin>>) -> Vec<PluginOutput> {
        let jobs: Vec<_> = plugins
            .into_iter()
            .map(|plugin| (plugin.spec().clone(), plugin.framework()))
            .collect();

        let execute = |(spec, framework): (PluginSpec, Framework)| match &self.isolation {
            Isolation::Isolated => worker::run_isolated(&self.registry, spec, framework),
            Isolation::Subprocess { program, args } => {
                worker::run_subprocess(program, args, spec, framework)
            }
        };

        match build_pool(self.num_worker) {
            Some(pool) => pool.install(|| jobs.into_par_iter().map(execute).collect()),
            None => jobs.into_par_iter().map(execute).collect(),
        }
    }
}

fn build_pool(num_threads: usize) -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new().num_threads(num_threads).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build worker pool, using the global pool");
            None
        }
    }
}
