//! The scheduler: builds plugins for an operation and runs them lane by lane.

use crate::config::RunConfig;
use crate::error::Error;
use crate::executor::{
    Executor, Lane, ProcessPoolExecutor, SequentialExecutor, ThreadPoolExecutor,
};
use crate::operation::{ErrorReportMode, Operation};
use crate::plugin::{BuildParams, BuildRequest, Plugin, PluginBuilder, PluginOutput};
use crate::registry::PluginRegistry;
use crate::resource::Resource;
use crate::results::ResultRegistry;
use crate::store::InputStores;
use indexmap::IndexMap;
use std::sync::Arc;

/// Schedules plugin execution and accumulates outputs.
pub struct RunHandler {
    registry: Arc<PluginRegistry>,
    config: RunConfig,
    results: ResultRegistry,
}

impl RunHandler {
    pub fn new(registry: Arc<PluginRegistry>, config: RunConfig) -> Self {
        Self {
            registry,
            config,
            results: ResultRegistry::new(),
        }
    }

    pub fn results(&self) -> &ResultRegistry {
        &self.results
    }

    /// Run `operation` once. A second call returns the recorded outputs
    /// without building or executing anything.
    ///
    /// Libraries and stores are resolved before any plugin executes; a failure
    /// there leaves the result registry untouched.
    pub fn run(
        &mut self,
        operation: Operation,
        resources: &[Resource],
        stores: &InputStores,
        params: &BuildParams,
        error_report: ErrorReportMode,
    ) -> Result<Vec<Arc<PluginOutput>>, Error> {
        if self.results.contains(operation) {
            tracing::debug!(%operation, "returning recorded outputs");
            return Ok(self.results.get(operation).to_vec());
        }

        let execs = self.config.exec_configs(operation);
        let mut builders = self
            .registry
            .builders(operation, execs.iter().map(|e| e.library.as_str()))?;

        let built = build_plugins(&mut builders, |i| BuildRequest {
            operation,
            resources,
            stores,
            params,
            error_report,
            exec_args: &execs[i].exec_args,
        });
        let outputs = built.map(|plugins| self.schedule(operation, plugins));

        for builder in &mut builders {
            builder.destroy();
        }

        let outputs = outputs?;
        self.results.touch(operation);
        for output in outputs {
            self.results.push(operation, output);
        }
        Ok(self.results.get(operation).to_vec())
    }

    /// Partition plugins into lanes and run the lanes in order.
    fn schedule(&self, operation: Operation, plugins: Vec<Box<dyn Plugin>>) -> Vec<PluginOutput> {
        let total = plugins.len();
        let mut lanes: IndexMap<Lane, Vec<Box<dyn Plugin>>> =
            Lane::ORDER.iter().map(|lane| (*lane, Vec::new())).collect();
        for plugin in plugins {
            let lane = Lane::for_affinity(plugin.spec().affinity, self.config.parallel);
            lanes.entry(lane).or_default().push(plugin);
        }

        let mut outputs = Vec::with_capacity(total);
        for (lane, batch) in lanes {
            if batch.is_empty() {
                continue;
            }
            tracing::info!(%operation, ?lane, plugins = batch.len(), "running lane");
            outputs.extend(self.executor(lane).execute_batch(batch));
        }
        outputs
    }

    fn executor(&self, lane: Lane) -> Box<dyn Executor> {
        match lane {
            Lane::Sequential => Box::new(SequentialExecutor),
            Lane::Thread => Box::new(ThreadPoolExecutor::new(self.config.num_worker)),
            Lane::Process => Box::new(ProcessPoolExecutor::new(
                self.config.num_worker,
                self.config.isolation.clone(),
                self.registry.clone(),
            )),
        }
    }
}

/// Expand every builder into one flat list, in builder order.
fn build_plugins<'a>(
    builders: &mut [Box<dyn PluginBuilder>],
    request: impl Fn(usize) -> BuildRequest<'a>,
) -> Result<Vec<Box<dyn Plugin>>, Error> {
    let mut plugins = Vec::new();
    for (i, builder) in builders.iter_mut().enumerate() {
        plugins.extend(builder.build(&request(i))?);
    }
    Ok(plugins)
}
