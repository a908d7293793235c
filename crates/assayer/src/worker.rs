//! Process-lane worker protocol.
//!
//! A worker receives a [`PluginSpec`] as JSON, rebuilds the plugin's store
//! from its parameters (with a fresh cache), rehydrates the plugin through
//! the registry, executes it and answers with the [`PluginOutput`] as JSON.

use crate::error::PluginError;
use crate::plugin::{PluginOutput, PluginSpec};
use crate::reader::DataReader;
use crate::registry::PluginRegistry;
use crate::report::Framework;
use crate::store::build_input_store;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

/// One unit of work sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub spec: PluginSpec,
}

/// Execute a spec in the current process.
pub fn execute_spec(registry: &PluginRegistry, spec: PluginSpec) -> PluginOutput {
    let framework = registry
        .get_decl(&spec.library)
        .map(|decl| decl.framework())
        .unwrap_or_else(|| Framework {
            name: spec.library.clone(),
            version: String::new(),
        });

    let Some(library) = registry.get(spec.operation, &spec.library) else {
        let error = PluginError::Worker(format!(
            "library '{}' is not registered for {}",
            spec.library, spec.operation
        ));
        return PluginOutput::failed(spec, framework, error);
    };

    let store = match build_input_store(&spec.store) {
        Ok(store) => store,
        Err(e) => return PluginOutput::failed(spec, framework, e.into()),
    };
    let reader = DataReader::new(store.clone(), spec.reader);

    let output = match library.rehydrate(spec.clone(), reader) {
        Ok(plugin) => plugin.execute(),
        Err(e) => PluginOutput::failed(spec, framework, e),
    };
    store.clean_paths();
    output
}

/// Run a spec through an in-process worker. Spec and output both make the
/// JSON round trip, so nothing but plain data crosses the boundary.
pub fn run_isolated(
    registry: &PluginRegistry,
    spec: PluginSpec,
    framework: Framework,
) -> PluginOutput {
    let round_trip = || -> Result<PluginOutput, PluginError> {
        let request = serde_json::to_vec(&WorkerRequest { spec: spec.clone() })?;
        let request: WorkerRequest = serde_json::from_slice(&request)?;
        let output = execute_spec(registry, request.spec);
        Ok(serde_json::from_slice(&serde_json::to_vec(&output)?)?)
    };
    match round_trip() {
        Ok(output) => output,
        Err(e) => PluginOutput::failed(spec, framework, e),
    }
}

/// Run a spec in a child process: `program args...`, request on stdin,
/// output on stdout.
pub fn run_subprocess(
    program: &Path,
    args: &[String],
    spec: PluginSpec,
    framework: Framework,
) -> PluginOutput {
    match spawn_worker(program, args, &spec) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(plugin = %spec.label(), error = %e, "worker process failed");
            PluginOutput::failed(spec, framework, e)
        }
    }
}

fn spawn_worker(
    program: &Path,
    args: &[String],
    spec: &PluginSpec,
) -> Result<PluginOutput, PluginError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let request = serde_json::to_vec(&WorkerRequest { spec: spec.clone() })?;
    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::Worker("worker stdin unavailable".into()))?;
        stdin.write_all(&request)?;
    }

    let result = child.wait_with_output()?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(PluginError::Worker(format!(
            "worker exited with {}: {}",
            result.status,
            stderr.trim()
        )));
    }
    Ok(serde_json::from_slice(&result.stdout)?)
}

/// Serve one request: read it from `input`, write the output to `output`.
/// This is the body of a worker process.
pub fn serve(
    registry: &PluginRegistry,
    mut input: impl Read,
    mut output: impl Write,
) -> Result<(), PluginError> {
    let mut buf = Vec::new();
    input.read_to_end(&mut buf)?;
    let request: WorkerRequest = serde_json::from_slice(&buf)?;
    tracing::debug!(plugin = %request.spec.label(), "worker received plugin");
    let result = execute_spec(registry, request.spec);
    serde_json::to_writer(&mut output, &result)?;
    output.flush()?;
    Ok(())
}
