//! Per-run accumulator of plugin outputs.

use crate::operation::Operation;
use crate::plugin::{PluginOutput, StageStatus};
use indexmap::IndexMap;
use std::sync::Arc;

/// Operation → plugin outputs, in insertion order.
///
/// Append-only during a run and written by the driver only. Insertion order
/// decides artifact filenames, so it is kept stable.
#[derive(Debug, Clone, Default)]
pub struct ResultRegistry {
    entries: IndexMap<Operation, Vec<Arc<PluginOutput>>>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `operation` as computed, even if it produced no output.
    pub fn touch(&mut self, operation: Operation) {
        self.entries.entry(operation).or_default();
    }

    pub fn push(&mut self, operation: Operation, output: PluginOutput) {
        self.entries
            .entry(operation)
            .or_default()
            .push(Arc::new(output));
    }

    /// True once `operation` has been run.
    pub fn contains(&self, operation: Operation) -> bool {
        self.entries.contains_key(&operation)
    }

    /// Outputs of `operation`; empty if it has not run.
    pub fn get(&self, operation: Operation) -> &[Arc<PluginOutput>] {
        self.entries
            .get(&operation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of outputs of `operation` with the given status.
    pub fn count(&self, operation: Operation, status: StageStatus) -> usize {
        self.get(operation)
            .iter()
            .filter(|output| output.status() == status)
            .count()
    }

    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.entries.keys().copied()
    }

    /// Per-operation (success, error) counts.
    pub fn summary(&self) -> IndexMap<Operation, (usize, usize)> {
        self.operations()
            .map(|op| {
                (
                    op,
                    (
                        self.count(op, StageStatus::Success),
                        self.count(op, StageStatus::Error),
                    ),
                )
            })
            .collect()
    }
}
