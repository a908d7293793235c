//! Registry of libraries.

use crate::error::Error;
use crate::operation::Operation;
use crate::plugin::{Library, LibraryDecl, PluginBuilder};
use indexmap::IndexMap;
use std::sync::Arc;

/// Registration table mapping (operation, library name) to a library.
///
/// Built once at startup (see `assayer_builtin::register_all`) and passed to
/// runs explicitly.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    /// Library declarations indexed by name.
    declarations: IndexMap<String, LibraryDecl>,
    /// Implementations indexed by (operation, library name).
    implementations: IndexMap<(Operation, String), Arc<dyn Library>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a library for every operation it declares. A later
    /// registration under the same name replaces the earlier one.
    pub fn register(&mut self, library: impl Library + 'static) {
        let decl = library.decl().clone();
        let library: Arc<dyn Library> = Arc::new(library);
        self.implementations.retain(|(_, name), _| *name != decl.name);
        for operation in decl.operations.keys() {
            self.implementations
                .insert((*operation, decl.name.clone()), library.clone());
        }
        self.declarations.insert(decl.name.clone(), decl);
    }

    /// Get a library declaration by name.
    pub fn get_decl(&self, name: &str) -> Option<&LibraryDecl> {
        self.declarations.get(name)
    }

    /// Get the library registered for `operation` under `name`.
    pub fn get(&self, operation: Operation, name: &str) -> Option<Arc<dyn Library>> {
        self.implementations
            .get(&(operation, name.to_string()))
            .cloned()
    }

    /// Like [`PluginRegistry::get`], but an unregistered pair is an error.
    pub fn resolve(&self, operation: Operation, name: &str) -> Result<Arc<dyn Library>, Error> {
        self.get(operation, name).ok_or_else(|| Error::NotImplemented {
            operation,
            library: name.to_string(),
        })
    }

    /// One fresh builder per configured library, in configuration order.
    ///
    /// Every name is resolved before any builder is created, so an
    /// unregistered library fails before any I/O.
    pub fn builders<'a>(
        &self,
        operation: Operation,
        libraries: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<Box<dyn PluginBuilder>>, Error> {
        let resolved = libraries
            .into_iter()
            .map(|name| self.resolve(operation, name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(resolved
            .iter()
            .map(|library| library.builder(operation))
            .collect())
    }

    /// Iterate over all declarations.
    pub fn declarations(&self) -> impl Iterator<Item = &LibraryDecl> {
        self.declarations.values()
    }

    /// Registered (operation, library name) pairs, in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (Operation, &str)> {
        self.implementations
            .keys()
            .map(|(operation, name)| (*operation, name.as_str()))
    }

    /// Number of registered libraries.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}
