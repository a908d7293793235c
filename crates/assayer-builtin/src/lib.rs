//! Built-in data-quality libraries for Assayer.
//!
//! Each library is behind a feature flag:
//!
//! - `tabular`: column type inference, column checks, profiling and metrics
//!   over delimited files
//! - `sqlite`: SQL query constraints over resources loaded into a scratch
//!   SQLite database
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = PluginRegistry::new();
//! assayer_builtin::register_all(&mut registry);
//! ```

use assayer::PluginRegistry;

#[cfg(feature = "tabular")]
pub mod tabular;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "tabular")]
pub use tabular::TabularLibrary;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLibrary;

/// Register every enabled library.
pub fn register_all(registry: &mut PluginRegistry) {
    #[cfg(feature = "tabular")]
    registry.register(TabularLibrary::new());

    #[cfg(feature = "sqlite")]
    registry.register(SqliteLibrary::new());

    tracing::debug!(libraries = registry.len(), "registered built-in libraries");
}

/// A registry holding only the built-in libraries.
pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    register_all(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use assayer::Operation;

    #[test]
    fn test_register_all() {
        let registry = registry();
        #[cfg(feature = "tabular")]
        for operation in Operation::ALL {
            assert!(registry.get(operation, "tabular").is_some());
        }
        #[cfg(feature = "sqlite")]
        {
            assert!(registry.get(Operation::Validation, "sqlite").is_some());
            assert!(registry.get(Operation::Inference, "sqlite").is_none());
        }
    }
}
