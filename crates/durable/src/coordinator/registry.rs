//! Module registry for type-erased module creation
//!
//! The registry maps module names to factories that build a ready-to-run
//! [`RunnableModule`] for each cycle, so the coordinator never needs the
//! concrete module types.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::engine::{LifecycleRunner, RunnableModule};
use crate::module::{DataModule, ModuleError};
use crate::persistence::DocumentStore;
use crate::reliability::BackoffPolicy;

/// Shared collaborators handed to every module factory
#[derive(Clone)]
pub struct ModuleEnv {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub backoff: BackoffPolicy,
    pub cancel: CancellationToken,
}

impl ModuleEnv {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            checkpoints,
            documents,
            backoff: BackoffPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wrap `module` in a runner bound to this environment
    pub fn runner<M: DataModule>(&self, module: M) -> LifecycleRunner<M> {
        LifecycleRunner::new(module, Arc::clone(&self.checkpoints))
            .with_cancellation(self.cancel.clone())
            .with_backoff(self.backoff.clone())
    }
}

impl fmt::Debug for ModuleEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleEnv")
            .field("backoff", &self.backoff)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Factory function type for building a module for one cycle
pub type ModuleFactory =
    Box<dyn Fn(&ModuleEnv) -> Result<Box<dyn RunnableModule>, ModuleError> + Send + Sync>;

/// Registry of module factories, in registration order
pub struct ModuleRegistry {
    factories: Vec<(String, ModuleFactory)>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Register a module under `name`
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = ModuleRegistry::new();
    /// registry.register("countries", |env| Ok(Countries::new(env.documents.clone())))?;
    /// ```
    pub fn register<M, F>(&mut self, name: impl Into<String>, build: F) -> Result<(), RegistryError>
    where
        M: DataModule,
        F: Fn(&ModuleEnv) -> Result<M, ModuleError> + Send + Sync + 'static,
    {
        let factory: ModuleFactory = Box::new(move |env: &ModuleEnv| {
            let module = build(env)?;
            Ok(Box::new(env.runner(module)) as Box<dyn RunnableModule>)
        });
        self.register_factory(name, factory)
    }

    /// Register a pre-boxed factory
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        factory: ModuleFactory,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.factories.push((name, factory));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(n, _)| n == name)
    }

    /// Build the module registered as `name`
    pub fn create(&self, name: &str, env: &ModuleEnv) -> Result<Box<dyn RunnableModule>, RegistryError> {
        let (_, factory) = self
            .factories
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| RegistryError::UnknownModule(name.to_string()))?;

        factory(env).map_err(|source| RegistryError::Construction {
            module: name.to_string(),
            source,
        })
    }

    /// Keep only the modules named in `names`
    pub fn retain(&mut self, names: &[String]) -> Result<(), RegistryError> {
        if let Some(unknown) = names.iter().find(|n| !self.contains(n)) {
            return Err(RegistryError::UnknownModule(unknown.clone()));
        }
        self.factories.retain(|(n, _)| names.contains(n));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered module names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|(n, _)| n.as_str())
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("module already registered: {0}")]
    Duplicate(String),

    /// The factory refused to build the module
    #[error("failed to construct module {module}: {source}")]
    Construction {
        module: String,
        #[source]
        source: ModuleError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{Checkpoint, InMemoryCheckpointStore};
    use crate::lifecycle::Outcome;
    use crate::module::RunContext;
    use crate::persistence::InMemoryDocumentStore;
    use crate::reliability::TimeDelta;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl DataModule for Noop {
        type Fields = ();

        fn name(&self) -> &str {
            "noop"
        }

        fn default_checkpoint(&self) -> Checkpoint<()> {
            Checkpoint::new(TimeDelta::days(1), ())
        }

        async fn fetch(&mut self, _ctx: &mut RunContext<()>) -> Result<Outcome, ModuleError> {
            Ok(Outcome::Continue)
        }

        async fn save(&mut self, _ctx: &mut RunContext<()>) -> Result<Outcome, ModuleError> {
            Ok(Outcome::Continue)
        }
    }

    fn env() -> ModuleEnv {
        ModuleEnv::new(
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(InMemoryDocumentStore::new()),
        )
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ModuleRegistry::new();
        registry.register("noop", |_| Ok(Noop)).expect("should register");

        assert!(registry.contains("noop"));
        let module = registry.create("noop", &env()).expect("should create module");
        assert_eq!(module.name(), "noop");
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut registry = ModuleRegistry::new();
        registry.register("noop", |_| Ok(Noop)).expect("should register");

        let result = registry.register("noop", |_| Ok(Noop));
        assert!(matches!(result, Err(RegistryError::Duplicate(_))));

        let result = registry.create("missing", &env());
        assert!(matches!(result, Err(RegistryError::UnknownModule(_))));
    }

    #[test]
    fn test_construction_failure() {
        let mut registry = ModuleRegistry::new();
        registry
            .register::<Noop, _>("broken", |_| Err(ModuleError::Config("no tokens".into())))
            .expect("should register");

        let result = registry.create("broken", &env());
        assert!(matches!(result, Err(RegistryError::Construction { .. })));
    }

    #[test]
    fn test_retain_filters_modules() {
        let mut registry = ModuleRegistry::new();
        registry.register("a", |_| Ok(Noop)).expect("should register");
        registry.register("b", |_| Ok(Noop)).expect("should register");

        registry.retain(&["b".to_string()]).expect("should retain");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["b"]);

        let result = registry.retain(&["zzz".to_string()]);
        assert!(matches!(result, Err(RegistryError::UnknownModule(_))));
    }
}
