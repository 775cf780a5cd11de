//! Dispatcher: the service object that launches operations.

use awaitkit_core::AsyncError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::error;

use crate::main_context::{self, MainHandle};
use crate::operation::{LaunchOptions, Operation};
use crate::registry::Registry;

/// Configuration for a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Prefix of every operation name
    pub namespace: String,
    /// Thread name of the main context started by [`Dispatcher::new`]
    pub main_thread_name: String,
    /// Worker stack size in bytes (platform default when unset)
    pub worker_stack_size: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            namespace: "com.async.operation".to_string(),
            main_thread_name: "com.async.main".to_string(),
            worker_stack_size: None,
        }
    }
}

impl DispatcherConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the operation name prefix.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the main context thread name.
    pub fn with_main_thread_name(mut self, name: impl Into<String>) -> Self {
        self.main_thread_name = name.into();
        self
    }

    /// Set the worker stack size.
    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }
}

/// Launches operations and keeps them alive until they finish.
///
/// Each dispatcher owns its own registry and main context, so independent
/// instances never observe each other's operations.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: Arc<Registry>,
    main: MainHandle,
}

static GLOBAL: OnceLock<Dispatcher> = OnceLock::new();

impl Dispatcher {
    /// Create a dispatcher whose main context runs on a dedicated thread.
    pub fn new(config: DispatcherConfig) -> Result<Self, AsyncError> {
        let main = main_context::spawn(&config.main_thread_name)?;
        Ok(Self::with_main(config, main))
    }

    /// Create a dispatcher around a main context driven elsewhere.
    pub fn with_main(config: DispatcherConfig, main: MainHandle) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            main,
        }
    }

    /// The process-wide dispatcher, created on first use.
    pub fn global() -> &'static Dispatcher {
        GLOBAL.get_or_init(|| {
            let config = DispatcherConfig::default();
            let main = main_context::spawn(&config.main_thread_name).unwrap_or_else(|err| {
                error!(error = %err, "main context unavailable");
                // Loop dropped at once: every hop reports failure.
                main_context::channel().0
            });
            Self::with_main(config, main)
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Get the registry of running operations.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get a handle to the main context.
    pub fn main_handle(&self) -> &MainHandle {
        &self.main
    }

    /// Launch `workflow` on a new operation.
    ///
    /// Returns as soon as the worker is started; the workflow runs
    /// asynchronously and the operation unregisters itself afterwards.
    pub fn launch<W>(&self, workflow: W) -> Result<Arc<Operation>, AsyncError>
    where
        W: FnOnce(&Operation) + Send + 'static,
    {
        self.launch_with(LaunchOptions::default(), workflow)
    }

    /// Launch `workflow` with teardown hooks.
    pub fn launch_with<W>(
        &self,
        options: LaunchOptions,
        workflow: W,
    ) -> Result<Arc<Operation>, AsyncError>
    where
        W: FnOnce(&Operation) + Send + 'static,
    {
        Operation::spawn(
            &self.config,
            &self.registry,
            self.main.clone(),
            options,
            Box::new(workflow),
        )
    }
}

/// Launch `workflow` on the process-wide dispatcher.
///
/// ```no_run
/// use awaitkit_core::Task;
///
/// awaitkit_execution::launch(|operation| {
///     let task: Task<i32, String> = Task::ready(Ok(5));
///     operation.await_task(&task);
///     assert_eq!(task.value(), Some(5));
/// })
/// .unwrap();
/// ```
pub fn launch<W>(workflow: W) -> Result<Arc<Operation>, AsyncError>
where
    W: FnOnce(&Operation) + Send + 'static,
{
    Dispatcher::global().launch(workflow)
}
