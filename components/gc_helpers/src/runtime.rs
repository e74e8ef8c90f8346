//! The runtime handle helpers run against.

use crate::collector::{Collector, DefaultDispatch, ExceptionDispatch};
use crate::config::GcConfig;
use crate::thread_context::{AttachedThread, ThreadStore};
use core_types::AttachError;
use std::sync::Arc;

/// Configuration plus the collaborators every helper needs.
///
/// Allocation entry points live in [`crate::alloc`].
pub struct Runtime {
    config: GcConfig,
    collector: Arc<dyn Collector>,
    dispatch: Arc<dyn ExceptionDispatch>,
    threads: ThreadStore,
}

impl Runtime {
    /// Creates a runtime with the default exception dispatcher.
    pub fn new(config: GcConfig, collector: Arc<dyn Collector>) -> Self {
        Runtime {
            threads: ThreadStore::new(Arc::clone(&collector)),
            config,
            collector,
            dispatch: Arc::new(DefaultDispatch),
        }
    }

    /// Replaces the exception dispatcher.
    pub fn with_dispatch(mut self, dispatch: Arc<dyn ExceptionDispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// The collector collaborator.
    pub fn collector(&self) -> &Arc<dyn Collector> {
        &self.collector
    }

    /// The exception dispatcher.
    pub fn dispatch(&self) -> &Arc<dyn ExceptionDispatch> {
        &self.dispatch
    }

    /// Registry of attached threads.
    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    /// Attaches the calling thread. See [`ThreadStore::attach_current_thread`].
    pub fn attach_current_thread(&self) -> Result<AttachedThread<'_>, AttachError> {
        self.threads.attach_current_thread()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}
