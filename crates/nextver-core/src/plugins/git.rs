use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::info;

use super::events::{CONFIGURATION_READY, REPOSITORY_READY};
use crate::events::Signal;
use crate::git::{GitRepository, RepositoryHandle};
use crate::plugin::{Lifecycle, Plugin, PluginResult};

/// Opens the repository around the working directory and publishes it as
/// `RepositoryReady`.
pub struct GitPlugin {
    lifecycle: Lifecycle,
    preset: Option<RepositoryHandle>,
    repository: OnceLock<RepositoryHandle>,
}

impl GitPlugin {
    /// Discover the repository from the configured working directory.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Publish `repository` instead of discovering one.
    pub fn with_repository(repository: RepositoryHandle) -> Arc<Self> {
        Self::build(Some(repository))
    }

    fn build(preset: Option<RepositoryHandle>) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Lifecycle::new("git"),
            preset,
            repository: OnceLock::new(),
        })
    }

    /// The published repository, once the run has initialized.
    pub fn repository(&self) -> Option<&RepositoryHandle> {
        self.repository.get()
    }
}

#[async_trait]
impl Plugin for GitPlugin {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn on_execution(self: Arc<Self>) -> PluginResult<()> {
        let bus = self.lifecycle.events()?.clone();
        let plugin = Arc::clone(&self);
        let subscription = self.lifecycle.events()?.subscribe(
            Signal::once(&CONFIGURATION_READY),
            move |configured| {
                let bus = bus.clone();
                let plugin = Arc::clone(&plugin);
                async move {
                    let repository: RepositoryHandle = match &plugin.preset {
                        Some(repository) => Arc::clone(repository),
                        None => Arc::new(GitRepository::discover(&configured.working_dir)?),
                    };
                    info!(git_dir = %repository.git_dir(), "repository ready");
                    let repository = Arc::clone(plugin.repository.get_or_init(|| repository));
                    bus.emit(&REPOSITORY_READY, repository).await
                }
            },
        );
        self.lifecycle.add_disposable(subscription)
    }
}
