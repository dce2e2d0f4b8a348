//! The assembled host and its lifecycle state machine.
//!
//! States: Created → Started → Stopped → Disposed. `stop` before `start` and
//! repeated `stop`/`dispose` calls are no-ops; `start` on anything but a
//! Created host fails; Stopped may be skipped by disposing a Started host
//! directly. Disposal releases provider-owned services exactly once and
//! never touches externally supplied instances — that guarantee lives in the
//! service layer's ownership model.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::environment::ApplicationLifetime;
use crate::error::HostError;
use crate::server::{RequestHandler, Server};
use crate::services::ServiceProvider;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostState {
    Created,
    Started,
    Stopped,
    Disposed,
}

/// Options the builder resolved while assembling the host.
#[derive(Clone, Debug)]
pub struct HostOptions {
    pub application_name: String,
    pub environment: String,
    pub content_root: PathBuf,
    pub startup_package: Option<String>,
}

pub struct Host {
    state: HostState,
    services: ServiceProvider,
    server: Arc<dyn Server>,
    handler: RequestHandler,
    options: HostOptions,
    lifetime: Arc<ApplicationLifetime>,
}

impl Host {
    pub(crate) fn new(
        services: ServiceProvider,
        server: Arc<dyn Server>,
        handler: RequestHandler,
        options: HostOptions,
        lifetime: Arc<ApplicationLifetime>,
    ) -> Self {
        Self {
            state: HostState::Created,
            services,
            server,
            handler,
            options,
            lifetime,
        }
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    pub fn server(&self) -> &Arc<dyn Server> {
        &self.server
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// The terminal request handler the server was (or will be) bound to.
    /// Useful for in-process servers and tests.
    pub fn request_handler(&self) -> RequestHandler {
        Arc::clone(&self.handler)
    }

    /// Bind the server to the request pipeline and begin serving. The
    /// cancellation token is handed to the server verbatim.
    pub async fn start(&mut self, cancel: CancellationToken) -> Result<(), HostError> {
        if self.state != HostState::Created {
            return Err(HostError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        tracing::info!(
            application = %self.options.application_name,
            environment = %self.options.environment,
            "Phase: start"
        );
        self.server
            .start(Arc::clone(&self.handler), cancel)
            .await
            .map_err(|source| HostError::Server { source })?;
        self.state = HostState::Started;
        self.lifetime.notify_started();
        Ok(())
    }

    /// Ask the server to stop accepting work and complete in-flight
    /// requests. A no-op unless the host is Started.
    pub async fn stop(&mut self, cancel: CancellationToken) -> Result<(), HostError> {
        match self.state {
            HostState::Started => {}
            HostState::Created | HostState::Stopped => return Ok(()),
            HostState::Disposed => {
                return Err(HostError::InvalidState {
                    operation: "stop",
                    state: self.state,
                })
            }
        }
        tracing::info!(application = %self.options.application_name, "Phase: stop");
        self.lifetime.notify_stopping();
        let result = self
            .server
            .stop(cancel)
            .await
            .map_err(|source| HostError::Server { source });
        self.state = HostState::Stopped;
        self.lifetime.notify_stopped();
        result
    }

    /// Release the server and dispose provider-owned services. Idempotent;
    /// safe directly from Started (skipping Stopped).
    pub fn dispose(&mut self) {
        if self.state == HostState::Disposed {
            return;
        }
        if self.state == HostState::Started {
            tracing::debug!("host disposed while started; releasing server");
            self.lifetime.notify_stopping();
        }
        self.server.dispose();
        self.services.dispose();
        self.lifetime.notify_stopped();
        self.state = HostState::Disposed;
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.dispose();
    }
}
