//! Host-level error taxonomy.

use crate::host::HostState;
use crate::hosting_startup::HostingStartupFailure;
use crate::services::ServiceError;
use crate::startup::StartupError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// `build` may run once per builder.
    #[error("build can only be called once on each host builder")]
    BuildReuse,

    #[error("no server was configured; call use_server before build")]
    ServerNotConfigured,

    #[error("content root could not be resolved: {source}")]
    ContentRoot {
        #[source]
        source: std::io::Error,
    },

    /// Provider construction or validation failed. Never suppressed by the
    /// startup-error capture policy.
    #[error("service provider validation failed: {0}")]
    Provider(#[from] ServiceError),

    #[error("one or more hosting startup packages failed to load: [{}]",
        .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    HostingStartup { errors: Vec<HostingStartupFailure> },

    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error("server error: {source}")]
    Server {
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} is not valid while the host is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: HostState,
    },
}
