//! Hosting environment description and application lifetime notifications.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

/// Resolved environment the application runs in. Registered as a framework
/// singleton so services and startups can branch on it.
#[derive(Clone, Debug)]
pub struct HostingEnvironment {
    pub environment: String,
    pub application_name: String,
    pub content_root: PathBuf,
}

impl HostingEnvironment {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_environment(&self, name: &str) -> bool {
        self.environment.eq_ignore_ascii_case(name)
    }
}

/// Lifetime notifications for the running application.
///
/// Each accessor returns a token that is cancelled when the corresponding
/// transition happens; consumers `await` `cancelled()` on it. Tokens are
/// idempotent, so repeated transitions are harmless.
#[derive(Default)]
pub struct ApplicationLifetime {
    started: CancellationToken,
    stopping: CancellationToken,
    stopped: CancellationToken,
}

impl ApplicationLifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires once the host has started serving.
    pub fn started(&self) -> CancellationToken {
        self.started.clone()
    }

    /// Fires when shutdown begins, before the server stops.
    pub fn stopping(&self) -> CancellationToken {
        self.stopping.clone()
    }

    /// Fires once the server has stopped.
    pub fn stopped(&self) -> CancellationToken {
        self.stopped.clone()
    }

    pub(crate) fn notify_started(&self) {
        self.started.cancel();
    }

    pub(crate) fn notify_stopping(&self) {
        self.stopping.cancel();
    }

    pub(crate) fn notify_stopped(&self) {
        self.stopped.cancel();
    }
}
