//! Hosting-startup units: auxiliary configuration applied before the primary
//! startup resolves.
//!
//! Units are discovered through link-time registrations rather than runtime
//! scanning: a package submits a [`HostingStartupRegistration`] naming the
//! logical package it belongs to, and the loader looks registrations up by
//! the names listed in the `hosting_startup_packages` setting. A unit may
//! call any public builder method — settings, service callbacks, logging
//! callbacks — before the application startup runs.

use crate::builder::HostBuilder;
use crate::settings::keys;

/// Event identifier attached to suppressed load failures, for log scraping.
pub const HOSTING_STARTUP_LOAD_FAILURE: &str = "hosting_startup_load_failure";

/// A hosting-startup configuration unit.
pub trait HostingStartup: Send + Sync {
    /// Mutate the builder before the primary startup is resolved.
    fn configure(&self, builder: &mut HostBuilder) -> anyhow::Result<()>;
}

/// Link-time registration of a hosting-startup unit.
///
/// Submit with `inventory::submit!`:
///
/// ```ignore
/// inventory::submit! {
///     hostkit::HostingStartupRegistration {
///         package: "telemetry",
///         construct: || Box::new(TelemetryStartup),
///     }
/// }
/// ```
pub struct HostingStartupRegistration {
    /// Logical package this unit ships in.
    pub package: &'static str,
    pub construct: fn() -> Box<dyn HostingStartup>,
}

inventory::collect!(HostingStartupRegistration);

/// One failed package load.
#[derive(Debug, thiserror::Error)]
#[error("hosting startup package '{package}': {source}")]
pub struct HostingStartupFailure {
    pub package: String,
    #[source]
    pub source: anyhow::Error,
}

/// Run every requested hosting-startup unit against the builder.
///
/// With `capture` on, failures are logged under a dedicated event identifier
/// and the build proceeds; with capture off, the collected failures are
/// returned for aggregation.
pub(crate) fn run(builder: &mut HostBuilder, capture: bool) -> Vec<HostingStartupFailure> {
    let requested = builder.settings().list(keys::HOSTING_STARTUP_PACKAGES);
    if requested.is_empty() {
        return Vec::new();
    }
    let excluded = builder.settings().list(keys::HOSTING_STARTUP_EXCLUDE_PACKAGES);

    let mut failures = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for package in requested {
        if seen.iter().any(|p| p.eq_ignore_ascii_case(&package)) {
            continue;
        }
        seen.push(package.clone());
        if excluded.iter().any(|p| p.eq_ignore_ascii_case(&package)) {
            tracing::debug!(package = %package, "hosting startup package excluded");
            continue;
        }

        let registrations: Vec<&HostingStartupRegistration> =
            inventory::iter::<HostingStartupRegistration>
                .into_iter()
                .filter(|r| r.package.eq_ignore_ascii_case(&package))
                .collect();

        if registrations.is_empty() {
            failures.push(HostingStartupFailure {
                package: package.clone(),
                source: anyhow::anyhow!("package '{package}' is not registered"),
            });
            continue;
        }

        for registration in registrations {
            let unit = (registration.construct)();
            if let Err(source) = unit.configure(builder) {
                failures.push(HostingStartupFailure {
                    package: package.clone(),
                    source,
                });
            }
        }
    }

    if capture {
        for failure in failures.drain(..) {
            tracing::error!(
                event = HOSTING_STARTUP_LOAD_FAILURE,
                package = %failure.package,
                error = %failure.source,
                "hosting startup package failed to load; continuing"
            );
        }
    }
    failures
}
