//! Startup resolution.
//!
//! A startup is a named table of configuration hooks rather than a reflected
//! type: environment-specific entries (`configure_production`,
//! `configure_staging_services`, ...) are preferred over the generic ones,
//! `configure` is required, `configure_services` optional. Startups reach the
//! builder three ways:
//!
//! - an already-constructed [`StartupMethods`] instance,
//! - a construction function (the constructor-failure boundary), receiving
//!   the dependencies available before the provider exists,
//! - a package name resolved against link-time [`StartupRegistration`]s.
//!
//! Every failure between resolution and hook invocation funnels into a
//! single [`StartupOutcome::Faulted`] that the assembler converts into either
//! a diagnostic page or a build error, depending on the capture policy.

use std::sync::Arc;

use crate::app::AppBuilder;
use crate::environment::HostingEnvironment;
use crate::logging::LoggerFactory;
use crate::services::{ServiceCollection, ServiceProvider};
use crate::settings::Configuration;

/// Dependencies available while constructing a startup — before any service
/// provider exists.
pub struct StartupContext {
    logger_factory: Arc<dyn LoggerFactory>,
    environment: HostingEnvironment,
    configuration: Configuration,
}

impl StartupContext {
    pub(crate) fn new(
        logger_factory: Arc<dyn LoggerFactory>,
        environment: HostingEnvironment,
        configuration: Configuration,
    ) -> Self {
        Self {
            logger_factory,
            environment,
            configuration,
        }
    }

    /// The same factory instance the provider will expose later.
    pub fn logger_factory(&self) -> &Arc<dyn LoggerFactory> {
        &self.logger_factory
    }

    pub fn environment(&self) -> &HostingEnvironment {
        &self.environment
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

/// Hook mutating the service collection; may return a provider that
/// supersedes the one the assembler would build.
pub type ServicesHook =
    Box<dyn FnOnce(&mut ServiceCollection) -> anyhow::Result<Option<ServiceProvider>> + Send>;

/// Hook building the application pipeline.
pub type ConfigureHook = Box<dyn FnOnce(&mut AppBuilder) -> anyhow::Result<()> + Send>;

/// Named hook table of a startup type.
pub struct StartupMethods {
    type_name: String,
    services_hooks: Vec<(String, ServicesHook)>,
    configure_hooks: Vec<(String, ConfigureHook)>,
}

impl StartupMethods {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            services_hooks: Vec::new(),
            configure_hooks: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Register the generic `configure_services` hook.
    #[must_use]
    pub fn configure_services<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut ServiceCollection) -> anyhow::Result<Option<ServiceProvider>>
            + Send
            + 'static,
    {
        self.services_hooks
            .push(("configure_services".to_owned(), Box::new(hook)));
        self
    }

    /// Register an environment-specific services hook, preferred over the
    /// generic one when the environment matches.
    #[must_use]
    pub fn configure_services_for<F>(mut self, environment: &str, hook: F) -> Self
    where
        F: FnOnce(&mut ServiceCollection) -> anyhow::Result<Option<ServiceProvider>>
            + Send
            + 'static,
    {
        let name = format!("configure_{}_services", environment.to_ascii_lowercase());
        self.services_hooks.push((name, Box::new(hook)));
        self
    }

    /// Register the generic `configure` hook.
    #[must_use]
    pub fn configure<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&mut AppBuilder) -> anyhow::Result<()> + Send + 'static,
    {
        self.configure_hooks
            .push(("configure".to_owned(), Box::new(hook)));
        self
    }

    /// Register an environment-specific configure hook.
    #[must_use]
    pub fn configure_for<F>(mut self, environment: &str, hook: F) -> Self
    where
        F: FnOnce(&mut AppBuilder) -> anyhow::Result<()> + Send + 'static,
    {
        let name = format!("configure_{}", environment.to_ascii_lowercase());
        self.configure_hooks.push((name, Box::new(hook)));
        self
    }

    /// Take the services hook for `environment`, environment-specific
    /// variants first. Optional: a startup without one only gets the
    /// already-registered services.
    pub(crate) fn take_services_hook(&mut self, environment: &str) -> Option<(String, ServicesHook)> {
        let env_name = format!("configure_{}_services", environment.to_ascii_lowercase());
        for candidate in [env_name.as_str(), "configure_services"] {
            if let Some(idx) = self.services_hooks.iter().position(|(n, _)| n == candidate) {
                return Some(self.services_hooks.remove(idx));
            }
        }
        None
    }

    /// Take the configure hook for `environment`. Required: absence is a
    /// hard error naming the startup type and both candidate names.
    pub(crate) fn take_configure_hook(
        &mut self,
        environment: &str,
    ) -> Result<(String, ConfigureHook), StartupError> {
        let env_name = format!("configure_{}", environment.to_ascii_lowercase());
        for candidate in [env_name.as_str(), "configure"] {
            if let Some(idx) = self.configure_hooks.iter().position(|(n, _)| n == candidate) {
                return Ok(self.configure_hooks.remove(idx));
            }
        }
        Err(StartupError::MethodNotFound {
            type_name: self.type_name.clone(),
            env_candidate: env_name,
        })
    }
}

/// Link-time registration of a startup type under a logical package.
pub struct StartupRegistration {
    pub package: &'static str,
    /// Conventionally `Startup` or `{Package}Startup`.
    pub type_name: &'static str,
    pub construct: fn(&StartupContext) -> anyhow::Result<StartupMethods>,
}

inventory::collect!(StartupRegistration);

/// The builder's startup reference; the most recently set one wins.
pub(crate) enum StartupRef {
    Unset,
    Instance(StartupMethods),
    Factory {
        type_name: String,
        construct: Box<dyn FnOnce(&StartupContext) -> anyhow::Result<StartupMethods> + Send>,
    },
    Name(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("startup type 'Startup' or '{name}Startup' could not be located in package '{name}'")]
    TypeNotFound { name: String },

    #[error("constructing startup type '{type_name}' failed: {source}")]
    Construction {
        type_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(
        "a public method named '{env_candidate}' or 'configure' could not be found on startup type '{type_name}'"
    )]
    MethodNotFound {
        type_name: String,
        env_candidate: String,
    },

    #[error("'{method}' on startup type '{type_name}' failed: {source}")]
    Invocation {
        type_name: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Result of the resolution stage, consumed uniformly by the assembler.
pub(crate) enum StartupOutcome {
    Resolved(StartupMethods),
    Faulted(StartupError),
}

/// Resolve a startup reference into a hook table.
pub(crate) fn resolve(reference: StartupRef, ctx: &StartupContext) -> Option<StartupOutcome> {
    match reference {
        StartupRef::Unset => None,
        StartupRef::Instance(methods) => Some(StartupOutcome::Resolved(methods)),
        StartupRef::Factory {
            type_name,
            construct,
        } => Some(match construct(ctx) {
            Ok(methods) => StartupOutcome::Resolved(methods),
            Err(source) => StartupOutcome::Faulted(StartupError::Construction {
                type_name,
                source,
            }),
        }),
        StartupRef::Name(name) => Some(resolve_by_name(&name, ctx)),
    }
}

/// Locate a registered startup type for `name`: the named package is searched
/// first, then the application's own package; a type named `Startup` or
/// `{Name}Startup` matches (case-insensitive). An unresolved name defers its
/// error so it routes through the capture policy like every other startup
/// failure.
fn resolve_by_name(name: &str, ctx: &StartupContext) -> StartupOutcome {
    let app_name = ctx.environment().application_name.clone();
    let packages = [name, app_name.as_str()];
    let suffixed = format!("{name}Startup");

    for package in packages {
        let found = inventory::iter::<StartupRegistration>
            .into_iter()
            .filter(|r| r.package.eq_ignore_ascii_case(package))
            .find(|r| {
                r.type_name.eq_ignore_ascii_case("Startup")
                    || r.type_name.eq_ignore_ascii_case(&suffixed)
            });
        if let Some(registration) = found {
            return match (registration.construct)(ctx) {
                Ok(methods) => StartupOutcome::Resolved(methods),
                Err(source) => StartupOutcome::Faulted(StartupError::Construction {
                    type_name: registration.type_name.to_owned(),
                    source,
                }),
            };
        }
    }

    StartupOutcome::Faulted(StartupError::TypeNotFound {
        name: name.to_owned(),
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn environment_specific_hook_is_preferred() {
        let mut methods = StartupMethods::new("TestStartup")
            .configure(|_| Ok(()))
            .configure_for("Staging", |_| Ok(()));
        let (name, _) = methods.take_configure_hook("Staging").unwrap();
        assert_eq!(name, "configure_staging");
    }

    #[test]
    fn generic_hook_is_the_fallback() {
        let mut methods = StartupMethods::new("TestStartup").configure(|_| Ok(()));
        let (name, _) = methods.take_configure_hook("Production").unwrap();
        assert_eq!(name, "configure");
    }

    #[test]
    fn missing_configure_names_type_and_candidates() {
        let mut methods = StartupMethods::new("BrokenStartup").configure_services(|_| Ok(None));
        let err = match methods.take_configure_hook("Production") {
            Ok(_) => panic!("expected take_configure_hook to return an error"),
            Err(e) => e,
        };
        let message = err.to_string();
        assert_eq!(
            message,
            "a public method named 'configure_production' or 'configure' could not be found \
             on startup type 'BrokenStartup'"
        );
    }

    #[test]
    fn services_hook_is_optional() {
        let mut methods = StartupMethods::new("TestStartup").configure(|_| Ok(()));
        assert!(methods.take_services_hook("Production").is_none());
    }
}
