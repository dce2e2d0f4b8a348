//! Host assembler.
//!
//! `HostBuilder` records declarative configuration — settings, service and
//! logging callbacks, a startup reference, a server — and `build` converts it
//! exactly once into an immutable [`Host`].
//!
//! Phase order inside `build`:
//! - hosting startups (builder mutations applied first)
//! - configuration (merged settings view; environment/content-root/name
//!   resolution — after the loader so its mutations are visible)
//! - logging (factory resolution, ordered callbacks)
//! - services (callbacks, then framework singletons via `try_add`)
//! - startup (resolution, hooks, provider construction, fallback policy)
//! - host construction

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use crate::app::{self, AppBuilder};
use crate::environment::{ApplicationLifetime, HostingEnvironment};
use crate::error::HostError;
use crate::host::{Host, HostOptions};
use crate::hosting_startup;
use crate::logging::{FactorySource, LoggerFactory, LoggingConfigurator};
use crate::server::Server;
use crate::services::{ProviderOptions, ServiceCollection, ServiceProvider};
use crate::settings::{keys, ConfigSnapshot, Configuration, SettingsStore};
use crate::startup::{
    self, StartupContext, StartupError, StartupMethods, StartupOutcome, StartupRef,
};

/// Read-only context handed to service and provider-option callbacks.
pub struct BuilderContext {
    pub configuration: Configuration,
    pub environment: HostingEnvironment,
}

type ServicesCallback = Box<dyn FnOnce(&BuilderContext, &mut ServiceCollection) + Send>;
type ProviderOptionsCallback = Box<dyn FnOnce(&BuilderContext, &mut ProviderOptions) + Send>;

pub struct HostBuilder {
    settings: SettingsStore,
    services_callbacks: Vec<ServicesCallback>,
    provider_callbacks: Vec<ProviderOptionsCallback>,
    logging: LoggingConfigurator,
    startup: StartupRef,
    server: Option<Arc<dyn Server>>,
    built: bool,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self {
            settings: SettingsStore::default(),
            services_callbacks: Vec::new(),
            provider_callbacks: Vec::new(),
            logging: LoggingConfigurator::default(),
            startup: StartupRef::Unset,
            server: None,
            built: false,
        }
    }
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) a setting. Keys are case-insensitive.
    pub fn use_setting(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.settings.set(key, value);
        self
    }

    /// Current value of a setting, if any.
    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.settings.get(key)
    }

    /// Replace the configuration baseline. Previously recorded `use_setting`
    /// overrides stay layered on top.
    pub fn use_configuration(&mut self, snapshot: ConfigSnapshot) -> &mut Self {
        self.settings.replace_snapshot(snapshot);
        self
    }

    pub fn use_environment(&mut self, environment: &str) -> &mut Self {
        self.use_setting(keys::ENVIRONMENT, environment)
    }

    pub fn use_content_root(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path: PathBuf = path.into();
        self.use_setting(keys::CONTENT_ROOT, path.display().to_string())
    }

    pub fn capture_startup_errors(&mut self, capture: bool) -> &mut Self {
        self.use_setting(keys::CAPTURE_STARTUP_ERRORS, capture.to_string())
    }

    /// Append a service-configuration callback; callbacks run in
    /// registration order exactly once during `build`.
    pub fn configure_services<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(&BuilderContext, &mut ServiceCollection) + Send + 'static,
    {
        self.services_callbacks.push(Box::new(callback));
        self
    }

    /// Record options applied when the final provider is constructed.
    /// Validation failures surface as build-time errors, never as a
    /// diagnostic page.
    pub fn use_default_service_provider<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(&BuilderContext, &mut ProviderOptions) + Send + 'static,
    {
        self.provider_callbacks.push(Box::new(callback));
        self
    }

    /// Use the given logger factory instead of the default tracing-backed
    /// one. The same instance is used during startup construction and
    /// exposed through the provider.
    pub fn use_logger_factory(&mut self, factory: Arc<dyn LoggerFactory>) -> &mut Self {
        self.logging.set_source(FactorySource::Instance(factory));
        self
    }

    /// Defer logger-factory construction to build time.
    pub fn use_logger_factory_fn<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce() -> Arc<dyn LoggerFactory> + Send + 'static,
    {
        self.logging.set_source(FactorySource::Deferred(Box::new(build)));
        self
    }

    /// Append a logging-configuration callback, run once after the factory
    /// exists.
    pub fn configure_logging<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce(&Arc<dyn LoggerFactory>) + Send + 'static,
    {
        self.logging.push(Box::new(callback));
        self
    }

    /// Type-filtered variant: runs only when the resolved factory's concrete
    /// type is `F`.
    pub fn configure_logging_for<F, C>(&mut self, callback: C) -> &mut Self
    where
        F: LoggerFactory,
        C: FnOnce(&F) + Send + 'static,
    {
        self.logging.push_filtered::<F>(callback);
        self
    }

    /// Use an already-constructed startup. The most recently set startup
    /// reference wins.
    pub fn use_startup(&mut self, methods: StartupMethods) -> &mut Self {
        self.startup = StartupRef::Instance(methods);
        self
    }

    /// Use a startup type via its construction function. Construction runs
    /// at build time with the pre-provider dependencies (logger factory,
    /// environment, configuration); its failure is subject to the capture
    /// policy.
    pub fn use_startup_factory<F>(&mut self, type_name: impl Into<String>, construct: F) -> &mut Self
    where
        F: FnOnce(&StartupContext) -> anyhow::Result<StartupMethods> + Send + 'static,
    {
        self.startup = StartupRef::Factory {
            type_name: type_name.into(),
            construct: Box::new(construct),
        };
        self
    }

    /// Resolve the startup from a registered package name at build time.
    /// Also records the name under the `startup_package` setting.
    pub fn use_startup_name(&mut self, name: &str) -> &mut Self {
        self.use_setting(keys::STARTUP_PACKAGE, name);
        self.startup = StartupRef::Name(name.to_owned());
        self
    }

    /// Shortcut for applications without a startup type: install the
    /// pipeline directly.
    pub fn configure_app<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce(&mut AppBuilder) -> anyhow::Result<()> + Send + 'static,
    {
        self.startup = StartupRef::Instance(StartupMethods::new("InlineStartup").configure(hook));
        self
    }

    /// Supply the server the host binds to. Required; the host never owns it.
    pub fn use_server(&mut self, server: Arc<dyn Server>) -> &mut Self {
        self.server = Some(server);
        self
    }

    pub(crate) fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Assemble the host. Runs at most once per builder; a second call fails
    /// with [`HostError::BuildReuse`] regardless of the first outcome.
    pub fn build(&mut self) -> Result<Host, HostError> {
        if self.built {
            return Err(HostError::BuildReuse);
        }
        self.built = true;

        // The loader's own failure policy needs the capture flag, so it is
        // read before hosting startups get a chance to mutate it.
        let capture = self.settings.flag(keys::CAPTURE_STARTUP_ERRORS, true);

        tracing::info!("Phase: hosting_startup");
        let failures = hosting_startup::run(self, capture);
        if !failures.is_empty() {
            return Err(HostError::HostingStartup { errors: failures });
        }

        // Environment, application name and content root resolve after the
        // loader so hosting-startup mutations are visible downstream.
        let environment = self.resolve_environment()?;
        tracing::info!(
            environment = %environment.environment,
            application = %environment.application_name,
            "Phase: configuration"
        );
        let configuration = self.settings.to_configuration();

        tracing::info!("Phase: logging");
        let logger_factory = self.logging.resolve_factory();
        self.logging.run(&logger_factory);

        tracing::info!("Phase: services");
        let ctx = BuilderContext {
            configuration: configuration.clone(),
            environment: environment.clone(),
        };
        let mut services = ServiceCollection::new();
        for callback in mem::take(&mut self.services_callbacks) {
            callback(&ctx, &mut services);
        }
        let mut provider_options = ProviderOptions::default();
        for callback in mem::take(&mut self.provider_callbacks) {
            callback(&ctx, &mut provider_options);
        }

        let lifetime = Arc::new(ApplicationLifetime::new());
        services.try_add_instance(Arc::new(environment.clone()));
        services.try_add_instance(Arc::clone(&lifetime));
        services.try_add_instance(Arc::new(configuration.clone()));
        services.try_add_instance::<dyn LoggerFactory>(Arc::clone(&logger_factory));

        tracing::info!("Phase: startup");
        let startup_ctx = StartupContext::new(
            Arc::clone(&logger_factory),
            environment.clone(),
            configuration,
        );
        let reference = match mem::replace(&mut self.startup, StartupRef::Unset) {
            StartupRef::Unset => match self.settings.get(keys::STARTUP_PACKAGE) {
                Some(name) => StartupRef::Name(name),
                None => StartupRef::Unset,
            },
            reference => reference,
        };
        let outcome = startup::resolve(reference, &startup_ctx);

        let env_name = environment.environment.clone();
        let mut faulted: Option<StartupError> = None;
        let mut custom_provider: Option<ServiceProvider> = None;
        let mut configure_hook = None;

        match outcome {
            None => {}
            Some(StartupOutcome::Faulted(error)) => faulted = Some(error),
            Some(StartupOutcome::Resolved(mut methods)) => {
                if let Some((method, hook)) = methods.take_services_hook(&env_name) {
                    match hook(&mut services) {
                        Ok(provider) => custom_provider = provider,
                        Err(source) => {
                            faulted = Some(StartupError::Invocation {
                                type_name: methods.type_name().to_owned(),
                                method,
                                source,
                            });
                        }
                    }
                }
                if faulted.is_none() {
                    match methods.take_configure_hook(&env_name) {
                        Ok(entry) => configure_hook = Some((methods.type_name().to_owned(), entry)),
                        Err(error) => faulted = Some(error),
                    }
                }
            }
        }

        // Provider construction and validation failures are never captured.
        let provider = match custom_provider {
            Some(provider) => provider,
            None => services.build(&provider_options)?,
        };

        let mut handler = None;
        if faulted.is_none() {
            if let Some((type_name, (method, hook))) = configure_hook.take() {
                let mut application = AppBuilder::new(provider.clone(), environment.clone());
                match hook(&mut application) {
                    Ok(()) => handler = Some(application.into_handler()),
                    Err(source) => {
                        faulted = Some(StartupError::Invocation {
                            type_name,
                            method,
                            source,
                        });
                    }
                }
            }
        }

        let strict_methods = self.settings.flag(keys::STRICT_STARTUP_METHODS, false);
        let detailed =
            self.settings.flag(keys::DETAILED_ERRORS, false) || environment.is_development();

        let handler = match faulted {
            Some(error) => {
                let fatal = !capture
                    || (strict_methods && matches!(error, StartupError::MethodNotFound { .. }));
                if fatal {
                    return Err(error.into());
                }
                tracing::error!(error = %error, "startup failed; serving the diagnostic page");
                app::diagnostic_handler(&error, detailed)
            }
            None => handler.unwrap_or_else(app::not_found_handler),
        };

        tracing::info!("Phase: host");
        let server = self
            .server
            .clone()
            .ok_or(HostError::ServerNotConfigured)?;
        let options = HostOptions {
            application_name: environment.application_name.clone(),
            environment: environment.environment.clone(),
            content_root: environment.content_root.clone(),
            startup_package: self.settings.get(keys::STARTUP_PACKAGE),
        };
        Ok(Host::new(provider, server, handler, options, lifetime))
    }

    fn resolve_environment(&self) -> Result<HostingEnvironment, HostError> {
        let environment = self
            .settings
            .get(keys::ENVIRONMENT)
            .unwrap_or_else(|| "production".to_owned());
        let base = std::env::current_dir().map_err(|source| HostError::ContentRoot { source })?;
        let content_root = match self.settings.get(keys::CONTENT_ROOT) {
            Some(path) => {
                let path = PathBuf::from(path);
                if path.is_absolute() {
                    path
                } else {
                    base.join(path)
                }
            }
            None => base,
        };
        let application_name = self
            .settings
            .get(keys::APPLICATION_NAME)
            .or_else(|| self.settings.get(keys::STARTUP_PACKAGE))
            .unwrap_or_else(|| "hostkit_app".to_owned());
        Ok(HostingEnvironment {
            environment,
            application_name,
            content_root,
        })
    }
}
