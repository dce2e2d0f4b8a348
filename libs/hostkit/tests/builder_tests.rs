#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Tests for the host assembler: settings layering, callback ordering,
//! single-use enforcement, logging configuration and framework singletons.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hostkit::{
    keys, ApplicationLifetime, ConfigSnapshot, Configuration, Disposable, HostBuilder, HostError,
    HostingEnvironment, Logger, LoggerFactory, ProviderOptions, RequestHandler, Server,
    ServerFeatures, TracingLoggerFactory,
};

struct NullServer {
    features: ServerFeatures,
}

impl NullServer {
    fn shared() -> Arc<Self> {
        Arc::new(Self {
            features: ServerFeatures::new(),
        })
    }
}

#[async_trait]
impl Server for NullServer {
    async fn start(
        &self,
        _handler: RequestHandler,
        _cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    fn features(&self) -> &ServerFeatures {
        &self.features
    }
}

struct NullLogger;
impl Logger for NullLogger {
    fn log(&self, _record: &hostkit::LogRecord<'_>) {}
}

struct TrackedFactory {
    disposed: AtomicBool,
}

impl TrackedFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            disposed: AtomicBool::new(false),
        })
    }
}

impl LoggerFactory for TrackedFactory {
    fn create_logger(&self, _name: &str) -> Arc<dyn Logger> {
        Arc::new(NullLogger)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Disposable for TrackedFactory {
    fn dispose(&self) -> anyhow::Result<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn configure_services_callbacks_run_in_call_order_exactly_once() {
    let observed = Arc::new(Mutex::new(Vec::new()));
    let mut builder = HostBuilder::new();
    builder.use_server(NullServer::shared());
    for i in 0..5usize {
        let observed = observed.clone();
        builder.configure_services(move |_ctx, _services| {
            observed.lock().unwrap().push(i);
        });
    }
    let _host = builder.build().unwrap();
    assert_eq!(*observed.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn code_setting_wins_over_configuration_snapshot() {
    let mut builder = HostBuilder::new();
    builder.use_setting("k", "A");
    builder.use_configuration(ConfigSnapshot::new().with_values([("k", "B"), ("extra", "x")]));
    builder.use_setting("k", "C");
    assert_eq!(builder.get_setting("k").as_deref(), Some("C"));
    assert_eq!(builder.get_setting("extra").as_deref(), Some("x"));
}

#[test]
fn build_twice_fails_with_the_single_instance_error() {
    let mut builder = HostBuilder::new();
    builder.use_server(NullServer::shared());
    let _host = builder.build().unwrap();
    assert!(matches!(builder.build(), Err(HostError::BuildReuse)));
}

#[test]
fn build_twice_fails_even_after_a_failed_first_build() {
    // No server configured: the first build fails, the second still reports
    // the single-use violation.
    let mut builder = HostBuilder::new();
    assert!(matches!(
        builder.build(),
        Err(HostError::ServerNotConfigured)
    ));
    assert!(matches!(builder.build(), Err(HostError::BuildReuse)));
}

#[test]
fn supplied_logger_factory_is_exposed_and_never_disposed() {
    let factory = TrackedFactory::new();
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .use_logger_factory(factory.clone());
    let mut host = builder.build().unwrap();

    let resolved = host.services().get::<dyn LoggerFactory>().unwrap();
    assert!(
        resolved.as_any().downcast_ref::<TrackedFactory>().is_some(),
        "the provider must expose the supplied factory instance"
    );

    host.dispose();
    assert!(!factory.disposed.load(Ordering::SeqCst));
}

#[test]
fn explicit_service_registration_overrides_the_framework_factory() {
    let factory = TrackedFactory::new();
    let replacement = TrackedFactory::new();
    let mut builder = HostBuilder::new();
    let registered = replacement.clone();
    builder
        .use_server(NullServer::shared())
        .use_logger_factory(factory)
        .configure_services(move |_ctx, services| {
            services.add_instance::<dyn LoggerFactory>(registered);
        });
    let host = builder.build().unwrap();

    let resolved = host.services().get::<dyn LoggerFactory>().unwrap();
    let resolved = resolved
        .as_any()
        .downcast_ref::<TrackedFactory>()
        .expect("replacement factory expected");
    assert!(std::ptr::eq(resolved, replacement.as_ref()));
}

#[test]
fn type_filtered_logging_callback_requires_a_matching_factory() {
    let matched = Arc::new(AtomicUsize::new(0));
    let mismatched = Arc::new(AtomicUsize::new(0));

    let mut builder = HostBuilder::new();
    let m = matched.clone();
    let n = mismatched.clone();
    builder
        .use_server(NullServer::shared())
        .use_logger_factory(TrackedFactory::new())
        .configure_logging_for::<TrackedFactory, _>(move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        })
        .configure_logging_for::<TracingLoggerFactory, _>(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });
    let _host = builder.build().unwrap();

    assert_eq!(matched.load(Ordering::SeqCst), 1);
    assert_eq!(mismatched.load(Ordering::SeqCst), 0);
}

#[test]
fn provider_validation_failure_is_a_build_error_even_with_capture_on() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .capture_startup_errors(true)
        .use_default_service_provider(|_ctx, options| {
            *options = ProviderOptions {
                validate_scopes: true,
                validate_on_build: true,
            };
        })
        .configure_services(|_ctx, services| {
            services.add_scoped::<String, _>(|_| Ok(Arc::new(String::new())));
            services.add_singleton::<usize, _>(|sp| {
                let _ = sp.get::<String>()?;
                Ok(Arc::new(0usize))
            });
        });
    assert!(matches!(builder.build(), Err(HostError::Provider(_))));
}

#[test]
fn framework_singletons_are_registered() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .use_environment("staging")
        .use_setting(keys::APPLICATION_NAME, "sample");
    let host = builder.build().unwrap();

    let env = host.services().get::<HostingEnvironment>().unwrap();
    assert_eq!(env.environment, "staging");
    assert_eq!(env.application_name, "sample");
    assert!(host.services().get::<ApplicationLifetime>().is_ok());
    assert!(host.services().get::<Configuration>().is_ok());
    assert!(host.services().get::<dyn LoggerFactory>().is_ok());
}

#[test]
fn content_root_defaults_to_cwd_and_resolves_relative_paths() {
    let cwd = std::env::current_dir().unwrap();

    let mut builder = HostBuilder::new();
    builder.use_server(NullServer::shared());
    let host = builder.build().unwrap();
    assert_eq!(host.options().content_root, cwd);

    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .use_content_root("wwwroot");
    let host = builder.build().unwrap();
    assert_eq!(host.options().content_root, cwd.join("wwwroot"));

    let absolute = tempfile::tempdir().unwrap();
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .use_content_root(absolute.path());
    let host = builder.build().unwrap();
    assert_eq!(host.options().content_root, absolute.path());
}

#[test]
fn environment_defaults_to_production() {
    let mut builder = HostBuilder::new();
    builder.use_server(NullServer::shared());
    let host = builder.build().unwrap();
    assert_eq!(host.options().environment, "production");
}

#[test]
fn builder_context_exposes_merged_configuration() {
    let seen = Arc::new(Mutex::new(None));
    let mut builder = HostBuilder::new();
    let s = seen.clone();
    builder
        .use_server(NullServer::shared())
        .use_configuration(ConfigSnapshot::new().with_values([("greeting", "hello")]))
        .configure_services(move |ctx, _services| {
            *s.lock().unwrap() = ctx.configuration.get("greeting");
        });
    let _host = builder.build().unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("hello"));
}
