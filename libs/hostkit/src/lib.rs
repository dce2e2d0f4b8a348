#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! # hostkit — web-host composition and lifecycle
//!
//! A builder assembles configuration, logging, dependency-injection services
//! and a pluggable server into a running host:
//!
//! - [`HostBuilder`] records declarative configuration and converts it
//!   exactly once into an immutable [`Host`].
//! - Startups are named hook tables resolved at build time, with a fallback
//!   policy: a broken startup can still produce a running host that serves a
//!   diagnostic page instead of failing `build`.
//! - [`Host`] drives the lifecycle: start (bind the server), stop, dispose.
//!
//! ```ignore
//! let mut builder = HostBuilder::new();
//! builder
//!     .use_environment("development")
//!     .use_server(server)
//!     .configure_services(|_ctx, services| {
//!         services.add_instance(Arc::new(Greeter::default()));
//!     })
//!     .configure_app(|app| {
//!         app.run(|_request| async { Response::new(Bytes::from_static(b"hi")) });
//!         Ok(())
//!     });
//! let mut host = builder.build()?;
//! host.start(CancellationToken::new()).await?;
//! ```

pub mod app;
pub mod builder;
pub mod environment;
pub mod error;
pub mod host;
pub mod hosting_startup;
pub mod logging;
pub mod server;
pub mod services;
pub mod settings;
pub mod startup;

pub use app::AppBuilder;
pub use builder::{BuilderContext, HostBuilder};
pub use environment::{ApplicationLifetime, HostingEnvironment};
pub use error::HostError;
pub use host::{Host, HostOptions, HostState};
pub use hosting_startup::{
    HostingStartup, HostingStartupFailure, HostingStartupRegistration,
    HOSTING_STARTUP_LOAD_FAILURE,
};
pub use logging::{LogLevel, LogRecord, Logger, LoggerFactory, TracingLoggerFactory};
pub use server::{Request, RequestHandler, Response, Server, ServerAddresses, ServerFeatures};
pub use services::{
    Disposable, Lifetime, ProviderOptions, ServiceCollection, ServiceError, ServiceProvider,
    ServiceScope,
};
pub use settings::{keys, ConfigSnapshot, Configuration};
pub use startup::{StartupContext, StartupError, StartupMethods, StartupRegistration};
