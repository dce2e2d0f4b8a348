#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Tests for hosting-startup loading: builder mutations ahead of the primary
//! startup, exclusion lists, and the capture policy for load failures.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use hostkit::{
    keys, HostBuilder, HostError, HostingStartup, HostingStartupRegistration, RequestHandler,
    Response, Server, ServerFeatures, StartupContext, StartupMethods, StartupRegistration,
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

// A hosting-startup unit that points the builder at the primary startup
// before resolution happens.

struct WireUpUnit;

impl HostingStartup for WireUpUnit {
    fn configure(&self, builder: &mut HostBuilder) -> anyhow::Result<()> {
        builder.use_setting(keys::STARTUP_PACKAGE, "wired_app");
        Ok(())
    }
}

fn make_wire_up() -> Box<dyn HostingStartup> {
    Box::new(WireUpUnit)
}

inventory::submit! {
    HostingStartupRegistration {
        package: "wire_up",
        construct: make_wire_up,
    }
}

fn construct_wired_app(_ctx: &StartupContext) -> anyhow::Result<StartupMethods> {
    Ok(StartupMethods::new("Startup").configure(|app| {
        app.run(|_| async { Response::new(Bytes::from_static(b"wired")) });
        Ok(())
    }))
}

inventory::submit! {
    StartupRegistration {
        package: "wired_app",
        type_name: "Startup",
        construct: construct_wired_app,
    }
}

#[tokio::test]
async fn hosting_startup_setting_is_visible_to_startup_resolution() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .use_setting(keys::HOSTING_STARTUP_PACKAGES, "wire_up");
    let host = builder.build().unwrap();

    let handler = host.request_handler();
    let request = http::Request::builder()
        .uri("/")
        .body(Bytes::new())
        .unwrap();
    let response = handler(request).await;
    assert_eq!(response.body().as_ref(), b"wired");
    assert_eq!(host.options().application_name, "wired_app");
}

// A unit contributing service registrations.

pub struct Stamp;

struct StampUnit;

impl HostingStartup for StampUnit {
    fn configure(&self, builder: &mut HostBuilder) -> anyhow::Result<()> {
        builder.configure_services(|_ctx, services| {
            services.add_instance(Arc::new(Stamp));
        });
        Ok(())
    }
}

fn make_stamp() -> Box<dyn HostingStartup> {
    Box::new(StampUnit)
}

inventory::submit! {
    HostingStartupRegistration {
        package: "stamping",
        construct: make_stamp,
    }
}

#[test]
fn hosting_startup_service_registrations_reach_the_provider() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .use_setting(keys::HOSTING_STARTUP_PACKAGES, "stamping");
    let host = builder.build().unwrap();
    assert!(host.services().get::<Stamp>().is_ok());
}

// A unit that fails during configuration.

struct FaultyUnit;

impl HostingStartup for FaultyUnit {
    fn configure(&self, _builder: &mut HostBuilder) -> anyhow::Result<()> {
        anyhow::bail!("refusing to configure")
    }
}

fn make_faulty() -> Box<dyn HostingStartup> {
    Box::new(FaultyUnit)
}

inventory::submit! {
    HostingStartupRegistration {
        package: "faulty",
        construct: make_faulty,
    }
}

#[test]
fn unknown_package_with_capture_off_aggregates_the_root_cause() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .capture_startup_errors(false)
        .use_setting(keys::HOSTING_STARTUP_PACKAGES, "does_not_exist");
    let error = match builder.build() {
        Ok(_) => panic!("expected build to return an error"),
        Err(e) => e,
    };
    assert!(matches!(error, HostError::HostingStartup { .. }));
    let message = error.to_string();
    assert!(message.contains("does_not_exist"));
    assert!(message.contains("is not registered"));
}

#[test]
fn failing_unit_with_capture_off_aggregates_every_failure() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .capture_startup_errors(false)
        .use_setting(keys::HOSTING_STARTUP_PACKAGES, "faulty;does_not_exist");
    let error = match builder.build() {
        Ok(_) => panic!("expected build to return an error"),
        Err(e) => e,
    };
    let HostError::HostingStartup { errors } = error else {
        panic!("expected the aggregate hosting startup error");
    };
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].package, "faulty");
    assert_eq!(errors[1].package, "does_not_exist");
}

#[test]
#[traced_test]
fn unknown_package_with_capture_on_logs_and_builds() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .capture_startup_errors(true)
        .use_setting(keys::HOSTING_STARTUP_PACKAGES, "does_not_exist");
    let host = builder.build().unwrap();
    assert_eq!(host.options().environment, "production");
    assert!(logs_contain("hosting_startup_load_failure"));
    assert!(logs_contain("does_not_exist"));
}

#[test]
fn excluded_packages_are_skipped_entirely() {
    let mut builder = HostBuilder::new();
    builder
        .use_server(NullServer::shared())
        .capture_startup_errors(false)
        .use_setting(keys::HOSTING_STARTUP_PACKAGES, "faulty, ,")
        .use_setting(keys::HOSTING_STARTUP_EXCLUDE_PACKAGES, "Faulty");
    // The faulty unit never runs, empty names are dropped, and the build
    // succeeds despite capture being off.
    let _host = builder.build().unwrap();
}
