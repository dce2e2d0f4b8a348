//! Application pipeline surface and the diagnostic fallback page.
//!
//! `AppBuilder` is what a startup's `configure` hook receives: it exposes the
//! resolved service provider and hosting environment and accepts the terminal
//! request handler. Middleware composition is out of scope for the hosting
//! core; a server only needs one entry point.

use std::error::Error as _;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};

use crate::environment::HostingEnvironment;
use crate::server::{Request, RequestHandler, Response};
use crate::services::ServiceProvider;
use crate::startup::StartupError;

/// Surface handed to the startup's `configure` hook.
pub struct AppBuilder {
    services: ServiceProvider,
    environment: HostingEnvironment,
    handler: Option<RequestHandler>,
}

impl AppBuilder {
    pub(crate) fn new(services: ServiceProvider, environment: HostingEnvironment) -> Self {
        Self {
            services,
            environment,
            handler: None,
        }
    }

    pub fn services(&self) -> &ServiceProvider {
        &self.services
    }

    pub fn environment(&self) -> &HostingEnvironment {
        &self.environment
    }

    /// Install the terminal request handler. A later call replaces an
    /// earlier one.
    pub fn run<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |request| Box::pin(handler(request))));
    }

    pub(crate) fn into_handler(self) -> RequestHandler {
        self.handler.unwrap_or_else(not_found_handler)
    }
}

/// Default handler when no application pipeline was configured.
pub(crate) fn not_found_handler() -> RequestHandler {
    Arc::new(|_request| {
        Box::pin(async {
            let mut response = Response::new(Bytes::new());
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        })
    })
}

/// Handler substituted for a faulted startup: every request receives an HTML
/// page embedding the captured error text.
pub(crate) fn diagnostic_handler(error: &StartupError, detailed: bool) -> RequestHandler {
    let body = Arc::new(diagnostic_page(error, detailed));
    Arc::new(move |_request| {
        let body = Bytes::from(body.as_bytes().to_vec());
        Box::pin(async move {
            let mut response = Response::new(body);
            *response.status_mut() = StatusCode::OK;
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        })
    })
}

fn diagnostic_page(error: &StartupError, detailed: bool) -> String {
    let mut body = String::new();
    body.push_str("<!DOCTYPE html>\n<html>\n<head><title>Application startup failed</title></head>\n<body>\n");
    body.push_str("<h1>An error occurred while starting the application.</h1>\n");
    body.push_str(&format!("<p>{}</p>\n", escape_html(&error.to_string())));

    // The immediate cause is always shown; the full chain only with
    // detailed errors enabled.
    let mut source = error.source();
    let mut depth = 0;
    while let Some(cause) = source {
        body.push_str(&format!("<p>{}</p>\n", escape_html(&cause.to_string())));
        depth += 1;
        if !detailed && depth >= 1 {
            break;
        }
        source = cause.source();
    }

    body.push_str("</body>\n</html>\n");
    body
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
