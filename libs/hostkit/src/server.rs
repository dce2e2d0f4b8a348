//! Server capability contract.
//!
//! The hosting core never speaks a wire protocol. It hands a server
//! implementation the terminal request handler and a cancellation token, and
//! asks it to start or stop serving. Concrete servers (production listeners,
//! in-process test servers) live outside this crate.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Request shape crossing the server boundary.
pub type Request = http::Request<Bytes>;
/// Response shape crossing the server boundary.
pub type Response = http::Response<Bytes>;

/// Type-erased terminal request handler produced by the host assembler.
pub type RequestHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// A pluggable request server.
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Bind and begin dispatching requests into `handler`. The token is the
    /// caller's cancellation signal and must be honored, not swallowed.
    async fn start(&self, handler: RequestHandler, cancel: CancellationToken)
        -> anyhow::Result<()>;

    /// Stop accepting work and complete in-flight requests.
    async fn stop(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Capability collection exposed by this server.
    fn features(&self) -> &ServerFeatures;

    /// Release any held resources. Safe to call more than once.
    fn dispose(&self) {}
}

/// Type-keyed capability map.
///
/// Key = fully-qualified type name, value = `Arc<T>` boxed as
/// `Box<dyn Any + Send + Sync>`, downcast on read.
#[derive(Default)]
pub struct ServerFeatures {
    map: RwLock<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl ServerFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the feature of type `T`.
    pub fn set<T>(&self, feature: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.map
            .write()
            .insert(std::any::type_name::<T>(), Box::new(feature));
    }

    /// Fetch the feature of type `T`, if the server exposes one.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let map = self.map.read();
        let boxed = map.get(std::any::type_name::<T>())?;
        boxed.downcast_ref::<Arc<T>>().cloned()
    }
}

impl fmt::Debug for ServerFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.map.read();
        f.debug_set().entries(map.keys()).finish()
    }
}

/// Canonical feature: the addresses a server listens on.
#[derive(Default)]
pub struct ServerAddresses {
    addresses: RwLock<Vec<String>>,
}

impl ServerAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, address: impl Into<String>) {
        self.addresses.write().push(address.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.addresses.read().clone()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn features_roundtrip_by_type() {
        let features = ServerFeatures::new();
        let addresses = Arc::new(ServerAddresses::new());
        addresses.add("http://127.0.0.1:5000");
        features.set(addresses);

        let resolved = features.get::<ServerAddresses>().unwrap();
        assert_eq!(resolved.all(), vec!["http://127.0.0.1:5000"]);
        assert!(features.get::<String>().is_none());
    }
}
