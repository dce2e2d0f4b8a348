//! Type-keyed service registry and provider.
//!
//! Design goals:
//! - Builders and startups register descriptors by *interface type* (trait
//!   objects included) with a lifetime; consumers resolve by type without
//!   knowing the concrete implementation.
//! - Re-registering a type overwrites the previous descriptor; `try_add*`
//!   registers only when the type is absent, so framework defaults never
//!   shadow an explicit caller registration.
//! - Teardown is explicit: factory registrations made through
//!   `add_disposable` are owned by the provider and disposed with it;
//!   instance registrations (`add_instance`) are externally owned and never
//!   touched.
//!
//! Implementation details:
//! - Key = fully-qualified `type_name::<T>()`, which works for `T = dyn Trait`.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on
//!   read).
//! - Disposal is idempotent, reverse-creation-order, and best-effort: a
//!   failing entry is logged and the rest still run.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Stable type key — uses fully-qualified `type_name::<T>()`.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }

    fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service not found: {type_name}")]
    NotFound { type_name: &'static str },

    #[error("type mismatch for service {type_name}")]
    TypeMismatch { type_name: &'static str },

    #[error("scoped service {type_name} cannot be resolved from the root provider")]
    ScopedFromRoot { type_name: &'static str },

    #[error("service provider has been disposed")]
    Disposed,

    #[error("constructing service {type_name} failed: {source}")]
    Factory {
        type_name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Services that participate in provider teardown.
pub trait Disposable: Send + Sync + 'static {
    /// Release held resources. Called at most once per owning provider.
    fn dispose(&self) -> anyhow::Result<()>;
}

/// How long a resolved instance lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifetime {
    /// One instance per provider.
    Singleton,
    /// One instance per scope.
    Scoped,
    /// A fresh instance per resolution; never tracked for disposal.
    Transient,
}

type Boxed = Box<dyn Any + Send + Sync>;
type ServiceFactory = Arc<dyn Fn(&ServiceProvider) -> anyhow::Result<Boxed> + Send + Sync>;
type DisposeHook = Arc<dyn Fn(&Boxed) -> Option<Arc<dyn Disposable>> + Send + Sync>;

enum ServiceSource {
    /// Externally owned instance; resolved as-is, never disposed.
    Instance(Boxed),
    Factory {
        factory: ServiceFactory,
        dispose: Option<DisposeHook>,
    },
}

pub struct ServiceDescriptor {
    key: TypeKey,
    lifetime: Lifetime,
    source: ServiceSource,
}

/// Options applied when the final provider is constructed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProviderOptions {
    /// Reject scoped resolutions from the root provider.
    pub validate_scopes: bool,
    /// Run every singleton factory eagerly at `build`, surfacing factory and
    /// scope-validation failures as build-time errors.
    pub validate_on_build: bool,
}

/// Ordered accumulation of service descriptors.
#[derive(Default)]
pub struct ServiceCollection {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an externally owned singleton instance under type `T`.
    /// `T` can be a trait object like `dyn LoggerFactory`.
    pub fn add_instance<T>(&mut self, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.descriptors.push(ServiceDescriptor {
            key: TypeKey::of::<T>(),
            lifetime: Lifetime::Singleton,
            source: ServiceSource::Instance(Box::new(instance)),
        });
    }

    /// Register `instance` only when no descriptor for `T` exists yet.
    pub fn try_add_instance<T>(&mut self, instance: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !self.contains::<T>() {
            self.add_instance(instance);
        }
    }

    /// Register a provider-owned singleton built by `factory`.
    pub fn add_singleton<T, F>(&mut self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.push_factory::<T, F>(Lifetime::Singleton, factory, None);
    }

    /// Register `factory` as a singleton only when `T` is absent.
    pub fn try_add_singleton<T, F>(&mut self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        if !self.contains::<T>() {
            self.add_singleton::<T, F>(factory);
        }
    }

    /// Register a provider-owned singleton whose instance is disposed with
    /// the provider.
    pub fn add_disposable<T, F>(&mut self, factory: F)
    where
        T: Disposable,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let hook: DisposeHook = Arc::new(|boxed: &Boxed| {
            boxed
                .downcast_ref::<Arc<T>>()
                .map(|a| a.clone() as Arc<dyn Disposable>)
        });
        self.push_factory::<T, F>(Lifetime::Singleton, factory, Some(hook));
    }

    /// Register a per-scope service.
    pub fn add_scoped<T, F>(&mut self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.push_factory::<T, F>(Lifetime::Scoped, factory, None);
    }

    /// Register a per-resolution service.
    pub fn add_transient<T, F>(&mut self, factory: F)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        self.push_factory::<T, F>(Lifetime::Transient, factory, None);
    }

    fn push_factory<T, F>(&mut self, lifetime: Lifetime, factory: F, dispose: Option<DisposeHook>)
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        let factory: ServiceFactory =
            Arc::new(move |sp| factory(sp).map(|arc| Box::new(arc) as Boxed));
        self.descriptors.push(ServiceDescriptor {
            key: TypeKey::of::<T>(),
            lifetime,
            source: ServiceSource::Factory { factory, dispose },
        });
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        let key = TypeKey::of::<T>();
        self.descriptors.iter().any(|d| d.key == key)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Construct the provider. The last descriptor registered for a type
    /// wins. With `validate_on_build`, singleton factories run eagerly and
    /// their failures fail the build.
    pub fn build(self, options: &ProviderOptions) -> Result<ServiceProvider, ServiceError> {
        let descriptors: HashMap<TypeKey, ServiceDescriptor> = self
            .descriptors
            .into_iter()
            .map(|d| (d.key.clone(), d))
            .collect();
        let provider = ServiceProvider {
            shared: Arc::new(ProviderShared {
                descriptors,
                singletons: RwLock::new(HashMap::new()),
                owned: Mutex::new(Vec::new()),
                options: *options,
                disposed: AtomicBool::new(false),
            }),
            scope: None,
        };
        if options.validate_on_build {
            provider.validate()?;
        }
        Ok(provider)
    }
}

struct ProviderShared {
    descriptors: HashMap<TypeKey, ServiceDescriptor>,
    singletons: RwLock<HashMap<TypeKey, Boxed>>,
    owned: Mutex<Vec<Arc<dyn Disposable>>>,
    options: ProviderOptions,
    disposed: AtomicBool,
}

#[derive(Default)]
struct ScopeState {
    instances: RwLock<HashMap<TypeKey, Boxed>>,
    owned: Mutex<Vec<Arc<dyn Disposable>>>,
    disposed: AtomicBool,
}

/// Resolved dependency-injection container. Cloning shares the same
/// underlying registry and caches.
#[derive(Clone)]
pub struct ServiceProvider {
    shared: Arc<ProviderShared>,
    scope: Option<Arc<ScopeState>>,
}

impl ServiceProvider {
    /// Resolve a service by type.
    pub fn get<T>(&self) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(ServiceError::Disposed);
        }
        let key = TypeKey::of::<T>();
        let desc = self
            .shared
            .descriptors
            .get(&key)
            .ok_or(ServiceError::NotFound {
                type_name: key.name(),
            })?;

        let (factory, dispose) = match &desc.source {
            ServiceSource::Instance(boxed) => return downcast::<T>(&desc.key, boxed),
            ServiceSource::Factory { factory, dispose } => (factory, dispose.as_ref()),
        };

        match desc.lifetime {
            Lifetime::Singleton => self.resolve_cached::<T>(
                desc,
                factory,
                dispose,
                &self.shared.singletons,
                &self.shared.owned,
            ),
            Lifetime::Scoped => match &self.scope {
                Some(scope) => {
                    self.resolve_cached::<T>(desc, factory, dispose, &scope.instances, &scope.owned)
                }
                None if self.shared.options.validate_scopes => Err(ServiceError::ScopedFromRoot {
                    type_name: desc.key.name(),
                }),
                // Without validation the root acts as an implicit scope.
                None => self.resolve_cached::<T>(
                    desc,
                    factory,
                    dispose,
                    &self.shared.singletons,
                    &self.shared.owned,
                ),
            },
            Lifetime::Transient => {
                let boxed = self.run_factory(&desc.key, factory)?;
                downcast::<T>(&desc.key, &boxed)
            }
        }
    }

    /// Resolve a service, returning `None` when it is not registered.
    pub fn get_optional<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get::<T>().ok()
    }

    /// Open a new resolution scope. Scoped services cache per scope and are
    /// disposed with it.
    pub fn create_scope(&self) -> ServiceScope {
        ServiceScope {
            provider: ServiceProvider {
                shared: Arc::clone(&self.shared),
                scope: Some(Arc::new(ScopeState::default())),
            },
        }
    }

    /// Dispose every provider-owned service, in reverse creation order.
    /// Idempotent; failures are logged and the remaining services still run.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut owned = self.shared.owned.lock();
        for service in owned.drain(..).rev() {
            if let Err(error) = service.dispose() {
                tracing::warn!(error = %error, "service disposal failed; continuing");
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
            || self
                .scope
                .as_ref()
                .is_some_and(|s| s.disposed.load(Ordering::SeqCst))
    }

    fn resolve_cached<T>(
        &self,
        desc: &ServiceDescriptor,
        factory: &ServiceFactory,
        dispose: Option<&DisposeHook>,
        cache: &RwLock<HashMap<TypeKey, Boxed>>,
        owned: &Mutex<Vec<Arc<dyn Disposable>>>,
    ) -> Result<Arc<T>, ServiceError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if let Some(boxed) = cache.read().get(&desc.key) {
            return downcast::<T>(&desc.key, boxed);
        }
        // The factory may recurse into `get`; no lock is held across it.
        let boxed = self.run_factory(&desc.key, factory)?;
        let mut cache = cache.write();
        if let Some(existing) = cache.get(&desc.key) {
            return downcast::<T>(&desc.key, existing);
        }
        let resolved = downcast::<T>(&desc.key, &boxed)?;
        if let Some(hook) = dispose {
            if let Some(disposable) = hook(&boxed) {
                owned.lock().push(disposable);
            }
        }
        cache.insert(desc.key.clone(), boxed);
        Ok(resolved)
    }

    fn run_factory(&self, key: &TypeKey, factory: &ServiceFactory) -> Result<Boxed, ServiceError> {
        factory(self).map_err(|source| ServiceError::Factory {
            type_name: key.name(),
            source,
        })
    }

    /// Eagerly construct every singleton factory registration.
    fn validate(&self) -> Result<(), ServiceError> {
        for desc in self.shared.descriptors.values() {
            let ServiceSource::Factory { factory, dispose } = &desc.source else {
                continue;
            };
            if desc.lifetime != Lifetime::Singleton {
                continue;
            }
            if self.shared.singletons.read().contains_key(&desc.key) {
                continue;
            }
            let boxed = self.run_factory(&desc.key, factory)?;
            let mut cache = self.shared.singletons.write();
            if cache.contains_key(&desc.key) {
                continue;
            }
            if let Some(hook) = dispose {
                if let Some(disposable) = hook(&boxed) {
                    self.shared.owned.lock().push(disposable);
                }
            }
            cache.insert(desc.key.clone(), boxed);
        }
        Ok(())
    }
}

/// A resolution scope. Disposing the scope (or dropping it) disposes the
/// services it owns; the root provider is unaffected.
pub struct ServiceScope {
    provider: ServiceProvider,
}

impl ServiceScope {
    pub fn provider(&self) -> &ServiceProvider {
        &self.provider
    }

    pub fn dispose(&self) {
        let Some(scope) = &self.provider.scope else {
            return;
        };
        if scope.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut owned = scope.owned.lock();
        for service in owned.drain(..).rev() {
            if let Err(error) = service.dispose() {
                tracing::warn!(error = %error, "scoped service disposal failed; continuing");
            }
        }
    }
}

impl Drop for ServiceScope {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn downcast<T>(key: &TypeKey, boxed: &Boxed) -> Result<Arc<T>, ServiceError>
where
    T: ?Sized + Send + Sync + 'static,
{
    boxed
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or(ServiceError::TypeMismatch {
            type_name: key.name(),
        })
}
