//! Bootstrap logging contracts.
//!
//! The hosting layer needs a logger before the service provider exists:
//! startup constructors may ask for one, and every logging-configuration
//! callback must run against the same factory instance the provider later
//! exposes. The contract is intentionally narrow — create a logger, accept a
//! record — with the default implementation bridging records into `tracing`.

use std::any::{Any, TypeId};
use std::sync::Arc;

/// Severity of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A single log record handed to a [`Logger`].
pub struct LogRecord<'a> {
    pub level: LogLevel,
    pub message: &'a str,
}

pub trait Logger: Send + Sync {
    fn log(&self, record: &LogRecord<'_>);
}

/// Creates loggers for named components.
///
/// `as_any` exists so type-filtered logging callbacks can address a concrete
/// factory implementation.
pub trait LoggerFactory: Send + Sync + 'static {
    fn create_logger(&self, name: &str) -> Arc<dyn Logger>;
    fn as_any(&self) -> &dyn Any;
}

/// Default factory: records become `tracing` events carrying the logger name
/// as a structured field.
#[derive(Default)]
pub struct TracingLoggerFactory;

impl LoggerFactory for TracingLoggerFactory {
    fn create_logger(&self, name: &str) -> Arc<dyn Logger> {
        Arc::new(TracingLogger {
            name: name.to_owned(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TracingLogger {
    name: String,
}

impl Logger for TracingLogger {
    fn log(&self, record: &LogRecord<'_>) {
        match record.level {
            LogLevel::Trace => tracing::trace!(logger = %self.name, "{}", record.message),
            LogLevel::Debug => tracing::debug!(logger = %self.name, "{}", record.message),
            LogLevel::Info => tracing::info!(logger = %self.name, "{}", record.message),
            LogLevel::Warn => tracing::warn!(logger = %self.name, "{}", record.message),
            LogLevel::Error => tracing::error!(logger = %self.name, "{}", record.message),
        }
    }
}

pub(crate) type LoggingCallback = Box<dyn FnOnce(&Arc<dyn LoggerFactory>) + Send>;

pub(crate) struct LoggingEntry {
    /// Required concrete factory type; `None` runs unconditionally.
    filter: Option<(TypeId, &'static str)>,
    callback: LoggingCallback,
}

pub(crate) enum FactorySource {
    Default,
    Instance(Arc<dyn LoggerFactory>),
    Deferred(Box<dyn FnOnce() -> Arc<dyn LoggerFactory> + Send>),
}

/// Accumulates logging configuration until the factory exists at build time.
pub(crate) struct LoggingConfigurator {
    source: FactorySource,
    entries: Vec<LoggingEntry>,
}

impl Default for LoggingConfigurator {
    fn default() -> Self {
        Self {
            source: FactorySource::Default,
            entries: Vec::new(),
        }
    }
}

impl LoggingConfigurator {
    pub(crate) fn set_source(&mut self, source: FactorySource) {
        self.source = source;
    }

    pub(crate) fn push(&mut self, callback: LoggingCallback) {
        self.entries.push(LoggingEntry {
            filter: None,
            callback,
        });
    }

    pub(crate) fn push_filtered<F: LoggerFactory>(
        &mut self,
        callback: impl FnOnce(&F) + Send + 'static,
    ) {
        self.entries.push(LoggingEntry {
            filter: Some((TypeId::of::<F>(), std::any::type_name::<F>())),
            callback: Box::new(move |factory| {
                if let Some(concrete) = factory.as_any().downcast_ref::<F>() {
                    callback(concrete);
                }
            }),
        });
    }

    /// Obtain the factory, consuming any deferred constructor.
    pub(crate) fn resolve_factory(&mut self) -> Arc<dyn LoggerFactory> {
        match std::mem::replace(&mut self.source, FactorySource::Default) {
            FactorySource::Default => Arc::new(TracingLoggerFactory),
            FactorySource::Instance(factory) => factory,
            FactorySource::Deferred(build) => build(),
        }
    }

    /// Run every recorded callback once, in insertion order. Type-filtered
    /// callbacks run only when the concrete factory type matches.
    pub(crate) fn run(&mut self, factory: &Arc<dyn LoggerFactory>) {
        for entry in self.entries.drain(..) {
            if let Some((type_id, type_name)) = entry.filter {
                if factory.as_any().type_id() != type_id {
                    tracing::debug!(
                        required = type_name,
                        "skipping type-filtered logging callback"
                    );
                    continue;
                }
            }
            (entry.callback)(factory);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct OtherFactory {
        touched: AtomicBool,
    }

    impl LoggerFactory for OtherFactory {
        fn create_logger(&self, _name: &str) -> Arc<dyn Logger> {
            Arc::new(NullLogger)
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct NullLogger;
    impl Logger for NullLogger {
        fn log(&self, _record: &LogRecord<'_>) {}
    }

    #[test]
    fn callbacks_run_in_order_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut configurator = LoggingConfigurator::default();
        for expected in 0..3usize {
            let calls = calls.clone();
            configurator.push(Box::new(move |_| {
                assert_eq!(calls.fetch_add(1, Ordering::SeqCst), expected);
            }));
        }
        let factory = configurator.resolve_factory();
        configurator.run(&factory);
        configurator.run(&factory);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn type_filtered_callback_requires_matching_factory() {
        let mut configurator = LoggingConfigurator::default();
        configurator.set_source(FactorySource::Instance(Arc::new(OtherFactory {
            touched: AtomicBool::new(false),
        })));
        configurator.push_filtered::<OtherFactory>(|f| {
            f.touched.store(true, Ordering::SeqCst);
        });
        let ran_for_wrong_type = Arc::new(AtomicBool::new(false));
        let flag = ran_for_wrong_type.clone();
        configurator.push_filtered::<TracingLoggerFactory>(move |_| {
            flag.store(true, Ordering::SeqCst);
        });

        let factory = configurator.resolve_factory();
        configurator.run(&factory);

        let concrete = factory
            .as_any()
            .downcast_ref::<OtherFactory>()
            .expect("factory instance preserved");
        assert!(concrete.touched.load(Ordering::SeqCst));
        assert!(!ran_for_wrong_type.load(Ordering::SeqCst));
    }

    #[test]
    fn deferred_source_builds_once_at_resolution() {
        let mut configurator = LoggingConfigurator::default();
        configurator.set_source(FactorySource::Deferred(Box::new(|| {
            Arc::new(TracingLoggerFactory)
        })));
        let factory = configurator.resolve_factory();
        assert!(factory.as_any().downcast_ref::<TracingLoggerFactory>().is_some());
    }
}
