//! Layered host settings.
//!
//! Two layers make up the effective settings of a builder:
//!
//! 1. A **configuration snapshot** baseline (`ConfigSnapshot`), fed by
//!    figment providers (in-memory values, YAML files, prefixed environment
//!    variables). `use_configuration` replaces this layer wholesale.
//! 2. **Code-based overrides** recorded by `use_setting`, kept separately and
//!    always re-applied on top of the current snapshot. A later `use_setting`
//!    for the same key overwrites the earlier one.
//!
//! Keys are case-insensitive; no validation is performed on key names.

use std::collections::BTreeMap;

use figment::providers::Serialized;
use figment::value::{Num, Value};
use figment::Figment;

/// Recognized setting keys. Values are free-form strings; boolean settings
/// accept `true`/`1` (case-insensitive).
pub mod keys {
    /// Environment name (`production` when unset).
    pub const ENVIRONMENT: &str = "environment";
    /// Logical application name.
    pub const APPLICATION_NAME: &str = "application_name";
    /// Package name the primary startup type is resolved from.
    pub const STARTUP_PACKAGE: &str = "startup_package";
    /// Content root path; relative paths resolve against the process
    /// working directory.
    pub const CONTENT_ROOT: &str = "content_root";
    /// Include the full error chain on the diagnostic page.
    pub const DETAILED_ERRORS: &str = "detailed_errors";
    /// Capture startup failures into a diagnostic page instead of failing
    /// `build` (on by default).
    pub const CAPTURE_STARTUP_ERRORS: &str = "capture_startup_errors";
    /// Semicolon- or comma-delimited list of hosting startup packages.
    pub const HOSTING_STARTUP_PACKAGES: &str = "hosting_startup_packages";
    /// Packages excluded from hosting startup loading.
    pub const HOSTING_STARTUP_EXCLUDE_PACKAGES: &str = "hosting_startup_exclude_packages";
    /// Make a missing `configure` method fatal even when capture is on.
    pub const STRICT_STARTUP_METHODS: &str = "strict_startup_methods";
}

/// Immutable configuration snapshot over a set of figment providers.
///
/// Later-merged sources override earlier ones, which is figment's own merge
/// contract. The hosting layer only needs string lookups; richer typed
/// extraction stays available through [`Configuration::figment`].
#[derive(Clone, Default)]
pub struct ConfigSnapshot {
    figment: Figment,
}

impl ConfigSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing figment as a snapshot.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// Merge flat in-memory key/value pairs.
    #[must_use]
    pub fn with_values<K, V, I>(self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into().to_ascii_lowercase(), v.into()))
            .collect();
        Self {
            figment: self.figment.merge(Serialized::defaults(map)),
        }
    }

    /// Merge a YAML file source.
    #[must_use]
    pub fn with_yaml_file(self, path: impl AsRef<std::path::Path>) -> Self {
        use figment::providers::Format;
        Self {
            figment: self.figment.merge(figment::providers::Yaml::file(path)),
        }
    }

    /// Merge environment variables with the given prefix (prefix stripped,
    /// names lowercased by figment).
    #[must_use]
    pub fn with_env_prefix(self, prefix: &str) -> Self {
        Self {
            figment: self.figment.merge(figment::providers::Env::prefixed(prefix)),
        }
    }

    /// Look up a value as a string. Scalar values (strings, booleans,
    /// numbers) are rendered; structured values are not settings and yield
    /// `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = self.figment.find_value(&key.to_ascii_lowercase()).ok()?;
        value_to_string(&value)
    }

    pub(crate) fn figment(&self) -> &Figment {
        &self.figment
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(_, s) => Some(s.clone()),
        Value::Char(_, c) => Some(c.to_string()),
        Value::Bool(_, b) => Some(b.to_string()),
        Value::Num(_, n) => Some(num_to_string(n)),
        _ => None,
    }
}

fn num_to_string(num: &Num) -> String {
    match num {
        Num::U8(v) => v.to_string(),
        Num::U16(v) => v.to_string(),
        Num::U32(v) => v.to_string(),
        Num::U64(v) => v.to_string(),
        Num::U128(v) => v.to_string(),
        Num::USize(v) => v.to_string(),
        Num::I8(v) => v.to_string(),
        Num::I16(v) => v.to_string(),
        Num::I32(v) => v.to_string(),
        Num::I64(v) => v.to_string(),
        Num::I128(v) => v.to_string(),
        Num::ISize(v) => v.to_string(),
        Num::F32(v) => v.to_string(),
        Num::F64(v) => v.to_string(),
    }
}

/// Mutable settings state owned by the builder.
#[derive(Default)]
pub(crate) struct SettingsStore {
    snapshot: ConfigSnapshot,
    // Insertion-ordered; at most one entry per (lowercased) key.
    overrides: Vec<(String, String)>,
}

impl SettingsStore {
    pub(crate) fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = key.to_ascii_lowercase();
        let value = value.into();
        if let Some(entry) = self.overrides.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.overrides.push((key, value));
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        let key = key.to_ascii_lowercase();
        self.overrides
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
            .or_else(|| self.snapshot.get(&key))
    }

    /// Replace the configuration baseline; recorded overrides stay on top.
    pub(crate) fn replace_snapshot(&mut self, snapshot: ConfigSnapshot) {
        self.snapshot = snapshot;
    }

    pub(crate) fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => {
                let v = v.trim().to_ascii_lowercase();
                v == "true" || v == "1"
            }
            None => default,
        }
    }

    /// Split a delimited list setting on `;` and `,`, dropping empty names.
    pub(crate) fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split([';', ','])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge the snapshot and the overrides into the immutable view handed
    /// to services and startups.
    pub(crate) fn to_configuration(&self) -> Configuration {
        let map: BTreeMap<String, String> = self.overrides.iter().cloned().collect();
        Configuration {
            figment: self.snapshot.figment().clone().merge(Serialized::defaults(map)),
        }
    }
}

/// Merged, read-only configuration exposed through the service provider.
///
/// Always present on a built host, even when nothing was configured.
#[derive(Clone, Default)]
pub struct Configuration {
    figment: Figment,
}

impl Configuration {
    /// String lookup over the merged settings and snapshot sources.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = self.figment.find_value(&key.to_ascii_lowercase()).ok()?;
        value_to_string(&value)
    }

    /// The underlying figment, for typed extraction by applications.
    pub fn figment(&self) -> &Figment {
        &self.figment
    }
}
