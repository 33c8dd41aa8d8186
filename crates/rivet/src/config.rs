//! Session configuration and factory-wide defaults

use crate::checker::{default_checker, SerializabilityChecker};
use crate::diagnostics::ExceptionListener;
use crate::error::{MarshalError, MarshalResult};
use crate::externalizer::ClassExternalizerFactory;
use crate::metadata::ClassInfoRegistry;
use crate::protocol::{DEFAULT_VERSION, MAX_VERSION};
use crate::tables::{ClassResolver, ClassTable, ObjectResolver, ObjectTable};
use rivet_filter::{UndecidedPolicy, UnmarshallingFilter};
use rivet_io::{StreamHeader, DEFAULT_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// An admission filter together with the verdict for `Undecided`
#[derive(Clone)]
pub struct FilterSetting {
    /// The filter
    pub filter: Arc<dyn UnmarshallingFilter>,
    /// What an undecided verdict means
    pub policy: UndecidedPolicy,
}

impl FilterSetting {
    /// Pair `filter` with `policy`
    pub fn new(filter: Arc<dyn UnmarshallingFilter>, policy: UndecidedPolicy) -> Self {
        Self { filter, policy }
    }
}

/// Per-session configuration
///
/// Unset sizes and a negative version fall back to the factory's
/// [`ConfigDefaults`].
#[derive(Clone)]
pub struct MarshallingConfiguration {
    /// Well-known classes written as a short tag
    pub class_table: Option<Arc<dyn ClassTable>>,
    /// Well-known objects written as a short tag
    pub object_table: Option<Arc<dyn ObjectTable>>,
    /// Class naming and lookup; required to read named classes
    pub class_resolver: Option<Arc<dyn ClassResolver>>,
    /// Substitution applied after the tables are consulted
    pub object_resolver: Option<Arc<dyn ObjectResolver>>,
    /// Substitution applied before the instance cache is consulted
    pub object_pre_resolver: Option<Arc<dyn ObjectResolver>>,
    /// Externalizer selection
    pub externalizer_factory: Option<Arc<dyn ClassExternalizerFactory>>,
    /// Admission of classes to the default path
    pub serializability_checker: Option<Arc<dyn SerializabilityChecker>>,
    /// Preamble written and verified before the version byte
    pub stream_header: Option<Arc<dyn StreamHeader>>,
    /// Diagnostic sink
    pub exception_listener: Option<Arc<dyn ExceptionListener>>,
    /// Admission filter for unmarshalling
    pub filter: Option<FilterSetting>,
    /// Codec buffer size in bytes
    pub buffer_size: Option<usize>,
    /// Expected number of instances, used to presize the instance cache
    pub instance_count: Option<usize>,
    /// Expected number of classes, used to presize the class cache
    pub class_count: Option<usize>,
    /// Protocol version; negative means the factory default
    pub version: i32,
}

impl Default for MarshallingConfiguration {
    fn default() -> Self {
        Self {
            class_table: None,
            object_table: None,
            class_resolver: None,
            object_resolver: None,
            object_pre_resolver: None,
            externalizer_factory: None,
            serializability_checker: None,
            stream_header: None,
            exception_listener: None,
            filter: None,
            buffer_size: None,
            instance_count: None,
            class_count: None,
            version: -1,
        }
    }
}

impl MarshallingConfiguration {
    /// Configuration with every setting at its default
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the class resolver
    pub fn with_class_resolver(mut self, resolver: Arc<dyn ClassResolver>) -> Self {
        self.class_resolver = Some(resolver);
        self
    }

    /// Install an admission filter
    pub fn with_filter(mut self, filter: Arc<dyn UnmarshallingFilter>, policy: UndecidedPolicy) -> Self {
        self.filter = Some(FilterSetting::new(filter, policy));
        self
    }

    /// Set the stream header
    pub fn with_stream_header(mut self, header: Arc<dyn StreamHeader>) -> Self {
        self.stream_header = Some(header);
        self
    }
}

impl std::fmt::Debug for MarshallingConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarshallingConfiguration")
            .field("class_table", &self.class_table.is_some())
            .field("object_table", &self.object_table.is_some())
            .field("class_resolver", &self.class_resolver.is_some())
            .field("object_resolver", &self.object_resolver.is_some())
            .field("object_pre_resolver", &self.object_pre_resolver.is_some())
            .field("externalizer_factory", &self.externalizer_factory.is_some())
            .field("stream_header", &self.stream_header.is_some())
            .field("filter", &self.filter.as_ref().map(|f| f.policy))
            .field("buffer_size", &self.buffer_size)
            .field("instance_count", &self.instance_count)
            .field("class_count", &self.class_count)
            .field("version", &self.version)
            .finish()
    }
}

/// Factory-wide defaults, loadable from TOML or JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDefaults {
    /// Codec buffer size in bytes
    pub buffer_size: usize,
    /// Instance cache size hint
    pub instance_count: usize,
    /// Class cache size hint
    pub class_count: usize,
    /// Protocol version
    pub version: i32,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            instance_count: 256,
            class_count: 64,
            version: DEFAULT_VERSION as i32,
        }
    }
}

impl ConfigDefaults {
    /// Parse TOML
    pub fn from_toml_str(content: &str) -> MarshalResult<Self> {
        let defaults: ConfigDefaults = toml::from_str(content)
            .map_err(|e| MarshalError::InvalidConfiguration(e.to_string()))?;
        defaults.validate()?;
        Ok(defaults)
    }

    /// Parse JSON
    pub fn from_json_str(content: &str) -> MarshalResult<Self> {
        let defaults: ConfigDefaults = serde_json::from_str(content)
            .map_err(|e| MarshalError::InvalidConfiguration(e.to_string()))?;
        defaults.validate()?;
        Ok(defaults)
    }

    /// Load from a file; `.json` files are JSON, anything else TOML
    pub fn from_file(path: &Path) -> MarshalResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// Reject values no session could use
    pub fn validate(&self) -> MarshalResult<()> {
        if self.buffer_size == 0 {
            return Err(MarshalError::InvalidConfiguration(
                "buffer_size must be positive".to_string(),
            ));
        }
        check_version(self.version)?;
        Ok(())
    }
}

fn check_version(version: i32) -> MarshalResult<u8> {
    if version < 1 || version > MAX_VERSION as i32 {
        return Err(MarshalError::InvalidConfiguration(format!(
            "unsupported protocol version {version} (supported: 1..={MAX_VERSION})"
        )));
    }
    Ok(version as u8)
}

/// A configuration with every default applied
#[derive(Clone)]
pub(crate) struct Settings {
    pub(crate) class_table: Option<Arc<dyn ClassTable>>,
    pub(crate) object_table: Option<Arc<dyn ObjectTable>>,
    pub(crate) class_resolver: Option<Arc<dyn ClassResolver>>,
    pub(crate) object_resolver: Option<Arc<dyn ObjectResolver>>,
    pub(crate) object_pre_resolver: Option<Arc<dyn ObjectResolver>>,
    pub(crate) externalizer_factory: Option<Arc<dyn ClassExternalizerFactory>>,
    pub(crate) checker: Arc<dyn SerializabilityChecker>,
    pub(crate) stream_header: Option<Arc<dyn StreamHeader>>,
    pub(crate) exception_listener: Option<Arc<dyn ExceptionListener>>,
    pub(crate) filter: Option<FilterSetting>,
    pub(crate) buffer_size: usize,
    pub(crate) instance_count: usize,
    pub(crate) class_count: usize,
    pub(crate) version: u8,
    pub(crate) registry: Arc<ClassInfoRegistry>,
}

impl Settings {
    pub(crate) fn resolve(
        config: &MarshallingConfiguration,
        defaults: &ConfigDefaults,
        registry: &Arc<ClassInfoRegistry>,
    ) -> MarshalResult<Self> {
        let version = if config.version < 0 {
            defaults.version
        } else {
            config.version
        };
        let version = check_version(version)?;
        let buffer_size = config.buffer_size.unwrap_or(defaults.buffer_size);
        if buffer_size == 0 {
            return Err(MarshalError::InvalidConfiguration(
                "buffer_size must be positive".to_string(),
            ));
        }
        Ok(Self {
            class_table: config.class_table.clone(),
            object_table: config.object_table.clone(),
            class_resolver: config.class_resolver.clone(),
            object_resolver: config.object_resolver.clone(),
            object_pre_resolver: config.object_pre_resolver.clone(),
            externalizer_factory: config.externalizer_factory.clone(),
            checker: config
                .serializability_checker
                .clone()
                .unwrap_or_else(default_checker),
            stream_header: config.stream_header.clone(),
            exception_listener: config.exception_listener.clone(),
            filter: config.filter.clone(),
            buffer_size,
            instance_count: config.instance_count.unwrap_or(defaults.instance_count),
            class_count: config.class_count.unwrap_or(defaults.class_count),
            version,
            registry: registry.clone(),
        })
    }
}
