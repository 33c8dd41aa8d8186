//! Class resolution and class-name transformation

use crate::error::{MarshalError, MarshalResult};
use crate::marshal::{ObjectInput, ObjectOutput};
use crate::model::{Class, ClassLoader};
use crate::pair::Pair;
use std::fmt;
use std::sync::Arc;

/// Maps classes to wire names and wire names back to local classes
pub trait ClassResolver: Send + Sync {
    /// Name written for `class`
    fn outbound_name(&self, class: &Class) -> String {
        class.name()
    }

    /// Local name for a name read from the stream
    fn inbound_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Extra data written after a class name; read back by `resolve_class`
    fn annotate_class(&self, _output: &mut dyn ObjectOutput, _class: &Class) -> MarshalResult<()> {
        Ok(())
    }

    /// Find the local class for `name`, consuming any annotation
    ///
    /// `version` is the version id the stream announced, or 0 when the
    /// descriptor carries none.
    fn resolve_class(
        &self,
        input: &mut dyn ObjectInput,
        name: &str,
        version: i64,
    ) -> MarshalResult<Class>;
}

/// Resolver backed by a [`ClassLoader`]
#[derive(Debug, Clone)]
pub struct LoaderClassResolver {
    loader: ClassLoader,
}

impl LoaderClassResolver {
    /// Resolve against `loader` and its parents
    pub fn new(loader: ClassLoader) -> Self {
        Self { loader }
    }

    /// Backing loader
    pub fn loader(&self) -> &ClassLoader {
        &self.loader
    }
}

impl ClassResolver for LoaderClassResolver {
    fn resolve_class(
        &self,
        _input: &mut dyn ObjectInput,
        name: &str,
        _version: i64,
    ) -> MarshalResult<Class> {
        self.loader
            .load(name)
            .ok_or_else(|| MarshalError::ClassResolution {
                name: name.to_string(),
                cause: Some(format!("not found in {}", self.loader.name()).into()),
            })
    }
}

/// Symmetric textual rewrite of class names
pub trait ClassNameTransformer: Send + Sync {
    /// Local name to wire name
    fn transform_outbound(&self, name: &str) -> String;

    /// Wire name to local name
    fn transform_inbound(&self, name: &str) -> String;
}

/// Renames packages; each pair maps a local package to its wire package
///
/// The first pair whose package contains the name applies. Only whole
/// package segments match: `com.acme` covers `com.acme.Widget` and
/// `com.acme.util.Box` but not `com.acmeco.Thing`.
#[derive(Debug, Clone, Default)]
pub struct PackageRemapper {
    mappings: Vec<Pair<String, String>>,
}

impl PackageRemapper {
    /// Remapper with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule mapping local package `local` to wire package `wire`
    pub fn map(mut self, local: impl Into<String>, wire: impl Into<String>) -> Self {
        self.mappings.push(Pair::new(local.into(), wire.into()));
        self
    }

    /// The configured rules
    pub fn mappings(&self) -> &[Pair<String, String>] {
        &self.mappings
    }

    fn rewrite(name: &str, from: &str, to: &str) -> Option<String> {
        let rest = name.strip_prefix(from)?;
        rest.starts_with('.').then(|| format!("{to}{rest}"))
    }
}

impl ClassNameTransformer for PackageRemapper {
    fn transform_outbound(&self, name: &str) -> String {
        self.mappings
            .iter()
            .find_map(|pair| Self::rewrite(name, &pair.a, &pair.b))
            .unwrap_or_else(|| name.to_string())
    }

    fn transform_inbound(&self, name: &str) -> String {
        self.mappings
            .iter()
            .find_map(|pair| Self::rewrite(name, &pair.b, &pair.a))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Wraps a resolver with a name transformation applied in both directions
pub struct NameTransformingResolver {
    inner: Arc<dyn ClassResolver>,
    transformer: Arc<dyn ClassNameTransformer>,
}

impl NameTransformingResolver {
    /// Layer `transformer` around `inner`
    pub fn new(inner: Arc<dyn ClassResolver>, transformer: Arc<dyn ClassNameTransformer>) -> Self {
        Self { inner, transformer }
    }
}

impl ClassResolver for NameTransformingResolver {
    fn outbound_name(&self, class: &Class) -> String {
        self.transformer
            .transform_outbound(&self.inner.outbound_name(class))
    }

    fn inbound_name(&self, name: &str) -> String {
        self.inner
            .inbound_name(&self.transformer.transform_inbound(name))
    }

    fn annotate_class(&self, output: &mut dyn ObjectOutput, class: &Class) -> MarshalResult<()> {
        self.inner.annotate_class(output, class)
    }

    fn resolve_class(
        &self,
        input: &mut dyn ObjectInput,
        name: &str,
        version: i64,
    ) -> MarshalResult<Class> {
        self.inner.resolve_class(input, name, version)
    }
}

impl fmt::Debug for NameTransformingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameTransformingResolver").finish_non_exhaustive()
    }
}
