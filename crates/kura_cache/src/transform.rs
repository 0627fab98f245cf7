//! The transformer capability consumed by the cache.

use std::path::PathBuf;

use crate::config::TransformConfig;
use crate::entry::TransformedOutput;

/// Name and version of a transformer, used for the default cache identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformerIdentity {
    /// Transformer name.
    pub name: String,
    /// Transformer version.
    pub version: String,
}

impl TransformerIdentity {
    /// Creates a new identity.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Result of one successful transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    /// The transformed output.
    pub output: TransformedOutput,

    /// Files beyond the source that the transform consulted.
    pub dependencies: Vec<PathBuf>,
}

impl TransformOutput {
    /// Creates an output with no external dependencies.
    pub fn new(output: TransformedOutput) -> Self {
        Self {
            output,
            dependencies: Vec::new(),
        }
    }

    /// Adds external dependencies.
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = PathBuf>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }
}

/// A source-to-source transform.
///
/// Implementations must be deterministic for a given source, configuration
/// and set of external dependency contents.
pub trait Transformer {
    /// Error reported for a genuine transform failure.
    ///
    /// The cache passes it to the caller untouched.
    type Error;

    /// Identity used for the default cache identifier.
    fn identity(&self) -> TransformerIdentity;

    /// Transforms `source` under `config`.
    fn transform(&self, source: &str, config: &TransformConfig)
    -> Result<TransformOutput, Self::Error>;
}

/// Adapts a closure into a [`Transformer`].
pub struct FnTransformer<F> {
    identity: TransformerIdentity,
    func: F,
}

impl<F, E> FnTransformer<F>
where
    F: Fn(&str, &TransformConfig) -> Result<TransformOutput, E>,
{
    /// Wraps `func` under the given identity.
    pub fn new(identity: TransformerIdentity, func: F) -> Self {
        Self { identity, func }
    }
}

impl<F, E> Transformer for FnTransformer<F>
where
    F: Fn(&str, &TransformConfig) -> Result<TransformOutput, E>,
{
    type Error = E;

    fn identity(&self) -> TransformerIdentity {
        self.identity.clone()
    }

    fn transform(&self, source: &str, config: &TransformConfig) -> Result<TransformOutput, E> {
        (self.func)(source, config)
    }
}

impl<T: Transformer + ?Sized> Transformer for &T {
    type Error = T::Error;

    fn identity(&self) -> TransformerIdentity {
        (**self).identity()
    }

    fn transform(
        &self,
        source: &str,
        config: &TransformConfig,
    ) -> Result<TransformOutput, Self::Error> {
        (**self).transform(source, config)
    }
}
