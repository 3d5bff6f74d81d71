//! This crate loads call wrapper bindings from the environment and the file
//! system.
//!
//! A bindings file declares the names of the exports the runtime needs and the
//! signature of each function to wrap:
//!
//! ```toml
//! [exports]
//! malloc = "alloc"
//!
//! [functions.sum]
//! params = ["array"]
//! heaps = ["HEAPF32"]
//! returns = "float32"
//! ```
//!
//! Every key can be overridden by an environment variable, for example
//! `CWRAP_FUNCTIONS__SUM__RETURNS=number`.

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, Environment, File};
use cwrap::host::{Exports, WasmRuntime};
use cwrap::{CallWrapper, Function, Runtime, Signature};
use serde::Deserialize;
use tracing::debug;

/// An error returned while loading or using [Bindings].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("cannot load the bindings")]
    Load(#[from] config::ConfigError),

    /// No signature is declared for the function.
    #[error("no binding declared for `{0}`")]
    UnknownFunction(String),

    /// The declared signature could not be turned into a function.
    #[error(transparent)]
    Wrapper(#[from] cwrap::CallError),
}

/// The bindings of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Bindings {
    /// The exports the runtime needs from the module.
    #[serde(default)]
    pub exports: Exports,

    /// The signature of each wrapped function, by name.
    #[serde(default)]
    pub functions: BTreeMap<String, Signature>,
}

impl Bindings {
    /// Returns the signature declared for a function.
    #[must_use]
    #[inline]
    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)
    }

    /// Wraps a declared function of the given runtime.
    ///
    /// # Errors
    ///
    /// An error is returned if no signature is declared for the function.
    #[inline]
    pub fn function<R: Runtime>(&self, runtime: R, name: &str) -> Result<Function<R>, ConfigError> {
        let signature = self
            .signature(name)
            .ok_or_else(|| ConfigError::UnknownFunction(name.to_owned()))?;
        Ok(CallWrapper::of(runtime, name).signature(signature).make()?)
    }

    /// Loads a module using the declared exports.
    ///
    /// # Errors
    ///
    /// See [`WasmRuntime::load_with`].
    #[inline]
    pub fn load_runtime<B: AsRef<[u8]>>(&self, bytes: B) -> anyhow::Result<WasmRuntime> {
        WasmRuntime::load_with(bytes, &self.exports)
    }
}

/// Loads the bindings from the given file, overridden by the `CWRAP_`
/// environment variables.
///
/// The format of the file is guessed from its extension. A missing file is
/// not an error.
///
/// # Errors
///
/// An error is returned if the file or the environment can't be deserialized
/// into [Bindings].
#[inline]
pub fn load_bindings<P: AsRef<Path>>(path: P) -> Result<Bindings, ConfigError> {
    build(path.as_ref(), environment())
}

/// Returns the environment source of the bindings.
fn environment() -> Environment {
    Environment::with_prefix("CWRAP")
        .prefix_separator("_")
        .separator("__")
}

/// Loads the bindings from a file and an environment source.
fn build(path: &Path, environment: Environment) -> Result<Bindings, ConfigError> {
    let bindings: Bindings = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(environment)
        .build()?
        .try_deserialize()?;
    debug!(
        path = %path.display(),
        functions = bindings.functions.len(),
        "loaded bindings"
    );
    Ok(bindings)
}
