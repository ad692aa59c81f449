//! Error types for the enhancement orchestrator.
//!
//! This module defines the semantic error taxonomy used across discovery,
//! environment construction, enhancer binding, and invocation. Each variant
//! carries enough context (module, enhancer, API) for a human-readable
//! message without a stack trace.

use crate::api::PersistenceApi;
use crate::module_name::ModuleName;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur while discovering, binding, or running enhancement.
#[derive(Debug, Error)]
pub enum EnhanceError {
    /// A metadata file could not be parsed.
    #[error("metadata file {path} could not be parsed: {reason}")]
    MetadataParse {
        /// Path of the malformed metadata file.
        path: Utf8PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// A declared class has no corresponding compiled class file.
    #[error("no output file can be found for {class_name} in module {module}")]
    Resolution {
        /// Fully qualified name of the unresolved class.
        class_name: String,
        /// Module the class was declared in.
        module: ModuleName,
    },

    /// A dependency or output path could not be resolved while assembling the
    /// module's execution environment.
    #[error("execution environment for module {module} could not be built: {path}: {reason}")]
    EnvironmentBuild {
        /// Module whose environment failed.
        module: ModuleName,
        /// Path that could not be resolved.
        path: Utf8PathBuf,
        /// Description of the underlying failure.
        reason: String,
    },

    /// Neither the current nor the legacy enhancer contract could be bound.
    #[error(
        "neither current nor legacy {enhancer} enhancer contract could be bound for {api} in module {module}\n\ncurrent contract: {current}\n\nlegacy contract: {legacy}"
    )]
    Binding {
        /// Display name of the enhancer.
        enhancer: String,
        /// Persistence API the binding was attempted for.
        api: PersistenceApi,
        /// Module the binding was attempted in.
        module: ModuleName,
        /// Why the current contract rejected the binding.
        current: String,
        /// Why the legacy contract rejected the binding.
        legacy: String,
    },

    /// A bound enhancer failed while being invoked.
    #[error("{enhancer} enhancer failed in module {module}: {reason}")]
    Execution {
        /// Display name of the enhancer.
        enhancer: String,
        /// Module the enhancer was running in.
        module: ModuleName,
        /// Description of the failure.
        reason: String,
    },

    /// The pass configuration is unusable.
    #[error("invalid configuration: {reason}")]
    Configuration {
        /// Description of the configuration problem.
        reason: String,
    },

    /// No enhancer support is registered under the requested id.
    #[error("no enhancer support registered for id '{id}'")]
    UnknownEnhancer {
        /// The requested enhancer id.
        id: String,
    },

    /// The project file could not be read or parsed.
    #[error("invalid project file {path}: {reason}")]
    InvalidProjectFile {
        /// Path to the project file.
        path: Utf8PathBuf,
        /// Description of the parse error.
        reason: String,
    },

    /// The incremental state file could not be written.
    #[error("failed to persist incremental state to {path}: {reason}")]
    StateFile {
        /// Path to the state file.
        path: Utf8PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to write output.
    #[error("failed to write output")]
    WriteFailed {
        /// The underlying error that caused the write to fail.
        #[source]
        source: std::io::Error,
    },
}

impl EnhanceError {
    /// Returns `true` when the error only invalidates the module it occurred
    /// in, leaving the rest of the pass untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_enhancer::error::EnhanceError;
    /// use bytecode_enhancer::module_name::ModuleName;
    ///
    /// let local = EnhanceError::Resolution {
    ///     class_name: "com.x.C".to_owned(),
    ///     module: ModuleName::from("core"),
    /// };
    /// assert!(local.is_module_local());
    ///
    /// let fatal = EnhanceError::Configuration { reason: "no deps".to_owned() };
    /// assert!(!fatal.is_module_local());
    /// ```
    #[must_use]
    pub fn is_module_local(&self) -> bool {
        matches!(
            self,
            Self::MetadataParse { .. }
                | Self::Resolution { .. }
                | Self::EnvironmentBuild { .. }
                | Self::Binding { .. }
                | Self::Execution { .. }
        )
    }
}

/// Result type alias using [`EnhanceError`].
pub type Result<T> = std::result::Result<T, EnhanceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn resolution_error_names_class_and_module() {
        let err = EnhanceError::Resolution {
            class_name: "com.x.C".to_owned(),
            module: ModuleName::from("M"),
        };
        let msg = err.to_string();
        assert!(msg.contains("com.x.C"));
        assert!(msg.contains("module M"));
    }

    #[test]
    fn binding_error_keeps_both_causes() {
        let err = EnhanceError::Binding {
            enhancer: "DataNucleus".to_owned(),
            api: PersistenceApi::Jpa,
            module: ModuleName::from("core"),
            current: "entry point missing".to_owned(),
            legacy: "contract not provided".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("entry point missing"));
        assert!(msg.contains("contract not provided"));
        assert!(msg.contains("JPA"));
    }

    #[rstest]
    #[case::execution(EnhanceError::Execution {
        enhancer: "DataNucleus".to_owned(),
        module: ModuleName::from("core"),
        reason: "exit status 1".to_owned(),
    }, true)]
    #[case::environment(EnhanceError::EnvironmentBuild {
        module: ModuleName::from("core"),
        path: Utf8PathBuf::from("/missing.jar"),
        reason: "not found".to_owned(),
    }, true)]
    #[case::configuration(EnhanceError::Configuration { reason: "x".to_owned() }, false)]
    #[case::io(EnhanceError::Io(std::io::Error::other("disk")), false)]
    fn module_local_classification(#[case] err: EnhanceError, #[case] expected: bool) {
        assert_eq!(err.is_module_local(), expected);
    }

    #[test]
    fn write_failed_preserves_source() {
        let err = EnhanceError::WriteFailed {
            source: std::io::Error::other("broken pipe"),
        };
        assert!(err.to_string().contains("write"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
