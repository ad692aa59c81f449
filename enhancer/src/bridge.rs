//! Version-tolerant binding to an enhancer entry point.
//!
//! Binding tries each strategy in [`BINDING_STRATEGIES`] in order against a
//! module's [`ExecutionEnvironment`]. The first strategy that succeeds
//! yields an [`EnhancerHandle`]; when every strategy fails, the failures are
//! kept side by side in [`EnhanceError::Binding`].

use crate::api::PersistenceApi;
use crate::discovery::ResolvedClass;
use crate::environment::ExecutionEnvironment;
use crate::error::{EnhanceError, Result};
use crate::host::CompileContext;
use crate::module_name::ModuleName;
use crate::support::{EnhancerSupport, VersionTier};
use camino::Utf8PathBuf;
use log::debug;
use thiserror::Error;

/// The stable contract the orchestrator drives once an enhancer is bound.
///
/// Registration calls only buffer; nothing is rewritten until
/// [`EnhancerHandle::run`].
pub trait EnhancerHandle {
    /// Registers classes for enhancement.
    fn add_classes(&mut self, classes: &[ResolvedClass]);

    /// Registers metadata files describing classes to enhance.
    fn add_metadata_sources(&mut self, paths: &[Utf8PathBuf]);

    /// Enhances everything registered since binding and returns the number
    /// of classes actually rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`EnhanceError::Execution`] if the enhancer fails while
    /// running.
    fn run(&mut self) -> Result<usize>;
}

/// Why a single binding strategy rejected an enhancer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindFailure {
    /// The enhancer support does not implement this contract.
    #[error("contract not provided by this enhancer support")]
    ContractNotProvided,

    /// The entry point class is not on the environment's classpath.
    #[error("entry point class {class_name} not found on the classpath")]
    EntryPointMissing {
        /// Qualified name of the missing class.
        class_name: String,
    },

    /// The entry point class exists but offers no known constructor shape.
    #[error("entry point class {class_name} has no supported constructor (found: {found:?})")]
    UnsupportedEntryPoint {
        /// Qualified name of the entry point class.
        class_name: String,
        /// Constructor descriptors that were present.
        found: Vec<String>,
    },

    /// The enhancer does not support the requested API.
    #[error("persistence API {api} is not supported")]
    UnsupportedApi {
        /// The requested API.
        api: PersistenceApi,
    },

    /// The environment could not be inspected.
    #[error("environment could not be inspected: {reason}")]
    Environment {
        /// Description of the underlying failure.
        reason: String,
    },
}

/// Everything a binding attempt may draw on.
#[derive(Clone, Copy)]
pub struct BindRequest<'a> {
    /// API to enhance for.
    pub api: PersistenceApi,
    /// Module being enhanced.
    pub module: &'a ModuleName,
    /// The module's isolated environment.
    pub environment: &'a ExecutionEnvironment,
    /// Host collaborator, for contracts that report through it.
    pub host: &'a dyn CompileContext,
    /// Optional persistence unit name.
    pub persistence_unit: Option<&'a str>,
}

/// Single context object passed to the current contract.
#[derive(Clone, Copy)]
pub struct EnhancerContext<'a> {
    /// API to enhance for.
    pub api: PersistenceApi,
    /// Module being enhanced.
    pub module: &'a ModuleName,
    /// The module's isolated environment.
    pub environment: &'a ExecutionEnvironment,
    /// Optional persistence unit name.
    pub persistence_unit: Option<&'a str>,
}

/// A bound handle borrowing the support that produced it.
pub type BoundHandle<'a> = Box<dyn EnhancerHandle + 'a>;

/// One way of binding an enhancer.
pub type BindingStrategy =
    for<'a> fn(&'a dyn EnhancerSupport, &BindRequest<'a>) -> std::result::Result<BoundHandle<'a>, BindFailure>;

/// Binding strategies in the order they are attempted.
pub const BINDING_STRATEGIES: [(VersionTier, BindingStrategy); 2] = [
    (VersionTier::Current, bind_current_contract),
    (VersionTier::Legacy, bind_legacy_contract),
];

fn bind_current_contract<'a>(
    support: &'a dyn EnhancerSupport,
    request: &BindRequest<'a>,
) -> std::result::Result<BoundHandle<'a>, BindFailure> {
    support.new_current(&EnhancerContext {
        api: request.api,
        module: request.module,
        environment: request.environment,
        persistence_unit: request.persistence_unit,
    })
}

fn bind_legacy_contract<'a>(
    support: &'a dyn EnhancerSupport,
    request: &BindRequest<'a>,
) -> std::result::Result<BoundHandle<'a>, BindFailure> {
    support.new_legacy(
        request.environment,
        request.api,
        request.host,
        request.module,
        request.persistence_unit,
    )
}

/// Binds `support` for `request`, trying every strategy in order.
///
/// # Errors
///
/// Returns [`EnhanceError::Binding`] carrying the current and legacy
/// failure reasons when no strategy binds.
pub fn bind<'a>(support: &'a dyn EnhancerSupport, request: &BindRequest<'a>) -> Result<BoundHandle<'a>> {
    bind_with(&BINDING_STRATEGIES, support, request)
}

/// Binds using an explicit strategy list.
///
/// # Errors
///
/// See [`bind`].
pub fn bind_with<'a>(
    strategies: &[(VersionTier, BindingStrategy)],
    support: &'a dyn EnhancerSupport,
    request: &BindRequest<'a>,
) -> Result<BoundHandle<'a>> {
    let mut current = BindFailure::ContractNotProvided.to_string();
    let mut legacy = BindFailure::ContractNotProvided.to_string();
    for (tier, strategy) in strategies {
        match strategy(support, request) {
            Ok(handle) => {
                debug!(
                    "bound {} {tier} contract for {} in {}",
                    support.descriptor().display_name(),
                    request.api,
                    request.module
                );
                return Ok(handle);
            }
            Err(failure) => {
                debug!("{tier} contract rejected: {failure}");
                match tier {
                    VersionTier::Current => current = failure.to_string(),
                    VersionTier::Legacy => legacy = failure.to_string(),
                }
            }
        }
    }
    Err(EnhanceError::Binding {
        enhancer: support.descriptor().display_name().to_owned(),
        api: request.api,
        module: request.module.clone(),
        current,
        legacy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::EnhancerDescriptor;
    use crate::test_utils::{RecordingHandle, ScriptedHost};
    use std::cell::Cell;

    struct ProbeSupport {
        descriptor: EnhancerDescriptor,
        current: Option<BindFailure>,
        legacy: Option<BindFailure>,
        current_calls: Cell<usize>,
        legacy_calls: Cell<usize>,
    }

    impl ProbeSupport {
        fn new(current: Option<BindFailure>, legacy: Option<BindFailure>) -> Self {
            Self {
                descriptor: EnhancerDescriptor::new(
                    "PROBE",
                    "Probe",
                    VersionTier::Current,
                    vec![PersistenceApi::Jdo],
                    PersistenceApi::Jdo,
                ),
                current,
                legacy,
                current_calls: Cell::new(0),
                legacy_calls: Cell::new(0),
            }
        }
    }

    impl EnhancerSupport for ProbeSupport {
        fn descriptor(&self) -> &EnhancerDescriptor {
            &self.descriptor
        }

        fn new_current<'a>(
            &'a self,
            _context: &EnhancerContext<'a>,
        ) -> std::result::Result<BoundHandle<'a>, BindFailure> {
            self.current_calls.set(self.current_calls.get() + 1);
            match &self.current {
                Some(failure) => Err(failure.clone()),
                None => Ok(Box::new(RecordingHandle::default())),
            }
        }

        fn new_legacy<'a>(
            &'a self,
            _environment: &'a ExecutionEnvironment,
            _api: PersistenceApi,
            _host: &'a dyn CompileContext,
            _module: &'a ModuleName,
            _persistence_unit: Option<&'a str>,
        ) -> std::result::Result<BoundHandle<'a>, BindFailure> {
            self.legacy_calls.set(self.legacy_calls.get() + 1);
            match &self.legacy {
                Some(failure) => Err(failure.clone()),
                None => Ok(Box::new(RecordingHandle::default())),
            }
        }
    }

    fn request<'a>(
        module: &'a ModuleName,
        environment: &'a ExecutionEnvironment,
        host: &'a ScriptedHost,
    ) -> BindRequest<'a> {
        BindRequest {
            api: PersistenceApi::Jdo,
            module,
            environment,
            host,
            persistence_unit: None,
        }
    }

    #[test]
    fn current_contract_wins_without_trying_legacy() {
        let support = ProbeSupport::new(None, None);
        let module = ModuleName::from("M");
        let environment = ExecutionEnvironment::new(module.clone(), Vec::new());
        let host = ScriptedHost::new();

        assert!(bind(&support, &request(&module, &environment, &host)).is_ok());
        assert_eq!(support.current_calls.get(), 1);
        assert_eq!(support.legacy_calls.get(), 0);
    }

    #[test]
    fn falls_back_to_legacy_contract() {
        let support = ProbeSupport::new(Some(BindFailure::ContractNotProvided), None);
        let module = ModuleName::from("M");
        let environment = ExecutionEnvironment::new(module.clone(), Vec::new());
        let host = ScriptedHost::new();

        assert!(bind(&support, &request(&module, &environment, &host)).is_ok());
        assert_eq!(support.legacy_calls.get(), 1);
    }

    #[test]
    fn both_failures_are_preserved() {
        let support = ProbeSupport::new(
            Some(BindFailure::EntryPointMissing {
                class_name: "org.example.Enhancer".to_owned(),
            }),
            Some(BindFailure::UnsupportedApi {
                api: PersistenceApi::Jdo,
            }),
        );
        let module = ModuleName::from("M");
        let environment = ExecutionEnvironment::new(module.clone(), Vec::new());
        let host = ScriptedHost::new();

        let Err(err) = bind(&support, &request(&module, &environment, &host)) else {
            panic!("binding should fail");
        };
        match err {
            EnhanceError::Binding {
                enhancer,
                current,
                legacy,
                module,
                ..
            } => {
                assert_eq!(enhancer, "Probe");
                assert_eq!(module.as_str(), "M");
                assert!(current.contains("org.example.Enhancer"));
                assert!(legacy.contains("JDO"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
