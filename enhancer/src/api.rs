//! Persistence APIs understood by enhancers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A persistence API an enhancer can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PersistenceApi {
    /// Java Data Objects.
    Jdo,
    /// Java Persistence API.
    Jpa,
}

const JPA_ANNOTATIONS: &[&str] = &[
    "javax.persistence.Entity",
    "javax.persistence.MappedSuperclass",
    "javax.persistence.Embeddable",
];

const JDO_ANNOTATIONS: &[&str] = &[
    "javax.jdo.annotations.PersistenceCapable",
    "javax.jdo.annotations.PersistenceAware",
];

impl PersistenceApi {
    /// The canonical upper-case name passed to enhancers.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Jdo => "JDO",
            Self::Jpa => "JPA",
        }
    }

    /// Fully qualified annotation names marking persistence-capable classes.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_enhancer::api::PersistenceApi;
    ///
    /// assert!(PersistenceApi::Jpa
    ///     .annotation_class_names()
    ///     .contains(&"javax.persistence.Entity"));
    /// ```
    #[must_use]
    pub const fn annotation_class_names(self) -> &'static [&'static str] {
        match self {
            Self::Jdo => JDO_ANNOTATIONS,
            Self::Jpa => JPA_ANNOTATIONS,
        }
    }
}

impl fmt::Display for PersistenceApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown persistence API name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown persistence API '{0}' (expected JDO or JPA)")]
pub struct UnknownApi(String);

impl FromStr for PersistenceApi {
    type Err = UnknownApi;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JDO" => Ok(Self::Jdo),
            "JPA" => Ok(Self::Jpa),
            _ => Err(UnknownApi(s.to_owned())),
        }
    }
}

impl TryFrom<String> for PersistenceApi {
    type Error = UnknownApi;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PersistenceApi> for String {
    fn from(api: PersistenceApi) -> Self {
        api.name().to_owned()
    }
}
