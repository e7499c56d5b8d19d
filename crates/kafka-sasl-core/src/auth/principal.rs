//! Principal representation for authenticated identities.
//!
//! This module provides types for representing the client's authenticated
//! principal, following Apache Kafka's `KafkaPrincipal` design pattern.
//!
//! # Example
//!
//! ```
//! use kafka_sasl_core::auth::{AuthMethod, Principal};
//!
//! let principal = Principal::new("alice", AuthMethod::Sasl);
//! assert_eq!(principal.to_string(), "User:alice");
//!
//! let anon = Principal::anonymous();
//! assert!(anon.is_anonymous());
//! ```

use std::fmt;

use crate::error::{Result, SaslError};

/// Type of principal - matches Kafka's `KafkaPrincipal.USER_TYPE`.
pub const USER_TYPE: &str = "User";

/// Name used for principals that carry no identity.
pub const ANONYMOUS: &str = "ANONYMOUS";

/// Represents an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    /// The type of principal (usually "User").
    pub principal_type: String,
    /// The name/identity of the principal.
    pub name: String,
    /// How this principal was authenticated.
    pub auth_method: AuthMethod,
}

/// How the principal was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// No authentication.
    Anonymous,
    /// SASL authentication.
    Sasl,
}

impl Principal {
    /// Create a new principal with the given name and authentication method.
    pub fn new(name: impl Into<String>, auth_method: AuthMethod) -> Self {
        Self {
            principal_type: USER_TYPE.to_string(),
            name: name.into(),
            auth_method,
        }
    }

    /// Create an anonymous principal.
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS, AuthMethod::Anonymous)
    }

    /// Check if this is an anonymous principal.
    pub fn is_anonymous(&self) -> bool {
        self.name == ANONYMOUS && matches!(self.auth_method, AuthMethod::Anonymous)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.principal_type, self.name)
    }
}

impl Default for Principal {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// The local identity the client authenticates as.
///
/// Holds the principal names established before the exchange starts, for
/// instance by a Kerberos login. Read-only for the duration of an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    principals: Vec<String>,
}

impl Subject {
    /// A subject without principals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A subject holding the given principal names, in order.
    pub fn with_principals<I, S>(principals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principals: principals.into_iter().map(Into::into).collect(),
        }
    }

    /// All principal names.
    #[must_use]
    pub fn principals(&self) -> &[String] {
        &self.principals
    }

    /// The first principal name.
    ///
    /// # Errors
    ///
    /// Returns a retriable error when the subject is empty; during a Kerberos
    /// re-login the subject is briefly cleared and the connection should be
    /// retried after backoff.
    pub fn first_principal(&self) -> Result<&str> {
        self.principals.first().map(String::as_str).ok_or_else(|| {
            SaslError::MechanismRetriable(
                "Principal could not be determined from Subject, this may be a transient failure due to Kerberos re-login"
                    .to_string(),
            )
        })
    }
}
