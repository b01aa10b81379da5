//! Identifier newtypes
//!
//! Contracts, trials and scopes are all addressed by strings at the edges
//! (flag values, config keys, request ids). Wrapping them keeps the three
//! namespaces from being mixed up inside the dispatcher.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use ulid::Ulid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string-like value
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow as `&str`
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Identity of a service contract (one experiment per contract)
    ContractId
}

string_id! {
    /// Key of a trial, unique within its experiment
    TrialKey
}

string_id! {
    /// Opaque label handed to the implementation resolver
    ImplementationRef
}

string_id! {
    /// Logical unit of work across which decisions stay consistent
    ScopeId
}

impl ScopeId {
    /// Generate a fresh scope id (ULID, sortable by creation time)
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn trial_key_display_and_borrow() {
        let key = TrialKey::from("variant");
        assert_eq!(key.to_string(), "variant");

        let mut map = HashMap::new();
        map.insert(key, 1);
        assert_eq!(map.get("variant"), Some(&1));
    }

    #[test]
    fn generated_scopes_are_unique() {
        let a = ScopeId::generate();
        let b = ScopeId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = ContractId::new("pricing");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"pricing\"");
    }
}
