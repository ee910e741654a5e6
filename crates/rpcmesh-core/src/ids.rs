//! Branded ID newtypes for type safety.
//!
//! Every identifier that crosses a component boundary is a distinct newtype
//! around `String`. This prevents accidentally passing a capability name
//! where an RPC identifier is expected, or a cluster address where a
//! routing handle is expected.
//!
//! Generated IDs (sessions, consumers) are UUID v7 (time-ordered). Named
//! IDs are supplied by the caller and never generated.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! named_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        named_id! {
            $(#[$meta])*
            $name
        }

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a consumer session.
    SessionId
}

branded_id! {
    /// Identity of the consumer that owns a session.
    ConsumerId
}

named_id! {
    /// Qualified name of an RPC, e.g. `urn:example:toaster?rev=2024-01-01)make-toast`.
    RpcId
}

named_id! {
    /// Typed identifier for a kind of service a consumer may request,
    /// e.g. `"topology-service"`.
    CapabilityType
}

named_id! {
    /// Address of the local node inside the cluster.
    ClusterAddress
}

named_id! {
    /// Opaque token identifying where a broker can be reached.
    ///
    /// Never parsed; only compared and forwarded.
    RoutingHandle
}

impl RoutingHandle {
    /// Derive the routing handle of the broker living at `suffix` under `address`.
    #[must_use]
    pub fn for_broker(address: &ClusterAddress, suffix: &str) -> Self {
        Self(format!("{address}{suffix}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_ne!(ConsumerId::new(), ConsumerId::default());
    }

    #[test]
    fn named_id_display_and_deref() {
        let rpc = RpcId::from("toaster:make-toast");
        assert_eq!(rpc.to_string(), "toaster:make-toast");
        assert!(rpc.starts_with("toaster"));
        assert_eq!(rpc.as_str(), "toaster:make-toast");
    }

    #[test]
    fn named_ids_order_by_value() {
        let set: BTreeSet<RpcId> = ["c", "a", "b"].into_iter().map(RpcId::from).collect();
        let ordered: Vec<&str> = set.iter().map(RpcId::as_str).collect();
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }

    #[test]
    fn serde_is_transparent() {
        let cap = CapabilityType::from("topology-service");
        let json = serde_json::to_string(&cap).unwrap();
        assert_eq!(json, "\"topology-service\"");
        let back: CapabilityType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
    }

    #[test]
    fn routing_handle_concatenates_suffix() {
        let addr = ClusterAddress::from("pekko://cluster@10.0.0.1:2550");
        let handle = RoutingHandle::for_broker(&addr, "/user/rpc/rpc-broker");
        assert_eq!(
            handle.as_str(),
            "pekko://cluster@10.0.0.1:2550/user/rpc/rpc-broker"
        );
    }
}
