//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so partial JSON files are accepted; missing fields keep their defaults.

mod cluster;
mod supervision;

pub use cluster::*;
pub use supervision::*;

use serde::{Deserialize, Serialize};

/// Root settings type for an rpcmesh node.
///
/// ```json
/// {
///   "cluster": { "address": "rpcmesh://prod@10.0.0.4:2550" },
///   "supervision": { "maxRestarts": 5 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeSettings {
    /// Cluster identity and broker path.
    pub cluster: ClusterSettings,
    /// Fault policy and mailbox sizing for the RPC supervisor.
    pub supervision: SupervisionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Locally provided RPCs and services.
    pub provider: ProviderSettings,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`"trace"`, `"debug"`, `"info"`, `"warn"`, `"error"`).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: NodeSettings =
            serde_json::from_str(r#"{"logging": {"level": "debug"}}"#).unwrap();
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.supervision.max_restarts, 10);
    }

    #[test]
    fn json_keys_are_camel_case() {
        let json = serde_json::to_value(NodeSettings::default()).unwrap();
        assert!(json["supervision"].get("restartWindowMs").is_some());
        assert!(json["cluster"].get("brokerPath").is_some());
        assert!(json["provider"].get("supportedRpcs").is_some());
    }
}
