//! Request argument models for agent calls.
//!
//! Result payloads stay opaque (`serde_json::Value`); only the arguments the
//! client itself assembles are typed here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Turn a blank string into JSON `null`, anything else into a JSON string.
///
/// The agent treats `null` as "not specified" (e.g. the default cache).
pub fn nullable(value: &str) -> Value {
    if value.trim().is_empty() {
        Value::Null
    } else {
        Value::String(value.to_string())
    }
}

/// Same as [`nullable`] for an optional string.
pub fn nullable_opt(value: Option<&str>) -> Value {
    value.map(nullable).unwrap_or(Value::Null)
}

/// JDBC connection preset used by schema import calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JdbcPreset {
    /// Path of the driver jar on the agent host.
    pub jdbc_driver_jar: String,
    pub jdbc_driver_class: String,
    pub jdbc_url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl JdbcPreset {
    /// Wire form of the preset, with blank fields sent as `null`.
    ///
    /// The password is carried in the call but never serialized with the
    /// preset itself (e.g. when a preset is saved).
    pub fn to_args(&self) -> Value {
        serde_json::json!({
            "jdbcDriverJar": nullable(&self.jdbc_driver_jar),
            "jdbcDriverClass": nullable(&self.jdbc_driver_class),
            "jdbcUrl": nullable(&self.jdbc_url),
            "info": {
                "user": nullable_opt(self.user.as_deref()),
                "password": nullable_opt(self.password.as_deref()),
            },
        })
    }
}

/// Flags forwarded with a SQL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub non_collocated_joins: bool,
    pub enforce_join_order: bool,
    pub replicated_only: bool,
    pub local: bool,
    pub page_size: u32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            non_collocated_joins: false,
            enforce_join_order: false,
            replicated_only: false,
            local: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Rows per page when the caller does not choose.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
