//! Typed agent calls.
//!
//! Each method names one agent event and a fixed positional argument list,
//! then delegates to [`AgentClient::call`] or
//! [`AgentClient::call_when_available`]. Blank strings are sent as `null`.
//!
//! Only driver discovery runs before availability is confirmed; everything
//! that talks to cluster nodes waits for an agent peer first.

use serde_json::{json, Value};

use crate::client::AgentClient;
use crate::error::ClientError;
use crate::models::{nullable, JdbcPreset, QueryOptions};

/// Agent event names.
pub mod events {
    pub const DRIVERS: &str = "schemaImport:drivers";
    pub const SCHEMAS: &str = "schemaImport:schemas";
    pub const METADATA: &str = "schemaImport:metadata";
    pub const TOPOLOGY: &str = "node:topology";
    pub const QUERY: &str = "node:query";
    pub const QUERY_GET_ALL: &str = "node:query:getAll";
    pub const QUERY_FETCH: &str = "node:query:fetch";
    pub const QUERY_CLOSE: &str = "node:query:close";
    pub const CACHE_METADATA: &str = "node:cache:metadata";
}

impl AgentClient {
    /// List JDBC drivers found on the agent host.
    pub async fn drivers(&self) -> Result<Value, ClientError> {
        self.call(events::DRIVERS, vec![]).await
    }

    /// List schemas reachable through `preset`.
    pub async fn schemas(&self, preset: &JdbcPreset) -> Result<Value, ClientError> {
        self.call_when_available(events::SCHEMAS, vec![preset.to_args()])
            .await
    }

    /// Fetch table metadata for `schemas`.
    pub async fn metadata(
        &self,
        preset: &JdbcPreset,
        schemas: &[String],
        tables_only: bool,
    ) -> Result<Value, ClientError> {
        self.call_when_available(
            events::METADATA,
            vec![preset.to_args(), json!(schemas), json!(tables_only)],
        )
        .await
    }

    /// Cluster topology, optionally with node attributes and metrics.
    pub async fn topology(&self, attributes: bool, metrics: bool) -> Result<Value, ClientError> {
        self.call_when_available(events::TOPOLOGY, vec![json!(attributes), json!(metrics)])
            .await
    }

    /// Run a SQL query and return its first page.
    pub async fn query(
        &self,
        node_id: &str,
        cache_name: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Value, ClientError> {
        self.call_when_available(events::QUERY, query_args(node_id, cache_name, query, options))
            .await
    }

    /// Run a SQL query and return every row.
    pub async fn query_get_all(
        &self,
        node_id: &str,
        cache_name: &str,
        query: &str,
        options: &QueryOptions,
    ) -> Result<Value, ClientError> {
        self.call_when_available(
            events::QUERY_GET_ALL,
            query_args(node_id, cache_name, query, options),
        )
        .await
    }

    /// Fetch the next page of an open query.
    pub async fn fetch_page(
        &self,
        node_id: &str,
        query_id: &str,
        page_size: u32,
    ) -> Result<Value, ClientError> {
        self.call_when_available(
            events::QUERY_FETCH,
            vec![nullable(node_id), nullable(query_id), json!(page_size)],
        )
        .await
    }

    /// Close an open query cursor.
    pub async fn close_query(&self, node_id: &str, query_id: &str) -> Result<Value, ClientError> {
        self.call_when_available(
            events::QUERY_CLOSE,
            vec![nullable(node_id), nullable(query_id)],
        )
        .await
    }

    /// Metadata of one cache; a blank name means the default cache.
    pub async fn cache_metadata(&self, cache_name: &str) -> Result<Value, ClientError> {
        self.call_when_available(events::CACHE_METADATA, vec![nullable(cache_name)])
            .await
    }
}

fn query_args(node_id: &str, cache_name: &str, query: &str, options: &QueryOptions) -> Vec<Value> {
    vec![
        nullable(node_id),
        nullable(cache_name),
        json!(query),
        json!(options.non_collocated_joins),
        json!(options.enforce_join_order),
        json!(options.replicated_only),
        json!(options.local),
        json!(options.page_size),
    ]
}
