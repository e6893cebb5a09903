//! 🩺 Cluster accessors: "how are you feeling today?" for search clusters.
//!
//! Plain GET + JSON decode over a [`Transport`]. Health, state, node stats.
//! The interesting concurrency lives in `bulk`; this module just asks nicely.

use serde::{Deserialize, Serialize};

mod stats;

pub use stats::{
    NodeStatsIndices, NodeStatsIndicesDocs, NodeStatsIndicesGet, NodeStatsIndicesIndexing,
    NodeStatsIndicesSearch, NodeStatsIndicesStore, NodeStatsNode, NodeStatsOs, NodeStatsOsCpu,
    NodeStatsOsMem, NodeStatsOsSwap, NodeStatsResponse,
};

use crate::error::Result;
use crate::transport::{Method, Transport, decode_json};

/// 🩺 The cluster health response. Missing fields default to zero / empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterHealth {
    pub cluster_name: String,
    /// `green`, `yellow` or `red`. Red means someone is having a bad day.
    pub status: String,
    pub timed_out: bool,
    pub number_of_nodes: u64,
    pub number_of_data_nodes: u64,
    pub active_primary_shards: u64,
    pub active_shards: u64,
    pub relocating_shards: u64,
    pub initializing_shards: u64,
    pub unassigned_shards: u64,
}

fn health_path(indices: &[&str]) -> String {
    if indices.is_empty() {
        "/_cluster/health".to_string()
    } else {
        format!("/_cluster/health/{}", indices.join(","))
    }
}

/// 🩺 `GET /_cluster/health[/<indices>]`.
pub async fn health(transport: &dyn Transport, indices: &[&str]) -> Result<ClusterHealth> {
    let body = transport.execute(Method::GET, &health_path(indices), None).await?;
    decode_json(&body)
}

/// 🔧 Which parts of the cluster state to leave out of the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStateFilter {
    pub filter_nodes: bool,
    pub filter_routing_table: bool,
    pub filter_metadata: bool,
    pub filter_blocks: bool,
    pub filter_indices: Vec<String>,
}

impl ClusterStateFilter {
    /// 🔗 Query-string parameters, in a stable order.
    pub fn parameterize(&self) -> Vec<String> {
        let mut parts = Vec::new();
        if self.filter_nodes {
            parts.push("filter_nodes=true".to_string());
        }
        if self.filter_routing_table {
            parts.push("filter_routing_table=true".to_string());
        }
        if self.filter_metadata {
            parts.push("filter_metadata=true".to_string());
        }
        if self.filter_blocks {
            parts.push("filter_blocks=true".to_string());
        }
        if !self.filter_indices.is_empty() {
            parts.push(format!("filter_indices={}", self.filter_indices.join(",")));
        }
        parts
    }
}

fn state_path(pretty: bool, filter: &ClusterStateFilter) -> String {
    let mut parameters = filter.parameterize();
    if pretty {
        parameters.push("pretty=1".to_string());
    }
    if parameters.is_empty() {
        "/_cluster/state".to_string()
    } else {
        format!("/_cluster/state?{}", parameters.join("&"))
    }
}

/// 🗺️ `GET /_cluster/state?...`. The state document is huge and version-specific,
/// so it comes back as a raw JSON value.
pub async fn state(
    transport: &dyn Transport,
    pretty: bool,
    filter: &ClusterStateFilter,
) -> Result<serde_json::Value> {
    let body = transport.execute(Method::GET, &state_path(pretty, filter), None).await?;
    decode_json(&body)
}

/// 📊 `GET /_nodes/stats`.
pub async fn node_stats(transport: &dyn Transport) -> Result<NodeStatsResponse> {
    let body = transport.execute(Method::GET, "/_nodes/stats", None).await?;
    decode_json(&body)
}
