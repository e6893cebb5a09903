//! 📊 Node stats shapes. Counters all the way down.
//!
//! Every field defaults, because every cluster version ships a slightly
//! different subset of these and we would rather see a zero than a decode error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 📊 `GET /_nodes/stats`, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsResponse {
    pub cluster_name: String,
    pub nodes: BTreeMap<String, NodeStatsNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsNode {
    pub name: String,
    pub timestamp: i64,
    pub transport_address: String,
    /// 🏠 Older clusters say `hostname`, newer ones say `host`.
    #[serde(alias = "host")]
    pub hostname: String,
    pub indices: NodeStatsIndices,
    pub os: NodeStatsOs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsIndices {
    pub docs: NodeStatsIndicesDocs,
    pub store: NodeStatsIndicesStore,
    pub indexing: NodeStatsIndicesIndexing,
    pub get: NodeStatsIndicesGet,
    pub search: NodeStatsIndicesSearch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsIndicesDocs {
    pub count: i64,
    pub deleted: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsIndicesStore {
    #[serde(rename = "size_in_bytes")]
    pub size_bytes: i64,
    #[serde(rename = "throttle_time_in_millis")]
    pub throttle_time_millis: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsIndicesIndexing {
    pub index_total: i64,
    #[serde(rename = "index_time_in_millis")]
    pub index_time_millis: i64,
    pub index_current: i64,
    pub delete_total: i64,
    #[serde(rename = "delete_time_in_millis")]
    pub delete_time_millis: i64,
    pub delete_current: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsIndicesGet {
    pub total: i64,
    #[serde(rename = "time_in_millis")]
    pub time_millis: i64,
    pub exists_total: i64,
    #[serde(rename = "exists_time_in_millis")]
    pub exists_time_millis: i64,
    pub missing_total: i64,
    #[serde(rename = "missing_time_in_millis")]
    pub missing_time_millis: i64,
    pub current: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsIndicesSearch {
    pub open_contexts: i64,
    pub query_total: i64,
    #[serde(rename = "query_time_in_millis")]
    pub query_time_millis: i64,
    pub query_current: i64,
    pub fetch_total: i64,
    #[serde(rename = "fetch_time_in_millis")]
    pub fetch_time_millis: i64,
    pub fetch_current: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsOs {
    pub timestamp: i64,
    #[serde(rename = "uptime_in_millis")]
    pub uptime_millis: i64,
    pub load_average: Vec<f64>,
    pub cpu: NodeStatsOsCpu,
    pub mem: NodeStatsOsMem,
    pub swap: NodeStatsOsSwap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsOsMem {
    #[serde(rename = "free_in_bytes")]
    pub free_bytes: i64,
    #[serde(rename = "used_in_bytes")]
    pub used_bytes: i64,
    #[serde(rename = "actual_free_in_bytes")]
    pub actual_free_bytes: i64,
    #[serde(rename = "actual_used_in_bytes")]
    pub actual_used_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsOsSwap {
    #[serde(rename = "used_in_bytes")]
    pub used_bytes: i64,
    #[serde(rename = "free_in_bytes")]
    pub free_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatsOsCpu {
    pub sys: i64,
    pub user: i64,
    pub idle: i64,
    pub stolen: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_sparse_node_still_decodes() {
        let raw = r#"{
            "cluster_name": "elasticsearch",
            "nodes": {
                "n1": {
                    "name": "Blackheart",
                    "host": "box-1",
                    "indices": {
                        "docs": {"count": 1200, "deleted": 3},
                        "store": {"size_in_bytes": 4096},
                        "search": {"open_contexts": 1, "query_total": 77}
                    },
                    "os": {"mem": {"free_in_bytes": 10, "used_in_bytes": 90}, "load_average": [0.5, 0.25]}
                }
            }
        }"#;

        let stats: NodeStatsResponse = serde_json::from_str(raw).expect("💀 sparse stats decode");
        let node = &stats.nodes["n1"];
        assert_eq!(node.hostname, "box-1");
        assert_eq!(node.indices.docs.count, 1200);
        assert_eq!(node.indices.store.size_bytes, 4096);
        assert_eq!(node.indices.store.throttle_time_millis, 0);
        assert_eq!(node.indices.search.query_total, 77);
        assert_eq!(node.os.mem.used_bytes, 90);
        assert_eq!(node.os.load_average, vec![0.5, 0.25]);
        assert_eq!(node.os.swap, NodeStatsOsSwap::default());
    }
}
