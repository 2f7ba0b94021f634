//! Gateway routing read-model derived from the stored specs.

use std::collections::BTreeMap;

use graphop_core::names::service_url;
use graphop_core::DesiredGraphSpec;
use serde::{Deserialize, Serialize};

pub const ROUTE_TIMEOUT_MS: u64 = 30_000;
pub const POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayRoute {
    pub path_prefix: String,
    pub upstream_url: String,
    pub strip_prefix: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GatewayRoutingTable {
    pub routes: Vec<GatewayRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayConfig {
    pub routing: GatewayRoutingTable,
    pub poll_interval_secs: u64,
}

/// One route per ingress route of every spec, environments in id order.
pub fn routing_table(specs: &BTreeMap<String, DesiredGraphSpec>) -> GatewayConfig {
    let routes = specs
        .values()
        .flat_map(|s| s.ingress.routes.iter())
        .map(|r| GatewayRoute {
            path_prefix: r.path.clone(),
            upstream_url: service_url(&r.target_component, r.target_port),
            strip_prefix: true,
            timeout_ms: ROUTE_TIMEOUT_MS,
        })
        .collect();
    GatewayConfig { routing: GatewayRoutingTable { routes }, poll_interval_secs: POLL_INTERVAL_SECS }
}
