//! Outbound collaborators for Tollgate proxy plugins.
//!
//! - [`HttpClient`]: pooled HTTP forwarding with per-request timeouts
//! - [`LoadBalancer`]: weighted upstream selection
//! - [`ServiceRegistry`]: service id to instance resolution
//! - [`RpcInvoker`]: RPC calls, bridged over HTTP by [`HttpRpcBridge`]

pub mod discovery;
pub mod http_client;
pub mod load_balance;
pub mod rpc;

pub use discovery::{DiscoveryError, ServiceRegistry, StaticRegistry};
pub use http_client::{
    append_query, is_hop_by_hop, HttpClient, HttpClientConfig, HttpClientError, UpstreamRequest,
    UpstreamResponse,
};
pub use load_balance::{LoadBalance, LoadBalancer, Upstream};
pub use rpc::{HttpRpcBridge, RpcError, RpcInvoker, RpcParams, RpcRequest};
