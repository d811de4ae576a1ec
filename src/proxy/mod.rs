pub mod client;
pub mod context;
mod forward;
mod handler;

pub use client::{HttpClient, UpstreamClient, UpstreamRequest, UpstreamResponse};
pub use context::{error_response, BoxBody, BoxError, InboundRequest};
pub use forward::ForwardingEngine;
pub use handler::handle_request;
