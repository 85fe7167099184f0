//! HTTP surface over [`CastSwitch`](crate::CastSwitch).

pub mod api;
pub mod http;
pub mod sse;

pub use http::HttpServer;
