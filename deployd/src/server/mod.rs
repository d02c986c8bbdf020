//! HTTP surface and log streaming gateway

pub mod error;
pub mod handlers;
pub mod serve;
pub mod state;
pub mod stream;
