//! Data models

pub mod deployment;
pub mod pipeline;
pub mod service;
