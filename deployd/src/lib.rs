//! deployd library
//!
//! Deployment orchestration and live log distribution for a single-process
//! coordinator.

pub mod app;
pub mod bus;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod services;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
