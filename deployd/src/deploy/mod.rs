//! Deployment module

pub mod classify;
pub mod controller;
pub mod executor;
pub mod fsm;
pub mod orchestrator;
