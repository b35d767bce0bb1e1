//! HTTP API: server, routing, session transport and configuration.

pub mod app;
pub mod config;
pub mod cookies;
pub mod middleware;
