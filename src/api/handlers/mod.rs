//! HTTP handlers: the public probes and the session authentication layer.

pub mod auth;
pub mod health;
pub mod root;
