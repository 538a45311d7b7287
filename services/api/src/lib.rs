//! Call Relay API Library Crate
//!
//! Everything the relay service needs apart from process startup: the relay
//! engine, the HTTP control surface, subscriber endpoints and routing. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod relay;
pub mod router;
pub mod state;
pub mod subscribe;
