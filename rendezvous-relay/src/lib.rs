//! Rendezvous relay server library.
//!
//! Accepts WebSocket connections, issues each one a random peer identifier,
//! announces arrivals and departures, and forwards directed negotiation
//! messages between peers without interpreting them.

pub mod config;
pub mod registry;
pub mod relay;
