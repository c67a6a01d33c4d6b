//! Shared protocol definitions for the rendezvous relay wire format.

pub mod directory;
pub mod peer;
pub mod signal;

pub use peer::PeerId;
