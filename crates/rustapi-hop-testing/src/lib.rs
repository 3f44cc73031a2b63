//! Testing utilities for rustapi-hop
//!
//! r# "Message Expectations"
//!
//! `TestServer` serves a tower service carrying a `HopLayer` over real HTTP,
//! and `Expectation`s check what the in-memory broker received.

pub mod expectation;
pub mod matcher;
pub mod server;

pub use expectation::{verify_all, Expectation, Times};
pub use matcher::MessageMatcher;
pub use server::TestServer;

pub use rustapi_hop::broker::{MemoryBroker, PublishedMessage};
