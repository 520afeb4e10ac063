//! Client for the APNs provider API, focused on Live Activities.
//!
//! Covers the Live Activity push lifecycle (start, update, end) to a single
//! device or to a broadcast channel, plus channel management (create, read,
//! delete, list). Each operation signs a fresh provider token and uses its
//! own HTTP/2 connection.

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod request;
pub mod response;
pub mod token;
pub mod transport;

pub use client::LiveActivityClient;
pub use config::Config;
pub use error::ApnsError;
pub use identity::{Endpoints, Environment, ProviderIdentity, SigningKey};
pub use models::{
    ActivityAttributes, Alert, ContentState, Hero, MessageStoragePolicy, Schema, User,
};
pub use response::{
    CreateChannelResponse, GetChannelResponse, ListChannelsResponse, ServerResponse,
};
