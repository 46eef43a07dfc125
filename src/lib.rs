//! # Collector node
//!
//! Periodically-invoked price collector. One run fetches centralized-exchange
//! prices through the gofer tool and decentralized-exchange prices from the CNT
//! indexer, signs each observation with the node key, and relays it to a
//! validator over a websocket, waiting a bounded time for each acknowledgment.

pub use crate::utils::error::{Error, Result};

pub mod config;
pub mod envelope;
pub mod feeds;
pub mod identity;
pub mod lock;
pub mod pipeline;
pub mod signer;
pub mod sources;
pub mod utils;
pub mod validator;

pub use envelope::{Envelope, RawObservation};
pub use feeds::FeedSpec;
pub use identity::Identity;
pub use pipeline::{Pipeline, RunSummary, Stage};
pub use signer::{MessageSigner, SignedPayload};
