//! Vendor-normalization core for chat-completion LLM APIs.
//!
//! Requests, responses and stream events are expressed once in the
//! canonical contract ([`protocol::canonical`]) and translated to and from
//! each vendor's wire format by a [`protocol::Converter`]. Streaming bodies
//! are decoded on a dedicated task into a bounded, cancellable
//! [`stream::CanonicalEventStream`] whose index fields are kept stable by a
//! [`stream::StreamIndexContext`].
pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod protocol;
pub mod provider;
pub mod stream;
pub mod transport;

mod util;

pub use error::{ErrorKind, GatewayError};
