//! `toad-exchange` is the exchange engine of a CoAP endpoint.
//!
//! It sits between the socket and the application and does everything
//! CoAP requires of an endpoint besides routing requests to resources:
//! - matching responses to requests, and ACKs & RSTs to the messages they answer
//! - recognizing retransmitted messages & answering them from cache
//! - retransmitting CON messages with exponential back-off
//! - piggybacking responses on ACKs
//! - [block-wise transfer](https://datatracker.ietf.org/doc/html/rfc7959) of large bodies
//! - [observing resources](https://datatracker.ietf.org/doc/html/rfc7641), as client & as server
//!
//! ## Exchanges
//! An [`Exchange`](exchange::Exchange) is one request and the response(s) it
//! provokes, whether we sent the request (a "local" exchange) or a peer did
//! (a "remote" exchange).
//!
//! ## Layers
//! Every message passes through a [`Stack`](stack::Stack) of
//! [`Layer`](layer::Layer)s, each responsible for one concern.
//! Layers never perform IO; they mutate the exchange and queue
//! [`Effect`](layer::Effect)s that the [`Endpoint`](endpoint::Endpoint) performs.
//!
//! ## Driving an endpoint
//! Nothing happens in the background. The application calls
//! [`Endpoint::poll`](endpoint::Endpoint::poll) to receive datagrams and fire
//! timers, and pulls what was received from the endpoint's
//! [`Deliverer`](endpoint::Deliverer).

// x-release-please-version
#![doc(html_root_url = "https://docs.rs/toad-exchange/0.1.0")]
// x-release-please-end
#![cfg_attr(any(docsrs, feature = "docs"), feature(doc_cfg))]
// -
// style
#![allow(clippy::unused_unit)]
#![allow(clippy::new_without_default)]
// -
// deny
#![cfg_attr(not(test), deny(unsafe_code))]
// -
// warnings
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![cfg_attr(not(test), warn(unreachable_pub))]

#[cfg(test)]
pub(crate) mod test;

/// Runtime config
pub mod config;

/// customizable retrying of fallible operations
pub mod retry;

/// Time
pub mod time;

/// Network abstractions
pub mod net;

/// Rendering messages for logs
pub mod logging;

/// Errors
pub mod error;

/// Deterministic timers
pub mod sched;

/// Hooks observing messages on the wire
pub mod interceptor;

/// requests
pub mod req;

/// responses
pub mod resp;

/// Low-level CoAP messages & their wire format
pub mod msg;

/// Exchange state
pub mod exchange;

/// Matching incoming messages to exchanges
pub mod matcher;

/// Protocol layers
pub mod layer;

/// The ordered stack of layers
pub mod stack;

/// CoAP endpoint
pub mod endpoint;

/// `std` platform: clock & UDP socket
#[cfg_attr(any(feature = "docs", docsrs), doc(cfg(feature = "std")))]
#[cfg(feature = "std")]
pub mod std;
