//! Remote fetch adapter for the erasure dashboard service.
//!
//! Every call to the service goes through the [`RemoteFetch`] trait and comes
//! back as an [`Envelope`] (`{success, data?, message?}`), so the caches and
//! the mutation coordinator treat all collections identically.
//!
//! [`HttpAdapter`] is the production implementation over reqwest.

pub mod client;
pub mod envelope;
pub mod error;

pub use client::HttpAdapter;
pub use envelope::{Envelope, Operation, RemoteFetch, Request};
pub use error::ApiError;
