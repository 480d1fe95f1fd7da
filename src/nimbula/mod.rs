//! Nimbula resource protocol
//!
//! This module provides the core of the client: session management,
//! hierarchical resource addressing, the request pipeline, status
//! classification and convergence polling.
//!
//! # Module Structure
//!
//! - [`address`] - Resource paths and `/account/user/name` identifiers
//! - [`session`] - Cookie session, authentication handshake, session stores
//! - [`status`] - HTTP status to error kind classification
//! - [`http`] - HTTP transport and wire logging
//! - [`client`] - Client scope shared by all request pipelines
//! - [`method`] - Request pipeline bound to one endpoint
//! - [`poll`] - Bounded wait for asynchronous lifecycle transitions
//!
//! # Example
//!
//! ```ignore
//! use nimbula::{Credentials, NimbulaClient};
//! use nimbula::resource::Endpoint;
//!
//! async fn example() -> nimbula::Result<()> {
//!     let client = NimbulaClient::builder("https://nimbula.example.com", Credentials::new("acct1", "bob", "pw"))
//!         .build()?;
//!     let mut method = client.method(Endpoint::Instance);
//!     if method.get("vm1").await? == 200 {
//!         println!("{}", method.response_body()?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod client;
pub mod error;
pub mod http;
pub mod method;
pub mod poll;
pub mod session;
pub mod status;
