//! Client for the Nimbula resource protocol
//!
//! Authenticates once with a session cookie, addresses resources as
//! `/account/user/name` paths, runs CRUD-style calls through a request
//! pipeline, and waits for asynchronous lifecycle transitions.

pub mod config;
pub mod nimbula;
pub mod resource;

pub use nimbula::address::{Namespace, ResourceId};
pub use nimbula::client::{ClientBuilder, NimbulaClient};
pub use nimbula::error::{Error, Result};
pub use nimbula::method::ResourceMethod;
pub use nimbula::poll::{Check, PollState, Poller};
pub use nimbula::session::{Credentials, MemorySessionStore, Session, SessionStore};
pub use nimbula::status::{classify, ApiError, ErrorClass, ErrorKind, Outcome};
