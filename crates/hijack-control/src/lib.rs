//! Control Surface (§6, §4.H of the hijack engine spec).
//!
//! The spec treats this component as an external collaborator, specified
//! only at its interface — but §8's S6/S7 testable properties are about its
//! behavior, so it is built here as a small, fully-tested crate rather than
//! left to the embedding host: a Unix-domain-socket listener dispatching a
//! one-line text protocol onto a [`hijack_core::Hijacker`].

mod dispatch;
mod payload;
mod server;

pub use payload::{parse_json, parse_kv, ParseError};
pub use server::{ControlServer, ServerError, DEFAULT_SOCKET_PATH};
