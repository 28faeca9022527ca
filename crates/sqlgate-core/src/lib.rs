//! Core types shared by the SQLGate proxy crates.
//!
//! This crate holds the error taxonomy used across the backend exchange
//! engine and the chunk pool. It carries no I/O and no protocol logic so
//! that every other crate can depend on it without cycles.

pub mod error;

pub use error::{
    ConnectionError, ConnectionErrorKind, Error, ProtocolError, RequestError, RequestErrorKind,
    Result, ServerError,
};
