//! Smart code governance tags.
//!
//! # Responsibility
//! - Parse and validate `HERA.<SEGMENT>(.<SEGMENT>)*.v<N>` codes.
//! - Classify codes into behaviors and dispatch behavior handlers.
//!
//! # Invariants
//! - A `SmartCode` value is always well-formed; construction validates.
//! - Classification never branches on vertical names, only on registered
//!   segment rules.

pub mod code;
pub mod registry;
