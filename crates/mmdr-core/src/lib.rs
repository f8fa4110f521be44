//! mmdr core
//!
//! Domain types, port traits, and error handling shared by every mmdr crate.
//! This crate stays free of runtime and transport dependencies so the cache,
//! render, and API layers can agree on one vocabulary.

pub mod error;
pub mod ids;
pub mod ports;
pub mod render;

pub use error::{Error, ErrorKind, Result};
pub use ids::*;
pub use ports::*;
pub use render::*;
