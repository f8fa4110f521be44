//! Request handlers organized by resource.

pub mod cache;
pub mod convert;
pub mod health;
