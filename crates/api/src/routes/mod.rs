//! HTTP route handlers.

pub mod establishments;
pub mod health;
pub mod imports;
pub mod sites;
