//! Annuaire HTTP service: configuration, middleware, registry and geocoding
//! clients, background jobs and routes.

pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod services;
