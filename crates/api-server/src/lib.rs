#![warn(clippy::unwrap_used)]

pub mod rest;
pub mod server;
pub mod service;

pub use rest::AppState;
pub use server::{router, ApiServer};
pub use service::{RecommendedItem, Recommender};
