#![warn(clippy::unwrap_used)]

pub mod fixtures;
pub mod memory;
pub mod warehouse;

pub use fixtures::{demo_fixture, Fixture, FixtureSummary};
pub use memory::InMemoryStore;
pub use warehouse::StaticWarehouseService;
