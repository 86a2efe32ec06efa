//! Slot grid, reservation engine and availability queries

pub mod engine;
pub mod grid;
pub mod query;
pub mod store;

#[cfg(test)]
mod memory;

pub use engine::{Occupancy, SlotEngine};
pub use store::PgSlotStore;
