//! Collection of mocks used to test the shard engine.

pub mod application;
pub mod beacon;
pub mod network;
pub mod reporter;
