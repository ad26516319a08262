//! Space allocation policy for blobdb
//!
//! Pure policy, no I/O: given a payload length (and the writer's current
//! buffer capacity) decide how many bytes of capacity the record extent
//! reserves. The strategy is supplied at open time and never persisted; a
//! different but valid strategy on the next open changes future allocation
//! sizes only, never correctness.

mod strategy;

pub use strategy::{
    DataLengthPlusFixedPercentStrategy, SpaceAllocationStrategy, StrategyError,
    WriterDecidesStrategy,
};
