//! This module provides reusable test utilities:
//! - An in-memory ledger store with foreign-key checks
//! - Linked chain data builders
//! - Recording progress sink and verifier
//! - Service construction over a temporary snapshot directory

// Allow unused code in test fixtures - not every test uses every helper
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod chain_data;
pub mod memory_store;
pub mod recording;
pub mod test_service;

// Re-export commonly used items
pub use chain_data::*;
pub use memory_store::MemoryStore;
pub use recording::*;
pub use test_service::*;
