// Atomic Common Library
// Shared building blocks of the indexer: chain value types, the ABI model
// and its portable binary decoder, scope filters and the priority job queue.

pub mod abi;
pub mod chain;
pub mod config;
pub mod filter;
pub mod queue;
pub mod task;
