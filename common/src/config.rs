pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Prefix of every notification channel name
pub const CHANNEL_PREFIX: &str = "eosio-contract-api";

// Number of blocks acknowledged to the state-history socket in one batch
pub const DEFAULT_BLOCKS_PER_ACK: u32 = 10;

// Bound of the decoded-block queue between reader and receiver
pub const DEFAULT_BLOCK_QUEUE_SIZE: usize = 32;

// Reconnect backoff for the state-history socket
pub const RECONNECT_BASE_DELAY_MS: u64 = 500;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

// How many times a block is retried on a database error before halting
pub const BLOCK_RETRY_LIMIT: u32 = 3;
