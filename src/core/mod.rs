//! Core engine modules - cache, queue, workers, player
//!
//! These modules form the playback engine, independent of any UI.

pub mod cache_man;
pub mod lru_cache;
pub mod observer;
pub mod options;
pub mod player;
pub mod request_queue;
pub mod workers;

// Re-exports for convenience
pub use cache_man::{CacheError, CacheManager, CacheStats, KeyState, MergeOutcome, PlayerCacheInfo};
pub use lru_cache::LruCache;
pub use observer::{Delivery, Observable, SubscriptionId};
pub use options::{CacheOptions, MemoryBudget, OptionsError};
pub use player::{Loop, MissPolicy, Playback, Player, Shown, Tick};
pub use request_queue::{Priority, Request, RequestQueue, Tier};
pub use workers::{Decoded, WorkerResult, Workers};
