// Session state engine for a travel booking frontend:
// exchange rates, price conversion, form drafts and seat selection.

// Export modules for each engine component
pub mod clock;
pub mod config;
pub mod context;
pub mod conversion;
pub mod currency;
pub mod draft_store;
pub mod provider;
pub mod rate_cache;
pub mod seat_inventory;
pub mod storage;

// Re-export key types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, DraftConfig, EngineConfig, RateCacheConfig, SeatConfig};
pub use context::{RestoredSession, SessionContext, SessionError};
pub use conversion::{round_money, ConversionService, FormatError};
pub use currency::CurrencyProfile;
pub use draft_store::{DraftError, DraftSession, DraftStore};
pub use provider::{FetchError, HttpRateProvider, RateProvider, StaticRateProvider};
pub use rate_cache::{
    CachedRateTable, Freshness, RateCache, RateCacheStatsReport, RateTable, RateTableError,
};
pub use seat_inventory::{
    CabinClass, ConfirmedSelection, Seat, SeatError, SeatFeature, SeatInventory, SeatMap,
    SeatStatus, SelectionChange,
};
pub use storage::{FileStore, KvStore, MemoryStore, Snapshot, StorageError};
