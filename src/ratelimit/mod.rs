//! Rate limiting logic: windows, keys, limit registry, counter stores and the engine.

mod backend;
mod clock;
mod key;
mod limiter;
mod memory;
mod registry;
mod window;

pub use backend::{CounterStore, StorageError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use key::{CacheKey, DiscriminatingKey};
pub use limiter::{EngineSettings, LimitStatus, Throttler, DEFAULT_KEY_PREFIX};
pub use memory::MemoryStore;
pub use registry::{EffectiveLimit, LimitDefinition, Overrides, Registry, DEFAULT_INCREMENT};
pub use window::Window;
