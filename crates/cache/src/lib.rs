//! Document Viewer Cache Library
//!
//! Multi-tier caching for a document viewer: rendered artifacts, extracted
//! text, search results, and highlight geometry, plus a coordinator that
//! balances memory across tiers and a scheduler for periodic maintenance.

pub mod artifact;
pub mod component;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod highlight;
pub mod memory;
pub mod persist;
pub mod results;
pub mod scheduler;
pub mod text;
pub mod types;

pub use artifact::{ArtifactCache, ArtifactCacheStats, ArtifactKey, PriorityWeights};
pub use component::{CacheComponent, CacheStats};
pub use config::{CacheConfig, ConfigError};
pub use coordinator::{CacheCoordinator, GlobalCacheConfig};
pub use events::{CacheEvent, CoordinatorEvent, EventBus};
pub use highlight::{HighlightCache, HighlightKey, HighlightSet};
pub use memory::{FixedMemorySource, MemoryPressure, MemorySource, ProcMemorySource};
pub use persist::{ImportSummary, PersistError, Snapshot, SnapshotConfig};
pub use results::{ResultCache, ResultKey};
pub use scheduler::{wire_standard_tasks, MaintenanceScheduler};
pub use text::TextCache;
pub use types::{ArtifactKind, CachePayload, CachePriority, RectF, SearchHit, SearchOptions};
