mod engine;
mod queue;
mod reconcile;
mod registry;
mod scheduler;
mod state;
mod strategy;
mod watch;


pub use engine::{Engine, EngineParts};
pub use queue::{RefreshQueue, DEFAULT_MAX_CONCURRENT_REFRESHES};
pub use reconcile::SyncOptions;
pub use registry::{MonitorRegistry, RemovalRefused};
pub use state::{state_fingerprint, summarize, MonitorState};
pub use strategy::PollingStrategy;
pub use watch::WatchDecision;
