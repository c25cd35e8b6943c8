//! Timewarp Auto-Fetch
//!
//! Opportunistic preservation of resources a replayed page could load later
//! but may never request: unchosen responsive-image candidates, lazy-load
//! `data-src` values and `@media`-gated CSS backgrounds.
//!
//! # Modules
//!
//! - `protocol`: Coordinator to worker messages
//! - `coordinator`: Document-side batching and forwarding
//! - `resolve`: Candidate URL fix-up
//! - `worker`: Deduplicated queues with bounded, cooled-down drains

pub mod coordinator;
pub mod protocol;
pub mod resolve;
pub mod worker;

pub use coordinator::{Coordinator, ForwardToTop, WorkerPort};
pub use protocol::{Values, WorkerInit, WorkerMessage};
pub use resolve::Resolver;
pub use worker::{AutoFetchConfig, AutoFetchWorker, DrainLimits, DrainReport, FetchError, Fetcher, QueueKind, Timer};
