//! EPG aggregation
//!
//! Single-provider requests are piped straight through. Multi-provider
//! requests fetch every provider into a spill store in parallel, then stream a
//! merged document filtered against the user's active streams.

pub mod allow_set;
pub mod merge;
pub mod orchestrator;
pub mod service;
pub mod spill;

pub use allow_set::{AllowSet, normalize_identifier};
pub use merge::GuideMerge;
pub use orchestrator::GuideFetcher;
pub use service::GuideService;
pub use spill::{SpillSink, SpillStore};
