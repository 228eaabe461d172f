//! Live relay: SSRF guard, streaming upstream client, playlist rewriting
//! and the response relay that ties them together.

pub mod playlist;
pub mod relay;
pub mod sink;
pub mod target_validator;
pub mod upstream;

pub use playlist::PlaylistRewriter;
pub use relay::StreamRelay;
pub use sink::{BufferSink, ClientSink, ResponseSink, SinkControl};
pub use target_validator::{HostResolver, ParsedTarget, SystemResolver, TargetKind, TargetValidator};
pub use upstream::{FetchOutcome, FetchRequest, FetchSummary, UpstreamClient};
