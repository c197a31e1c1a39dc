//! Per-key sequencing of filesystem items.
//!
//! Items dropped into a staging inbox are routed into one bucket directory per
//! key. Buckets are drained concurrently, each strictly in arrival order; a
//! failure halts only the bucket it happened in. Empty buckets are reaped.

pub mod admit;
pub mod bucket;
pub mod catalog;
pub mod dispatch;
pub mod drain;
pub mod error;
pub mod extract;
pub mod halt;
pub mod inbox;
pub mod key;
pub mod lease;
pub mod ordering;
pub mod reaper;
pub mod service;
pub mod sink;
pub mod status;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use admit::{Admission, BucketingEngine};
pub use bucket::Bucket;
pub use catalog::CatalogRegistrar;
pub use dispatch::DrainDispatcher;
pub use drain::{DrainOutcome, DrainReport, DrainingEngine, ItemProcessor};
pub use error::{ExtractionError, ProcessingError, SequencerError, SequencerResult};
pub use extract::{KeyExtractor, OaiOreKeyExtractor};
pub use inbox::AdmissionInbox;
pub use key::Key;
pub use reaper::{ReapReport, Reaper};
pub use service::TransferService;
