//! cronwatch-ingest: turns cron notification envelopes into heartbeats.
//!
//! The subject identifies the job, the resolver finds (or registers) it and
//! a heartbeat is recorded against it.

pub mod extract;
pub mod parser;
pub mod pipeline;
pub mod resolver;

pub use extract::extract_error;
pub use parser::{ParsedSubject, parse_subject};
pub use pipeline::IngestPipeline;
pub use resolver::JobResolver;
