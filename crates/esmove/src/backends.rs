//! Pipeline backends: where documents come from and where they land.
//!
//! Sources and sinks are deliberately thin. A source turns "the next page of
//! whatever you are" into a batch of [`Doc`](crate::common::Doc)s; a sink
//! turns one batch into I/O and reports what landed. Buffering, flush policy
//! and counting all live in the workers.

pub(crate) mod elasticsearch;
pub(crate) mod file;
pub(crate) mod sink;
pub(crate) mod source;

pub(crate) use self::elasticsearch::{ElasticsearchSink, ElasticsearchSource, open_slices};
pub(crate) use self::file::{FileSink, FileSource};
pub(crate) use self::sink::{BatchReport, Sink, SinkBackend};
pub(crate) use self::source::{Source, SourceBackend};
