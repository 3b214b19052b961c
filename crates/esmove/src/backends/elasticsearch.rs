pub(crate) mod elasticsearch_sink;
pub(crate) mod elasticsearch_source;

pub(crate) use self::elasticsearch_sink::ElasticsearchSink;
pub(crate) use self::elasticsearch_source::{ElasticsearchSource, open_slices};
