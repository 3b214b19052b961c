//! Application configuration: figment-loaded, serde-defaulted, validated
//! once and handed to the pipeline by value. Workers never see it change.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use serde_json::Value;

use crate::common::parse_time_value;
use crate::es::client::EsEndpoint;

/// Knobs for the coordinator itself.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Overrides the computed queue capacity (batch size x workers x 10).
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Bulk consumer count. File sinks always run a single writer.
    #[serde(default = "default_workers", alias = "sink_parallelism")]
    pub workers: usize,
    /// Require green cluster health instead of settling for yellow.
    #[serde(default)]
    pub wait_for_green: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            workers: default_workers(),
            wait_for_green: false,
        }
    }
}

fn default_workers() -> usize {
    1
}

/// Pre/post phase toggles for the index lifecycle controller.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub copy_settings: bool,
    #[serde(default)]
    pub copy_mappings: bool,
    /// Drop an existing target index before creating it fresh.
    #[serde(default)]
    pub recreate_index: bool,
    /// Issue an explicit refresh per index in the post-phase.
    #[serde(default)]
    pub refresh: bool,
    /// Overrides number_of_shards when creating target indices.
    #[serde(default)]
    pub shards: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub enum SourceConfig {
    /// Scroll-read from a cluster.
    Elasticsearch(EsSourceConfig),
    /// Stream a newline-delimited dump file.
    File(FileSourceConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub enum SinkConfig {
    /// Bulk-write into a cluster.
    Elasticsearch(EsSinkConfig),
    /// Append a newline-delimited dump file.
    File(FileSinkConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct EsSourceConfig {
    /// Base URL including scheme and port.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Index name or pattern; `_all` plus `copy_all` migrates everything.
    #[serde(default = "default_index_pattern")]
    pub index: String,
    /// Expand the pattern to every non-system index.
    #[serde(default)]
    pub copy_all: bool,
    /// Query DSL passed through verbatim.
    #[serde(default)]
    pub query: Option<Value>,
    /// `_source` projection.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Server-side scroll keep-alive window.
    #[serde(default = "default_scroll_time")]
    pub scroll_time: String,
    /// Documents per shard per scroll page.
    #[serde(default = "default_batch_size", alias = "docs_per_req")]
    pub batch_size: usize,
    /// Parallel scroll slices; ignored by pre-5 sources.
    #[serde(default = "default_slices", alias = "sliced_scroll_size")]
    pub slices: usize,
    /// Per-request timeout; defaults to the scroll keep-alive.
    #[serde(default)]
    pub timeout: Option<String>,
}

fn default_index_pattern() -> String {
    "_all".to_owned()
}

fn default_scroll_time() -> String {
    "1m".to_owned()
}

fn default_batch_size() -> usize {
    1000
}

fn default_slices() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EsSinkConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Target index name; with a single source index this renames it.
    #[serde(default)]
    pub index: Option<String>,
    /// Flush when a worker has buffered this many documents...
    #[serde(default = "default_bulk_docs")]
    pub bulk_docs: usize,
    /// ...or this many payload bytes, whichever happens first.
    #[serde(default = "default_bulk_bytes")]
    pub bulk_bytes: usize,
    /// Flush even a partial buffer after this much queue silence.
    #[serde(default = "default_idle_flush")]
    pub idle_flush: String,
    /// Per-request timeout.
    #[serde(default)]
    pub timeout: Option<String>,
}

fn default_bulk_docs() -> usize {
    1000
}

fn default_bulk_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_idle_flush() -> String {
    "1s".to_owned()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileSinkConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source_config: SourceConfig,
    pub sink_config: SinkConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl EsSourceConfig {
    pub(crate) fn endpoint(&self) -> Result<EsEndpoint> {
        // requests should survive at least as long as the scroll window
        let timeout = match &self.timeout {
            Some(value) => parse_time_value(value)?,
            None => parse_time_value(&self.scroll_time).unwrap_or(Duration::from_secs(60)),
        };
        Ok(EsEndpoint {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            api_key: self.api_key.clone(),
            proxy: self.proxy.clone(),
            timeout,
        })
    }
}

impl EsSinkConfig {
    pub(crate) fn endpoint(&self) -> Result<EsEndpoint> {
        let timeout = match &self.timeout {
            Some(value) => parse_time_value(value)?,
            None => Duration::from_secs(60),
        };
        Ok(EsEndpoint {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            api_key: self.api_key.clone(),
            proxy: self.proxy.clone(),
            timeout,
        })
    }
}

impl AppConfig {
    /// Boundary normalizations: zero never means "none" here.
    pub fn normalized(mut self) -> Self {
        if let SourceConfig::Elasticsearch(es) = &mut self.source_config {
            if es.slices == 0 {
                es.slices = 1;
            }
            if es.batch_size == 0 {
                es.batch_size = default_batch_size();
            }
        }
        if self.runtime.workers == 0 {
            self.runtime.workers = 1;
        }
        self
    }

    /// Fatal refusals, checked before any migration work starts.
    pub fn validate(&self) -> Result<()> {
        if let (SourceConfig::Elasticsearch(source), SinkConfig::Elasticsearch(sink)) =
            (&self.source_config, &self.sink_config)
        {
            let same_host = source.url.trim_end_matches('/') == sink.url.trim_end_matches('/');
            let same_index = sink
                .index
                .as_deref()
                .is_none_or(|target| target == source.index);
            if same_host && same_index {
                bail!("source and target are the same cluster and index; refusing to copy onto itself");
            }
        }
        if let SourceConfig::Elasticsearch(source) = &self.source_config {
            parse_time_value(&source.scroll_time)
                .context("invalid scroll_time in source config")?;
        }
        if let SinkConfig::Elasticsearch(sink) = &self.sink_config {
            parse_time_value(&sink.idle_flush).context("invalid idle_flush in sink config")?;
        }
        Ok(())
    }
}

/// Loads configuration from `ESMOVE_*` environment variables merged with an
/// optional TOML file; the file wins on conflicts.
pub fn load_config(config_file: Option<&Path>) -> Result<AppConfig> {
    let figment = Figment::new().merge(Env::prefixed("ESMOVE_"));
    let figment = match config_file {
        Some(path) => figment.merge(Toml::file(path)),
        None => figment,
    };
    let context = match config_file {
        Some(path) => format!(
            "failed to load configuration from '{}' and ESMOVE_* environment variables",
            path.display()
        ),
        None => "failed to load configuration from ESMOVE_* environment variables".to_owned(),
    };
    figment.extract().context(context)
}
