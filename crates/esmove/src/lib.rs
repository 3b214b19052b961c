//! esmove — streaming document migration between Elasticsearch clusters,
//! or between a cluster and a newline-delimited dump file.
//!
//! The shape of a run: sliced-scroll producers fan out into one bounded
//! queue, bulk consumers fan in on the other side, and an index-lifecycle
//! pass tunes the target for ingest before the first document moves and
//! puts it back afterwards, whatever happened in between. Versions 0/1/2,
//! 5/6 and 7+ of the REST dialect are bound once at startup by probing each
//! endpoint.

pub mod app_config;
pub(crate) mod backends;
pub(crate) mod common;
pub(crate) mod es;
pub(crate) mod lifecycle;
pub(crate) mod progress;
mod supervisors;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::app_config::{AppConfig, SinkConfig, SourceConfig};
use crate::backends::{
    ElasticsearchSink, FileSink, FileSource, SinkBackend, SourceBackend, open_slices,
};
use crate::common::{HealthStatus, parse_time_value};
use crate::es::{EsApi, EsApiBackend, ScrollRequest};
use crate::lifecycle::IndexLifecycle;
use crate::progress::PipelineStats;
use crate::supervisors::{FlushPolicy, Supervisor};

const HEALTH_POLL: Duration = Duration::from_secs(3);
const FILE_READ_BATCH: usize = 1000;

/// Final accounting for one migration run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationReport {
    pub read: u64,
    pub written: u64,
    pub failed: u64,
    /// Scroll slices that never opened; their documents were not read.
    pub failed_slices: usize,
    pub elapsed: Duration,
}

/// Runs one migration end to end. Fatal refusals happen before any worker
/// starts; once the pipeline is moving, individual failures only surface as
/// warnings and counters.
pub async fn run(config: AppConfig) -> Result<MigrationReport> {
    let started = Instant::now();
    let config = config.normalized();
    config.validate()?;

    // probe both endpoints once; the version binds the dialect for good
    let source_es = match &config.source_config {
        SourceConfig::Elasticsearch(cfg) => {
            let (api, version) = es::connect(cfg.endpoint()?)
                .await
                .context("cannot reach the source cluster")?;
            info!("source cluster {} speaks {version}", cfg.url);
            Some((api, version))
        }
        SourceConfig::File(_) => None,
    };
    let target_es = match &config.sink_config {
        SinkConfig::Elasticsearch(cfg) => {
            let (api, version) = es::connect(cfg.endpoint()?)
                .await
                .context("cannot reach the target cluster")?;
            info!("target cluster {} speaks {version}", cfg.url);
            Some((api, version))
        }
        SinkConfig::File(_) => None,
    };

    // mappings are dialect-specific; a cross-major copy would corrupt them
    if config.lifecycle.copy_mappings {
        if let (Some((_, source)), Some((_, target))) = (&source_es, &target_es) {
            if source.major != target.major {
                bail!(
                    "{source} => {target}: cross-major mapping migration unavailable, migrate mappings by hand"
                );
            }
        }
    }

    let mut gated = Vec::new();
    if let Some((api, _)) = &source_es {
        gated.push(api);
    }
    if let Some((api, _)) = &target_es {
        gated.push(api);
    }
    health_gate(&gated, config.runtime.wait_for_green).await;

    // open the source before touching the target, so an empty source aborts
    // with the target untouched and no restore owed
    let (sources, read_total, failed_slices, read_prefix) = match &config.source_config {
        SourceConfig::Elasticsearch(cfg) => {
            let (api, _) = source_es.as_ref().context("source API not connected")?;
            let mut slices = cfg.slices;
            if slices > 1 && !api.supports_slices() {
                warn!("sliced scroll needs a 5.x-or-newer source; using a single scroll");
                slices = 1;
            }
            let request = ScrollRequest {
                indices: cfg.index.clone(),
                keep_alive: cfg.scroll_time.clone(),
                batch_size: cfg.batch_size,
                query: cfg.query.clone(),
                fields: cfg.fields.clone(),
            };
            let (slice_sources, total, failed) = open_slices(api, &request, slices).await?;
            if total == 0 {
                bail!("source is empty: no documents matched in '{}'", cfg.index);
            }
            info!("{total} documents to migrate across {} slice(s)", slice_sources.len());
            let sources = slice_sources
                .into_iter()
                .map(SourceBackend::Elasticsearch)
                .collect();
            (sources, total, failed, "Scroll")
        }
        SourceConfig::File(cfg) => {
            let source = FileSource::open(&cfg.path, FILE_READ_BATCH).await?;
            let total = source.lines_total();
            info!("{total} dump lines to import from '{}'", cfg.path);
            (vec![SourceBackend::File(source)], total, 0, "Read")
        }
    };

    let (sinks, flush, write_prefix) = match &config.sink_config {
        SinkConfig::Elasticsearch(cfg) => {
            let (api, _) = target_es.as_ref().context("target API not connected")?;
            // a rename is only well-defined when exactly one source index
            // resolved; a pattern or comma-list source keeps its own names
            // on the write path, same guard the lifecycle applies to settings
            let index_override = match (&cfg.index, &config.source_config) {
                (Some(target), SourceConfig::Elasticsearch(source_cfg)) => {
                    let (source_api, _) =
                        source_es.as_ref().context("source API not connected")?;
                    let (names, _) = source_api
                        .get_mappings(source_cfg.copy_all, &source_cfg.index)
                        .await
                        .context("failed to resolve source indices for the target rename")?;
                    if names.len() == 1 {
                        Some(target.clone())
                    } else {
                        warn!(
                            "target index rename requested but the source matched {} indices; documents keep their source index names",
                            names.len()
                        );
                        None
                    }
                }
                (Some(target), SourceConfig::File(_)) => Some(target.clone()),
                (None, _) => None,
            };
            let sinks = (0..config.runtime.workers)
                .map(|_| {
                    SinkBackend::Elasticsearch(ElasticsearchSink::new(
                        api.clone(),
                        index_override.clone(),
                    ))
                })
                .collect();
            let flush = FlushPolicy {
                max_docs: cfg.bulk_docs,
                max_bytes: cfg.bulk_bytes,
                idle: parse_time_value(&cfg.idle_flush)?,
            };
            (sinks, flush, "Bulk")
        }
        SinkConfig::File(cfg) => {
            // one writer per dump file; parallel appends would interleave
            let sink = FileSink::create(&cfg.path).await?;
            let flush = FlushPolicy {
                max_docs: 1000,
                max_bytes: 10 * 1024 * 1024,
                idle: Duration::from_secs(1),
            };
            (vec![SinkBackend::File(sink)], flush, "Write")
        }
    };

    // the settings/mappings pre-phase only makes sense cluster-to-cluster
    let mut lifecycle_ctl = None;
    if let (
        SourceConfig::Elasticsearch(source_cfg),
        SinkConfig::Elasticsearch(sink_cfg),
        Some((source_api, _)),
        Some((target_api, _)),
    ) = (
        &config.source_config,
        &config.sink_config,
        &source_es,
        &target_es,
    ) {
        let mut ctl = IndexLifecycle::new(target_api.clone(), config.lifecycle.clone());
        if let Err(error) = ctl
            .prepare(
                source_api,
                source_cfg.copy_all,
                &source_cfg.index,
                sink_cfg.index.as_deref(),
            )
            .await
        {
            // restore whatever the memo captured before bailing
            ctl.restore().await;
            return Err(error);
        }
        lifecycle_ctl = Some(ctl);
    } else if target_es.is_some() {
        debug!("file-fed target: skipping the settings/mappings pre-phase");
    }

    let workers = sinks.len();
    let batch_size = match &config.source_config {
        SourceConfig::Elasticsearch(cfg) => cfg.batch_size,
        SourceConfig::File(_) => FILE_READ_BATCH,
    };
    // roughly ten batches in flight per worker before producers block
    let queue_capacity = config
        .runtime
        .queue_capacity
        .unwrap_or(batch_size * workers * 10)
        .max(1);

    let stats = Arc::new(PipelineStats::default());
    let observer = progress::spawn_observer(stats.clone(), read_total, read_prefix, write_prefix);

    info!("starting data migration");
    let outcome = Supervisor::new(queue_capacity, flush)
        .start(sources, sinks, stats.clone())
        .await;

    // the post-phase runs on every exit path once prepare was entered
    if let Some(ctl) = &lifecycle_ctl {
        ctl.restore().await;
    }
    observer.finish(&stats).await;
    outcome?;

    let report = MigrationReport {
        read: stats.read(),
        written: stats.written(),
        failed: stats.failed(),
        failed_slices,
        elapsed: started.elapsed(),
    };
    info!(
        "data migration finished: {} read, {} written, {} failed in {:.1?}",
        report.read, report.written, report.failed, report.elapsed
    );
    if report.failed_slices > 0 {
        warn!(
            "{} scroll slice(s) never opened; the run is incomplete",
            report.failed_slices
        );
    }
    Ok(report)
}

/// Polls both clusters every three seconds until neither blocks the run.
/// Red always blocks; with `wait_for_green`, anything short of green does.
/// The operator cancels externally if the cluster never comes back.
async fn health_gate(apis: &[&EsApiBackend], wait_for_green: bool) {
    loop {
        let mut ready = true;
        for api in apis {
            match api.cluster_health().await {
                Ok(health) => {
                    if !cluster_ready(health.status, wait_for_green) {
                        info!("cluster '{}' is {}; delaying migration", health.name, health.status);
                        ready = false;
                    }
                }
                Err(error) => {
                    warn!("health probe failed: {error:#}");
                    ready = false;
                }
            }
        }
        if ready {
            return;
        }
        tokio::time::sleep(HEALTH_POLL).await;
    }
}

fn cluster_ready(status: HealthStatus, wait_for_green: bool) -> bool {
    match status {
        HealthStatus::Red => false,
        HealthStatus::Green => true,
        _ => !wait_for_green,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{
        EsSinkConfig, EsSourceConfig, FileSinkConfig, FileSourceConfig, LifecycleConfig,
        RuntimeConfig,
    };
    use wiremock::matchers::{body_string_contains, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn red_blocks_and_yellow_depends_on_the_flag() {
        assert!(!cluster_ready(HealthStatus::Red, false));
        assert!(!cluster_ready(HealthStatus::Red, true));
        assert!(cluster_ready(HealthStatus::Yellow, false));
        assert!(!cluster_ready(HealthStatus::Yellow, true));
        assert!(cluster_ready(HealthStatus::Green, false));
        assert!(cluster_ready(HealthStatus::Green, true));
    }

    fn es_source(url: &str, index: &str) -> SourceConfig {
        SourceConfig::Elasticsearch(EsSourceConfig {
            url: url.to_owned(),
            username: None,
            password: None,
            api_key: None,
            proxy: None,
            index: index.to_owned(),
            copy_all: false,
            query: None,
            fields: None,
            scroll_time: "1m".to_owned(),
            batch_size: 1000,
            slices: 1,
            timeout: None,
        })
    }

    fn es_sink(url: &str) -> SinkConfig {
        SinkConfig::Elasticsearch(EsSinkConfig {
            url: url.to_owned(),
            username: None,
            password: None,
            api_key: None,
            proxy: None,
            index: None,
            bulk_docs: 1000,
            bulk_bytes: 10 * 1024 * 1024,
            idle_flush: "1s".to_owned(),
            timeout: None,
        })
    }

    fn config(source: SourceConfig, sink: SinkConfig) -> AppConfig {
        AppConfig {
            source_config: source,
            sink_config: sink,
            runtime: RuntimeConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }

    async fn mount_probe(server: &MockServer, number: &str) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": { "number": number }
            })))
            .mount(server)
            .await;
    }

    async fn mount_health(server: &MockServer, status: &str) {
        Mock::given(method("GET"))
            .and(path("/_cluster/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cluster_name": "mock",
                "status": status
            })))
            .mount(server)
            .await;
    }

    fn scroll_page(scroll_id: &str, total: u64, ids: std::ops::Range<u32>) -> serde_json::Value {
        let hits: Vec<serde_json::Value> = ids
            .map(|id| {
                serde_json::json!({
                    "_index": "logs",
                    "_id": id.to_string(),
                    "_source": { "n": id }
                })
            })
            .collect();
        serde_json::json!({
            "_scroll_id": scroll_id,
            "hits": { "total": { "value": total, "relation": "eq" }, "hits": hits }
        })
    }

    /// Mounts a three-page scroll: 2 docs, 1 doc, then the empty page.
    async fn mount_scroll(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scroll_page("s1", 3, 0..2)))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_search/scroll"))
            .and(body_string_contains("s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scroll_page("s2", 3, 2..3)))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_search/scroll"))
            .and(body_string_contains("s2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scroll_page("s3", 3, 0..0)))
            .mount(server)
            .await;
    }

    async fn mount_source_metadata(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/logs/_mapping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "logs": { "mappings": { "properties": { "n": { "type": "long" } } } }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/logs/_settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "logs": { "settings": { "index": { "refresh_interval": "5s" } } }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn the_one_where_three_documents_cross_clusters() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;

        mount_probe(&source, "7.10.2").await;
        mount_health(&source, "green").await;
        mount_scroll(&source).await;
        mount_source_metadata(&source).await;

        mount_probe(&target, "7.17.9").await;
        mount_health(&target, "green").await;
        Mock::given(method("GET"))
            .and(path("/logs/_settings"))
            .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
            .mount(&target)
            .await;
        Mock::given(method("PUT"))
            .and(path("/logs"))
            .and(body_string_contains(r#""refresh_interval":-1"#))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"acknowledged":true}"#))
            .expect(1)
            .mount(&target)
            .await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "took": 3,
                "errors": false,
                "items": [
                    {"index": {"_id": "0", "status": 201}},
                    {"index": {"_id": "1", "status": 201}},
                    {"index": {"_id": "2", "status": 201}}
                ]
            })))
            .expect(1)
            .mount(&target)
            .await;
        // post-phase restore of the original refresh cadence
        Mock::given(method("PUT"))
            .and(path("/logs/_settings"))
            .and(body_string_contains(r#""refresh_interval":"5s""#))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"acknowledged":true}"#))
            .expect(1)
            .mount(&target)
            .await;

        let report = run(config(es_source(&source.uri(), "logs"), es_sink(&target.uri())))
            .await
            .unwrap();

        assert_eq!(report.read, 3);
        assert_eq!(report.written, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.failed_slices, 0);
    }

    #[tokio::test]
    async fn the_one_where_an_empty_source_stops_everything() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;

        mount_probe(&source, "7.10.2").await;
        mount_health(&source, "green").await;
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scroll_page("s1", 0, 0..0)))
            .mount(&source)
            .await;

        mount_probe(&target, "7.10.2").await;
        mount_health(&target, "green").await;

        let error = run(config(es_source(&source.uri(), "logs"), es_sink(&target.uri())))
            .await
            .unwrap_err();
        assert!(format!("{error}").contains("source is empty"), "got: {error}");

        // the target saw only its probe and health check; no settings were
        // touched, so there is nothing for a post-phase to restore
        let touched: Vec<String> = target
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| format!("{} {}", r.method, r.url.path()))
            .collect();
        assert_eq!(touched, vec!["GET /".to_owned(), "GET /_cluster/health".to_owned()]);
    }

    #[tokio::test]
    async fn the_one_where_cross_major_mappings_are_refused() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        mount_probe(&source, "5.6.16").await;
        mount_probe(&target, "7.10.2").await;

        let mut cfg = config(es_source(&source.uri(), "logs"), es_sink(&target.uri()));
        cfg.lifecycle.copy_mappings = true;

        let error = run(cfg).await.unwrap_err();
        assert!(
            format!("{error}").contains("cross-major mapping migration unavailable"),
            "got: {error}"
        );

        // refusal happens straight after the probes
        for server in [&source, &target] {
            let requests = server.received_requests().await.unwrap();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].url.path(), "/");
        }
    }

    #[tokio::test]
    async fn identical_source_and_target_never_reach_the_network() {
        let cfg = config(
            es_source("http://same:9200", "logs"),
            es_sink("http://same:9200"),
        );
        let error = run(cfg).await.unwrap_err();
        assert!(format!("{error}").contains("refusing to copy onto itself"));
    }

    #[tokio::test]
    async fn the_one_where_a_multi_index_rename_keeps_source_names() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;

        mount_probe(&source, "7.10.2").await;
        mount_health(&source, "green").await;
        // a comma-list source pattern resolves to two concrete indices
        Mock::given(method("POST"))
            .and(path("/logs-a,logs-b/_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_scroll_id": "s1",
                "hits": { "total": { "value": 3, "relation": "eq" }, "hits": [
                    {"_index": "logs-a", "_id": "1", "_source": {"n": 1}},
                    {"_index": "logs-a", "_id": "2", "_source": {"n": 2}},
                    {"_index": "logs-b", "_id": "3", "_source": {"n": 3}}
                ]}
            })))
            .mount(&source)
            .await;
        Mock::given(method("POST"))
            .and(path("/_search/scroll"))
            .and(body_string_contains("s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_scroll_id": "s2",
                "hits": { "total": { "value": 3, "relation": "eq" }, "hits": [] }
            })))
            .mount(&source)
            .await;
        Mock::given(method("GET"))
            .and(path("/logs-a,logs-b/_mapping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "logs-a": { "mappings": { "properties": { "n": { "type": "long" } } } },
                "logs-b": { "mappings": { "properties": { "n": { "type": "long" } } } }
            })))
            .mount(&source)
            .await;
        Mock::given(method("GET"))
            .and(path("/logs-a,logs-b/_settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "logs-a": { "settings": { "index": { "refresh_interval": "1s" } } },
                "logs-b": { "settings": { "index": { "refresh_interval": "1s" } } }
            })))
            .mount(&source)
            .await;

        mount_probe(&target, "7.10.2").await;
        mount_health(&target, "green").await;
        Mock::given(method("GET"))
            .and(path_regex("^/logs-(a|b)/_settings$"))
            .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
            .mount(&target)
            .await;
        // index creates and the post-phase restores
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"acknowledged":true}"#))
            .mount(&target)
            .await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "took": 1,
                "errors": false,
                "items": [
                    {"index": {"_id": "1", "status": 201}},
                    {"index": {"_id": "2", "status": 201}},
                    {"index": {"_id": "3", "status": 201}}
                ]
            })))
            .expect(1)
            .mount(&target)
            .await;

        let mut cfg = config(
            es_source(&source.uri(), "logs-a,logs-b"),
            es_sink(&target.uri()),
        );
        let SinkConfig::Elasticsearch(sink) = &mut cfg.sink_config else {
            panic!("expected an Elasticsearch sink");
        };
        sink.index = Some("merged".to_owned());

        let report = run(cfg).await.unwrap();
        assert_eq!(report.read, 3);
        assert_eq!(report.written, 3);

        // the rename does not apply: two indices resolved, so every action
        // line keeps its document's own source index
        let requests = target.received_requests().await.unwrap();
        let bulk = requests
            .iter()
            .find(|r| r.url.path() == "/_bulk")
            .expect("bulk request");
        let body = String::from_utf8_lossy(&bulk.body);
        assert!(body.contains(r#""_index":"logs-a""#), "got: {body}");
        assert!(body.contains(r#""_index":"logs-b""#), "got: {body}");
        assert!(!body.contains("merged"), "got: {body}");
    }

    #[tokio::test]
    async fn the_one_where_a_dump_file_round_trips() {
        // leg one: cluster -> dump file
        let source = MockServer::start().await;
        mount_probe(&source, "7.10.2").await;
        mount_health(&source, "green").await;
        mount_scroll(&source).await;

        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("logs.ndjson").to_string_lossy().into_owned();

        let report = run(config(
            es_source(&source.uri(), "logs"),
            SinkConfig::File(FileSinkConfig { path: dump_path.clone() }),
        ))
        .await
        .unwrap();
        assert_eq!(report.written, 3);

        // leg two: dump file -> cluster
        let target = MockServer::start().await;
        mount_probe(&target, "7.10.2").await;
        mount_health(&target, "green").await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(body_string_contains(r#"{"index":{"_id":"0","_index":"logs"}}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "took": 1,
                "errors": false,
                "items": [
                    {"index": {"_id": "0", "status": 201}},
                    {"index": {"_id": "1", "status": 201}},
                    {"index": {"_id": "2", "status": 201}}
                ]
            })))
            .expect(1)
            .mount(&target)
            .await;

        let report = run(config(
            SourceConfig::File(FileSourceConfig { path: dump_path }),
            es_sink(&target.uri()),
        ))
        .await
        .unwrap();
        assert_eq!(report.read, 3);
        assert_eq!(report.written, 3);
    }
}
