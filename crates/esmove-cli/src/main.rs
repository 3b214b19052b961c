//! esmove-cli — flag parsing, logging setup and a summary table around the
//! library pipeline. Everything interesting happens in `esmove::run`.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use esmove::MigrationReport;
use esmove::app_config::{
    AppConfig, EsSinkConfig, EsSourceConfig, FileSinkConfig, FileSourceConfig, LifecycleConfig,
    RuntimeConfig, SinkConfig, SourceConfig,
};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "esmove",
    version,
    about = "Migrate documents between Elasticsearch clusters or dump files"
)]
struct Cli {
    /// TOML config file (plus ESMOVE_* env vars); replaces the endpoint flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Source cluster base URL
    #[arg(long = "source_es")]
    source_es: Option<String>,
    /// Target cluster base URL
    #[arg(long = "target_es")]
    target_es: Option<String>,
    /// Basic auth for the source, as user:pass
    #[arg(long = "source_auth")]
    source_auth: Option<String>,
    /// Basic auth for the target, as user:pass
    #[arg(long = "target_auth")]
    target_auth: Option<String>,
    /// HTTP proxy for source requests
    #[arg(long = "source_proxy")]
    source_proxy: Option<String>,
    /// HTTP proxy for target requests
    #[arg(long = "target_proxy")]
    target_proxy: Option<String>,
    /// Source index name or pattern
    #[arg(long = "source_index")]
    source_index: Option<String>,
    /// Target index name; renames a single source index
    #[arg(long = "target_index")]
    target_index: Option<String>,
    /// Copy every non-system index
    #[arg(long = "all")]
    all: bool,
    /// Query DSL JSON applied to the source scroll, verbatim
    #[arg(long = "query")]
    query: Option<String>,
    /// Comma-separated _source field projection
    #[arg(long = "fields")]
    fields: Option<String>,
    /// Scroll keep-alive window
    #[arg(long = "scroll_time", default_value = "1m")]
    scroll_time: String,
    /// Documents per shard per scroll request
    #[arg(long = "docs_per_req", default_value_t = 1000)]
    docs_per_req: usize,
    /// Parallel scroll slices
    #[arg(long = "sliced_scroll_size", default_value_t = 1)]
    sliced_scroll_size: usize,
    /// Bulk consumer count
    #[arg(long = "workers", default_value_t = 1)]
    workers: usize,
    /// Copy index settings onto the target
    #[arg(long = "copy_settings")]
    copy_settings: bool,
    /// Copy index mappings onto the target (same major version only)
    #[arg(long = "copy_mappings")]
    copy_mappings: bool,
    /// Override number_of_shards when creating target indices
    #[arg(long = "shards")]
    shards: Option<u32>,
    /// Drop an existing target index before creating it fresh
    #[arg(long = "recreate_index")]
    recreate_index: bool,
    /// Issue an explicit refresh per index after the migration
    #[arg(long = "refresh")]
    refresh: bool,
    /// Require green cluster health before starting
    #[arg(long = "wait_for_green")]
    wait_for_green: bool,
    /// Read from a newline-delimited dump file instead of a cluster
    #[arg(long = "dump_in")]
    dump_in: Option<String>,
    /// Write to a newline-delimited dump file instead of a cluster
    #[arg(long = "dump_out")]
    dump_out: Option<String>,
    /// Log level (trace|debug|info|warn|error)
    #[arg(long = "log", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match execute(&cli).await {
        Ok(report) => {
            print_summary(&report);
            // per-document rejects are warnings, not a failed run
            ExitCode::SUCCESS
        }
        Err(error) => {
            report_failure(&error);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: &Cli) -> Result<MigrationReport> {
    let config = build_config(cli)?;
    esmove::run(config).await
}

fn build_config(cli: &Cli) -> Result<AppConfig> {
    if let Some(path) = &cli.config {
        return esmove::app_config::load_config(Some(path));
    }

    let source_config = match (&cli.source_es, &cli.dump_in) {
        (Some(url), _) => {
            let (username, password) = split_auth(cli.source_auth.as_deref());
            SourceConfig::Elasticsearch(EsSourceConfig {
                url: url.clone(),
                username,
                password,
                api_key: None,
                proxy: cli.source_proxy.clone(),
                index: cli.source_index.clone().unwrap_or_else(|| "_all".to_owned()),
                copy_all: cli.all,
                query: cli
                    .query
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .context("--query is not valid JSON")?,
                fields: cli.fields.as_deref().map(|fields| {
                    fields.split(',').map(|f| f.trim().to_owned()).collect()
                }),
                scroll_time: cli.scroll_time.clone(),
                batch_size: cli.docs_per_req,
                slices: cli.sliced_scroll_size,
                timeout: None,
            })
        }
        (None, Some(path)) => SourceConfig::File(FileSourceConfig { path: path.clone() }),
        (None, None) => bail!("no input: provide --source_es or --dump_in (see --help)"),
    };

    let sink_config = match (&cli.target_es, &cli.dump_out) {
        (Some(url), _) => {
            let (username, password) = split_auth(cli.target_auth.as_deref());
            SinkConfig::Elasticsearch(EsSinkConfig {
                url: url.clone(),
                username,
                password,
                api_key: None,
                proxy: cli.target_proxy.clone(),
                index: cli.target_index.clone(),
                bulk_docs: cli.docs_per_req,
                bulk_bytes: 10 * 1024 * 1024,
                idle_flush: "1s".to_owned(),
                timeout: None,
            })
        }
        (None, Some(path)) => SinkConfig::File(FileSinkConfig { path: path.clone() }),
        (None, None) => bail!("no output: provide --target_es or --dump_out (see --help)"),
    };

    Ok(AppConfig {
        source_config,
        sink_config,
        runtime: RuntimeConfig {
            queue_capacity: None,
            workers: cli.workers,
            wait_for_green: cli.wait_for_green,
        },
        lifecycle: LifecycleConfig {
            copy_settings: cli.copy_settings,
            copy_mappings: cli.copy_mappings,
            recreate_index: cli.recreate_index,
            refresh: cli.refresh,
            shards: cli.shards,
        },
    })
}

fn split_auth(auth: Option<&str>) -> (Option<String>, Option<String>) {
    match auth {
        Some(pair) => match pair.split_once(':') {
            Some((user, pass)) => (Some(user.to_owned()), Some(pass.to_owned())),
            None => (Some(pair.to_owned()), None),
        },
        None => (None, None),
    }
}

fn print_summary(report: &MigrationReport) {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    let mut row = |label: &str, value: String| {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    };
    row("documents read", report.read.to_string());
    row("documents written", report.written.to_string());
    row("documents failed", report.failed.to_string());
    if report.failed_slices > 0 {
        row("slices failed to open", report.failed_slices.to_string());
    }
    row("elapsed", format!("{:.1?}", report.elapsed));
    println!("{table}");

    if report.failed > 0 {
        warn!("{} document(s) were rejected by the target; see the log above", report.failed);
    }
}

fn report_failure(error: &anyhow::Error) {
    error!("{error}");
    let mut connection_trouble = false;
    for cause in error.chain().skip(1) {
        error!("caused by: {cause}");
        let text = cause.to_string();
        if text.contains("error sending request")
            || text.contains("onnection refused")
            || text.contains("tcp connect error")
            || text.contains("dns error")
        {
            connection_trouble = true;
        }
    }
    if connection_trouble {
        error!("hint: a cluster looks unreachable; double-check the URL and that the service is up");
    }
}
