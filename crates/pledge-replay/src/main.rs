//! pledge-replay: run a recorded notification log through a feed view.
//!
//! The view is backed by the in-memory service, seeded from a JSON file.
//! Each log line is delivered on the push channel or the local broadcast
//! after its delay, and the final visible list is printed as JSON on stdout.
//! Logs go to stderr (or `LOG_FILE`), so stdout stays machine-readable.
//!
//! ```text
//! {"channel":"push","after_ms":0,"notification":{"eventType":"INSERT","table":"contributions","new":{...}}}
//! {"channel":"local","after_ms":20,"notification":{"action":"ENTITY_ADDED","entity":{...}}}
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pledge_feed::{
    Channel, Entity, EntityKind, FeedConfig, FeedScope, FeedView, FetchPage, LoadState,
    LocalBroadcast, MemoryEntityService,
};

/// Upper bound on waiting for the bulk load after the log is exhausted.
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "pledge-replay")]
#[command(author, version, about = "Replay notification logs through a pledgewall feed view")]
struct Cli {
    /// Which list the view renders
    #[arg(short, long, value_enum, default_value_t = KindArg::Contribution)]
    kind: KindArg,

    /// JSON file with the entities the bulk load returns (array or {"items": [...]})
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// JSONL notification log
    #[arg(short, long)]
    events: PathBuf,

    /// Scope (project) id
    #[arg(long, default_value = "replay")]
    scope: String,

    /// Bulk load size (default: PLEDGE_FEED_BULK_LIMIT or 50)
    #[arg(short, long)]
    limit: Option<usize>,

    /// Simulated bulk fetch latency, so log lines can race the load
    #[arg(long, default_value_t = 0)]
    fetch_latency_ms: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Contribution,
    SupportMessage,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Contribution => EntityKind::Contribution,
            KindArg::SupportMessage => EntityKind::SupportMessage,
        }
    }
}

/// One recorded delivery.
#[derive(Debug, Deserialize)]
struct LogLine {
    channel: Channel,
    /// Delay since the previous line.
    #[serde(default)]
    after_ms: u64,
    notification: JsonValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    List(Vec<Entity>),
    Page(FetchPage),
}

/// Parse a JSONL log. Blank lines and `#` comments are skipped.
fn parse_log(text: &str) -> anyhow::Result<Vec<LogLine>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("log line {}", index + 1))
        })
        .collect()
}

fn parse_seed(text: &str, kind: EntityKind) -> anyhow::Result<Vec<Entity>> {
    let items = match serde_json::from_str::<SeedFile>(text).context("seed file")? {
        SeedFile::List(items) => items,
        SeedFile::Page(page) => page.items,
    };
    if let Some(other) = items.iter().find(|e| e.kind() != kind) {
        bail!("seed entity {} is a {}, expected {}", other.id, other.kind(), kind);
    }
    Ok(items)
}

async fn read(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "pledge_feed=info,pledge_replay=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pledge_feed=info,pledge_replay=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("pledge-replay.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // stdout carries the snapshot
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    let kind = EntityKind::from(cli.kind);
    let seed = match &cli.seed {
        Some(path) => parse_seed(&read(path).await?, kind)?,
        None => Vec::new(),
    };
    let log = parse_log(&read(&cli.events).await?)?;

    let mut config = FeedConfig::from_env(kind);
    if let Some(limit) = cli.limit {
        config = config.with_bulk_limit(limit);
    }
    let settle = config.debounce() + Duration::from_millis(10);

    let service = Arc::new(
        MemoryEntityService::new()
            .with_fetch_latency(cli.fetch_latency_ms)
            .with_entities(cli.scope.clone(), seed),
    );
    let bus = LocalBroadcast::default();
    let scope = FeedScope::new(cli.scope.clone(), kind);
    let mut handle = FeedView::mount(config, scope.clone(), service.clone(), &bus)?;

    // The view subscribes before it starts loading.
    handle
        .wait_for(|s| s.load_state != LoadState::NotStarted || s.last_error.is_some())
        .await?;

    info!(
        subsystem = "replay",
        scope_id = %scope.scope_id,
        entity_kind = %kind,
        item_count = log.len(),
        "Replaying notification log"
    );
    for line in log {
        if line.after_ms > 0 {
            sleep(Duration::from_millis(line.after_ms)).await;
        }
        let delivered = match line.channel {
            Channel::Push => service.push_raw(&scope.scope_id, line.notification),
            Channel::Local => bus.publish(line.notification),
        };
        if delivered == 0 {
            warn!(subsystem = "replay", channel = %line.channel, "No listener for notification");
        }
    }
    sleep(settle).await;

    let snapshot = timeout(
        LOAD_TIMEOUT,
        handle.wait_for(|s| s.load_state == LoadState::Loaded),
    )
    .await
    .context("timed out waiting for the bulk load")??;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    handle.unmount().await?;
    Ok(())
}
