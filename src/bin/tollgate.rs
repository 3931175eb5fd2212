//! tollgate: operator CLI
//!
//! Inspect configuration, preview retry schedules, reassemble captured
//! streams and probe the cache store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::LinesStream;
use tollgate::cache::{CacheLayer, CacheMetricsRegistry, KeyValueStore, MemoryStore};
use tollgate::stream::{SseData, StreamChunk, parse_sse_data, reassemble, with_idle_timeout};
use tollgate::version::BuildInfo;
use tollgate::{Config, StreamReassembler};

/// Tollgate operator CLI
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(version = tollgate::version::PKG_VERSION)]
#[command(about = "Inspect and exercise the tollgate retry, stream and cache core")]
struct Args {
    /// Config file (default: ~/.tollgate/config.toml, then /etc/tollgate/config.toml)
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as TOML
    Config,

    /// Print the retry delay schedule for the configured policy
    Backoff {
        /// Server-supplied Retry-After header value to apply
        #[arg(long)]
        retry_after: Option<String>,
    },

    /// Reassemble a captured stream and print content and reasoning as JSON
    Reassemble {
        /// Input file, one fragment per line (or omit to read from stdin)
        input: Option<PathBuf>,
        /// Treat input as server-sent events carrying provider JSON chunks
        #[arg(long)]
        sse: bool,
    },

    /// Probe the configured cache store
    CacheStats {
        /// Key pattern to count
        #[arg(short, long, default_value = "*")]
        pattern: String,
    },

    /// Print detailed version information
    Version {
        /// Emit build metadata as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let load_config = || Config::load(args.config.as_deref());

    match args.command {
        Command::Version { json } => {
            let build = BuildInfo::current();
            if json {
                println!("{}", serde_json::to_string_pretty(&build)?);
            } else {
                println!("tollgate {build}");
                if let Some(built_at) = build.built_at {
                    println!("built {built_at}");
                }
            }
        }

        Command::Config => {
            let config = load_config()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }

        Command::Backoff { retry_after } => {
            let config = load_config()?;
            let policy = config.retry_policy()?;
            let hint = retry_after
                .as_deref()
                .and_then(tollgate::retry::parse_retry_after);
            println!(
                "{} attempt(s), retrying on {:?}",
                policy.max_attempts(),
                policy.retryable_statuses
            );
            for attempt in 0..policy.max_retries {
                let delay = policy.effective_delay(attempt, hint);
                let spread = delay.mul_f64(policy.jitter_factor);
                let low = delay.saturating_sub(spread);
                let high = (delay + spread).min(policy.max_delay);
                println!(
                    "retry {:>2}: {:>8} ms  (jittered {} .. {} ms)",
                    attempt + 1,
                    delay.as_millis(),
                    low.as_millis(),
                    high.as_millis()
                );
            }
        }

        Command::Reassemble { input, sse } => {
            let config = load_config()?;
            let reader: Box<dyn AsyncRead + Unpin> = match input {
                Some(path) => Box::new(tokio::fs::File::open(path).await?),
                None => Box::new(tokio::io::stdin()),
            };
            let mut reassembler = StreamReassembler::new();
            let out = if sse {
                reassemble_sse(&mut reassembler, reader).await?
            } else {
                let lines = LinesStream::new(BufReader::new(reader).lines());
                match config.stream.idle_timeout() {
                    Some(idle) => {
                        reassemble(&mut reassembler, with_idle_timeout(lines, idle)).await
                    }
                    None => reassemble(&mut reassembler, lines).await,
                }
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "content": out.content,
                    "reasoning": out.reasoning,
                    "fragments": reassembler.fragment_count(),
                    "errors": reassembler.errors().len(),
                }))?
            );
            if !reassembler.errors().is_empty() {
                eprintln!("{}", reassembler.error_summary());
            }
        }

        Command::CacheStats { pattern } => {
            let config = load_config()?;
            let store = open_store(&config)?;
            let available = store.is_available().await;
            let layer = CacheLayer::from_settings(
                store.clone(),
                Arc::new(CacheMetricsRegistry::new()),
                &config.cache,
            );
            let keys = layer.keys_by_pattern(&pattern).await;
            println!("store:     {}", store.name());
            println!("available: {available}");
            println!("pattern:   {}{pattern}", config.cache.key_prefix);
            println!("keys:      {}", keys.len());
            for key in keys.iter().take(20) {
                let ttl = layer.ttl(key).await;
                println!("  {key}  ttl={}", ttl.as_redis_seconds());
            }
        }
    }

    Ok(())
}

/// Feed SSE `data:` payloads through the chunk resolver.
async fn reassemble_sse(
    reassembler: &mut StreamReassembler,
    reader: impl AsyncRead + Unpin,
) -> Result<tollgate::Reassembled, Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let payload = match parse_sse_data(&line) {
            Some(SseData::Payload(payload)) => payload,
            Some(SseData::Done) => break,
            None => continue,
        };
        match StreamChunk::parse(payload) {
            Ok(chunk) => {
                reassembler.feed_chunk(&chunk)?;
            }
            Err(e) => reassembler.record_error(e, "chunk"),
        }
    }
    Ok(reassembler.finish())
}

fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>, Box<dyn std::error::Error>> {
    match config.cache.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => Ok(Arc::new(tollgate::cache::RedisStore::new(url)?)),
        #[cfg(not(feature = "redis"))]
        Some(_) => Err("redis_url is set but tollgate was built without the `redis` feature".into()),
        None => Ok(Arc::new(MemoryStore::with_max_entries(
            config.cache.max_entries,
        ))),
    }
}
