//! CLI for the hwtrend sensor logger.
//!
//! Runs the ingest daemon and the HTTP API, and inspects or queries archives.

mod api;

use std::net::TcpListener;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use hwtrend::classify::TypeRules;
use hwtrend::key::{device_label_for_key, short_name_for_key};
use hwtrend::timespec::parse_duration;
use hwtrend::{
    ArchiveSchema, ChartState, ConsolidationFn, FetchRequest, IngestLoop, QueryService, SensorsCommand, Store,
    StoreOptions, StoreReader, TimeSpec,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// hwtrend: hardware sensor logger with multi-resolution archives.
#[derive(Parser)]
#[command(name = "hwtrend", version, about)]
struct Cli {
    /// Directory holding one archive per sensor.
    #[arg(long, global = true, default_value = "rrd")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Sample sensors periodically and store the readings.
    Ingest(IngestArgs),

    /// Serve the HTTP API over the stored archives.
    Serve(ServeArgs),

    /// Ingest and serve in one process.
    Run {
        #[command(flatten)]
        ingest: IngestArgs,

        #[command(flatten)]
        serve: ServeArgs,
    },

    /// Display the archives in the data directory, or the bands of one.
    Info {
        /// Series key to describe. Lists all series when omitted.
        key: Option<String>,

        /// Type rules used to label the listing.
        #[arg(long, default_value = "config/sensor_types.json")]
        types: PathBuf,
    },

    /// Fetch data points of one series.
    Query {
        /// Series key to query.
        key: String,

        /// Start of the range (e.g. "end-1h", "now-1d", "1700000000").
        #[arg(long, default_value = "end-1h")]
        start: String,

        /// End of the range.
        #[arg(long, default_value = "now")]
        end: String,

        /// Preferred resolution (e.g. "30s", "5m"). Coarsest covering band when omitted.
        #[arg(long)]
        resolution: Option<String>,

        /// Consolidation function of the band to read.
        #[arg(long, default_value = "average")]
        cf: ConsolidationFn,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },
}

/// Options of the sampling loop.
#[derive(Args, Clone)]
struct IngestArgs {
    /// Seconds between samples.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Program printing `sensors -j` style JSON.
    #[arg(long, default_value = "sensors")]
    sensors_command: String,

    /// Replace corrupt or incompatible archives with empty ones.
    #[arg(long)]
    recreate_corrupt: bool,
}

/// Options of the HTTP API.
#[derive(Args, Clone)]
struct ServeArgs {
    /// Sensor type rules.
    #[arg(long, default_value = "config/sensor_types.json")]
    types: PathBuf,

    /// Where the chart state document is kept.
    #[arg(long, default_value = "static/chart_state.json")]
    chart_state: PathBuf,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 23723)]
    port: u16,
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON array of objects.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    let result = match cli.command {
        Commands::Ingest(args) => cmd_ingest(&data_dir, &args),
        Commands::Serve(args) => cmd_serve(&data_dir, &args),
        Commands::Run { ingest, serve } => cmd_run(&data_dir, &ingest, &serve),
        Commands::Info { key, types } => cmd_info(&data_dir, key.as_deref(), &types),
        Commands::Query {
            key,
            start,
            end,
            resolution,
            cf,
            format,
        } => cmd_query(&data_dir, &key, &start, &end, resolution.as_deref(), cf, &format),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn ingest_loop(data_dir: &Path, args: &IngestArgs) -> Result<IngestLoop<SensorsCommand>, Box<dyn std::error::Error>> {
    let options = StoreOptions {
        recreate_corrupt: args.recreate_corrupt,
    };
    let store = Store::open(data_dir, ArchiveSchema::sensor_default(), options)?;
    let source = SensorsCommand::new(args.sensors_command.clone());
    Ok(IngestLoop::new(store, source, Duration::from_secs(args.interval)))
}

/// Implements `hwtrend ingest`.
fn cmd_ingest(data_dir: &Path, args: &IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut ingest = ingest_loop(data_dir, args)?;
    // Runs until the process is terminated.
    ingest.run_until(&AtomicBool::new(false));
    Ok(())
}

fn bind(data_dir: &Path, args: &ServeArgs) -> Result<(TcpListener, Arc<QueryService>), Box<dyn std::error::Error>> {
    let rules = TypeRules::load(&args.types)?;
    let service = QueryService::new(StoreReader::new(data_dir), rules, ChartState::load(&args.chart_state));

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = TcpListener::bind(&addr).map_err(|e| format!("failed to bind {addr}: {e}"))?;
    info!(data_dir = %data_dir.display(), types = %args.types.display(), "query service ready");
    Ok((listener, Arc::new(service)))
}

/// Implements `hwtrend serve`.
fn cmd_serve(data_dir: &Path, args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (listener, service) = bind(data_dir, args)?;
    api::serve(&listener, &service);
    Ok(())
}

/// Implements `hwtrend run`.
fn cmd_run(data_dir: &Path, ingest_args: &IngestArgs, serve_args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Fail fast on configuration errors before starting either side.
    let (listener, service) = bind(data_dir, serve_args)?;
    let mut ingest = ingest_loop(data_dir, ingest_args)?;

    let _ingest_thread = thread::Builder::new().name("ingest".to_string()).spawn(move || {
        run_logged("ingest", || ingest.run_until(&AtomicBool::new(false)));
        error!("ingest loop ended, shutting down the query service");
        std::process::exit(1);
    })?;

    api::serve(&listener, &service);
    Ok(())
}

/// Runs `task`, logging a panic instead of letting it end the thread
/// silently. Returns false if `task` panicked.
fn run_logged(name: &str, task: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            error!(task = name, panic = message, "task panicked");
            false
        }
    }
}

/// Implements `hwtrend info [key]`.
fn cmd_info(data_dir: &Path, key: Option<&str>, types: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let reader = StoreReader::new(data_dir);

    let Some(key) = key else {
        let keys = reader.series_keys()?;
        // Type labels are best effort: the listing works without rules.
        let rules = TypeRules::load(types).ok();

        println!("Store: {}", data_dir.display());
        println!("Series: {}", keys.len());
        println!();
        for key in &keys {
            let type_name = rules.as_ref().and_then(|r| r.classify(key)).unwrap_or("-");
            println!(
                "  {key}  [{type_name}] {} / {}",
                device_label_for_key(key),
                short_name_for_key(key)
            );
        }
        return Ok(());
    };

    let info = reader.info(key)?;
    println!("Series: {key}");
    println!("  Schema hash: {:016x}", info.schema_hash);
    println!("  Primary step: {}", format_duration_secs(info.primary_step));
    match info.last_update {
        Some(ts) => println!("  Last update: {ts}"),
        None => println!("  Last update: never"),
    }
    println!("  File size: {} ({} bytes)", format_bytes(info.file_size as u64), info.file_size);
    println!("  Bands: {}", info.bands.len());

    for (i, band) in info.bands.iter().enumerate() {
        let rows = match (band.oldest_row, band.newest_row) {
            (Some(oldest), Some(newest)) => format!("rows {oldest}..={newest}"),
            _ => "empty".to_string(),
        };
        println!(
            "    Band {i}: {} step={}, retention={}, head={}, {rows}",
            band.consolidation_fn,
            format_duration_secs(band.step),
            format_duration_secs(band.step * u64::from(band.capacity)),
            band.head,
        );
    }

    Ok(())
}

/// Implements `hwtrend query <key>`.
fn cmd_query(
    data_dir: &Path,
    key: &str,
    start: &str,
    end: &str,
    resolution: Option<&str>,
    cf: ConsolidationFn,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let start: TimeSpec = start.parse()?;
    let end: TimeSpec = end.parse()?;

    let mut request = FetchRequest::new(start, end).with_consolidation_fn(cf);
    if let Some(resolution) = resolution {
        request = request.with_resolution(parse_duration(resolution)?);
    }

    let reader = StoreReader::new(data_dir);
    if !reader.series_keys()?.iter().any(|k| k == key) {
        return Err(format!("Series '{key}' not found in '{}'", data_dir.display()).into());
    }

    let result = reader.fetch(key, &request);

    match format {
        OutputFormat::Csv => {
            println!(
                "# series={key}, cf={cf}, step={}, points={}, incomplete={}",
                result.step(),
                result.len(),
                result.may_be_incomplete()
            );
            println!("timestamp_ms,value");
            for sample in result.samples() {
                match sample.value {
                    Some(value) => println!("{},{value}", sample.timestamp_ms),
                    None => println!("{},", sample.timestamp_ms),
                }
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "series": key,
                "cf": cf,
                "step": result.step(),
                "band": result.band_used(),
                "incomplete": result.may_be_incomplete(),
                "count": result.len(),
                "data": result.samples(),
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86400 && secs.is_multiple_of(86400) {
        format!("{}d", secs / 86400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["hwtrend", "run"]).unwrap();
        assert_eq!(cli.data_dir, PathBuf::from("rrd"));

        let Commands::Run { ingest, serve } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(ingest.interval, 5);
        assert_eq!(ingest.sensors_command, "sensors");
        assert!(!ingest.recreate_corrupt);
        assert_eq!(serve.types, PathBuf::from("config/sensor_types.json"));
        assert_eq!(serve.chart_state, PathBuf::from("static/chart_state.json"));
        assert_eq!(serve.bind, "0.0.0.0");
        assert_eq!(serve.port, 23723);
    }

    #[test]
    fn test_cli_rejects_zero_interval() {
        assert!(Cli::try_parse_from(["hwtrend", "ingest", "--interval", "0"]).is_err());
        assert!(Cli::try_parse_from(["hwtrend", "--data-dir", "/var/lib/hwtrend", "ingest", "--interval", "10"]).is_ok());
    }

    #[test]
    fn test_query_args() {
        let cli = Cli::try_parse_from(["hwtrend", "query", "k", "--cf", "max", "--resolution", "5m", "--format", "json"])
            .unwrap();
        let Commands::Query { key, cf, resolution, .. } = cli.command else {
            panic!("expected query");
        };
        assert_eq!(key, "k");
        assert_eq!(cf, ConsolidationFn::Max);
        assert_eq!(resolution.as_deref(), Some("5m"));
    }

    #[test]
    fn test_run_logged_catches_panics() {
        let mut ran = false;
        assert!(run_logged("ok", || ran = true));
        assert!(ran);

        assert!(!run_logged("static", || panic!("sensor walk failed")));
        assert!(!run_logged("formatted", || panic!("cycle {} failed", 3)));
    }

    #[test]
    fn test_format_duration_secs() {
        assert_eq!(format_duration_secs(30), "30s");
        assert_eq!(format_duration_secs(300), "5m");
        assert_eq!(format_duration_secs(7200), "2h");
        assert_eq!(format_duration_secs(604_800), "7d");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }
}
