use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use shirushi::config::Config;
use shirushi::logging::init_subscriber;
use shirushi::pipeline::WatermarkPipeline;
use shirushi::policy::Sensitivity;
use shirushi::signing::{build_canonical_query, http_date, RequestSigner, SIGNATURE_ALGORITHM};
use shirushi::storage::FetchedFile;
use shirushi::tracker::TaskStatusView;
use std::path::PathBuf;

/// Shirushi - watermark embedding and provenance tracing through a DLP file-processing service
#[derive(Parser, Debug)]
#[command(name = "shirushi")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed a watermark and wait for the processed file
    Embed {
        #[arg(long)]
        file_url: String,
        /// Text to hide in the file
        #[arg(long)]
        content: String,
        /// Policy id; adapted from the file type when omitted
        #[arg(long)]
        policy: Option<String>,
    },
    /// Extract a watermark and wait for the result
    Extract {
        #[arg(long)]
        file_url: String,
    },
    /// Show one task
    Status { task_id: String },
    /// List all recorded tasks
    Tasks,
    /// Identify the watermark carried by a local file or URL
    Resolve { file: String },
    /// Show the embedding parameters for a file type
    Adapt {
        file_type: String,
        sensitivity: Sensitivity,
    },
    /// Print the signed headers for a request, for debugging signature mismatches
    Sign {
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        path: String,
        /// Query parameter as key=value; repeat a key to send an array
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Date header value; now when omitted
        #[arg(long)]
        date: Option<String>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

/// Collect `--param` pairs; a repeated key becomes an array
fn query_params(params: &[(String, String)]) -> Map<String, Value> {
    let mut query = Map::new();
    for (key, value) in params {
        let value = Value::String(value.clone());
        match query.get_mut(key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                query.insert(key.clone(), value);
            }
        }
    }
    query
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for the task; Ctrl-C cancels it and waits for the cancellation to land
async fn follow(pipeline: &WatermarkPipeline, task_id: &str) -> anyhow::Result<TaskStatusView> {
    tokio::select! {
        view = pipeline.wait_for_terminal(task_id) => Ok(view?),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(task_id = task_id, "Interrupted, cancelling task");
            pipeline.cancel(task_id).await?;
            Ok(pipeline.wait_for_terminal(task_id).await?)
        }
    }
}

fn print_signed(
    config: &Config,
    method: &str,
    path: &str,
    params: &[(String, String)],
    date: Option<&str>,
) -> anyhow::Result<()> {
    let signer = RequestSigner::new(&config.service.access_key, &config.service.secret_key)?;
    let canonical_query = build_canonical_query(&query_params(params));
    let date = date.map(str::to_string).unwrap_or_else(|| http_date(Utc::now()));
    let method = method.to_ascii_uppercase();
    let signature = signer.sign(&method, path, &canonical_query, &date)?;

    print_json(&json!({
        "method": method,
        "path": path,
        "canonical_query": canonical_query,
        "headers": {
            "Date": date,
            "X-HMAC-ALGORITHM": SIGNATURE_ALGORITHM,
            "X-HMAC-ACCESS-KEY": signer.access_key(),
            "X-HMAC-SIGNATURE": signature,
        }
    }))
}

async fn run(args: &Args, config: &Config) -> anyhow::Result<()> {
    let pipeline = WatermarkPipeline::from_config(config)
        .await
        .context("Failed to build pipeline")?;

    let outcome = match &args.command {
        Command::Embed {
            file_url,
            content,
            policy,
        } => {
            let task_id = pipeline
                .embed(file_url, content, policy.as_deref())
                .await?;
            eprintln!("Submitted embed task {}", task_id);
            print_json(&follow(&pipeline, &task_id).await?)
        }
        Command::Extract { file_url } => {
            let task_id = pipeline.extract(file_url).await?;
            eprintln!("Submitted extract task {}", task_id);
            print_json(&follow(&pipeline, &task_id).await?)
        }
        Command::Status { task_id } => print_json(&pipeline.get_status(task_id).await?),
        Command::Tasks => {
            let views: Vec<TaskStatusView> = pipeline
                .list_tasks()
                .await?
                .iter()
                .map(TaskStatusView::from)
                .collect();
            print_json(&views)
        }
        Command::Resolve { file } => {
            let found = if file.contains("://") {
                pipeline.resolve_provenance_url(file).await?
            } else {
                let fetched = FetchedFile::from_path(file)
                    .await
                    .with_context(|| format!("Failed to read {}", file))?;
                pipeline.resolve_provenance(&fetched).await?
            };
            print_json(&found)
        }
        Command::Adapt {
            file_type,
            sensitivity,
        } => print_json(&pipeline.adapt_policy(file_type, *sensitivity)?),
        Command::Sign {
            method,
            path,
            params,
            date,
        } => print_signed(config, method, path, params, date.as_deref()),
    };

    if !pipeline.shutdown().await {
        tracing::warn!("Some tasks were still running at exit");
    }
    if args.print_metrics {
        eprint!("{}", pipeline.metrics().export_prometheus());
    }
    outcome
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load and validate configuration before anything is logged
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;

    init_subscriber(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging subsystem: {}", e))?;

    tracing::info!(
        config_file = %args.config.display(),
        endpoint = %config.service.endpoint,
        max_concurrent_tasks = config.worker.max_concurrent_tasks,
        "Configuration loaded successfully"
    );

    match &args.command {
        // Needs only the service keys, not the pipeline
        Command::Sign {
            method,
            path,
            params,
            date,
        } => print_signed(&config, method, path, params, date.as_deref()),
        _ => run(&args, &config).await,
    }
}
