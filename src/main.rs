use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudtree::config::Config;
use cloudtree::rest::{RestClient, RestKind, RestRemote};
use cloudtree::{Resource, ResourceModule};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Polling used after create/update/delete until the remote side settles
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: usize = 30;

/// Browse and manage cloud control-plane resources
#[derive(Parser, Debug)]
#[command(name = "cloudtree", version, about, long_about = None)]
struct Args {
    /// Management API base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token sent with every request
    #[arg(long)]
    token: Option<String>,

    /// Subscription containing the resources
    #[arg(short, long)]
    subscription: String,

    /// Provider namespace, e.g. Microsoft.DocumentDB
    #[arg(short, long)]
    namespace: String,

    /// Resource type within the namespace, e.g. databaseAccounts
    #[arg(short = 't', long = "type")]
    resource_type: Option<String>,

    /// Resource group; omit to work across the whole subscription
    #[arg(short = 'g', long)]
    resource_group: Option<String>,

    /// Items requested per list page
    #[arg(long)]
    page_size: Option<usize>,

    /// API version appended to every request
    #[arg(long)]
    api_version: Option<String>,

    #[arg(short, long, value_enum, default_value = "json")]
    output: Output,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every resource of the type
    List,
    /// Show one resource
    Get { name: String },
    /// Delete one resource
    Delete {
        name: String,
        /// Return once the delete is accepted instead of waiting
        #[arg(long)]
        no_wait: bool,
    },
    /// Create the resource, or update it if it already exists
    Apply {
        name: String,
        /// JSON or YAML body
        #[arg(short, long)]
        file: PathBuf,
        /// Return once the request is accepted instead of waiting
        #[arg(long)]
        no_wait: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Output {
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudtree started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudtree").join("cloudtree.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudtree").join("cloudtree.log");
    }
    PathBuf::from("cloudtree.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load();

    let endpoint = config
        .effective_endpoint(args.endpoint.as_deref())
        .context("No endpoint configured. Set CLOUDTREE_ENDPOINT or use --endpoint")?;
    let resource_type = config
        .effective_resource_type(args.resource_type.as_deref())
        .context("No resource type given. Use --type")?;
    let token = config.effective_token(args.token.as_deref());
    let page_size = config.effective_page_size(args.page_size);

    let module = build_module(&args, &endpoint, &resource_type, token, page_size)?;

    if let Err(e) = config.set_last_resource_type(&resource_type) {
        tracing::warn!("Failed to save config: {}", e);
    }

    match &args.command {
        Command::List => {
            let items: Vec<Value> = module.list().await.iter().map(summarize).collect();
            print(args.output, &Value::Array(items))
        },
        Command::Get { name } => {
            let resource = module
                .get(name, args.resource_group.as_deref())
                .await
                .with_context(|| format!("'{}' not found", name))?;
            print(args.output, &summarize(&resource))
        },
        Command::Delete { name, no_wait } => {
            let resource = module
                .get(name, args.resource_group.as_deref())
                .await
                .with_context(|| format!("'{}' not found", name))?;
            resource.delete().await?;
            if !no_wait {
                resource.wait_until_stable(POLL_INTERVAL, MAX_POLLS).await;
            }
            print(args.output, &summarize(&resource))
        },
        Command::Apply {
            name,
            file,
            no_wait,
        } => {
            let body = read_body(file)?;
            let draft = module
                .update_or_create(name, args.resource_group.as_deref(), body)
                .await;
            tracing::info!(
                "Applying {} ({})",
                name,
                if draft.is_create() { "create" } else { "update" }
            );
            let resource = draft.commit().await?;
            if !no_wait {
                resource.wait_until_stable(POLL_INTERVAL, MAX_POLLS).await;
            }
            print(args.output, &summarize(&resource))
        },
    }
}

fn build_module(
    args: &Args,
    endpoint: &str,
    resource_type: &str,
    token: Option<String>,
    page_size: usize,
) -> Result<Arc<ResourceModule<RestRemote>>> {
    let mut collection = format!("subscriptions/{}", urlencoding::encode(&args.subscription));
    if let Some(rg) = &args.resource_group {
        collection.push_str(&format!("/resourceGroups/{}", urlencoding::encode(rg)));
    }
    collection.push_str(&format!("/providers/{}/{}", args.namespace, resource_type));

    let mut kind = RestKind::new(&collection);
    if let Some(version) = &args.api_version {
        kind = kind.api_version(version);
    }

    let remote = RestRemote::new(RestClient::new(token)?, endpoint, kind)?;

    let module = ResourceModule::root(resource_type, &args.subscription, &args.namespace)
        .client(Arc::new(remote))
        .page_size(page_size)
        .build()?;
    Ok(module)
}

/// JSON first, then YAML
fn read_body(path: &Path) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(_) => serde_yaml::from_str(&content)
            .with_context(|| format!("{:?} is neither valid JSON nor YAML", path)),
    }
}

fn summarize(resource: &Arc<Resource<RestRemote>>) -> Value {
    json!({
        "id": resource.id().to_string(),
        "name": resource.name(),
        "resourceGroup": resource.resource_group(),
        "status": resource.status().as_str(),
        "refreshedAt": resource.refreshed_at().map(|t| t.to_rfc3339()),
        "remote": resource.remote(),
    })
}

fn print(output: Output, value: &Value) -> Result<()> {
    let text = match output {
        Output::Json => serde_json::to_string_pretty(value)?,
        Output::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", text.trim_end());
    Ok(())
}
