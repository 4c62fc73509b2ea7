use std::path::PathBuf;

use anyhow::{Context, Result};
use atelier_contracts::config::{ModePolicy, PipelineConfig};
use atelier_contracts::memory::{CreationRecord, JsonlMemoryStore, MemoryStore};
use atelier_contracts::reference::extract_reference_query;
use atelier_contracts::runs::{PipelineResult, ServiceMode};
use atelier_engine::{build_pipeline, connect_registry, AppStatus};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const FALLBACK_NOTICE: &str = "NOTE: This response was generated with fallback services because the remote generation apps are unavailable.\n\n";

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Prompt to image to 3D model pipeline")]
struct Cli {
    /// Debug-level logging (overridden by ATELIER_LOG).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one prompt through the pipeline.
    Run(RunArgs),
    /// List the most recent creations.
    Recent(ListArgs),
    /// Search creations by prompt text or tag.
    Search(SearchArgs),
    /// Connect to the configured apps and report availability.
    Probe(StoreArgs),
}

#[derive(Debug, Args)]
struct StoreArgs {
    #[arg(long)]
    datastore: Option<PathBuf>,
    #[arg(long = "app-id")]
    app_ids: Vec<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    /// Memory query for earlier work; extracted from the prompt when omitted.
    #[arg(long)]
    reference: Option<String>,
    #[arg(long)]
    mode: Option<ModePolicy>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Print the full result as JSON instead of the message.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long, default_value_t = 5)]
    limit: usize,
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Debug, Args)]
struct SearchArgs {
    query: String,
    #[arg(long, default_value_t = 5)]
    limit: usize,
    #[command(flatten)]
    store: StoreArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Run(args) => run_pipeline(args),
        Command::Recent(args) => {
            let config = load_config(&args.store)?;
            let store = JsonlMemoryStore::new(config.memory_path());
            print_creations(&store.recent(args.limit)?);
            Ok(0)
        }
        Command::Search(args) => {
            let config = load_config(&args.store)?;
            let store = JsonlMemoryStore::new(config.memory_path());
            print_creations(&store.search(&args.query, args.limit)?);
            Ok(0)
        }
        Command::Probe(args) => {
            let config = load_config(&args)?;
            let registry = connect_registry(&config)?;
            let statuses = registry.statuses();
            for status in &statuses {
                println!("{}", format_status(status));
            }
            Ok(if statuses.iter().all(|status| status.available) {
                0
            } else {
                1
            })
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_env("ATELIER_LOG").unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

fn load_config(store: &StoreArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env().context("invalid ATELIER_* configuration")?;
    if let Some(datastore) = &store.datastore {
        config.datastore_dir = datastore.clone();
    }
    if !store.app_ids.is_empty() {
        config.app_ids = store
            .app_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
    }
    Ok(config.with_required_apps())
}

fn run_pipeline(args: RunArgs) -> Result<i32> {
    let prompt = args.prompt.trim();
    if prompt.is_empty() {
        println!("Error: No prompt provided");
        return Ok(1);
    }

    let mut config = load_config(&args.store)?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(events) = args.events {
        config.events_path = Some(events);
    }

    let reference = args
        .reference
        .clone()
        .or_else(|| extract_reference_query(prompt));
    debug!(reference = reference.as_deref().unwrap_or(""), "reference query");

    let pipeline = build_pipeline(&config)?;
    let result = pipeline.process(prompt, reference.as_deref());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", format_message(&result));
    }
    Ok(if result.success { 0 } else { 1 })
}

fn format_message(result: &PipelineResult) -> String {
    let notice = if result.mode == ServiceMode::Fallback {
        FALLBACK_NOTICE
    } else {
        ""
    };
    let path_text = |path: &Option<PathBuf>| {
        path.as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    };
    let error = result.error.as_deref().unwrap_or("unknown error");

    let mut message = if !result.success {
        format!(
            "{notice}Error: {error}\nOriginal prompt: '{}'",
            result.original_prompt
        )
    } else if result.model_path.is_some() {
        format!(
            "{notice}Successfully created both image and 3D model!\n\n\
Original prompt: '{}'\n\
Enhanced prompt: '{}'\n\n\
Image saved at: {}\n\
3D model saved at: {}",
            result.original_prompt,
            result.enhanced_prompt,
            path_text(&result.image_path),
            path_text(&result.model_path),
        )
    } else {
        format!(
            "{notice}Successfully created image but 3D model generation failed.\n\n\
Original prompt: '{}'\n\
Enhanced prompt: '{}'\n\n\
Image saved at: {}\n\
Error with 3D model: {error}",
            result.original_prompt,
            result.enhanced_prompt,
            path_text(&result.image_path),
        )
    };
    if let Some(memory_error) = &result.memory_error {
        message.push_str(&format!("\n\nWarning: creation was not remembered ({memory_error})"));
    }
    message
}

fn print_creations(creations: &[CreationRecord]) {
    if creations.is_empty() {
        println!("No creations found.");
        return;
    }
    for creation in creations {
        println!("{}  {}", creation.timestamp, creation.id);
        println!("  prompt:   {}", creation.user_prompt);
        println!("  enhanced: {}", creation.enhanced_prompt);
        if let Some(image) = &creation.image_path {
            println!("  image:    {image}");
        }
        if let Some(model) = &creation.model_path {
            println!("  model:    {model}");
        }
        if !creation.tags.is_empty() {
            println!("  tags:     {}", creation.tags.join(", "));
        }
    }
}

fn format_status(status: &AppStatus) -> String {
    let state = if status.available { "available" } else { "unavailable" };
    let mut line = format!("{} ({}) {state}", status.app_id, status.address);
    if let Some(name) = &status.name {
        line.push_str(&format!(" [{name}]"));
    }
    for failure in &status.failures {
        line.push_str(&format!("\n  - {failure}"));
    }
    line
}
