//! Command-line driver for the extract and observe handlers.
//!
//! Launches a local Chrome through chromiumoxide, opens the requested page and
//! prints the handler result as JSON on stdout.
//!
//! Usage examples:
//!   $ MODEL_API_KEY=... cargo run --bin stagehand-handlers -- \
//!       --url https://news.ycombinator.com extract "titles of the top stories" \
//!       --schema '{"type":"object","properties":{"titles":{"type":"array","items":{"type":"string"}}}}'
//!   $ STAGEHAND_CHROME_BIN=/path/to/chrome MODEL_API_KEY=... \
//!       cargo run --bin stagehand-handlers -- --url https://example.com observe --vision

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde_json::Value as JsonValue;
use stagehand_handlers::Stagehand;
use stagehand_handlers::config::{StagehandConfig, Verbosity};
use stagehand_handlers::runtime::{ChromiumoxideRuntime, LaunchOptions};
use stagehand_handlers::types::{ExtractOptions, ObserveOptions};

#[derive(Parser)]
#[command(
    name = "stagehand-handlers",
    author,
    version,
    about = "Extract structured data or observe elements on a web page"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Page to open before running the command.
    #[arg(long, global = true, default_value = "https://example.com")]
    url: String,

    /// Model to use instead of MODEL_NAME.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Show the launched browser window.
    #[arg(long, global = true)]
    show_browser: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract data matching a JSON schema.
    Extract(ExtractArgs),
    /// List actionable elements with their locators.
    Observe(ObserveArgs),
}

#[derive(Args)]
struct ExtractArgs {
    instruction: String,

    /// Inline JSON schema for the result.
    #[arg(long, conflicts_with = "schema_file")]
    schema: Option<String>,

    /// Path to a file holding the JSON schema.
    #[arg(long)]
    schema_file: Option<PathBuf>,

    #[arg(long)]
    dom_settle_timeout_ms: Option<u64>,
}

#[derive(Args)]
struct ObserveArgs {
    /// What to look for; defaults to every actionable element.
    instruction: Option<String>,

    /// Send an annotated screenshot when the model supports images.
    #[arg(long)]
    vision: bool,

    /// Serialize the whole page instead of the first viewport.
    #[arg(long)]
    full_page: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    let mut config = StagehandConfig::from_env().context("invalid configuration")?;
    if cli.verbose > 0 {
        config.verbose = verbosity_from_count(cli.verbose);
    }
    if let Some(model) = &cli.model {
        config.model_name = model.clone();
    }
    if cli.show_browser {
        config.headless = false;
    }

    let runtime = ChromiumoxideRuntime::new();
    runtime
        .launch(&LaunchOptions::from_config(&config))
        .await
        .context("failed to launch browser")?;

    let result = run(&cli, config, &runtime).await;

    runtime
        .shutdown()
        .await
        .context("failed to shut down browser")?;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn run(cli: &Cli, config: StagehandConfig, runtime: &ChromiumoxideRuntime) -> Result<JsonValue> {
    let page = runtime
        .new_page(&cli.url)
        .await
        .with_context(|| format!("failed to open {}", cli.url))?;
    info!("Opened {}", cli.url);

    let stagehand =
        Stagehand::for_chromium_page(config, page).context("failed to configure model client")?;

    match &cli.command {
        Command::Extract(args) => {
            let mut options = ExtractOptions::new(args.instruction.clone(), read_schema(args)?);
            options.model_name = cli.model.clone();
            options.dom_settle_timeout_ms = args.dom_settle_timeout_ms;
            let data = stagehand.extract(options).await.context("extract failed")?;
            info!("Extraction metrics: {:?}", stagehand.metrics());
            Ok(data)
        }
        Command::Observe(args) => {
            let options = ObserveOptions {
                instruction: args.instruction.clone(),
                use_vision: args.vision,
                full_page: args.full_page,
                model_name: cli.model.clone(),
                ..ObserveOptions::default()
            };
            let elements = stagehand.observe(options).await.context("observe failed")?;
            Ok(serde_json::to_value(elements)?)
        }
    }
}

fn read_schema(args: &ExtractArgs) -> Result<JsonValue> {
    let raw = match (&args.schema, &args.schema_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => return Err(anyhow!("pass --schema or --schema-file")),
    };
    serde_json::from_str(&raw).context("schema is not valid JSON")
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
