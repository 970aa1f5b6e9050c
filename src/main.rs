use std::error::Error;
use std::path::PathBuf;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use llama_inference::config::Settings;
use llama_inference::llm::error::InferenceError;
use llama_inference::{LlamaInference, ModelVariant};

mod display;

/// Load a LLaMA checkpoint across the configured devices and complete prompts
#[derive(Parser, Debug)]
#[command(name = "llama-inference", version, about)]
struct Cli {
    /// Directory holding tokenizer.model and one subdirectory per variant
    #[arg(long)]
    llama_path: PathBuf,

    /// Model size to load
    #[arg(long, value_enum)]
    model: ModelVariant,

    /// Prompt to complete; repeat for several prompts
    #[arg(long = "prompt", default_value = "My name is Kyle")]
    prompts: Vec<String>,

    /// Settings directory containing default.toml and local.toml
    #[arg(long, default_value = "config")]
    config: PathBuf,
}

/// Main entry point
///
/// Loads settings, sets up logging, builds the session from the requested
/// variant and runs one generation over the given prompts.
fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let settings = Settings::load(Some(cli.config.as_path()))?;

    std::fs::create_dir_all(&settings.logging.directory)?;
    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        &settings.logging.directory,
        "llama-inference",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        // Disable ANSI colors for cleaner log files
        .with_ansi(false)
        .with_line_number(true)
        .with_file(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)))
        .init();

    info!("llama-inference starting up");
    info!("Log directory: {}", std::fs::canonicalize(&settings.logging.directory)?.display());
    info!("Settings: {:?}", settings);

    let session = LlamaInference::builder(&cli.llama_path, cli.model)
        .devices(settings.device_set())
        .placement(settings.placement_policy()?)
        .dtype(settings.model.dtype)
        .build()
        .map_err(|e| {
            let kind = InferenceError::kind_of(e.as_ref());
            error!("Failed to load {} ({:?}): {}", cli.model, kind, e);
            e
        })?;

    display::display_device_map(&session);

    let outputs = session.generate(&cli.prompts, &settings.inference)?;
    display::display_results(&cli.prompts, &outputs);

    info!("Done");
    Ok(())
}
