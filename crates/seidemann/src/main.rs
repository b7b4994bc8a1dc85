use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use seidemann_core::behavior::BehaviorInterface;
use seidemann_core::metadata::{deep_update, load_metadata_file};
use seidemann_core::{BundleManifest, ConversionConfig, SessionConverter};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert lab recording sessions into session bundles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one session described by a config file
    Convert(ConvertArgs),
    /// Print the reconstructed trial table without writing anything
    Trials(TrialsArgs),
    /// List the entries of a written bundle
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Session config (TOML)
    #[arg(long)]
    config: PathBuf,
    /// Extra metadata (TOML), merged over the config's metadata file
    #[arg(long)]
    metadata: Option<PathBuf>,
    /// Output bundle path; defaults to the config's `output`
    #[arg(long)]
    output: Option<PathBuf>,
    /// Only write the first imaging frames
    #[arg(long)]
    stub_test: bool,
    /// Replace an existing bundle
    #[arg(long)]
    overwrite: bool,
}

#[derive(Args, Debug)]
struct TrialsArgs {
    #[arg(long)]
    config: PathBuf,
    /// Rows to print
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug)]
struct InspectArgs {
    bundle: PathBuf,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Convert(args) => convert(args),
        Command::Trials(args) => trials(args),
        Command::Inspect(args) => inspect(&args.bundle),
    }
}

fn load_config(path: &Path) -> Result<ConversionConfig> {
    ConversionConfig::load(path)
        .with_context(|| format!("Failed to load session config '{}'", path.display()))
}

fn config_dir(path: &Path) -> PathBuf {
    path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf()
}

fn convert(args: ConvertArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if args.stub_test {
        config.stub_test = true;
    }
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.output_path(&config_dir(&args.config)));
    let metadata_files: Vec<PathBuf> = config
        .metadata
        .iter()
        .chain(args.metadata.iter())
        .cloned()
        .collect();

    let converter = SessionConverter::from_config(config).context("Failed to open session inputs")?;

    let mut metadata = converter.metadata()?;
    for path in &metadata_files {
        let extra = load_metadata_file(path)
            .with_context(|| format!("Failed to read metadata '{}'", path.display()))?;
        deep_update(&mut metadata, extra);
    }
    if metadata_files.is_empty() {
        warn!("No metadata file given; NWBFile.session_start_time must come from elsewhere");
    }

    let summary = converter
        .run_conversion(&output, metadata, args.overwrite)
        .with_context(|| format!("Conversion into '{}' failed", output.display()))?;
    info!(output = %summary.output.display(), "Session converted");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn trials(args: TrialsArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let behavior_config = config
        .behavior
        .as_ref()
        .context("Config has no [behavior] section")?;
    let behavior = BehaviorInterface::open(behavior_config)?;
    let offset = behavior.session_offset_ms()?;
    let table = behavior.trial_table(offset)?;

    for column in table.columns() {
        info!(column = column.name.as_str(), description = column.description.as_str(), "Trial column");
    }
    let df = table.to_dataframe()?;
    println!("{}", df.head(Some(args.limit)));
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let manifest = BundleManifest::read(path)
        .with_context(|| format!("Failed to read bundle '{}'", path.display()))?;

    let mut table = Table::new();
    table.set_header(vec!["kind", "path", "contents"]);
    for entry in &manifest.entries {
        table.add_row(vec![
            entry.kind().to_string(),
            entry.path().to_string(),
            entry.summary(),
        ]);
    }

    let session_id = manifest.metadata["NWBFile"]["session_id"]
        .as_str()
        .unwrap_or("<unknown>");
    println!("session {session_id} (bundle format v{})", manifest.format_version);
    println!("{table}");
    Ok(())
}
