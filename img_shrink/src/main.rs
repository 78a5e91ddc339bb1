use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use img_shrink::audit::audit;
use img_shrink::config::DEFAULT_CONFIG_PATH;
use img_shrink::report::{print_audit_report, print_plan, print_run_summary};
use img_shrink::{
    Config, EngineSettings, ImgScaler, MagickEncoder, Reconciler, RunOptions, SizeCaps,
    SqliteStore,
};
use shared_utils::logging::{init_logging, LogConfig};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "img-shrink")]
#[command(version, about = "Image shrinkage optimisation for WordPress uploads", long_about = None)]
struct Cli {
    /// JSON config with store, uploads directory and quality settings
    #[arg(short = 'c', long = "config_file", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config_file: PathBuf,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for rolling log files (default: system temp dir)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Shrink new or changed uploads and sync metadata (default)
    Run {
        /// Report candidates without encoding or writing anything
        #[arg(long)]
        dry_run: bool,

        #[arg(short, long, value_enum, default_value = "human")]
        output: OutputFormat,
    },

    /// Print the derivative sizes the CMS generates for a resolution
    Plan {
        #[arg(value_name = "WIDTH", required_unless_present = "file")]
        width: Option<u32>,

        #[arg(value_name = "HEIGHT", required_unless_present = "file")]
        height: Option<u32>,

        /// Read the resolution from an image file instead
        #[arg(long, conflicts_with_all = ["width", "height"])]
        file: Option<PathBuf>,

        /// Use the size caps from the config file
        #[arg(long)]
        use_config: bool,
    },

    /// Check stored derivative dimensions against the planner (read-only)
    Audit {
        #[arg(short, long, value_enum, default_value = "human")]
        output: OutputFormat,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default();
    if cli.verbose {
        log_config = log_config.with_level(Level::DEBUG);
    }
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_log_dir(dir);
    }
    if let Err(e) = init_logging("img_shrink", log_config) {
        eprintln!("⚠️  Logging disabled: {:#}", e);
    }

    let command = cli.command.unwrap_or(Commands::Run {
        dry_run: false,
        output: OutputFormat::Human,
    });

    match command {
        Commands::Run { dry_run, output } => {
            let config = load_config(&cli.config_file)?;
            let store = SqliteStore::open(&config.sql)?;
            let encoder = MagickEncoder::new(&config.encoder.program)?;
            let settings = EngineSettings::from_config(&config)?;
            let mut engine = Reconciler::new(settings, store, encoder);

            let report = engine
                .run(RunOptions { dry_run })
                .context("❌ Run aborted, nothing was committed")?;
            match output {
                OutputFormat::Human => print_run_summary(&report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }

        Commands::Plan {
            width,
            height,
            file,
            use_config,
        } => {
            let caps = if use_config {
                load_config(&cli.config_file)?.sizes.caps()
            } else {
                SizeCaps::default()
            };
            let (w, h, name) = match (file, width, height) {
                (Some(path), _, _) => {
                    let (w, h) = image::image_dimensions(&path)
                        .with_context(|| format!("Failed to read dimensions of {}", path.display()))?;
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    (w, h, name)
                }
                (None, Some(w), Some(h)) => (w, h, "image.png".to_string()),
                _ => anyhow::bail!("WIDTH and HEIGHT, or --file, are required"),
            };
            if w == 0 || h == 0 {
                anyhow::bail!("Dimensions must be positive, got {}x{}", w, h);
            }
            print_plan(&ImgScaler::with_caps(w, h, caps), &name);
        }

        Commands::Audit { output } => {
            let config = load_config(&cli.config_file)?;
            let store = SqliteStore::open(&config.sql)?;
            let report = audit(&store, config.sizes.caps())?;
            match output {
                OutputFormat::Human => print_audit_report(&report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if !report.is_clean() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    let config = Config::load(path)?;
    tracing::debug!(
        config = %path.display(),
        uploads = %config.wp_server.wp_uploads.display(),
        database = %config.sql.database.display(),
        "Configuration loaded"
    );
    Ok(config)
}
