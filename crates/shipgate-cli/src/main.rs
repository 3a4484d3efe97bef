mod cmd;
mod output;
mod settings;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, deploy::DeployArgs, stories::StoriesSubcommand,
    test::TestSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "shipgate",
    about = "Checklist-gated deployments and story test runs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: nearest shipgate.yaml upward from cwd)
    #[arg(long, global = true, env = "SHIPGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the story/analysis API (overrides api_base)
    #[arg(long, global = true, env = "SHIPGATE_API_BASE")]
    api_base: Option<String>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and event stream
    Serve {
        /// Port to listen on (0 = OS-assigned; default from config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// List stories known to the analysis service, or add one
    Stories {
        #[command(subcommand)]
        subcommand: Option<StoriesSubcommand>,
    },

    /// Show the impact analysis of a story
    Impact { story: String },

    /// Show a story's pre-deployment checklist
    Checklist { story: String },

    /// Check off the checklist and run the gated deployment to completion
    Deploy(DeployArgs),

    /// List and run a story's test items
    Test {
        #[command(subcommand)]
        subcommand: TestSubcommand,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = settings::load(cli.config.as_deref(), cli.api_base.as_deref()).and_then(|config| {
        match cli.command {
            Commands::Serve { port } => cmd::serve::run(&config, port),
            Commands::Stories { subcommand } => cmd::stories::run(&config, subcommand, cli.json),
            Commands::Impact { story } => cmd::impact::run(&config, &story, cli.json),
            Commands::Checklist { story } => cmd::checklist::run(&config, &story, cli.json),
            Commands::Deploy(args) => cmd::deploy::run(&config, args, cli.json),
            Commands::Test { subcommand } => cmd::test::run(&config, subcommand, cli.json),
            Commands::Config { subcommand } => cmd::config::run(&config, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
