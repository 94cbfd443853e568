use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use panotiles::config::ServiceConfig;
use panotiles::server::{AppState, RenderServer};
use panotiles_store::build_store;
use tokio::time::{Duration, sleep};

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about,
	long_about = None,
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Serve the cubemap render API via http
	Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
	/// Serve via socket ip. Default: 0.0.0.0
	#[arg(short = 'i', long)]
	ip: Option<String>,

	/// Serve via port. Default: 8080
	#[arg(short, long)]
	port: Option<u16>,

	/// Shutdown server automatically after x milliseconds.
	#[arg(long)]
	auto_shutdown: Option<u64>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(cli.verbose.log_level_filter())
		.format_timestamp(None)
		.init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	match &cli.command {
		Commands::Serve(arguments) => serve(arguments),
	}
}

#[tokio::main]
async fn serve(arguments: &ServeArgs) -> Result<()> {
	let mut config = ServiceConfig::from_env()?;
	if let Some(ip) = &arguments.ip {
		config.ip.clone_from(ip);
	}
	if let Some(port) = arguments.port {
		config.port = port;
	}

	let store = build_store(&config.storage())?;
	let state = AppState::new(config, store)?;

	let mut server = RenderServer::new(state);
	server.start().await?;
	log::info!("render API listening on port {}", server.port());

	if let Some(milliseconds) = arguments.auto_shutdown {
		sleep(Duration::from_millis(milliseconds)).await;
		server.stop().await;
	} else {
		loop {
			sleep(Duration::from_secs(60)).await;
		}
	}

	Ok(())
}
