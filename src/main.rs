use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use skyrelay::config::{
    self, config_path, ConfigFile, LocalSection, RelaySettings, RemoteSection,
    DEFAULT_HISTORY_EVERY, DEFAULT_REFRESH_HOURS, DEFAULT_SEND_INTERVAL_SECS, LOCAL_DATA_DIR,
};
use skyrelay::logging;
use skyrelay::relay::RelaySession;
use skyrelay::shutdown::ShutdownFlag;
use skyrelay::supervisor::Supervisor;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "skyrelay")]
#[command(about = "Relay dump1090-fa telemetry snapshots to a remote archive over SFTP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure a relay for a local or remote PiAware installation
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Run the relay with a previously written configuration
    Run {
        #[arg(long = "config", value_name = "FILE")]
        config_file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Configure a relay that reads dump1090-fa output from this host
    Local {
        #[command(flatten)]
        relay: RelayArgs,
        /// Local path of dump1090-fa output
        #[arg(long, default_value = LOCAL_DATA_DIR)]
        data_dir: PathBuf,
        #[arg(long = "config", value_name = "FILE")]
        config_file: Option<PathBuf>,
    },
    /// Configure a relay that polls a companion PiAware host over HTTP
    Remote {
        #[command(flatten)]
        relay: RelayArgs,
        /// Hostname of the PiAware server running dump1090-fa
        #[arg(long)]
        piaware_host: String,
        #[arg(long = "config", value_name = "FILE")]
        config_file: Option<PathBuf>,
    },
    /// Print the config file contents
    Show,
    /// Print the resolved config file path
    Path,
}

#[derive(Args)]
struct RelayArgs {
    /// Remote host that archives the snapshot files
    #[arg(short = 'H', long)]
    remote_host: String,

    /// User for connecting to the remote host
    #[arg(short = 'u', long)]
    remote_user: String,

    /// SSH private key used when connecting to the remote host
    #[arg(short = 'k', long)]
    remote_key: PathBuf,

    /// Remote directory in which to place the snapshot files
    #[arg(short = 'p', long)]
    remote_path: String,

    /// Skip attempting to create the remote directory on initialization
    #[arg(short = 'd', long)]
    skip_remote_dir_creation: bool,

    /// Seconds between sends; 5 or above may trip stale-data notifications
    #[arg(short = 's', long, default_value_t = DEFAULT_SEND_INTERVAL_SECS)]
    send_interval_secs: u64,

    /// Cycles between history snapshot updates (history updates take a while)
    #[arg(short = 'i', long, default_value_t = DEFAULT_HISTORY_EVERY)]
    update_history_every: u64,

    /// Re-establish the SSH session every N hours
    #[arg(short = 'r', long, default_value_t = DEFAULT_REFRESH_HOURS)]
    refresh_session_hours: u64,

    /// Log level: trace, debug, info, warn, or error
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl RelayArgs {
    fn into_settings(self) -> RelaySettings {
        RelaySettings {
            remote_host: self.remote_host,
            remote_user: self.remote_user,
            remote_key: self.remote_key,
            remote_path: self.remote_path,
            skip_remote_dir_creation: self.skip_remote_dir_creation,
            send_interval_secs: self.send_interval_secs,
            update_history_every: self.update_history_every,
            refresh_session_hours: self.refresh_session_hours,
            log_level: self.log_level,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config(command) => run_config(command),
        Commands::Run { config_file } => run_relay(config_file),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Local {
            relay,
            data_dir,
            config_file,
        } => {
            let file = ConfigFile {
                relay: relay.into_settings(),
                local: Some(LocalSection { data_dir }),
                remote: None,
            };
            write_and_report(config_file, &file)
        }
        ConfigCommands::Remote {
            relay,
            piaware_host,
            config_file,
        } => {
            let file = ConfigFile {
                relay: relay.into_settings(),
                local: None,
                remote: Some(RemoteSection { piaware_host }),
            };
            write_and_report(config_file, &file)
        }
        ConfigCommands::Show => {
            let path = config_path();
            let contents = std::fs::read_to_string(&path).with_context(|| {
                format!(
                    "No config file at {}; run `skyrelay config local|remote` first",
                    path.display()
                )
            })?;
            print!("{contents}");
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", config_path().display());
            Ok(())
        }
    }
}

fn write_and_report(path: Option<PathBuf>, file: &ConfigFile) -> Result<()> {
    let path = path.unwrap_or_else(config_path);
    config::write_config(&path, file)?;
    println!("Wrote configuration to {}", path.display());
    Ok(())
}

fn run_relay(config_file: Option<PathBuf>) -> Result<()> {
    let path = config_file.unwrap_or_else(config_path);

    // Bring logging up on the configured level before validating, so that
    // a fatal configuration conflict still lands in the log stream.
    let file = config::load_config_file(&path)?;
    let _log_guard = logging::init(&file.relay.log_level, Path::new("."))?;
    info!("configuration loaded from {}", path.display());

    let local_data_present = Path::new(LOCAL_DATA_DIR).exists();
    let resolved = match config::resolve(file, local_data_present) {
        Ok(resolved) => resolved,
        Err(err) => {
            // Logged here so the conflict lands in the log stream, then
            // returned so main exits with code 1 after the sinks flush.
            error!("fatal configuration error: {err:#}");
            return Err(err);
        }
    };
    log_options(&resolved);

    let shutdown = ShutdownFlag::new();
    shutdown.install()?;

    let session = RelaySession::from_config(resolved, shutdown.clone())?;
    let mut supervisor = Supervisor::new(session, shutdown);
    supervisor.run();

    info!("skyrelay exited");
    Ok(())
}

fn log_options(config: &skyrelay::config::RelayConfig) {
    let relay = &config.relay;
    info!("resolved options:");
    info!("    remote_host: {}", relay.remote_host);
    info!("    remote_user: {}", relay.remote_user);
    info!("    remote_key: {}", relay.remote_key.display());
    info!("    remote_path: {}", relay.remote_path);
    info!(
        "    skip_remote_dir_creation: {}",
        relay.skip_remote_dir_creation
    );
    info!("    send_interval_secs: {}", relay.send_interval_secs);
    info!("    update_history_every: {}", relay.update_history_every);
    info!("    refresh_session_hours: {}", relay.refresh_session_hours);
    info!("    log_level: {}", relay.log_level);
    match &config.source {
        skyrelay::config::Source::Local { data_dir } => {
            info!("    source: local [{}]", data_dir.display());
        }
        skyrelay::config::Source::Remote { piaware_host } => {
            info!("    source: remote [{piaware_host}]");
        }
    }
}
