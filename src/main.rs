use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nimbula::config::Config;
use nimbula::resource::{Endpoint, Images, Instances, LaunchOptions, Sites, Volumes};
use nimbula::{NimbulaClient, ResourceId};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Version injected at compile time via NIMBULA_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("NIMBULA_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Command-line client for Nimbula Director clouds
#[derive(Parser, Debug)]
#[command(name = "nimbula", version = VERSION, about, long_about = None)]
struct Args {
    /// Backend base URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Account the user belongs to
    #[arg(long, global = true)]
    account: Option<String>,

    /// User name
    #[arg(long, global = true)]
    user: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Seconds to wait for launch/terminate before giving up
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate and store the session cookie
    Login,
    /// Fetch one resource as JSON
    Get { endpoint: Endpoint, id: String },
    /// List an endpoint's collection for the account
    List { endpoint: Endpoint },
    /// Enumerate names below the account, optionally below a sub-path
    Discover { endpoint: Endpoint, sub: Option<String> },
    /// List instances
    Instances,
    /// Launch an instance and wait until it is running
    Launch {
        #[arg(long)]
        image: String,
        #[arg(long)]
        shape: String,
        #[arg(long)]
        name: String,
        #[arg(long = "seclist")]
        seclists: Vec<String>,
    },
    /// Terminate an instance and wait until it is gone
    Terminate { id: String },
    /// List machine images
    Images {
        /// Show the public library instead of the account's images
        #[arg(long)]
        public: bool,
        /// Search own and public images for a keyword
        #[arg(long, conflicts_with = "public")]
        search: Option<String>,
    },
    /// List storage volumes
    Volumes,
    /// List sites
    Regions,
    /// Split a resource id into account, user and name
    ParseId { id: String },
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

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.to_string().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("nimbula {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("nimbula").join("nimbula.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".nimbula").join("nimbula.log");
    }
    PathBuf::from("nimbula.log")
}

/// Resolves when the user presses Ctrl-C
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn load_config(args: &Args) -> Config {
    let mut config = Config::load().with_env();
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(account) = &args.account {
        config.account = Some(account.clone());
    }
    if let Some(user) = &args.user {
        config.user = Some(user.clone());
    }
    if let Some(timeout) = args.timeout {
        config.poll_timeout_secs = timeout;
    }
    config
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    if let Command::ParseId { id } = &args.command {
        let parsed = ResourceId::parse(id)?;
        println!("account: {}", parsed.account);
        println!("user:    {}", parsed.user);
        println!("name:    {}", parsed.name);
        return Ok(());
    }

    let config = load_config(&args);
    let client = NimbulaClient::from_config(&config).context("Failed to set up client")?;

    match args.command {
        Command::Login => {
            client.reset_session().await;
            client.ensure_session().await.context("Login failed")?;
            println!("Authenticated as {}", client.name_prefix());
        }
        Command::Get { endpoint, id } => {
            let mut method = client.method(endpoint);
            match method.get(&id).await? {
                401 => anyhow::bail!("Not authorized to read {}", id),
                404 => anyhow::bail!("{} not found", id),
                _ => print_json(&method.response_body()?)?,
            }
        }
        Command::List { endpoint } => {
            let mut method = client.method(endpoint);
            method.list().await?;
            print_json(&method.response_body()?)?;
        }
        Command::Discover { endpoint, sub } => {
            let mut method = client.method(endpoint);
            method.discover(sub.as_deref()).await?;
            print_json(&method.response_body()?)?;
        }
        Command::Instances => {
            for vm in Instances::new(client).list().await? {
                println!(
                    "{:<40} {:<12} {:<12} {}",
                    vm.id,
                    vm.state,
                    vm.product_id.as_deref().unwrap_or("-"),
                    vm.private_ips.join(",")
                );
            }
        }
        Command::Launch {
            image,
            shape,
            name,
            seclists,
        } => {
            let options = LaunchOptions {
                image_id: image,
                shape,
                label: name,
                seclists,
            };
            let vm = Instances::new(client).launch(&options, interrupted()).await?;
            println!("{} is {}", vm.id, vm.state);
        }
        Command::Terminate { id } => {
            Instances::new(client).terminate(&id, interrupted()).await?;
            println!("{} terminated", id);
        }
        Command::Images { public, search } => {
            let images = Images::new(client);
            let found = match (public, search) {
                (_, Some(keyword)) => images.search(Some(keyword.as_str())).await?,
                (true, None) => images.list_owned_by(None).await?,
                (false, None) => images.list().await?,
            };
            for image in found {
                println!("{:<48} {}", image.id, image.description);
            }
        }
        Command::Volumes => {
            for volume in Volumes::new(client).list().await? {
                println!(
                    "{:<56} {:<10} {:>8} {}",
                    volume.id,
                    format!("{:?}", volume.state),
                    volume.size_mb.map(|s| format!("{}MB", s)).unwrap_or_default(),
                    volume.instance_id.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Regions => {
            for region in Sites::new(client).list_regions().await? {
                println!("{}", region.name);
            }
        }
        Command::ParseId { .. } => {}
    }

    Ok(())
}
