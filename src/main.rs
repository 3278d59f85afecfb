use anyhow::Result;
use clap::{Parser, Subcommand};
use portal_chat::{commands, Config};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portal-chat")]
#[command(version)]
#[command(about = "Chat with the vendor portal agent from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Chat endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Sender identifier (e-mail) sent with every message
    #[arg(long, global = true)]
    sender: Option<String>,

    /// Continue an existing thread instead of generating one
    #[arg(long, global = true)]
    thread_id: Option<String>,

    /// Request timeout in seconds (0 disables it)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single message and print the reply
    Send {
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Print a freshly generated thread id
    Thread,
    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(sender) = &self.sender {
            config.sender = sender.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if self.verbose == 0 {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return filter;
            }
        }
        match self.verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    }
}

/// Log to stderr for one-shot commands
fn init_stderr_logging(filter: EnvFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Log to a daily file while the terminal belongs to the widget
fn init_file_logging(filter: EnvFilter, config: &Config) -> Result<WorkerGuard> {
    std::fs::create_dir_all(config.log_dir())?;
    let appender = tracing_appender::rolling::daily(config.log_dir(), "portal-chat.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    cli.apply_overrides(&mut config);
    let thread_id = cli.thread_id.as_deref();

    match &cli.command {
        None => {
            let _guard = init_file_logging(cli.env_filter(), &config)?;
            commands::start_chat(&config, thread_id).await?;
        }
        Some(Commands::Send { message }) => {
            init_stderr_logging(cli.env_filter());
            let ok = commands::send_once(&config, thread_id, &message.join(" ")).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Some(Commands::Thread) => {
            commands::print_thread_id();
        }
        Some(Commands::Config { save }) => {
            init_stderr_logging(cli.env_filter());
            commands::show_config(&config, *save)?;
        }
    }

    Ok(())
}
