//! mailshot CLI - resumable bulk email campaigns.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailshot::{
    expand_sources, make_mailer, CheckpointStore, Config, Dispatcher, MessageSpec, ProviderKind,
    RosterWalker,
};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mailshot")]
#[command(version)]
#[command(about = "Resumable bulk email campaigns over Mailgun, SendGrid and Mailchimp")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "mailshot.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the campaign to every unseen mailing-list row
    Send {
        /// Mailing-list CSV files or directories (overrides the config)
        #[arg(short, long)]
        list: Vec<PathBuf>,

        /// Cap on rows handled this run
        #[arg(long)]
        max: Option<u64>,

        /// Provider test mode; nothing is delivered or committed
        #[arg(long)]
        dry: bool,

        /// Provider override: mailgun, sendgrid or mailchimp
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// RFC 3339 delivery time, for providers that schedule sends
        #[arg(long)]
        delivery_time: Option<String>,
    },

    /// Show checkpoint progress per mailing-list source
    Status,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# mailshot configuration file

[provider]
default = "mailgun"

[mailgun]
# API key (can also use MAILGUN_API_KEY env var)
# api_key = "key-..."
domain = "mg.example.com"
timeout_secs = 30
max_retries = 3

[mailgun.options]
tag = ["newsletter"]
dkim = true
tracking = true
tracking_clicks = "yes"
tracking_opens = true

[sendgrid]
# api_key = "SG...."  # or SENDGRID_API_KEY env var

[mailchimp]
# api_key = "..."  # or MAILCHIMP_API_KEY env var
server_prefix = "us21"

# Required before mailshot may create an audience
[mailchimp.contact]
company = "Example SARL"
address1 = "1 rue de l'Exemple"
city = "Paris"
zip = "75001"
country = "FR"

[message]
subject = "October news"
from = "Jane Ops <news@example.com>"
text_file = "message/october.txt"
html_file = "message/october.html"
tags = ["october", "newsletter"]
# Marketing resource names, resolved or created on the Mailchimp side
audience = "Newsletter"
template = "october-2026"
campaign = "october-2026"

[dispatch]
mailing_lists = ["mailing-list"]
checkpoint = "send.cache.json"
resource_cache = "send.mailchimp-cache.json"
concurrency = 8
# max = 100
# delivery_time = "2026-09-01T10:00:00+02:00"
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let kind = config.provider.default;
            config.validate(kind).context("Invalid configuration")?;
            config
                .resolve_api_key(kind)
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Provider: {kind}");
            info!(
                "  Message:  \"{}\" from {}",
                config.message.subject, config.message.from
            );
            info!("  Sources:  {:?}", config.dispatch.mailing_lists);
            return Ok(());
        }

        Commands::Status => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let store = CheckpointStore::open(&config.dispatch.checkpoint);
            let state = store.state();

            if state.data.is_empty() {
                println!(
                    "No campaign checkpoint at {:?}",
                    config.dispatch.checkpoint
                );
                return Ok(());
            }

            println!(
                "Campaign: {}",
                if state.metadata.done {
                    "done"
                } else {
                    "in progress"
                }
            );
            println!("Rows dispatched: {}", state.metadata.nb);
            println!("Failures:        {}", state.failure_count());
            println!();

            for (source, entry) in &state.data {
                println!("{source}");
                println!("  last index: {}", entry.last_index);
                println!("  done:       {}", entry.done);
                for e in &entry.errors {
                    println!("  row {}: {}", e.row, e.error);
                }
            }
            return Ok(());
        }

        Commands::Send {
            list,
            max,
            dry,
            provider,
            delivery_time,
        } => {
            let mut config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            // CLI overrides
            if !list.is_empty() {
                config.dispatch.mailing_lists = list;
            }
            if max.is_some() {
                config.dispatch.max = max;
            }
            if delivery_time.is_some() {
                config.dispatch.delivery_time = delivery_time;
            }

            let kind = provider.unwrap_or(config.provider.default);
            config.validate(kind).context("Invalid configuration")?;

            let mailer = make_mailer(kind, &config)?;
            let spec = MessageSpec::from_config(&config, dry)?;

            let sources = expand_sources(&config.dispatch.mailing_lists)
                .context("Failed to expand mailing-list sources")?;
            if sources.is_empty() {
                println!("No mailing-list sources found, nothing to send");
                return Ok(());
            }

            info!(
                provider = %kind,
                sources = sources.len(),
                dry_run = dry,
                "Starting campaign dispatch"
            );

            let mut walker = RosterWalker::new(sources, config.dispatch.max);
            let mut store = CheckpointStore::open(&config.dispatch.checkpoint);
            let dispatcher = Dispatcher::new(mailer, spec, config.dispatch.concurrency);

            let stats = dispatcher.run(&mut walker, &mut store).await?;

            println!("\n=== Campaign Dispatch Complete ===");
            println!("Rows:        {}", stats.rows);
            println!("Sent:        {}", stats.sent);
            println!("Failed:      {}", stats.failed);
            println!("All runs:    {} rows dispatched", store.state().metadata.nb);
            println!(
                "Campaign:    {}",
                if store.state().metadata.done {
                    "done"
                } else {
                    "in progress"
                }
            );
            println!("Checkpoint:  {:?}", config.dispatch.checkpoint);
        }
    }

    Ok(())
}
