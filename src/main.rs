//! weather-announcer: spoken weather announcements for Home Assistant.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weather_announcer::api::{self, ApiState};
use weather_announcer::composer::compose;
use weather_announcer::config::Config;
use weather_announcer::dispatcher::{LogSpeaker, SpeechSink};
use weather_announcer::history::History;
use weather_announcer::home_assistant::{HomeAssistantClient, WeatherSource};
use weather_announcer::service::{local_now, AnnouncementService};
use weather_announcer::triggers::{TriggerContext, TriggerKind};

#[derive(Parser, Debug)]
#[command(name = "weather-announcer", about = "Spoken weather announcements for Home Assistant")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Compose and log announcements without speaking them
    #[arg(long)]
    dry_run: bool,

    /// Print one announcement of this kind from live weather and exit
    /// (scheduled, sensor, current_change, upcoming_change, webhook, voice)
    #[arg(long, value_name = "KIND")]
    preview: Option<TriggerKind>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise keep HTTP internals quiet
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            EnvFilter::new("debug,hyper=info,reqwest=info")
        } else {
            EnvFilter::new("info,hyper=warn")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("weather-announcer starting");

    let config_path = Config::resolve_path(args.config.as_deref());
    let config = Config::load(config_path.as_deref());
    let home_assistant = Arc::new(HomeAssistantClient::new(&config.home_assistant));

    if let Some(kind) = args.preview {
        let snapshot = home_assistant.snapshot(&config.thresholds).await?;
        let message = compose(&snapshot, kind, &TriggerContext::at(local_now()), &config.thresholds);
        println!("{message}");
        return Ok(());
    }

    let sink: Arc<dyn SpeechSink> = if args.dry_run {
        info!("Dry run: announcements will be logged, not spoken");
        Arc::new(LogSpeaker)
    } else {
        home_assistant.clone()
    };

    let cancel = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(64);

    let api_config = config.api.clone();
    let history = config
        .history
        .enabled
        .then(|| History::new(config.history.resolved_dir()));

    let mut service = AnnouncementService::new(config, config_path, home_assistant, sink)
        .with_dry_run(args.dry_run);

    if api_config.enabled {
        let state = ApiState {
            events: events_tx.clone(),
            status: service.status(),
            history,
        };
        api::start_api(state, &api_config.bind, api_config.port, cancel.clone()).await;
    }

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {e}");
                return;
            }
            cancel.cancel();
        }
    });

    // events_tx stays alive here so the loop also runs on ticks alone
    service.run(events_rx, cancel).await;
    drop(events_tx);

    Ok(())
}
