//! Driver loop: ticks and host events in, announcements out.
//!
//! Evaluation and composition happen on the loop itself. Everything that
//! can wait on the network after a decision (rewrite, speech, history)
//! runs in a spawned task so a slow target never delays the next tick.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::composer::compose;
use crate::config::{Config, ConfigWatcher};
use crate::dispatcher::{dispatch, SpeechSink};
use crate::history::{AnnouncementRecord, History};
use crate::home_assistant::WeatherSource;
use crate::rewriter::OllamaRewriter;
use crate::triggers::{self, Decision, EngineEvent, InstanceState, TriggerEvaluator, TriggerInstance};
use crate::weather::WeatherSnapshot;

/// What the status endpoint reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub started_at: Option<NaiveDateTime>,
    pub last_tick: Option<NaiveDateTime>,
    pub config_path: Option<String>,
    pub dry_run: bool,
    pub targets: usize,
    pub weather_fetched_at: Option<NaiveDateTime>,
    pub weather_error: Option<String>,
    pub announcements: u64,
    pub instances: BTreeMap<String, InstanceState>,
}

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub struct AnnouncementService {
    config: Arc<Config>,
    watcher: ConfigWatcher,
    instances: Vec<TriggerInstance>,
    evaluator: TriggerEvaluator,
    weather: Arc<dyn WeatherSource>,
    sink: Arc<dyn SpeechSink>,
    rewriter: Option<Arc<OllamaRewriter>>,
    history: Option<History>,
    snapshot: Option<WeatherSnapshot>,
    refreshed: Option<Instant>,
    dry_run: bool,
    status: EngineStatus,
    status_tx: watch::Sender<EngineStatus>,
}

impl AnnouncementService {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        weather: Arc<dyn WeatherSource>,
        sink: Arc<dyn SpeechSink>,
    ) -> Self {
        let watcher = ConfigWatcher::new(config_path);
        let status = EngineStatus {
            started_at: Some(local_now()),
            config_path: watcher.path().map(|p| p.display().to_string()),
            ..EngineStatus::default()
        };
        let (status_tx, _) = watch::channel(status.clone());

        let mut service = Self {
            config: Arc::new(Config::default()),
            watcher,
            instances: Vec::new(),
            evaluator: TriggerEvaluator::new(),
            weather,
            sink,
            rewriter: None,
            history: None,
            snapshot: None,
            refreshed: None,
            dry_run: false,
            status,
            status_tx,
        };
        service.apply_config(config);
        service
    }

    /// Compose and log announcements without speaking them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self.status.dry_run = dry_run;
        self
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    fn apply_config(&mut self, config: Config) {
        for problem in config.validate() {
            warn!("Config: {problem}");
        }
        if self.config.home_assistant != config.home_assistant && self.status.last_tick.is_some() {
            info!("home_assistant settings changed, restart to apply them");
        }

        self.instances = triggers::instances(&config.triggers);
        self.evaluator.prune(&self.instances);
        self.rewriter = config
            .rewrite
            .enabled
            .then(|| Arc::new(OllamaRewriter::new(&config.rewrite)));
        self.history = config
            .history
            .enabled
            .then(|| History::new(config.history.resolved_dir()));
        self.status.targets = config.targets.len();
        info!(
            "{} trigger instances, {} audio targets",
            self.instances.len(),
            config.targets.len()
        );
        self.config = Arc::new(config);
    }

    fn snapshot_is_stale(&self) -> bool {
        let max_age = Duration::from_secs(self.config.engine.weather_refresh_seconds);
        self.refreshed.map_or(true, |at| at.elapsed() >= max_age)
    }

    async fn refresh_weather(&mut self) {
        if !self.snapshot_is_stale() {
            return;
        }
        match self.weather.snapshot(&self.config.thresholds).await {
            Ok(snapshot) => {
                self.status.weather_fetched_at = snapshot.fetched_at;
                self.status.weather_error = None;
                self.snapshot = Some(snapshot);
                self.refreshed = Some(Instant::now());
            }
            Err(e) => {
                // Keep the previous snapshot; retry on the next event.
                warn!("Weather refresh failed: {e}");
                self.status.weather_error = Some(e.to_string());
            }
        }
    }

    /// Handle one tick or host event. Returns the spawned announcement
    /// tasks, one per decision.
    pub async fn handle(&mut self, event: EngineEvent) -> Vec<JoinHandle<AnnouncementRecord>> {
        if let EngineEvent::Tick { now } = &event {
            self.status.last_tick = Some(*now);
            if let Some(config) = self.watcher.poll() {
                self.apply_config(config);
            }
        }
        self.refresh_weather().await;

        let decisions = self.evaluator.evaluate(
            &self.instances,
            &event,
            self.snapshot.as_ref(),
            &self.config.thresholds,
        );
        if decisions.is_empty() {
            debug!("No trigger fired for {event:?}");
        }

        let tasks = decisions
            .into_iter()
            .map(|decision| self.announce(decision))
            .collect();
        self.publish_status();
        tasks
    }

    fn announce(&mut self, decision: Decision) -> JoinHandle<AnnouncementRecord> {
        let empty = WeatherSnapshot::default();
        let snapshot = self.snapshot.as_ref().unwrap_or_else(|| {
            warn!("No weather snapshot, announcing without forecast data");
            &empty
        });
        let message = compose(
            snapshot,
            decision.kind,
            &decision.context,
            &self.config.thresholds,
        );
        info!("Trigger {} fired: {message}", decision.instance_id);
        self.status.announcements += 1;

        let config = self.config.clone();
        let sink = self.sink.clone();
        let rewriter = self.rewriter.clone();
        let history = self.history.clone();
        let dry_run = self.dry_run;

        tokio::spawn(async move {
            let (message, rewritten) = match rewriter {
                Some(rewriter) => {
                    let text = rewriter.rewrite(&message).await;
                    let changed = text != message;
                    (text, changed)
                }
                None => (message, false),
            };

            let report = if dry_run {
                info!("[dry-run] {}: {message}", decision.instance_id);
                Default::default()
            } else {
                dispatch(&message, &config, sink.as_ref(), decision.volume_override).await
            };
            if report.failures() > 0 {
                warn!(
                    "{} delivered to {} of {} targets",
                    decision.instance_id,
                    report.delivered(),
                    report.outcomes.len()
                );
            } else if !dry_run {
                debug!("{} delivered to {} targets", decision.instance_id, report.delivered());
            }

            let record = AnnouncementRecord {
                timestamp: decision.context.now,
                trigger: decision.kind.to_string(),
                instance_id: decision.instance_id,
                message,
                rewritten,
                dry_run,
                outcomes: report.outcomes,
            };
            if let Some(history) = history {
                history.save(&record);
            }
            record
        })
    }

    fn publish_status(&mut self) {
        self.status.instances = self
            .evaluator
            .state()
            .instances
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        self.status_tx.send_replace(self.status.clone());
    }

    /// Run until `cancel` fires. Host events arrive on `events`.
    pub async fn run(&mut self, mut events: mpsc::Receiver<EngineEvent>, cancel: CancellationToken) {
        let mut period = self.config.engine.tick_period();
        let mut ticker = tick_interval(tokio::time::Instant::now(), period);

        info!("Announcement engine ready, ticking every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutting down announcement engine");
                    break;
                }
                _ = ticker.tick() => {
                    self.handle(EngineEvent::Tick { now: local_now() }).await;
                    let reloaded = self.config.engine.tick_period();
                    if reloaded != period {
                        info!("Tick period changed to {}s", reloaded.as_secs());
                        period = reloaded;
                        ticker = tick_interval(tokio::time::Instant::now() + period, period);
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            self.handle(event).await;
                        }
                        None => {
                            warn!("Event channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Skipped ticks are dropped; the time-based check catches up on any
/// scheduled minute they covered.
fn tick_interval(start: tokio::time::Instant, period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioTarget, WebhookBinding};
    use crate::dispatcher::SpeakRequest;
    use crate::error::{DispatchError, WeatherError};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedWeather(WeatherSnapshot);

    #[async_trait]
    impl WeatherSource for FixedWeather {
        async fn snapshot(&self, _: &crate::config::Thresholds) -> Result<WeatherSnapshot, WeatherError> {
            Ok(self.0.clone())
        }
    }

    struct NoWeather;

    #[async_trait]
    impl WeatherSource for NoWeather {
        async fn snapshot(&self, _: &crate::config::Thresholds) -> Result<WeatherSnapshot, WeatherError> {
            Err(WeatherError::NotConfigured)
        }
    }

    /// Fails the first fetch, then serves `sunny()`.
    #[derive(Default)]
    struct FlakyWeather(AtomicUsize);

    #[async_trait]
    impl WeatherSource for FlakyWeather {
        async fn snapshot(&self, _: &crate::config::Thresholds) -> Result<WeatherSnapshot, WeatherError> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(WeatherError::Network("connection refused".into()))
            } else {
                Ok(sunny())
            }
        }
    }

    #[derive(Default)]
    struct Captured(Mutex<Vec<SpeakRequest>>);

    #[async_trait]
    impl SpeechSink for Captured {
        async fn speak(&self, request: &SpeakRequest) -> Result<(), DispatchError> {
            self.0.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.engine.default_tts_engine = Some("tts.piper".into());
        config.targets = vec![AudioTarget::new("media_player.kitchen")];
        config.history.enabled = false;
        config.triggers.time_based.enabled = false;
        config.triggers.webhook.enabled = true;
        config.triggers.webhook.webhooks = vec![WebhookBinding {
            webhook_id: "alarm".into(),
            enabled: true,
            personal_name: Some("Robin".into()),
        }];
        config.triggers.current_change.enabled = true;
        config
    }

    fn sunny() -> WeatherSnapshot {
        let mut snapshot = WeatherSnapshot::default();
        snapshot.current.condition = Some("sunny".into());
        snapshot.current.temperature = Some(70.0);
        snapshot
    }

    #[tokio::test]
    async fn webhook_event_speaks_on_targets() {
        let sink = Arc::new(Captured::default());
        let mut service =
            AnnouncementService::new(config(), None, Arc::new(FixedWeather(sunny())), sink.clone());

        let tasks = service
            .handle(EngineEvent::WebhookCalled {
                webhook_id: "alarm".into(),
                name: None,
                volume: Some(0.9),
                now: at(6, 30),
            })
            .await;
        assert_eq!(tasks.len(), 1);
        let record = tasks.into_iter().next().unwrap().await.unwrap();

        assert_eq!(record.trigger, "webhook");
        assert!(record.message.starts_with("Good morning, the time is six thirty AM Robin."));
        let requests = sink.0.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].volume, 0.9);
        assert_eq!(requests[0].message, record.message);
    }

    #[tokio::test]
    async fn dry_run_speaks_nothing() {
        let sink = Arc::new(Captured::default());
        let mut service =
            AnnouncementService::new(config(), None, Arc::new(FixedWeather(sunny())), sink.clone())
                .with_dry_run(true);

        let tasks = service
            .handle(EngineEvent::WebhookCalled {
                webhook_id: "alarm".into(),
                name: None,
                volume: None,
                now: at(6, 30),
            })
            .await;
        for task in tasks {
            let record = task.await.unwrap();
            assert!(record.dry_run);
            assert!(record.outcomes.is_empty());
        }
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn weather_failure_does_not_stop_webhooks() {
        let sink = Arc::new(Captured::default());
        let mut service = AnnouncementService::new(config(), None, Arc::new(NoWeather), sink.clone());
        let status = service.status();

        let tasks = service
            .handle(EngineEvent::WebhookCalled {
                webhook_id: "alarm".into(),
                name: Some("Kai".into()),
                volume: None,
                now: at(7, 0),
            })
            .await;
        let record = tasks.into_iter().next().unwrap().await.unwrap();
        assert_eq!(record.message, "Good morning, the time is seven AM Kai.");
        assert!(status.borrow().weather_error.is_some());
    }

    #[tokio::test]
    async fn failed_weather_fetch_retries_on_next_tick() {
        let sink = Arc::new(Captured::default());
        let weather = Arc::new(FlakyWeather::default());
        let mut service = AnnouncementService::new(config(), None, weather.clone(), sink);
        let status = service.status();

        service.handle(EngineEvent::Tick { now: at(9, 0) }).await;
        assert!(status.borrow().weather_error.is_some());

        service.handle(EngineEvent::Tick { now: at(9, 1) }).await;
        assert_eq!(weather.0.load(Ordering::SeqCst), 2);
        assert!(status.borrow().weather_error.is_none());
        assert_eq!(
            status.borrow().instances["current_change"].last_seen.as_deref(),
            Some("sunny")
        );

        // A good snapshot is kept for the refresh interval.
        service.handle(EngineEvent::Tick { now: at(9, 2) }).await;
        assert_eq!(weather.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn status_reports_config_path() {
        let service = AnnouncementService::new(
            config(),
            Some(PathBuf::from("/etc/weather-announcer/config.yaml")),
            Arc::new(NoWeather),
            Arc::new(Captured::default()),
        );
        assert_eq!(
            service.status().borrow().config_path.as_deref(),
            Some("/etc/weather-announcer/config.yaml")
        );
    }

    #[tokio::test]
    async fn status_tracks_ticks_and_instances() {
        let sink = Arc::new(Captured::default());
        let mut service =
            AnnouncementService::new(config(), None, Arc::new(FixedWeather(sunny())), sink);
        let status = service.status();

        let tasks = service.handle(EngineEvent::Tick { now: at(9, 0) }).await;
        assert!(tasks.is_empty());

        let status = status.borrow();
        assert_eq!(status.last_tick, Some(at(9, 0)));
        assert_eq!(status.targets, 1);
        assert_eq!(
            status.instances["current_change"].last_seen.as_deref(),
            Some("sunny")
        );
    }
}
