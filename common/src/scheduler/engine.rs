// Scheduler engine implementation
// Fires the job pipeline once per due recurrence instance

use crate::config::ScheduleConfig;
use crate::errors::{ScheduleError, ValidationError};
use crate::models::{JobRun, TriggerSource};
use crate::pipeline::JobRunner;
use crate::schedule::{default_timezone, parse_cron_expression, RecurrenceTracker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Five-field cron expression
    pub cron: String,
    pub timezone: Tz,
    /// How often to check whether an instance is due (in seconds)
    pub poll_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron: "0 17 * * *".to_string(),
            timezone: default_timezone(),
            poll_interval_seconds: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &ScheduleConfig) -> Result<Self, ValidationError> {
        parse_cron_expression(&settings.cron)?;
        Ok(Self {
            cron: settings.cron.clone(),
            timezone: settings.tz()?,
            poll_interval_seconds: settings.poll_interval_seconds,
        })
    }
}

/// Scheduler trait for job scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start the scheduler polling loop; returns after `stop`
    async fn start(&self);

    /// Ask the polling loop to stop after any in-flight run completes
    async fn stop(&self);

    /// Run the job if an instance is due at `now`
    async fn process_due(&self, now: DateTime<Utc>) -> Result<Option<JobRun>, ScheduleError>;
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    config: SchedulerConfig,
    runner: Arc<dyn JobRunner>,
    tracker: Mutex<RecurrenceTracker>,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerEngine {
    /// Create a new scheduler engine; the first instance is strictly after `start`
    pub fn new(
        config: SchedulerConfig,
        runner: Arc<dyn JobRunner>,
        start: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let tracker = RecurrenceTracker::new(&config.cron, config.timezone, start)?;
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        info!(
            cron = %config.cron,
            timezone = %config.timezone,
            next_due = %tracker.next_due(),
            "Scheduler engine created"
        );

        Ok(Self {
            config,
            runner,
            tracker: Mutex::new(tracker),
            shutdown_tx,
        })
    }

    /// Next instance the engine will fire
    pub async fn next_due(&self) -> DateTime<Utc> {
        self.tracker.lock().await.next_due()
    }

    /// Run the job now, waiting for any scheduled run in progress
    ///
    /// Does not consume a recurrence instance.
    #[instrument(skip(self))]
    pub async fn run_once_manual(&self) -> JobRun {
        let _guard = self.tracker.lock().await;
        info!("Manual run requested");
        self.runner.run(TriggerSource::Manual).await
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self))]
    async fn start(&self) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "Starting scheduler engine"
        );

        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_seconds));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // A due run executes inside the tick branch, so shutdown waits for it
            tokio::select! {
                _ = poll_interval.tick() => {
                    match self.process_due(Utc::now()).await {
                        Ok(Some(run)) => {
                            info!(run_id = %run.id, exit_code = run.process_exit_code(), "Scheduled run completed");
                        }
                        Ok(None) => debug!("No instance due"),
                        Err(e) => error!(error = %e, "Failed to evaluate schedule"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown channel closed");
                        break;
                    }
                }
            }
        }

        info!("Scheduler engine stopped");
    }

    #[instrument(skip(self))]
    async fn stop(&self) {
        info!("Stopping scheduler engine");
        self.shutdown_tx.send_replace(true);
    }

    #[instrument(skip(self))]
    async fn process_due(&self, now: DateTime<Utc>) -> Result<Option<JobRun>, ScheduleError> {
        // Holding the tracker lock across the run keeps the job from overlapping itself
        let mut tracker = self.tracker.lock().await;

        let due = match tracker.poll(now)? {
            Some(due) => due,
            None => return Ok(None),
        };

        if due.missed > 0 {
            warn!(
                missed = due.missed,
                instance = %due.instance,
                "Recurrence instances elapsed without a run; firing only the latest"
            );
        }
        info!(instance = %due.instance, next_due = %tracker.next_due(), "Recurrence instance due");

        let run = self
            .runner
            .run(TriggerSource::Scheduled {
                instance: due.instance,
            })
            .await;

        Ok(Some(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for CountingRunner {
        async fn run(&self, trigger: TriggerSource) -> JobRun {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let mut run = JobRun::new("test", trigger);
            run.succeed();
            run
        }
    }

    fn utc(d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.cron, "0 17 * * *");
        assert_eq!(config.timezone, default_timezone());
        assert_eq!(config.poll_interval_seconds, 30);
    }

    #[test]
    fn test_scheduler_config_from_settings() {
        let settings = ScheduleConfig {
            cron: "0 2 * * *".to_string(),
            timezone: "Asia/Tokyo".to_string(),
            poll_interval_seconds: 5,
        };
        let config = SchedulerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.timezone.to_string(), "Asia/Tokyo");

        let bad = ScheduleConfig {
            cron: "every day".to_string(),
            ..settings
        };
        assert!(SchedulerConfig::from_settings(&bad).is_err());
    }

    #[tokio::test]
    async fn test_process_due_runs_once_per_instance() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
        });
        let engine =
            SchedulerEngine::new(SchedulerConfig::default(), runner.clone(), utc(1, 0, 0)).unwrap();

        assert!(engine.process_due(utc(1, 16, 59)).await.unwrap().is_none());

        let run = engine.process_due(utc(1, 17, 0)).await.unwrap().unwrap();
        assert_eq!(
            run.trigger,
            TriggerSource::Scheduled {
                instance: utc(1, 17, 0)
            }
        );

        assert!(engine.process_due(utc(1, 17, 0)).await.unwrap().is_none());
        assert!(engine.process_due(utc(1, 23, 0)).await.unwrap().is_none());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        assert!(engine.process_due(utc(2, 17, 0)).await.unwrap().is_some());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
        assert_eq!(engine.next_due().await, utc(3, 17, 0));
    }

    #[tokio::test]
    async fn test_manual_run_leaves_schedule_untouched() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
        });
        let engine =
            SchedulerEngine::new(SchedulerConfig::default(), runner.clone(), utc(1, 0, 0)).unwrap();

        let run = engine.run_once_manual().await;
        assert_eq!(run.trigger, TriggerSource::Manual);
        assert_eq!(engine.next_due().await, utc(1, 17, 0));

        assert!(engine.process_due(utc(1, 17, 0)).await.unwrap().is_some());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_ends_polling_loop() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
        });
        let config = SchedulerConfig {
            poll_interval_seconds: 1,
            ..SchedulerConfig::default()
        };
        let engine = Arc::new(SchedulerEngine::new(config, runner.clone(), Utc::now()).unwrap());

        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop().await;

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_before_start_returns_immediately() {
        let runner = Arc::new(CountingRunner {
            runs: AtomicUsize::new(0),
        });
        let engine = SchedulerEngine::new(SchedulerConfig::default(), runner, Utc::now()).unwrap();
        engine.stop().await;
        tokio::time::timeout(Duration::from_secs(5), engine.start())
            .await
            .expect("scheduler did not stop");
    }
}
