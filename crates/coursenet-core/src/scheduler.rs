//! Weekly maintenance scheduler
//!
//! One recurring trigger with one bound job. Runs missed while the process
//! was down (or while a previous run was still going) are skipped, not
//! replayed. Nothing a run does can stop the scheduler; stopping the
//! scheduler kills a run in progress.

use crate::config::GatewayConfig;
use crate::error::{CoreError, Result};
use crate::notify::Notifier;
use crate::process::{Invocation, ProcessDelegate};
use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, NaiveTime, TimeZone, Timelike, Weekday,
};
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Longest single sleep; the wall clock is re-read after each one
const MAX_SLEEP: Duration = Duration::from_secs(15 * 60);

/// Fires once a week at a fixed local time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyTrigger {
    weekday: Weekday,
    hour: u32,
    minute: u32,
}

impl WeeklyTrigger {
    pub fn new(weekday: Weekday, hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(CoreError::InvalidConfig {
                message: format!("invalid trigger time {:02}:{:02}", hour, minute),
            });
        }
        Ok(Self {
            weekday,
            hour,
            minute,
        })
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// First firing instant strictly after `now`
    ///
    /// A firing time that falls into a DST gap moves forward by one hour;
    /// an ambiguous one resolves to its earlier instant.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let today = now.date_naive();
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0)?;

        (0..=14)
            .filter_map(|offset| today.checked_add_signed(ChronoDuration::days(offset)))
            .filter(|date| date.weekday() == self.weekday)
            .filter_map(|date| {
                let naive = date.and_time(time);
                tz.from_local_datetime(&naive).earliest().or_else(|| {
                    tz.from_local_datetime(&(naive + ChronoDuration::hours(1)))
                        .earliest()
                })
            })
            .find(|candidate| candidate > now)
    }

    /// The next `count` firing instants after `now`
    pub fn upcoming<Tz: TimeZone>(&self, now: &DateTime<Tz>, count: usize) -> Vec<DateTime<Tz>> {
        let mut runs = Vec::with_capacity(count);
        let mut cursor = now.clone();
        while runs.len() < count {
            let Some(next) = self.next_after(&cursor) else {
                break;
            };
            cursor = next.clone();
            runs.push(next);
        }
        runs
    }
}

impl Default for WeeklyTrigger {
    /// Sunday 03:00
    fn default() -> Self {
        Self {
            weekday: Weekday::Sun,
            hour: 3,
            minute: 0,
        }
    }
}

impl fmt::Display for WeeklyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:{:02}", self.weekday, self.hour, self.minute)
    }
}

impl FromStr for WeeklyTrigger {
    type Err = CoreError;

    /// Parse `<weekday> <HH:MM>`, e.g. `sun 03:00` or `Sunday 3:00`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidConfig {
            message: format!("invalid schedule '{}', expected e.g. 'sun 03:00'", s),
        };

        let mut parts = s.split_whitespace();
        let (Some(day), Some(time), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };

        let weekday = day.parse::<Weekday>().map_err(|_| invalid())?;
        let time = NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| invalid())?;

        Self::new(weekday, time.hour(), time.minute())
    }
}

/// Result of one maintenance run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Finished with empty stderr
    Clean,
    /// Stderr was non-empty and was forwarded to the notifier
    Escalated,
    /// The run could not complete (spawn, deadline, notifier or panic)
    Failed(String),
}

impl JobOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, JobOutcome::Clean)
    }
}

/// Dataset rebuild with failure escalation
#[derive(Clone)]
pub struct MaintenanceJob {
    invocation: Invocation,
    delegate: ProcessDelegate,
    notifier: Arc<dyn Notifier>,
}

impl MaintenanceJob {
    pub fn new(invocation: Invocation, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            invocation,
            delegate: ProcessDelegate::new(),
            notifier,
        }
    }

    /// `<interpreter> <population script>` in the scripts directory
    pub fn from_config(config: &GatewayConfig, notifier: Arc<dyn Notifier>) -> Self {
        let invocation = Invocation::new(&config.compute.interpreter)
            .arg(config.maintenance.population_script.to_string_lossy())
            .current_dir(&config.compute.scripts_dir)
            .timeout(config.maintenance.timeout());
        Self::new(invocation, notifier)
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Run the population process once
    ///
    /// Stdout streams through to ours, stderr is collected. Every error is
    /// handled here and reported as [`JobOutcome::Failed`].
    pub async fn run_once(&self) -> JobOutcome {
        info!(
            program = %self.invocation.program(),
            args = ?self.invocation.arguments(),
            "Executing population process"
        );

        let output = match self.delegate.run_streaming(&self.invocation).await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Population process could not run");
                return JobOutcome::Failed(e.to_string());
            }
        };

        info!(exit_code = ?output.exit_code, stderr_bytes = output.stderr.len(), "Population process exited");

        if output.stderr.is_empty() {
            return JobOutcome::Clean;
        }

        let report = output.stderr_lossy();
        warn!(report = %report, "Population process wrote to stderr, escalating");

        match self.notifier.notify(&report).await {
            Ok(()) => JobOutcome::Escalated,
            Err(e) => {
                error!(error = %e, "Failed to deliver error report");
                JobOutcome::Failed(e.to_string())
            }
        }
    }

    /// [`run_once`](Self::run_once) on its own task, so a panic ends only this run
    pub async fn run_isolated(&self) -> JobOutcome {
        Self::settle(self.spawn().await)
    }

    /// Aborting the returned handle drops the run, which kills the child
    fn spawn(&self) -> JoinHandle<JobOutcome> {
        let job = self.clone();
        tokio::spawn(async move { job.run_once().await })
    }

    fn settle(joined: std::result::Result<JobOutcome, JoinError>) -> JobOutcome {
        joined.unwrap_or_else(|e| {
            error!(error = %e, "Maintenance run aborted");
            JobOutcome::Failed(e.to_string())
        })
    }
}

/// Process-wide scheduler with an explicit lifecycle
pub struct Scheduler {
    trigger: WeeklyTrigger,
    shutdown_tx: mpsc::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the timer task; must be called inside a Tokio runtime
    pub fn start(trigger: WeeklyTrigger, job: MaintenanceJob) -> Self {
        Self::launch(trigger, job, false)
    }

    /// Like [`start`](Self::start), with one run right away
    pub fn start_with_initial_run(trigger: WeeklyTrigger, job: MaintenanceJob) -> Self {
        Self::launch(trigger, job, true)
    }

    fn launch(trigger: WeeklyTrigger, job: MaintenanceJob, run_now: bool) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!(trigger = %trigger, run_now, "Maintenance scheduler started");
            let mut due = run_now;

            loop {
                if !due {
                    let Some(next) = trigger.next_after(&Local::now()) else {
                        error!(trigger = %trigger, "No upcoming firing time, scheduler stopping");
                        break;
                    };
                    info!(next_run = %next.to_rfc3339(), "Next maintenance run scheduled");

                    if !Self::sleep_until(next, &mut shutdown_rx).await {
                        break;
                    }
                }
                due = false;

                match Self::run_until_shutdown(&job, &mut shutdown_rx).await {
                    Some(outcome) => info!(?outcome, "Maintenance run finished"),
                    None => break,
                }
            }

            info!("Maintenance scheduler shutting down");
        });

        Self {
            trigger,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn trigger(&self) -> WeeklyTrigger {
        self.trigger
    }

    /// Sleep until `deadline`; false if shutdown was requested first
    async fn sleep_until(deadline: DateTime<Local>, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
        loop {
            let now = Local::now();
            if now >= deadline {
                return true;
            }
            let remaining = (deadline - now).to_std().unwrap_or_default();
            let nap = remaining.min(MAX_SLEEP);
            debug!(secs = nap.as_secs(), "Scheduler sleeping");

            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = shutdown_rx.recv() => return false,
            }
        }
    }

    /// One run, abandoned if shutdown arrives first
    async fn run_until_shutdown(
        job: &MaintenanceJob,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Option<JobOutcome> {
        let mut run = job.spawn();

        tokio::select! {
            joined = &mut run => Some(MaintenanceJob::settle(joined)),
            _ = shutdown_rx.recv() => {
                warn!("Shutdown during maintenance run, killing it");
                run.abort();
                let _ = run.await;
                None
            }
        }
    }

    /// Stop the timer task; a run in progress is killed
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(()).await;
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{FixedOffset, NaiveDate, Utc};

    #[derive(Default)]
    struct RecordingNotifier {
        reports: Mutex<Vec<String>>,
        fail: bool,
        panic: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, text: &str) -> Result<()> {
            self.reports.lock().push(text.to_string());
            if self.panic {
                panic!("notifier bug");
            }
            if self.fail {
                return Err(CoreError::Notify {
                    message: "smtp down".to_string(),
                });
            }
            Ok(())
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_next_after_same_week() {
        // 2026-10-14 is a Wednesday
        let trigger = WeeklyTrigger::default();
        let next = trigger.next_after(&at(2026, 10, 14, 12, 0)).unwrap();
        assert_eq!(next, at(2026, 10, 18, 3, 0));
    }

    #[test]
    fn test_next_after_is_strict() {
        let trigger = WeeklyTrigger::default();
        let next = trigger.next_after(&at(2026, 10, 18, 3, 0)).unwrap();
        assert_eq!(next, at(2026, 10, 25, 3, 0));
    }

    #[test]
    fn test_missed_run_is_not_replayed() {
        // Started Sunday 09:00: the 03:00 run that day is gone
        let trigger = WeeklyTrigger::default();
        let next = trigger.next_after(&at(2026, 10, 18, 9, 0)).unwrap();
        assert_eq!(next, at(2026, 10, 25, 3, 0));
    }

    #[test]
    fn test_next_after_respects_offset() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 10, 18, 2, 30, 0).unwrap();
        let next = WeeklyTrigger::default().next_after(&now).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_upcoming_runs_are_weekly() {
        let trigger: WeeklyTrigger = "mon 22:15".parse().unwrap();
        let runs = trigger.upcoming(&at(2026, 10, 18, 0, 0), 3);
        assert_eq!(
            runs,
            vec![
                at(2026, 10, 19, 22, 15),
                at(2026, 10, 26, 22, 15),
                at(2026, 11, 2, 22, 15)
            ]
        );
    }

    #[test]
    fn test_parse_and_display() {
        let trigger: WeeklyTrigger = "Sunday 3:00".parse().unwrap();
        assert_eq!(trigger, WeeklyTrigger::default());
        assert_eq!(trigger.to_string(), "Sun 03:00");

        assert!("sun".parse::<WeeklyTrigger>().is_err());
        assert!("sun 24:00".parse::<WeeklyTrigger>().is_err());
        assert!("funday 03:00".parse::<WeeklyTrigger>().is_err());
        assert!("sun 03:00 extra".parse::<WeeklyTrigger>().is_err());
        assert!(WeeklyTrigger::new(Weekday::Sun, 3, 60).is_err());
    }

    #[cfg(unix)]
    fn job(script: &str, notifier: Arc<RecordingNotifier>) -> MaintenanceJob {
        MaintenanceJob::new(Invocation::new("sh").args(["-c", script]), notifier)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clean_run_never_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let outcome = job("echo scraping", notifier.clone()).run_once().await;

        assert_eq!(outcome, JobOutcome::Clean);
        assert!(notifier.reports.lock().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_notifies_exactly_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let script = "echo 'step 1 failed' >&2; echo ok; echo 'step 2 failed' >&2";
        let outcome = job(script, notifier.clone()).run_once().await;

        assert_eq!(outcome, JobOutcome::Escalated);
        assert_eq!(
            *notifier.reports.lock(),
            vec!["step 1 failed\nstep 2 failed\n".to_string()]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_are_independent() {
        let notifier = Arc::new(RecordingNotifier::default());
        let failing = job("echo broken >&2", notifier.clone());
        let clean = job("true", notifier.clone());

        assert_eq!(failing.run_once().await, JobOutcome::Escalated);
        assert_eq!(clean.run_once().await, JobOutcome::Clean);
        assert_eq!(failing.run_once().await, JobOutcome::Escalated);
        assert_eq!(notifier.reports.lock().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_with_empty_stderr_is_clean() {
        let notifier = Arc::new(RecordingNotifier::default());
        let outcome = job("exit 1", notifier.clone()).run_once().await;

        assert_eq!(outcome, JobOutcome::Clean);
        assert!(notifier.reports.lock().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_notifier_failure_is_contained() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let outcome = job("echo broken >&2", notifier.clone()).run_isolated().await;

        assert!(matches!(outcome, JobOutcome::Failed(msg) if msg.contains("smtp down")));
        assert_eq!(notifier.reports.lock().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_panicking_run_is_contained() {
        let notifier = Arc::new(RecordingNotifier {
            panic: true,
            ..Default::default()
        });
        let job = job("echo broken >&2", notifier.clone());

        assert!(matches!(job.run_isolated().await, JobOutcome::Failed(_)));
        // The job is still usable afterwards
        assert!(matches!(job.run_isolated().await, JobOutcome::Failed(_)));
        assert_eq!(notifier.reports.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_contained() {
        let notifier = Arc::new(RecordingNotifier::default());
        let job = MaintenanceJob::new(Invocation::new("/nonexistent/populate"), notifier.clone());

        assert!(matches!(job.run_isolated().await, JobOutcome::Failed(_)));
        assert!(notifier.reports.lock().is_empty());
    }

    #[test]
    fn test_job_from_config() {
        let config = GatewayConfig::default();
        let job = MaintenanceJob::from_config(&config, Arc::new(RecordingNotifier::default()));

        assert_eq!(job.invocation().program(), "python");
        assert_eq!(job.invocation().arguments(), ["init.py".to_string()]);
    }

    #[tokio::test]
    async fn test_scheduler_start_and_stop() {
        let notifier = Arc::new(RecordingNotifier::default());
        let job = MaintenanceJob::new(Invocation::new("true"), notifier.clone());

        let scheduler = Scheduler::start(WeeklyTrigger::default(), job);
        assert_eq!(scheduler.trigger(), WeeklyTrigger::default());
        scheduler.stop().await;

        // Stopping twice is harmless
        scheduler.stop().await;
        assert!(notifier.reports.lock().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_initial_run_happens_at_start() {
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Scheduler::start_with_initial_run(
            WeeklyTrigger::default(),
            job("echo broken >&2", notifier.clone()),
        );

        tokio::time::timeout(Duration::from_secs(10), async {
            while notifier.reports.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("initial run never reported");

        scheduler.stop().await;
        assert_eq!(*notifier.reports.lock(), vec!["broken\n".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_run_in_progress() {
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Scheduler::start_with_initial_run(
            WeeklyTrigger::default(),
            job("sleep 30; echo finished >&2", notifier.clone()),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;

        tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
            .await
            .expect("stop waited for the running job");
        assert!(notifier.reports.lock().is_empty());
    }
}
