//! Cron-driven export scheduler.
//!
//! Jobs run on their own tokio tasks and never share locks with request
//! handlers. A fired job asks the broker for a report, polls readiness,
//! downloads the artifact into the export directory, audits the export, and
//! prunes files older than the job's retention.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tg_audit::{AuditError, AuditLog, EventType};
use tg_broker::{BrokerAdapter, BrokerError, ReportQuery};

pub mod cron;

pub use cron::{CronExpr, CronParseError};

const REPORT_POLL_LIMIT: u32 = 30;
const REPORT_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Disabled jobs with `auto_schedule` stay visible but never fire.
    pub auto_schedule: bool,
    /// 5- or 6-field cron expression, evaluated in the scheduler timezone.
    pub cron: String,
    pub retention_days: u32,
    /// Broker report kind to request.
    pub report: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Cron(#[from] CronParseError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("report not ready after {0} polls")]
    ReportNeverReady(u32),
    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    broker: Arc<dyn BrokerAdapter>,
    audit: Arc<AuditLog>,
    timezone: Tz,
    export_dir: PathBuf,
    jobs: Vec<(JobConfig, CronExpr)>,
    worker: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Scheduler {
    /// Parse and validate all job expressions up front; a malformed job
    /// config is an init failure, not a runtime surprise.
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        audit: Arc<AuditLog>,
        timezone: Tz,
        export_dir: impl Into<PathBuf>,
        jobs: Vec<JobConfig>,
    ) -> Result<Self, SchedulerError> {
        let jobs = jobs
            .into_iter()
            .map(|job| {
                let expr = CronExpr::parse(&job.cron)?;
                Ok((job, expr))
            })
            .collect::<Result<Vec<_>, CronParseError>>()?;
        Ok(Self {
            broker,
            audit,
            timezone,
            export_dir: export_dir.into(),
            jobs,
            worker: Mutex::new(None),
        })
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Spawn the minute-tick worker. Idempotent: a second start is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().expect("scheduler lock poisoned");
        if worker.is_some() {
            return;
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut last_fired_minute: Vec<Option<i64>> = vec![None; this.jobs.len()];
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel_rx.changed() => {
                        info!("scheduler worker stopping");
                        let _ = this.audit.append(
                            tg_audit::EventType::OperationCancelled,
                            None,
                            json!({"component": "scheduler", "reason": "stop requested"}),
                        );
                        return;
                    }
                }

                let now = Utc::now().with_timezone(&this.timezone);
                let minute_stamp = Utc::now().timestamp() / 60;
                for (idx, (job, expr)) in this.jobs.iter().enumerate() {
                    if !job.enabled || !job.auto_schedule {
                        continue;
                    }
                    if last_fired_minute[idx] == Some(minute_stamp) || !expr.matches(&now) {
                        continue;
                    }
                    last_fired_minute[idx] = Some(minute_stamp);
                    if let Err(e) = this.run_job(job).await {
                        error!(job = %job.id, error = %e, "scheduled export failed");
                    }
                }
            }
        });

        *worker = Some((cancel_tx, handle));
        info!(jobs = self.jobs.len(), "scheduler started");
    }

    /// Stop the worker; when `wait` is set, block until it has exited.
    pub async fn stop(&self, wait: bool) {
        let taken = {
            let mut worker = self.worker.lock().expect("scheduler lock poisoned");
            worker.take()
        };
        if let Some((cancel_tx, handle)) = taken {
            let _ = cancel_tx.send(true);
            if wait {
                let _ = handle.await;
            }
        }
    }

    /// One full export cycle for a job. Public so operators (and tests) can
    /// trigger a job outside its schedule.
    pub async fn run_job(&self, job: &JobConfig) -> Result<PathBuf, SchedulerError> {
        let query = ReportQuery {
            report: job.report.clone(),
            range_days: job.retention_days.max(1),
        };
        let handle = self.broker.request_report(&query).await?;

        let mut ready = false;
        for _ in 0..REPORT_POLL_LIMIT {
            if self.broker.report_ready(&handle).await? {
                ready = true;
                break;
            }
            tokio::time::sleep(REPORT_POLL_INTERVAL).await;
        }
        if !ready {
            return Err(SchedulerError::ReportNeverReady(REPORT_POLL_LIMIT));
        }

        let bytes = self.broker.download_report(&handle).await?;
        let dir = self.export_dir.join(&job.id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.csv", Utc::now().format("%Y%m%dT%H%M%S%f")));
        std::fs::write(&path, &bytes)?;
        info!(job = %job.id, path = %path.display(), bytes = bytes.len(), "export persisted");

        self.audit.append(
            EventType::ScheduledExportCompleted,
            None,
            json!({
                "job_id": job.id,
                "report": job.report,
                "path": path.display().to_string(),
                "bytes": bytes.len(),
            }),
        )?;

        self.apply_retention(&dir, job.retention_days, &path)?;
        Ok(path)
    }

    /// Delete artifacts older than `retention_days` (by modification time).
    /// The artifact just produced is always kept.
    fn apply_retention(
        &self,
        dir: &Path,
        retention_days: u32,
        just_written: &Path,
    ) -> Result<(), SchedulerError> {
        let cutoff = std::time::SystemTime::now()
            - Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path() == just_written {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                warn!(path = %entry.path().display(), "retention removing expired export");
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_broker::MockBroker;

    fn job(id: &str, cron: &str, retention_days: u32) -> JobConfig {
        JobConfig {
            id: id.to_string(),
            name: format!("{id} export"),
            enabled: true,
            auto_schedule: true,
            cron: cron.to_string(),
            retention_days,
            report: "positions".to_string(),
        }
    }

    fn scheduler(dir: &Path, jobs: Vec<JobConfig>) -> Arc<Scheduler> {
        let audit = Arc::new(AuditLog::open(dir.join("events.jsonl")).unwrap());
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MockBroker::new(3));
        Arc::new(
            Scheduler::new(
                broker,
                audit,
                chrono_tz::UTC,
                dir.join("exports"),
                jobs,
            )
            .unwrap(),
        )
    }

    #[test]
    fn malformed_job_cron_is_an_init_failure() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("events.jsonl")).unwrap());
        let broker: Arc<dyn BrokerAdapter> = Arc::new(MockBroker::new(3));
        let err = Scheduler::new(
            broker,
            audit,
            chrono_tz::UTC,
            dir.path().join("exports"),
            vec![job("bad", "not a cron", 7)],
        )
        .err()
        .unwrap();
        assert!(matches!(err, SchedulerError::Cron(_)));
    }

    #[tokio::test]
    async fn run_job_downloads_and_audits_the_export() {
        let dir = tempfile::tempdir().unwrap();
        let s = scheduler(dir.path(), vec![job("daily", "0 18 * * 1-5", 7)]);

        let path = s.run_job(&s.jobs[0].0).await.unwrap();
        assert!(path.exists());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("symbol,"));

        assert_eq!(s.audit.stats()["SCHEDULED_EXPORT_COMPLETED"], 1);
    }

    #[tokio::test]
    async fn retention_prunes_old_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let s = scheduler(dir.path(), vec![job("daily", "0 18 * * *", 0)]);

        // Pre-create an "old" artifact; retention_days == 0 means any
        // existing file is past the cutoff.
        let job_dir = dir.path().join("exports/daily");
        std::fs::create_dir_all(&job_dir).unwrap();
        let stale = job_dir.join("20000101T000000.csv");
        std::fs::write(&stale, "old").unwrap();

        let fresh = s.run_job(&s.jobs[0].0).await.unwrap();
        assert!(!stale.exists(), "stale artifact pruned");
        // The freshly written artifact has mtime == now, not < cutoff.
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn start_and_stop_are_clean() {
        let dir = tempfile::tempdir().unwrap();
        let s = scheduler(dir.path(), vec![job("daily", "0 18 * * *", 7)]);
        s.start();
        s.start(); // idempotent
        s.stop(true).await;
    }
}
