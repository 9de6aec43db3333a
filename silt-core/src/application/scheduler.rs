// silt-core/src/application/scheduler.rs
//
// One process-wide ticker, firing on local-time minute boundaries. Each
// tick re-reads project.yml, evaluates stream cron expressions against the
// current minute, and hands matching streams to the orchestrator. Stream
// runs are serialized through one async mutex; a busy runner defers the
// stream to its next matching minute.

use chrono::{DateTime, Local, Timelike};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::stream::run_stream;
use crate::application::transform::CancelToken;
use crate::domain::schedule::CronExpr;
use crate::infrastructure::config::{load_project_config, ProjectConfig};
use crate::infrastructure::warehouse::Warehouse;

pub struct Scheduler {
    project_dir: PathBuf,
    warehouse: Warehouse,
    run_lock: Arc<Mutex<()>>,
}

/// Streams that carry a schedule, as `(name, cron)`.
pub fn scheduled_streams(config: &ProjectConfig) -> Vec<(String, String)> {
    config
        .streams
        .iter()
        .filter_map(|(name, stream)| {
            stream
                .schedule
                .as_ref()
                .map(|cron| (name.clone(), cron.clone()))
        })
        .collect()
}

impl Scheduler {
    pub fn new(project_dir: PathBuf, warehouse: Warehouse) -> Self {
        Self {
            project_dir,
            warehouse,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The lock manual invocations should hold to defer scheduled runs.
    pub fn run_lock(&self) -> Arc<Mutex<()>> {
        self.run_lock.clone()
    }

    /// Evaluates one tick at `now`. Returns the streams that actually ran.
    pub async fn tick(&self, now: DateTime<Local>) -> Vec<String> {
        let config = match load_project_config(&self.project_dir) {
            Ok(c) => c,
            Err(e) => {
                warn!("scheduler tick: cannot load project config ({e})");
                return vec![];
            }
        };

        let mut ran = Vec::new();
        for (name, cron_raw) in scheduled_streams(&config) {
            let cron = match CronExpr::parse(&cron_raw) {
                Ok(c) => c,
                Err(e) => {
                    warn!("stream {name}: {e}");
                    continue;
                }
            };
            if !cron.matches(&now) {
                continue;
            }

            // Busy runner: defer to the next matching minute.
            let Ok(_guard) = self.run_lock.try_lock() else {
                info!("stream {name} deferred: another stream is running");
                continue;
            };

            info!("scheduler firing stream {name} ({cron_raw})");
            match run_stream(
                &self.warehouse,
                &self.project_dir,
                &config,
                &name,
                false,
                CancelToken::new(),
            )
            .await
            {
                Ok(report) => {
                    info!(
                        "scheduled stream {name} finished: {:?} in {:.2}s",
                        report.status, report.duration_seconds
                    );
                    ran.push(name);
                }
                Err(e) => warn!("scheduled stream {name} failed: {e}"),
            }
        }
        ran
    }

    /// Runs the ticker until cancelled. Ticks align to minute boundaries;
    /// a long stream run never blocks the next evaluation of wall-clock.
    pub async fn run(&self, cancel: CancelToken) {
        info!("scheduler started for {:?}", self.project_dir);
        while !cancel.is_cancelled() {
            let now = Local::now();
            let to_next_minute = 60 - u64::from(now.second()).min(59);
            tokio::time::sleep(Duration::from_secs(to_next_minute)).await;
            if cancel.is_cancelled() {
                break;
            }
            self.tick(Local::now()).await;
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    fn setup(yaml: &str) -> (tempfile::TempDir, Scheduler) {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("project.yml"), yaml).unwrap();
        fs::create_dir_all(tmp.path().join("transform")).unwrap();
        let wh = Warehouse::open(tmp.path().join("t.duckdb").to_str().unwrap()).unwrap();
        let scheduler = Scheduler::new(tmp.path().to_path_buf(), wh);
        (tmp, scheduler)
    }

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_scheduled_streams_filters_unscheduled() {
        let config: ProjectConfig = serde_yaml::from_str(
            "name: t\n\
             streams:\n\
               daily:\n\
                 schedule: \"0 6 * * *\"\n\
                 steps:\n\
                   - transform: [all]\n\
               manual:\n\
                 steps:\n\
                   - transform: [all]\n",
        )
        .unwrap();
        let scheduled = scheduled_streams(&config);
        assert_eq!(scheduled, vec![("daily".to_string(), "0 6 * * *".to_string())]);
    }

    #[tokio::test]
    async fn test_tick_fires_exactly_on_matching_minute() {
        let (_tmp, scheduler) = setup(
            "name: t\n\
             streams:\n\
               daily:\n\
                 schedule: \"0 6 * * *\"\n\
                 steps:\n\
                   - transform: [all]\n",
        );

        // 06:00 fires once (an empty transform dir is a successful run).
        let ran = scheduler.tick(at(6, 0)).await;
        assert_eq!(ran, vec!["daily"]);

        // 06:01 does not.
        let ran = scheduler.tick(at(6, 1)).await;
        assert!(ran.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_cron_never_fires() {
        let (_tmp, scheduler) = setup(
            "name: t\n\
             streams:\n\
               odd:\n\
                 schedule: \"not a cron\"\n\
                 steps:\n\
                   - transform: [all]\n",
        );
        assert!(scheduler.tick(at(6, 0)).await.is_empty());
    }

    #[tokio::test]
    async fn test_busy_runner_defers_stream() {
        let (_tmp, scheduler) = setup(
            "name: t\n\
             streams:\n\
               daily:\n\
                 schedule: \"* * * * *\"\n\
                 steps:\n\
                   - transform: [all]\n",
        );

        // A manual invocation holds the run lock; the tick must defer.
        let lock = scheduler.run_lock();
        let _guard = lock.lock().await;
        assert!(scheduler.tick(at(6, 0)).await.is_empty());
        drop(_guard);

        // Next matching minute goes through.
        assert_eq!(scheduler.tick(at(6, 1)).await, vec!["daily"]);
    }
}
