use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use qce_core::schedule::{ScheduleType, ScheduledExport};
use qce_core::TimeWindow;
use qce_store::TaskStore;

use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};
use crate::window::compute_window;

/// A schedule whose time has come, handed to the export engine.
#[derive(Debug)]
pub struct FiredExport {
    pub schedule: ScheduledExport,
    pub window: TimeWindow,
    /// The already-advanced next run, for the post-export `complete_run`.
    pub next_run: Option<DateTime<Utc>>,
}

fn parse_hhmm(s: &str) -> Result<(u32, u32)> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("bad execute_time '{s}'")))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("bad hour '{h}'")))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("bad minute '{m}'")))?;
    if hour > 23 || minute > 59 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "execute_time out of range '{s}'"
        )));
    }
    Ok((hour, minute))
}

/// Compile a schedule definition down to a cron expression.
///
/// Weekly/monthly pull their day from the schedule options (`weekday`
/// 0-7 with Sunday as both ends, `dayOfMonth` 1-31), defaulting to Monday /
/// the 1st.
pub fn cron_for(sched: &ScheduledExport) -> Result<CronExpr> {
    match sched.schedule_type {
        ScheduleType::Custom => {
            let expr = sched.cron_expression.as_deref().ok_or_else(|| {
                SchedulerError::InvalidSchedule("custom schedule requires cron_expression".into())
            })?;
            CronExpr::parse(expr)
        }
        ScheduleType::Daily => {
            let (h, m) = parse_hhmm(&sched.execute_time)?;
            CronExpr::parse(&format!("{m} {h} * * *"))
        }
        ScheduleType::Weekly => {
            let (h, m) = parse_hhmm(&sched.execute_time)?;
            let weekday = sched.options.get("weekday").and_then(|v| v.as_u64()).unwrap_or(1);
            CronExpr::parse(&format!("{m} {h} * * {weekday}"))
        }
        ScheduleType::Monthly => {
            let (h, m) = parse_hhmm(&sched.execute_time)?;
            let day = sched
                .options
                .get("dayOfMonth")
                .and_then(|v| v.as_u64())
                .unwrap_or(1);
            CronExpr::parse(&format!("{m} {h} {day} * *"))
        }
    }
}

/// Next UTC execution strictly after `after` (interpreted in local time, as
/// cron always is).
pub fn compute_next_run(
    sched: &ScheduledExport,
    after: DateTime<Local>,
) -> Result<Option<DateTime<Utc>>> {
    let cron = cron_for(sched)?;
    Ok(cron.next_match(after).map(|t| t.with_timezone(&Utc)))
}

/// Minute-tick scheduler: evaluates enabled scheduled exports against their
/// `next_run` and hands due ones to the export engine over mpsc.
///
/// The engine only *fires*; outcome recording (`complete_run`) happens after
/// the export finishes, on the consumer side.
pub struct SchedulerEngine {
    store: Arc<TaskStore>,
    fired_tx: mpsc::Sender<FiredExport>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<TaskStore>, fired_tx: mpsc::Sender<FiredExport>) -> Self {
        Self { store, fired_tx }
    }

    /// Main loop. Polls every 60 s until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        self.refresh_next_runs();

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// On startup, give every enabled schedule a future `next_run`.
    /// Firings missed while the process was down are skipped, not replayed.
    fn refresh_next_runs(&self) {
        let now = Utc::now();
        let scheds = match self.store.list_scheduled(true) {
            Ok(s) => s,
            Err(e) => {
                error!("could not list schedules on startup: {e}");
                return;
            }
        };
        for sched in scheds {
            let stale = sched.next_run.map(|nr| nr <= now).unwrap_or(true);
            if !stale {
                continue;
            }
            if sched.next_run.is_some() {
                warn!(id = %sched.id, name = %sched.name, "missed firing skipped on startup");
            }
            match compute_next_run(&sched, Local::now()) {
                Ok(next) => {
                    let _ = self.store.set_next_run(&sched.id, next);
                }
                Err(e) => warn!(id = %sched.id, "schedule invalid, next_run not set: {e}"),
            }
        }
    }

    /// Fire everything whose `next_run` has arrived.
    pub(crate) fn tick(&self) -> Result<()> {
        let now = Utc::now();
        for sched in self.store.list_scheduled(true)? {
            let Some(next_run) = sched.next_run else {
                continue;
            };
            if next_run > now {
                continue;
            }

            let local_now = Local::now();
            let window = match compute_window(
                sched.time_range_type,
                sched
                    .range_offset_start
                    .zip(sched.range_offset_end),
                local_now,
            ) {
                Ok(w) => w,
                Err(e) => {
                    warn!(id = %sched.id, "window computation failed, skipping firing: {e}");
                    continue;
                }
            };

            let next = compute_next_run(&sched, local_now).unwrap_or(None);
            // Advance immediately so the next tick cannot double-fire.
            self.store.set_next_run(&sched.id, next)?;

            info!(id = %sched.id, name = %sched.name, "scheduled export fired");
            let fired = FiredExport {
                schedule: sched,
                window,
                next_run: next,
            };
            if self.fired_tx.try_send(fired).is_err() {
                warn!("export channel full or closed — scheduled firing dropped");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use qce_core::schedule::{ScheduleType, TimeRangeType};
    use qce_core::task::ExportFormat;
    use qce_core::ChatRef;
    use uuid::Uuid;

    fn schedule(schedule_type: ScheduleType, execute_time: &str) -> ScheduledExport {
        let now = Utc::now();
        ScheduledExport {
            id: Uuid::now_v7().to_string(),
            name: "test".into(),
            chat: ChatRef::group("g1"),
            schedule_type,
            execute_time: execute_time.into(),
            cron_expression: None,
            time_range_type: TimeRangeType::Yesterday,
            range_offset_start: None,
            range_offset_end: None,
            format: ExportFormat::Json,
            options: serde_json::json!({}),
            enabled: true,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn daily_schedule_compiles_to_cron() {
        let sched = schedule(ScheduleType::Daily, "03:00");
        let next = compute_next_run(&sched, Local::now()).unwrap().unwrap();
        assert!(next > Utc::now());
        let local = next.with_timezone(&Local);
        assert_eq!(
            (chrono::Timelike::hour(&local), chrono::Timelike::minute(&local)),
            (3, 0)
        );
    }

    #[test]
    fn custom_schedule_requires_expression() {
        let sched = schedule(ScheduleType::Custom, "03:00");
        assert!(compute_next_run(&sched, Local::now()).is_err());
    }

    #[test]
    fn bad_execute_time_is_rejected() {
        let sched = schedule(ScheduleType::Daily, "25:99");
        assert!(cron_for(&sched).is_err());
    }

    #[tokio::test]
    async fn due_schedule_fires_and_advances() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let mut sched = schedule(ScheduleType::Daily, "03:00");
        sched.next_run = Some(Utc::now() - Duration::minutes(5));
        store.create_scheduled(&sched).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let engine = SchedulerEngine::new(Arc::clone(&store), tx);
        engine.tick().unwrap();

        let fired = rx.try_recv().expect("schedule should fire");
        assert_eq!(fired.schedule.id, sched.id);
        assert!(!fired.window.is_unbounded());

        let stored = store.get_scheduled(&sched.id).unwrap().unwrap();
        assert!(stored.next_run.unwrap() > Utc::now());

        // Second tick: nothing due anymore.
        engine.tick().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disabled_schedules_never_fire() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let mut sched = schedule(ScheduleType::Daily, "03:00");
        sched.next_run = Some(Utc::now() - Duration::minutes(5));
        sched.enabled = false;
        store.create_scheduled(&sched).unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let engine = SchedulerEngine::new(store, tx);
        engine.tick().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
