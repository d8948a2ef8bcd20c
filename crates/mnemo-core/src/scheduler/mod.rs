//! Scheduler (C9): cron-like per-horizon triggers invoking the consolidator
//! (spec §4.9). Each configured horizon runs its own ticker task that
//! sleeps until its next scheduled local time, then calls
//! [`Consolidator::run`] unless that horizon is paused or already running.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, TimeZone, Weekday};
use tokio::sync::{Mutex, RwLock};

use crate::config::ScheduleConfig;
use crate::consolidation::{Consolidator, ConsolidationReport, Horizon};
use crate::error::{EngineError, Result};

/// Parsed form of a schedule slot string (`"02:00"`, `"sunday 03:00"`,
/// `"day-1 04:00"`).
#[derive(Debug, Clone, Copy)]
enum Slot {
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
    DayOfMonth { day: u32, hour: u32, minute: u32 },
}

impl Slot {
    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || EngineError::InvalidArgument(format!("bad schedule slot: {s}"));

        if let Some(rest) = s.strip_prefix("day-") {
            let mut parts = rest.splitn(2, ' ');
            let day: u32 = parts.next().unwrap_or_default().parse().map_err(|_| bad())?;
            let (hour, minute) = parse_time(parts.next().ok_or_else(bad)?, s)?;
            return Ok(Slot::DayOfMonth { day, hour, minute });
        }

        let mut parts = s.splitn(2, ' ');
        let first = parts.next().unwrap_or_default();
        if let Some(time) = parts.next() {
            let weekday = parse_weekday(first, s)?;
            let (hour, minute) = parse_time(time, s)?;
            return Ok(Slot::Weekly { weekday, hour, minute });
        }

        let (hour, minute) = parse_time(first, s)?;
        Ok(Slot::Daily { hour, minute })
    }

    fn time(self) -> (u32, u32) {
        match self {
            Slot::Daily { hour, minute } => (hour, minute),
            Slot::Weekly { hour, minute, .. } => (hour, minute),
            Slot::DayOfMonth { hour, minute, .. } => (hour, minute),
        }
    }

    /// Next local fire time strictly after `from`, honoring an optional
    /// month allow-list (used to turn a `day-N` slot into a quarterly or
    /// yearly cadence). Bounded to 800 days of scanning — comfortably more
    /// than a leap-year yearly cycle — so a malformed slot can't spin
    /// forever.
    fn next_after(self, from: DateTime<Local>, months_allowed: Option<&[u32]>) -> DateTime<Local> {
        let mut day = from.date_naive();
        let (hour, minute) = self.time();
        for _ in 0..800 {
            let day_matches = match self {
                Slot::Daily { .. } => true,
                Slot::Weekly { weekday, .. } => day.weekday() == weekday,
                Slot::DayOfMonth { day: target, .. } => day.day() == target,
            };
            let month_matches = months_allowed.map_or(true, |months| months.contains(&day.month()));

            if day_matches && month_matches {
                if let Some(naive) = day.and_hms_opt(hour, minute, 0) {
                    if let Some(candidate) = Local.from_local_datetime(&naive).single() {
                        if candidate > from {
                            return candidate;
                        }
                    }
                }
            }
            day = day.succ_opt().unwrap_or(day);
        }
        from + ChronoDuration::days(800)
    }
}

fn parse_time(s: &str, whole: &str) -> Result<(u32, u32)> {
    let bad = || EngineError::InvalidArgument(format!("bad schedule slot: {whole}"));
    let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
    let hour: u32 = h.parse().map_err(|_| bad())?;
    let minute: u32 = m.parse().map_err(|_| bad())?;
    if hour > 23 || minute > 59 {
        return Err(bad());
    }
    Ok((hour, minute))
}

fn parse_weekday(s: &str, whole: &str) -> Result<Weekday> {
    match s.to_ascii_lowercase().as_str() {
        "monday" => Ok(Weekday::Mon),
        "tuesday" => Ok(Weekday::Tue),
        "wednesday" => Ok(Weekday::Wed),
        "thursday" => Ok(Weekday::Thu),
        "friday" => Ok(Weekday::Fri),
        "saturday" => Ok(Weekday::Sat),
        "sunday" => Ok(Weekday::Sun),
        _ => Err(EngineError::InvalidArgument(format!("bad schedule slot: {whole}"))),
    }
}

/// `day-N` slots for quarterly/yearly horizons reuse the monthly grammar
/// but are additionally restricted to specific months.
fn months_allowed(horizon: Horizon) -> Option<&'static [u32]> {
    match horizon {
        Horizon::Quarterly => Some(&[1, 4, 7, 10]),
        Horizon::Yearly => Some(&[1]),
        _ => None,
    }
}

/// Snapshot of one horizon's scheduling state (`memory_consolidate(action=status)`).
#[derive(Debug, Clone)]
pub struct HorizonStatus {
    pub horizon: Horizon,
    pub enabled: bool,
    pub paused: bool,
    pub running: bool,
    pub next_fire: Option<DateTime<Local>>,
}

/// Cron-like trigger for the consolidator (C9).
pub struct Scheduler {
    consolidator: Arc<Consolidator>,
    slots: HashMap<Horizon, Slot>,
    running: Arc<Mutex<HashSet<Horizon>>>,
    paused: Arc<RwLock<HashSet<Horizon>>>,
    tickers: Vec<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    /// Parse `schedule` and spawn one ticker task per enabled horizon.
    pub fn spawn(consolidator: Arc<Consolidator>, schedule: &ScheduleConfig) -> Self {
        let mut slots = HashMap::new();
        for (horizon, slot_str) in [
            (Horizon::Daily, &schedule.daily),
            (Horizon::Weekly, &schedule.weekly),
            (Horizon::Monthly, &schedule.monthly),
            (Horizon::Quarterly, &schedule.quarterly),
            (Horizon::Yearly, &schedule.yearly),
        ] {
            let Some(s) = slot_str else { continue };
            match Slot::parse(s) {
                Ok(slot) => {
                    slots.insert(horizon, slot);
                }
                Err(e) => {
                    tracing::warn!(horizon = %horizon, slot = %s, error = %e, "ignoring unparseable schedule slot");
                }
            }
        }

        let running = Arc::new(Mutex::new(HashSet::new()));
        let paused = Arc::new(RwLock::new(HashSet::new()));
        let mut tickers = Vec::new();
        for (&horizon, &slot) in &slots {
            tickers.push(spawn_ticker(horizon, slot, consolidator.clone(), running.clone(), paused.clone()));
        }

        Self { consolidator, slots, running, paused, tickers }
    }

    /// Snapshot of every horizon's state.
    pub async fn status(&self) -> Vec<HorizonStatus> {
        let running = self.running.lock().await;
        let paused = self.paused.read().await;
        let now = Local::now();
        Horizon::all()
            .into_iter()
            .map(|horizon| {
                let slot = self.slots.get(&horizon).copied();
                HorizonStatus {
                    horizon,
                    enabled: slot.is_some(),
                    paused: paused.contains(&horizon),
                    running: running.contains(&horizon),
                    next_fire: slot.map(|s| s.next_after(now, months_allowed(horizon))),
                }
            })
            .collect()
    }

    /// Pause one horizon, or every horizon when `horizon` is `None`. A
    /// paused horizon's ticker still wakes on schedule but skips the run.
    pub async fn pause(&self, horizon: Option<Horizon>) {
        let mut paused = self.paused.write().await;
        match horizon {
            Some(h) => {
                paused.insert(h);
            }
            None => paused.extend(Horizon::all()),
        }
    }

    /// Resume one horizon, or every horizon when `horizon` is `None`.
    pub async fn resume(&self, horizon: Option<Horizon>) {
        let mut paused = self.paused.write().await;
        match horizon {
            Some(h) => {
                paused.remove(&h);
            }
            None => paused.clear(),
        }
    }

    /// Trigger a consolidation pass for `horizon` out of band from its
    /// schedule. `immediate=true` runs synchronously and returns the
    /// report; `immediate=false` fires the pass in the background and
    /// returns `None` right away. Rejected with `AlreadyRunning` if a pass
    /// for this horizon is already in flight (scheduled or triggered).
    pub async fn trigger(&self, horizon: Horizon, immediate: bool) -> Result<Option<ConsolidationReport>> {
        self.mark_running(horizon).await?;
        let consolidator = self.consolidator.clone();
        let running = self.running.clone();

        if immediate {
            let result = consolidator.run(horizon).await;
            running.lock().await.remove(&horizon);
            Ok(Some(result?))
        } else {
            tokio::spawn(async move {
                if let Err(e) = consolidator.run(horizon).await {
                    tracing::warn!(horizon = %horizon, error = %e, "triggered consolidation pass failed");
                }
                running.lock().await.remove(&horizon);
            });
            Ok(None)
        }
    }

    async fn mark_running(&self, horizon: Horizon) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.contains(&horizon) {
            return Err(EngineError::AlreadyRunning);
        }
        running.insert(horizon);
        Ok(())
    }

    /// Cancel every ticker task (cooperative shutdown, spec §5: "scheduler
    /// cancels pending triggers"). Any pass already in flight keeps running
    /// to completion; this only stops future scheduled fires.
    pub fn shutdown(&mut self) {
        for handle in self.tickers.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for handle in &self.tickers {
            handle.abort();
        }
    }
}

fn spawn_ticker(
    horizon: Horizon,
    slot: Slot,
    consolidator: Arc<Consolidator>,
    running: Arc<Mutex<HashSet<Horizon>>>,
    paused: Arc<RwLock<HashSet<Horizon>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Local::now();
            let next = slot.next_after(now, months_allowed(horizon));
            let wait = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(60));
            tokio::time::sleep(wait).await;

            if paused.read().await.contains(&horizon) {
                continue;
            }
            {
                let mut running_guard = running.lock().await;
                if running_guard.contains(&horizon) {
                    continue;
                }
                running_guard.insert(horizon);
            }

            if let Err(e) = consolidator.run(horizon).await {
                tracing::warn!(horizon = %horizon, error = %e, "scheduled consolidation pass failed");
            }
            running.lock().await.remove(&horizon);
        }
    })
}
