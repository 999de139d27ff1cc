//! Daily production history
//!
//! Samples the monitor snapshot every five minutes into 24 hourly slots per
//! day, persists the whole history as JSON next to the web assets, and prunes
//! anything older than 30 days. Saves go through a temp file and rename so a
//! crash mid-write never corrupts the history.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::monitor::SharedMonitor;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5 * 60);
const SAVE_INTERVAL: Duration = Duration::from_secs(15 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const RETENTION_DAYS: i64 = 30;

/// One hour slot of a day's production record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourlyData {
    pub hour: u32,
    /// Estimated Wh produced in this hour
    pub production: f64,
    /// Running average watts over the hour's samples
    pub power: f64,
    pub timestamp: i64,
    pub sample_count: u32,
}

/// One day of production records, keyed by `YYYY-MM-DD`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyProduction {
    pub date: String,
    pub hourly_data: Vec<HourlyData>,
    pub total_wh: f64,
    pub peak_watts: f64,
    pub peak_hour: u32,
    pub first_sample: i64,
    pub last_sample: i64,
    pub sample_count: u32,
}

impl DailyProduction {
    fn new(date: &str) -> Self {
        Self {
            date: date.to_string(),
            hourly_data: empty_hours(),
            ..Self::default()
        }
    }
}

fn empty_hours() -> Vec<HourlyData> {
    (0..24)
        .map(|hour| HourlyData {
            hour,
            ..HourlyData::default()
        })
        .collect()
}

/// The full persisted history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionHistory {
    pub days: HashMap<String, DailyProduction>,
    pub last_cleanup: i64,
}

/// Tracks and persists daily production.
pub struct ProductionTracker {
    data_file: PathBuf,
    history: RwLock<ProductionHistory>,
    save_lock: Mutex<()>,
}

impl ProductionTracker {
    /// Create a tracker storing its history under the web directory, loading
    /// any existing data file.
    pub fn new(web_dir: &Path) -> Self {
        let tracker = Self {
            data_file: web_dir.join("production_history.json"),
            history: RwLock::new(ProductionHistory::default()),
            save_lock: Mutex::new(()),
        };
        tracker.load();
        tracker
    }

    fn load(&self) {
        let data = match std::fs::read_to_string(&self.data_file) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!(error = %e, "Error reading production history");
                }
                return;
            }
        };

        let mut loaded: ProductionHistory = match serde_json::from_str(&data) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "Error parsing production history");
                return;
            }
        };

        // Older files may lack hour slots
        for day in loaded.days.values_mut() {
            if day.hourly_data.len() != 24 {
                day.hourly_data = empty_hours();
            }
        }

        info!(days = loaded.days.len(), "Loaded production history");
        *self.history.write().expect("RwLock poisoned") = loaded;
    }

    /// Persist the history atomically.
    pub fn save(&self) {
        let _guard = self.save_lock.lock().expect("Mutex poisoned");

        let data = {
            let history = self.history.read().expect("RwLock poisoned");
            match serde_json::to_vec_pretty(&*history) {
                Ok(data) => data,
                Err(e) => {
                    error!(error = %e, "Error serializing production history");
                    return;
                }
            }
        };

        let temp_file = self.data_file.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&temp_file, &data) {
            error!(error = %e, "Error writing production history temp file");
            return;
        }
        if let Err(e) = std::fs::rename(&temp_file, &self.data_file) {
            error!(error = %e, "Error renaming production history file");
            let _ = std::fs::remove_file(&temp_file);
        }
    }

    /// Record one sample of current production into the history.
    pub fn record_sample(&self, current_watts: f64, today_wh: f64, now: DateTime<Local>) {
        if current_watts == 0.0 && today_wh == 0.0 {
            return;
        }

        let date = now.format("%Y-%m-%d").to_string();
        let hour = now.hour();
        let unix = now.timestamp();

        let mut history = self.history.write().expect("RwLock poisoned");
        let day = history
            .days
            .entry(date.clone())
            .or_insert_with(|| DailyProduction::new(&date));

        let slot = &mut day.hourly_data[hour as usize];
        if slot.sample_count == 0 {
            slot.power = current_watts;
        } else {
            slot.power = (slot.power * f64::from(slot.sample_count) + current_watts)
                / f64::from(slot.sample_count + 1);
        }
        slot.sample_count += 1;
        slot.timestamp = unix;
        slot.production = if slot.sample_count == 1 {
            current_watts * 5.0 / 60.0
        } else {
            slot.power
        };

        day.total_wh = today_wh;
        if current_watts > day.peak_watts {
            day.peak_watts = current_watts;
            day.peak_hour = hour;
        }
        if day.first_sample == 0 {
            day.first_sample = unix;
        }
        day.last_sample = unix;
        day.sample_count += 1;
    }

    /// Drop days older than the retention window.
    pub fn cleanup(&self, now: DateTime<Local>) {
        let cutoff = (now - chrono::Duration::days(RETENTION_DAYS))
            .format("%Y-%m-%d")
            .to_string();

        let mut history = self.history.write().expect("RwLock poisoned");
        history.days.retain(|date, _| date.as_str() >= cutoff.as_str());
        history.last_cleanup = now.timestamp();
        debug!(cutoff = %cutoff, "Cleaned up old production data");
    }

    /// One day's record, if present.
    pub fn day(&self, date: &str) -> Option<DailyProduction> {
        self.history
            .read()
            .expect("RwLock poisoned")
            .days
            .get(date)
            .cloned()
    }

    /// All dates with data, ascending.
    pub fn available_dates(&self) -> Vec<String> {
        let history = self.history.read().expect("RwLock poisoned");
        let mut dates: Vec<String> = history.days.keys().cloned().collect();
        dates.sort();
        dates
    }
}

/// Spawn the sampling, saving, and cleanup loop as a detached task.
pub fn spawn_tracking_loop(tracker: Arc<ProductionTracker>, monitor: SharedMonitor) {
    tokio::spawn(async move {
        let mut sample = tokio::time::interval(SAMPLE_INTERVAL);
        let mut save = tokio::time::interval(SAVE_INTERVAL);
        let mut cleanup = tokio::time::interval(CLEANUP_INTERVAL);
        // The first tick of an interval fires immediately; consume them so
        // the loop starts quiet.
        sample.tick().await;
        save.tick().await;
        cleanup.tick().await;

        loop {
            tokio::select! {
                _ = sample.tick() => {
                    let (watts, today_wh) = {
                        let data = monitor.read().expect("RwLock poisoned");
                        (data.production.current_watts, data.production.today_wh)
                    };
                    tracker.record_sample(watts, today_wh, Local::now());
                }
                _ = save.tick() => {
                    tracker.save();
                }
                _ = cleanup.tick() => {
                    tracker.cleanup(Local::now());
                }
            }
        }
    });
}
