//! Behavioral lock: tilt detection and cooling-off.
//!
//! A subject that keeps hammering blocked actions (`max_attempts` inside a
//! sliding window) is locked out for `cooling_off_hours`. Locks expire lazily
//! on read; there is no background sweeper.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use grd_audit::Severity;
use grd_config::BehaviorSettings;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::bus::{publish_or_warn, EventPublisher};
use crate::clock::Clock;
use crate::types::{GuardEvent, GuardEventType};

pub const TILT_DETECTED: &str = "TILT_DETECTED";

/// Sliding-window counter of blocked interactions per subject.
pub struct TiltDetector {
    window: Duration,
    max_attempts: usize,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl TiltDetector {
    pub fn new(window: Duration, max_attempts: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            max_attempts,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one attempt now. `true` once the window holds `max_attempts`
    /// or more entries.
    pub fn record_attempt(&self, subject: &str) -> bool {
        let now = self.clock.now();
        let cutoff = now - self.window;
        let mut windows = self.windows.lock();
        // Subjects whose newest attempt has aged out hold nothing useful.
        windows.retain(|_, q| q.back().is_some_and(|&t| t > cutoff));

        let q = windows.entry(subject.to_string()).or_default();
        q.push_back(now);
        while let Some(&front) = q.front() {
            if front <= cutoff {
                q.pop_front();
            } else {
                break;
            }
        }
        q.len() >= self.max_attempts
    }

    /// Subjects with at least one attempt still held.
    pub fn tracked_subjects(&self) -> usize {
        self.windows.lock().len()
    }

    /// Attempts currently inside the window (no pruning side effects).
    pub fn attempts(&self, subject: &str) -> usize {
        let cutoff = self.clock.now() - self.window;
        self.windows
            .lock()
            .get(subject)
            .map(|q| q.iter().filter(|&&t| t > cutoff).count())
            .unwrap_or(0)
    }

    pub fn clear(&self, subject: &str) {
        self.windows.lock().remove(subject);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LockRecord {
    pub unlock_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LockStatus {
    Unlocked,
    Locked { remaining: Duration, reason: String },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockStatus::Locked { .. })
    }
}

pub struct LockManager {
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, LockRecord>>,
}

/// Upper bound on a single lock (ten years).
const MAX_LOCK_HOURS: f64 = 87_600.0;

fn hours_to_duration(hours: f64) -> Option<Duration> {
    if !hours.is_finite() || hours <= 0.0 {
        return None;
    }
    let millis = (hours.min(MAX_LOCK_HOURS) * 3_600_000.0).round();
    Some(Duration::milliseconds(millis as i64))
}

impl LockManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lock `subject` for `hours`, replacing any existing lock.
    /// Returns the unlock time, or `None` if `hours` is unusable.
    pub fn apply_lock(&self, subject: &str, hours: f64, reason: &str) -> Option<DateTime<Utc>> {
        let Some(dur) = hours_to_duration(hours) else {
            warn!(subject = %subject, hours, "apply_lock ignored: hours must be finite and > 0");
            return None;
        };
        let unlock_at = self.clock.now() + dur;
        self.locks.lock().insert(
            subject.to_string(),
            LockRecord {
                unlock_at,
                reason: reason.to_string(),
            },
        );
        info!(subject = %subject, %unlock_at, reason = %reason, "subject locked");
        Some(unlock_at)
    }

    /// Lazy expiry: an expired lock is purged here and reported as unlocked.
    pub fn is_user_locked(&self, subject: &str) -> LockStatus {
        let now = self.clock.now();
        let mut locks = self.locks.lock();
        let Some(rec) = locks.get(subject) else {
            return LockStatus::Unlocked;
        };
        if now >= rec.unlock_at {
            locks.remove(subject);
            return LockStatus::Unlocked;
        }
        LockStatus::Locked {
            remaining: rec.unlock_at - now,
            reason: rec.reason.clone(),
        }
    }

    /// Privileged. Returns the removed record, if any.
    pub fn clear_lock(&self, subject: &str, actor: &str) -> Option<LockRecord> {
        let removed = self.locks.lock().remove(subject);
        warn!(
            target: "security",
            subject = %subject,
            actor = %actor,
            had_lock = removed.is_some(),
            "behavioral lock cleared"
        );
        removed
    }
}

/// Detector + lock manager + broadcast, wired the way the order guard uses them.
pub struct BehavioralLock {
    detector: TiltDetector,
    locks: LockManager,
    cooling_off_hours: f64,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl BehavioralLock {
    pub fn new(
        settings: &BehaviorSettings,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window = Duration::seconds(settings.window_secs.min(u64::from(u32::MAX)) as i64);
        Self {
            detector: TiltDetector::new(window, settings.max_attempts, clock.clone()),
            locks: LockManager::new(clock.clone()),
            cooling_off_hours: settings.cooling_off_hours,
            publisher,
            clock,
        }
    }

    pub fn detector(&self) -> &TiltDetector {
        &self.detector
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn is_locked(&self, subject: &str) -> LockStatus {
        self.locks.is_user_locked(subject)
    }

    /// Feed one blocked interaction. Returns `true` if it triggered a lock.
    pub fn record_blocked_interaction(&self, subject: &str) -> bool {
        if !self.detector.record_attempt(subject) {
            return false;
        }
        let Some(unlock_at) = self
            .locks
            .apply_lock(subject, self.cooling_off_hours, TILT_DETECTED)
        else {
            return false;
        };
        self.detector.clear(subject);

        warn!(subject = %subject, %unlock_at, "tilt detected; cooling-off lock applied");
        let event = GuardEvent::new(
            GuardEventType::CoolingOffLock,
            self.clock.now(),
            subject,
            Severity::Warning,
            "BLOCK SUBJECT UNTIL UNLOCK",
        )
        .with_detail(json!({
            "reason": TILT_DETECTED,
            "unlock_at": unlock_at,
            "cooling_off_hours": self.cooling_off_hours,
        }));
        publish_or_warn(self.publisher.as_ref(), &event);
        true
    }

    pub fn clear_lock(&self, subject: &str, actor: &str) -> Option<LockRecord> {
        self.detector.clear(subject);
        self.locks.clear_lock(subject, actor)
    }
}
