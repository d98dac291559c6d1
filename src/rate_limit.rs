//! Per-identity usage limits over a rolling window.
//!
//! Each identity has one record holding both counters and the start of its
//! window. A record older than the window is treated as absent. `check` and
//! `increment` are separate: callers check before a gated action and
//! increment only once it succeeded.
//!
//! State lives in a [`RateLimitStore`]; [`JsonFileStore`] rewrites one JSON
//! object on every change and assumes a single writer process.

use crate::config::MAX_RATE_WINDOW_HOURS;
use crate::error::ExplainError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Analysis,
    Chat,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LimitKind::Analysis => "Analysis",
            LimitKind::Chat => "Chat",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    #[serde(default)]
    pub analysis_count: u32,
    #[serde(default)]
    pub chat_count: u32,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_reset: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            analysis_count: 0,
            chat_count: 0,
            last_reset: now,
        }
    }

    pub fn count(&self, kind: LimitKind) -> u32 {
        match kind {
            LimitKind::Analysis => self.analysis_count,
            LimitKind::Chat => self.chat_count,
        }
    }

    fn bump(&mut self, kind: LimitKind) {
        match kind {
            LimitKind::Analysis => self.analysis_count += 1,
            LimitKind::Chat => self.chat_count += 1,
        }
    }
}

pub type RateLimitRecords = HashMap<String, RateLimitRecord>;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|p| *p.into_inner())
    }
}

/// Persistence for the full record set.
pub trait RateLimitStore: Send + Sync {
    fn load(&self) -> Result<RateLimitRecords, ExplainError>;
    fn save(&self, records: &RateLimitRecords) -> Result<(), ExplainError>;
}

/// JSON object on disk, rewritten wholesale.
///
/// A missing or unreadable file loads as an empty set.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RateLimitStore for JsonFileStore {
    fn load(&self) -> Result<RateLimitRecords, ExplainError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                warn!("Cannot read {}: {}; starting empty", self.path.display(), e);
                return Ok(HashMap::new());
            }
        };
        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    "Corrupt rate-limit file {}: {}; starting empty",
                    self.path.display(),
                    e
                );
                Ok(HashMap::new())
            }
        }
    }

    fn save(&self, records: &RateLimitRecords) -> Result<(), ExplainError> {
        let to_err = |detail: String| ExplainError::RateLimitStore {
            path: self.path.clone(),
            detail,
        };
        let json = serde_json::to_string(records).map_err(|e| to_err(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| to_err(e.to_string()))
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<RateLimitRecords>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryStore {
    fn load(&self) -> Result<RateLimitRecords, ExplainError> {
        self.records
            .lock()
            .map(|r| r.clone())
            .map_err(|_| ExplainError::Internal("rate-limit store lock poisoned".into()))
    }

    fn save(&self, records: &RateLimitRecords) -> Result<(), ExplainError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| ExplainError::Internal("rate-limit store lock poisoned".into()))?;
        *guard = records.clone();
        Ok(())
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateDecision {
    pub kind: LimitKind,
    pub allowed: bool,
    pub remaining: u32,
    /// User-facing denial message.
    pub message: Option<String>,
    /// Time until the window resets; set on denial.
    pub resets_in: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub analysis_count: u32,
    pub chat_count: u32,
    pub analysis_remaining: u32,
    pub chat_remaining: u32,
    pub analysis_limit: u32,
    pub chat_limit: u32,
    /// Hours until the current window resets, if a window is open.
    pub resets_in_hours: Option<f64>,
}

pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    analysis_limit: u32,
    chat_limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// `window_hours` is capped at [`MAX_RATE_WINDOW_HOURS`].
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        analysis_limit: u32,
        chat_limit: u32,
        window_hours: u64,
    ) -> Self {
        Self {
            store,
            clock,
            analysis_limit,
            chat_limit,
            window: Duration::hours(window_hours.min(MAX_RATE_WINDOW_HOURS) as i64),
        }
    }

    pub fn limit(&self, kind: LimitKind) -> u32 {
        match kind {
            LimitKind::Analysis => self.analysis_limit,
            LimitKind::Chat => self.chat_limit,
        }
    }

    fn is_stale(&self, record: &RateLimitRecord, now: DateTime<Utc>) -> bool {
        now - record.last_reset >= self.window
    }

    /// Load all records and drop expired ones.
    fn load_live(&self, now: DateTime<Utc>) -> Result<RateLimitRecords, ExplainError> {
        let mut records = self.store.load()?;
        let before = records.len();
        records.retain(|_, r| !self.is_stale(r, now));
        if records.len() < before {
            debug!("Pruned {} expired rate-limit records", before - records.len());
        }
        Ok(records)
    }

    fn resets_in(&self, record: &RateLimitRecord, now: DateTime<Utc>) -> Duration {
        self.window - (now - record.last_reset)
    }

    /// Whether `identity` may perform one more `kind` action. Never mutates state.
    pub fn check(&self, identity: &str, kind: LimitKind) -> Result<RateDecision, ExplainError> {
        let now = self.clock.now();
        let records = self.load_live(now)?;
        let record = records
            .get(identity)
            .cloned()
            .unwrap_or_else(|| RateLimitRecord::fresh(now));

        let limit = self.limit(kind);
        let count = record.count(kind);
        if count >= limit {
            let resets_in = self.resets_in(&record, now);
            let hours = resets_in.num_seconds() as f64 / 3600.0;
            let message = format!(
                "{} limit reached ({}/{}). Resets in {:.1} hours.",
                kind, limit, limit, hours
            );
            info!("Rate limit hit for {}: {}", identity, message);
            return Ok(RateDecision {
                kind,
                allowed: false,
                remaining: 0,
                message: Some(message),
                resets_in: Some(resets_in),
            });
        }

        Ok(RateDecision {
            kind,
            allowed: true,
            remaining: limit - count,
            message: None,
            resets_in: None,
        })
    }

    /// Record one successful `kind` action for `identity`.
    pub fn increment(&self, identity: &str, kind: LimitKind) -> Result<(), ExplainError> {
        let now = self.clock.now();
        let mut records = self.load_live(now)?;
        let record = records
            .entry(identity.to_string())
            .or_insert_with(|| RateLimitRecord::fresh(now));
        record.bump(kind);
        debug!(
            "{} usage for {}: {}/{}",
            kind,
            identity,
            record.count(kind),
            self.limit(kind)
        );
        self.store.save(&records)
    }

    pub fn stats(&self, identity: &str) -> Result<UsageStats, ExplainError> {
        let now = self.clock.now();
        let records = self.load_live(now)?;
        let record = records.get(identity);
        let analysis_count = record.map_or(0, |r| r.analysis_count);
        let chat_count = record.map_or(0, |r| r.chat_count);
        Ok(UsageStats {
            analysis_count,
            chat_count,
            analysis_remaining: self.analysis_limit.saturating_sub(analysis_count),
            chat_remaining: self.chat_limit.saturating_sub(chat_count),
            analysis_limit: self.analysis_limit,
            chat_limit: self.chat_limit,
            resets_in_hours: record
                .map(|r| self.resets_in(r, now).num_seconds() as f64 / 3600.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let l = RateLimiter::new(Arc::new(MemoryStore::new()), clock.clone(), 10, 20, 24);
        (l, clock)
    }

    #[test]
    fn huge_window_is_capped() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let l = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            1,
            1,
            3_000_000_000_000_000,
        );
        l.increment("u", LimitKind::Chat).unwrap();
        let d = l.check("u", LimitKind::Chat).unwrap();
        assert!(!d.allowed);
        assert_eq!(
            d.resets_in,
            Some(Duration::hours(MAX_RATE_WINDOW_HOURS as i64))
        );
    }

    #[test]
    fn eleventh_analysis_is_denied() {
        let (l, clock) = limiter();
        for i in 0..10 {
            let d = l.check("u", LimitKind::Analysis).unwrap();
            assert!(d.allowed, "call {i} should pass");
            assert_eq!(d.remaining, 10 - i);
            l.increment("u", LimitKind::Analysis).unwrap();
        }
        clock.advance(Duration::hours(6));
        let d = l.check("u", LimitKind::Analysis).unwrap();
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(
            d.message.as_deref(),
            Some("Analysis limit reached (10/10). Resets in 18.0 hours.")
        );
    }

    #[test]
    fn window_expiry_restores_quota() {
        let (l, clock) = limiter();
        for _ in 0..10 {
            l.increment("u", LimitKind::Analysis).unwrap();
        }
        assert!(!l.check("u", LimitKind::Analysis).unwrap().allowed);

        clock.advance(Duration::hours(24) + Duration::seconds(1));
        let d = l.check("u", LimitKind::Analysis).unwrap();
        assert!(d.allowed);
        assert_eq!(d.remaining, 10);
    }

    #[test]
    fn check_does_not_consume() {
        let (l, _) = limiter();
        for _ in 0..5 {
            assert_eq!(l.check("u", LimitKind::Chat).unwrap().remaining, 20);
        }
        l.increment("u", LimitKind::Chat).unwrap();
        assert_eq!(l.check("u", LimitKind::Chat).unwrap().remaining, 19);
    }

    #[test]
    fn counters_are_independent_per_kind_and_identity() {
        let (l, _) = limiter();
        l.increment("a", LimitKind::Analysis).unwrap();
        l.increment("a", LimitKind::Chat).unwrap();
        l.increment("a", LimitKind::Chat).unwrap();

        let s = l.stats("a").unwrap();
        assert_eq!((s.analysis_count, s.chat_count), (1, 2));
        assert_eq!((s.analysis_remaining, s.chat_remaining), (9, 18));
        assert_eq!(s.resets_in_hours, Some(24.0));

        let other = l.stats("b").unwrap();
        assert_eq!(other.analysis_remaining, 10);
        assert_eq!(other.resets_in_hours, None);
    }

    #[test]
    fn json_file_roundtrip_and_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".rate_limits.json");
        let store = JsonFileStore::new(&path);

        assert!(store.load().unwrap().is_empty());

        let mut records = HashMap::new();
        records.insert(
            "user_0123456789abcdef".to_string(),
            RateLimitRecord {
                analysis_count: 3,
                chat_count: 1,
                last_reset: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            },
        );
        store.save(&records).unwrap();
        assert_eq!(store.load().unwrap(), records);

        std::fs::write(&path, "{not json").unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
