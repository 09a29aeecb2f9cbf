//! Sliding-window rate limiting in three dimensions, plus the denial
//! breaker.
//!
//! Counters are per-tool, per-session, and global over a rolling window.
//! The breaker counts consecutive denials of any kind; past the threshold
//! it rejects everything for a cooldown, which stops a misbehaving caller
//! from grinding against the limits.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

pub const DEFAULT_PER_TOOL_PER_MIN: u32 = 60;
pub const DEFAULT_PER_SESSION_PER_MIN: u32 = 100;
pub const DEFAULT_GLOBAL_PER_MIN: u32 = 1000;
pub const DEFAULT_BREAKER_DENIALS: u32 = 100;
pub const DEFAULT_BREAKER_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RateLimits {
    pub per_tool: u32,
    pub per_session: u32,
    pub global: u32,
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_tool: DEFAULT_PER_TOOL_PER_MIN,
            per_session: DEFAULT_PER_SESSION_PER_MIN,
            global: DEFAULT_GLOBAL_PER_MIN,
            window: Duration::from_secs(60),
        }
    }
}

/// Which counter tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDimension {
    PerTool,
    PerSession,
    Global,
}

impl LimitDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitDimension::PerTool => "per_tool",
            LimitDimension::PerSession => "per_session",
            LimitDimension::Global => "global",
        }
    }
}

pub struct RateLimiter {
    cfg: RateLimits,
    per_tool: Mutex<HashMap<String, VecDeque<Instant>>>,
    per_session: Mutex<HashMap<String, VecDeque<Instant>>>,
    global: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimits) -> Self {
        Self {
            cfg,
            per_tool: Mutex::new(HashMap::new()),
            per_session: Mutex::new(HashMap::new()),
            global: Mutex::new(VecDeque::new()),
        }
    }

    /// Check all three windows; record the call only when every one admits
    /// it, so a denied call does not consume budget.
    pub fn check_and_record(&self, tool: &str, session: &str) -> Result<(), LimitDimension> {
        let now = Instant::now();
        let window = self.cfg.window;

        let mut per_tool = self.per_tool.lock().expect("limiter lock poisoned");
        let mut per_session = self.per_session.lock().expect("limiter lock poisoned");
        let mut global = self.global.lock().expect("limiter lock poisoned");

        let tool_q = per_tool.entry(format!("{session}:{tool}")).or_default();
        let session_q = per_session.entry(session.to_string()).or_default();
        trim(tool_q, now, window);
        trim(session_q, now, window);
        trim(&mut global, now, window);

        if tool_q.len() as u32 >= self.cfg.per_tool {
            return Err(LimitDimension::PerTool);
        }
        if session_q.len() as u32 >= self.cfg.per_session {
            return Err(LimitDimension::PerSession);
        }
        if global.len() as u32 >= self.cfg.global {
            return Err(LimitDimension::Global);
        }

        tool_q.push_back(now);
        session_q.push_back(now);
        global.push_back(now);
        Ok(())
    }
}

fn trim(q: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = q.front() {
        if now.duration_since(front) >= window {
            q.pop_front();
        } else {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Denial breaker
// ---------------------------------------------------------------------------

struct BreakerInner {
    consecutive_denials: u32,
    open_until: Option<Instant>,
}

pub struct DenialBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    cooldown: Duration,
}

impl DenialBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                consecutive_denials: 0,
                open_until: None,
            }),
            threshold,
            cooldown,
        }
    }

    /// Seconds remaining if the breaker is open.
    pub fn open_for(&self) -> Option<u64> {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.open_until {
            Some(until) if Instant::now() < until => {
                Some((until - Instant::now()).as_secs().max(1))
            }
            _ => None,
        }
    }

    pub fn record_denial(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_denials += 1;
        if inner.consecutive_denials >= self.threshold && inner.open_until.is_none() {
            warn!(
                denials = inner.consecutive_denials,
                "tool gateway breaker opened"
            );
            inner.open_until = Some(Instant::now() + self.cooldown);
        }
    }

    pub fn record_allowed(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_denials = 0;
        // An elapsed cooldown is cleared lazily here.
        if matches!(inner.open_until, Some(until) if Instant::now() >= until) {
            inner.open_until = None;
        }
    }
}

impl Default for DenialBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_BREAKER_DENIALS, DEFAULT_BREAKER_COOLDOWN)
    }
}
