use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::capture::runner::AttemptRunner;
use crate::capture::{CaptureSettings, CaptureStrategy, Frame};
use crate::error::CaptureError;
use crate::logger;
use crate::platform::WindowHandle;

/// Counters for one strategy. `attempts >= successes + degraded` always holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyStats {
    pub attempts: u64,
    /// Attempts that produced a usable (non-blank) frame.
    pub successes: u64,
    /// Attempts whose OS calls succeeded but returned a blanked frame.
    pub degraded: u64,
    /// Running mean over every attempt, including failures.
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptKind {
    Success,
    Degraded,
    Failure,
}

impl StrategyStats {
    fn record(&mut self, latency: Duration, kind: AttemptKind) {
        self.attempts += 1;
        match kind {
            AttemptKind::Success => self.successes += 1,
            AttemptKind::Degraded => self.degraded += 1,
            AttemptKind::Failure => {}
        }
        let ms = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms += (ms - self.avg_latency_ms) / self.attempts as f64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Snapshot of one strategy's statistics for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyReport {
    pub name: &'static str,
    pub stats: StrategyStats,
    pub sticky: bool,
}

impl std::fmt::Display for StrategyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}: {}/{} ok, {} blank, {:.1}ms avg",
            self.name,
            if self.sticky { "*" } else { "" },
            self.stats.successes,
            self.stats.attempts,
            self.stats.degraded,
            self.stats.avg_latency_ms
        )
    }
}

/// Result of one `capture` call.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub frame: Frame,
    /// The frame is blank enough to be an anti-capture artifact; nothing in
    /// it should be trusted.
    pub degraded: bool,
    pub luminance: f64,
}

/// Blocks callers that come back sooner than `min_interval`.
struct RateLimiter {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    fn wait(&mut self) {
        if let Some(last) = self.last {
            let ready_at = last + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                thread::sleep(ready_at - now);
            }
        }
        self.last = Some(Instant::now());
    }
}

enum Attempt {
    Good(CaptureOutcome),
    Degraded(CaptureOutcome),
    Failed(CaptureError),
}

/// Ordered capture strategies with sticky selection and fallback.
pub struct CaptureStrategySelector {
    strategies: Vec<Arc<dyn CaptureStrategy>>,
    stats: Vec<StrategyStats>,
    sticky: Option<usize>,
    limiter: RateLimiter,
    luminance_floor: f64,
    runner: AttemptRunner,
}

impl CaptureStrategySelector {
    pub fn new(strategies: Vec<Arc<dyn CaptureStrategy>>, settings: &CaptureSettings) -> Self {
        let strategies = order_strategies(strategies, &settings.strategies);
        let stats = vec![StrategyStats::default(); strategies.len()];
        Self {
            strategies,
            stats,
            sticky: None,
            limiter: RateLimiter { min_interval: settings.min_interval(), last: None },
            luminance_floor: settings.luminance_floor,
            runner: AttemptRunner::new(settings.attempt_timeout()),
        }
    }

    /// Grab one frame, trying the sticky strategy first and falling back
    /// through the ordered list.
    ///
    /// When every strategy only produced blank frames the brightest one is
    /// returned with `degraded = true` instead of an error.
    pub fn capture(&mut self, window: &Arc<dyn WindowHandle>) -> Result<CaptureOutcome, CaptureError> {
        self.limiter.wait();

        let mut best_blank: Option<CaptureOutcome> = None;
        let mut attempted = 0usize;
        let mut timeouts = 0usize;
        let mut last_timeout = None;

        let sticky = self.sticky;
        let order = sticky
            .into_iter()
            .chain((0..self.strategies.len()).filter(|i| Some(*i) != sticky));

        for idx in order.collect::<Vec<_>>() {
            attempted += 1;
            match self.attempt(idx, window) {
                Attempt::Good(outcome) => {
                    if self.sticky != Some(idx) {
                        logger::info_p("capture", &format!("sticky strategy is now {}", self.strategies[idx].name()));
                        self.sticky = Some(idx);
                    }
                    return Ok(outcome);
                }
                Attempt::Degraded(outcome) => {
                    if best_blank.as_ref().map_or(true, |b| outcome.luminance > b.luminance) {
                        best_blank = Some(outcome);
                    }
                }
                Attempt::Failed(CaptureError::WindowGone) => {
                    self.sticky = None;
                    return Err(CaptureError::WindowGone);
                }
                Attempt::Failed(err) => {
                    if let CaptureError::Timeout { .. } = err {
                        timeouts += 1;
                        last_timeout = Some(err.clone());
                    }
                    logger::warn_p("capture", &err.to_string());
                }
            }

            if Some(idx) == self.sticky {
                logger::warn_p("capture", &format!("sticky strategy {} failed, probing others", self.strategies[idx].name()));
                self.sticky = None;
            }
        }

        if let Some(outcome) = best_blank {
            return Ok(outcome);
        }
        match last_timeout {
            Some(err) if timeouts == attempted => Err(err),
            _ => Err(CaptureError::AllStrategiesExhausted { attempted }),
        }
    }

    fn attempt(&mut self, idx: usize, window: &Arc<dyn WindowHandle>) -> Attempt {
        let strategy = Arc::clone(&self.strategies[idx]);
        let started = Instant::now();
        let result = self.runner.run(&strategy, window);
        let latency = started.elapsed();

        match result {
            Ok(frame) => {
                let luminance = frame.mean_luminance();
                let degraded = luminance < self.luminance_floor;
                let kind = if degraded { AttemptKind::Degraded } else { AttemptKind::Success };
                self.stats[idx].record(latency, kind);
                let outcome = CaptureOutcome { frame, degraded, luminance };
                if degraded {
                    Attempt::Degraded(outcome)
                } else {
                    Attempt::Good(outcome)
                }
            }
            Err(err) => {
                self.stats[idx].record(latency, AttemptKind::Failure);
                Attempt::Failed(err)
            }
        }
    }

    /// Forget the sticky strategy, e.g. after the window was rediscovered.
    pub fn reset_sticky(&mut self) {
        self.sticky = None;
    }

    pub fn sticky_name(&self) -> Option<&'static str> {
        self.sticky.map(|i| self.strategies[i].name())
    }

    pub fn stats(&self, name: &str) -> Option<&StrategyStats> {
        self.strategies
            .iter()
            .position(|s| s.name() == name)
            .map(|i| &self.stats[i])
    }

    pub fn reports(&self) -> Vec<StrategyReport> {
        self.strategies
            .iter()
            .zip(&self.stats)
            .enumerate()
            .map(|(i, (s, stats))| StrategyReport {
                name: s.name(),
                stats: stats.clone(),
                sticky: self.sticky == Some(i),
            })
            .collect()
    }

    /// Wait for in-flight attempts and release the workers.
    pub fn shutdown(self) {
        self.runner.shutdown();
    }
}

/// Put explicitly named strategies first, in the given order; the rest keep
/// their platform order.
fn order_strategies(
    mut strategies: Vec<Arc<dyn CaptureStrategy>>,
    names: &[String],
) -> Vec<Arc<dyn CaptureStrategy>> {
    let mut ordered = Vec::with_capacity(strategies.len());
    for name in names {
        match strategies.iter().position(|s| s.name() == name) {
            Some(i) => ordered.push(strategies.remove(i)),
            None => logger::warn_p("capture", &format!("unknown capture strategy '{}' in settings", name)),
        }
    }
    ordered.extend(strategies);
    ordered
}
