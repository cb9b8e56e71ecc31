use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Selectable backend generation model. The remote exposes two image-model
/// generations; whichever one is currently healthy gets pinned as preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelVariant {
    GemPix2,
    GemPix,
}

impl ModelVariant {
    pub fn wire_name(&self) -> &'static str {
        match self {
            ModelVariant::GemPix2 => "GEM_PIX_2",
            ModelVariant::GemPix => "GEM_PIX",
        }
    }

    pub fn alternative(&self) -> ModelVariant {
        match self {
            ModelVariant::GemPix2 => ModelVariant::GemPix,
            ModelVariant::GemPix => ModelVariant::GemPix2,
        }
    }
}

/// How a failed submission attempt is classified, which decides both the
/// backoff schedule and whether the attempt is retried at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 429. The remote throttles aggressively; long backoff.
    Throttled,
    /// HTTP 503 or 500. Short backoff, retried without limit.
    Unavailable,
    /// The request never produced an HTTP status (DNS, reset, timeout).
    Connection,
    /// Any other HTTP status. Not retried.
    Fatal { status: u16, body: String },
}

pub fn classify_status(status: u16, body: &str) -> FailureKind {
    match status {
        429 => FailureKind::Throttled,
        500 | 503 => FailureKind::Unavailable,
        other => FailureKind::Fatal {
            status: other,
            body: body.to_string(),
        },
    }
}

/// Backoff schedule per failure class. `attempt` is 1-based.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub throttle_base: Duration,
    pub throttle_cap: Duration,
    pub transient_base: Duration,
    /// Consecutive attempts against one variant before a failure is recorded
    /// against it (which may then trip the preference switch).
    pub fallback_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            throttle_base: Duration::from_secs(30),
            throttle_cap: Duration::from_secs(120),
            transient_base: Duration::from_secs(2),
            fallback_after: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying `attempt`, or None when the failure is fatal.
    pub fn delay_for(&self, kind: &FailureKind, attempt: u32) -> Option<Duration> {
        let doubled = |base: Duration| {
            let shift = attempt.saturating_sub(1).min(20);
            base.saturating_mul(1u32 << shift)
        };
        match kind {
            FailureKind::Throttled => Some(doubled(self.throttle_base).min(self.throttle_cap)),
            FailureKind::Unavailable | FailureKind::Connection => {
                Some(doubled(self.transient_base))
            }
            FailureKind::Fatal { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VariantStats {
    pub success: u64,
    pub failure: u64,
}

#[derive(Debug)]
struct ModelState {
    preferred: ModelVariant,
    consecutive_failures: u32,
    switch_threshold: u32,
    stats: HashMap<ModelVariant, VariantStats>,
}

#[derive(Debug, Clone)]
pub struct ModelSnapshot {
    pub preferred: ModelVariant,
    pub consecutive_failures: u32,
    pub stats: HashMap<ModelVariant, VariantStats>,
}

/// Which model variant submissions should use right now, shared by every
/// worker submitting against the same remote. A success pins the variant it
/// used as preferred; consecutive failures past the threshold flip the
/// preference to the alternative so concurrent workers learn from each other.
/// Constructor-injected rather than process-global so tests get isolation.
#[derive(Clone)]
pub struct ModelPreferences {
    inner: Arc<Mutex<ModelState>>,
}

impl ModelPreferences {
    pub fn new(default_variant: ModelVariant, switch_threshold: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ModelState {
                preferred: default_variant,
                consecutive_failures: 0,
                switch_threshold: switch_threshold.max(1),
                stats: HashMap::new(),
            })),
        }
    }

    pub fn preferred(&self) -> ModelVariant {
        self.lock().preferred
    }

    /// Pin `variant` as the preferred default and clear the failure streak.
    pub fn record_success(&self, variant: ModelVariant) {
        let mut state = self.lock();
        state.preferred = variant;
        state.consecutive_failures = 0;
        state.stats.entry(variant).or_default().success += 1;
    }

    /// Record a failure against `variant`. Returns the new preferred variant
    /// when the streak crossed the threshold and the preference flipped; the
    /// streak resets in the same critical section so exactly one switch
    /// happens per threshold crossing, even with concurrent callers.
    pub fn record_failure(&self, variant: ModelVariant) -> Option<ModelVariant> {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        state.stats.entry(variant).or_default().failure += 1;

        if state.consecutive_failures >= state.switch_threshold {
            let replacement = variant.alternative();
            state.preferred = replacement;
            state.consecutive_failures = 0;
            Some(replacement)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let state = self.lock();
        ModelSnapshot {
            preferred: state.preferred,
            consecutive_failures: state.consecutive_failures,
            stats: state.stats.clone(),
        }
    }

    /// Test/debug only: back to the initial state for the given default.
    pub fn reset(&self, default_variant: ModelVariant) {
        let mut state = self.lock();
        state.preferred = default_variant;
        state.consecutive_failures = 0;
        state.stats.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ModelState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ModelPreferences {
    fn default() -> Self {
        Self::new(ModelVariant::GemPix2, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let kind = FailureKind::Throttled;
        let secs: Vec<u64> = (1..=5)
            .map(|k| policy.delay_for(&kind, k).unwrap().as_secs())
            .collect();
        assert_eq!(secs, vec![30, 60, 120, 120, 120]);
    }

    #[test]
    fn transient_backoff_doubles_without_cap() {
        let policy = RetryPolicy::default();
        let secs: Vec<u64> = (1..=4)
            .map(|k| {
                policy
                    .delay_for(&FailureKind::Unavailable, k)
                    .unwrap()
                    .as_secs()
            })
            .collect();
        assert_eq!(secs, vec![2, 4, 8, 16]);
        assert_eq!(
            policy.delay_for(&FailureKind::Connection, 3).unwrap(),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn fatal_is_never_retried() {
        let policy = RetryPolicy::default();
        let kind = FailureKind::Fatal {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert!(policy.delay_for(&kind, 1).is_none());
    }

    #[test]
    fn classification_buckets() {
        assert_eq!(classify_status(429, ""), FailureKind::Throttled);
        assert_eq!(classify_status(503, ""), FailureKind::Unavailable);
        assert_eq!(classify_status(500, ""), FailureKind::Unavailable);
        assert!(matches!(
            classify_status(404, "gone"),
            FailureKind::Fatal { status: 404, .. }
        ));
    }

    #[test]
    fn exactly_threshold_failures_trigger_one_switch() {
        let prefs = ModelPreferences::new(ModelVariant::GemPix2, 3);
        assert_eq!(prefs.record_failure(ModelVariant::GemPix2), None);
        assert_eq!(prefs.record_failure(ModelVariant::GemPix2), None);
        assert_eq!(
            prefs.record_failure(ModelVariant::GemPix2),
            Some(ModelVariant::GemPix)
        );

        let snap = prefs.snapshot();
        assert_eq!(snap.preferred, ModelVariant::GemPix);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.stats[&ModelVariant::GemPix2].failure, 3);
    }

    #[test]
    fn success_pins_variant_and_resets_streak() {
        let prefs = ModelPreferences::new(ModelVariant::GemPix2, 3);
        prefs.record_failure(ModelVariant::GemPix2);
        prefs.record_failure(ModelVariant::GemPix2);
        prefs.record_success(ModelVariant::GemPix);

        let snap = prefs.snapshot();
        assert_eq!(snap.preferred, ModelVariant::GemPix);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.stats[&ModelVariant::GemPix].success, 1);

        // The streak restarts from zero after a success.
        assert_eq!(prefs.record_failure(ModelVariant::GemPix), None);
        assert_eq!(prefs.record_failure(ModelVariant::GemPix), None);
        assert_eq!(
            prefs.record_failure(ModelVariant::GemPix),
            Some(ModelVariant::GemPix2)
        );
    }

    #[test]
    fn shared_state_is_visible_across_clones() {
        let prefs = ModelPreferences::new(ModelVariant::GemPix2, 2);
        let worker = prefs.clone();
        worker.record_failure(ModelVariant::GemPix2);
        worker.record_failure(ModelVariant::GemPix2);
        assert_eq!(prefs.preferred(), ModelVariant::GemPix);
    }
}
