//! Pagination-convergence controller.
//!
//! Drives a content source through repeated reveal-attempts until the
//! full record set is believed collected, tolerating flaky or absent
//! "load more" affordances. Convergence is decided solely by the stall
//! counter and explicit affordance-exhaustion signals, never by
//! comparison to an expected total.

use std::time::Duration;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::extract::ExtractionPipeline;
use crate::traits::source::{ContentSource, ElementHandle, Locator, TriggerMethod};
use crate::types::record::CandidateRecord;

/// Tuning knobs for one category run.
#[derive(Debug, Clone)]
pub struct PagingConfig {
    /// Attempts allowed before giving up when no affordance has *ever*
    /// been found
    pub grace_attempts: u32,

    /// Consecutive no-growth extraction passes before convergence
    pub stall_threshold: u32,

    /// Hard ceiling on reveal-attempts
    pub max_attempts: u32,

    /// Stop once this many unique records are visible
    pub max_records: Option<usize>,

    /// Upper bound on the post-trigger settle wait
    pub settle_timeout: Duration,

    /// Ordered affordance discovery strategies, most precise first
    pub affordances: Vec<Locator>,

    /// Reveal vocabulary used to filter generic button matches
    pub vocabulary: Vec<String>,
}

impl Default for PagingConfig {
    fn default() -> Self {
        let vocabulary = vec!["load more".to_string(), "show more".to_string()];
        Self {
            grace_attempts: 3,
            stall_threshold: 10,
            max_attempts: 20,
            max_records: None,
            settle_timeout: Duration::from_secs(15),
            affordances: vec![
                Locator::Id("load-more".to_string()),
                Locator::DataAttr("data-load-more".to_string()),
                Locator::ButtonText(vocabulary.clone()),
                Locator::AnyButton,
            ],
            vocabulary,
        }
    }
}

impl PagingConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stall threshold.
    pub fn with_stall_threshold(mut self, threshold: u32) -> Self {
        self.stall_threshold = threshold;
        self
    }

    /// Set the maximum attempt count (raise for exhaustive coverage).
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the maximum record count.
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Set the grace period for affordance discovery.
    pub fn with_grace_attempts(mut self, grace: u32) -> Self {
        self.grace_attempts = grace;
        self
    }

    /// Set the settle timeout.
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }
}

/// Why a category run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Repeated reveal-attempts no longer grow the record set, or the
    /// affordance signalled exhaustion: all available content collected
    Converged,

    /// Gave up: no reveal affordance was ever found within the grace
    /// period
    Exhausted,

    /// Orchestrator cancelled the run between attempts
    Cancelled,
}

/// Observability counters for one category run.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarvestStats {
    /// Reveal-attempts performed
    pub attempts: u32,

    /// Trigger actions attempted (an attempt may find no affordance)
    pub triggers_attempted: u32,

    /// Trigger actions where some method succeeded
    pub triggers_succeeded: u32,

    /// Containers skipped due to extraction failures, summed over passes
    pub containers_failed: u32,

    /// Containers discarded for lack of a resolvable URL
    pub discarded_no_url: u32,
}

/// Final output of one category run.
#[derive(Debug, Clone)]
pub struct CategoryHarvest {
    /// Unique candidates visible at termination, keyed by source URL
    /// with last-seen values
    pub records: Vec<CandidateRecord>,

    /// Why the run stopped
    pub termination: Termination,

    /// Counters for observability
    pub stats: HarvestStats,
}

/// What affordance discovery found this attempt.
enum Affordance {
    /// Visible, enabled; ready to trigger
    Active(ElementHandle),

    /// Visible but disabled: an explicit "no more content" signal
    SignalsExhausted,

    /// Nothing usable found
    NotFound,
}

/// Orchestrates reveal-attempts against one content source.
pub struct PaginationController {
    config: PagingConfig,
}

impl Default for PaginationController {
    fn default() -> Self {
        Self::new(PagingConfig::default())
    }
}

impl PaginationController {
    /// Create a controller with the given configuration.
    pub fn new(config: PagingConfig) -> Self {
        Self { config }
    }

    /// Drive the source to convergence, re-extracting the entire
    /// visible set after every reveal-attempt.
    ///
    /// Cancellation is honored between attempts, never mid-attempt;
    /// whatever was collected so far is returned.
    pub async fn collect(
        &self,
        source: &dyn ContentSource,
        pipeline: &ExtractionPipeline,
        cancel: &CancellationToken,
    ) -> CategoryHarvest {
        let mut best: IndexMap<String, CandidateRecord> = IndexMap::new();
        let mut stats = HarvestStats::default();
        let mut stall: u32 = 0;
        let mut affordance_ever_found = false;
        let mut termination = Termination::Converged;

        while stats.attempts < self.config.max_attempts {
            if cancel.is_cancelled() {
                info!(attempts = stats.attempts, "Run cancelled between attempts");
                termination = Termination::Cancelled;
                break;
            }
            stats.attempts += 1;

            // Seeking
            let affordance = self.seek_affordance(source).await;
            let mut exhaustion_signalled = false;

            match affordance {
                Affordance::Active(el) => {
                    affordance_ever_found = true;

                    // Revealing: trigger failure is not fatal, content
                    // may have loaded anyway
                    stats.triggers_attempted += 1;
                    if self.trigger_with_fallback(source, el).await {
                        stats.triggers_succeeded += 1;
                    }
                    source.wait_for_settle(self.config.settle_timeout).await;
                }
                Affordance::SignalsExhausted => {
                    affordance_ever_found = true;
                    exhaustion_signalled = true;
                    debug!("Affordance signals exhaustion, final extraction pass");
                }
                Affordance::NotFound => {
                    if !affordance_ever_found && stats.attempts >= self.config.grace_attempts {
                        info!(
                            attempts = stats.attempts,
                            "No reveal affordance ever found, giving up"
                        );
                        termination = Termination::Exhausted;
                        break;
                    }
                    debug!(attempt = stats.attempts, "No affordance this attempt");
                }
            }

            // Extracting: always re-read the entire visible set
            let pass = pipeline.extract_visible(source).await;
            stats.containers_failed += pass.failures.len() as u32;
            stats.discarded_no_url += pass.discarded_no_url as u32;

            let before = best.len();
            for record in pass.records {
                // Later passes are fresher for the same logical item
                best.insert(record.source_url.clone(), record);
            }
            let grew = best.len() > before;

            debug!(
                attempt = stats.attempts,
                unique = best.len(),
                grew,
                stall,
                "Extraction pass folded in"
            );

            if grew {
                stall = 0;
            } else {
                stall += 1;
            }

            if exhaustion_signalled {
                // Strong signal, short-circuits the count heuristic
                termination = Termination::Converged;
                break;
            }
            if stall >= self.config.stall_threshold {
                info!(stall, unique = best.len(), "Stall threshold reached, converged");
                termination = Termination::Converged;
                break;
            }
            if let Some(max) = self.config.max_records {
                if best.len() >= max {
                    info!(unique = best.len(), max, "Record limit reached, converged");
                    termination = Termination::Converged;
                    break;
                }
            }
        }

        info!(
            attempts = stats.attempts,
            unique = best.len(),
            ?termination,
            "Category run finished"
        );

        let mut records: Vec<CandidateRecord> = best.into_values().collect();
        if let Some(max) = self.config.max_records {
            records.truncate(max);
        }

        CategoryHarvest {
            records,
            termination,
            stats,
        }
    }

    /// Walk the ordered discovery strategies and pick the first usable
    /// affordance. Transient source errors are logged and treated as
    /// "nothing found by this strategy."
    async fn seek_affordance(&self, source: &dyn ContentSource) -> Affordance {
        let mut saw_disabled = false;

        for locator in &self.config.affordances {
            let candidates = match source.find_all(locator).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    debug!(?locator, error = %e, "Affordance query failed");
                    continue;
                }
            };

            for el in candidates {
                // Generic button enumeration is a last resort and must
                // still pass the vocabulary filter; precise strategies
                // already encode intent
                if matches!(locator, Locator::AnyButton)
                    && !self.matches_vocabulary(source, el).await
                {
                    continue;
                }

                match source.is_visible(el).await {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        debug!(error = %e, "Visibility check failed");
                        continue;
                    }
                }

                match source.is_disabled(el).await {
                    Ok(false) => return Affordance::Active(el),
                    Ok(true) => {
                        saw_disabled = true;
                    }
                    Err(e) => {
                        debug!(error = %e, "Disabled check failed");
                    }
                }
            }
        }

        if saw_disabled {
            Affordance::SignalsExhausted
        } else {
            Affordance::NotFound
        }
    }

    /// Whether the element's text contains any reveal-vocabulary phrase.
    async fn matches_vocabulary(&self, source: &dyn ContentSource, el: ElementHandle) -> bool {
        match source.text(el).await {
            Ok(Some(text)) => {
                let lower = text.to_lowercase();
                self.config.vocabulary.iter().any(|v| lower.contains(v))
            }
            _ => false,
        }
    }

    /// Trigger via the ordered method list; returns whether any method
    /// succeeded.
    async fn trigger_with_fallback(&self, source: &dyn ContentSource, el: ElementHandle) -> bool {
        for method in [TriggerMethod::Direct, TriggerMethod::Synthetic] {
            match source.trigger(el, method).await {
                Ok(()) => {
                    debug!(?method, "Trigger succeeded");
                    return true;
                }
                Err(e) => {
                    warn!(?method, error = %e, "Trigger failed");
                }
            }
        }
        false
    }
}
