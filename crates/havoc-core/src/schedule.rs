//! Cycle scheduling.
//!
//! Cheap payloads run back to back with a random short pause between them.
//! Paused time accumulates; once it reaches the current long interval, one
//! expensive payload runs, the counter resets and a new long interval is
//! drawn.
//!
//! ```text
//! cheap ─ short ─ cheap ─ short ─ ... ─ (Σ short ≥ long) ─ expensive ─ cheap ─ ...
//! ```
//!
//! [`Schedule`] is the pure bookkeeping; [`Orchestrator`] drives it, calling
//! [`run_session`] once per cycle.

use std::{marker::PhantomData, time::Duration};

use tracing::{info, warn};

use crate::{
    deploy::Deployer,
    env::Environment,
    session::{CycleRequest, Outcome, SessionConfig, run_session},
    sink::Sinks,
    transport::Transport,
};

/// Interval bounds, inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Shortest pause after a cheap cycle
    pub short_min: Duration,
    /// Longest pause after a cheap cycle
    pub short_max: Duration,
    /// Shortest accumulated pause before an expensive cycle
    pub long_min: Duration,
    /// Longest accumulated pause before an expensive cycle
    pub long_max: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            short_min: Duration::from_secs(60),
            short_max: Duration::from_secs(120),
            long_min: Duration::from_secs(300),
            long_max: Duration::from_secs(420),
        }
    }
}

/// Cost class of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Frequent, low-impact payloads
    Cheap,
    /// Occasional, high-impact payloads
    Expensive,
}

/// Accumulated-pause bookkeeping.
#[derive(Debug, Clone)]
pub struct Schedule {
    config: ScheduleConfig,
    elapsed: Duration,
    long_interval: Duration,
}

impl Schedule {
    /// New schedule with a freshly drawn long interval.
    pub fn new(config: ScheduleConfig, env: &impl Environment) -> Self {
        let long_interval = env.random_duration(config.long_min, config.long_max);
        Self { config, elapsed: Duration::ZERO, long_interval }
    }

    /// Draw the pause that follows a cheap cycle and account for it.
    pub fn next_pause(&mut self, env: &impl Environment) -> Duration {
        let pause = env.random_duration(self.config.short_min, self.config.short_max);
        self.elapsed += pause;
        pause
    }

    /// If enough pause has accumulated, reset and return `true`: an expensive
    /// cycle is due.
    pub fn take_expensive(&mut self, env: &impl Environment) -> bool {
        if self.elapsed < self.long_interval {
            return false;
        }
        self.elapsed = Duration::ZERO;
        self.long_interval = env.random_duration(self.config.long_min, self.config.long_max);
        true
    }

    /// Pause accumulated since the last expensive cycle.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Current long interval.
    #[must_use]
    pub fn long_interval(&self) -> Duration {
        self.long_interval
    }
}

/// Payload names per tier.
#[derive(Debug, Clone, Default)]
pub struct PayloadCatalog {
    /// Cheap payloads
    pub cheap: Vec<String>,
    /// Expensive payloads
    pub expensive: Vec<String>,
}

impl PayloadCatalog {
    /// Pick a payload of `tier` uniformly. `None` if the tier is empty.
    pub fn pick(&self, tier: Tier, env: &impl Environment) -> Option<&str> {
        let list = match tier {
            Tier::Cheap => &self.cheap,
            Tier::Expensive => &self.expensive,
        };
        if list.is_empty() {
            return None;
        }
        let index = usize::try_from(env.random_below(list.len() as u64)).ok()?;
        list.get(index).map(String::as_str)
    }
}

/// Where cycles bind, advertise and deploy.
#[derive(Debug, Clone)]
pub struct CycleTarget {
    /// Listener bind address (`host:0`)
    pub bind_address: String,
    /// Host agents dial back to
    pub advertise_host: String,
    /// Host agents are deployed to
    pub target_host: String,
}

/// Outcome counts over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Sessions that drained
    pub succeeded: u64,
    /// Sessions abandoned on idle timeout
    pub timed_out: u64,
    /// Sessions that failed to start or deploy
    pub failed: u64,
    /// Cycles skipped because their tier had no payloads
    pub skipped: u64,
}

impl CycleStats {
    /// Total cycles attempted, including skipped ones.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.succeeded + self.timed_out + self.failed + self.skipped
    }

    fn record(&mut self, outcome: Option<&Outcome>) {
        match outcome {
            Some(Outcome::Success) => self.succeeded += 1,
            Some(Outcome::TimedOut) => self.timed_out += 1,
            Some(Outcome::Error(_)) => self.failed += 1,
            None => self.skipped += 1,
        }
    }
}

/// Runs chaos cycles on the schedule.
pub struct Orchestrator<'a, T, E, D: ?Sized> {
    env: E,
    session: SessionConfig,
    schedule: ScheduleConfig,
    catalog: PayloadCatalog,
    target: CycleTarget,
    deployer: &'a D,
    sinks: Sinks<'a>,
    _transport: PhantomData<fn() -> T>,
}

impl<'a, T, E, D> Orchestrator<'a, T, E, D>
where
    T: Transport,
    E: Environment,
    D: Deployer + ?Sized,
{
    /// Orchestrator over the given collaborators.
    pub fn new(
        env: E,
        session: SessionConfig,
        schedule: ScheduleConfig,
        catalog: PayloadCatalog,
        target: CycleTarget,
        deployer: &'a D,
        sinks: Sinks<'a>,
    ) -> Self {
        Self { env, session, schedule, catalog, target, deployer, sinks, _transport: PhantomData }
    }

    /// Run one cycle of `tier`. Returns `None` if no payload is configured
    /// for it.
    pub async fn run_cycle(&self, tier: Tier) -> Option<Outcome> {
        let Some(payload) = self.catalog.pick(tier, &self.env) else {
            warn!(?tier, "no payloads configured, skipping cycle");
            return None;
        };

        info!(?tier, payload, "starting cycle");
        let request = CycleRequest {
            bind_address: self.target.bind_address.clone(),
            advertise_host: self.target.advertise_host.clone(),
            target_host: self.target.target_host.clone(),
            payload: payload.to_string(),
        };

        let outcome =
            run_session::<T, E, D>(&request, &self.env, &self.session, self.deployer, self.sinks).await;
        match &outcome {
            Outcome::Error(e) => warn!(?tier, payload, error = %e, "cycle failed"),
            other => info!(?tier, payload, outcome = other.label(), "cycle finished"),
        }
        Some(outcome)
    }

    /// Run cycles until `max_cycles` have been attempted (forever if
    /// `None`). Cycle failures are logged and do not stop the schedule.
    pub async fn run(&self, max_cycles: Option<u64>) -> CycleStats {
        let mut stats = CycleStats::default();
        let mut schedule = Schedule::new(self.schedule.clone(), &self.env);
        let done = |stats: &CycleStats| max_cycles.is_some_and(|max| stats.total() >= max);

        while !done(&stats) {
            let outcome = self.run_cycle(Tier::Cheap).await;
            stats.record(outcome.as_ref());
            if done(&stats) {
                break;
            }

            let pause = schedule.next_pause(&self.env);
            info!(
                pause_secs = pause.as_secs(),
                elapsed_secs = schedule.elapsed().as_secs(),
                long_secs = schedule.long_interval().as_secs(),
                "sleeping until next cycle"
            );
            self.env.sleep(pause).await;

            if schedule.take_expensive(&self.env) {
                let outcome = self.run_cycle(Tier::Expensive).await;
                stats.record(outcome.as_ref());
            }
        }

        info!(?stats, "schedule finished");
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Deterministic environment: fixed random value, no-op sleep.
    #[derive(Clone)]
    struct FixedEnv {
        value: u64,
        slept: Arc<Mutex<Vec<Duration>>>,
    }

    impl FixedEnv {
        fn new(value: u64) -> Self {
            Self { value, slept: Arc::default() }
        }
    }

    impl Environment for FixedEnv {
        type Instant = std::time::Instant;

        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        async fn sleep(&self, duration: Duration) {
            self.slept.lock().expect("lock").push(duration);
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let bytes = self.value.to_be_bytes();
            for (i, b) in buffer.iter_mut().enumerate() {
                *b = bytes[i % 8];
            }
        }
    }

    #[test]
    fn expensive_due_after_accumulated_pause() {
        // random_below always returns 0: short = 60s, long = 300s.
        let env = FixedEnv::new(0);
        let mut schedule = Schedule::new(ScheduleConfig::default(), &env);
        assert_eq!(schedule.long_interval(), Duration::from_secs(300));

        let mut due_after = None;
        for round in 1..=10 {
            assert_eq!(schedule.next_pause(&env), Duration::from_secs(60));
            if schedule.take_expensive(&env) {
                due_after = Some(round);
                break;
            }
        }

        assert_eq!(due_after, Some(5));
        assert_eq!(schedule.elapsed(), Duration::ZERO);
    }

    #[test]
    fn pauses_stay_within_bounds() {
        let env = crate::env::SystemEnv;
        let config = ScheduleConfig::default();
        let mut schedule = Schedule::new(config.clone(), &env);

        for _ in 0..200 {
            let pause = schedule.next_pause(&env);
            assert!(pause >= config.short_min && pause <= config.short_max);
            let long = schedule.long_interval();
            assert!(long >= config.long_min && long <= config.long_max);
            schedule.take_expensive(&env);
        }
    }

    #[test]
    fn catalog_pick_respects_tier() {
        let env = FixedEnv::new(1);
        let catalog = PayloadCatalog {
            cheap: vec!["jumble".into(), "cycle".into()],
            expensive: Vec::new(),
        };

        assert_eq!(catalog.pick(Tier::Cheap, &env), Some("cycle"));
        assert_eq!(catalog.pick(Tier::Expensive, &env), None);
    }

    #[test]
    fn stats_total_counts_everything() {
        let mut stats = CycleStats::default();
        stats.record(Some(&Outcome::Success));
        stats.record(Some(&Outcome::TimedOut));
        stats.record(None);
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.skipped, 1);
    }
}
