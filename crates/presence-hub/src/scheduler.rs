use crate::liveness::ClientLivenessTracker;
use crate::registry::SessionRegistry;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

pub const DEFAULT_PERIOD: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    /// Stop ticking and clear presence, but keep the process alive.
    Pause,
    Shutdown,
}

pub struct HookContext<'a> {
    pub registry: &'a mut SessionRegistry,
    pub liveness: &'a mut ClientLivenessTracker,
    pub prevent_shutdown: bool,
}

pub trait PreUpdateHook: Send {
    fn name(&self) -> &'static str;

    fn before_update(&mut self, ctx: &mut HookContext<'_>) -> HookOutcome;
}

/// What to do once the registry may have lost its last client.
pub fn shutdown_decision(registry: &mut SessionRegistry, prevent_shutdown: bool) -> HookOutcome {
    if registry.awaiting_repo() || registry.has_clients() {
        return HookOutcome::Continue;
    }
    if prevent_shutdown {
        registry.mark_not_ready();
        HookOutcome::Pause
    } else {
        HookOutcome::Shutdown
    }
}

/// Drops clients that stopped pinging, then decides whether to keep running.
#[derive(Debug, Default)]
pub struct LivenessHook;

impl PreUpdateHook for LivenessHook {
    fn name(&self) -> &'static str {
        "liveness"
    }

    fn before_update(&mut self, ctx: &mut HookContext<'_>) -> HookOutcome {
        let seen = ctx.liveness.snapshot_and_clear();
        let departed = ctx.registry.reconcile_liveness(seen);
        if !departed.is_empty() {
            info!(
                event = "clients_departed",
                departed = ?departed,
                remaining = ctx.registry.client_count()
            );
        }
        shutdown_decision(ctx.registry, ctx.prevent_shutdown)
    }
}

pub struct UpdateScheduler {
    period: Duration,
    interval: Option<Interval>,
    hooks: Vec<Box<dyn PreUpdateHook>>,
}

impl UpdateScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
            hooks: Vec::new(),
        }
    }

    pub fn add_hook(&mut self, hook: Box<dyn PreUpdateHook>) {
        self.hooks.push(hook);
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Starts ticking with an immediate first tick. Returns false when already
    /// running, in which case the caller forces a tick itself.
    pub fn start(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        info!(event = "scheduler_start", period_secs = self.period.as_secs());
        true
    }

    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            info!(event = "scheduler_stop");
        }
    }

    /// Resolves on the next tick; never resolves while stopped.
    pub async fn wait(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    /// Runs hooks in registration order, stopping at the first one that does
    /// not want the tick to continue.
    pub fn run_hooks(&mut self, ctx: &mut HookContext<'_>) -> HookOutcome {
        for hook in self.hooks.iter_mut() {
            let outcome = hook.before_update(ctx);
            if outcome != HookOutcome::Continue {
                debug!(event = "tick_short_circuit", hook = hook.name(), outcome = ?outcome);
                return outcome;
            }
        }
        HookOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_stats::fake::{stats, FakeStatSource};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        outcome: HookOutcome,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl PreUpdateHook for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        fn before_update(&mut self, _ctx: &mut HookContext<'_>) -> HookOutcome {
            self.calls.lock().expect("calls").push(self.name);
            self.outcome
        }
    }

    fn registry(dont_await_repo: bool) -> SessionRegistry {
        let source = Arc::new(FakeStatSource::default());
        source.set("/work/alpha", Some(stats("main", 1, None)));
        SessionRegistry::new(source, dont_await_repo)
    }

    #[tokio::test]
    async fn start_ticks_immediately_and_stop_parks() {
        let mut scheduler = UpdateScheduler::new(Duration::from_secs(60));
        assert!(scheduler.start());
        assert!(!scheduler.start());
        tokio::time::timeout(Duration::from_millis(200), scheduler.wait())
            .await
            .expect("first tick is immediate");

        scheduler.stop();
        assert!(!scheduler.is_running());
        let parked = tokio::time::timeout(Duration::from_millis(100), scheduler.wait()).await;
        assert!(parked.is_err());
    }

    #[test]
    fn hooks_run_in_order_and_short_circuit() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = UpdateScheduler::new(DEFAULT_PERIOD);
        for (name, outcome) in [
            ("first", HookOutcome::Continue),
            ("second", HookOutcome::Pause),
            ("third", HookOutcome::Continue),
        ] {
            scheduler.add_hook(Box::new(Recording {
                name,
                outcome,
                calls: calls.clone(),
            }));
        }

        let mut registry = registry(false);
        let mut liveness = ClientLivenessTracker::new();
        let mut ctx = HookContext {
            registry: &mut registry,
            liveness: &mut liveness,
            prevent_shutdown: false,
        };
        assert_eq!(scheduler.run_hooks(&mut ctx), HookOutcome::Pause);
        assert_eq!(*calls.lock().expect("calls"), vec!["first", "second"]);
    }

    #[test]
    fn liveness_hook_shuts_down_once_clients_vanish() {
        let mut registry = registry(false);
        let mut liveness = ClientLivenessTracker::new();
        registry.set_active(5, Path::new("/work/alpha"), None);
        liveness.record(5);

        let mut hook = LivenessHook;
        let mut ctx = HookContext {
            registry: &mut registry,
            liveness: &mut liveness,
            prevent_shutdown: false,
        };
        assert_eq!(hook.before_update(&mut ctx), HookOutcome::Continue);
        assert_eq!(hook.before_update(&mut ctx), HookOutcome::Shutdown);
    }

    #[test]
    fn prevent_shutdown_pauses_and_marks_not_ready() {
        let mut registry = registry(false);
        registry.set_active(5, Path::new("/work/alpha"), None);
        registry.drop_client(5);

        assert_eq!(shutdown_decision(&mut registry, true), HookOutcome::Pause);
        assert!(!registry.is_ready());

        let mut awaiting = self::registry(true);
        assert_eq!(shutdown_decision(&mut awaiting, false), HookOutcome::Continue);
    }
}
