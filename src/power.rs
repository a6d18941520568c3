/// Idle strategies between cycles and the platform's wake/suspend hooks
use log::info;
use tokio::time::{sleep, Duration, Instant};

use crate::models::WakeReason;

/// How the node idles between cycles. Chosen once from settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Short fixed delay, then sense again
    FreeRun { delay: Duration },
    /// Poll until `interval` has elapsed since the previous cycle
    TimerGated { interval: Duration },
    /// Arm the wake timer and suspend; waking is a fresh boot
    HardwareSuspend { duration: Duration },
}

/// Lets a cycle through at most once per interval
#[derive(Debug)]
pub struct IntervalGate {
    interval: Duration,
    last: Option<Instant>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        IntervalGate {
            interval,
            last: None,
        }
    }

    /// True when a cycle should run at `now`. The first check always passes.
    pub fn should_run(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    /// Time left until the next cycle is due
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            None => Duration::ZERO,
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }
}

/// Hardware hooks around the cycle
#[allow(async_fn_in_trait)]
pub trait Platform {
    /// Why the node booted this time
    fn wake_cause(&mut self) -> WakeReason;

    /// Suspend for `duration`. Returning means the node wakes into a fresh boot.
    async fn suspend(&mut self, duration: Duration);

    /// Full restart. Returning means the node boots again.
    async fn restart(&mut self);
}

/// Platform for a host process, where suspend and restart are simulated by
/// dropping all node state and booting again in-process
#[derive(Debug)]
pub struct HostPlatform {
    next_wake: WakeReason,
}

impl Default for HostPlatform {
    fn default() -> Self {
        HostPlatform {
            next_wake: WakeReason::FreshBoot,
        }
    }
}

impl HostPlatform {
    pub fn new() -> Self {
        HostPlatform::default()
    }
}

impl Platform for HostPlatform {
    fn wake_cause(&mut self) -> WakeReason {
        self.next_wake
    }

    async fn suspend(&mut self, duration: Duration) {
        info!("Going to sleep for {} seconds", duration.as_secs());
        sleep(duration).await;
        self.next_wake = WakeReason::TimerWake;
    }

    async fn restart(&mut self) {
        info!("Restarting");
        self.next_wake = WakeReason::Other;
    }
}
