//! Single-shot merge trigger, re-armed by every relevant inbound event.
//!
//! The scheduler is a two-state machine, Idle and Armed. Arming while armed
//! cancels and restarts the deadline. Exactly one deadline exists at a time;
//! the owning dispatcher task serializes arming against firing, so a merge
//! can never overlap a re-arm.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Resettable quiet-period timer
#[derive(Debug)]
pub struct Debounce {
    quiet_period: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadline: None,
        }
    }

    /// Arm the timer, or push an armed deadline out by a full quiet period
    pub fn rearm(&mut self) {
        self.deadline = Some(Instant::now() + self.quiet_period);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the quiet period elapses, returning the timer to Idle.
    ///
    /// Pending forever while idle, so this can sit in a `select!` arm without
    /// spinning. Dropping the future (another arm won) leaves the deadline
    /// armed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_quiet_period() {
        let mut debounce = Debounce::new(Duration::from_secs(2));
        debounce.rearm();

        assert!(timeout(Duration::from_secs(3), debounce.fired())
            .await
            .is_ok());
        assert!(!debounce.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timer_never_fires() {
        let mut debounce = Debounce::new(Duration::from_secs(2));

        assert!(timeout(Duration::from_secs(10), debounce.fired())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_deadline_out() {
        let mut debounce = Debounce::new(Duration::from_secs(2));
        debounce.rearm();

        advance(Duration::from_millis(1500)).await;
        debounce.rearm();

        // Without the re-arm this would have fired 500ms from now
        assert!(
            timeout(Duration::from_millis(1900), debounce.fired())
                .await
                .is_err()
        );
        // The pushed-out deadline is still pending and fires on schedule
        assert!(timeout(Duration::from_millis(200), debounce.fired())
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_one_fire() {
        let mut debounce = Debounce::new(Duration::from_secs(2));

        for _ in 0..3 {
            debounce.rearm();
            advance(Duration::from_millis(500)).await;
        }

        assert!(timeout(Duration::from_secs(3), debounce.fired())
            .await
            .is_ok());
        // Back to Idle: no second fire without a new event
        assert!(timeout(Duration::from_secs(10), debounce.fired())
            .await
            .is_err());
    }
}
