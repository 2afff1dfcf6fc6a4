use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::controller::AssessmentSessionController;

/// Background task ticking a session once per second
///
/// Holds only a weak reference, so dropping the controller ends the task.
/// Dropping the countdown aborts it.
pub struct Countdown {
    handle: Option<JoinHandle<()>>,
}

impl Countdown {
    pub fn start(controller: &Arc<AssessmentSessionController>) -> Self {
        let controller: Weak<AssessmentSessionController> = Arc::downgrade(controller);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                let Some(controller) = controller.upgrade() else {
                    tracing::debug!("Session dropped, stopping countdown");
                    break;
                };
                if !controller.tick().await {
                    tracing::debug!(assessment_id = %controller.assessment_id(), "Countdown finished");
                    break;
                }
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop ticking
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Wait until the countdown ends on its own
    pub async fn finished(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!("Countdown task failed: {}", e);
                }
            }
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}
