//! Start and stop a session from another task.

use scaleward_health::AlertBatch;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::controller::{Phase, SessionController};
use crate::error::{SessionError, SessionResult};

const COMMAND_CAPACITY: usize = 32;

/// Request applied by the controller task to its alert registry.
#[derive(Debug)]
pub enum AlertCommand {
    Fire {
        batch: AlertBatch,
        reply: oneshot::Sender<Vec<String>>,
    },
    Reset {
        /// `None` clears every alert.
        name: Option<String>,
        reply: oneshot::Sender<usize>,
    },
}

/// A running session: its task, stop signal and command channel.
pub struct SessionHandle {
    stop: watch::Sender<bool>,
    phase: watch::Receiver<Phase>,
    commands: mpsc::Sender<AlertCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn `controller.run` on the runtime.
    pub fn spawn(controller: SessionController) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let phase = controller.subscribe();
        let task = tokio::spawn(controller.run(stop_rx, commands_rx));
        Self {
            stop,
            phase,
            commands,
            task,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal stop and wait until teardown has run.
    ///
    /// An evaluation in flight finishes (or times out) first.
    pub async fn stop(self) -> SessionResult<()> {
        info!(phase = %self.phase(), "stopping session");
        let _ = self.stop.send(true);
        self.task
            .await
            .map_err(|e| SessionError::Closed(e.to_string()))
    }

    /// Record firing alerts; returns the names newly added.
    pub async fn fire_alerts(&self, batch: AlertBatch) -> SessionResult<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(AlertCommand::Fire { batch, reply }).await?;
        rx.await
            .map_err(|_| SessionError::Closed("alert command dropped".to_string()))
    }

    /// Forget one alert, or every alert when `name` is `None`.
    pub async fn reset_alerts(&self, name: Option<String>) -> SessionResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(AlertCommand::Reset { name, reply }).await?;
        rx.await
            .map_err(|_| SessionError::Closed("alert command dropped".to_string()))
    }

    async fn send(&self, command: AlertCommand) -> SessionResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed("session is no longer accepting commands".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use scaleward_adapters::{SimulatedAdapter, StaticMetrics};
    use scaleward_health::Alert;
    use scaleward_policy::Policy;
    use scaleward_rules::OutputSink;

    use super::*;
    use crate::backends::{Backends, SessionSettings};

    fn spawn(interval: Duration) -> SessionHandle {
        let policy = Policy::from_yaml(
            "scaling:\n  nodes:\n    - name: worker\n      scaling_rule: 'if spike: m_node_count = 1'\n",
        )
        .unwrap();
        let settings = SessionSettings {
            cycle_interval: interval,
            ..SessionSettings::default()
        };
        let backends = Backends::simulated(StaticMetrics::new(), Arc::new(SimulatedAdapter::new()));
        let sink = OutputSink::start();
        SessionHandle::spawn(SessionController::new(policy, settings, backends, sink.writer()).unwrap())
    }

    #[tokio::test]
    async fn alert_commands_reach_the_running_session() {
        let handle = spawn(Duration::from_secs(3600));
        let added = handle
            .fire_alerts(AlertBatch {
                alerts: vec![Alert::firing("spike", "t1"), Alert::firing("other", "t2")],
            })
            .await
            .unwrap();
        assert_eq!(added, vec!["spike".to_string(), "other".to_string()]);
        assert_eq!(handle.reset_alerts(Some("spike".to_string())).await.unwrap(), 1);
        assert_eq!(handle.reset_alerts(None).await.unwrap(), 1);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_returns_promptly_mid_interval() {
        let handle = spawn(Duration::from_secs(3600));
        let mut phase = handle.phase.clone();
        phase.wait_for(|p| *p == Phase::Running).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*phase.borrow(), Phase::Stopped);
    }
}
