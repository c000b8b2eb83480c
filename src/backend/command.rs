//! Outbound command execution
//!
//! The controller never awaits the station process. It queues [`Command`]s,
//! which a single [`CommandWorker`] task executes in issue order; results that
//! the controller must act on come back as [`CommandReply`] events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    backend::{StationBackend, properties::PropertyMap},
    core::{
        error::StationError,
        types::{AttemptId, NetworkHandle, ServiceId},
    },
};

/// Outbound request to the station process
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Scan {
        args: PropertyMap,
    },
    /// `AddNetwork` followed by `SelectNetwork`
    Connect {
        attempt: AttemptId,
        service: ServiceId,
        params: PropertyMap,
    },
    Disconnect {
        service: Option<ServiceId>,
    },
    DisableNetwork {
        network: NetworkHandle,
    },
    RemoveNetwork {
        network: NetworkHandle,
    },
    FlushBss {
        max_age_secs: u32,
    },
}

/// Result of a command the controller needs to hear about
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    ScanFailed(StationError),
    NetworkSelected {
        attempt: AttemptId,
        service: ServiceId,
        network: NetworkHandle,
    },
    ConnectFailed {
        attempt: AttemptId,
        service: ServiceId,
        /// Entry created before the failure, if `AddNetwork` succeeded
        network: Option<NetworkHandle>,
        error: StationError,
    },
    DisconnectFailed {
        service: Option<ServiceId>,
        error: StationError,
    },
    CleanupFailed {
        operation: &'static str,
        error: StationError,
    },
}

/// Sequential executor of [`Command`]s against a backend
pub struct CommandWorker<B: StationBackend> {
    backend: Arc<B>,
}

impl<B: StationBackend> CommandWorker<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Execute commands until the channel closes, passing replies to `reply`
    pub async fn run<F>(self, mut commands: mpsc::UnboundedReceiver<Command>, reply: F)
    where
        F: Fn(CommandReply) + Send + 'static,
    {
        while let Some(command) = commands.recv().await {
            if let Some(result) = self.execute(command).await {
                reply(result);
            }
        }
        debug!("command channel closed, worker exiting");
    }

    /// Execute one command; `None` when it succeeded without anything to report
    pub async fn execute(&self, command: Command) -> Option<CommandReply> {
        debug!(?command, "executing station command");
        match command {
            Command::Scan { args } => self
                .backend
                .scan(args)
                .await
                .err()
                .map(CommandReply::ScanFailed),

            Command::Connect {
                attempt,
                service,
                params,
            } => {
                let network = match self.backend.add_network(params).await {
                    Ok(network) => network,
                    Err(error) => {
                        return Some(CommandReply::ConnectFailed {
                            attempt,
                            service,
                            network: None,
                            error,
                        });
                    }
                };
                match self.backend.select_network(&network).await {
                    Ok(()) => Some(CommandReply::NetworkSelected {
                        attempt,
                        service,
                        network,
                    }),
                    Err(error) => Some(CommandReply::ConnectFailed {
                        attempt,
                        service,
                        network: Some(network),
                        error,
                    }),
                }
            }

            Command::Disconnect { service } => self
                .backend
                .disconnect()
                .await
                .err()
                .map(|error| CommandReply::DisconnectFailed { service, error }),

            Command::DisableNetwork { network } => {
                cleanup("DisableNetwork", self.backend.disable_network(&network).await)
            }

            Command::RemoveNetwork { network } => {
                cleanup("RemoveNetwork", self.backend.remove_network(&network).await)
            }

            Command::FlushBss { max_age_secs } => {
                cleanup("FlushBSS", self.backend.flush_bss(max_age_secs).await)
            }
        }
    }
}

fn cleanup(operation: &'static str, result: Result<(), StationError>) -> Option<CommandReply> {
    match result {
        Ok(()) => None,
        Err(error) => {
            warn!(operation, %error, "station cleanup call failed");
            Some(CommandReply::CleanupFailed { operation, error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockStationBackend, mock_backend::StationCall};
    use pretty_assertions::assert_eq;

    fn connect(attempt: u64) -> Command {
        Command::Connect {
            attempt: AttemptId(attempt),
            service: ServiceId(1),
            params: PropertyMap::new(),
        }
    }

    #[tokio::test]
    async fn test_connect_adds_then_selects() {
        let backend = Arc::new(MockStationBackend::new());
        let worker = CommandWorker::new(backend.clone());

        let reply = worker.execute(connect(1)).await.unwrap();
        let calls = backend.calls().await;

        assert!(matches!(calls[0], StationCall::AddNetwork(_)));
        assert!(matches!(calls[1], StationCall::SelectNetwork(_)));
        match reply {
            CommandReply::NetworkSelected {
                attempt, network, ..
            } => {
                assert_eq!(attempt, AttemptId(1));
                assert_eq!(calls[1], StationCall::SelectNetwork(network));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_select_failure_reports_created_entry() {
        let backend = Arc::new(MockStationBackend::new());
        backend
            .fail_next_select(StationError::Rejected("busy".into()))
            .await;
        let worker = CommandWorker::new(backend.clone());

        match worker.execute(connect(3)).await.unwrap() {
            CommandReply::ConnectFailed { network, error, .. } => {
                assert!(network.is_some());
                assert_eq!(error, StationError::Rejected("busy".into()));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_add_failure_skips_select() {
        let backend = Arc::new(MockStationBackend::new());
        backend
            .fail_next_add(StationError::InvalidArgs("ssid".into()))
            .await;
        let worker = CommandWorker::new(backend.clone());

        let reply = worker.execute(connect(1)).await.unwrap();
        assert!(matches!(
            reply,
            CommandReply::ConnectFailed { network: None, .. }
        ));
        assert_eq!(backend.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_failure_is_reported() {
        let backend = Arc::new(MockStationBackend::new());
        backend.fail_next_disconnect(StationError::NotConnected).await;
        let worker = CommandWorker::new(backend.clone());

        let reply = worker
            .execute(Command::Disconnect {
                service: Some(ServiceId(4)),
            })
            .await;
        assert_eq!(
            reply,
            Some(CommandReply::DisconnectFailed {
                service: Some(ServiceId(4)),
                error: StationError::NotConnected,
            })
        );
    }

    #[tokio::test]
    async fn test_successful_commands_are_silent() {
        let backend = Arc::new(MockStationBackend::new());
        let worker = CommandWorker::new(backend.clone());

        assert_eq!(
            worker
                .execute(Command::Scan {
                    args: PropertyMap::new()
                })
                .await,
            None
        );
        assert_eq!(
            worker.execute(Command::FlushBss { max_age_secs: 10 }).await,
            None
        );
        assert_eq!(
            backend.calls().await,
            vec![StationCall::Scan(PropertyMap::new()), StationCall::FlushBss(10)]
        );
    }

    #[tokio::test]
    async fn test_run_preserves_issue_order() {
        let backend = Arc::new(MockStationBackend::new());
        let worker = CommandWorker::new(backend.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        tx.send(Command::Disconnect { service: None }).unwrap();
        tx.send(connect(2)).unwrap();
        drop(tx);

        worker
            .run(rx, move |reply| {
                let _ = reply_tx.send(reply);
            })
            .await;

        let calls = backend.calls().await;
        assert_eq!(calls[0], StationCall::Disconnect);
        assert!(matches!(calls[1], StationCall::AddNetwork(_)));
        assert!(matches!(calls[2], StationCall::SelectNetwork(_)));
        assert!(matches!(
            reply_rx.recv().await,
            Some(CommandReply::NetworkSelected { .. })
        ));
    }
}
