//! Background token expiry sweep
//!
//! A single long-lived task, independent of any connection, that wakes on
//! a fixed interval and asks the coordinator to purge expired tokens. The
//! purge runs inside a coordinator command, so it shares the same
//! serialization point as live request handling — and a stop request
//! cannot interrupt a sweep that has already been accepted.
//!
//! Store errors do not kill the task; it logs and backs off to a longer
//! sleep before retrying.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info};

use crate::server::Command;

/// Extra sleep added after a failed sweep.
const BACKOFF_EXTRA: Duration = Duration::from_secs(30);

/// Run the cleanup loop until `shutdown` is signalled or the coordinator
/// goes away.
pub async fn run_token_cleanup(
    cmd_tx: mpsc::Sender<Command>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Token cleanup task started");
    let mut backing_off = false;

    loop {
        let sleep_for = if backing_off {
            interval + BACKOFF_EXTRA
        } else {
            interval
        };
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(sleep_for) => {}
        }

        let (reply, rx) = oneshot::channel();
        if cmd_tx
            .send(Command::PurgeExpiredTokens { reply })
            .await
            .is_err()
        {
            break;
        }
        match rx.await {
            Ok(Ok(purged)) => {
                backing_off = false;
                if purged > 0 {
                    info!("Token cleanup removed {} expired token(s)", purged);
                }
            }
            Ok(Err(e)) => {
                error!("Token cleanup sweep failed: {}", e);
                backing_off = true;
            }
            Err(_) => break,
        }
    }

    info!("Token cleanup task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::EchoBackend;
    use crate::server::Coordinator;
    use crate::store::credentials::CredentialStore;
    use crate::store::tokens::{TokenRecord, TokenStore};
    use crate::store::{MemoryStore, RecordStore};
    use crate::types::UserId;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cleanup_purges_expired_tokens() {
        let (tx, rx) = mpsc::channel(64);
        let token_backing = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(
            rx,
            tx.clone(),
            CredentialStore::new(Arc::new(MemoryStore::new())),
            TokenStore::new(token_backing.clone(), Duration::from_secs(3600)),
            Arc::new(EchoBackend),
            Duration::from_secs(5),
        );
        tokio::spawn(coordinator.run());

        token_backing
            .put(
                "stale",
                TokenRecord {
                    user_id: UserId::new(),
                    username: "old".into(),
                    expires_at: chrono::Utc::now().timestamp() - 60,
                },
            )
            .await
            .unwrap();
        token_backing
            .put(
                "live",
                TokenRecord {
                    user_id: UserId::new(),
                    username: "fresh".into(),
                    expires_at: chrono::Utc::now().timestamp() + 3600,
                },
            )
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_token_cleanup(
            tx,
            Duration::from_millis(10),
            shutdown_rx,
        ));

        // give the sweep a few intervals to run
        let mut purged = false;
        for _ in 0..100 {
            if token_backing.get("stale").await.unwrap().is_none() {
                purged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(purged, "expired token survived the sweep");
        assert!(token_backing.get("live").await.unwrap().is_some());

        // stopping is cooperative and terminates the task
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cleanup task did not stop")
            .unwrap();
    }
}
