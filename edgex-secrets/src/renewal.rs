//! Background renewal of the session and identity tokens.
//!
//! Two independent tasks, each sleeping for its current delay, renewing, and
//! asking the manager for the next delay. They only hold a weak reference to
//! the manager and exit when it is gone or when the scheduler is stopped.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::manager::{ManagerInner, TokenLifecycleManager};

#[derive(Debug, Clone, Copy)]
enum RenewalKind {
    Session,
    Identity,
}

/// Handle to the two renewal tasks. Dropping it stops them.
pub(crate) struct RenewalScheduler {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RenewalScheduler {
    pub(crate) fn start(
        manager: Weak<ManagerInner>,
        session_delay: Duration,
        identity_delay: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(renewal_task(
                RenewalKind::Session,
                manager.clone(),
                session_delay,
                shutdown_tx.subscribe(),
            )),
            tokio::spawn(renewal_task(
                RenewalKind::Identity,
                manager,
                identity_delay,
                shutdown_tx.subscribe(),
            )),
        ];

        tracing::debug!(
            "Renewals scheduled: session in {:?}, identity in {:?}",
            session_delay,
            identity_delay
        );

        Self { shutdown_tx, tasks }
    }

    pub(crate) fn stop(self) {
        drop(self);
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn renewal_task(
    kind: RenewalKind,
    manager: Weak<ManagerInner>,
    mut delay: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }

        let Some(inner) = manager.upgrade() else {
            break;
        };
        let owner = TokenLifecycleManager::from_inner(inner);

        delay = match kind {
            RenewalKind::Session => owner.renew_session().await,
            RenewalKind::Identity => owner.renew_identity().await,
        };
        tracing::debug!("Next {:?} renewal in {:?}", kind, delay);
    }

    tracing::trace!("{:?} renewal task stopped", kind);
}
