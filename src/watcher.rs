//! Follows the ledger events of one channel and feeds them to its session.
//!
//! The session decides what an event means (adopt, refute, close). The
//! watcher only closes the session when the channel concluded without a
//! local close, and exits once the session is closed. A failed close is
//! retried until the funds are withdrawn.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    error::Error,
    ledger::{Adjudicator, LedgerError},
    session::{SessionHandle, WatchAction},
};

const CLOSE_RETRY_INITIAL: Duration = Duration::from_millis(100);
const CLOSE_RETRY_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum WatchError {
    #[error("subscription failed: {0}")]
    Subscription(#[from] LedgerError),
    #[error("closing concluded channel failed: {0}")]
    Close(#[from] Error),
}

pub(crate) async fn watch(
    handle: SessionHandle,
    adjudicator: Arc<dyn Adjudicator>,
    close_timeout: Duration,
) {
    if let Err(e) = run(&handle, adjudicator.as_ref(), close_timeout).await {
        warn!(error = %e, "watcher stopped");
        handle.release_degraded();
    }
    debug!("watcher exited");
    handle.done().watcher_exited();
}

async fn run(
    handle: &SessionHandle,
    adjudicator: &dyn Adjudicator,
    close_timeout: Duration,
) -> Result<(), WatchError> {
    let mut sub = adjudicator.subscribe(handle.channel_id()).await?;
    loop {
        let event = tokio::select! {
            event = sub.next() => event,
            _ = handle.closed() => return Ok(()),
        };
        let event = match event {
            Some(event) => event?,
            None => return Err(LedgerError::SubscriptionClosed.into()),
        };
        debug!(version = event.version(), "ledger event");

        match handle.forward_event(event).await {
            Some(WatchAction::Continue) => {}
            Some(WatchAction::Done) | None => return Ok(()),
            Some(WatchAction::CloseNeeded) => {
                info!("channel concluded, closing");
                close_concluded(handle, close_timeout).await?;
                return Ok(());
            }
        }
    }
}

/// Close the session, retrying with exponential backoff while the ledger
/// keeps failing. Gives up only when the session itself cannot close.
async fn close_concluded(handle: &SessionHandle, close_timeout: Duration) -> Result<(), Error> {
    let mut backoff = CLOSE_RETRY_INITIAL;
    loop {
        match handle.close_by(close_timeout).await {
            Ok(()) => return Ok(()),
            Err(e @ (Error::SessionTerminated(_) | Error::InvalidPhase { .. })) => return Err(e),
            Err(e) => {
                warn!(error = %e, retry_in = ?backoff, "closing concluded channel failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(CLOSE_RETRY_MAX);
            }
        }
    }
}
