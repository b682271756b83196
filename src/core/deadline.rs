//! Optional deadlines for session tasks

use tokio::time::{Instant, sleep_until};

/// Resolve at `deadline`, or never when there is none
pub(crate) async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
