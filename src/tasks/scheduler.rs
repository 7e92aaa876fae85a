use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::services::{rounds, ExamError};

/// Watches the active round and finalizes it once the deadline plus the
/// submission grace window has passed. Finalization goes through the same
/// guarded pipeline as a manual end-round call, so racing with one is safe.
pub(crate) async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let period =
        Duration::from_secs(state.settings().exam().deadline_check_interval_seconds.max(1));
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = check_deadline(&state).await {
                    tracing::error!(error = %err, "Deadline check failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("Deadline watcher shutting down");
                    break;
                }
            }
        }
    }
}

/// The watcher waits out the grace window too, so a manual submission a few
/// seconds past the deadline still lands before the round is finalized.
async fn check_deadline(state: &AppState) -> Result<(), ExamError> {
    let Some(round) = state.store().active_round().await? else {
        return Ok(());
    };
    let Some(deadline) = round.deadline else {
        return Ok(());
    };

    let grace = time::Duration::seconds(state.settings().exam().grace_seconds);
    if primitive_now_utc() <= deadline + grace {
        return Ok(());
    }

    let summary = rounds::end_round(state).await?;
    if !summary.already_completed {
        tracing::info!(
            round_no = summary.round_no,
            auto_submitted = summary.auto_submitted_count,
            scored = summary.scored_count,
            "Round finalized by deadline watcher"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::RoundStatus;
    use crate::test_support;

    #[tokio::test]
    async fn watcher_leaves_rounds_alone_until_grace_expires() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_round(&ctx.state, 1, 3, 10).await;

        let now = primitive_now_utc();
        // Deadline just passed; the 5 second grace window is still open.
        let started = ctx
            .state
            .store()
            .try_start_round(1, now - time::Duration::seconds(600), now - time::Duration::seconds(2))
            .await
            .unwrap();
        assert!(started);

        check_deadline(&ctx.state).await.unwrap();
        let round = ctx.state.store().get_round(1).await.unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Running);
    }

    #[tokio::test]
    async fn watcher_finalizes_once_deadline_and_grace_have_passed() {
        let ctx = test_support::setup_test_context().await;
        test_support::seed_round(&ctx.state, 1, 3, 10).await;

        let now = primitive_now_utc();
        let started = ctx
            .state
            .store()
            .try_start_round(
                1,
                now - time::Duration::seconds(600),
                now - time::Duration::seconds(30),
            )
            .await
            .unwrap();
        assert!(started);

        check_deadline(&ctx.state).await.unwrap();
        let round = ctx.state.store().get_round(1).await.unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Completed);
        assert!(round.shortlisted);

        // Idempotent on the next tick.
        check_deadline(&ctx.state).await.unwrap();
    }

    #[tokio::test]
    async fn watcher_is_a_no_op_with_no_active_round() {
        let ctx = test_support::setup_test_context().await;
        check_deadline(&ctx.state).await.unwrap();
    }
}
