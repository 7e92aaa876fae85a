use tokio::sync::mpsc;

use crate::db::types::SubmissionKind;

/// Best-effort audit side channel. Events are pushed with `try_send` into a
/// bounded queue consumed by a detached task; a full queue drops the event.
/// Nothing on this path may ever affect the caller's result.
#[derive(Debug, Clone)]
pub(crate) enum AuditEvent {
    SessionStarted { candidate: String, round_no: i32, resumed: bool },
    Submitted { candidate: String, round_no: i32, kind: SubmissionKind, duplicate: bool },
    ViolationReported { candidate: String, round_no: i32, violations: i32, disqualified: bool },
    RoundStarted { round_no: i32 },
    RoundCompleted { round_no: i32, auto_submitted: u64, scored: i64, qualified: i64 },
    Shortlisted { round_no: i32, top_n: i32, qualified: i64 },
}

#[derive(Clone)]
pub(crate) struct AuditHandle {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditHandle {
    pub(crate) fn spawn(queue_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                log_event(&event);
            }
        });
        Self { tx }
    }

    pub(crate) fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.tx.try_send(event) {
            tracing::debug!(error = %err, "Audit event dropped");
        }
    }
}

fn log_event(event: &AuditEvent) {
    match event {
        AuditEvent::SessionStarted { candidate, round_no, resumed } => {
            tracing::info!(target: "audit", candidate, round_no, resumed, "session started");
        }
        AuditEvent::Submitted { candidate, round_no, kind, duplicate } => {
            tracing::info!(
                target: "audit",
                candidate,
                round_no,
                kind = kind.as_str(),
                duplicate,
                "exam submitted"
            );
        }
        AuditEvent::ViolationReported { candidate, round_no, violations, disqualified } => {
            tracing::info!(
                target: "audit",
                candidate,
                round_no,
                violations,
                disqualified,
                "violation reported"
            );
        }
        AuditEvent::RoundStarted { round_no } => {
            tracing::info!(target: "audit", round_no, "round started");
        }
        AuditEvent::RoundCompleted { round_no, auto_submitted, scored, qualified } => {
            tracing::info!(
                target: "audit",
                round_no,
                auto_submitted,
                scored,
                qualified,
                "round completed"
            );
        }
        AuditEvent::Shortlisted { round_no, top_n, qualified } => {
            tracing::info!(target: "audit", round_no, top_n, qualified, "shortlist applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_never_fails_the_caller() {
        let handle = AuditHandle::spawn(1);
        for round_no in 0..256 {
            handle.emit(AuditEvent::RoundStarted { round_no });
        }
    }
}
