//! Session change events and the pure settlement decision.
//!
//! The store emits a [`SessionEvent`] for every write; the lifecycle manager
//! in the infra crate calls [`decide`] and acts on the result. Everything in
//! here is deterministic and side-effect free.

use chrono::{DateTime, Utc};

use bilee_core::{DomainError, DomainResult};
use bilee_events::Event;

use crate::session::{BillingSession, PaymentStatus, SessionPatch, SessionStatus};

/// A change observed on the sessions collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was written with no known prior state (creation, or a
    /// redelivered snapshot).
    Observed {
        session: BillingSession,
        is_new: bool,
        occurred_at: DateTime<Utc>,
    },
    /// A session moved from `before` to `after`.
    Mutated {
        before: BillingSession,
        after: BillingSession,
        occurred_at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn created(session: BillingSession) -> Self {
        let occurred_at = session.updated_at;
        Self::Observed {
            session,
            is_new: true,
            occurred_at,
        }
    }

    pub fn mutated(before: BillingSession, after: BillingSession) -> Self {
        let occurred_at = after.updated_at;
        Self::Mutated {
            before,
            after,
            occurred_at,
        }
    }

    /// The state after the change.
    pub fn current(&self) -> &BillingSession {
        match self {
            SessionEvent::Observed { session, .. } => session,
            SessionEvent::Mutated { after, .. } => after,
        }
    }
}

impl Event for SessionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Observed { .. } => "session.observed",
            SessionEvent::Mutated { .. } => "session.mutated",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::Observed { occurred_at, .. } | SessionEvent::Mutated { occurred_at, .. } => {
                *occurred_at
            }
        }
    }
}

/// What the lifecycle manager should do with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleDecision {
    /// Payment is settled and no receipt is linked yet: generate one.
    Settle(BillingSession),
    /// Nothing to do.
    Ignore,
    /// A backward status change was observed. Logged and otherwise ignored.
    Regression { from: SessionStatus, to: SessionStatus },
}

/// Payment was confirmed in this change, by either the flag or the status.
pub fn just_confirmed(before: &BillingSession, after: &BillingSession) -> bool {
    (!before.payment_confirmed && after.payment_confirmed)
        || (before.payment_status != PaymentStatus::Paid && after.payment_status == PaymentStatus::Paid)
}

/// Decide how to react to a session change.
///
/// Settlement is triggered when payment transitions into `PAID`, or when a
/// session is first seen already paid (instant checkout, or a redelivery
/// where we lost the prior state). Sessions that already carry a receipt
/// are ignored.
pub fn decide(event: &SessionEvent) -> LifecycleDecision {
    match event {
        SessionEvent::Observed { session, .. } => {
            if session.is_settled() && !session.receipt_generated {
                LifecycleDecision::Settle(session.clone())
            } else {
                LifecycleDecision::Ignore
            }
        }
        SessionEvent::Mutated { before, after, .. } => {
            if !before.status.can_transition_to(after.status) {
                return LifecycleDecision::Regression {
                    from: before.status,
                    to: after.status,
                };
            }
            if just_confirmed(before, after) && !after.receipt_generated {
                LifecycleDecision::Settle(after.clone())
            } else {
                LifecycleDecision::Ignore
            }
        }
    }
}

/// The patch that closes out a settled session, if it still needs one.
///
/// Returns `None` when the session is already `COMPLETED` (or beyond) or is
/// in a state that cannot legally move to `COMPLETED`.
pub fn completion_patch(session: &BillingSession, now: DateTime<Utc>) -> Option<SessionPatch> {
    if session.status == SessionStatus::Completed
        || !session.status.can_transition_to(SessionStatus::Completed)
    {
        return None;
    }
    Some(
        SessionPatch::at(now)
            .status(SessionStatus::Completed)
            .completed_at(now),
    )
}

/// Patch for a client-side payment confirmation (cash, card, or UPI
/// confirmed in the app).
///
/// Only `ACTIVE` and `PAID` sessions accept a confirmation; an expired or
/// closed session has to be settled through the webhook path.
pub fn confirmation_patch(
    session: &BillingSession,
    payment_method: &str,
    transaction_id: Option<&str>,
    now: DateTime<Utc>,
) -> DomainResult<SessionPatch> {
    if !matches!(session.status, SessionStatus::Active | SessionStatus::Paid) {
        return Err(DomainError::invariant(format!(
            "session {} is {} and cannot accept a payment",
            session.id, session.status
        )));
    }
    if payment_method.trim().is_empty() {
        return Err(DomainError::validation("payment method is required"));
    }

    let mut patch = SessionPatch::at(now)
        .payment_status(PaymentStatus::Paid)
        .payment_confirmed(true)
        .payment_method(payment_method.trim())
        .payment_time(now);
    if let Some(txn) = transaction_id.map(str::trim).filter(|t| !t.is_empty()) {
        patch = patch.transaction_id(txn);
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fixtures::open_session;
    use bilee_core::ReceiptId;

    #[test]
    fn confirmation_marks_session_paid() {
        let session = open_session("s1");
        let now = Utc::now();
        let patch = confirmation_patch(&session, "cash", None, now).unwrap();
        let mut after = session.clone();
        after.apply_patch(&patch).unwrap();
        assert_eq!(after.payment_status, PaymentStatus::Paid);
        assert!(after.payment_confirmed);
        assert_eq!(after.payment_time, Some(now));
        assert!(just_confirmed(&session, &after));
    }

    #[test]
    fn confirmation_rejected_after_expiry() {
        let mut session = open_session("s1");
        session
            .apply_patch(&SessionPatch::at(Utc::now()).status(SessionStatus::Expired))
            .unwrap();
        let err = confirmation_patch(&session, "cash", None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    fn paid(mut session: BillingSession) -> BillingSession {
        session
            .apply_patch(&SessionPatch::at(Utc::now()).payment_status(PaymentStatus::Paid))
            .unwrap();
        session
    }

    #[test]
    fn payment_confirmation_triggers_settlement() {
        let before = open_session("s1");
        let after = paid(before.clone());
        let decision = decide(&SessionEvent::mutated(before, after.clone()));
        assert_eq!(decision, LifecycleDecision::Settle(after));
    }

    #[test]
    fn unrelated_mutation_is_ignored() {
        let before = paid(open_session("s1"));
        let mut after = before.clone();
        after.transaction_id = Some("txn".into());
        assert_eq!(
            decide(&SessionEvent::mutated(before, after)),
            LifecycleDecision::Ignore
        );
    }

    #[test]
    fn session_created_paid_is_settled() {
        let session = paid(open_session("s1"));
        assert!(matches!(
            decide(&SessionEvent::created(session)),
            LifecycleDecision::Settle(_)
        ));
    }

    #[test]
    fn already_receipted_session_is_ignored() {
        let mut session = paid(open_session("s1"));
        session
            .apply_patch(&SessionPatch::at(Utc::now()).receipt(ReceiptId::generate()))
            .unwrap();
        assert_eq!(
            decide(&SessionEvent::created(session)),
            LifecycleDecision::Ignore
        );
    }

    #[test]
    fn backward_status_change_is_reported_as_regression() {
        let mut before = open_session("s1");
        before.status = SessionStatus::Expired;
        let after = open_session("s1");
        assert_eq!(
            decide(&SessionEvent::mutated(before, after)),
            LifecycleDecision::Regression {
                from: SessionStatus::Expired,
                to: SessionStatus::Active,
            }
        );
    }

    #[test]
    fn completion_patch_only_for_open_sessions() {
        let now = Utc::now();
        let session = paid(open_session("s1"));
        let patch = completion_patch(&session, now).unwrap();
        assert_eq!(patch.status, Some(SessionStatus::Completed));
        assert_eq!(patch.completed_at, Some(now));

        let mut done = session.clone();
        done.apply_patch(&patch).unwrap();
        assert!(completion_patch(&done, now).is_none());

        let mut expired = open_session("s2");
        expired.status = SessionStatus::Expired;
        assert!(completion_patch(&expired, now).is_none());
    }

    #[test]
    fn event_type_names_are_stable() {
        let s = open_session("s1");
        assert_eq!(SessionEvent::created(s.clone()).event_type(), "session.observed");
        assert_eq!(SessionEvent::mutated(s.clone(), s).event_type(), "session.mutated");
    }
}
