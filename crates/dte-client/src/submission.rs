//! Lifecycle of a submitted document

use chrono::{DateTime, Utc};
use dte_core::Rut;
use tracing::info;

use crate::status::{RemoteStatus, StatusKind, SubmissionCode};

/// Where a document is in the submission pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionState {
    Draft,
    Stamped,
    Signed,
    Submitted,
    Accepted,
    Rejected,
    PartiallyAccepted,
}

impl SubmissionState {
    pub fn can_transition_to(&self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Draft, Stamped)
                | (Stamped, Signed)
                | (Signed, Submitted)
                | (Submitted, Submitted)
                | (Submitted, Accepted)
                | (Submitted, Rejected)
                | (Submitted, PartiallyAccepted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Accepted | SubmissionState::Rejected | SubmissionState::PartiallyAccepted
        )
    }
}

/// A document accepted for upload, tracked until the authority decides
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub track_id: u64,
    pub taxpayer_id: Rut,
    pub uploaded_at: DateTime<Utc>,
    pub last_status: Option<RemoteStatus>,
    pub state: SubmissionState,
}

impl SubmissionRecord {
    pub fn new(track_id: u64, taxpayer_id: Rut, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            track_id,
            taxpayer_id,
            uploaded_at,
            last_status: None,
            state: SubmissionState::Submitted,
        }
    }

    /// Record a polled status and advance the state if it is final
    ///
    /// Service errors and unknown codes say nothing about the submission
    /// and leave the state alone.
    pub fn apply_status(&mut self, status: RemoteStatus) -> SubmissionState {
        let next = match &status.kind {
            StatusKind::Submission(code) => state_for(code, &status),
            _ => None,
        };

        if let Some(next) = next {
            if self.state.can_transition_to(next) && next != self.state {
                info!(
                    track_id = self.track_id,
                    from = ?self.state,
                    to = ?next,
                    code = %status.code,
                    "submission state changed"
                );
                self.state = next;
            }
        }
        self.last_status = Some(status);
        self.state
    }
}

fn state_for(code: &SubmissionCode, status: &RemoteStatus) -> Option<SubmissionState> {
    match code {
        SubmissionCode::Service(_) | SubmissionCode::Unknown(_) => None,
        code if !code.is_terminal() => Some(SubmissionState::Submitted),
        code if code.is_error() => Some(SubmissionState::Rejected),
        SubmissionCode::Processed => {
            let totals = status.totals();
            Some(match (totals.rejected > 0, totals.accepted > 0) {
                (true, true) => SubmissionState::PartiallyAccepted,
                (true, false) => SubmissionState::Rejected,
                (false, _) => SubmissionState::Accepted,
            })
        }
        _ => Some(SubmissionState::Accepted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DocumentCounts;

    fn record() -> SubmissionRecord {
        SubmissionRecord::new(4321, "76192083-9".parse().unwrap(), Utc::now())
    }

    fn status(code: &str, counts: Option<(u32, u32, u32, u32)>) -> RemoteStatus {
        let mut status = RemoteStatus::new(StatusKind::Submission(SubmissionCode::from_code(code, None)));
        if let Some((reported, accepted, rejected, flagged)) = counts {
            status.counts.push(DocumentCounts {
                document_type: Some(33),
                reported,
                accepted,
                rejected,
                flagged,
            });
        }
        status
    }

    #[test]
    fn test_pipeline_transitions() {
        use SubmissionState::*;
        assert!(Draft.can_transition_to(Stamped));
        assert!(Stamped.can_transition_to(Signed));
        assert!(Signed.can_transition_to(Submitted));
        assert!(!Draft.can_transition_to(Signed));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(Accepted.is_terminal());
        assert!(!Submitted.is_terminal());
    }

    #[test]
    fn test_in_progress_keeps_submitted() {
        let mut record = record();
        assert_eq!(record.apply_status(status("REC", None)), SubmissionState::Submitted);
        assert_eq!(record.apply_status(status("SOK", None)), SubmissionState::Submitted);
        assert_eq!(record.last_status.as_ref().map(|s| s.code.as_str()), Some("SOK"));
    }

    #[test]
    fn test_processed_outcomes() {
        let mut accepted = record();
        assert_eq!(accepted.apply_status(status("EPR", Some((2, 2, 0, 0)))), SubmissionState::Accepted);

        let mut partial = record();
        assert_eq!(
            partial.apply_status(status("EPR", Some((10, 8, 1, 1)))),
            SubmissionState::PartiallyAccepted
        );

        let mut rejected = record();
        assert_eq!(rejected.apply_status(status("EPR", Some((1, 0, 1, 0)))), SubmissionState::Rejected);
    }

    #[test]
    fn test_rejection_codes() {
        let mut record = record();
        assert_eq!(record.apply_status(status("RCT", None)), SubmissionState::Rejected);
        // terminal states do not move again
        assert_eq!(record.apply_status(status("EPR", Some((1, 1, 0, 0)))), SubmissionState::Rejected);
    }

    #[test]
    fn test_service_error_leaves_state() {
        let mut record = record();
        assert_eq!(record.apply_status(status("-11", None)), SubmissionState::Submitted);
        assert_eq!(record.apply_status(status("XYZ", None)), SubmissionState::Submitted);
        assert!(record.last_status.unwrap().is_error);
    }
}
