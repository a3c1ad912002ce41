//! Channel status and classifiers.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Current status of a data-transfer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The channel has been created and the opening request sent; the
    /// responder has not yet accepted.
    Requested,
    /// Data is flowing (or may flow) in both directions.
    Ongoing,
    /// The local side has finished sending all data.
    TransferFinished,
    /// The responder acknowledged completion while we still have cleanup
    /// of our own outstanding.
    ResponderCompleted,
    /// Both sides are done transferring; final bookkeeping in progress.
    Finalizing,
    /// Completion in progress.
    Completing,
    /// The transfer completed successfully.
    Completed,
    /// Failure in progress.
    Failing,
    /// The transfer failed.
    Failed,
    /// Cancellation in progress.
    Cancelling,
    /// The transfer was cancelled.
    Cancelled,
    /// The initiator paused the channel.
    InitiatorPaused,
    /// The responder paused the channel.
    ResponderPaused,
    /// Both sides paused the channel.
    BothPaused,
    /// Sentinel returned by status queries for unknown channels.
    ChannelNotFoundError,
}

impl Status {
    /// Returns true if the channel has reached a terminal status.
    ///
    /// Terminal channels are never re-entered.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled | Status::Failed)
    }

    /// Returns true if the channel is winding down towards a terminal
    /// status.
    pub fn is_cleaning_up(&self) -> bool {
        matches!(
            self,
            Status::Finalizing | Status::Completing | Status::Failing | Status::Cancelling
        )
    }

    /// Returns true if either side has the channel paused.
    pub fn is_paused(&self) -> bool {
        matches!(
            self,
            Status::InitiatorPaused | Status::ResponderPaused | Status::BothPaused
        )
    }

    /// The terminal status a cleaning-up channel resolves to.
    ///
    /// Returns `None` for statuses outside the cleaning-up set.
    pub fn cleanup_terminal(&self) -> Option<Status> {
        match self {
            Status::Finalizing | Status::Completing => Some(Status::Completed),
            Status::Failing => Some(Status::Failed),
            Status::Cancelling => Some(Status::Cancelled),
            _ => None,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Requested => "Requested",
            Status::Ongoing => "Ongoing",
            Status::TransferFinished => "TransferFinished",
            Status::ResponderCompleted => "ResponderCompleted",
            Status::Finalizing => "Finalizing",
            Status::Completing => "Completing",
            Status::Completed => "Completed",
            Status::Failing => "Failing",
            Status::Failed => "Failed",
            Status::Cancelling => "Cancelling",
            Status::Cancelled => "Cancelled",
            Status::InitiatorPaused => "InitiatorPaused",
            Status::ResponderPaused => "ResponderPaused",
            Status::BothPaused => "BothPaused",
            Status::ChannelNotFoundError => "ChannelNotFoundError",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifiers_are_disjoint() {
        let all = [
            Status::Requested,
            Status::Ongoing,
            Status::TransferFinished,
            Status::ResponderCompleted,
            Status::Finalizing,
            Status::Completing,
            Status::Completed,
            Status::Failing,
            Status::Failed,
            Status::Cancelling,
            Status::Cancelled,
            Status::InitiatorPaused,
            Status::ResponderPaused,
            Status::BothPaused,
        ];
        for status in all {
            assert!(
                !(status.is_terminated() && status.is_cleaning_up()),
                "{status} is both terminal and cleaning up"
            );
            assert!(
                !(status.is_terminated() && status.is_paused()),
                "{status} is both terminal and paused"
            );
        }
    }

    #[test]
    fn cleanup_terminals() {
        assert_eq!(Status::Failing.cleanup_terminal(), Some(Status::Failed));
        assert_eq!(Status::Cancelling.cleanup_terminal(), Some(Status::Cancelled));
        assert_eq!(Status::Completing.cleanup_terminal(), Some(Status::Completed));
        assert_eq!(Status::Finalizing.cleanup_terminal(), Some(Status::Completed));
        assert_eq!(Status::Ongoing.cleanup_terminal(), None);
    }
}
