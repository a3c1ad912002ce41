//! The pure transition table of the channel state machine.
//!
//! Given a status and an event, [`next_status`] is a pure function: the same
//! inputs always produce the same [`Transition`]. Mutation of the record
//! (counters, voucher histories, messages) happens in the store front-end
//! after the transition is accepted.

use conduit_primitives::{ChannelEvent, Status};

/// Outcome of offering an event to a channel in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The event applies; move to the contained status (which may equal the
    /// current one).
    To(Status),
    /// The event does not apply at this status; drop it as a no-op.
    ///
    /// Late completion, data and cancel events straggling in after a
    /// terminal status land here: races between the two peers make them
    /// unavoidable and harmless.
    Ignore,
    /// The event is rejected: it would re-enter a terminal channel.
    Invalid,
}

/// Computes the transition for `event` arriving at `status`.
pub fn next_status(status: Status, event: &ChannelEvent) -> Transition {
    use ChannelEvent as E;
    use Status as S;
    use Transition::{Ignore, Invalid, To};

    if status.is_terminated() {
        return match event {
            // Expected stragglers of a terminated transfer.
            E::DataQueued { .. }
            | E::DataSent { .. }
            | E::DataReceived { .. }
            | E::ResponderCompletes
            | E::Complete
            | E::Cancel
            | E::Error { .. }
            | E::CleanupComplete
            | E::NewVoucherResult(_) => Ignore,
            // Anything that would start new work on a dead channel.
            _ => Invalid,
        };
    }

    match event {
        E::Open | E::Accept => match status {
            S::Requested => To(S::Ongoing),
            _ => Ignore,
        },

        // Byte counters keep accruing while paused; the transfer is
        // suspended, not forgotten.
        E::DataQueued { .. } | E::DataSent { .. } | E::DataReceived { .. } => match status {
            S::Ongoing | S::InitiatorPaused | S::ResponderPaused | S::BothPaused => To(status),
            _ => Ignore,
        },

        E::PauseInitiator => match status {
            S::Ongoing => To(S::InitiatorPaused),
            S::ResponderPaused => To(S::BothPaused),
            _ => Ignore,
        },
        E::ResumeInitiator => match status {
            S::InitiatorPaused => To(S::Ongoing),
            S::BothPaused => To(S::ResponderPaused),
            _ => Ignore,
        },
        E::PauseResponder => match status {
            S::Ongoing => To(S::ResponderPaused),
            S::InitiatorPaused => To(S::BothPaused),
            _ => Ignore,
        },
        E::ResumeResponder => match status {
            S::ResponderPaused => To(S::Ongoing),
            S::BothPaused => To(S::InitiatorPaused),
            _ => Ignore,
        },

        E::NewVoucher(_) | E::NewVoucherResult(_) => To(status),

        E::FinishTransfer => match status {
            S::Ongoing | S::InitiatorPaused | S::ResponderPaused | S::BothPaused => {
                To(S::TransferFinished)
            }
            // The responder already declared completion; finishing our side
            // moves straight into completion.
            S::ResponderCompleted => To(S::Completing),
            _ => Ignore,
        },

        E::ResponderCompletes => match status {
            S::Requested | S::Ongoing | S::InitiatorPaused => To(S::ResponderCompleted),
            S::TransferFinished => To(S::Completing),
            _ => Ignore,
        },

        E::BeginFinalizing => match status {
            S::TransferFinished | S::ResponderCompleted => To(S::Finalizing),
            _ => Ignore,
        },

        E::Complete => match status {
            S::Finalizing | S::Completing => To(S::Completed),
            _ => Ignore,
        },

        E::Error { .. } => To(S::Failing),

        E::Cancel => match status {
            // Already on the way out.
            S::Cancelling => Ignore,
            _ => To(S::Cancelling),
        },

        E::CleanupComplete => match status.cleanup_terminal() {
            Some(terminal) => To(terminal),
            None => Ignore,
        },

        E::Restart => To(status),
    }
}
