//! Order state machine — transition validation for `InFlightOrder::state`.
//!
//! A connection is one value owned by one adapter thread and could afford
//! a typestate encoding, but an in-flight order lives inside the
//! tracker's `HashMap<String, InFlightOrder>`, so the state lives in a
//! field and transitions are validated by table lookup rather than by the
//! type system — the terminal-sink guarantee is checked at the point
//! `OrderTracker` applies an update.

use crate::core::types::OrderState;

/// Returns `true` if moving an order from `from` to `to` is a legal
/// transition. Terminal states accept no outgoing edge, including
/// self-loops, per §3 invariant (d).
pub fn is_valid_transition(from: OrderState, to: OrderState) -> bool {
    use OrderState::*;

    if from.is_terminal() {
        return false;
    }
    if from == to {
        // Re-delivery of the same status (e.g. a duplicate `new` from a
        // replayed WS frame) is tolerated as a no-op, not an error.
        return true;
    }

    match (from, to) {
        (PendingCreate, PendingSubmit) => true,
        (PendingCreate, Open) => true,
        (PendingCreate, Failed) => true,
        (PendingCreate, Canceled) => true,

        (PendingSubmit, Open) => true,
        (PendingSubmit, PartiallyFilled) => true,
        (PendingSubmit, Filled) => true,
        (PendingSubmit, Failed) => true,
        (PendingSubmit, Canceled) => true,
        (PendingSubmit, Expired) => true,

        (Open, PartiallyFilled) => true,
        (Open, Filled) => true,
        (Open, PendingCancel) => true,
        (Open, Canceled) => true,
        (Open, Expired) => true,
        (Open, Failed) => true,

        (PartiallyFilled, Filled) => true,
        (PartiallyFilled, PendingCancel) => true,
        (PartiallyFilled, Canceled) => true,
        (PartiallyFilled, Expired) => true,

        (PendingCancel, Canceled) => true,
        // A cancel request can lose a race against a fill, or simply fail
        // venue-side (order already gone) and resolve back to terminal.
        (PendingCancel, Filled) => true,
        (PendingCancel, Failed) => true,
        (PendingCancel, PartiallyFilled) => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderState::*;

    #[test]
    fn happy_path_resting_then_filled() {
        assert!(is_valid_transition(PendingCreate, PendingSubmit));
        assert!(is_valid_transition(PendingSubmit, Open));
        assert!(is_valid_transition(Open, PartiallyFilled));
        assert!(is_valid_transition(PartiallyFilled, Filled));
    }

    #[test]
    fn terminal_states_reject_every_outgoing_edge() {
        for terminal in [Filled, Canceled, Failed, Expired] {
            for target in [
                PendingCreate,
                PendingSubmit,
                Open,
                PartiallyFilled,
                Filled,
                PendingCancel,
                Canceled,
                Failed,
                Expired,
            ] {
                assert!(
                    !is_valid_transition(terminal, target),
                    "{terminal:?} -> {target:?} should be rejected"
                );
            }
        }
    }

    #[test]
    fn same_state_redelivery_is_a_tolerated_no_op() {
        assert!(is_valid_transition(Open, Open));
    }

    #[test]
    fn skipping_straight_to_terminal_from_pending_create_is_allowed() {
        assert!(is_valid_transition(PendingCreate, Failed));
        assert!(is_valid_transition(PendingCreate, Canceled));
    }

    #[test]
    fn cancel_request_can_lose_race_against_fill() {
        assert!(is_valid_transition(PendingCancel, Filled));
        assert!(is_valid_transition(PendingCancel, PartiallyFilled));
    }
}
