//! Execution state machine: the transition table and the continue/stop rule.

use anyhow::{Result, bail};

use crate::core::types::{ErrorReason, Status};

/// Every legal `(from, to)` edge. Anything else is a bug in the engine.
pub const TRANSITIONS: &[(Status, Status)] = &[
    (Status::Pending, Status::Planning),
    (Status::Planning, Status::Executing),
    (Status::Planning, Status::Error),
    (Status::Executing, Status::Reflecting),
    (Status::Reflecting, Status::Executing),
    (Status::Reflecting, Status::Completed),
    (Status::Reflecting, Status::Error),
];

pub fn is_valid_transition(from: Status, to: Status) -> bool {
    TRANSITIONS.contains(&(from, to))
}

/// Validate and apply a transition.
pub fn transition(status: &mut Status, to: Status) -> Result<()> {
    if !is_valid_transition(*status, to) {
        bail!("invalid status transition {:?} -> {:?}", *status, to);
    }
    *status = to;
    Ok(())
}

/// What the reflection step asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionVerdict {
    Continue,
    Stop,
}

/// Facts the loop decision is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopInputs {
    pub iteration: u32,
    pub stalled: u32,
    pub max_iterations: u32,
    pub domain_complete: bool,
    pub last_action_fatal: bool,
    pub verdict: ReflectionVerdict,
}

/// Outcome of the Reflecting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Continue,
    Complete,
    Fail(ErrorReason),
}

/// Continue only while under budget, not complete, and the last action was not
/// fatal; a stop is a success only when the domain reports completion.
pub fn decide(inputs: LoopInputs) -> LoopDecision {
    if inputs.domain_complete {
        return LoopDecision::Complete;
    }
    if inputs.last_action_fatal {
        return LoopDecision::Fail(ErrorReason::FatalAction);
    }
    if inputs.iteration >= inputs.max_iterations || inputs.stalled >= inputs.max_iterations {
        return LoopDecision::Fail(ErrorReason::IterationBudgetExhausted);
    }
    match inputs.verdict {
        ReflectionVerdict::Continue => LoopDecision::Continue,
        ReflectionVerdict::Stop => LoopDecision::Fail(ErrorReason::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> LoopInputs {
        LoopInputs {
            iteration: 1,
            stalled: 0,
            max_iterations: 3,
            domain_complete: false,
            last_action_fatal: false,
            verdict: ReflectionVerdict::Continue,
        }
    }

    #[test]
    fn only_table_edges_are_accepted() {
        let mut status = Status::Pending;
        transition(&mut status, Status::Planning).expect("pending -> planning");
        transition(&mut status, Status::Executing).expect("planning -> executing");
        assert!(transition(&mut status, Status::Completed).is_err());
        assert_eq!(status, Status::Executing);
        transition(&mut status, Status::Reflecting).expect("executing -> reflecting");
        transition(&mut status, Status::Completed).expect("reflecting -> completed");
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for (from, _) in TRANSITIONS {
            assert!(!from.is_terminal());
        }
    }

    #[test]
    fn executing_never_skips_reflecting() {
        assert!(!is_valid_transition(Status::Executing, Status::Executing));
        assert!(!is_valid_transition(Status::Executing, Status::Completed));
        assert!(!is_valid_transition(Status::Pending, Status::Executing));
    }

    #[test]
    fn continues_while_under_budget() {
        assert_eq!(decide(inputs()), LoopDecision::Continue);
    }

    #[test]
    fn domain_completion_wins() {
        let decision = decide(LoopInputs {
            domain_complete: true,
            iteration: 3,
            verdict: ReflectionVerdict::Stop,
            ..inputs()
        });
        assert_eq!(decision, LoopDecision::Complete);
    }

    #[test]
    fn budget_exhaustion_is_distinct_from_other_failures() {
        let decision = decide(LoopInputs {
            iteration: 3,
            ..inputs()
        });
        assert_eq!(
            decision,
            LoopDecision::Fail(ErrorReason::IterationBudgetExhausted)
        );
        let stalled = decide(LoopInputs {
            iteration: 0,
            stalled: 3,
            ..inputs()
        });
        assert_eq!(
            stalled,
            LoopDecision::Fail(ErrorReason::IterationBudgetExhausted)
        );
    }

    #[test]
    fn fatal_action_stops_the_loop() {
        let decision = decide(LoopInputs {
            last_action_fatal: true,
            ..inputs()
        });
        assert_eq!(decision, LoopDecision::Fail(ErrorReason::FatalAction));
    }

    #[test]
    fn stop_without_completion_is_abandoned() {
        let decision = decide(LoopInputs {
            verdict: ReflectionVerdict::Stop,
            ..inputs()
        });
        assert_eq!(decision, LoopDecision::Fail(ErrorReason::Abandoned));
    }
}
