//! Run-state invariants checked at the end of every run.

use std::collections::HashSet;

use crate::core::types::{ExecutionState, Status};

/// Check invariants of a finished (or in-flight) run:
/// - `iteration <= max_iterations`
/// - step ids are unique
/// - denied actions carry no output; allowed ones were authorized before
///   their output was captured
/// - terminal status and `error_reason` agree
pub fn validate_state(state: &ExecutionState, max_iterations: u32) -> Vec<String> {
    let mut errors = Vec::new();

    if state.iteration > max_iterations {
        errors.push(format!(
            "iteration {} exceeds max_iterations {}",
            state.iteration, max_iterations
        ));
    }

    let mut seen = HashSet::new();
    for record in &state.action_history {
        if !seen.insert(record.step_id.as_str()) {
            errors.push(format!("duplicate step id '{}'", record.step_id));
        }
        if record.was_denied() && record.output.is_some() {
            errors.push(format!("{}: denied action has output", record.step_id));
        }
        if let Some(completed_at) = record.completed_at
            && completed_at < record.safety_decision.decided_at
        {
            errors.push(format!(
                "{}: output captured before authorization",
                record.step_id
            ));
        }
    }

    let executed = state
        .action_history
        .iter()
        .filter(|record| record.output.is_some())
        .count();
    if executed != state.iteration as usize {
        errors.push(format!(
            "iteration {} does not match {} executed actions",
            state.iteration, executed
        ));
    }

    match state.status {
        Status::Error if state.error_reason.is_none() => {
            errors.push("error status without error reason".to_string());
        }
        Status::Completed if state.error_reason.is_some() => {
            errors.push("completed status with error reason".to_string());
        }
        _ => {}
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        Action, ActionKind, ActionOutput, ActionRecord, ErrorReason, ReasonCode, SafetyDecision,
    };
    use chrono::{Duration, Utc};

    fn executed(step: &str) -> ActionRecord {
        let decision = SafetyDecision::allow("ok");
        let completed_at = decision.decided_at + Duration::milliseconds(1);
        ActionRecord {
            step_id: step.to_string(),
            action: Action::new(ActionKind::Analyze),
            safety_decision: decision,
            output: Some(ActionOutput::Success {
                content: "done".to_string(),
            }),
            completed_at: Some(completed_at),
        }
    }

    #[test]
    fn consistent_state_has_no_violations() {
        let mut state = ExecutionState::default();
        state.action_history.push(executed("step-1"));
        state.iteration = 1;
        state.status = Status::Completed;
        assert!(validate_state(&state, 3).is_empty());
    }

    #[test]
    fn reports_budget_overrun_and_duplicates() {
        let mut state = ExecutionState::default();
        state.action_history.push(executed("step-1"));
        state.action_history.push(executed("step-1"));
        state.iteration = 2;
        let errors = validate_state(&state, 1);
        assert!(errors.iter().any(|e| e.contains("exceeds max_iterations")));
        assert!(errors.iter().any(|e| e.contains("duplicate step id")));
    }

    #[test]
    fn reports_output_before_authorization() {
        let mut record = executed("step-1");
        record.completed_at = Some(Utc::now() - Duration::seconds(10));
        let mut state = ExecutionState::default();
        state.action_history.push(record);
        state.iteration = 1;
        let errors = validate_state(&state, 3);
        assert!(errors.iter().any(|e| e.contains("before authorization")));
    }

    #[test]
    fn reports_denied_action_with_output() {
        let mut record = executed("step-1");
        record.safety_decision = SafetyDecision::deny(ReasonCode::Denylisted, "no");
        let mut state = ExecutionState::default();
        state.action_history.push(record);
        state.iteration = 1;
        let errors = validate_state(&state, 3);
        assert!(errors.iter().any(|e| e.contains("denied action has output")));
    }

    #[test]
    fn error_status_requires_reason() {
        let mut state = ExecutionState {
            status: Status::Error,
            ..ExecutionState::default()
        };
        assert!(!validate_state(&state, 3).is_empty());
        state.error_reason = Some(ErrorReason::Cancelled);
        assert!(validate_state(&state, 3).is_empty());
    }
}
