//! Classification of step failures

use crate::errors::ExecError;
use crate::models::pipeline::BenignSignature;

/// How the controller should treat a failed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step's target was absent; continue with the next step
    BenignAbsence { reason: String },

    /// Real failure; drives the deployment to FAILED once retries run out
    Failure { reason: String },
}

/// Classify a step failure against the step's benign signature, if any.
///
/// Only a completed process can be benign: spawn failures, timeouts and
/// signal terminations always count as failures.
pub fn classify(error: &ExecError, signature: Option<&BenignSignature>) -> StepOutcome {
    let reason = error.to_string();

    let (Some(signature), ExecError::NonZeroExit { code, stderr_tail, .. }) = (signature, error)
    else {
        return StepOutcome::Failure { reason };
    };

    if !signature.exit_codes.contains(code) {
        return StepOutcome::Failure { reason };
    }

    let matched = stderr_tail.iter().find_map(|line| {
        let lowered = line.to_lowercase();
        signature
            .stderr_patterns
            .iter()
            .filter(|p| !p.is_empty())
            .find(|p| lowered.contains(&p.to_lowercase()))
            .map(|_| line.clone())
    });

    match matched {
        Some(line) => StepOutcome::BenignAbsence { reason: line },
        None => StepOutcome::Failure { reason },
    }
}
