//! Brace Coordinator
//!
//! When a command string contains brace expressions that suspend, the
//! coordinator tracks every evaluation (a remaining count plus an array
//! of per-occurrence records), collects results as child tokens settle,
//! and fires a resume callback that re-drives dispatch of the original
//! command once all of them have completed. Completion order among the
//! children is unconstrained; the textual substitution is positional and
//! therefore deterministic.

use std::sync::{Arc, Mutex};

use crate::engine::EngineInner;
use crate::interpreter::braces::{escape_for_substitution, BraceLocation};
use crate::interpreter::errors::{EngineError, EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::state::ExecutionState;
use crate::interpreter::substitution::SubstitutionContext;
use crate::interpreter::tokens::{self, RequestOptions};
use crate::parser::types::SourcePosition;

/// Per-occurrence evaluation state.
pub struct BraceEvaluation {
    pub location: BraceLocation,
    pub is_async: bool,
    pub token_id: Option<String>,
    /// The raw result text once the evaluation completed successfully.
    pub result: Option<String>,
    pub completed: bool,
    pub failed: bool,
    pub error_text: Option<String>,
    /// Absolute position of the expression content in the source.
    pub position: SourcePosition,
    /// The child scope the expression ran in; read back for the result
    /// when an asynchronous evaluation settles.
    pub child_state: Option<ExecutionState>,
}

pub enum CoordinatorOutcome {
    /// All evaluations succeeded: the fully substituted command string.
    Success(String),
    /// At least one failed: the first failure message.
    Failure(String),
}

/// Fired once every evaluation has settled; re-drives dispatch of the
/// original command (or records the failure).
pub type CoordinatorResume =
    Box<dyn FnOnce(&Arc<EngineInner>, CoordinatorOutcome) -> EngineResult<Flow> + Send>;

pub struct BraceCoordinator {
    pub evaluations: Vec<BraceEvaluation>,
    pub completed_count: usize,
    pub total: usize,
    pub has_failure: bool,
    pub first_failure: Option<String>,
    /// The command string with brace sites still in place.
    pub original: String,
    pub ctx: SubstitutionContext,
    pub resume: Option<CoordinatorResume>,
}

/// Substitute completed evaluation results into the original string, end
/// to start so earlier byte offsets stay valid.
pub fn splice_completed(original: &str, evaluations: &[BraceEvaluation]) -> String {
    let mut out = original.to_string();
    let mut sites: Vec<&BraceEvaluation> = evaluations.iter().collect();
    sites.sort_by(|a, b| b.location.start_byte.cmp(&a.location.start_byte));
    for eval in sites {
        let raw = eval.result.clone().unwrap_or_default();
        let replacement = if eval.location.is_unescape {
            raw
        } else {
            escape_for_substitution(&raw)
        };
        out.replace_range(eval.location.start_byte..eval.location.end_byte, &replacement);
    }
    out
}

/// Create a coordinator token over a mixed set of completed and in-flight
/// evaluations. Returns the coordinator token id; the caller installs the
/// resume callback with `set_resume`.
pub fn start(
    engine: &Arc<EngineInner>,
    evaluations: Vec<BraceEvaluation>,
    original: String,
    ctx: SubstitutionContext,
    state: &ExecutionState,
    position: &SourcePosition,
) -> EngineResult<String> {
    let total = evaluations.len();
    let completed_count = evaluations.iter().filter(|e| e.completed).count();
    let has_failure = evaluations.iter().any(|e| e.failed);
    let first_failure = evaluations
        .iter()
        .find(|e| e.failed)
        .and_then(|e| e.error_text.clone());
    let pending: Vec<(usize, String)> = evaluations
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.token_id.clone().map(|t| (i, t)))
        .collect();

    let coord_id = tokens::request_token(
        engine,
        state.clone(),
        RequestOptions {
            position: Some(position.clone()),
            ..Default::default()
        },
    );

    let coordinator = Arc::new(Mutex::new(BraceCoordinator {
        evaluations,
        completed_count,
        total,
        has_failure,
        first_failure,
        original,
        ctx,
        resume: None,
    }));
    tokens::set_coordinator(engine, &coord_id, coordinator)?;

    logging::emit(
        LogLevel::Debug,
        LogCategory::Async,
        Some(position),
        &format!(
            "coordinating {} brace evaluations ({} pending) under '{}'",
            total,
            pending.len(),
            coord_id
        ),
    );

    // Adopt the in-flight children so coordinator cleanup cascades, and
    // wire their settlement back to us. A child that already settled in
    // the meantime is folded in directly.
    for (index, child_id) in pending {
        if let Err(e) = tokens::adopt_child(engine, &coord_id, &child_id) {
            if !matches!(e, EngineError::TokenNotFound(_)) {
                return Err(e);
            }
        }
        match tokens::set_notify(engine, &child_id, &coord_id, index) {
            Ok(()) => {}
            Err(EngineError::TokenNotFound(_)) => {
                let status = engine
                    .tokens
                    .recent_final_status(&child_id)
                    .unwrap_or(false);
                let state = {
                    let coordinator = tokens::coordinator_of(engine, &coord_id);
                    coordinator.and_then(|arc| {
                        let guard = arc.lock().unwrap();
                        guard.evaluations[index].child_state.clone()
                    })
                };
                child_completed(engine, &coord_id, index, status, state.as_ref())?;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(coord_id)
}

/// Install the resume callback. Fires immediately when every evaluation
/// already settled.
pub fn set_resume(
    engine: &Arc<EngineInner>,
    coord_id: &str,
    resume: CoordinatorResume,
) -> EngineResult<()> {
    let Some(arc) = tokens::coordinator_of(engine, coord_id) else {
        return Err(EngineError::TokenNotFound(coord_id.to_string()));
    };
    {
        let mut coordinator = arc.lock().unwrap();
        coordinator.resume = Some(resume);
    }
    try_finish(engine, coord_id, &arc)
}

/// Record one settled child evaluation and finish the coordinator when it
/// was the last one.
pub fn child_completed(
    engine: &Arc<EngineInner>,
    coord_id: &str,
    index: usize,
    status: bool,
    child_state: Option<&ExecutionState>,
) -> EngineResult<()> {
    let Some(arc) = tokens::coordinator_of(engine, coord_id) else {
        // Coordinator already finished or was cleaned up
        return Ok(());
    };
    {
        let mut coordinator = arc.lock().unwrap();
        let Some(eval) = coordinator.evaluations.get_mut(index) else {
            return Ok(());
        };
        if eval.completed {
            return Ok(());
        }
        eval.completed = true;
        if status {
            let text = child_state
                .or(eval.child_state.as_ref())
                .and_then(|s| s.get_result())
                .map(|v| v.substitution_text())
                .unwrap_or_else(|| "undefined".to_string());
            eval.result = Some(text);
        } else {
            eval.failed = true;
            let message = format!("brace expression at {} failed", eval.position);
            eval.error_text = Some(message.clone());
            if !coordinator.has_failure {
                coordinator.has_failure = true;
                coordinator.first_failure = Some(message);
            }
        }
        coordinator.completed_count += 1;
    }
    try_finish(engine, coord_id, &arc)
}

/// When all evaluations settled and a resume callback is installed, fire
/// it and resolve the coordinator token with the dispatch outcome.
fn try_finish(
    engine: &Arc<EngineInner>,
    coord_id: &str,
    arc: &Arc<Mutex<BraceCoordinator>>,
) -> EngineResult<()> {
    let (resume, outcome) = {
        let mut coordinator = arc.lock().unwrap();
        if coordinator.completed_count < coordinator.total {
            return Ok(());
        }
        let Some(resume) = coordinator.resume.take() else {
            return Ok(());
        };
        let outcome = if coordinator.has_failure {
            CoordinatorOutcome::Failure(
                coordinator
                    .first_failure
                    .clone()
                    .unwrap_or_else(|| "brace expression failed".to_string()),
            )
        } else {
            CoordinatorOutcome::Success(splice_completed(
                &coordinator.original,
                &coordinator.evaluations,
            ))
        };
        (resume, outcome)
    };

    let flow = resume(engine, outcome)?;
    match flow {
        Flow::Token(next) => {
            // Dispatch suspended again: hand the coordinator's links over
            tokens::migrate_token(engine, coord_id, &next)
        }
        flow => match tokens::resolve_token(engine, coord_id, flow.carried_status()) {
            Ok(_) => Ok(()),
            Err(EngineError::TokenNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        },
    }
}
