//! Token Manager
//!
//! Suspension tokens stand in for in-flight commands. A handler suspends
//! by returning a token id; the host (or a background task) later resumes
//! it with a status. Tokens carry the captured continuation of the
//! enclosing command sequence, parent/child ownership links, and a chain
//! link that forwards their resolution status to another token.
//!
//! All map transitions take the single token mutex; continuations and
//! cleanup callbacks run outside it because they re-enter the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::engine::EngineInner;
use crate::interpreter::coordinator::{self, BraceCoordinator};
use crate::interpreter::errors::{EngineError, EngineResult, Flow};
use crate::interpreter::logging::{self, LogCategory, LogLevel};
use crate::interpreter::state::ExecutionState;
use crate::interpreter::substitution::SubstitutionContext;
use crate::parser::types::{ParsedCommand, SourcePosition};
use crate::value::Value;

pub type CleanupFn = Box<dyn FnOnce() + Send>;
/// A callback continuation: invoked with the resumed status, re-entering
/// the engine to continue whatever the token suspended.
pub type ResumeFn = Box<dyn FnOnce(&Arc<EngineInner>, bool) -> EngineResult<Flow> + Send>;

/// What kind of sequence a captured remainder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Sequence,
    Conditional,
    Or,
}

/// The remainder of a command sequence captured at suspension time.
pub struct CommandSequence {
    pub kind: SequenceKind,
    pub remaining: Vec<ParsedCommand>,
    pub current_index: usize,
    pub original_text: String,
    pub inherited_result: (Option<Value>, bool),
    pub position: SourcePosition,
    pub state: ExecutionState,
    pub ctx: SubstitutionContext,
}

pub enum Continuation {
    Sequence(CommandSequence),
    Callback(ResumeFn),
}

/// Everything the engine tracks for one active token.
pub struct TokenData {
    pub parent: Option<String>,
    pub chained: Option<String>,
    pub children: HashSet<String>,
    pub cleanup: Option<CleanupFn>,
    timer: Option<tokio::task::JoinHandle<()>>,
    created: Instant,
    pub created_at: chrono::DateTime<chrono::Utc>,
    deadline: Instant,
    pub state: ExecutionState,
    pub suspended_result: (Option<Value>, bool),
    pub position: Option<SourcePosition>,
    pub continuation: Option<Continuation>,
    /// Set on a brace coordinator token: the shared coordinator record.
    pub coordinator: Option<Arc<Mutex<BraceCoordinator>>>,
    /// Set on a brace child token: (coordinator token id, evaluation
    /// index) to notify when this token settles.
    pub notify: Option<(String, usize)>,
    pub invert_status: bool,
    waiters: Vec<mpsc::Sender<bool>>,
}

/// Options for `request_token`.
#[derive(Default)]
pub struct RequestOptions {
    pub cleanup: Option<CleanupFn>,
    pub parent: Option<String>,
    pub timeout: Option<Duration>,
    pub position: Option<SourcePosition>,
}

pub struct TokenManager {
    next_id: AtomicU64,
    active: Mutex<HashMap<String, TokenData>>,
    /// Final statuses of recently resolved tokens, so a waiter that
    /// arrives just after resolution still observes the outcome.
    recent_final: Mutex<VecDeque<(String, bool)>>,
}

const RECENT_FINAL_CAP: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct TokenStatusEntry {
    pub id: String,
    pub parent: Option<String>,
    pub child_count: usize,
    pub has_sequence: bool,
    pub age_ms: u64,
    pub has_suspended_result: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenStatusReport {
    pub active_count: usize,
    pub tokens: Vec<TokenStatusEntry>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            recent_final: Mutex::new(VecDeque::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.lock().unwrap().contains_key(id)
    }

    /// Attach a completion waiter. Returns `None` when the token is no
    /// longer active; check `recent_final_status` in that case.
    pub fn attach_waiter(&self, id: &str) -> Option<mpsc::Receiver<bool>> {
        let mut active = self.active.lock().unwrap();
        let data = active.get_mut(id)?;
        let (tx, rx) = mpsc::channel();
        data.waiters.push(tx);
        Some(rx)
    }

    pub fn recent_final_status(&self, id: &str) -> Option<bool> {
        self.recent_final
            .lock()
            .unwrap()
            .iter()
            .find(|(tid, _)| tid == id)
            .map(|(_, status)| *status)
    }

    fn record_final(&self, id: &str, status: bool) {
        let mut recent = self.recent_final.lock().unwrap();
        recent.push_back((id.to_string(), status));
        while recent.len() > RECENT_FINAL_CAP {
            recent.pop_front();
        }
    }

    pub fn status_report(&self) -> TokenStatusReport {
        let active = self.active.lock().unwrap();
        let mut tokens: Vec<TokenStatusEntry> = active
            .iter()
            .map(|(id, data)| TokenStatusEntry {
                id: id.clone(),
                parent: data.parent.clone(),
                child_count: data.children.len(),
                has_sequence: data.continuation.is_some(),
                age_ms: data.created.elapsed().as_millis() as u64,
                has_suspended_result: data.suspended_result.1,
            })
            .collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        TokenStatusReport {
            active_count: tokens.len(),
            tokens,
        }
    }

    /// Ids whose timeout deadline has passed.
    fn expired_ids(&self) -> Vec<String> {
        let now = Instant::now();
        self.active
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, data)| data.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Allocate a token. Ids are monotonic: `token_1`, `token_2`, ...
pub fn request_token(
    engine: &Arc<EngineInner>,
    state: ExecutionState,
    opts: RequestOptions,
) -> String {
    let n = engine.tokens.next_id.fetch_add(1, Ordering::SeqCst);
    let id = format!("token_{}", n);
    let timeout = opts.timeout.unwrap_or(engine.config.default_token_timeout);
    let now = Instant::now();

    let data = TokenData {
        parent: opts.parent.clone(),
        chained: None,
        children: HashSet::new(),
        cleanup: opts.cleanup,
        timer: arm_timer(engine, &id, timeout),
        created: now,
        created_at: chrono::Utc::now(),
        deadline: now + timeout,
        suspended_result: state.snapshot(),
        state,
        position: opts.position,
        continuation: None,
        coordinator: None,
        notify: None,
        invert_status: false,
        waiters: Vec::new(),
    };

    let mut active = engine.tokens.active.lock().unwrap();
    if let Some(parent_id) = &opts.parent {
        if let Some(parent) = active.get_mut(parent_id) {
            parent.children.insert(id.clone());
        }
    }
    active.insert(id.clone(), data);
    drop(active);

    logging::emit(
        LogLevel::Debug,
        LogCategory::Async,
        None,
        &format!("allocated token '{}' (timeout {:?})", id, timeout),
    );
    id
}

/// Spawn a timeout task when a tokio runtime is available; hosts without
/// one rely on the lazy expiry sweep at engine entry points.
fn arm_timer(engine: &Arc<EngineInner>, id: &str, timeout: Duration) -> Option<tokio::task::JoinHandle<()>> {
    let handle = engine.runtime.clone()?;
    let engine = Arc::clone(engine);
    let id = id.to_string();
    Some(handle.spawn(async move {
        tokio::time::sleep(timeout).await;
        logging::emit(
            LogLevel::Warn,
            LogCategory::Async,
            None,
            &format!("token '{}' timed out after {:?}", id, timeout),
        );
        force_cleanup(&engine, &id);
    }))
}

/// Run cleanup for every token whose deadline passed. Used by hosts that
/// run the engine without a tokio runtime.
pub fn sweep_expired(engine: &Arc<EngineInner>) {
    for id in engine.tokens.expired_ids() {
        logging::emit(
            LogLevel::Warn,
            LogCategory::Async,
            None,
            &format!("token '{}' expired", id),
        );
        force_cleanup(engine, &id);
    }
}

/// Attach a captured sequence remainder to a token.
pub fn push_command_sequence(
    engine: &Arc<EngineInner>,
    id: &str,
    seq: CommandSequence,
) -> EngineResult<()> {
    set_continuation(engine, id, Continuation::Sequence(seq))
}

pub fn set_continuation(engine: &Arc<EngineInner>, id: &str, continuation: Continuation) -> EngineResult<()> {
    let mut active = engine.tokens.active.lock().unwrap();
    match active.get_mut(id) {
        Some(data) => {
            data.continuation = Some(continuation);
            Ok(())
        }
        None => Err(EngineError::TokenNotFound(id.to_string())),
    }
}

pub fn set_invert(engine: &Arc<EngineInner>, id: &str) -> EngineResult<()> {
    let mut active = engine.tokens.active.lock().unwrap();
    match active.get_mut(id) {
        Some(data) => {
            data.invert_status = true;
            Ok(())
        }
        None => Err(EngineError::TokenNotFound(id.to_string())),
    }
}

pub fn set_coordinator(
    engine: &Arc<EngineInner>,
    id: &str,
    coordinator: Arc<Mutex<BraceCoordinator>>,
) -> EngineResult<()> {
    let mut active = engine.tokens.active.lock().unwrap();
    match active.get_mut(id) {
        Some(data) => {
            data.coordinator = Some(coordinator);
            Ok(())
        }
        None => Err(EngineError::TokenNotFound(id.to_string())),
    }
}

pub fn coordinator_of(engine: &Arc<EngineInner>, id: &str) -> Option<Arc<Mutex<BraceCoordinator>>> {
    engine
        .tokens
        .active
        .lock()
        .unwrap()
        .get(id)
        .and_then(|data| data.coordinator.clone())
}

/// Mark a brace child token to notify its coordinator on settlement.
pub fn set_notify(engine: &Arc<EngineInner>, id: &str, coord: &str, index: usize) -> EngineResult<()> {
    let mut active = engine.tokens.active.lock().unwrap();
    match active.get_mut(id) {
        Some(data) => {
            data.notify = Some((coord.to_string(), index));
            Ok(())
        }
        None => Err(EngineError::TokenNotFound(id.to_string())),
    }
}

/// Chain `a` to `b`: when `a` resolves, `b` is resumed with `a`'s status.
/// If `a` already chains somewhere, the link is appended at the tail.
/// Chains that would close a cycle are rejected.
pub fn chain_tokens(engine: &Arc<EngineInner>, a: &str, b: &str) -> EngineResult<()> {
    let mut active = engine.tokens.active.lock().unwrap();
    if !active.contains_key(b) {
        return Err(EngineError::TokenNotFound(b.to_string()));
    }

    // Walk to the chain tail, refusing a link that reaches back to `a`.
    let mut tail = a.to_string();
    loop {
        if tail == b {
            logging::emit(
                LogLevel::Warn,
                LogCategory::Async,
                None,
                &format!("refusing cyclic chain {} -> {}", a, b),
            );
            return Ok(());
        }
        match active.get(&tail) {
            Some(data) => match &data.chained {
                Some(next) => tail = next.clone(),
                None => break,
            },
            None => return Err(EngineError::TokenNotFound(tail)),
        }
    }

    if let Some(data) = active.get_mut(&tail) {
        data.chained = Some(b.to_string());
    }
    if let Some(data) = active.get_mut(b) {
        data.parent = Some(tail.clone());
    }
    Ok(())
}

/// Make `child` owned by `parent` so parent cleanup cascades to it.
pub fn adopt_child(engine: &Arc<EngineInner>, parent: &str, child: &str) -> EngineResult<()> {
    let mut active = engine.tokens.active.lock().unwrap();
    if !active.contains_key(parent) {
        return Err(EngineError::TokenNotFound(parent.to_string()));
    }
    match active.get_mut(child) {
        Some(data) => data.parent = Some(parent.to_string()),
        None => return Err(EngineError::TokenNotFound(child.to_string())),
    }
    if let Some(data) = active.get_mut(parent) {
        data.children.insert(child.to_string());
    }
    Ok(())
}

/// Chain `a` to `b`, or, when `a` already settled, resume `b` right away
/// with `a`'s recorded status.
pub fn chain_or_resolve(engine: &Arc<EngineInner>, a: &str, b: &str) -> EngineResult<()> {
    match chain_tokens(engine, a, b) {
        Ok(()) => Ok(()),
        Err(EngineError::TokenNotFound(missing)) if missing == a => {
            let status = engine.tokens.recent_final_status(a).unwrap_or(false);
            match resolve_token(engine, b, status) {
                Ok(_) => Ok(()),
                Err(EngineError::TokenNotFound(_)) => Ok(()),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Erase `from` and hand its chain link, coordinator notification, and
/// waiters over to `to`. Used when a continuation suspends again under a
/// fresh token.
pub fn migrate_token(engine: &Arc<EngineInner>, from: &str, to: &str) -> EngineResult<()> {
    let mut data = {
        let mut active = engine.tokens.active.lock().unwrap();
        let Some(data) = active.remove(from) else {
            return Ok(());
        };
        if let Some(parent_id) = &data.parent {
            if let Some(parent) = active.get_mut(parent_id) {
                parent.children.remove(from);
            }
        }
        data
    };
    if let Some(timer) = data.timer.take() {
        timer.abort();
    }
    for child in std::mem::take(&mut data.children) {
        force_cleanup(engine, &child);
    }
    if let Some((coord, index)) = data.notify.take() {
        match set_notify(engine, to, &coord, index) {
            Ok(()) => {}
            Err(EngineError::TokenNotFound(_)) => {
                let status = engine.tokens.recent_final_status(to).unwrap_or(false);
                crate::interpreter::coordinator::child_completed(
                    engine,
                    &coord,
                    index,
                    status,
                    Some(&data.state),
                )?;
            }
            Err(e) => return Err(e),
        }
    }
    if !data.waiters.is_empty() {
        transfer_waiters(engine, to, std::mem::take(&mut data.waiters));
    }
    if let Some(chain_id) = data.chained.take() {
        chain_or_resolve(engine, to, &chain_id)?;
    }
    Ok(())
}

/// Resolve a token with a status: detach and run its continuation,
/// cascade cleanup of its children, forward the produced status along the
/// chain, notify a waiting brace coordinator, then erase it.
pub fn resolve_token(engine: &Arc<EngineInner>, id: &str, status: bool) -> EngineResult<Flow> {
    let mut data = {
        let mut active = engine.tokens.active.lock().unwrap();
        let Some(data) = active.remove(id) else {
            return Err(EngineError::TokenNotFound(id.to_string()));
        };
        if let Some(parent_id) = &data.parent {
            if let Some(parent) = active.get_mut(parent_id) {
                parent.children.remove(id);
            }
        }
        data
    };

    if let Some(timer) = data.timer.take() {
        timer.abort();
    }

    let status = if data.invert_status { !status } else { status };
    logging::emit(
        LogLevel::Debug,
        LogCategory::Async,
        data.position.as_ref(),
        &format!("resolving token '{}' with status {}", id, status),
    );

    let flow = match data.continuation.take() {
        Some(Continuation::Sequence(seq)) => crate::interpreter::executor::resume_sequence(engine, seq, status)?,
        Some(Continuation::Callback(f)) => f(engine, status)?,
        None => Flow::Status(status),
    };

    for child in std::mem::take(&mut data.children) {
        force_cleanup(engine, &child);
    }

    let final_flow = match (data.chained.take(), flow) {
        (Some(chain_id), Flow::Token(inner)) => {
            // The continuation suspended again: the chained token fires
            // when the new token settles.
            chain_or_resolve(engine, &inner, &chain_id)?;
            Flow::Token(inner)
        }
        (Some(chain_id), flow) => match resolve_token(engine, &chain_id, flow.carried_status()) {
            Ok(chained_flow) => chained_flow,
            Err(EngineError::TokenNotFound(_)) => {
                logging::emit(
                    LogLevel::Warn,
                    LogCategory::Async,
                    None,
                    &format!("chained token '{}' vanished before resumption", chain_id),
                );
                flow
            }
            Err(e) => return Err(e),
        },
        (None, flow) => flow,
    };

    match &final_flow {
        Flow::Token(inner) => {
            if let Some((coord, index)) = data.notify.take() {
                match set_notify(engine, inner, &coord, index) {
                    Ok(()) => {}
                    Err(EngineError::TokenNotFound(_)) => {
                        // The replacement token already settled
                        let status = engine.tokens.recent_final_status(inner).unwrap_or(false);
                        coordinator::child_completed(engine, &coord, index, status, Some(&data.state))?;
                    }
                    Err(e) => return Err(e),
                }
            }
            if !data.waiters.is_empty() {
                transfer_waiters(engine, inner, std::mem::take(&mut data.waiters));
            }
        }
        flow => {
            let carried = flow.carried_status();
            if let Some((coord, index)) = data.notify.take() {
                coordinator::child_completed(engine, &coord, index, carried, Some(&data.state))?;
            }
            engine.tokens.record_final(id, carried);
            for waiter in data.waiters.drain(..) {
                let _ = waiter.send(carried);
            }
        }
    }

    Ok(final_flow)
}

/// Forcibly erase a token: run its cleanup callback, cascade to children,
/// and silently discard any captured continuation. Timeouts and parent
/// cleanup land here.
pub fn force_cleanup(engine: &Arc<EngineInner>, id: &str) -> bool {
    let mut data = {
        let mut active = engine.tokens.active.lock().unwrap();
        let Some(data) = active.remove(id) else {
            return false;
        };
        if let Some(parent_id) = &data.parent {
            if let Some(parent) = active.get_mut(parent_id) {
                parent.children.remove(id);
            }
        }
        data
    };

    if let Some(timer) = data.timer.take() {
        timer.abort();
    }
    logging::emit(
        LogLevel::Debug,
        LogCategory::Async,
        data.position.as_ref(),
        &format!(
            "cleaning up token '{}' (created {})",
            id,
            data.created_at.format("%H:%M:%S%.3f")
        ),
    );

    if let Some(cleanup) = data.cleanup.take() {
        cleanup();
    }
    for child in std::mem::take(&mut data.children) {
        force_cleanup(engine, &child);
    }
    if let Some((coord, index)) = data.notify.take() {
        let _ = coordinator::child_completed(engine, &coord, index, false, None);
    }
    engine.tokens.record_final(id, false);
    for waiter in data.waiters.drain(..) {
        let _ = waiter.send(false);
    }
    true
}

fn transfer_waiters(engine: &Arc<EngineInner>, inner: &str, waiters: Vec<mpsc::Sender<bool>>) {
    let mut active = engine.tokens.active.lock().unwrap();
    if let Some(data) = active.get_mut(inner) {
        data.waiters.extend(waiters);
        return;
    }
    drop(active);
    let status = engine.tokens.recent_final_status(inner).unwrap_or(false);
    for waiter in waiters {
        let _ = waiter.send(status);
    }
}
