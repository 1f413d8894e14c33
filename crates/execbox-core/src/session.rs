//! Execution sessions and the registry that tracks live ones.
//!
//! A session is the single source of truth between the `execute` call that
//! creates it and any later `send_input` / `stop` calls. Output readers and
//! the process supervisor mutate it concurrently with the HTTP boundary, so
//! all mutable state sits behind a per-session mutex that is never held
//! across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{Mutex as TokioMutex, RwLock, broadcast, oneshot, watch};

use crate::error::{Error, Result};
use crate::language::LanguageSpec;
use crate::outcome::{ExecutionResult, InteractiveSnapshot, Termination};
use crate::prompt::{Interactivity, PromptTracker};
use crate::workspace::Workspace;

/// Capacity of each session's event channel.
/// Subscribers that fall further behind lose the oldest chunks.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Opaque execution identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ExecutionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live output event, as delivered to stream subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Stdout { data: String },
    Stderr { data: String },
    Exit {
        exit_code: i32,
        status: crate::outcome::ExecutionStatus,
    },
}

/// Output captured before a subscription started.
#[derive(Debug, Clone)]
pub struct Backlog {
    pub stdout: String,
    pub stderr: String,
    pub termination: Option<Termination>,
}

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct SessionState {
    stdout: String,
    stderr: String,
    tracker: PromptTracker,
    interactivity: Interactivity,
    termination: Option<Termination>,
}

/// The live record of one execution.
pub struct ExecutionSession {
    id: ExecutionId,
    language: &'static LanguageSpec,
    workspace: Arc<Workspace>,
    started_at: Instant,
    /// Classification decided at launch.
    launch: Interactivity,
    state: Mutex<SessionState>,
    stdin: TokioMutex<Option<ChildStdin>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_tx: watch::Sender<Option<Termination>>,
    events: broadcast::Sender<SessionEvent>,
}

impl fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("id", &self.id)
            .field("language", &self.language.id)
            .field("launch", &self.launch)
            .finish()
    }
}

impl ExecutionSession {
    /// Create a session.
    ///
    /// Returns the session and the receiving half of its kill channel, which
    /// belongs to whoever supervises the process.
    pub fn new(
        id: ExecutionId,
        language: &'static LanguageSpec,
        workspace: Arc<Workspace>,
        launch: Interactivity,
        stdin: Option<ChildStdin>,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let session = Arc::new(Self {
            id,
            language,
            workspace,
            started_at: Instant::now(),
            state: Mutex::new(SessionState {
                stdout: String::new(),
                stderr: String::new(),
                tracker: PromptTracker::new(),
                interactivity: launch.clone(),
                termination: None,
            }),
            launch,
            stdin: TokioMutex::new(stdin),
            kill_tx: Mutex::new(Some(kill_tx)),
            exit_tx,
            events,
        });

        (session, kill_rx)
    }

    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    pub fn language(&self) -> &'static LanguageSpec {
        self.language
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Whether the session was launched as interactive.
    pub fn is_interactive(&self) -> bool {
        self.launch.is_interactive()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a decoded output chunk.
    pub fn append(&self, stream: OutputStream, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let mut state = self.state();
        let event = match stream {
            OutputStream::Stdout => {
                state.stdout.push_str(chunk);
                state.tracker.observe(chunk);
                state.interactivity = state.tracker.verdict(&self.launch);
                SessionEvent::Stdout {
                    data: chunk.to_string(),
                }
            }
            OutputStream::Stderr => {
                state.stderr.push_str(chunk);
                SessionEvent::Stderr {
                    data: chunk.to_string(),
                }
            }
        };
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Record how the process ended. Only the first call has any effect.
    pub fn finish(&self, termination: Termination) {
        {
            let mut state = self.state();
            if state.termination.is_some() {
                return;
            }
            state.termination = Some(termination);
            let _ = self.events.send(SessionEvent::Exit {
                exit_code: termination.exit_code(),
                status: termination.status(),
            });
        }
        self.exit_tx.send_replace(Some(termination));
    }

    /// How the process ended, if it has.
    pub fn termination(&self) -> Option<Termination> {
        self.state().termination
    }

    pub fn is_finished(&self) -> bool {
        self.termination().is_some()
    }

    /// Wait until the process has ended and its output is fully drained.
    pub async fn wait(&self) -> Termination {
        let mut rx = self.exit_tx.subscribe();
        match rx.wait_for(|termination| termination.is_some()).await {
            Ok(termination) => termination.unwrap_or(Termination::Killed),
            // The sender lives as long as the session
            Err(_) => Termination::Killed,
        }
    }

    /// Ask the supervisor to kill the process. Returns false if a kill was
    /// already requested or the supervisor is gone.
    pub fn request_kill(&self) -> bool {
        let sender = self
            .kill_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Start an input round: forget the current prompt and return the stdout
    /// offset that later output is measured from.
    pub fn begin_input(&self) -> usize {
        let mut state = self.state();
        state.tracker.reset();
        state.interactivity = state.tracker.verdict(&self.launch);
        state.stdout.len()
    }

    /// Write one line to the program's stdin.
    ///
    /// # Errors
    /// [`Error::InputUnavailable`] if stdin was never piped or the program
    /// has closed it.
    pub async fn write_line(&self, input: &str) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(Error::InputUnavailable(self.id.clone()));
        };

        let mut line = String::with_capacity(input.len() + 1);
        line.push_str(input);
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::debug!(execution_id = %self.id, "stdin write failed: {}", e);
            *guard = None;
            return Err(Error::InputUnavailable(self.id.clone()));
        }
        Ok(())
    }

    /// Close the program's stdin (EOF).
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    /// Stdout produced after `offset`.
    pub fn stdout_since(&self, offset: usize) -> String {
        self.state().stdout.get(offset..).unwrap_or_default().to_string()
    }

    pub fn stdout(&self) -> String {
        self.state().stdout.clone()
    }

    pub fn stderr(&self) -> String {
        self.state().stderr.clone()
    }

    pub fn interactivity(&self) -> Interactivity {
        self.state().interactivity.clone()
    }

    /// Current view for interactive callers.
    pub fn snapshot(&self) -> InteractiveSnapshot {
        let state = self.state();
        InteractiveSnapshot {
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
            interactivity: state.interactivity.clone(),
            prompt: state.tracker.prompt().to_string(),
            waiting: state.tracker.is_waiting(),
            exit_code: state.termination.map(|t| t.exit_code()),
            elapsed_ms: self.elapsed_ms(),
        }
    }

    /// Terminal result given how the process ended.
    pub fn result(&self, termination: Termination) -> ExecutionResult {
        let state = self.state();
        ExecutionResult {
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
            exit_code: termination.exit_code(),
            status: termination.status(),
            elapsed_ms: self.elapsed_ms(),
        }
    }

    /// Subscribe to live events together with everything emitted so far.
    ///
    /// Both are taken under the same lock as appends, so no chunk is missed
    /// or delivered twice.
    pub fn subscribe(&self) -> (Backlog, broadcast::Receiver<SessionEvent>) {
        let state = self.state();
        let rx = self.events.subscribe();
        let backlog = Backlog {
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
            termination: state.termination,
        };
        (backlog, rx)
    }
}

/// Concurrency-safe table of live sessions keyed by execution id.
///
/// Membership mirrors workspace existence: a session leaves the registry
/// only on its way to [`Workspace::destroy`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ExecutionId, Arc<ExecutionSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its own id.
    pub async fn put(&self, session: Arc<ExecutionSession>) {
        let id = session.id().clone();
        let previous = self.sessions.write().await.insert(id.clone(), session);
        if previous.is_some() {
            tracing::error!(execution_id = %id, "Execution id registered twice");
        }
    }

    pub async fn get(&self, id: &ExecutionId) -> Option<Arc<ExecutionSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &ExecutionId) -> Option<Arc<ExecutionSession>> {
        self.sessions.write().await.remove(id)
    }

    /// Remove a session and delete its workspace.
    ///
    /// Safe to call from several places for the same session; every caller
    /// returns only after the workspace is gone.
    pub async fn purge(&self, session: &ExecutionSession) {
        if self.remove(session.id()).await.is_some() {
            tracing::debug!(execution_id = %session.id(), "Session purged");
        }
        session.workspace().destroy().await;
    }

    /// Remove and return every session.
    pub async fn drain(&self) -> Vec<Arc<ExecutionSession>> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<ExecutionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language;
    use crate::outcome::{ExecutionStatus, KILLED_EXIT_CODE};
    use crate::workspace::WorkspaceManager;
    use tempfile::TempDir;

    async fn test_session(
        temp: &TempDir,
        language: &str,
        launch: Interactivity,
    ) -> (Arc<ExecutionSession>, oneshot::Receiver<()>) {
        let manager = WorkspaceManager::new(temp.path()).unwrap();
        let id = ExecutionId::new();
        let workspace = manager.create(&id).await.unwrap();
        ExecutionSession::new(
            id,
            language::resolve(language).unwrap(),
            Arc::new(workspace),
            launch,
            None,
        )
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let a = ExecutionId::new();
        let b = ExecutionId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_execution_id_serializes_transparently() {
        let id = ExecutionId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[tokio::test]
    async fn test_append_and_delta() {
        let temp = TempDir::new().unwrap();
        let (session, _kill_rx) = test_session(&temp, "python", Interactivity::LikelyInteractive).await;

        session.append(OutputStream::Stdout, "Name? ");
        assert!(session.interactivity().is_waiting());

        let baseline = session.begin_input();
        assert_eq!(baseline, "Name? ".len());
        assert_eq!(session.interactivity(), Interactivity::LikelyInteractive);

        session.append(OutputStream::Stdout, "Hello, Ada\n");
        session.append(OutputStream::Stderr, "warning\n");
        assert_eq!(session.stdout_since(baseline), "Hello, Ada\n");
        assert_eq!(session.stdout(), "Name? Hello, Ada\n");
        assert_eq!(session.stderr(), "warning\n");
    }

    #[tokio::test]
    async fn test_batch_session_is_never_promoted() {
        let temp = TempDir::new().unwrap();
        let (session, _kill_rx) = test_session(&temp, "python", Interactivity::Batch).await;
        session.append(OutputStream::Stdout, "Enter value: ");
        assert_eq!(session.interactivity(), Interactivity::Batch);
        assert!(!session.is_interactive());
    }

    #[tokio::test]
    async fn test_finish_is_recorded_once() {
        let temp = TempDir::new().unwrap();
        let (session, _kill_rx) = test_session(&temp, "python", Interactivity::Batch).await;

        session.finish(Termination::Killed);
        session.finish(Termination::Exited(0));

        assert_eq!(session.wait().await, Termination::Killed);
        let result = session.result(Termination::Killed);
        assert_eq!(result.exit_code, KILLED_EXIT_CODE);
        assert_eq!(result.status, ExecutionStatus::Killed);
    }

    #[tokio::test]
    async fn test_request_kill_delivers_once() {
        let temp = TempDir::new().unwrap();
        let (session, kill_rx) = test_session(&temp, "python", Interactivity::Batch).await;

        assert!(session.request_kill());
        assert!(!session.request_kill());
        assert!(kill_rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_write_without_stdin_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let (session, _kill_rx) = test_session(&temp, "python", Interactivity::Batch).await;

        match session.write_line("42").await {
            Err(Error::InputUnavailable(id)) => assert_eq!(&id, session.id()),
            other => panic!("expected InputUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_backlog_and_events() {
        let temp = TempDir::new().unwrap();
        let (session, _kill_rx) = test_session(&temp, "python", Interactivity::LikelyInteractive).await;

        session.append(OutputStream::Stdout, "before\n");
        let (backlog, mut rx) = session.subscribe();
        assert_eq!(backlog.stdout, "before\n");
        assert!(backlog.termination.is_none());

        session.append(OutputStream::Stdout, "after\n");
        session.finish(Termination::Exited(0));

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Stdout {
                data: "after\n".to_string()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Exit {
                exit_code: 0,
                status: ExecutionStatus::Completed
            }
        );
    }

    #[tokio::test]
    async fn test_registry_purge_removes_workspace() {
        let temp = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        let (session, _kill_rx) = test_session(&temp, "python", Interactivity::Batch).await;
        let dir = session.workspace().dir().to_path_buf();

        registry.put(session.clone()).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(session.id()).await.is_some());

        registry.purge(&session).await;
        assert!(registry.is_empty().await);
        assert!(!dir.exists());

        // Second purge is harmless
        registry.purge(&session).await;
    }

    #[tokio::test]
    async fn test_registry_drain() {
        let temp = TempDir::new().unwrap();
        let registry = SessionRegistry::new();
        for _ in 0..3 {
            let (session, _kill_rx) = test_session(&temp, "python", Interactivity::Batch).await;
            registry.put(session).await;
        }
        assert_eq!(registry.ids().await.len(), 3);

        let drained = registry.drain().await;
        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty().await);
    }
}
