use super::planner::PhasePlanner;
use super::request::{
    BatchOutcome, MAX_PARALLEL_AGENTS, PipelineRequest, PipelineResponse, agent_name,
};
use crate::agent::{
    AgentCatalog, AgentInvoker, AgentRequest, AgentResponse, DEFAULT_ALLOWED_TOOLS, compose_task,
};
use crate::errors::{AgentError, PipelineError, RetryError};
use crate::lock::{ProjectLock, lock_path};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::state::{self, PhaseStatus, PipelineState, StateStore};
use crate::tracker::{GitWorkingTree, WorkingTree};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value, json};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};

type AgentOutcome = Result<AgentResponse, RetryError<AgentError>>;
type BackgroundResult = (usize, String, AgentOutcome);

/// Totals for one `run`/`resume`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Phase log entries written during this run.
    pub phases_recorded: usize,
    pub background_joined: usize,
    pub background_failed: usize,
}

/// Mutable data of a run in progress.
struct Run {
    state: PipelineState,
    background: JoinSet<BackgroundResult>,
    next_background_id: usize,
    summary: RunSummary,
}

impl Run {
    fn new(state: PipelineState) -> Self {
        Self {
            state,
            background: JoinSet::new(),
            next_background_id: 0,
            summary: RunSummary::default(),
        }
    }
}

/// Runs a pipeline under the project lock, dispatching the planner's
/// requests and keeping the state document current.
pub struct PipelineController {
    project_dir: PathBuf,
    lock_file: PathBuf,
    store: StateStore,
    catalog: AgentCatalog,
    invoker: Arc<dyn AgentInvoker>,
    retry: RetryExecutor,
    working_tree: Arc<dyn WorkingTree>,
    allowed_tools: Vec<String>,
    max_parallel: usize,
}

impl PipelineController {
    /// Controller for `project_dir` with the standard lock and state
    /// locations, default retry policy and a git working tree.
    pub fn new(project_dir: &Path, catalog: AgentCatalog, invoker: Arc<dyn AgentInvoker>) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            lock_file: lock_path(project_dir),
            store: StateStore::new(project_dir),
            catalog,
            invoker,
            retry: RetryExecutor::new(RetryPolicy::default()),
            working_tree: Arc::new(GitWorkingTree::new(project_dir)),
            allowed_tools: DEFAULT_ALLOWED_TOOLS.iter().map(|t| t.to_string()).collect(),
            max_parallel: MAX_PARALLEL_AGENTS,
        }
    }

    pub fn with_retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_lock_file(mut self, lock_file: PathBuf) -> Self {
        self.lock_file = lock_file;
        self
    }

    pub fn with_working_tree(mut self, working_tree: Arc<dyn WorkingTree>) -> Self {
        self.working_tree = working_tree;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    /// Batch size limit for parallel requests, capped at
    /// [`MAX_PARALLEL_AGENTS`].
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.clamp(1, MAX_PARALLEL_AGENTS);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// Start a new run of `task`. Ctrl-C aborts it with
    /// [`PipelineError::Interrupted`].
    pub async fn run(
        &self,
        task: &str,
        planner: &mut dyn PhasePlanner,
    ) -> Result<RunSummary, PipelineError> {
        self.run_until(task, planner, interrupt_signal()).await
    }

    /// Like [`run`](Self::run), stopping when `shutdown` completes.
    pub async fn run_until(
        &self,
        task: &str,
        planner: &mut dyn PhasePlanner,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, PipelineError> {
        let _lock = ProjectLock::acquire(&self.lock_file)?;

        let mut state = self.store.load();
        state.begin(task);
        self.store.persist(&mut state)?;
        tracing::info!(task, project = %self.project_dir.display(), "pipeline started");

        self.drive(state, planner, shutdown).await
    }

    /// Continue the run recorded in the state document.
    pub async fn resume(&self, planner: &mut dyn PhasePlanner) -> Result<RunSummary, PipelineError> {
        self.resume_until(planner, interrupt_signal()).await
    }

    pub async fn resume_until(
        &self,
        planner: &mut dyn PhasePlanner,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, PipelineError> {
        let _lock = ProjectLock::acquire(&self.lock_file)?;

        let no_state = || PipelineError::NoResumableState(self.store.state_file().to_path_buf());
        if !self.store.exists() {
            return Err(no_state());
        }
        let mut state = self.store.load();
        let Some(task) = state.task.clone() else {
            return Err(no_state());
        };
        self.store.persist(&mut state)?;
        tracing::info!(
            task = %task,
            phase = state.current_phase.as_deref().unwrap_or("none"),
            "resuming pipeline"
        );

        self.drive(state, planner, shutdown).await
    }

    /// Roll the project back outside of a run.
    pub fn rollback(&self, confirm: &str) -> Result<String, PipelineError> {
        let _lock = ProjectLock::acquire(&self.lock_file)?;
        let mut state = self.store.load();
        self.rollback_state(&mut state, confirm)
    }

    async fn drive(
        &self,
        state: PipelineState,
        planner: &mut dyn PhasePlanner,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, PipelineError> {
        let mut run = Run::new(state);
        tokio::pin!(shutdown);

        let stepped = tokio::select! {
            result = self.step_loop(&mut run, planner) => result,
            _ = &mut shutdown => Err(PipelineError::Interrupted),
        };
        if let Err(PipelineError::Interrupted) = stepped {
            tracing::warn!(
                pending_background = run.background.len(),
                "pipeline interrupted, state saved"
            );
            return Err(PipelineError::Interrupted);
        }

        // Background agents finish even when a step failed
        let joined = tokio::select! {
            result = self.join_background(&mut run) => result,
            _ = &mut shutdown => Err(PipelineError::Interrupted),
        };
        stepped?;
        joined?;

        tracing::info!(
            phases = run.summary.phases_recorded,
            background = run.summary.background_joined,
            background_failed = run.summary.background_failed,
            "pipeline finished"
        );
        Ok(run.summary)
    }

    async fn step_loop(
        &self,
        run: &mut Run,
        planner: &mut dyn PhasePlanner,
    ) -> Result<(), PipelineError> {
        let mut last: Option<PipelineResponse> = None;
        while let Some(request) = planner.next(&run.state, last.as_ref()).await? {
            let response = self.dispatch(run, request).await?;
            self.reap_background(run)?;
            last = Some(response);
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        run: &mut Run,
        request: PipelineRequest,
    ) -> Result<PipelineResponse, PipelineError> {
        request.validate(self.max_parallel)?;
        tracing::debug!(op = request.op(), "dispatching request");

        match request {
            PipelineRequest::RunAgent { agent_path, input } => {
                self.run_agent(run, agent_path, &input).await
            }
            PipelineRequest::RunAgentsParallel { agent_path, inputs } => {
                self.run_batch(run, agent_path, inputs).await
            }
            PipelineRequest::RunAgentBackground { agent_path, input } => {
                self.start_background(run, agent_path, &input)
            }
            PipelineRequest::GetState => Ok(PipelineResponse::State(Box::new(run.state.clone()))),
            PipelineRequest::ReportProgress { message } => {
                tracing::info!(target: "conductor::progress", "{}", message);
                Ok(PipelineResponse::ProgressReported)
            }
            PipelineRequest::UpdateProgress {
                phase,
                status,
                details,
            } => {
                self.record(run, &phase, status, details)?;
                tracing::info!(phase = %phase, %status, "progress updated");
                Ok(PipelineResponse::ProgressUpdated { phase, status })
            }
            PipelineRequest::Rollback { confirm } => {
                let base_commit = self.rollback_state(&mut run.state, &confirm)?;
                Ok(PipelineResponse::RolledBack { base_commit })
            }
        }
    }

    async fn run_agent(
        &self,
        run: &mut Run,
        agent_path: String,
        input: &str,
    ) -> Result<PipelineResponse, PipelineError> {
        let system_prompt = self.catalog.system_prompt(&agent_path)?;
        let phase = agent_name(&agent_path).to_string();
        self.record(run, &phase, PhaseStatus::Started, details([("agent_path", json!(agent_path))]))?;
        tracing::info!(agent = %agent_path, "running agent");

        match self.invoke(&system_prompt, input).await {
            Ok(response) => {
                self.apply_markers(run, &response.text)?;
                self.record(run, &phase, PhaseStatus::Completed, Map::new())?;
                tracing::info!(agent = %agent_path, "agent complete");
                Ok(PipelineResponse::AgentCompleted {
                    agent_path,
                    output: response.text,
                })
            }
            Err(source) => {
                self.record(run, &phase, PhaseStatus::Failed, failure_details(&source))?;
                Err(PipelineError::Agent {
                    agent: agent_path,
                    source,
                })
            }
        }
    }

    async fn run_batch(
        &self,
        run: &mut Run,
        agent_path: String,
        inputs: Vec<String>,
    ) -> Result<PipelineResponse, PipelineError> {
        let system_prompt = self.catalog.system_prompt(&agent_path)?;
        let phase = agent_name(&agent_path).to_string();
        self.record(
            run,
            &phase,
            PhaseStatus::Started,
            details([("agent_path", json!(agent_path)), ("parallel", json!(inputs.len()))]),
        )?;
        tracing::info!(agent = %agent_path, count = inputs.len(), "running agents in parallel");

        let mut pending: FuturesUnordered<_> = inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let call = self.invoke(&system_prompt, input);
                async move { (index, call.await) }
            })
            .collect();

        let mut results: Vec<Option<Result<String, String>>> = vec![None; inputs.len()];
        while let Some((index, outcome)) = pending.next().await {
            results[index] = Some(match outcome {
                Ok(response) => {
                    self.apply_markers(run, &response.text)?;
                    Ok(response.text)
                }
                Err(e) => {
                    tracing::warn!(agent = %agent_path, index, error = %e, "parallel agent failed");
                    Err(e.to_string())
                }
            });
        }

        let outcomes: Vec<BatchOutcome> = inputs
            .into_iter()
            .zip(results)
            .map(|(input, result)| BatchOutcome {
                input,
                result: result.unwrap_or_else(|| Err("agent did not report".to_string())),
            })
            .collect();
        let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
        let failed = outcomes.len() - succeeded;

        let status = if succeeded > 0 {
            PhaseStatus::Completed
        } else {
            PhaseStatus::Failed
        };
        self.record(
            run,
            &phase,
            status,
            details([("succeeded", json!(succeeded)), ("failed", json!(failed))]),
        )?;
        tracing::info!(agent = %agent_path, succeeded, total = outcomes.len(), "parallel execution complete");

        Ok(PipelineResponse::BatchCompleted {
            agent_path,
            outcomes,
        })
    }

    fn start_background(
        &self,
        run: &mut Run,
        agent_path: String,
        input: &str,
    ) -> Result<PipelineResponse, PipelineError> {
        let system_prompt = self.catalog.system_prompt(&agent_path)?;
        let id = run.next_background_id;
        run.next_background_id += 1;

        let phase = agent_name(&agent_path).to_string();
        self.record(
            run,
            &phase,
            PhaseStatus::Started,
            details([("agent_path", json!(agent_path)), ("background", json!(id))]),
        )?;

        let call = self.invoke(&system_prompt, input);
        let path = agent_path.clone();
        run.background.spawn(async move { (id, path, call.await) });
        tracing::info!(agent = %agent_path, id, "agent started in background");

        Ok(PipelineResponse::BackgroundStarted { agent_path, id })
    }

    /// Collect background agents that already finished.
    fn reap_background(&self, run: &mut Run) -> Result<(), PipelineError> {
        while let Some(joined) = run.background.try_join_next() {
            self.finish_background(run, joined)?;
        }
        Ok(())
    }

    async fn join_background(&self, run: &mut Run) -> Result<(), PipelineError> {
        if !run.background.is_empty() {
            tracing::info!(count = run.background.len(), "waiting for background agents");
        }
        while let Some(joined) = run.background.join_next().await {
            self.finish_background(run, joined)?;
        }
        Ok(())
    }

    fn finish_background(
        &self,
        run: &mut Run,
        joined: Result<BackgroundResult, JoinError>,
    ) -> Result<(), PipelineError> {
        run.summary.background_joined += 1;
        let (id, agent_path, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "background agent task aborted");
                run.summary.background_failed += 1;
                return Ok(());
            }
        };

        let phase = agent_name(&agent_path).to_string();
        match outcome {
            Ok(response) => {
                self.apply_markers(run, &response.text)?;
                self.record(run, &phase, PhaseStatus::Completed, details([("background", json!(id))]))?;
                tracing::info!(agent = %agent_path, id, "background agent complete");
            }
            Err(e) => {
                run.summary.background_failed += 1;
                tracing::warn!(agent = %agent_path, id, error = %e, "background agent failed");
                let mut failure = failure_details(&e);
                failure.insert("background".to_string(), json!(id));
                self.record(run, &phase, PhaseStatus::Failed, failure)?;
            }
        }
        Ok(())
    }

    fn rollback_state(&self, state: &mut PipelineState, confirm: &str) -> Result<String, PipelineError> {
        let base_commit = state::rollback_target(state, confirm)?.to_string();
        tracing::warn!(commit = %base_commit, "rolling back working tree");

        self.working_tree
            .reset_hard(&base_commit)
            .map_err(|e| PipelineError::WorkingTree(format!("{:#}", e)))?;
        self.store.rollback(state, confirm)?;
        self.store.write_progress(state)?;

        tracing::info!(commit = %base_commit, "rolled back, pipeline state cleared");
        Ok(base_commit)
    }

    /// One agent call with retries, owning everything it needs so it can
    /// run detached.
    fn invoke(
        &self,
        system_prompt: &str,
        input: &str,
    ) -> impl Future<Output = AgentOutcome> + Send + 'static {
        let request = AgentRequest {
            system_prompt: system_prompt.to_string(),
            allowed_tools: self.allowed_tools.clone(),
            working_dir: self.project_dir.clone(),
            task: compose_task(&self.project_dir, input),
        };
        let invoker = Arc::clone(&self.invoker);
        let retry = self.retry.clone();
        async move {
            retry
                .execute(move || {
                    let invoker = Arc::clone(&invoker);
                    let request = request.clone();
                    async move { invoker.invoke(request).await }
                })
                .await
        }
    }

    fn apply_markers(&self, run: &mut Run, text: &str) -> Result<(), PipelineError> {
        if state::extract_markers(text, &mut run.state) {
            self.store.persist(&mut run.state)?;
        }
        Ok(())
    }

    fn record(
        &self,
        run: &mut Run,
        phase: &str,
        status: PhaseStatus,
        details: Map<String, Value>,
    ) -> Result<(), PipelineError> {
        run.state.record_phase(phase, status, details);
        self.store.persist(&mut run.state)?;
        self.store.write_progress(&run.state)?;
        run.summary.phases_recorded += 1;
        Ok(())
    }
}

fn details<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn failure_details(error: &RetryError<AgentError>) -> Map<String, Value> {
    details([
        ("error", json!(error.to_string())),
        ("attempts", json!(error.attempts())),
    ])
}

/// Completes on Ctrl-C. Never completes if the handler cannot be installed.
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EXIT_INTERRUPTED, EXIT_LOCK_BUSY, LockError, StateError};
    use crate::pipeline::ScriptedPlanner;
    use std::fs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    type Reply = (Duration, Result<String, String>);

    /// Answers by looking up the task input; unknown inputs echo back.
    struct MockInvoker {
        reply: Box<dyn Fn(&str) -> Reply + Send + Sync>,
        calls: AtomicU32,
    }

    impl MockInvoker {
        fn new(reply: impl Fn(&str) -> Reply + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl AgentInvoker for MockInvoker {
        async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let input = request
                .task
                .rsplit("## Task Input\n")
                .next()
                .unwrap_or_default()
                .to_string();
            let (delay, result) = (self.reply)(&input);
            tokio::time::sleep(delay).await;
            result
                .map(AgentResponse::text)
                .map_err(AgentError::Reported)
        }
    }

    #[derive(Default)]
    struct RecordingTree {
        resets: Mutex<Vec<String>>,
    }

    impl WorkingTree for RecordingTree {
        fn reset_hard(&self, commit: &str) -> anyhow::Result<()> {
            self.resets.lock().unwrap().push(commit.to_string());
            Ok(())
        }

        fn head_sha(&self) -> Option<String> {
            None
        }
    }

    fn project(agents: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("agents")).unwrap();
        for agent in agents {
            fs::write(dir.path().join(format!("agents/{}.md", agent)), format!("# {}", agent)).unwrap();
        }
        dir
    }

    fn controller(dir: &TempDir, invoker: Arc<MockInvoker>) -> PipelineController {
        let catalog = AgentCatalog::discover(dir.path().join("agents")).unwrap();
        PipelineController::new(dir.path(), catalog, invoker)
            .with_retry(RetryExecutor::new(RetryPolicy::new(3, Duration::ZERO, Duration::ZERO)))
            .with_working_tree(Arc::new(RecordingTree::default()))
    }

    fn run_agent(agent: &str, input: &str) -> PipelineRequest {
        PipelineRequest::RunAgent {
            agent_path: format!("agents/{}.md", agent),
            input: input.to_string(),
        }
    }

    fn instant(text: &str) -> Reply {
        (Duration::ZERO, Ok(text.to_string()))
    }

    #[tokio::test]
    async fn test_run_records_phases_and_markers() {
        let dir = project(&["git-setup"]);
        let invoker = MockInvoker::new(|_| instant("Done\nBRANCH: feature/health\nBASE_COMMIT: abc123\n"));
        let ctl = controller(&dir, invoker.clone());
        let mut planner = ScriptedPlanner::from_requests([
            PipelineRequest::UpdateProgress {
                phase: "setup".into(),
                status: PhaseStatus::Started,
                details: Map::new(),
            },
            run_agent("git-setup", "create a branch"),
        ]);

        let summary = ctl
            .run_until("add health endpoint", &mut planner, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.phases_recorded, 3);
        assert_eq!(invoker.calls(), 1);
        assert!(!ctl.lock_file().exists());

        let state = ctl.store().load();
        assert_eq!(state.task.as_deref(), Some("add health endpoint"));
        assert_eq!(state.marker("branch"), Some("feature/health"));
        assert_eq!(state.base_commit(), Some("abc123"));
        let statuses: Vec<_> = state.phases.iter().map(|p| (p.phase.as_str(), p.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("setup", PhaseStatus::Started),
                ("git-setup", PhaseStatus::Started),
                ("git-setup", PhaseStatus::Completed),
            ]
        );
        assert!(ctl.store().progress_file().exists());
    }

    #[tokio::test]
    async fn test_agent_failure_is_recorded_then_surfaced() {
        let dir = project(&["git-setup"]);
        let invoker = MockInvoker::new(|_| (Duration::ZERO, Err("authentication failed".into())));
        let ctl = controller(&dir, invoker.clone());
        let mut planner = ScriptedPlanner::from_requests([
            run_agent("git-setup", "create a branch"),
            PipelineRequest::GetState,
        ]);

        let err = ctl
            .run_until("task", &mut planner, std::future::pending())
            .await
            .unwrap_err();

        match err {
            PipelineError::Agent { agent, source } => {
                assert_eq!(agent, "agents/git-setup.md");
                assert_eq!(source.attempts(), 1);
            }
            other => panic!("expected Agent error, got {:?}", other),
        }
        assert_eq!(invoker.calls(), 1);
        assert_eq!(planner.remaining(), 1);
        assert!(!ctl.lock_file().exists());

        let state = ctl.store().load();
        let last = state.phases.last().unwrap();
        assert_eq!(last.status, PhaseStatus::Failed);
        assert_eq!(last.details["attempts"], 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = project(&["test-generator"]);
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let invoker = MockInvoker::new(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                (Duration::ZERO, Err("connection reset".into()))
            } else {
                instant("TESTS_FILE: specs/tests.json")
            }
        });
        let ctl = controller(&dir, invoker.clone());
        let mut planner = ScriptedPlanner::from_requests([run_agent("test-generator", "write tests")]);

        ctl.run_until("task", &mut planner, std::future::pending())
            .await
            .unwrap();

        assert_eq!(invoker.calls(), 2);
        assert_eq!(ctl.store().load().marker("testsFile"), Some("specs/tests.json"));
    }

    #[tokio::test]
    async fn test_busy_lock_refuses_to_start() {
        let dir = project(&["git-setup"]);
        let invoker = MockInvoker::new(|_| instant("ok"));
        let ctl = controller(&dir, invoker.clone());
        fs::write(ctl.lock_file(), std::process::id().to_string()).unwrap();
        let mut planner = ScriptedPlanner::from_requests([run_agent("git-setup", "x")]);

        let err = ctl
            .run_until("task", &mut planner, std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Lock(LockError::Busy { .. })));
        assert_eq!(err.exit_code(), EXIT_LOCK_BUSY);
        assert_eq!(invoker.calls(), 0);
        assert_eq!(planner.remaining(), 1);
        assert!(ctl.lock_file().exists());
        assert!(!ctl.store().exists());
    }

    #[tokio::test]
    async fn test_parallel_batch_reports_in_issue_order() {
        let dir = project(&["bugfinder"]);
        let invoker = MockInvoker::new(|input| match input {
            "slow" => (Duration::from_millis(40), Ok("BRANCH: from-slow".into())),
            "fast" => (Duration::from_millis(1), Ok("BRANCH: from-fast".into())),
            _ => (Duration::from_millis(5), Err("connection refused".into())),
        });
        let ctl = controller(&dir, invoker.clone())
            .with_retry(RetryExecutor::new(RetryPolicy::new(1, Duration::ZERO, Duration::ZERO)));
        let mut run = Run::new(PipelineState::default());

        let response = ctl
            .dispatch(
                &mut run,
                PipelineRequest::RunAgentsParallel {
                    agent_path: "agents/bugfinder.md".into(),
                    inputs: vec!["slow".into(), "broken".into(), "fast".into()],
                },
            )
            .await
            .unwrap();

        assert_eq!(response.batch_counts(), Some((2, 1)));
        let PipelineResponse::BatchCompleted { outcomes, .. } = response else {
            panic!("expected batch response");
        };
        let inputs: Vec<_> = outcomes.iter().map(|o| o.input.as_str()).collect();
        assert_eq!(inputs, vec!["slow", "broken", "fast"]);
        assert_eq!(outcomes[0].result, Ok("BRANCH: from-slow".to_string()));
        assert!(outcomes[1].result.is_err());
        // Markers land in completion order, so the slow agent wins
        assert_eq!(run.state.marker("branch"), Some("from-slow"));
        assert_eq!(run.state.phases.last().unwrap().status, PhaseStatus::Completed);
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected_without_calls() {
        let dir = project(&["bugfinder"]);
        let invoker = MockInvoker::new(|_| instant("ok"));
        let ctl = controller(&dir, invoker.clone());
        let mut run = Run::new(PipelineState::default());

        let err = ctl
            .dispatch(
                &mut run,
                PipelineRequest::RunAgentsParallel {
                    agent_path: "agents/bugfinder.md".into(),
                    inputs: (0..11).map(|i| i.to_string()).collect(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidRequest(_)));
        assert_eq!(invoker.calls(), 0);
        assert!(run.state.phases.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_agent_is_rejected_before_recording() {
        let dir = project(&["git-setup"]);
        let invoker = MockInvoker::new(|_| instant("ok"));
        let ctl = controller(&dir, invoker.clone());
        let mut run = Run::new(PipelineState::default());

        let err = ctl
            .dispatch(&mut run, run_agent("deployer", "ship"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Unknown agent 'deployer'"));
        assert_eq!(invoker.calls(), 0);
        assert!(run.state.phases.is_empty());
    }

    #[tokio::test]
    async fn test_background_agents_are_joined_before_exit() {
        let dir = project(&["documenter", "git-setup"]);
        let invoker = MockInvoker::new(|input| match input {
            "docs" => (Duration::from_millis(30), Ok("DOCUMENTATION_ADDED: docs/api.md".into())),
            _ => instant("BRANCH: main"),
        });
        let ctl = controller(&dir, invoker.clone());
        let mut planner = ScriptedPlanner::from_requests([
            PipelineRequest::RunAgentBackground {
                agent_path: "agents/documenter.md".into(),
                input: "docs".into(),
            },
            run_agent("git-setup", "branch"),
        ]);

        let summary = ctl
            .run_until("task", &mut planner, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.background_joined, 1);
        assert_eq!(summary.background_failed, 0);
        let state = ctl.store().load();
        assert_eq!(state.marker("documentationAdded"), Some("docs/api.md"));
        assert_eq!(state.marker("branch"), Some("main"));
        let last = state.phases.last().unwrap();
        assert_eq!((last.phase.as_str(), last.status), ("documenter", PhaseStatus::Completed));
    }

    #[tokio::test]
    async fn test_failed_background_agent_is_counted() {
        let dir = project(&["documenter"]);
        let invoker = MockInvoker::new(|_| (Duration::ZERO, Err("permission denied".into())));
        let ctl = controller(&dir, invoker.clone());
        let mut planner = ScriptedPlanner::from_requests([PipelineRequest::RunAgentBackground {
            agent_path: "agents/documenter.md".into(),
            input: "docs".into(),
        }]);

        let summary = ctl
            .run_until("task", &mut planner, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.background_joined, 1);
        assert_eq!(summary.background_failed, 1);
        let last = ctl.store().load().phases.last().cloned().unwrap();
        assert_eq!(last.status, PhaseStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_stops_run_and_releases_lock() {
        let dir = project(&["slowpoke"]);
        let invoker = MockInvoker::new(|_| (Duration::from_secs(3600), Ok("never".into())));
        let ctl = controller(&dir, invoker.clone());
        let mut planner = ScriptedPlanner::from_requests([run_agent("slowpoke", "wait")]);

        let err = ctl
            .run_until(
                "task",
                &mut planner,
                tokio::time::sleep(Duration::from_millis(10)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Interrupted));
        assert_eq!(err.exit_code(), EXIT_INTERRUPTED);
        assert!(!ctl.lock_file().exists());
        let state = ctl.store().load();
        assert_eq!(state.phases.last().unwrap().status, PhaseStatus::Started);
    }

    #[tokio::test]
    async fn test_rollback_resets_tree_then_state() {
        let dir = project(&["git-setup"]);
        let invoker = MockInvoker::new(|_| instant("BASE_COMMIT: abc123\nBRANCH: feature/x"));
        let catalog = AgentCatalog::discover(dir.path().join("agents")).unwrap();
        let tree = Arc::new(RecordingTree::default());
        let ctl = PipelineController::new(dir.path(), catalog, invoker)
            .with_working_tree(tree.clone());
        let mut planner = ScriptedPlanner::from_requests([
            run_agent("git-setup", "branch"),
            PipelineRequest::Rollback {
                confirm: "yes".into(),
            },
        ]);

        ctl.run_until("task", &mut planner, std::future::pending())
            .await
            .unwrap();

        assert_eq!(*tree.resets.lock().unwrap(), vec!["abc123".to_string()]);
        let state = ctl.store().load();
        assert_eq!(state.base_commit(), Some("abc123"));
        assert!(state.marker("branch").is_none());
        assert!(state.rolled_back_at.is_some());
        assert!(state.phases.is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_rollback_touches_nothing() {
        let dir = project(&[]);
        let invoker = MockInvoker::new(|_| instant("ok"));
        let catalog = AgentCatalog::discover(dir.path().join("agents")).unwrap();
        let tree = Arc::new(RecordingTree::default());
        let ctl = PipelineController::new(dir.path(), catalog, invoker)
            .with_working_tree(tree.clone());
        let mut run = Run::new(PipelineState::default());
        run.state.markers.insert(state::BASE_COMMIT.into(), "abc123".into());
        let before = run.state.clone();

        let err = ctl
            .dispatch(&mut run, PipelineRequest::Rollback { confirm: "no".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::State(StateError::RollbackNotConfirmed)));
        assert!(tree.resets.lock().unwrap().is_empty());
        assert_eq!(run.state, before);
    }

    #[tokio::test]
    async fn test_resume_requires_existing_state() {
        let dir = project(&[]);
        let ctl = controller(&dir, MockInvoker::new(|_| instant("ok")));
        let mut planner = ScriptedPlanner::default();

        let err = ctl
            .resume_until(&mut planner, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoResumableState(_)));
        assert!(!ctl.lock_file().exists());
    }

    #[tokio::test]
    async fn test_resume_continues_recorded_run() {
        let dir = project(&["implementer"]);
        let ctl = controller(&dir, MockInvoker::new(|_| instant("ISSUES_FIXED: 2")));
        let mut first = ScriptedPlanner::from_requests([PipelineRequest::UpdateProgress {
            phase: "phase-1".into(),
            status: PhaseStatus::Completed,
            details: Map::new(),
        }]);
        ctl.run_until("fix bugs", &mut first, std::future::pending())
            .await
            .unwrap();

        let mut rest = ScriptedPlanner::from_requests([run_agent("implementer", "fix")]);
        ctl.resume_until(&mut rest, std::future::pending())
            .await
            .unwrap();

        let state = ctl.store().load();
        assert_eq!(state.task.as_deref(), Some("fix bugs"));
        assert_eq!(state.marker("issuesFixed"), Some("2"));
        assert_eq!(state.phases.len(), 3);
        assert_eq!(state.phases[0].phase, "phase-1");
    }

    #[tokio::test]
    async fn test_get_state_returns_snapshot() {
        let dir = project(&[]);
        let ctl = controller(&dir, MockInvoker::new(|_| instant("ok")));
        let mut run = Run::new(PipelineState::default());
        run.state.begin("snapshot me");

        let response = ctl.dispatch(&mut run, PipelineRequest::GetState).await.unwrap();
        match response {
            PipelineResponse::State(state) => assert_eq!(state.task.as_deref(), Some("snapshot me")),
            other => panic!("expected state, got {:?}", other),
        }
    }
}
