//! Chunking orchestrator: drives the external chunking engine.
//!
//! The engine is a separate process speaking a line-based protocol:
//! progress as newline-delimited JSON on its diagnostic stream, a final
//! result object on its output stream. The orchestrator spawns it in its
//! own process group, relays progress to the channel, persists
//! milestones, and turns the final result into a persisted chunk set.

use crate::channel::ProgressChannel;
use crate::checkpoint::{self, ResumeCheck};
use crate::event::{ChunkProgress, ChunkStatus, PipelineEvent};
use crate::jobs::{ChunkingConfig, ChunkingJob, JobStatus, JobStore, TERMINAL_GRACE};
use chrono::Utc;
use ragmill_core::{paths, AppConfig, AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

/// Non-progress engine output lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Final result object the engine prints on stdout.
#[derive(Debug, Deserialize)]
struct EngineResult {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    resumable: Option<bool>,
    #[serde(default)]
    chunks_count: Option<u64>,
}

/// One chunk as the engine emits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub tokens: u64,
}

/// The engine's output file: the persisted chunk set of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSet {
    pub method: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub processed_files: Vec<String>,
    pub chunks: Vec<ChunkRecord>,
    #[serde(default)]
    pub stats: serde_json::Value,
}

impl ChunkSet {
    /// Load a project's chunk set, or `NoChunks` if none is persisted.
    pub async fn load(data_dir: &Path, project_id: &str) -> AppResult<Self> {
        let path = paths::chunks_file(data_dir, project_id);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NoChunks(project_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Outcome of a start request.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub job_id: String,
    /// True when the request attached to an already running job
    pub joined: bool,
}

struct ActiveRun {
    job_id: String,
    pid: Option<u32>,
}

/// Spawns and supervises chunking engine runs, one per project.
pub struct ChunkingOrchestrator {
    config: AppConfig,
    store: Arc<JobStore>,
    channel: Arc<ProgressChannel>,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl ChunkingOrchestrator {
    pub fn new(config: AppConfig, store: Arc<JobStore>, channel: Arc<ProgressChannel>) -> Self {
        Self {
            config,
            store,
            channel,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start a chunking run for a project.
    ///
    /// A second start while a run is live is not an error: the caller
    /// joins the existing job, whether it was started here or by another
    /// process (the record carries the engine's group id, and a liveness
    /// probe tells a running job from a leftover record). A non-terminal
    /// record with no live process is cleared and a fresh run started.
    pub async fn start(
        self: &Arc<Self>,
        project_id: &str,
        chunk_config: ChunkingConfig,
        resume: bool,
    ) -> AppResult<StartOutcome> {
        // Reserve the project before the first await; concurrent starts
        // in this process must agree on one job id.
        let job_id = Uuid::new_v4().to_string();
        {
            let mut active = self.active.lock().unwrap();
            if let Some(run) = active.get(project_id) {
                tracing::info!(
                    "Chunking already running for project '{}', joining job {}",
                    project_id,
                    run.job_id
                );
                return Ok(StartOutcome {
                    job_id: run.job_id.clone(),
                    joined: true,
                });
            }
            active.insert(
                project_id.to_string(),
                ActiveRun {
                    job_id: job_id.clone(),
                    pid: None,
                },
            );
        }

        match self.launch(project_id, &job_id, chunk_config, resume).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.active.lock().unwrap().remove(project_id);
                Err(e)
            }
        }
    }

    async fn launch(
        self: &Arc<Self>,
        project_id: &str,
        job_id: &str,
        chunk_config: ChunkingConfig,
        resume: bool,
    ) -> AppResult<StartOutcome> {
        let job_path = paths::job_file(&self.config.data_dir, project_id);
        if let Some(existing) = self.store.read(&job_path).await? {
            if !existing.status.is_terminal() {
                if let Some(pid) = existing.pid.filter(|&pid| process_alive(pid)) {
                    // Another process owns this job; join it instead of
                    // clearing its record.
                    tracing::info!(
                        "Job {} for project '{}' is live in another process (pid {}), joining",
                        existing.job_id,
                        project_id,
                        pid
                    );
                    self.active.lock().unwrap().remove(project_id);
                    return Ok(StartOutcome {
                        job_id: existing.job_id,
                        joined: true,
                    });
                }
                tracing::warn!(
                    "Job record for project '{}' claims in-progress but no process is alive, clearing",
                    project_id
                );
                self.store.delete(&job_path).await?;
            }
        }

        let job = ChunkingJob::new(job_id.to_string(), chunk_config.clone(), resume);
        self.store.write(&job_path, &job).await?;

        let uploads = paths::uploads_dir(&self.config.data_dir, project_id);
        let raw_output = paths::raw_chunks_file(&self.config.data_dir, project_id);
        tokio::fs::create_dir_all(&uploads).await?;
        if let Some(parent) = raw_output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let child = match self.spawn_engine(&chunk_config, &uploads, &raw_output, resume) {
            Ok(child) => child,
            Err(e) => {
                self.store.delete(&job_path).await?;
                return Err(e);
            }
        };
        let pid = child.id();

        if let Some(run) = self.active.lock().unwrap().get_mut(project_id) {
            run.pid = pid;
        }
        if let Some(pid) = pid {
            let fallback = job.clone();
            self.store
                .update(&job_path, move || fallback, |record| record.pid = Some(pid))
                .await?;
        }

        tracing::info!(
            "Started chunking job {} for project '{}' (pid {:?}, resume: {})",
            job_id,
            project_id,
            pid,
            resume
        );

        let this = Arc::clone(self);
        let project = project_id.to_string();
        let monitor_job_id = job_id.to_string();
        tokio::spawn(async move {
            this.monitor(child, &project, &monitor_job_id).await;
        });

        Ok(StartOutcome {
            job_id: job_id.to_string(),
            joined: false,
        })
    }

    fn spawn_engine(
        &self,
        chunk_config: &ChunkingConfig,
        input_dir: &Path,
        output_file: &Path,
        resume: bool,
    ) -> AppResult<Child> {
        let mut command = Command::new(&self.config.engine.command);
        command
            .arg(&self.config.engine.script)
            .args(chunk_config.to_args(input_dir, output_file, resume))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so stop() can kill the engine together with
        // any workers it forks.
        #[cfg(unix)]
        command.process_group(0);

        Ok(command.spawn()?)
    }

    /// Stop a project's running job, killing the engine's whole process
    /// group. Returns false when there was nothing to stop.
    pub async fn stop(self: &Arc<Self>, project_id: &str) -> AppResult<bool> {
        let job_path = paths::job_file(&self.config.data_dir, project_id);
        let run = self.active.lock().unwrap().remove(project_id);

        let Some(run) = run else {
            // Not ours: the engine may belong to another process. The
            // record carries its group id; a liveness probe tells a
            // running engine from an orphaned record.
            let Some(existing) = self.store.read(&job_path).await? else {
                return Ok(false);
            };
            if existing.status.is_terminal() {
                return Ok(false);
            }

            let job_id = existing.job_id.clone();
            self.mark_stopped(&job_path, &job_id).await?;
            match existing.pid.filter(|&pid| process_alive(pid)) {
                Some(pid) => {
                    kill_process_group(pid);
                    tracing::info!(
                        "Stopped chunking job {} for project '{}' (pid {}, other process)",
                        job_id,
                        project_id,
                        pid
                    );
                }
                None => {
                    tracing::warn!(
                        "Marking orphaned job {} for project '{}' as stopped",
                        job_id,
                        project_id
                    );
                }
            }
            self.channel
                .publish(&job_id, PipelineEvent::ChunkingStopped { job_id: job_id.clone() });
            self.store.schedule_cleanup(job_path, TERMINAL_GRACE);
            return Ok(true);
        };

        // Mark first so the monitor sees the stop when the kill lands.
        self.mark_stopped(&job_path, &run.job_id).await?;

        if let Some(pid) = run.pid {
            kill_process_group(pid);
            tracing::info!(
                "Stopped chunking job {} for project '{}' (pid {})",
                run.job_id,
                project_id,
                pid
            );
        }

        self.channel.publish(
            &run.job_id,
            PipelineEvent::ChunkingStopped {
                job_id: run.job_id.clone(),
            },
        );
        self.store.schedule_cleanup(job_path, TERMINAL_GRACE);
        Ok(true)
    }

    async fn mark_stopped(&self, job_path: &Path, job_id: &str) -> AppResult<()> {
        let fallback_id = job_id.to_string();
        self.store
            .update(
                job_path,
                || ChunkingJob::new(fallback_id, ChunkingConfig::default(), false),
                |job| job.status = JobStatus::Stopped,
            )
            .await?;
        Ok(())
    }

    /// Current job record for a project, if any.
    ///
    /// Terminal records past the grace period are swept here: the
    /// delayed cleanup task does not survive short-lived invocations.
    pub async fn status(&self, project_id: &str) -> AppResult<Option<ChunkingJob>> {
        let job_path = paths::job_file(&self.config.data_dir, project_id);
        let Some(job) = self.store.read(&job_path).await? else {
            return Ok(None);
        };

        if job.status.is_terminal() {
            let age = Utc::now().signed_duration_since(job.updated_at);
            if age.to_std().map_or(false, |age| age >= TERMINAL_GRACE) {
                tracing::debug!("Sweeping expired terminal job record for '{}'", project_id);
                self.store.delete(&job_path).await?;
                return Ok(None);
            }
        }
        Ok(Some(job))
    }

    /// Delete a project's chunk data: the chunk set, engine scratch
    /// output, checkpoint, and job record. Refused while a job is live.
    pub async fn delete_chunks(&self, project_id: &str) -> AppResult<()> {
        let busy = self.active.lock().unwrap().contains_key(project_id);
        if busy {
            return Err(AppError::Other(format!(
                "Chunking is running for project '{}'; stop it first",
                project_id
            )));
        }
        let job_path = paths::job_file(&self.config.data_dir, project_id);
        if let Some(existing) = self.store.read(&job_path).await? {
            if !existing.status.is_terminal() && existing.pid.map_or(false, process_alive) {
                return Err(AppError::Other(format!(
                    "Chunking is running for project '{}'; stop it first",
                    project_id
                )));
            }
        }

        for file in [
            paths::chunks_file(&self.config.data_dir, project_id),
            paths::checkpoint_file(&self.config.data_dir, project_id),
        ] {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        match tokio::fs::remove_dir_all(paths::work_dir(&self.config.data_dir, project_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.store.delete(&job_path).await?;
        tracing::info!("Deleted chunk data for project '{}'", project_id);
        Ok(())
    }

    /// Whether an interrupted run can be resumed.
    pub async fn resume_check(&self, project_id: &str) -> ResumeCheck {
        let path = paths::checkpoint_file(&self.config.data_dir, project_id);
        checkpoint::check_resumable(&path).await
    }

    async fn monitor(self: Arc<Self>, mut child: Child, project_id: &str, job_id: &str) {
        let job_path = paths::job_file(&self.config.data_dir, project_id);

        let stderr = child.stderr.take();
        let stdout = child.stdout.take();

        let stdout_task = tokio::spawn(async move {
            let mut buffer = String::new();
            if let Some(stdout) = stdout {
                let _ = BufReader::new(stdout).read_to_string(&mut buffer).await;
            }
            buffer
        });

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                self.handle_engine_line(&job_path, job_id, &line, &mut tail)
                    .await;
            }
        }

        let exit = child.wait().await;
        let stdout_text = stdout_task.await.unwrap_or_default();

        // A stop marked the record already; the kill-induced exit is not
        // a failure.
        match self.store.read(&job_path).await {
            Ok(Some(job)) if job.status == JobStatus::Stopped => {
                self.active.lock().unwrap().remove(project_id);
                return;
            }
            _ => {}
        }

        let outcome = match exit {
            Ok(status) if status.success() => {
                self.finish_success(project_id, job_id, &stdout_text, &tail)
                    .await
            }
            Ok(status) => Err(AppError::ProcessExit {
                code: status.code(),
                detail: tail_text(&tail),
            }),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = outcome {
            let error = e.to_string();
            tracing::error!("Chunking job {} failed: {}", job_id, error);
            let fallback_id = job_id.to_string();
            let record_error = error.clone();
            let _ = self
                .store
                .update(
                    &job_path,
                    || ChunkingJob::new(fallback_id, ChunkingConfig::default(), false),
                    move |job| {
                        job.status = JobStatus::Failed;
                        job.error = Some(record_error);
                    },
                )
                .await;
            self.channel.publish(
                job_id,
                PipelineEvent::ChunkingFailed {
                    job_id: job_id.to_string(),
                    error,
                },
            );
        }

        self.active.lock().unwrap().remove(project_id);
        self.store.schedule_cleanup(job_path, TERMINAL_GRACE);
    }

    async fn handle_engine_line(
        &self,
        job_path: &Path,
        job_id: &str,
        line: &str,
        tail: &mut VecDeque<String>,
    ) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if let Ok(progress) = serde_json::from_str::<ChunkProgress>(trimmed) {
            if progress.status == ChunkStatus::Error {
                tracing::warn!(
                    "Engine reported file error in job {}: {:?} ({})",
                    job_id,
                    progress.file,
                    progress.error.as_deref().unwrap_or("unknown")
                );
            }
            if progress.is_persistent() {
                let fallback_id = job_id.to_string();
                let _ = self
                    .store
                    .record_progress(
                        job_path,
                        || ChunkingJob::new(fallback_id, ChunkingConfig::default(), false),
                        &progress,
                    )
                    .await;
            }
            self.channel.publish(
                job_id,
                PipelineEvent::Chunking {
                    job_id: job_id.to_string(),
                    progress,
                },
            );
            return;
        }

        // Non-progress lines: engine logs, or tracebacks worth keeping
        // for diagnostics.
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) if value.get("info").is_some() => {
                tracing::info!("engine: {}", value["info"].as_str().unwrap_or(trimmed));
            }
            Ok(value) if value.get("warning").is_some() => {
                tracing::warn!("engine: {}", value["warning"].as_str().unwrap_or(trimmed));
            }
            _ => {
                tracing::debug!("engine: {}", trimmed);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(trimmed.to_string());
            }
        }
    }

    async fn finish_success(
        &self,
        project_id: &str,
        job_id: &str,
        stdout_text: &str,
        tail: &VecDeque<String>,
    ) -> AppResult<()> {
        let result: EngineResult = serde_json::from_str(stdout_text.trim()).map_err(|e| {
            AppError::ResultParse(format!("{} (stdout: {:?})", e, truncated(stdout_text, 200)))
        })?;

        if !result.success {
            let detail = result
                .error
                .unwrap_or_else(|| tail_text(tail));
            if result.resumable == Some(true) {
                tracing::info!("Job {} failed but left a resumable checkpoint", job_id);
            }
            return Err(AppError::ProcessExit { code: Some(0), detail });
        }

        // Engine wrote its output into the work directory; validate it
        // and promote it to the project's chunk set atomically.
        let raw_path = paths::raw_chunks_file(&self.config.data_dir, project_id);
        let content = tokio::fs::read(&raw_path).await?;
        let chunk_set: ChunkSet = serde_json::from_slice(&content)
            .map_err(|e| AppError::ResultParse(format!("chunk output: {}", e)))?;
        let chunk_count = chunk_set.chunks.len() as u64;

        let chunks_path = paths::chunks_file(&self.config.data_dir, project_id);
        let tmp = chunks_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &chunks_path).await?;

        if let Some(reported) = result.chunks_count {
            if reported != chunk_count {
                tracing::warn!(
                    "Engine reported {} chunks but output file has {}",
                    reported,
                    chunk_count
                );
            }
        }

        let job_path = paths::job_file(&self.config.data_dir, project_id);
        let fallback_id = job_id.to_string();
        self.store
            .update(
                &job_path,
                || ChunkingJob::new(fallback_id, ChunkingConfig::default(), false),
                |job| job.status = JobStatus::Completed,
            )
            .await?;

        tracing::info!(
            "Chunking job {} completed with {} chunks for project '{}'",
            job_id,
            chunk_count,
            project_id
        );
        self.channel.publish(
            job_id,
            PipelineEvent::ChunkingCompleted {
                job_id: job_id.to_string(),
                chunk_count,
            },
        );
        Ok(())
    }
}

fn tail_text(tail: &VecDeque<String>) -> String {
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn truncated(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::warn!("Failed to kill engine process group {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) {
    tracing::warn!("Process-group kill not supported on this platform (pid {})", pid);
}

/// Whether a process with this id still exists (signal 0 probe).
/// A reused pid can alias an unrelated process; the window is accepted.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}
