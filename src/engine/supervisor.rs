//! Component supervisor
//!
//! Orchestrates create, seed copy, start, stdio attach, exit
//! observation, and pod-wide teardown. Components are created in
//! declared order before any is started; the first exit, or an
//! external stop, terminates the whole pod.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, KillContainerOptions, LogOutput,
    RemoveContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use super::client::Client;
use super::component::{Component, ComponentExit};
use super::create;
use super::error::{EngineError, EngineResult};
use super::output::LinePrefixer;

/// Extra time granted past the grace period before a kill is issued
const KILL_SLACK: Duration = Duration::from_secs(2);

/// Extra time the control loop waits for exit events after kills
const DRAIN_SLACK: Duration = Duration::from_secs(5);

/// Supervises the full component set of one pod
pub struct Supervisor {
    client: Arc<Client>,
    configuration: Arc<Configuration>,
    cancel: CancellationToken,
    state: Mutex<StopState>,
}

#[derive(Default)]
struct StopState {
    stopping: bool,
    grace_override: Option<Duration>,
}

/// Per-component runtime bookkeeping for the control loop
struct Handle {
    name: String,
    container_id: String,
    declared_grace: Option<Duration>,
    started: bool,
}

impl Supervisor {
    pub fn new(client: Arc<Client>, configuration: Arc<Configuration>) -> Self {
        Self {
            client,
            configuration,
            cancel: CancellationToken::new(),
            state: Mutex::new(StopState::default()),
        }
    }

    /// Token cancelled when shutdown begins; clone it to wire external
    /// stop sources into the supervisor
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Initiate graceful shutdown with the given upper bound for
    /// components that declare no grace period of their own. Idempotent.
    pub fn stop(&self, grace: Duration) {
        {
            let mut state = self.state.lock();
            if state.stopping {
                return;
            }
            state.stopping = true;
            state.grace_override = Some(grace);
        }
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Start every component and block until all of them have exited.
    /// Returns one `ComponentExit` per started component; an external
    /// stop surfaces as `EngineError::Cancelled` after teardown.
    pub async fn run(&self, mut components: Vec<Component>) -> EngineResult<Vec<ComponentExit>> {
        if components.is_empty() {
            return Ok(Vec::new());
        }

        // Phase 1: create everything before starting anything, so a
        // recoverable config error never leaves a half-running pod.
        for idx in 0..components.len() {
            let prepared = self.prepare_component(&mut components[idx]).await;
            if let Err(e) = prepared {
                error!("Failed to prepare component {}: {}", components[idx].name, e);
                self.rollback(&components).await;
                return Err(e);
            }
        }

        let mut handles: Vec<Handle> = components
            .iter()
            .map(|component| Handle {
                name: component.name.clone(),
                container_id: component.container_id.clone().unwrap_or_default(),
                declared_grace: component.stop_grace_period,
                started: false,
            })
            .collect();

        // Phase 2: start in declared order
        let (tx, mut rx) = mpsc::channel::<ComponentExit>(components.len());
        for (idx, component) in components.iter().enumerate() {
            match self.start_component(component, &tx).await {
                Ok(()) => handles[idx].started = true,
                Err(e) => {
                    error!("Failed to start component {}: {}", component.name, e);
                    self.broadcast_stop(&handles, &HashSet::new());
                    drop(tx);
                    let exits = self.collect_exits(&handles, &mut rx, true).await;
                    report_exits(&exits);
                    return Err(e);
                }
            }
        }
        drop(tx);

        // Phase 3: supervise until every started component has exited
        let exits = self.collect_exits(&handles, &mut rx, false).await;

        if self.state.lock().stopping {
            report_exits(&exits);
            return Err(EngineError::Cancelled);
        }
        Ok(exits)
    }

    /// Create the component's container and copy its seed files
    async fn prepare_component(&self, component: &mut Component) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        create::create_container(&self.client, &self.configuration, component, &self.cancel)
            .await?;
        create::copy_seed_files(&self.client, component, &self.cancel).await
    }

    /// Attach to the component's output, start it, and spawn its waiter
    async fn start_component(
        &self,
        component: &Component,
        tx: &mpsc::Sender<ComponentExit>,
    ) -> EngineResult<()> {
        let container_id = component
            .container_id
            .clone()
            .ok_or_else(|| EngineError::Other(format!("{} has no container", component.name)))?;

        // Attach before start to capture early output. Losing the
        // stream is not fatal; the component runs on regardless.
        if let Err(e) = self.attach_component(component, &container_id).await {
            warn!(
                "[{}] attach failed, output will be discarded: {}",
                component.name, e
            );
        }

        let start = self
            .client
            .docker()
            .start_container::<String>(&container_id, None);
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
            result = start => result.map_err(EngineError::Docker)?,
        }

        info!("Started component {}", component.name);

        let docker = self.client.docker().clone();
        let name = component.name.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let exit = wait_for_exit(&docker, &name, &container_id).await;
            let _ = tx.send(exit).await;
        });

        Ok(())
    }

    /// Forward the component's stdout/stderr to the process streams,
    /// line by line, prefixed with the component name
    async fn attach_component(
        &self,
        component: &Component,
        container_id: &str,
    ) -> EngineResult<()> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };

        let AttachContainerResults { mut output, .. } = self
            .client
            .docker()
            .attach_container(container_id, Some(options))
            .await?;

        let name = component.name.clone();
        tokio::spawn(async move {
            let mut stdout_lines = LinePrefixer::new(&name);
            let mut stderr_lines = LinePrefixer::new(&name);

            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdErr { message }) => {
                        for line in stderr_lines.push(&message) {
                            eprintln!("{}", line);
                        }
                    }
                    Ok(log) => {
                        let message = log.into_bytes();
                        for line in stdout_lines.push(&message) {
                            println!("{}", line);
                        }
                    }
                    Err(e) => {
                        warn!("[{}] output stream error: {}", name, e);
                        break;
                    }
                }
            }

            if let Some(line) = stdout_lines.flush() {
                println!("{}", line);
            }
            if let Some(line) = stderr_lines.flush() {
                eprintln!("{}", line);
            }
            debug!("[{}] output stream ended", name);
        });

        Ok(())
    }

    /// Consume exit events until every started component is accounted
    /// for. The first exit, external cancellation, or `drain_only`
    /// initiates a pod-wide stop of the remainder.
    async fn collect_exits(
        &self,
        handles: &[Handle],
        rx: &mut mpsc::Receiver<ComponentExit>,
        drain_only: bool,
    ) -> Vec<ComponentExit> {
        let started = handles.iter().filter(|h| h.started).count();
        let mut exits: Vec<ComponentExit> = Vec::with_capacity(started);
        let mut exited: HashSet<String> = HashSet::new();
        let mut stop_requested = drain_only;
        let mut deadline = if drain_only {
            Some(self.drain_deadline(handles, &exited))
        } else {
            None
        };

        while exits.len() < started {
            tokio::select! {
                _ = self.cancel.cancelled(), if !stop_requested => {
                    stop_requested = true;
                    self.broadcast_stop(handles, &exited);
                    deadline = Some(self.drain_deadline(handles, &exited));
                }
                _ = tokio::time::sleep_until(
                    deadline.unwrap_or_else(|| Instant::now() + DRAIN_SLACK)
                ), if deadline.is_some() => {
                    warn!("Gave up waiting for exit events, synthesizing the rest");
                    for handle in handles {
                        if handle.started && !exited.contains(&handle.name) {
                            exits.push(ComponentExit {
                                name: handle.name.clone(),
                                status_code: 0,
                                error: Some("exit not observed before teardown deadline".into()),
                            });
                        }
                    }
                    break;
                }
                received = rx.recv() => match received {
                    Some(exit) => {
                        log_exit(&exit);
                        exited.insert(exit.name.clone());
                        exits.push(exit);
                        if !stop_requested && exits.len() < started {
                            info!("First component exited, stopping the rest");
                            stop_requested = true;
                            self.broadcast_stop(handles, &exited);
                            deadline = Some(self.drain_deadline(handles, &exited));
                        }
                    }
                    None => {
                        for handle in handles {
                            if handle.started && !exited.contains(&handle.name) {
                                exits.push(ComponentExit {
                                    name: handle.name.clone(),
                                    status_code: 0,
                                    error: Some("waiter ended without reporting an exit".into()),
                                });
                            }
                        }
                        break;
                    }
                }
            }
        }

        exits
    }

    /// Issue the stop protocol for every live component. Stops are
    /// broadcast without ordering guarantees; errors are best-effort.
    fn broadcast_stop(&self, handles: &[Handle], exited: &HashSet<String>) {
        let fallback = self.shutdown_grace();
        for handle in handles {
            if handle.container_id.is_empty() || exited.contains(&handle.name) {
                continue;
            }
            let docker = self.client.docker().clone();
            let name = handle.name.clone();
            let container_id = handle.container_id.clone();
            if handle.started {
                let grace = pick_grace(handle.declared_grace, fallback);
                tokio::spawn(async move {
                    stop_component(&docker, &name, &container_id, grace).await;
                });
            } else {
                // Never started: AutoRemove will not fire, remove directly
                tokio::spawn(async move {
                    remove_component(&docker, &name, &container_id).await;
                });
            }
        }
    }

    /// How long the control loop keeps draining after a stop broadcast
    fn drain_deadline(&self, handles: &[Handle], exited: &HashSet<String>) -> Instant {
        let fallback = self.shutdown_grace();
        let max_grace = handles
            .iter()
            .filter(|h| h.started && !exited.contains(&h.name))
            .map(|h| pick_grace(h.declared_grace, fallback))
            .max()
            .unwrap_or(fallback);
        Instant::now() + max_grace + KILL_SLACK + DRAIN_SLACK
    }

    fn shutdown_grace(&self) -> Duration {
        self.state
            .lock()
            .grace_override
            .unwrap_or(self.configuration.stop_grace_period)
    }

    /// Remove every container created so far after a create-phase
    /// failure. Best effort; the error that got us here wins.
    async fn rollback(&self, components: &[Component]) {
        for component in components {
            if let Some(container_id) = &component.container_id {
                remove_component(self.client.docker(), &component.name, container_id).await;
            }
        }
    }
}

/// Grace period for a component: its own declaration when non-zero,
/// the shutdown default otherwise
fn pick_grace(declared: Option<Duration>, fallback: Duration) -> Duration {
    declared.filter(|grace| !grace.is_zero()).unwrap_or(fallback)
}

fn log_exit(exit: &ComponentExit) {
    match (&exit.error, exit.status_code) {
        (Some(error), _) => warn!("Component {} wait failed: {}", exit.name, error),
        (None, 0) => info!("Component {} exited cleanly", exit.name),
        (None, code) => warn!("Component {} exited with status {}", exit.name, code),
    }
}

fn report_exits(exits: &[ComponentExit]) {
    for exit in exits {
        info!(
            "  {} -> {}{}",
            exit.name,
            exit.status_code,
            exit.error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }
}

/// One exit observation per started component
async fn wait_for_exit(docker: &Docker, name: &str, container_id: &str) -> ComponentExit {
    let options = WaitContainerOptions {
        condition: "not-running",
    };
    let mut stream = docker.wait_container(container_id, Some(options));

    match stream.next().await {
        Some(Ok(response)) => ComponentExit {
            name: name.to_string(),
            status_code: response.status_code,
            error: response.error.and_then(|e| e.message),
        },
        // bollard reports non-zero statuses through this error variant
        Some(Err(bollard::errors::Error::DockerContainerWaitError { error, code })) => {
            ComponentExit {
                name: name.to_string(),
                status_code: code,
                error: (!error.is_empty()).then_some(error),
            }
        }
        // Auto-removed before the wait registered: treat as a clean exit
        Some(Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        })) => ComponentExit {
            name: name.to_string(),
            status_code: 0,
            error: None,
        },
        Some(Err(e)) => ComponentExit {
            name: name.to_string(),
            status_code: 0,
            error: Some(e.to_string()),
        },
        None => ComponentExit {
            name: name.to_string(),
            status_code: 0,
            error: Some("wait stream ended unexpectedly".into()),
        },
    }
}

/// Stop protocol: daemon stop with the grace as its timeout, then a
/// bounded wait, then a kill. Removal is AutoRemove's job.
async fn stop_component(docker: &Docker, name: &str, container_id: &str, grace: Duration) {
    debug!("Stopping component {} with {}s grace", name, grace.as_secs());

    let options = StopContainerOptions {
        t: grace.as_secs() as i64,
    };
    match docker.stop_container(container_id, Some(options)).await {
        Ok(_) => {}
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {
            debug!("Component {} already gone", name);
            return;
        }
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => {
            debug!("Component {} already stopped", name);
        }
        Err(e) => warn!("Stop failed for {}: {}", name, e),
    }

    let gone = wait_for_exit(docker, name, container_id);
    if tokio::time::timeout(grace + KILL_SLACK, gone).await.is_err() {
        warn!("Component {} outlived its grace period, killing", name);
        kill_component(docker, name, container_id).await;
    }
}

async fn kill_component(docker: &Docker, name: &str, container_id: &str) {
    let options = KillContainerOptions { signal: "SIGKILL" };
    match docker.kill_container(container_id, Some(options)).await {
        Ok(_) => info!("Killed component {}", name),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => debug!("Component {} already gone", name),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message,
        }) => debug!("Component {} not running: {}", name, message),
        Err(e) => warn!("Kill failed for {}: {}", name, e),
    }
}

async fn remove_component(docker: &Docker, name: &str, container_id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(container_id, Some(options)).await {
        Ok(_) => debug!("Removed container for {}", name),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => debug!("Container for {} already gone", name),
        Err(e) => warn!("Remove failed for {}: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_grace_prefers_nonzero_declaration() {
        let fallback = Duration::from_secs(10);
        assert_eq!(pick_grace(None, fallback), fallback);
        assert_eq!(pick_grace(Some(Duration::ZERO), fallback), fallback);
        assert_eq!(
            pick_grace(Some(Duration::from_secs(3)), fallback),
            Duration::from_secs(3)
        );
    }
}
