//! In-memory runtime used by tests across the workspace.
//!
//! Containers, processes and port assignments live in a mutex-guarded map. Tests can
//! simulate out-of-band drift (containers removed, paused, or stopped behind the
//! orchestrator's back) and inspect which commands were executed.
//!
//! Each container keeps one application log that, like a file in the writable layer,
//! survives stop/start. A detached command redirected with `>` truncates it, and so
//! does a `: > file` script.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, RuntimeError};
use crate::{ContainerRuntime, ContainerSpec, ContainerState, ExecOutput, Observation, Transition};

/// First host port handed out, mirroring the daemon's ephemeral range.
const FIRST_HOST_PORT: u16 = 32768;

#[derive(Debug, Clone)]
struct MockContainer {
    spec: ContainerSpec,
    running: bool,
    paused: bool,
    host_port: Option<u16>,
    processes: Vec<String>,
    app_log: String,
    listening: HashSet<u16>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    images: HashSet<String>,
    pulls: Vec<String>,
    created: Vec<String>,
    execs: Vec<(String, Vec<String>)>,
    detached: Vec<(String, Vec<String>)>,
    next_id: u64,
    next_port: u16,
    fail_create: Option<String>,
    fail_exec: bool,
    failing_scripts: Vec<String>,
}

/// Scripted container runtime.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.next_port == 0 {
            state.next_port = FIRST_HOST_PORT;
        }
        f(&mut state)
    }

    /// Pretend `image` is already present locally.
    pub fn preload_image(&self, image: &str) {
        self.with_state(|s| {
            s.images.insert(image.to_string());
        });
    }

    /// Make the next `create_container` call fail with a daemon error.
    pub fn fail_next_create(&self, message: &str) {
        self.with_state(|s| s.fail_create = Some(message.to_string()));
    }

    /// Make every exec fail as if the daemon refused it.
    pub fn fail_execs(&self, fail: bool) {
        self.with_state(|s| s.fail_exec = fail);
    }

    /// Exec'd `sh -c` scripts containing `needle` exit non-zero.
    pub fn fail_scripts_containing(&self, needle: &str) {
        self.with_state(|s| s.failing_scripts.push(needle.to_string()));
    }

    /// Host port the next published container port will receive.
    pub fn set_next_host_port(&self, port: u16) {
        self.with_state(|s| s.next_port = port);
    }

    /// Delete a container without going through the orchestrator.
    pub fn remove_out_of_band(&self, container: &str) {
        self.with_state(|s| {
            s.containers.remove(container);
        });
    }

    pub fn pause_out_of_band(&self, container: &str) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.paused = true;
            }
        });
    }

    pub fn stop_out_of_band(&self, container: &str) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.running = false;
                c.paused = false;
                c.processes.clear();
                c.listening.clear();
            }
        });
    }

    /// Kill every process launched inside a still-running container.
    pub fn kill_processes(&self, container: &str) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.processes.clear();
                c.listening.clear();
            }
        });
    }

    /// Append output to the application log, as a running app would.
    pub fn append_app_log(&self, container: &str, text: &str) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.app_log.push_str(text);
                c.app_log.push('\n');
            }
        });
    }

    pub fn app_log(&self, container: &str) -> String {
        self.with_state(|s| {
            s.containers
                .get(container)
                .map(|c| c.app_log.clone())
                .unwrap_or_default()
        })
    }

    /// Something inside the container now listens on `port`.
    pub fn listen(&self, container: &str, port: u16) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.listening.insert(port);
            }
        });
    }

    /// Rebind a container's published port to a new host port.
    pub fn rebind_port(&self, container: &str, host_port: u16) {
        self.with_state(|s| {
            if let Some(c) = s.containers.get_mut(container) {
                c.host_port = Some(host_port);
            }
        });
    }

    pub fn container_exists(&self, container: &str) -> bool {
        self.with_state(|s| s.containers.contains_key(container))
    }

    pub fn is_running(&self, container: &str) -> bool {
        self.with_state(|s| s.containers.get(container).is_some_and(|c| c.running))
    }

    pub fn container_spec(&self, container: &str) -> Option<ContainerSpec> {
        self.with_state(|s| s.containers.get(container).map(|c| c.spec.clone()))
    }

    pub fn container_count(&self) -> usize {
        self.with_state(|s| s.containers.len())
    }

    /// Total containers ever created.
    pub fn created_count(&self) -> usize {
        self.with_state(|s| s.created.len())
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.with_state(|s| s.pulls.clone())
    }

    /// Attached exec commands issued against `container`.
    pub fn execs_for(&self, container: &str) -> Vec<Vec<String>> {
        self.with_state(|s| {
            s.execs
                .iter()
                .filter(|(c, _)| c == container)
                .map(|(_, cmd)| cmd.clone())
                .collect()
        })
    }

    /// Detached exec commands issued against `container`.
    pub fn detached_for(&self, container: &str) -> Vec<Vec<String>> {
        self.with_state(|s| {
            s.detached
                .iter()
                .filter(|(c, _)| c == container)
                .map(|(_, cmd)| cmd.clone())
                .collect()
        })
    }

    pub fn total_detached(&self) -> usize {
        self.with_state(|s| s.detached.len())
    }

    fn listing(container: &MockContainer) -> String {
        let mut out = String::from("PID   USER     TIME  COMMAND\n");
        out.push_str("    1 root      0:00 ");
        out.push_str(&container.spec.cmd.join(" "));
        out.push('\n');
        for (i, process) in container.processes.iter().enumerate() {
            out.push_str(&format!("{:>5} root      0:00 {}\n", 40 + i, process));
        }
        out
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.with_state(|s| {
            if s.images.insert(image.to_string()) {
                s.pulls.push(image.to_string());
            }
        });
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.with_state(|s| {
            if let Some(message) = s.fail_create.take() {
                return Err(RuntimeError::Daemon {
                    operation: "create",
                    target: spec.name.clone(),
                    status: 500,
                    message,
                });
            }
            if s.containers.values().any(|c| c.spec.name == spec.name) {
                return Err(RuntimeError::Daemon {
                    operation: "create",
                    target: spec.name.clone(),
                    status: 409,
                    message: format!("Conflict. The container name \"{}\" is already in use", spec.name),
                });
            }

            s.next_id += 1;
            let id = format!("mock{:012x}", s.next_id);
            s.containers.insert(
                id.clone(),
                MockContainer {
                    spec: spec.clone(),
                    running: false,
                    paused: false,
                    host_port: None,
                    processes: Vec::new(),
                    app_log: String::new(),
                    listening: HashSet::new(),
                },
            );
            s.created.push(id.clone());
            Ok(id)
        })
    }

    async fn start(&self, container: &str) -> Result<Transition> {
        Ok(self.with_state(|s| {
            let next_port = s.next_port;
            let Some(c) = s.containers.get_mut(container) else {
                return Transition::Missing;
            };
            if c.running {
                return Transition::AlreadyInState;
            }
            c.running = true;
            c.paused = false;
            // The daemon reassigns ephemeral ports on every start
            let assigned = c.spec.published_port.map(|_| next_port);
            c.host_port = assigned;
            if assigned.is_some() {
                s.next_port = next_port.wrapping_add(1);
            }
            Transition::Applied
        }))
    }

    async fn stop(&self, container: &str, _grace: Duration) -> Result<Transition> {
        Ok(self.with_state(|s| {
            let Some(c) = s.containers.get_mut(container) else {
                return Transition::Missing;
            };
            if !c.running {
                return Transition::AlreadyInState;
            }
            c.running = false;
            c.paused = false;
            c.host_port = None;
            c.processes.clear();
            c.listening.clear();
            Transition::Applied
        }))
    }

    async fn unpause(&self, container: &str) -> Result<Transition> {
        Ok(self.with_state(|s| {
            let Some(c) = s.containers.get_mut(container) else {
                return Transition::Missing;
            };
            if !c.paused {
                return Transition::AlreadyInState;
            }
            c.paused = false;
            Transition::Applied
        }))
    }

    async fn remove(&self, container: &str) -> Result<Transition> {
        Ok(self.with_state(|s| match s.containers.remove(container) {
            Some(_) => Transition::Applied,
            None => Transition::Missing,
        }))
    }

    async fn inspect(&self, container: &str) -> Result<Observation> {
        Ok(self.with_state(|s| match s.containers.get(container) {
            Some(c) => {
                let mut port_bindings = BTreeMap::new();
                if let (Some(port), Some(host), true) = (c.spec.published_port, c.host_port, c.running) {
                    port_bindings.insert(port, host);
                }
                Observation::Present(ContainerState {
                    running: c.running,
                    paused: c.paused,
                    port_bindings,
                })
            }
            None => Observation::Missing,
        }))
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutput> {
        self.with_state(|s| {
            if s.fail_exec {
                return Err(RuntimeError::Daemon {
                    operation: "exec",
                    target: container.to_string(),
                    status: 500,
                    message: "exec refused".to_string(),
                });
            }
            let failing = s.failing_scripts.clone();
            let Some(c) = s.containers.get_mut(container) else {
                return Err(RuntimeError::ContainerMissing(container.to_string()));
            };
            if !c.running {
                return Err(RuntimeError::Daemon {
                    operation: "exec",
                    target: container.to_string(),
                    status: 409,
                    message: format!("Container {} is not running", container),
                });
            }

            let output = match cmd.first().map(String::as_str) {
                Some("ps") => ExecOutput {
                    exit_code: 0,
                    stdout: Self::listing(c),
                    stderr: String::new(),
                },
                Some("sh") if cmd.len() == 3 => {
                    let script = &cmd[2];
                    if failing.iter().any(|needle| script.contains(needle.as_str())) {
                        ExecOutput {
                            exit_code: 1,
                            stdout: String::new(),
                            stderr: format!("sh: {}: failed", script),
                        }
                    } else if script.starts_with(": > ") {
                        c.app_log.clear();
                        ExecOutput::default()
                    } else if script.contains("grep") {
                        let needle = script.split('\'').nth(1).unwrap_or_default();
                        let hit = if script.contains("grep -qF") {
                            !needle.is_empty() && c.app_log.contains(needle)
                        } else {
                            // Listening-socket check, the needle is ":<port> "
                            needle
                                .trim()
                                .trim_start_matches(':')
                                .parse::<u16>()
                                .is_ok_and(|port| c.listening.contains(&port))
                        };
                        ExecOutput {
                            exit_code: if hit { 0 } else { 1 },
                            ..Default::default()
                        }
                    } else {
                        ExecOutput::default()
                    }
                }
                _ => ExecOutput::default(),
            };

            s.execs.push((container.to_string(), cmd.to_vec()));
            Ok(output)
        })
    }

    async fn exec_detached(&self, container: &str, cmd: &[String]) -> Result<()> {
        self.with_state(|s| {
            if s.fail_exec {
                return Err(RuntimeError::Daemon {
                    operation: "exec",
                    target: container.to_string(),
                    status: 500,
                    message: "exec refused".to_string(),
                });
            }
            let Some(c) = s.containers.get_mut(container) else {
                return Err(RuntimeError::ContainerMissing(container.to_string()));
            };
            if cmd.last().is_some_and(|script| script.contains(" > ")) {
                c.app_log.clear();
            }
            c.processes.push(cmd.join(" "));
            s.detached.push((container.to_string(), cmd.to_vec()));
            Ok(())
        })
    }
}
