//! Process Supervisor
//!
//! Launches daemons as child processes. An already running instance is
//! recognized by scanning `/proc/*/cmdline` for the launch pattern.

use crate::domain::ports::{ProcessHandle, ProcessSupervisor, StartPolicy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const PROC_ROOT: &str = "/proc";

/// `tokio::process` backed supervisor
pub struct ProcessManager {
    /// Logical process name -> executable
    programs: HashMap<String, String>,
    proc_root: PathBuf,
    next_handle: AtomicU64,
    children: Mutex<HashMap<u64, Child>>,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new(PROC_ROOT)
    }
}

impl ProcessManager {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        let mut programs = HashMap::new();
        programs.insert("osd".to_string(), "ceph-osd".to_string());
        Self {
            programs,
            proc_root: proc_root.into(),
            next_handle: AtomicU64::new(1),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Map a logical process name to an executable
    pub fn with_program(mut self, name: impl Into<String>, program: impl Into<String>) -> Self {
        self.programs.insert(name.into(), program.into());
        self
    }

    fn program<'a>(&'a self, name: &'a str) -> &'a str {
        self.programs.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Number of children started by this manager and not yet stopped
    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    /// Wait on children that exited by themselves and drop them. Returns
    /// how many were reaped.
    pub fn reap_exited(&self) -> usize {
        let mut children = self.children.lock();
        let before = children.len();
        children.retain(|handle_id, child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(handle_id, %status, "process exited");
                false
            }
            Err(e) => {
                warn!(handle_id, "failed to poll process: {}", e);
                true
            }
        });
        before - children.len()
    }

    async fn pid_alive(&self, pid: u32) -> bool {
        tokio::fs::metadata(self.proc_root.join(pid.to_string()))
            .await
            .is_ok()
    }

    async fn kill_pid(pid: u32) -> Result<()> {
        let status = Command::new("kill")
            .arg(pid.to_string())
            .status()
            .await
            .map_err(|e| Error::ProcessStop {
                name: pid.to_string(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            return Err(Error::ProcessStop {
                name: pid.to_string(),
                reason: format!("kill exited with {}", status),
            });
        }
        Ok(())
    }
}

/// Pids whose command line contains `pattern`. Arguments are NUL separated
/// in procfs and are joined with spaces before matching.
pub async fn find_running(proc_root: &Path, pattern: &str) -> Vec<u32> {
    let own_pid = std::process::id();
    let glob_pattern = proc_root.join("*").join("cmdline");

    let paths: Vec<PathBuf> = match glob::glob(&glob_pattern.to_string_lossy()) {
        Ok(paths) => paths.filter_map(|p| p.ok()).collect(),
        Err(e) => {
            warn!("invalid proc pattern: {}", e);
            return Vec::new();
        }
    };

    let mut pids = Vec::new();
    for path in paths {
        let Some(pid) = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        // processes may exit while we scan
        let Ok(raw) = tokio::fs::read(&path).await else {
            continue;
        };
        let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
        if cmdline.contains(pattern) {
            pids.push(pid);
        }
    }

    pids.sort_unstable();
    pids
}

#[async_trait]
impl ProcessSupervisor for ProcessManager {
    async fn start(
        &self,
        name: &str,
        launch_pattern: &str,
        policy: StartPolicy,
        args: &[String],
    ) -> Result<Option<ProcessHandle>> {
        self.reap_exited();
        let running = find_running(&self.proc_root, launch_pattern).await;
        if !running.is_empty() {
            match policy {
                StartPolicy::ReuseExisting => {
                    info!(name, pids = ?running, "process already running, reusing it");
                    return Ok(None);
                }
                StartPolicy::ReplaceExisting => {
                    for pid in running {
                        info!(name, pid, "stopping existing process");
                        Self::kill_pid(pid).await?;
                    }
                }
            }
        }

        let program = self.program(name);
        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| Error::Command {
                command: program.to_string(),
                reason: e.to_string(),
            })?;

        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        self.children.lock().insert(handle_id, child);

        info!(name, ?pid, handle_id, "started process");
        Ok(Some(ProcessHandle {
            handle_id,
            name: name.to_string(),
            pid,
            launch_pattern: launch_pattern.to_string(),
            started_at: Utc::now(),
        }))
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<()> {
        self.reap_exited();
        let child = self.children.lock().remove(&handle.handle_id);

        match child {
            Some(mut child) => {
                child.kill().await.map_err(|e| Error::ProcessStop {
                    name: handle.name.clone(),
                    reason: e.to_string(),
                })?;
            }
            None => match handle.pid {
                Some(pid) if !self.pid_alive(pid).await => {
                    debug!(name = %handle.name, pid, "process already exited");
                }
                Some(pid) => Self::kill_pid(pid).await?,
                None => {
                    return Err(Error::ProcessStop {
                        name: handle.name.clone(),
                        reason: "unknown process".into(),
                    })
                }
            },
        }

        debug!(name = %handle.name, handle_id = handle.handle_id, "stopped process");
        Ok(())
    }
}
