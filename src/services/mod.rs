//! Supervision of local helper services.
//!
//! The TTS/STT/room servers are opaque processes: this module starts and
//! stops them, tracks them through pidfiles, and reports status. Nothing
//! here runs on the turn path; the engine only reads `status` to produce
//! helpful errors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use sysinfo::{Pid, System};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::paths::Paths;
use crate::config::Settings;
use crate::error::{Result, VoiceError};

/// Services this supervisor knows how to manage.
const KNOWN: &[(&str, u16)] = &[("kokoro", 8880), ("whisper", 2022), ("livekit", 7880)];

const HEALTH_WAIT_SECS: u64 = 15;

/// Point-in-time view of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    pub port: u16,
    pub healthy: Option<bool>,
}

/// Platform hook for boot-time enablement (systemd, launchd). The shipped
/// build carries only the stub; the trait is the seam.
pub trait ServiceManager: Send + Sync {
    fn enable(&self, name: &str) -> Result<()>;
    fn disable(&self, name: &str) -> Result<()>;
}

/// Default: no platform integration compiled in.
pub struct NoopServiceManager;

impl ServiceManager for NoopServiceManager {
    fn enable(&self, name: &str) -> Result<()> {
        Err(VoiceError::Internal(format!(
            "boot-time enablement for {name} is not supported in this build"
        )))
    }

    fn disable(&self, name: &str) -> Result<()> {
        Err(VoiceError::Internal(format!(
            "boot-time enablement for {name} is not supported in this build"
        )))
    }
}

pub struct Supervisor {
    settings: Arc<Settings>,
    paths: Paths,
    client: Client,
    /// Children spawned by this process; keyed by service name.
    children: Mutex<HashMap<String, Child>>,
}

impl Supervisor {
    pub fn new(settings: Arc<Settings>, client: Client) -> Self {
        let paths = settings.paths();
        Self {
            settings,
            paths,
            client,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn known_services() -> Vec<&'static str> {
        KNOWN.iter().map(|(name, _)| *name).collect()
    }

    fn port_of(name: &str) -> Result<u16> {
        KNOWN
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, port)| *port)
            .ok_or_else(|| VoiceError::Internal(format!("unknown service: {name}")))
    }

    /// Report one service's process and health state.
    pub async fn status(&self, name: &str) -> Result<ServiceStatus> {
        let port = Self::port_of(name)?;
        let pid = read_pidfile(&self.paths.pidfile(name));

        let mut status = ServiceStatus {
            name: name.to_string(),
            running: false,
            pid: None,
            uptime_s: None,
            memory_mb: None,
            port,
            healthy: None,
        };

        if let Some(pid) = pid {
            let system = System::new_all();
            if let Some(process) = system.process(Pid::from_u32(pid)) {
                status.running = true;
                status.pid = Some(pid);
                status.uptime_s = Some(process.run_time());
                status.memory_mb = Some(process.memory() / (1024 * 1024));
            }
        }

        if status.running {
            status.healthy = Some(self.probe_port(port).await);
        }

        Ok(status)
    }

    /// Status of every known service.
    pub async fn status_all(&self) -> Vec<ServiceStatus> {
        let mut out = Vec::new();
        for (name, _) in KNOWN {
            if let Ok(status) = self.status(name).await {
                out.push(status);
            }
        }
        out
    }

    /// Spawn a service from its configured command line and wait for its
    /// health endpoint to come up.
    pub async fn start(&self, name: &str, extra_args: &[String]) -> Result<ServiceStatus> {
        let port = Self::port_of(name)?;

        let current = self.status(name).await?;
        if current.running {
            return Err(VoiceError::Internal(format!("{name} is already running")));
        }

        let command_var = format!("VOICEMODE_{}_COMMAND", name.to_uppercase());
        let raw = std::env::var(&command_var)
            .map_err(|_| VoiceError::Config(format!("{command_var} is not set; cannot start {name}")))?;
        let mut parts = raw.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| VoiceError::Config(format!("{command_var} is empty")))?;

        std::fs::create_dir_all(self.paths.logs_dir())
            .map_err(|e| VoiceError::Internal(format!("cannot create log dir: {e}")))?;
        let log_path = self.paths.service_log(name);
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| VoiceError::Internal(format!("cannot open {}: {e}", log_path.display())))?;
        let log_err = log_file
            .try_clone()
            .map_err(|e| VoiceError::Internal(format!("cannot clone log handle: {e}")))?;

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);

        let child = cmd
            .spawn()
            .map_err(|e| VoiceError::Internal(format!("failed to spawn {name}: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| VoiceError::Internal(format!("{name} exited immediately")))?;

        info!(name, pid, "Service started");

        if let Err(e) = write_pidfile(&self.paths.pidfile(name), pid) {
            // Non-fatal: status degrades to "not tracked" on restart.
            warn!("Failed to write pidfile for {}: {}", name, e);
        }

        self.children.lock().await.insert(name.to_string(), child);
        self.wait_for_health(name, port).await;
        self.status(name).await
    }

    /// Stop a service; tolerates processes this supervisor did not spawn.
    pub async fn stop(&self, name: &str) -> Result<()> {
        Self::port_of(name)?;
        let pidfile = self.paths.pidfile(name);

        if let Some(mut child) = self.children.lock().await.remove(name) {
            if let Err(e) = child.start_kill() {
                debug!("start_kill for {} failed (already gone?): {}", name, e);
            }
            let _ = child.wait().await;
        } else if let Some(pid) = read_pidfile(&pidfile) {
            let system = System::new_all();
            if let Some(process) = system.process(Pid::from_u32(pid)) {
                process.kill();
            }
        }

        if pidfile.exists() {
            let _ = std::fs::remove_file(&pidfile);
        }
        info!(name, "Service stopped");
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> Result<ServiceStatus> {
        self.stop(name).await?;
        self.start(name, &[]).await
    }

    /// Tail the last `n` lines of a service's log file.
    pub fn logs(&self, name: &str, n: usize) -> Result<Vec<String>> {
        Self::port_of(name)?;
        let path = self.paths.service_log(name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VoiceError::Internal(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        let lines: Vec<&str> = contents.lines().collect();
        let skip = lines.len().saturating_sub(n);
        Ok(lines[skip..].iter().map(|s| s.to_string()).collect())
    }

    async fn probe_port(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{port}/health");
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.settings.probe_timeout_s))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Poll the health endpoint until it answers or the wait window runs
    /// out. Startup is best-effort; status reports the truth either way.
    async fn wait_for_health(&self, name: &str, port: u16) {
        for _ in 0..HEALTH_WAIT_SECS {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if self.probe_port(port).await {
                info!(name, port, "Service is healthy");
                return;
            }
        }
        warn!(name, port, "Service did not become healthy in time");
    }
}

fn read_pidfile(path: &PathBuf) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn write_pidfile(path: &PathBuf, pid: u32) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(dir: &std::path::Path) -> Supervisor {
        let mut env = HashMap::new();
        env.insert(
            "VOICEMODE_BASE_DIR".to_string(),
            dir.to_string_lossy().to_string(),
        );
        let settings = Arc::new(Settings::load_with(&env).unwrap());
        Supervisor::new(settings, Client::new())
    }

    #[tokio::test]
    async fn unknown_service_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        assert!(sup.status("espeak").await.is_err());
        assert!(sup.logs("espeak", 10).is_err());
    }

    #[tokio::test]
    async fn absent_service_reports_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let status = sup.status("kokoro").await.unwrap();
        assert!(!status.running);
        assert_eq!(status.port, 8880);
        assert_eq!(status.healthy, None);
    }

    #[tokio::test]
    async fn logs_tail_returns_the_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path());
        let log_path = sup.paths.service_log("whisper");
        std::fs::create_dir_all(log_path.parent().unwrap()).unwrap();
        std::fs::write(&log_path, "one\ntwo\nthree\nfour\n").unwrap();
        assert_eq!(sup.logs("whisper", 2).unwrap(), vec!["three", "four"]);
        assert_eq!(sup.logs("kokoro", 2).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn pidfile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("kokoro.pid");
        write_pidfile(&path, 4242).unwrap();
        assert_eq!(read_pidfile(&path), Some(4242));
    }

    #[test]
    fn noop_manager_refuses_enablement() {
        let mgr = NoopServiceManager;
        assert!(mgr.enable("kokoro").is_err());
        assert!(mgr.disable("kokoro").is_err());
    }
}
