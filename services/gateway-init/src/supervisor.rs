//! Gateway process supervision.
//!
//! Launches the gateway as a child process and keeps it running forever:
//! - Stale lock files are cleared before every start
//! - Signals (SIGTERM, SIGINT, SIGHUP) are forwarded while it runs
//! - Zombies are reaped after each exit when running as PID 1
//! - Rapid crashes escalate the restart delay

use std::convert::Infallible;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use harbor_reconcile::{CrashWindow, ExitClass};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, Signal as SignalStream, SignalKind};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{EntrypointConfig, GATEWAY_TOKEN_ENV};
use crate::error::InitError;

/// Starts one gateway attempt and waits for it to exit.
#[async_trait]
pub trait Launcher: Send {
    /// Returns the exit code (128 + signal for signal deaths).
    async fn launch(&mut self) -> Result<i32, InitError>;
}

/// Signals relayed to the gateway while it runs.
fn forwarded_signals() -> [(SignalKind, Signal); 3] {
    [
        (SignalKind::terminate(), Signal::SIGTERM),
        (SignalKind::interrupt(), Signal::SIGINT),
        (SignalKind::hangup(), Signal::SIGHUP),
    ]
}

/// Launches the real gateway executable.
pub struct GatewayLauncher {
    program: String,
    port: u16,
    forwarded: [(SignalKind, Signal); 3],
}

impl GatewayLauncher {
    pub fn new(config: &EntrypointConfig) -> Self {
        Self {
            program: config.gateway_bin.clone(),
            port: config.gateway_port,
            forwarded: forwarded_signals(),
        }
    }

    /// Gateway command line with the token variable stripped.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("gateway")
            .arg("--port")
            .arg(self.port.to_string())
            .args(["--verbose", "--allow-unconfigured", "--bind", "lan"])
            .env_remove(GATEWAY_TOKEN_ENV)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

#[async_trait]
impl Launcher for GatewayLauncher {
    async fn launch(&mut self) -> Result<i32, InitError> {
        info!(program = %self.program, port = self.port, "starting gateway");

        // Registered first: once the child exists, nothing may fail before
        // it is being waited on.
        let mut relay = SignalRelay::register(self.forwarded)?;

        let mut child = self
            .command()
            .spawn()
            .map_err(|source| InitError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        let status = relay.wait(&mut child).await?;
        let exit_code = exit_code(status);

        if std::process::id() == 1 {
            reap_zombies();
        }

        Ok(exit_code)
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 128,
    }
}

/// Signal listeners installed before the gateway is spawned.
struct SignalRelay {
    streams: [(Signal, SignalStream); 3],
}

impl SignalRelay {
    fn register(kinds: [(SignalKind, Signal); 3]) -> std::io::Result<Self> {
        let [(k1, s1), (k2, s2), (k3, s3)] = kinds;
        Ok(Self {
            streams: [(s1, signal(k1)?), (s2, signal(k2)?), (s3, signal(k3)?)],
        })
    }

    /// Wait for child exit while forwarding signals.
    async fn wait(&mut self, child: &mut Child) -> Result<ExitStatus, InitError> {
        let Some(raw_pid) = child.id() else {
            // Already reaped; `wait` returns the cached status.
            return Ok(child.wait().await?);
        };
        let pid = Pid::from_raw(raw_pid as i32);
        info!(pid = raw_pid, "gateway started");

        let [(sig_a, a), (sig_b, b), (sig_c, c)] = &mut self.streams;
        loop {
            tokio::select! {
                status = child.wait() => return Ok(status?),

                _ = a.recv() => forward(pid, *sig_a),
                _ = b.recv() => forward(pid, *sig_b),
                _ = c.recv() => forward(pid, *sig_c),
            }
        }
    }
}

fn forward(pid: Pid, sig: Signal) {
    info!(pid = pid.as_raw(), signal = ?sig, "forwarding signal to gateway");
    if let Err(e) = kill(pid, sig) {
        warn!(pid = pid.as_raw(), error = %e, "failed to forward signal");
    }
}

/// Reap any zombie child processes.
fn reap_zombies() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                debug!(pid = pid.as_raw(), code, "reaped zombie");
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                debug!(pid = pid.as_raw(), signal = ?sig, "reaped signaled zombie");
            }
            Ok(WaitStatus::StillAlive) | Err(nix::errno::Errno::ECHILD) => break,
            Err(e) => {
                warn!(error = %e, "waitpid error");
                break;
            }
            _ => {}
        }
    }
}

/// Restart loop around a [`Launcher`].
pub struct Supervisor<L> {
    launcher: L,
    lock_files: Vec<PathBuf>,
    window: CrashWindow,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(launcher: L, config: &EntrypointConfig) -> Self {
        Self {
            launcher,
            lock_files: config.paths.lock_files.clone(),
            window: CrashWindow::new(config.crash_policy),
        }
    }

    pub fn rapid_crashes(&self) -> u32 {
        self.window.rapid_crashes()
    }

    /// Run one attempt and return the delay before the next.
    pub async fn run_once(&mut self) -> Duration {
        self.clear_locks();

        self.window.record_start(Instant::now().into_std());
        match self.launcher.launch().await {
            Ok(code) => info!(exit_code = code, "gateway exited"),
            Err(e) => warn!(error = %e, reason = e.reason_code(), "gateway failed to start"),
        }

        let (class, delay) = self.window.record_exit(Instant::now().into_std());
        let rapid_crashes = self.window.rapid_crashes();
        match class {
            ExitClass::RapidCrash if rapid_crashes >= self.window.policy().threshold => warn!(
                rapid_crashes,
                delay_secs = delay.as_secs(),
                "gateway crash loop, backing off"
            ),
            ExitClass::RapidCrash => info!(rapid_crashes, "gateway crashed quickly, restarting"),
            ExitClass::Survived => info!("gateway ran past the crash window, restarting"),
        }
        delay
    }

    /// Supervise forever.
    pub async fn run(mut self) -> Infallible {
        loop {
            let delay = self.run_once().await;
            tokio::time::sleep(delay).await;
        }
    }

    fn clear_locks(&self) {
        for lock in &self.lock_files {
            match std::fs::remove_file(lock) {
                Ok(()) => debug!(path = %lock.display(), "removed stale lock"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %lock.display(), error = %e, "cannot remove lock"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use std::collections::VecDeque;
    use std::ffi::OsStr;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Runs each scripted attempt for the given (virtual) duration.
    struct ScriptedLauncher {
        runs: VecDeque<Duration>,
        launches: u32,
    }

    #[async_trait]
    impl Launcher for ScriptedLauncher {
        async fn launch(&mut self) -> Result<i32, InitError> {
            self.launches += 1;
            let run_for = self.runs.pop_front().unwrap_or(Duration::from_secs(1));
            tokio::time::sleep(run_for).await;
            Ok(1)
        }
    }

    struct FailingLauncher;

    #[async_trait]
    impl Launcher for FailingLauncher {
        async fn launch(&mut self) -> Result<i32, InitError> {
            Err(InitError::SpawnFailed {
                program: "openclaw".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn config_in(root: &std::path::Path) -> EntrypointConfig {
        let mut config = EntrypointConfig::from_lookup(|_| None);
        config.paths = Paths::under(root);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_escalates_and_resets() {
        let dir = tempdir().unwrap();
        let mut runs: VecDeque<Duration> = std::iter::repeat(Duration::from_secs(1)).take(6).collect();
        runs.push_back(Duration::from_secs(45));
        runs.push_back(Duration::from_secs(1));

        let launcher = ScriptedLauncher { runs, launches: 0 };
        let mut supervisor = Supervisor::new(launcher, &config_in(dir.path()));

        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(supervisor.run_once().await);
        }

        let secs: Vec<u64> = delays.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![3, 3, 3, 3, 50, 60, 3, 3]);
        assert_eq!(supervisor.rapid_crashes(), 1);
        assert_eq!(supervisor.launcher.launches, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let dir = tempdir().unwrap();
        let launcher = ScriptedLauncher {
            runs: VecDeque::new(),
            launches: 0,
        };
        let mut supervisor = Supervisor::new(launcher, &config_in(dir.path()));

        let mut last = Duration::ZERO;
        for _ in 0..20 {
            last = supervisor.run_once().await;
        }
        assert_eq!(last, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_counts_as_rapid_crash() {
        let dir = tempdir().unwrap();
        let mut supervisor = Supervisor::new(FailingLauncher, &config_in(dir.path()));

        assert_eq!(supervisor.run_once().await, Duration::from_secs(3));
        assert_eq!(supervisor.rapid_crashes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_cleared_before_start() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(&config.paths.config_dir).unwrap();
        for lock in &config.paths.lock_files {
            fs::write(lock, "pid").unwrap();
        }

        let mut supervisor = Supervisor::new(FailingLauncher, &config);
        supervisor.run_once().await;

        assert!(config.paths.lock_files.iter().all(|l| !l.exists()));
    }

    #[test]
    fn test_gateway_command() {
        let mut config = EntrypointConfig::from_lookup(|_| None);
        config.gateway_bin = "openclaw".to_string();
        let cmd = GatewayLauncher::new(&config).command();
        let std_cmd = cmd.as_std();

        let args: Vec<&OsStr> = std_cmd.get_args().collect();
        assert_eq!(
            args,
            vec![
                "gateway",
                "--port",
                "18789",
                "--verbose",
                "--allow-unconfigured",
                "--bind",
                "lan"
            ]
        );

        let token = std_cmd
            .get_envs()
            .find(|(key, _)| *key == OsStr::new(GATEWAY_TOKEN_ENV));
        assert_eq!(token, Some((OsStr::new(GATEWAY_TOKEN_ENV), None)));
    }

    fn script(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("fake-gateway");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_exit_code_captured() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.gateway_bin = script(dir.path(), "exit 7");

        let code = GatewayLauncher::new(&config).launch().await.unwrap();
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn test_signal_death_maps_to_128_plus_signal() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.gateway_bin = script(dir.path(), "kill -KILL $$");

        let code = GatewayLauncher::new(&config).launch().await.unwrap();
        assert_eq!(code, 128 + 9);
    }

    #[tokio::test]
    async fn test_signal_arriving_right_after_spawn_is_forwarded() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        // The child signals its parent as its first action and exits 42 once
        // the signal is relayed back to it.
        config.gateway_bin = script(
            dir.path(),
            "trap 'exit 42' USR1\nkill -USR1 $PPID\nwhile :; do sleep 0.1; done",
        );

        let mut launcher = GatewayLauncher::new(&config);
        launcher.forwarded = [
            (SignalKind::user_defined1(), Signal::SIGUSR1),
            (SignalKind::user_defined2(), Signal::SIGUSR2),
            (SignalKind::window_change(), Signal::SIGWINCH),
        ];

        let code = tokio::time::timeout(Duration::from_secs(10), launcher.launch())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, 42);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let mut config = EntrypointConfig::from_lookup(|_| None);
        config.gateway_bin = "/nonexistent/openclaw".to_string();

        let err = GatewayLauncher::new(&config).launch().await.unwrap_err();
        assert_eq!(err.reason_code(), "spawn_failed");
    }
}
