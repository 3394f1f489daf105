use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{IgniteError, Result};
use crate::sandbox::traits::ContainerEngine;
use crate::sandbox::{BuildRequest, ImageInfo, RunRequest, RunResult};

/// Exit code reported when a run is killed at its deadline.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const TIMEOUT_NOTICE: &str = "Process killed: timeout exceeded";
/// Upper bound on the post-run inspect and remove commands.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);
const TMPFS_OPTIONS: &str = "rw,noexec,nosuid,size=64m";

/// Docker-compatible container engine driven through its CLI.
///
/// Runs are never started with `--rm`: the container has to survive its exit
/// so the OOM flag can be inspected. It is force-removed afterwards.
pub struct DockerEngine {
    binary: String,
    cleanup_timeout: Duration,
}

/// Captured output of one engine invocation.
struct EngineOutput {
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
    timed_out: bool,
}

impl EngineOutput {
    fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }
}

impl DockerEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            cleanup_timeout: CLEANUP_TIMEOUT,
        }
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.binary.clone())
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, args: &[String], source: std::io::Error) -> IgniteError {
        IgniteError::EngineSpawn {
            command: format!("{} {}", self.binary, args.first().map(String::as_str).unwrap_or("")),
            source,
        }
    }

    /// Run an engine command to completion.
    async fn exec(&self, args: &[String]) -> Result<EngineOutput> {
        debug!(command = %format!("{} {}", self.binary, args.join(" ")), "Running engine command");

        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| self.spawn_error(args, e))?;

        Ok(EngineOutput {
            status: Some(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        })
    }

    /// Run an engine command, killing it once `timeout` elapses.
    ///
    /// Output written before the kill is kept.
    async fn exec_with_timeout(&self, args: &[String], timeout: Duration) -> Result<EngineOutput> {
        debug!(
            command = %format!("{} {}", self.binary, args.join(" ")),
            timeout_ms = timeout.as_millis() as u64,
            "Running engine command with timeout"
        );

        let mut child = self
            .command(args)
            .spawn()
            .map_err(|e| self.spawn_error(args, e))?;

        let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_stream(out)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(read_stream(err)));

        let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => (Some(status.map_err(|e| self.spawn_error(args, e))?), false),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Deadline reached, killing engine process");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill engine process");
                }
                (None, true)
            }
        };

        Ok(EngineOutput {
            status,
            stdout: String::from_utf8_lossy(&join_stream(stdout_task).await).to_string(),
            stderr: String::from_utf8_lossy(&join_stream(stderr_task).await).to_string(),
            timed_out,
        })
    }

    /// Read the OOMKilled flag of an exited container.
    async fn inspect_oom(&self, container: &str) -> Option<bool> {
        let args = strings(&["inspect", container, "--format", "{{.State.OOMKilled}}"]);
        match self.exec_with_timeout(&args, self.cleanup_timeout).await {
            Ok(output) if output.timed_out => {
                warn!(container = %container, "Container inspect timed out, OOM state unknown");
                None
            }
            Ok(output) if output.success() => Some(output.stdout.trim() == "true"),
            Ok(output) => {
                debug!(container = %container, error = %output.stderr.trim(), "Container inspect failed");
                None
            }
            Err(e) => {
                debug!(container = %container, error = %e, "Container inspect failed");
                None
            }
        }
    }

    /// Force-remove a container. Failures are logged, never returned.
    async fn remove_container(&self, container: &str) {
        let args = strings(&["rm", "-f", container]);
        match self.exec_with_timeout(&args, self.cleanup_timeout).await {
            Ok(output) if output.timed_out => {
                warn!(container = %container, "Timed out removing container");
            }
            Ok(output) if !output.success() => {
                warn!(container = %container, error = %output.stderr.trim(), "Failed to remove container");
            }
            Err(e) => {
                warn!(container = %container, error = %e, "Failed to remove container");
            }
            Ok(_) => debug!(container = %container, "Removed container"),
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        let args = strings(&["version", "--format", "{{.Server.Version}}"]);
        match self.exec(&args).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }

    async fn build(&self, request: &BuildRequest) -> Result<()> {
        info!(image = %request.image_name, "Building image");

        let output = self.exec(&build_args(request)).await?;
        if !output.success() {
            return Err(IgniteError::Runtime(format!(
                "Docker build failed for {}: {}",
                request.image_name,
                output.stderr.trim()
            )));
        }

        info!(image = %request.image_name, "Image built");
        Ok(())
    }

    async fn run(&self, request: &RunRequest) -> Result<RunResult> {
        let args = run_args(request);

        let start = Instant::now();
        let output = self.exec_with_timeout(&args, request.timeout).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        // Inspect and remove even when waiting on the engine failed.
        let oom_killed = self
            .inspect_oom(&request.container_name)
            .await
            .unwrap_or(false);
        self.remove_container(&request.container_name).await;

        let result = finish_run(output?, duration_ms, oom_killed);
        debug!(
            container = %request.container_name,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            oom_killed = result.oom_killed,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "Container run completed"
        );
        Ok(result)
    }

    async fn inspect_image(&self, image: &str) -> Option<ImageInfo> {
        let args = strings(&[
            "image",
            "inspect",
            image,
            "--format",
            "{{.Id}}\t{{.Size}}\t{{.Created}}",
        ]);
        let output = self.exec(&args).await.ok()?;
        if !output.success() {
            return None;
        }
        parse_image_info(&output.stdout)
    }
}

/// Single construction point for run results, for both normal exit and timeout.
fn finish_run(output: EngineOutput, duration_ms: u64, oom_killed: bool) -> RunResult {
    let (exit_code, stderr) = if output.timed_out {
        (
            TIMEOUT_EXIT_CODE,
            format!("{}\n{}", output.stderr, TIMEOUT_NOTICE),
        )
    } else {
        (
            output.status.and_then(|s| s.code()).unwrap_or(1),
            output.stderr,
        )
    };

    RunResult {
        exit_code,
        stdout: output.stdout,
        stderr,
        duration_ms,
        oom_killed,
    }
}

fn parse_image_info(stdout: &str) -> Option<ImageInfo> {
    let mut parts = stdout.trim().split('\t');
    let id = parts.next().filter(|s| !s.is_empty())?;
    let size = parts.next()?.trim().parse().ok()?;
    let created = parts.next().filter(|s| !s.is_empty())?;
    Some(ImageInfo {
        id: id.to_string(),
        size,
        created: created.to_string(),
    })
}

async fn read_stream<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Engine output stream closed with error");
    }
    buf
}

async fn join_stream(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Arguments for `build -t <image> -f <recipe> [--build-arg K=V]... <context>`.
pub fn build_args(request: &BuildRequest) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-t".to_string(),
        request.image_name.clone(),
        "-f".to_string(),
        request.recipe_path.display().to_string(),
    ];

    for (key, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(request.context_path.display().to_string());
    args
}

/// Arguments for a sandboxed `run`. Deliberately without `--rm`.
pub fn run_args(request: &RunRequest) -> Vec<String> {
    let memory = format!("{}m", request.memory_limit_mb);
    let mut args = vec![
        "run".to_string(),
        "--name".to_string(),
        request.container_name.clone(),
        "-m".to_string(),
        memory.clone(),
        "--memory-swap".to_string(),
        memory,
        "--cpus".to_string(),
        request.cpu_limit.unwrap_or(1.0).to_string(),
        "-w".to_string(),
        request.workdir.clone(),
    ];

    if let Some(security) = &request.security {
        if security.network_disabled {
            args.extend(strings(&["--network", "none"]));
        }
        if security.read_only_rootfs {
            args.push("--read-only".to_string());
        }
        if security.drop_capabilities {
            args.extend(strings(&["--cap-drop", "ALL"]));
        }
        if security.no_new_privileges {
            args.extend(strings(&["--security-opt", "no-new-privileges"]));
        }
        for path in &security.tmpfs_paths {
            args.push("--tmpfs".to_string());
            args.push(format!("{}:{}", path, TMPFS_OPTIONS));
        }
    }

    for volume in &request.volumes {
        let mode = if volume.readonly { "ro" } else { "rw" };
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:{}",
            volume.host_path.display(),
            volume.container_path,
            mode
        ));
    }

    for (key, value) in &request.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    args.push(request.image_name.clone());
    args.extend(request.command.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::sandbox::{SecurityFlags, VolumeMount};

    fn run_request() -> RunRequest {
        RunRequest {
            image_name: "ignite-hello:latest".to_string(),
            container_name: "ignite-hello-1".to_string(),
            memory_limit_mb: 128,
            cpu_limit: None,
            timeout: Duration::from_secs(5),
            workdir: "/app".to_string(),
            volumes: vec![VolumeMount {
                host_path: PathBuf::from("/srv/hello"),
                container_path: "/app".to_string(),
                readonly: true,
            }],
            env: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            security: None,
            command: Vec::new(),
        }
    }

    #[test]
    fn test_build_args() {
        let request = BuildRequest {
            context_path: PathBuf::from("/srv/hello"),
            recipe_path: PathBuf::from("/tmp/build/Dockerfile"),
            image_name: "ignite-hello:latest".to_string(),
            build_args: BTreeMap::from([("ENTRY_FILE".to_string(), "index.ts".to_string())]),
        };
        assert_eq!(
            build_args(&request),
            vec![
                "build",
                "-t",
                "ignite-hello:latest",
                "-f",
                "/tmp/build/Dockerfile",
                "--build-arg",
                "ENTRY_FILE=index.ts",
                "/srv/hello",
            ]
        );
    }

    #[test]
    fn test_run_args_without_security() {
        assert_eq!(
            run_args(&run_request()),
            vec![
                "run",
                "--name",
                "ignite-hello-1",
                "-m",
                "128m",
                "--memory-swap",
                "128m",
                "--cpus",
                "1",
                "-w",
                "/app",
                "-v",
                "/srv/hello:/app:ro",
                "-e",
                "NODE_ENV=production",
                "ignite-hello:latest",
            ]
        );
    }

    #[test]
    fn test_run_args_with_security_and_command() {
        let mut request = run_request();
        request.cpu_limit = Some(0.5);
        request.command = vec!["bun".to_string(), "/entrypoint.ts".to_string()];
        request.security = Some(SecurityFlags {
            network_disabled: true,
            read_only_rootfs: true,
            drop_capabilities: true,
            no_new_privileges: true,
            tmpfs_paths: vec!["/tmp".to_string()],
        });

        let args = run_args(&request);
        assert!(!args.contains(&"--rm".to_string()));
        let joined = args.join(" ");
        assert!(joined.contains("--cpus 0.5"));
        assert!(joined.contains(
            "--network none --read-only --cap-drop ALL --security-opt no-new-privileges --tmpfs /tmp:rw,noexec,nosuid,size=64m -v"
        ));
        assert!(joined.ends_with("ignite-hello:latest bun /entrypoint.ts"));
    }

    #[test]
    fn test_parse_image_info() {
        let info = parse_image_info("sha256:abc\t52428800\t2024-05-01T10:00:00Z\n").unwrap();
        assert_eq!(info.id, "sha256:abc");
        assert_eq!(info.size, 52_428_800);
        assert_eq!(info.created, "2024-05-01T10:00:00Z");

        assert!(parse_image_info("").is_none());
        assert!(parse_image_info("sha256:abc\tlarge\t2024").is_none());
    }

    #[test]
    fn test_finish_run_timeout() {
        let output = EngineOutput {
            status: None,
            stdout: "partial".to_string(),
            stderr: "warming up".to_string(),
            timed_out: true,
        };
        let result = finish_run(output, 1000, false);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.stdout, "partial");
        assert!(result.stderr.ends_with("\nProcess killed: timeout exceeded"));
    }

    #[cfg(unix)]
    mod fake_engine {
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use super::*;

        /// Write an executable shell script standing in for the engine CLI.
        /// Every invocation is appended to `calls.log` next to it.
        fn fake_engine(dir: &Path, run_body: &str) -> DockerEngine {
            fake_engine_with(dir, run_body, "echo true")
        }

        fn fake_engine_with(dir: &Path, run_body: &str, inspect_body: &str) -> DockerEngine {
            let log = dir.join("calls.log");
            let script = format!(
                "#!/bin/sh\n\
                 echo \"$@\" >> '{log}'\n\
                 case \"$1\" in\n\
                 run) {run_body} ;;\n\
                 inspect) {inspect_body} ;;\n\
                 version) echo 24.0.7 ;;\n\
                 rm) exit 0 ;;\n\
                 image) printf 'sha256:abc\\t1048576\\t2024-05-01\\n' ;;\n\
                 build) echo 'no such file' >&2; exit 1 ;;\n\
                 esac\n",
                log = log.display()
            );
            let path = dir.join("fake-docker");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            DockerEngine::new(path.display().to_string())
        }

        #[tokio::test]
        async fn test_run_captures_output_and_cleans_up() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(dir.path(), "echo hello; echo oops >&2; exit 3");

            let result = engine.run(&run_request()).await.unwrap();
            assert_eq!(result.exit_code, 3);
            assert_eq!(result.stdout.trim(), "hello");
            assert_eq!(result.stderr.trim(), "oops");
            assert!(result.oom_killed);

            let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
            let lines: Vec<&str> = calls.lines().collect();
            assert!(lines[0].starts_with("run --name ignite-hello-1"));
            assert_eq!(lines[1], "inspect ignite-hello-1 --format {{.State.OOMKilled}}");
            assert_eq!(lines[2], "rm -f ignite-hello-1");
        }

        #[tokio::test]
        async fn test_run_timeout_kills_and_reports_124() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(dir.path(), "echo started; exec sleep 10");

            let mut request = run_request();
            request.timeout = Duration::from_millis(300);
            let start = Instant::now();
            let result = engine.run(&request).await.unwrap();

            assert!(start.elapsed() < Duration::from_secs(5));
            assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
            assert_eq!(result.stdout.trim(), "started");
            assert!(result.stderr.contains(TIMEOUT_NOTICE));

            let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
            assert!(calls.contains("rm -f ignite-hello-1"));
        }

        #[tokio::test]
        async fn test_availability_and_image_inspect() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(dir.path(), "exit 0");
            assert!(engine.is_available().await);

            let info = engine.inspect_image("ignite-hello:latest").await.unwrap();
            assert_eq!(info.size, 1_048_576);
        }

        #[tokio::test]
        async fn test_build_failure_carries_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine(dir.path(), "exit 0");
            let request = BuildRequest {
                context_path: dir.path().to_path_buf(),
                recipe_path: dir.path().join("Dockerfile"),
                image_name: "ignite-hello:latest".to_string(),
                build_args: BTreeMap::new(),
            };
            let err = engine.build(&request).await.unwrap_err();
            assert_eq!(err.code(), "RUNTIME_ERROR");
            assert!(err.to_string().contains("no such file"));
            assert!(err.to_string().contains("ignite-hello:latest"));
        }

        #[tokio::test]
        async fn test_hung_inspect_does_not_block_run() {
            let dir = tempfile::tempdir().unwrap();
            let engine = fake_engine_with(dir.path(), "echo done", "exec sleep 10")
                .with_cleanup_timeout(Duration::from_millis(300));

            let start = Instant::now();
            let result = engine.run(&run_request()).await.unwrap();

            assert!(start.elapsed() < Duration::from_secs(5));
            assert_eq!(result.exit_code, 0);
            assert!(!result.oom_killed);

            let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
            assert!(calls.contains("rm -f ignite-hello-1"));
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let engine = DockerEngine::new("ignite-no-such-engine-binary");
        assert!(!engine.is_available().await);
        assert!(engine.inspect_image("anything").await.is_none());
    }
}
