//! Directory-backed sandbox implementation.
//!
//! Each sandbox is a directory under the provider's base directory. The
//! session record lives next to the workspace, so any process pointed at the
//! same base directory can reconnect by id.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

use super::provider::{CommandOutput, SandboxId, SandboxProvider, SandboxSession, SessionInfo};

const SESSION_DIR: &str = ".sandbox";
const SESSION_FILE: &str = "session.json";
const WORKSPACE_DIR: &str = "workspace";

/// Default virtual working directory agents address with absolute paths.
pub const DEFAULT_WORK_DIR: &str = "/home/user";

/// Provider that leases sandboxes as local directories.
#[derive(Clone)]
pub struct LocalSandboxProvider {
    /// Directory holding one subdirectory per sandbox.
    base_dir: PathBuf,
    /// Directory holding one subdirectory per template, if any.
    template_root: Option<PathBuf>,
    /// Absolute path the workspace is presented as.
    work_dir: String,
    /// Host used for public URLs.
    host: String,
    /// Upper bound on a single command.
    command_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl LocalSandboxProvider {
    /// Creates a provider rooted at `base_dir`.
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            template_root: None,
            work_dir: DEFAULT_WORK_DIR.to_string(),
            host: "localhost".to_string(),
            command_timeout: Duration::from_secs(300),
            clock: Arc::new(SystemClock),
        }
    }

    /// Copies `<root>/<template_id>` into every new sandbox.
    pub fn with_template_root(mut self, root: PathBuf) -> Self {
        self.template_root = Some(root);
        self
    }

    /// Sets the absolute path the workspace is presented as.
    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Sets the host used for public URLs.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Replaces the clock used for lifetimes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the workspace directory of a sandbox.
    pub fn workspace_path(&self, sandbox_id: &SandboxId) -> PathBuf {
        self.base_dir.join(sandbox_id.as_str()).join(WORKSPACE_DIR)
    }

    fn session_path(&self, sandbox_id: &SandboxId) -> PathBuf {
        self.base_dir
            .join(sandbox_id.as_str())
            .join(SESSION_DIR)
            .join(SESSION_FILE)
    }

    fn generate_id() -> SandboxId {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        SandboxId::new(format!("sbx-{}", &uuid[..12]))
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn acquire(&self, template_id: &str, ttl: Duration) -> Result<SandboxId> {
        let sandbox_id = Self::generate_id();
        let workspace = self.workspace_path(&sandbox_id);

        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| Error::Provisioning(format!("failed to create workspace: {}", e)))?;

        if let Some(root) = &self.template_root {
            let template_dir = root.join(template_id);
            if !template_dir.is_dir() {
                return Err(Error::Provisioning(format!(
                    "unknown template '{}'",
                    template_id
                )));
            }
            let target = workspace.clone();
            tokio::task::spawn_blocking(move || copy_dir_all(&template_dir, &target))
                .await
                .map_err(|e| Error::Provisioning(format!("template copy panicked: {}", e)))?
                .map_err(|e| Error::Provisioning(format!("failed to copy template: {}", e)))?;
        }

        let now = self.clock.now();
        let info = SessionInfo {
            sandbox_id: sandbox_id.clone(),
            template_id: template_id.to_string(),
            created_at: now,
            expires_at: now + to_chrono(ttl)?,
            host: self.host.clone(),
        };
        write_session(&self.session_path(&sandbox_id), &info)
            .await
            .map_err(|e| Error::Provisioning(format!("failed to record session: {}", e)))?;

        tracing::info!(
            sandbox_id = %sandbox_id,
            template = %template_id,
            expires_at = %info.expires_at,
            "created local sandbox"
        );

        Ok(sandbox_id)
    }

    async fn reconnect(&self, sandbox_id: &SandboxId) -> Result<Box<dyn SandboxSession>> {
        let session_path = self.session_path(sandbox_id);
        let info = read_session(&session_path).await.map_err(|e| {
            Error::Provisioning(format!("unknown sandbox {}: {}", sandbox_id, e))
        })?;

        if info.is_expired_at(self.clock.now()) {
            return Err(Error::SessionExpired {
                sandbox_id: sandbox_id.to_string(),
            });
        }

        tracing::debug!(sandbox_id = %sandbox_id, "reconnected to local sandbox");

        Ok(Box::new(LocalSession {
            info,
            workspace: self.workspace_path(sandbox_id),
            session_path,
            work_dir: self.work_dir.clone(),
            command_timeout: self.command_timeout,
            clock: self.clock.clone(),
        }))
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// A live handle on a directory-backed sandbox.
pub struct LocalSession {
    info: SessionInfo,
    workspace: PathBuf,
    session_path: PathBuf,
    work_dir: String,
    command_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl LocalSession {
    /// Fails if the persisted deadline has passed.
    ///
    /// The record is re-read because another handle may have moved the deadline.
    /// A missing record means the sandbox was closed.
    async fn ensure_live(&self) -> Result<()> {
        let current = match tokio::fs::try_exists(&self.session_path).await {
            Ok(true) => read_session(&self.session_path).await?,
            Ok(false) => {
                return Err(Error::Provisioning(format!(
                    "sandbox {} no longer exists",
                    self.info.sandbox_id
                )))
            }
            Err(e) => return Err(e.into()),
        };
        if current.is_expired_at(self.clock.now()) {
            return Err(Error::SessionExpired {
                sandbox_id: self.info.sandbox_id.to_string(),
            });
        }
        Ok(())
    }

    /// Maps an agent-supplied path onto the workspace.
    ///
    /// Absolute paths must live under the virtual working directory.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = if path.starts_with('/') {
            let root = self.work_dir.trim_end_matches('/');
            match path.strip_prefix(root) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                    rest.trim_start_matches('/')
                }
                _ => return Err(Error::InvalidPath(path.to_string())),
            }
        } else {
            path
        };

        if relative.is_empty() {
            return Err(Error::InvalidPath(path.to_string()));
        }

        for component in Path::new(relative).components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(Error::InvalidPath(path.to_string())),
            }
        }

        Ok(self.workspace.join(relative))
    }
}

#[async_trait]
impl SandboxSession for LocalSession {
    fn info(&self) -> &SessionInfo {
        &self.info
    }

    async fn set_ttl(&mut self, ttl: Duration) -> Result<()> {
        self.ensure_live().await?;

        let mut info = self.info.clone();
        info.expires_at = self.clock.now() + to_chrono(ttl)?;
        write_session(&self.session_path, &info).await?;

        tracing::info!(
            sandbox_id = %info.sandbox_id,
            expires_at = %info.expires_at,
            "reset sandbox lifetime"
        );

        self.info = info;
        Ok(())
    }

    async fn public_url(&self, port: u16) -> Result<String> {
        self.ensure_live().await?;
        Ok(format!("http://{}:{}", self.info.host, port))
    }

    async fn run_command(
        &self,
        command: &str,
        output_tx: mpsc::UnboundedSender<CommandOutput>,
    ) -> Result<i32> {
        self.ensure_live().await?;

        tracing::debug!(sandbox_id = %self.info.sandbox_id, command = %command, "running command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tool(format!("failed to spawn command: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Tool("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Tool("stderr was not captured".to_string()))?;

        let mut stdout_reader = BufReader::new(stdout);
        let mut stderr_reader = BufReader::new(stderr);
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let pump = async {
            let mut stdout_done = false;
            let mut stderr_done = false;

            while !(stdout_done && stderr_done) {
                tokio::select! {
                    line = next_line(&mut stdout_reader, &mut stdout_buf), if !stdout_done => match line {
                        Ok(Some(line)) => {
                            let _ = output_tx.send(CommandOutput::Stdout(line));
                        }
                        Ok(None) => stdout_done = true,
                        Err(e) => {
                            tracing::warn!(error = %e, "error reading stdout");
                            stdout_done = true;
                        }
                    },
                    line = next_line(&mut stderr_reader, &mut stderr_buf), if !stderr_done => match line {
                        Ok(Some(line)) => {
                            let _ = output_tx.send(CommandOutput::Stderr(line));
                        }
                        Ok(None) => stderr_done = true,
                        Err(e) => {
                            tracing::warn!(error = %e, "error reading stderr");
                            stderr_done = true;
                        }
                    },
                }
            }

            child.wait().await
        };

        let outcome = tokio::time::timeout(self.command_timeout, pump).await;
        match outcome {
            Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
            Ok(Err(e)) => Err(Error::Tool(format!("failed to wait for command: {}", e))),
            Err(_) => {
                let _ = child.start_kill();
                Err(Error::Tool(format!(
                    "command timed out after {}s",
                    self.command_timeout.as_secs()
                )))
            }
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.ensure_live().await?;
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.ensure_live().await?;
        let target = self.resolve(path)?;
        Ok(tokio::fs::read_to_string(&target).await?)
    }
}

/// Reads one line, decoding invalid UTF-8 lossily.
///
/// Bytes of a line interrupted by `select!` stay in `buf` and are completed by
/// the next call, so `buf` is only cleared once a whole line is returned.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader.read_until(b'\n', buf).await?;
    if read == 0 && buf.is_empty() {
        return Ok(None);
    }

    let mut end = buf.len();
    if buf[..end].ends_with(b"\n") {
        end -= 1;
    }
    if buf[..end].ends_with(b"\r") {
        end -= 1;
    }
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.clear();
    Ok(Some(line))
}

fn to_chrono(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| Error::Config(format!("sandbox lifetime out of range: {}", e)))
}

async fn read_session(path: &Path) -> Result<SessionInfo> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn write_session(path: &Path, info: &SessionInfo) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(info)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}
