//! Sandbox tools exposed to the agent.
//!
//! Each invocation runs as a durable step. Failures inside the sandbox are
//! returned to the agent as [`ToolOutcome::Fault`] text so it can read the
//! error and try again; only session loss aborts the run.

use std::path::{Component, Path};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use crate::durable::Steps;
use crate::error::Result;
use crate::model::ToolCall;
use crate::sandbox::{CommandOutput, SandboxId, SandboxProvider};
use crate::state::{AgentState, FileMap, StateDelta};

/// Runs a shell command in the sandbox.
pub const TERMINAL: &str = "terminal";
/// Writes files relative to the sandbox working directory.
pub const WRITE_FILES: &str = "create-or-update-files";
/// Reads files by absolute path.
pub const READ_FILES: &str = "read-files";

/// Result of a tool: either its output or a diagnostic for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum ToolOutcome<T> {
    /// The tool succeeded.
    Ok(T),
    /// The tool failed; the message is shown to the agent.
    Fault(String),
}

impl<T> ToolOutcome<T> {
    /// Returns true if the tool failed.
    pub fn is_fault(&self) -> bool {
        matches!(self, ToolOutcome::Fault(_))
    }
}

/// Output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    fn render(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, true) => "Command completed with no output.".to_string(),
            (false, true) => self.stdout.clone(),
            (true, false) => format!("stderr:\n{}", self.stderr),
            (false, false) => format!("{}\nstderr:\n{}", self.stdout, self.stderr),
        }
    }
}

/// A file path and its full content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

/// Function definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Record of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    /// Text handed back to the agent.
    pub result: String,
    pub faulted: bool,
}

/// What a dispatched tool call produced.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub record: ToolCallRecord,
    /// State change to commit, present only for successful writes.
    pub delta: Option<StateDelta>,
}

#[derive(Deserialize)]
struct TerminalArgs {
    command: String,
}

#[derive(Deserialize)]
struct WriteFilesArgs {
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct ReadFilesArgs {
    files: Vec<String>,
}

/// Tools bound to one sandbox.
#[derive(Clone)]
pub struct ToolLayer {
    provider: Arc<dyn SandboxProvider>,
    sandbox_id: SandboxId,
}

impl ToolLayer {
    /// Binds the tools to a sandbox. The session is re-looked-up per call.
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox_id: SandboxId) -> Self {
        Self {
            provider,
            sandbox_id,
        }
    }

    /// Returns the definitions advertised to the model.
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: TERMINAL.to_string(),
                description: "Use the terminal to run commands".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "command": { "type": "string" }
                    },
                    "required": ["command"]
                }),
            },
            ToolDefinition {
                name: WRITE_FILES.to_string(),
                description: "Create or update files in the sandbox".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "path": { "type": "string" },
                                    "content": { "type": "string" }
                                },
                                "required": ["path", "content"]
                            }
                        }
                    },
                    "required": ["files"]
                }),
            },
            ToolDefinition {
                name: READ_FILES.to_string(),
                description: "Read files from the sandbox".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "files": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["files"]
                }),
            },
        ]
    }

    /// Dispatches a model tool call.
    ///
    /// Only session loss is returned as an error. Everything else, including
    /// unknown tools and malformed arguments, becomes a faulted record.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        state: &AgentState,
        steps: &Steps,
    ) -> Result<ToolResult> {
        let (result, delta, faulted) = match call.name.as_str() {
            TERMINAL => match parse_args::<TerminalArgs>(call) {
                Ok(args) => {
                    let outcome = self.run_command(&args.command, steps).await?;
                    render(outcome, |out| out.render())
                }
                Err(message) => (message, None, true),
            },
            WRITE_FILES => match parse_args::<WriteFilesArgs>(call) {
                Ok(args) => match self.write_files(args.files, &state.files, steps).await? {
                    ToolOutcome::Ok(files) => {
                        let text = format!("Updated {} file(s).", files.len());
                        (text, Some(StateDelta::Files(files)), false)
                    }
                    ToolOutcome::Fault(message) => (message, None, true),
                },
                Err(message) => (message, None, true),
            },
            READ_FILES => match parse_args::<ReadFilesArgs>(call) {
                Ok(args) => {
                    let outcome = self.read_files(args.files, steps).await?;
                    render(outcome, |entries| {
                        serde_json::to_string(entries).unwrap_or_default()
                    })
                }
                Err(message) => (message, None, true),
            },
            other => (format!("Unknown tool: {}", other), None, true),
        };

        if faulted {
            tracing::warn!(tool = %call.name, sandbox_id = %self.sandbox_id, error = %result, "tool call faulted");
        } else {
            tracing::info!(tool = %call.name, sandbox_id = %self.sandbox_id, "tool call completed");
        }

        Ok(ToolResult {
            record: ToolCallRecord {
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                result,
                faulted,
            },
            delta,
        })
    }

    /// Runs a command, collecting stdout and stderr.
    ///
    /// A non-zero exit or execution failure yields a fault carrying whatever
    /// output was collected.
    pub async fn run_command(
        &self,
        command: &str,
        steps: &Steps,
    ) -> Result<ToolOutcome<CommandResult>> {
        steps
            .run(TERMINAL, || async {
                let session = self.provider.reconnect(&self.sandbox_id).await?;

                let (tx, mut rx) = mpsc::unbounded_channel();
                let status = session.run_command(command, tx).await;

                let mut stdout = String::new();
                let mut stderr = String::new();
                while let Some(line) = rx.recv().await {
                    match line {
                        CommandOutput::Stdout(line) => {
                            stdout.push_str(&line);
                            stdout.push('\n');
                        }
                        CommandOutput::Stderr(line) => {
                            stderr.push_str(&line);
                            stderr.push('\n');
                        }
                    }
                }

                match status {
                    Ok(0) => Ok(ToolOutcome::Ok(CommandResult { stdout, stderr })),
                    Ok(code) => Ok(ToolOutcome::Fault(format!(
                        "Command failed with exit code {}\nstdout: {}\nstderr: {}",
                        code, stdout, stderr
                    ))),
                    Err(e) if e.is_fatal_session() => Err(e),
                    Err(e) => Ok(ToolOutcome::Fault(format!(
                        "Command failed: {}\nstdout: {}\nstderr: {}",
                        e, stdout, stderr
                    ))),
                }
            })
            .await
    }

    /// Writes files and returns `previous` merged with the written entries.
    ///
    /// All paths are validated before anything is written.
    pub async fn write_files(
        &self,
        entries: Vec<FileEntry>,
        previous: &FileMap,
        steps: &Steps,
    ) -> Result<ToolOutcome<FileMap>> {
        steps
            .run(WRITE_FILES, || async {
                let mut normalized = Vec::with_capacity(entries.len());
                for entry in &entries {
                    match normalize_relative_path(&entry.path) {
                        Some(path) => normalized.push((path, &entry.content)),
                        None => {
                            return Ok(ToolOutcome::Fault(format!(
                                "Invalid path '{}': paths must be relative to the working directory",
                                entry.path
                            )))
                        }
                    }
                }

                let session = self.provider.reconnect(&self.sandbox_id).await?;

                let mut updated = previous.clone();
                for (path, content) in normalized {
                    match session.write_file(&path, content).await {
                        Ok(()) => {
                            updated.insert(path, content.clone());
                        }
                        Err(e) if e.is_fatal_session() => return Err(e),
                        Err(e) => return Ok(ToolOutcome::Fault(format!("Error: {}", e))),
                    }
                }

                Ok(ToolOutcome::Ok(updated))
            })
            .await
    }

    /// Reads files by absolute path.
    pub async fn read_files(
        &self,
        paths: Vec<String>,
        steps: &Steps,
    ) -> Result<ToolOutcome<Vec<FileEntry>>> {
        steps
            .run(READ_FILES, || async {
                let session = self.provider.reconnect(&self.sandbox_id).await?;

                let mut contents = Vec::with_capacity(paths.len());
                for path in &paths {
                    match session.read_file(path).await {
                        Ok(content) => contents.push(FileEntry {
                            path: path.clone(),
                            content,
                        }),
                        Err(e) if e.is_fatal_session() => return Err(e),
                        Err(e) => return Ok(ToolOutcome::Fault(format!("Error: {}", e))),
                    }
                }

                Ok(ToolOutcome::Ok(contents))
            })
            .await
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> std::result::Result<T, String> {
    serde_json::from_value(call.arguments.clone())
        .map_err(|e| format!("Invalid arguments for {}: {}", call.name, e))
}

fn render<T>(
    outcome: ToolOutcome<T>,
    text: impl FnOnce(&T) -> String,
) -> (String, Option<StateDelta>, bool) {
    match outcome {
        ToolOutcome::Ok(value) => (text(&value), None, false),
        ToolOutcome::Fault(message) => (message, None, true),
    }
}

/// Returns the canonical form of a path inside the working directory.
///
/// `.` components and repeated separators are dropped so every spelling of a
/// file maps to one key. Absolute paths, `..` and paths naming no file yield
/// `None`.
pub fn normalize_relative_path(path: &str) -> Option<String> {
    if path.starts_with('/') || path.starts_with('\\') {
        return None;
    }

    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::{MemoryJournal, StepJournal};
    use crate::error::Error;
    use crate::sandbox::LocalSandboxProvider;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (ToolLayer, Steps, LocalSandboxProvider, SandboxId) {
        let provider = LocalSandboxProvider::new(dir.path().to_path_buf());
        let id = provider
            .acquire("nextjs-dev", Duration::from_secs(600))
            .await
            .unwrap();
        let journal: Arc<dyn StepJournal> = Arc::new(MemoryJournal::new());
        let tools = ToolLayer::new(Arc::new(provider.clone()), id.clone());
        (tools, Steps::new("run-1", journal), provider, id)
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call-1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, _, _) = setup(&dir).await;

        let outcome = tools.run_command("echo ready", &steps).await.unwrap();

        assert_eq!(
            outcome,
            ToolOutcome::Ok(CommandResult {
                stdout: "ready\n".to_string(),
                stderr: String::new(),
            })
        );
    }

    #[tokio::test]
    async fn failing_command_is_a_fault_with_collected_output() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, _, _) = setup(&dir).await;

        let outcome = tools
            .run_command("echo partial; echo broken >&2; exit 2", &steps)
            .await
            .unwrap();

        match outcome {
            ToolOutcome::Fault(message) => {
                assert!(message.contains("exit code 2"));
                assert!(message.contains("partial"));
                assert!(message.contains("broken"));
            }
            ToolOutcome::Ok(_) => panic!("expected a fault"),
        }
    }

    #[tokio::test]
    async fn write_files_merges_into_previous_map() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, provider, id) = setup(&dir).await;

        let mut previous = FileMap::new();
        previous.insert("lib/utils.ts".to_string(), "utils".to_string());

        let outcome = tools
            .write_files(
                vec![FileEntry {
                    path: "app/page.tsx".to_string(),
                    content: "page".to_string(),
                }],
                &previous,
                &steps,
            )
            .await
            .unwrap();

        let ToolOutcome::Ok(files) = outcome else {
            panic!("expected files");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(files["lib/utils.ts"], "utils");
        assert_eq!(
            std::fs::read_to_string(provider.workspace_path(&id).join("app/page.tsx")).unwrap(),
            "page"
        );
    }

    #[tokio::test]
    async fn write_files_rejects_absolute_paths_without_writing() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, provider, id) = setup(&dir).await;

        let outcome = tools
            .write_files(
                vec![
                    FileEntry {
                        path: "app/ok.tsx".to_string(),
                        content: "ok".to_string(),
                    },
                    FileEntry {
                        path: "/home/user/app/page.tsx".to_string(),
                        content: "bad".to_string(),
                    },
                ],
                &FileMap::new(),
                &steps,
            )
            .await
            .unwrap();

        assert!(outcome.is_fault());
        assert!(!provider.workspace_path(&id).join("app/ok.tsx").exists());
    }

    #[tokio::test]
    async fn read_files_serializes_entries() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, provider, id) = setup(&dir).await;
        std::fs::write(provider.workspace_path(&id).join("README.md"), "hi").unwrap();

        let result = tools
            .dispatch(
                &call(READ_FILES, json!({ "files": ["/home/user/README.md"] })),
                &AgentState::new(),
                &steps,
            )
            .await
            .unwrap();

        assert!(!result.record.faulted);
        let entries: Vec<FileEntry> = serde_json::from_str(&result.record.result).unwrap();
        assert_eq!(entries[0].content, "hi");
        assert!(result.delta.is_none());
    }

    #[tokio::test]
    async fn missing_file_read_is_a_fault() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, _, _) = setup(&dir).await;

        let outcome = tools
            .read_files(vec!["/home/user/nope.ts".to_string()], &steps)
            .await
            .unwrap();

        assert!(outcome.is_fault());
    }

    #[tokio::test]
    async fn dispatch_write_produces_files_delta() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, _, _) = setup(&dir).await;

        let result = tools
            .dispatch(
                &call(
                    WRITE_FILES,
                    json!({ "files": [{ "path": "app/page.tsx", "content": "x" }] }),
                ),
                &AgentState::new(),
                &steps,
            )
            .await
            .unwrap();

        match result.delta {
            Some(StateDelta::Files(files)) => assert_eq!(files["app/page.tsx"], "x"),
            other => panic!("expected files delta, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_faults() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, _, _) = setup(&dir).await;
        let state = AgentState::new();

        let unknown = tools
            .dispatch(&call("deploy", json!({})), &state, &steps)
            .await
            .unwrap();
        let malformed = tools
            .dispatch(&call(TERMINAL, json!({ "cmd": "ls" })), &state, &steps)
            .await
            .unwrap();

        assert!(unknown.record.faulted);
        assert!(unknown.record.result.contains("Unknown tool"));
        assert!(malformed.record.faulted);
        assert!(malformed.record.result.contains("Invalid arguments"));
    }

    #[tokio::test]
    async fn expired_session_propagates_as_error() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(crate::clock::ManualClock::default());
        let provider =
            LocalSandboxProvider::new(dir.path().to_path_buf()).with_clock(clock.clone());
        let id = provider
            .acquire("nextjs-dev", Duration::from_secs(60))
            .await
            .unwrap();
        let tools = ToolLayer::new(Arc::new(provider), id);
        let steps = Steps::new("run-1", Arc::new(MemoryJournal::new()));

        clock.advance(chrono::Duration::minutes(5));

        let result = tools.run_command("echo hi", &steps).await;
        assert!(matches!(result, Err(Error::SessionExpired { .. })));
    }

    #[test]
    fn relative_path_guard() {
        assert_eq!(
            normalize_relative_path("app/page.tsx").as_deref(),
            Some("app/page.tsx")
        );
        assert_eq!(
            normalize_relative_path("./lib/utils.ts").as_deref(),
            Some("lib/utils.ts")
        );
        assert_eq!(
            normalize_relative_path("app/./nested//page.tsx").as_deref(),
            Some("app/nested/page.tsx")
        );
        assert_eq!(normalize_relative_path("/home/user/app/page.tsx"), None);
        assert_eq!(normalize_relative_path("../outside.ts"), None);
        assert_eq!(normalize_relative_path("app/../../outside.ts"), None);
        assert_eq!(normalize_relative_path("."), None);
        assert_eq!(normalize_relative_path(""), None);
    }

    #[tokio::test]
    async fn different_spellings_of_a_path_share_one_key() {
        let dir = TempDir::new().unwrap();
        let (tools, steps, provider, id) = setup(&dir).await;

        let first = tools
            .write_files(
                vec![FileEntry {
                    path: "app/page.tsx".to_string(),
                    content: "v1".to_string(),
                }],
                &FileMap::new(),
                &steps,
            )
            .await
            .unwrap();
        let ToolOutcome::Ok(files) = first else {
            panic!("expected files");
        };

        let second = tools
            .write_files(
                vec![
                    FileEntry {
                        path: "./app/page.tsx".to_string(),
                        content: "v2".to_string(),
                    },
                    FileEntry {
                        path: "app//lib/./util.ts".to_string(),
                        content: "util".to_string(),
                    },
                ],
                &files,
                &steps,
            )
            .await
            .unwrap();
        let ToolOutcome::Ok(files) = second else {
            panic!("expected files");
        };

        assert_eq!(
            files.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["app/lib/util.ts", "app/page.tsx"]
        );
        assert_eq!(files["app/page.tsx"], "v2");
        assert_eq!(
            std::fs::read_to_string(provider.workspace_path(&id).join("app/page.tsx")).unwrap(),
            "v2"
        );
    }

    #[test]
    fn tool_outcome_serializes_with_status_tag() {
        let fault: ToolOutcome<String> = ToolOutcome::Fault("boom".to_string());
        assert_eq!(
            serde_json::to_string(&fault).unwrap(),
            r#"{"status":"fault","value":"boom"}"#
        );
    }

    #[test]
    fn definitions_cover_all_tools() {
        let names: Vec<String> = ToolLayer::definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec![TERMINAL, WRITE_FILES, READ_FILES]);
    }
}
