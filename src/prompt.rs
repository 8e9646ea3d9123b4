//! System prompt and completion marker handling.

/// Opening tag the agent's final message must contain.
pub const COMPLETION_MARKER: &str = "<task_summary>";

/// Closing tag of the completion marker.
pub const COMPLETION_MARKER_END: &str = "</task_summary>";

/// Builds the system prompt for the coding agent.
pub fn system_prompt(work_dir: &str, app_port: u16) -> String {
    format!(
        r#"You are a senior software engineer building Next.js apps in a sandboxed environment.

Tools:
- terminal: run shell commands, e.g. "npm install <package> --yes".
- create-or-update-files: write files. Paths MUST be relative, e.g. "app/page.tsx".
- read-files: read files. Paths MUST be absolute, e.g. "{work_dir}/app/page.tsx".

Environment:
- Working directory: {work_dir}
- A dev server with hot reload is already running on port {app_port}. Never run npm run dev, build or start.
- The main entry is app/page.tsx. layout.tsx exists; never emit <html> or <body>.
- Install packages with the terminal before writing code that imports them.
- Add "use client" as the first line of any file using React hooks or browser APIs.

When every tool call is done, reply exactly once with:

{marker}
Short description of what was created or changed.
{marker_end}

This marks the task finished."#,
        work_dir = work_dir.trim_end_matches('/'),
        app_port = app_port,
        marker = COMPLETION_MARKER,
        marker_end = COMPLETION_MARKER_END,
    )
}

/// Extracts the summary from an assistant message carrying the completion marker.
///
/// Returns the text between the tags, or everything after the opening tag if
/// it is never closed. An empty body falls back to the whole message.
/// Returns `None` if the marker is absent.
pub fn extract_summary(text: &str) -> Option<String> {
    let start = text.find(COMPLETION_MARKER)? + COMPLETION_MARKER.len();
    let rest = &text[start..];
    let body = match rest.find(COMPLETION_MARKER_END) {
        Some(end) => &rest[..end],
        None => rest,
    };

    let body = body.trim();
    if body.is_empty() {
        Some(text.trim().to_string())
    } else {
        Some(body.to_string())
    }
}
