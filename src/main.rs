//! Code Agent Drive CLI
//!
//! Runs one coding-agent request end to end against local sandboxes.

use std::sync::Arc;
use std::time::Duration;

use code_agent_drive::{
    ChatCompletionsClient, CodeAgentWorkflow, DriveConfig, FileJournal, JsonlMessageStore,
    LocalSandboxProvider, RetryPolicy, RunOutcome, TriggerEvent, Validate, WorkflowConfig,
    FAILURE_MESSAGE,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} [--run-id <id>] <prompt>", args[0]);
        eprintln!("       {} --history", args[0]);
        eprintln!("\nAsks a coding agent to build the request inside a sandbox.");
        eprintln!("Passing the id of an interrupted run resumes it.");
        eprintln!("--history lists saved results.");
        eprintln!("\nEnvironment variables:");
        eprintln!("  CODE_AGENT_CONFIG    Path of the TOML config file");
        eprintln!("  CODE_AGENT_TEMPLATE  Sandbox template id");
        eprintln!("  CODE_AGENT_MODEL     Model name");
        std::process::exit(1);
    }

    let config = match DriveConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(1);
        }
    };

    match config.validate().into_result() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!(warning = %warning, "config warning");
            }
        }
        Err(e) => {
            eprintln!("Invalid config: {}", e);
            std::process::exit(1);
        }
    }

    if args[1] == "--history" {
        let store = JsonlMessageStore::new(config.storage.messages_path.clone());
        match store.read_all().await {
            Ok(messages) => {
                for stored in messages {
                    println!(
                        "{}  {}  {:?}  {}",
                        stored.created_at.format("%Y-%m-%d %H:%M:%S"),
                        stored.id,
                        stored.message.kind,
                        stored.message.content
                    );
                    if let Some(fragment) = stored.message.fragment {
                        println!("    {} ({} files)", fragment.sandbox_url, fragment.files.len());
                    }
                }
            }
            Err(e) => {
                eprintln!("Failed to read history: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let (run_id, prompt) = match args[1].as_str() {
        "--run-id" if args.len() > 3 => (Some(args[2].clone()), args[3..].join(" ")),
        "--run-id" => {
            eprintln!("--run-id needs an id and a prompt");
            std::process::exit(1);
        }
        _ => (None, args[1..].join(" ")),
    };

    let api_key = match config.agent.api_key() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let retry = RetryPolicy::new(
        config.agent.max_retries,
        Duration::from_millis(500),
        Duration::from_secs(8),
    );
    let model = match ChatCompletionsClient::new(
        config.agent.base_url.clone(),
        api_key,
        config.agent.model.clone(),
    ) {
        Ok(client) => client.with_retry(retry),
        Err(e) => {
            eprintln!("Failed to create model client: {}", e);
            std::process::exit(1);
        }
    };

    let mut provider = LocalSandboxProvider::new(config.sandbox.base_dir.clone())
        .with_work_dir(config.sandbox.work_dir.clone())
        .with_host(config.sandbox.host.clone())
        .with_command_timeout(config.sandbox.command_timeout());
    if let Some(root) = &config.sandbox.template_root {
        provider = provider.with_template_root(root.clone());
    }

    let workflow = CodeAgentWorkflow::new(
        Arc::new(provider),
        Arc::new(model),
        Arc::new(JsonlMessageStore::new(config.storage.messages_path.clone())),
        Arc::new(FileJournal::new(config.storage.journal_dir.clone())),
        WorkflowConfig::from(&config),
    );

    let mut event = TriggerEvent::run(prompt);
    if let Some(id) = run_id {
        event = event.with_id(id);
    }

    tracing::info!(model = %config.agent.model, "starting run");

    match workflow.run(event).await {
        Ok(result) if result.outcome == RunOutcome::Success => {
            println!("\n{}", "=".repeat(60));
            println!("{}: {}", result.title, result.url);
            println!("{}", "=".repeat(60));
            println!();
            println!("Summary:");
            println!("  {}", result.summary);
            println!();
            println!("Files:");
            for path in result.files.keys() {
                println!("  {}", path);
            }
        }
        Ok(_) => {
            eprintln!("{}", FAILURE_MESSAGE);
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            eprintln!("{}", FAILURE_MESSAGE);
            std::process::exit(1);
        }
    }
}
