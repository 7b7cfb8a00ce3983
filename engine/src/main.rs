use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quill_core::ConfigStore;
use quill_observability::{
    canonical_logs_dir_from_root, emit_event, init_process_logging, ObservabilityEvent, ProcessKind,
};
use quill_orchestrator::{
    CheckpointStore, RunCheckpoint, RunOutcome, RunRequest, RunStatus, WorkflowRunner,
    WorkflowServices,
};
use quill_profile::{
    AdapterRegistry, ProfileAnalyzer, ProfilePipeline, SnapshotAdapter, SocialMediaAdapter,
    SocialPlatform,
};
use quill_providers::ProviderRegistry;
use quill_types::ModelClass;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(about = "Plan, research and report on a question with LLM agents")]
struct Cli {
    /// Directory for run checkpoints, logs and the project config.
    #[arg(long, global = true, env = "QUILL_STATE_DIR")]
    state_dir: Option<PathBuf>,
    /// Project config file; defaults to `<state-dir>/config.json`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a research run.
    Run {
        query: String,
        #[arg(long, default_value_t = false)]
        auto_accept: bool,
        #[arg(long, default_value_t = false)]
        no_background: bool,
        #[arg(long)]
        locale: Option<String>,
        #[arg(long)]
        max_plan_iterations: Option<u32>,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Answer a run that is waiting for plan feedback.
    Resume { run_id: String, feedback: String },
    Show { run_id: String },
    List,
    Cancel { run_id: String },
    /// Print the configuration layers with secrets redacted.
    Config,
    /// Analyze a captured social profile.
    Profile {
        url: String,
        #[arg(long)]
        profile_json: PathBuf,
        #[arg(long)]
        posts_json: Option<PathBuf>,
        #[arg(long)]
        platform: Option<SocialPlatform>,
        /// Keep the analyzed profile and posts in the output.
        #[arg(long, default_value_t = false)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = resolve_state_dir(cli.state_dir);
    let logs_dir = canonical_logs_dir_from_root(&state_dir);
    let (_log_guard, log_info) = init_process_logging(ProcessKind::Cli, &logs_dir, 14)?;
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Cli,
        ObservabilityEvent {
            status: Some("ok"),
            detail: Some("cli jsonl logging initialized"),
            ..ObservabilityEvent::new("logging.initialized", "engine.main")
        },
    );
    info!("cli logging initialized: {:?}", log_info);
    let config_path = cli
        .config
        .unwrap_or_else(|| state_dir.join("config.json"));

    match cli.command {
        Command::Run {
            query,
            auto_accept,
            no_background,
            locale,
            max_plan_iterations,
            run_id,
        } => {
            let runner =
                build_runner(&state_dir, &config_path, build_cli_overrides(max_plan_iterations)).await?;
            let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let request = RunRequest {
                query,
                locale,
                auto_accepted_plan: auto_accept,
                enable_background_investigation: !no_background,
                run_id: Some(run_id.clone()),
            };
            let interrupt = runner.clone();
            let interrupt_id = run_id.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!(run_id = %interrupt_id, "interrupted; cancelling run");
                    if let Err(err) = interrupt.cancel(&interrupt_id).await {
                        tracing::error!("failed to cancel run {interrupt_id}: {err}");
                    }
                }
            });
            let outcome = runner.start(request).await?;
            print_outcome(&outcome);
        }
        Command::Resume { run_id, feedback } => {
            let runner = build_runner(&state_dir, &config_path, None).await?;
            let outcome = runner.resume(&run_id, feedback).await?;
            print_outcome(&outcome);
        }
        Command::Show { run_id } => {
            let store = CheckpointStore::new(runs_dir(&state_dir)).await?;
            let checkpoint = store
                .load(&run_id)
                .await?
                .with_context(|| format!("run `{run_id}` not found"))?;
            print_checkpoint(&checkpoint);
        }
        Command::List => {
            let store = CheckpointStore::new(runs_dir(&state_dir)).await?;
            let runs = store.list().await?;
            if runs.is_empty() {
                println!("No runs in {}", store.dir().display());
            }
            for run in runs {
                println!("{}", list_line(&run));
            }
        }
        Command::Cancel { run_id } => {
            let runner = build_runner(&state_dir, &config_path, None).await?;
            let status = runner.cancel(&run_id).await?;
            println!("Run {run_id} is {status}.");
        }
        Command::Config => {
            let store = ConfigStore::new(&config_path, None).await?;
            println!("global:  {}", store.global_path().display());
            println!("project: {}", store.project_path().display());
            println!("{}", serde_json::to_string_pretty(&store.get_layers_value().await)?);
        }
        Command::Profile {
            url,
            profile_json,
            posts_json,
            platform,
            raw,
        } => {
            let platform = resolve_platform(&url, platform)?;
            let config = ConfigStore::new(&config_path, None).await?.get().await?;
            let provider = ProviderRegistry::new(&config.llm)
                .select_provider(ModelClass::Standard)
                .await?;
            let adapter: Arc<dyn SocialMediaAdapter> = Arc::new(
                SnapshotAdapter::from_files(platform, &profile_json, posts_json.as_deref()).await?,
            );
            let pipeline = ProfilePipeline::new(
                AdapterRegistry::from_adapters([adapter]),
                ProfileAnalyzer::new(provider),
            );
            let mut report = pipeline.run(&url, Some(platform)).await?;
            if !raw {
                report.raw_data = None;
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn resolve_state_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag.filter(|dir| !dir.as_os_str().is_empty()) {
        return dir;
    }
    dirs::data_dir()
        .map(|dir| dir.join("quill"))
        .unwrap_or_else(|| PathBuf::from(".quill"))
}

fn runs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("runs")
}

fn build_cli_overrides(max_plan_iterations: Option<u32>) -> Option<serde_json::Value> {
    let mut root = serde_json::Map::new();
    if let Some(n) = max_plan_iterations {
        root.insert("max_plan_iterations".to_string(), serde_json::Value::from(n));
    }
    if root.is_empty() {
        return None;
    }
    Some(serde_json::Value::Object(root))
}

async fn build_runner(
    state_dir: &Path,
    config_path: &Path,
    cli_overrides: Option<serde_json::Value>,
) -> anyhow::Result<WorkflowRunner> {
    let config = ConfigStore::new(config_path, cli_overrides).await?;
    let config = config.get().await?;
    info!(
        "runner config: max_plan_iterations={} max_step_num={} search={:?}",
        config.max_plan_iterations, config.max_step_num, config.search.engine
    );
    let services = WorkflowServices::from_config(config).await?;
    let store = CheckpointStore::new(runs_dir(state_dir)).await?;
    Ok(WorkflowRunner::new(services, store))
}

fn resolve_platform(url: &str, flag: Option<SocialPlatform>) -> anyhow::Result<SocialPlatform> {
    flag.or_else(|| SocialPlatform::from_url(url)).with_context(|| {
        format!("cannot detect the platform of `{url}`; pass --platform")
    })
}

fn print_outcome(outcome: &RunOutcome) {
    match &outcome.status {
        RunStatus::AwaitingFeedback => {
            if let Some(plan) = outcome.pending_plan() {
                println!("{plan}\n");
            }
            println!(
                "{}\nRun {} is waiting for feedback: quill resume {} \"[ACCEPTED]\" or \"[EDIT_PLAN] <changes>\"",
                outcome.interrupt.as_deref().unwrap_or_default(),
                outcome.run_id,
                outcome.run_id
            );
        }
        RunStatus::Completed => match outcome.final_report() {
            Some(report) => println!("{report}"),
            None => println!("Run {} completed without a report.", outcome.run_id),
        },
        status => println!("Run {} is {status}.", outcome.run_id),
    }
}

fn print_checkpoint(checkpoint: &RunCheckpoint) {
    println!("run:        {}", checkpoint.run_id);
    println!("status:     {}", checkpoint.status);
    println!("node:       {}", checkpoint.node);
    println!("revision:   {}", checkpoint.revision);
    println!("updated:    {}", format_timestamp(checkpoint.updated_at_ms));
    println!("locale:     {}", checkpoint.state.locale);
    println!("iterations: {}", checkpoint.state.plan_iterations);
    if let RunStatus::Failed { error } = &checkpoint.status {
        println!("error:      {error}");
    }
    if let Some(plan) = checkpoint.state.current_plan.display_text() {
        println!("\n{plan}");
    }
    if !checkpoint.state.final_report.is_empty() {
        println!("\n{}", checkpoint.state.final_report);
    }
}

fn list_line(checkpoint: &RunCheckpoint) -> String {
    let query = checkpoint
        .state
        .latest_user_message()
        .map(|m| m.content.chars().take(60).collect::<String>())
        .unwrap_or_default();
    format!(
        "{}\t{}\t{}\t{}",
        checkpoint.run_id,
        checkpoint.status,
        format_timestamp(checkpoint.updated_at_ms),
        query
    )
}

fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_only_carry_given_flags() {
        assert!(build_cli_overrides(None).is_none());
        let overrides = build_cli_overrides(Some(3)).expect("some");
        assert_eq!(overrides["max_plan_iterations"], 3);
    }

    #[test]
    fn explicit_state_dir_wins() {
        assert_eq!(
            resolve_state_dir(Some(PathBuf::from("/tmp/quill-state"))),
            PathBuf::from("/tmp/quill-state")
        );
    }

    #[test]
    fn platform_flag_overrides_detection() {
        assert_eq!(
            resolve_platform("https://www.linkedin.com/in/ada", None).expect("platform"),
            SocialPlatform::Linkedin
        );
        assert_eq!(
            resolve_platform("https://example.com/ada", Some(SocialPlatform::Github))
                .expect("platform"),
            SocialPlatform::Github
        );
        let err = resolve_platform("https://example.com/ada", None).unwrap_err();
        assert!(err.to_string().contains("pass --platform"));
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "quill",
            "run",
            "How fast is EV adoption growing?",
            "--auto-accept",
            "--max-plan-iterations",
            "2",
        ])
        .expect("parse");
        match cli.command {
            Command::Run {
                auto_accept,
                max_plan_iterations,
                ..
            } => {
                assert!(auto_accept);
                assert_eq!(max_plan_iterations, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from([
            "quill",
            "profile",
            "https://x.com/ada",
            "--profile-json",
            "p.json",
            "--platform",
            "x",
        ])
        .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Profile {
                platform: Some(SocialPlatform::X),
                ..
            }
        ));
    }
}
