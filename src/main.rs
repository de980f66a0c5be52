//! The `k6s` entry point for hook subprocesses and the read-only
//! report/verify surface.
//!
//! Hook subcommands always exit 0 on clean paths, including every
//! no-op, so a missing session never breaks the host runtime. Only
//! unrecoverable initialization failures and failed verifications exit
//! non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use k6s_core::ids::SessionId;
use k6s_engine::audit;
use k6s_engine::report::ReportGenerator;
use k6s_engine::signing;
use k6s_engine::StateManager;
use k6s_hooks::{HookPayload, Pipeline, PipelineOutcome};
use k6s_store::Store;
use k6s_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "k6s", about = "Khoregos governance engine")]
struct Args {
    /// Project root. Defaults to the current directory.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: CommandKind,
}

#[derive(Subcommand)]
enum CommandKind {
    /// Hook handlers invoked by the agent runtime (stdin JSON).
    #[command(subcommand)]
    Hook(HookKind),

    /// Render a session report.
    Report {
        /// Session ID, or "latest".
        #[arg(long, short, default_value = "latest")]
        session: String,
        /// Emit JSON instead of markdown.
        #[arg(long)]
        json: bool,
    },

    /// Verify a session's audit chain. Exits non-zero on tamper.
    Verify {
        /// Session ID, or "latest".
        #[arg(long, short, default_value = "latest")]
        session: String,
    },

    /// Delete audit events older than the cutoff, pruning empty
    /// terminal sessions.
    AuditPrune {
        /// ISO-8601 cutoff; events strictly older are removed.
        #[arg(long)]
        before: String,
        /// Report counts without deleting.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum HookKind {
    /// PostToolUse: audit, enforce, annotate.
    PostToolUse,
    /// SubagentStart: register the spawned agent.
    SubagentStart,
    /// SubagentStop: mark the agent completed, release its locks.
    SubagentStop,
    /// Stop: close the session and clear the liveness flag.
    SessionStop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let cwd = args
        .project
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    match args.command {
        CommandKind::Hook(kind) => run_hook(&cwd, &kind).await,
        CommandKind::Report { session, json } => run_report(&cwd, &session, json),
        CommandKind::Verify { session } => run_verify(&cwd, &session),
        CommandKind::AuditPrune { before, dry_run } => run_prune(&cwd, &before, dry_run),
    }
}

async fn run_hook(cwd: &std::path::Path, kind: &HookKind) -> ExitCode {
    let pipeline = match Pipeline::discover(cwd) {
        Ok(Some(pipeline)) => pipeline,
        // No live session anywhere near: silent no-op.
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("k6s: hook initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let khoregos = pipeline.project_root().join(".khoregos");
    let telemetry = k6s_telemetry::init_telemetry(&TelemetryConfig::for_project(&khoregos));
    let pipeline = match telemetry.metrics() {
        Some(metrics) => pipeline.with_metrics(metrics),
        None => pipeline,
    };

    let payload = HookPayload::read_from(&mut std::io::stdin().lock());

    let outcome = match kind {
        HookKind::PostToolUse => match &payload {
            Some(payload) => pipeline.post_tool_use(payload),
            None => Ok(PipelineOutcome::NoOp("unreadable payload".to_owned())),
        },
        HookKind::SubagentStart => match &payload {
            Some(payload) => pipeline.subagent_start(payload),
            None => Ok(PipelineOutcome::NoOp("unreadable payload".to_owned())),
        },
        HookKind::SubagentStop => match &payload {
            Some(payload) => pipeline.subagent_stop(payload),
            None => Ok(PipelineOutcome::NoOp("unreadable payload".to_owned())),
        },
        HookKind::SessionStop => pipeline.session_stop(),
    };

    match outcome {
        Ok(PipelineOutcome::Completed(event)) => {
            info!(sequence = event.sequence, event_type = %event.event_type, "hook handled");
        }
        Ok(PipelineOutcome::NoOp(reason)) => {
            info!(reason, "hook no-op");
        }
        // A live session with a failing write is reported but never
        // breaks the host runtime's tool flow.
        Err(e) => error!(error = %e, "hook pipeline failed"),
    }

    telemetry.flush();
    ExitCode::SUCCESS
}

fn open_project(cwd: &std::path::Path) -> Result<(PathBuf, Store), String> {
    let khoregos = cwd.join(".khoregos");
    if !khoregos.join("k6s.db").exists() {
        return Err(format!(
            "no governance data at {} (expected .khoregos/k6s.db)",
            cwd.display()
        ));
    }
    let store = Store::new(khoregos.join("k6s.db"));
    store.connect().map_err(|e| e.to_string())?;
    Ok((khoregos, store))
}

fn resolve_session(store: &Store, selector: &str) -> Result<SessionId, String> {
    if selector != "latest" {
        return Ok(SessionId::from_raw(selector));
    }
    let manager = StateManager::new(store.clone());
    match manager.get_latest_session() {
        Ok(Some(session)) => Ok(session.id),
        Ok(None) => Err("no sessions recorded".to_owned()),
        Err(e) => Err(e.to_string()),
    }
}

fn run_report(cwd: &std::path::Path, selector: &str, json: bool) -> ExitCode {
    let (khoregos, store) = match open_project(cwd) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("k6s: {e}");
            return ExitCode::FAILURE;
        }
    };
    let session_id = match resolve_session(&store, selector) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("k6s: {e}");
            return ExitCode::FAILURE;
        }
    };

    let key = signing::load_key(&khoregos).ok().flatten();
    let generator = ReportGenerator::new(store);
    match generator.generate(&session_id, key.as_ref()) {
        Ok(report) => {
            let rendered = if json {
                report.to_json().unwrap_or_else(|e| e.to_string())
            } else {
                report.to_markdown()
            };
            println!("{rendered}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("k6s: report failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_verify(cwd: &std::path::Path, selector: &str) -> ExitCode {
    let (khoregos, store) = match open_project(cwd) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("k6s: {e}");
            return ExitCode::FAILURE;
        }
    };
    let session_id = match resolve_session(&store, selector) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("k6s: {e}");
            return ExitCode::FAILURE;
        }
    };

    let key = match signing::load_key(&khoregos) {
        Ok(Some(key)) => key,
        Ok(None) => {
            eprintln!("k6s: no signing key; nothing to verify");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("k6s: {e}");
            return ExitCode::FAILURE;
        }
    };

    match ReportGenerator::new(store).verify_session(&session_id, &key) {
        Ok(result) => {
            match serde_json::to_string_pretty(&result) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => eprintln!("k6s: {e}"),
            }
            if result.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("k6s: verification failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_prune(cwd: &std::path::Path, before: &str, dry_run: bool) -> ExitCode {
    let (_khoregos, store) = match open_project(cwd) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("k6s: {e}");
            return ExitCode::FAILURE;
        }
    };

    match audit::prune(&store, before, dry_run) {
        Ok(outcome) => {
            let label = if dry_run { "would delete" } else { "deleted" };
            println!(
                "{label} {} events, {} sessions",
                outcome.events_deleted, outcome.sessions_pruned
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("k6s: prune failed: {e}");
            ExitCode::FAILURE
        }
    }
}
