use crate::output::print_json;
use anyhow::bail;
use shipgate_client::HttpStoryService;
use shipgate_core::config::Config;
use shipgate_core::controller::{DeploymentController, DeploymentView, Phase};
use shipgate_core::events::{self, SessionEvent};
use shipgate_core::poll::PollPolicy;
use shipgate_core::session::StorySession;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

#[derive(clap::Args)]
pub struct DeployArgs {
    /// Story id, e.g. US-101
    pub story: String,

    /// Mark a checklist item done before starting (repeatable)
    #[arg(long = "check", value_name = "ITEM")]
    pub check: Vec<String>,

    /// Mark every checklist item done
    #[arg(long)]
    pub all: bool,

    /// Evaluate the gate but do not submit
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(config: &Config, args: DeployArgs, json: bool) -> anyhow::Result<()> {
    let service = Arc::new(super::service(config)?);
    let policy = config.poll_policy();
    super::block_on(deploy(service, policy, args, json))
}

async fn deploy(
    service: Arc<HttpStoryService>,
    policy: PollPolicy,
    args: DeployArgs,
    json: bool,
) -> anyhow::Result<()> {
    let session = StorySession::open(&args.story, service, policy, events::channel()).await?;
    let result = drive(&session, &args, json).await;
    session.teardown().await;
    result
}

async fn drive(session: &StorySession, args: &DeployArgs, json: bool) -> anyhow::Result<()> {
    let controller = session.controller();
    let initial = controller.snapshot().await;
    for id in &args.check {
        if !initial.checklist.iter().any(|i| &i.id == id) {
            bail!("unknown checklist item '{id}' for story '{}'", args.story);
        }
        controller.set_done(id, true).await?;
    }
    if args.all {
        for item in &initial.checklist {
            controller.set_done(&item.id, true).await?;
        }
    }

    if args.dry_run {
        let view = controller.snapshot().await;
        if json {
            print_json(&view)?;
        } else {
            print_gate(&view);
        }
        return Ok(());
    }

    let mut rx = controller.subscribe();
    let handle = controller.start().await?;
    if !json {
        println!("Submitted {} as run {handle}", args.story);
    }

    let phase = tokio::select! {
        phase = wait_terminal(controller, &mut rx, json) => phase,
        _ = tokio::signal::ctrl_c() => {
            bail!("interrupted; run {handle} keeps going upstream but is no longer tracked");
        }
    };

    let view = controller.snapshot().await;
    if json {
        print_json(&view)?;
    }
    let run = view.current_run.as_ref();
    match phase {
        Phase::Completed => {
            if !json {
                println!("Deployment of {} completed", args.story);
                if let Some(result) = run.and_then(|r| r.result.as_ref()) {
                    println!("{}", serde_json::to_string_pretty(result)?);
                }
            }
            Ok(())
        }
        _ => {
            let reason = run
                .and_then(|r| r.error.clone())
                .or(view.last_error)
                .unwrap_or_else(|| "unknown error".to_string());
            bail!("deployment of {} failed: {reason}", args.story)
        }
    }
}

/// Follow the session's events until the controller settles in a terminal
/// phase, echoing progress unless `json` is set.
async fn wait_terminal(
    controller: &DeploymentController,
    rx: &mut Receiver<SessionEvent>,
    json: bool,
) -> Phase {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::PhaseChanged { from, to, .. }) => {
                if !json {
                    println!("  {from} → {to}");
                }
                if to.is_terminal() {
                    return to;
                }
            }
            Ok(SessionEvent::RunUpdated { run, .. }) => {
                if !json {
                    println!("  run {}: {}", run.id, run.state);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {
                let phase = controller.phase().await;
                if phase.is_terminal() {
                    return phase;
                }
            }
            Err(RecvError::Closed) => return controller.phase().await,
        }
    }
}

fn print_gate(view: &DeploymentView) {
    for item in &view.checklist {
        let mark = if item.done { "x" } else { " " };
        let req = if item.required { " (required)" } else { "" };
        println!("[{mark}] {}  {}{req}", item.id, item.label);
    }
    if view.can_proceed {
        println!("Gate open: {} is ready to deploy", view.story_id);
    } else {
        println!("Gate closed: still required {}", view.blocking.join(", "));
    }
}
