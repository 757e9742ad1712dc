use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use empirica::api::Core;
use empirica::cli::{commands, output};

#[derive(Parser)]
#[command(name = "empirica")]
#[command(
    version,
    about = "Metacognitive state engine for AI agents: epistemic checkpoints, CASCADE gating, drift detection"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root holding .empirica state (defaults to the current directory)
    #[arg(long, short, default_value = ".")]
    project: PathBuf,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Create a cascade within a session
    Cascade {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long, help = "Free-form task description")]
        task: String,
        #[arg(long, help = "Context JSON attached to the cascade")]
        context: Option<String>,
        #[arg(long, help = "Goal this cascade works toward")]
        goal: Option<String>,
    },

    /// Submit a PREFLIGHT self-assessment (opens a transaction)
    Preflight {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        cascade: Option<String>,
        #[arg(long, help = "Sign the reflex with this agent's identity")]
        sign: bool,
        #[arg(long, help = "Assessment JSON; '-' or omitted reads stdin")]
        payload: Option<String>,
    },

    /// Submit a CHECK self-assessment
    Check {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        cascade: Option<String>,
        #[arg(long, help = "proceed, proceed_with_caution, or investigate")]
        decision: String,
        #[arg(long, help = "Expected round number; rejected when it skips")]
        round: Option<u32>,
        #[arg(long = "finding", help = "Investigation finding (repeatable)")]
        findings: Vec<String>,
        #[arg(long = "unknown", help = "Remaining unknown (repeatable)")]
        unknowns: Vec<String>,
        #[arg(long)]
        sign: bool,
        #[arg(long, help = "Assessment JSON; '-' or omitted reads stdin")]
        payload: Option<String>,
    },

    /// Submit an ACT self-assessment
    Act {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        cascade: Option<String>,
        #[arg(long)]
        sign: bool,
        #[arg(long, help = "Assessment JSON; '-' or omitted reads stdin")]
        payload: Option<String>,
    },

    /// Submit a POSTFLIGHT self-assessment (closes the transaction)
    Postflight {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        cascade: Option<String>,
        #[arg(long, help = "Grounded evidence records JSON")]
        evidence: Option<String>,
        #[arg(long)]
        sign: bool,
        #[arg(long, help = "Assessment JSON; '-' or omitted reads stdin")]
        payload: Option<String>,
    },

    /// Manage goals and subtasks
    Goal {
        #[command(subcommand)]
        action: GoalAction,
    },

    /// Log and query breadcrumbs
    Breadcrumb {
        #[command(subcommand)]
        action: BreadcrumbAction,
    },

    /// Manage Ed25519 identities and verify signed reflexes
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Manage cross-session projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Inspect git-note checkpoints
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Administrative maintenance
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a session
    Create {
        #[arg(long)]
        ai_id: String,
        #[arg(long, default_value = "0")]
        bootstrap_level: i64,
        #[arg(long)]
        project_id: Option<String>,
        #[arg(long, help = "Workstream tag")]
        subject: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Fetch a session by id, prefix, or alias
    Get { session: String },
    /// End a session
    End { session: String },
    /// List sessions
    List {
        #[arg(long)]
        ai_id: Option<String>,
        #[arg(long, help = "Only sessions with no end time")]
        active: bool,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Load an epistemic trajectory summary for resuming work
    Resume {
        #[arg(long)]
        ai_id: String,
        #[arg(long, help = "Summarise the last N sessions")]
        last_n: Option<usize>,
        #[arg(long, help = "Summarise one specific session")]
        session: Option<String>,
        #[arg(long, help = "Include the full reflex list")]
        full: bool,
    },
    /// Record a handoff summary for a later agent
    Handoff {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        summary: String,
        #[arg(long)]
        next_steps: Option<String>,
    },
}

#[derive(Subcommand)]
enum GoalAction {
    Create {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        objective: String,
        #[arg(long, default_value = "0.5")]
        breadth: f64,
        #[arg(long, default_value = "0.5")]
        duration: f64,
        #[arg(long, default_value = "0.5")]
        coordination: f64,
        #[arg(long)]
        complexity: Option<f64>,
    },
    AddSubtask {
        goal: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "medium")]
        importance: String,
    },
    CompleteSubtask {
        subtask: String,
        #[arg(long)]
        evidence: Option<String>,
    },
    Progress { goal: String },
    List {
        #[arg(long)]
        session: Option<String>,
    },
    Claim {
        goal: String,
        #[arg(long)]
        ai_id: String,
    },
    Complete { goal: String },
}

#[derive(Subcommand)]
enum BreadcrumbAction {
    /// Append a finding, unknown, dead_end, or mistake
    Log {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        kind: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        goal: Option<String>,
        #[arg(long)]
        subtask: Option<String>,
        #[arg(long)]
        transaction: Option<String>,
    },
    Query {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, help = "Only unresolved unknowns")]
        unresolved: bool,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Resolve an unknown (immutable afterwards)
    Resolve {
        id: i64,
        #[arg(long)]
        resolver: String,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    Create {
        #[arg(long)]
        ai_id: String,
        #[arg(long, help = "Replace an existing keypair")]
        overwrite: bool,
    },
    List,
    Export {
        #[arg(long)]
        ai_id: String,
    },
    /// Verify the signature on a stored reflex
    Verify { reflex_id: i64 },
}

#[derive(Subcommand)]
enum ProjectAction {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long = "repo", help = "Linked repository (repeatable)")]
        repos: Vec<String>,
    },
    Get { project: String },
    List {
        #[arg(long, help = "active, dormant, or archived")]
        status: Option<String>,
    },
    SetStatus {
        project: String,
        #[arg(long)]
        status: String,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Re-mirror a stored reflex into git notes
    Create {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        phase: String,
        #[arg(long, default_value = "1")]
        round: u32,
    },
    Load {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        phase: String,
        #[arg(long, default_value = "1")]
        round: u32,
    },
    List {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
    },
    Diff {
        #[arg(long, short, default_value = "latest:active")]
        session: String,
        #[arg(long)]
        from_phase: String,
        #[arg(long, default_value = "1")]
        from_round: u32,
        #[arg(long)]
        to_phase: String,
        #[arg(long, default_value = "1")]
        to_round: u32,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Force-close transactions open longer than the horizon
    ForceClose {
        #[arg(long, help = "Override the configured horizon (hours)")]
        horizon_hours: Option<i64>,
    },
    /// Reap stale resolver context records
    ReapContexts,
    /// Retry deferred git-note writes once
    Reconcile,
    /// Run the background workers in the foreground
    Daemon {
        #[arg(long, default_value = "0", help = "0 runs until killed")]
        duration_secs: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let core = match Core::open(&cli.project) {
        Ok(core) => core,
        Err(e) => {
            return ExitCode::from(output::emit::<serde_json::Value>("open", &Err(e)));
        }
    };

    ExitCode::from(dispatch(&core, cli.command))
}

fn dispatch(core: &Core, command: Commands) -> u8 {
    match command {
        Commands::Session { action } => match action {
            SessionAction::Create {
                ai_id,
                bootstrap_level,
                project_id,
                subject,
                user_id,
            } => output::emit(
                "session.create",
                &commands::session::create(
                    core,
                    commands::session::CreateArgs {
                        ai_id,
                        bootstrap_level,
                        project_id,
                        subject,
                        user_id,
                    },
                ),
            ),
            SessionAction::Get { session } => {
                output::emit("session.get", &commands::session::get(core, &session))
            }
            SessionAction::End { session } => {
                output::emit("session.end", &commands::session::end(core, &session))
            }
            SessionAction::List {
                ai_id,
                active,
                limit,
            } => output::emit(
                "session.list",
                &commands::session::list(core, ai_id.as_deref(), active, limit),
            ),
            SessionAction::Resume {
                ai_id,
                last_n,
                session,
                full,
            } => output::emit(
                "session.resume",
                &commands::session::resume(core, &ai_id, last_n, session.as_deref(), full),
            ),
            SessionAction::Handoff {
                session,
                summary,
                next_steps,
            } => output::emit(
                "session.handoff",
                &commands::session::handoff(core, &session, &summary, next_steps.as_deref()),
            ),
        },

        Commands::Cascade {
            session,
            task,
            context,
            goal,
        } => output::emit(
            "cascade.create",
            &commands::session::cascade_create(
                core,
                &session,
                &task,
                context.as_deref(),
                goal.as_deref(),
            ),
        ),

        Commands::Preflight {
            session,
            cascade,
            sign,
            payload,
        } => output::emit(
            "reflex.submit_preflight",
            &commands::reflex::preflight(core, &session, cascade.as_deref(), sign, payload.as_deref()),
        ),

        Commands::Check {
            session,
            cascade,
            decision,
            round,
            findings,
            unknowns,
            sign,
            payload,
        } => output::emit(
            "reflex.submit_check",
            &commands::reflex::check(
                core,
                &session,
                cascade.as_deref(),
                &decision,
                round,
                findings,
                unknowns,
                sign,
                payload.as_deref(),
            ),
        ),

        Commands::Act {
            session,
            cascade,
            sign,
            payload,
        } => output::emit(
            "reflex.submit_act",
            &commands::reflex::act(core, &session, cascade.as_deref(), sign, payload.as_deref()),
        ),

        Commands::Postflight {
            session,
            cascade,
            evidence,
            sign,
            payload,
        } => output::emit(
            "reflex.submit_postflight",
            &commands::reflex::postflight(
                core,
                &session,
                cascade.as_deref(),
                evidence.as_deref(),
                sign,
                payload.as_deref(),
            ),
        ),

        Commands::Goal { action } => match action {
            GoalAction::Create {
                session,
                objective,
                breadth,
                duration,
                coordination,
                complexity,
            } => output::emit(
                "goal.create",
                &commands::goal::create(
                    core,
                    &session,
                    &objective,
                    breadth,
                    duration,
                    coordination,
                    complexity,
                ),
            ),
            GoalAction::AddSubtask {
                goal,
                description,
                importance,
            } => output::emit(
                "goal.add_subtask",
                &commands::goal::add_subtask(core, &goal, &description, &importance),
            ),
            GoalAction::CompleteSubtask { subtask, evidence } => output::emit(
                "goal.complete_subtask",
                &commands::goal::complete_subtask(core, &subtask, evidence.as_deref()),
            ),
            GoalAction::Progress { goal } => {
                output::emit("goal.progress", &commands::goal::progress(core, &goal))
            }
            GoalAction::List { session } => {
                output::emit("goal.list", &commands::goal::list(core, session.as_deref()))
            }
            GoalAction::Claim { goal, ai_id } => {
                output::emit("goal.claim", &commands::goal::claim(core, &goal, &ai_id))
            }
            GoalAction::Complete { goal } => {
                output::emit("goal.complete", &commands::goal::complete(core, &goal))
            }
        },

        Commands::Breadcrumb { action } => match action {
            BreadcrumbAction::Log {
                session,
                kind,
                content,
                context,
                goal,
                subtask,
                transaction,
            } => output::emit(
                "breadcrumb.log",
                &commands::breadcrumb::log(
                    core,
                    &session,
                    &kind,
                    &content,
                    context.as_deref(),
                    goal.as_deref(),
                    subtask.as_deref(),
                    transaction.as_deref(),
                ),
            ),
            BreadcrumbAction::Query {
                session,
                kind,
                unresolved,
                limit,
            } => output::emit(
                "breadcrumb.query",
                &commands::breadcrumb::query(core, &session, kind.as_deref(), unresolved, limit),
            ),
            BreadcrumbAction::Resolve { id, resolver } => output::emit(
                "breadcrumb.resolve",
                &commands::breadcrumb::resolve(core, id, &resolver),
            ),
        },

        Commands::Identity { action } => match action {
            IdentityAction::Create { ai_id, overwrite } => output::emit(
                "identity.create",
                &commands::identity::create(core, &ai_id, overwrite),
            ),
            IdentityAction::List => {
                output::emit("identity.list", &commands::identity::list(core))
            }
            IdentityAction::Export { ai_id } => {
                output::emit("identity.export", &commands::identity::export(core, &ai_id))
            }
            IdentityAction::Verify { reflex_id } => output::emit(
                "identity.verify",
                &commands::identity::verify(core, reflex_id),
            ),
        },

        Commands::Project { action } => match action {
            ProjectAction::Create { name, repos } => output::emit(
                "project.create",
                &commands::project::create(core, &name, repos),
            ),
            ProjectAction::Get { project } => {
                output::emit("project.get", &commands::project::get(core, &project))
            }
            ProjectAction::List { status } => output::emit(
                "project.list",
                &commands::project::list(core, status.as_deref()),
            ),
            ProjectAction::SetStatus { project, status } => output::emit(
                "project.set_status",
                &commands::project::set_status(core, &project, &status),
            ),
        },

        Commands::Checkpoint { action } => match action {
            CheckpointAction::Create {
                session,
                phase,
                round,
            } => output::emit(
                "checkpoint.create",
                &commands::checkpoint::create(core, &session, &phase, round),
            ),
            CheckpointAction::Load {
                session,
                phase,
                round,
            } => output::emit(
                "checkpoint.load",
                &commands::checkpoint::load(core, &session, &phase, round),
            ),
            CheckpointAction::List { session } => output::emit(
                "checkpoint.list",
                &commands::checkpoint::list(core, &session),
            ),
            CheckpointAction::Diff {
                session,
                from_phase,
                from_round,
                to_phase,
                to_round,
            } => output::emit(
                "checkpoint.diff",
                &commands::checkpoint::diff(
                    core,
                    &session,
                    &from_phase,
                    from_round,
                    &to_phase,
                    to_round,
                ),
            ),
        },

        Commands::Admin { action } => match action {
            AdminAction::ForceClose { horizon_hours } => output::emit(
                "admin.force_close",
                &commands::admin::force_close(core, horizon_hours),
            ),
            AdminAction::ReapContexts => output::emit(
                "admin.reap_contexts",
                &commands::admin::reap_contexts(core),
            ),
            AdminAction::Reconcile => {
                output::emit("admin.reconcile", &commands::admin::reconcile(core))
            }
            AdminAction::Daemon { duration_secs } => output::emit(
                "admin.daemon",
                &commands::admin::daemon(core, duration_secs),
            ),
        },
    }
}
