//! `portal`: run lifecycle requests against a local portal database.
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use submission_lifecycle::config::PortalConfig;
use submission_lifecycle::types::{Actor, DraftPatch, Responses, UploadMeta};
use submission_lifecycle::{LifecycleError, PortalService, telemetry};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "portal")]
#[command(version, about = "Draft and submission lifecycle for reporting periods", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database directory, overrides `[storage] path`
    #[arg(long)]
    db: Option<PathBuf>,

    /// Log filter, overrides `[log] filter`
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    org: String,

    #[arg(long)]
    period: String,

    /// Authenticated actor id
    #[arg(long)]
    actor: String,

    #[arg(long, value_enum, default_value_t = RoleArg::Member)]
    role: RoleArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Member,
    Ceo,
}

#[derive(clap::Args, Debug, Default)]
struct PatchArgs {
    /// Answer as `question=answer`; repeatable. Replaces all stored answers.
    #[arg(short = 'r', long = "response", value_parser = parse_response)]
    responses: Vec<(String, String)>,

    #[arg(long)]
    total_questions: Option<u32>,

    #[arg(long)]
    completed: Option<bool>,
}

impl PatchArgs {
    fn into_patch(self) -> DraftPatch {
        let mut patch = DraftPatch::new();
        if !self.responses.is_empty() {
            patch = patch.set_responses(self.responses.into_iter().collect::<Responses>());
        }
        if let Some(total) = self.total_questions {
            patch = patch.set_total_questions(total);
        }
        if let Some(completed) = self.completed {
            patch = patch.set_completed(completed);
        }
        patch
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what the actor should be editing
    Work,
    /// Create or update the active draft
    PutDraft(PatchArgs),
    /// Archive the active draft and start a new version
    StartFresh(PatchArgs),
    /// Submit the active draft
    Submit,
    /// Lock the open submission (CEO)
    Approve,
    /// Reopen the submission into a draft (CEO)
    Reopen,
    /// Edit the open submission
    EditSubmission(PatchArgs),
    /// Register a completed upload on the draft side
    AttachFile {
        #[arg(long)]
        category: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        size: u64,
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
        #[arg(long)]
        storage_ref: String,
    },
    /// Discard a legacy draft-status submission
    Discard {
        #[arg(long)]
        submission_id: String,
    },
    /// List the period's submissions, newest first
    History,
}

fn parse_response(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(q, a)| (q.trim().to_string(), a.to_string()))
        .filter(|(q, _)| !q.is_empty())
        .ok_or_else(|| format!("expected question=answer, got `{raw}`"))
}

fn run(service: &PortalService, args: Args) -> Result<serde_json::Value, LifecycleError> {
    let actor = match args.role {
        RoleArg::Member => Actor::member(args.actor),
        RoleArg::Ceo => Actor::ceo(args.actor),
    };
    let (org, period) = (args.org.as_str(), args.period.as_str());

    let json = match args.command {
        Command::Work => serde_json::to_value(service.work(&actor, org, period)?),
        Command::PutDraft(patch) => {
            serde_json::to_value(service.put_draft(&actor, org, period, &patch.into_patch())?)
        }
        Command::StartFresh(patch) => {
            let seed = patch.into_patch();
            let seed = (!seed.is_empty()).then_some(seed);
            serde_json::to_value(service.start_fresh(&actor, org, period, seed.as_ref())?)
        }
        Command::Submit => serde_json::to_value(service.submit(&actor, org, period)?),
        Command::Approve => serde_json::to_value(service.approve(&actor, org, period)?),
        Command::Reopen => serde_json::to_value(service.reopen(&actor, org, period)?),
        Command::EditSubmission(patch) => serde_json::to_value(service.edit_submission(
            &actor,
            org,
            period,
            &patch.into_patch(),
        )?),
        Command::AttachFile {
            category,
            key,
            size,
            content_type,
            storage_ref,
        } => {
            let meta = UploadMeta {
                category,
                object_key: key,
                size,
                content_type,
                storage_ref,
            };
            serde_json::to_value(service.attach_file(&actor, org, period, &meta)?)
        }
        Command::Discard { submission_id } => {
            serde_json::to_value(service.discard(&actor, org, period, &submission_id)?)
        }
        Command::History => serde_json::to_value(service.history(org, period)?),
    };
    json.map_err(|e| LifecycleError::Codec(e.to_string()))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PortalConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PortalConfig::default(),
    };
    if let Some(db) = &args.db {
        config.storage.path = db.clone();
    }
    if let Some(level) = &args.log_level {
        config.log.filter = level.clone();
    }

    telemetry::init(&config.log.filter);

    let db = sled::open(&config.storage.path)
        .with_context(|| format!("failed to open database at {}", config.storage.path.display()))?;
    let service = PortalService::from_config(Arc::new(db), &config);
    info!(db = %config.storage.path.display(), "portal database opened");

    match run(&service, args) {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            service.store().flush()?;
            Ok(())
        }
        Err(err) => {
            let body = serde_json::json!({
                "error": err.code(),
                "status": err.status_code(),
                "message": err.to_string(),
            });
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(match err.status_code() {
                500 => 1,
                _ => 2,
            });
        }
    }
}
