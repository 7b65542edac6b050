//! engage - command-line client for the engagement engine
//!
//! Drives an [`EngagementSession`] against a live server: fetch an entity,
//! perform one engagement action, or watch an entity for a while. Records are
//! printed to stdout as JSON; logs go to stderr.
//!
//! `watch --events-from-stdin` also merges pushed updates: one JSON
//! [`EngagementEvent`] per line, as a realtime bridge would forward them.

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};
use engage_common::auth::{AuthProvider, SessionToken};
use engage_common::config::{resolve_config, resolve_token, ConfigOverrides, SyncConfig};
use engage_common::events::EngagementEvent;
use engage_common::{Action, EntityRef, EntityType};
use engage_sync::{
    ActionRequest, EngagementRecord, EngagementSession, LogNotifier, MutationOutcome, Rejection,
    ViewBinding,
};
use futures::Stream;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Command-line arguments for engage
#[derive(Parser, Debug)]
#[command(name = "engage")]
#[command(about = "Fetch, act on and watch post and comment engagement")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", ",
    env!("BUILD_PROFILE"),
    " build ",
    env!("BUILD_TIMESTAMP"),
    ")"
))]
pub struct Cli {
    /// Transport root URL (overrides ENGAGE_BASE_URL and the config file)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Bearer token (overrides ENGAGE_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Config file (overrides ENGAGE_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Entity addressed by a subcommand
#[derive(Args, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// `post` or `comment`
    pub entity_type: EntityType,
    pub id: i64,
}

impl Target {
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.id)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch and print the canonical record
    Fetch(Target),
    Like(Target),
    Dislike(Target),
    Save(Target),
    Share(Target),
    /// Report (or withdraw a report of) an entity
    Report {
        #[command(flatten)]
        target: Target,
        /// Required when filing a report
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Print every update of an entity for a while
    Watch {
        #[command(flatten)]
        target: Target,
        /// How long to watch
        #[arg(long, default_value_t = 60)]
        seconds: u64,
        /// Poll interval; defaults to the staleness threshold
        #[arg(long)]
        interval: Option<u64>,
        /// Merge engagement events read from stdin, one JSON object per line
        #[arg(long)]
        events_from_stdin: bool,
    },
}

impl Command {
    pub fn target(&self) -> Target {
        match self {
            Command::Fetch(t)
            | Command::Like(t)
            | Command::Dislike(t)
            | Command::Save(t)
            | Command::Share(t) => *t,
            Command::Report { target, .. } | Command::Watch { target, .. } => *target,
        }
    }

    /// Engagement action this command performs, if any
    pub fn action_request(&self) -> Option<ActionRequest> {
        match self {
            Command::Like(_) => Some(ActionRequest::like()),
            Command::Dislike(_) => Some(ActionRequest::dislike()),
            Command::Save(_) => Some(ActionRequest::save()),
            Command::Share(_) => Some(ActionRequest::share()),
            Command::Report { reason, .. } => Some(ActionRequest {
                action: Action::Report,
                reason: Some(reason.clone()).filter(|r| !r.trim().is_empty()),
            }),
            Command::Fetch(_) | Command::Watch { .. } => None,
        }
    }
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.base_url.clone(),
            config_path: self.config.clone(),
        }
    }

    /// Resolve configuration: command line, environment, file, defaults
    pub fn load_config(&self) -> Result<SyncConfig> {
        Ok(resolve_config(&self.overrides())?)
    }
}

/// Execute one command
pub async fn run(cli: Cli, config: SyncConfig) -> Result<()> {
    let auth: Arc<dyn AuthProvider> = Arc::new(SessionToken::new(resolve_token(cli.token.as_deref())));
    let session = EngagementSession::connect(&config, auth, Arc::new(LogNotifier))?;
    let entity = cli.command.target().entity();

    match cli.command {
        Command::Fetch(_) => {
            let record = session.refresh(entity).await?;
            print_record(entity, &record)?;
        }
        Command::Watch {
            seconds,
            interval,
            events_from_stdin,
            ..
        } => {
            let every = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.staleness())
                .max(Duration::from_secs(1));
            let events = events_from_stdin.then(stdin_events);
            watch(&session, entity, Duration::from_secs(seconds), every, events).await?;
        }
        ref command => {
            let request = command
                .action_request()
                .ok_or_else(|| anyhow!("no action for {:?}", command))?;
            act(&session, entity, request).await?;
        }
    }
    Ok(())
}

async fn act(session: &EngagementSession, entity: EntityRef, request: ActionRequest) -> Result<()> {
    // Toggle direction depends on the current viewer state
    if let Err(e) = session.refresh(entity).await {
        warn!(entity = %entity, error = %e, "Could not load current state; acting on defaults");
    }

    let action = request.action;
    match session.invoke(entity, request).await {
        MutationOutcome::Committed(record) => {
            info!(entity = %entity, action = %action, "Done");
            print_record(entity, &record)
        }
        MutationOutcome::RolledBack { error, .. } => bail!("{} {} failed: {}", action, entity, error),
        MutationOutcome::Conflict { record } => {
            if let Some(record) = record {
                print_record(entity, &record)?;
            }
            bail!("{} {} conflicted with newer server state; not applied", action, entity)
        }
        MutationOutcome::SessionExpired => bail!("session expired; sign in again"),
        MutationOutcome::Rejected(Rejection::Invalid(e)) => bail!("{}", e),
        MutationOutcome::Rejected(Rejection::Debounced) => bail!("{} {} is already in progress", action, entity),
    }
}

enum WatchStep {
    Changed(Option<EngagementRecord>),
    Poll,
    Done,
}

/// Print every update of `entity` until `duration` has passed
///
/// Polls with a refresh every `every`; pushed updates from `events`, when
/// given, are merged through the session's event source as they arrive.
pub async fn watch<S>(
    session: &EngagementSession,
    entity: EntityRef,
    duration: Duration,
    every: Duration,
    events: Option<S>,
) -> Result<()>
where
    S: Stream<Item = EngagementEvent> + Send + 'static,
{
    let mut binding = session.mount(entity);
    let pump = events.map(|events| {
        let session = session.clone();
        tokio::spawn(async move { session.pump(events).await })
    });

    let result = print_updates(session, &mut binding, duration, every).await;

    if let Some(pump) = pump {
        pump.abort();
    }
    binding.unmount();
    result
}

async fn print_updates(
    session: &EngagementSession,
    binding: &mut ViewBinding,
    duration: Duration,
    every: Duration,
) -> Result<()> {
    let entity = binding.entity();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(every);
    // Mount already refreshed
    poll.tick().await;

    let mut last = binding.current();
    if let Some(record) = &last {
        print_record(entity, record)?;
    }
    info!(entity = %entity, seconds = duration.as_secs(), "Watching");

    loop {
        let step = tokio::select! {
            _ = &mut deadline => WatchStep::Done,
            changed = binding.changed() => WatchStep::Changed(changed),
            _ = poll.tick() => WatchStep::Poll,
        };
        match step {
            WatchStep::Done | WatchStep::Changed(None) => break,
            WatchStep::Changed(Some(record)) => {
                let moved = last
                    .as_ref()
                    .map(|prev| prev.metrics != record.metrics || prev.interaction_state != record.interaction_state)
                    .unwrap_or(true);
                if moved {
                    print_record(entity, &record)?;
                }
                last = Some(record);
            }
            WatchStep::Poll => {
                if let Err(e) = session.refresh(entity).await {
                    warn!(entity = %entity, error = %e, "Poll failed");
                }
            }
        }
    }
    Ok(())
}

/// Parse one line of pushed event input; blank lines yield `None`
pub fn parse_event_line(line: &str) -> Result<Option<EngagementEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Engagement events from stdin until EOF; malformed lines are skipped
fn stdin_events() -> impl Stream<Item = EngagementEvent> + Send {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    futures::stream::unfold(lines, |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_event_line(&line) {
                    Ok(Some(event)) => return Some((event, lines)),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping malformed event line"),
                },
                Ok(None) => {
                    debug!("Event input closed");
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "Event input failed");
                    return None;
                }
            }
        }
    })
}

fn print_record(entity: EntityRef, record: &EngagementRecord) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "entity": entity, "record": record }))?
    );
    Ok(())
}
