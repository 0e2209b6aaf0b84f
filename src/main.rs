//! jam-watch: mounts one jam against a live server, prints the setlist on every change and
//! accepts line commands on stdin.

use std::{env, fmt::Write as _, str::FromStr, sync::Arc};

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jam_setlist::{
    config::AppConfig,
    dao::{
        http::{HttpApiConfig, HttpJamApi},
        jam_api::JamApi,
        ledger::VoteLedger,
        models::{CaptainRole, Highlight, JamId, JamSong, SongId},
    },
    error::ServiceError,
    services::{
        captain_service::{CaptainFlow, SignupOutcome},
        catalog_service::SongCatalog,
        jam_service::{AddOutcome, JamSession},
        notifications::{Notice, NoticeLevel, Notifier},
        pusher_client::PusherClient,
    },
    state::{SharedView, SortMethod},
};

const HELP: &str = "commands: vote N | played N | remove N | add SONG_ID | search TEXT | \
captain N [regular|piano] | name NAME | uncaptain N | group on|off | sort votes|order | show | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Vote(usize),
    Played(usize),
    Remove(usize),
    Add(SongId),
    Search(String),
    Captain(usize, CaptainRole),
    Name(String),
    Uncaptain(usize),
    Group(bool),
    Sort(SortMethod),
    Show,
    Help,
    Quit,
}

fn position(arg: Option<&str>) -> anyhow::Result<usize> {
    let raw = arg.context("missing song position")?;
    match raw.parse::<usize>() {
        Ok(0) | Err(_) => bail!("`{raw}` is not a song position"),
        Ok(position) => Ok(position),
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let mut args = rest.split_whitespace();

        let command = match verb.to_ascii_lowercase().as_str() {
            "vote" => Command::Vote(position(args.next())?),
            "played" => Command::Played(position(args.next())?),
            "remove" => Command::Remove(position(args.next())?),
            "add" => Command::Add(SongId::from(args.next().context("missing song id")?)),
            "search" if !rest.is_empty() => Command::Search(rest.to_owned()),
            "captain" => {
                let at = position(args.next())?;
                let role = match args.next() {
                    None | Some("regular") => CaptainRole::Regular,
                    Some("piano") => CaptainRole::Piano,
                    Some(other) => bail!("unknown captain role `{other}`"),
                };
                Command::Captain(at, role)
            }
            "name" if !rest.is_empty() => Command::Name(rest.to_owned()),
            "uncaptain" => Command::Uncaptain(position(args.next())?),
            "group" => match args.next() {
                Some("on") => Command::Group(true),
                Some("off") => Command::Group(false),
                _ => bail!("usage: group on|off"),
            },
            "sort" => match args.next() {
                Some("votes") => Command::Sort(SortMethod::Votes),
                Some("order") => Command::Sort(SortMethod::Order),
                _ => bail!("usage: sort votes|order"),
            },
            "show" => Command::Show,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => bail!("unknown command `{line}`"),
        };
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let jam_id = env::args()
        .nth(1)
        .or_else(|| env::var("JAM_ID").ok())
        .filter(|id| !id.trim().is_empty())
        .context("usage: jam-watch <jam-id> (or set JAM_ID)")?;

    let config = AppConfig::load();
    let timeout = Some(config.request_timeout());
    let api = HttpJamApi::connect(
        HttpApiConfig::new(config.api_base_url.clone()).with_timeout(config.request_timeout()),
    )
    .context("building API client")?;
    let api: Arc<dyn JamApi> = Arc::new(api);
    let ledger = Arc::new(VoteLedger::open(&config.ledger_path));
    let (notifier, notices) = Notifier::channel();

    let session = JamSession::open(
        Arc::clone(&api),
        JamId::new(jam_id),
        Arc::clone(&ledger),
        notifier.clone(),
        config.view,
        timeout,
    )
    .await
    .context("loading jam")?;

    let pusher = if config.pusher.key.is_empty() {
        warn!("no push key configured; live updates disabled");
        None
    } else {
        let client = Arc::new(PusherClient::connect(&config.pusher));
        session
            .mount_realtime(client.clone())
            .context("subscribing to jam channel")?;
        Some(client)
    };

    let captains = CaptainFlow::new(
        session.jam_id().clone(),
        Arc::clone(&api),
        Arc::clone(&ledger),
        notifier.clone(),
        timeout,
    );
    let catalog = SongCatalog::new(Arc::clone(&api), notifier, timeout);

    let printer = tokio::spawn(print_notices(notices));
    let renderer = tokio::spawn(render_on_change(Arc::clone(session.view()), Arc::clone(&ledger)));
    println!("{}", render(session.view(), &ledger));
    println!("{HELP}");

    tokio::select! {
        result = command_loop(&session, &captains, &catalog) => result?,
        _ = shutdown_signal() => info!("shutdown signal received"),
    }

    session.unmount();
    renderer.abort();
    if let Some(client) = pusher {
        client.disconnect().await;
    }
    printer.abort();
    info!("jam-watch stopped");
    Ok(())
}

async fn command_loop(
    session: &JamSession,
    captains: &CaptainFlow,
    catalog: &SongCatalog,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = execute(command, session, captains, catalog).await {
            warn!(error = %err, "command failed");
        }
    }
    Ok(())
}

async fn execute(
    command: Command,
    session: &JamSession,
    captains: &CaptainFlow,
    catalog: &SongCatalog,
) -> Result<(), ServiceError> {
    match command {
        Command::Vote(at) => {
            let entry = entry_at(session, at)?;
            let action = session.toggle_vote(&entry.id).await?;
            info!(jam_song_id = %entry.id, ?action, "vote sent");
        }
        Command::Played(at) => {
            let entry = entry_at(session, at)?;
            session.toggle_played(&entry.id).await?;
        }
        Command::Remove(at) => {
            let entry = entry_at(session, at)?;
            session.remove_song(&entry.song.id).await?;
        }
        Command::Add(song_id) => {
            if let AddOutcome::Added(id) = session.add_song(&song_id).await? {
                info!(jam_song_id = %id, "song added");
            }
        }
        Command::Search(query) => {
            for song in catalog.search(&query).await? {
                println!("  {}  {}", song.id, song.describe());
            }
        }
        Command::Captain(at, role) => {
            let entry = entry_at(session, at)?;
            if captains.request_signup(&entry, role).await? == SignupOutcome::NeedsName {
                println!("enter your name with: name NAME");
            }
        }
        Command::Name(name) => {
            captains.provide_name(&name).await?;
        }
        Command::Uncaptain(at) => {
            let entry = entry_at(session, at)?;
            captains.withdraw(&entry).await?;
        }
        Command::Group(enabled) => {
            session.view().set_grouping(enabled);
            println!("{}", render(session.view(), session.ledger()));
        }
        Command::Sort(method) => {
            session.view().set_sort_method(method);
            println!("{}", render(session.view(), session.ledger()));
        }
        Command::Show => println!("{}", render(session.view(), session.ledger())),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn entry_at(session: &JamSession, at: usize) -> Result<JamSong, ServiceError> {
    session
        .setlist()
        .ordered()
        .nth(at - 1)
        .cloned()
        .ok_or_else(|| ServiceError::NotFound(format!("no song at position {at}")))
}

async fn render_on_change(view: SharedView, ledger: Arc<VoteLedger>) {
    let mut changes = view.subscribe();
    while changes.changed().await.is_ok() {
        println!("{}", render(&view, &ledger));
    }
}

fn render(view: &SharedView, ledger: &VoteLedger) -> String {
    let jam = view.jam();
    let setlist = view.setlist();
    let next = setlist.next_song.clone();
    let mut out = format!("== {} ({} songs) ==\n", jam.name, setlist.len());
    for (index, entry) in setlist.ordered().enumerate() {
        let marker = match (entry.highlight, entry.show_rainbow_heart) {
            (_, true) => "<3",
            (Some(Highlight::Success), _) => "++",
            (Some(Highlight::Warning), _) => "^^",
            (Some(Highlight::Error), _) => "!!",
            (None, false) => "  ",
        };
        let voted = if ledger.has_voted(&entry.id) { "*" } else { " " };
        let captains = entry
            .captains
            .iter()
            .map(|captain| format!("{} ({:?})", captain.name, captain.role))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            out,
            "{marker} {:>2}. {voted}{:>3} {} [{:?}]{}{}",
            index + 1,
            entry.display_votes(),
            entry.song.describe(),
            entry.song.kind,
            if entry.played { " played" } else { "" },
            if next.as_ref() == Some(&entry.id) { " <- next" } else { "" },
        );
        if !captains.is_empty() {
            let _ = write!(out, " captains: {captains}");
        }
        out.push('\n');
    }
    out
}

async fn print_notices(mut notices: UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        let label = match notice.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warn",
            NoticeLevel::Error => "error",
        };
        println!("[{label}] {}", notice.message);
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,jam_setlist=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
