//! poker-relay: relay server and console client for planning poker.
//!
//! `serve` runs the WebSocket relay. `join` connects to a relay and runs an
//! interactive session on the terminal.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use poker_core::tally;
use poker_core::{
    Issue, JoinRole, Participant, ParticipantId, Session, SessionConfig, SessionEvent,
    SessionHandle, SessionId,
};
use poker_relay::console::{self, ConsoleCommand};
use poker_relay::{RelayServer, WsTransport};

#[derive(Parser, Debug)]
#[command(name = "poker-relay")]
#[command(about = "Planning poker relay server and console client")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the relay server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8787")]
        listen: String,
    },
    /// Join a session from the terminal
    Join {
        /// Relay WebSocket URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8787")]
        relay: String,

        /// Session ID (generated when creating a session)
        #[arg(short, long)]
        session: Option<String>,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Create the session and host it
        #[arg(long)]
        create: bool,

        /// Session timing config (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,poker_relay=debug,poker_core=debug"
    } else {
        "info,poker_relay=info,poker_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.mode {
        Mode::Serve { listen } => serve(&listen).await,
        Mode::Join {
            relay,
            session,
            name,
            create,
            config,
        } => join(relay, session, name, create, config).await,
    }
}

async fn serve(listen: &str) -> Result<()> {
    info!("Starting poker-relay");
    let listener = RelayServer::bind(listen).await?;
    let server = RelayServer::new();

    info!("Relay running. Press Ctrl+C to stop.");
    tokio::select! {
        _ = server.run(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn join(
    relay: String,
    session: Option<String>,
    name: String,
    create: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => SessionConfig::load(&path)?,
        None => SessionConfig::default(),
    };

    let session_id: SessionId = match session {
        Some(id) => id.parse()?,
        None if create => SessionId::generate(),
        None => bail!("--session is required unless --create is given"),
    };
    let role = if create {
        JoinRole::Creator
    } else {
        JoinRole::Participant
    };
    let local = Participant::new(ParticipantId::generate(), name);

    let transport = Arc::new(WsTransport::new(relay, session_id.channel_name()));
    let handle = Session::open(transport, local, session_id.clone(), role, &config)
        .await
        .context("Failed to join session")?;

    println!(
        "Joined session {} as {}. Type `help` for commands.",
        session_id,
        handle.local().name
    );

    let _notices = handle.events().subscribe(|event| match event {
        SessionEvent::JoinTimedOut => {
            eprintln!("No host answered. Rejoin with --create to start the session yourself.");
        }
        SessionEvent::AuthorityConflict { local, remote } => {
            warn!("Two hosts for this session: {} and {}", local, remote);
        }
        _ => {}
    });

    let mut view_rx = handle.subscribe_view();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                print!("{}", console::render(&view, &handle.local().id));
            }

            line = lines.next_line() => match line? {
                Some(line) => match console::parse(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = run_command(&handle, command) {
                            eprintln!("{}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{}", e),
                },
                None => break,
            },

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.close().await;
    Ok(())
}

fn run_command(handle: &SessionHandle, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Vote(card) => handle.submit_vote(card.map(|c| c.vote_value()))?,
        ConsoleCommand::Reveal => handle.reveal_votes()?,
        ConsoleCommand::Start(key) => {
            let state = handle.state().context("No session state yet")?;
            let issue = match key {
                Some(key) => match console::find_issue(&state, &key) {
                    Some(issue) => issue.clone(),
                    None => {
                        let issue = Issue::new(key);
                        handle.add_issue(issue.clone())?;
                        issue
                    }
                },
                None => state
                    .current_issue
                    .clone()
                    .context("No current issue; use `start <issue>`")?,
            };
            handle.start_voting(issue)?;
        }
        ConsoleCommand::Reset => handle.reset_voting()?,
        ConsoleCommand::Add(title) => handle.add_issue(Issue::new(title))?,
        ConsoleCommand::Select(key) => {
            let state = handle.state().context("No session state yet")?;
            let issue = console::find_issue(&state, &key)
                .with_context(|| format!("No issue matching {:?}", key))?;
            handle.select_issue(issue.clone())?;
        }
        ConsoleCommand::Estimate { issue, points } => {
            let state = handle.state().context("No session state yet")?;
            let found = console::find_issue(&state, &issue)
                .with_context(|| format!("No issue matching {:?}", issue))?;
            handle.estimate_issue(found.id.clone(), points)?;
        }
        ConsoleCommand::Finalize => {
            let state = handle.state().context("No session state yet")?;
            let current = state
                .current_issue
                .as_ref()
                .context("No current issue")?;
            let estimate =
                tally::suggested_estimate(&state).context("Reveal numeric votes first")?;
            handle.estimate_issue(current.id.clone(), estimate)?;
            handle.reset_voting()?;
            println!("Recorded {} for {}", estimate, current.title);
        }
        ConsoleCommand::Show => print!("{}", console::render(&handle.view(), &handle.local().id)),
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
