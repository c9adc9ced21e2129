//! Line-oriented console for `poker-relay join`.
//!
//! Parsing and rendering are kept free of I/O; `main` reads stdin, calls
//! `parse`, and prints `render` whenever the session view changes.

use poker_core::tally::{self, Card, VoteSummary};
use poker_core::{Issue, ParticipantId, SessionState, SessionView, VoteValue};
use std::fmt::Write as _;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  vote <card>            play a card (1 2 3 5 8 13 21 34 55 89 ? coffee); bare `vote` clears
  reveal                 reveal all votes
  start [issue]          start a round on an issue (id or title; default: current issue)
  reset                  clear votes and end the round
  add <title>            add an issue to the backlog
  select <issue>         make an issue current
  estimate <issue> <pts> record an estimate
  finalize               record the median of revealed votes on the current issue
  show                   print the session
  quit                   leave the session";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Vote(Option<Card>),
    Reveal,
    Start(Option<String>),
    Reset,
    Add(String),
    Select(String),
    Estimate { issue: String, points: f64 },
    Finalize,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConsoleError {
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("{0}")]
    Card(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "vote" | "v" => {
            if rest.is_empty() {
                ConsoleCommand::Vote(None)
            } else {
                ConsoleCommand::Vote(Some(rest.parse().map_err(ConsoleError::Card)?))
            }
        }
        "reveal" => ConsoleCommand::Reveal,
        "start" => ConsoleCommand::Start((!rest.is_empty()).then(|| rest.to_string())),
        "reset" => ConsoleCommand::Reset,
        "add" => {
            if rest.is_empty() {
                return Err(ConsoleError::Usage("add <title>"));
            }
            ConsoleCommand::Add(rest.to_string())
        }
        "select" => {
            if rest.is_empty() {
                return Err(ConsoleError::Usage("select <issue>"));
            }
            ConsoleCommand::Select(rest.to_string())
        }
        "estimate" => {
            let usage = ConsoleError::Usage("estimate <issue> <points>");
            let (issue, points) = rest.rsplit_once(char::is_whitespace).ok_or(usage.clone())?;
            let points: f64 = points.trim().parse().map_err(|_| usage.clone())?;
            if issue.trim().is_empty() || !points.is_finite() {
                return Err(usage);
            }
            ConsoleCommand::Estimate {
                issue: issue.trim().to_string(),
                points,
            }
        }
        "finalize" => ConsoleCommand::Finalize,
        "show" | "ls" => ConsoleCommand::Show,
        "help" | "h" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(ConsoleError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Find an issue by ID, then by case-insensitive title.
pub fn find_issue<'a>(state: &'a SessionState, key: &str) -> Option<&'a Issue> {
    state.issue(key).or_else(|| {
        state
            .issues
            .iter()
            .find(|i| i.title.eq_ignore_ascii_case(key))
    })
}

fn format_value(value: Option<VoteValue>) -> String {
    match value {
        None => "-".to_string(),
        Some(VoteValue::Points(p)) => format_points(p),
        Some(VoteValue::Marker(m)) => match m {
            poker_core::VoteMarker::Unsure => "?".to_string(),
            poker_core::VoteMarker::Pass => "☕".to_string(),
        },
    }
}

fn format_points(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{}", p as i64)
    } else {
        format!("{p:.1}")
    }
}

/// Render the session for the terminal.
pub fn render(view: &SessionView, local: &ParticipantId) -> String {
    let mut out = String::new();
    let Some(state) = &view.state else {
        let _ = writeln!(out, "Waiting for session state ({:?})", view.bootstrap);
        return out;
    };

    let _ = writeln!(
        out,
        "Session {}{}{}",
        state.session_id,
        if view.is_authority { " [host]" } else { "" },
        if view.connected { "" } else { " [offline]" }
    );

    match &state.current_issue {
        Some(issue) => {
            let status = if state.votes_revealed {
                "revealed"
            } else if state.voting_in_progress {
                "voting"
            } else {
                "idle"
            };
            let _ = writeln!(out, "Current: {} ({})", issue.title, status);
        }
        None => {
            let _ = writeln!(out, "Current: none");
        }
    }

    let _ = writeln!(out, "Participants:");
    for p in &state.participants {
        let marker = if &p.id == local { "*" } else { " " };
        let vote = match state.vote_of(&p.id) {
            None => String::new(),
            Some(v) if state.votes_revealed || &p.id == local => {
                format!("  {}", format_value(v.value))
            }
            Some(_) => "  (voted)".to_string(),
        };
        let _ = writeln!(out, " {} {}{}", marker, p.name, vote);
    }

    if state.votes_revealed {
        let summary = VoteSummary::from_votes(&state.votes);
        if summary.numeric > 0 {
            let _ = writeln!(
                out,
                "Average {}, median {}",
                format_points(summary.average),
                format_points(summary.median)
            );
        }
    } else if tally::all_voted(state) {
        let _ = writeln!(out, "Everyone has voted.");
    }

    if !state.issues.is_empty() {
        let _ = writeln!(out, "Issues:");
        for issue in &state.issues {
            let estimate = issue
                .estimate
                .map(|e| format!(" = {}", format_points(e)))
                .unwrap_or_default();
            let _ = writeln!(out, "  [{}] {}{}", issue.id, issue.title, estimate);
        }
    }
    out
}
