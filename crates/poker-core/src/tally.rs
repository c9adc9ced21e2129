//! Voting deck and round summaries.

use crate::model::{SessionState, Vote, VoteValue};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A card a participant can play.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Card {
    Points(u32),
    /// "?"
    Unsure,
    /// "☕"
    Coffee,
}

/// The standard deck: Fibonacci points, then the two marker cards.
pub const DECK: [Card; 12] = [
    Card::Points(1),
    Card::Points(2),
    Card::Points(3),
    Card::Points(5),
    Card::Points(8),
    Card::Points(13),
    Card::Points(21),
    Card::Points(34),
    Card::Points(55),
    Card::Points(89),
    Card::Unsure,
    Card::Coffee,
];

impl Card {
    pub fn vote_value(&self) -> VoteValue {
        match self {
            Card::Points(p) => VoteValue::Points(f64::from(*p)),
            Card::Unsure => VoteValue::UNSURE,
            Card::Coffee => VoteValue::PASS,
        }
    }
}

impl Display for Card {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Card::Points(p) => write!(f, "{p}"),
            Card::Unsure => f.write_str("?"),
            Card::Coffee => f.write_str("☕"),
        }
    }
}

impl FromStr for Card {
    type Err = String;

    /// Accepts any card face from [`DECK`], plus `unsure`, `pass` and
    /// `coffee` as typed aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "?" | "unsure" => Ok(Card::Unsure),
            "☕" | "pass" | "coffee" => Ok(Card::Coffee),
            other => {
                let points: u32 = other
                    .parse()
                    .map_err(|_| format!("not a card: {other:?}"))?;
                DECK.iter()
                    .copied()
                    .find(|c| *c == Card::Points(points))
                    .ok_or_else(|| format!("{points} is not in the deck"))
            }
        }
    }
}

/// Statistics over the numeric votes of a round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteSummary {
    /// Votes carrying a point value.
    pub numeric: usize,
    /// Votes without a point value (markers or null).
    pub other: usize,
    /// Mean rounded to one decimal place; 0 with no numeric votes.
    pub average: f64,
    /// 0 with no numeric votes.
    pub median: f64,
}

impl VoteSummary {
    pub fn from_votes(votes: &[Vote]) -> Self {
        let mut points: Vec<f64> = votes
            .iter()
            .filter_map(|v| v.value.and_then(|value| value.points()))
            .collect();
        points.sort_by(|a, b| a.total_cmp(b));

        Self {
            numeric: points.len(),
            other: votes.len() - points.len(),
            average: average(&points),
            median: median(&points),
        }
    }
}

fn average(points: &[f64]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let mean = points.iter().sum::<f64>() / points.len() as f64;
    (mean * 10.0).round() / 10.0
}

/// Expects `sorted` in ascending order.
fn median(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Every participant has voted in an open round.
pub fn all_voted(state: &SessionState) -> bool {
    state.voting_in_progress
        && !state.participants.is_empty()
        && state
            .participants
            .iter()
            .all(|p| state.vote_of(&p.id).is_some())
}

/// Median of the revealed numeric votes, to record as the issue estimate.
pub fn suggested_estimate(state: &SessionState) -> Option<f64> {
    if !state.votes_revealed {
        return None;
    }
    let summary = VoteSummary::from_votes(&state.votes);
    (summary.numeric > 0).then_some(summary.median)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;
    use crate::reducer::Event;

    fn votes(values: &[Option<VoteValue>]) -> Vec<Vote> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Vote::cast(&Participant::new(format!("p{i}").as_str(), "x"), *v))
            .collect()
    }

    #[test]
    fn test_deck_faces() {
        let faces: Vec<String> = DECK.iter().map(|c| c.to_string()).collect();
        assert_eq!(faces.first().map(String::as_str), Some("1"));
        assert_eq!(faces[10], "?");
        assert_eq!(faces[11], "☕");
    }

    #[test]
    fn test_card_parse() {
        assert_eq!("8".parse::<Card>(), Ok(Card::Points(8)));
        assert_eq!("?".parse::<Card>(), Ok(Card::Unsure));
        assert_eq!("pass".parse::<Card>(), Ok(Card::Coffee));
        assert!("4".parse::<Card>().is_err());
        assert!("many".parse::<Card>().is_err());
    }

    #[test]
    fn test_card_vote_values() {
        assert_eq!(Card::Points(13).vote_value(), VoteValue::Points(13.0));
        assert_eq!(Card::Unsure.vote_value(), VoteValue::UNSURE);
        assert_eq!(Card::Coffee.vote_value(), VoteValue::PASS);
    }

    #[test]
    fn test_summary_odd_count() {
        let s = VoteSummary::from_votes(&votes(&[
            Some(VoteValue::Points(8.0)),
            Some(VoteValue::Points(1.0)),
            Some(VoteValue::Points(3.0)),
        ]));
        assert_eq!(s.numeric, 3);
        assert_eq!(s.average, 4.0);
        assert_eq!(s.median, 3.0);
    }

    #[test]
    fn test_summary_even_count_and_rounding() {
        let s = VoteSummary::from_votes(&votes(&[
            Some(VoteValue::Points(1.0)),
            Some(VoteValue::Points(2.0)),
            Some(VoteValue::Points(2.0)),
            Some(VoteValue::Points(3.0)),
            Some(VoteValue::Points(5.0)),
            Some(VoteValue::Points(8.0)),
        ]));
        // 21 / 6 = 3.5
        assert_eq!(s.average, 3.5);
        assert_eq!(s.median, 2.5);

        let s = VoteSummary::from_votes(&votes(&[
            Some(VoteValue::Points(1.0)),
            Some(VoteValue::Points(1.0)),
            Some(VoteValue::Points(2.0)),
        ]));
        assert_eq!(s.average, 1.3);
    }

    #[test]
    fn test_summary_ignores_markers() {
        let s = VoteSummary::from_votes(&votes(&[
            Some(VoteValue::UNSURE),
            None,
            Some(VoteValue::Points(5.0)),
        ]));
        assert_eq!(s.numeric, 1);
        assert_eq!(s.other, 2);
        assert_eq!(s.median, 5.0);
    }

    #[test]
    fn test_summary_empty() {
        let s = VoteSummary::from_votes(&[]);
        assert_eq!(s.average, 0.0);
        assert_eq!(s.median, 0.0);
    }

    #[test]
    fn test_all_voted_and_suggestion() {
        let al = Participant::new("p1", "Al");
        let bo = Participant::new("p2", "Bo");
        let mut state = SessionState::new("R".parse().unwrap(), al.clone());
        state = state.apply(&Event::ParticipantJoined { participant: bo.clone() });
        state = state.apply(&Event::VotingStarted {
            issue: crate::model::Issue::new("X"),
        });
        state = state.apply(&Event::VoteSubmitted {
            vote: Vote::cast(&al, Some(VoteValue::Points(5.0))),
        });
        assert!(!all_voted(&state));

        state = state.apply(&Event::VoteSubmitted {
            vote: Vote::cast(&bo, Some(VoteValue::Points(8.0))),
        });
        assert!(all_voted(&state));
        assert_eq!(suggested_estimate(&state), None);

        let votes = state.votes.clone();
        state = state.apply(&Event::VotesRevealed { votes });
        assert_eq!(suggested_estimate(&state), Some(6.5));
    }
}
