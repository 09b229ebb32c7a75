use std::collections::{BTreeMap, BTreeSet};

use crate::types::{LogIndex, PeerId, RoundId};

/// A voter's reply to an edit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Approve,
    Abort,
}

/// Outcome of a completed tally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commit,
    Abort,
}

/// Where a peer stands in the edit protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditPhase {
    Idle,
    /// This peer proposed an edit and is collecting votes
    Proposed,
    /// Another peer's request is waiting for this peer's vote
    AwaitingDecision,
}

/// Undecided until every expected voter has voted. Any abort aborts.
pub fn tally<'a, I>(expected: usize, votes: I) -> Option<Decision>
where
    I: IntoIterator<Item = &'a Vote>,
{
    let mut received = 0;
    let mut aborted = false;

    for vote in votes {
        received += 1;
        aborted |= *vote == Vote::Abort;
    }

    if received < expected {
        return None;
    }

    if aborted {
        Some(Decision::Abort)
    } else {
        Some(Decision::Commit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditProposal {
    pub proposer: PeerId,
    pub index: LogIndex,
    pub payload: String,
}

impl EditProposal {
    pub fn new(proposer: PeerId, index: LogIndex, payload: impl Into<String>) -> Self {
        Self {
            proposer,
            index,
            payload: payload.into(),
        }
    }
}

/// Votes collected for one proposal
#[derive(Debug, Clone)]
pub struct VoteRound {
    pub id: RoundId,
    pub proposal: EditProposal,
    expected: BTreeSet<PeerId>,
    votes: BTreeMap<PeerId, Vote>,
}

impl VoteRound {
    pub fn new(id: RoundId, proposal: EditProposal, voters: impl IntoIterator<Item = PeerId>) -> Self {
        let expected = voters
            .into_iter()
            .filter(|voter| *voter != proposal.proposer)
            .collect();

        Self {
            id,
            proposal,
            expected,
            votes: BTreeMap::new(),
        }
    }

    /// Returns false if `voter` is not part of this round.
    /// A repeated vote replaces the earlier one.
    pub fn record(&mut self, voter: PeerId, vote: Vote) -> bool {
        if !self.expected.contains(&voter) {
            return false;
        }
        if let Some(previous) = self.votes.insert(voter, vote) {
            tracing::debug!(
                "Peer {} replaced its {:?} vote with {:?} in round {}",
                voter,
                previous,
                vote,
                self.id
            );
        }
        true
    }

    pub fn decision(&self) -> Option<Decision> {
        tally(self.expected.len(), self.votes.values())
    }

    pub fn voters(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.expected.iter().copied()
    }

    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    pub fn received_count(&self) -> usize {
        self.votes.len()
    }

    /// Voters that haven't voted yet
    pub fn missing(&self) -> Vec<PeerId> {
        self.expected
            .iter()
            .filter(|voter| !self.votes.contains_key(voter))
            .copied()
            .collect()
    }

    /// First voter, in id order, that voted abort
    pub fn first_abort(&self) -> Option<PeerId> {
        self.votes
            .iter()
            .find(|(_, vote)| **vote == Vote::Abort)
            .map(|(voter, _)| *voter)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundResult {
    Committed,
    Aborted { by: PeerId },
    TimedOut { missing: Vec<PeerId> },
}

/// A concluded round, handed back to the proposing peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    pub round: RoundId,
    pub proposal: EditProposal,
    pub voters: Vec<PeerId>,
    pub result: RoundResult,
}
