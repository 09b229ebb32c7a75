use actix::prelude::*;
use std::time::Duration;
use tokio::sync::mpsc;

use super::round::{Decision, EditProposal, RoundOutcome, RoundResult, Vote, VoteRound};
use crate::types::{PeerId, RoundId};
use crate::util::errors::{ChatError, Result};

/// Open a round for a proposal; the proposer is dropped from `voters`.
#[derive(Message)]
#[rtype(result = "Result<RoundId>")]
pub struct Propose {
    pub proposal: EditProposal,
    pub voters: Vec<PeerId>,
}

/// A vote received from `voter`
#[derive(Message)]
#[rtype(result = "()")]
pub struct CastVote {
    pub voter: PeerId,
    pub vote: Vote,
}

/// Drop `round` without an outcome, e.g. when its vote request never went
/// out. Returns whether the round was still open.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct Cancel {
    pub round: RoundId,
}

/// Current round, if any
#[derive(Message)]
#[rtype(result = "Option<RoundStatus>")]
pub struct GetRound;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStatus {
    pub round: RoundId,
    pub proposal: EditProposal,
    pub expected: usize,
    pub received: usize,
}

/// Vote deadline for a specific round
struct RoundDeadline {
    round: RoundId,
}

impl Message for RoundDeadline {
    type Result = ();
}

/// Collects votes for this peer's edit proposals, one round at a time.
/// Concluded rounds are reported on the outcome channel.
pub struct Coordinator {
    vote_timeout: Option<Duration>,
    round: Option<VoteRound>,
    deadline: Option<SpawnHandle>,
    next_round: RoundId,
    outcomes: mpsc::UnboundedSender<RoundOutcome>,
}

impl Actor for Coordinator {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("Edit coordinator started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("Edit coordinator stopped");
    }
}

impl Coordinator {
    pub fn new(
        vote_timeout: Option<Duration>,
        outcomes: mpsc::UnboundedSender<RoundOutcome>,
    ) -> Self {
        Self {
            vote_timeout,
            round: None,
            deadline: None,
            next_round: 0,
            outcomes,
        }
    }

    fn try_conclude(&mut self, ctx: &mut Context<Self>) {
        let decision = match self.round.as_ref().and_then(|round| round.decision()) {
            Some(decision) => decision,
            None => return,
        };

        if let Some(round) = self.round.take() {
            let result = match decision {
                Decision::Commit => RoundResult::Committed,
                Decision::Abort => RoundResult::Aborted {
                    by: round.first_abort().unwrap_or(round.proposal.proposer),
                },
            };
            self.finish(ctx, round, result);
        }
    }

    fn expire(&mut self, ctx: &mut Context<Self>, id: RoundId) {
        let is_current = self.round.as_ref().map(|round| round.id) == Some(id);
        if !is_current {
            return;
        }

        if let Some(round) = self.round.take() {
            let missing = round.missing();
            tracing::warn!(
                "Edit round {} timed out waiting for peers {:?}",
                round.id,
                missing
            );
            self.finish(ctx, round, RoundResult::TimedOut { missing });
        }
    }

    fn finish(&mut self, ctx: &mut Context<Self>, round: VoteRound, result: RoundResult) {
        if let Some(handle) = self.deadline.take() {
            ctx.cancel_future(handle);
        }

        tracing::info!("Edit round {} concluded: {:?}", round.id, result);

        let outcome = RoundOutcome {
            round: round.id,
            voters: round.voters().collect(),
            proposal: round.proposal,
            result,
        };

        if self.outcomes.send(outcome).is_err() {
            tracing::warn!("Round outcome dropped, peer is shutting down");
        }
    }
}

impl Handler<Propose> for Coordinator {
    type Result = Result<RoundId>;

    fn handle(&mut self, msg: Propose, ctx: &mut Context<Self>) -> Self::Result {
        if let Some(round) = &self.round {
            return Err(ChatError::RoundInProgress(round.id));
        }

        let id = self.next_round;
        self.next_round += 1;

        let round = VoteRound::new(id, msg.proposal, msg.voters);
        tracing::info!(
            "Edit round {} opened for index {} with {} voters",
            id,
            round.proposal.index,
            round.expected_count()
        );
        self.round = Some(round);

        if let Some(timeout) = self.vote_timeout {
            let handle = ctx.run_later(timeout, move |act, ctx| {
                act.deadline = None;
                ctx.notify(RoundDeadline { round: id });
            });
            self.deadline = Some(handle);
        }

        // No other peers: nothing to wait for
        self.try_conclude(ctx);

        Ok(id)
    }
}

impl Handler<CastVote> for Coordinator {
    type Result = ();

    fn handle(&mut self, msg: CastVote, ctx: &mut Context<Self>) {
        let round = match self.round.as_mut() {
            Some(round) => round,
            None => {
                tracing::debug!("Ignoring {:?} from peer {}: no open round", msg.vote, msg.voter);
                return;
            }
        };

        if !round.record(msg.voter, msg.vote) {
            tracing::debug!(
                "Ignoring {:?} from peer {}: not a voter in round {}",
                msg.vote,
                msg.voter,
                round.id
            );
            return;
        }

        tracing::debug!(
            "Round {}: {}/{} votes",
            round.id,
            round.received_count(),
            round.expected_count()
        );

        self.try_conclude(ctx);
    }
}

impl Handler<RoundDeadline> for Coordinator {
    type Result = ();

    fn handle(&mut self, msg: RoundDeadline, ctx: &mut Context<Self>) {
        self.expire(ctx, msg.round);
    }
}

impl Handler<Cancel> for Coordinator {
    type Result = bool;

    fn handle(&mut self, msg: Cancel, ctx: &mut Context<Self>) -> bool {
        let is_current = self.round.as_ref().map(|round| round.id) == Some(msg.round);
        if !is_current {
            return false;
        }

        if let Some(handle) = self.deadline.take() {
            ctx.cancel_future(handle);
        }
        self.round = None;
        tracing::info!("Edit round {} cancelled", msg.round);
        true
    }
}

impl Handler<GetRound> for Coordinator {
    type Result = Option<RoundStatus>;

    fn handle(&mut self, _msg: GetRound, _ctx: &mut Context<Self>) -> Self::Result {
        self.round.as_ref().map(|round| RoundStatus {
            round: round.id,
            proposal: round.proposal.clone(),
            expected: round.expected_count(),
            received: round.received_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal() -> EditProposal {
        EditProposal::new(0, 0, "edited")
    }

    #[actix_rt::test]
    async fn test_unanimous_approval_commits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(None, tx).start();

        let round = coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1, 2],
            })
            .await
            .unwrap()
            .unwrap();

        coordinator.do_send(CastVote { voter: 1, vote: Vote::Approve });
        let status = coordinator.send(GetRound).await.unwrap().unwrap();
        assert_eq!(status.received, 1);
        assert_eq!(status.expected, 2);

        coordinator.do_send(CastVote { voter: 2, vote: Vote::Approve });

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.round, round);
        assert_eq!(outcome.result, RoundResult::Committed);
        assert_eq!(outcome.voters, vec![1, 2]);
        assert!(coordinator.send(GetRound).await.unwrap().is_none());
    }

    #[actix_rt::test]
    async fn test_single_abort_aborts() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(None, tx).start();

        coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1, 2],
            })
            .await
            .unwrap()
            .unwrap();

        coordinator.do_send(CastVote { voter: 1, vote: Vote::Approve });
        coordinator.do_send(CastVote { voter: 2, vote: Vote::Abort });

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.result, RoundResult::Aborted { by: 2 });
    }

    #[actix_rt::test]
    async fn test_one_round_at_a_time() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(None, tx).start();

        let first = coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1],
            })
            .await
            .unwrap()
            .unwrap();

        let second = coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1],
            })
            .await
            .unwrap();
        assert!(matches!(second, Err(ChatError::RoundInProgress(id)) if id == first));

        coordinator.do_send(CastVote { voter: 1, vote: Vote::Approve });
        rx.recv().await.unwrap();

        let third = coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1],
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(third, first + 1);
    }

    #[actix_rt::test]
    async fn test_no_voters_commits_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(None, tx).start();

        coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0],
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().result, RoundResult::Committed);
    }

    #[actix_rt::test]
    async fn test_cancel_frees_the_coordinator() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(Some(Duration::from_millis(50)), tx).start();

        let round = coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1],
            })
            .await
            .unwrap()
            .unwrap();

        assert!(!coordinator.send(Cancel { round: round + 1 }).await.unwrap());
        assert!(coordinator.send(Cancel { round }).await.unwrap());
        assert!(coordinator.send(GetRound).await.unwrap().is_none());

        // Neither the cancelled deadline nor a late vote produce an outcome
        coordinator.do_send(CastVote { voter: 1, vote: Vote::Approve });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        let next = coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1],
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next, round + 1);
    }

    #[actix_rt::test]
    async fn test_vote_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(Some(Duration::from_millis(50)), tx).start();

        coordinator
            .send(Propose {
                proposal: proposal(),
                voters: vec![0, 1, 2],
            })
            .await
            .unwrap()
            .unwrap();
        coordinator.do_send(CastVote { voter: 1, vote: Vote::Approve });

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.result, RoundResult::TimedOut { missing: vec![2] });

        // Late votes are ignored
        coordinator.do_send(CastVote { voter: 2, vote: Vote::Approve });
        assert!(coordinator.send(GetRound).await.unwrap().is_none());
    }
}
