pub mod actor;
pub mod round;

pub use actor::{Cancel, CastVote, Coordinator, GetRound, Propose, RoundStatus};
pub use round::{
    tally, Decision, EditPhase, EditProposal, RoundOutcome, RoundResult, Vote, VoteRound,
};
