pub mod acceptor;
pub mod backoff;
pub mod learner;
pub mod proposer;
pub mod state;

pub use proposer::{Proposer, ReplyRouter, RoundOutcome};
pub use state::{InstallOutcome, ReplicaState};
