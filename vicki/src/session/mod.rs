pub mod manager;
pub mod response;

pub use manager::{ResumedHandler, Session, SessionInfo, SessionManager};
pub use response::{Response, ResponseState, Resumption, TurnOutput, TurnSink};
