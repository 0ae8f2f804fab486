pub mod session;
pub mod stage;

pub use session::{Deliverable, OutputKind, PipelineRequest, Session, SessionId};
pub use stage::{Stage, StageId, StageKind, StageStatus};
