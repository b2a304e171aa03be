mod cascade;
mod debounce;
mod orchestrator;
mod session;

pub use cascade::{Cascade, CascadeWrite, DependencyResolver, DependentFieldCascade};
pub use debounce::Debouncer;
pub use orchestrator::{
    CreateTicket, DeleteTicket, ListTicket, LoadOutcome, LoadTicket, Orchestrator, Request, SaveOutcome,
    SaveTicket, SaveTrigger, SessionPhase, SessionStatus, UpdateMode,
};
pub use session::Session;
