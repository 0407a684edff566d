// Timeglow Worker
//
// Hosts the restoration workflow, the job dispatcher, billing event handling
// and the HTTP event intake in one process.

pub mod app;
pub mod billing;
pub mod dispatcher;
pub mod intake;
pub mod workflow;

pub use app::Pipeline;
pub use billing::BillingHandler;
pub use dispatcher::{DispatchedJob, Dispatcher};
pub use intake::{routes, ErrorResponse, IntakeState, JobAccepted, JobView};
pub use workflow::{
    Collaborators, PipelineRunner, RestorationInput, RestorationWorkflow, WorkflowSettings,
};
