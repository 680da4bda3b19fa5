#![forbid(unsafe_code)]

//! Runtime: the navigation gate and the message loop that drives it.
//!
//! [`FormModel`] implements [`Model`]; its update function is the page
//! navigation gate. Side effects (server validation, save requests, view
//! cache writes, error reports) leave the model as [`Cmd`] values and are
//! executed by [`Program`] on worker threads, or inline by
//! [`ProgramSimulator`] in tests.
//!
//! # Key Components
//!
//! - [`FormModel`] - Form state plus the gate state machine
//! - [`Program`] - Message loop with background tasks
//! - [`ProgramSimulator`] - Deterministic loop for tests
//! - [`ViewCache`] - Last viewed page per instance
//! - [`ValidationClient`] - Remote validation endpoint
//! - [`PageOrderClient`] - Remote page-order calculation

pub mod error;
pub mod error_sink;
pub mod gate;
pub mod logging;
pub mod program;
pub mod simulator;
pub mod state;
pub mod transport;
pub mod view_cache;

pub use error::{NavigationError, NavigationResult};
pub use error_sink::{ErrorReport, ErrorSink, RecordingErrorSink, TracingErrorSink};
pub use gate::{
    FormModel, FormMsg, GatePhase, NavigationOutcome, NavigationRequest, RejectReason,
};
pub use program::{Cmd, Model, Program, ProgramConfig, SaveHook, TaskSpec};
pub use simulator::{CmdRecord, ProgramSimulator};
pub use state::{AutoSaveBehavior, FormState, UiConfig};
#[cfg(feature = "http")]
pub use transport::HttpValidationClient;
pub use transport::{PageOrderClient, PageOrderRequest, ValidationClient, ValidationRequest};
#[cfg(feature = "state-persistence")]
pub use view_cache::FileViewStorage;
pub use view_cache::{MemoryViewStorage, StorageError, StorageResult, ViewCache, ViewStorage};
