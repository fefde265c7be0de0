//! Offline translation core: keeps at most one local model loaded, streams
//! translations from it, and lets go of it when nobody is using it.

pub mod catalog;
pub mod config;
pub mod idle;
pub mod logging;
pub mod model_manager;
pub mod prompts;
pub mod service;
pub mod session;
pub mod two_step;

pub use config::OfflineConfig;
pub use idle::{ActivityThrottle, IdleSupervisor};
pub use model_manager::{IdleUnloadCallback, ModelManager};
pub use service::OfflineTranslator;
pub use session::GenerationSession;
pub use two_step::{RouteTable, TranslationJob, TwoStepRoute};

pub use offline_types::{
    CustomModel, GenerationOutput, GenerationRequest, ModelDescriptor, OfflineError,
    ProgressReport, SamplingOptions,
};
