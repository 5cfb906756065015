//! Server instances and the namespace registry that owns them.

pub mod instance;
pub mod pipeline;
pub mod registry;

pub use instance::{InitOptions, ServerInstance};
pub use pipeline::{
    ErrorHandler, Middleware, Pipeline, PipelineStage, GENERAL_SERVER_ERROR_CODE,
    GENERAL_SERVER_ERROR_MESSAGE,
};
pub use registry::ServerRegistry;
