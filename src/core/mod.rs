//! 核心：错误类型、重试协调与工作流编排

pub mod error;
pub mod orchestrator;
pub mod recovery;

pub use error::{StepFailure, ToolError};
pub use orchestrator::{ChainHint, Orchestrator, ToolInvocation, WORKFLOW_STEPS};
pub use recovery::{ErrorClass, FixSuggester, RetryCoordinator};
