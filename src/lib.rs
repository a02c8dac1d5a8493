//! hermit — 容器化工作流 MCP 服务器
//!
//! 把 analyze → dockerfile → build → scan → tag → push → manifests →
//! cluster → deploy → verify 的容器化链路以 MCP 工具的形式暴露给 AI
//! 客户端：会话化持久状态、步骤依赖检查、链式下一步提示与瞬时错误重试。

pub mod config;
pub mod core;
pub mod observability;
pub mod server;
pub mod session;
pub mod tools;
