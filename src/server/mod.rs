//! MCP 服务边界：协议帧与 stdio 传输

pub mod protocol;
pub mod stdio;

pub use stdio::StdioServer;
