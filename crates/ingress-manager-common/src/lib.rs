//! Ingress Manager Common - 跨模块共享的错误类型与配置
//!
//! 该模块提供 Ingress Manager 各组件共享的统一错误处理机制和控制器配置加载。

pub mod config;
pub mod error;

/// 重新导出常用类型，方便使用
pub use config::{ConfigManager, ControllerConfig, IngressConfig, WorkerConfig};
pub use error::Error;
pub use error::Result;
