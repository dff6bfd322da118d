//! 错误处理模块
//!
//! 该模块提供 Ingress Manager 的统一错误类型，并负责错误分类：
//! 哪些错误属于“预期的不存在”，哪些错误可以通过重试解决。

use thiserror::Error;

/// Ingress Manager 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 工作项 key 格式错误
    #[error("无效的工作项 key: {0:?}")]
    InvalidKey(String),

    /// 对象缺少必要的元数据字段
    #[error("对象缺少字段: {0}")]
    MissingObjectKey(&'static str),

    /// 资源不存在
    #[error("{kind} {key} 不存在")]
    NotFound {
        /// 资源类型
        kind: &'static str,
        /// 资源 key（namespace/name）
        key: String,
    },

    /// 本地缓存尚未完成初始同步
    #[error("{0} 缓存尚未同步")]
    CacheNotSynced(&'static str),

    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// YAML 序列化错误
    #[error("YAML 序列化错误: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Ingress Manager 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 是否为“资源不存在”类错误
    ///
    /// 包括显式的 [`Error::NotFound`] 以及 API 返回的 404。
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// 是否值得重试
    ///
    /// 格式错误的输入重试也无法修复，其余错误均视为暂时性错误。
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Error::InvalidKey(_) | Error::MissingObjectKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_not_found_classification() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
        assert!(Error::NotFound { kind: "Ingress", key: "ns/foo".to_string() }.is_not_found());
        assert!(!Error::InvalidKey("a/b/c".to_string()).is_not_found());
    }

    #[test]
    fn test_retriable_classification() {
        assert!(api_error(500).is_retriable());
        assert!(api_error(409).is_retriable());
        assert!(Error::CacheNotSynced("Service").is_retriable());
        assert!(!Error::InvalidKey("a/b/c".to_string()).is_retriable());
        assert!(!Error::MissingObjectKey(".metadata.uid").is_retriable());
    }
}
