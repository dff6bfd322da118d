//! 配置管理模块
//!
//! 该模块负责加载和校验控制器配置。配置按以下顺序叠加：
//! 内置默认值、可选的 YAML/JSON 配置文件、`INGRESS_MANAGER` 前缀的环境变量。
//! 例如 `INGRESS_MANAGER__WORKERS__COUNT=8` 会覆盖 `workers.count`。

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "INGRESS_MANAGER";

/// 控制器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// 触发创建 Ingress 的 Service 注解 key
    pub annotation_key: String,
    /// 生成的 Ingress 模板
    pub ingress: IngressConfig,
    /// 工作队列与 worker 配置
    pub workers: WorkerConfig,
    /// 日志级别
    pub log_level: String,
}

/// Ingress 模板配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// 路由规则的 host
    pub host: String,
    /// IngressClass 名称，为空时不设置
    pub class_name: Option<String>,
    /// 后端 Service 端口
    pub backend_port: i32,
}

/// 工作队列与 worker 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 并发 worker 数量
    pub count: usize,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试退避的初始延迟（毫秒）
    pub base_delay_ms: u64,
    /// 重试退避的最大延迟（秒）
    pub max_delay_secs: u64,
    /// worker 异常退出后重新启动的间隔（秒）
    pub restart_interval_secs: u64,
    /// 工作队列名称，仅用于日志
    pub queue_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            annotation_key: "ingress/http".to_string(),
            ingress: IngressConfig::default(),
            workers: WorkerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            host: "baerwang.com".to_string(),
            class_name: Some("nginx".to_string()),
            backend_port: 80,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 5,
            max_retries: 10,
            base_delay_ms: 5,
            max_delay_secs: 1000,
            restart_interval_secs: 60,
            queue_name: "ingressManager".to_string(),
        }
    }
}

impl WorkerConfig {
    /// 重试退避的初始延迟
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// 重试退避的最大延迟
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    /// worker 重启间隔
    pub fn restart_interval(&self) -> Duration {
        Duration::from_secs(self.restart_interval_secs)
    }
}

impl ControllerConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.annotation_key.is_empty() {
            return Err(Error::Config("annotation_key 不能为空".to_string()));
        }
        if self.ingress.host.is_empty() {
            return Err(Error::Config("ingress.host 不能为空".to_string()));
        }
        if !(1..=65535).contains(&self.ingress.backend_port) {
            return Err(Error::Config(format!(
                "ingress.backend_port 超出范围: {}",
                self.ingress.backend_port
            )));
        }
        if self.workers.count == 0 {
            return Err(Error::Config("workers.count 必须大于 0".to_string()));
        }
        if self.workers.base_delay() > self.workers.max_delay() {
            return Err(Error::Config(
                "workers.base_delay_ms 不能大于 workers.max_delay_secs".to_string(),
            ));
        }
        Ok(())
    }

    /// 以 YAML 格式输出配置
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// 配置管理器
pub struct ConfigManager {
    /// 配置文件路径
    config_path: Option<PathBuf>,
    /// 当前配置
    config: ControllerConfig,
}

impl ConfigManager {
    /// 加载配置，`config_path` 为空时只使用默认值和环境变量
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        config.validate()?;

        Ok(Self {
            config_path: config_path.map(Path::to_path_buf),
            config,
        })
    }

    fn load_config(config_path: Option<&Path>) -> Result<ControllerConfig> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            // 确定配置文件格式
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => {
                    return Err(Error::Config(format!(
                        "不支持的配置文件格式，仅支持 YAML 或 JSON: {}",
                        path.display()
                    )))
                }
            };
            builder = builder.add_source(File::from(path).format(format));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("构建配置失败: {e}")))?;

        config
            .try_deserialize::<ControllerConfig>()
            .map_err(|e| Error::Config(format!("配置格式错误: {e}")))
    }

    /// 配置文件路径
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 获取完整配置
    pub fn get_config(&self) -> &ControllerConfig {
        &self.config
    }

    /// 取出配置
    pub fn into_config(self) -> ControllerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.annotation_key, "ingress/http");
        assert_eq!(config.ingress.backend_port, 80);
        assert_eq!(config.workers.count, 5);
        assert_eq!(config.workers.max_retries, 10);
        assert_eq!(config.workers.base_delay(), Duration::from_millis(5));
        assert_eq!(config.workers.max_delay(), Duration::from_secs(1000));
        assert_eq!(config.workers.restart_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::empty_annotation(|c: &mut ControllerConfig| c.annotation_key.clear())]
    #[case::empty_host(|c: &mut ControllerConfig| c.ingress.host.clear())]
    #[case::zero_port(|c: &mut ControllerConfig| c.ingress.backend_port = 0)]
    #[case::port_too_large(|c: &mut ControllerConfig| c.ingress.backend_port = 70000)]
    #[case::zero_workers(|c: &mut ControllerConfig| c.workers.count = 0)]
    #[case::base_above_max(|c: &mut ControllerConfig| {
        c.workers.base_delay_ms = 5000;
        c.workers.max_delay_secs = 1;
    })]
    fn test_validate_rejects(#[case] mutate: fn(&mut ControllerConfig)) {
        let mut config = ControllerConfig::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_yaml_file_with_partial_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "annotation_key: example.com/expose\ningress:\n  host: apps.example.com\nworkers:\n  count: 2"
        )
        .unwrap();

        let manager = ConfigManager::new(Some(file.path())).unwrap();
        let config = manager.get_config();
        assert_eq!(config.annotation_key, "example.com/expose");
        assert_eq!(config.ingress.host, "apps.example.com");
        assert_eq!(config.ingress.backend_port, 80);
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.workers.max_retries, 10);
        assert_eq!(manager.config_path(), Some(file.path()));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            ConfigManager::new(Some(file.path())),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_yaml_output_round_trips_defaults() {
        let yaml = ControllerConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("annotation_key: ingress/http"));
        let parsed: ControllerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, ControllerConfig::default());
    }
}
