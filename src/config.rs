//! 配置模块 - sentinel-config.json 的读写与默认值

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 配置文件名（工作目录下）
pub const CONFIG_FILE: &str = "sentinel-config.json";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8888;
const DEFAULT_CPU_THRESHOLD: u32 = 50;

/// Agent 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 项目发现的扫描根目录
    pub workspace_root: String,
    pub host: String,
    pub port: u16,
    pub ignored_projects: Vec<String>,
    /// Watchdog 的 CPU 告警阈值（百分比）
    pub cpu_threshold: u32,
    /// Watchdog 读取的访问日志路径
    pub nginx_log_path: String,
    /// 手动指定的 php-fpm 路径（可选覆盖）
    pub php_fpm_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_root: String::new(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ignored_projects: Vec::new(),
            cpu_threshold: DEFAULT_CPU_THRESHOLD,
            nginx_log_path: String::new(),
            php_fpm_path: String::new(),
        }
    }
}

impl Config {
    /// 从工作目录加载配置；文件缺失时返回默认配置，解析失败上抛
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(e).context(format!("读取配置失败: {}", path.display())),
        };

        let mut cfg: Config =
            serde_json::from_str(&data).context(format!("配置解析失败: {}", path.display()))?;

        // 空字段回填默认值
        if cfg.host.is_empty() {
            cfg.host = DEFAULT_HOST.to_string();
        }
        if cfg.port == 0 {
            cfg.port = DEFAULT_PORT;
        }
        if cfg.cpu_threshold == 0 {
            cfg.cpu_threshold = DEFAULT_CPU_THRESHOLD;
        }

        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).context(format!("写入配置失败: {}", path.display()))?;
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
