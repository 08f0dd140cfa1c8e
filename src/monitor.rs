//! 进程遥测模块 - 扫描系统中的 PHP 进程并汇总分层统计

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tokio::net::TcpStream;

/// PHP-FPM 默认监听端口（连通性探测用）
const FPM_PROBE_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 9000);
/// 端口探测超时：失败视为"未检测到"，不是错误
const FPM_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// 一次轮询的系统聚合统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    /// Agent 自身常驻内存（MB）
    pub memory_usage_mb: u64,
    /// Agent 运行时工作线程数
    pub num_workers: usize,
    pub php_web_memory_mb: u64,
    pub php_cli_memory_mb: u64,
    pub php_fpm_cpu_percent: f64,
    pub php_fpm_worker_count: usize,
}

/// 运行时检测结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub php_fpm: bool,
    pub system_stats: SystemStats,
}

/// 进程分层
#[derive(Debug, PartialEq)]
enum Tier {
    /// FPM/CGI 请求处理进程：累计内存 + CPU + 计数
    Web,
    /// artisan / 开发服务器等命令行进程：只累计内存
    Cli,
}

/// 进程遥测监视器
///
/// System 内部保留的进程表即跨轮询的 per-pid 句柄：CPU 百分比是相对上次
/// refresh 的增量，新句柄在下一次轮询前报 0；refresh 同时清除已消失的 pid。
pub struct Monitor {
    system: System,
}

impl Monitor {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self { system }
    }

    /// 轮询一次进程表并返回聚合统计
    pub fn system_stats(&mut self) -> SystemStats {
        self.system.refresh_processes(ProcessesToUpdate::All);

        let mut web_bytes: u64 = 0;
        let mut cli_bytes: u64 = 0;
        let mut web_cpu: f64 = 0.0;
        let mut web_workers: usize = 0;

        for process in self.system.processes().values() {
            let name = process.name().to_string_lossy().to_lowercase();
            let cmdline = process
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase();

            match classify(&name, &cmdline) {
                Some(Tier::Web) => {
                    web_bytes += process.memory();
                    web_cpu += process.cpu_usage() as f64;
                    web_workers += 1;
                }
                Some(Tier::Cli) => {
                    cli_bytes += process.memory();
                }
                None => {}
            }
        }

        let agent_memory_mb = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| self.system.process(pid))
            .map(|p| p.memory() / 1024 / 1024)
            .unwrap_or(0);

        let num_workers = tokio::runtime::Handle::try_current()
            .map(|h| h.metrics().num_workers())
            .unwrap_or(0);

        SystemStats {
            memory_usage_mb: agent_memory_mb,
            num_workers,
            php_web_memory_mb: web_bytes / 1024 / 1024,
            php_cli_memory_mb: cli_bytes / 1024 / 1024,
            php_fpm_cpu_percent: web_cpu,
            php_fpm_worker_count: web_workers,
        }
    }

    /// 当前跟踪的进程句柄数（轮询后与存活进程一一对应）
    pub fn tracked_process_count(&self) -> usize {
        self.system.processes().len()
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// 基于快照统计判断运行时是否在线：web 层内存 > 0 或 FPM 端口可连通
pub async fn runtime_detected(stats: &SystemStats) -> bool {
    if stats.php_web_memory_mb > 0 {
        return true;
    }
    probe_fpm_port().await
}

/// 异步探测，不阻塞运行时工作线程
async fn probe_fpm_port() -> bool {
    let addr = SocketAddr::from(FPM_PROBE_ADDR);
    matches!(
        tokio::time::timeout(FPM_PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// 进程分层判定：名称或命令行匹配 FPM/CGI 签名为 web 层，
/// artisan / serve 调用为 cli 层，其余忽略
fn classify(name: &str, cmdline: &str) -> Option<Tier> {
    if !name.contains("php") {
        return None;
    }

    if name.contains("fpm") || name.contains("cgi") || cmdline.contains("php-fpm") {
        return Some(Tier::Web);
    }

    if cmdline.contains("artisan") || cmdline.contains("serve") {
        return Some(Tier::Cli);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_web_tier() {
        assert_eq!(classify("php-fpm", "php-fpm: pool www"), Some(Tier::Web));
        assert_eq!(classify("php-cgi.exe", "php-cgi.exe"), Some(Tier::Web));
        assert_eq!(classify("php", "/usr/sbin/php-fpm --nodaemonize"), Some(Tier::Web));
    }

    #[test]
    fn test_classify_cli_tier() {
        assert_eq!(classify("php", "php artisan queue:work"), Some(Tier::Cli));
        assert_eq!(classify("php", "php artisan serve"), Some(Tier::Cli));
    }

    #[test]
    fn test_classify_ignores_everything_else() {
        assert_eq!(classify("php", "php composer.phar install"), None);
        assert_eq!(classify("nginx", "nginx: worker process"), None);
        assert_eq!(classify("bash", "bash artisan"), None);
    }

    #[test]
    fn test_poll_does_not_grow_handle_table() {
        let mut monitor = Monitor::new();
        monitor.system_stats();
        let first = monitor.tracked_process_count();

        // 稳定进程集合下多次轮询句柄数不增长
        for _ in 0..3 {
            monitor.system_stats();
        }
        let last = monitor.tracked_process_count();
        assert!(last <= first + 32, "handle table grew: {} -> {}", first, last);
    }

    #[tokio::test]
    async fn test_runtime_detected_short_circuits_on_web_memory() {
        // web 层有内存时无需端口探测
        let stats = SystemStats {
            php_web_memory_mb: 1,
            ..Default::default()
        };
        assert!(runtime_detected(&stats).await);
    }

    #[test]
    fn test_system_stats_smoke() {
        let mut monitor = Monitor::new();
        let stats = monitor.system_stats();
        // 采样不应 panic，CPU 聚合非负
        assert!(stats.php_fpm_cpu_percent >= 0.0);
    }
}
