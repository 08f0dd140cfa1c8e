//! 轮询调度模块 - 固定间隔驱动采样与告警检查

use crate::server::AppState;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// 轮询间隔
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// 后台轮询循环，进程生命周期内持续运行
pub async fn run(state: crate::server::SharedState) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        tick(&state);
    }
}

/// 单次 tick：采样 → 发布快照 → watchdog 检查
pub fn tick(state: &AppState) {
    let stats = {
        let mut monitor = state.monitor.lock().unwrap();
        monitor.system_stats()
    };
    debug!(
        web_mb = stats.php_web_memory_mb,
        cli_mb = stats.php_cli_memory_mb,
        fpm_cpu = stats.php_fpm_cpu_percent,
        workers = stats.php_fpm_worker_count,
        "轮询采样完成"
    );

    let (threshold, log_path) = {
        let cfg = state.config.read().unwrap();
        (cfg.cpu_threshold, cfg.nginx_log_path.clone())
    };

    state
        .watchdog
        .check(stats.php_fpm_cpu_percent, threshold, Path::new(&log_path));

    *state.latest_stats.write().unwrap() = stats;
}
