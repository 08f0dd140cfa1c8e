//! Laravel 日志访问模块 - 读取 laravel.log 并解析性能/死锁条目

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio::process::Command;

/// 性能日志标签，探针以该标签写入结构化条目
pub const PERF_TAG: &str = "[SENTINEL_PERF]";

/// 单次请求的性能条目（由探针上报或从日志解析）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceEntry {
    pub method: String,
    pub uri: String,
    pub duration_ms: f64,
    pub memory_mb: f64,
    pub query_count: u32,
    pub slow_queries: Vec<SlowQuery>,
    /// 缺省时由 Store 在入库时填充
    pub timestamp: String,
}

/// 慢查询明细
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowQuery {
    pub sql: String,
    pub duration_ms: f64,
}

/// 数据库锁异常条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockEntry {
    pub timestamp: String,
    pub message: String,
}

/// `artisan route:list --json` 输出的单条路由
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub domain: Option<String>,
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action: String,
    /// artisan 输出中可能是字符串或数组
    #[serde(default)]
    pub middleware: serde_json::Value,
}

/// 在项目目录执行 `php artisan route:list --json` 并解析路由表
pub async fn routes(project_path: &Path) -> Result<Vec<Route>> {
    let output = Command::new("php")
        .args(["artisan", "route:list", "--json"])
        .current_dir(project_path)
        .output()
        .await
        .context("无法执行 artisan 命令")?;

    if !output.status.success() {
        anyhow::bail!(
            "artisan route:list 失败: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let routes: Vec<Route> =
        serde_json::from_slice(&output.stdout).context("路由 JSON 解析失败")?;
    Ok(routes)
}

/// 读取 storage/logs/laravel.log 的最后 N 行
///
/// 日志缺失或不可读时返回空列表（软失败，展示层继续工作）
pub fn recent_logs(project_path: &Path, lines_to_read: usize) -> Vec<String> {
    let log_path = project_path.join("storage").join("logs").join("laravel.log");

    let file = match File::open(&log_path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().filter_map(|l| l.ok()).collect();

    let start = lines.len().saturating_sub(lines_to_read);
    lines[start..].to_vec()
}

/// 扫描最近 2000 行日志中的 [SENTINEL_PERF] 条目
pub fn performance_logs(project_path: &Path) -> Vec<PerformanceEntry> {
    let lines = recent_logs(project_path, 2000);

    let mut metrics = Vec::new();
    for line in &lines {
        let Some(parsed) = parse_perf_line(line) else {
            continue;
        };
        let Ok(mut entry) = serde_json::from_str::<PerformanceEntry>(parsed.payload) else {
            continue;
        };
        // 行首的括号时间戳优先于 JSON 内的时间戳
        if let Some(ts) = parsed.timestamp {
            entry.timestamp = ts.to_string();
        }
        metrics.push(entry);
    }

    metrics
}

/// 扫描最近 5000 行日志中的数据库锁错误
pub fn deadlocks(project_path: &Path) -> Vec<DeadlockEntry> {
    let lines = recent_logs(project_path, 5000);

    let mut entries = Vec::new();
    for line in &lines {
        if !line.contains("Deadlock found") && !line.contains("Lock wait timeout exceeded") {
            continue;
        }

        let mut entry = DeadlockEntry {
            timestamp: String::new(),
            message: line.clone(),
        };
        if let Some(ts) = bracketed_timestamp(line) {
            entry.timestamp = ts.to_string();
            if line.len() > 22 {
                entry.message = line[22..].trim().to_string();
            }
        }
        entries.push(entry);
    }

    entries
}

/// 一行性能日志的解析结果
pub(crate) struct PerfLine<'a> {
    /// 行首括号时间戳（如存在）
    pub timestamp: Option<&'a str>,
    /// 标签后的 JSON 负载
    pub payload: &'a str,
}

/// 容错行解析：括号时间戳前缀 + 标签 + 首个未转义 '{' 起始的 JSON
///
/// 格式不符时返回 None，从不报错
pub(crate) fn parse_perf_line(line: &str) -> Option<PerfLine<'_>> {
    let tag_idx = line.find(PERF_TAG)?;
    let after_tag = &line[tag_idx + PERF_TAG.len()..];

    let brace = find_unescaped_brace(after_tag)?;
    let payload = &after_tag[brace..];

    Some(PerfLine {
        timestamp: bracketed_timestamp(line),
        payload,
    })
}

/// 提取固定宽度的括号时间戳前缀："[2024-01-01 12:00:00] ..."
fn bracketed_timestamp(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    if bytes.len() > 21 && bytes[0] == b'[' && bytes[20] == b']' && bytes[..22].is_ascii() {
        Some(&line[1..20])
    } else {
        None
    }
}

/// 找到首个未被反斜杠转义的 '{'
fn find_unescaped_brace(s: &str) -> Option<usize> {
    let mut prev_escape = false;
    for (i, c) in s.char_indices() {
        if c == '{' && !prev_escape {
            return Some(i);
        }
        prev_escape = c == '\\' && !prev_escape;
    }
    None
}
