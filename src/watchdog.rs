//! Watchdog 模块 - CPU 阈值告警与冷却窗口

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::warn;

/// 连续告警之间的最小间隔
const COOLDOWN: Duration = Duration::from_secs(60);
/// 事件过期时间：超过后 latest() 不再返回
const INCIDENT_TTL_SECS: i64 = 5 * 60;
/// 事件附带的日志尾部行数
const TAIL_LINES: usize = 15;
/// 尾部读取上限（字节），避免全量扫描大文件
const TAIL_READ_CAP: u64 = 20_000;

/// 一次 CPU 突破事件及其上下文日志快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f64,
    pub suspect_requests: Vec<String>,
}

struct WatchState {
    last_incident: Option<Incident>,
    cooldown_until: Option<Instant>,
}

/// 两态门闩：静默（无在期事件）与告警（事件存在，冷却计时中）
pub struct Watchdog {
    state: RwLock<WatchState>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(WatchState {
                last_incident: None,
                cooldown_until: None,
            }),
        }
    }

    /// 周期检查：超阈值且不在冷却期时生成新事件
    ///
    /// 冷却期内的突破返回现有事件；低于阈值返回 None（不会提前清除事件）。
    /// 日志尾部读取发生在锁外。
    pub fn check(&self, cpu_percent: f64, threshold: u32, log_path: &Path) -> Option<Incident> {
        if cpu_percent < threshold as f64 {
            return None;
        }

        {
            let state = self.state.read().unwrap();
            if let Some(until) = state.cooldown_until {
                if Instant::now() < until {
                    return state.last_incident.clone();
                }
            }
        }

        // 突破阈值：采集上下文后再持锁写入
        warn!(cpu_percent, threshold, "CPU 超过阈值，记录事件");
        let lines = read_last_lines(log_path, TAIL_LINES);

        let incident = Incident {
            timestamp: Utc::now(),
            cpu_percent,
            suspect_requests: lines,
        };

        let mut state = self.state.write().unwrap();
        state.last_incident = Some(incident.clone());
        state.cooldown_until = Some(Instant::now() + COOLDOWN);
        Some(incident)
    }

    /// 返回当前在期事件；超过 TTL 后返回 None（纯读取，无副作用）
    pub fn latest(&self) -> Option<Incident> {
        let state = self.state.read().unwrap();
        let incident = state.last_incident.as_ref()?;

        let age = Utc::now().signed_duration_since(incident.timestamp);
        if age.num_seconds() > INCIDENT_TTL_SECS {
            return None;
        }
        Some(incident.clone())
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// 读取文件最后 N 行，读取量以 TAIL_READ_CAP 为上限
///
/// 文件缺失或不可读时返回空列表
pub(crate) fn read_last_lines(path: &Path, n: usize) -> Vec<String> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };

    if let Ok(meta) = file.metadata() {
        if meta.len() > TAIL_READ_CAP {
            let _ = file.seek(SeekFrom::End(-(TAIL_READ_CAP as i64)));
        }
    }

    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().filter_map(|l| l.ok()).collect();

    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}
