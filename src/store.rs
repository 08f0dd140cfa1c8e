//! 性能条目存储 - 固定容量的环形缓冲

use crate::laravel::PerformanceEntry;
use std::collections::VecDeque;
use std::sync::RwLock;

/// 环形缓冲存储：保留最近 N 条性能条目，先进先出淘汰
pub struct PerfStore {
    inner: RwLock<StoreInner>,
}

struct StoreInner {
    entries: VecDeque<PerformanceEntry>,
    limit: usize,
}

impl PerfStore {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                entries: VecDeque::with_capacity(limit),
                limit,
            }),
        }
    }

    /// 追加条目；时间戳缺省时以当前本地时间补齐
    pub fn add(&self, mut entry: PerformanceEntry) {
        if entry.timestamp.is_empty() {
            entry.timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        }

        let mut inner = self.inner.write().unwrap();
        inner.entries.push_back(entry);

        // 超出容量时从头部淘汰（保留最新 N 条）
        while inner.entries.len() > inner.limit {
            inner.entries.pop_front();
        }
    }

    /// 按插入顺序返回全部条目的副本
    pub fn get_all(&self) -> Vec<PerformanceEntry> {
        let inner = self.inner.read().unwrap();
        inner.entries.iter().cloned().collect()
    }

    /// 清空内存中的条目（不影响磁盘日志）
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
