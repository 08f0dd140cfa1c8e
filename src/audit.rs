//! 审计注册表模块 - 跟踪哪些项目处于插桩状态

use crate::injector::{Injector, InjectorError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::info;

/// 单个项目的审计状态；注册表中存在即表示插桩已激活
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatus {
    pub project_path: String,
    pub start_time: DateTime<Utc>,
    pub active: bool,
}

/// 状态查询的对外条目（注入模型不拥有监听进程，port 恒为 0）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatusEntry {
    pub path: String,
    pub running: bool,
    pub start_time: DateTime<Utc>,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum AuditError {
    /// 重复开启是冲突；重复关闭是幂等成功
    #[error("项目 {0} 的审计已激活")]
    AlreadyActive(String),
    #[error(transparent)]
    Injector(#[from] InjectorError),
}

/// 审计管理器：注册表唯一持有者
///
/// 同一路径的 enable/disable 由按路径的操作锁串行化（覆盖文件注入全程）；
/// 注册表锁本身不跨越 I/O。
pub struct AuditManager {
    injector: Injector,
    audits: RwLock<HashMap<String, AuditStatus>>,
    /// 按路径的操作锁：注入器对同一入口文件的读写互斥
    path_ops: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AuditManager {
    pub fn new() -> Self {
        Self::with_injector(Injector::new())
    }

    pub fn with_injector(injector: Injector) -> Self {
        Self {
            injector,
            audits: RwLock::new(HashMap::new()),
            path_ops: Mutex::new(HashMap::new()),
        }
    }

    /// 取出（或创建）某路径的操作锁
    fn op_lock(&self, project_path: &str) -> Arc<Mutex<()>> {
        self.path_ops
            .lock()
            .unwrap()
            .entry(project_path.to_string())
            .or_default()
            .clone()
    }

    /// 开启项目审计；已激活时返回冲突错误
    pub fn enable(&self, project_path: &str) -> Result<(), AuditError> {
        let op = self.op_lock(project_path);
        let _op = op.lock().unwrap();

        {
            let mut audits = self.audits.write().unwrap();
            if audits.contains_key(project_path) {
                return Err(AuditError::AlreadyActive(project_path.to_string()));
            }
            audits.insert(
                project_path.to_string(),
                AuditStatus {
                    project_path: project_path.to_string(),
                    start_time: Utc::now(),
                    active: true,
                },
            );
        }

        if let Err(e) = self.injector.enable_audit(Path::new(project_path)) {
            // 注入失败时撤销占位，注册表不留半开状态
            self.audits.write().unwrap().remove(project_path);
            return Err(e.into());
        }

        info!(project = project_path, "审计已开启");
        Ok(())
    }

    /// 关闭项目审计；未激活时为幂等成功
    pub fn disable(&self, project_path: &str) -> Result<(), AuditError> {
        let op = self.op_lock(project_path);
        let _op = op.lock().unwrap();

        let removed = self.audits.write().unwrap().remove(project_path);

        // 即使未注册也尽力清理文件（进程重启后注册表为空）
        self.injector.disable_audit(Path::new(project_path))?;

        if removed.is_some() {
            info!(project = project_path, "审计已关闭");
        }
        Ok(())
    }

    /// 项目限定键 → 状态条目的映射
    pub fn status(&self) -> HashMap<String, AuditStatusEntry> {
        let audits = self.audits.read().unwrap();
        audits
            .values()
            .map(|audit| {
                (
                    format!("{}:web", audit.project_path),
                    AuditStatusEntry {
                        path: audit.project_path.clone(),
                        running: audit.active,
                        start_time: audit.start_time,
                        port: 0,
                    },
                )
            })
            .collect()
    }

    pub fn is_active(&self, project_path: &str) -> bool {
        self.audits.read().unwrap().contains_key(project_path)
    }
}

impl Default for AuditManager {
    fn default() -> Self {
        Self::new()
    }
}
