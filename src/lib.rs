//! PHP Sentinel - 监控、插桩与诊断本地 Laravel/PHP 开发项目

pub mod audit;
pub mod config;
pub mod discovery;
pub mod injector;
pub mod laravel;
pub mod monitor;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod watchdog;

pub use audit::{AuditError, AuditManager, AuditStatus, AuditStatusEntry};
pub use config::Config;
pub use discovery::{find_projects, Project};
pub use injector::{Injector, InjectorError, INCLUDE_MARKER, INSPECTOR_FILENAME};
pub use laravel::{DeadlockEntry, PerformanceEntry, Route, SlowQuery};
pub use monitor::{Monitor, MonitorStatus, SystemStats};
pub use server::{build_router, serve, AppState, SharedState};
pub use store::PerfStore;
pub use watchdog::{Incident, Watchdog};
