//! PHP Sentinel CLI
//!
//! 监控、插桩与诊断本地 Laravel/PHP 开发项目

use anyhow::Result;
use clap::{Parser, Subcommand};
use php_sentinel::{find_projects, AppState, Config, Injector, Monitor};
use std::path::Path;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "PHP Sentinel - 监控、插桩与诊断本地 Laravel 项目")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 Agent（控制面 + 后台轮询）
    Serve {
        /// 覆盖配置中的监听地址
        #[arg(long)]
        host: Option<String>,
        /// 覆盖配置中的监听端口
        #[arg(long)]
        port: Option<u16>,
    },
    /// 列出工作区中发现的 Laravel 项目
    Projects {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
        /// 包含被忽略的项目
        #[arg(long)]
        include_ignored: bool,
    },
    /// 采样一次系统遥测
    Status {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 为指定项目开启插桩（直接修改入口文件）
    Enable {
        /// 项目路径
        path: String,
    },
    /// 关闭指定项目的插桩并还原入口文件
    Disable {
        /// 项目路径
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，默认 info
    // 例如: RUST_LOG=debug sentinel serve
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("php_sentinel=info,sentinel=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = Config::load()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }

            let state = AppState::new(config);
            php_sentinel::serve(state).await?;
        }
        Commands::Projects {
            json,
            include_ignored,
        } => {
            let config = Config::load()?;
            let ignored = if include_ignored {
                Vec::new()
            } else {
                config.ignored_projects.clone()
            };
            let projects = find_projects(Path::new(&config.workspace_root), &ignored)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else {
                println!("发现 {} 个项目:\n", projects.len());
                for project in projects {
                    println!("  {} | {}", project.name, project.path);
                }
            }
        }
        Commands::Status { json } => {
            let mut monitor = Monitor::new();
            let stats = monitor.system_stats();

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("系统遥测:");
                println!("  Web 层内存: {} MB", stats.php_web_memory_mb);
                println!("  CLI 层内存: {} MB", stats.php_cli_memory_mb);
                println!("  FPM CPU: {:.1}%", stats.php_fpm_cpu_percent);
                println!("  FPM Worker 数: {}", stats.php_fpm_worker_count);
            }
        }
        Commands::Enable { path } => {
            let injector = Injector::new();
            injector.enable_audit(Path::new(&path))?;
            println!("已开启插桩: {}", path);
        }
        Commands::Disable { path } => {
            let injector = Injector::new();
            injector.disable_audit(Path::new(&path))?;
            println!("已关闭插桩: {}", path);
        }
    }

    Ok(())
}
