//! 注入器模块 - 可逆地在目标 PHP 项目中开启/关闭探针

use regex::Regex;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// 探针文件名，写入目标项目的 public 目录
pub const INSPECTOR_FILENAME: &str = "sentinel_inspector.php";

/// 顶部粗粒度注入的标记行：幂等检查与卸载都以此逐字匹配
pub const INCLUDE_MARKER: &str = "include_once __DIR__.'/sentinel_inspector.php';";

/// 内嵌的探针脚本，每次 enable 无条件覆盖写入
const INSPECTOR_CONTENT: &str = include_str!("../assets/inspector.php");

/// 智能钩子模板：enable 生成、disable 严格按此还原
const HOOK_PREFIX: &str = "$__sentinel_app = ";
const HOOK_TAIL: &str =
    ";\nif (function_exists('sentinel_bind')) { sentinel_bind($__sentinel_app); }\n$__sentinel_app";

/// bootstrap 表达式内部的容错匹配（空白与引号风格均可）
const BOOTSTRAP_PATTERN: &str =
    r#"^require_once\s+__DIR__\s*\.\s*['"]/\.\./bootstrap/app\.php['"]$"#;

/// 注入操作的失败信号；两者都会中止操作且不留下半写状态
#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("入口文件不可读: {}", path.display())]
    EntryFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("写入失败: {}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 探针注入器
pub struct Injector {
    inspector_content: String,
    bootstrap_re: Regex,
}

impl Injector {
    pub fn new() -> Self {
        Self::with_content(INSPECTOR_CONTENT)
    }

    /// 使用自定义探针内容（测试用）
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            inspector_content: content.into(),
            bootstrap_re: Regex::new(BOOTSTRAP_PATTERN).unwrap(),
        }
    }

    /// 开启审计：写入探针 + 修改 index.php
    ///
    /// 1. 无条件覆盖写入探针脚本（内容始终为最新版本）
    /// 2. 标记行已存在则幂等返回
    /// 3. 粗粒度钩子：在起始 `<?php` 后插入 include
    /// 4. 智能钩子（尽力而为）：包裹 bootstrap 表达式，未命中只记日志
    pub fn enable_audit(&self, project_path: &Path) -> Result<(), InjectorError> {
        let public_dir = resolve_public_dir(project_path);

        let inspector_path = public_dir.join(INSPECTOR_FILENAME);
        info!(path = %inspector_path.display(), "写入探针脚本");
        fs::write(&inspector_path, &self.inspector_content).map_err(|e| {
            InjectorError::WriteFailed {
                path: inspector_path.clone(),
                source: e,
            }
        })?;

        let index_path = public_dir.join("index.php");
        let content =
            fs::read_to_string(&index_path).map_err(|e| InjectorError::EntryFileUnreadable {
                path: index_path.clone(),
                source: e,
            })?;

        if content.contains(INCLUDE_MARKER) {
            debug!(path = %index_path.display(), "标记已存在，跳过");
            return Ok(());
        }

        // 在内存缓冲上完成全部改写，最后一次性落盘
        let mut patched = content.replacen("<?php", &format!("<?php\n{}", INCLUDE_MARKER), 1);

        if let Some(span) = self.find_bootstrap_expression(&patched) {
            let original = patched[span.clone()].to_string();
            let wrapped = format!("{}{}{}", HOOK_PREFIX, original, HOOK_TAIL);
            patched.replace_range(span, &wrapped);
            info!("bootstrap 模式命中，应用智能钩子");
        } else {
            info!("未找到 bootstrap 模式，仅保留粗粒度钩子");
        }

        fs::write(&index_path, patched).map_err(|e| InjectorError::WriteFailed {
            path: index_path,
            source: e,
        })
    }

    /// 关闭审计：删除探针文件并还原 index.php
    ///
    /// 标记行按逐字匹配移除；智能钩子严格锚定 enable 生成的模板，
    /// 命中时逐字节还原原始表达式，未命中则不动。入口文件缺失视为成功。
    pub fn disable_audit(&self, project_path: &Path) -> Result<(), InjectorError> {
        let public_dir = resolve_public_dir(project_path);

        let _ = fs::remove_file(public_dir.join(INSPECTOR_FILENAME));

        let index_path = public_dir.join("index.php");
        let content = match fs::read_to_string(&index_path) {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };

        // 两种顺序都兼容：带前导换行与不带
        let mut restored = content.replace(&format!("\n{}", INCLUDE_MARKER), "");
        restored = restored.replace(INCLUDE_MARKER, "");

        if let Some((span, inner)) = find_smart_hook(&restored) {
            restored.replace_range(span, &inner);
            info!("智能钩子已还原");
        }

        fs::write(&index_path, restored).map_err(|e| InjectorError::WriteFailed {
            path: index_path,
            source: e,
        })
    }

    /// 在源码中定位 "(require_once …bootstrap/app.php…)" 表达式的字节区间
    ///
    /// 候选从每个 '(' 起做括号配平扫描，再对内部做容错匹配，
    /// 避免朴素子串搜索对嵌套调用的误判
    fn find_bootstrap_expression(&self, source: &str) -> Option<Range<usize>> {
        for (start, _) in source.match_indices('(') {
            // 跳过函数调用的实参括号：只接受作为独立表达式的括号
            if start > 0 {
                let prev = source.as_bytes()[start - 1];
                if prev.is_ascii_alphanumeric() || prev == b'_' {
                    continue;
                }
            }
            let Some(end) = matching_paren(source, start) else {
                continue;
            };
            let inner = source[start + 1..end].trim();
            if !inner.starts_with("require_once") {
                continue;
            }
            if self.bootstrap_re.is_match(inner) {
                return Some(start..end + 1);
            }
        }
        None
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

/// public 子目录存在则用之，否则项目根即公开目录
fn resolve_public_dir(project_path: &Path) -> PathBuf {
    let public = project_path.join("public");
    if public.is_dir() {
        public
    } else {
        project_path.to_path_buf()
    }
}

/// 从 open 处的 '(' 扫描到配对的 ')'，跳过字符串字面量内部
fn matching_paren(source: &str, open: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth: usize = 0;
    let mut quote: Option<u8> = None;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// 定位 enable 生成的智能钩子块，返回整块区间与被包裹的原始表达式
///
/// 只信任模板本身：前缀、配平括号表达式、逐字节尾部三段都必须命中
fn find_smart_hook(source: &str) -> Option<(Range<usize>, String)> {
    let start = source.find(HOOK_PREFIX)?;
    let expr_start = start + HOOK_PREFIX.len();

    if !source[expr_start..].starts_with('(') {
        return None;
    }
    let expr_end = matching_paren(source, expr_start)?;
    let inner = source[expr_start..=expr_end].to_string();

    let rest = &source[expr_end + 1..];
    if !rest.starts_with(HOOK_TAIL) {
        return None;
    }

    Some((start..expr_end + 1 + HOOK_TAIL.len(), inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Laravel 11 风格的入口文件
    const LARAVEL11_INDEX: &str = r#"<?php

use Illuminate\Http\Request;

define('LARAVEL_START', microtime(true));

require __DIR__.'/../vendor/autoload.php';

(require_once __DIR__.'/../bootstrap/app.php')
    ->handleRequest(Request::capture());
"#;

    fn project_with_index(index: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        fs::create_dir_all(&public).unwrap();
        fs::write(public.join("index.php"), index).unwrap();
        dir
    }

    fn test_injector() -> Injector {
        Injector::with_content("<?php // test probe\n")
    }

    fn read_index(dir: &tempfile::TempDir) -> String {
        fs::read_to_string(dir.path().join("public").join("index.php")).unwrap()
    }

    #[test]
    fn test_enable_writes_probe_and_include() {
        let dir = project_with_index(LARAVEL11_INDEX);
        let injector = test_injector();

        injector.enable_audit(dir.path()).unwrap();

        assert!(dir.path().join("public").join(INSPECTOR_FILENAME).exists());
        let index = read_index(&dir);
        assert_eq!(index.matches(INCLUDE_MARKER).count(), 1);
        assert!(index.contains("$__sentinel_app"));
        assert!(index.contains("sentinel_bind"));
        // 原始调用链保持不变
        assert!(index.contains("->handleRequest(Request::capture());"));
    }

    #[test]
    fn test_enable_is_idempotent_at_file_level() {
        let dir = project_with_index(LARAVEL11_INDEX);
        let injector = test_injector();

        injector.enable_audit(dir.path()).unwrap();
        injector.enable_audit(dir.path()).unwrap();

        let index = read_index(&dir);
        assert_eq!(index.matches(INCLUDE_MARKER).count(), 1);
        assert_eq!(index.matches("$__sentinel_app = ").count(), 1);
    }

    #[test]
    fn test_disable_restores_byte_identical() {
        let dir = project_with_index(LARAVEL11_INDEX);
        let injector = test_injector();

        injector.enable_audit(dir.path()).unwrap();
        injector.disable_audit(dir.path()).unwrap();

        assert_eq!(read_index(&dir), LARAVEL11_INDEX);
        assert!(!dir.path().join("public").join(INSPECTOR_FILENAME).exists());
    }

    #[test]
    fn test_enable_without_bootstrap_pattern_still_succeeds() {
        let index = "<?php\n\nrequire __DIR__.'/../vendor/autoload.php';\n\n$app = require_once __DIR__.'/../bootstrap/app.php';\n$app->run();\n";
        let dir = project_with_index(index);
        let injector = test_injector();

        // 无括号表达式模式：智能钩子未命中不是错误
        injector.enable_audit(dir.path()).unwrap();

        let patched = read_index(&dir);
        assert_eq!(patched.matches(INCLUDE_MARKER).count(), 1);
        assert!(!patched.contains("$__sentinel_app"));

        // 粗粒度钩子同样可卸载
        injector.disable_audit(dir.path()).unwrap();
        assert_eq!(read_index(&dir), index);
    }

    #[test]
    fn test_double_quote_bootstrap_is_matched() {
        let index = "<?php\n(require_once __DIR__ . \"/../bootstrap/app.php\")\n    ->handleRequest(Request::capture());\n";
        let dir = project_with_index(index);
        let injector = test_injector();

        injector.enable_audit(dir.path()).unwrap();
        assert!(read_index(&dir).contains("$__sentinel_app"));

        injector.disable_audit(dir.path()).unwrap();
        assert_eq!(read_index(&dir), index);
    }

    #[test]
    fn test_nested_parens_are_not_mismatched() {
        // 嵌套调用中的 require_once 不满足模式，不应被截断包裹
        let index = "<?php\n$value = (realpath(require_once __DIR__.'/../bootstrap/app.php'));\n";
        let dir = project_with_index(index);
        let injector = test_injector();

        injector.enable_audit(dir.path()).unwrap();
        assert!(!read_index(&dir).contains("$__sentinel_app"));
    }

    #[test]
    fn test_missing_entry_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let injector = test_injector();

        let err = injector.enable_audit(dir.path()).unwrap_err();
        assert!(matches!(err, InjectorError::EntryFileUnreadable { .. }));
    }

    #[test]
    fn test_project_without_public_dir_uses_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.php"), LARAVEL11_INDEX).unwrap();
        let injector = test_injector();

        injector.enable_audit(dir.path()).unwrap();

        assert!(dir.path().join(INSPECTOR_FILENAME).exists());
        let index = fs::read_to_string(dir.path().join("index.php")).unwrap();
        assert_eq!(index.matches(INCLUDE_MARKER).count(), 1);
    }

    #[test]
    fn test_disable_is_noop_without_entry_file() {
        let dir = tempfile::tempdir().unwrap();
        let injector = test_injector();
        injector.disable_audit(dir.path()).unwrap();
    }

    #[test]
    fn test_matching_paren_skips_string_literals() {
        let src = "(require_once __DIR__.'/a) tricky'.'/../bootstrap/app.php')";
        assert_eq!(matching_paren(src, 0), Some(src.len() - 1));
    }
}
