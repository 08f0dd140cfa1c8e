//! 项目发现模块 - 扫描工作区中的 Laravel 项目

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// 被发现的项目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: String,
}

/// 在根目录下做一级扫描，artisan 文件标识 Laravel 项目
pub fn find_projects(root_dir: &Path, ignored_paths: &[String]) -> Result<Vec<Project>> {
    let ignored: HashSet<&str> = ignored_paths.iter().map(|s| s.as_str()).collect();

    let mut projects = Vec::new();
    for entry in fs::read_dir(root_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let full_path = entry.path();
        let path_str = full_path.to_string_lossy().to_string();
        if ignored.contains(path_str.as_str()) {
            continue;
        }

        if is_laravel_project(&full_path) {
            projects.push(Project {
                name: entry.file_name().to_string_lossy().to_string(),
                path: path_str,
            });
        }
    }

    Ok(projects)
}

fn is_laravel_project(path: &Path) -> bool {
    path.join("artisan").is_file()
}
