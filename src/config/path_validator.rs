// 路径验证模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// 路径验证结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathValidationResult {
    /// 路径是否完全可用
    pub valid: bool,
    /// 路径是否存在
    pub exists: bool,
    /// 路径是否可写
    pub is_writable: bool,
    /// 是否是目录
    pub is_directory: bool,
    /// 验证消息
    pub message: String,
}

impl PathValidationResult {
    fn success() -> Self {
        Self {
            valid: true,
            exists: true,
            is_writable: true,
            is_directory: true,
            message: "路径验证通过".to_string(),
        }
    }

    fn failure(exists: bool, is_directory: bool, message: &str) -> Self {
        Self {
            valid: false,
            exists,
            is_writable: false,
            is_directory,
            message: message.to_string(),
        }
    }
}

/// 路径验证器
pub struct PathValidator;

impl PathValidator {
    /// 验证路径是否可用于下载
    ///
    /// 依次检查：存在 → 是目录 → 可写
    pub fn validate(path: &Path) -> PathValidationResult {
        if !path.exists() {
            return PathValidationResult::failure(false, false, "路径不存在");
        }

        if !path.is_dir() {
            return PathValidationResult::failure(true, false, "路径不是目录");
        }

        if !Self::check_writable(path) {
            return PathValidationResult::failure(true, true, "路径不可写");
        }

        PathValidationResult::success()
    }

    /// 检查路径是否可写
    ///
    /// 通过创建探测文件的方式检测写入权限
    pub fn check_writable(path: &Path) -> bool {
        let probe = path.join(".bgdl_write_test");

        match fs::File::create(&probe) {
            Ok(_) => {
                let _ = fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }

    /// 自动创建目录（如果不存在）
    pub fn ensure_directory_exists(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path).with_context(|| format!("无法创建目录: {:?}", path))?;
            tracing::info!("自动创建下载目录: {:?}", path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_existing_directory() {
        let temp_dir = TempDir::new().unwrap();

        let result = PathValidator::validate(temp_dir.path());

        assert!(result.valid, "验证应该通过");
        assert!(result.exists);
        assert!(result.is_directory);
        assert!(result.is_writable);
        // 探测文件不能残留
        assert!(!temp_dir.path().join(".bgdl_write_test").exists());
    }

    #[test]
    fn test_validate_non_existing_path() {
        let result = PathValidator::validate(Path::new("/non/existing/path/bgdl-12345"));

        assert!(!result.valid);
        assert!(!result.exists);
        assert_eq!(result.message, "路径不存在");
    }

    #[test]
    fn test_validate_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("plain.txt");
        fs::write(&file_path, "test").unwrap();

        let result = PathValidator::validate(&file_path);

        assert!(!result.valid);
        assert!(result.exists);
        assert!(!result.is_directory);
        assert_eq!(result.message, "路径不是目录");
    }

    #[test]
    fn test_ensure_directory_exists() {
        let temp_dir = TempDir::new().unwrap();
        let new_dir = temp_dir.path().join("a/b/c");

        assert!(!new_dir.exists());
        PathValidator::ensure_directory_exists(&new_dir).unwrap();
        assert!(new_dir.is_dir());

        // 再次调用应该成功（目录已存在）
        PathValidator::ensure_directory_exists(&new_dir).unwrap();
    }
}
