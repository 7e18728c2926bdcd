//! 迁移流程的错误分类。
//!
//! 分类约定：
//! - `InputAbsent` / `ParseFailure`：可恢复，记录 WARN，组件返回空结果，由调用方决定是否继续
//! - `NotFound`：可恢复，向操作员明确提示，仅中止当前应用的迁移尝试
//! - `ExternalService`：可恢复（会话级），记录 ERROR，清理本次尝试的临时产物
//! - `ConfigurationMissing`：仅在进程启动时出现，直接退出
//!
//! 说明：
//! - “不可迁移”的分类结论不是错误，而是策略判定（见 [`crate::classify`]）
//!
//! 作者：应用迁移工具项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use thiserror::Error;

/// 迁移尝试级别的错误。
#[derive(Debug, Error)]
pub enum MigrationError {
    /// 输入缺失（空描述、无部署类型、无内容位置等）。
    #[error("输入缺失: {0}")]
    InputAbsent(String),
    /// 描述 XML 解析失败。
    #[error("解析失败: {0}")]
    ParseFailure(String),
    /// 未找到安装文件或旧系统中无匹配应用。
    #[error("未找到: {0}")]
    NotFound(String),
    /// 外部服务失败（认证、上传、打包）。
    #[error("外部服务失败: {0}")]
    ExternalService(String),
    /// 缺少必需配置项。
    #[error("缺少必需配置: {}", .0.join(", "))]
    ConfigurationMissing(Vec<&'static str>),
}

impl MigrationError {
    /// 是否仅影响当前迁移尝试（会话可以继续）。
    pub fn is_attempt_scoped(&self) -> bool {
        !matches!(self, MigrationError::ConfigurationMissing(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_missing_lists_keys() {
        let e = MigrationError::ConfigurationMissing(vec!["tenant_id", "client_secret"]);
        assert_eq!(e.to_string(), "缺少必需配置: tenant_id, client_secret");
        assert!(!e.is_attempt_scoped());
        assert!(MigrationError::NotFound("x".into()).is_attempt_scoped());
    }
}
