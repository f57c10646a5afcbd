// crates/mh_sph/src/error.rs

//! 自适应引擎错误类型
//!
//! 错误分级：
//! - 容量不足：致命，终止本轮加密/粗化并上报调用方
//! - 访问失效粒子：调用方违反了软删除约定
//! - 找不到合并组、退化几何：不是错误，引擎内部跳过或降级处理

use mh_foundation::MhError;
use thiserror::Error;

/// 引擎结果类型
pub type RefinementResult<T> = Result<T, RefinementError>;

/// 自适应引擎错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RefinementError {
    /// 预留缓冲区不足以容纳新粒子
    #[error("粒子缓冲区容量不足: 已用 {used}, 需新增 {requested}, 上限 {capacity}")]
    CapacityExceeded {
        /// 当前已占用槽位数
        used: usize,
        /// 本次请求的槽位数
        requested: usize,
        /// 槽位上限
        capacity: usize,
    },

    /// 访问已失效（被合并掉）的粒子
    #[error("粒子 {index} 已失效")]
    InvalidatedParticle {
        /// 粒子索引
        index: usize,
    },

    /// 附加字段不存在
    #[error("粒子字段不存在: {name}")]
    UnknownField {
        /// 字段名
        name: String,
    },

    /// 附加字段重复注册
    #[error("粒子字段已存在: {name}")]
    DuplicateField {
        /// 字段名
        name: String,
    },

    /// 引擎配置未通过校验
    #[error("配置无效: {message}")]
    InvalidConfig {
        /// 校验失败说明
        message: String,
    },

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] MhError),
}

impl RefinementError {
    /// 是否为终止本轮的致命错误
    pub fn is_pass_fatal(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
