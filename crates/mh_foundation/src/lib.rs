// crates/mh_foundation/src/lib.rs

//! 粒子自适应引擎基础层 (Layer 1)
//!
//! 提供整个工作区共享的基础抽象，仅依赖 thiserror。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型 `MhError` 与参数检查
//! - [`float`]: 安全浮点工具、数值常量与 Kahan 求和
//!
//! # 示例
//!
//! ```
//! use mh_foundation::{MhError, MhResult, float::safe_div};
//!
//! fn ratio(a: f64, b: f64) -> MhResult<f64> {
//!     MhError::check_positive("b", b)?;
//!     Ok(safe_div(a, b, 0.0))
//! }
//!
//! assert_eq!(ratio(1.0, 2.0).unwrap(), 0.5);
//! assert!(ratio(1.0, -2.0).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod float;

// 重导出常用类型
pub use error::{MhError, MhResult};
pub use float::{KahanSum, TINY_REAL};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::error::{MhError, MhResult};
    pub use crate::float::{KahanSum, TINY_REAL, safe_div, safe_sqrt};
}
