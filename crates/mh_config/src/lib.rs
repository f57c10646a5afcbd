// crates/mh_config/src/lib.rs

//! 粒子自适应引擎配置层 (Layer 4)
//!
//! 提供分裂/合并引擎的全部可调参数，使用纯 f64/usize 存储以便 JSON 序列化。
//!
//! # 模块概览
//!
//! - [`refinement_config`]: RefinementConfig 及各子配置
//! - [`error`]: 配置错误类型
//!
//! # 层级架构
//!
//! ```text
//! Layer 4: mh_config     ─> RefinementConfig (本层)
//! Layer 3: mh_sph        ─> AdaptiveRefinement::new(split, merge, &config)
//! Layer 1: mh_foundation
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod refinement_config;

/// 层级标识
pub const LAYER: u8 = 4;

// 重导出核心类型
pub use error::ConfigError;
pub use refinement_config::{
    DensityErrorConfig, MergeConfig, ParallelConfig, RefinementConfig, ResolutionConfig,
    ScheduleConfig, SplitConfig,
};
