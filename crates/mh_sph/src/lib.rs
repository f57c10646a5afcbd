// crates/mh_sph/src/lib.rs

//! 无网格粒子离散的自适应分辨率引擎 (Layer 3)
//!
//! 在运行中的粒子模拟里动态分裂（加密）或合并（粗化）粒子，
//! 守恒质量、动量以及可能时的角动量，并尽量减小局部密度误差。
//!
//! # 模块概览
//!
//! - [`store`]: 粒子字段存储、壁面粒子与粒子群句柄
//! - [`lifetime`]: 分辨率比与生命周期标记的追踪器
//! - [`relation`]: 邻居关系（流体内部、流体-壁面）
//! - [`kernel`]: 插值核函数
//! - [`geometry`]: 区域形状谓词
//! - [`density_error`]: 密度误差估计
//! - [`split`]: 分裂引擎
//! - [`merge`]: 合并引擎
//! - [`policies`]: 具体的加密/粗化策略
//! - [`pass`]: 加密/粗化轮次驱动
//!
//! # 示例
//!
//! ```
//! use glam::DVec3;
//! use mh_config::RefinementConfig;
//! use mh_sph::prelude::*;
//!
//! let mut config = RefinementConfig::default();
//! config.resolution.reference_spacing = 0.1;
//! config.split.seed = Some(42);
//! config.split.buffer_width = 8;
//!
//! let region = BoundingBox::new(DVec3::splat(-1.0), DVec3::splat(1.0));
//! let split = RefinementInPrescribedRegion::new(region, Everywhere, &config.split);
//! let merge = ParticleMergeWithPrescribedArea::new(Sphere::new(DVec3::splat(10.0), 0.1), &config.merge);
//! let mut refinement = AdaptiveRefinement::new(split, merge, &config).unwrap();
//!
//! let mut population = Population::new(ResolutionParams::from_config(&config.resolution));
//! population
//!     .add_particle(ParticleInit::at_rest(DVec3::ZERO, 1e-3, 2000.0))
//!     .unwrap();
//! refinement.prepare(&mut population);
//!
//! let relation = InnerRelation::build(&population, &WendlandC2);
//! let stats = refinement
//!     .run_refinement_pass(&mut population, &Neighborhood::inner(&relation))
//!     .unwrap();
//! assert_eq!(stats.splits, 1);
//! assert_eq!(population.live_count(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod density_error;
pub mod error;
pub mod geometry;
pub mod kernel;
pub mod lifetime;
pub mod merge;
pub mod pass;
pub mod policies;
pub mod relation;
pub mod split;
pub mod store;

pub use error::{RefinementError, RefinementResult};
pub use lifetime::{LifeCycleTracker, LifeStatus, ResolutionParams};
pub use pass::{AdaptiveRefinement, PassState, PassStats};
pub use store::{ParticleInit, ParticleStore, Population, WallParticles};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::density_error::{
        Candidate, DensityErrorEstimator, DensityErrorInner, DensityErrorReport,
        DensityErrorWithWall,
    };
    pub use crate::error::{RefinementError, RefinementResult};
    pub use crate::geometry::{BoundingBox, Everywhere, Shape, Sphere};
    pub use crate::kernel::{Kernel, WendlandC2};
    pub use crate::lifetime::{LifeCycleTracker, LifeStatus, ResolutionParams};
    pub use crate::merge::{MergeDynamics, MergeEngine};
    pub use crate::pass::{AdaptiveRefinement, PassState, PassStats};
    pub use crate::policies::{
        MergeWithMinimumDensityErrorInner, MergeWithMinimumDensityErrorWithWall,
        ParticleMergeWithPrescribedArea, RefinementInPrescribedRegion,
    };
    pub use crate::relation::{
        ContactRelation, InnerRelation, Neighbor, NeighborRelation, Neighborhood,
    };
    pub use crate::split::{SplitDynamics, SplitEngine};
    pub use crate::store::{ParticleInit, Population, WallParticles};
}
