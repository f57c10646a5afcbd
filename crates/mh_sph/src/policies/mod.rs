// crates/mh_sph/src/policies/mod.rs

//! 加密/粗化策略
//!
//! 将通用的分裂/合并引擎与具体判据组合：
//!
//! - [`RefinementInPrescribedRegion`]: 指定区域内随机方向二分裂
//! - [`ParticleMergeWithPrescribedArea`]: 指定区域内合并到质心
//! - [`MergeWithMinimumDensityError`]: 最小密度误差合并（内部/含壁面）

mod min_density_error;
mod prescribed_area;
mod refinement_region;

pub use min_density_error::{
    MergeWithMinimumDensityError, MergeWithMinimumDensityErrorInner,
    MergeWithMinimumDensityErrorWithWall,
};
pub use prescribed_area::ParticleMergeWithPrescribedArea;
pub use refinement_region::RefinementInPrescribedRegion;

use crate::error::RefinementResult;
use crate::merge::{BlendedParticle, SurvivorState, invalidate_members, write_survivor};
use crate::store::Population;

/// 合并策略共用的描述
///
/// 组内前 `survivors.len()` 个粒子依次承载结果，其余成员失效。
#[derive(Debug, Clone, PartialEq)]
pub struct MergeDescriptor {
    /// 混合值
    pub blend: BlendedParticle,
    /// 承载粒子的最终状态
    pub survivors: Vec<SurvivorState>,
    /// 密度误差目标值
    pub objective: Option<f64>,
}

impl MergeDescriptor {
    pub(crate) fn apply(&self, population: &mut Population, group: &[usize]) -> RefinementResult<()> {
        for (state, &idx) in self.survivors.iter().zip(group) {
            write_survivor(population, idx, &self.blend, state)?;
        }
        invalidate_members(population, &group[self.survivors.len().min(group.len())..])
    }
}
