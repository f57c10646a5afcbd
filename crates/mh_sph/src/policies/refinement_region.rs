// crates/mh_sph/src/policies/refinement_region.rs

//! 指定区域内的粒子加密

use glam::DVec3;
use mh_config::SplitConfig;
use mh_foundation::TINY_REAL;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::density_error::position_limitation;
use crate::error::RefinementResult;
use crate::geometry::{BoundingBox, Shape};
use crate::split::SplitDynamics;
use crate::store::Population;

/// 分辨率比比较容差
const TARGET_EPS: f64 = 1e-12;

/// 在指定区域内把粒子二分裂到目标分辨率比
///
/// 判据：粒子有效、位于外部包围盒与区域形状内、分辨率比低于目标值，
/// 且分裂后不超过最大分辨率比。
///
/// 位移各分量取零均值正态分布，标准差 `shift_sigma × spacing`，
/// 长度限制在 `[min_distance_factor, max_distance_factor] × spacing`。
/// 母粒子移动 `+shift`，子粒子放在 `-shift`。
pub struct RefinementInPrescribedRegion<R: Shape = BoundingBox> {
    bounds: BoundingBox,
    shape: R,
    target_ratio: f64,
    shift_sigma: f64,
    min_distance_factor: f64,
    max_distance_factor: f64,
    rng: Mutex<StdRng>,
}

impl<R: Shape> RefinementInPrescribedRegion<R> {
    /// 创建策略，`seed` 为空时从操作系统取种子
    pub fn new(bounds: BoundingBox, shape: R, config: &SplitConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            bounds,
            shape,
            target_ratio: config.target_ratio,
            shift_sigma: config.shift_sigma,
            min_distance_factor: config.min_distance_factor,
            max_distance_factor: config.max_distance_factor,
            rng: Mutex::new(rng),
        }
    }

    /// 目标分辨率比
    pub fn target_ratio(&self) -> f64 {
        self.target_ratio
    }

    /// 位移长度范围 `[min, max]`
    pub fn shift_bounds(&self, spacing: f64) -> (f64, f64) {
        (
            self.min_distance_factor * spacing,
            self.max_distance_factor * spacing,
        )
    }

    fn sample_shift(&self, spacing: f64) -> DVec3 {
        let sigma = self.shift_sigma * spacing;
        let raw = {
            let mut rng = self.rng.lock();
            let x: f64 = rng.sample(StandardNormal);
            let y: f64 = rng.sample(StandardNormal);
            let z: f64 = rng.sample(StandardNormal);
            DVec3::new(x, y, z) * sigma
        };
        let (min, max) = self.shift_bounds(spacing);
        if raw.length() < TINY_REAL {
            // 退化方向
            return DVec3::X * 0.5 * (min + max);
        }
        position_limitation(raw, min, max)
    }
}

impl<R: Shape> SplitDynamics for RefinementInPrescribedRegion<R> {
    type Descriptor = DVec3;

    fn check_split(&self, population: &Population, index: usize) -> bool {
        if !population.is_live(index) {
            return false;
        }
        let x = population.store().position(index);
        let tracker = population.tracker();
        let ratio = tracker.resolution_ratio(index);
        self.bounds.contains(x)
            && self.shape.contains(x)
            && ratio < self.target_ratio * (1.0 - TARGET_EPS)
            && tracker.is_split_allowable(ratio)
    }

    fn exec_first_split(&self, population: &Population, index: usize) -> DVec3 {
        self.sample_shift(population.tracker().spacing_of(index))
    }

    fn exec_other_split(
        &self,
        population: &mut Population,
        parent: usize,
        offspring: &[usize],
        shift: &DVec3,
    ) -> RefinementResult<()> {
        let store = population.store_mut();
        let x = store.position(parent);
        store.set_position(parent, x + *shift);
        for &c in offspring {
            store.set_position(c, x - *shift);
        }
        Ok(())
    }
}

impl<R: Shape + std::fmt::Debug> std::fmt::Debug for RefinementInPrescribedRegion<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementInPrescribedRegion")
            .field("bounds", &self.bounds)
            .field("shape", &self.shape)
            .field("target_ratio", &self.target_ratio)
            .finish_non_exhaustive()
    }
}
