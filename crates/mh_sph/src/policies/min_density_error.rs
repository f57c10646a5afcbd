// crates/mh_sph/src/policies/min_density_error.rs

//! 最小密度误差合并
//!
//! # 二合一
//!
//! 承载粒子从质心出发，由密度误差估计器在 `[0, max_distance]` 内搜索位置，
//! 速度取质心速度。单个粒子无法携带相对质心的角动量与动能，二合一只守恒质量与动量。
//!
//! # 三合二
//!
//! 两个承载粒子放在 `c ± d·n`，各承担一半质量：
//!
//! ```text
//! d   = clamp(sqrt(I / M), min_distance, max_distance),  I = Σ m_i |x_i - c|²
//! n   ⊥ L，在垂直于角动量 L 的平面内取 rotation_samples 个方向，目标函数最小者胜出
//! v   = v_c ± u,  u = (L × n) / (M d) + s · u_∥ · n
//! u_∥ = sqrt(max(0, 2 KE_rel / M - |u_⊥|²))
//! ```
//!
//! 角动量（相对质心）精确守恒；当 `2 KE_rel / M ≥ |u_⊥|²` 时相对动能也守恒，
//! 否则动能略有耗散。`s` 取组内径向速度相关的符号（膨胀为正）。

use glam::DVec3;
use mh_config::MergeConfig;
use mh_foundation::TINY_REAL;
use mh_foundation::float::{safe_div, safe_sqrt};
use std::f64::consts::PI;

use super::MergeDescriptor;
use super::prescribed_area::shrink_to_allowable;
use crate::density_error::{
    Candidate, DensityErrorEstimator, DensityErrorInner, DensityErrorWithWall,
};
use crate::error::RefinementResult;
use crate::geometry::{BoundingBox, Shape};
use crate::merge::{
    BlendedParticle, MergeDynamics, SurvivorState, blend_group, find_merge_particles,
};
use crate::relation::Neighborhood;
use crate::store::Population;

/// 最小密度误差合并策略
#[derive(Debug, Clone)]
pub struct MergeWithMinimumDensityError<E: DensityErrorEstimator, R: Shape = BoundingBox> {
    estimator: E,
    region: R,
    config: MergeConfig,
}

/// 流体内部的最小密度误差合并
pub type MergeWithMinimumDensityErrorInner<R = BoundingBox> =
    MergeWithMinimumDensityError<DensityErrorInner, R>;

/// 含壁面贡献的最小密度误差合并
pub type MergeWithMinimumDensityErrorWithWall<R = BoundingBox> =
    MergeWithMinimumDensityError<DensityErrorWithWall, R>;

/// 组相对质心的运动学量
#[derive(Debug, Clone, Copy)]
struct GroupMotion {
    angular_momentum: DVec3,
    kinetic_energy: f64,
    inertia: f64,
    radial: f64,
    farthest: DVec3,
}

impl GroupMotion {
    fn of(population: &Population, group: &[usize], blend: &BlendedParticle) -> Self {
        let store = population.store();
        let mut angular_momentum = DVec3::ZERO;
        let mut kinetic_energy = 0.0;
        let mut inertia = 0.0;
        let mut radial = 0.0;
        for &j in group {
            let m = store.mass(j);
            let r = store.position(j) - blend.position;
            let u = store.velocity(j) - blend.velocity;
            angular_momentum += m * r.cross(u);
            kinetic_energy += 0.5 * m * u.length_squared();
            inertia += m * r.length_squared();
            radial += m * r.dot(u);
        }

        let mut farthest = DVec3::ZERO;
        let mut best = -1.0;
        for (a, &i) in group.iter().enumerate() {
            for &j in &group[a + 1..] {
                let d = store.position(j) - store.position(i);
                if d.length_squared() > best {
                    best = d.length_squared();
                    farthest = d;
                }
            }
        }

        Self {
            angular_momentum,
            kinetic_energy,
            inertia,
            radial,
            farthest,
        }
    }

    /// 旋转方向所在平面的一组正交基
    fn rotation_plane(&self) -> (DVec3, DVec3) {
        let l = self.angular_momentum;
        if l.length() > TINY_REAL {
            return l.normalize().any_orthonormal_pair();
        }
        let e1 = self.farthest.try_normalize().unwrap_or(DVec3::X);
        (e1, e1.any_orthonormal_vector())
    }
}

impl<E: DensityErrorEstimator, R: Shape> MergeWithMinimumDensityError<E, R> {
    /// 创建策略，`max_group_size` 取值 2 或 3
    pub fn new(estimator: E, region: R, config: &MergeConfig) -> Self {
        Self {
            estimator,
            region,
            config: config.clone(),
        }
    }

    /// 密度误差估计器
    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    fn distance_bounds(&self, merged_spacing: f64) -> (f64, f64) {
        (
            self.config.min_distance_factor * merged_spacing,
            self.config.max_distance_factor * merged_spacing,
        )
    }

    fn merge_two_into_one(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        group: &[usize],
        blend: BlendedParticle,
    ) -> MergeDescriptor {
        let tracker = population.tracker();
        let ratio = tracker.ratio_after_merge(blend.mean_ratio, group.len(), 1);
        let (_, max_distance) = self.distance_bounds(tracker.spacing(ratio));

        let mut candidate = [Candidate::new(blend.position, blend.mass, ratio, blend.position)];
        let report = self.estimator.search_positions(
            population,
            neighborhood,
            group,
            &mut candidate,
            0.0,
            max_distance,
        );

        let survivor = SurvivorState {
            position: candidate[0].position,
            velocity: blend.velocity,
            mass: blend.mass,
            volume: blend.volume,
            resolution_ratio: ratio,
        };
        MergeDescriptor {
            blend,
            survivors: vec![survivor],
            objective: Some(report.objective),
        }
    }

    fn merge_three_into_two(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        group: &[usize],
        blend: BlendedParticle,
    ) -> MergeDescriptor {
        let tracker = population.tracker();
        let ratio = tracker.ratio_after_merge(blend.mean_ratio, group.len(), 2);
        let (min_distance, max_distance) = self.distance_bounds(tracker.spacing(ratio));
        let motion = GroupMotion::of(population, group, &blend);

        let total = blend.mass;
        let half_mass = 0.5 * total;
        let d = safe_sqrt(safe_div(motion.inertia, total, 0.0))
            .max(min_distance)
            .min(max_distance);
        let c = blend.position;

        let env = self.estimator.environment(population, neighborhood, group);
        let (e1, e2) = motion.rotation_plane();
        let samples = self.config.rotation_samples.max(1);

        let mut best_n = e1;
        let mut best_objective = f64::INFINITY;
        for k in 0..samples {
            let theta = PI * k as f64 / samples as f64;
            let n = theta.cos() * e1 + theta.sin() * e2;
            let candidates = [
                Candidate::new(c + d * n, half_mass, ratio, c),
                Candidate::new(c - d * n, half_mass, ratio, c),
            ];
            let report =
                env.evaluate(self.estimator.kernel(), self.estimator.config(), &candidates);
            if report.objective < best_objective {
                best_objective = report.objective;
                best_n = n;
            }
        }

        let n = best_n;
        let u_perp = safe_div(1.0, total * d, 0.0) * motion.angular_momentum.cross(n);
        let parallel2 = 2.0 * motion.kinetic_energy / total - u_perp.length_squared();
        let sign = if motion.radial < 0.0 { -1.0 } else { 1.0 };
        let u = u_perp + sign * safe_sqrt(parallel2.max(0.0)) * n;

        let half_volume = 0.5 * blend.volume;
        let survivors = vec![
            SurvivorState {
                position: c + d * n,
                velocity: blend.velocity + u,
                mass: half_mass,
                volume: half_volume,
                resolution_ratio: ratio,
            },
            SurvivorState {
                position: c - d * n,
                velocity: blend.velocity - u,
                mass: total - half_mass,
                volume: blend.volume - half_volume,
                resolution_ratio: ratio,
            },
        ];
        MergeDescriptor {
            blend,
            survivors,
            objective: Some(best_objective),
        }
    }
}

impl<E: DensityErrorEstimator, R: Shape> MergeDynamics for MergeWithMinimumDensityError<E, R> {
    type Descriptor = MergeDescriptor;

    fn merge_criteria(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        index: usize,
        group: &mut Vec<usize>,
    ) -> bool {
        let store = population.store();
        if !population.is_live(index) || !self.region.contains(store.position(index)) {
            return false;
        }
        let spacing = population.tracker().spacing_of(index);
        *group = find_merge_particles(
            population,
            neighborhood.inner,
            index,
            self.config.min_search_distance_factor * spacing,
            self.config.search_radius_factor * spacing,
            self.config.max_group_size.clamp(2, 3),
            |j| self.region.contains(store.position(j)),
        );
        let survivors = if group.len() == 3 { 2 } else { 1 };
        shrink_to_allowable(population, group, survivors);
        group.len() > survivors
    }

    fn computing_merge(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        group: &[usize],
    ) -> MergeDescriptor {
        let blend = blend_group(population, group);
        if group.len() == 3 {
            self.merge_three_into_two(population, neighborhood, group, blend)
        } else {
            self.merge_two_into_one(population, neighborhood, group, blend)
        }
    }

    fn exec_merge(
        &self,
        population: &mut Population,
        group: &[usize],
        descriptor: &MergeDescriptor,
    ) -> RefinementResult<()> {
        descriptor.apply(population, group)
    }

    fn descriptor_objective(&self, descriptor: &MergeDescriptor) -> Option<f64> {
        descriptor.objective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::WendlandC2;
    use crate::lifetime::ResolutionParams;
    use crate::relation::InnerRelation;
    use crate::store::ParticleInit;
    use mh_config::DensityErrorConfig;

    #[test]
    fn test_rotation_plane_perpendicular_to_l() {
        let motion = GroupMotion {
            angular_momentum: DVec3::new(0.0, 0.0, 2.0),
            kinetic_energy: 0.0,
            inertia: 0.0,
            radial: 0.0,
            farthest: DVec3::X,
        };
        let (e1, e2) = motion.rotation_plane();
        assert!(e1.dot(DVec3::Z).abs() < 1e-12);
        assert!(e2.dot(DVec3::Z).abs() < 1e-12);
        assert!(e1.dot(e2).abs() < 1e-12);

        let still = GroupMotion {
            angular_momentum: DVec3::ZERO,
            farthest: DVec3::new(0.0, 3.0, 0.0),
            ..motion
        };
        assert_eq!(still.rotation_plane().0, DVec3::Y);
    }

    #[test]
    fn test_three_into_two_conserves_angular_momentum() {
        let mut pop = Population::new(ResolutionParams::new(0.1, 1.3).with_ratio_bounds(1.0, 8.0));
        let dp = 0.05;
        let spots = [DVec3::ZERO, DVec3::new(dp, 0.0, 0.0), DVec3::new(0.5 * dp, dp, 0.0)];
        let vels = [
            DVec3::new(0.0, -1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(-1.0, 0.0, 0.5),
        ];
        for (x, v) in spots.iter().zip(&vels) {
            let init = ParticleInit::at_rest(*x, 1e-3, 1000.0).with_velocity(*v).with_ratio(2.0);
            pop.add_particle(init).unwrap();
        }
        let rel = InnerRelation::build(&pop, &WendlandC2);
        let hood = Neighborhood::inner(&rel);
        let estimator = DensityErrorInner::new(WendlandC2, DensityErrorConfig::default());
        let config = MergeConfig {
            search_radius_factor: 3.0,
            ..Default::default()
        };
        let region = BoundingBox::new(DVec3::splat(-1.0), DVec3::ONE);
        let policy = MergeWithMinimumDensityErrorInner::new(estimator, region, &config);

        let mut group = Vec::new();
        assert!(policy.merge_criteria(&pop, &hood, 0, &mut group));
        assert_eq!(group.len(), 3);
        let d = policy.computing_merge(&pop, &hood, &group);
        assert_eq!(d.survivors.len(), 2);

        let blend = &d.blend;
        let motion = GroupMotion::of(&pop, &group, blend);
        let mut l = DVec3::ZERO;
        for s in &d.survivors {
            l += s.mass * (s.position - blend.position).cross(s.velocity - blend.velocity);
        }
        assert!((l - motion.angular_momentum).length() < 1e-12);
        assert_eq!(d.survivors[0].mass + d.survivors[1].mass, blend.mass);
        assert!((d.survivors[0].resolution_ratio - 4.0 / 3.0).abs() < 1e-12);
    }
}
