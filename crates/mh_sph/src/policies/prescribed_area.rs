// crates/mh_sph/src/policies/prescribed_area.rs

//! 指定区域内的粒子合并（合并到质心）

use mh_config::MergeConfig;

use super::MergeDescriptor;
use crate::error::RefinementResult;
use crate::geometry::{BoundingBox, Shape};
use crate::merge::{MergeDynamics, SurvivorState, blend_group, find_merge_particles};
use crate::relation::Neighborhood;
use crate::store::Population;

/// 区域内 N 合 1，承载粒子放在质心
///
/// 合并组取种子及其最近的有效邻居（同样位于区域内），
/// 组大小从 `max_group_size` 向下收缩，直到合并后的分辨率比不低于最小值。
#[derive(Debug, Clone)]
pub struct ParticleMergeWithPrescribedArea<R: Shape = BoundingBox> {
    region: R,
    search_radius_factor: f64,
    min_search_distance_factor: f64,
    max_group_size: usize,
}

impl<R: Shape> ParticleMergeWithPrescribedArea<R> {
    /// 创建策略
    pub fn new(region: R, config: &MergeConfig) -> Self {
        Self {
            region,
            search_radius_factor: config.search_radius_factor,
            min_search_distance_factor: config.min_search_distance_factor,
            max_group_size: config.max_group_size,
        }
    }
}

/// 收缩到合并后分辨率比合法的最大组
pub(crate) fn shrink_to_allowable(population: &Population, group: &mut Vec<usize>, survivors: usize) {
    let tracker = population.tracker();
    while group.len() > survivors {
        let n = group.len();
        let mean = group.iter().map(|&j| tracker.resolution_ratio(j)).sum::<f64>() / n as f64;
        if tracker.is_merge_allowable(tracker.ratio_after_merge(mean, n, survivors)) {
            return;
        }
        group.pop();
    }
}

impl<R: Shape> MergeDynamics for ParticleMergeWithPrescribedArea<R> {
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
            self.min_search_distance_factor * spacing,
            self.search_radius_factor * spacing,
            self.max_group_size,
            |j| self.region.contains(store.position(j)),
        );
        shrink_to_allowable(population, group, 1);
        group.len() >= 2
    }

    fn computing_merge(
        &self,
        population: &Population,
        _neighborhood: &Neighborhood<'_>,
        group: &[usize],
    ) -> MergeDescriptor {
        let blend = blend_group(population, group);
        let ratio = population
            .tracker()
            .ratio_after_merge(blend.mean_ratio, group.len(), 1);
        let survivor = SurvivorState {
            position: blend.position,
            velocity: blend.velocity,
            mass: blend.mass,
            volume: blend.volume,
            resolution_ratio: ratio,
        };
        MergeDescriptor {
            blend,
            survivors: vec![survivor],
            objective: None,
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
}
