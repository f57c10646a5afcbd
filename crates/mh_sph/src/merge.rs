// crates/mh_sph/src/merge.rs

//! 粒子合并引擎
//!
//! 三阶段约定：
//!
//! 1. `merge_criteria(i, &mut group)`：以 `i` 为种子在有限半径内寻找可合并的粒子组
//! 2. `computing_merge(group)`：只读计算合并结果描述
//! 3. `exec_merge(group, descriptor)`：写入承载粒子并软删除其余成员
//!
//! 扫描分三步：并行评估判据，按种子索引升序串行消解冲突
//! （每个粒子至多属于一个组，已预定分裂的粒子不参与合并），
//! 最后并行计算描述。找不到合并组不是错误，种子本轮保持不变。

use glam::DVec3;
use mh_foundation::KahanSum;
use mh_foundation::float::safe_div;
use rayon::prelude::*;

use crate::error::{RefinementError, RefinementResult};
use crate::lifetime::LifeStatus;
use crate::relation::{NeighborRelation, Neighborhood};
use crate::store::Population;

/// 合并策略接口
pub trait MergeDynamics: Send + Sync {
    /// 合并描述
    type Descriptor: Send + Sync;

    /// 以 `index` 为种子寻找合并组，组内第一个元素为种子
    ///
    /// 找不到合法组时返回 `false`。不得修改任何状态。
    fn merge_criteria(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        index: usize,
        group: &mut Vec<usize>,
    ) -> bool;

    /// 计算合并描述，不得修改存储
    fn computing_merge(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        group: &[usize],
    ) -> Self::Descriptor;

    /// 应用合并描述
    fn exec_merge(
        &self,
        population: &mut Population,
        group: &[usize],
        descriptor: &Self::Descriptor,
    ) -> RefinementResult<()>;

    /// 描述对应的密度误差目标值（用于诊断）
    fn descriptor_objective(&self, _descriptor: &Self::Descriptor) -> Option<f64> {
        None
    }
}

/// 一次已决定的合并
#[derive(Debug, Clone)]
pub struct MergePlan<D> {
    /// 合并组，第一个元素为种子
    pub group: Vec<usize>,
    /// 合并描述
    pub descriptor: D,
}

/// 合并提交结果
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MergeOutcome {
    /// 合并组数
    pub groups: usize,
    /// 失效粒子数
    pub invalidated: usize,
    /// 最大密度误差目标值
    pub max_objective: Option<f64>,
}

/// 合并引擎
#[derive(Debug)]
pub struct MergeEngine<M: MergeDynamics> {
    dynamics: M,
    min_parallel_size: usize,
}

impl<M: MergeDynamics> MergeEngine<M> {
    /// 创建引擎
    pub fn new(dynamics: M, min_parallel_size: usize) -> Self {
        Self {
            dynamics,
            min_parallel_size,
        }
    }

    /// 合并策略
    pub fn dynamics(&self) -> &M {
        &self.dynamics
    }

    /// 扫描并决定合并组，不修改存储
    ///
    /// `reserved[i]` 为真的粒子（本轮将分裂）不参与任何合并组。
    pub fn scan(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        reserved: &[bool],
    ) -> Vec<MergePlan<M::Descriptor>> {
        let n = population.len();
        let is_reserved = |i: usize| reserved.get(i).copied().unwrap_or(false);

        let criteria = |i: usize| -> Option<Vec<usize>> {
            if !population.is_live(i) || is_reserved(i) {
                return None;
            }
            let mut group = Vec::new();
            self.dynamics
                .merge_criteria(population, neighborhood, i, &mut group)
                .then_some(group)
        };
        let proposals: Vec<Vec<usize>> = if n >= self.min_parallel_size {
            (0..n).into_par_iter().filter_map(criteria).collect()
        } else {
            (0..n).filter_map(criteria).collect()
        };

        // 按种子升序消解冲突
        let mut claimed = vec![false; n];
        let accepted: Vec<Vec<usize>> = proposals
            .into_iter()
            .filter(|group| {
                let free = group.len() >= 2
                    && group
                        .iter()
                        .all(|&j| j < n && !claimed[j] && !is_reserved(j) && population.is_live(j));
                if free {
                    for &j in group {
                        claimed[j] = true;
                    }
                }
                free
            })
            .collect();

        let compute = |group: Vec<usize>| MergePlan {
            descriptor: self.dynamics.computing_merge(population, neighborhood, &group),
            group,
        };
        let plans: Vec<MergePlan<M::Descriptor>> = if accepted.len() >= self.min_parallel_size {
            accepted.into_par_iter().map(compute).collect()
        } else {
            accepted.into_iter().map(compute).collect()
        };

        log::debug!("合并扫描: {} 个粒子, {} 个合并组", n, plans.len());
        plans
    }

    /// 提交合并计划
    pub fn commit(
        &self,
        population: &mut Population,
        plans: &[MergePlan<M::Descriptor>],
    ) -> RefinementResult<MergeOutcome> {
        let mut outcome = MergeOutcome::default();
        for plan in plans {
            if let Some(&dead) = plan.group.iter().find(|&&j| !population.is_live(j)) {
                return Err(RefinementError::InvalidatedParticle { index: dead });
            }
            let live_before = population.live_count();
            self.dynamics
                .exec_merge(population, &plan.group, &plan.descriptor)?;
            outcome.groups += 1;
            outcome.invalidated += live_before - population.live_count();
            if let Some(obj) = self.dynamics.descriptor_objective(&plan.descriptor) {
                outcome.max_objective = Some(outcome.max_objective.map_or(obj, |m| m.max(obj)));
            }
            log::trace!("合并组 {:?}", plan.group);
        }
        Ok(outcome)
    }
}

// ============================================================
// 公共工具
// ============================================================

/// 在种子周围寻找合并组
///
/// 只取与种子距离在 `[min_distance, search_radius]` 内、通过 `accept` 的有效邻居，
/// 按距离由近到远，每组至多 `max_group_size` 个粒子（含种子）。
/// 没有合格邻居时只返回种子本身。
pub fn find_merge_particles<F>(
    population: &Population,
    relation: &dyn NeighborRelation,
    seed: usize,
    min_distance: f64,
    search_radius: f64,
    max_group_size: usize,
    accept: F,
) -> Vec<usize>
where
    F: Fn(usize) -> bool,
{
    let mut near: Vec<(f64, usize)> = population
        .live_neighbors(relation, seed)
        .filter(|nb| nb.distance >= min_distance && nb.distance <= search_radius)
        .filter(|nb| accept(nb.index))
        .map(|nb| (nb.distance, nb.index))
        .collect();
    near.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut group = Vec::with_capacity(max_group_size);
    group.push(seed);
    group.extend(
        near.into_iter()
            .map(|(_, j)| j)
            .take(max_group_size.saturating_sub(1)),
    );
    group
}

/// 质量加权混合后的粒子状态
#[derive(Debug, Clone, PartialEq)]
pub struct BlendedParticle {
    /// 质心
    pub position: DVec3,
    /// 质心速度
    pub velocity: DVec3,
    /// 总质量
    pub mass: f64,
    /// 总体积
    pub volume: f64,
    /// 平均分辨率比
    pub mean_ratio: f64,
    /// 附加标量字段
    pub scalars: Vec<f64>,
    /// 附加向量字段
    pub vectors: Vec<DVec3>,
}

impl BlendedParticle {
    /// 合并后密度
    pub fn density(&self) -> f64 {
        safe_div(self.mass, self.volume, 0.0)
    }
}

/// 对合并组做质量加权混合
pub fn blend_group(population: &Population, group: &[usize]) -> BlendedParticle {
    let store = population.store();
    let tracker = population.tracker();
    let mass: KahanSum = group.iter().map(|&j| store.mass(j)).sum();
    let volume: KahanSum = group.iter().map(|&j| store.volume(j)).sum();
    let ratio: KahanSum = group.iter().map(|&j| tracker.resolution_ratio(j)).sum();
    let mass = mass.value();
    let inv_mass = safe_div(1.0, mass, 0.0);

    let position = group
        .iter()
        .map(|&j| store.mass(j) * store.position(j))
        .sum::<DVec3>()
        * inv_mass;
    let velocity = group
        .iter()
        .map(|&j| store.mass(j) * store.velocity(j))
        .sum::<DVec3>()
        * inv_mass;

    let scalars = (0..store.n_scalar_fields())
        .map(|k| {
            let s: KahanSum = group
                .iter()
                .map(|&j| store.mass(j) * store.extra_scalar(k, j))
                .sum();
            s.value() * inv_mass
        })
        .collect();
    let vectors = (0..store.n_vector_fields())
        .map(|k| {
            group
                .iter()
                .map(|&j| store.mass(j) * store.extra_vector(k, j))
                .sum::<DVec3>()
                * inv_mass
        })
        .collect();

    BlendedParticle {
        position,
        velocity,
        mass,
        volume: volume.value(),
        mean_ratio: ratio.value() / group.len() as f64,
        scalars,
        vectors,
    }
}

/// 承载粒子的最终状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurvivorState {
    /// 位置
    pub position: DVec3,
    /// 速度
    pub velocity: DVec3,
    /// 质量
    pub mass: f64,
    /// 体积
    pub volume: f64,
    /// 分辨率比
    pub resolution_ratio: f64,
}

/// 写入承载粒子并标记 `MergeSource`，附加字段取混合值
pub fn write_survivor(
    population: &mut Population,
    index: usize,
    blend: &BlendedParticle,
    state: &SurvivorState,
) -> RefinementResult<()> {
    let (store, tracker) = population.split_mut();
    store.set_position(index, state.position);
    store.set_velocity(index, state.velocity);
    store.set_mass(index, state.mass);
    store.set_volume(index, state.volume);
    store.set_density(index, safe_div(state.mass, state.volume, store.density(index)));
    for (k, &v) in blend.scalars.iter().enumerate() {
        store.set_extra_scalar(k, index, v);
    }
    for (k, &v) in blend.vectors.iter().enumerate() {
        store.set_extra_vector(k, index, v);
    }
    tracker.set_resolution_ratio(index, state.resolution_ratio)?;
    tracker.set_status(index, LifeStatus::MergeSource)?;
    Ok(())
}

/// 软删除合并掉的成员
pub fn invalidate_members(population: &mut Population, members: &[usize]) -> RefinementResult<()> {
    for &j in members {
        population.invalidate(j)?;
    }
    Ok(())
}
