// crates/mh_sph/src/split.rs

//! 粒子分裂引擎
//!
//! 三阶段约定：
//!
//! 1. `check_split(i)`：只读判断粒子是否需要分裂
//! 2. `exec_first_split(i)`：只读计算分裂描述（如位移向量）
//! 3. `exec_other_split(i, offspring, descriptor)`：提交阶段按描述放置母粒子与子粒子
//!
//! 扫描阶段并行执行 1、2，每个被接受的分裂通过 [`BufferAllocator`]
//! 在互斥区内预留缓冲槽位；任何一次预留失败都会在修改存储前终止本轮。
//! 提交阶段按槽位顺序追加子粒子，并统一执行守恒规则：
//!
//! - 质量、体积在母粒子与子粒子间均分（二分裂时精确折半）
//! - 密度不变
//! - 分辨率比乘以 [`SPLIT_RATIO_FACTOR`]
//! - 母粒子标记 `SplitSource`，子粒子标记 `NewlyCreated`

use parking_lot::Mutex;
use rayon::prelude::*;
use std::ops::Range;

use crate::error::{RefinementError, RefinementResult};
use crate::lifetime::{LifeStatus, SPLIT_RATIO_FACTOR};
use crate::store::Population;

/// 分裂策略接口
pub trait SplitDynamics: Send + Sync {
    /// 分裂描述
    type Descriptor: Send + Sync;

    /// 每次分裂新增的子粒子数
    fn offspring_count(&self) -> usize {
        1
    }

    /// 粒子是否需要分裂，不得修改任何状态
    fn check_split(&self, population: &Population, index: usize) -> bool;

    /// 计算分裂描述，不得修改存储
    fn exec_first_split(&self, population: &Population, index: usize) -> Self::Descriptor;

    /// 按描述放置母粒子与子粒子
    ///
    /// 调用时子粒子已是母粒子的完整副本；质量、体积、分辨率比与标记由引擎处理。
    fn exec_other_split(
        &self,
        population: &mut Population,
        parent: usize,
        offspring: &[usize],
        descriptor: &Self::Descriptor,
    ) -> RefinementResult<()>;
}

// ============================================================
// 槽位分配
// ============================================================

/// 缓冲槽位分配器
///
/// 在互斥区内线性化分配，并发分裂不会得到相同的槽位。
#[derive(Debug)]
pub struct BufferAllocator {
    next: Mutex<usize>,
    capacity: usize,
}

impl BufferAllocator {
    /// 从 `next` 开始分配，上限 `capacity`
    pub fn new(next: usize, capacity: usize) -> Self {
        Self {
            next: Mutex::new(next),
            capacity,
        }
    }

    /// 为粒子群的下一个空闲槽位创建分配器
    pub fn for_population(population: &Population) -> Self {
        Self::new(population.len(), population.store().capacity())
    }

    /// 预留 `n` 个连续槽位
    pub fn allocate(&self, n: usize) -> RefinementResult<Range<usize>> {
        let mut next = self.next.lock();
        if *next + n > self.capacity {
            return Err(RefinementError::CapacityExceeded {
                used: *next,
                requested: n,
                capacity: self.capacity,
            });
        }
        let start = *next;
        *next += n;
        Ok(start..*next)
    }

    /// 已分配到的位置
    pub fn next_slot(&self) -> usize {
        *self.next.lock()
    }
}

// ============================================================
// 引擎
// ============================================================

/// 一次已决定的分裂
#[derive(Debug, Clone)]
pub struct SplitPlan<D> {
    /// 母粒子
    pub parent: usize,
    /// 预留的子粒子槽位
    pub slots: Range<usize>,
    /// 分裂描述
    pub descriptor: D,
}

/// 分裂提交结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitOutcome {
    /// 分裂次数
    pub splits: usize,
    /// 新增粒子数
    pub created: usize,
}

/// 分裂引擎
#[derive(Debug)]
pub struct SplitEngine<S: SplitDynamics> {
    dynamics: S,
    min_parallel_size: usize,
}

impl<S: SplitDynamics> SplitEngine<S> {
    /// 创建引擎
    pub fn new(dynamics: S, min_parallel_size: usize) -> Self {
        Self {
            dynamics,
            min_parallel_size,
        }
    }

    /// 分裂策略
    pub fn dynamics(&self) -> &S {
        &self.dynamics
    }

    /// 扫描并预留槽位，不修改存储
    ///
    /// 返回的计划按槽位升序排列。
    pub fn scan(&self, population: &Population) -> RefinementResult<Vec<SplitPlan<S::Descriptor>>> {
        let allocator = BufferAllocator::for_population(population);
        let n_offspring = self.dynamics.offspring_count();

        let decide = |i: usize| -> Option<RefinementResult<SplitPlan<S::Descriptor>>> {
            if !population.is_live(i) || !self.dynamics.check_split(population, i) {
                return None;
            }
            let descriptor = self.dynamics.exec_first_split(population, i);
            Some(allocator.allocate(n_offspring).map(|slots| SplitPlan {
                parent: i,
                slots,
                descriptor,
            }))
        };

        let n = population.len();
        let mut plans: Vec<SplitPlan<S::Descriptor>> = if n >= self.min_parallel_size {
            (0..n)
                .into_par_iter()
                .filter_map(decide)
                .collect::<RefinementResult<_>>()?
        } else {
            (0..n).filter_map(decide).collect::<RefinementResult<_>>()?
        };
        plans.sort_unstable_by_key(|p| p.slots.start);

        log::debug!(
            "分裂扫描: {} 个粒子, {} 个待分裂, 槽位 {}..{}",
            n,
            plans.len(),
            n,
            allocator.next_slot()
        );
        Ok(plans)
    }

    /// 提交分裂计划
    pub fn commit(
        &self,
        population: &mut Population,
        plans: &[SplitPlan<S::Descriptor>],
    ) -> RefinementResult<SplitOutcome> {
        let mut outcome = SplitOutcome::default();
        for plan in plans {
            let parent = plan.parent;
            let mut offspring = Vec::with_capacity(plan.slots.len());
            for slot in plan.slots.clone() {
                let idx = population.append_copy(parent)?;
                debug_assert_eq!(idx, slot);
                offspring.push(idx);
            }
            self.dynamics
                .exec_other_split(population, parent, &offspring, &plan.descriptor)?;
            apply_split_conservation(population, parent, &offspring)?;

            outcome.splits += 1;
            outcome.created += offspring.len();
            log::trace!("粒子 {} 分裂 -> {:?}", parent, offspring);
        }
        Ok(outcome)
    }
}

/// 均分质量与体积，更新分辨率比与标记
fn apply_split_conservation(
    population: &mut Population,
    parent: usize,
    offspring: &[usize],
) -> RefinementResult<()> {
    let (store, tracker) = population.split_mut();
    let n_total = (offspring.len() + 1) as f64;
    let mass = store.mass(parent);
    let volume = store.volume(parent);
    let mass_share = mass / n_total;
    let volume_share = volume / n_total;
    // 母粒子承担舍入余量，保证总质量精确不变
    let parent_mass = mass - mass_share * offspring.len() as f64;
    let parent_volume = volume - volume_share * offspring.len() as f64;
    let ratio = tracker.resolution_ratio(parent) * SPLIT_RATIO_FACTOR;

    store.set_mass(parent, parent_mass);
    store.set_volume(parent, parent_volume);
    tracker.set_resolution_ratio(parent, ratio)?;
    tracker.set_status(parent, LifeStatus::SplitSource)?;
    for &c in offspring {
        store.set_mass(c, mass_share);
        store.set_volume(c, volume_share);
        tracker.set_resolution_ratio(c, ratio)?;
        tracker.set_status(c, LifeStatus::NewlyCreated)?;
    }
    Ok(())
}
