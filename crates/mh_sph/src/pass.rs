// crates/mh_sph/src/pass.rs

//! 加密/粗化轮次
//!
//! 一轮按固定状态序列执行：
//!
//! ```text
//! Idle → Scanning → Splitting → Merging → Committing → Idle
//! ```
//!
//! Splitting 与 Merging 阶段只做只读决策（分裂计划、合并组），
//! 所有修改集中在 Committing 阶段；同一粒子不会既分裂又合并。
//! 任何阶段出错都会回到 Idle，扫描阶段的错误不会留下部分修改。

use mh_config::{RefinementConfig, ScheduleConfig};
use mh_foundation::MhError;
use rayon::ThreadPool;
use std::time::{Duration, Instant};

use crate::error::{RefinementError, RefinementResult};
use crate::merge::{MergeDynamics, MergeEngine};
use crate::relation::Neighborhood;
use crate::split::{SplitDynamics, SplitEngine};
use crate::store::Population;

/// 轮次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    /// 空闲
    #[default]
    Idle,
    /// 扫描有效粒子
    Scanning,
    /// 决定分裂
    Splitting,
    /// 决定合并
    Merging,
    /// 提交修改
    Committing,
}

/// 单轮统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PassStats {
    /// 分裂次数
    pub splits: usize,
    /// 合并组数
    pub merge_groups: usize,
    /// 新增粒子数
    pub created: usize,
    /// 失效粒子数
    pub invalidated: usize,
    /// 轮后有效粒子数
    pub live_count: usize,
    /// 合并描述的最大密度误差目标值
    pub max_merge_objective: Option<f64>,
    /// 耗时
    pub duration: Duration,
}

/// 自适应分辨率驱动
pub struct AdaptiveRefinement<S: SplitDynamics, M: MergeDynamics> {
    split: SplitEngine<S>,
    merge: MergeEngine<M>,
    schedule: ScheduleConfig,
    buffer_width: usize,
    pool: Option<ThreadPool>,
    state: PassState,
    last_stats: Option<PassStats>,
    live_count: usize,
    passes: usize,
}

impl<S: SplitDynamics, M: MergeDynamics> AdaptiveRefinement<S, M> {
    /// 由分裂、合并策略与配置创建
    ///
    /// 配置先经 `validate` 校验。
    /// `parallel.num_threads` 给定时创建专用线程池，否则使用 rayon 全局线程池。
    pub fn new(split: S, merge: M, config: &RefinementConfig) -> RefinementResult<Self> {
        config
            .validate()
            .map_err(|e| RefinementError::InvalidConfig {
                message: e.to_string(),
            })?;
        let min_parallel = config.parallel.min_parallel_size;
        let pool = match config.parallel.num_threads {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| MhError::internal(format!("线程池创建失败: {e}")))?,
            ),
            None => None,
        };
        Ok(Self {
            split: SplitEngine::new(split, min_parallel),
            merge: MergeEngine::new(merge, min_parallel),
            schedule: config.schedule.clone(),
            buffer_width: config.split.buffer_width,
            pool,
            state: PassState::Idle,
            last_stats: None,
            live_count: 0,
            passes: 0,
        })
    }

    /// 初始粒子添加完毕后调用，按 `split.buffer_width` 预留缓冲槽位
    pub fn prepare(&self, population: &mut Population) {
        population.reserve_buffer(self.buffer_width);
        log::debug!(
            "预留 {} 个缓冲槽位，槽位上限 {}",
            self.buffer_width,
            population.store().capacity()
        );
    }

    /// 分裂引擎
    pub fn split_engine(&self) -> &SplitEngine<S> {
        &self.split
    }

    /// 合并引擎
    pub fn merge_engine(&self) -> &MergeEngine<M> {
        &self.merge
    }

    /// 当前状态
    pub fn state(&self) -> PassState {
        self.state
    }

    /// 上一轮统计
    pub fn last_stats(&self) -> Option<&PassStats> {
        self.last_stats.as_ref()
    }

    /// 上一轮结束时的有效粒子数
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// 已完成的轮数
    pub fn passes(&self) -> usize {
        self.passes
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// 执行一轮加密/粗化
    ///
    /// 邻居关系应在调用前按当前粒子分布重建。
    /// 缓冲区不足时返回 `CapacityExceeded`，此时存储未被修改。
    pub fn run_refinement_pass(
        &mut self,
        population: &mut Population,
        neighborhood: &Neighborhood<'_>,
    ) -> RefinementResult<PassStats> {
        let result = self.run_stages(population, neighborhood);
        self.state = PassState::Idle;
        match result {
            Ok(stats) => {
                self.live_count = stats.live_count;
                self.passes += 1;
                self.last_stats = Some(stats);
                Ok(stats)
            }
            Err(e) => {
                log::warn!("加密/粗化轮次终止: {e}");
                Err(e)
            }
        }
    }

    fn run_stages(
        &mut self,
        population: &mut Population,
        neighborhood: &Neighborhood<'_>,
    ) -> RefinementResult<PassStats> {
        let start = Instant::now();

        self.state = PassState::Scanning;
        if neighborhood.inner.len() != population.len() {
            log::warn!(
                "邻居关系规模 {} 与粒子槽位数 {} 不一致，超出部分视为无邻居",
                neighborhood.inner.len(),
                population.len()
            );
        }
        let live_before = population.live_count();

        self.state = PassState::Splitting;
        let split_plans = {
            let pop: &Population = population;
            self.install(|| self.split.scan(pop))?
        };
        let mut reserved = vec![false; population.len()];
        for plan in &split_plans {
            reserved[plan.parent] = true;
        }

        self.state = PassState::Merging;
        let merge_plans = {
            let pop: &Population = population;
            let reserved = &reserved;
            self.install(|| self.merge.scan(pop, neighborhood, reserved))
        };

        self.state = PassState::Committing;
        let reset = population.tracker_mut().reset_transient();
        log::trace!("复位 {} 个临时标记", reset);
        let split = self.split.commit(population, &split_plans)?;
        let merge = self.merge.commit(population, &merge_plans)?;

        let stats = PassStats {
            splits: split.splits,
            merge_groups: merge.groups,
            created: split.created,
            invalidated: merge.invalidated,
            live_count: population.live_count(),
            max_merge_objective: merge.max_objective,
            duration: start.elapsed(),
        };
        log::info!(
            "加密/粗化: 分裂 {}, 合并组 {}, 有效粒子 {} -> {}, 耗时 {:?}",
            stats.splits,
            stats.merge_groups,
            live_before,
            stats.live_count,
            stats.duration
        );
        Ok(stats)
    }

    /// 按调度间隔执行，`step` 不是间隔的整数倍时返回 `None`
    pub fn maybe_run(
        &mut self,
        step: usize,
        population: &mut Population,
        neighborhood: &Neighborhood<'_>,
    ) -> RefinementResult<Option<PassStats>> {
        let interval = self.schedule.interval.max(1);
        if step % interval != 0 {
            return Ok(None);
        }
        self.run_refinement_pass(population, neighborhood).map(Some)
    }
}

impl<S: SplitDynamics, M: MergeDynamics> std::fmt::Debug for AdaptiveRefinement<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRefinement")
            .field("state", &self.state)
            .field("passes", &self.passes)
            .field("live_count", &self.live_count)
            .field("interval", &self.schedule.interval)
            .field("buffer_width", &self.buffer_width)
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoundingBox, Everywhere};
    use crate::kernel::WendlandC2;
    use crate::lifetime::ResolutionParams;
    use crate::policies::{ParticleMergeWithPrescribedArea, RefinementInPrescribedRegion};
    use crate::relation::InnerRelation;
    use crate::store::ParticleInit;
    use glam::DVec3;

    type Driver =
        AdaptiveRefinement<RefinementInPrescribedRegion<Everywhere>, ParticleMergeWithPrescribedArea>;

    fn test_config(interval: usize) -> RefinementConfig {
        let mut config = RefinementConfig::default();
        config.split.seed = Some(1);
        config.split.buffer_width = 4;
        config.schedule.interval = interval;
        config.parallel.num_threads = Some(2);
        config
    }

    fn policies(
        config: &RefinementConfig,
    ) -> (RefinementInPrescribedRegion<Everywhere>, ParticleMergeWithPrescribedArea) {
        let split = RefinementInPrescribedRegion::new(
            BoundingBox::new(DVec3::splat(-1.0), DVec3::splat(1.0)),
            Everywhere,
            &config.split,
        );
        // 合并区域远离粒子
        let merge = ParticleMergeWithPrescribedArea::new(
            BoundingBox::new(DVec3::splat(5.0), DVec3::splat(6.0)),
            &config.merge,
        );
        (split, merge)
    }

    fn driver(interval: usize) -> Driver {
        let config = test_config(interval);
        let (split, merge) = policies(&config);
        AdaptiveRefinement::new(split, merge, &config).unwrap()
    }

    #[test]
    fn test_schedule_interval() {
        let mut pop = Population::new(ResolutionParams::new(0.1, 1.3));
        pop.add_particle(ParticleInit::at_rest(DVec3::ZERO, 1e-3, 1000.0))
            .unwrap();
        let mut refinement = driver(3);
        refinement.prepare(&mut pop);
        assert_eq!(pop.store().free_slots(), 4);

        let rel = InnerRelation::build(&pop, &WendlandC2);
        assert!(refinement
            .maybe_run(1, &mut pop, &Neighborhood::inner(&rel))
            .unwrap()
            .is_none());
        let stats = refinement
            .maybe_run(3, &mut pop, &Neighborhood::inner(&rel))
            .unwrap()
            .unwrap();
        assert_eq!(stats.splits, 1);
        assert_eq!(refinement.state(), PassState::Idle);
        assert_eq!(refinement.live_count(), 2);
        assert_eq!(refinement.passes(), 1);
    }

    #[test]
    fn test_failed_pass_returns_to_idle() {
        let mut pop = Population::new(ResolutionParams::new(0.1, 1.3));
        pop.add_particle(ParticleInit::at_rest(DVec3::ZERO, 1e-3, 1000.0))
            .unwrap();
        let mut refinement = driver(1);
        let rel = InnerRelation::build(&pop, &WendlandC2);
        let err = refinement
            .run_refinement_pass(&mut pop, &Neighborhood::inner(&rel))
            .unwrap_err();
        assert!(err.is_pass_fatal());
        assert_eq!(refinement.state(), PassState::Idle);
        assert!(refinement.last_stats().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config(1);
        let (split, merge) = policies(&config);
        config.schedule.interval = 0;
        let err = AdaptiveRefinement::new(split, merge, &config).unwrap_err();
        assert!(matches!(err, RefinementError::InvalidConfig { .. }));
        assert!(err.to_string().contains("schedule.interval"));
        assert!(!err.is_pass_fatal());
    }
}
