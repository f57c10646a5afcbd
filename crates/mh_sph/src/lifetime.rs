// crates/mh_sph/src/lifetime.rs

//! 粒子生命周期追踪
//!
//! `LifeCycleTracker` 是"粒子能否分裂/合并"的唯一权威来源，保存每个槽位的
//! 分辨率比与生命周期标记，分裂引擎、合并引擎和密度误差估计都通过它查询。
//!
//! # 分辨率比
//!
//! 分辨率比 = 参考光滑长度 / 粒子有效光滑长度，越大表示越细：
//!
//! ```text
//! h(ratio)       = h_ref / ratio
//! spacing(ratio) = dp_ref / ratio
//! 二分裂:   ratio → 2 · ratio
//! N 合 K:   ratio → ratio · K / N
//! ```
//!
//! # 并发约定
//!
//! 读取通过 `&self` 在扫描阶段并行进行；写入需要 `&mut self`，
//! 只在提交阶段发生，因此同一索引上的写入天然串行。

use mh_config::ResolutionConfig;
use mh_foundation::{MhError, MhResult};

/// 二分裂时分辨率比的放大倍数
pub const SPLIT_RATIO_FACTOR: f64 = 2.0;

/// 分辨率比比较时的相对容差
const RATIO_EPS: f64 = 1e-12;

/// 生命周期标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifeStatus {
    /// 普通粒子
    #[default]
    Normal,
    /// 上一轮作为分裂母粒子
    SplitSource,
    /// 上一轮作为合并结果的承载粒子
    MergeSource,
    /// 上一轮新生成
    NewlyCreated,
    /// 已被合并掉（软删除）
    Invalidated,
}

impl LifeStatus {
    /// 是否仍参与计算
    #[inline]
    pub fn is_live(self) -> bool {
        self != Self::Invalidated
    }

    /// 是否为只描述上一轮结果的临时标记
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::SplitSource | Self::MergeSource | Self::NewlyCreated)
    }
}

/// 自适应分辨率参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionParams {
    /// 参考粒子间距
    pub reference_spacing: f64,
    /// 参考光滑长度
    pub reference_smoothing_length: f64,
    /// 最小分辨率比
    pub min_ratio: f64,
    /// 最大分辨率比
    pub max_ratio: f64,
}

impl ResolutionParams {
    /// 由参考间距与光滑长度系数创建，比值范围 [1, 8]
    pub fn new(reference_spacing: f64, smoothing_length_factor: f64) -> Self {
        Self {
            reference_spacing,
            reference_smoothing_length: reference_spacing * smoothing_length_factor,
            min_ratio: 1.0,
            max_ratio: 8.0,
        }
    }

    /// 设置分辨率比范围
    pub fn with_ratio_bounds(mut self, min_ratio: f64, max_ratio: f64) -> Self {
        self.min_ratio = min_ratio;
        self.max_ratio = max_ratio;
        self
    }

    /// 从配置创建
    pub fn from_config(config: &ResolutionConfig) -> Self {
        Self::new(config.reference_spacing, config.smoothing_length_factor)
            .with_ratio_bounds(config.min_ratio, config.max_ratio)
    }
}

/// 生命周期追踪器
#[derive(Debug, Clone)]
pub struct LifeCycleTracker {
    params: ResolutionParams,
    /// 分辨率比
    ratio: Vec<f64>,
    /// 生命周期标记
    status: Vec<LifeStatus>,
    /// 有效粒子数
    live: usize,
}

impl LifeCycleTracker {
    /// 创建空追踪器
    pub fn new(params: ResolutionParams) -> Self {
        Self {
            params,
            ratio: Vec::new(),
            status: Vec::new(),
            live: 0,
        }
    }

    /// 分辨率参数
    #[inline]
    pub fn params(&self) -> &ResolutionParams {
        &self.params
    }

    /// 槽位数（含失效槽位）
    #[inline]
    pub fn len(&self) -> usize {
        self.ratio.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ratio.is_empty()
    }

    /// 有效粒子数
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// 追加一个槽位
    pub(crate) fn push(&mut self, ratio: f64, status: LifeStatus) -> MhResult<usize> {
        MhError::check_positive("resolution_ratio", ratio)?;
        self.ratio.push(ratio);
        self.status.push(status);
        if status.is_live() {
            self.live += 1;
        }
        Ok(self.ratio.len() - 1)
    }

    /// 分辨率比
    ///
    /// # Panics
    ///
    /// 索引越界时 panic（与切片索引一致）。
    #[inline]
    pub fn resolution_ratio(&self, index: usize) -> f64 {
        self.ratio[index]
    }

    /// 设置分辨率比，必须为有限正数
    pub fn set_resolution_ratio(&mut self, index: usize, value: f64) -> MhResult<()> {
        MhError::check_index("Particle", index, self.ratio.len())?;
        MhError::check_positive("resolution_ratio", value)?;
        self.ratio[index] = value;
        Ok(())
    }

    /// 生命周期标记
    #[inline]
    pub fn status(&self, index: usize) -> LifeStatus {
        self.status[index]
    }

    /// 设置生命周期标记，同时维护有效粒子计数
    pub fn set_status(&mut self, index: usize, status: LifeStatus) -> MhResult<()> {
        MhError::check_index("Particle", index, self.status.len())?;
        let old = self.status[index];
        match (old.is_live(), status.is_live()) {
            (true, false) => self.live -= 1,
            (false, true) => self.live += 1,
            _ => {}
        }
        self.status[index] = status;
        Ok(())
    }

    /// 粒子是否有效（越界视为无效）
    #[inline]
    pub fn is_live(&self, index: usize) -> bool {
        self.status.get(index).is_some_and(|s| s.is_live())
    }

    /// 将上一轮留下的临时标记复位为 `Normal`，返回复位数量
    pub fn reset_transient(&mut self) -> usize {
        let mut count = 0;
        for s in self.status.iter_mut().filter(|s| s.is_transient()) {
            *s = LifeStatus::Normal;
            count += 1;
        }
        count
    }

    /// 给定分辨率比下的粒子间距
    #[inline]
    pub fn spacing(&self, ratio: f64) -> f64 {
        self.params.reference_spacing / ratio
    }

    /// 给定分辨率比下的光滑长度
    #[inline]
    pub fn smoothing_length(&self, ratio: f64) -> f64 {
        self.params.reference_smoothing_length / ratio
    }

    /// 粒子当前光滑长度
    #[inline]
    pub fn smoothing_length_of(&self, index: usize) -> f64 {
        self.smoothing_length(self.ratio[index])
    }

    /// 粒子当前间距
    #[inline]
    pub fn spacing_of(&self, index: usize) -> f64 {
        self.spacing(self.ratio[index])
    }

    /// 二分裂后的分辨率比
    #[inline]
    pub fn ratio_after_split(&self, ratio: f64) -> f64 {
        ratio * SPLIT_RATIO_FACTOR
    }

    /// N 合 K 后的分辨率比
    #[inline]
    pub fn ratio_after_merge(&self, mean_ratio: f64, group_size: usize, survivors: usize) -> f64 {
        mean_ratio * survivors as f64 / group_size as f64
    }

    /// 分裂后是否仍在最大分辨率比之内
    #[inline]
    pub fn is_split_allowable(&self, ratio: f64) -> bool {
        self.ratio_after_split(ratio) <= self.params.max_ratio * (1.0 + RATIO_EPS)
    }

    /// 合并结果的分辨率比是否不低于最小值
    #[inline]
    pub fn is_merge_allowable(&self, merged_ratio: f64) -> bool {
        merged_ratio >= self.params.min_ratio * (1.0 - RATIO_EPS)
    }
}
