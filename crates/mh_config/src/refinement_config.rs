// crates/mh_config/src/refinement_config.rs

//! RefinementConfig - 自适应分辨率引擎配置
//!
//! 所有长度类参数均以"当前粒子间距"的倍数给出（`*_factor`），
//! 在运行时乘以粒子的局部间距 `reference_spacing / resolution_ratio`。

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// 自适应分辨率引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RefinementConfig {
    /// 分辨率参数
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// 分裂参数
    #[serde(default)]
    pub split: SplitConfig,

    /// 合并参数
    #[serde(default)]
    pub merge: MergeConfig,

    /// 密度误差估计参数
    #[serde(default)]
    pub density_error: DensityErrorConfig,

    /// 调度参数
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// 并行参数
    #[serde(default)]
    pub parallel: ParallelConfig,
}

/// 分辨率参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// 参考粒子间距 [m]
    #[serde(default = "default_reference_spacing")]
    pub reference_spacing: f64,

    /// 参考光滑长度与参考间距之比
    #[serde(default = "default_smoothing_length_factor")]
    pub smoothing_length_factor: f64,

    /// 允许的最小分辨率比（合并下限）
    #[serde(default = "default_min_ratio")]
    pub min_ratio: f64,

    /// 允许的最大分辨率比（分裂上限）
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,
}

fn default_reference_spacing() -> f64 { 0.01 }
fn default_smoothing_length_factor() -> f64 { 1.3 }
fn default_min_ratio() -> f64 { 1.0 }
fn default_max_ratio() -> f64 { 8.0 }

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            reference_spacing: default_reference_spacing(),
            smoothing_length_factor: default_smoothing_length_factor(),
            min_ratio: default_min_ratio(),
            max_ratio: default_max_ratio(),
        }
    }
}

/// 分裂参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// 预留缓冲区宽度（可新增的粒子数上限）
    #[serde(default = "default_buffer_width")]
    pub buffer_width: usize,

    /// 加密区域内的目标分辨率比
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f64,

    /// 分裂位移正态分布标准差（间距倍数）
    #[serde(default = "default_shift_sigma")]
    pub shift_sigma: f64,

    /// 分裂位移下限（间距倍数）
    #[serde(default = "default_split_min_distance")]
    pub min_distance_factor: f64,

    /// 分裂位移上限（间距倍数）
    #[serde(default = "default_split_max_distance")]
    pub max_distance_factor: f64,

    /// 随机数种子，`None` 时从操作系统取种子
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_buffer_width() -> usize { 10_000 }
fn default_target_ratio() -> f64 { 2.0 }
fn default_shift_sigma() -> f64 { 0.25 }
fn default_split_min_distance() -> f64 { 0.1 }
fn default_split_max_distance() -> f64 { 0.5 }

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            buffer_width: default_buffer_width(),
            target_ratio: default_target_ratio(),
            shift_sigma: default_shift_sigma(),
            min_distance_factor: default_split_min_distance(),
            max_distance_factor: default_split_max_distance(),
            seed: None,
        }
    }
}

/// 合并参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// 单个合并组的最大粒子数（2 或 3）
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,

    /// 搜索半径（间距倍数）
    #[serde(default = "default_search_radius")]
    pub search_radius_factor: f64,

    /// 候选邻居与种子的最小距离（间距倍数），更近的邻居不参与合并
    #[serde(default)]
    pub min_search_distance_factor: f64,

    /// 合并后位置相对质心的最小距离（合并后间距倍数）
    #[serde(default = "default_merge_min_distance")]
    pub min_distance_factor: f64,

    /// 合并后位置相对质心的最大距离（合并后间距倍数）
    #[serde(default = "default_merge_max_distance")]
    pub max_distance_factor: f64,

    /// 三合二时旋转方向的采样数
    #[serde(default = "default_rotation_samples")]
    pub rotation_samples: usize,
}

fn default_max_group_size() -> usize { 3 }
fn default_search_radius() -> f64 { 1.5 }
fn default_merge_min_distance() -> f64 { 0.2 }
fn default_merge_max_distance() -> f64 { 0.8 }
fn default_rotation_samples() -> usize { 12 }

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_group_size: default_max_group_size(),
            search_radius_factor: default_search_radius(),
            min_search_distance_factor: 0.0,
            min_distance_factor: default_merge_min_distance(),
            max_distance_factor: default_merge_max_distance(),
            rotation_samples: default_rotation_samples(),
        }
    }
}

/// 密度误差估计参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityErrorConfig {
    /// 参考密度 [kg/m³]
    #[serde(default = "default_reference_density")]
    pub reference_density: f64,

    /// 收敛容差（归一化目标函数）
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// 最大迭代次数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// 回溯线搜索最大折半次数
    #[serde(default = "default_line_search_steps")]
    pub line_search_steps: usize,

    /// 单步最大位移（间距倍数）
    #[serde(default = "default_max_step_factor")]
    pub max_step_factor: f64,

    /// 邻居密度变化项的权重
    #[serde(default = "default_neighbor_weight")]
    pub neighbor_weight: f64,
}

fn default_reference_density() -> f64 { 1.0 }
fn default_tolerance() -> f64 { 1e-6 }
fn default_max_iterations() -> usize { 20 }
fn default_line_search_steps() -> usize { 8 }
fn default_max_step_factor() -> f64 { 0.1 }
fn default_neighbor_weight() -> f64 { 1.0 }

impl Default for DensityErrorConfig {
    fn default() -> Self {
        Self {
            reference_density: default_reference_density(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            line_search_steps: default_line_search_steps(),
            max_step_factor: default_max_step_factor(),
            neighbor_weight: default_neighbor_weight(),
        }
    }
}

/// 调度参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// 每隔多少个外部时间步执行一次加密/粗化
    #[serde(default = "default_interval")]
    pub interval: usize,
}

fn default_interval() -> usize { 1 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

/// 并行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// 线程池大小，`None` 使用 rayon 全局线程池
    #[serde(default)]
    pub num_threads: Option<usize>,

    /// 最小并行粒子数（低于此值串行扫描）
    #[serde(default = "default_min_parallel_size")]
    pub min_parallel_size: usize,
}

fn default_min_parallel_size() -> usize { 512 }

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            min_parallel_size: default_min_parallel_size(),
        }
    }
}

fn check_positive(key: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, value, "必须为有限正数"))
    }
}

fn check_distance_pair(prefix: &str, min: f64, max: f64) -> Result<(), ConfigError> {
    if !(min >= 0.0 && min.is_finite()) {
        return Err(ConfigError::invalid(
            &format!("{prefix}.min_distance_factor"),
            min,
            "不能为负",
        ));
    }
    check_positive(&format!("{prefix}.max_distance_factor"), max)?;
    if min > max {
        return Err(ConfigError::invalid(
            &format!("{prefix}.min_distance_factor"),
            min,
            "不能大于 max_distance_factor",
        ));
    }
    Ok(())
}

impl RefinementConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// 从 JSON 字符串解析并验证
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: RefinementConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(ConfigError::Io)?;
        Ok(())
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.resolution;
        check_positive("resolution.reference_spacing", r.reference_spacing)?;
        check_positive("resolution.smoothing_length_factor", r.smoothing_length_factor)?;
        check_positive("resolution.min_ratio", r.min_ratio)?;
        check_positive("resolution.max_ratio", r.max_ratio)?;
        if r.min_ratio > r.max_ratio {
            return Err(ConfigError::invalid(
                "resolution.min_ratio",
                r.min_ratio,
                "不能大于 max_ratio",
            ));
        }

        let s = &self.split;
        check_positive("split.target_ratio", s.target_ratio)?;
        check_positive("split.shift_sigma", s.shift_sigma)?;
        check_distance_pair("split", s.min_distance_factor, s.max_distance_factor)?;

        let m = &self.merge;
        if !(2..=3).contains(&m.max_group_size) {
            return Err(ConfigError::invalid(
                "merge.max_group_size",
                m.max_group_size,
                "只支持 2 或 3",
            ));
        }
        check_positive("merge.search_radius_factor", m.search_radius_factor)?;
        let min_search = m.min_search_distance_factor;
        if !(min_search >= 0.0 && min_search < m.search_radius_factor) {
            return Err(ConfigError::invalid(
                "merge.min_search_distance_factor",
                min_search,
                "必须在 [0, search_radius_factor) 内",
            ));
        }
        check_distance_pair("merge", m.min_distance_factor, m.max_distance_factor)?;
        if m.rotation_samples == 0 {
            return Err(ConfigError::invalid("merge.rotation_samples", 0, "至少为 1"));
        }

        let d = &self.density_error;
        check_positive("density_error.reference_density", d.reference_density)?;
        check_positive("density_error.tolerance", d.tolerance)?;
        check_positive("density_error.max_step_factor", d.max_step_factor)?;
        if !(d.neighbor_weight >= 0.0 && d.neighbor_weight.is_finite()) {
            return Err(ConfigError::invalid(
                "density_error.neighbor_weight",
                d.neighbor_weight,
                "不能为负",
            ));
        }

        if self.schedule.interval == 0 {
            return Err(ConfigError::invalid("schedule.interval", 0, "至少为 1"));
        }
        if self.parallel.num_threads == Some(0) {
            return Err(ConfigError::invalid("parallel.num_threads", 0, "至少为 1"));
        }
        Ok(())
    }
}
