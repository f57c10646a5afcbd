// crates/mh_sph/src/density_error.rs

//! 密度误差估计
//!
//! 给定一组被替换的原粒子（origins）和若干候选粒子（candidates），
//! 估计以候选粒子替换原粒子后局部插值密度相对参考密度的偏差：
//!
//! ```text
//! e_c = m_c W(0, h_c) + Σ_{c'≠c} m_c' W_cc' + Σ_j m_j W_cj + Σ_k ρ0 V_k W_ck − ρ0
//! δ_j = Σ_c m_c W_cj − Σ_o m_o W_oj
//! F   = Σ_c (e_c/ρ0)² + λ Σ_j (δ_j/ρ0)²
//! ```
//!
//! 其中 j 取原粒子的有效流体邻居（不含原粒子本身），k 取壁面邻居（仅壁面变体），
//! 粒子对的光滑长度取两者的算术平均。
//!
//! 估计器是当前存储状态的纯函数，不修改任何字段。

use glam::DVec3;
use mh_config::DensityErrorConfig;
use mh_foundation::TINY_REAL;

use crate::kernel::{Kernel, WendlandC2};
use crate::relation::Neighborhood;
use crate::store::Population;

/// 候选粒子
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// 位置
    pub position: DVec3,
    /// 质量
    pub mass: f64,
    /// 分辨率比
    pub resolution_ratio: f64,
    /// 位置限制的参考点
    pub anchor: DVec3,
}

impl Candidate {
    /// 创建候选粒子
    pub fn new(position: DVec3, mass: f64, resolution_ratio: f64, anchor: DVec3) -> Self {
        Self {
            position,
            mass,
            resolution_ratio,
            anchor,
        }
    }

    /// 相对参考点的位移
    #[inline]
    pub fn displacement(&self) -> DVec3 {
        self.position - self.anchor
    }
}

/// 密度误差报告
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DensityErrorReport {
    /// 各候选粒子处的密度误差
    pub candidate_errors: Vec<f64>,
    /// 受影响邻居的密度变化 `(索引, δ_j)`
    pub neighbor_errors: Vec<(usize, f64)>,
    /// 归一化目标函数
    pub objective: f64,
}

impl DensityErrorReport {
    /// 候选粒子处的最大相对密度误差
    pub fn max_relative_candidate_error(&self, reference_density: f64) -> f64 {
        let rho0 = reference_density.max(TINY_REAL);
        self.candidate_errors
            .iter()
            .fold(0.0_f64, |acc, e| acc.max(e.abs() / rho0))
    }
}

/// 位置限制
///
/// 将位移长度限制在 `[min_distance, max_distance]` 内，方向不变。
/// 近零位移没有方向，原样返回。
pub fn position_limitation(displacement: DVec3, min_distance: f64, max_distance: f64) -> DVec3 {
    let len = displacement.length();
    if len < TINY_REAL {
        return displacement;
    }
    let limited = len.max(min_distance).min(max_distance);
    displacement * (limited / len)
}

// ============================================================
// 估计环境
// ============================================================

#[derive(Debug, Clone, Copy)]
struct FluidSample {
    index: usize,
    position: DVec3,
    mass: f64,
    h: f64,
    /// 原粒子对该邻居密度的贡献 Σ_o m_o W_oj
    origin_contribution: f64,
}

#[derive(Debug, Clone, Copy)]
struct WallSample {
    position: DVec3,
    volume: f64,
}

/// 一次估计所需的邻域快照
///
/// 由估计器的 [`DensityErrorEstimator::environment`] 创建，之后的评估不再读取存储。
#[derive(Debug, Clone, Default)]
pub struct DensityEnvironment {
    fluid: Vec<FluidSample>,
    walls: Vec<WallSample>,
    /// 参考光滑长度，候选粒子的 h = h_ref / ratio
    reference_smoothing_length: f64,
}

impl DensityEnvironment {
    /// 收集原粒子的有效流体邻居（去重，不含原粒子）
    pub fn fluid<K: Kernel + ?Sized>(
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        origins: &[usize],
        kernel: &K,
    ) -> Self {
        let store = population.store();
        let tracker = population.tracker();
        let mut indices: Vec<usize> = origins
            .iter()
            .flat_map(|&o| population.live_neighbors(neighborhood.inner, o))
            .map(|nb| nb.index)
            .filter(|j| !origins.contains(j))
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let fluid = indices
            .into_iter()
            .map(|j| {
                let position = store.position(j);
                let h = tracker.smoothing_length_of(j);
                let origin_contribution = origins
                    .iter()
                    .map(|&o| {
                        let hoj = 0.5 * (h + tracker.smoothing_length_of(o));
                        store.mass(o) * kernel.w(position.distance(store.position(o)), hoj)
                    })
                    .sum();
                FluidSample {
                    index: j,
                    position,
                    mass: store.mass(j),
                    h,
                    origin_contribution,
                }
            })
            .collect();

        Self {
            fluid,
            walls: Vec::new(),
            reference_smoothing_length: tracker.params().reference_smoothing_length,
        }
    }

    /// 追加原粒子的壁面邻居（去重）
    pub fn with_walls(mut self, neighborhood: &Neighborhood<'_>, origins: &[usize]) -> Self {
        let Some((contact, walls)) = neighborhood.contact else {
            return self;
        };
        let mut indices: Vec<usize> = origins
            .iter()
            .flat_map(|&o| contact.neighbors_of(o))
            .map(|nb| nb.index)
            .collect();
        indices.sort_unstable();
        indices.dedup();
        self.walls = indices
            .into_iter()
            .map(|k| WallSample {
                position: walls.position(k),
                volume: walls.volume(k),
            })
            .collect();
        self
    }

    /// 流体邻居数
    pub fn n_fluid(&self) -> usize {
        self.fluid.len()
    }

    /// 壁面邻居数
    pub fn n_walls(&self) -> usize {
        self.walls.len()
    }

    fn candidate_h(&self, c: &Candidate) -> f64 {
        self.reference_smoothing_length / c.resolution_ratio.max(TINY_REAL)
    }

    /// 计算密度误差报告
    pub fn evaluate<K: Kernel + ?Sized>(
        &self,
        kernel: &K,
        config: &DensityErrorConfig,
        candidates: &[Candidate],
    ) -> DensityErrorReport {
        let rho0 = config.reference_density;
        let inv = 1.0 / rho0.max(TINY_REAL);
        let hs: Vec<f64> = candidates.iter().map(|c| self.candidate_h(c)).collect();

        let candidate_errors: Vec<f64> = (0..candidates.len())
            .map(|a| self.candidate_density(kernel, rho0, candidates, &hs, a) - rho0)
            .collect();

        let neighbor_errors: Vec<(usize, f64)> = self
            .fluid
            .iter()
            .map(|s| {
                let new: f64 = candidates
                    .iter()
                    .zip(&hs)
                    .map(|(c, &hc)| {
                        c.mass * kernel.w(c.position.distance(s.position), 0.5 * (hc + s.h))
                    })
                    .sum();
                (s.index, new - s.origin_contribution)
            })
            .collect();

        let objective = candidate_errors.iter().map(|e| (e * inv).powi(2)).sum::<f64>()
            + config.neighbor_weight
                * neighbor_errors
                    .iter()
                    .map(|(_, d)| (d * inv).powi(2))
                    .sum::<f64>();

        DensityErrorReport {
            candidate_errors,
            neighbor_errors,
            objective,
        }
    }

    fn candidate_density<K: Kernel + ?Sized>(
        &self,
        kernel: &K,
        rho0: f64,
        candidates: &[Candidate],
        hs: &[f64],
        a: usize,
    ) -> f64 {
        let ca = &candidates[a];
        let ha = hs[a];
        let mut rho = ca.mass * kernel.w(0.0, ha);
        for (b, cb) in candidates.iter().enumerate() {
            if b != a {
                rho += cb.mass * kernel.w(ca.position.distance(cb.position), 0.5 * (ha + hs[b]));
            }
        }
        for s in &self.fluid {
            rho += s.mass * kernel.w(ca.position.distance(s.position), 0.5 * (ha + s.h));
        }
        for w in &self.walls {
            rho += rho0 * w.volume * kernel.w(ca.position.distance(w.position), ha);
        }
        rho
    }

    /// 目标函数对各候选位置的梯度
    fn objective_gradient<K: Kernel + ?Sized>(
        &self,
        kernel: &K,
        config: &DensityErrorConfig,
        candidates: &[Candidate],
        report: &DensityErrorReport,
    ) -> Vec<DVec3> {
        let rho0 = config.reference_density;
        let inv2 = 1.0 / (rho0 * rho0).max(TINY_REAL);
        let hs: Vec<f64> = candidates.iter().map(|c| self.candidate_h(c)).collect();

        candidates
            .iter()
            .enumerate()
            .map(|(a, ca)| {
                let ha = hs[a];
                let ea = report.candidate_errors[a];
                let mut g = DVec3::ZERO;

                // 自身误差项
                let mut de = DVec3::ZERO;
                for s in &self.fluid {
                    de += s.mass * kernel.gradient(ca.position - s.position, 0.5 * (ha + s.h));
                }
                for w in &self.walls {
                    de += rho0 * w.volume * kernel.gradient(ca.position - w.position, ha);
                }
                for (b, cb) in candidates.iter().enumerate() {
                    if b == a {
                        continue;
                    }
                    let grad = kernel.gradient(ca.position - cb.position, 0.5 * (ha + hs[b]));
                    de += cb.mass * grad;
                    // 兄弟粒子误差项
                    g += 2.0 * report.candidate_errors[b] * inv2 * ca.mass * grad;
                }
                g += 2.0 * ea * inv2 * de;

                // 邻居密度变化项
                for (s, (_, delta)) in self.fluid.iter().zip(&report.neighbor_errors) {
                    let grad = kernel.gradient(ca.position - s.position, 0.5 * (ha + s.h));
                    g += config.neighbor_weight * 2.0 * delta * inv2 * ca.mass * grad;
                }
                g
            })
            .collect()
    }

    /// 投影梯度下降 + 回溯线搜索
    ///
    /// 每次迭代后候选位置相对各自参考点的位移都经过 [`position_limitation`]。
    /// 只接受使目标函数下降的步长，返回最终报告。
    pub fn search<K: Kernel + ?Sized>(
        &self,
        kernel: &K,
        config: &DensityErrorConfig,
        candidates: &mut [Candidate],
        spacing: f64,
        min_distance: f64,
        max_distance: f64,
    ) -> DensityErrorReport {
        for c in candidates.iter_mut() {
            c.position = c.anchor + position_limitation(c.displacement(), min_distance, max_distance);
        }
        let mut report = self.evaluate(kernel, config, candidates);
        let max_step = config.max_step_factor * spacing;

        for iter in 0..config.max_iterations {
            if report.objective <= config.tolerance {
                log::trace!("密度误差搜索收敛: 迭代 {}, F = {:.3e}", iter, report.objective);
                break;
            }
            let grad = self.objective_gradient(kernel, config, candidates, &report);
            let g2: f64 = grad.iter().map(|g| g.length_squared()).sum();
            if g2 < TINY_REAL {
                break;
            }

            let alpha = 0.5 * report.objective / g2;
            let mut steps: Vec<DVec3> = grad
                .iter()
                .map(|g| {
                    let s = -alpha * *g;
                    let len = s.length();
                    if len > max_step {
                        s * (max_step / len)
                    } else {
                        s
                    }
                })
                .collect();

            let mut accepted = false;
            for _ in 0..=config.line_search_steps {
                let trial: Vec<Candidate> = candidates
                    .iter()
                    .zip(&steps)
                    .map(|(c, s)| {
                        let moved = c.position + *s - c.anchor;
                        Candidate {
                            position: c.anchor
                                + position_limitation(moved, min_distance, max_distance),
                            ..*c
                        }
                    })
                    .collect();
                let trial_report = self.evaluate(kernel, config, &trial);
                if trial_report.objective < report.objective {
                    candidates.copy_from_slice(&trial);
                    report = trial_report;
                    accepted = true;
                    break;
                }
                for s in &mut steps {
                    *s *= 0.5;
                }
            }
            if !accepted {
                break;
            }
        }
        report
    }
}

// ============================================================
// 估计器
// ============================================================

/// 密度误差估计器接口
pub trait DensityErrorEstimator: Send + Sync {
    /// 插值核函数
    fn kernel(&self) -> &dyn Kernel;

    /// 数值参数
    fn config(&self) -> &DensityErrorConfig;

    /// 收集估计环境
    fn environment(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        origins: &[usize],
    ) -> DensityEnvironment;

    /// 评估给定候选布置
    fn evaluate(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        origins: &[usize],
        candidates: &[Candidate],
    ) -> DensityErrorReport {
        self.environment(population, neighborhood, origins)
            .evaluate(self.kernel(), self.config(), candidates)
    }

    /// 搜索使目标函数最小的候选位置，结果写回 `candidates`
    fn search_positions(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        origins: &[usize],
        candidates: &mut [Candidate],
        min_distance: f64,
        max_distance: f64,
    ) -> DensityErrorReport {
        let spacing = candidates
            .first()
            .map(|c| population.tracker().spacing(c.resolution_ratio))
            .unwrap_or(population.tracker().params().reference_spacing);
        self.environment(population, neighborhood, origins).search(
            self.kernel(),
            self.config(),
            candidates,
            spacing,
            min_distance,
            max_distance,
        )
    }
}

/// 流体内部密度误差估计
#[derive(Debug, Clone)]
pub struct DensityErrorInner<K: Kernel = WendlandC2> {
    kernel: K,
    config: DensityErrorConfig,
}

impl<K: Kernel> DensityErrorInner<K> {
    /// 创建估计器
    pub fn new(kernel: K, config: DensityErrorConfig) -> Self {
        Self { kernel, config }
    }
}

impl<K: Kernel> DensityErrorEstimator for DensityErrorInner<K> {
    fn kernel(&self) -> &dyn Kernel {
        &self.kernel
    }

    fn config(&self) -> &DensityErrorConfig {
        &self.config
    }

    fn environment(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        origins: &[usize],
    ) -> DensityEnvironment {
        DensityEnvironment::fluid(population, neighborhood, origins, &self.kernel)
    }
}

/// 含壁面贡献的密度误差估计
///
/// 壁面粒子以 `ρ0 · V_k` 作为等效质量参与插值。
#[derive(Debug, Clone)]
pub struct DensityErrorWithWall<K: Kernel = WendlandC2> {
    kernel: K,
    config: DensityErrorConfig,
}

impl<K: Kernel> DensityErrorWithWall<K> {
    /// 创建估计器
    pub fn new(kernel: K, config: DensityErrorConfig) -> Self {
        Self { kernel, config }
    }
}

impl<K: Kernel> DensityErrorEstimator for DensityErrorWithWall<K> {
    fn kernel(&self) -> &dyn Kernel {
        &self.kernel
    }

    fn config(&self) -> &DensityErrorConfig {
        &self.config
    }

    fn environment(
        &self,
        population: &Population,
        neighborhood: &Neighborhood<'_>,
        origins: &[usize],
    ) -> DensityEnvironment {
        DensityEnvironment::fluid(population, neighborhood, origins, &self.kernel)
            .with_walls(neighborhood, origins)
    }
}
