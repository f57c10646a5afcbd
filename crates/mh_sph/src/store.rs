// crates/mh_sph/src/store.rs

//! 粒子存储
//!
//! 结构数组（SoA）布局的粒子字段存储，索引在整个生命周期内保持稳定：
//! 新粒子只追加到下一个空闲槽位，合并掉的粒子只做软删除，不压缩数组。
//!
//! # 容量
//!
//! ```text
//! |<------ 初始粒子 ------>|<--- reserve_buffer(width) --->|
//! 0                      len                           capacity
//! ```
//!
//! `append_copy` 超出 `capacity` 时返回 `CapacityExceeded`。
//!
//! # 附加字段
//!
//! 除位置、速度、质量、体积、密度外，耦合模型携带的其他物理量
//! （如电压、门控变量、主动应力）以命名标量/向量字段注册，
//! 分裂时原样复制，合并时按质量加权混合。

use glam::DVec3;
use mh_foundation::{KahanSum, MhError, MhResult};

use crate::error::{RefinementError, RefinementResult};
use crate::lifetime::{LifeCycleTracker, LifeStatus, ResolutionParams};
use crate::relation::{Neighbor, NeighborRelation};

/// 命名标量字段
#[derive(Debug, Clone)]
struct ScalarField {
    name: String,
    values: Vec<f64>,
    default: f64,
}

/// 命名向量字段
#[derive(Debug, Clone)]
struct VectorField {
    name: String,
    values: Vec<DVec3>,
    default: DVec3,
}

/// 初始粒子数据
#[derive(Debug, Clone, Copy)]
pub struct ParticleInit {
    /// 位置
    pub position: DVec3,
    /// 速度
    pub velocity: DVec3,
    /// 质量
    pub mass: f64,
    /// 参考体积
    pub volume: f64,
    /// 分辨率比
    pub resolution_ratio: f64,
}

impl ParticleInit {
    /// 由位置、体积和密度创建静止粒子（质量 = 密度 × 体积）
    pub fn at_rest(position: DVec3, volume: f64, density: f64) -> Self {
        Self {
            position,
            velocity: DVec3::ZERO,
            mass: density * volume,
            volume,
            resolution_ratio: 1.0,
        }
    }

    /// 设置速度
    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    /// 设置分辨率比
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.resolution_ratio = ratio;
        self
    }

    /// 设置质量
    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    /// 密度
    pub fn density(&self) -> f64 {
        self.mass / self.volume
    }
}

/// 粒子字段存储
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    pos: Vec<DVec3>,
    vel: Vec<DVec3>,
    mass: Vec<f64>,
    vol: Vec<f64>,
    rho: Vec<f64>,
    scalars: Vec<ScalarField>,
    vectors: Vec<VectorField>,
    /// 实粒子槽位上限
    capacity: usize,
}

impl ParticleStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 已占用槽位数（含失效槽位）
    #[inline]
    pub fn len(&self) -> usize {
        self.pos.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    /// 槽位上限
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 剩余可追加的槽位数
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.capacity - self.len()
    }

    /// 在现有上限基础上预留 `width` 个缓冲槽位
    pub fn reserve_buffer(&mut self, width: usize) {
        self.capacity += width;
        self.pos.reserve(width);
        self.vel.reserve(width);
        self.mass.reserve(width);
        self.vol.reserve(width);
        self.rho.reserve(width);
        for f in &mut self.scalars {
            f.values.reserve(width);
        }
        for f in &mut self.vectors {
            f.values.reserve(width);
        }
    }

    /// 初始化阶段添加粒子，上限随之加一，已预留的缓冲槽位不被占用
    fn add_particle(&mut self, init: &ParticleInit) -> usize {
        self.pos.push(init.position);
        self.vel.push(init.velocity);
        self.mass.push(init.mass);
        self.vol.push(init.volume);
        self.rho.push(init.density());
        for f in &mut self.scalars {
            f.values.push(f.default);
        }
        for f in &mut self.vectors {
            f.values.push(f.default);
        }
        self.capacity += 1;
        self.len() - 1
    }

    /// 将 `source` 的全部字段复制到下一个空闲槽位
    pub fn append_copy(&mut self, source: usize) -> RefinementResult<usize> {
        MhError::check_index("Particle", source, self.len())?;
        if self.len() >= self.capacity {
            return Err(RefinementError::CapacityExceeded {
                used: self.len(),
                requested: 1,
                capacity: self.capacity,
            });
        }
        self.pos.push(self.pos[source]);
        self.vel.push(self.vel[source]);
        self.mass.push(self.mass[source]);
        self.vol.push(self.vol[source]);
        self.rho.push(self.rho[source]);
        for f in &mut self.scalars {
            let v = f.values[source];
            f.values.push(v);
        }
        for f in &mut self.vectors {
            let v = f.values[source];
            f.values.push(v);
        }
        Ok(self.len() - 1)
    }

    // ------------------------------------------------------------------
    // 基本字段
    // ------------------------------------------------------------------

    /// 位置
    #[inline]
    pub fn position(&self, i: usize) -> DVec3 {
        self.pos[i]
    }

    /// 设置位置
    #[inline]
    pub fn set_position(&mut self, i: usize, value: DVec3) {
        self.pos[i] = value;
    }

    /// 速度
    #[inline]
    pub fn velocity(&self, i: usize) -> DVec3 {
        self.vel[i]
    }

    /// 设置速度
    #[inline]
    pub fn set_velocity(&mut self, i: usize, value: DVec3) {
        self.vel[i] = value;
    }

    /// 质量
    #[inline]
    pub fn mass(&self, i: usize) -> f64 {
        self.mass[i]
    }

    /// 设置质量
    #[inline]
    pub fn set_mass(&mut self, i: usize, value: f64) {
        self.mass[i] = value;
    }

    /// 参考体积
    #[inline]
    pub fn volume(&self, i: usize) -> f64 {
        self.vol[i]
    }

    /// 设置参考体积
    #[inline]
    pub fn set_volume(&mut self, i: usize, value: f64) {
        self.vol[i] = value;
    }

    /// 密度
    #[inline]
    pub fn density(&self, i: usize) -> f64 {
        self.rho[i]
    }

    /// 设置密度
    #[inline]
    pub fn set_density(&mut self, i: usize, value: f64) {
        self.rho[i] = value;
    }

    /// 全部位置
    #[inline]
    pub fn positions(&self) -> &[DVec3] {
        &self.pos
    }

    /// 全部速度
    #[inline]
    pub fn velocities(&self) -> &[DVec3] {
        &self.vel
    }

    /// 全部质量
    #[inline]
    pub fn masses(&self) -> &[f64] {
        &self.mass
    }

    /// 全部体积
    #[inline]
    pub fn volumes(&self) -> &[f64] {
        &self.vol
    }

    // ------------------------------------------------------------------
    // 附加字段
    // ------------------------------------------------------------------

    /// 注册命名标量字段，已有粒子取默认值
    pub fn add_scalar_field(&mut self, name: &str, default: f64) -> RefinementResult<()> {
        if self.has_field(name) {
            return Err(RefinementError::DuplicateField { name: name.into() });
        }
        let mut values = Vec::with_capacity(self.capacity);
        values.resize(self.len(), default);
        self.scalars.push(ScalarField {
            name: name.into(),
            values,
            default,
        });
        Ok(())
    }

    /// 注册命名向量字段，已有粒子取默认值
    pub fn add_vector_field(&mut self, name: &str, default: DVec3) -> RefinementResult<()> {
        if self.has_field(name) {
            return Err(RefinementError::DuplicateField { name: name.into() });
        }
        let mut values = Vec::with_capacity(self.capacity);
        values.resize(self.len(), default);
        self.vectors.push(VectorField {
            name: name.into(),
            values,
            default,
        });
        Ok(())
    }

    fn has_field(&self, name: &str) -> bool {
        self.scalars.iter().any(|f| f.name == name) || self.vectors.iter().any(|f| f.name == name)
    }

    /// 标量字段只读切片
    pub fn scalar_field(&self, name: &str) -> RefinementResult<&[f64]> {
        self.scalars
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.values.as_slice())
            .ok_or_else(|| RefinementError::UnknownField { name: name.into() })
    }

    /// 标量字段可变切片
    pub fn scalar_field_mut(&mut self, name: &str) -> RefinementResult<&mut [f64]> {
        self.scalars
            .iter_mut()
            .find(|f| f.name == name)
            .map(|f| f.values.as_mut_slice())
            .ok_or_else(|| RefinementError::UnknownField { name: name.into() })
    }

    /// 向量字段只读切片
    pub fn vector_field(&self, name: &str) -> RefinementResult<&[DVec3]> {
        self.vectors
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.values.as_slice())
            .ok_or_else(|| RefinementError::UnknownField { name: name.into() })
    }

    /// 向量字段可变切片
    pub fn vector_field_mut(&mut self, name: &str) -> RefinementResult<&mut [DVec3]> {
        self.vectors
            .iter_mut()
            .find(|f| f.name == name)
            .map(|f| f.values.as_mut_slice())
            .ok_or_else(|| RefinementError::UnknownField { name: name.into() })
    }

    /// 附加标量字段个数
    #[inline]
    pub fn n_scalar_fields(&self) -> usize {
        self.scalars.len()
    }

    /// 附加向量字段个数
    #[inline]
    pub fn n_vector_fields(&self) -> usize {
        self.vectors.len()
    }

    /// 按注册顺序读取第 `k` 个附加标量字段
    #[inline]
    pub(crate) fn extra_scalar(&self, k: usize, i: usize) -> f64 {
        self.scalars[k].values[i]
    }

    /// 按注册顺序写入第 `k` 个附加标量字段
    #[inline]
    pub(crate) fn set_extra_scalar(&mut self, k: usize, i: usize, value: f64) {
        self.scalars[k].values[i] = value;
    }

    /// 按注册顺序读取第 `k` 个附加向量字段
    #[inline]
    pub(crate) fn extra_vector(&self, k: usize, i: usize) -> DVec3 {
        self.vectors[k].values[i]
    }

    /// 按注册顺序写入第 `k` 个附加向量字段
    #[inline]
    pub(crate) fn set_extra_vector(&mut self, k: usize, i: usize, value: DVec3) {
        self.vectors[k].values[i] = value;
    }
}

// ============================================================
// 壁面粒子
// ============================================================

/// 壁面（边界）粒子群
///
/// 只携带位置与体积，参与壁面感知的密度误差估计。
#[derive(Debug, Clone, Default)]
pub struct WallParticles {
    pos: Vec<DVec3>,
    vol: Vec<f64>,
}

impl WallParticles {
    /// 创建空壁面
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加壁面粒子
    pub fn add(&mut self, position: DVec3, volume: f64) -> MhResult<usize> {
        MhError::check_positive("wall_volume", volume)?;
        self.pos.push(position);
        self.vol.push(volume);
        Ok(self.pos.len() - 1)
    }

    /// 粒子数
    #[inline]
    pub fn len(&self) -> usize {
        self.pos.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    /// 位置
    #[inline]
    pub fn position(&self, k: usize) -> DVec3 {
        self.pos[k]
    }

    /// 体积
    #[inline]
    pub fn volume(&self, k: usize) -> f64 {
        self.vol[k]
    }

    /// 全部位置
    #[inline]
    pub fn positions(&self) -> &[DVec3] {
        &self.pos
    }
}

// ============================================================
// 粒子群句柄
// ============================================================

/// 有效粒子的只读视图
#[derive(Debug, Clone, Copy)]
pub struct ParticleView<'a> {
    population: &'a Population,
    index: usize,
}

impl ParticleView<'_> {
    /// 槽位索引
    pub fn index(&self) -> usize {
        self.index
    }

    /// 位置
    pub fn position(&self) -> DVec3 {
        self.population.store.position(self.index)
    }

    /// 速度
    pub fn velocity(&self) -> DVec3 {
        self.population.store.velocity(self.index)
    }

    /// 质量
    pub fn mass(&self) -> f64 {
        self.population.store.mass(self.index)
    }

    /// 体积
    pub fn volume(&self) -> f64 {
        self.population.store.volume(self.index)
    }

    /// 密度
    pub fn density(&self) -> f64 {
        self.population.store.density(self.index)
    }

    /// 分辨率比
    pub fn resolution_ratio(&self) -> f64 {
        self.population.tracker.resolution_ratio(self.index)
    }

    /// 生命周期标记
    pub fn status(&self) -> LifeStatus {
        self.population.tracker.status(self.index)
    }
}

/// 粒子群：字段存储 + 生命周期追踪
///
/// 这是自适应引擎操作的"粒子群句柄"。存储与追踪器的长度始终一致。
#[derive(Debug, Clone)]
pub struct Population {
    store: ParticleStore,
    tracker: LifeCycleTracker,
}

impl Population {
    /// 创建空粒子群
    pub fn new(params: ResolutionParams) -> Self {
        Self {
            store: ParticleStore::new(),
            tracker: LifeCycleTracker::new(params),
        }
    }

    /// 初始化阶段添加粒子
    pub fn add_particle(&mut self, init: ParticleInit) -> MhResult<usize> {
        MhError::check_positive("mass", init.mass)?;
        MhError::check_positive("volume", init.volume)?;
        let idx = self.tracker.push(init.resolution_ratio, LifeStatus::Normal)?;
        let store_idx = self.store.add_particle(&init);
        debug_assert_eq!(idx, store_idx);
        Ok(idx)
    }

    /// 预留缓冲槽位
    pub fn reserve_buffer(&mut self, width: usize) {
        self.store.reserve_buffer(width);
    }

    /// 复制 `source` 到新槽位（字段与分辨率比一并复制，标记为新生成）
    pub fn append_copy(&mut self, source: usize) -> RefinementResult<usize> {
        if !self.tracker.is_live(source) {
            return Err(RefinementError::InvalidatedParticle { index: source });
        }
        let idx = self.store.append_copy(source)?;
        let ratio = self.tracker.resolution_ratio(source);
        let tracked = self.tracker.push(ratio, LifeStatus::NewlyCreated)?;
        debug_assert_eq!(idx, tracked);
        Ok(idx)
    }

    /// 将粒子软删除
    pub fn invalidate(&mut self, index: usize) -> MhResult<()> {
        self.tracker.set_status(index, LifeStatus::Invalidated)
    }

    /// 字段存储
    #[inline]
    pub fn store(&self) -> &ParticleStore {
        &self.store
    }

    /// 可变字段存储
    #[inline]
    pub fn store_mut(&mut self) -> &mut ParticleStore {
        &mut self.store
    }

    /// 生命周期追踪器
    #[inline]
    pub fn tracker(&self) -> &LifeCycleTracker {
        &self.tracker
    }

    /// 可变生命周期追踪器
    #[inline]
    pub fn tracker_mut(&mut self) -> &mut LifeCycleTracker {
        &mut self.tracker
    }

    /// 同时借用存储与追踪器
    #[inline]
    pub fn split_mut(&mut self) -> (&mut ParticleStore, &mut LifeCycleTracker) {
        (&mut self.store, &mut self.tracker)
    }

    /// 槽位数（含失效槽位）
    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// 有效粒子数
    #[inline]
    pub fn live_count(&self) -> usize {
        self.tracker.live_count()
    }

    /// 粒子是否有效
    #[inline]
    pub fn is_live(&self, index: usize) -> bool {
        self.tracker.is_live(index)
    }

    /// 访问有效粒子，失效或越界时报错
    pub fn particle(&self, index: usize) -> RefinementResult<ParticleView<'_>> {
        MhError::check_index("Particle", index, self.len())?;
        if !self.tracker.is_live(index) {
            return Err(RefinementError::InvalidatedParticle { index });
        }
        Ok(ParticleView {
            population: self,
            index,
        })
    }

    /// 有效粒子索引（升序）
    pub fn live_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.tracker.is_live(i)).collect()
    }

    /// 过滤掉失效粒子的邻居迭代器
    pub fn live_neighbors<'a>(
        &'a self,
        relation: &'a dyn NeighborRelation,
        index: usize,
    ) -> impl Iterator<Item = &'a Neighbor> + 'a {
        relation
            .neighbors_of(index)
            .iter()
            .filter(move |n| self.tracker.is_live(n.index))
    }

    /// 有效粒子总质量
    pub fn total_mass(&self) -> f64 {
        (0..self.len())
            .filter(|&i| self.tracker.is_live(i))
            .map(|i| self.store.mass(i))
            .sum::<KahanSum>()
            .value()
    }

    /// 有效粒子总动量
    pub fn total_momentum(&self) -> DVec3 {
        (0..self.len())
            .filter(|&i| self.tracker.is_live(i))
            .map(|i| self.store.mass(i) * self.store.velocity(i))
            .sum()
    }
}
