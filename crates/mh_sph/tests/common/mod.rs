// crates/mh_sph/tests/common/mod.rs

//! 集成测试公共工具

#![allow(dead_code)]

use glam::DVec3;
use mh_config::RefinementConfig;
use mh_sph::prelude::*;

/// 参考间距
pub const DP: f64 = 0.1;
/// 参考密度
pub const RHO0: f64 = 1000.0;

/// 初始化测试日志
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 测试用配置：参考间距 `DP`，参考密度 `RHO0`，固定随机种子
pub fn config() -> RefinementConfig {
    let mut config = RefinementConfig::default();
    config.resolution.reference_spacing = DP;
    config.density_error.reference_density = RHO0;
    config.split.seed = Some(2024);
    config
}

/// 以 `corner` 为起点、间距 `spacing` 的 `n³` 立方点阵
pub fn lattice(config: &RefinementConfig, corner: DVec3, n: usize, ratio: f64) -> Population {
    let mut pop = Population::new(ResolutionParams::from_config(&config.resolution));
    let spacing = config.resolution.reference_spacing / ratio;
    let volume = spacing * spacing * spacing;
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let x = corner + DVec3::new(i as f64, j as f64, k as f64) * spacing;
                let init = ParticleInit::at_rest(x, volume, RHO0).with_ratio(ratio);
                pop.add_particle(init).expect("lattice particle");
            }
        }
    }
    pop
}

/// 永远不会触发的分裂策略
pub fn no_split(config: &RefinementConfig) -> RefinementInPrescribedRegion {
    let far = BoundingBox::new(DVec3::splat(100.0), DVec3::splat(101.0));
    RefinementInPrescribedRegion::new(far, far, &config.split)
}

/// 永远不会触发的合并策略
pub fn no_merge(config: &RefinementConfig) -> ParticleMergeWithPrescribedArea {
    let far = BoundingBox::new(DVec3::splat(100.0), DVec3::splat(101.0));
    ParticleMergeWithPrescribedArea::new(far, &config.merge)
}

/// 全部字段快照
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
    pub masses: Vec<f64>,
    pub volumes: Vec<f64>,
    pub ratios: Vec<f64>,
    pub statuses: Vec<LifeStatus>,
}

impl Snapshot {
    pub fn of(pop: &Population) -> Self {
        Self {
            positions: pop.store().positions().to_vec(),
            velocities: pop.store().velocities().to_vec(),
            masses: pop.store().masses().to_vec(),
            volumes: pop.store().volumes().to_vec(),
            ratios: (0..pop.len()).map(|i| pop.tracker().resolution_ratio(i)).collect(),
            statuses: (0..pop.len()).map(|i| pop.tracker().status(i)).collect(),
        }
    }
}

/// 有效粒子相对原点的总角动量
pub fn total_angular_momentum(pop: &Population) -> DVec3 {
    pop.live_indices()
        .into_iter()
        .map(|i| {
            let s = pop.store();
            s.mass(i) * s.position(i).cross(s.velocity(i))
        })
        .sum()
}

/// 有效粒子总动能
pub fn total_kinetic_energy(pop: &Population) -> f64 {
    pop.live_indices()
        .into_iter()
        .map(|i| 0.5 * pop.store().mass(i) * pop.store().velocity(i).length_squared())
        .sum()
}
