// crates/mh_sph/tests/merge_conservation.rs

//! 合并守恒测试
//!
//! 二合一守恒质量与动量；三合二额外守恒角动量与动能。

mod common;

use common::*;
use glam::DVec3;
use mh_config::RefinementConfig;
use mh_sph::prelude::*;

fn min_error_merge(config: &RefinementConfig) -> MergeWithMinimumDensityErrorInner {
    let estimator = DensityErrorInner::new(WendlandC2, config.density_error.clone());
    let region = BoundingBox::new(DVec3::splat(-1.0), DVec3::splat(1.0));
    MergeWithMinimumDensityErrorInner::new(estimator, region, &config.merge)
}

#[test]
fn test_two_into_one_scenario() {
    init_logger();
    let mut config = config();
    config.merge.max_group_size = 2;
    let mut pop = Population::new(ResolutionParams::from_config(&config.resolution));
    let spacing = DP / 2.0;
    let volume = spacing.powi(3);
    let velocities = [DVec3::new(1.0, 0.0, 0.0), DVec3::new(0.0, 2.0, 0.0)];
    for (k, v) in velocities.iter().enumerate() {
        let x = DVec3::new(k as f64 * spacing, 0.0, 0.0);
        let init = ParticleInit::at_rest(x, volume, RHO0)
            .with_mass(1.0)
            .with_velocity(*v)
            .with_ratio(2.0);
        pop.add_particle(init).unwrap();
    }
    let momentum_before = pop.total_momentum();

    let mut refinement =
        AdaptiveRefinement::new(no_split(&config), min_error_merge(&config), &config).unwrap();
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let stats = refinement
        .run_refinement_pass(&mut pop, &Neighborhood::inner(&relation))
        .unwrap();

    assert_eq!(stats.merge_groups, 1);
    assert_eq!(stats.invalidated, 1);
    assert!(stats.max_merge_objective.is_some());
    assert_eq!(pop.live_count(), 1);
    assert_eq!(pop.len(), 2);

    let survivor = pop.particle(0).unwrap();
    assert_eq!(survivor.mass(), 2.0);
    assert_eq!(survivor.status(), LifeStatus::MergeSource);
    assert!((survivor.resolution_ratio() - 1.0).abs() < 1e-12);
    assert!((survivor.position() - DVec3::new(0.5 * spacing, 0.0, 0.0)).length() < 1e-12);
    assert!((survivor.density() - survivor.mass() / survivor.volume()).abs() < 1e-9);
    assert!((pop.total_momentum() - momentum_before).length() < 1e-12);

    assert_eq!(pop.tracker().status(1), LifeStatus::Invalidated);
    assert!(matches!(
        pop.particle(1),
        Err(RefinementError::InvalidatedParticle { index: 1 })
    ));
    assert_eq!(pop.live_indices(), vec![0]);
}

#[test]
fn test_three_into_two_conserves_motion() {
    init_logger();
    let config = config();
    let mut pop = Population::new(ResolutionParams::from_config(&config.resolution));

    // 等边三角形，质心不在原点
    let side = 0.05;
    let centroid = DVec3::new(0.3, -0.2, 0.1);
    let r = side / 3f64.sqrt();
    let translation = DVec3::new(0.4, -0.1, 0.25);
    let (expansion, omega) = (0.8, 3.0);
    for k in 0..3 {
        let angle = 2.0 * std::f64::consts::PI * k as f64 / 3.0;
        let offset = r * DVec3::new(angle.cos(), angle.sin(), 0.0);
        let velocity = translation + expansion * offset + omega * DVec3::Z.cross(offset);
        let init = ParticleInit::at_rest(centroid + offset, 1.25e-4, RHO0)
            .with_velocity(velocity)
            .with_ratio(2.0);
        pop.add_particle(init).unwrap();
    }

    let mass_before = pop.total_mass();
    let momentum_before = pop.total_momentum();
    let angular_before = total_angular_momentum(&pop);
    let energy_before = total_kinetic_energy(&pop);

    let mut refinement =
        AdaptiveRefinement::new(no_split(&config), min_error_merge(&config), &config).unwrap();
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let stats = refinement
        .run_refinement_pass(&mut pop, &Neighborhood::inner(&relation))
        .unwrap();

    assert_eq!(stats.merge_groups, 1);
    assert_eq!(stats.invalidated, 1);
    assert_eq!(pop.live_count(), 2);

    let tol = 1e-10;
    assert!((pop.total_mass() - mass_before).abs() <= tol * mass_before);
    assert!((pop.total_momentum() - momentum_before).length() <= tol * momentum_before.length());
    assert!(
        (total_angular_momentum(&pop) - angular_before).length() <= tol * angular_before.length(),
        "L: {:?} vs {:?}",
        total_angular_momentum(&pop),
        angular_before
    );
    assert!(
        (total_kinetic_energy(&pop) - energy_before).abs() <= tol * energy_before,
        "KE: {} vs {}",
        total_kinetic_energy(&pop),
        energy_before
    );

    // 两个承载粒子关于原质心对称
    let live = pop.live_indices();
    let (a, b) = (pop.store().position(live[0]), pop.store().position(live[1]));
    assert!((0.5 * (a + b) - centroid).length() < 1e-12);
    for &i in &live {
        assert!((pop.tracker().resolution_ratio(i) - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(pop.tracker().status(i), LifeStatus::MergeSource);
    }
}

#[test]
fn test_merge_skips_particles_outside_region() {
    init_logger();
    let config = config();
    let mut pop = lattice(&config, DVec3::new(2.0, 2.0, 2.0), 2, 2.0);
    let before = Snapshot::of(&pop);

    let mut refinement =
        AdaptiveRefinement::new(no_split(&config), min_error_merge(&config), &config).unwrap();
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let stats = refinement
        .run_refinement_pass(&mut pop, &Neighborhood::inner(&relation))
        .unwrap();

    assert_eq!(stats.merge_groups, 0);
    assert_eq!(stats.max_merge_objective, None);
    assert_eq!(Snapshot::of(&pop), before);
}

#[test]
fn test_pair_closer_than_search_minimum_left_unmerged() {
    init_logger();
    let mut config = config();
    config.merge.max_group_size = 2;
    // 细粒子间距 DP/2，最小搜索距离高于该间距
    config.merge.min_search_distance_factor = 1.2;
    let mut pop = Population::new(ResolutionParams::from_config(&config.resolution));
    let spacing = DP / 2.0;
    for k in 0..2 {
        let x = DVec3::new(k as f64 * spacing, 0.0, 0.0);
        pop.add_particle(ParticleInit::at_rest(x, spacing.powi(3), RHO0).with_ratio(2.0))
            .unwrap();
    }
    let before = Snapshot::of(&pop);

    let mut refinement =
        AdaptiveRefinement::new(no_split(&config), min_error_merge(&config), &config).unwrap();
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let stats = refinement
        .run_refinement_pass(&mut pop, &Neighborhood::inner(&relation))
        .unwrap();

    assert_eq!(stats.merge_groups, 0);
    assert_eq!(pop.live_count(), 2);
    assert_eq!(Snapshot::of(&pop), before);
}
