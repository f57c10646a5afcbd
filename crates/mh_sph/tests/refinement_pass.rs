// crates/mh_sph/tests/refinement_pass.rs

//! 完整加密/粗化轮次测试

mod common;

use common::*;
use glam::DVec3;
use mh_config::{DensityErrorConfig, RefinementConfig};
use mh_sph::prelude::*;

/// 流体粒子对与其下方一排壁面粒子
fn pair_above_wall(config: &RefinementConfig) -> (Population, WallParticles) {
    let mut pop = Population::new(ResolutionParams::from_config(&config.resolution));
    let spacing = DP / 2.0;
    let volume = spacing.powi(3);
    for k in 0..2 {
        let x = DVec3::new(k as f64 * spacing, 0.0, 0.0);
        pop.add_particle(ParticleInit::at_rest(x, volume, RHO0).with_ratio(2.0))
            .unwrap();
    }
    let mut walls = WallParticles::new();
    for k in -4..6 {
        walls
            .add(DVec3::new(k as f64 * spacing, -spacing, 0.0), volume)
            .unwrap();
    }
    (pop, walls)
}

fn wall_merge(config: &RefinementConfig) -> MergeWithMinimumDensityErrorWithWall {
    let estimator = DensityErrorWithWall::new(WendlandC2, config.density_error.clone());
    let region = BoundingBox::new(DVec3::splat(-1.0), DVec3::splat(1.0));
    MergeWithMinimumDensityErrorWithWall::new(estimator, region, &config.merge)
}

#[test]
fn test_wall_merge_placement_bounded() {
    init_logger();
    let mut config = config();
    config.merge.max_group_size = 2;
    let (mut pop, walls) = pair_above_wall(&config);

    let inner = InnerRelation::build(&pop, &WendlandC2);
    let contact = ContactRelation::build(&pop, &walls, &WendlandC2);
    let hood = Neighborhood::with_walls(&inner, &contact, &walls);

    let engine = MergeEngine::new(wall_merge(&config), 1);
    let env = engine.dynamics().estimator().environment(&pop, &hood, &[0, 1]);
    assert!(env.n_walls() > 0);
    assert_eq!(env.n_fluid(), 0);

    let plans = engine.scan(&pop, &hood, &[false, false]);
    assert_eq!(plans.len(), 1);
    let descriptor = &plans[0].descriptor;
    assert_eq!(descriptor.survivors.len(), 1);
    let objective = descriptor.objective.expect("min-error merge reports objective");
    assert!(objective.is_finite());

    // 合并后分辨率比为 1，最大位移 max_distance_factor × DP
    let survivor = &descriptor.survivors[0];
    let max_shift = config.merge.max_distance_factor * DP;
    let shift = survivor.position.distance(descriptor.blend.position);
    assert!(shift <= max_shift + 1e-12, "shift = {shift}");

    let mass_before = pop.total_mass();
    let outcome = engine.commit(&mut pop, &plans).unwrap();
    assert_eq!(outcome.groups, 1);
    assert_eq!(outcome.invalidated, 1);
    assert_eq!(outcome.max_objective, Some(objective));
    assert!((pop.total_mass() - mass_before).abs() <= 1e-12 * mass_before);
}

#[test]
fn test_wall_pass_through_driver() {
    init_logger();
    let mut config = config();
    config.merge.max_group_size = 2;
    let (mut pop, walls) = pair_above_wall(&config);

    let mut refinement =
        AdaptiveRefinement::new(no_split(&config), wall_merge(&config), &config).unwrap();
    let inner = InnerRelation::build(&pop, &WendlandC2);
    let contact = ContactRelation::build(&pop, &walls, &WendlandC2);
    let stats = refinement
        .run_refinement_pass(&mut pop, &Neighborhood::with_walls(&inner, &contact, &walls))
        .unwrap();
    assert_eq!(stats.merge_groups, 1);
    assert_eq!(pop.live_count(), 1);
    assert!(stats.max_merge_objective.is_some());
}

/// 左侧粗粒子分裂、右侧细粒子合并
fn mixed_population(config: &RefinementConfig) -> Population {
    let coarse = lattice(config, DVec3::ZERO, 3, 1.0);
    let fine = lattice(config, DVec3::new(1.0, 0.0, 0.0), 3, 2.0);
    let mut pop = coarse;
    for i in 0..fine.len() {
        let s = fine.store();
        let init = ParticleInit::at_rest(s.position(i), s.volume(i), RHO0)
            .with_mass(s.mass(i))
            .with_ratio(fine.tracker().resolution_ratio(i));
        pop.add_particle(init).unwrap();
    }
    pop
}

fn mixed_driver(
    config: &RefinementConfig,
) -> AdaptiveRefinement<RefinementInPrescribedRegion, MergeWithMinimumDensityErrorInner> {
    let split_region = BoundingBox::new(DVec3::splat(-0.5), DVec3::splat(0.5));
    let merge_region = BoundingBox::new(DVec3::new(0.9, -0.5, -0.5), DVec3::new(1.5, 0.5, 0.5));
    let split = RefinementInPrescribedRegion::new(split_region, split_region, &config.split);
    let estimator = DensityErrorInner::new(WendlandC2, config.density_error.clone());
    let merge = MergeWithMinimumDensityErrorInner::new(estimator, merge_region, &config.merge);
    AdaptiveRefinement::new(split, merge, config).unwrap()
}

#[test]
fn test_mixed_pass_conserves_mass() {
    init_logger();
    let config = config();
    let mut pop = mixed_population(&config);
    pop.reserve_buffer(27);
    let mass_before = pop.total_mass();
    let momentum_before = pop.total_momentum();

    let mut refinement = mixed_driver(&config);
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let stats = refinement
        .run_refinement_pass(&mut pop, &Neighborhood::inner(&relation))
        .unwrap();

    assert_eq!(stats.splits, 27);
    assert_eq!(stats.created, 27);
    assert!(stats.merge_groups > 0);
    assert_eq!(stats.live_count, 54 + 27 - stats.invalidated);
    assert_eq!(pop.live_count(), stats.live_count);
    assert!((pop.total_mass() - mass_before).abs() <= 1e-9 * mass_before);
    assert!((pop.total_momentum() - momentum_before).length() < 1e-12);

    // 分裂粒子与合并粒子互不重叠
    for i in 0..27 {
        assert_eq!(pop.tracker().status(i), LifeStatus::SplitSource);
    }
    for i in 27..54 {
        let status = pop.tracker().status(i);
        assert!(matches!(
            status,
            LifeStatus::MergeSource | LifeStatus::Invalidated | LifeStatus::Normal
        ));
    }
    for i in 54..81 {
        assert_eq!(pop.tracker().status(i), LifeStatus::NewlyCreated);
    }
}

#[test]
fn test_transient_status_reset_on_next_pass() {
    init_logger();
    let config = config();
    let mut pop = mixed_population(&config);
    pop.reserve_buffer(27);

    let mut refinement = mixed_driver(&config);
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let first = refinement
        .run_refinement_pass(&mut pop, &Neighborhood::inner(&relation))
        .unwrap();
    assert!((0..pop.len()).any(|i| pop.tracker().status(i).is_transient()));

    let mut idle = AdaptiveRefinement::new(no_split(&config), no_merge(&config), &config).unwrap();
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let second = idle
        .run_refinement_pass(&mut pop, &Neighborhood::inner(&relation))
        .unwrap();
    assert_eq!(second.splits + second.merge_groups, 0);
    assert_eq!(second.live_count, first.live_count);

    let invalidated = (0..pop.len())
        .filter(|&i| pop.tracker().status(i) == LifeStatus::Invalidated)
        .count();
    assert_eq!(invalidated, first.invalidated);
    for i in pop.live_indices() {
        assert_eq!(pop.tracker().status(i), LifeStatus::Normal);
    }
}

#[test]
fn test_merge_criteria_idempotent() {
    init_logger();
    let config = config();
    let pop = lattice(&config, DVec3::ZERO, 3, 2.0);
    let before = Snapshot::of(&pop);
    let relation = InnerRelation::build(&pop, &WendlandC2);
    let hood = Neighborhood::inner(&relation);

    let estimator = DensityErrorInner::new(WendlandC2, DensityErrorConfig::default());
    let region = BoundingBox::new(DVec3::splat(-1.0), DVec3::splat(1.0));
    let policy = MergeWithMinimumDensityErrorInner::new(estimator, region, &config.merge);

    for i in 0..pop.len() {
        let mut first = Vec::new();
        let mut second = Vec::new();
        let a = policy.merge_criteria(&pop, &hood, i, &mut first);
        let b = policy.merge_criteria(&pop, &hood, i, &mut second);
        assert_eq!(a, b);
        assert_eq!(first, second);
        if a {
            assert_eq!(first[0], i);
            assert!(first.len() >= 2 && first.len() <= 3);
        }
    }
    assert_eq!(Snapshot::of(&pop), before);
}

#[test]
fn test_config_from_json_drives_pass() {
    init_logger();
    let json = serde_json::json!({
        "resolution": { "reference_spacing": 0.1, "max_ratio": 4.0 },
        "split": { "buffer_width": 8, "target_ratio": 4.0, "seed": 11 },
        "density_error": { "reference_density": 1000.0 },
        "schedule": { "interval": 2 },
        "parallel": { "num_threads": 2, "min_parallel_size": 1 }
    });
    let config = RefinementConfig::from_json_str(&json.to_string()).unwrap();
    assert_eq!(config.split.buffer_width, 8);
    assert_eq!(config.parallel.min_parallel_size, 1);

    let region = BoundingBox::new(DVec3::splat(-1.0), DVec3::splat(1.0));
    let split = RefinementInPrescribedRegion::new(region, Everywhere, &config.split);
    let mut refinement = AdaptiveRefinement::new(split, no_merge(&config), &config).unwrap();

    let mut pop = Population::new(ResolutionParams::from_config(&config.resolution));
    pop.add_particle(ParticleInit::at_rest(DVec3::ZERO, 1e-3, RHO0)).unwrap();
    refinement.prepare(&mut pop);
    assert_eq!(pop.store().free_slots(), 8);

    let mut live = Vec::new();
    for step in 0..6 {
        let relation = InnerRelation::build(&pop, &WendlandC2);
        refinement
            .maybe_run(step, &mut pop, &Neighborhood::inner(&relation))
            .unwrap();
        live.push(pop.live_count());
    }
    // 间隔 2；比值达到 4 后停止分裂
    assert_eq!(live, vec![2, 2, 4, 4, 4, 4]);
    assert_eq!(refinement.passes(), 3);
    assert!((pop.total_mass() - 1.0).abs() < 1e-12);
}

#[test]
fn test_config_rejected_by_driver() {
    let mut config = config();
    config.merge.min_search_distance_factor = 2.0 * config.merge.search_radius_factor;
    let err = AdaptiveRefinement::new(no_split(&config), no_merge(&config), &config).unwrap_err();
    assert!(matches!(err, RefinementError::InvalidConfig { .. }));
}
