// crates/mh_sph/src/relation.rs

//! 邻居关系
//!
//! 邻居关系由外部在每轮加密/粗化前构建，引擎只读使用。
//! 邻居表以压缩行（CSR）格式存储：
//!
//! ```text
//! offsets: [0, 3, 5, ...]
//! entries: [n00, n01, n02, n10, n11, ...]
//! ```
//!
//! 本轮新生成粒子的索引不在邻居表范围内，查询返回空表。
//! 失效粒子可能仍出现在他人的邻居表中，读取方需要通过
//! [`Population::live_neighbors`] 或 [`LifeCycleTracker::is_live`] 过滤。
//!
//! [`LifeCycleTracker::is_live`]: crate::lifetime::LifeCycleTracker::is_live

use glam::DVec3;
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;

use crate::kernel::Kernel;
use crate::store::{Population, WallParticles};

type IndexedPoint = GeomWithData<[f64; 3], usize>;

/// 邻居条目
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 邻居索引（流体粒子或壁面粒子）
    pub index: usize,
    /// 距离
    pub distance: f64,
    /// 核函数值
    pub weight: f64,
    /// 核函数梯度，`x_i - x_j` 方向
    pub gradient: DVec3,
}

/// 邻居关系接口
pub trait NeighborRelation: Sync {
    /// 构建时的粒子数
    fn len(&self) -> usize;

    /// 粒子 `i` 的邻居表，超出构建范围时为空
    fn neighbors_of(&self, i: usize) -> &[Neighbor];

    /// 是否为空
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// CSR 格式邻居表
#[derive(Debug, Clone, Default)]
struct NeighborTable {
    offsets: Vec<usize>,
    entries: Vec<Neighbor>,
}

impl NeighborTable {
    fn from_lists(lists: Vec<Vec<Neighbor>>) -> Self {
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        offsets.push(0);
        let total: usize = lists.iter().map(Vec::len).sum();
        let mut entries = Vec::with_capacity(total);
        for list in lists {
            entries.extend(list);
            offsets.push(entries.len());
        }
        Self { offsets, entries }
    }

    #[inline]
    fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    #[inline]
    fn row(&self, i: usize) -> &[Neighbor] {
        if i + 1 >= self.offsets.len() {
            return &[];
        }
        &self.entries[self.offsets[i]..self.offsets[i + 1]]
    }

    fn n_entries(&self) -> usize {
        self.entries.len()
    }
}

fn to_array(p: DVec3) -> [f64; 3] {
    [p.x, p.y, p.z]
}

// ============================================================
// 流体-流体
// ============================================================

/// 流体粒子间的邻居关系
///
/// 使用对称化光滑长度 `h_ij = (h_i + h_j) / 2`，不含自身。
#[derive(Debug, Clone, Default)]
pub struct InnerRelation {
    table: NeighborTable,
}

impl InnerRelation {
    /// 基于 R-Tree 构建，只考虑有效粒子
    pub fn build<K: Kernel + ?Sized>(population: &Population, kernel: &K) -> Self {
        let store = population.store();
        let tracker = population.tracker();
        let n = population.len();

        let points: Vec<IndexedPoint> = (0..n)
            .filter(|&i| tracker.is_live(i))
            .map(|i| GeomWithData::new(to_array(store.position(i)), i))
            .collect();
        let h_max = points
            .iter()
            .map(|p| tracker.smoothing_length_of(p.data))
            .fold(0.0_f64, f64::max);
        let tree = RTree::bulk_load(points);

        let lists: Vec<Vec<Neighbor>> = (0..n)
            .into_par_iter()
            .map(|i| {
                if !tracker.is_live(i) {
                    return Vec::new();
                }
                let xi = store.position(i);
                let hi = tracker.smoothing_length_of(i);
                let search = kernel.cutoff_radius(0.5 * (hi + h_max));
                let mut list: Vec<Neighbor> = tree
                    .locate_within_distance(to_array(xi), search * search)
                    .filter(|p| p.data != i)
                    .filter_map(|p| {
                        let j = p.data;
                        let hij = 0.5 * (hi + tracker.smoothing_length_of(j));
                        let disp = xi - store.position(j);
                        let r = disp.length();
                        (r < kernel.cutoff_radius(hij)).then(|| Neighbor {
                            index: j,
                            distance: r,
                            weight: kernel.w(r, hij),
                            gradient: kernel.gradient(disp, hij),
                        })
                    })
                    .collect();
                list.sort_unstable_by_key(|nb| nb.index);
                list
            })
            .collect();

        let table = NeighborTable::from_lists(lists);
        log::trace!("流体邻居表: {} 个粒子, {} 条邻接", table.len(), table.n_entries());
        Self { table }
    }

    /// 由显式邻居列表创建
    pub fn from_lists(lists: Vec<Vec<Neighbor>>) -> Self {
        Self {
            table: NeighborTable::from_lists(lists),
        }
    }
}

impl NeighborRelation for InnerRelation {
    fn len(&self) -> usize {
        self.table.len()
    }

    fn neighbors_of(&self, i: usize) -> &[Neighbor] {
        self.table.row(i)
    }
}

// ============================================================
// 流体-壁面
// ============================================================

/// 流体粒子到壁面粒子的邻居关系，使用流体粒子自身的光滑长度
#[derive(Debug, Clone, Default)]
pub struct ContactRelation {
    table: NeighborTable,
}

impl ContactRelation {
    /// 基于 R-Tree 构建
    pub fn build<K: Kernel + ?Sized>(
        population: &Population,
        walls: &WallParticles,
        kernel: &K,
    ) -> Self {
        let store = population.store();
        let tracker = population.tracker();
        let points: Vec<IndexedPoint> = walls
            .positions()
            .iter()
            .enumerate()
            .map(|(k, &p)| GeomWithData::new(to_array(p), k))
            .collect();
        let tree = RTree::bulk_load(points);

        let lists: Vec<Vec<Neighbor>> = (0..population.len())
            .into_par_iter()
            .map(|i| {
                if !tracker.is_live(i) {
                    return Vec::new();
                }
                let xi = store.position(i);
                let hi = tracker.smoothing_length_of(i);
                let cutoff = kernel.cutoff_radius(hi);
                let mut list: Vec<Neighbor> = tree
                    .locate_within_distance(to_array(xi), cutoff * cutoff)
                    .filter_map(|p| {
                        let disp = xi - walls.position(p.data);
                        let r = disp.length();
                        (r < cutoff).then(|| Neighbor {
                            index: p.data,
                            distance: r,
                            weight: kernel.w(r, hi),
                            gradient: kernel.gradient(disp, hi),
                        })
                    })
                    .collect();
                list.sort_unstable_by_key(|nb| nb.index);
                list
            })
            .collect();

        Self {
            table: NeighborTable::from_lists(lists),
        }
    }
}

impl NeighborRelation for ContactRelation {
    fn len(&self) -> usize {
        self.table.len()
    }

    fn neighbors_of(&self, i: usize) -> &[Neighbor] {
        self.table.row(i)
    }
}

// ============================================================
// 组合
// ============================================================

/// 一轮加密/粗化所用的邻域信息
#[derive(Clone, Copy)]
pub struct Neighborhood<'a> {
    /// 流体邻居
    pub inner: &'a dyn NeighborRelation,
    /// 壁面邻居与壁面粒子
    pub contact: Option<(&'a dyn NeighborRelation, &'a WallParticles)>,
}

impl<'a> Neighborhood<'a> {
    /// 只有流体邻居
    pub fn inner(inner: &'a dyn NeighborRelation) -> Self {
        Self {
            inner,
            contact: None,
        }
    }

    /// 流体邻居 + 壁面邻居
    pub fn with_walls(
        inner: &'a dyn NeighborRelation,
        contact: &'a dyn NeighborRelation,
        walls: &'a WallParticles,
    ) -> Self {
        Self {
            inner,
            contact: Some((contact, walls)),
        }
    }
}

impl std::fmt::Debug for Neighborhood<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neighborhood")
            .field("inner_len", &self.inner.len())
            .field("has_walls", &self.contact.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::WendlandC2;
    use crate::lifetime::ResolutionParams;
    use crate::store::ParticleInit;

    fn line_population(n: usize, dp: f64) -> Population {
        let mut pop = Population::new(ResolutionParams::new(dp, 1.3));
        for i in 0..n {
            let x = DVec3::new(i as f64 * dp, 0.0, 0.0);
            pop.add_particle(ParticleInit::at_rest(x, dp * dp * dp, 1.0))
                .unwrap();
        }
        pop
    }

    #[test]
    fn test_inner_symmetric_without_self() {
        let pop = line_population(6, 0.1);
        let rel = InnerRelation::build(&pop, &WendlandC2);
        assert_eq!(rel.len(), 6);
        // h = 0.13, 支撑半径 0.26：左右各两个邻居
        let idx: Vec<usize> = rel.neighbors_of(2).iter().map(|n| n.index).collect();
        assert_eq!(idx, vec![0, 1, 3, 4]);
        for i in 0..6 {
            for nb in rel.neighbors_of(i) {
                assert!(rel.neighbors_of(nb.index).iter().any(|m| m.index == i));
            }
        }
        assert!(rel.neighbors_of(100).is_empty());
    }

    #[test]
    fn test_inner_skips_invalidated() {
        let mut pop = line_population(4, 0.1);
        pop.invalidate(1).unwrap();
        let rel = InnerRelation::build(&pop, &WendlandC2);
        assert!(rel.neighbors_of(1).is_empty());
        assert!(rel.neighbors_of(0).iter().all(|n| n.index != 1));
    }

    #[test]
    fn test_contact() {
        let pop = line_population(4, 0.1);
        let mut walls = WallParticles::new();
        walls.add(DVec3::new(0.0, -0.1, 0.0), 1e-3).unwrap();
        let rel = ContactRelation::build(&pop, &walls, &WendlandC2);
        assert_eq!(rel.neighbors_of(0).len(), 1);
        assert!(rel.neighbors_of(0)[0].gradient.y < 0.0);
        assert_eq!(rel.neighbors_of(2).len(), 1);
        assert!(rel.neighbors_of(3).is_empty());
    }
}
