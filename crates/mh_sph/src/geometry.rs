// crates/mh_sph/src/geometry.rs

//! 区域与形状谓词
//!
//! 加密区域、粗化区域由外部几何模块提供，引擎只依赖 `contains` 判断。

use glam::DVec3;

/// 形状谓词
pub trait Shape: Send + Sync {
    /// 点是否位于形状内（含边界）
    fn contains(&self, point: DVec3) -> bool;

    /// 轴对齐包围盒
    fn bounding_box(&self) -> BoundingBox;
}

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// 下角点
    pub lower: DVec3,
    /// 上角点
    pub upper: DVec3,
}

impl BoundingBox {
    /// 由两个角点创建（自动排序分量）
    pub fn new(a: DVec3, b: DVec3) -> Self {
        Self {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    /// 闭区间包含判断
    #[inline]
    pub fn contains(&self, point: DVec3) -> bool {
        point.cmpge(self.lower).all() && point.cmple(self.upper).all()
    }

    /// 各向同性扩张
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            lower: self.lower - DVec3::splat(margin),
            upper: self.upper + DVec3::splat(margin),
        }
    }

    /// 中心点
    pub fn center(&self) -> DVec3 {
        0.5 * (self.lower + self.upper)
    }
}

impl Shape for BoundingBox {
    fn contains(&self, point: DVec3) -> bool {
        BoundingBox::contains(self, point)
    }

    fn bounding_box(&self) -> BoundingBox {
        *self
    }
}

/// 球形区域
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// 球心
    pub center: DVec3,
    /// 半径
    pub radius: f64,
}

impl Sphere {
    /// 创建球形区域
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl Shape for Sphere {
    fn contains(&self, point: DVec3) -> bool {
        point.distance_squared(self.center) <= self.radius * self.radius
    }

    fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(
            self.center - DVec3::splat(self.radius),
            self.center + DVec3::splat(self.radius),
        )
    }
}

/// 全空间（不做区域限制）
#[derive(Debug, Clone, Copy, Default)]
pub struct Everywhere;

impl Shape for Everywhere {
    fn contains(&self, _point: DVec3) -> bool {
        true
    }

    fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(DVec3::splat(f64::MIN), DVec3::splat(f64::MAX))
    }
}
