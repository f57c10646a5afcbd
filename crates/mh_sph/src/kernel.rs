// crates/mh_sph/src/kernel.rs

//! 插值核函数
//!
//! 核函数以 `(r, h)` 为参数，支撑半径为 `cutoff_factor() * h`。
//! 默认使用三维 Wendland C2 核：
//!
//! ```text
//! W(q) = σ/h³ · (1 - q/2)⁴ · (1 + 2q),   q = r/h ∈ [0, 2]
//! σ    = 21 / (16π)
//! ```

use glam::DVec3;
use mh_foundation::TINY_REAL;
use std::f64::consts::PI;

/// 插值核函数接口
pub trait Kernel: Send + Sync {
    /// 支撑半径与光滑长度之比
    fn cutoff_factor(&self) -> f64;

    /// 核函数值 W(r, h)
    fn w(&self, r: f64, h: f64) -> f64;

    /// 核函数对距离的导数 dW/dr
    fn dw_dr(&self, r: f64, h: f64) -> f64;

    /// 支撑半径
    #[inline]
    fn cutoff_radius(&self, h: f64) -> f64 {
        self.cutoff_factor() * h
    }

    /// 核函数梯度 ∇W，`displacement = x_i - x_j`
    ///
    /// 重合点处梯度退化为零向量。
    #[inline]
    fn gradient(&self, displacement: DVec3, h: f64) -> DVec3 {
        let r = displacement.length();
        if r < TINY_REAL {
            return DVec3::ZERO;
        }
        displacement * (self.dw_dr(r, h) / r)
    }
}

/// 三维 Wendland C2 核
#[derive(Debug, Clone, Copy, Default)]
pub struct WendlandC2;

impl WendlandC2 {
    const SIGMA: f64 = 21.0 / (16.0 * PI);
}

impl Kernel for WendlandC2 {
    #[inline]
    fn cutoff_factor(&self) -> f64 {
        2.0
    }

    #[inline]
    fn w(&self, r: f64, h: f64) -> f64 {
        let q = r / h;
        if q >= 2.0 {
            return 0.0;
        }
        let t = 1.0 - 0.5 * q;
        Self::SIGMA / (h * h * h) * t.powi(4) * (1.0 + 2.0 * q)
    }

    #[inline]
    fn dw_dr(&self, r: f64, h: f64) -> f64 {
        let q = r / h;
        if q >= 2.0 {
            return 0.0;
        }
        let t = 1.0 - 0.5 * q;
        -5.0 * q * Self::SIGMA / (h * h * h * h) * t.powi(3)
    }
}
