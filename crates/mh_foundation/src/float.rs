// crates/mh_foundation/src/float.rs

//! 安全浮点工具
//!
//! 粒子合并、密度误差估计中大量出现 `x / (sum + TINY_REAL)` 形式的除法，
//! 这里集中提供带下限保护的除法与补偿求和。

/// 极小正数，用于分母下限保护
pub const TINY_REAL: f64 = 1.0e-15;

/// 安全除法的分母阈值
pub const SAFE_DIV_EPSILON: f64 = 1.0e-14;

/// 安全除法
///
/// 分母绝对值低于 [`SAFE_DIV_EPSILON`] 或结果非有限时返回 `fallback`。
#[inline]
pub fn safe_div(a: f64, b: f64, fallback: f64) -> f64 {
    if b.abs() < SAFE_DIV_EPSILON {
        fallback
    } else {
        let result = a / b;
        if result.is_finite() {
            result
        } else {
            fallback
        }
    }
}

/// 安全平方根（负数截断为零）
#[inline]
pub fn safe_sqrt(x: f64) -> f64 {
    x.max(0.0).sqrt()
}

// ============================================================================
// Kahan 求和算法
// ============================================================================

/// Kahan 求和器
///
/// 通过补偿项跟踪累加过程中丢失的低位精度，用于合并时的质量、动量求和。
///
/// # 示例
///
/// ```
/// use mh_foundation::float::KahanSum;
///
/// let mut sum = KahanSum::new();
/// for _ in 0..10000 {
///     sum.add(0.1);
/// }
/// assert!((sum.value() - 1000.0).abs() < 1e-10);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct KahanSum {
    /// 累加和
    sum: f64,
    /// 补偿项（低位精度损失）
    compensation: f64,
}

impl KahanSum {
    /// 创建新的 Kahan 求和器
    #[inline]
    pub fn new() -> Self {
        Self {
            sum: 0.0,
            compensation: 0.0,
        }
    }

    /// 添加一个值
    #[inline]
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// 获取当前求和值
    #[inline]
    pub fn value(&self) -> f64 {
        self.sum
    }
}

impl std::iter::Sum<f64> for KahanSum {
    fn sum<I: Iterator<Item = f64>>(iter: I) -> Self {
        let mut kahan = KahanSum::new();
        for v in iter {
            kahan.add(v);
        }
        kahan
    }
}
