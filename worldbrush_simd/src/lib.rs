//! # worldbrush_simd
//!
//! 世界几何可见性判定使用的SIMD内核，提供运行时CPU特性检测和8路包围盒视锥剔除。
//!
//! ## 特性
//!
//! - **跨平台支持**: x86_64 (SSE2/AVX) 和 aarch64 (NEON)
//! - **自动检测**: 运行时检测CPU特性，选择最优SIMD后端
//! - **SoA布局**: 8个包围盒按轴打包，一次剔除8个叶子
//! - **标量回退**: 所有后端与标量实现逐位一致
//!
//! ## 快速开始
//!
//! ```rust
//! use worldbrush_simd::{cull_box_8, CullPlane, SoaAabb8, SimdBackend};
//!
//! let planes = [
//!     CullPlane::new([1.0, 0.0, 0.0], -100.0),
//!     CullPlane::new([-1.0, 0.0, 0.0], -100.0),
//!     CullPlane::new([0.0, 1.0, 0.0], -100.0),
//!     CullPlane::new([0.0, -1.0, 0.0], -100.0),
//! ];
//! let mut boxes = SoaAabb8::default();
//! boxes.set(0, [-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]);
//!
//! let mask = cull_box_8(&boxes, &planes, 0b0000_0001);
//! assert_eq!(mask, 0b0000_0001);
//! println!("使用后端: {:?}", SimdBackend::best_available());
//! ```
//!
//! ## 模块
//!
//! - [`soa`]: SoA包围盒与剔除平面
//! - [`cull`]: 8路包围盒剔除（SSE2/AVX/NEON/标量）

pub mod cull;
pub mod soa;

// 重新导出主要类型
pub use cull::{cull_box_8, cull_box_8_scalar, cull_box_8_with};
pub use soa::{CullPlane, SoaAabb8, SOA_LANES};

use std::sync::OnceLock;

/// SIMD后端类型
///
/// 表示可用的SIMD指令集后端，按性能从低到高排序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimdBackend {
    /// 标量回退实现（无SIMD）
    Scalar,
    /// ARM NEON (Apple M系列, 高通, 联发科)
    Neon,
    /// SSE2 (Intel/AMD)，两个128位寄存器覆盖8个通道
    Sse2,
    /// AVX (Intel/AMD)，单个256位寄存器覆盖8个通道
    Avx,
}

impl SimdBackend {
    /// 获取当前平台最优的SIMD后端
    ///
    /// 检测结果在首次调用后缓存。
    pub fn best_available() -> Self {
        static BACKEND: OnceLock<SimdBackend> = OnceLock::new();
        *BACKEND.get_or_init(Self::detect)
    }

    fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx") {
                return Self::Avx;
            }
            if is_x86_feature_detected!("sse2") {
                return Self::Sse2;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                return Self::Neon;
            }
        }

        Self::Scalar
    }

    /// 当前CPU是否可以执行该后端
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Scalar => true,
            #[cfg(target_arch = "x86_64")]
            Self::Sse2 => is_x86_feature_detected!("sse2"),
            #[cfg(target_arch = "x86_64")]
            Self::Avx => is_x86_feature_detected!("avx"),
            #[cfg(target_arch = "aarch64")]
            Self::Neon => std::arch::is_aarch64_feature_detected!("neon"),
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    /// 获取可以并行处理的f32数量
    ///
    /// ```rust
    /// use worldbrush_simd::SimdBackend;
    ///
    /// assert_eq!(SimdBackend::Sse2.f32_lanes(), 4);
    /// assert_eq!(SimdBackend::Avx.f32_lanes(), 8);
    /// ```
    pub fn f32_lanes(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Neon | Self::Sse2 => 4,
            Self::Avx => 8,
        }
    }
}
