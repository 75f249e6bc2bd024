//! 8路包围盒视锥剔除
//!
//! 对每个平面，按符号位选出离平面最远的角点（min或max），计算与法向量的点积，
//! 并与平面距离比较。包围盒完全位于某个平面外侧时该通道被剔除。
//!
//! 剔除是保守的：不会漏掉可见的包围盒，少量误判为可见的包围盒由后续的表面测试处理。
//! 所有后端使用相同的 `乘 → 加` 顺序（不使用FMA），因此与标量实现逐位一致。

use crate::soa::{CullPlane, SoaAabb8};
use crate::SimdBackend;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

/// 使用最优后端剔除8个包围盒
///
/// `active` 的第i位表示第i个包围盒参与测试，返回仍然存活的通道掩码。
pub fn cull_box_8(boxes: &SoaAabb8, planes: &[CullPlane; 4], active: u8) -> u8 {
    cull_box_8_with(SimdBackend::best_available(), boxes, planes, active)
}

/// 使用指定后端剔除8个包围盒
///
/// 当前CPU不支持该后端时回退到标量实现。
pub fn cull_box_8_with(
    backend: SimdBackend,
    boxes: &SoaAabb8,
    planes: &[CullPlane; 4],
    active: u8,
) -> u8 {
    if active == 0 {
        return 0;
    }

    #[cfg(target_arch = "x86_64")]
    {
        match backend {
            SimdBackend::Avx if is_x86_feature_detected!("avx") => {
                // SAFETY: AVX支持已在运行时检测
                return unsafe { cull_box_8_avx(boxes, planes, active) };
            }
            SimdBackend::Sse2 if is_x86_feature_detected!("sse2") => {
                // SAFETY: SSE2支持已在运行时检测
                return unsafe { cull_box_8_sse2(boxes, planes, active) };
            }
            _ => {}
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        if backend == SimdBackend::Neon && std::arch::is_aarch64_feature_detected!("neon") {
            // SAFETY: NEON支持已在运行时检测
            return unsafe { cull_box_8_neon(boxes, planes, active) };
        }
    }

    let _ = backend;
    cull_box_8_scalar(boxes, planes, active)
}

/// 标量参考实现
pub fn cull_box_8_scalar(boxes: &SoaAabb8, planes: &[CullPlane; 4], active: u8) -> u8 {
    let mut active = active;
    for plane in planes {
        if active == 0 {
            break;
        }

        let [ox, oy, oz] = plane.corner_offsets();
        let xs = boxes.axis(ox);
        let ys = boxes.axis(oy);
        let zs = boxes.axis(oz);

        let mut keep = 0u8;
        for lane in 0..8 {
            let mut dot = xs[lane] * plane.normal[0];
            dot += ys[lane] * plane.normal[1];
            dot += zs[lane] * plane.normal[2];
            if plane.dist < dot {
                keep |= 1 << lane;
            }
        }
        active &= keep;
    }
    active
}

/// SSE2实现：每个平面用两个128位寄存器覆盖8个通道
///
/// # Safety
///
/// 调用者必须确保当前CPU支持SSE2指令集（通过is_x86_feature_detected!检查）。
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
pub unsafe fn cull_box_8_sse2(boxes: &SoaAabb8, planes: &[CullPlane; 4], active: u8) -> u8 {
    let base = boxes.data.as_ptr();
    let mut active = active as i32;

    for plane in planes {
        if active == 0 {
            break;
        }

        let p = plane.as_vec4();
        let vplane = _mm_loadu_ps(p.as_ptr());
        let [ox, oy, oz] = plane.corner_offsets();

        let px = _mm_shuffle_ps(vplane, vplane, 0b00_00_00_00);
        let mut v0 = _mm_mul_ps(_mm_loadu_ps(base.add(ox)), px);
        let mut v1 = _mm_mul_ps(_mm_loadu_ps(base.add(ox + 4)), px);

        let py = _mm_shuffle_ps(vplane, vplane, 0b01_01_01_01);
        v0 = _mm_add_ps(v0, _mm_mul_ps(_mm_loadu_ps(base.add(oy)), py));
        v1 = _mm_add_ps(v1, _mm_mul_ps(_mm_loadu_ps(base.add(oy + 4)), py));

        let pz = _mm_shuffle_ps(vplane, vplane, 0b10_10_10_10);
        v0 = _mm_add_ps(v0, _mm_mul_ps(_mm_loadu_ps(base.add(oz)), pz));
        v1 = _mm_add_ps(v1, _mm_mul_ps(_mm_loadu_ps(base.add(oz + 4)), pz));

        let pd = _mm_shuffle_ps(vplane, vplane, 0b11_11_11_11);
        active &= _mm_movemask_ps(_mm_cmplt_ps(pd, v0)) | (_mm_movemask_ps(_mm_cmplt_ps(pd, v1)) << 4);
    }

    active as u8
}

/// AVX实现：一个256位寄存器正好容纳8个通道
///
/// # Safety
///
/// 调用者必须确保当前CPU支持AVX指令集（通过is_x86_feature_detected!检查）。
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
pub unsafe fn cull_box_8_avx(boxes: &SoaAabb8, planes: &[CullPlane; 4], active: u8) -> u8 {
    let base = boxes.data.as_ptr();
    let mut active = active as i32;

    for plane in planes {
        if active == 0 {
            break;
        }

        let [ox, oy, oz] = plane.corner_offsets();

        let mut v = _mm256_mul_ps(_mm256_loadu_ps(base.add(ox)), _mm256_set1_ps(plane.normal[0]));
        v = _mm256_add_ps(v, _mm256_mul_ps(_mm256_loadu_ps(base.add(oy)), _mm256_set1_ps(plane.normal[1])));
        v = _mm256_add_ps(v, _mm256_mul_ps(_mm256_loadu_ps(base.add(oz)), _mm256_set1_ps(plane.normal[2])));

        let pd = _mm256_set1_ps(plane.dist);
        active &= _mm256_movemask_ps(_mm256_cmp_ps(pd, v, _CMP_LT_OQ));
    }

    active as u8
}

/// NEON实现：每个平面用两个128位寄存器覆盖8个通道
///
/// # Safety
///
/// 调用者必须确保当前CPU支持NEON指令集（在aarch64上是强制支持的）。
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub unsafe fn cull_box_8_neon(boxes: &SoaAabb8, planes: &[CullPlane; 4], active: u8) -> u8 {
    let base = boxes.data.as_ptr();
    let lane_bits: [u32; 4] = [1, 2, 4, 8];
    let bits = vld1q_u32(lane_bits.as_ptr());
    let mut active = active as u32;

    for plane in planes {
        if active == 0 {
            break;
        }

        let [ox, oy, oz] = plane.corner_offsets();

        let px = vdupq_n_f32(plane.normal[0]);
        let mut v0 = vmulq_f32(vld1q_f32(base.add(ox)), px);
        let mut v1 = vmulq_f32(vld1q_f32(base.add(ox + 4)), px);

        let py = vdupq_n_f32(plane.normal[1]);
        v0 = vaddq_f32(v0, vmulq_f32(vld1q_f32(base.add(oy)), py));
        v1 = vaddq_f32(v1, vmulq_f32(vld1q_f32(base.add(oy + 4)), py));

        let pz = vdupq_n_f32(plane.normal[2]);
        v0 = vaddq_f32(v0, vmulq_f32(vld1q_f32(base.add(oz)), pz));
        v1 = vaddq_f32(v1, vmulq_f32(vld1q_f32(base.add(oz + 4)), pz));

        let pd = vdupq_n_f32(plane.dist);
        let lo = vaddvq_u32(vandq_u32(vcltq_f32(pd, v0), bits));
        let hi = vaddvq_u32(vandq_u32(vcltq_f32(pd, v1), bits));
        active &= lo | (hi << 4);
    }

    active as u8
}
