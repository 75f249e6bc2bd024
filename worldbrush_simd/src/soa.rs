//! SoA包围盒布局
//!
//! 8个包围盒按轴打包为 `xmin[8] xmax[8] ymin[8] ymax[8] zmin[8] zmax[8]`，
//! 每个轴的min/max各占一个256位（或两个128位）寄存器宽度。

use glam::Vec3;

/// 每个SoA包中的包围盒数量
pub const SOA_LANES: usize = 8;

/// 8个包围盒的SoA打包
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoaAabb8 {
    /// 按轴排列的min/max分量，共48个float
    pub data: [f32; 48],
}

impl Default for SoaAabb8 {
    fn default() -> Self {
        Self { data: [0.0; 48] }
    }
}

impl SoaAabb8 {
    /// x轴最小值的偏移
    pub const X_MIN: usize = 0;
    /// x轴最大值的偏移
    pub const X_MAX: usize = 8;
    /// y轴最小值的偏移
    pub const Y_MIN: usize = 16;
    /// y轴最大值的偏移
    pub const Y_MAX: usize = 24;
    /// z轴最小值的偏移
    pub const Z_MIN: usize = 32;
    /// z轴最大值的偏移
    pub const Z_MAX: usize = 40;

    /// 写入第 `lane` 个包围盒
    pub fn set(&mut self, lane: usize, mins: [f32; 3], maxs: [f32; 3]) {
        debug_assert!(lane < SOA_LANES, "lane {} out of range", lane);
        for axis in 0..3 {
            self.data[axis * 16 + lane] = mins[axis];
            self.data[axis * 16 + 8 + lane] = maxs[axis];
        }
    }

    /// 读取第 `lane` 个包围盒
    pub fn get(&self, lane: usize) -> ([f32; 3], [f32; 3]) {
        let mut mins = [0.0; 3];
        let mut maxs = [0.0; 3];
        for axis in 0..3 {
            mins[axis] = self.data[axis * 16 + lane];
            maxs[axis] = self.data[axis * 16 + 8 + lane];
        }
        (mins, maxs)
    }

    /// 把任意数量的包围盒打包为 `ceil(n / 8)` 个SoA包
    ///
    /// 末尾不足8个的空位保持为零盒，调用者通过活动掩码屏蔽。
    pub fn pack(boxes: &[(Vec3, Vec3)]) -> Vec<SoaAabb8> {
        boxes
            .chunks(SOA_LANES)
            .map(|chunk| {
                let mut soa = SoaAabb8::default();
                for (lane, (mins, maxs)) in chunk.iter().enumerate() {
                    soa.set(lane, mins.to_array(), maxs.to_array());
                }
                soa
            })
            .collect()
    }

    /// 指定轴的min或max分量切片（8个float）
    #[inline]
    pub(crate) fn axis(&self, offset: usize) -> [f32; 8] {
        let mut lanes = [0.0; 8];
        lanes.copy_from_slice(&self.data[offset..offset + 8]);
        lanes
    }
}

/// 剔除平面
///
/// `normal · p > dist` 的点位于平面内侧。`signbits` 的第k位表示法向量第k个分量为负。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullPlane {
    /// 法向量
    pub normal: [f32; 3],
    /// 有符号距离
    pub dist: f32,
    /// 法向量分量符号位
    pub signbits: u8,
}

impl CullPlane {
    /// 创建平面并计算符号位
    pub fn new(normal: [f32; 3], dist: f32) -> Self {
        let mut signbits = 0u8;
        for (axis, n) in normal.iter().enumerate() {
            if *n < 0.0 {
                signbits |= 1 << axis;
            }
        }
        Self {
            normal,
            dist,
            signbits,
        }
    }

    /// `normal` 与 `dist` 组成的4分量向量
    #[inline]
    pub fn as_vec4(&self) -> [f32; 4] {
        [self.normal[0], self.normal[1], self.normal[2], self.dist]
    }

    /// 按符号位选择每个轴应投影的min/max偏移
    #[inline]
    pub(crate) fn corner_offsets(&self) -> [usize; 3] {
        [
            if self.signbits & 1 != 0 { SoaAabb8::X_MIN } else { SoaAabb8::X_MAX },
            if self.signbits & 2 != 0 { SoaAabb8::Y_MIN } else { SoaAabb8::Y_MAX },
            if self.signbits & 4 != 0 { SoaAabb8::Z_MIN } else { SoaAabb8::Z_MAX },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_lane() {
        let mut soa = SoaAabb8::default();
        soa.set(3, [1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);
        assert_eq!(soa.get(3), ([1.0, 2.0, 3.0], [4.0, 5.0, 6.0]));
        assert_eq!(soa.data[SoaAabb8::Y_MAX + 3], 5.0);
        assert_eq!(soa.get(0), ([0.0; 3], [0.0; 3]));
    }

    #[test]
    fn test_pack_partial_chunk() {
        let boxes: Vec<_> = (0..10)
            .map(|i| (Vec3::splat(i as f32), Vec3::splat(i as f32 + 1.0)))
            .collect();
        let packed = SoaAabb8::pack(&boxes);
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[1].get(1), ([9.0; 3], [10.0; 3]));
    }

    #[test]
    fn test_signbits() {
        let plane = CullPlane::new([-1.0, 0.5, -0.0], 2.0);
        assert_eq!(plane.signbits, 0b001);
        assert_eq!(plane.corner_offsets(), [SoaAabb8::X_MIN, SoaAabb8::Y_MAX, SoaAabb8::Z_MAX]);
        let plane = CullPlane::new([0.0, -1.0, -1.0], 0.0);
        assert_eq!(plane.signbits, 0b110);
    }
}
