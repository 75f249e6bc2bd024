//! 视锥体
//!
//! 世界渲染只使用左右上下4个侧平面（不做近远裁剪）。平面内侧满足 `normal · p > dist`，
//! 每个平面预先计算符号位，供8路SIMD剔除和GPU标记阶段共用同一判定。

use glam::{Mat4, Vec3, Vec4};
use worldbrush_simd::CullPlane;

/// 平面表示（法向量和距离）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// 法向量
    pub normal: Vec3,
    /// 到原点的距离
    pub dist: f32,
    /// 法向量分量为负的轴
    pub signbits: u8,
}

impl Plane {
    /// 创建平面并计算符号位
    pub fn new(normal: Vec3, dist: f32) -> Self {
        let mut signbits = 0;
        for axis in 0..3 {
            if normal[axis] < 0.0 {
                signbits |= 1 << axis;
            }
        }
        Self {
            normal,
            dist,
            signbits,
        }
    }

    /// 经过 `point` 且法向量为 `normal` 的平面
    pub fn through(normal: Vec3, point: Vec3) -> Self {
        Self::new(normal, normal.dot(point))
    }

    /// 计算点到平面的有符号距离
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.dist
    }

    /// 包围盒在法向量方向上最远的角点
    #[inline]
    pub fn far_corner(&self, mins: Vec3, maxs: Vec3) -> Vec3 {
        Vec3::new(
            if self.signbits & 1 != 0 { mins.x } else { maxs.x },
            if self.signbits & 2 != 0 { mins.y } else { maxs.y },
            if self.signbits & 4 != 0 { mins.z } else { maxs.z },
        )
    }

    /// 包围盒完全位于平面外侧
    ///
    /// 与8路剔除使用相同的乘加顺序。
    #[inline]
    pub fn box_outside(&self, mins: Vec3, maxs: Vec3) -> bool {
        let c = self.far_corner(mins, maxs);
        let mut dot = c.x * self.normal.x;
        dot += c.y * self.normal.y;
        dot += c.z * self.normal.z;
        !(self.dist < dot)
    }

    /// `(nx, ny, nz, dist)`
    pub fn as_vec4(&self) -> Vec4 {
        self.normal.extend(self.dist)
    }

    /// 转换为SIMD剔除平面
    pub fn to_cull_plane(&self) -> CullPlane {
        CullPlane::new(self.normal.to_array(), self.dist)
    }
}

/// 4个侧平面组成的视锥体
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 4],
}

impl Frustum {
    pub fn new(planes: [Plane; 4]) -> Self {
        Self { planes }
    }

    /// 从视图投影矩阵提取侧平面
    ///
    /// 参考: Gribb & Hartmann, "Fast Extraction of Viewing Frustum Planes from the World-View-Projection Matrix"
    pub fn from_view_projection(view_proj: Mat4) -> Self {
        let m = view_proj;
        Self::new([
            // 左平面: row3 + row0
            Self::extract_plane(m.row(3) + m.row(0)),
            // 右平面: row3 - row0
            Self::extract_plane(m.row(3) - m.row(0)),
            // 下平面: row3 + row1
            Self::extract_plane(m.row(3) + m.row(1)),
            // 上平面: row3 - row1
            Self::extract_plane(m.row(3) - m.row(1)),
        ])
    }

    /// `a·x + d >= 0` 形式转为 `n·x > dist`
    fn extract_plane(plane_vec: Vec4) -> Plane {
        let normal = plane_vec.truncate();
        let len = normal.length();
        if len > 1e-6 {
            Plane::new(normal / len, -plane_vec.w / len)
        } else {
            Plane::new(normal, -plane_vec.w)
        }
    }

    /// 由视点和朝向向量构建（水平/垂直视场角，单位为度）
    pub fn from_view_vectors(
        origin: Vec3,
        forward: Vec3,
        right: Vec3,
        up: Vec3,
        fov_x: f32,
        fov_y: f32,
    ) -> Self {
        let (sx, cx) = (fov_x.to_radians() * 0.5).sin_cos();
        let (sy, cy) = (fov_y.to_radians() * 0.5).sin_cos();
        Self::new([
            Plane::through(forward * sx + right * cx, origin),
            Plane::through(forward * sx - right * cx, origin),
            Plane::through(forward * sy + up * cy, origin),
            Plane::through(forward * sy - up * cy, origin),
        ])
    }

    /// 包围盒是否被剔除
    pub fn cull_box(&self, mins: Vec3, maxs: Vec3) -> bool {
        self.planes.iter().any(|p| p.box_outside(mins, maxs))
    }

    /// 检查点是否在视锥体内
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.distance_to_point(point) > 0.0)
    }

    /// 转换为SIMD剔除平面
    pub fn to_cull_planes(&self) -> [CullPlane; 4] {
        self.planes.map(|p| p.to_cull_plane())
    }

    /// GPU常量缓冲区中的平面
    pub fn to_gpu(&self) -> [[f32; 4]; 4] {
        self.planes.map(|p| p.as_vec4().to_array())
    }
}
