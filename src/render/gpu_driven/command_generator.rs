//! GPU命令生成模块
//!
//! 收集阶段把每个待提交调用的命令模板复制到本次分配的命令区间，并写入实例范围。
//!
//! 实例范围编码在重映射表里：`inst = first_instance * max_instances + (num_instances - 1)`，
//! 解码时 `instance_count = inst % max_instances + 1`，`first_instance = inst / max_instances`。
//! 模板的索引计数为零（本帧没有可见表面）时实例数写零。
//!
//! `call_stride` 非零时（多重间接绘制），第 `i` 条命令的 `first_instance` 额外加上 `i * call_stride`，
//! 着色器从 `instance_index` 中同时解出调用序号和实例槽位，见 [`split_tagged_instance`]。

use super::indirect::DrawIndexedIndirectArgs;

/// 调用重映射
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CallRemap {
    /// 命令模板槽位
    pub src: u32,
    /// 编码的实例范围
    pub inst: u32,
}

impl CallRemap {
    /// 编码实例范围
    pub fn new(src: u32, first_instance: u32, num_instances: u32, max_instances: u32) -> Self {
        debug_assert!(num_instances > 0 && num_instances <= max_instances);
        Self {
            src,
            inst: first_instance * max_instances + (num_instances - 1),
        }
    }

    /// 解码为 `(first_instance, num_instances)`
    pub fn instances(&self, max_instances: u32) -> (u32, u32) {
        (self.inst / max_instances, self.inst % max_instances + 1)
    }
}

/// 收集阶段参数
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GatherParams {
    pub max_instances: u32,
    /// 重映射条目数
    pub count: u32,
    /// 调用序号编码步长，0 表示不编码
    pub call_stride: u32,
    pub _pad: u32,
}

/// 收集一条命令
#[inline]
pub fn gather_command(
    template: &DrawIndexedIndirectArgs,
    remap: CallRemap,
    max_instances: u32,
) -> DrawIndexedIndirectArgs {
    gather_tagged_command(template, remap, max_instances, 0, 0)
}

/// 收集第 `call` 条命令，并把调用序号编码进 `first_instance`
#[inline]
pub fn gather_tagged_command(
    template: &DrawIndexedIndirectArgs,
    remap: CallRemap,
    max_instances: u32,
    call: u32,
    call_stride: u32,
) -> DrawIndexedIndirectArgs {
    let mut cmd = *template;
    cmd.instance_count = if cmd.index_count == 0 {
        0
    } else {
        remap.inst % max_instances + 1
    };
    cmd.first_instance = (remap.inst / max_instances).wrapping_add(call.wrapping_mul(call_stride));
    cmd
}

/// 把着色器看到的实例序号拆成 `(调用序号, 实例槽位)`
#[inline]
pub fn split_tagged_instance(instance: u32, call_stride: u32) -> (u32, u32) {
    if call_stride == 0 {
        (0, instance)
    } else {
        (instance / call_stride, instance % call_stride)
    }
}

/// 收集计算着色器
pub const GATHER_INDIRECT_SHADER: &str = r#"
struct GatherParams {
    max_instances: u32,
    count: u32,
    call_stride: u32,
    _pad0: u32,
};

struct DrawCmd {
    index_count: u32,
    instance_count: u32,
    first_index: u32,
    base_vertex: i32,
    first_instance: u32,
};

struct CallRemap {
    src: u32,
    inst: u32,
};

@group(0) @binding(0) var<uniform> params: GatherParams;
@group(0) @binding(1) var<storage, read> src: array<DrawCmd>;
@group(0) @binding(2) var<storage, read_write> dst: array<DrawCmd>;
@group(0) @binding(3) var<storage, read> remap: array<CallRemap>;

@compute @workgroup_size(WORKGROUP_SIZE)
fn gather_indirect(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if (i >= params.count) {
        return;
    }

    let r = remap[i];
    var cmd = src[r.src];
    if (cmd.index_count == 0u) {
        cmd.instance_count = 0u;
    } else {
        cmd.instance_count = r.inst % params.max_instances + 1u;
    }
    cmd.first_instance = r.inst / params.max_instances + i * params.call_stride;
    dst[i] = cmd;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn template(index_count: u32) -> DrawIndexedIndirectArgs {
        DrawIndexedIndirectArgs {
            index_count,
            instance_count: 0,
            first_index: 42,
            base_vertex: 0,
            first_instance: 0,
        }
    }

    #[test]
    fn test_remap_encoding() {
        let remap = CallRemap::new(3, 5, 1, 1024);
        assert_eq!(remap.inst, 5 * 1024);
        let remap = CallRemap::new(3, 0, 1024, 1024);
        assert_eq!(remap.inst, 1023);
        assert_eq!(remap.instances(1024), (0, 1024));
    }

    #[test]
    fn test_gather_copies_template() {
        let cmd = gather_command(&template(12), CallRemap::new(0, 7, 3, 16), 16);
        assert_eq!(cmd.index_count, 12);
        assert_eq!(cmd.first_index, 42);
        assert_eq!(cmd.instance_count, 3);
        assert_eq!(cmd.first_instance, 7);
    }

    #[test]
    fn test_gather_empty_group_draws_nothing() {
        let cmd = gather_command(&template(0), CallRemap::new(0, 2, 4, 16), 16);
        assert_eq!(cmd.instance_count, 0);
        assert_eq!(cmd.first_instance, 2);
    }

    #[test]
    fn test_tagged_gather_encodes_call() {
        let stride = 4097;
        let remap = CallRemap::new(0, 7, 3, 16);
        let cmd = gather_tagged_command(&template(12), remap, 16, 5, stride);
        assert_eq!(cmd.instance_count, 3);
        assert_eq!(cmd.first_instance, 5 * stride + 7);
        for k in 0..cmd.instance_count {
            assert_eq!(split_tagged_instance(cmd.first_instance + k, stride), (5, 7 + k));
        }

        // 步长为零时与普通收集一致
        assert_eq!(
            gather_tagged_command(&template(12), remap, 16, 5, 0),
            gather_command(&template(12), remap, 16)
        );
        assert_eq!(split_tagged_instance(9, 0), (0, 9));
    }

    #[test]
    fn test_gather_params_layout() {
        assert_eq!(std::mem::size_of::<GatherParams>(), 16);
        assert_eq!(std::mem::size_of::<CallRemap>(), 8);
        assert!(GATHER_INDIRECT_SHADER.contains("WORKGROUP_SIZE"));
    }

    proptest! {
        #[test]
        fn test_remap_decodes_instance_range(
            first in 0u32..4097,
            count in 1u32..=1024,
        ) {
            let remap = CallRemap::new(0, first, count, 1024);
            prop_assert_eq!(remap.instances(1024), (first, count));
            let cmd = gather_command(&template(6), remap, 1024);
            prop_assert_eq!((cmd.first_instance, cmd.instance_count), (first, count));
        }
    }
}
