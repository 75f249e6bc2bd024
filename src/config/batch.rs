use super::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// 批处理容量配置
///
/// 替代固定大小的全局数组，所有容量在运行时配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    /// 每帧可见实体上限（实例缓冲区容量为 `max_visedicts + 1`，包含世界实体）
    pub max_visedicts: u32,

    /// 单次批处理的调用上限，达到后隐式刷新
    pub max_bmodel_draws: u32,

    /// 共享同一模型的实例合并上限
    pub max_bmodel_instances: u32,

    /// 间接命令缓冲区初始大小（字节）
    pub initial_command_buffer_bytes: u64,

    /// 计算着色器工作组大小
    pub workgroup_size: u32,

    /// 退役GPU缓冲区的延迟销毁帧数
    pub frames_in_flight: u32,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_visedicts: 4096,
            max_bmodel_draws: 4096,
            max_bmodel_instances: 1024,
            initial_command_buffer_bytes: 256 * 1024,
            workgroup_size: 64,
            frames_in_flight: 3,
        }
    }
}

impl BatchLimits {
    /// 实例缓冲区容量（+1 为世界实体）
    pub fn instance_capacity(&self) -> usize {
        self.max_visedicts as usize + 1
    }

    /// 覆盖 `n` 个工作项所需的工作组数量
    pub fn workgroups(&self, n: u32) -> u32 {
        n.div_ceil(self.workgroup_size)
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        let fields = [
            ("max_visedicts", self.max_visedicts as u64),
            ("max_bmodel_draws", self.max_bmodel_draws as u64),
            ("max_bmodel_instances", self.max_bmodel_instances as u64),
            ("initial_command_buffer_bytes", self.initial_command_buffer_bytes),
            ("workgroup_size", self.workgroup_size as u64),
            ("frames_in_flight", self.frames_in_flight as u64),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        // 重映射编码 first * max_instances + (n - 1) 必须能放进u32
        let packed = self.instance_capacity() as u64 * self.max_bmodel_instances as u64;
        if packed > u32::MAX as u64 {
            return Err(ConfigError::ValidationError(format!(
                "max_visedicts * max_bmodel_instances overflows the remap encoding ({})",
                packed
            )));
        }
        Ok(())
    }
}
