//! 输入片段 (Fragment).
//!
//! 解复用器产出的一段基本流字节, 附带可选的粗粒度时间戳与标志.
//! 片段被分包器消费恰好一次.

use bitflags::bitflags;
use bytes::Bytes;
use tao_core::NOPTS_VALUE;

bitflags! {
    /// 片段标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FragmentFlags: u32 {
        /// 与前一片段不连续 (如跳转), 丢弃进行中的访问单元但保留配置
        const DISCONTINUITY   = 1 << 0;
        /// 上游检测到损坏, 片段本身被丢弃, 解析状态完全重置
        const CORRUPTED       = 1 << 1;
        /// 序列结束
        const END_OF_SEQUENCE = 1 << 2;
        /// 调用方声明本片段结束一个访问单元
        const AU_END          = 1 << 3;
    }
}

/// 输入片段
#[derive(Debug, Clone)]
pub struct Fragment {
    /// 原始字节
    pub data: Bytes,
    /// 显示时间戳 (微秒), `NOPTS_VALUE` 表示缺失
    pub pts: i64,
    /// 解码时间戳 (微秒), `NOPTS_VALUE` 表示缺失
    pub dts: i64,
    /// 标志
    pub flags: FragmentFlags,
}

impl Fragment {
    /// 创建无时间戳的片段
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            flags: FragmentFlags::empty(),
        }
    }

    /// 设置时间戳
    pub fn with_timestamps(mut self, pts: i64, dts: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    /// 追加标志
    pub fn with_flags(mut self, flags: FragmentFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// 数据大小 (字节)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否不含数据
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 是否携带任一时间戳
    pub fn has_timestamp(&self) -> bool {
        self.pts != NOPTS_VALUE || self.dts != NOPTS_VALUE
    }
}
