//! 访问单元 (AccessUnit), 分包器的输出.

use bitflags::bitflags;
use bytes::Bytes;
use tao_core::NOPTS_VALUE;

use crate::cc::CcData;

bitflags! {
    /// 访问单元标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessUnitFlags: u32 {
        /// 帧内编码 (关键帧)
        const TYPE_I             = 1 << 0;
        /// 前向预测
        const TYPE_P             = 1 << 1;
        /// 双向预测
        const TYPE_B             = 1 << 2;
        /// 序列结束
        const END_OF_SEQUENCE    = 1 << 3;
        /// 不连续之后的第一个访问单元
        const DISCONTINUITY      = 1 << 4;
        /// 可解码但尚不可显示 (恢复点之前)
        const PREROLL            = 1 << 5;
        /// 顶场优先
        const TOP_FIELD_FIRST    = 1 << 6;
        /// 底场优先
        const BOTTOM_FIELD_FIRST = 1 << 7;
        /// 单场图像
        const SINGLE_FIELD       = 1 << 8;

        /// 帧类型掩码
        const TYPE_MASK = Self::TYPE_I.bits() | Self::TYPE_P.bits() | Self::TYPE_B.bits();
    }
}

/// 访问单元
///
/// 一个可独立送入解码器的编码帧, 字节布局为该编码解码器要求的格式.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// 编码数据
    pub data: Bytes,
    /// 显示时间戳 (微秒)
    pub pts: i64,
    /// 解码时间戳 (微秒)
    pub dts: i64,
    /// 时长 (微秒), 0 表示未知
    pub duration: i64,
    /// 标志
    pub flags: AccessUnitFlags,
    /// 附带的隐藏字幕数据
    pub captions: Option<CcData>,
}

impl AccessUnit {
    /// 从数据创建无时间戳的访问单元
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            duration: 0,
            flags: AccessUnitFlags::empty(),
            captions: None,
        }
    }

    /// 数据大小 (字节)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 是否为关键帧
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(AccessUnitFlags::TYPE_I)
    }

    /// 帧类型字符 (I/P/B), 未知为 '?'
    pub fn picture_type(&self) -> char {
        if self.flags.contains(AccessUnitFlags::TYPE_I) {
            'I'
        } else if self.flags.contains(AccessUnitFlags::TYPE_P) {
            'P'
        } else if self.flags.contains(AccessUnitFlags::TYPE_B) {
            'B'
        } else {
            '?'
        }
    }
}
