//! 基本流配置.

use bytes::Bytes;
use tao_core::Rational;

use crate::codec_id::CodecId;

/// 单路基本流的配置
///
/// `extradata` 为容器提供的配置数据 (如 avcC, AudioSpecificConfig,
/// FLAC STREAMINFO), 在任何数据之前被送入分包器以初始化解析上下文.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// 编码标识
    pub codec_id: CodecId,
    /// 编码私有配置数据
    pub extradata: Bytes,
    /// 容器声明的帧率, 用于缺少时间戳时插值
    pub frame_rate: Option<Rational>,
    /// 每个片段恰为一个完整访问单元 (如长度前缀 AVC, 原始 AAC, ASF 中的 VC-1)
    pub packetized: bool,
}

impl StreamConfig {
    /// 创建无附加配置的流配置
    pub fn new(codec_id: CodecId) -> Self {
        Self {
            codec_id,
            extradata: Bytes::new(),
            frame_rate: None,
            packetized: false,
        }
    }

    /// 设置 extradata
    pub fn with_extradata(mut self, extradata: impl Into<Bytes>) -> Self {
        self.extradata = extradata.into();
        self
    }

    /// 设置帧率
    pub fn with_frame_rate(mut self, frame_rate: Rational) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// 声明输入已按访问单元切分
    pub fn with_packetized(mut self, packetized: bool) -> Self {
        self.packetized = packetized;
        self
    }

    /// 有效帧率 (分子分母均非零)
    pub fn valid_frame_rate(&self) -> Option<Rational> {
        self.frame_rate.filter(Rational::is_valid)
    }
}
