//! ADTS (Audio Data Transport Stream) 帧头.
//!
//! ```text
//! AAAAAAAA AAAABCCD EEFFFFGH HHIJKLMM MMMMMMMM MMMOOOOO OOOOOOPP (QQQQQQQQ QQQQQQQQ)
//! A: 同步 (12 位)  B: MPEG 版本  C: Layer (恒为 0)  D: 无 CRC
//! E: profile       F: 采样率索引 G: 私有位          H: 声道配置
//! M: 帧长 (含帧头) O: 缓冲区满度 P: 原始数据块数 - 1 Q: CRC
//! ```

use tao_core::{TaoError, TaoResult};

use super::asc::{build_asc, SAMPLE_RATES};

/// 无 CRC 的帧头大小
pub const HEADER_SIZE: usize = 7;
/// 带 CRC 的帧头大小
pub const HEADER_SIZE_CRC: usize = 9;

/// ADTS 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-2 (true) 或 MPEG-4 (false)
    pub mpeg2: bool,
    /// 帧头后是否带 CRC
    pub has_crc: bool,
    /// audioObjectType - 1
    pub profile: u8,
    /// 采样率索引
    pub sample_rate_index: u8,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道配置 (0 表示由码流内 PCE 定义)
    pub channel_config: u8,
    /// 帧长 (含帧头)
    pub frame_length: usize,
    /// 原始数据块数
    pub raw_data_blocks: u32,
}

impl AdtsHeader {
    /// 解析帧头, `data` 至少 7 字节
    pub fn parse(data: &[u8]) -> TaoResult<Self> {
        let Some(h) = data.get(..HEADER_SIZE) else {
            return Err(TaoError::NeedMoreData);
        };
        if h[0] != 0xFF || h[1] & 0xF0 != 0xF0 {
            return Err(TaoError::InvalidData("ADTS: 同步字非法".into()));
        }
        if (h[1] >> 1) & 0x03 != 0 {
            return Err(TaoError::InvalidData("ADTS: layer 字段必须为 0".into()));
        }
        let has_crc = h[1] & 0x01 == 0;
        let profile = (h[2] >> 6) & 0x03;
        let sample_rate_index = (h[2] >> 2) & 0x0F;
        let sample_rate = SAMPLE_RATES[sample_rate_index as usize];
        if sample_rate_index >= 13 {
            return Err(TaoError::InvalidData(format!(
                "ADTS: 采样率索引非法, index={}",
                sample_rate_index
            )));
        }
        let channel_config = ((h[2] & 0x01) << 2) | ((h[3] >> 6) & 0x03);
        let frame_length = ((usize::from(h[3]) & 0x03) << 11)
            | (usize::from(h[4]) << 3)
            | (usize::from(h[5]) >> 5);
        let raw_data_blocks = u32::from(h[6] & 0x03) + 1;

        let header = Self {
            mpeg2: h[1] & 0x08 != 0,
            has_crc,
            profile,
            sample_rate_index,
            sample_rate,
            channel_config,
            frame_length,
            raw_data_blocks,
        };
        if frame_length <= header.header_size() {
            return Err(TaoError::InvalidData(format!(
                "ADTS: 帧长过小, frame_length={}",
                frame_length
            )));
        }
        Ok(header)
    }

    /// 帧头大小 (含 CRC)
    pub fn header_size(&self) -> usize {
        if self.has_crc {
            HEADER_SIZE_CRC
        } else {
            HEADER_SIZE
        }
    }

    /// 负载字节数
    pub fn payload_size(&self) -> usize {
        self.frame_length - self.header_size()
    }

    /// 每帧样本数
    pub fn samples(&self) -> u32 {
        1024 * self.raw_data_blocks
    }

    /// 由帧头字段合成的 AudioSpecificConfig
    pub fn audio_specific_config(&self) -> [u8; 2] {
        build_asc(
            u32::from(self.profile) + 1,
            u32::from(self.sample_rate_index),
            u32::from(self.channel_config),
        )
    }

    /// 后续帧头是否属于同一条流
    pub fn is_compatible(&self, next: &Self) -> bool {
        self.sample_rate_index == next.sample_rate_index
            && self.channel_config == next.channel_config
            && self.profile == next.profile
    }
}
