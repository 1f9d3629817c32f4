//! MPEG-1/2/2.5 Layer I/II/III 音频分包.
//!
//! # 帧头 (4 字节)
//! ```text
//! AAAAAAAA AAABBCCD EEEEFFGH IIJJKLMM
//! A: 同步 (11 位)     B: 版本       C: Layer      D: 无 CRC
//! E: 码率索引         F: 采样率索引 G: 填充       H: 私有位
//! I: 声道模式         J: 模式扩展   K: 版权       L: 原始   M: 加重
//! ```
//!
//! 帧头没有校验, 候选帧只有在其后的帧头也兼容时才被接受 (双同步检查).
//! 码率索引为 0 (自由码率) 时帧长未知, 以下一个兼容的自由码率帧头为界,
//! 得到的帧长被缓存并用于之后的帧.

use log::debug;
use tao_core::timestamp::is_valid;
use tao_core::{TaoError, TaoResult, TimestampClock};

use crate::access_unit::AccessUnit;
use crate::bytestream::ByteCursor;
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::stream_config::StreamConfig;

/// 帧头大小 (字节)
pub const HEADER_SIZE: usize = 4;

/// 自由码率帧的最大长度
pub const MAX_FREE_FRAME_SIZE: usize = 4096;

// kbps
const BITRATE_V1_L1: [u32; 15] = [
    0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
const BITRATE_V1_L2: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
const BITRATE_V1_L3: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATE_V2_L1: [u32; 15] = [
    0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];
const BITRATE_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLERATE_V1: [u32; 3] = [44100, 48000, 32000];

/// MPEG 版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    /// MPEG-1
    Mpeg1,
    /// MPEG-2 LSF
    Mpeg2,
    /// MPEG-2.5
    Mpeg25,
}

/// 声道模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// 立体声
    Stereo,
    /// 联合立体声
    JointStereo,
    /// 双声道
    DualChannel,
    /// 单声道
    SingleChannel,
}

/// MPEG 音频帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegAudioHeader {
    /// 版本
    pub version: MpegVersion,
    /// Layer (1..=3)
    pub layer: u8,
    /// 帧头后是否有 16 位 CRC
    pub has_crc: bool,
    /// 码率 (kbps), 0 表示自由码率
    pub bitrate: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 填充位
    pub padding: bool,
    /// 声道模式
    pub mode: ChannelMode,
}

impl MpegAudioHeader {
    /// 解析 4 字节帧头
    pub fn parse(bytes: [u8; HEADER_SIZE]) -> TaoResult<Self> {
        let header = u32::from_be_bytes(bytes);
        if header & 0xFFE0_0000 != 0xFFE0_0000 {
            return Err(TaoError::InvalidData("MPEG 音频: 同步字非法".into()));
        }
        let version = match (header >> 19) & 0x3 {
            3 => MpegVersion::Mpeg1,
            2 => MpegVersion::Mpeg2,
            0 => MpegVersion::Mpeg25,
            _ => return Err(TaoError::InvalidData("MPEG 音频: 保留的版本号".into())),
        };
        let layer = match (header >> 17) & 0x3 {
            3 => 1,
            2 => 2,
            1 => 3,
            _ => return Err(TaoError::InvalidData("MPEG 音频: 保留的 Layer".into())),
        };
        let has_crc = (header >> 16) & 0x1 == 0;
        let bitrate_index = ((header >> 12) & 0xF) as usize;
        let samplerate_index = ((header >> 10) & 0x3) as usize;
        if bitrate_index == 15 || samplerate_index == 3 {
            return Err(TaoError::InvalidData(format!(
                "MPEG 音频: 码率或采样率索引非法, bitrate_index={}, samplerate_index={}",
                bitrate_index, samplerate_index
            )));
        }
        if header & 0x3 == 2 {
            return Err(TaoError::InvalidData("MPEG 音频: 保留的加重类型".into()));
        }

        let table = match (version, layer) {
            (MpegVersion::Mpeg1, 1) => &BITRATE_V1_L1,
            (MpegVersion::Mpeg1, 2) => &BITRATE_V1_L2,
            (MpegVersion::Mpeg1, _) => &BITRATE_V1_L3,
            (_, 1) => &BITRATE_V2_L1,
            _ => &BITRATE_V2_L23,
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLERATE_V1[samplerate_index],
            MpegVersion::Mpeg2 => SAMPLERATE_V1[samplerate_index] / 2,
            MpegVersion::Mpeg25 => SAMPLERATE_V1[samplerate_index] / 4,
        };
        let mode = match (header >> 6) & 0x3 {
            0 => ChannelMode::Stereo,
            1 => ChannelMode::JointStereo,
            2 => ChannelMode::DualChannel,
            _ => ChannelMode::SingleChannel,
        };

        Ok(Self {
            version,
            layer,
            has_crc,
            bitrate: table[bitrate_index],
            sample_rate,
            padding: (header >> 9) & 0x1 == 1,
            mode,
        })
    }

    /// 是否为自由码率
    pub fn is_free_format(&self) -> bool {
        self.bitrate == 0
    }

    /// 声道数
    pub fn channels(&self) -> u32 {
        if self.mode == ChannelMode::SingleChannel {
            1
        } else {
            2
        }
    }

    /// 每帧样本数
    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (1, _) => 384,
            (2, _) | (_, MpegVersion::Mpeg1) => 1152,
            _ => 576,
        }
    }

    /// 填充字节数 (Layer I 的 slot 为 4 字节)
    pub fn padding_size(&self) -> usize {
        match (self.padding, self.layer) {
            (false, _) => 0,
            (true, 1) => 4,
            (true, _) => 1,
        }
    }

    /// 帧长 (含帧头), 自由码率返回 None
    pub fn frame_size(&self) -> Option<usize> {
        if self.is_free_format() || self.sample_rate == 0 {
            return None;
        }
        let bitrate = self.bitrate as usize * 1000;
        let sample_rate = self.sample_rate as usize;
        let size = match self.layer {
            1 => 12 * bitrate / sample_rate * 4,
            2 => 144 * bitrate / sample_rate,
            _ if self.version == MpegVersion::Mpeg1 => 144 * bitrate / sample_rate,
            _ => 72 * bitrate / sample_rate,
        };
        Some(size + self.padding_size())
    }

    /// 后续帧头是否与本帧属于同一条流
    pub fn is_compatible(&self, next: &Self) -> bool {
        self.version == next.version
            && self.layer == next.layer
            && self.sample_rate == next.sample_rate
            && self.channels() == next.channels()
            && self.is_free_format() == next.is_free_format()
    }
}

fn peek_header(cursor: &ByteCursor, offset: usize) -> Option<[u8; HEADER_SIZE]> {
    let mut bytes = [0u8; HEADER_SIZE];
    cursor.peek_at(offset, &mut bytes).then_some(bytes)
}

/// MPEG 音频语法解析器
pub struct MpegAudioParser {
    codec_id: CodecId,
    /// 当前帧的帧头
    header: Option<MpegAudioHeader>,
    /// 缓存的自由码率帧长 (不含填充)
    free_frame_size: Option<usize>,
    clock: TimestampClock,
}

impl MpegAudioParser {
    /// 创建解析器; Layer 以码流为准, `codec_id` 仅用于标识
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            codec_id: config.codec_id,
            header: None,
            free_frame_size: None,
            clock: TimestampClock::new(0, 1),
        }
    }

    /// 最近解析的帧头
    pub fn header(&self) -> Option<&MpegAudioHeader> {
        self.header.as_ref()
    }

    /// 已确定的自由码率帧长
    pub fn free_frame_size(&self) -> Option<usize> {
        self.free_frame_size
    }
}

impl SyntaxParser for MpegAudioParser {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn sync_len(&self) -> usize {
        2
    }

    fn is_sync(&self, window: &[u8]) -> bool {
        window[0] == 0xFF && window[1] & 0xE0 == 0xE0
    }

    fn min_unit_size(&self) -> usize {
        HEADER_SIZE + 1
    }

    fn max_unit_size(&self) -> Option<usize> {
        Some(MAX_FREE_FRAME_SIZE)
    }

    fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound> {
        let Some(bytes) = peek_header(cursor, 0) else {
            return Verdict::NeedMoreData;
        };
        let Ok(header) = MpegAudioHeader::parse(bytes) else {
            return Verdict::Reject;
        };
        let previous = self.header.replace(header);

        if let Some(size) = header.frame_size() {
            return Verdict::Ready(FrameBound::Exact(size));
        }
        match self.free_frame_size {
            Some(size) if previous.is_some_and(|prev| prev.is_compatible(&header)) => {
                Verdict::Ready(FrameBound::Exact(size + header.padding_size()))
            }
            _ => {
                self.free_frame_size = None;
                Verdict::Ready(FrameBound::NextSync)
            }
        }
    }

    fn check_next(&mut self, cursor: &ByteCursor, size: usize, at_end: bool) -> Verdict<()> {
        let Some(current) = self.header else {
            return Verdict::Reject;
        };
        let Some(bytes) = peek_header(cursor, size) else {
            return if at_end {
                Verdict::Ready(())
            } else {
                Verdict::NeedMoreData
            };
        };
        match MpegAudioHeader::parse(bytes) {
            Ok(next) if current.is_compatible(&next) => Verdict::Ready(()),
            _ => {
                if current.is_free_format() && self.free_frame_size.take().is_some() {
                    debug!("MPEG 音频: 自由码率帧长失效, 重新探测");
                }
                Verdict::Reject
            }
        }
    }

    fn check_boundary(&mut self, cursor: &ByteCursor, offset: usize, at_end: bool) -> Verdict<bool> {
        let Some(current) = self.header else {
            return Verdict::Reject;
        };
        if offset > MAX_FREE_FRAME_SIZE {
            return Verdict::Reject;
        }
        if at_end {
            return Verdict::Ready(true);
        }
        let Some(bytes) = peek_header(cursor, offset) else {
            return Verdict::NeedMoreData;
        };
        match MpegAudioHeader::parse(bytes) {
            Ok(next) if current.is_compatible(&next) => {
                let size = offset - current.padding_size();
                debug!("MPEG 音频: 自由码率帧长为 {} 字节", size);
                self.free_frame_size = Some(size);
                Verdict::Ready(true)
            }
            _ => Verdict::Ready(false),
        }
    }

    fn reset(&mut self, _broken: bool) {
        self.header = None;
        self.free_frame_size = None;
        self.clock.reset();
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        let bytes: [u8; HEADER_SIZE] = unit.data.get(..HEADER_SIZE)?.try_into().ok()?;
        let header = MpegAudioHeader::parse(bytes).ok()?;

        self.clock.change_rate(header.sample_rate, 1);
        let pts = if is_valid(unit.pts) { unit.pts } else { unit.dts };
        if is_valid(pts) {
            self.clock.set(pts);
        }
        let samples = header.samples_per_frame();
        let mut au = AccessUnit::new(unit.data);
        au.pts = self.clock.get();
        au.dts = au.pts;
        au.duration = self.clock.duration_of(samples);
        self.clock.increment(samples);
        Some(au)
    }
}

/// 创建 MPEG 音频分包器
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    Ok(Box::new(Packetizer::new(MpegAudioParser::new(config))))
}
