//! FLAC 帧分包.
//!
//! # 帧头
//! ```text
//! sync(14) + reserved(1) + blocking_strategy(1)
//! block_size(4) + sample_rate(4) + channels(4) + sample_size(3) + reserved(1)
//! 帧号/样本号 (UTF-8 风格, 1~7 字节)
//! [扩展块大小 8/16 位] [扩展采样率 8/16 位]
//! CRC-8
//! ```
//!
//! 帧头不给出帧长, 帧以下一个有效帧头为界, 整帧 (含末尾 CRC-16) 校验通过后才输出.
//! 采样率或位深编码为 0 的帧需要 STREAMINFO 才能解析.

use bytes::Bytes;
use log::{debug, warn};
use tao_core::bitreader::BitReader;
use tao_core::crc;
use tao_core::timestamp::is_valid;
use tao_core::{TaoError, TaoResult, TimestampClock};

use crate::access_unit::AccessUnit;
use crate::bytestream::ByteCursor;
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::stream_config::StreamConfig;

/// STREAMINFO 块大小
pub const STREAMINFO_SIZE: usize = 34;

/// 帧头最大长度: 4 + 7 (计数器) + 2 (块大小) + 2 (采样率) + 1 (CRC-8)
pub const MAX_HEADER_SIZE: usize = 16;

/// 文件头魔数
const MAGIC: &[u8; 4] = b"fLaC";

const METADATA_BLOCK_HEADER_SIZE: usize = 4;

const SAMPLE_RATES: [u32; 12] = [
    0, 88200, 176400, 192000, 8000, 16000, 22050, 24000, 32000, 44100, 48000, 96000,
];

const SAMPLE_SIZES: [u32; 8] = [0, 8, 12, 0, 16, 20, 24, 32];

/// FLAC STREAMINFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// 最小块大小 (样本)
    pub min_block_size: u32,
    /// 最大块大小 (样本)
    pub max_block_size: u32,
    /// 最小帧长 (字节), 0 表示未知
    pub min_frame_size: u32,
    /// 最大帧长 (字节), 0 表示未知
    pub max_frame_size: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道数
    pub channels: u32,
    /// 位深
    pub bits_per_sample: u32,
    /// 总样本数, 0 表示未知
    pub total_samples: u64,
    /// 原始 34 字节
    pub raw: [u8; STREAMINFO_SIZE],
}

impl StreamInfo {
    /// 解析 34 字节的 STREAMINFO 块体
    pub fn parse(data: &[u8]) -> TaoResult<Self> {
        let raw: [u8; STREAMINFO_SIZE] = data
            .get(..STREAMINFO_SIZE)
            .and_then(|body| body.try_into().ok())
            .ok_or_else(|| {
                TaoError::InvalidData(format!(
                    "FLAC: STREAMINFO 块大小不足: {} < {}",
                    data.len(),
                    STREAMINFO_SIZE
                ))
            })?;

        let mut br = BitReader::new(&raw);
        let min_block_size = br.read_bits(16)?;
        let max_block_size = br.read_bits(16)?;
        let min_frame_size = br.read_bits(24)?;
        let max_frame_size = br.read_bits(24)?;
        let sample_rate = br.read_bits(20)?;
        let channels = br.read_bits(3)? + 1;
        let bits_per_sample = br.read_bits(5)? + 1;
        let total_samples = br.read_bits_u64(36)?;

        if sample_rate == 0 {
            return Err(TaoError::InvalidData("FLAC: STREAMINFO 采样率为 0".into()));
        }
        if max_block_size != 0 && min_block_size > max_block_size {
            return Err(TaoError::InvalidData(format!(
                "FLAC: STREAMINFO 块大小范围非法, min={}, max={}",
                min_block_size, max_block_size
            )));
        }

        Ok(Self {
            min_block_size,
            max_block_size,
            min_frame_size,
            max_frame_size,
            sample_rate,
            channels,
            bits_per_sample,
            total_samples,
            raw,
        })
    }

    /// 从配置数据解析, 接受三种布局:
    /// 裸 34 字节, 带 4 字节块头的 metadata block, 以 `fLaC` 开头的文件头
    pub fn from_extradata(data: &[u8]) -> TaoResult<Self> {
        let body = if data.starts_with(MAGIC) {
            data.get(MAGIC.len() + METADATA_BLOCK_HEADER_SIZE..)
                .unwrap_or_default()
        } else if data.len() >= METADATA_BLOCK_HEADER_SIZE + STREAMINFO_SIZE
            && data[0] & 0x7F == 0
            && block_length(&data[..METADATA_BLOCK_HEADER_SIZE]) == STREAMINFO_SIZE
        {
            &data[METADATA_BLOCK_HEADER_SIZE..]
        } else {
            data
        };
        Self::parse(body)
    }

    /// 块大小是否固定
    pub fn is_fixed_block_size(&self) -> bool {
        self.min_block_size == self.max_block_size && self.min_block_size != 0
    }
}

fn block_length(block_header: &[u8]) -> usize {
    (usize::from(block_header[1]) << 16)
        | (usize::from(block_header[2]) << 8)
        | usize::from(block_header[3])
}

/// FLAC 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 可变块大小 (计数器为样本号), 否则计数器为帧号
    pub variable_block_size: bool,
    /// 块大小 (样本)
    pub block_size: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道数
    pub channels: u32,
    /// 位深
    pub bits_per_sample: u32,
    /// 帧号或样本号
    pub number: u64,
    /// 帧头长度 (含 CRC-8)
    pub size: usize,
}

impl FrameHeader {
    /// 解析并校验帧头
    ///
    /// 数据不足时返回 [`TaoError::NeedMoreData`]; 省略字段而缺少 STREAMINFO 时
    /// 返回 [`TaoError::Unsupported`].
    pub fn parse(data: &[u8], info: Option<&StreamInfo>) -> TaoResult<Self> {
        match Self::read(data, info) {
            Err(TaoError::Eof) => Err(TaoError::NeedMoreData),
            other => other,
        }
    }

    fn read(data: &[u8], info: Option<&StreamInfo>) -> TaoResult<Self> {
        let mut br = BitReader::new(data);
        if br.read_bits(15)? != 0x7FFC {
            return Err(TaoError::InvalidData("FLAC: 同步字非法".into()));
        }
        let variable_block_size = br.read_flag()?;
        let bs_code = br.read_bits(4)?;
        let sr_code = br.read_bits(4)?;
        let ch_code = br.read_bits(4)?;
        let ss_code = br.read_bits(3)?;
        if br.read_bit()? != 0 {
            return Err(TaoError::InvalidData("FLAC: 帧头保留位非 0".into()));
        }
        if bs_code == 0 || sr_code == 15 || ch_code > 10 || ss_code == 3 {
            return Err(TaoError::InvalidData(format!(
                "FLAC: 帧头含保留编码, block_size={}, sample_rate={}, channels={}, sample_size={}",
                bs_code, sr_code, ch_code, ss_code
            )));
        }
        if (sr_code == 0 || ss_code == 0) && info.is_none() {
            return Err(TaoError::Unsupported(
                "FLAC: 帧头省略了采样率或位深, 需要 STREAMINFO".into(),
            ));
        }

        let number = br.read_utf8_u64()?;
        let limit = if variable_block_size { 1u64 << 36 } else { 1u64 << 31 };
        if number >= limit {
            return Err(TaoError::InvalidData(format!(
                "FLAC: 帧计数器越界, number={}",
                number
            )));
        }

        let block_size = match bs_code {
            1 => 192,
            2..=5 => 576 << (bs_code - 2),
            6 => br.read_bits(8)? + 1,
            7 => br.read_bits(16)? + 1,
            _ => 256 << (bs_code - 8),
        };
        let sample_rate = match sr_code {
            0 => info.map_or(0, |info| info.sample_rate),
            1..=11 => SAMPLE_RATES[sr_code as usize],
            12 => br.read_bits(8)? * 1000,
            13 => br.read_bits(16)?,
            _ => br.read_bits(16)? * 10,
        };
        let channels = match ch_code {
            0..=7 => ch_code + 1,
            _ => 2,
        };
        let bits_per_sample = match ss_code {
            0 => info.map_or(0, |info| info.bits_per_sample),
            _ => SAMPLE_SIZES[ss_code as usize],
        };

        let crc_pos = br.byte_position();
        let crc_read = br.read_bits(8)? as u8;
        if crc::crc8(&data[..crc_pos]) != crc_read {
            return Err(TaoError::InvalidData("FLAC: 帧头 CRC-8 校验失败".into()));
        }
        if sample_rate == 0 {
            return Err(TaoError::InvalidData("FLAC: 采样率为 0".into()));
        }
        if let Some(info) = info {
            if info.max_block_size != 0 && block_size > info.max_block_size {
                return Err(TaoError::InvalidData(format!(
                    "FLAC: 块大小超过 STREAMINFO 上限, {} > {}",
                    block_size, info.max_block_size
                )));
            }
        }

        Ok(Self {
            variable_block_size,
            block_size,
            sample_rate,
            channels,
            bits_per_sample,
            number,
            size: crc_pos + 1,
        })
    }

    /// 后续帧头是否属于同一条流
    pub fn is_compatible(&self, next: &Self) -> bool {
        self.variable_block_size == next.variable_block_size
            && self.sample_rate == next.sample_rate
            && self.channels == next.channels
            && self.bits_per_sample == next.bits_per_sample
    }
}

/// FLAC 语法解析器
pub struct FlacParser {
    info: Option<StreamInfo>,
    /// 当前帧的帧头
    header: Option<FrameHeader>,
    /// 已输出过音频帧, 之后不再接受带内 `fLaC` 头
    started: bool,
    clock: TimestampClock,
    warned_missing_info: bool,
}

impl FlacParser {
    /// 创建解析器, 配置数据中的 STREAMINFO 可选
    pub fn new(config: &StreamConfig) -> Self {
        let info = if config.extradata.is_empty() {
            None
        } else {
            match StreamInfo::from_extradata(&config.extradata) {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!("FLAC: 配置数据无法解析为 STREAMINFO, 已忽略: {}", err);
                    None
                }
            }
        };
        Self {
            info,
            header: None,
            started: false,
            clock: TimestampClock::new(0, 1),
            warned_missing_info: false,
        }
    }

    /// 当前 STREAMINFO
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.info.as_ref()
    }

    fn max_frame_size(&self) -> Option<usize> {
        self.info
            .as_ref()
            .map(|info| info.max_frame_size as usize)
            .filter(|&size| size > 0)
    }

    fn peek_frame_header(&self, cursor: &ByteCursor, offset: usize) -> TaoResult<FrameHeader> {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        let len = cursor.len().saturating_sub(offset).min(MAX_HEADER_SIZE);
        if !cursor.peek_at(offset, &mut buf[..len]) {
            return Err(TaoError::NeedMoreData);
        }
        FrameHeader::parse(&buf[..len], self.info.as_ref())
    }

    /// 带内 `fLaC` 头及其后全部 metadata block 的总长度
    fn metadata_size(cursor: &ByteCursor) -> Verdict<usize> {
        let mut magic = [0u8; 4];
        if !cursor.peek_at(0, &mut magic) {
            return Verdict::NeedMoreData;
        }
        if &magic != MAGIC {
            return Verdict::Reject;
        }
        let mut offset = MAGIC.len();
        loop {
            let mut block = [0u8; METADATA_BLOCK_HEADER_SIZE];
            if !cursor.peek_at(offset, &mut block) {
                return Verdict::NeedMoreData;
            }
            let kind = block[0] & 0x7F;
            // STREAMINFO 必须是第一个块, 127 为非法类型
            if kind == 127 || (offset == MAGIC.len() && kind != 0) {
                return Verdict::Reject;
            }
            offset += METADATA_BLOCK_HEADER_SIZE + block_length(&block);
            if block[0] & 0x80 != 0 {
                return Verdict::Ready(offset);
            }
        }
    }

    /// 从带内文件头中提取 STREAMINFO, 其余 metadata block 被跳过
    fn consume_metadata(&mut self, data: &[u8]) {
        let mut offset = MAGIC.len();
        while let Some(block) = data.get(offset..offset + METADATA_BLOCK_HEADER_SIZE) {
            let len = block_length(block);
            let body_start = offset + METADATA_BLOCK_HEADER_SIZE;
            if block[0] & 0x7F == 0 {
                match data
                    .get(body_start..body_start + len)
                    .map(StreamInfo::parse)
                {
                    Some(Ok(info)) => {
                        if self.info.as_ref() != Some(&info) {
                            debug!(
                                "FLAC: 带内 STREAMINFO, rate={}, channels={}, bps={}, block_size={}-{}",
                                info.sample_rate,
                                info.channels,
                                info.bits_per_sample,
                                info.min_block_size,
                                info.max_block_size
                            );
                        }
                        self.info = Some(info);
                    }
                    _ => warn!("FLAC: 带内 STREAMINFO 非法, 已忽略"),
                }
            }
            if block[0] & 0x80 != 0 {
                break;
            }
            offset = body_start + len;
        }
    }

    /// 由帧头计数器推导的时间戳
    fn sample_time(&self, header: &FrameHeader) -> Option<i64> {
        let samples = if header.variable_block_size {
            header.number
        } else {
            let block_size = match &self.info {
                Some(info) if info.is_fixed_block_size() => info.min_block_size,
                _ => header.block_size,
            };
            header.number * u64::from(block_size)
        };
        let micros = u128::from(samples) * 1_000_000 / u128::from(header.sample_rate);
        i64::try_from(micros).ok()
    }
}

fn frame_crc(cursor: &ByteCursor, len: usize) -> u16 {
    let mut value = 0u16;
    cursor.for_each_chunk(0, len, |chunk| value = crc::crc16_update(value, chunk));
    value
}

impl SyntaxParser for FlacParser {
    fn codec_id(&self) -> CodecId {
        CodecId::Flac
    }

    fn sync_len(&self) -> usize {
        2
    }

    fn is_sync(&self, window: &[u8]) -> bool {
        (window[0] == 0xFF && window[1] & 0xFE == 0xF8)
            || (!self.started && window == &MAGIC[..2])
    }

    fn min_unit_size(&self) -> usize {
        let header_size = self.header.map_or(MAX_HEADER_SIZE, |header| header.size);
        let min_frame = self.info.as_ref().map_or(0, |info| info.min_frame_size as usize);
        (header_size + 2).max(min_frame)
    }

    fn max_unit_size(&self) -> Option<usize> {
        self.max_frame_size()
    }

    fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound> {
        if cursor.byte_at(0) == Some(MAGIC[0]) {
            return match Self::metadata_size(cursor) {
                Verdict::Ready(size) => Verdict::Ready(FrameBound::Exact(size)),
                Verdict::NeedMoreData => Verdict::NeedMoreData,
                Verdict::Reject => Verdict::Reject,
            };
        }
        match self.peek_frame_header(cursor, 0) {
            Ok(header) => {
                self.header = Some(header);
                Verdict::Ready(FrameBound::NextSync)
            }
            Err(TaoError::NeedMoreData) => Verdict::NeedMoreData,
            Err(TaoError::Unsupported(msg)) => {
                if !self.warned_missing_info {
                    warn!("{}", msg);
                    self.warned_missing_info = true;
                }
                Verdict::Reject
            }
            Err(_) => Verdict::Reject,
        }
    }

    fn check_boundary(&mut self, cursor: &ByteCursor, offset: usize, at_end: bool) -> Verdict<bool> {
        let Some(current) = self.header else {
            return Verdict::Reject;
        };
        if self.max_frame_size().is_some_and(|max| offset > max) {
            debug!("FLAC: 帧长超过 STREAMINFO 上限仍未通过 CRC-16, 重新同步");
            return Verdict::Reject;
        }
        if !at_end {
            match self.peek_frame_header(cursor, offset) {
                Ok(next) if current.is_compatible(&next) => {}
                Err(TaoError::NeedMoreData) => return Verdict::NeedMoreData,
                _ => return Verdict::Ready(false),
            }
        }
        if frame_crc(cursor, offset) == 0 {
            return Verdict::Ready(true);
        }
        if at_end {
            debug!("FLAC: 末尾帧 CRC-16 校验失败, 重新同步");
            return Verdict::Reject;
        }
        Verdict::Ready(false)
    }

    fn reset(&mut self, _broken: bool) {
        self.header = None;
        self.clock.reset();
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        if unit.data.starts_with(MAGIC) {
            self.consume_metadata(&unit.data);
            return None;
        }
        let header = FrameHeader::parse(&unit.data, self.info.as_ref()).ok()?;
        self.started = true;

        self.clock.change_rate(header.sample_rate, 1);
        let pts = if is_valid(unit.pts) { unit.pts } else { unit.dts };
        if is_valid(pts) {
            self.clock.set(pts);
        } else if !self.clock.is_set() {
            if let Some(time) = self.sample_time(&header) {
                self.clock.set(time);
            }
        }

        let mut au = AccessUnit::new(unit.data);
        au.pts = self.clock.get();
        au.dts = au.pts;
        au.duration = self.clock.duration_of(header.block_size);
        self.clock.increment(header.block_size);
        Some(au)
    }

    fn extradata(&self) -> Option<Bytes> {
        self.info
            .as_ref()
            .map(|info| Bytes::copy_from_slice(&info.raw))
    }
}

/// 创建 FLAC 分包器
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    Ok(Box::new(Packetizer::new(FlacParser::new(config))))
}
