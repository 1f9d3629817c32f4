//! MLP / Dolby TrueHD 分包.
//!
//! 每个访问单元以 4 字节头开始:
//! ```text
//! PPPPLLLL LLLLLLLL TTTTTTTT TTTTTTTT
//! P: 校验半字节  L: 访问单元长度 (16 位字)  T: input_timing
//! ```
//! 其后可能是 28 字节的主同步 (`F8 72 6F BB` MLP, `F8 72 6F BA` TrueHD),
//! 再之后是每个子流 2 或 4 字节的子流目录. 头部与子流目录逐字节异或后折叠为
//! 半字节, 结果必须为 0xF, 否则视为伪同步.
//!
//! 没有主同步的帧只有在见到主同步之后才能解析. 同一字节流中夹杂的
//! AC-3/E-AC-3 帧按其自身语法定界后丢弃.

use log::debug;
use tao_core::bitreader::BitReader;
use tao_core::timestamp::is_valid;
use tao_core::{TaoError, TaoResult, TimestampClock};

use crate::access_unit::AccessUnit;
use crate::bytestream::ByteCursor;
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::stream_config::StreamConfig;

/// 主同步大小 (含 CRC)
pub const MAJOR_SYNC_SIZE: usize = 28;
/// 最大子流数
pub const MAX_SUBSTREAMS: usize = 16;
/// 判定一帧所需的最大头部长度
pub const MAX_HEADER_SIZE: usize = 4 + MAJOR_SYNC_SIZE + 4 * MAX_SUBSTREAMS;

const MAJOR_SYNC_PREFIX: [u8; 3] = [0xF8, 0x72, 0x6F];
const STREAM_TYPE_MLP: u8 = 0xBB;
const STREAM_TYPE_TRUEHD: u8 = 0xBA;

/// 同步窗口: 可覆盖 3 个子流以内的校验数据
const SYNC_WINDOW: usize = 16;

/// MLP channel_arrangement -> 声道数
const MLP_CHANNELS: [u32; 21] = [
    1, 2, 3, 4, 3, 4, 5, 3, 4, 5, 4, 5, 6, 4, 5, 4, 5, 6, 5, 5, 6,
];

/// TrueHD 声道位图中每一位代表的声道数
const TRUEHD_CHANNELS: [u32; 13] = [2, 1, 1, 2, 2, 2, 2, 1, 1, 2, 2, 1, 1];

/// AC-3 码率表 (kbps), 以 frmsizecod >> 1 为索引
const AC3_BITRATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];
const AC3_SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlpStreamType {
    /// Meridian Lossless Packing (DVD-Audio)
    Mlp,
    /// Dolby TrueHD
    TrueHd,
}

/// 主同步携带的流参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MajorSync {
    /// 流类型
    pub stream_type: MlpStreamType,
    /// 采样率 (Hz), 0 表示未知
    pub sample_rate: u32,
    /// 声道数
    pub channels: u32,
    /// 每个访问单元的样本数
    pub samples: u32,
    /// 是否为可变码率
    pub vbr: bool,
    /// 峰值码率 (bit/s)
    pub peak_bitrate: u32,
    /// 子流数
    pub substreams: usize,
}

fn truehd_channels(map: u32) -> u32 {
    TRUEHD_CHANNELS
        .iter()
        .enumerate()
        .filter(|(bit, _)| (map >> bit) & 1 != 0)
        .map(|(_, count)| count)
        .sum()
}

impl MajorSync {
    /// 解析主同步 (`F8 72 6F` 开始的 28 字节)
    pub fn parse(data: &[u8]) -> TaoResult<Self> {
        let data = data.get(..MAJOR_SYNC_SIZE).ok_or(TaoError::NeedMoreData)?;
        if data[..3] != MAJOR_SYNC_PREFIX {
            return Err(TaoError::InvalidData("MLP: 主同步字非法".into()));
        }
        let mut br = BitReader::new(data);
        br.skip_bits(24)?;
        let (stream_type, rate_index, channels) = match br.read_bits(8)? as u8 {
            STREAM_TYPE_MLP => {
                br.skip_bits(4 + 4)?; // group1_bits, group2_bits
                let rate_index = br.read_bits(4)?;
                br.skip_bits(4 + 11)?; // group2_samplerate, 保留
                let arrangement = br.read_bits(5)? as usize;
                let channels = MLP_CHANNELS.get(arrangement).copied().ok_or_else(|| {
                    TaoError::InvalidData(format!(
                        "MLP: channel_arrangement 非法, value={}",
                        arrangement
                    ))
                })?;
                (MlpStreamType::Mlp, rate_index, channels)
            }
            STREAM_TYPE_TRUEHD => {
                let rate_index = br.read_bits(4)?;
                br.skip_bits(8)?;
                let map_6ch = br.read_bits(5)?;
                br.skip_bits(2)?;
                let map_8ch = br.read_bits(13)?;
                let map = if map_8ch != 0 { map_8ch } else { map_6ch };
                (MlpStreamType::TrueHd, rate_index, truehd_channels(map))
            }
            other => {
                return Err(TaoError::InvalidData(format!(
                    "MLP: 未知的流类型, value=0x{:02X}",
                    other
                )));
            }
        };

        let sample_rate = if rate_index == 0x0F {
            0
        } else {
            let base = if rate_index & 0x08 != 0 { 44100 } else { 48000 };
            base << (rate_index & 0x07)
        };
        br.skip_bits(48)?; // signature, flags, 保留
        let vbr = br.read_flag()?;
        let peak = br.read_bits(15)?;
        let substreams = br.read_bits(4)? as usize;
        Ok(Self {
            stream_type,
            sample_rate,
            channels,
            samples: 40 << (rate_index & 0x07),
            vbr,
            peak_bitrate: ((u64::from(peak) * u64::from(sample_rate) + 8) / 16) as u32,
            substreams,
        })
    }
}

/// 帧头判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameCheck {
    /// 合法的 MLP 帧 (长度, 帧内的主同步)
    Mlp(usize, Option<MajorSync>),
    /// 头部数据不足
    NeedMoreData,
    /// 伪同步
    Invalid,
}

fn has_major_sync(header: &[u8]) -> bool {
    header.get(4..7) == Some(&MAJOR_SYNC_PREFIX[..])
}

/// 判定 `header` 开头是否为一个 MLP 帧
///
/// `known` 为之前缓存的主同步, 没有主同步的帧需要它给出子流数.
fn check_frame(header: &[u8], known: Option<&MajorSync>) -> FrameCheck {
    if header.len() < 4 {
        return FrameCheck::NeedMoreData;
    }
    let major = if has_major_sync(header) {
        match MajorSync::parse(&header[4..]) {
            Ok(major) => Some(major),
            Err(TaoError::NeedMoreData) => return FrameCheck::NeedMoreData,
            Err(_) => return FrameCheck::Invalid,
        }
    } else {
        None
    };
    let Some(active) = major.as_ref().or(known) else {
        return FrameCheck::Invalid;
    };

    let mut parity = header[..4].iter().fold(0u8, |acc, b| acc ^ b);
    let mut pos = 4 + if major.is_some() { MAJOR_SYNC_SIZE } else { 0 };
    for _ in 0..active.substreams {
        let Some(entry) = header.get(pos..pos + 2) else {
            return FrameCheck::NeedMoreData;
        };
        parity ^= entry[0] ^ entry[1];
        pos += 2;
        if entry[0] & 0x80 != 0 {
            let Some(extra) = header.get(pos..pos + 2) else {
                return FrameCheck::NeedMoreData;
            };
            parity ^= extra[0] ^ extra[1];
            pos += 2;
        }
    }
    if ((parity >> 4) ^ parity) & 0x0F != 0x0F {
        return FrameCheck::Invalid;
    }

    let words = ((usize::from(header[0]) << 8) | usize::from(header[1])) & 0x0FFF;
    if words * 2 < pos {
        return FrameCheck::Invalid;
    }
    FrameCheck::Mlp(words * 2, major)
}

/// AC-3 / E-AC-3 帧长, 不是 Dolby 帧时返回 None
pub fn dolby_frame_size(header: &[u8]) -> Option<usize> {
    let h = header.get(..6)?;
    if h[0] != 0x0B || h[1] != 0x77 {
        return None;
    }
    let bsid = h[5] >> 3;
    match bsid {
        0..=10 => {
            let fscod = usize::from(h[4] >> 6);
            let frmsizecod = usize::from(h[4] & 0x3F);
            let sample_rate = *AC3_SAMPLE_RATES.get(fscod)?;
            let bitrate = *AC3_BITRATES.get(frmsizecod >> 1)?;
            let mut words = (bitrate * 96_000 / sample_rate) as usize;
            if sample_rate == 44100 {
                words += frmsizecod & 1;
            }
            Some(words * 2)
        }
        11..=16 => {
            if h[2] >> 6 == 3 {
                return None;
            }
            if h[4] >> 6 == 3 && (h[4] >> 4) & 0x03 == 3 {
                return None;
            }
            let frmsiz = (usize::from(h[2] & 0x07) << 8) | usize::from(h[3]);
            Some((frmsiz + 1) * 2)
        }
        _ => None,
    }
}

/// MLP/TrueHD 语法解析器
pub struct MlpParser {
    codec_id: CodecId,
    /// 最近的主同步
    major: Option<MajorSync>,
    clock: TimestampClock,
    /// 被跳过的 AC-3/E-AC-3 帧数
    dolby_frames: u64,
    dropped: u64,
}

impl MlpParser {
    /// 创建解析器
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            codec_id: config.codec_id,
            major: None,
            clock: TimestampClock::new(0, 1),
            dolby_frames: 0,
            dropped: 0,
        }
    }

    /// 最近的主同步
    pub fn major_sync(&self) -> Option<&MajorSync> {
        self.major.as_ref()
    }

    /// 被跳过的 AC-3/E-AC-3 帧数
    pub fn dolby_frames(&self) -> u64 {
        self.dolby_frames
    }

    /// 窥视 `offset` 处至多 [`MAX_HEADER_SIZE`] 字节, 返回实际可用的长度
    fn peek_header(cursor: &ByteCursor, offset: usize, buf: &mut [u8; MAX_HEADER_SIZE]) -> usize {
        let len = cursor.len().saturating_sub(offset).min(MAX_HEADER_SIZE);
        cursor.peek_at(offset, &mut buf[..len]);
        len
    }
}

impl SyntaxParser for MlpParser {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn sync_len(&self) -> usize {
        SYNC_WINDOW
    }

    fn is_sync(&self, window: &[u8]) -> bool {
        if has_major_sync(window) || window.starts_with(&[0x0B, 0x77]) {
            return true;
        }
        match check_frame(window, self.major.as_ref()) {
            FrameCheck::Mlp(..) | FrameCheck::NeedMoreData => self.major.is_some(),
            FrameCheck::Invalid => false,
        }
    }

    fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound> {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        let len = Self::peek_header(cursor, 0, &mut buf);
        let header = &buf[..len];
        if let Some(size) = dolby_frame_size(header) {
            return Verdict::Ready(FrameBound::Exact(size));
        }
        match check_frame(header, self.major.as_ref()) {
            FrameCheck::Mlp(size, major) => {
                if let Some(major) = major {
                    if self.major != Some(major) {
                        debug!(
                            "MLP: 新的主同步, type={:?}, sample_rate={}, channels={}, substreams={}",
                            major.stream_type, major.sample_rate, major.channels, major.substreams
                        );
                    }
                    self.major = Some(major);
                }
                Verdict::Ready(FrameBound::Exact(size))
            }
            FrameCheck::NeedMoreData if header.len() < MAX_HEADER_SIZE => Verdict::NeedMoreData,
            FrameCheck::NeedMoreData | FrameCheck::Invalid => Verdict::Reject,
        }
    }

    fn check_next(&mut self, cursor: &ByteCursor, size: usize, at_end: bool) -> Verdict<()> {
        let mut buf = [0u8; MAX_HEADER_SIZE];
        let len = Self::peek_header(cursor, size, &mut buf);
        let header = &buf[..len];
        let wait = if at_end {
            Verdict::Ready(())
        } else {
            Verdict::NeedMoreData
        };
        if header.is_empty() {
            return wait;
        }
        if dolby_frame_size(header).is_some() {
            return Verdict::Ready(());
        }
        match check_frame(header, self.major.as_ref()) {
            FrameCheck::Mlp(..) => Verdict::Ready(()),
            FrameCheck::NeedMoreData if header.len() < MAX_HEADER_SIZE => wait,
            FrameCheck::NeedMoreData | FrameCheck::Invalid => {
                debug!("MLP: 下一帧没有同步, 视为伪同步");
                self.major = None;
                Verdict::Reject
            }
        }
    }

    fn reset(&mut self, _broken: bool) {
        self.clock.reset();
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        if dolby_frame_size(&unit.data).is_some() {
            self.dolby_frames += 1;
            debug!("MLP: 跳过夹杂的 AC-3/E-AC-3 帧, {} 字节", unit.data.len());
            return None;
        }
        let Some(major) = self.major else {
            self.dropped += 1;
            return None;
        };

        self.clock.change_rate(major.sample_rate, 1);
        let pts = if is_valid(unit.pts) { unit.pts } else { unit.dts };
        if is_valid(pts) {
            self.clock.set(pts);
        }
        let mut au = AccessUnit::new(unit.data);
        au.pts = self.clock.get();
        au.dts = au.pts;
        au.duration = self.clock.duration_of(major.samples);
        self.clock.increment(major.samples);
        Some(au)
    }

    fn dropped_units(&self) -> u64 {
        self.dropped
    }
}

/// 创建 MLP/TrueHD 分包器
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    Ok(Box::new(Packetizer::new(MlpParser::new(config))))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fragment::Fragment;
    use tao_core::bitwriter::BitWriter;

    /// TrueHD 主同步: 48000Hz, 双声道, 1 个子流
    fn truehd_major_sync() -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bytes(&[0xF8, 0x72, 0x6F, STREAM_TYPE_TRUEHD]);
        bw.write_bits(0, 4);
        bw.write_bits(0, 8);
        bw.write_bits(1, 5);
        bw.write_bits(0, 2);
        bw.write_bits(0, 13);
        bw.write_bytes(&[0xB7, 0x52, 0x00, 0x00, 0x00, 0x00]);
        bw.write_bit(true);
        bw.write_bits(0x1234, 15);
        bw.write_bits(1, 4);
        bw.write_bits(0, 4);
        bw.write_bytes(&[0u8; 11]);
        bw.finish()
    }

    /// 构造一个访问单元, `payload` 之前是 (可选的) 主同步与一个子流目录项
    pub(crate) fn mlp_frame(major: bool, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        if major {
            body.extend(truehd_major_sync());
        }
        body.extend_from_slice(&[0x01, 0x23]);
        body.extend_from_slice(payload);
        let mut frame = vec![0x00, 0x00, 0x12, 0x34];
        frame.extend(body);
        if frame.len() % 2 == 1 {
            frame.push(0x00);
        }
        let words = frame.len() / 2;
        frame[0] = (words >> 8) as u8 & 0x0F;
        frame[1] = words as u8;

        let substream_start = 4 + if major { MAJOR_SYNC_SIZE } else { 0 };
        let parity = frame[..4]
            .iter()
            .chain(&frame[substream_start..substream_start + 2])
            .fold(0u8, |acc, b| acc ^ b);
        let nibble = ((parity >> 4) ^ parity) & 0x0F;
        frame[0] |= (nibble ^ 0x0F) << 4;
        frame
    }

    /// AC-3, 48000Hz, 32kbps: 128 字节
    fn ac3_frame() -> Vec<u8> {
        let mut frame = vec![0x0B, 0x77, 0x00, 0x00, 0x00, 0x40];
        frame.resize(128, 0x11);
        frame
    }

    fn packetizer() -> Packetizer<MlpParser> {
        Packetizer::new(MlpParser::new(&StreamConfig::new(CodecId::TrueHd)))
    }

    #[test]
    fn test_主同步解析() {
        let major = MajorSync::parse(&truehd_major_sync()).unwrap();
        assert_eq!(major.stream_type, MlpStreamType::TrueHd);
        assert_eq!(major.sample_rate, 48000);
        assert_eq!(major.channels, 2);
        assert_eq!(major.samples, 40);
        assert_eq!(major.substreams, 1);
        assert!(major.vbr);
    }

    #[test]
    fn test_校验与次帧() {
        let frame = mlp_frame(true, &[0x55; 20]);
        assert!(matches!(check_frame(&frame, None), FrameCheck::Mlp(size, Some(_)) if size == frame.len()));
        let minor = mlp_frame(false, &[0x66; 10]);
        // 没有缓存的主同步时次帧无法判定
        assert_eq!(check_frame(&minor, None), FrameCheck::Invalid);
        let major = MajorSync::parse(&truehd_major_sync()).unwrap();
        assert!(matches!(check_frame(&minor, Some(&major)), FrameCheck::Mlp(..)));

        let mut broken = minor.clone();
        broken[0] ^= 0x10;
        assert_eq!(check_frame(&broken, Some(&major)), FrameCheck::Invalid);
    }

    #[test]
    fn test_ac3_帧长() {
        assert_eq!(dolby_frame_size(&ac3_frame()), Some(128));
        // 44.1kHz, frmsizecod=1: 70 字
        assert_eq!(dolby_frame_size(&[0x0B, 0x77, 0, 0, 0x41, 0x40]), Some(140));
        // E-AC-3, frmsiz=0x0FF
        assert_eq!(dolby_frame_size(&[0x0B, 0x77, 0x00, 0xFF, 0x00, 0x80]), Some(512));
        assert_eq!(dolby_frame_size(&[0x0B, 0x77, 0, 0, 0, 0xF8]), None);
    }

    #[test]
    fn test_分包并跳过_ac3() {
        let mut stream = vec![0x42, 0x42, 0x42];
        stream.extend(mlp_frame(true, &[0x55; 30]));
        stream.extend(mlp_frame(false, &[0x66; 30]));
        stream.extend(ac3_frame());
        stream.extend(mlp_frame(false, &[0x77; 30]));
        stream.extend(mlp_frame(true, &[0x88; 30]));

        let mut p = packetizer();
        let mut out = p.push(Fragment::new(stream).with_timestamps(0, 0));
        out.extend(p.finish());
        assert_eq!(out.len(), 4);
        assert_eq!(p.parser().dolby_frames(), 1);
        let pts: Vec<i64> = out.iter().map(|au| au.pts).collect();
        assert_eq!(pts, vec![0, 833, 1_666, 2_500]);
        assert!(out.iter().all(|au| au.len() % 2 == 0));
    }

    #[test]
    fn test_主同步之前的次帧被跳过() {
        let mut stream = mlp_frame(false, &[0x66; 30]);
        stream.extend(mlp_frame(true, &[0x55; 30]));
        stream.extend(mlp_frame(false, &[0x77; 30]));
        let mut p = packetizer();
        let mut out = p.push(Fragment::new(stream));
        out.extend(p.finish());
        assert_eq!(out.len(), 2);
        assert!(has_major_sync(&out[0].data));
    }
}
