//! VC-1 (SMPTE 421M) IDU 分包.
//!
//! # IDU
//! ```text
//! 00 00 01 | type(8) | 负载 (含防竞争字节)
//! ```
//! - `0x0F` 序列头, `0x0E` 入口点, `0x0D` 帧, `0x0C` 场, `0x0B` slice, `0x0A` 序列结束
//! - `0x1B..=0x1F` 对应层级的 user data
//!
//! 序列头与入口点被缓存, 不随帧输出, 而是补在每个 I 帧之前.
//! 输出一律使用 4 字节起始码.

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};
use tao_core::bitreader::BitReader;
use tao_core::timestamp::is_valid;
use tao_core::{NOPTS_VALUE, Rational, TaoError, TaoResult, TimestampClock};

use crate::access_unit::{AccessUnit, AccessUnitFlags};
use crate::bytestream::ByteCursor;
use crate::cc::CcExtractor;
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::fragment::{Fragment, FragmentFlags};
use crate::parsers::annexb::{self, START_CODE};
use crate::stream_config::StreamConfig;

/// 4 字节起始码之后的 IDU 类型字节偏移
const IDU_TYPE_OFFSET: usize = 4;

/// 高级档次 sample aspect ratio 表, 15 表示显式给出
const ASPECT_RATIOS: [(u32, u32); 16] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (0, 0),
    (0, 0),
];

/// IDU 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IduType {
    /// 序列结束
    EndOfSequence,
    /// slice
    Slice,
    /// 场 (隔行图像的第二场)
    Field,
    /// 帧
    Frame,
    /// 入口点
    EntryPoint,
    /// 序列头
    SequenceHeader,
    /// slice 层 user data
    SliceUserData,
    /// 场层 user data
    FieldUserData,
    /// 帧层 user data
    FrameUserData,
    /// 入口点层 user data
    EntryPointUserData,
    /// 序列层 user data
    SequenceUserData,
    /// 保留类型
    Other(u8),
}

impl IduType {
    /// 从类型字节创建
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x0A => Self::EndOfSequence,
            0x0B => Self::Slice,
            0x0C => Self::Field,
            0x0D => Self::Frame,
            0x0E => Self::EntryPoint,
            0x0F => Self::SequenceHeader,
            0x1B => Self::SliceUserData,
            0x1C => Self::FieldUserData,
            0x1D => Self::FrameUserData,
            0x1E => Self::EntryPointUserData,
            0x1F => Self::SequenceUserData,
            other => Self::Other(other),
        }
    }

    /// 类型字节
    pub fn to_u8(self) -> u8 {
        match self {
            Self::EndOfSequence => 0x0A,
            Self::Slice => 0x0B,
            Self::Field => 0x0C,
            Self::Frame => 0x0D,
            Self::EntryPoint => 0x0E,
            Self::SequenceHeader => 0x0F,
            Self::SliceUserData => 0x1B,
            Self::FieldUserData => 0x1C,
            Self::FrameUserData => 0x1D,
            Self::EntryPointUserData => 0x1E,
            Self::SequenceUserData => 0x1F,
            Self::Other(value) => value,
        }
    }

    /// 属于当前帧的后续 IDU, 不会开始新的帧
    pub fn continues_frame(self) -> bool {
        matches!(
            self,
            Self::FrameUserData
                | Self::Field
                | Self::FieldUserData
                | Self::Slice
                | Self::SliceUserData
                | Self::EndOfSequence
        )
    }
}

/// 档次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vc1Profile {
    /// 简单档次
    Simple,
    /// 主档次
    Main,
    /// 高级档次
    Advanced,
}

/// VC-1 序列头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    /// 档次
    pub profile: Vc1Profile,
    /// 级别 (仅高级档次)
    pub level: u32,
    /// 编码宽度 (仅高级档次, 否则为 0)
    pub width: u32,
    /// 编码高度 (仅高级档次, 否则为 0)
    pub height: u32,
    /// 隔行
    pub interlaced: bool,
    /// 帧头含 INTERPFRM 位
    pub frame_interpolation: bool,
    /// 帧头含 RANGEREDFRM 位
    pub range_reduction: bool,
    /// 可能出现 B 帧
    pub has_b_frames: bool,
    /// 帧率
    pub frame_rate: Option<Rational>,
    /// sample aspect ratio
    pub aspect_ratio: Option<Rational>,
}

impl SequenceHeader {
    /// 解析序列头, `rbsp` 为类型字节之后已去除防竞争字节的负载
    pub fn parse(rbsp: &[u8]) -> TaoResult<Self> {
        let mut br = BitReader::new(rbsp);
        match br.read_bits(2)? {
            3 => Self::parse_advanced(&mut br),
            0 => Self::parse_simple_main(&mut br, Vc1Profile::Simple),
            1 => Self::parse_simple_main(&mut br, Vc1Profile::Main),
            _ => Err(TaoError::InvalidData("VC-1: 保留的档次".into())),
        }
    }

    fn parse_simple_main(br: &mut BitReader, profile: Vc1Profile) -> TaoResult<Self> {
        // res_sm + frmrtq + bitrtq + loopfilter + res_x8 + multires + res_fasttx
        // + fastuvmc + extended_mv + dquant + vstransform + res_transtab + overlap + syncmarker
        br.skip_bits(2 + 3 + 5 + 1 + 1 + 1 + 1 + 1 + 1 + 2 + 1 + 1 + 1 + 1)?;
        let range_reduction = br.read_flag()?;
        let max_b_frames = br.read_bits(3)?;
        br.skip_bits(2)?; // quantizer
        let frame_interpolation = br.read_flag()?;
        Ok(Self {
            profile,
            level: 0,
            width: 0,
            height: 0,
            interlaced: false,
            frame_interpolation,
            range_reduction,
            has_b_frames: max_b_frames > 0,
            frame_rate: None,
            aspect_ratio: None,
        })
    }

    fn parse_advanced(br: &mut BitReader) -> TaoResult<Self> {
        let level = br.read_bits(3)?;
        br.skip_bits(2 + 3 + 5 + 1)?; // colordiff_format + frmrtq + bitrtq + postprocflag
        let width = 2 * br.read_bits(12)? + 2;
        let height = 2 * br.read_bits(12)? + 2;
        br.skip_bits(1)?; // pulldown
        let interlaced = br.read_flag()?;
        br.skip_bits(1)?; // tfcntrflag
        let frame_interpolation = br.read_flag()?;
        br.skip_bits(2)?; // reserved + psf

        let mut aspect_ratio = None;
        if br.read_flag()? {
            br.skip_bits(14 + 14)?; // display size
            if br.read_flag()? {
                let (num, den) = match br.read_bits(4)? {
                    15 => (br.read_bits(8)?, br.read_bits(8)?),
                    index => ASPECT_RATIOS[index as usize],
                };
                aspect_ratio = Some(Rational::new(num, den))
                    .filter(Rational::is_valid)
                    .map(Rational::reduce);
            }
        }

        let mut frame_rate = None;
        if br.read_flag()? {
            let rate = if br.read_flag()? {
                Rational::new(br.read_bits(16)? + 1, 32)
            } else {
                let num = match br.read_bits(8)? {
                    1 => 24000,
                    2 => 25000,
                    3 => 30000,
                    4 => 50000,
                    5 => 60000,
                    6 => 48000,
                    7 => 72000,
                    _ => 0,
                };
                let den = match br.read_bits(4)? {
                    1 => 1000,
                    2 => 1001,
                    _ => 0,
                };
                Rational::new(num, den)
            };
            frame_rate = Some(rate).filter(Rational::is_valid).map(Rational::reduce);
        }

        Ok(Self {
            profile: Vc1Profile::Advanced,
            level,
            width,
            height,
            interlaced,
            frame_interpolation,
            range_reduction: false,
            has_b_frames: true,
            frame_rate,
            aspect_ratio,
        })
    }

    /// 是否为高级档次
    pub fn is_advanced(&self) -> bool {
        self.profile == Vc1Profile::Advanced
    }
}

/// 从帧 IDU 的前几位解析帧类型
///
/// 隔行场图像按场对类型归类: 含 I 场记为 I, PP 记为 P, 含 B 场记为 B.
pub fn parse_frame_type(seq: &SequenceHeader, rbsp: &[u8]) -> TaoResult<AccessUnitFlags> {
    let mut br = BitReader::new(rbsp);
    if seq.is_advanced() {
        // fcm: 0 逐行, 10 隔行帧, 11 隔行场
        let field_pair = seq.interlaced && br.read_flag()? && br.read_flag()?;
        if field_pair {
            return Ok(match br.read_bits(3)? {
                0..=2 => AccessUnitFlags::TYPE_I,
                3 => AccessUnitFlags::TYPE_P,
                _ => AccessUnitFlags::TYPE_B,
            });
        }
        // ptype: 0 P, 10 B, 110 I, 1110 BI, 1111 P skip
        return Ok(if !br.read_flag()? {
            AccessUnitFlags::TYPE_P
        } else if !br.read_flag()? {
            AccessUnitFlags::TYPE_B
        } else if !br.read_flag()? {
            AccessUnitFlags::TYPE_I
        } else if !br.read_flag()? {
            AccessUnitFlags::TYPE_B
        } else {
            AccessUnitFlags::TYPE_P
        });
    }

    if seq.frame_interpolation {
        br.skip_bits(1)?;
    }
    br.skip_bits(2)?; // frmcnt
    if seq.range_reduction {
        br.skip_bits(1)?;
    }
    Ok(if br.read_flag()? {
        AccessUnitFlags::TYPE_P
    } else if !seq.has_b_frames || br.read_flag()? {
        AccessUnitFlags::TYPE_I
    } else {
        AccessUnitFlags::TYPE_B
    })
}

/// 正在组装的帧
#[derive(Debug)]
struct Frame {
    units: Vec<Bytes>,
    pts: i64,
    dts: i64,
    flags: AccessUnitFlags,
    has_frame: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            units: Vec::new(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            flags: AccessUnitFlags::empty(),
            has_frame: false,
        }
    }

    fn note_timestamps(&mut self, pts: i64, dts: i64) {
        if !is_valid(self.pts) && !is_valid(self.dts) {
            self.pts = pts;
            self.dts = dts;
        }
    }
}

/// VC-1 语法解析器
pub struct Vc1Parser {
    sequence: Option<(Bytes, SequenceHeader)>,
    entry_point: Option<Bytes>,
    frame: Frame,
    /// 场时钟 (2 倍帧率), 帧率未知时不插值
    clock: TimestampClock,
    configured_rate: Option<Rational>,
    /// 每个片段为一帧 (如来自 ASF), 缺少起始码时补上
    packetized: bool,
    cc: CcExtractor,
    dropped: u64,
}

impl Vc1Parser {
    /// 创建解析器
    pub fn new(config: &StreamConfig) -> Self {
        let configured_rate = config.valid_frame_rate();
        let mut parser = Self {
            sequence: None,
            entry_point: None,
            frame: Frame::new(),
            clock: TimestampClock::new(0, 1),
            configured_rate,
            packetized: config.packetized,
            cc: CcExtractor::new(),
            dropped: 0,
        };
        parser.update_clock_rate();
        parser
    }

    /// 已缓存的序列头
    pub fn sequence_header(&self) -> Option<&SequenceHeader> {
        self.sequence.as_ref().map(|(_, header)| header)
    }

    /// 帧率: 配置优先, 其次为序列头声明
    pub fn frame_rate(&self) -> Option<Rational> {
        self.configured_rate
            .or_else(|| self.sequence_header().and_then(|seq| seq.frame_rate))
    }

    fn update_clock_rate(&mut self) {
        if let Some(rate) = self
            .frame_rate()
            .and_then(|rate| rate.checked_mul(Rational::new(2, 1)))
        {
            self.clock.change_rate(rate.num, rate.den);
        }
    }

    fn handle_unit(&mut self, unit: Bytes, pts: i64, dts: i64) -> Option<AccessUnit> {
        let idu = IduType::from_u8(unit[IDU_TYPE_OFFSET]);
        if self.sequence.is_none() && idu != IduType::SequenceHeader {
            debug!("VC-1: 等待序列头, 丢弃 {:?}", idu);
            if idu == IduType::Frame {
                self.dropped += 1;
            }
            return None;
        }
        if self.entry_point.is_none()
            && idu != IduType::EntryPoint
            && idu != IduType::SequenceHeader
        {
            debug!("VC-1: 等待入口点, 丢弃 {:?}", idu);
            if idu == IduType::Frame {
                self.dropped += 1;
            }
            return None;
        }

        let mut out = None;
        if self.frame.has_frame && !idu.continues_frame() {
            out = self.close_frame();
        }
        self.frame.note_timestamps(pts, dts);

        let rbsp = annexb::unescape(&unit[IDU_TYPE_OFFSET + 1..]);
        match idu {
            IduType::SequenceHeader => {
                match SequenceHeader::parse(&rbsp) {
                    Ok(header) => {
                        if self.sequence_header() != Some(&header) {
                            debug!(
                                "VC-1: 新的序列头, profile={:?}, level={}, {}x{}, interlaced={}",
                                header.profile,
                                header.level,
                                header.width,
                                header.height,
                                header.interlaced
                            );
                        }
                        self.sequence = Some((unit, header));
                        self.update_clock_rate();
                    }
                    Err(err) => warn!("VC-1: 序列头无法解析, 已忽略: {}", err),
                }
                return out;
            }
            IduType::EntryPoint => {
                if self.entry_point.is_none() {
                    debug!("VC-1: 找到入口点");
                }
                self.entry_point = Some(unit);
                return out;
            }
            IduType::Frame => {
                let seq = self.sequence_header()?;
                match parse_frame_type(seq, &rbsp) {
                    Ok(flags) => self.frame.flags |= flags,
                    Err(err) => debug!("VC-1: 帧类型无法解析: {}", err),
                }
                self.frame.has_frame = true;
            }
            IduType::FrameUserData => {
                // 末尾为 0x80 刷新字节
                let payload = &rbsp[..rbsp.len().saturating_sub(1)];
                if payload.starts_with(b"GA94") {
                    self.cc.detect_and_extract(true, payload);
                }
            }
            IduType::EndOfSequence => self.frame.flags |= AccessUnitFlags::END_OF_SEQUENCE,
            _ => {}
        }
        self.frame.units.push(unit);
        out
    }

    /// 结束当前帧, I 帧前补上序列头与入口点
    fn close_frame(&mut self) -> Option<AccessUnit> {
        let frame = std::mem::replace(&mut self.frame, Frame::new());
        let captions = self.cc.take();
        if !frame.has_frame {
            return None;
        }
        let has_b_frames = self
            .sequence_header()
            .is_none_or(|seq| seq.has_b_frames);

        let mut data = BytesMut::new();
        if frame.flags.contains(AccessUnitFlags::TYPE_I) {
            if let Some((seq, _)) = &self.sequence {
                data.put_slice(seq);
            }
            if let Some(ep) = &self.entry_point {
                data.put_slice(ep);
            }
        }
        for unit in &frame.units {
            data.put_slice(unit);
        }

        let mut frame_dts = frame.dts;
        if !is_valid(frame_dts) && !has_b_frames {
            frame_dts = frame.pts;
        }
        if is_valid(frame_dts) {
            self.clock.set(frame_dts);
        }
        let dts = self.clock.get();
        let pts = if is_valid(frame.pts) {
            frame.pts
        } else if !has_b_frames || frame.flags.contains(AccessUnitFlags::TYPE_B) {
            dts
        } else {
            NOPTS_VALUE
        };
        let duration = self.clock.duration_of(2);
        self.clock.increment(2);

        let mut au = AccessUnit::new(data.freeze());
        au.pts = pts;
        au.dts = dts;
        au.duration = duration;
        au.flags = frame.flags;
        au.captions = captions;
        Some(au)
    }
}

impl SyntaxParser for Vc1Parser {
    fn codec_id(&self) -> CodecId {
        CodecId::Vc1
    }

    fn sync_len(&self) -> usize {
        START_CODE.len()
    }

    fn sync_pattern(&self) -> Option<&[u8]> {
        Some(START_CODE)
    }

    /// 3 字节起始码补为 4 字节
    fn unit_prefix(&self) -> &[u8] {
        &[0x00]
    }

    fn min_unit_size(&self) -> usize {
        START_CODE.len() + 1
    }

    fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound> {
        match cursor.byte_at(START_CODE.len()) {
            None => Verdict::NeedMoreData,
            Some(_) => Verdict::Ready(FrameBound::NextSync),
        }
    }

    fn reset(&mut self, _broken: bool) {
        self.frame = Frame::new();
        self.cc.flush();
        self.clock.reset();
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        // 去除属于下一个起始码的前导零
        let payload = unit.data.get(IDU_TYPE_OFFSET..)?;
        let end = IDU_TYPE_OFFSET + annexb::strip_trailing_zeros(payload).len();
        if end == IDU_TYPE_OFFSET {
            return None;
        }
        self.handle_unit(unit.data.slice(..end), unit.pts, unit.dts)
    }

    fn validate(&mut self, au: &mut AccessUnit) -> bool {
        if !is_valid(au.dts) {
            debug!("VC-1: 缺少起始 DTS, 访问单元被丢弃");
            return false;
        }
        true
    }

    fn drain(&mut self) -> Option<AccessUnit> {
        self.close_frame()
    }

    fn prepare(&mut self, mut fragment: Fragment) -> Option<Fragment> {
        if !self.packetized {
            return Some(fragment);
        }
        if !fragment.data.is_empty() && !fragment.data.starts_with(START_CODE) {
            // 隔行序列中 FCM 为 11 的帧为场对
            let field = self.sequence_header().is_some_and(|seq| seq.interlaced)
                && fragment.data[0] & 0xC0 == 0xC0;
            let idu = if field { IduType::Field } else { IduType::Frame };
            let mut data = BytesMut::with_capacity(fragment.data.len() + START_CODE.len() + 1);
            data.put_slice(START_CODE);
            data.put_u8(idu.to_u8());
            data.put_slice(&fragment.data);
            fragment.data = data.freeze();
        }
        fragment.flags |= FragmentFlags::AU_END;
        Some(fragment)
    }

    fn extradata(&self) -> Option<Bytes> {
        let (seq, _) = self.sequence.as_ref()?;
        let ep = self.entry_point.as_ref()?;
        let mut out = BytesMut::with_capacity(seq.len() + ep.len());
        out.put_slice(seq);
        out.put_slice(ep);
        Some(out.freeze())
    }

    fn dropped_units(&self) -> u64 {
        self.dropped
    }
}

/// 创建 VC-1 分包器
///
/// 部分 ASF 的配置数据首字节不是起始码的一部分, 首字节非 0 时去除.
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    let mut packetizer = Packetizer::new(Vc1Parser::new(config));
    let extradata = match config.extradata.first() {
        Some(&first) if first != 0x00 => &config.extradata[1..],
        _ => &config.extradata[..],
    };
    packetizer.feed_header(extradata);
    Ok(Box::new(packetizer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tao_core::bitwriter::BitWriter;

    fn idu(kind: IduType, rbsp: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x00, 0x01, kind.to_u8()];
        out.extend_from_slice(&annexb::escape(rbsp));
        out
    }

    /// 高级档次, 1920x1080, 25fps
    fn advanced_sequence(interlaced: bool) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(3, 2);
        bw.write_bits(3, 3);
        bw.write_bits(1, 2);
        bw.write_bits(7, 3);
        bw.write_bits(31, 5);
        bw.write_bit(false);
        bw.write_bits(1920 / 2 - 1, 12);
        bw.write_bits(1080 / 2 - 1, 12);
        bw.write_bit(false);
        bw.write_bit(interlaced);
        bw.write_bit(false);
        bw.write_bit(false);
        bw.write_bit(true);
        bw.write_bit(false);
        // display_ext + aspect_ratio 1:1
        bw.write_bit(true);
        bw.write_bits(1919, 14);
        bw.write_bits(1079, 14);
        bw.write_bit(true);
        bw.write_bits(1, 4);
        // frame rate 25000/1000
        bw.write_bit(true);
        bw.write_bit(false);
        bw.write_bits(2, 8);
        bw.write_bits(1, 4);
        bw.write_bit(false);
        bw.write_bit(false);
        bw.write_trailing_bits();
        bw.finish()
    }

    /// 简单/主档次, `max_b_frames` 个 B 帧
    fn simple_sequence(max_b_frames: u32) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(1, 2);
        bw.write_bits(0, 22);
        bw.write_bit(false);
        bw.write_bits(max_b_frames, 3);
        bw.write_bits(0, 2);
        bw.write_bit(false);
        bw.align_to_byte();
        bw.finish()
    }

    fn entry_point() -> Vec<u8> {
        idu(IduType::EntryPoint, &[0x48, 0x00, 0x00, 0x80])
    }

    /// 高级档次逐行帧; ptype 位串后接若干负载
    fn advanced_frame(ptype: &str) -> Vec<u8> {
        let mut bw = BitWriter::new();
        for bit in ptype.chars() {
            bw.write_bit(bit == '1');
        }
        bw.write_bits(0x5A, 8);
        bw.write_trailing_bits();
        let mut rbsp = bw.finish();
        rbsp.extend_from_slice(&[0x00, 0x00, 0x01, 0x77]);
        idu(IduType::Frame, &rbsp)
    }

    fn packetizer(config: &StreamConfig) -> Packetizer<Vc1Parser> {
        Packetizer::new(Vc1Parser::new(config))
    }

    #[test]
    fn test_高级档次序列头解析() {
        let header = SequenceHeader::parse(&advanced_sequence(true)).unwrap();
        assert_eq!(header.profile, Vc1Profile::Advanced);
        assert_eq!(header.level, 3);
        assert_eq!((header.width, header.height), (1920, 1080));
        assert!(header.interlaced);
        assert!(header.has_b_frames);
        assert_eq!(header.frame_rate, Some(Rational::new(25, 1)));
        assert_eq!(header.aspect_ratio, Some(Rational::new(1, 1)));
    }

    #[test]
    fn test_简单档次帧类型() {
        let seq = SequenceHeader::parse(&simple_sequence(2)).unwrap();
        assert_eq!(seq.profile, Vc1Profile::Main);
        assert!(seq.has_b_frames);
        // frmcnt(2) + ptype
        assert_eq!(parse_frame_type(&seq, &[0b0010_0000]).unwrap(), AccessUnitFlags::TYPE_P);
        assert_eq!(parse_frame_type(&seq, &[0b0001_0000]).unwrap(), AccessUnitFlags::TYPE_I);
        assert_eq!(parse_frame_type(&seq, &[0b0000_0000]).unwrap(), AccessUnitFlags::TYPE_B);

        let seq = SequenceHeader::parse(&simple_sequence(0)).unwrap();
        assert_eq!(parse_frame_type(&seq, &[0b0000_0000]).unwrap(), AccessUnitFlags::TYPE_I);
    }

    #[test]
    fn test_隔行场对类型() {
        let seq = SequenceHeader::parse(&advanced_sequence(true)).unwrap();
        // fcm=11, fptype=011 (PP)
        assert_eq!(parse_frame_type(&seq, &[0b1101_1000]).unwrap(), AccessUnitFlags::TYPE_P);
        // fcm=11, fptype=001 (IP)
        assert_eq!(parse_frame_type(&seq, &[0b1100_1000]).unwrap(), AccessUnitFlags::TYPE_I);
        // fcm=10 隔行帧, ptype=10 (B)
        assert_eq!(parse_frame_type(&seq, &[0b1010_0000]).unwrap(), AccessUnitFlags::TYPE_B);
    }

    #[test]
    fn test_i_帧前补序列头与入口点() {
        let seq = idu(IduType::SequenceHeader, &advanced_sequence(false));
        let ep = entry_point();
        let (i0, p1, i2) = (advanced_frame("110"), advanced_frame("0"), advanced_frame("110"));
        let stream = [seq.clone(), ep.clone(), i0.clone(), p1.clone(), i2.clone()].concat();

        let mut p = packetizer(&StreamConfig::new(CodecId::Vc1));
        let mut out = Vec::new();
        for (i, chunk) in stream.chunks(5).enumerate() {
            let fragment = Fragment::new(chunk.to_vec());
            let fragment = if i == 0 { fragment.with_timestamps(0, 0) } else { fragment };
            out.extend(p.push(fragment));
        }
        out.extend(p.finish());

        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().map(AccessUnit::picture_type).collect::<String>(), "IPI");
        assert_eq!(&out[0].data[..], &[seq.clone(), ep.clone(), i0].concat()[..]);
        assert_eq!(&out[1].data[..], &p1[..]);
        assert_eq!(&out[2].data[..], &[seq.clone(), ep.clone(), i2].concat()[..]);
        let dts: Vec<i64> = out.iter().map(|au| au.dts).collect();
        assert_eq!(dts, vec![0, 40_000, 80_000]);
        assert_eq!(out[0].pts, 0);
        assert_eq!(out[0].duration, 40_000);
        assert_eq!(p.parser().extradata().unwrap().to_vec(), [seq, ep].concat());
    }

    #[test]
    fn test_等待序列头与入口点() {
        let seq = idu(IduType::SequenceHeader, &advanced_sequence(false));
        let head = [advanced_frame("110"), seq, advanced_frame("0"), entry_point()].concat();
        let mut p = packetizer(&StreamConfig::new(CodecId::Vc1));
        let mut out = p.push(Fragment::new(head));
        out.extend(p.push(Fragment::new(advanced_frame("110")).with_timestamps(0, 0)));
        out.extend(p.finish());
        assert_eq!(out.len(), 1);
        assert!(out[0].is_keyframe());
        assert_eq!(p.stats().dropped_units, 2);
    }

    #[test]
    fn test_缺少时间戳时丢弃() {
        let stream = [
            idu(IduType::SequenceHeader, &advanced_sequence(false)),
            entry_point(),
            advanced_frame("110"),
        ]
        .concat();
        let mut p = packetizer(&StreamConfig::new(CodecId::Vc1));
        let mut out = p.push(Fragment::new(stream));
        out.extend(p.finish());
        assert!(out.is_empty());
        assert_eq!(p.stats().dropped_units, 1);
    }

    #[test]
    fn test_asf_打包输入补起始码() {
        let seq = idu(IduType::SequenceHeader, &simple_sequence(0));
        let ep = entry_point();
        let mut extradata = vec![0x25];
        extradata.extend_from_slice(&seq);
        extradata.extend_from_slice(&ep);
        let config = StreamConfig::new(CodecId::Vc1)
            .with_extradata(extradata)
            .with_packetized(true);
        let mut p = create(&config).unwrap();
        assert_eq!(p.extradata().unwrap().to_vec(), [seq.clone(), ep.clone()].concat());

        // frmcnt=00, ptype: 0 -> I (无 B 帧), 1 -> P
        let i_body = [0x00, 0x5A, 0x80];
        let p_body = [0x20, 0x5A, 0x80];
        let mut out = p.push(Fragment::new(i_body.to_vec()).with_timestamps(1000, 1000));
        out.extend(p.push(Fragment::new(p_body.to_vec()).with_timestamps(41_000, 41_000)));
        out.extend(p.finish());

        assert_eq!(out.len(), 2);
        let mut expected_i = [seq, ep].concat();
        expected_i.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x0D, 0x00, 0x5A, 0x80]);
        assert_eq!(&out[0].data[..], &expected_i[..]);
        assert_eq!(&out[1].data[..], &[0x00, 0x00, 0x00, 0x01, 0x0D, 0x20, 0x5A, 0x80]);
        assert_eq!(out[1].picture_type(), 'P');
        assert_eq!((out[1].pts, out[1].dts), (41_000, 41_000));
    }

    #[test]
    fn test_帧_user_data_字幕() {
        let mut user_data = b"GA94\x03".to_vec();
        user_data.extend_from_slice(&[0x41, 0xFF, 0xFC, 0x94, 0x2C, 0xFF, 0x80]);
        let stream = [
            idu(IduType::SequenceHeader, &advanced_sequence(false)),
            entry_point(),
            advanced_frame("110"),
            idu(IduType::FrameUserData, &user_data),
            advanced_frame("0"),
        ]
        .concat();
        let mut p = packetizer(&StreamConfig::new(CodecId::Vc1));
        let mut out = p.push(Fragment::new(stream).with_timestamps(0, 0));
        out.extend(p.finish());
        assert_eq!(out.len(), 2);
        let captions = out[0].captions.as_ref().unwrap();
        assert_eq!(captions.data, vec![0xFC, 0x94, 0x2C]);
        assert!(out[1].captions.is_none());
    }
}
