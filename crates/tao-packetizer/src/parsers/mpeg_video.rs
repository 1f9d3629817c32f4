//! MPEG-1/2 视频分包.
//!
//! 起始码后的类型字节:
//! - `0x00` 图像头, `0x01..=0xAF` slice
//! - `0xB2` user data, `0xB3` 序列头, `0xB5` 扩展, `0xB7` 序列结束, `0xB8` GOP
//!
//! 见到 slice 之后再遇到非 slice 起始码即表示一帧 (或一场) 结束.
//! 时间戳以 2 倍帧率的场时钟插值, 帧时长按 repeat_first_field 等标志计算.

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};
use tao_core::bitreader::BitReader;
use tao_core::timestamp::is_valid;
use tao_core::{Rational, TaoError, TaoResult, TimestampClock, NOPTS_VALUE};

use crate::access_unit::{AccessUnit, AccessUnitFlags};
use crate::bytestream::ByteCursor;
use crate::cc::CcExtractor;
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::parsers::annexb::START_CODE;
use crate::stream_config::StreamConfig;

const PICTURE_START_CODE: u8 = 0x00;
const SLICE_MAX_START_CODE: u8 = 0xAF;
const USER_DATA_START_CODE: u8 = 0xB2;
const SEQUENCE_HEADER_CODE: u8 = 0xB3;
const EXTENSION_START_CODE: u8 = 0xB5;
const SEQUENCE_END_CODE: u8 = 0xB7;

const SEQUENCE_EXTENSION_ID: u32 = 1;
const PICTURE_CODING_EXTENSION_ID: u32 = 8;

/// 帧结构
const PICTURE_STRUCTURE_FRAME: u32 = 3;
const PICTURE_STRUCTURE_TOP_FIELD: u32 = 1;

/// 起始码之后的首字节偏移
const BODY_OFFSET: usize = 4;

/// frame_rate_code -> 帧率, 9..=13 为 Xing 等编码器使用的扩展值
const FRAME_RATES: [(u32, u32); 16] = [
    (0, 0),
    (24000, 1001),
    (24, 1),
    (25, 1),
    (30000, 1001),
    (30, 1),
    (50, 1),
    (60000, 1001),
    (60, 1),
    (15, 1),
    (5, 1),
    (10, 1),
    (12, 1),
    (15, 1),
    (0, 0),
    (0, 0),
];

/// 按 frame_rate_code 查表
pub fn frame_rate(code: u32) -> Option<Rational> {
    let (num, den) = *FRAME_RATES.get(code as usize)?;
    (num != 0).then(|| Rational::new(num, den))
}

/// 序列头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    /// 宽度 (不含扩展位)
    pub width: u32,
    /// 高度 (不含扩展位)
    pub height: u32,
    /// aspect_ratio_information
    pub aspect_ratio_code: u32,
    /// frame_rate_code
    pub frame_rate_code: u32,
    /// 码率 (400 bit/s 为单位)
    pub bit_rate: u32,
}

impl SequenceHeader {
    /// 解析序列头 (起始码之后的字节)
    pub fn parse(body: &[u8]) -> TaoResult<Self> {
        let mut br = BitReader::new(body);
        let width = br.read_bits(12)?;
        let height = br.read_bits(12)?;
        let aspect_ratio_code = br.read_bits(4)?;
        let frame_rate_code = br.read_bits(4)?;
        let bit_rate = br.read_bits(18)?;
        if width == 0 || height == 0 {
            return Err(TaoError::InvalidData(format!(
                "MPEG 视频: 序列头尺寸非法, {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            aspect_ratio_code,
            frame_rate_code,
            bit_rate,
        })
    }
}

/// 序列扩展 (MPEG-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceExtension {
    /// profile_and_level_indication
    pub profile_level: u32,
    /// progressive_sequence
    pub progressive: bool,
    /// chroma_format
    pub chroma_format: u32,
    /// 宽度高 2 位
    pub width_ext: u32,
    /// 高度高 2 位
    pub height_ext: u32,
    /// low_delay, 码流中没有 B 帧
    pub low_delay: bool,
    /// frame_rate_extension_n
    pub frame_rate_ext_n: u32,
    /// frame_rate_extension_d
    pub frame_rate_ext_d: u32,
}

impl SequenceExtension {
    /// 解析序列扩展 (起始码之后的字节, 含扩展 id)
    pub fn parse(body: &[u8]) -> TaoResult<Self> {
        let mut br = BitReader::new(body);
        if br.read_bits(4)? != SEQUENCE_EXTENSION_ID {
            return Err(TaoError::InvalidData("MPEG 视频: 不是序列扩展".into()));
        }
        let profile_level = br.read_bits(8)?;
        let progressive = br.read_flag()?;
        let chroma_format = br.read_bits(2)?;
        let width_ext = br.read_bits(2)?;
        let height_ext = br.read_bits(2)?;
        br.skip_bits(12 + 1 + 8)?; // bit_rate_extension, marker, vbv_buffer_size_extension
        let low_delay = br.read_flag()?;
        let frame_rate_ext_n = br.read_bits(2)?;
        let frame_rate_ext_d = br.read_bits(5)?;
        Ok(Self {
            profile_level,
            progressive,
            chroma_format,
            width_ext,
            height_ext,
            low_delay,
            frame_rate_ext_n,
            frame_rate_ext_d,
        })
    }
}

/// 图像编码扩展 (MPEG-2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureCodingExtension {
    /// picture_structure: 1 顶场, 2 底场, 3 帧
    pub picture_structure: u32,
    /// top_field_first
    pub top_field_first: bool,
    /// repeat_first_field
    pub repeat_first_field: bool,
    /// progressive_frame
    pub progressive_frame: bool,
}

impl Default for PictureCodingExtension {
    /// MPEG-1 图像: 逐行帧
    fn default() -> Self {
        Self {
            picture_structure: PICTURE_STRUCTURE_FRAME,
            top_field_first: false,
            repeat_first_field: false,
            progressive_frame: true,
        }
    }
}

impl PictureCodingExtension {
    /// 解析图像编码扩展 (起始码之后的字节, 含扩展 id)
    pub fn parse(body: &[u8]) -> TaoResult<Self> {
        let mut br = BitReader::new(body);
        if br.read_bits(4)? != PICTURE_CODING_EXTENSION_ID {
            return Err(TaoError::InvalidData("MPEG 视频: 不是图像编码扩展".into()));
        }
        br.skip_bits(16 + 2)?; // f_code[2][2], intra_dc_precision
        let picture_structure = br.read_bits(2)?;
        if picture_structure == 0 {
            return Err(TaoError::InvalidData("MPEG 视频: 保留的 picture_structure".into()));
        }
        let top_field_first = br.read_flag()?;
        br.skip_bits(5)?; // frame_pred_frame_dct .. alternate_scan
        let repeat_first_field = br.read_flag()?;
        br.skip_bits(1)?; // chroma_420_type
        let progressive_frame = br.read_flag()?;
        Ok(Self {
            picture_structure,
            top_field_first,
            repeat_first_field,
            progressive_frame,
        })
    }

    fn is_field(&self) -> bool {
        self.picture_structure != PICTURE_STRUCTURE_FRAME
    }

    /// 图像占用的场数
    pub fn field_count(&self, progressive_sequence: bool) -> u32 {
        if self.is_field() {
            1
        } else if progressive_sequence {
            match (self.repeat_first_field, self.top_field_first) {
                (true, true) => 6,
                (true, false) => 4,
                _ => 2,
            }
        } else if self.progressive_frame && self.repeat_first_field {
            3
        } else {
            2
        }
    }
}

/// 解析图像头, 返回 picture_coding_type
pub fn parse_picture_coding_type(body: &[u8]) -> TaoResult<u32> {
    let mut br = BitReader::new(body);
    br.skip_bits(10)?; // temporal_reference
    let coding_type = br.read_bits(3)?;
    if coding_type == 0 || coding_type > 4 {
        return Err(TaoError::InvalidData(format!(
            "MPEG 视频: picture_coding_type 非法, value={}",
            coding_type
        )));
    }
    Ok(coding_type)
}

/// 正在组装的图像
#[derive(Debug)]
struct Frame {
    units: Vec<Bytes>,
    pts: i64,
    dts: i64,
    /// picture_coding_type, 0 表示尚未见到图像头
    coding_type: u32,
    ext: PictureCodingExtension,
    has_slice: bool,
    has_sequence_header: bool,
    /// 缺少序列头的图像
    skip: bool,
    end_of_sequence: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            units: Vec::new(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            coding_type: 0,
            ext: PictureCodingExtension::default(),
            has_slice: false,
            has_sequence_header: false,
            skip: false,
            end_of_sequence: false,
        }
    }

    fn note_timestamps(&mut self, pts: i64, dts: i64) {
        if !is_valid(self.pts) && !is_valid(self.dts) {
            self.pts = pts;
            self.dts = dts;
        }
    }

    fn type_flags(&self) -> AccessUnitFlags {
        match self.coding_type {
            2 => AccessUnitFlags::TYPE_P,
            3 => AccessUnitFlags::TYPE_B,
            _ => AccessUnitFlags::TYPE_I,
        }
    }
}

/// MPEG-1/2 视频语法解析器
pub struct MpegVideoParser {
    codec_id: CodecId,
    /// 缓存的序列头单元与解析结果
    sequence: Option<(Bytes, SequenceHeader)>,
    /// 缓存的序列扩展单元与解析结果
    sequence_ext: Option<(Bytes, SequenceExtension)>,
    frame: Frame,
    /// 上一个输出的图像是场对中的第一场
    second_field: bool,
    last_ref_pts: i64,
    clock: TimestampClock,
    configured_rate: Option<Rational>,
    cc: CcExtractor,
    /// 损坏之后需要等待 I 图像
    wait_keyframe: bool,
    /// 下一个 I 图像前需要补上序列头
    insert_sequence: bool,
    dropped: u64,
}

impl MpegVideoParser {
    /// 创建解析器
    pub fn new(config: &StreamConfig) -> Self {
        let configured_rate = config.valid_frame_rate();
        let mut clock = TimestampClock::new(0, 1);
        if let Some(rate) = configured_rate.and_then(field_rate) {
            clock.change_rate(rate.num, rate.den);
        }
        Self {
            codec_id: config.codec_id,
            sequence: None,
            sequence_ext: None,
            frame: Frame::new(),
            second_field: false,
            last_ref_pts: NOPTS_VALUE,
            clock,
            configured_rate,
            cc: CcExtractor::new(),
            wait_keyframe: false,
            insert_sequence: false,
            dropped: 0,
        }
    }

    /// 已缓存的序列头
    pub fn sequence_header(&self) -> Option<&SequenceHeader> {
        self.sequence.as_ref().map(|(_, header)| header)
    }

    /// 已缓存的序列扩展
    pub fn sequence_extension(&self) -> Option<&SequenceExtension> {
        self.sequence_ext.as_ref().map(|(_, ext)| ext)
    }

    /// 码流声明的帧率 (含 MPEG-2 扩展), 缺失时取配置帧率
    pub fn frame_rate(&self) -> Option<Rational> {
        let base = self
            .sequence_header()
            .and_then(|seq| frame_rate(seq.frame_rate_code));
        let rate = match (base, self.sequence_extension()) {
            (Some(base), Some(ext)) => base.checked_mul(Rational::new(
                ext.frame_rate_ext_n + 1,
                ext.frame_rate_ext_d + 1,
            )),
            (base, _) => base,
        };
        rate.or(self.configured_rate)
    }

    fn update_clock_rate(&mut self) {
        if let Some(rate) = self.frame_rate().and_then(field_rate) {
            self.clock.change_rate(rate.num, rate.den);
        }
    }

    fn progressive_sequence(&self) -> bool {
        self.sequence_extension().is_none_or(|ext| ext.progressive)
    }

    fn low_delay(&self) -> bool {
        self.sequence_extension().is_some_and(|ext| ext.low_delay)
    }

    fn handle_unit(&mut self, unit: Bytes, pts: i64, dts: i64) -> Option<AccessUnit> {
        let code = unit[3];
        let body = &unit[BODY_OFFSET..];

        let mut out = None;
        if self.frame.has_slice && (code == PICTURE_START_CODE || code > SLICE_MAX_START_CODE) {
            if code == SEQUENCE_END_CODE {
                self.frame.units.push(unit);
                self.frame.end_of_sequence = true;
                return self.close_frame();
            }
            out = self.close_frame();
        }
        self.frame.note_timestamps(pts, dts);

        match code {
            PICTURE_START_CODE => {
                match parse_picture_coding_type(body) {
                    Ok(coding_type) => self.frame.coding_type = coding_type,
                    Err(err) => {
                        debug!("{}, 图像被丢弃", err);
                        self.frame.skip = true;
                    }
                }
                self.frame.ext = PictureCodingExtension::default();
                if self.sequence.is_none() {
                    self.frame.skip = true;
                }
            }
            1..=SLICE_MAX_START_CODE => {
                if self.frame.coding_type == 0 {
                    return out;
                }
                self.frame.has_slice = true;
            }
            SEQUENCE_HEADER_CODE => match SequenceHeader::parse(body) {
                Ok(header) => {
                    if self.sequence_header() != Some(&header) {
                        debug!(
                            "MPEG 视频: 新的序列头, {}x{}, frame_rate_code={}",
                            header.width, header.height, header.frame_rate_code
                        );
                    }
                    self.sequence = Some((unit.clone(), header));
                    self.frame.has_sequence_header = true;
                    self.update_clock_rate();
                }
                Err(err) => {
                    warn!("{}", err);
                    return out;
                }
            },
            EXTENSION_START_CODE => match body.first().map(|b| u32::from(b >> 4)) {
                Some(SEQUENCE_EXTENSION_ID) => match SequenceExtension::parse(body) {
                    Ok(ext) => {
                        self.sequence_ext = Some((unit.clone(), ext));
                        self.update_clock_rate();
                    }
                    Err(err) => debug!("MPEG 视频: 序列扩展无法解析: {}", err),
                },
                Some(PICTURE_CODING_EXTENSION_ID) => match PictureCodingExtension::parse(body) {
                    Ok(ext) => self.frame.ext = ext,
                    Err(err) => debug!("MPEG 视频: 图像编码扩展无法解析: {}", err),
                },
                _ => {}
            },
            USER_DATA_START_CODE => {
                self.cc
                    .detect_and_extract(self.frame.ext.top_field_first, body);
            }
            SEQUENCE_END_CODE => return out,
            _ => {}
        }
        self.frame.units.push(unit);
        out
    }

    /// 结束当前图像, 生成访问单元
    fn close_frame(&mut self) -> Option<AccessUnit> {
        let frame = std::mem::replace(&mut self.frame, Frame::new());
        let captions = self.cc.take();
        if !frame.has_slice {
            return None;
        }
        if frame.skip {
            self.dropped += 1;
            debug!("MPEG 视频: 序列头之前的图像被丢弃");
            return None;
        }

        let mut flags = frame.type_flags();
        let keyframe = flags.contains(AccessUnitFlags::TYPE_I);
        if self.wait_keyframe {
            if !keyframe {
                self.dropped += 1;
                debug!("MPEG 视频: 等待 I 图像, 丢弃 {} 图像", frame.coding_type);
                return None;
            }
            self.wait_keyframe = false;
        }

        let ext = frame.ext;
        if ext.is_field() {
            flags |= AccessUnitFlags::SINGLE_FIELD;
            flags |= if ext.picture_structure == PICTURE_STRUCTURE_TOP_FIELD {
                AccessUnitFlags::TOP_FIELD_FIRST
            } else {
                AccessUnitFlags::BOTTOM_FIELD_FIRST
            };
        } else if !ext.progressive_frame {
            flags |= if ext.top_field_first {
                AccessUnitFlags::TOP_FIELD_FIRST
            } else {
                AccessUnitFlags::BOTTOM_FIELD_FIRST
            };
        }
        if frame.end_of_sequence {
            flags |= AccessUnitFlags::END_OF_SEQUENCE;
        }

        let size = frame.units.iter().map(Bytes::len).sum::<usize>();
        let mut data = BytesMut::with_capacity(size);
        if keyframe && self.insert_sequence {
            if !frame.has_sequence_header {
                if let Some((unit, _)) = &self.sequence {
                    data.put_slice(unit);
                }
                if let Some((unit, _)) = &self.sequence_ext {
                    data.put_slice(unit);
                }
            }
            self.insert_sequence = false;
        }
        for unit in &frame.units {
            data.put_slice(unit);
        }

        let is_b = frame.coding_type == 3;
        let first_field = ext.is_field() && !self.second_field;
        if self.low_delay() || is_b {
            if is_valid(frame.pts) {
                self.clock.set(frame.pts);
            }
            if is_valid(frame.dts) {
                self.clock.set(frame.dts);
            }
        } else {
            if is_valid(self.last_ref_pts) && !self.second_field {
                self.clock.set(self.last_ref_pts);
            }
            if is_valid(frame.dts) {
                self.clock.set(frame.dts);
            }
            if !self.second_field {
                self.last_ref_pts = frame.pts;
            }
        }
        let dts = self.clock.get();
        let pts = if is_valid(frame.pts) {
            frame.pts
        } else if is_b {
            dts
        } else {
            NOPTS_VALUE
        };
        let fields = ext.field_count(self.progressive_sequence());
        let duration = self.clock.duration_of(fields);
        self.clock.increment(fields);
        self.second_field = first_field;

        let mut au = AccessUnit::new(data.freeze());
        au.pts = pts;
        au.dts = dts;
        au.duration = duration;
        au.flags = flags;
        au.captions = captions;
        Some(au)
    }
}

/// 帧率转换为场率
fn field_rate(frame_rate: Rational) -> Option<Rational> {
    frame_rate
        .checked_mul(Rational::new(2, 1))
        .filter(Rational::is_valid)
}

impl SyntaxParser for MpegVideoParser {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn sync_len(&self) -> usize {
        START_CODE.len()
    }

    fn sync_pattern(&self) -> Option<&[u8]> {
        Some(START_CODE)
    }

    fn min_unit_size(&self) -> usize {
        BODY_OFFSET
    }

    fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound> {
        match cursor.byte_at(START_CODE.len()) {
            None => Verdict::NeedMoreData,
            Some(_) => Verdict::Ready(FrameBound::NextSync),
        }
    }

    fn reset(&mut self, broken: bool) {
        self.frame = Frame::new();
        self.cc.flush();
        self.clock.reset();
        self.last_ref_pts = NOPTS_VALUE;
        self.second_field = false;
        if broken {
            self.wait_keyframe = true;
            self.insert_sequence = true;
        }
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        if unit.data.len() < BODY_OFFSET {
            return None;
        }
        self.handle_unit(unit.data, unit.pts, unit.dts)
    }

    fn drain(&mut self) -> Option<AccessUnit> {
        self.close_frame()
    }

    fn extradata(&self) -> Option<Bytes> {
        let (seq, _) = self.sequence.as_ref()?;
        let mut out = BytesMut::from(&seq[..]);
        if let Some((ext, _)) = &self.sequence_ext {
            out.put_slice(ext);
        }
        Some(out.freeze())
    }

    fn dropped_units(&self) -> u64 {
        self.dropped
    }
}

/// 创建 MPEG-1/2 视频分包器
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    let mut packetizer = Packetizer::new(MpegVideoParser::new(config));
    packetizer.feed_header(&config.extradata);
    Ok(Box::new(packetizer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{Fragment, FragmentFlags};
    use tao_core::bitwriter::BitWriter;

    fn unit(code: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x01, code];
        out.extend_from_slice(body);
        out
    }

    /// 352x288, 25fps
    fn sequence_header() -> Vec<u8> {
        unit(0xB3, &[0x16, 0x01, 0x20, 0x13, 0xFF, 0xFF, 0xE0, 0x18])
    }

    fn sequence_extension(progressive: bool, low_delay: bool) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(SEQUENCE_EXTENSION_ID, 4);
        bw.write_bits(0x48, 8);
        bw.write_bit(progressive);
        bw.write_bits(1, 2);
        bw.write_bits(0, 4);
        bw.write_bits(0xFFF, 12);
        bw.write_bit(true);
        bw.write_bits(0xFF, 8);
        bw.write_bit(low_delay);
        bw.write_bits(0, 7);
        unit(0xB5, &bw.finish())
    }

    fn picture_coding_extension(structure: u32, tff: bool, rff: bool, progressive: bool) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(PICTURE_CODING_EXTENSION_ID, 4);
        bw.write_bits(0xFFFF, 16);
        bw.write_bits(0, 2);
        bw.write_bits(structure, 2);
        bw.write_bit(tff);
        bw.write_bits(0b10000, 5);
        bw.write_bit(rff);
        bw.write_bit(true);
        bw.write_bit(progressive);
        bw.write_bits(0x7F, 7);
        unit(0xB5, &bw.finish())
    }

    fn picture(coding_type: u32) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(1, 10);
        bw.write_bits(coding_type, 3);
        bw.write_bits(0xFFFF, 16);
        bw.write_bits(0x7, 3);
        unit(0x00, &bw.finish())
    }

    fn slice() -> Vec<u8> {
        unit(0x01, &[0x12, 0x34, 0x56])
    }

    fn gop() -> Vec<u8> {
        unit(0xB8, &[0x08, 0x40, 0x10, 0x80])
    }

    fn packetizer(codec_id: CodecId) -> Packetizer<MpegVideoParser> {
        Packetizer::new(MpegVideoParser::new(&StreamConfig::new(codec_id)))
    }

    fn mpeg1_stream() -> Vec<Vec<u8>> {
        vec![
            [sequence_header(), gop(), picture(1), slice()].concat(),
            [picture(2), slice()].concat(),
            [picture(3), slice()].concat(),
            unit(0xB7, &[]),
        ]
    }

    #[test]
    fn test_序列头解析与帧率表() {
        let header = SequenceHeader::parse(&sequence_header()[4..]).unwrap();
        assert_eq!((header.width, header.height), (352, 288));
        assert_eq!(header.frame_rate_code, 3);
        assert_eq!(frame_rate(4), Some(Rational::new(30000, 1001)));
        assert_eq!(frame_rate(0), None);
        assert_eq!(frame_rate(15), None);
    }

    #[test]
    fn test_图像切分与重排时间戳() {
        let mut p = packetizer(CodecId::Mpeg1Video);
        let pieces = mpeg1_stream();
        let stamps = [(80_000, 40_000), (200_000, NOPTS_VALUE), (120_000, NOPTS_VALUE)];
        let mut out = Vec::new();
        for (piece, (pts, dts)) in pieces.iter().zip(stamps) {
            out.extend(p.push(Fragment::new(piece.clone()).with_timestamps(pts, dts)));
        }
        out.extend(p.push(Fragment::new(pieces[3].clone())));
        out.extend(p.finish());

        assert_eq!(out.len(), 3);
        let types: String = out.iter().map(AccessUnit::picture_type).collect();
        assert_eq!(types, "IPB");
        assert!(out[0].data.starts_with(&sequence_header()));
        assert_eq!((out[0].pts, out[0].dts), (80_000, 40_000));
        assert_eq!((out[1].pts, out[1].dts), (200_000, 80_000));
        assert_eq!((out[2].pts, out[2].dts), (120_000, 120_000));
        assert!(out.iter().all(|au| au.duration == 40_000));
        assert!(out[2].flags.contains(AccessUnitFlags::END_OF_SEQUENCE));
        assert!(out[2].data.ends_with(&[0x00, 0x00, 0x01, 0xB7]));
    }

    #[test]
    fn test_切分无关() {
        let stream = mpeg1_stream().concat();
        let mut reference = packetizer(CodecId::Mpeg1Video);
        let mut expected = reference.push(Fragment::new(stream.clone()));
        expected.extend(reference.finish());

        let mut p = packetizer(CodecId::Mpeg1Video);
        let mut out = Vec::new();
        for byte in &stream {
            out.extend(p.push(Fragment::new(vec![*byte])));
        }
        out.extend(p.finish());
        let data = |aus: &[AccessUnit]| aus.iter().map(|au| au.data.to_vec()).collect::<Vec<_>>();
        assert_eq!(data(&out), data(&expected));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_序列头之前的图像被丢弃() {
        let stream = [picture(1), slice(), sequence_header(), picture(1), slice()].concat();
        let mut p = packetizer(CodecId::Mpeg1Video);
        let mut out = p.push(Fragment::new(stream));
        out.extend(p.finish());
        assert_eq!(out.len(), 1);
        assert!(out[0].data.starts_with(&sequence_header()));
        assert_eq!(p.stats().dropped_units, 1);
    }

    #[test]
    fn test_场图像单独输出() {
        let stream = [
            sequence_header(),
            sequence_extension(false, false),
            picture(1),
            picture_coding_extension(1, true, false, false),
            slice(),
            picture(2),
            picture_coding_extension(2, true, false, false),
            slice(),
        ]
        .concat();
        let mut p = packetizer(CodecId::Mpeg2Video);
        let mut out = p.push(Fragment::new(stream).with_timestamps(NOPTS_VALUE, 0));
        out.extend(p.finish());
        assert_eq!(out.len(), 2);
        assert!(out[0].flags.contains(AccessUnitFlags::SINGLE_FIELD | AccessUnitFlags::TOP_FIELD_FIRST));
        assert!(out[1].flags.contains(AccessUnitFlags::SINGLE_FIELD | AccessUnitFlags::BOTTOM_FIELD_FIRST));
        assert_eq!(out[0].duration, 20_000);
        assert_eq!(out[1].dts, 20_000);
    }

    #[test]
    fn test_重复场时长() {
        let stream = [
            sequence_header(),
            sequence_extension(true, true),
            picture(1),
            picture_coding_extension(3, true, true, true),
            slice(),
            picture(2),
            picture_coding_extension(3, false, true, true),
            slice(),
            picture(2),
            picture_coding_extension(3, false, false, true),
            slice(),
        ]
        .concat();
        let mut p = packetizer(CodecId::Mpeg2Video);
        let mut out = p.push(Fragment::new(stream).with_timestamps(0, 0));
        out.extend(p.finish());
        let durations: Vec<i64> = out.iter().map(|au| au.duration).collect();
        assert_eq!(durations, vec![120_000, 80_000, 40_000]);
        let dts: Vec<i64> = out.iter().map(|au| au.dts).collect();
        assert_eq!(dts, vec![0, 120_000, 200_000]);
        assert!(p.parser().low_delay());
    }

    #[test]
    fn test_损坏后补序列头并等待_i_图像() {
        let mut p = packetizer(CodecId::Mpeg1Video);
        let mut out = p.push(Fragment::new(
            [sequence_header(), picture(1), slice(), picture(2), slice()].concat(),
        ));
        assert_eq!(out.len(), 1);
        out.extend(p.push(Fragment::new(vec![0xAB; 8]).with_flags(FragmentFlags::CORRUPTED)));
        assert_eq!(out.len(), 1);

        let mut after = p.push(Fragment::new([picture(2), slice(), picture(1), slice()].concat()));
        after.extend(p.finish());
        assert_eq!(after.len(), 1);
        assert!(after[0].is_keyframe());
        assert!(after[0].data.starts_with(&sequence_header()));
        assert!(after[0].flags.contains(AccessUnitFlags::DISCONTINUITY));
        assert!(p.parser().sequence_header().is_some());
    }

    #[test]
    fn test_user_data_字幕() {
        let mut user_data = b"GA94\x03".to_vec();
        user_data.extend_from_slice(&[0x41, 0xFF, 0xFC, 0x94, 0x2C, 0xFF]);
        let stream = [sequence_header(), picture(1), unit(0xB2, &user_data), slice()].concat();
        let mut p = packetizer(CodecId::Mpeg2Video);
        let mut out = p.push(Fragment::new(stream));
        out.extend(p.finish());
        assert_eq!(out.len(), 1);
        let captions = out[0].captions.as_ref().unwrap();
        assert_eq!(captions.data, vec![0xFC, 0x94, 0x2C]);
    }
}
