//! H.264 Annex-B 分包.
//!
//! 每个 NAL 以下一个起始码为界, 按 7.4.1.2 的规则组装为访问单元:
//! - AUD/SPS/PPS/SEI/类型 13..=18 以及新图像的首个 slice 结束进行中的访问单元
//! - SPS/PPS 按 id 缓存, 不单独输出; 在关键帧或参数集变化后插入到访问单元开头
//! - 在见到 SPS 与 PPS 之前无法解析 slice, 对应数据被丢弃
//!
//! 输出统一使用 4 字节起始码.

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};
use tao_core::timestamp::is_valid;
use tao_core::{Rational, TaoResult, TimestampClock, NOPTS_VALUE};

use crate::access_unit::{AccessUnit, AccessUnitFlags};
use crate::bytestream::ByteCursor;
use crate::cc::{CcExtractor, CcPayloadType};
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::fragment::{Fragment, FragmentFlags};
use crate::parsers::annexb::{self, START_CODE};
use crate::stream_config::StreamConfig;

use super::nal::{AvcConfig, NalHeader, NalUnitType};
use super::pps::{parse_pps, Pps, MAX_PPS_COUNT};
use super::sei::{parse_sei, SeiMessage};
use super::slice::{SliceHeader, SliceType};
use super::sps::{parse_sps, Sps, MAX_SPS_COUNT};

/// slice 头部中分包需要的字段总在 NAL 开头的这一段之内
const SLICE_HEADER_PEEK: usize = 96;

/// 起始码 (4 字节) 之后的 NAL 头部偏移
const NAL_HEADER_OFFSET: usize = 4;

/// 缓存的参数集: 解析结果与其 Annex-B 字节 (含 4 字节起始码)
#[derive(Debug, Clone)]
struct ParameterSet<T> {
    parsed: T,
    nal: Bytes,
}

/// 正在组装的图像
#[derive(Debug)]
struct Picture {
    nals: Vec<Bytes>,
    pts: i64,
    dts: i64,
    /// 最近一个 slice 的头部, 用于新图像检测
    slice: Option<SliceHeader>,
    has_p: bool,
    has_b: bool,
    end_of_sequence: bool,
}

impl Picture {
    fn new() -> Self {
        Self {
            nals: Vec::new(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            slice: None,
            has_p: false,
            has_b: false,
            end_of_sequence: false,
        }
    }

    fn has_slice(&self) -> bool {
        self.slice.is_some()
    }

    /// 图像取第一个携带时间戳的 NAL 的时间戳
    fn note_timestamps(&mut self, pts: i64, dts: i64) {
        if !is_valid(self.pts) && !is_valid(self.dts) {
            self.pts = pts;
            self.dts = dts;
        }
    }

    fn add_slice(&mut self, slice: SliceHeader) {
        match slice.slice_type {
            SliceType::B => self.has_b = true,
            SliceType::P | SliceType::Sp => self.has_p = true,
            SliceType::I | SliceType::Si => {}
        }
        self.slice = Some(slice);
    }

    fn type_flags(&self) -> AccessUnitFlags {
        if self.has_b {
            AccessUnitFlags::TYPE_B
        } else if self.has_p {
            AccessUnitFlags::TYPE_P
        } else {
            AccessUnitFlags::TYPE_I
        }
    }
}

/// H.264 语法解析器
pub struct H264Parser {
    sps: Vec<Option<ParameterSet<Sps>>>,
    pps: Vec<Option<ParameterSet<Pps>>>,
    picture: Picture,
    /// 参数集有变化, 下一个访问单元需要携带全部参数集
    params_changed: bool,
    /// 已输出过可独立解码的图像
    got_keyframe: bool,
    /// 恢复点 SEI 声明的剩余预滚帧数
    recovery_frames: Option<u32>,
    cc: CcExtractor,
    /// 以场率 (2 倍帧率) 计数的 DTS 插值时钟
    clock: TimestampClock,
    configured_rate: Option<Rational>,
    /// avcC 输入的 NAL 长度前缀大小
    length_size: Option<usize>,
    packetized: bool,
    dropped: u64,
}

impl H264Parser {
    /// 按流配置创建解析器
    ///
    /// extradata 以 0x01 开头时按 avcC 解析, 其中的 SPS/PPS 直接进入缓存,
    /// 之后的输入被视为长度前缀形式.
    pub fn new(config: &StreamConfig) -> TaoResult<Self> {
        let mut parser = Self {
            sps: (0..MAX_SPS_COUNT).map(|_| None).collect(),
            pps: (0..MAX_PPS_COUNT).map(|_| None).collect(),
            picture: Picture::new(),
            params_changed: false,
            got_keyframe: false,
            recovery_frames: None,
            cc: CcExtractor::new(),
            clock: TimestampClock::new(0, 1),
            configured_rate: config.valid_frame_rate(),
            length_size: None,
            packetized: config.packetized,
            dropped: 0,
        };
        if let Some(rate) = parser.configured_rate.and_then(field_rate) {
            parser.clock.change_rate(rate.num, rate.den);
        }

        if config.extradata.first() == Some(&0x01) {
            let avcc = AvcConfig::parse(&config.extradata)?;
            for nal in avcc.sps_list.iter().chain(avcc.pps_list.iter()) {
                let nal = annexb::with_start_code(nal);
                let Ok(header) = NalHeader::parse(nal[NAL_HEADER_OFFSET]) else {
                    warn!("H.264: avcC 中的参数集头部非法, 已忽略");
                    continue;
                };
                match header.nal_type {
                    NalUnitType::Sps => parser.store_sps(nal),
                    NalUnitType::Pps => parser.store_pps(nal),
                    other => warn!("H.264: avcC 中出现非参数集 NAL, type={:?}", other),
                }
            }
            parser.length_size = Some(avcc.length_size);
            debug!(
                "H.264: 使用 avcC 配置, length_size={}, sps={}, pps={}",
                avcc.length_size,
                avcc.sps_list.len(),
                avcc.pps_list.len()
            );
        }
        Ok(parser)
    }

    /// 输入是否为长度前缀形式 (来自 avcC)
    pub fn is_length_prefixed(&self) -> bool {
        self.length_size.is_some()
    }

    /// 已缓存的 SPS
    pub fn sps(&self, sps_id: u32) -> Option<&Sps> {
        self.sps
            .get(sps_id as usize)?
            .as_ref()
            .map(|set| &set.parsed)
    }

    /// 已缓存的 PPS
    pub fn pps(&self, pps_id: u32) -> Option<&Pps> {
        self.pps
            .get(pps_id as usize)?
            .as_ref()
            .map(|set| &set.parsed)
    }

    fn has_parameter_sets(&self) -> bool {
        self.sps.iter().any(Option::is_some) && self.pps.iter().any(Option::is_some)
    }

    /// 依次写入全部 SPS 与全部 PPS
    fn write_parameter_sets(&self, out: &mut BytesMut) {
        for set in self.sps.iter().flatten() {
            out.put_slice(&set.nal);
        }
        for set in self.pps.iter().flatten() {
            out.put_slice(&set.nal);
        }
    }

    fn active_sps(&self, pps_id: u32) -> Option<&Sps> {
        self.pps(pps_id).and_then(|pps| self.sps(pps.sps_id))
    }

    fn store_sps(&mut self, nal: Bytes) {
        let rbsp = annexb::unescape(&nal[NAL_HEADER_OFFSET + 1..]);
        let sps = match parse_sps(&rbsp) {
            Ok(sps) => sps,
            Err(err) => {
                warn!("H.264: SPS 解析失败, 已丢弃: {}", err);
                return;
            }
        };
        let id = sps.sps_id as usize;
        if self.sps[id].as_ref().is_some_and(|old| old.nal == nal) {
            return;
        }
        debug!(
            "H.264: 新的 SPS, sps_id={}, {}x{}, profile={}, level={}",
            sps.sps_id, sps.width, sps.height, sps.profile_idc, sps.level_idc
        );
        if let Some(rate) = sps
            .timing
            .map(|t| Rational::new(t.time_scale, t.num_units_in_tick))
            .or_else(|| self.configured_rate.and_then(field_rate))
        {
            self.clock.change_rate(rate.num, rate.den);
        }
        self.sps[id] = Some(ParameterSet { parsed: sps, nal });
        self.params_changed = true;
    }

    fn store_pps(&mut self, nal: Bytes) {
        let rbsp = annexb::unescape(&nal[NAL_HEADER_OFFSET + 1..]);
        let pps = match parse_pps(&rbsp) {
            Ok(pps) => pps,
            Err(err) => {
                warn!("H.264: PPS 解析失败, 已丢弃: {}", err);
                return;
            }
        };
        let slot = &mut self.pps[pps.pps_id as usize];
        if slot.as_ref().is_some_and(|old| old.nal == nal) {
            return;
        }
        debug!("H.264: 新的 PPS, pps_id={}, sps_id={}", pps.pps_id, pps.sps_id);
        *slot = Some(ParameterSet { parsed: pps, nal });
        self.params_changed = true;
    }

    fn parse_slice(&self, nal: &[u8], header: NalHeader) -> TaoResult<SliceHeader> {
        let body = &nal[NAL_HEADER_OFFSET + 1..];
        let rbsp = annexb::unescape(&body[..body.len().min(SLICE_HEADER_PEEK)]);
        SliceHeader::parse(&rbsp, header, |pps_id| {
            let pps = &self.pps.get(pps_id as usize)?.as_ref()?.parsed;
            let sps = &self.sps.get(pps.sps_id as usize)?.as_ref()?.parsed;
            Some((sps, pps))
        })
    }

    fn handle_sei(&mut self, nal: &[u8]) {
        let rbsp = annexb::unescape(&nal[NAL_HEADER_OFFSET + 1..]);
        for message in parse_sei(&rbsp) {
            match message {
                SeiMessage::Captions(data) => self.cc.extract(CcPayloadType::Ga94, true, &data),
                SeiMessage::RecoveryPoint(point) => {
                    if !self.got_keyframe {
                        debug!(
                            "H.264: 恢复点, recovery_frame_cnt={}, broken_link={}",
                            point.recovery_frame_cnt, point.broken_link
                        );
                        self.recovery_frames = Some(point.recovery_frame_cnt);
                    }
                }
            }
        }
    }

    /// 处理一个 Annex-B NAL (`00 00 00 01` + NAL)
    fn handle_nal(&mut self, nal: Bytes, pts: i64, dts: i64) -> Option<AccessUnit> {
        let header = match NalHeader::parse(nal[NAL_HEADER_OFFSET]) {
            Ok(header) => header,
            Err(err) => {
                debug!("{}", err);
                return None;
            }
        };

        let slice = if header.nal_type.has_slice_header() {
            match self.parse_slice(&nal, header) {
                Ok(slice) => Some(slice),
                Err(err) => {
                    debug!("H.264: slice 头部无法解析, NAL 被丢弃: {}", err);
                    return None;
                }
            }
        } else {
            None
        };

        let starts_picture = match &slice {
            Some(slice) => self
                .picture
                .slice
                .as_ref()
                .is_some_and(|prev| slice.is_new_picture(prev)),
            None => header.nal_type.starts_access_unit() && self.picture.has_slice(),
        };
        let mut out = if starts_picture {
            self.close_picture()
        } else {
            None
        };
        self.picture.note_timestamps(pts, dts);

        match header.nal_type {
            NalUnitType::Sps => self.store_sps(nal),
            NalUnitType::Pps => self.store_pps(nal),
            NalUnitType::Sei => {
                self.handle_sei(&nal);
                self.picture.nals.push(nal);
            }
            NalUnitType::SliceDpb | NalUnitType::SliceDpc => {
                if self.picture.has_slice() {
                    self.picture.nals.push(nal);
                }
            }
            NalUnitType::EndOfSequence | NalUnitType::EndOfStream => {
                if self.picture.has_slice() {
                    self.picture.nals.push(nal);
                    self.picture.end_of_sequence = true;
                    out = self.close_picture();
                }
            }
            NalUnitType::FillerData => {}
            _ => {
                if let Some(slice) = slice {
                    self.picture.add_slice(slice);
                }
                self.picture.nals.push(nal);
            }
        }
        out
    }

    /// 结束当前图像, 生成访问单元
    fn close_picture(&mut self) -> Option<AccessUnit> {
        let picture = std::mem::replace(&mut self.picture, Picture::new());
        let captions = self.cc.take();
        let slice = picture.slice?;

        let mut flags = picture.type_flags();
        let keyframe = flags.contains(AccessUnitFlags::TYPE_I);
        if !self.got_keyframe {
            if keyframe {
                self.got_keyframe = true;
                self.recovery_frames = None;
            } else {
                match self.recovery_frames {
                    Some(0) => {
                        self.got_keyframe = true;
                        self.recovery_frames = None;
                    }
                    Some(remaining) => {
                        flags |= AccessUnitFlags::PREROLL;
                        self.recovery_frames = Some(remaining - 1);
                    }
                    None => {
                        self.dropped += 1;
                        debug!(
                            "H.264: 首个关键帧之前的图像被丢弃, frame_num={}",
                            slice.frame_num
                        );
                        return None;
                    }
                }
            }
        }
        if slice.field_pic {
            flags |= AccessUnitFlags::SINGLE_FIELD;
            flags |= if slice.bottom_field {
                AccessUnitFlags::BOTTOM_FIELD_FIRST
            } else {
                AccessUnitFlags::TOP_FIELD_FIRST
            };
        }
        if picture.end_of_sequence {
            flags |= AccessUnitFlags::END_OF_SEQUENCE;
        }

        let mut data = BytesMut::with_capacity(picture.nals.iter().map(Bytes::len).sum::<usize>());
        let mut nals = picture.nals.into_iter().peekable();
        if keyframe || self.params_changed {
            if let Some(aud) = nals.next_if(|nal| nal[NAL_HEADER_OFFSET] & 0x1F == 9) {
                data.put_slice(&aud);
            }
            self.write_parameter_sets(&mut data);
            self.params_changed = false;
        }
        for nal in nals {
            data.put_slice(&nal);
        }

        let decode_order = self
            .active_sps(slice.pps_id)
            .is_some_and(Sps::output_order_is_decode_order);
        let (mut pts, mut dts) = (picture.pts, picture.dts);
        if is_valid(dts) {
            self.clock.set(dts);
        } else if is_valid(pts) && decode_order {
            dts = pts;
            self.clock.set(dts);
        } else {
            dts = self.clock.get();
        }
        if !is_valid(pts) && decode_order {
            pts = dts;
        }
        let fields = if slice.field_pic { 1 } else { 2 };
        let duration = self.clock.duration_of(fields);
        self.clock.increment(fields);

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
    frame_rate.checked_mul(Rational::new(2, 1))
}

impl SyntaxParser for H264Parser {
    fn codec_id(&self) -> CodecId {
        CodecId::H264
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
            Some(byte) if byte & 0x80 != 0 => Verdict::Reject,
            Some(_) => Verdict::Ready(FrameBound::NextSync),
        }
    }

    fn reset(&mut self, broken: bool) {
        self.picture = Picture::new();
        self.cc.flush();
        self.clock.reset();
        self.params_changed = true;
        if broken {
            self.got_keyframe = false;
            self.recovery_frames = None;
        }
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        // 去除属于下一个起始码的前导零
        let payload = unit.data.get(NAL_HEADER_OFFSET..)?;
        let end = NAL_HEADER_OFFSET + annexb::strip_trailing_zeros(payload).len();
        if end == NAL_HEADER_OFFSET {
            return None;
        }
        self.handle_nal(unit.data.slice(..end), unit.pts, unit.dts)
    }

    fn validate(&mut self, _au: &mut AccessUnit) -> bool {
        if !self.has_parameter_sets() {
            warn!("H.264: 尚未收到 SPS/PPS, 访问单元被丢弃");
            return false;
        }
        true
    }

    fn drain(&mut self) -> Option<AccessUnit> {
        self.close_picture()
    }

    fn prepare(&mut self, mut fragment: Fragment) -> Option<Fragment> {
        if let Some(length_size) = self.length_size {
            match annexb::length_prefixed_to_annexb(&fragment.data, length_size) {
                Ok(data) => fragment.data = data,
                Err(err) => {
                    warn!("H.264: 长度前缀数据无法转换, 片段被丢弃: {}", err);
                    return None;
                }
            }
            fragment.flags |= FragmentFlags::AU_END;
        } else if self.packetized {
            fragment.flags |= FragmentFlags::AU_END;
        }
        Some(fragment)
    }

    fn extradata(&self) -> Option<Bytes> {
        let mut out = BytesMut::new();
        self.write_parameter_sets(&mut out);
        (!out.is_empty()).then(|| out.freeze())
    }

    fn dropped_units(&self) -> u64 {
        self.dropped
    }
}

/// 创建 H.264 分包器; Annex-B 形式的 extradata 作为配置数据预先送入
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    let parser = H264Parser::new(config)?;
    let length_prefixed = parser.is_length_prefixed();
    let mut packetizer = Packetizer::new(parser);
    if !length_prefixed {
        packetizer.feed_header(&config.extradata);
    }
    Ok(Box::new(packetizer))
}
