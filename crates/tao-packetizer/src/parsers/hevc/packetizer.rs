//! H.265 Annex-B 分包.
//!
//! 图像边界由 first_slice_segment_in_pic_flag 决定; VPS/SPS/PPS/AUD/前缀 SEI 等
//! 出现在 VCL 之后时同样结束当前访问单元. 参数集按 id 缓存, 在随机接入点或参数集
//! 变化后按 VPS, SPS, PPS 的顺序插入到访问单元开头 (AUD 之后).
//!
//! 输出统一使用 4 字节起始码.

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, warn};
use tao_core::timestamp::is_valid;
use tao_core::{TaoResult, TimestampClock, NOPTS_VALUE};

use crate::access_unit::{AccessUnit, AccessUnitFlags};
use crate::bytestream::ByteCursor;
use crate::cc::{CcExtractor, CcPayloadType};
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::fragment::{Fragment, FragmentFlags};
use crate::parsers::annexb::{self, START_CODE};
use crate::parsers::h264::sei::{parse_sei, SeiMessage};
use crate::stream_config::StreamConfig;

use super::nal::{
    HvcConfig, NalHeader, NAL_AUD, NAL_EOB, NAL_EOS, NAL_FD, NAL_HEADER_SIZE, NAL_PPS,
    NAL_PREFIX_SEI, NAL_SPS, NAL_SUFFIX_SEI, NAL_VPS,
};
use super::params::{
    parse_pps, parse_sps, parse_vps, Pps, SliceHeader, SliceType, Sps, Vps, MAX_PPS_COUNT,
    MAX_SPS_COUNT, MAX_VPS_COUNT,
};

/// 首个 slice segment 头部中分包需要的字段总在这一段之内
const SLICE_HEADER_PEEK: usize = 32;

/// 起始码 (4 字节) 之后的 NAL 头部偏移
const NAL_HEADER_OFFSET: usize = 4;

/// NAL 负载 (RBSP 转义前) 的起始偏移
const NAL_PAYLOAD_OFFSET: usize = NAL_HEADER_OFFSET + NAL_HEADER_SIZE;

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
    /// 首个 slice segment 的头部
    slice: Option<SliceHeader>,
    irap: bool,
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
            irap: false,
            has_p: false,
            has_b: false,
            end_of_sequence: false,
        }
    }

    fn has_slice(&self) -> bool {
        self.slice.is_some()
    }

    fn note_timestamps(&mut self, pts: i64, dts: i64) {
        if !is_valid(self.pts) && !is_valid(self.dts) {
            self.pts = pts;
            self.dts = dts;
        }
    }

    fn type_flags(&self) -> AccessUnitFlags {
        if self.irap {
            AccessUnitFlags::TYPE_I
        } else if self.has_b {
            AccessUnitFlags::TYPE_B
        } else if self.has_p {
            AccessUnitFlags::TYPE_P
        } else {
            AccessUnitFlags::TYPE_I
        }
    }
}

/// H.265 语法解析器
pub struct HevcParser {
    vps: Vec<Option<ParameterSet<Vps>>>,
    sps: Vec<Option<ParameterSet<Sps>>>,
    pps: Vec<Option<ParameterSet<Pps>>>,
    picture: Picture,
    params_changed: bool,
    got_keyframe: bool,
    /// 恢复点 SEI 声明的剩余预滚帧数
    recovery_frames: Option<u32>,
    cc: CcExtractor,
    /// 以帧率计数的 DTS 插值时钟
    clock: TimestampClock,
    /// hvcC 输入的 NAL 长度前缀大小
    length_size: Option<usize>,
    packetized: bool,
    dropped: u64,
}

impl HevcParser {
    /// 按流配置创建解析器
    ///
    /// extradata 以 0x01 开头时按 hvcC 解析, 其中的参数集直接进入缓存,
    /// 之后的输入被视为长度前缀形式.
    pub fn new(config: &StreamConfig) -> TaoResult<Self> {
        let mut parser = Self {
            vps: (0..MAX_VPS_COUNT).map(|_| None).collect(),
            sps: (0..MAX_SPS_COUNT).map(|_| None).collect(),
            pps: (0..MAX_PPS_COUNT).map(|_| None).collect(),
            picture: Picture::new(),
            params_changed: false,
            got_keyframe: false,
            recovery_frames: None,
            cc: CcExtractor::new(),
            clock: TimestampClock::new(0, 1),
            length_size: None,
            packetized: config.packetized,
            dropped: 0,
        };
        if let Some(rate) = config.valid_frame_rate() {
            parser.clock.change_rate(rate.num, rate.den);
        }

        if config.extradata.first() == Some(&0x01) {
            let hvcc = HvcConfig::parse(&config.extradata)?;
            for nal in &hvcc.nals {
                let nal = annexb::with_start_code(nal);
                match parser.nal_header(&nal).map(|h| h.nal_type) {
                    Some(NAL_VPS | NAL_SPS | NAL_PPS) => parser.store_parameter_set(nal),
                    // hvcC 中的 SEI 对分包没有意义
                    Some(other) => debug!("H.265: 忽略 hvcC 中的 NAL, type={}", other),
                    None => warn!("H.265: hvcC 中的 NAL 头部非法, 已忽略"),
                }
            }
            parser.length_size = Some(hvcc.length_size);
            debug!(
                "H.265: 使用 hvcC 配置, length_size={}, nals={}",
                hvcc.length_size,
                hvcc.nals.len()
            );
        }
        Ok(parser)
    }

    /// 输入是否为长度前缀形式 (来自 hvcC)
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

    fn pps(&self, pps_id: u32) -> Option<&Pps> {
        self.pps
            .get(pps_id as usize)?
            .as_ref()
            .map(|set| &set.parsed)
    }

    /// 至少有一组 PPS 引用的 SPS 及其 VPS 都已到达
    fn has_parameter_sets(&self) -> bool {
        self.pps.iter().flatten().any(|pps| {
            self.sps(pps.parsed.sps_id).is_some_and(|sps| {
                self.vps
                    .get(sps.vps_id as usize)
                    .is_some_and(Option::is_some)
            })
        })
    }

    fn write_parameter_sets(&self, out: &mut BytesMut) {
        let vps = self.vps.iter().flatten().map(|set| &set.nal);
        let sps = self.sps.iter().flatten().map(|set| &set.nal);
        let pps = self.pps.iter().flatten().map(|set| &set.nal);
        for nal in vps.chain(sps).chain(pps) {
            out.put_slice(nal);
        }
    }

    fn nal_header(&self, nal: &[u8]) -> Option<NalHeader> {
        let bytes = nal.get(NAL_HEADER_OFFSET..NAL_PAYLOAD_OFFSET)?;
        NalHeader::parse([bytes[0], bytes[1]]).ok()
    }

    /// 按类型解析并缓存 VPS/SPS/PPS; 与已缓存内容相同的参数集被忽略
    fn store_parameter_set(&mut self, nal: Bytes) {
        let Some(header) = self.nal_header(&nal) else {
            return;
        };
        let rbsp = annexb::unescape(&nal[NAL_PAYLOAD_OFFSET..]);
        let changed = match header.nal_type {
            NAL_VPS => parse_vps(&rbsp).map(|vps| {
                let slot = &mut self.vps[vps.vps_id as usize];
                replace_if_changed(slot, vps, nal)
            }),
            NAL_SPS => parse_sps(&rbsp).map(|sps| {
                let slot = &mut self.sps[sps.sps_id as usize];
                let changed = replace_if_changed(slot, sps, nal);
                if changed {
                    debug!(
                        "H.265: 新的 SPS, sps_id={}, vps_id={}, {}x{}, reorder={}",
                        sps.sps_id, sps.vps_id, sps.width, sps.height, sps.max_num_reorder_pics
                    );
                }
                changed
            }),
            _ => parse_pps(&rbsp).map(|pps| {
                let slot = &mut self.pps[pps.pps_id as usize];
                replace_if_changed(slot, pps, nal)
            }),
        };
        match changed {
            Ok(changed) => self.params_changed |= changed,
            Err(err) => warn!(
                "H.265: 参数集解析失败, 已丢弃, type={}: {}",
                header.nal_type, err
            ),
        }
    }

    fn parse_slice(&self, nal: &[u8], header: NalHeader) -> TaoResult<SliceHeader> {
        let body = &nal[NAL_PAYLOAD_OFFSET..];
        let rbsp = annexb::unescape(&body[..body.len().min(SLICE_HEADER_PEEK)]);
        SliceHeader::parse(&rbsp, header.is_irap(), |pps_id| self.pps(pps_id))
    }

    fn handle_sei(&mut self, nal: &[u8]) {
        let rbsp = annexb::unescape(&nal[NAL_PAYLOAD_OFFSET..]);
        for message in parse_sei(&rbsp) {
            match message {
                SeiMessage::Captions(data) => self.cc.extract(CcPayloadType::Ga94, true, &data),
                SeiMessage::RecoveryPoint(point) => {
                    if !self.got_keyframe {
                        debug!(
                            "H.265: 恢复点, recovery_poc_cnt={}, broken_link={}",
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
        let Some(header) = self.nal_header(&nal) else {
            debug!("H.265: NAL 头部非法, 已丢弃");
            return None;
        };

        if header.is_vcl() {
            return self.handle_vcl(nal, header, pts, dts);
        }

        let mut out = if header.starts_access_unit() && self.picture.has_slice() {
            self.close_picture()
        } else {
            None
        };
        self.picture.note_timestamps(pts, dts);

        match header.nal_type {
            NAL_VPS | NAL_SPS | NAL_PPS => self.store_parameter_set(nal),
            NAL_PREFIX_SEI | NAL_SUFFIX_SEI => {
                self.handle_sei(&nal);
                self.picture.nals.push(nal);
            }
            NAL_EOS | NAL_EOB => {
                if self.picture.has_slice() {
                    self.picture.nals.push(nal);
                    self.picture.end_of_sequence = true;
                    out = self.close_picture();
                }
            }
            NAL_FD => {}
            _ => self.picture.nals.push(nal),
        }
        out
    }

    fn handle_vcl(&mut self, nal: Bytes, header: NalHeader, pts: i64, dts: i64) -> Option<AccessUnit> {
        let slice = match self.parse_slice(&nal, header) {
            Ok(slice) => slice,
            Err(err) => {
                debug!("H.265: slice 头部无法解析, NAL 被丢弃: {}", err);
                return None;
            }
        };

        let mut out = None;
        if slice.first_slice_in_pic {
            if self.picture.has_slice() {
                out = self.close_picture();
            }
        } else if !self.picture.has_slice() {
            // 图像的首个 slice 已丢失
            return out;
        }
        self.picture.note_timestamps(pts, dts);

        // 增强层不参与图像类型判断
        if slice.first_slice_in_pic && header.layer_id == 0 {
            if header.is_irap() {
                self.picture.irap = true;
            }
            match slice.slice_type {
                Some(SliceType::B) => self.picture.has_b = true,
                Some(SliceType::P) => self.picture.has_p = true,
                Some(SliceType::I) | None => {}
            }
        }
        if self.picture.slice.is_none() {
            self.picture.slice = Some(slice);
        }
        self.picture.nals.push(nal);
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
                        debug!("H.265: 首个随机接入点之前的图像被丢弃");
                        return None;
                    }
                }
            }
        }
        if picture.end_of_sequence {
            flags |= AccessUnitFlags::END_OF_SEQUENCE;
        }

        let mut data = BytesMut::with_capacity(picture.nals.iter().map(Bytes::len).sum::<usize>());
        let mut nals = picture.nals.into_iter().peekable();
        if keyframe || self.params_changed {
            if let Some(aud) =
                nals.next_if(|nal| (nal[NAL_HEADER_OFFSET] >> 1) & 0x3F == NAL_AUD)
            {
                data.put_slice(&aud);
            }
            self.write_parameter_sets(&mut data);
            self.params_changed = false;
        }
        for nal in nals {
            data.put_slice(&nal);
        }

        let decode_order = self
            .pps(slice.pps_id)
            .and_then(|pps| self.sps(pps.sps_id))
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
        let duration = self.clock.duration_of(1);
        self.clock.increment(1);

        let mut au = AccessUnit::new(data.freeze());
        au.pts = pts;
        au.dts = dts;
        au.duration = duration;
        au.flags = flags;
        au.captions = captions;
        Some(au)
    }
}

/// 内容不同时替换缓存的参数集, 返回是否有变化
fn replace_if_changed<T>(slot: &mut Option<ParameterSet<T>>, parsed: T, nal: Bytes) -> bool {
    if slot.as_ref().is_some_and(|old| old.nal == nal) {
        return false;
    }
    *slot = Some(ParameterSet { parsed, nal });
    true
}

impl SyntaxParser for HevcParser {
    fn codec_id(&self) -> CodecId {
        CodecId::Hevc
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
        START_CODE.len() + NAL_HEADER_SIZE
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
        if end < NAL_PAYLOAD_OFFSET {
            debug!("H.265: NAL 太短, 已丢弃");
            return None;
        }
        self.handle_nal(unit.data.slice(..end), unit.pts, unit.dts)
    }

    fn validate(&mut self, _au: &mut AccessUnit) -> bool {
        if !self.has_parameter_sets() {
            warn!("H.265: 尚未收到 VPS/SPS/PPS, 访问单元被丢弃");
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
                    warn!("H.265: 长度前缀数据无法转换, 片段被丢弃: {}", err);
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

/// 创建 H.265 分包器; Annex-B 形式的 extradata 作为配置数据预先送入
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    let parser = HevcParser::new(config)?;
    let length_prefixed = parser.is_length_prefixed();
    let mut packetizer = Packetizer::new(parser);
    if !length_prefixed {
        packetizer.feed_header(&config.extradata);
    }
    Ok(Box::new(packetizer))
}
