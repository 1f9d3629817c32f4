//! MPEG-4 音频 (AAC) 分包.
//!
//! 支持三种输入:
//! - ADTS: 12 位同步 `0xFFF`, 帧头给出帧长, 输出去掉帧头的原始负载.
//! - LOAS/LATM: 11 位同步 `0x2B7`, 负载为 AudioMuxElement, 需要解复用.
//! - 原始: extradata 为 AudioSpecificConfig, 每个输入片段恰为一个访问单元.

pub mod adts;
pub mod asc;
pub mod latm;

use bytes::Bytes;
use log::{debug, warn};
use tao_core::timestamp::is_valid;
use tao_core::{TaoResult, TimestampClock};

use crate::access_unit::AccessUnit;
use crate::bytestream::ByteCursor;
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::stream_config::StreamConfig;

use adts::AdtsHeader;
use asc::AudioSpecificConfig;
use latm::{loas_frame_size, LatmDemuxer, LOAS_HEADER_SIZE};

/// 输入封装
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// ADTS 帧
    Adts,
    /// LOAS 同步层内的 LATM
    Loas,
    /// 原始 raw_data_block, 由容器分帧
    Raw,
}

fn is_adts_sync(window: &[u8]) -> bool {
    window[0] == 0xFF && window[1] & 0xF6 == 0xF0
}

fn is_loas_sync(window: &[u8]) -> bool {
    window[0] == 0x56 && window[1] & 0xE0 == 0xE0
}

/// MPEG-4 音频语法解析器
pub struct Mpeg4AudioParser {
    codec_id: CodecId,
    /// 当前帧的封装, 原始模式下恒为 `Raw`
    framing: Option<Framing>,
    /// 当前 ADTS 帧头
    adts: Option<AdtsHeader>,
    latm: LatmDemuxer,
    /// 当前流的音频配置 (原始与 LATM 模式)
    config: Option<AudioSpecificConfig>,
    extradata: Option<Bytes>,
    clock: TimestampClock,
    dropped: u64,
}

impl Mpeg4AudioParser {
    /// 创建解析器
    ///
    /// AAC 且 extradata 为合法的 AudioSpecificConfig 时进入原始模式.
    pub fn new(config: &StreamConfig) -> Self {
        let mut parser = Self {
            codec_id: config.codec_id,
            framing: None,
            adts: None,
            latm: LatmDemuxer::new(),
            config: None,
            extradata: None,
            clock: TimestampClock::new(0, 1),
            dropped: 0,
        };
        if config.codec_id == CodecId::Aac && !config.extradata.is_empty() {
            match AudioSpecificConfig::parse(&config.extradata) {
                Ok(asc) => {
                    debug!(
                        "AAC: 原始模式, object_type={}, sample_rate={}, channels={}",
                        asc.object_type, asc.sample_rate, asc.channels
                    );
                    parser.clock.change_rate(asc.sample_rate, 1);
                    parser.extradata = Some(config.extradata.clone());
                    parser.config = Some(asc);
                    parser.framing = Some(Framing::Raw);
                }
                Err(err) => warn!("AAC: extradata 无法解析, 按 ADTS/LOAS 处理: {}", err),
            }
        }
        parser
    }

    /// 当前输入封装
    pub fn framing(&self) -> Option<Framing> {
        self.framing
    }

    /// 当前音频配置
    pub fn audio_config(&self) -> Option<&AudioSpecificConfig> {
        self.config.as_ref()
    }

    fn stamp(&mut self, unit: &Unit, sample_rate: u32, samples: u32, data: Bytes) -> AccessUnit {
        self.clock.change_rate(sample_rate, 1);
        let pts = if is_valid(unit.pts) { unit.pts } else { unit.dts };
        if is_valid(pts) {
            self.clock.set(pts);
        }
        let mut au = AccessUnit::new(data);
        au.pts = self.clock.get();
        au.dts = au.pts;
        au.duration = self.clock.duration_of(samples);
        self.clock.increment(samples);
        au
    }

    fn parse_adts(&mut self, unit: Unit) -> Option<AccessUnit> {
        let header = AdtsHeader::parse(&unit.data).ok()?;
        let asc = header.audio_specific_config();
        if self.extradata.as_deref() != Some(&asc[..]) {
            debug!(
                "AAC: ADTS 配置 profile={}, sample_rate={}, channel_config={}",
                header.profile, header.sample_rate, header.channel_config
            );
            self.extradata = Some(Bytes::copy_from_slice(&asc));
        }
        let end = header.frame_length.min(unit.data.len());
        let payload = unit.data.slice(header.header_size()..end);
        Some(self.stamp(&unit, header.sample_rate, header.samples(), payload))
    }

    fn parse_loas(&mut self, unit: Unit) -> Option<AccessUnit> {
        let element = unit.data.get(LOAS_HEADER_SIZE..)?;
        let payload = match self.latm.parse_element(element) {
            Ok(payload) => payload,
            Err(err) => {
                debug!("LATM: 丢弃无法解复用的帧: {}", err);
                self.dropped += 1;
                return None;
            }
        };
        let stream = self.latm.config().and_then(|c| c.selected())?.config.clone();
        if payload.config_changed {
            debug!(
                "LATM: 新的 StreamMuxConfig, sample_rate={}, channels={}",
                stream.sample_rate, stream.channels
            );
            self.extradata = Some(Bytes::copy_from_slice(&stream.raw));
        }
        if payload.data.is_empty() {
            return None;
        }
        let samples = stream.frame_length * payload.sub_frames;
        let sample_rate = stream.sample_rate;
        self.config = Some(stream);
        Some(self.stamp(&unit, sample_rate, samples, Bytes::from(payload.data)))
    }
}

impl SyntaxParser for Mpeg4AudioParser {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn sync_len(&self) -> usize {
        2
    }

    fn is_sync(&self, window: &[u8]) -> bool {
        is_adts_sync(window) || is_loas_sync(window)
    }

    fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound> {
        let mut sync = [0u8; 2];
        if !cursor.peek_at(0, &mut sync) {
            return Verdict::NeedMoreData;
        }
        if is_adts_sync(&sync) {
            let mut bytes = [0u8; adts::HEADER_SIZE];
            if !cursor.peek_at(0, &mut bytes) {
                return Verdict::NeedMoreData;
            }
            return match AdtsHeader::parse(&bytes) {
                Ok(header) => {
                    self.adts = Some(header);
                    self.framing = Some(Framing::Adts);
                    Verdict::Ready(FrameBound::Exact(header.frame_length))
                }
                Err(_) => Verdict::Reject,
            };
        }
        let mut bytes = [0u8; LOAS_HEADER_SIZE];
        if !cursor.peek_at(0, &mut bytes) {
            return Verdict::NeedMoreData;
        }
        match loas_frame_size(bytes) {
            Some(size) if size > LOAS_HEADER_SIZE => {
                self.framing = Some(Framing::Loas);
                Verdict::Ready(FrameBound::Exact(size))
            }
            _ => Verdict::Reject,
        }
    }

    fn check_next(&mut self, cursor: &ByteCursor, size: usize, at_end: bool) -> Verdict<()> {
        let wait = if at_end {
            Verdict::Ready(())
        } else {
            Verdict::NeedMoreData
        };
        match self.framing {
            Some(Framing::Adts) => {
                let mut bytes = [0u8; adts::HEADER_SIZE];
                if !cursor.peek_at(size, &mut bytes) {
                    return wait;
                }
                match (self.adts, AdtsHeader::parse(&bytes)) {
                    (Some(current), Ok(next)) if current.is_compatible(&next) => Verdict::Ready(()),
                    _ => Verdict::Reject,
                }
            }
            Some(Framing::Loas) => {
                let mut bytes = [0u8; LOAS_HEADER_SIZE];
                if !cursor.peek_at(size, &mut bytes) {
                    return wait;
                }
                if loas_frame_size(bytes).is_some() {
                    Verdict::Ready(())
                } else {
                    Verdict::Reject
                }
            }
            _ => Verdict::Reject,
        }
    }

    fn reset(&mut self, broken: bool) {
        self.adts = None;
        self.clock.reset();
        // 损坏的数据可能带着错误的 StreamMuxConfig, 等待下一个配置
        if broken {
            self.latm.reset();
        }
        if self.framing != Some(Framing::Raw) {
            self.framing = None;
        }
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        match self.framing? {
            Framing::Adts => self.parse_adts(unit),
            Framing::Loas => self.parse_loas(unit),
            Framing::Raw => {
                if unit.data.is_empty() {
                    return None;
                }
                let (sample_rate, samples) = self
                    .config
                    .as_ref()
                    .map(|asc| (asc.sample_rate, asc.frame_length))?;
                let data = unit.data.clone();
                Some(self.stamp(&unit, sample_rate, samples, data))
            }
        }
    }

    fn passthrough(&self) -> bool {
        self.framing == Some(Framing::Raw)
    }

    fn extradata(&self) -> Option<Bytes> {
        self.extradata.clone()
    }

    fn dropped_units(&self) -> u64 {
        self.dropped
    }
}

/// 创建 MPEG-4 音频分包器
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    Ok(Box::new(Packetizer::new(Mpeg4AudioParser::new(config))))
}
