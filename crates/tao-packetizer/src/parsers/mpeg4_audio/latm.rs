//! LATM (Low-overhead Audio Transport Multiplex, ISO/IEC 14496-3 1.7.3).
//!
//! LOAS 同步层 (`AudioSyncStream`) 之内为 `AudioMuxElement(1)`:
//! 可选的 `StreamMuxConfig` 之后是每个子帧的负载长度与负载.
//!
//! 只完整解复用 "全部流同一时间分帧" 的情形, 且只取第一个节目的第一层;
//! 其余节目与层被跳过, 其它拓扑被识别后整帧丢弃.

use log::debug;
use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::asc::{copy_bits, AudioSpecificConfig};

/// LOAS 同步头大小
pub const LOAS_HEADER_SIZE: usize = 3;

/// LATM 中的一路流 (节目 x 层)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatmStream {
    /// 节目号
    pub program: u32,
    /// 层号
    pub layer: u32,
    /// 该流的音频配置
    pub config: AudioSpecificConfig,
    /// frameLengthType
    pub frame_length_type: u32,
    /// frameLengthType 为 1 时的定长负载 (字节)
    pub frame_length: usize,
}

/// StreamMuxConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMuxConfig {
    /// audioMuxVersion
    pub audio_mux_version: u32,
    /// allStreamsSameTimeFraming
    pub same_time_framing: bool,
    /// 每个 AudioMuxElement 中的子帧数
    pub sub_frames: u32,
    /// 所有流, 按节目与层排列
    pub streams: Vec<LatmStream>,
    /// 每个元素末尾的 otherData 位数
    pub other_data_bits: u64,
}

/// LatmGetValue()
fn read_latm_value(br: &mut BitReader<'_>) -> TaoResult<u64> {
    let bytes = br.read_bits(2)?;
    let mut value = 0u64;
    for _ in 0..=bytes {
        value = (value << 8) | u64::from(br.read_bits(8)?);
    }
    Ok(value)
}

impl StreamMuxConfig {
    /// 从位流读取
    pub fn read(br: &mut BitReader<'_>) -> TaoResult<Self> {
        let audio_mux_version = br.read_bits(1)?;
        let audio_mux_version_a = if audio_mux_version == 1 {
            br.read_bits(1)?
        } else {
            0
        };
        if audio_mux_version_a != 0 {
            return Err(TaoError::Unsupported(
                "LATM: 不支持 audioMuxVersionA=1".into(),
            ));
        }
        if audio_mux_version == 1 {
            read_latm_value(br)?; // taraBufferFullness
        }

        let same_time_framing = br.read_flag()?;
        let sub_frames = br.read_bits(6)? + 1;
        let programs = br.read_bits(4)? + 1;

        let mut streams: Vec<LatmStream> = Vec::new();
        for program in 0..programs {
            let layers = br.read_bits(3)? + 1;
            for layer in 0..layers {
                let use_same_config = if program == 0 && layer == 0 {
                    false
                } else {
                    br.read_flag()?
                };
                let config = if use_same_config {
                    match streams.last() {
                        Some(prev) => prev.config.clone(),
                        None => {
                            return Err(TaoError::InvalidData(
                                "LATM: useSameConfig 没有可引用的配置".into(),
                            ));
                        }
                    }
                } else if audio_mux_version == 0 {
                    AudioSpecificConfig::read(br, false)?
                } else {
                    let asc_bits = read_latm_value(br)? as usize;
                    let bytes = copy_bits(br, asc_bits)?;
                    AudioSpecificConfig::parse(&bytes)?
                };

                let frame_length_type = br.read_bits(3)?;
                let mut frame_length = 0;
                match frame_length_type {
                    0 => {
                        br.skip_bits(8)?; // latmBufferFullness
                        let core_object = streams.last().map(|s| s.config.object_type);
                        if !same_time_framing
                            && matches!(core_object, Some(6 | 20))
                            && matches!(config.object_type, 8 | 24)
                        {
                            br.skip_bits(6)?; // coreFrameOffset
                        }
                    }
                    1 => frame_length = br.read_bits(9)? as usize + 20,
                    3..=5 => br.skip_bits(6)?, // CELPframeLengthTableIndex
                    6 | 7 => br.skip_bits(1)?, // HVXCframeLengthTableIndex
                    _ => {
                        return Err(TaoError::InvalidData(format!(
                            "LATM: 保留的 frameLengthType={}",
                            frame_length_type
                        )));
                    }
                }
                streams.push(LatmStream {
                    program,
                    layer,
                    config,
                    frame_length_type,
                    frame_length,
                });
            }
        }

        let mut other_data_bits = 0u64;
        if br.read_flag()? {
            if audio_mux_version == 1 {
                other_data_bits = read_latm_value(br)?;
            } else {
                loop {
                    let escape = br.read_flag()?;
                    other_data_bits = (other_data_bits << 8) | u64::from(br.read_bits(8)?);
                    if !escape {
                        break;
                    }
                }
            }
        }
        if br.read_flag()? {
            br.skip_bits(8)?; // crcCheckSum
        }

        Ok(Self {
            audio_mux_version,
            same_time_framing,
            sub_frames,
            streams,
            other_data_bits,
        })
    }

    /// 被解复用的流 (第一个节目的第一层)
    pub fn selected(&self) -> Option<&LatmStream> {
        self.streams.first()
    }
}

/// 解复用得到的一个访问单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatmPayload {
    /// 所选流各子帧负载的拼接
    pub data: Vec<u8>,
    /// 子帧数
    pub sub_frames: u32,
    /// 本元素携带了新的 StreamMuxConfig
    pub config_changed: bool,
}

/// LATM 解复用上下文
#[derive(Debug, Default)]
pub struct LatmDemuxer {
    config: Option<StreamMuxConfig>,
}

impl LatmDemuxer {
    /// 创建空上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前的 StreamMuxConfig
    pub fn config(&self) -> Option<&StreamMuxConfig> {
        self.config.as_ref()
    }

    /// 丢弃已缓存的配置
    pub fn reset(&mut self) {
        self.config = None;
    }

    /// 解析一个 AudioMuxElement(1)
    pub fn parse_element(&mut self, element: &[u8]) -> TaoResult<LatmPayload> {
        let mut br = BitReader::new(element);
        let use_same_stream_mux = br.read_flag()?;
        let mut config_changed = false;
        if !use_same_stream_mux {
            let config = StreamMuxConfig::read(&mut br)?;
            config_changed = self.config.as_ref() != Some(&config);
            self.config = Some(config);
        }
        let Some(config) = self.config.as_ref() else {
            return Err(TaoError::InvalidData(
                "LATM: 尚未收到 StreamMuxConfig".into(),
            ));
        };
        if !config.same_time_framing {
            debug!("LATM: allStreamsSameTimeFraming=0 暂不支持, 丢弃该帧");
            return Err(TaoError::Unsupported(
                "LATM: 不支持非同一时间分帧".into(),
            ));
        }

        let mut data = Vec::new();
        for _ in 0..config.sub_frames {
            let mut lengths = Vec::with_capacity(config.streams.len());
            for stream in &config.streams {
                lengths.push(read_payload_length(&mut br, stream)?);
            }
            for (index, length) in lengths.into_iter().enumerate() {
                if index == 0 {
                    data.extend_from_slice(&copy_bits(&mut br, length * 8)?);
                } else {
                    br.skip_bits(length * 8)?;
                }
            }
        }
        if config.other_data_bits > 0 {
            let bits = usize::try_from(config.other_data_bits)
                .map_err(|_| TaoError::InvalidData("LATM: otherData 过长".into()))?;
            br.skip_bits(bits)?;
        }

        Ok(LatmPayload {
            data,
            sub_frames: config.sub_frames,
            config_changed,
        })
    }
}

/// PayloadLengthInfo() 中一路流的负载长度 (字节)
fn read_payload_length(br: &mut BitReader<'_>, stream: &LatmStream) -> TaoResult<usize> {
    match stream.frame_length_type {
        0 => {
            let mut length = 0usize;
            loop {
                let tmp = br.read_bits(8)? as usize;
                length += tmp;
                if tmp != 255 {
                    break;
                }
            }
            Ok(length)
        }
        1 => Ok(stream.frame_length),
        other => Err(TaoError::Unsupported(format!(
            "LATM: 不支持的 frameLengthType={}",
            other
        ))),
    }
}

/// LOAS 同步头给出的帧长 (含 3 字节同步头)
pub fn loas_frame_size(header: [u8; LOAS_HEADER_SIZE]) -> Option<usize> {
    if header[0] != 0x56 || header[1] & 0xE0 != 0xE0 {
        return None;
    }
    let length = (usize::from(header[1] & 0x1F) << 8) | usize::from(header[2]);
    Some(length + LOAS_HEADER_SIZE)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tao_core::bitwriter::BitWriter;

    /// 构造单节目单层 AAC LC (48000Hz 双声道) 的 LOAS 帧
    pub(crate) fn build_loas_frame(with_config: bool, payloads: &[&[u8]]) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bit(!with_config); // useSameStreamMux
        if with_config {
            bw.write_bits(0, 1); // audioMuxVersion
            bw.write_bit(true); // allStreamsSameTimeFraming
            bw.write_bits(payloads.len() as u32 - 1, 6);
            bw.write_bits(0, 4); // numProgram
            bw.write_bits(0, 3); // numLayer
            bw.write_bits(2, 5); // AAC LC
            bw.write_bits(3, 4); // 48000
            bw.write_bits(2, 4); // 双声道
            bw.write_bits(0, 3); // GASpecificConfig
            bw.write_bits(0, 3); // frameLengthType
            bw.write_bits(0xFF, 8); // latmBufferFullness
            bw.write_bit(false); // otherDataPresent
            bw.write_bit(false); // crcCheckPresent
        }
        for payload in payloads {
            let mut len = payload.len();
            while len >= 255 {
                bw.write_bits(255, 8);
                len -= 255;
            }
            bw.write_bits(len as u32, 8);
            bw.write_bytes(payload);
        }
        bw.align_to_byte();
        let element = bw.finish();
        let mut frame = vec![
            0x56,
            0xE0 | ((element.len() >> 8) as u8 & 0x1F),
            element.len() as u8,
        ];
        frame.extend_from_slice(&element);
        frame
    }

    #[test]
    fn test_解析配置与负载() {
        let frame = build_loas_frame(true, &[&[1, 2, 3]]);
        assert_eq!(
            loas_frame_size([frame[0], frame[1], frame[2]]),
            Some(frame.len())
        );
        let mut demux = LatmDemuxer::new();
        let payload = demux.parse_element(&frame[LOAS_HEADER_SIZE..]).unwrap();
        assert_eq!(payload.data, vec![1, 2, 3]);
        assert!(payload.config_changed);
        let config = demux.config().unwrap();
        let stream = config.selected().unwrap();
        assert_eq!(stream.config.sample_rate, 48000);
        assert_eq!(stream.config.channels, 2);
        assert_eq!(stream.config.raw, vec![0x11, 0x90]);
    }

    #[test]
    fn test_复用配置与多子帧() {
        let mut demux = LatmDemuxer::new();
        let first = build_loas_frame(false, &[&[9]]);
        assert!(demux.parse_element(&first[LOAS_HEADER_SIZE..]).is_err());

        let frame = build_loas_frame(true, &[&[1, 2], &[3]]);
        let payload = demux.parse_element(&frame[LOAS_HEADER_SIZE..]).unwrap();
        assert_eq!(payload.data, vec![1, 2, 3]);
        assert_eq!(payload.sub_frames, 2);

        // 子帧数由配置决定
        let frame = build_loas_frame(false, &[&[4; 300], &[5]]);
        let payload = demux.parse_element(&frame[LOAS_HEADER_SIZE..]).unwrap();
        assert_eq!(payload.data.len(), 301);
        assert!(!payload.config_changed);
    }

    #[test]
    fn test_非法同步头() {
        assert_eq!(loas_frame_size([0x56, 0xC0, 0x10]), None);
        assert_eq!(loas_frame_size([0x56, 0xE1, 0x00]), Some(256 + 3));
    }
}
