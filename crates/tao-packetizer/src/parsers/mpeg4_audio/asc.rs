//! AudioSpecificConfig (ISO/IEC 14496-3 1.6.2.1) 解析.
//!
//! 只解析分包需要的字段: 对象类型, 采样率, 声道数, 帧长以及 SBR/PS 信令.
//! 声道配置为 0 时从 program_config_element 统计声道数.

use tao_core::bitreader::BitReader;
use tao_core::bitwriter::BitWriter;
use tao_core::{TaoError, TaoResult};

/// 采样率索引表
pub const SAMPLE_RATES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

/// 声道配置 -> 声道数
const CHANNELS: [u32; 8] = [0, 1, 2, 3, 4, 5, 6, 8];

/// 对象类型: SBR
const AOT_SBR: u32 = 5;
/// 对象类型: PS
const AOT_PS: u32 = 29;
/// 对象类型: ER BSAC
const AOT_ER_BSAC: u32 = 22;

/// 后向兼容 SBR 同步字
const SYNC_EXTENSION_SBR: u32 = 0x2B7;
/// 后向兼容 PS 同步字
const SYNC_EXTENSION_PS: u32 = 0x548;

/// AudioSpecificConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// audioObjectType (2 = AAC LC)
    pub object_type: u32,
    /// 核心采样率 (Hz)
    pub sample_rate: u32,
    /// channelConfiguration
    pub channel_config: u32,
    /// 声道数
    pub channels: u32,
    /// 扩展对象类型 (5 = SBR), 0 表示无
    pub extension_object_type: u32,
    /// SBR 输出采样率
    pub extension_sample_rate: u32,
    /// SBR 是否存在 (None 表示未显式声明)
    pub sbr: Option<bool>,
    /// PS 是否存在 (None 表示未显式声明)
    pub ps: Option<bool>,
    /// 每帧样本数 (核心采样率下)
    pub frame_length: u32,
    /// 配置本身的字节形式 (位对齐后)
    pub raw: Vec<u8>,
}

impl AudioSpecificConfig {
    /// 从字节解析, 允许后向兼容扩展
    pub fn parse(data: &[u8]) -> TaoResult<Self> {
        let mut br = BitReader::new(data);
        Self::read(&mut br, true)
    }

    /// 从位流读取
    ///
    /// `with_extension` 为 true 时尝试读取配置之后的后向兼容 SBR/PS 扩展;
    /// 配置长度未知时 (LATM audioMuxVersion 0) 必须为 false.
    pub fn read(br: &mut BitReader<'_>, with_extension: bool) -> TaoResult<Self> {
        let start = br.clone();
        let start_bits = br.bits_read();

        let mut object_type = read_object_type(br)?;
        let sample_rate = read_sample_rate(br)?;
        let channel_config = br.read_bits(4)?;
        let mut channels = CHANNELS.get(channel_config as usize).copied().unwrap_or(0);

        let mut extension_object_type = 0;
        let mut extension_sample_rate = 0;
        let mut sbr = None;
        let mut ps = None;
        if object_type == AOT_SBR || object_type == AOT_PS {
            extension_object_type = AOT_SBR;
            sbr = Some(true);
            if object_type == AOT_PS {
                ps = Some(true);
            }
            extension_sample_rate = read_sample_rate(br)?;
            object_type = read_object_type(br)?;
            if object_type == AOT_ER_BSAC {
                br.skip_bits(4)?; // extensionChannelConfiguration
            }
        }

        let frame_length = match object_type {
            1 | 2 | 3 | 4 | 6 | 7 | 17 | 19 | 20 | 21 | 22 | 23 => {
                let ga = read_ga_specific_config(br, object_type, channel_config, start_bits)?;
                if let Some(pce_channels) = ga.pce_channels {
                    channels = pce_channels;
                }
                match (object_type, ga.frame_length_flag) {
                    (23, false) => 512,
                    (23, true) => 480,
                    (_, false) => 1024,
                    (_, true) => 960,
                }
            }
            other => {
                return Err(TaoError::Unsupported(format!(
                    "AAC: 不支持的对象类型, audio_object_type={}",
                    other
                )));
            }
        };
        if (17..=27).contains(&object_type) {
            let ep_config = br.read_bits(2)?;
            if ep_config >= 2 {
                return Err(TaoError::Unsupported(format!(
                    "AAC: 不支持的 epConfig, value={}",
                    ep_config
                )));
            }
        }

        if with_extension && extension_object_type != AOT_SBR && br.bits_left() >= 16 {
            // 扩展读取失败时不影响核心配置
            let mut ext = br.clone();
            if let Ok(Some(found)) = read_sync_extension(&mut ext) {
                extension_object_type = found.object_type;
                sbr = Some(found.sbr);
                ps = found.ps.or(ps);
                if found.sbr {
                    extension_sample_rate = found.sample_rate;
                }
                *br = ext;
            }
        }
        if extension_sample_rate == 0 {
            extension_sample_rate = sample_rate;
        }

        let mut raw_reader = start;
        let raw = copy_bits(&mut raw_reader, br.bits_read() - start_bits)?;

        Ok(Self {
            object_type,
            sample_rate,
            channel_config,
            channels,
            extension_object_type,
            extension_sample_rate,
            sbr,
            ps,
            frame_length,
            raw,
        })
    }
}

struct GaSpecificConfig {
    frame_length_flag: bool,
    pce_channels: Option<u32>,
}

struct SyncExtension {
    object_type: u32,
    sbr: bool,
    ps: Option<bool>,
    sample_rate: u32,
}

fn read_object_type(br: &mut BitReader<'_>) -> TaoResult<u32> {
    let object_type = br.read_bits(5)?;
    if object_type == 31 {
        return Ok(32 + br.read_bits(6)?);
    }
    Ok(object_type)
}

fn read_sample_rate(br: &mut BitReader<'_>) -> TaoResult<u32> {
    let index = br.read_bits(4)?;
    if index == 0x0F {
        return br.read_bits(24);
    }
    match SAMPLE_RATES[index as usize] {
        0 => Err(TaoError::InvalidData(format!(
            "AAC: 采样率索引非法, index={}",
            index
        ))),
        rate => Ok(rate),
    }
}

fn read_ga_specific_config(
    br: &mut BitReader<'_>,
    object_type: u32,
    channel_config: u32,
    start_bits: usize,
) -> TaoResult<GaSpecificConfig> {
    let frame_length_flag = br.read_flag()?;
    if br.read_flag()? {
        br.skip_bits(14)?; // coreCoderDelay
    }
    let extension_flag = br.read_flag()?;
    let pce_channels = if channel_config == 0 {
        Some(read_program_config_element(br, start_bits)?)
    } else {
        None
    };
    if object_type == 6 || object_type == 20 {
        br.skip_bits(3)?; // layerNr
    }
    if extension_flag {
        if object_type == AOT_ER_BSAC {
            br.skip_bits(5 + 11)?; // numOfSubFrame, layer_length
        }
        if matches!(object_type, 17 | 19 | 20 | 23) {
            br.skip_bits(3)?; // resilience flags
        }
        br.skip_bits(1)?; // extensionFlag3
    }
    Ok(GaSpecificConfig {
        frame_length_flag,
        pce_channels,
    })
}

/// program_config_element(), 返回声道数
fn read_program_config_element(br: &mut BitReader<'_>, start_bits: usize) -> TaoResult<u32> {
    br.skip_bits(4 + 2 + 4)?; // element_instance_tag, object_type, sampling_frequency_index
    let front = br.read_bits(4)?;
    let side = br.read_bits(4)?;
    let back = br.read_bits(4)?;
    let lfe = br.read_bits(2)?;
    let assoc_data = br.read_bits(3)?;
    let valid_cc = br.read_bits(4)?;
    for _ in 0..2 {
        if br.read_flag()? {
            br.skip_bits(4)?; // mono/stereo mixdown element number
        }
    }
    if br.read_flag()? {
        br.skip_bits(3)?; // matrix_mixdown_idx, pseudo_surround_enable
    }

    let mut channels = 0;
    for _ in 0..front + side + back {
        let is_cpe = br.read_flag()?;
        br.skip_bits(4)?;
        channels += if is_cpe { 2 } else { 1 };
    }
    channels += lfe;
    br.skip_bits(4 * lfe as usize + 4 * assoc_data as usize + 5 * valid_cc as usize)?;

    // byte_alignment() 相对配置起点
    let misalign = (br.bits_read() - start_bits) % 8;
    if misalign != 0 {
        br.skip_bits(8 - misalign)?;
    }
    let comment_bytes = br.read_bits(8)?;
    br.skip_bits(8 * comment_bytes as usize)?;
    Ok(channels)
}

fn read_sync_extension(br: &mut BitReader<'_>) -> TaoResult<Option<SyncExtension>> {
    if br.read_bits(11)? != SYNC_EXTENSION_SBR {
        return Ok(None);
    }
    let object_type = read_object_type(br)?;
    if object_type != AOT_SBR {
        return Ok(None);
    }
    let sbr = br.read_flag()?;
    let mut sample_rate = 0;
    let mut ps = None;
    if sbr {
        sample_rate = read_sample_rate(br)?;
        if br.bits_left() >= 12 && br.peek_bits(11)? == SYNC_EXTENSION_PS {
            br.skip_bits(11)?;
            ps = Some(br.read_flag()?);
        }
    }
    Ok(Some(SyncExtension {
        object_type,
        sbr,
        ps,
        sample_rate,
    }))
}

/// 复制 `bits` 位为字节, 末尾补零
pub(crate) fn copy_bits(br: &mut BitReader<'_>, bits: usize) -> TaoResult<Vec<u8>> {
    let mut bw = BitWriter::new();
    let mut remaining = bits;
    while remaining > 0 {
        let take = remaining.min(32);
        bw.write_bits(br.read_bits(take as u32)?, take as u32);
        remaining -= take;
    }
    bw.align_to_byte();
    Ok(bw.finish())
}

/// 以 ADTS 头部字段构造 2 字节 AudioSpecificConfig
pub fn build_asc(object_type: u32, sample_rate_index: u32, channel_config: u32) -> [u8; 2] {
    let value = (object_type << 11) | (sample_rate_index << 7) | (channel_config << 3);
    (value as u16).to_be_bytes()
}
