//! H.264 SEI 解析.
//!
//! 分包只关心两类消息:
//! - ITU-T T.35 注册用户数据中的 ATSC A/53 (GA94) 字幕
//! - 恢复点 (recovery point), 用于在没有 IDR 的流中确定首个可显示帧

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

const SEI_USER_DATA_REGISTERED_ITU_T_T35: u32 = 4;
const SEI_RECOVERY_POINT: u32 = 6;

/// T.35 美国国家代码
const T35_COUNTRY_USA: u8 = 0xB5;
/// ATSC 提供商代码
const T35_PROVIDER_ATSC: u16 = 0x0031;

/// 分包关心的 SEI 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeiMessage {
    /// GA94 cc_data() (user_data_type_code 之后的字节)
    Captions(Vec<u8>),
    /// 恢复点
    RecoveryPoint(SeiRecoveryPoint),
}

/// recovery_point SEI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeiRecoveryPoint {
    /// recovery_frame_cnt
    pub recovery_frame_cnt: u32,
    /// exact_match_flag
    pub exact_match: bool,
    /// broken_link_flag
    pub broken_link: bool,
}

/// 解析 SEI RBSP (不含 NAL 头部字节)
///
/// 截断的负载会结束解析, 已解析的消息仍然返回.
pub fn parse_sei(rbsp: &[u8]) -> Vec<SeiMessage> {
    let mut messages = Vec::new();
    let mut offset = 0usize;
    while offset < rbsp.len() && !is_rbsp_trailing_bits(&rbsp[offset..]) {
        let Ok(payload_type) = read_ff_coded_value(rbsp, &mut offset) else {
            break;
        };
        let Ok(payload_size) = read_ff_coded_value(rbsp, &mut offset) else {
            break;
        };
        let end = offset.saturating_add(payload_size as usize);
        let Some(payload) = rbsp.get(offset..end) else {
            break;
        };
        offset = end;

        let message = match payload_type {
            SEI_USER_DATA_REGISTERED_ITU_T_T35 => parse_t35_captions(payload).map(SeiMessage::Captions),
            SEI_RECOVERY_POINT => parse_recovery_point(payload)
                .ok()
                .map(SeiMessage::RecoveryPoint),
            _ => None,
        };
        messages.extend(message);
    }
    messages
}

fn is_rbsp_trailing_bits(rest: &[u8]) -> bool {
    rest[0] == 0x80 && rest[1..].iter().all(|&b| b == 0)
}

fn read_ff_coded_value(data: &[u8], offset: &mut usize) -> TaoResult<u32> {
    let mut value = 0u32;
    loop {
        let byte = *data
            .get(*offset)
            .ok_or_else(|| TaoError::InvalidData("H.264: SEI 头部截断".into()))?;
        *offset += 1;
        value = value.saturating_add(u32::from(byte));
        if byte != 0xFF {
            return Ok(value);
        }
    }
}

/// `country(8) [country_ext(8)] provider(16) "GA94" type_code(8)=0x03 cc_data...`
fn parse_t35_captions(payload: &[u8]) -> Option<Vec<u8>> {
    let mut pos = 0;
    let country = *payload.get(pos)?;
    pos += 1;
    if country == 0xFF {
        pos += 1;
    }
    if country != T35_COUNTRY_USA {
        return None;
    }
    let provider = payload.get(pos..pos + 2)?;
    if u16::from_be_bytes([provider[0], provider[1]]) != T35_PROVIDER_ATSC {
        return None;
    }
    pos += 2;
    if payload.get(pos..pos + 4)? != b"GA94" || *payload.get(pos + 4)? != 0x03 {
        return None;
    }
    Some(payload[pos + 5..].to_vec())
}

fn parse_recovery_point(payload: &[u8]) -> TaoResult<SeiRecoveryPoint> {
    let mut br = BitReader::new(payload);
    let recovery_frame_cnt = br.read_ue()?;
    let exact_match = br.read_flag()?;
    let broken_link = br.read_flag()?;
    Ok(SeiRecoveryPoint {
        recovery_frame_cnt,
        exact_match,
        broken_link,
    })
}
