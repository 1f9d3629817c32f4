//! H.265 NAL 单元头部与 hvcC 配置记录.
//!
//! # NAL 头部 (2 字节)
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ forbidden(1) | type(6) | layer_id(6) | temporal_id+1(3)  │
//! └──────────────────────────────────────────────────────────┘
//! ```

use tao_core::{TaoError, TaoResult};

/// NAL 头部长度
pub const NAL_HEADER_SIZE: usize = 2;

pub const NAL_BLA_W_LP: u8 = 16;
pub const NAL_CRA: u8 = 21;
/// IRAP 保留类型的上限
pub const NAL_RSV_IRAP_23: u8 = 23;
pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;
pub const NAL_EOS: u8 = 36;
pub const NAL_EOB: u8 = 37;
pub const NAL_FD: u8 = 38;
pub const NAL_PREFIX_SEI: u8 = 39;
pub const NAL_SUFFIX_SEI: u8 = 40;

/// NAL 头部
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// nal_unit_type (0-63)
    pub nal_type: u8,
    /// nuh_layer_id
    pub layer_id: u8,
    /// nuh_temporal_id_plus1 - 1
    pub temporal_id: u8,
}

impl NalHeader {
    /// 解析 NAL 头部的两个字节
    pub fn parse(bytes: [u8; 2]) -> TaoResult<Self> {
        if bytes[0] & 0x80 != 0 {
            return Err(TaoError::InvalidData(format!(
                "H.265: forbidden_zero_bit 非法, header=0x{:02X}{:02X}",
                bytes[0], bytes[1]
            )));
        }
        let temporal_id_plus1 = bytes[1] & 0x07;
        if temporal_id_plus1 == 0 {
            return Err(TaoError::InvalidData(
                "H.265: nuh_temporal_id_plus1 为 0".into(),
            ));
        }
        Ok(Self {
            nal_type: (bytes[0] >> 1) & 0x3F,
            layer_id: ((bytes[0] & 0x01) << 5) | (bytes[1] >> 3),
            temporal_id: temporal_id_plus1 - 1,
        })
    }

    /// 是否为 VCL NAL
    pub fn is_vcl(&self) -> bool {
        self.nal_type < NAL_VPS
    }

    /// 是否为随机接入点 (BLA/IDR/CRA 以及保留的 IRAP 类型)
    pub fn is_irap(&self) -> bool {
        (NAL_BLA_W_LP..=NAL_RSV_IRAP_23).contains(&self.nal_type)
    }

    /// 出现在 VCL 之后时开始新的访问单元 (7.4.2.4.4)
    pub fn starts_access_unit(&self) -> bool {
        matches!(
            self.nal_type,
            NAL_VPS..=NAL_AUD | NAL_PREFIX_SEI | 41..=44 | 48..=55
        )
    }
}

/// HEVCDecoderConfigurationRecord (MP4 hvcC box 内容)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HvcConfig {
    /// 各数组中的 NAL (不含起始码), 保持记录中的顺序
    pub nals: Vec<Vec<u8>>,
    /// NAL 长度前缀大小 (字节)
    pub length_size: usize,
}

impl HvcConfig {
    /// 解析 hvcC
    pub fn parse(data: &[u8]) -> TaoResult<Self> {
        if data.len() < 23 {
            return Err(TaoError::InvalidData("H.265: hvcC 数据太短".into()));
        }
        if data[0] != 1 {
            return Err(TaoError::InvalidData(format!(
                "H.265: hvcC 版本非法, version={}",
                data[0]
            )));
        }
        let length_size = usize::from(data[21] & 0x03) + 1;
        if length_size == 3 {
            return Err(TaoError::InvalidData("H.265: hvcC 长度前缀大小为 3".into()));
        }

        let num_arrays = data[22];
        let mut pos = 23;
        let mut nals = Vec::new();
        for array in 0..num_arrays {
            let Some(head) = data.get(pos..pos + 3) else {
                return Err(TaoError::InvalidData(format!(
                    "H.265: hvcC 数组头部截断, array={}",
                    array
                )));
            };
            let count = u16::from_be_bytes([head[1], head[2]]);
            pos += 3;
            for index in 0..count {
                let Some(len_bytes) = data.get(pos..pos + 2) else {
                    return Err(TaoError::InvalidData(format!(
                        "H.265: hvcC NAL 长度字段截断, array={}, index={}",
                        array, index
                    )));
                };
                let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
                pos += 2;
                let Some(nal) = data.get(pos..pos + len).filter(|n| n.len() > NAL_HEADER_SIZE)
                else {
                    return Err(TaoError::InvalidData(format!(
                        "H.265: hvcC NAL 数据非法, array={}, index={}, declared_len={}",
                        array, index, len
                    )));
                };
                nals.push(nal.to_vec());
                pos += len;
            }
        }
        Ok(Self { nals, length_size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nal_头部解析() {
        let header = NalHeader::parse([0x26, 0x01]).unwrap();
        assert_eq!(header.nal_type, 19);
        assert_eq!(header.layer_id, 0);
        assert_eq!(header.temporal_id, 0);
        assert!(header.is_irap());
        assert!(header.is_vcl());

        let sps = NalHeader::parse([0x42, 0x01]).unwrap();
        assert_eq!(sps.nal_type, NAL_SPS);
        assert!(sps.starts_access_unit());
        assert!(!NalHeader::parse([0x50, 0x01]).unwrap().starts_access_unit());

        assert!(NalHeader::parse([0xA6, 0x01]).is_err());
        assert!(NalHeader::parse([0x26, 0x00]).is_err());
    }

    #[test]
    fn test_hvcc_解析() {
        let mut data = vec![0x01];
        data.extend_from_slice(&[0u8; 20]);
        data.push(0xFF); // length_size = 4
        data.push(2);
        data.extend_from_slice(&[0xA0, 0x00, 0x01, 0x00, 0x03, 0x40, 0x01, 0x0C]);
        data.extend_from_slice(&[0xA2, 0x00, 0x01, 0x00, 0x03, 0x44, 0x01, 0xC1]);
        let config = HvcConfig::parse(&data).unwrap();
        assert_eq!(config.length_size, 4);
        assert_eq!(
            config.nals,
            vec![vec![0x40, 0x01, 0x0C], vec![0x44, 0x01, 0xC1]]
        );

        data.truncate(data.len() - 2);
        assert!(HvcConfig::parse(&data).is_err());
        assert!(HvcConfig::parse(&[0x01; 10]).is_err());
    }
}
