//! H.264 NAL 单元头部与 avcC 配置记录.
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌──────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5)  │
//! └──────────────────────────────────────┘
//! ```

use tao_core::{TaoError, TaoResult};

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// 非 IDR 图像切片 (P/B slice)
    Slice,
    /// 数据分区 A
    SliceDpa,
    /// 数据分区 B
    SliceDpb,
    /// 数据分区 C
    SliceDpc,
    /// IDR 图像切片
    SliceIdr,
    /// 增补增强信息
    Sei,
    /// 序列参数集
    Sps,
    /// 图像参数集
    Pps,
    /// 访问单元分隔符
    Aud,
    /// 序列结束
    EndOfSequence,
    /// 流结束
    EndOfStream,
    /// 填充数据
    FillerData,
    /// 其余类型 (SPS 扩展, 前缀 NAL, 保留类型等)
    Other(u8),
}

impl NalUnitType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            other => Self::Other(other),
        }
    }

    /// 携带 slice 头部的 VCL NAL (数据分区 B/C 不含 slice 头部)
    pub fn has_slice_header(&self) -> bool {
        matches!(self, Self::Slice | Self::SliceDpa | Self::SliceIdr)
    }

    /// 是否为 VCL NAL
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::Slice | Self::SliceDpa | Self::SliceDpb | Self::SliceDpc | Self::SliceIdr
        )
    }

    /// 出现在首个 VCL NAL 之前时开始一个新的访问单元 (7.4.1.2.3)
    pub fn starts_access_unit(&self) -> bool {
        match self {
            Self::Aud | Self::Sps | Self::Pps | Self::Sei => true,
            Self::Other(id) => (13..=18).contains(id),
            _ => false,
        }
    }
}

/// NAL 头部
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc (0-3)
    pub ref_idc: u8,
}

impl NalHeader {
    /// 解析 NAL 头部字节
    pub fn parse(byte: u8) -> TaoResult<Self> {
        if byte & 0x80 != 0 {
            return Err(TaoError::InvalidData(format!(
                "H.264: forbidden_zero_bit 非法, header=0x{:02X}",
                byte
            )));
        }
        Ok(Self {
            nal_type: NalUnitType::from_type_id(byte & 0x1F),
            ref_idc: (byte >> 5) & 0x03,
        })
    }
}

/// AVCDecoderConfigurationRecord (MP4 avcC box 内容)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// SPS 列表 (不含起始码)
    pub sps_list: Vec<Vec<u8>>,
    /// PPS 列表 (不含起始码)
    pub pps_list: Vec<Vec<u8>>,
    /// NAL 长度前缀大小 (字节)
    pub length_size: usize,
}

impl AvcConfig {
    /// 解析 avcC
    pub fn parse(data: &[u8]) -> TaoResult<Self> {
        if data.len() < 7 {
            return Err(TaoError::InvalidData("H.264: avcC 数据太短".into()));
        }
        if data[0] != 1 {
            return Err(TaoError::InvalidData(format!(
                "H.264: avcC 版本非法, version={}",
                data[0]
            )));
        }
        let length_size = usize::from(data[4] & 0x03) + 1;
        if length_size == 3 {
            return Err(TaoError::InvalidData("H.264: avcC 长度前缀大小为 3".into()));
        }

        let mut pos = 5;
        let num_sps = usize::from(data[pos] & 0x1F);
        pos += 1;
        let sps_list = read_parameter_sets(data, &mut pos, num_sps, "SPS")?;

        let num_pps = usize::from(
            *data
                .get(pos)
                .ok_or_else(|| TaoError::InvalidData("H.264: avcC 缺少 PPS 数量字段".into()))?,
        );
        pos += 1;
        let pps_list = read_parameter_sets(data, &mut pos, num_pps, "PPS")?;

        Ok(Self {
            sps_list,
            pps_list,
            length_size,
        })
    }
}

fn read_parameter_sets(
    data: &[u8],
    pos: &mut usize,
    count: usize,
    name: &str,
) -> TaoResult<Vec<Vec<u8>>> {
    let mut sets = Vec::with_capacity(count);
    for i in 0..count {
        let Some(len_bytes) = data.get(*pos..*pos + 2) else {
            return Err(TaoError::InvalidData(format!(
                "H.264: avcC {} 长度字段截断, index={}",
                name, i
            )));
        };
        let len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        *pos += 2;
        let Some(set) = data.get(*pos..*pos + len).filter(|s| !s.is_empty()) else {
            return Err(TaoError::InvalidData(format!(
                "H.264: avcC {} 数据非法, index={}, declared_len={}, remain={}",
                name,
                i,
                len,
                data.len().saturating_sub(*pos)
            )));
        };
        sets.push(set.to_vec());
        *pos += len;
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nal_头部解析() {
        let header = NalHeader::parse(0x65).unwrap();
        assert_eq!(header.nal_type, NalUnitType::SliceIdr);
        assert_eq!(header.ref_idc, 3);
        assert!(NalHeader::parse(0xE5).is_err());
        assert!(NalUnitType::from_type_id(14).starts_access_unit());
        assert!(!NalUnitType::SliceDpb.has_slice_header());
    }

    #[test]
    fn test_avcc_解析() {
        let data = [
            0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x03, 0x67, 0x42, 0xC0, 0x01, 0x00, 0x02,
            0x68, 0xCE,
        ];
        let config = AvcConfig::parse(&data).unwrap();
        assert_eq!(config.length_size, 4);
        assert_eq!(config.sps_list, vec![vec![0x67, 0x42, 0xC0]]);
        assert_eq!(config.pps_list, vec![vec![0x68, 0xCE]]);
    }

    #[test]
    fn test_avcc_截断报错() {
        let data = [0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x09, 0x67];
        assert!(AvcConfig::parse(&data).is_err());
        assert!(AvcConfig::parse(&[0x00; 8]).is_err());
    }
}
