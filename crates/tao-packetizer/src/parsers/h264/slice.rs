//! H.264 slice 头部 (前半部分) 解析与新图像检测.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::nal::{NalHeader, NalUnitType};
use super::pps::Pps;
use super::sps::Sps;

/// slice 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// P
    P,
    /// B
    B,
    /// I
    I,
    /// SP
    Sp,
    /// SI
    Si,
}

impl SliceType {
    fn from_code(code: u32) -> TaoResult<Self> {
        if code > 9 {
            return Err(TaoError::InvalidData(format!(
                "H.264: slice_type 非法, value={}",
                code
            )));
        }
        Ok(match code % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        })
    }

    /// 帧内类型 (I/SI)
    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I | Self::Si)
    }
}

/// slice 头部中与访问单元边界相关的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc
    pub ref_idc: u8,
    /// first_mb_in_slice
    pub first_mb: u32,
    /// slice 类型
    pub slice_type: SliceType,
    /// pic_parameter_set_id
    pub pps_id: u32,
    /// frame_num
    pub frame_num: u32,
    /// field_pic_flag
    pub field_pic: bool,
    /// bottom_field_flag
    pub bottom_field: bool,
    /// idr_pic_id (仅 IDR)
    pub idr_pic_id: Option<u32>,
    /// 所属 SPS 的 POC 类型
    pub poc_type: u32,
    /// pic_order_cnt_lsb
    pub poc_lsb: u32,
    /// delta_pic_order_cnt_bottom
    pub delta_poc_bottom: i32,
    /// delta_pic_order_cnt[0..2]
    pub delta_poc: [i32; 2],
}

impl SliceHeader {
    /// 解析 slice 头部
    ///
    /// `rbsp` 不含 NAL 头部字节; `lookup` 按 pps_id 返回已缓存的 (SPS, PPS).
    pub fn parse<'a>(
        rbsp: &[u8],
        nal: NalHeader,
        lookup: impl FnOnce(u32) -> Option<(&'a Sps, &'a Pps)>,
    ) -> TaoResult<Self> {
        let mut br = BitReader::new(rbsp);
        let first_mb = br.read_ue()?;
        let slice_type = SliceType::from_code(br.read_ue()?)?;
        let pps_id = br.read_ue()?;
        let (sps, pps) = lookup(pps_id).ok_or_else(|| {
            TaoError::InvalidData(format!("H.264: slice 引用了未知的 PPS, pps_id={}", pps_id))
        })?;

        if sps.separate_colour_plane {
            br.skip_bits(2)?; // colour_plane_id
        }
        let frame_num = br.read_bits(sps.log2_max_frame_num)?;
        let mut field_pic = false;
        let mut bottom_field = false;
        if !sps.frame_mbs_only {
            field_pic = br.read_flag()?;
            if field_pic {
                bottom_field = br.read_flag()?;
            }
        }
        let idr_pic_id = if nal.nal_type == NalUnitType::SliceIdr {
            Some(br.read_ue()?)
        } else {
            None
        };

        let mut poc_lsb = 0;
        let mut delta_poc_bottom = 0;
        let mut delta_poc = [0i32; 2];
        match sps.poc_type {
            0 => {
                poc_lsb = br.read_bits(sps.log2_max_poc_lsb)?;
                if pps.bottom_field_pic_order_present && !field_pic {
                    delta_poc_bottom = br.read_se()?;
                }
            }
            1 if !sps.delta_pic_order_always_zero => {
                delta_poc[0] = br.read_se()?;
                if pps.bottom_field_pic_order_present && !field_pic {
                    delta_poc[1] = br.read_se()?;
                }
            }
            _ => {}
        }

        Ok(Self {
            nal_type: nal.nal_type,
            ref_idc: nal.ref_idc,
            first_mb,
            slice_type,
            pps_id,
            frame_num,
            field_pic,
            bottom_field,
            idr_pic_id,
            poc_type: sps.poc_type,
            poc_lsb,
            delta_poc_bottom,
            delta_poc,
        })
    }

    /// 是否为 IDR 图像
    pub fn is_idr(&self) -> bool {
        self.idr_pic_id.is_some()
    }

    /// 本 slice 是否属于与 `prev` 不同的主编码图像 (7.4.1.2.4)
    pub fn is_new_picture(&self, prev: &SliceHeader) -> bool {
        if self.frame_num != prev.frame_num
            || self.pps_id != prev.pps_id
            || self.field_pic != prev.field_pic
            || (self.field_pic && self.bottom_field != prev.bottom_field)
            || (self.ref_idc != prev.ref_idc && (self.ref_idc == 0 || prev.ref_idc == 0))
            || self.is_idr() != prev.is_idr()
        {
            return true;
        }
        if self.is_idr() && self.idr_pic_id != prev.idr_pic_id {
            return true;
        }
        match self.poc_type {
            0 => {
                self.poc_lsb != prev.poc_lsb || self.delta_poc_bottom != prev.delta_poc_bottom
            }
            1 => self.delta_poc != prev.delta_poc,
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parsers::h264::pps::parse_pps;
    use crate::parsers::h264::pps::tests::build_pps_rbsp;
    use crate::parsers::h264::sps::parse_sps;
    use crate::parsers::h264::sps::tests::build_sps_rbsp;
    use tao_core::bitwriter::BitWriter;

    /// 构造 slice RBSP (不含 NAL 头部), 适用于 `build_sps_rbsp(_, 0, _)` 的 SPS
    pub(crate) fn build_slice_rbsp(
        slice_type: u32,
        frame_num: u32,
        idr_pic_id: Option<u32>,
        poc_lsb: u32,
    ) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_ue(0); // first_mb_in_slice
        bw.write_ue(slice_type);
        bw.write_ue(0); // pps_id
        bw.write_bits(frame_num, 4);
        if let Some(id) = idr_pic_id {
            bw.write_ue(id);
        }
        bw.write_bits(poc_lsb, 4);
        // 负载部分: 任意非零字节
        bw.write_bits(0xA5A5, 16);
        bw.write_trailing_bits();
        bw.finish()
    }

    fn parse(rbsp: &[u8], header: u8) -> SliceHeader {
        let sps = parse_sps(&build_sps_rbsp(0, 0, None)).unwrap();
        let pps = parse_pps(&build_pps_rbsp(0, 0, false)).unwrap();
        let nal = NalHeader::parse(header).unwrap();
        SliceHeader::parse(rbsp, nal, |_| Some((&sps, &pps))).unwrap()
    }

    #[test]
    fn test_解析_idr_slice() {
        let slice = parse(&build_slice_rbsp(7, 0, Some(3), 0), 0x65);
        assert_eq!(slice.slice_type, SliceType::I);
        assert_eq!(slice.idr_pic_id, Some(3));
        assert!(slice.is_idr());
    }

    #[test]
    fn test_新图像检测() {
        let a = parse(&build_slice_rbsp(5, 1, None, 2), 0x41);
        let same = parse(&build_slice_rbsp(5, 1, None, 2), 0x41);
        let next_frame = parse(&build_slice_rbsp(5, 2, None, 4), 0x41);
        let non_ref = parse(&build_slice_rbsp(6, 1, None, 2), 0x01);
        assert!(!same.is_new_picture(&a));
        assert!(next_frame.is_new_picture(&a));
        assert!(non_ref.is_new_picture(&a));
    }

    #[test]
    fn test_未知_pps() {
        let nal = NalHeader::parse(0x41).unwrap();
        let rbsp = build_slice_rbsp(5, 0, None, 0);
        assert!(SliceHeader::parse(&rbsp, nal, |_| None).is_err());
    }
}
