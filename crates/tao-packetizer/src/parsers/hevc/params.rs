//! H.265 参数集与 slice segment 头部解析.
//!
//! 只读取分包所需的字段: 各参数集的 id 与引用关系, SPS 中的图像尺寸与重排序深度,
//! 以及首个 slice segment 的图像类型.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

/// VPS id 上限 (不含)
pub const MAX_VPS_COUNT: usize = 16;
/// SPS id 上限 (不含)
pub const MAX_SPS_COUNT: usize = 16;
/// PPS id 上限 (不含)
pub const MAX_PPS_COUNT: usize = 64;

/// profile_tier_level 中 general/sub_layer profile 部分的位数
const PROFILE_BITS: usize = 88;
const LEVEL_BITS: usize = 8;

/// VPS 中分包需要的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vps {
    pub vps_id: u32,
}

/// SPS 中分包需要的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sps {
    /// 引用的 sps_video_parameter_set_id
    pub vps_id: u32,
    pub sps_id: u32,
    pub width: u32,
    pub height: u32,
    /// 最高时域子层的 sps_max_num_reorder_pics
    pub max_num_reorder_pics: u32,
}

impl Sps {
    /// 输出顺序是否等于解码顺序 (无重排序时 PTS 可由 DTS 推出)
    pub fn output_order_is_decode_order(&self) -> bool {
        self.max_num_reorder_pics == 0
    }
}

/// PPS 中分包需要的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pps {
    pub pps_id: u32,
    /// 引用的 pps_seq_parameter_set_id
    pub sps_id: u32,
    /// num_extra_slice_header_bits
    pub num_extra_slice_header_bits: u32,
}

/// slice_type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    B,
    P,
    I,
}

/// slice segment 头部中分包需要的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    /// first_slice_segment_in_pic_flag
    pub first_slice_in_pic: bool,
    pub pps_id: u32,
    /// 仅在图像的首个 slice segment 上解析
    pub slice_type: Option<SliceType>,
}

fn out_of_range(what: &str, value: u32) -> TaoError {
    TaoError::InvalidData(format!("H.265: {} 超出范围, value={}", what, value))
}

/// 从 RBSP (不含 NAL 头部) 解析 VPS
pub fn parse_vps(rbsp: &[u8]) -> TaoResult<Vps> {
    let mut br = BitReader::new(rbsp);
    Ok(Vps {
        vps_id: br.read_bits(4)?,
    })
}

/// 跳过 profile_tier_level(1, max_sub_layers_minus1)
fn skip_profile_tier_level(br: &mut BitReader<'_>, max_sub_layers_minus1: u32) -> TaoResult<()> {
    br.skip_bits(PROFILE_BITS + LEVEL_BITS)?;
    let mut present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        let profile = br.read_flag()?;
        let level = br.read_flag()?;
        present.push((profile, level));
    }
    if max_sub_layers_minus1 > 0 {
        br.skip_bits(2 * (8 - max_sub_layers_minus1 as usize))?;
    }
    for (profile, level) in present {
        if profile {
            br.skip_bits(PROFILE_BITS)?;
        }
        if level {
            br.skip_bits(LEVEL_BITS)?;
        }
    }
    Ok(())
}

/// 从 RBSP (不含 NAL 头部) 解析 SPS
pub fn parse_sps(rbsp: &[u8]) -> TaoResult<Sps> {
    let mut br = BitReader::new(rbsp);
    let vps_id = br.read_bits(4)?;
    let max_sub_layers_minus1 = br.read_bits(3)?;
    if max_sub_layers_minus1 > 6 {
        return Err(out_of_range("sps_max_sub_layers_minus1", max_sub_layers_minus1));
    }
    br.skip_bits(1)?; // sps_temporal_id_nesting_flag
    skip_profile_tier_level(&mut br, max_sub_layers_minus1)?;

    let sps_id = br.read_ue()?;
    if sps_id as usize >= MAX_SPS_COUNT {
        return Err(out_of_range("sps_seq_parameter_set_id", sps_id));
    }
    let chroma_format_idc = br.read_ue()?;
    if chroma_format_idc > 3 {
        return Err(out_of_range("chroma_format_idc", chroma_format_idc));
    }
    if chroma_format_idc == 3 {
        br.skip_bits(1)?; // separate_colour_plane_flag
    }
    let width = br.read_ue()?;
    let height = br.read_ue()?;
    if br.read_flag()? {
        // conf_win_{left,right,top,bottom}_offset
        for _ in 0..4 {
            br.read_ue()?;
        }
    }
    br.read_ue()?; // bit_depth_luma_minus8
    br.read_ue()?; // bit_depth_chroma_minus8
    br.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4

    let first = if br.read_flag()? {
        0
    } else {
        max_sub_layers_minus1
    };
    let mut max_num_reorder_pics = 0;
    for _ in first..=max_sub_layers_minus1 {
        br.read_ue()?; // sps_max_dec_pic_buffering_minus1
        max_num_reorder_pics = br.read_ue()?;
        br.read_ue()?; // sps_max_latency_increase_plus1
    }

    Ok(Sps {
        vps_id,
        sps_id,
        width,
        height,
        max_num_reorder_pics,
    })
}

/// 从 RBSP (不含 NAL 头部) 解析 PPS
pub fn parse_pps(rbsp: &[u8]) -> TaoResult<Pps> {
    let mut br = BitReader::new(rbsp);
    let pps_id = br.read_ue()?;
    if pps_id as usize >= MAX_PPS_COUNT {
        return Err(out_of_range("pps_pic_parameter_set_id", pps_id));
    }
    let sps_id = br.read_ue()?;
    if sps_id as usize >= MAX_SPS_COUNT {
        return Err(out_of_range("pps_seq_parameter_set_id", sps_id));
    }
    br.skip_bits(2)?; // dependent_slice_segments_enabled_flag, output_flag_present_flag
    let num_extra_slice_header_bits = br.read_bits(3)?;
    Ok(Pps {
        pps_id,
        sps_id,
        num_extra_slice_header_bits,
    })
}

impl SliceHeader {
    /// 从 slice segment RBSP (不含 NAL 头部) 解析
    ///
    /// `lookup_pps` 按 id 返回已缓存的 PPS; 引用未知 PPS 的首个 slice 返回错误.
    pub fn parse<'a>(
        rbsp: &[u8],
        irap: bool,
        lookup_pps: impl FnOnce(u32) -> Option<&'a Pps>,
    ) -> TaoResult<Self> {
        let mut br = BitReader::new(rbsp);
        let first_slice_in_pic = br.read_flag()?;
        if irap {
            br.skip_bits(1)?; // no_output_of_prior_pics_flag
        }
        let pps_id = br.read_ue()?;
        if pps_id as usize >= MAX_PPS_COUNT {
            return Err(out_of_range("slice_pic_parameter_set_id", pps_id));
        }
        if !first_slice_in_pic {
            // 后续 slice 的地址长度依赖 SPS 中的 CTB 划分, 分包用不到
            return Ok(Self {
                first_slice_in_pic,
                pps_id,
                slice_type: None,
            });
        }

        let pps = lookup_pps(pps_id).ok_or_else(|| {
            TaoError::InvalidData(format!("H.265: slice 引用了未知的 PPS, pps_id={}", pps_id))
        })?;
        br.skip_bits(pps.num_extra_slice_header_bits as usize)?;
        let slice_type = match br.read_ue()? {
            0 => SliceType::B,
            1 => SliceType::P,
            2 => SliceType::I,
            other => return Err(out_of_range("slice_type", other)),
        };
        Ok(Self {
            first_slice_in_pic,
            pps_id,
            slice_type: Some(slice_type),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tao_core::bitwriter::BitWriter;

    /// 构造 64x64, 4:2:0, 单时域子层的 SPS RBSP
    pub(crate) fn build_sps_rbsp(sps_id: u32, max_num_reorder_pics: u32) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(0, 4); // sps_video_parameter_set_id
        bw.write_bits(0, 3); // sps_max_sub_layers_minus1
        bw.write_bit(true); // sps_temporal_id_nesting_flag
        bw.write_bits(0x01, 8); // general_profile_space/tier/profile_idc = Main
        bw.write_bits(0x6000_0000, 32); // general_profile_compatibility_flags
        bw.write_bits_u64(0x9000_0000_0000, 48);
        bw.write_bits(93, 8); // general_level_idc
        bw.write_ue(sps_id);
        bw.write_ue(1); // chroma_format_idc
        bw.write_ue(64);
        bw.write_ue(64);
        bw.write_bit(false); // conformance_window_flag
        bw.write_ue(0);
        bw.write_ue(0);
        bw.write_ue(4); // log2_max_pic_order_cnt_lsb_minus4
        bw.write_bit(true); // sps_sub_layer_ordering_info_present_flag
        bw.write_ue(max_num_reorder_pics + 1);
        bw.write_ue(max_num_reorder_pics);
        bw.write_ue(0);
        bw.write_ue(0); // log2_min_luma_coding_block_size_minus3
        bw.write_trailing_bits();
        bw.finish()
    }

    pub(crate) fn build_pps_rbsp(pps_id: u32, sps_id: u32, extra_bits: u32) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_ue(pps_id);
        bw.write_ue(sps_id);
        bw.write_bit(false); // dependent_slice_segments_enabled_flag
        bw.write_bit(false); // output_flag_present_flag
        bw.write_bits(extra_bits, 3);
        bw.write_bit(false); // sign_data_hiding_enabled_flag
        bw.write_bit(false); // cabac_init_present_flag
        bw.write_trailing_bits();
        bw.finish()
    }

    /// 构造 slice segment RBSP; `slice_type` 为 None 时写入非首个 slice
    pub(crate) fn build_slice_rbsp(irap: bool, slice_type: Option<u32>, extra_bits: u32) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bit(slice_type.is_some());
        if irap {
            bw.write_bit(false);
        }
        bw.write_ue(0); // slice_pic_parameter_set_id
        match slice_type {
            Some(slice_type) => {
                bw.write_bits(0, extra_bits);
                bw.write_ue(slice_type);
            }
            None => bw.write_bits(0x3, 4), // slice_segment_address
        }
        // 负载部分: 任意非零字节
        bw.write_bits(0xA5A5, 16);
        bw.write_trailing_bits();
        bw.finish()
    }

    #[test]
    fn test_解析_sps() {
        let sps = parse_sps(&build_sps_rbsp(3, 2)).unwrap();
        assert_eq!(sps.sps_id, 3);
        assert_eq!(sps.vps_id, 0);
        assert_eq!((sps.width, sps.height), (64, 64));
        assert_eq!(sps.max_num_reorder_pics, 2);
        assert!(!sps.output_order_is_decode_order());
        assert!(parse_sps(&build_sps_rbsp(16, 0)).is_err());
    }

    #[test]
    fn test_解析_pps_与_vps() {
        let pps = parse_pps(&build_pps_rbsp(5, 1, 2)).unwrap();
        assert_eq!(pps.pps_id, 5);
        assert_eq!(pps.sps_id, 1);
        assert_eq!(pps.num_extra_slice_header_bits, 2);
        assert!(parse_pps(&build_pps_rbsp(64, 0, 0)).is_err());
        assert_eq!(parse_vps(&[0x3C, 0xFF]).unwrap().vps_id, 3);
    }

    #[test]
    fn test_slice_头部() {
        let pps = parse_pps(&build_pps_rbsp(0, 0, 2)).unwrap();
        let idr = SliceHeader::parse(&build_slice_rbsp(true, Some(2), 2), true, |_| Some(&pps)).unwrap();
        assert!(idr.first_slice_in_pic);
        assert_eq!(idr.slice_type, Some(SliceType::I));

        let b = SliceHeader::parse(&build_slice_rbsp(false, Some(0), 2), false, |_| Some(&pps)).unwrap();
        assert_eq!(b.slice_type, Some(SliceType::B));

        let rest = SliceHeader::parse(&build_slice_rbsp(false, None, 0), false, |_| None).unwrap();
        assert!(!rest.first_slice_in_pic);
        assert_eq!(rest.slice_type, None);

        assert!(SliceHeader::parse(&build_slice_rbsp(false, Some(1), 0), false, |_| None).is_err());
    }
}
