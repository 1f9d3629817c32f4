//! H.264 PPS (Picture Parameter Set) 解析.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::sps::MAX_SPS_COUNT;

/// PPS id 上限 (不含)
pub const MAX_PPS_COUNT: usize = 256;

/// PPS 中分包需要的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pps {
    /// pic_parameter_set_id
    pub pps_id: u32,
    /// 引用的 seq_parameter_set_id
    pub sps_id: u32,
    /// entropy_coding_mode_flag (CABAC)
    pub entropy_coding_mode: bool,
    /// bottom_field_pic_order_in_frame_present_flag
    pub bottom_field_pic_order_present: bool,
}

/// 从 RBSP (不含 NAL 头部字节) 解析 PPS
pub fn parse_pps(rbsp: &[u8]) -> TaoResult<Pps> {
    let mut br = BitReader::new(rbsp);
    let pps_id = br.read_ue()?;
    if pps_id as usize >= MAX_PPS_COUNT {
        return Err(TaoError::InvalidData(format!(
            "H.264: pps_id 超出范围, pps_id={}",
            pps_id
        )));
    }
    let sps_id = br.read_ue()?;
    if sps_id as usize >= MAX_SPS_COUNT {
        return Err(TaoError::InvalidData(format!(
            "H.264: PPS 引用的 sps_id 超出范围, pps_id={}, sps_id={}",
            pps_id, sps_id
        )));
    }
    let entropy_coding_mode = br.read_flag()?;
    let bottom_field_pic_order_present = br.read_flag()?;
    Ok(Pps {
        pps_id,
        sps_id,
        entropy_coding_mode,
        bottom_field_pic_order_present,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tao_core::bitwriter::BitWriter;

    /// 构造最小 PPS RBSP (不含 NAL 头部)
    pub(crate) fn build_pps_rbsp(pps_id: u32, sps_id: u32, bottom_field_pic_order: bool) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_ue(pps_id);
        bw.write_ue(sps_id);
        bw.write_bit(false); // entropy_coding_mode_flag
        bw.write_bit(bottom_field_pic_order);
        bw.write_ue(0); // num_slice_groups_minus1
        bw.write_ue(0); // num_ref_idx_l0_default_active_minus1
        bw.write_ue(0); // num_ref_idx_l1_default_active_minus1
        bw.write_bit(false); // weighted_pred_flag
        bw.write_bits(0, 2); // weighted_bipred_idc
        bw.write_se(0); // pic_init_qp_minus26
        bw.write_se(0); // pic_init_qs_minus26
        bw.write_se(0); // chroma_qp_index_offset
        bw.write_bit(true); // deblocking_filter_control_present_flag
        bw.write_bit(false); // constrained_intra_pred_flag
        bw.write_bit(false); // redundant_pic_cnt_present_flag
        bw.write_trailing_bits();
        bw.finish()
    }

    #[test]
    fn test_解析_pps() {
        let pps = parse_pps(&build_pps_rbsp(7, 2, true)).unwrap();
        assert_eq!(pps.pps_id, 7);
        assert_eq!(pps.sps_id, 2);
        assert!(pps.bottom_field_pic_order_present);
        assert!(!pps.entropy_coding_mode);
    }

    #[test]
    fn test_pps_id_越界() {
        assert!(parse_pps(&build_pps_rbsp(256, 0, false)).is_err());
        assert!(parse_pps(&build_pps_rbsp(0, 40, false)).is_err());
    }
}
