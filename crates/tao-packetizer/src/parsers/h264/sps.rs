//! H.264 SPS (Sequence Parameter Set) 解析.
//!
//! 分包只需要 slice 头部判定新图像所需的字段 (frame_num 长度, POC 类型等),
//! 以及 VUI 中的 SAR 与 timing_info. 量化矩阵被读取并跳过.

use tao_core::bitreader::BitReader;
use tao_core::{Rational, TaoError, TaoResult};

/// SPS id 上限 (不含)
pub const MAX_SPS_COUNT: usize = 32;

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    /// profile_idc (66=Baseline, 77=Main, 100=High)
    pub profile_idc: u8,
    /// level_idc (30=3.0, 41=4.1)
    pub level_idc: u8,
    /// seq_parameter_set_id
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane: bool,
    /// log2(max_frame_num)
    pub log2_max_frame_num: u32,
    /// 图像顺序计数类型 (0, 1, 2)
    pub poc_type: u32,
    /// log2(max_pic_order_cnt_lsb) (仅 poc_type==0)
    pub log2_max_poc_lsb: u32,
    /// delta_pic_order_always_zero_flag (仅 poc_type==1)
    pub delta_pic_order_always_zero: bool,
    /// 是否只有帧编码
    pub frame_mbs_only: bool,
    /// 图像宽度 (像素, 已应用 cropping)
    pub width: u32,
    /// 图像高度 (像素, 已应用 cropping)
    pub height: u32,
    /// 像素宽高比
    pub sar: Rational,
    /// VUI timing_info
    pub timing: Option<VuiTiming>,
}

/// VUI timing_info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VuiTiming {
    /// num_units_in_tick
    pub num_units_in_tick: u32,
    /// time_scale
    pub time_scale: u32,
    /// fixed_frame_rate_flag
    pub fixed_frame_rate: bool,
}

impl Sps {
    /// 帧率 = time_scale / (2 * num_units_in_tick)
    pub fn frame_rate(&self) -> Option<Rational> {
        let timing = self.timing?;
        let den = timing.num_units_in_tick.checked_mul(2)?;
        Some(Rational::new(timing.time_scale, den).reduce())
    }

    /// 输出顺序等于解码顺序 (PTS 可取 DTS)
    pub fn output_order_is_decode_order(&self) -> bool {
        self.poc_type == 2
    }
}

/// 预定义的 SAR 表 (ITU-T H.264 表 E-1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 1),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

/// 从 RBSP (不含 NAL 头部字节) 解析 SPS
pub fn parse_sps(rbsp: &[u8]) -> TaoResult<Sps> {
    if rbsp.len() < 4 {
        return Err(TaoError::InvalidData("H.264: SPS RBSP 太短".into()));
    }
    let mut br = BitReader::new(rbsp);

    let profile_idc = br.read_bits(8)? as u8;
    br.skip_bits(8)?; // constraint_set flags
    let level_idc = br.read_bits(8)? as u8;
    let sps_id = br.read_ue()?;
    if sps_id as usize >= MAX_SPS_COUNT {
        return Err(TaoError::InvalidData(format!(
            "H.264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if is_high_profile(profile_idc) {
        chroma_format_idc = br.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(TaoError::InvalidData(format!(
                "H.264: chroma_format_idc 非法, value={}",
                chroma_format_idc
            )));
        }
        if chroma_format_idc == 3 {
            separate_colour_plane = br.read_flag()?;
        }
        let bit_depth_luma = br.read_ue()? + 8;
        let bit_depth_chroma = br.read_ue()? + 8;
        if bit_depth_luma > 14 || bit_depth_chroma > 14 {
            return Err(TaoError::InvalidData(format!(
                "H.264: 位深非法, luma={}, chroma={}",
                bit_depth_luma, bit_depth_chroma
            )));
        }
        br.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if br.read_flag()? {
            let list_count = if chroma_format_idc == 3 { 12 } else { 8 };
            for idx in 0..list_count {
                if br.read_flag()? {
                    skip_scaling_list(&mut br, if idx < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let log2_max_frame_num = br.read_ue()? + 4;
    if log2_max_frame_num > 16 {
        return Err(TaoError::InvalidData(format!(
            "H.264: log2_max_frame_num 超出范围, value={}",
            log2_max_frame_num
        )));
    }

    let poc_type = br.read_ue()?;
    let mut log2_max_poc_lsb = 0;
    let mut delta_pic_order_always_zero = false;
    match poc_type {
        0 => {
            log2_max_poc_lsb = br.read_ue()? + 4;
            if log2_max_poc_lsb > 16 {
                return Err(TaoError::InvalidData(format!(
                    "H.264: log2_max_pic_order_cnt_lsb 超出范围, value={}",
                    log2_max_poc_lsb
                )));
            }
        }
        1 => {
            delta_pic_order_always_zero = br.read_flag()?;
            br.read_se()?; // offset_for_non_ref_pic
            br.read_se()?; // offset_for_top_to_bottom_field
            let cycle = br.read_ue()?;
            if cycle > 255 {
                return Err(TaoError::InvalidData(format!(
                    "H.264: num_ref_frames_in_pic_order_cnt_cycle 超出范围, value={}",
                    cycle
                )));
            }
            for _ in 0..cycle {
                br.read_se()?;
            }
        }
        2 => {}
        _ => {
            return Err(TaoError::InvalidData(format!(
                "H.264: pic_order_cnt_type 非法, value={}",
                poc_type
            )));
        }
    }

    br.read_ue()?; // max_num_ref_frames
    br.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag
    let width_in_mbs = br.read_ue()? + 1;
    let height_in_map_units = br.read_ue()? + 1;
    let frame_mbs_only = br.read_flag()?;
    if !frame_mbs_only {
        br.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    br.skip_bits(1)?; // direct_8x8_inference_flag

    let (mut crop_x, mut crop_y) = (0u32, 0u32);
    if br.read_flag()? {
        let left = br.read_ue()?;
        let right = br.read_ue()?;
        let top = br.read_ue()?;
        let bottom = br.read_ue()?;
        let chroma_array_type = if separate_colour_plane {
            0
        } else {
            chroma_format_idc
        };
        let (unit_x, unit_y) = cropping_unit(chroma_array_type, frame_mbs_only);
        crop_x = left
            .checked_add(right)
            .and_then(|v| v.checked_mul(unit_x))
            .ok_or_else(|| TaoError::InvalidData("H.264: 计算水平裁剪时发生溢出".into()))?;
        crop_y = top
            .checked_add(bottom)
            .and_then(|v| v.checked_mul(unit_y))
            .ok_or_else(|| TaoError::InvalidData("H.264: 计算垂直裁剪时发生溢出".into()))?;
    }
    let raw_width = width_in_mbs
        .checked_mul(16)
        .ok_or_else(|| TaoError::InvalidData("H.264: 计算宽度时发生溢出".into()))?;
    let raw_height = height_in_map_units
        .checked_mul(if frame_mbs_only { 16 } else { 32 })
        .ok_or_else(|| TaoError::InvalidData("H.264: 计算高度时发生溢出".into()))?;
    if crop_x >= raw_width || crop_y >= raw_height {
        return Err(TaoError::InvalidData(format!(
            "H.264: 裁剪参数非法, raw={}x{}, crop_x={}, crop_y={}",
            raw_width, raw_height, crop_x, crop_y
        )));
    }

    let mut sar = Rational::new(1, 1);
    let mut timing = None;
    if br.read_flag()? {
        // VUI 截断时保留已解析的字段
        if let Ok((parsed_sar, parsed_timing)) = parse_vui(&mut br) {
            sar = parsed_sar;
            timing = parsed_timing;
        }
    }

    Ok(Sps {
        profile_idc,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane,
        log2_max_frame_num,
        poc_type,
        log2_max_poc_lsb,
        delta_pic_order_always_zero,
        frame_mbs_only,
        width: raw_width - crop_x,
        height: raw_height - crop_y,
        sar,
        timing,
    })
}

fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    )
}

fn cropping_unit(chroma_array_type: u32, frame_mbs_only: bool) -> (u32, u32) {
    let sub_width = match chroma_array_type {
        1 | 2 => 2,
        _ => 1,
    };
    let sub_height = if chroma_array_type == 1 { 2 } else { 1 };
    let height_mult = if frame_mbs_only { 1 } else { 2 };
    (sub_width, sub_height * height_mult)
}

fn skip_scaling_list(br: &mut BitReader<'_>, size: usize) -> TaoResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = br.read_se()?;
            next_scale = (last_scale + delta).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// 解析 VUI 到 timing_info 为止, 返回 (SAR, timing)
fn parse_vui(br: &mut BitReader<'_>) -> TaoResult<(Rational, Option<VuiTiming>)> {
    let mut sar = Rational::new(1, 1);
    if br.read_flag()? {
        let idc = br.read_bits(8)? as usize;
        if idc == 255 {
            let w = br.read_bits(16)?;
            let h = br.read_bits(16)?;
            if w > 0 && h > 0 {
                sar = Rational::new(w, h);
            }
        } else if let Some(&(w, h)) = SAR_TABLE.get(idc) {
            if w > 0 {
                sar = Rational::new(w, h);
            }
        }
    }
    if br.read_flag()? {
        br.skip_bits(1)?; // overscan_appropriate_flag
    }
    if br.read_flag()? {
        br.skip_bits(4)?; // video_format, video_full_range_flag
        if br.read_flag()? {
            br.skip_bits(24)?; // colour_primaries, transfer, matrix
        }
    }
    if br.read_flag()? {
        br.read_ue()?; // chroma_sample_loc_type_top_field
        br.read_ue()?; // chroma_sample_loc_type_bottom_field
    }
    let mut timing = None;
    if br.read_flag()? {
        let num_units_in_tick = br.read_bits(32)?;
        let time_scale = br.read_bits(32)?;
        let fixed_frame_rate = br.read_flag()?;
        if num_units_in_tick > 0 && time_scale > 0 {
            timing = Some(VuiTiming {
                num_units_in_tick,
                time_scale,
                fixed_frame_rate,
            });
        }
    }
    Ok((sar, timing))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tao_core::bitwriter::BitWriter;

    /// 构造 Baseline SPS RBSP (不含 NAL 头部)
    pub(crate) fn build_sps_rbsp(sps_id: u32, poc_type: u32, timing: Option<(u32, u32)>) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(66, 8); // profile_idc
        bw.write_bits(0xC0, 8);
        bw.write_bits(30, 8); // level_idc
        bw.write_ue(sps_id);
        bw.write_ue(0); // log2_max_frame_num_minus4
        bw.write_ue(poc_type);
        if poc_type == 0 {
            bw.write_ue(0); // log2_max_pic_order_cnt_lsb_minus4
        }
        bw.write_ue(1); // max_num_ref_frames
        bw.write_bit(false);
        bw.write_ue(19); // 320 像素
        bw.write_ue(14); // 240 像素
        bw.write_bit(true); // frame_mbs_only_flag
        bw.write_bit(true); // direct_8x8_inference_flag
        bw.write_bit(false); // frame_cropping_flag
        match timing {
            Some((num_units, time_scale)) => {
                bw.write_bit(true); // vui_parameters_present_flag
                bw.write_bit(false); // aspect_ratio_info_present_flag
                bw.write_bit(false); // overscan_info_present_flag
                bw.write_bit(false); // video_signal_type_present_flag
                bw.write_bit(false); // chroma_loc_info_present_flag
                bw.write_bit(true); // timing_info_present_flag
                bw.write_bits(num_units, 32);
                bw.write_bits(time_scale, 32);
                bw.write_bit(true);
                bw.write_bits(0, 5); // nal/vcl hrd, pic_struct, bitstream_restriction
            }
            None => bw.write_bit(false),
        }
        bw.write_trailing_bits();
        bw.finish()
    }

    #[test]
    fn test_解析_baseline_sps() {
        let sps = parse_sps(&build_sps_rbsp(0, 0, None)).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 30);
        assert_eq!((sps.width, sps.height), (320, 240));
        assert_eq!(sps.log2_max_frame_num, 4);
        assert_eq!(sps.log2_max_poc_lsb, 4);
        assert!(sps.frame_mbs_only);
        assert!(sps.frame_rate().is_none());
    }

    #[test]
    fn test_vui_帧率() {
        let sps = parse_sps(&build_sps_rbsp(3, 2, Some((1001, 60_000)))).unwrap();
        assert_eq!(sps.sps_id, 3);
        assert!(sps.output_order_is_decode_order());
        assert_eq!(sps.frame_rate(), Some(Rational::new(30_000, 1001)));
    }

    #[test]
    fn test_sps_id_越界() {
        assert!(parse_sps(&build_sps_rbsp(32, 0, None)).is_err());
        assert!(parse_sps(&[0x42, 0x00]).is_err());
    }
}
