//! 视频分包器集成测试: MPEG-2 Video, VC-1, Motion JPEG

use tao_es::core::bitwriter::BitWriter;
use tao_es::core::{NOPTS_VALUE, Rational};
use tao_es::packetizer::parsers::annexb;
use tao_es::packetizer::{
    AccessUnit, AccessUnitFlags, CodecId, Fragment, FragmentFlags, Packetize, StreamConfig,
};

fn create(config: &StreamConfig) -> Box<dyn Packetize> {
    let _ = env_logger::builder().is_test(true).try_init();
    tao_es::default_packetizer_registry()
        .create(config)
        .unwrap_or_else(|err| panic!("创建 {} 分包器失败: {}", config.codec_id, err))
}

fn run_chunked(config: &StreamConfig, stream: &[u8], chunk: usize) -> Vec<AccessUnit> {
    let mut p = create(config);
    let mut out = Vec::new();
    for part in stream.chunks(chunk) {
        out.extend(p.push(Fragment::new(part.to_vec())));
    }
    out.extend(p.finish());
    out
}

fn picture_types(aus: &[AccessUnit]) -> String {
    aus.iter().map(AccessUnit::picture_type).collect()
}

// ============================================================
// MPEG-2 Video
// ============================================================

fn start_code_unit(code: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0x00, 0x00, 0x01, code];
    out.extend_from_slice(body);
    out
}

/// 720x576, 4:3, 25fps
fn sequence_header() -> Vec<u8> {
    start_code_unit(0xB3, &[0x2D, 0x02, 0x40, 0x23, 0xFF, 0xFF, 0xE0, 0x18])
}

fn sequence_extension() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(1, 4); // sequence_extension
    bw.write_bits(0x48, 8); // Main@Main
    bw.write_bit(true); // progressive_sequence
    bw.write_bits(1, 2); // 4:2:0
    bw.write_bits(0, 4);
    bw.write_bits(0xFFF, 12);
    bw.write_bit(true);
    bw.write_bits(0xFF, 8);
    bw.write_bit(false); // low_delay
    bw.write_bits(0, 7);
    start_code_unit(0xB5, &bw.finish())
}

fn picture_coding_extension() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(8, 4); // picture_coding_extension
    bw.write_bits(0xFFFF, 16);
    bw.write_bits(0, 2);
    bw.write_bits(3, 2); // 帧图像
    bw.write_bit(true);
    bw.write_bits(0b10000, 5);
    bw.write_bit(false);
    bw.write_bit(true);
    bw.write_bit(true);
    bw.write_bits(0x7F, 7);
    start_code_unit(0xB5, &bw.finish())
}

fn picture(temporal_reference: u32, coding_type: u32) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(temporal_reference, 10);
    bw.write_bits(coding_type, 3);
    bw.write_bits(0xFFFF, 16);
    bw.write_bits(0x7, 3);
    let mut out = start_code_unit(0x00, &bw.finish());
    out.extend(picture_coding_extension());
    for row in 1..=3u8 {
        out.extend(start_code_unit(row, &[0x12, row, 0x56, 0x78]));
    }
    out
}

fn gop_header() -> Vec<u8> {
    start_code_unit(0xB8, &[0x00, 0x08, 0x00, 0x40])
}

/// 解码顺序 I P B B I P B
fn mpeg2_stream() -> Vec<u8> {
    [
        sequence_header(),
        sequence_extension(),
        gop_header(),
        picture(0, 1),
        picture(3, 2),
        picture(1, 3),
        picture(2, 3),
        gop_header(),
        picture(0, 1),
        picture(2, 2),
        picture(1, 3),
        start_code_unit(0xB7, &[]),
    ]
    .concat()
}

#[test]
fn test_mpeg2_切分无关且无损() {
    let config = StreamConfig::new(CodecId::Mpeg2Video);
    let stream = mpeg2_stream();
    let expected = run_chunked(&config, &stream, stream.len());
    assert_eq!(picture_types(&expected), "IPBBIPB");
    assert!(expected[0].data.starts_with(&sequence_header()));
    assert!(expected[6].flags.contains(AccessUnitFlags::END_OF_SEQUENCE));

    let joined: Vec<u8> = expected.iter().flat_map(|au| au.data.to_vec()).collect();
    assert_eq!(joined, stream);

    for chunk in [1, 2, 5, 17, 100] {
        let out = run_chunked(&config, &stream, chunk);
        assert_eq!(out.len(), expected.len(), "chunk={}", chunk);
        for (a, b) in out.iter().zip(&expected) {
            assert_eq!(a.data, b.data, "chunk={}", chunk);
            assert_eq!(a.flags, b.flags, "chunk={}", chunk);
        }
    }
}

#[test]
fn test_mpeg2_extradata_预先送入() {
    let extradata = [sequence_header(), sequence_extension()].concat();
    let config = StreamConfig::new(CodecId::Mpeg2Video).with_extradata(extradata.clone());
    let mut p = create(&config);
    assert_eq!(p.extradata().map(|b| b.to_vec()), Some(extradata));

    let stream = [gop_header(), picture(0, 1), picture(1, 2)].concat();
    let mut out = p.push(Fragment::new(stream));
    out.extend(p.finish());
    assert_eq!(picture_types(&out), "IP");
    assert_eq!(p.stats().dropped_units, 0);
}

#[test]
fn test_mpeg2_不连续后首帧标记() {
    let mut p = create(&StreamConfig::new(CodecId::Mpeg2Video));
    let head = [sequence_header(), sequence_extension(), picture(0, 1), picture(1, 2)].concat();
    let mut out = p.push(Fragment::new(head));
    let tail = [gop_header(), picture(0, 1), picture(1, 2)].concat();
    out.extend(p.push(Fragment::new(tail).with_flags(FragmentFlags::DISCONTINUITY)));
    out.extend(p.finish());

    assert_eq!(picture_types(&out), "IPIP");
    let flagged: Vec<bool> = out
        .iter()
        .map(|au| au.flags.contains(AccessUnitFlags::DISCONTINUITY))
        .collect();
    assert_eq!(flagged, vec![false, false, true, false]);
}

// ============================================================
// VC-1
// ============================================================

fn idu(kind: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = annexb::START_CODE_4.to_vec();
    out.push(kind);
    out.extend_from_slice(&annexb::escape(rbsp));
    out
}

/// 高级档次逐行, 1280x720, 25fps
fn vc1_sequence() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(3, 2); // profile
    bw.write_bits(2, 3); // level
    bw.write_bits(1, 2); // chroma_format
    bw.write_bits(0, 3); // frmrtq_postproc
    bw.write_bits(0, 5); // bitrtq_postproc
    bw.write_bit(false); // postprocflag
    bw.write_bits(1280 / 2 - 1, 12);
    bw.write_bits(720 / 2 - 1, 12);
    bw.write_bit(false); // pulldown
    bw.write_bit(false); // interlace
    bw.write_bit(false); // tfcntrflag
    bw.write_bit(false); // finterpflag
    bw.write_bit(true); // reserved
    bw.write_bit(false); // psf
    bw.write_bit(true); // display_ext
    bw.write_bits(1279, 14);
    bw.write_bits(719, 14);
    bw.write_bit(false); // aspect_ratio_flag
    bw.write_bit(true); // framerate_flag
    bw.write_bit(false); // framerateind
    bw.write_bits(2, 8); // 25
    bw.write_bits(1, 4); // 1000
    bw.write_bit(false);
    bw.write_bit(false);
    bw.write_trailing_bits();
    idu(0x0F, &bw.finish())
}

fn vc1_entry_point() -> Vec<u8> {
    idu(0x0E, &[0x48, 0x00, 0x00, 0x80])
}

/// 逐行帧: ptype 110 为 I, 0 为 P
fn vc1_frame(ptype: &str, fill: u8) -> Vec<u8> {
    let mut bw = BitWriter::new();
    for bit in ptype.chars() {
        bw.write_bit(bit == '1');
    }
    bw.write_bits(u32::from(fill), 8);
    bw.write_trailing_bits();
    let mut rbsp = bw.finish();
    rbsp.extend_from_slice(&[fill, 0x00, 0x00, 0x02, fill]);
    idu(0x0D, &rbsp)
}

#[test]
fn test_vc1_extradata_两种形式() {
    let seq = vc1_sequence();
    let ep = vc1_entry_point();
    let frames = [vc1_frame("110", 0x31), vc1_frame("0", 0x32), vc1_frame("0", 0x33)];
    let stream = frames.concat();

    // 第二种形式: 带 1 字节前缀 (如 ASF 中的结构)
    let mut prefixed = vec![0x25];
    prefixed.extend_from_slice(&[seq.clone(), ep.clone()].concat());
    for extradata in [[seq.clone(), ep.clone()].concat(), prefixed] {
        let config = StreamConfig::new(CodecId::Vc1).with_extradata(extradata);
        let mut p = create(&config);
        assert_eq!(
            p.extradata().map(|b| b.to_vec()),
            Some([seq.clone(), ep.clone()].concat())
        );

        let mut out = Vec::new();
        for (i, chunk) in stream.chunks(6).enumerate() {
            let fragment = Fragment::new(chunk.to_vec());
            let fragment = if i == 0 {
                fragment.with_timestamps(0, 0)
            } else {
                fragment
            };
            out.extend(p.push(fragment));
        }
        out.extend(p.finish());

        assert_eq!(picture_types(&out), "IPP");
        assert_eq!(&out[0].data[..], &[seq.clone(), ep.clone(), frames[0].clone()].concat()[..]);
        assert_eq!(&out[2].data[..], &frames[2][..]);
        // 高级档次可能含 B 帧, 非 B 帧的 PTS 无法推导
        let timestamps: Vec<(i64, i64)> = out.iter().map(|au| (au.pts, au.dts)).collect();
        assert_eq!(
            timestamps,
            vec![(0, 0), (NOPTS_VALUE, 40_000), (NOPTS_VALUE, 80_000)]
        );
    }
}

#[test]
fn test_vc1_容器帧率优先() {
    let stream = [
        vc1_sequence(),
        vc1_entry_point(),
        vc1_frame("110", 0x41),
        vc1_frame("0", 0x42),
    ]
    .concat();
    let config = StreamConfig::new(CodecId::Vc1).with_frame_rate(Rational::new(50, 1));
    let mut p = create(&config);
    let mut out = p.push(Fragment::new(stream).with_timestamps(0, 0));
    out.extend(p.finish());
    let dts: Vec<i64> = out.iter().map(|au| au.dts).collect();
    assert_eq!(dts, vec![0, 20_000]);
}

// ============================================================
// Motion JPEG
// ============================================================

fn jpeg(fill: u8) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46];
    data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
    data.extend(std::iter::repeat_n(fill, 40));
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

#[test]
fn test_mjpeg_图像间垃圾与切分() {
    let images = [jpeg(0x10), jpeg(0x20), jpeg(0x30)];
    let mut stream = vec![0x00, 0x12];
    for image in &images {
        stream.extend_from_slice(image);
        stream.extend_from_slice(&[0x00, 0x00, 0x00]);
    }
    let config = StreamConfig::new(CodecId::Mjpeg).with_frame_rate(Rational::new(10, 1));

    for chunk in [stream.len(), 1, 9] {
        let mut p = create(&config);
        let mut out = Vec::new();
        for (i, part) in stream.chunks(chunk).enumerate() {
            let fragment = Fragment::new(part.to_vec());
            let fragment = if i == 0 {
                fragment.with_timestamps(0, 0)
            } else {
                fragment
            };
            out.extend(p.push(fragment));
        }
        out.extend(p.finish());

        assert_eq!(out.len(), 3, "chunk={}", chunk);
        for (au, image) in out.iter().zip(&images) {
            assert_eq!(&au.data[..], &image[..]);
            assert!(au.is_keyframe());
        }
        let pts: Vec<i64> = out.iter().map(|au| au.pts).collect();
        assert_eq!(pts, vec![0, 100_000, 200_000]);
        assert_eq!(p.stats().skipped_bytes, 2);
    }
}
