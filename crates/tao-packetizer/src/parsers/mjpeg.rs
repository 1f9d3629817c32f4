//! Motion JPEG 分包.
//!
//! 每幅图像以 SOI (`FF D8 FF`) 开始, 以 EOI (`FF D9`) 结束.
//! EXIF 缩略图同样以 SOI 开始, 因此只有在当前图像已出现 EOI 之后的 SOI 才被视为图像边界.

use log::debug;
use tao_core::timestamp::is_valid;
use tao_core::{TaoResult, TimestampClock};

use crate::access_unit::{AccessUnit, AccessUnitFlags};
use crate::bytestream::ByteCursor;
use crate::codec_id::CodecId;
use crate::engine::{FrameBound, Packetize, Packetizer, SyntaxParser, Unit, Verdict};
use crate::stream_config::StreamConfig;

/// SOI 及其后的标记前缀
const SOI: &[u8] = &[0xFF, 0xD8, 0xFF];
/// EOI
const EOI: &[u8] = &[0xFF, 0xD9];

/// Motion JPEG 语法解析器
pub struct MjpegParser {
    /// 帧率时钟, 帧率未知时不插值
    clock: TimestampClock,
    dropped: u64,
}

impl MjpegParser {
    /// 创建解析器
    pub fn new(config: &StreamConfig) -> Self {
        let mut clock = TimestampClock::new(0, 1);
        if let Some(rate) = config.valid_frame_rate() {
            clock.change_rate(rate.num, rate.den);
        }
        Self { clock, dropped: 0 }
    }
}

impl SyntaxParser for MjpegParser {
    fn codec_id(&self) -> CodecId {
        CodecId::Mjpeg
    }

    fn sync_len(&self) -> usize {
        SOI.len()
    }

    fn sync_pattern(&self) -> Option<&[u8]> {
        Some(SOI)
    }

    fn min_unit_size(&self) -> usize {
        SOI.len() + 1
    }

    fn parse_header(&mut self, _cursor: &ByteCursor) -> Verdict<FrameBound> {
        Verdict::Ready(FrameBound::NextSync)
    }

    fn check_boundary(&mut self, cursor: &ByteCursor, offset: usize, at_end: bool) -> Verdict<bool> {
        if at_end {
            return Verdict::Ready(true);
        }
        let ends_before = cursor
            .find_pattern(EOI, SOI.len())
            .is_some_and(|eoi| eoi + EOI.len() <= offset);
        Verdict::Ready(ends_before)
    }

    fn reset(&mut self, _broken: bool) {
        self.clock.reset();
    }

    fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
        let Some(eoi) = unit.data.windows(EOI.len()).rposition(|w| w == EOI) else {
            self.dropped += 1;
            debug!("MJPEG: 图像缺少 EOI, 已丢弃 {} 字节", unit.data.len());
            return None;
        };
        let data = unit.data.slice(..eoi + EOI.len());

        let pts = if is_valid(unit.pts) { unit.pts } else { unit.dts };
        if is_valid(pts) {
            self.clock.set(pts);
        }
        let mut au = AccessUnit::new(data);
        au.pts = self.clock.get();
        au.dts = au.pts;
        au.duration = self.clock.duration_of(1);
        au.flags = AccessUnitFlags::TYPE_I;
        self.clock.increment(1);
        Some(au)
    }

    fn dropped_units(&self) -> u64 {
        self.dropped
    }
}

/// 创建 Motion JPEG 分包器
pub fn create(config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
    Ok(Box::new(Packetizer::new(MjpegParser::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Fragment;
    use tao_core::Rational;

    /// 最小 JPEG 结构: SOI + APP0 [+ 带缩略图的 APP1] + SOS + 扫描数据 + EOI
    fn image(fill: u8, thumbnail: bool) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x06, b'J', b'F', b'I', b'F'];
        if thumbnail {
            let thumb = [0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x03, 0x11, 0xFF, 0xD9];
            let len = (2 + 6 + thumb.len()) as u16;
            data.extend_from_slice(&[0xFF, 0xE1]);
            data.extend_from_slice(&len.to_be_bytes());
            data.extend_from_slice(b"Exif\0\0");
            data.extend_from_slice(&thumb);
        }
        data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);
        data.extend(std::iter::repeat_n(fill, 64));
        data.extend_from_slice(EOI);
        data
    }

    fn packetizer(frame_rate: Option<Rational>) -> Packetizer<MjpegParser> {
        let mut config = StreamConfig::new(CodecId::Mjpeg);
        if let Some(rate) = frame_rate {
            config = config.with_frame_rate(rate);
        }
        Packetizer::new(MjpegParser::new(&config))
    }

    #[test]
    fn test_缩略图不切分图像() {
        let first = image(0x11, true);
        let second = image(0x22, false);
        let mut stream = first.clone();
        stream.extend_from_slice(&[0x00, 0x00]);
        stream.extend_from_slice(&second);

        for chunk in [stream.len(), 1, 7] {
            let mut p = packetizer(None);
            let mut out = Vec::new();
            for part in stream.chunks(chunk) {
                out.extend(p.push(Fragment::new(part.to_vec())));
            }
            out.extend(p.finish());
            assert_eq!(out.len(), 2, "chunk={}", chunk);
            assert_eq!(&out[0].data[..], &first[..]);
            assert_eq!(&out[1].data[..], &second[..]);
            assert!(out.iter().all(AccessUnit::is_keyframe));
        }
    }

    #[test]
    fn test_缺少_eoi_的图像被丢弃() {
        let mut truncated = image(0x11, false);
        truncated.truncate(truncated.len() - 2);
        let mut stream = image(0x33, false);
        stream.extend_from_slice(&truncated);

        let mut p = packetizer(None);
        let mut out = p.push(Fragment::new(stream));
        out.extend(p.finish());
        assert_eq!(out.len(), 1);
        assert_eq!(p.stats().dropped_units, 1);
    }

    #[test]
    fn test_帧率插值时间戳() {
        let mut p = packetizer(Some(Rational::new(25, 1)));
        let mut out = p.push(Fragment::new(image(0x11, false)).with_timestamps(0, 0));
        out.extend(p.push(Fragment::new(image(0x22, false))));
        out.extend(p.push(Fragment::new(image(0x33, false))));
        out.extend(p.finish());
        let pts: Vec<i64> = out.iter().map(|au| au.pts).collect();
        assert_eq!(pts, vec![0, 40_000, 80_000]);
        assert_eq!(out[0].duration, 40_000);
    }
}
