//! # tao-packetizer
//!
//! Tao 基本流分包器库.
//!
//! 将解复用器产出的任意切分的基本流片段重新同步, 组装为完整的访问单元,
//! 并补齐时间戳、帧类型与解码器所需的配置数据.
//!
//! ## 支持的编码
//!
//! - **视频**: H.264 (Annex-B / avcC), H.265 (Annex-B / hvcC), MPEG-1/2 Video, VC-1, Motion JPEG
//! - **音频**: MPEG Audio Layer I/II/III, AAC (ADTS / LATM / 原始), MLP/TrueHD, FLAC
//!
//! ## 使用示例
//!
//! ```rust
//! use tao_packetizer::{CodecId, Fragment, PacketizerRegistry, StreamConfig};
//!
//! let mut reg = PacketizerRegistry::new();
//! tao_packetizer::register_all(&mut reg);
//!
//! let mut packetizer = reg.create(&StreamConfig::new(CodecId::Mp3)).unwrap();
//! let mut units = packetizer.push(Fragment::new(vec![0u8; 16]));
//! units.extend(packetizer.finish());
//! assert!(units.is_empty());
//! ```

pub mod access_unit;
pub mod bytestream;
pub mod cc;
pub mod codec_id;
pub mod engine;
pub mod fragment;
pub mod parsers;
pub mod registry;
pub mod stream_config;

// 重导出常用类型
pub use access_unit::{AccessUnit, AccessUnitFlags};
pub use bytestream::ByteCursor;
pub use cc::{CcData, CcExtractor, CcPayloadType};
pub use codec_id::CodecId;
pub use engine::{
    FrameBound, Packetize, Packetizer, PacketizerStats, SyntaxParser, Unit, Verdict,
};
pub use fragment::{Fragment, FragmentFlags};
pub use registry::{PacketizerFactory, PacketizerRegistry};
pub use stream_config::StreamConfig;

use parsers::{flac, h264, hevc, mjpeg, mlp, mpeg4_audio, mpeg_audio, mpeg_video, vc1};

/// 注册所有内置分包器
pub fn register_all(registry: &mut PacketizerRegistry) {
    registry.register(CodecId::H264, "h264", h264::create);
    registry.register(CodecId::Hevc, "hevc", hevc::create);
    registry.register(CodecId::Mpeg1Video, "mpegvideo", mpeg_video::create);
    registry.register(CodecId::Mpeg2Video, "mpegvideo", mpeg_video::create);
    registry.register(CodecId::Vc1, "vc1", vc1::create);
    registry.register(CodecId::Mjpeg, "mjpeg", mjpeg::create);
    registry.register(CodecId::Mp1, "mpegaudio", mpeg_audio::create);
    registry.register(CodecId::Mp2, "mpegaudio", mpeg_audio::create);
    registry.register(CodecId::Mp3, "mpegaudio", mpeg_audio::create);
    registry.register(CodecId::Aac, "mpeg4audio", mpeg4_audio::create);
    registry.register(CodecId::AacLatm, "mpeg4audio", mpeg4_audio::create);
    registry.register(CodecId::Mlp, "mlp", mlp::create);
    registry.register(CodecId::TrueHd, "mlp", mlp::create);
    registry.register(CodecId::Flac, "flac", flac::create);
}
