//! 各编码的语法解析器.
//!
//! 每个子模块提供一个实现 [`SyntaxParser`](crate::engine::SyntaxParser) 的解析器,
//! 以及按 [`StreamConfig`](crate::stream_config::StreamConfig) 构造分包器的 `create` 工厂函数.

pub mod annexb;
pub mod flac;
pub mod h264;
pub mod hevc;
pub mod mjpeg;
pub mod mlp;
pub mod mpeg4_audio;
pub mod mpeg_audio;
pub mod mpeg_video;
pub mod vc1;
