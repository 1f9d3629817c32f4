//! H.265/HEVC 基本流分包.
//!
//! 与 H.264 相同, 头部语法在移除防竞争字节后的 RBSP 上解析; SEI 负载格式两者一致,
//! 直接复用 [`h264::sei`](crate::parsers::h264::sei).

pub mod nal;
mod packetizer;
pub mod params;

pub use packetizer::{create, HevcParser};
