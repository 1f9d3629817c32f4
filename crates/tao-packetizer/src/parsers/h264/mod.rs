//! H.264/AVC 基本流分包.
//!
//! 头部语法 (SPS, PPS, slice 头部, SEI) 均在移除防竞争字节后的 RBSP 上解析,
//! 只读取划分访问单元与推导时间戳所需的字段.

pub mod nal;
mod packetizer;
pub mod pps;
pub mod sei;
pub mod slice;
pub mod sps;

pub use packetizer::{create, H264Parser};
