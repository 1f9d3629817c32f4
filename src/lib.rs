//! # Tao ES
//!
//! 纯 Rust 实现的基本流分包框架.
//!
//! 解复用器产出的基本流片段可以在任意字节处被切开, 也可能损坏或缺少时间戳.
//! 分包器负责重新同步, 组装完整的访问单元, 并补齐解码器需要的时间戳、帧类型与配置数据.
//!
//! # 快速开始
//!
//! ```rust
//! use tao_es::packetizer::{CodecId, Fragment, StreamConfig};
//!
//! let registry = tao_es::default_packetizer_registry();
//! let mut packetizer = registry.create(&StreamConfig::new(CodecId::Mp2)).unwrap();
//!
//! // 两个 MPEG-1 Layer II 帧 (48kHz, 192kbps, 每帧 576 字节), 以任意大小切分送入
//! let mut stream = Vec::new();
//! for _ in 0..2 {
//!     let mut frame = vec![0xFF, 0xFD, 0xA4, 0x00];
//!     frame.resize(576, 0x55);
//!     stream.extend_from_slice(&frame);
//! }
//! let mut units = Vec::new();
//! for chunk in stream.chunks(100) {
//!     units.extend(packetizer.push(Fragment::new(chunk.to_vec())));
//! }
//! units.extend(packetizer.finish());
//! assert_eq!(units.len(), 2);
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 位读写, CRC, 有理数, 时间戳与错误类型 |
//! | `tao-packetizer` | 字节游标, 通用分包引擎与各编码的语法解析器 |

/// 核心类型与工具
pub use tao_core as core;

/// 基本流分包器
pub use tao_packetizer as packetizer;

pub mod logging;

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置分包器的注册表
pub fn default_packetizer_registry() -> tao_packetizer::PacketizerRegistry {
    let mut registry = tao_packetizer::PacketizerRegistry::new();
    tao_packetizer::register_all(&mut registry);
    registry
}
