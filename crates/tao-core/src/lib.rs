//! # tao-core
//!
//! Tao 基本流分包框架的核心库, 提供错误类型、比特流读写、CRC 校验
//! 以及时间戳工具.

pub mod bitreader;
pub mod bitwriter;
pub mod crc;
pub mod error;
pub mod rational;
pub mod timestamp;

// 重导出常用类型
pub use error::{TaoError, TaoResult};
pub use rational::Rational;
pub use timestamp::{NOPTS_VALUE, TICKS_PER_SECOND, TimestampClock};
