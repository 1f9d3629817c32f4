//! 统一错误类型定义.
//!
//! 所有 Tao crate 共用的错误类型. 分包层内部的绝大多数错误都会被降级为
//! "丢弃并重新同步", 只有配置与 I/O 类错误会真正返回给调用方.

use thiserror::Error;

/// Tao 框架统一错误类型
#[derive(Debug, Error)]
pub enum TaoError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的码流特性
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 位读取越界
    #[error("已到达数据末尾")]
    Eof,

    /// 未找到指定的分包器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),

    /// 无效数据 (损坏的码流, 语法越界等)
    #[error("无效数据: {0}")]
    InvalidData(String),
}

/// Tao 框架统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;
