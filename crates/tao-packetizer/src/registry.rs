//! 分包器注册表.
//!
//! 按 [`CodecId`] 查找并实例化分包器, 调用方无需了解具体解析器类型.

use std::collections::HashMap;

use tao_core::{TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::engine::Packetize;
use crate::stream_config::StreamConfig;

/// 分包器工厂函数类型
pub type PacketizerFactory = fn(&StreamConfig) -> TaoResult<Box<dyn Packetize>>;

/// 分包器注册条目
struct PacketizerEntry {
    /// 分包器名称
    name: String,
    /// 工厂函数
    factory: PacketizerFactory,
}

/// 分包器注册表
///
/// 同一编码可注册多个分包器, 创建时使用最先注册的一个.
pub struct PacketizerRegistry {
    packetizers: HashMap<CodecId, Vec<PacketizerEntry>>,
}

impl PacketizerRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            packetizers: HashMap::new(),
        }
    }

    /// 注册一个分包器
    pub fn register(&mut self, codec_id: CodecId, name: impl Into<String>, factory: PacketizerFactory) {
        self.packetizers
            .entry(codec_id)
            .or_default()
            .push(PacketizerEntry {
                name: name.into(),
                factory,
            });
    }

    /// 按流配置中的编码创建分包器实例
    pub fn create(&self, config: &StreamConfig) -> TaoResult<Box<dyn Packetize>> {
        let entry = self
            .packetizers
            .get(&config.codec_id)
            .and_then(|entries| entries.first())
            .ok_or_else(|| {
                TaoError::CodecNotFound(format!("未找到 {} 的分包器", config.codec_id))
            })?;
        (entry.factory)(config)
    }

    /// 是否已注册指定编码
    pub fn contains(&self, codec_id: CodecId) -> bool {
        self.packetizers.contains_key(&codec_id)
    }

    /// 获取所有已注册的分包器名称, 按 [`CodecId::ALL`] 顺序排列
    pub fn list(&self) -> Vec<(CodecId, &str)> {
        let mut result = Vec::new();
        for id in CodecId::ALL {
            if let Some(entries) = self.packetizers.get(&id) {
                for entry in entries {
                    result.push((id, entry.name.as_str()));
                }
            }
        }
        result
    }
}

impl Default for PacketizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
