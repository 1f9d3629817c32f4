//! 输出结构与文本格式化.

use serde::Serialize;
use tao_core::timestamp::is_valid;
use tao_packetizer::{AccessUnit, AccessUnitFlags, PacketizerStats};

/// 单个访问单元的信息
#[derive(Debug, Serialize)]
pub struct UnitInfo {
    pub index: u64,
    pub size: usize,
    /// 微秒, 缺失时为 null
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub picture_type: Option<char>,
    pub flags: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captions: Option<usize>,
}

impl UnitInfo {
    pub fn new(index: u64, au: &AccessUnit) -> Self {
        let picture_type = match au.picture_type() {
            '?' => None,
            c => Some(c),
        };
        Self {
            index,
            size: au.len(),
            pts: is_valid(au.pts).then_some(au.pts),
            dts: is_valid(au.dts).then_some(au.dts),
            duration: au.duration,
            picture_type,
            flags: flag_names(au.flags),
            captions: au.captions.as_ref().map(|cc| cc.count()),
        }
    }

    /// 单行文本表示
    pub fn to_line(&self) -> String {
        let ts = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
        let mut line = format!(
            "#{:<6} size={:<7} pts={:<12} dts={:<12} dur={:<8} type={}",
            self.index,
            self.size,
            ts(self.pts),
            ts(self.dts),
            self.duration,
            self.picture_type.unwrap_or('-'),
        );
        if !self.flags.is_empty() {
            line.push_str(&format!(" [{}]", self.flags.join(",")));
        }
        if let Some(count) = self.captions {
            line.push_str(&format!(" cc={}", count));
        }
        line
    }
}

/// 全部输出
#[derive(Debug, Serialize)]
pub struct Report {
    pub codec: String,
    pub input_bytes: u64,
    pub units: Vec<UnitInfo>,
    pub stats: StatsInfo,
}

/// 分包统计
#[derive(Debug, Serialize)]
pub struct StatsInfo {
    pub emitted: u64,
    pub rejected: u64,
    pub skipped_bytes: u64,
    pub dropped_units: u64,
    pub dropped_fragments: u64,
}

impl From<PacketizerStats> for StatsInfo {
    fn from(stats: PacketizerStats) -> Self {
        Self {
            emitted: stats.emitted,
            rejected: stats.rejected,
            skipped_bytes: stats.skipped_bytes,
            dropped_units: stats.dropped_units,
            dropped_fragments: stats.dropped_fragments,
        }
    }
}

fn flag_names(flags: AccessUnitFlags) -> Vec<&'static str> {
    const NAMES: [(AccessUnitFlags, &str); 6] = [
        (AccessUnitFlags::END_OF_SEQUENCE, "eos"),
        (AccessUnitFlags::DISCONTINUITY, "discont"),
        (AccessUnitFlags::PREROLL, "preroll"),
        (AccessUnitFlags::TOP_FIELD_FIRST, "tff"),
        (AccessUnitFlags::BOTTOM_FIELD_FIRST, "bff"),
        (AccessUnitFlags::SINGLE_FIELD, "field"),
    ];
    NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|&(_, name)| name)
        .collect()
}
