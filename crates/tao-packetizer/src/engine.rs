//! 通用分包引擎.
//!
//! 引擎拥有一个 [`ByteCursor`], 以状态机驱动可插拔的 [`SyntaxParser`]:
//!
//! ```text
//! NoSync -> Sync -> Header -> NextSync -> GetData -> SendData -> NoSync
//! ```
//!
//! - `NoSync`: 查找起始码 (固定字节或自定义匹配), 丢弃之前的字节.
//! - `Sync`: 确认当前位置确为同步点.
//! - `Header`: 由解析器解析定长头部, 得到单元长度或 "以下一个同步点为界".
//! - `NextSync`: 校验下一帧头 (定长单元) 或查找下一个同步点 (变长单元).
//! - `GetData`/`SendData`: 取出单元字节交给解析器, 组装完成的访问单元经校验后输出.
//!
//! 任何候选单元被拒绝时只前进 1 字节后重新同步, 从不致命.

use bytes::{Bytes, BytesMut};
use log::debug;

use crate::access_unit::{AccessUnit, AccessUnitFlags};
use crate::bytestream::ByteCursor;
use crate::codec_id::CodecId;
use crate::fragment::{Fragment, FragmentFlags};

/// 解析器对当前输入的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict<T> {
    /// 判定完成
    Ready(T),
    /// 数据不足, 等待更多输入
    NeedMoreData,
    /// 当前同步点是伪同步, 前进 1 字节重试
    Reject,
}

/// 单元长度的确定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    /// 头部直接给出单元长度
    Exact(usize),
    /// 以下一个同步点为界
    NextSync,
}

/// 交给解析器的一个已定界单元
#[derive(Debug, Clone)]
pub struct Unit {
    /// 单元字节 (含 [`SyntaxParser::unit_prefix`] 前缀)
    pub data: Bytes,
    /// 单元首字节所在片段的 PTS (每个片段只被取用一次)
    pub pts: i64,
    /// 单元首字节所在片段的 DTS
    pub dts: i64,
}

/// 编码相关的语法解析器
///
/// 每种编码实现头部语法、边界检测规则与时间戳推导.
/// 所有方法都不允许致命失败: 语法错误一律通过 [`Verdict::Reject`] 或返回 `None` 表达.
pub trait SyntaxParser {
    /// 编码标识
    fn codec_id(&self) -> CodecId;

    /// 同步字长度 (字节)
    fn sync_len(&self) -> usize;

    /// 固定的同步字节序列, `None` 表示使用 [`SyntaxParser::is_sync`] 自定义匹配
    fn sync_pattern(&self) -> Option<&[u8]> {
        None
    }

    /// 判断以 `window` (长度为 `sync_len`) 开头的位置是否为同步点
    fn is_sync(&self, window: &[u8]) -> bool {
        self.sync_pattern()
            .is_some_and(|pattern| window.starts_with(pattern))
    }

    /// 输出单元前插入的字节 (如把 3 字节起始码补为 4 字节)
    fn unit_prefix(&self) -> &[u8] {
        &[]
    }

    /// 单元的最小长度, 查找下一个同步点时从该偏移开始
    fn min_unit_size(&self) -> usize {
        self.sync_len()
    }

    /// 解析当前同步点处的头部
    fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound>;

    /// 变长单元的最大长度, 超过仍未找到边界时当前同步点被拒绝
    fn max_unit_size(&self) -> Option<usize> {
        None
    }

    /// 定长单元: 校验 `size` 处的下一帧头 (双同步检查)
    ///
    /// `at_end` 表示缓冲数据之后不会再有数据.
    fn check_next(&mut self, _cursor: &ByteCursor, _size: usize, _at_end: bool) -> Verdict<()> {
        Verdict::Ready(())
    }

    /// 变长单元: 判断 `offset` 处找到的同步点能否作为当前单元的结尾
    ///
    /// 返回 `Ready(false)` 继续向后查找; `at_end` 为 true 时 `offset` 为缓冲数据末尾.
    fn check_boundary(&mut self, _cursor: &ByteCursor, _offset: usize, _at_end: bool) -> Verdict<bool> {
        Verdict::Ready(true)
    }

    /// 重置解析上下文, 丢弃进行中的访问单元
    ///
    /// 长期配置 (参数集, STREAMINFO 等) 始终保留; `broken` 为 true 表示输入已损坏,
    /// 解析器需要重新等待可独立解码的单元 (如关键帧).
    fn reset(&mut self, broken: bool);

    /// 处理一个单元, 可能输出一个完整的访问单元
    fn parse(&mut self, unit: Unit) -> Option<AccessUnit>;

    /// 输出前的最终校验, 返回 false 时访问单元被丢弃
    fn validate(&mut self, _au: &mut AccessUnit) -> bool {
        true
    }

    /// 输出进行中的访问单元 (流结束或调用方声明访问单元结束)
    fn drain(&mut self) -> Option<AccessUnit> {
        None
    }

    /// 输入片段的格式转换 (如长度前缀转 Annex-B), 返回 `None` 丢弃片段
    fn prepare(&mut self, fragment: Fragment) -> Option<Fragment> {
        Some(fragment)
    }

    /// 为 true 时片段不经同步直接作为单元交给 [`SyntaxParser::parse`]
    fn passthrough(&self) -> bool {
        false
    }

    /// 供解码器使用的配置数据
    fn extradata(&self) -> Option<Bytes> {
        None
    }

    /// 解析器内部因缺少配置等原因丢弃的单元数
    fn dropped_units(&self) -> u64 {
        0
    }
}

/// 分包统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketizerStats {
    /// 输出的访问单元数
    pub emitted: u64,
    /// 被拒绝的候选同步点数 (伪同步)
    pub rejected: u64,
    /// 重新同步时丢弃的字节数
    pub skipped_bytes: u64,
    /// 被丢弃的访问单元数 (校验失败, 缺少配置, 损坏)
    pub dropped_units: u64,
    /// 被丢弃的输入片段数
    pub dropped_fragments: u64,
}

/// 与具体解析器无关的分包接口
pub trait Packetize: Send {
    /// 编码标识
    fn codec_id(&self) -> CodecId;
    /// 推入一个片段, 返回期间完成的访问单元
    fn push(&mut self, fragment: Fragment) -> Vec<AccessUnit>;
    /// 流结束, 输出所有剩余访问单元
    fn finish(&mut self) -> Vec<AccessUnit>;
    /// 丢弃缓冲数据与进行中的访问单元
    fn flush(&mut self);
    /// 供解码器使用的配置数据
    fn extradata(&self) -> Option<Bytes>;
    /// 统计信息
    fn stats(&self) -> PacketizerStats;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    NoSync,
    Sync,
    Header,
    NextSync,
    GetData,
    SendData,
}

/// 通用分包器
pub struct Packetizer<P: SyntaxParser> {
    parser: P,
    cursor: ByteCursor,
    state: State,
    bound: FrameBound,
    /// 当前单元长度 (不含前缀)
    unit_len: usize,
    /// 查找下一个同步点的起始偏移
    search_offset: usize,
    pending: Option<Unit>,
    /// 下一个输出的访问单元需要标记不连续
    discontinuity: bool,
    stats: PacketizerStats,
}

impl<P: SyntaxParser> Packetizer<P> {
    /// 以解析器创建分包器
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            cursor: ByteCursor::new(),
            state: State::NoSync,
            bound: FrameBound::NextSync,
            unit_len: 0,
            search_offset: 0,
            pending: None,
            discontinuity: false,
            stats: PacketizerStats::default(),
        }
    }

    /// 解析器引用
    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// 解析器可变引用
    pub fn parser_mut(&mut self) -> &mut P {
        &mut self.parser
    }

    /// 预先送入配置数据 (如 Annex-B 形式的 SPS/PPS), 产生的输出被丢弃
    pub fn feed_header(&mut self, header: &[u8]) {
        if header.is_empty() {
            return;
        }
        let saved = self.stats;
        let mut discard = Vec::new();
        self.cursor.push(Fragment::new(Bytes::copy_from_slice(header)));
        self.process(true, &mut discard);
        if let Some(au) = self.parser.drain() {
            discard.push(au);
        }
        self.reset_engine();
        self.stats = saved;
        debug!(
            "{}: 配置数据已预处理, {} 字节, 丢弃 {} 个访问单元",
            self.parser.codec_id(),
            header.len(),
            discard.len()
        );
    }

    /// 推入一个片段
    pub fn push(&mut self, fragment: Fragment) -> Vec<AccessUnit> {
        let mut out = Vec::new();

        if fragment.flags.contains(FragmentFlags::CORRUPTED) {
            let mut discard = Vec::new();
            let emitted = self.stats.emitted;
            self.drain_into(&mut discard);
            self.stats.emitted = emitted;
            self.stats.dropped_units += discard.len() as u64;
            self.stats.dropped_fragments += 1;
            self.reset_engine();
            self.parser.reset(true);
            self.discontinuity = true;
            debug!(
                "{}: 收到损坏片段, 丢弃 {} 个进行中的访问单元",
                self.parser.codec_id(),
                discard.len()
            );
            return out;
        }

        if fragment.flags.contains(FragmentFlags::DISCONTINUITY) {
            self.drain_into(&mut out);
            self.reset_engine();
            self.parser.reset(false);
            self.discontinuity = true;
        }

        let Some(fragment) = self.parser.prepare(fragment) else {
            self.stats.dropped_fragments += 1;
            return out;
        };
        let flags = fragment.flags;

        if self.parser.passthrough() {
            let unit = Unit {
                pts: fragment.pts,
                dts: fragment.dts,
                data: fragment.data,
            };
            if let Some(au) = self.parser.parse(unit) {
                self.emit(au, &mut out);
            }
        } else {
            self.cursor.push(fragment);
            self.process(false, &mut out);
            if flags.intersects(FragmentFlags::AU_END | FragmentFlags::END_OF_SEQUENCE) {
                if let Some(au) = self.parser.drain() {
                    self.emit(au, &mut out);
                }
            }
        }

        if flags.contains(FragmentFlags::END_OF_SEQUENCE) {
            if let Some(last) = out.last_mut() {
                last.flags |= AccessUnitFlags::END_OF_SEQUENCE;
            }
        }
        out
    }

    /// 流结束: 以剩余数据为界输出所有访问单元
    pub fn finish(&mut self) -> Vec<AccessUnit> {
        let mut out = Vec::new();
        self.drain_into(&mut out);
        self.reset_engine();
        out
    }

    /// 丢弃缓冲数据与进行中的访问单元, 保留长期配置
    pub fn flush(&mut self) {
        self.reset_engine();
        self.parser.reset(false);
    }

    /// 统计信息
    pub fn stats(&self) -> PacketizerStats {
        PacketizerStats {
            dropped_units: self.stats.dropped_units + self.parser.dropped_units(),
            ..self.stats
        }
    }

    fn drain_into(&mut self, out: &mut Vec<AccessUnit>) {
        self.process(true, out);
        if let Some(au) = self.parser.drain() {
            self.emit(au, out);
        }
    }

    fn reset_engine(&mut self) {
        self.cursor.clear();
        self.state = State::NoSync;
        self.unit_len = 0;
        self.search_offset = 0;
        self.pending = None;
    }

    fn emit(&mut self, mut au: AccessUnit, out: &mut Vec<AccessUnit>) {
        if !self.parser.validate(&mut au) {
            self.stats.dropped_units += 1;
            return;
        }
        if self.discontinuity {
            au.flags |= AccessUnitFlags::DISCONTINUITY;
            self.discontinuity = false;
        }
        self.stats.emitted += 1;
        out.push(au);
    }

    /// 当前同步点为伪同步: 前进 1 字节重新同步
    fn reject(&mut self) {
        self.cursor.skip(1);
        self.stats.rejected += 1;
        self.stats.skipped_bytes += 1;
        self.state = State::NoSync;
    }

    fn find_sync(&self, from: usize) -> Option<usize> {
        match self.parser.sync_pattern() {
            Some(pattern) => self.cursor.find_pattern(pattern, from),
            None => {
                let parser = &self.parser;
                self.cursor
                    .find_with(from, parser.sync_len(), |window| parser.is_sync(window))
            }
        }
    }

    /// 状态机主循环, 直到需要更多输入
    fn process(&mut self, draining: bool, out: &mut Vec<AccessUnit>) {
        loop {
            let at_end = draining || self.cursor.au_end_pending();
            match self.state {
                State::NoSync => match self.find_sync(0) {
                    Some(offset) => {
                        self.cursor.skip(offset);
                        self.stats.skipped_bytes += offset as u64;
                        self.state = State::Sync;
                    }
                    None => {
                        let keep = if at_end {
                            0
                        } else {
                            self.parser.sync_len().saturating_sub(1)
                        };
                        let dropped = self.cursor.len().saturating_sub(keep);
                        self.cursor.skip(dropped);
                        self.stats.skipped_bytes += dropped as u64;
                        return;
                    }
                },
                State::Sync => {
                    let mut window = [0u8; 16];
                    let len = self.parser.sync_len().clamp(1, 16);
                    if !self.cursor.peek_at(0, &mut window[..len]) {
                        if at_end {
                            let dropped = self.cursor.len();
                            self.cursor.skip(dropped);
                            self.stats.skipped_bytes += dropped as u64;
                        }
                        return;
                    }
                    if self.parser.is_sync(&window[..len]) {
                        self.state = State::Header;
                    } else {
                        self.reject();
                    }
                }
                State::Header => match self.parser.parse_header(&self.cursor) {
                    Verdict::Ready(FrameBound::Exact(size)) if size > 0 => {
                        self.bound = FrameBound::Exact(size);
                        self.unit_len = size;
                        self.state = State::NextSync;
                    }
                    Verdict::Ready(FrameBound::Exact(_)) => self.reject(),
                    Verdict::Ready(FrameBound::NextSync) => {
                        self.bound = FrameBound::NextSync;
                        self.search_offset = self.parser.min_unit_size().max(1);
                        self.state = State::NextSync;
                    }
                    Verdict::NeedMoreData if !at_end => return,
                    Verdict::NeedMoreData | Verdict::Reject => self.reject(),
                },
                State::NextSync => {
                    if !self.bound_current_unit(at_end) {
                        return;
                    }
                }
                State::GetData => {
                    let (pts, dts) = self.cursor.take_timestamps();
                    let prefix = self.parser.unit_prefix();
                    let data = if prefix.is_empty() {
                        self.cursor.read_bytes(self.unit_len)
                    } else {
                        let mut buf = BytesMut::with_capacity(prefix.len() + self.unit_len);
                        buf.extend_from_slice(prefix);
                        self.cursor
                            .read_into(&mut buf, self.unit_len)
                            .then(|| buf.freeze())
                    };
                    match data {
                        Some(data) => {
                            self.pending = Some(Unit { data, pts, dts });
                            self.state = State::SendData;
                        }
                        None => self.reject(),
                    }
                }
                State::SendData => {
                    self.state = State::NoSync;
                    if let Some(unit) = self.pending.take() {
                        if let Some(au) = self.parser.parse(unit) {
                            self.emit(au, out);
                        }
                    }
                }
            }
        }
    }

    /// NextSync 状态: 确定当前单元的长度
    ///
    /// 返回 false 表示需要更多输入.
    fn bound_current_unit(&mut self, at_end: bool) -> bool {
        if let FrameBound::Exact(size) = self.bound {
            if self.cursor.len() < size {
                if at_end {
                    self.reject();
                    return true;
                }
                return false;
            }
            match self.parser.check_next(&self.cursor, size, at_end) {
                Verdict::Ready(()) => self.state = State::GetData,
                Verdict::NeedMoreData if !at_end => return false,
                Verdict::NeedMoreData | Verdict::Reject => self.reject(),
            }
            return true;
        }

        loop {
            match self.find_sync(self.search_offset) {
                Some(offset) => match self.parser.check_boundary(&self.cursor, offset, false) {
                    Verdict::Ready(true) => {
                        self.unit_len = offset;
                        self.state = State::GetData;
                        return true;
                    }
                    Verdict::Ready(false) => self.search_offset = offset + 1,
                    Verdict::NeedMoreData if !at_end => {
                        self.search_offset = offset;
                        return false;
                    }
                    Verdict::NeedMoreData => self.search_offset = offset + 1,
                    Verdict::Reject => {
                        self.reject();
                        return true;
                    }
                },
                None if at_end => {
                    let len = self.cursor.len();
                    match self.parser.check_boundary(&self.cursor, len, true) {
                        Verdict::Ready(true) if len > 0 => {
                            self.unit_len = len;
                            self.state = State::GetData;
                        }
                        _ => self.reject(),
                    }
                    return true;
                }
                None => {
                    if let Some(max) = self.parser.max_unit_size() {
                        if self.cursor.len() > max + self.parser.sync_len() {
                            self.reject();
                            return true;
                        }
                    }
                    let window = self.parser.sync_len().saturating_sub(1);
                    let resume = self.cursor.len().saturating_sub(window);
                    self.search_offset = self.search_offset.max(resume);
                    return false;
                }
            }
        }
    }
}

impl<P: SyntaxParser + Send> Packetize for Packetizer<P> {
    fn codec_id(&self) -> CodecId {
        self.parser.codec_id()
    }

    fn push(&mut self, fragment: Fragment) -> Vec<AccessUnit> {
        Packetizer::push(self, fragment)
    }

    fn finish(&mut self) -> Vec<AccessUnit> {
        Packetizer::finish(self)
    }

    fn flush(&mut self) {
        Packetizer::flush(self)
    }

    fn extradata(&self) -> Option<Bytes> {
        self.parser.extradata()
    }

    fn stats(&self) -> PacketizerStats {
        Packetizer::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tao_core::NOPTS_VALUE;

    /// 测试用语法: `AA LL <LL 字节负载>`, 负载首字节为 0xEE 时视为伪同步
    struct TlvParser {
        resets: Vec<bool>,
    }

    impl SyntaxParser for TlvParser {
        fn codec_id(&self) -> CodecId {
            CodecId::Mp2
        }

        fn sync_len(&self) -> usize {
            1
        }

        fn sync_pattern(&self) -> Option<&[u8]> {
            Some(&[0xAA][..])
        }

        fn parse_header(&mut self, cursor: &ByteCursor) -> Verdict<FrameBound> {
            let mut header = [0u8; 3];
            if !cursor.peek_at(0, &mut header) {
                return Verdict::NeedMoreData;
            }
            if header[2] == 0xEE || header[1] == 0 {
                return Verdict::Reject;
            }
            Verdict::Ready(FrameBound::Exact(2 + usize::from(header[1])))
        }

        fn reset(&mut self, broken: bool) {
            self.resets.push(broken);
        }

        fn parse(&mut self, unit: Unit) -> Option<AccessUnit> {
            let mut au = AccessUnit::new(unit.data.slice(2..));
            au.pts = unit.pts;
            au.dts = unit.dts;
            Some(au)
        }
    }

    fn packetizer() -> Packetizer<TlvParser> {
        Packetizer::new(TlvParser { resets: Vec::new() })
    }

    fn payloads(aus: &[AccessUnit]) -> Vec<Vec<u8>> {
        aus.iter().map(|au| au.data.to_vec()).collect()
    }

    #[test]
    fn test_定长单元与垃圾字节() {
        let mut p = packetizer();
        let out = p.push(Fragment::new(vec![0x01, 0x02, 0xAA, 0x02, 0x10, 0x11, 0xAA, 0x01]));
        assert_eq!(payloads(&out), vec![vec![0x10, 0x11]]);
        let out = p.push(Fragment::new(vec![0x20]));
        assert_eq!(payloads(&out), vec![vec![0x20]]);
        assert_eq!(p.stats().skipped_bytes, 2);
        assert_eq!(p.stats().emitted, 2);
    }

    #[test]
    fn test_伪同步前进一字节() {
        let mut p = packetizer();
        // 第一个 AA 的负载以 EE 开头 -> 拒绝, 从下一字节开始重新同步
        let out = p.push(Fragment::new(vec![0xAA, 0x01, 0xEE, 0xAA, 0x01, 0x44]));
        assert_eq!(payloads(&out), vec![vec![0x44]]);
        assert_eq!(p.stats().rejected, 1);
        assert_eq!(p.stats().skipped_bytes, 3);
    }

    #[test]
    fn test_时间戳归属首个单元() {
        let mut p = packetizer();
        let out = p.push(
            Fragment::new(vec![0xAA, 0x01, 0x01, 0xAA, 0x01, 0x02]).with_timestamps(100, 90),
        );
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].pts, out[0].dts), (100, 90));
        assert_eq!((out[1].pts, out[1].dts), (NOPTS_VALUE, NOPTS_VALUE));
    }

    #[test]
    fn test_损坏片段重置并标记不连续() {
        let mut p = packetizer();
        assert!(p.push(Fragment::new(vec![0xAA, 0x03, 0x01])).is_empty());
        let out = p.push(Fragment::new(vec![0xAA, 0x01, 0x05]).with_flags(FragmentFlags::CORRUPTED));
        assert!(out.is_empty());
        assert_eq!(p.parser().resets, vec![true]);
        assert_eq!(p.stats().dropped_fragments, 1);
        let out = p.push(Fragment::new(vec![0xAA, 0x01, 0x07]));
        assert_eq!(payloads(&out), vec![vec![0x07]]);
        assert!(out[0].flags.contains(AccessUnitFlags::DISCONTINUITY));
    }

    #[test]
    fn test_结束时丢弃不完整单元() {
        let mut p = packetizer();
        assert!(p.push(Fragment::new(vec![0xAA, 0x05, 0x01, 0x02])).is_empty());
        assert!(p.finish().is_empty());
        assert_eq!(p.stats().rejected, 1);
    }
}
