//! 字节游标 (ByteCursor).
//!
//! 在一组按顺序排列、尚未消费的输入片段之上提供非拷贝视图:
//! 跨片段边界的窥视、跳过与模式查找都不会把整个流拼接成连续内存.
//!
//! 位置分为两种:
//! - 绝对位置: 自游标创建 (或 [`ByteCursor::clear`]) 以来推入的总字节序号, 单调不减.
//! - 相对偏移: 相对当前读取位置的偏移, 所有查询接口都使用相对偏移.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use memchr::memmem;
use tao_core::NOPTS_VALUE;

use crate::fragment::{Fragment, FragmentFlags};

/// 一个已推入的片段
#[derive(Debug)]
struct Segment {
    data: Bytes,
    /// 首字节的绝对位置
    start: u64,
    pts: i64,
    dts: i64,
    flags: FragmentFlags,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }
}

/// 跨片段的字节游标
#[derive(Debug, Default)]
pub struct ByteCursor {
    segments: VecDeque<Segment>,
    /// 当前读取位置 (绝对)
    position: u64,
    /// 已推入数据的末尾 (绝对)
    end: u64,
}

impl ByteCursor {
    /// 创建空游标
    pub fn new() -> Self {
        Self::default()
    }

    /// 推入一个片段, 空片段被忽略
    pub fn push(&mut self, fragment: Fragment) {
        if fragment.data.is_empty() {
            return;
        }
        let len = fragment.data.len() as u64;
        self.segments.push_back(Segment {
            data: fragment.data,
            start: self.end,
            pts: fragment.pts,
            dts: fragment.dts,
            flags: fragment.flags,
        });
        self.end += len;
    }

    /// 可读字节数
    pub fn len(&self) -> usize {
        (self.end - self.position) as usize
    }

    /// 是否无可读数据
    pub fn is_empty(&self) -> bool {
        self.end == self.position
    }

    /// 当前读取位置 (绝对)
    pub fn position(&self) -> u64 {
        self.position
    }

    /// 已缓冲数据中最后一个片段声明了访问单元结束
    pub fn au_end_pending(&self) -> bool {
        self.segments.back().is_some_and(|seg| {
            seg.flags
                .intersects(FragmentFlags::AU_END | FragmentFlags::END_OF_SEQUENCE)
        })
    }

    /// 定位包含绝对位置 `abs` 的片段索引
    fn segment_index(&self, abs: u64) -> Option<usize> {
        if abs >= self.end {
            return None;
        }
        let idx = self.segments.partition_point(|seg| seg.end() <= abs);
        (idx < self.segments.len()).then_some(idx)
    }

    /// 读取相对偏移处的单个字节
    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        let abs = self.position + offset as u64;
        let idx = self.segment_index(abs)?;
        let seg = &self.segments[idx];
        Some(seg.data[(abs - seg.start) as usize])
    }

    /// 从相对偏移处复制 `buf.len()` 字节, 数据不足时返回 false 且不修改游标
    pub fn peek_at(&self, offset: usize, buf: &mut [u8]) -> bool {
        if offset + buf.len() > self.len() {
            return false;
        }
        let mut filled = 0;
        self.for_each_chunk(offset, buf.len(), |chunk| {
            buf[filled..filled + chunk.len()].copy_from_slice(chunk);
            filled += chunk.len();
        });
        true
    }

    /// 按顺序访问区间 `[offset, offset + len)` 的连续内存块
    ///
    /// 区间超出可读数据时只访问可读部分.
    pub fn for_each_chunk(&self, offset: usize, len: usize, mut f: impl FnMut(&[u8])) {
        let mut abs = self.position + offset as u64;
        let stop = (abs + len as u64).min(self.end);
        let Some(mut idx) = self.segment_index(abs) else {
            return;
        };
        while abs < stop && idx < self.segments.len() {
            let seg = &self.segments[idx];
            let from = (abs - seg.start) as usize;
            let to = (stop.min(seg.end()) - seg.start) as usize;
            f(&seg.data[from..to]);
            abs = seg.start + to as u64;
            idx += 1;
        }
    }

    /// 从相对偏移 `from` 起查找固定字节模式, 返回相对偏移
    pub fn find_pattern(&self, pattern: &[u8], from: usize) -> Option<usize> {
        if pattern.is_empty() {
            return (from <= self.len()).then_some(from);
        }
        let finder = memmem::Finder::new(pattern);
        let first = pattern[0];
        self.scan(from, pattern.len(), |slice| finder.find(slice), |window| {
            window[0] == first && window == pattern
        })
    }

    /// 从相对偏移 `from` 起查找满足 `matcher` 的位置
    ///
    /// `matcher` 每次收到以候选位置开头的 `window` 字节 (window <= 16).
    pub fn find_with(
        &self,
        from: usize,
        window: usize,
        matcher: impl Fn(&[u8]) -> bool,
    ) -> Option<usize> {
        self.scan(
            from,
            window,
            |slice| slice.windows(window).position(&matcher),
            &matcher,
        )
    }

    /// 查找的公共实现: 片段内部交给 `in_segment`, 跨越片段边界的窗口
    /// 复制到栈上交给 `straddle`.
    fn scan(
        &self,
        from: usize,
        window: usize,
        mut in_segment: impl FnMut(&[u8]) -> Option<usize>,
        straddle: impl Fn(&[u8]) -> bool,
    ) -> Option<usize> {
        let window = window.clamp(1, 16);
        if from + window > self.len() {
            return None;
        }
        let last_start = self.end - window as u64;
        let mut abs = self.position + from as u64;
        let mut idx = self.segment_index(abs)?;
        let mut buf = [0u8; 16];
        while abs <= last_start && idx < self.segments.len() {
            let seg = &self.segments[idx];
            let local = (abs - seg.start) as usize;
            if local + window <= seg.data.len() {
                if let Some(hit) = in_segment(&seg.data[local..]) {
                    return Some((abs - self.position) as usize + hit);
                }
                abs = seg.end() + 1 - window as u64;
            }
            // 窗口跨越片段边界的候选位置
            while abs < seg.end() && abs <= last_start {
                let rel = (abs - self.position) as usize;
                if self.peek_at(rel, &mut buf[..window]) && straddle(&buf[..window]) {
                    return Some(rel);
                }
                abs += 1;
            }
            idx += 1;
        }
        None
    }

    /// 取出当前读取位置所在片段的时间戳并将其清除
    ///
    /// 同一片段的时间戳只会被取出一次.
    pub fn take_timestamps(&mut self) -> (i64, i64) {
        let Some(idx) = self.segment_index(self.position) else {
            return (NOPTS_VALUE, NOPTS_VALUE);
        };
        let seg = &mut self.segments[idx];
        let ts = (seg.pts, seg.dts);
        seg.pts = NOPTS_VALUE;
        seg.dts = NOPTS_VALUE;
        ts
    }

    /// 跳过 `n` 字节 (超出可读数据时跳到末尾)
    pub fn skip(&mut self, n: usize) {
        self.position = (self.position + n as u64).min(self.end);
        while self
            .segments
            .front()
            .is_some_and(|seg| seg.end() <= self.position)
        {
            self.segments.pop_front();
        }
    }

    /// 读取 `n` 字节追加到 `out` 并前进, 数据不足时返回 false 且不修改游标
    pub fn read_into(&mut self, out: &mut BytesMut, n: usize) -> bool {
        if n > self.len() {
            return false;
        }
        out.reserve(n);
        self.for_each_chunk(0, n, |chunk| out.extend_from_slice(chunk));
        self.skip(n);
        true
    }

    /// 读取 `n` 字节并前进; 数据位于单个片段内时不拷贝
    pub fn read_bytes(&mut self, n: usize) -> Option<Bytes> {
        if n > self.len() {
            return None;
        }
        let front = self.segments.front()?;
        let local = (self.position - front.start) as usize;
        if local + n <= front.data.len() {
            let bytes = front.data.slice(local..local + n);
            self.skip(n);
            return Some(bytes);
        }
        let mut out = BytesMut::with_capacity(n);
        self.read_into(&mut out, n);
        Some(out.freeze())
    }

    /// 丢弃全部缓冲数据, 绝对位置保持不变
    pub fn clear(&mut self) {
        self.segments.clear();
        self.position = self.end;
    }
}
