//! 时间戳常量与插值时钟.
//!
//! 分包层内所有时间戳统一使用微秒 (`i64`), `NOPTS_VALUE` 表示未定义.

use crate::rational::Rational;

/// 表示"未定义"的时间戳值
pub const NOPTS_VALUE: i64 = i64::MIN;

/// 每秒的时间戳刻度数 (微秒)
pub const TICKS_PER_SECOND: i64 = 1_000_000;

/// 判断时间戳是否有效
#[inline]
pub const fn is_valid(ts: i64) -> bool {
    ts != NOPTS_VALUE
}

/// 按有理数频率递增的插值时钟
///
/// 例如音频以采样率为频率 (`48000/1`), 每帧递增帧内样本数;
/// 视频以 2 倍帧率为频率, 每帧递增场数. 除法余数被累积,
/// 长时间运行不会产生漂移.
///
/// ```
/// use tao_core::timestamp::TimestampClock;
///
/// let mut clock = TimestampClock::new(48_000, 1);
/// clock.set(0);
/// assert_eq!(clock.increment(1024), 21_333);
/// assert_eq!(clock.increment(1024), 42_666);
/// assert_eq!(clock.increment(1024), 64_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampClock {
    date: i64,
    num: u32,
    den: u32,
    remainder: u64,
}

impl TimestampClock {
    /// 以频率 `num/den` (每秒递增单位数) 创建未设置的时钟
    pub fn new(num: u32, den: u32) -> Self {
        Self {
            date: NOPTS_VALUE,
            num,
            den,
            remainder: 0,
        }
    }

    /// 从有理数频率创建
    pub fn with_rate(rate: Rational) -> Self {
        Self::new(rate.num, rate.den)
    }

    /// 设置当前时间并清除累积余数
    pub fn set(&mut self, date: i64) {
        self.date = date;
        self.remainder = 0;
    }

    /// 当前时间, 未设置时为 `NOPTS_VALUE`
    pub fn get(&self) -> i64 {
        self.date
    }

    /// 是否已设置
    pub fn is_set(&self) -> bool {
        is_valid(self.date)
    }

    /// 当前频率
    pub fn rate(&self) -> Rational {
        Rational::new(self.num, self.den)
    }

    /// 前进 `count` 个单位并返回新的时间
    ///
    /// 时钟未设置或频率无效时保持不变.
    pub fn increment(&mut self, count: u32) -> i64 {
        if !self.is_set() || self.num == 0 {
            return self.date;
        }
        let dividend =
            u128::from(count) * TICKS_PER_SECOND as u128 * u128::from(self.den);
        let num = u128::from(self.num);
        let step = (dividend / num) as i64;
        self.remainder += (dividend % num) as u64;
        self.date = self.date.saturating_add(step);
        if self.remainder >= u64::from(self.num) {
            self.date = self.date.saturating_add(1);
            self.remainder -= u64::from(self.num);
        }
        self.date
    }

    /// 计算 `count` 个单位对应的时长, 不修改时钟
    pub fn duration_of(&self, count: u32) -> i64 {
        if self.num == 0 {
            return 0;
        }
        let dividend =
            i128::from(count) * i128::from(TICKS_PER_SECOND) * i128::from(self.den);
        (dividend / i128::from(self.num)) as i64
    }

    /// 修改频率, 保留当前时间
    pub fn change_rate(&mut self, num: u32, den: u32) {
        if self.num == num && self.den == den {
            return;
        }
        self.num = num;
        self.den = den;
        self.remainder = 0;
    }

    /// 回到未设置状态
    pub fn reset(&mut self) {
        self.date = NOPTS_VALUE;
        self.remainder = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_未设置时钟不前进() {
        let mut clock = TimestampClock::new(25, 1);
        assert_eq!(clock.increment(1), NOPTS_VALUE);
        assert!(!clock.is_set());
    }

    #[test]
    fn test_ntsc_帧率无漂移() {
        // 30000/1001 fps, 30000 帧恰好为 1001 秒
        let mut clock = TimestampClock::new(30_000, 1001);
        clock.set(0);
        for _ in 0..30_000 {
            clock.increment(1);
        }
        assert_eq!(clock.get(), 1001 * TICKS_PER_SECOND);
    }

    #[test]
    fn test_修改频率与重置() {
        let mut clock = TimestampClock::new(44_100, 1);
        clock.set(1_000);
        clock.change_rate(48_000, 1);
        assert_eq!(clock.increment(48_000), 1_001_000);
        assert_eq!(clock.duration_of(1152), 24_000);
        clock.reset();
        assert_eq!(clock.get(), NOPTS_VALUE);
    }
}
