//! 无符号有理数, 用于帧率与时钟频率.

use std::fmt;
use std::str::FromStr;

use crate::TaoError;

/// 有理数 (分子/分母均为非负整数)
///
/// 例如帧率 30000/1001 表示 29.97fps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: u32,
    /// 分母
    pub den: u32,
}

impl Rational {
    /// 创建有理数 (不做约分)
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// 分子分母均非零
    pub const fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// 转换为 f64, 分母为 0 时返回 NaN
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 约分
    pub fn reduce(self) -> Self {
        let g = gcd(self.num, self.den);
        if g <= 1 {
            return self;
        }
        Self::new(self.num / g, self.den / g)
    }

    /// 乘以另一个有理数并约分, 溢出时返回 None
    pub fn checked_mul(self, other: Self) -> Option<Self> {
        let num = u64::from(self.num) * u64::from(other.num);
        let den = u64::from(self.den) * u64::from(other.den);
        let g = gcd64(num, den).max(1);
        Some(Self::new(
            u32::try_from(num / g).ok()?,
            u32::try_from(den / g).ok()?,
        ))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = TaoError;

    /// 解析 `"30000/1001"` 或 `"25"` 形式的字符串
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TaoError::InvalidArgument(format!("无法解析有理数: {}", s));
        let (num, den) = match s.split_once('/') {
            Some((num, den)) => (num.trim(), den.trim()),
            None => (s.trim(), "1"),
        };
        let num = num.parse::<u32>().map_err(|_| invalid())?;
        let den = den.parse::<u32>().map_err(|_| invalid())?;
        if den == 0 {
            return Err(invalid());
        }
        Ok(Self::new(num, den))
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn gcd64(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd64(b, a % b) }
}
