//! 比特流读取器.
//!
//! 按大端位序 (MSB first) 从字节切片中读取定长字段、Exp-Golomb 变长码
//! 以及 FLAC 的 UTF-8 风格计数器. 所有读取在越界时返回 [`TaoError::Eof`],
//! 头部解析器借此在访问越界之前拒绝畸形头部.

use crate::{TaoError, TaoResult};

/// 比特流读取器
///
/// # 示例
/// ```
/// use tao_core::bitreader::BitReader;
///
/// let data = [0b1011_0001, 0b0101_0101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_ue().unwrap(), 0);
/// assert_eq!(br.bits_left(), 11);
/// ```
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 已读取的总位数
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 已读取的位数
    pub fn bits_read(&self) -> usize {
        self.pos
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    /// 当前所在字节的索引
    pub fn byte_position(&self) -> usize {
        self.pos / 8
    }

    /// 读取 1 位
    pub fn read_bit(&mut self) -> TaoResult<u32> {
        let byte = *self.data.get(self.pos / 8).ok_or(TaoError::Eof)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(u32::from(bit))
    }

    /// 读取 1 位标志
    pub fn read_flag(&mut self) -> TaoResult<bool> {
        Ok(self.read_bit()? == 1)
    }

    /// 读取 N 位 (N <= 32)
    pub fn read_bits(&mut self, n: u32) -> TaoResult<u32> {
        if n > 32 {
            return Err(TaoError::InvalidArgument(format!(
                "read_bits: n={} 超过 32 位",
                n
            )));
        }
        if n as usize > self.bits_left() {
            return Err(TaoError::Eof);
        }
        let mut value = 0u64;
        let mut remaining = n as usize;
        while remaining > 0 {
            let byte = self.data[self.pos / 8];
            let offset = self.pos % 8;
            let take = remaining.min(8 - offset);
            let bits = (byte >> (8 - offset - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | u64::from(bits);
            self.pos += take;
            remaining -= take;
        }
        Ok(value as u32)
    }

    /// 读取 N 位 (N <= 64)
    pub fn read_bits_u64(&mut self, n: u32) -> TaoResult<u64> {
        if n <= 32 {
            return self.read_bits(n).map(u64::from);
        }
        if n > 64 {
            return Err(TaoError::InvalidArgument(format!(
                "read_bits_u64: n={} 超过 64 位",
                n
            )));
        }
        let high = u64::from(self.read_bits(n - 32)?);
        let low = u64::from(self.read_bits(32)?);
        Ok((high << 32) | low)
    }

    /// 窥视 N 位, 不移动读取位置
    pub fn peek_bits(&self, n: u32) -> TaoResult<u32> {
        self.clone().read_bits(n)
    }

    /// 跳过 N 位
    pub fn skip_bits(&mut self, n: usize) -> TaoResult<()> {
        if n > self.bits_left() {
            return Err(TaoError::Eof);
        }
        self.pos += n;
        Ok(())
    }

    /// 对齐到下一个字节边界
    pub fn align_to_byte(&mut self) {
        self.pos = self.pos.div_ceil(8) * 8;
    }

    /// 读取无符号 Exp-Golomb 编码值 ue(v)
    pub fn read_ue(&mut self) -> TaoResult<u32> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(TaoError::InvalidData("Exp-Golomb 前导零过多".into()));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = u64::from(self.read_bits(leading_zeros)?);
        let value = (1u64 << leading_zeros) - 1 + suffix;
        u32::try_from(value)
            .map_err(|_| TaoError::InvalidData(format!("Exp-Golomb 值溢出, value={}", value)))
    }

    /// 读取有符号 Exp-Golomb 编码值 se(v)
    pub fn read_se(&mut self) -> TaoResult<i32> {
        let code = self.read_ue()?;
        // 映射: 0→0, 1→1, 2→-1, 3→2, 4→-2, ...
        let magnitude = code.div_ceil(2) as i32;
        if code & 1 == 0 {
            Ok(-magnitude)
        } else {
            Ok(magnitude)
        }
    }

    /// 读取 FLAC 帧头中的 UTF-8 风格变长计数器 (最长 7 字节, 36 位有效值)
    pub fn read_utf8_u64(&mut self) -> TaoResult<u64> {
        let first = self.read_bits(8)? as u8;
        let (mut value, extra) = match first.leading_ones() {
            0 => (u64::from(first), 0),
            1 => {
                return Err(TaoError::InvalidData(format!(
                    "UTF-8 变长编码首字节非法: 0x{:02X}",
                    first
                )));
            }
            n @ 2..=6 => (u64::from(first & (0x7F >> n)), n - 1),
            7 => (0, 6),
            _ => {
                return Err(TaoError::InvalidData(
                    "UTF-8 变长编码首字节为 0xFF".into(),
                ));
            }
        };
        for _ in 0..extra {
            let byte = self.read_bits(8)? as u8;
            if byte & 0xC0 != 0x80 {
                return Err(TaoError::InvalidData(format!(
                    "UTF-8 变长编码后续字节非法: 0x{:02X}",
                    byte
                )));
            }
            value = (value << 6) | u64::from(byte & 0x3F);
        }
        Ok(value)
    }
}
