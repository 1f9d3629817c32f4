//! 比特流写入器.
//!
//! 与 [`crate::bitreader::BitReader`] 对称的 MSB-first 写入器,
//! 用于合成配置记录 (如 AudioSpecificConfig) 以及在测试中构造码流.

/// 比特流写入器
///
/// # 示例
/// ```
/// use tao_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1011, 4);
/// bw.write_ue(0);
/// bw.write_bits(0b101, 3);
/// assert_eq!(bw.finish(), vec![0b1011_1101]);
/// ```
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    data: Vec<u8>,
    /// 已写入的总位数
    len: usize,
}

impl BitWriter {
    /// 创建空写入器
    pub fn new() -> Self {
        Self::default()
    }

    /// 已写入的位数
    pub fn bits_written(&self) -> usize {
        self.len
    }

    /// 是否字节对齐
    pub fn is_aligned(&self) -> bool {
        self.len % 8 == 0
    }

    /// 写入 1 位
    pub fn write_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let last = self.data.len() - 1;
            self.data[last] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    /// 写入值的低 N 位 (N <= 32), 高位在前
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={} 超过 32 位", n);
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// 写入值的低 N 位 (N <= 64)
    pub fn write_bits_u64(&mut self, value: u64, n: u32) {
        if n > 32 {
            self.write_bits((value >> 32) as u32, n - 32);
            self.write_bits(value as u32, 32);
        } else {
            self.write_bits(value as u32, n);
        }
    }

    /// 写入无符号 Exp-Golomb 编码值 ue(v)
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let width = 64 - code.leading_zeros();
        self.write_bits(0, width - 1);
        self.write_bits_u64(code, width);
    }

    /// 写入有符号 Exp-Golomb 编码值 se(v)
    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(code);
    }

    /// 写入 FLAC 帧头使用的 UTF-8 风格变长计数器
    pub fn write_utf8_u64(&mut self, value: u64) {
        if value < 0x80 {
            self.write_bits(value as u32, 8);
            return;
        }
        // 每个后续字节承载 6 位, 首字节承载 (6 - extra) 位
        let mut extra = 1u32;
        while extra < 6 && value >= 1u64 << (6 - extra + 6 * extra) {
            extra += 1;
        }
        let prefix = (0xFF00u32 >> (extra + 1)) & 0xFF;
        self.write_bits(prefix | (value >> (6 * extra)) as u32, 8);
        for i in (0..extra).rev() {
            self.write_bits(0x80 | ((value >> (6 * i)) & 0x3F) as u32, 8);
        }
    }

    /// 写入原始字节
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_bits(u32::from(byte), 8);
        }
    }

    /// 以 0 填充到字节边界
    pub fn align_to_byte(&mut self) {
        while !self.is_aligned() {
            self.write_bit(false);
        }
    }

    /// 写入 rbsp_trailing_bits (1 后接 0 填充)
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(true);
        self.align_to_byte();
    }

    /// 结束写入并返回字节 (不足一字节的部分以 0 填充)
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    #[test]
    fn test_write_bits_基本() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b1011, 4);
        bw.write_bits(0b0001, 4);
        bw.write_bits(0x155, 9);
        assert_eq!(bw.bits_written(), 17);
        assert_eq!(bw.finish(), vec![0b1011_0001, 0b1010_1010, 0b1000_0000]);
    }

    #[test]
    fn test_exp_golomb_读写一致() {
        let mut bw = BitWriter::new();
        for v in [0u32, 1, 2, 7, 255, 65_535] {
            bw.write_ue(v);
        }
        for v in [0i32, 1, -1, 17, -300] {
            bw.write_se(v);
        }
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        for v in [0u32, 1, 2, 7, 255, 65_535] {
            assert_eq!(br.read_ue().unwrap(), v);
        }
        for v in [0i32, 1, -1, 17, -300] {
            assert_eq!(br.read_se().unwrap(), v);
        }
    }

    #[test]
    fn test_utf8_计数器读写一致() {
        let mut bw = BitWriter::new();
        for v in [0u64, 0x7F, 0x80, 0x7FF, 0x800, 0xFFFF, 0x1F_FFFF, 0xF_FFFF_FFFF] {
            bw.write_utf8_u64(v);
        }
        let data = bw.finish();
        let mut br = BitReader::new(&data);
        for v in [0u64, 0x7F, 0x80, 0x7FF, 0x800, 0xFFFF, 0x1F_FFFF, 0xF_FFFF_FFFF] {
            assert_eq!(br.read_utf8_u64().unwrap(), v);
        }
    }
}
