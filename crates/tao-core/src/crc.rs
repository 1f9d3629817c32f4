//! FLAC 使用的 CRC 校验.
//!
//! - CRC-8: 多项式 0x07, 初始值 0, 覆盖帧头 (不含 CRC 字节本身)
//! - CRC-16: 多项式 0x8005, 初始值 0, 覆盖整个帧 (不含末尾 2 字节 CRC)
//!
//! 两者都不反射、无输出异或, 因此对 "数据 + 大端 CRC" 重新计算得到 0.

const fn build_crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn build_crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ poly } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC8_TABLE: [u8; 256] = build_crc8_table(0x07);
static CRC16_TABLE: [u16; 256] = build_crc16_table(0x8005);

/// 计算 CRC-8 (FLAC 帧头)
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[usize::from(crc ^ byte)])
}

/// 在已有 CRC-16 值上继续累加, 用于跨多个缓冲段计算
pub fn crc16_update(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, &byte| {
        (crc << 8) ^ CRC16_TABLE[usize::from((crc >> 8) as u8 ^ byte)]
    })
}

/// 计算 CRC-16 (FLAC 帧尾)
pub fn crc16(data: &[u8]) -> u16 {
    crc16_update(0, data)
}
