//! Annex-B 起始码与防竞争字节工具, H.264 与 VC-1 共用.
//!
//! ```text
//! 3 字节起始码: 00 00 01
//! 4 字节起始码: 00 00 00 01
//! 防竞争:       00 00 03 xx  ->  00 00 xx
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tao_core::{TaoError, TaoResult};

/// 3 字节起始码
pub const START_CODE: &[u8] = &[0x00, 0x00, 0x01];

/// 输出使用的 4 字节起始码
pub const START_CODE_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// 移除防竞争字节 (`00 00 03` -> `00 00`)
///
/// 紧跟在两个 0x00 之后的 0x03 一律被移除, 结果为新分配的 RBSP.
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0x00 { zeros + 1 } else { 0 };
        rbsp.push(byte);
    }
    rbsp
}

/// 插入防竞争字节, 使负载中不出现 `00 00 0x` (x <= 3)
pub fn escape(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 64);
    let mut zeros = 0usize;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0x00 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// 去除尾部的 0x00 (下一个 4 字节起始码的前导零或 trailing_zero_8bits)
pub fn strip_trailing_zeros(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != 0x00)
        .map_or(0, |pos| pos + 1);
    &data[..end]
}

/// 跳过开头的 3/4 字节起始码, 返回 NAL/IDU 负载
pub fn skip_start_code(data: &[u8]) -> &[u8] {
    if data.starts_with(&START_CODE_4) {
        &data[4..]
    } else if data.starts_with(START_CODE) {
        &data[3..]
    } else {
        data
    }
}

/// 为负载加上 4 字节起始码
pub fn with_start_code(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 4);
    out.put_slice(&START_CODE_4);
    out.put_slice(payload);
    out.freeze()
}

/// 把长度前缀 (1..=4 字节大端长度) 形式的数据转换为 4 字节起始码形式
pub fn length_prefixed_to_annexb(data: &[u8], length_size: usize) -> TaoResult<Bytes> {
    if !(1..=4).contains(&length_size) {
        return Err(TaoError::InvalidArgument(format!(
            "长度前缀大小非法: {}",
            length_size
        )));
    }
    let mut out = BytesMut::with_capacity(data.len() + 16);
    let mut pos = 0;
    while pos + length_size <= data.len() {
        let nal_len = data[pos..pos + length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        pos += length_size;
        if nal_len > data.len() - pos {
            return Err(TaoError::InvalidData(format!(
                "长度前缀数据截断, declared_len={}, remain={}",
                nal_len,
                data.len() - pos
            )));
        }
        out.put_slice(&START_CODE_4);
        out.put_slice(&data[pos..pos + nal_len]);
        pos += nal_len;
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_移除防竞争字节() {
        let data = [0x67, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x03];
        assert_eq!(unescape(&data), vec![0x67, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_插入后移除还原() {
        let rbsp = [0x00, 0x00, 0x00, 0x00, 0x01, 0xFF, 0x00, 0x00, 0x02];
        let escaped = escape(&rbsp);
        assert!(!escaped.windows(3).any(|w| w == [0, 0, 1] || w == [0, 0, 0]));
        assert_eq!(unescape(&escaped), rbsp.to_vec());
    }

    #[test]
    fn test_起始码与尾零() {
        assert_eq!(skip_start_code(&[0, 0, 0, 1, 0x65]), &[0x65]);
        assert_eq!(skip_start_code(&[0, 0, 1, 0x41]), &[0x41]);
        assert_eq!(strip_trailing_zeros(&[0x65, 0x88, 0x00, 0x00]), &[0x65, 0x88]);
        assert!(strip_trailing_zeros(&[0, 0]).is_empty());
    }

    #[test]
    fn test_长度前缀转换() {
        let data = [0x00, 0x02, 0x67, 0x42, 0x00, 0x01, 0x68];
        let out = length_prefixed_to_annexb(&data, 2).unwrap();
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]);
        assert!(length_prefixed_to_annexb(&[0x00, 0x05, 0x67], 2).is_err());
        assert!(length_prefixed_to_annexb(&data, 5).is_err());
    }
}
