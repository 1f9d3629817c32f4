//! 隐藏字幕 (Closed Caption) 旁路提取.
//!
//! 视频解析器在组装访问单元时把 user data / SEI 负载交给 [`CcExtractor`],
//! 提取出的 (场, 字节0, 字节1) 三元组随该访问单元一起输出.
//!
//! 支持的负载格式:
//! - GA94 (ATSC A/53, DVB): `47 41 39 34 03` 后接 cc_data()
//! - DVD: `43 43 01 F8`
//! - ReplayTV: `BB 02 .. .. CC 02` 或 `99 02 .. .. AA 02`
//! - SCTE-20: `03 81` 或旧式 `03 01`
//!
//! DIRECTV 的 GA94 变体不在支持范围内.

use tao_core::bitreader::BitReader;

/// 字幕缓冲区上限 (字节)
pub const CC_MAX_DATA_SIZE: usize = 2 * 3 * 600;

/// 不同格式需要连续出现的次数, 达到后才切换负载格式
const PAYLOAD_SWITCH_THRESHOLD: u32 = 50;

/// 构造 CEA-608 三元组的首字节 (cc_valid=1, cc_type=field)
#[inline]
pub const fn cc_pkt_byte0(field: u8) -> u8 {
    0xFC | (field & 0x03)
}

/// 字幕负载格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcPayloadType {
    /// 已是 cc_data 三元组
    Raw,
    /// ATSC A/53 cc_data()
    Ga94,
    /// DVD user data
    Dvd,
    /// ReplayTV
    ReplayTv,
    /// SCTE-20
    Scte20,
}

/// 一个访问单元携带的字幕数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CcData {
    /// 连续的 (首字节, cc_data_1, cc_data_2) 三元组
    pub data: Vec<u8>,
    /// CEA-608 通道位图 (CC1..CC4)
    pub channels_608: u8,
    /// 是否包含 CEA-708 数据
    pub has_708: bool,
    /// 消费方是否需要按显示顺序重排
    pub reorder: bool,
}

impl CcData {
    /// 三元组数量
    pub fn count(&self) -> usize {
        self.data.len() / 3
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn append(&mut self, preamble: u8, cc: [u8; 2]) {
        let field = preamble & 0x03;
        if field <= 1 {
            self.channels_608 |= 3 << (2 * field);
        } else {
            self.has_708 = true;
        }
        self.data.extend_from_slice(&[preamble, cc[0], cc[1]]);
    }

    fn has_room(&self, bytes: usize) -> bool {
        self.data.len() + bytes <= CC_MAX_DATA_SIZE
    }
}

/// 字幕提取器
#[derive(Debug, Default)]
pub struct CcExtractor {
    pending: CcData,
    payload_type: Option<CcPayloadType>,
    other_count: u32,
}

impl CcExtractor {
    /// 创建提取器
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前锁定的负载格式
    pub fn payload_type(&self) -> Option<CcPayloadType> {
        self.payload_type
    }

    /// 识别负载格式并提取
    ///
    /// `data` 为 user data 起始码之后的字节.
    pub fn detect_and_extract(&mut self, top_field_first: bool, data: &[u8]) {
        const GA94: [u8; 4] = *b"GA94";
        const DVD: [u8; 4] = [0x43, 0x43, 0x01, 0xF8];
        const REPLAYTV_4: ([u8; 2], [u8; 2]) = ([0xBB, 0x02], [0xCC, 0x02]);
        const REPLAYTV_5: ([u8; 2], [u8; 2]) = ([0x99, 0x02], [0xAA, 0x02]);

        if data.len() < 4 {
            return;
        }
        let (kind, payload) = if data[..4] == GA94 && data.len() >= 8 && data[4] == 0x03 {
            (CcPayloadType::Ga94, &data[5..])
        } else if data[..4] == DVD && data.len() > 5 {
            (CcPayloadType::Dvd, data)
        } else if data.len() >= 8
            && [REPLAYTV_4, REPLAYTV_5]
                .iter()
                .any(|(a, b)| data[..2] == *a && data[4..6] == *b)
        {
            (CcPayloadType::ReplayTv, data)
        } else if (data[..2] == [0x03, 0x81] || data[..2] == [0x03, 0x01]) && data.len() > 2 {
            (CcPayloadType::Scte20, data)
        } else {
            return;
        };
        self.extract(kind, top_field_first, payload);
    }

    /// 按已知格式提取
    ///
    /// 与当前锁定格式不同的负载需要连续出现多次才会切换格式, 之前的忽略.
    pub fn extract(&mut self, kind: CcPayloadType, top_field_first: bool, data: &[u8]) {
        if let Some(current) = self.payload_type {
            if current != kind {
                self.other_count += 1;
                if self.other_count < PAYLOAD_SWITCH_THRESHOLD {
                    return;
                }
            }
        }
        self.payload_type = Some(kind);
        self.other_count = 0;

        match kind {
            CcPayloadType::Raw => self.extract_raw(data),
            CcPayloadType::Ga94 => self.extract_ga94(data),
            CcPayloadType::Dvd => self.extract_dvd(data),
            CcPayloadType::ReplayTv => self.extract_replaytv(data),
            CcPayloadType::Scte20 => self.extract_scte20(top_field_first, data),
        }
    }

    /// 取出累积的字幕数据 (为空时返回 None) 并清空缓冲
    pub fn take(&mut self) -> Option<CcData> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    /// 丢弃累积的数据, 保留格式锁定
    pub fn flush(&mut self) {
        self.pending = CcData::default();
    }

    fn extract_raw(&mut self, data: &[u8]) {
        for triple in data.chunks_exact(3) {
            if !self.pending.has_room(3) {
                break;
            }
            self.pending.append(triple[0], [triple[1], triple[2]]);
        }
        self.pending.reorder = true;
    }

    /// cc_data():
    /// `reserved(1) process_cc_data_flag(1) additional_data_flag(1) cc_count(5)`,
    /// `reserved(8)`, cc_count 个 `marker(5) cc_valid(1) cc_type(2) data(16)`,
    /// 结尾 `marker(8) = 0xFF`
    fn extract_ga94(&mut self, data: &[u8]) {
        let Some(&head) = data.first() else {
            return;
        };
        let count = usize::from(head & 0x1F);
        if head & 0x40 == 0 || count == 0 || data.len() < 2 + count * 3 + 1 {
            return;
        }
        if data[2 + count * 3] != 0xFF {
            return;
        }
        for triple in data[2..2 + count * 3].chunks_exact(3) {
            if !self.pending.has_room(3) {
                break;
            }
            self.pending.append(triple[0], [triple[1], triple[2]]);
        }
        self.pending.reorder = true;
    }

    /// DVD user data:
    /// `43 43 01 F8`, `odd_field_first(1) filler(1) block_count(5) extra_field(1)`,
    /// 之后每块两组 `filler(7) field_odd(1) data(16)`
    fn extract_dvd(&mut self, data: &[u8]) {
        let Some(&flags) = data.get(4) else {
            return;
        };
        let truncate = flags & 0x01 != 0;
        let field_first = if flags & 0x80 != 0 { 0 } else { 1 };
        let blocks = usize::from((flags >> 1) & 0x1F);
        let needed = (5 + 6 * blocks).saturating_sub(if truncate { 3 } else { 0 });
        if data.len() < needed {
            return;
        }
        let mut offset = 5;
        'blocks: for block in 0..blocks {
            for half in 0..2 {
                if truncate && block == blocks - 1 && half == 1 {
                    break;
                }
                let Some(cc) = data.get(offset..offset + 3) else {
                    break 'blocks;
                };
                offset += 3;
                if cc[0] != 0xFF && cc[0] != 0xFE {
                    continue;
                }
                if !self.pending.has_room(3) {
                    break 'blocks;
                }
                let field = if half == field_first { 0 } else { 1 };
                self.pending.append(cc_pkt_byte0(field), [cc[1], cc[2]]);
            }
        }
        self.pending.reorder = false;
    }

    fn extract_replaytv(&mut self, data: &[u8]) {
        for group in data.chunks_exact(4) {
            if !self.pending.has_room(3) {
                return;
            }
            let field = (group[0] & 0x02) >> 1;
            self.pending.append(cc_pkt_byte0(field), [group[2], group[3]]);
        }
        self.pending.reorder = false;
    }

    /// SCTE-20 user data: `03 81`, `cc_count(5)`, 每项
    /// `priority(2) field_num(2) line_offset(5) data_1(8) data_2(8) marker(1)`,
    /// 数据字节按 LSB 在前传输.
    fn extract_scte20(&mut self, top_field_first: bool, data: &[u8]) {
        let Some(rest) = data.get(2..) else {
            return;
        };
        let mut br = BitReader::new(rest);
        let Ok(count) = br.read_bits(5) else {
            return;
        };
        for _ in 0..count {
            let Ok(entry) = read_scte20_entry(&mut br) else {
                break;
            };
            let (field_idx, cc) = entry;
            if field_idx == 0 || !self.pending.has_room(2 * 3) {
                continue;
            }
            // 场号 1,2,3 -> 0,1,0; 重复场 3 并入场 1
            let mut field = ((field_idx - 1) & 1) as u8;
            if !top_field_first {
                field ^= 1;
            }
            self.pending.append(cc_pkt_byte0(field), cc);
        }
        self.pending.reorder = true;
    }
}

fn read_scte20_entry(br: &mut BitReader<'_>) -> tao_core::TaoResult<(u32, [u8; 2])> {
    br.skip_bits(2)?;
    let field_idx = br.read_bits(2)?;
    br.skip_bits(5)?;
    let mut cc = [0u8; 2];
    for byte in &mut cc {
        for bit in 0..8 {
            *byte |= (br.read_bit()? as u8) << bit;
        }
    }
    br.skip_bits(1)?;
    Ok((field_idx, cc))
}
