//! 与编码无关的分包器性质测试

use tao_es::packetizer::{AccessUnit, CodecId, Fragment, FragmentFlags, Packetize, StreamConfig};

fn create(codec_id: CodecId) -> Box<dyn Packetize> {
    tao_es::default_packetizer_registry()
        .create(&StreamConfig::new(codec_id))
        .unwrap_or_else(|err| panic!("创建 {} 分包器失败: {}", codec_id, err))
}

/// 线性同余伪随机序列, 保证测试可重复
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next() as u8).collect()
    }
}

/// MPEG-1 Layer II, 192kbps, 48000Hz: 每帧 576 字节
fn mp2_frame(fill: u8) -> Vec<u8> {
    let mut data = vec![0xFF, 0xFD, 0xA4, 0x00];
    data.resize(576, fill);
    data
}

#[test]
fn test_随机数据不会导致异常() {
    let mut rng = Lcg(0x5EED);
    for codec_id in CodecId::ALL {
        let mut p = create(codec_id);
        let mut out = Vec::new();
        for _ in 0..64 {
            let len = (rng.next() % 700) as usize;
            let mut data = rng.bytes(len);
            // 混入各类同步字
            if rng.next() % 3 == 0 && data.len() > 8 {
                let at = (rng.next() as usize) % (data.len() - 4);
                data[at..at + 4].copy_from_slice(&[0x00, 0x00, 0x01, 0xB3]);
            }
            if rng.next() % 3 == 0 && data.len() > 8 {
                let at = (rng.next() as usize) % (data.len() - 2);
                data[at..at + 2].copy_from_slice(&[0xFF, 0xF1]);
            }
            let flags = match rng.next() % 16 {
                0 => FragmentFlags::CORRUPTED,
                1 => FragmentFlags::DISCONTINUITY,
                _ => FragmentFlags::empty(),
            };
            out.extend(p.push(Fragment::new(data).with_flags(flags)));
        }
        out.extend(p.finish());

        assert_eq!(p.stats().emitted, out.len() as u64, "{}", codec_id);
        assert_eq!(p.codec_id(), codec_id);
    }
}

#[test]
fn test_随机切分结果一致() {
    let stream: Vec<u8> = (0..12).flat_map(|i| mp2_frame(0x30 + i)).collect();
    let expected: Vec<AccessUnit> = {
        let mut p = create(CodecId::Mp2);
        let mut out = p.push(Fragment::new(stream.clone()));
        out.extend(p.finish());
        out
    };
    assert_eq!(expected.len(), 12);

    let mut rng = Lcg(42);
    for _ in 0..20 {
        let mut p = create(CodecId::Mp2);
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < stream.len() {
            let len = (1 + rng.next() % 900) as usize;
            let end = (pos + len).min(stream.len());
            out.extend(p.push(Fragment::new(stream[pos..end].to_vec())));
            pos = end;
        }
        out.extend(p.finish());
        assert_eq!(out.len(), expected.len());
        for (a, b) in out.iter().zip(&expected) {
            assert_eq!(a.data, b.data);
        }
    }
}

#[test]
fn test_flush_后重新同步() {
    let mut p = create(CodecId::Mp2);
    let mut out = p.push(Fragment::new([mp2_frame(1), mp2_frame(2)].concat()));
    assert_eq!(out.len(), 1);

    p.flush();
    // 半帧残留数据之后是新的完整帧
    let mut data = mp2_frame(3)[300..].to_vec();
    data.extend(mp2_frame(4));
    data.extend(mp2_frame(5));
    out.extend(p.push(Fragment::new(data)));
    out.extend(p.finish());

    let fills: Vec<u8> = out.iter().map(|au| au.data[4]).collect();
    assert_eq!(fills, vec![1, 4, 5]);
    assert_eq!(p.stats().skipped_bytes, 276);
}

#[test]
fn test_分包器可跨线程移动() {
    let mut p = create(CodecId::Mp2);
    let handle = std::thread::spawn(move || {
        let mut out = p.push(Fragment::new([mp2_frame(7), mp2_frame(8)].concat()));
        out.extend(p.finish());
        out.len()
    });
    assert_eq!(handle.join().unwrap(), 2);
}
