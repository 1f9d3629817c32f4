//! 分包器支持的编码标识符.

use std::fmt;
use std::str::FromStr;

use tao_core::TaoError;

/// 编码标识符
///
/// 唯一标识一种基本流语法, 与容器格式无关.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    // ========================
    // 视频
    // ========================
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    Hevc,
    /// MPEG-1 Video
    Mpeg1Video,
    /// MPEG-2 Video
    Mpeg2Video,
    /// VC-1 / WMV3
    Vc1,
    /// Motion JPEG
    Mjpeg,

    // ========================
    // 音频
    // ========================
    /// MPEG-1/2 Audio Layer I
    Mp1,
    /// MPEG-1/2 Audio Layer II
    Mp2,
    /// MPEG-1/2 Audio Layer III
    Mp3,
    /// AAC (ADTS 或原始 AudioSpecificConfig)
    Aac,
    /// AAC LATM/LOAS
    AacLatm,
    /// Meridian Lossless Packing
    Mlp,
    /// Dolby TrueHD
    TrueHd,
    /// FLAC
    Flac,
}

impl CodecId {
    /// 全部已知编码, 按注册顺序排列
    pub const ALL: [CodecId; 14] = [
        Self::H264,
        Self::Hevc,
        Self::Mpeg1Video,
        Self::Mpeg2Video,
        Self::Vc1,
        Self::Mjpeg,
        Self::Mp1,
        Self::Mp2,
        Self::Mp3,
        Self::Aac,
        Self::AacLatm,
        Self::Mlp,
        Self::TrueHd,
        Self::Flac,
    ];

    /// 获取编码的短名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Mpeg1Video => "mpeg1video",
            Self::Mpeg2Video => "mpeg2video",
            Self::Vc1 => "vc1",
            Self::Mjpeg => "mjpeg",
            Self::Mp1 => "mp1",
            Self::Mp2 => "mp2",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::AacLatm => "aac_latm",
            Self::Mlp => "mlp",
            Self::TrueHd => "truehd",
            Self::Flac => "flac",
        }
    }

    /// 是否为视频编码
    pub const fn is_video(&self) -> bool {
        matches!(
            self,
            Self::H264
                | Self::Hevc
                | Self::Mpeg1Video
                | Self::Mpeg2Video
                | Self::Vc1
                | Self::Mjpeg
        )
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CodecId {
    type Err = TaoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let id = match lower.as_str() {
            "avc" => Self::H264,
            "h265" | "hvc1" | "hev1" => Self::Hevc,
            "mpeg2" | "m2v" => Self::Mpeg2Video,
            "mpeg1" | "m1v" => Self::Mpeg1Video,
            "wmv3" | "wvc1" => Self::Vc1,
            "latm" | "loas" => Self::AacLatm,
            "thd" => Self::TrueHd,
            other => Self::ALL
                .iter()
                .copied()
                .find(|id| id.name() == other)
                .ok_or_else(|| TaoError::CodecNotFound(format!("未知编码名称: {}", s)))?,
        };
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_名称解析与显示() {
        for id in CodecId::ALL {
            assert_eq!(id.name().parse::<CodecId>().unwrap(), id);
        }
        assert_eq!("AVC".parse::<CodecId>().unwrap(), CodecId::H264);
        assert_eq!("loas".parse::<CodecId>().unwrap(), CodecId::AacLatm);
        assert_eq!(CodecId::TrueHd.to_string(), "truehd");
        assert_eq!("H265".parse::<CodecId>().unwrap(), CodecId::Hevc);
        assert!("dirac".parse::<CodecId>().is_err());
    }
}
