// 音频格式白名单
//
// 调用解码器前先按扩展名映射到明确的容器/编码组合，
// 不在白名单内的文件直接返回 UnsupportedFormat，不进入解码流程。

use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{AppError, AppResult};

/// 支持的容器/编码组合
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// RIFF WAVE / PCM
    Wav,
    /// MPEG-1/2 Layer III
    Mp3,
    /// FLAC
    Flac,
    /// Ogg / Vorbis
    Ogg,
    /// MP4 容器 / AAC 或 ALAC
    M4a,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 5] = [
        AudioFormat::Wav,
        AudioFormat::Mp3,
        AudioFormat::Flac,
        AudioFormat::Ogg,
        AudioFormat::M4a,
    ];

    /// 根据扩展名识别格式（大小写不敏感）
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Some(AudioFormat::Wav),
            "mp3" => Some(AudioFormat::Mp3),
            "flac" => Some(AudioFormat::Flac),
            "ogg" | "oga" => Some(AudioFormat::Ogg),
            "m4a" | "mp4" | "aac" => Some(AudioFormat::M4a),
            _ => None,
        }
    }

    /// 根据文件名识别格式，不支持时返回 UnsupportedFormat
    pub fn from_path(path: &Path) -> AppResult<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| AppError::UnsupportedFormat(format!("不在白名单内: {}", path.display())))
    }

    /// 交给 symphonia 探测器的扩展名提示
    pub fn hint_extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::M4a => "m4a",
        }
    }

    /// 文件名是否在白名单内
    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist() {
        assert_eq!(AudioFormat::from_path(Path::new("a/Song.MP3")).unwrap(), AudioFormat::Mp3);
        assert_eq!(AudioFormat::from_extension("wave"), Some(AudioFormat::Wav));
        assert!(AudioFormat::is_supported(Path::new("x.flac")));
        assert!(!AudioFormat::is_supported(Path::new("x.wma")));
        assert!(matches!(
            AudioFormat::from_path(Path::new("no_extension")),
            Err(AppError::UnsupportedFormat(_))
        ));
    }
}
