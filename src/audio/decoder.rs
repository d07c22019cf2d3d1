// 音频解码模块
//
// 使用 symphonia 解析容器与编码，混合为单声道后用 rubato 重采样到 SAMPLE_RATE。
// 除读取输入外没有任何副作用。

use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use rubato::{FftFixedIn, Resampler};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};
use crate::audio::format::AudioFormat;
use crate::config::SAMPLE_RATE;
use crate::error::{AppError, AppResult};

/// 重采样分块大小（输入帧数）
const RESAMPLE_CHUNK: usize = 1024;

/// 解码结果：单声道、SAMPLE_RATE 采样率的 PCM
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    /// 源文件采样率
    pub source_rate: u32,
    /// 源文件声道数
    pub channels: usize,
}

impl DecodedAudio {
    /// 时长 (秒)
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }
}

/// 解码音频文件
pub fn decode_file(path: &Path) -> AppResult<DecodedAudio> {
    let format = AudioFormat::from_path(path)?;
    debug!("[DECODER] 解码文件: {} ({:?})", path.display(), format);
    let file = File::open(path)?;
    decode_source(Box::new(file), format)
}

/// 解码内存中的音频数据，格式由调用方根据已校验的文件名给出
pub fn decode_bytes(bytes: Vec<u8>, format: AudioFormat) -> AppResult<DecodedAudio> {
    debug!("[DECODER] 解码内存数据: {} bytes ({:?})", bytes.len(), format);
    decode_source(Box::new(Cursor::new(bytes)), format)
}

fn decode_source(source: Box<dyn MediaSource>, format: AudioFormat) -> AppResult<DecodedAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.hint_extension());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AppError::UnsupportedFormat(format!("容器探测失败: {}", e)))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AppError::UnsupportedFormat("没有可解码的音轨".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AppError::UnsupportedFormat(format!("不支持的编码: {}", e)))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut source_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut skipped_packets = 0usize;

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                if mono.is_empty() {
                    return Err(AppError::CorruptAudio(format!("读取数据包失败: {}", e)));
                }
                // 已解出部分数据时按截断文件处理
                warn!("[DECODER] 数据包读取中断，保留已解码部分: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                skipped_packets += 1;
                debug!("[DECODER] 跳过损坏的数据包: {}", e);
                continue;
            }
            Err(SymphoniaError::IoError(e)) => {
                skipped_packets += 1;
                debug!("[DECODER] 跳过数据包: {}", e);
                continue;
            }
            Err(e) => return Err(AppError::CorruptAudio(format!("解码失败: {}", e))),
        };

        let spec = *decoded.spec();
        source_rate = spec.rate;
        channels = spec.channels.count().max(1);

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        mono.extend(downmix(buf.samples(), channels));
    }

    if skipped_packets > 0 {
        warn!("[DECODER] 共跳过 {} 个无法解码的数据包", skipped_packets);
    }

    if mono.is_empty() || source_rate == 0 {
        return Err(AppError::CorruptAudio("没有解出任何采样".to_string()));
    }

    let samples = resample(&mono, source_rate)?;
    if samples.is_empty() {
        return Err(AppError::CorruptAudio("重采样后没有可用采样".to_string()));
    }

    debug!(
        "[DECODER] 解码完成: 源采样率={}Hz, 声道={}, 输出采样={}",
        source_rate,
        channels,
        samples.len()
    );

    Ok(DecodedAudio {
        samples,
        source_rate,
        channels,
    })
}

/// 交错多声道 → 单声道（各声道取平均）
fn downmix(interleaved: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    let inv = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(move |frame| frame.iter().sum::<f32>() * inv)
}

/// 重采样到 SAMPLE_RATE，并去掉重采样器引入的固定延迟
fn resample(samples: &[f32], source_rate: u32) -> AppResult<Vec<f32>> {
    if source_rate == SAMPLE_RATE {
        return Ok(samples.to_vec());
    }

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        SAMPLE_RATE as usize,
        RESAMPLE_CHUNK,
        2,
        1,
    )
    .map_err(|e| AppError::CorruptAudio(format!("初始化重采样器失败: {}", e)))?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as u64 * SAMPLE_RATE as u64 / source_rate as u64) as usize;
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + resampler.output_frames_max());

    let mut position = 0;
    loop {
        let needed = resampler.input_frames_next();
        if position + needed > samples.len() {
            break;
        }
        let input: [&[f32]; 1] = [&samples[position..position + needed]];
        let chunk = resampler
            .process(&input[..], None)
            .map_err(|e| AppError::CorruptAudio(format!("重采样失败: {}", e)))?;
        output.extend_from_slice(&chunk[0]);
        position += needed;
    }

    if position < samples.len() {
        let input: [&[f32]; 1] = [&samples[position..]];
        let chunk = resampler
            .process_partial(Some(&input[..]), None)
            .map_err(|e| AppError::CorruptAudio(format!("重采样失败: {}", e)))?;
        output.extend_from_slice(&chunk[0]);
    }

    // 冲刷延迟线中剩余的数据
    while output.len() < expected + delay {
        let chunk = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| AppError::CorruptAudio(format!("重采样失败: {}", e)))?;
        if chunk[0].is_empty() {
            break;
        }
        output.extend_from_slice(&chunk[0]);
    }

    let end = (delay + expected).min(output.len());
    let start = delay.min(end);
    Ok(output[start..end].to_vec())
}
