// 音频处理模块
//
// 子模块：
// - format: 支持的容器/编码白名单
// - decoder: 解码、混音、重采样到统一采样率（symphonia + rubato）
// - spectrum: 分帧 FFT 与峰值提取（rustfft）
// - fingerprint: 峰值配对哈希，生成指纹令牌序列

pub mod decoder;
pub mod fingerprint;
pub mod format;
pub mod spectrum;
