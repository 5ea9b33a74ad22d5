//! Модуль конфигурации библиотеки subtts
//!
//! Конфигурация передаётся в точку входа конвейера явно и после этого
//! только читается.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SubTtsError};

/// Фиксированные параметры конвейера
pub mod consts {
    /// Частота дискретизации всех промежуточных файлов
    pub const SAMPLE_RATE: u32 = 24_000;
    /// Промежуточные файлы всегда моно
    pub const CHANNELS: u16 = 1;

    /// Допуск, на который речь может выйти за окно субтитра (секунды)
    pub const FIT_TOLERANCE: f64 = 0.5;
    /// Речь короче этого значения не подгоняется (секунды)
    pub const MIN_MEANINGFUL_DURATION: f64 = 0.1;
    /// Минимальная длительность речи после подгонки (секунды)
    pub const MIN_ADJUSTED_DURATION: f64 = 0.5;

    /// Минимальный зазор до предыдущего сегмента (секунды)
    pub const MIN_GAP: f64 = 0.5;
    /// Сдвиг начала сегмента при слишком маленьком зазоре (секунды)
    pub const SHIFT_DELAY: f64 = 0.5;

    /// Максимум входов в одном вызове amix
    pub const MAX_INPUTS: usize = 100;
    /// Ослабление выходного сигнала amix
    pub const MIX_ATTENUATION: f64 = 0.25;

    /// Целевой уровень сегмента (dBFS)
    pub const SEGMENT_TARGET_DBFS: f64 = -20.0;
    /// Целевая интегральная громкость (LUFS)
    pub const LOUDNORM_I: f64 = -23.0;
    /// Потолок true peak (dB)
    pub const LOUDNORM_TP: f64 = -1.5;
    /// Диапазон громкости (LU)
    pub const LOUDNORM_LRA: f64 = 11.0;

    /// Порог компрессора (dB)
    pub const COMPRESSOR_THRESHOLD_DB: f64 = -24.0;
    pub const COMPRESSOR_RATIO: f64 = 4.0;
    /// Атака компрессора (мс)
    pub const COMPRESSOR_ATTACK_MS: f64 = 5.0;
    /// Восстановление компрессора (мс)
    pub const COMPRESSOR_RELEASE_MS: f64 = 50.0;

    /// Допустимое отклонение громкости оригинала от цели (dB)
    pub const DUB_LOUDNESS_TOLERANCE_DB: f64 = 3.0;
    /// Частота дискретизации при сведении с оригиналом
    pub const DUB_SAMPLE_RATE: u32 = 48_000;

    /// Битрейт итоговых MP3 и AAC
    pub const OUTPUT_BITRATE: &str = "192k";
}

/// Движок синтеза речи
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtsEngine {
    /// Локальный движок, запускаемый как внешняя программа
    #[default]
    Offline,
    /// Сетевой движок (OpenAI-совместимый API)
    Online,
}

impl TtsEngine {
    /// Получить строковое представление движка
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

/// Политика подгонки темпа речи под окно субтитра
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeedPolicy {
    /// Автоматически ускорять/замедлять речь
    pub auto_adjust_enabled: bool,
    /// Ограничивать коэффициент снизу
    pub slowdown_enabled: bool,
    /// Доля, на которую коэффициент может опуститься ниже 1 (0.0 - 1.0)
    pub slowdown_threshold: f64,
    /// Ограничивать коэффициент сверху
    pub speedup_enabled: bool,
    /// Доля, на которую коэффициент может подняться выше 1 (0.0 - 1.0)
    pub speedup_threshold: f64,
}

impl Default for SpeedPolicy {
    fn default() -> Self {
        Self {
            auto_adjust_enabled: true,
            slowdown_enabled: true,
            slowdown_threshold: 0.30,
            speedup_enabled: true,
            speedup_threshold: 0.50,
        }
    }
}

/// Параметры сведения с оригинальной дорожкой
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DubConfig {
    /// Изменение громкости оригинала (dB)
    pub original_volume_db: f64,
    /// Изменение громкости озвучки (dB)
    pub dubbed_volume_db: f64,
    /// Стереобаланс (-1.0 - 1.0)
    pub balance: f64,
}

impl Default for DubConfig {
    fn default() -> Self {
        Self {
            original_volume_db: -6.0,
            dubbed_volume_db: 7.0,
            balance: 0.0,
        }
    }
}

/// Настройки сетевого движка
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API ключ
    pub api_key: String,
    /// Модель TTS
    pub model: String,
    /// Базовый URL API
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "tts-1".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

/// Настройки локального движка.
///
/// В аргументах подставляются `{voice}`, `{output}` и `{text}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandEngineConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for CommandEngineConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".to_string(),
            args: ["-v", "{voice}", "-w", "{output}", "{text}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Конфигурация запуска
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubTtsConfig {
    /// Движок синтеза
    pub engine: TtsEngine,
    /// Идентификатор голоса
    pub voice: String,
    /// Файл словаря замен
    pub dictionary_path: Option<PathBuf>,
    /// Разрешить изменение длительности сегментов
    pub adjust_timing: bool,
    /// Политика подгонки темпа
    pub speed: SpeedPolicy,
    /// Максимальное количество одновременных запросов синтеза
    pub max_concurrent_synthesis: usize,
    /// Прерывать запуск при некорректных временных метках
    pub strict_timing: bool,
    /// Путь к ffmpeg (ищется в PATH, если не задан)
    pub ffmpeg_path: Option<PathBuf>,
    /// Добавлять rubberband к цепочке изменения темпа
    pub use_rubberband: bool,
    /// Двухпроходная нормализация loudnorm итогового файла
    pub final_loudnorm: bool,
    /// Сетевой движок
    pub openai: OpenAiConfig,
    /// Локальный движок
    pub offline: CommandEngineConfig,
    /// Директория для кэша синтеза
    pub cache_dir: Option<PathBuf>,
    /// Где создавать временные файлы запуска (системная директория, если не задано)
    pub temp_dir: Option<PathBuf>,
    /// Не удалять временные файлы после завершения
    pub keep_temp_files: bool,
    /// Сведение с оригиналом
    pub dub: DubConfig,
}

impl Default for SubTtsConfig {
    fn default() -> Self {
        Self {
            engine: TtsEngine::default(),
            voice: "en".to_string(),
            dictionary_path: None,
            adjust_timing: true,
            speed: SpeedPolicy::default(),
            max_concurrent_synthesis: 4,
            strict_timing: true,
            ffmpeg_path: None,
            use_rubberband: false,
            final_loudnorm: true,
            openai: OpenAiConfig::default(),
            offline: CommandEngineConfig::default(),
            cache_dir: None,
            temp_dir: None,
            keep_temp_files: false,
            dub: DubConfig::default(),
        }
    }
}

impl SubTtsConfig {
    /// Загрузить конфигурацию из JSON файла
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SubTtsError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Проверить значения конфигурации
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("slowdown_threshold", self.speed.slowdown_threshold),
            ("speedup_threshold", self.speed.speedup_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SubTtsError::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if !(-1.0..=1.0).contains(&self.dub.balance) {
            return Err(SubTtsError::Configuration(format!(
                "balance must be within [-1, 1], got {}",
                self.dub.balance
            )));
        }

        if self.max_concurrent_synthesis == 0 {
            return Err(SubTtsError::Configuration(
                "max_concurrent_synthesis must be at least 1".to_string(),
            ));
        }

        if self.engine == TtsEngine::Online && self.openai.api_key.trim().is_empty() {
            return Err(SubTtsError::Configuration(
                "API key is required for the online engine".to_string(),
            ));
        }

        if self.voice.trim().is_empty() {
            return Err(SubTtsError::Configuration("voice must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SubTtsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.speed.slowdown_threshold, 0.30);
        assert_eq!(config.speed.speedup_threshold, 0.50);
        assert_eq!(config.dub.original_volume_db, -6.0);
        assert_eq!(config.dub.dubbed_volume_db, 7.0);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = SubTtsConfig::default();
        config.speed.speedup_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = SubTtsConfig::default();
        config.dub.balance = -1.2;
        assert!(config.validate().is_err());

        let mut config = SubTtsConfig::default();
        config.max_concurrent_synthesis = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_online_engine_requires_key() {
        let config = SubTtsConfig {
            engine: TtsEngine::Online,
            ..SubTtsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SubTtsConfig =
            serde_json::from_str(r#"{"engine":"online","speed":{"speedup_threshold":0.2}}"#)
                .unwrap();
        assert_eq!(config.engine, TtsEngine::Online);
        assert_eq!(config.speed.speedup_threshold, 0.2);
        assert!(config.speed.slowdown_enabled);
        assert_eq!(config.max_concurrent_synthesis, 4);
    }
}
