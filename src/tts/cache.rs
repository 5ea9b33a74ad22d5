//! Модуль для кэширования результатов TTS
//!
//! Синтезированное аудио хранится на диске под ключом md5(движок, голос, текст),
//! так что повторный запуск по тем же субтитрам не обращается к движку.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::tts::{AudioContainer, SpeechSynthesizer, SynthesisError, SynthesizedSpeech};

/// Структура для управления кэшем
pub struct TtsCache {
    cache_dir: PathBuf,
}

impl TtsCache {
    /// Создать кэш, при необходимости создав директорию
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Генерировать ключ для кэша
    pub fn cache_key(engine: &str, voice: &str, text: &str) -> String {
        let mut hasher = md5::Context::new();
        hasher.consume(engine.as_bytes());
        hasher.consume([0u8]);
        hasher.consume(voice.as_bytes());
        hasher.consume([0u8]);
        hasher.consume(text.as_bytes());
        format!("{:x}", hasher.compute())
    }

    fn entry_path(&self, key: &str, container: AudioContainer) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", key, container.extension()))
    }

    /// Получить кэшированное аудио
    pub async fn get(&self, key: &str) -> Option<SynthesizedSpeech> {
        for container in [AudioContainer::Wav, AudioContainer::Mp3] {
            if let Ok(audio) = tokio::fs::read(self.entry_path(key, container)).await {
                if !audio.is_empty() {
                    return Some(SynthesizedSpeech {
                        audio,
                        container,
                    });
                }
            }
        }
        None
    }

    /// Добавить аудио в кэш.
    ///
    /// Запись идёт во временный файл в той же директории и завершается
    /// переименованием, так что `get` видит либо целую запись, либо никакой.
    pub async fn put(&self, key: &str, speech: &SynthesizedSpeech) -> Result<()> {
        let dir = self.cache_dir.clone();
        let path = self.entry_path(key, speech.container);
        let audio = speech.audio.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut entry = NamedTempFile::new_in(&dir)?;
            entry.write_all(&audio)?;
            entry.as_file().sync_all()?;
            entry.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
        Ok(())
    }
}

/// Движок-обёртка, который сначала смотрит в кэш
pub struct CachedSynthesizer {
    inner: Box<dyn SpeechSynthesizer>,
    cache: TtsCache,
}

impl CachedSynthesizer {
    pub fn new(inner: Box<dyn SpeechSynthesizer>, cache: TtsCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl SpeechSynthesizer for CachedSynthesizer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<SynthesizedSpeech, SynthesisError> {
        let key = TtsCache::cache_key(self.inner.name(), voice, text);
        if let Some(hit) = self.cache.get(&key).await {
            debug!("TTS cache hit for '{}'", text);
            return Ok(hit);
        }

        let speech = self.inner.synthesize(text, voice).await?;
        if let Err(e) = self.cache.put(&key, &speech).await {
            warn!("Failed to store TTS result in cache: {}", e);
        }
        Ok(speech)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSynth {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingSynth {
        fn name(&self) -> &str {
            "counting"
        }

        async fn synthesize(
            &self,
            text: &str,
            _voice: &str,
        ) -> std::result::Result<SynthesizedSpeech, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SynthesizedSpeech {
                audio: text.as_bytes().to_vec(),
                container: AudioContainer::Mp3,
            })
        }
    }

    #[test]
    fn test_key_depends_on_every_part() {
        let base = TtsCache::cache_key("e", "v", "t");
        assert_ne!(base, TtsCache::cache_key("e", "v2", "t"));
        assert_ne!(base, TtsCache::cache_key("e2", "v", "t"));
        assert_ne!(TtsCache::cache_key("e", "ab", "c"), TtsCache::cache_key("e", "a", "bc"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reader_never_sees_partial_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(TtsCache::new(dir.path()).unwrap());
        let key = TtsCache::cache_key("e", "v", "Yes.");
        let size = 16 * 1024 * 1024;
        let speech = SynthesizedSpeech {
            audio: vec![7u8; size],
            container: AudioContainer::Wav,
        };

        let writer = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.put(&key, &speech).await.unwrap() })
        };
        while !writer.is_finished() {
            if let Some(hit) = cache.get(&key).await {
                assert_eq!(hit.audio.len(), size);
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap().audio.len(), size);
        // временные файлы не остаются рядом с записью
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let synth = CachedSynthesizer::new(
            Box::new(CountingSynth { calls: calls.clone() }),
            TtsCache::new(dir.path()).unwrap(),
        );

        let first = synth.synthesize("hello", "en").await.unwrap();
        let second = synth.synthesize("hello", "en").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.audio, second.audio);
        assert_eq!(second.container, AudioContainer::Mp3);
    }
}
