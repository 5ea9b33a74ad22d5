//! Модуль для отслеживания прогресса выполнения
//!
//! Обновления отправляются по каналу tokio. Канал необязателен: без него
//! конвейер работает так же, только молча.

use tokio::sync::mpsc::Sender;

/// Обновление прогресса для отправки клиенту
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Началась обработка
    Started,
    /// Чтение и проверка субтитров
    ParsingSubtitles,
    /// Синтез речи для субтитра
    Synthesizing {
        /// Количество уже обработанных субтитров
        current: usize,
        /// Общее количество субтитров
        total: usize,
    },
    /// Размещение сегментов на временной шкале
    Placing,
    /// Сведение пакета сегментов
    MixingBatch {
        /// Номер пакета, с единицы
        index: usize,
        /// Общее количество пакетов
        total: usize,
    },
    /// Объединение пакетов в мастер-дорожку
    MergingBatches,
    /// Нормализация громкости
    Normalizing {
        /// Удался ли двухпроходный loudnorm
        two_pass: bool,
    },
    /// Кодирование итоговых файлов
    Encoding,
    /// Обработка завершена
    Finished,
}

/// Асинхронно отправляет обновление прогресса
pub async fn send_progress(sender: &Option<Sender<ProgressUpdate>>, update: ProgressUpdate) {
    if let Some(sender) = sender {
        let _ = sender.send(update).await;
    }
}
