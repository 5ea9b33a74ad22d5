//! Модуль для работы с временными файлами
//!
//! Все промежуточные файлы запуска живут в одной временной директории,
//! которая удаляется при уничтожении `ScratchDir`, в том числе при ошибке.

use std::path::{Path, PathBuf};

use log::info;
use tempfile::TempDir;

use crate::error::Result;

/// Временная директория одного запуска
pub struct ScratchDir {
    /// `None` только во время `Drop`
    temp_dir: Option<TempDir>,
    path: PathBuf,
    /// Оставить файлы после завершения
    keep: bool,
}

impl ScratchDir {
    /// Создать новый экземпляр ScratchDir внутри `base` или в системной
    /// временной директории
    pub fn new(base: Option<&Path>, keep: bool) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("subtts_");
        let temp_dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        let path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_dir: Some(temp_dir),
            path,
            keep,
        })
    }

    /// Путь к директории
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Поддиректория, создаётся при первом обращении
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.path.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(temp_dir) = self.temp_dir.take() {
            if self.keep {
                #[allow(deprecated)]
                let kept = temp_dir.into_path();
                info!("Temporary files kept in {}", kept.display());
            }
        }
    }
}
