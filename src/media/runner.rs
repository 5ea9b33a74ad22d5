//! Запуск внешнего аудиоинструмента
//!
//! Всё, что делает ffmpeg (изменение темпа, сведение, измерение громкости,
//! перекодирование, замена дорожки в видео), описывается как `FilterJob` и
//! выполняется через `FilterGraphRunner`. Конвейер не знает формата командной
//! строки конкретного инструмента.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;
use tokio::process::Command;

use crate::error::{Result, SubTtsError};

/// Сколько последних байт stderr сохраняется в ошибке
const DIAGNOSTICS_TAIL: usize = 4000;

/// Граф фильтров
#[derive(Debug, Clone, PartialEq)]
pub enum FilterGraph {
    /// Цепочка для единственного входа (`-af`)
    Simple(String),
    /// Граф для нескольких входов с именованным выходом (`-filter_complex`)
    Complex { graph: String, output_label: String },
}

/// Куда пишется результат
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    File(PathBuf),
    /// Результат отбрасывается, нужна только диагностика
    Null,
}

/// Задание для внешнего инструмента: входы, граф, параметры выхода
#[derive(Debug, Clone, PartialEq)]
pub struct FilterJob {
    pub inputs: Vec<PathBuf>,
    pub filter: Option<FilterGraph>,
    pub maps: Vec<String>,
    pub output_args: Vec<String>,
    pub output: OutputTarget,
}

impl FilterJob {
    pub fn new(output: OutputTarget) -> Self {
        Self {
            inputs: Vec::new(),
            filter: None,
            maps: Vec::new(),
            output_args: Vec::new(),
            output,
        }
    }

    pub fn to_file<P: AsRef<Path>>(path: P) -> Self {
        Self::new(OutputTarget::File(path.as_ref().to_path_buf()))
    }

    pub fn input<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.inputs.push(path.as_ref().to_path_buf());
        self
    }

    pub fn simple_filter(mut self, chain: impl Into<String>) -> Self {
        self.filter = Some(FilterGraph::Simple(chain.into()));
        self
    }

    pub fn complex_filter(mut self, graph: impl Into<String>, output_label: impl Into<String>) -> Self {
        self.filter = Some(FilterGraph::Complex {
            graph: graph.into(),
            output_label: output_label.into(),
        });
        self
    }

    pub fn map(mut self, spec: impl Into<String>) -> Self {
        self.maps.push(spec.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Моно 24 кГц, как все промежуточные файлы конвейера
    pub fn pipeline_format(self) -> Self {
        self.args([
            "-ac".to_string(),
            crate::config::consts::CHANNELS.to_string(),
            "-ar".to_string(),
            crate::config::consts::SAMPLE_RATE.to_string(),
        ])
    }

    pub fn output_path(&self) -> Option<&Path> {
        match &self.output {
            OutputTarget::File(path) => Some(path),
            OutputTarget::Null => None,
        }
    }
}

/// Вывод успешно завершившегося процесса
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Внешний процесс не запустился или завершился с ошибкой
#[derive(Debug, Clone, Error)]
#[error("{program} failed ({}): {diagnostics}", status_text(.status))]
pub struct ProcessError {
    pub program: String,
    /// Код выхода; `None`, если процесс не запустился или был убит сигналом
    pub status: Option<i32>,
    /// Собственная диагностика процесса
    pub diagnostics: String,
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "not started or terminated".to_string(),
    }
}

/// Выполнить граф фильтров над входами и записать выход
#[async_trait]
pub trait FilterGraphRunner: Send + Sync {
    async fn run(&self, job: &FilterJob) -> std::result::Result<ProcessOutput, ProcessError>;
}

/// Реализация через ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    program: PathBuf,
}

impl FfmpegRunner {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// Использовать заданный путь или найти ffmpeg в PATH
    pub fn locate(configured: Option<&Path>) -> Result<Self> {
        match configured {
            Some(path) if path.is_file() => Ok(Self::new(path)),
            Some(path) => Err(SubTtsError::FileNotFound(format!(
                "ffmpeg not found at {}",
                path.display()
            ))),
            None => which::which("ffmpeg").map(Self::new).map_err(|e| {
                SubTtsError::FileNotFound(format!("ffmpeg is not available in PATH: {}", e))
            }),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Командная строка ffmpeg для задания
    pub fn build_args(job: &FilterJob) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];

        for input in &job.inputs {
            args.push("-i".into());
            args.push(input.to_string_lossy().replace('\\', "/"));
        }

        match &job.filter {
            Some(FilterGraph::Simple(chain)) => {
                args.push("-af".into());
                args.push(chain.clone());
            }
            Some(FilterGraph::Complex { graph, output_label }) => {
                args.push("-filter_complex".into());
                args.push(graph.clone());
                args.push("-map".into());
                args.push(format!("[{}]", output_label));
            }
            None => {}
        }

        for map in &job.maps {
            args.push("-map".into());
            args.push(map.clone());
        }

        args.extend(job.output_args.iter().cloned());

        match &job.output {
            OutputTarget::File(path) => args.push(path.to_string_lossy().to_string()),
            OutputTarget::Null => {
                args.extend(["-f".to_string(), "null".to_string(), "-".to_string()]);
            }
        }

        args
    }
}

#[async_trait]
impl FilterGraphRunner for FfmpegRunner {
    async fn run(&self, job: &FilterJob) -> std::result::Result<ProcessOutput, ProcessError> {
        let program = self.program.to_string_lossy().to_string();
        let args = Self::build_args(job);
        debug!("Executing: {} {}", program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProcessError {
                program: program.clone(),
                status: None,
                diagnostics: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(ProcessError {
                program,
                status: output.status.code(),
                diagnostics: tail(&stderr, DIAGNOSTICS_TAIL).to_string(),
            });
        }

        Ok(ProcessOutput { stdout, stderr })
    }
}

fn tail(text: &str, max_bytes: usize) -> &str {
    let text = text.trim_end();
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
