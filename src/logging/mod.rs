//! 日志系统.
//!
//! 控制台 (stderr, 彩色) 与按日期切分的文件两路输出.
//! 库 crate 通过 `log` 门面打印的记录在初始化时被桥接到 tracing.

use anyhow::{Context, Result, anyhow};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod maintenance;

/// 覆盖控制台过滤规则的环境变量
pub const CONSOLE_FILTER_ENV: &str = "TAO_LOG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 文件日志过滤规则, 如 `info` 或 `tao_packetizer=debug`
    #[serde(default = "default_level")]
    pub level: String,
    pub directory: String,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub compress_history: bool,
}

impl LoggingConfig {
    /// 以默认参数写入指定目录
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            level: default_level(),
            directory: directory.into(),
            file_prefix: default_file_prefix(),
            retention_days: default_retention_days(),
            compress_history: true,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "tao-es".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 初始化全局日志, 进程内只能成功调用一次
pub fn init(config: LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;
    maintenance::run(&config)?;

    let file_appender = CurrentFileWriter::new(config.clone())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = EnvFilter::try_from_env(CONSOLE_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let file_filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("日志级别无效, level={}", config.level))?;

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(ConsoleFormatter)
        .with_filter(console_filter);

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!("安装日志订阅器失败: {}", err))?;
    LOG_GUARD.set(guard).ok();

    Ok(())
}

/// 写入当日日志文件, 本地日期变化时切换到新文件并执行一次维护
struct CurrentFileWriter {
    config: LoggingConfig,
    date: NaiveDate,
    file: File,
}

impl CurrentFileWriter {
    fn new(config: LoggingConfig) -> Result<Self> {
        let date = Local::now().date_naive();
        let file_path = build_current_log_path(Path::new(&config.directory), &config.file_prefix, date);
        let file = open_append_file(&file_path)?;
        Ok(Self { config, date, file })
    }

    fn roll_over(&mut self, today: NaiveDate) -> std::io::Result<()> {
        let file_path =
            build_current_log_path(Path::new(&self.config.directory), &self.config.file_prefix, today);
        self.file = open_append_file(&file_path).map_err(std::io::Error::other)?;
        self.date = today;
        // 此处位于订阅器的写出路径上, 不能再经由 tracing 输出
        if let Err(err) = maintenance::run(&self.config) {
            eprintln!("日志翻滚后维护失败: {:#}", err);
        }
        Ok(())
    }
}

impl Write for CurrentFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let today = Local::now().date_naive();
        if today != self.date {
            self.roll_over(today)?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败, path={}", path.display()))
}

pub(crate) fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis()
        )?;
        let color = match *meta.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(
            writer,
            "{}{:5}\x1b[0m {} > ",
            color,
            meta.level().to_string(),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] {:5} {} > ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis(),
            meta.level().to_string(),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_当日日志路径() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 6);
        match date {
            Some(date) => {
                let path = build_current_log_path(Path::new("logs"), "tao-es", date);
                assert_eq!(path, PathBuf::from("logs/tao-es.2026-02-06.log"));
            }
            None => panic!("测试日期初始化失败"),
        }
    }

    #[test]
    fn test_跨日写入切换文件并维护() {
        let temp_dir = tempfile::tempdir().unwrap_or_else(|err| panic!("创建临时目录失败: {}", err));
        let mut config = LoggingConfig::new(temp_dir.path().to_string_lossy());
        config.file_prefix = "roll".to_string();

        let today = Local::now().date_naive();
        let yesterday = today.pred_opt().unwrap_or_else(|| panic!("无法计算前一天"));
        let old_path = build_current_log_path(temp_dir.path(), "roll", yesterday);
        let new_path = build_current_log_path(temp_dir.path(), "roll", today);

        let mut writer = CurrentFileWriter::new(config)
            .unwrap_or_else(|err| panic!("创建日志写入器失败: {}", err));
        writer.date = yesterday;
        writer.file = open_append_file(&old_path).unwrap_or_else(|err| panic!("打开失败: {}", err));
        std::fs::write(&old_path, b"old\n").unwrap_or_else(|err| panic!("写入失败: {}", err));

        writer
            .write_all(b"new\n")
            .unwrap_or_else(|err| panic!("写入日志失败: {}", err));
        writer.flush().unwrap_or_else(|err| panic!("刷新失败: {}", err));

        assert_eq!(writer.date, today);
        let text = std::fs::read_to_string(&new_path).unwrap_or_else(|err| panic!("读取失败: {}", err));
        assert_eq!(text, "new\n");
        assert!(!old_path.exists(), "前一天的日志应被压缩");
        assert!(PathBuf::from(format!("{}.gz", old_path.display())).exists());
    }

    #[test]
    fn test_配置反序列化默认值() {
        let config: LoggingConfig = serde_json::from_str(r#"{"directory":"logs"}"#)
            .unwrap_or_else(|err| panic!("解析日志配置失败: {}", err));
        assert_eq!(config.level, "info");
        assert_eq!(config.file_prefix, "tao-es");
        assert_eq!(config.retention_days, 30);
        assert!(config.compress_history);
    }
}
