//! tao-packetize - 基本流分包工具
//!
//! 读取一个基本流文件, 按固定大小切成片段送入分包器, 输出得到的访问单元.
//! 切分大小与码流结构无关, 可用来观察分包器的重新同步行为.

mod report;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use tao_core::Rational;
use tao_es::logging::{self, LoggingConfig};
use tao_packetizer::{AccessUnit, CodecId, Fragment, StreamConfig};

use report::{Report, UnitInfo};

/// Tao 基本流分包工具
#[derive(Parser, Debug)]
#[command(name = "tao-packetize", version, about = "纯 Rust 基本流分包工具")]
struct Cli {
    /// 输入基本流文件
    input: PathBuf,

    /// 编码名称 (h264, hevc, mpeg2video, vc1, mjpeg, mp3, aac, aac_latm, truehd, flac ...)
    #[arg(short, long)]
    codec: CodecId,

    /// 编码私有配置数据文件 (avcC, AudioSpecificConfig, STREAMINFO ...)
    #[arg(long)]
    extradata: Option<PathBuf>,

    /// 每个输入片段的字节数
    #[arg(long, default_value_t = 4096, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: u64,

    /// 容器帧率, 如 25 或 30000/1001
    #[arg(long)]
    frame_rate: Option<Rational>,

    /// 首个片段携带的时间戳 (微秒)
    #[arg(long)]
    start_time: Option<i64>,

    /// 将访问单元负载依次写入该文件
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 静默模式 (只输出汇总)
    #[arg(short, long)]
    quiet: bool,

    /// 日志目录, 指定后日志同时写入按日期切分的文件
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// 日志详细程度 (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let data = std::fs::read(&cli.input)
        .with_context(|| format!("读取输入文件失败: {}", cli.input.display()))?;
    let mut config = StreamConfig::new(cli.codec);
    if let Some(path) = &cli.extradata {
        let extradata = std::fs::read(path)
            .with_context(|| format!("读取 extradata 失败: {}", path.display()))?;
        config = config.with_extradata(extradata);
    }
    if let Some(rate) = cli.frame_rate {
        config = config.with_frame_rate(rate);
    }

    let registry = tao_es::default_packetizer_registry();
    let mut packetizer = registry
        .create(&config)
        .with_context(|| format!("创建 {} 分包器失败", cli.codec))?;
    info!(
        "开始分包: input={}, codec={}, size={}, chunk_size={}",
        cli.input.display(),
        cli.codec,
        data.len(),
        cli.chunk_size
    );

    let mut output = match &cli.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("创建输出文件失败: {}", path.display()))?,
        )),
        None => None,
    };

    let chunk_size = usize::try_from(cli.chunk_size).context("片段大小超出范围")?;
    let mut units = Vec::new();
    let mut index = 0u64;
    let mut handle = |aus: Vec<AccessUnit>| -> Result<()> {
        for au in aus {
            if let Some(writer) = output.as_mut() {
                writer.write_all(&au.data).context("写入输出文件失败")?;
            }
            let info = UnitInfo::new(index, &au);
            if !cli.json && !cli.quiet {
                println!("{}", info.to_line());
            }
            units.push(info);
            index += 1;
        }
        Ok(())
    };

    for (i, chunk) in data.chunks(chunk_size).enumerate() {
        let mut fragment = Fragment::new(chunk.to_vec());
        if i == 0 {
            if let Some(ts) = cli.start_time {
                fragment = fragment.with_timestamps(ts, ts);
            }
        }
        handle(packetizer.push(fragment))?;
    }
    handle(packetizer.finish())?;
    if let Some(writer) = output.as_mut() {
        writer.flush().context("写入输出文件失败")?;
    }

    let stats = packetizer.stats();
    debug!("分包统计: {:?}", stats);
    if cli.json {
        let report = Report {
            codec: cli.codec.to_string(),
            input_bytes: data.len() as u64,
            units,
            stats: stats.into(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "共 {} 个访问单元, 拒绝伪同步 {} 次, 跳过 {} 字节, 丢弃单元 {} 个, 丢弃片段 {} 个",
            stats.emitted,
            stats.rejected,
            stats.skipped_bytes,
            stats.dropped_units,
            stats.dropped_fragments
        );
    }
    if let Some(extradata) = packetizer.extradata() {
        info!("解码器配置数据: {} 字节", extradata.len());
    }
    Ok(())
}

/// 默认使用 env_logger; 指定 `--log-dir` 时改用控制台 + 文件双输出
fn init_logging(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    match &cli.log_dir {
        Some(dir) => {
            let mut config = LoggingConfig::new(dir.to_string_lossy());
            config.level = level.to_string();
            config.file_prefix = "tao-packetize".to_string();
            logging::init(config)
        }
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
                .init();
            Ok(())
        }
    }
}
