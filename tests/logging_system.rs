//! 日志系统集成测试
//!
//! 全局订阅器在进程内只能安装一次, 因此所有断言集中在一个测试中.

use std::fs;

use chrono::Local;
use tao_es::logging::{init, LoggingConfig};

#[test]
fn test_初始化创建目录并维护历史日志() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("logs");
    fs::create_dir_all(&dir).unwrap();

    let expired = dir.join("test.2000-01-01.log");
    fs::write(&expired, b"old").unwrap();
    let yesterday = Local::now().date_naive().pred_opt().unwrap();
    let history = dir.join(format!("test.{}.log", yesterday.format("%Y-%m-%d")));
    fs::write(&history, b"history line\n").unwrap();
    let unrelated = dir.join("other.txt");
    fs::write(&unrelated, b"keep").unwrap();

    let config = LoggingConfig {
        level: "debug".to_string(),
        directory: dir.to_string_lossy().to_string(),
        file_prefix: "test".to_string(),
        retention_days: 7,
        compress_history: true,
    };
    init(config.clone()).unwrap();

    let today = dir.join(format!(
        "test.{}.log",
        Local::now().date_naive().format("%Y-%m-%d")
    ));
    assert!(today.exists(), "当日日志文件应已创建");
    assert!(!expired.exists(), "过期日志应被删除");
    assert!(!history.exists(), "历史日志应被压缩");
    assert!(history.with_extension("log.gz").exists());
    assert!(unrelated.exists());

    tracing::info!("日志系统测试");
    assert!(init(config).is_err(), "重复初始化应返回错误");
}
