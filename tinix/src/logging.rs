//! 日志原样打到 stderr：`[PageFault]`、`[Dev]` 等行会被回归测试逐字比对，
//! 不能附加任何装饰。

use log::Log;
use log::{LevelFilter, Metadata, Record};

struct Logger;

impl Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true // 允许全部级别的日志
    }

    fn log(&self, record: &Record) {
        eprintln!("{}", record.args());
    }

    fn flush(&self) {}
}

pub fn init() {
    static LOGGER: Logger = Logger;
    log::set_logger(&LOGGER).unwrap();

    // Info 是契约日志的级别，Debug 才打开逐条执行轨迹
    let level = std::env::var("LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LevelFilter::Info);
    log::set_max_level(level);
}
