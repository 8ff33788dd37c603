//! LogSink port - 構造化ログの書き込み先
//!
//! 1 イベント = 1 行。シリアライズ済みの JSON 行を受け取るだけで、
//! 書式の判断はしません。

use std::io;

pub trait LogSink: Send + Sync {
    /// Write one already-serialized record. `line` carries no trailing newline.
    fn write_line(&self, line: &str) -> io::Result<()>;
}
