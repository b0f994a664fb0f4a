//! PTY 输出读取器、输入写线程与退出监控
//!
//! 每个进程恰好一个读取任务、一个写线程和一个退出监控任务。
//! 写入 PTY 可能无限期阻塞（子进程不读 stdin 时），所以写入只入队，由写线程完成。
//! 读取任务把原始字节交给回调；退出监控在子进程结束后等待读取任务排空剩余输出，
//! 再调用退出回调，保证退出事件排在最后一段输出之后。

use std::io::{Read, Write};
use std::sync::mpsc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::local::{ChildWaiter, ExitInfo};

/// 输出读取器配置
#[derive(Debug, Clone)]
pub struct OutputReaderConfig {
    /// 读取缓冲区大小
    pub buffer_size: usize,
    /// 进程退出后等待输出排空的最长时间
    pub drain_timeout: Duration,
}

impl Default for OutputReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            drain_timeout: Duration::from_millis(250),
        }
    }
}

/// 读取任务结束信号
pub struct ReaderDone(mpsc::Receiver<()>);

/// 启动 PTY 输出读取器
///
/// 读到 EOF 或出错时结束；Linux 上子进程退出后读取 master 会返回 EIO，同样视为结束。
pub fn start_output_reader<F>(
    terminal_id: String,
    mut reader: Box<dyn Read + Send>,
    config: &OutputReaderConfig,
    mut on_chunk: F,
) -> (JoinHandle<()>, ReaderDone)
where
    F: FnMut(&[u8]) + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let buffer_size = config.buffer_size;

    let handle = tokio::task::spawn_blocking(move || {
        let mut buffer = vec![0u8; buffer_size];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => {
                    tracing::debug!("PTY 输出 EOF: {}", terminal_id);
                    break;
                }
                Ok(n) => {
                    tracing::trace!("读取 PTY 输出 {}: {} bytes", terminal_id, n);
                    on_chunk(&buffer[..n]);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::debug!("读取 PTY 输出结束 {}: {}", terminal_id, e);
                    break;
                }
            }
        }

        drop(done_tx);
        tracing::debug!("输出读取器退出: {}", terminal_id);
    });

    (handle, ReaderDone(done_rx))
}

/// 写线程的入队端；线程结束后发送失败
#[derive(Debug, Clone)]
pub struct InputSender(mpsc::Sender<Vec<u8>>);

impl InputSender {
    /// 入队，不等待写入完成
    pub fn send(&self, data: &[u8]) -> bool {
        self.0.send(data.to_vec()).is_ok()
    }
}

/// 启动输入写线程
///
/// 使用独立线程而不是阻塞线程池：卡住的写入不能拖住运行时关闭。
/// 所有入队端被丢弃或写入出错时结束。
pub fn start_input_writer(terminal_id: String, mut writer: Box<dyn Write + Send>) -> InputSender {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let name = format!("pty-input-{}", terminal_id);

    let spawned = std::thread::Builder::new().name(name).spawn(move || {
        for data in rx {
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                tracing::debug!("写入终端失败 {}: {}", terminal_id, e);
                break;
            }
        }
        tracing::debug!("输入写线程退出: {}", terminal_id);
    });
    if let Err(e) = spawned {
        tracing::warn!("无法启动输入写线程: {}", e);
    }

    InputSender(tx)
}

/// 启动退出监控
pub fn start_exit_monitor<F>(
    terminal_id: String,
    waiter: Box<dyn ChildWaiter>,
    reader_done: ReaderDone,
    config: &OutputReaderConfig,
    on_exit: F,
) -> JoinHandle<()>
where
    F: FnOnce(ExitInfo) + Send + 'static,
{
    let drain_timeout = config.drain_timeout;

    tokio::task::spawn_blocking(move || {
        let exit = waiter.wait();
        tracing::info!("进程退出 {}: {:?}", terminal_id, exit.exit_code);

        // 读取端关闭（发送方被丢弃）或超时都继续
        let _ = reader_done.0.recv_timeout(drain_timeout);

        on_exit(exit);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    struct ImmediateExit(u32);

    impl ChildWaiter for ImmediateExit {
        fn wait(self: Box<Self>) -> ExitInfo {
            ExitInfo {
                exit_code: Some(self.0),
            }
        }
    }

    #[tokio::test]
    async fn test_output_reader_with_data() {
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(b"Hello, World!".to_vec()));
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();

        let (handle, _done) = start_output_reader(
            "test-session".to_string(),
            reader,
            &OutputReaderConfig::default(),
            move |chunk| sink.lock().unwrap().extend_from_slice(chunk),
        );

        handle.await.unwrap();
        assert_eq!(collected.lock().unwrap().as_slice(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_output_reader_small_buffer_preserves_order() {
        let data: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(data.clone()));
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();

        let config = OutputReaderConfig {
            buffer_size: 7,
            ..Default::default()
        };
        let (handle, _done) = start_output_reader("t".to_string(), reader, &config, move |chunk| {
            sink.lock().unwrap().extend_from_slice(chunk)
        });

        handle.await.unwrap();
        assert_eq!(*collected.lock().unwrap(), data);
    }

    #[tokio::test]
    async fn test_exit_after_output_drained() {
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(b"last words".to_vec()));
        let events = Arc::new(Mutex::new(Vec::<String>::new()));

        let sink = events.clone();
        let config = OutputReaderConfig::default();
        let (_reader, done) = start_output_reader("t".to_string(), reader, &config, move |chunk| {
            sink.lock()
                .unwrap()
                .push(String::from_utf8_lossy(chunk).to_string())
        });

        let sink = events.clone();
        let monitor = start_exit_monitor(
            "t".to_string(),
            Box::new(ImmediateExit(7)),
            done,
            &config,
            move |exit| sink.lock().unwrap().push(format!("exit:{:?}", exit.exit_code)),
        );

        monitor.await.unwrap();
        let events = events.lock().unwrap();
        assert_eq!(events.last().unwrap(), "exit:Some(7)");
        assert_eq!(events.concat(), "last wordsexit:Some(7)");
    }
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_input_writer_preserves_order() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let input = start_input_writer("t".to_string(), Box::new(SharedSink(sink.clone())));

        assert!(input.send(b"ab"));
        assert!(input.send(b"cd"));

        for _ in 0..100 {
            if sink.lock().unwrap().len() == 4 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sink.lock().unwrap().as_slice(), b"abcd");
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_input_writer_stops_after_error() {
        let input = start_input_writer("t".to_string(), Box::new(BrokenPipe));
        assert!(input.send(b"x"));

        let mut closed = false;
        for _ in 0..100 {
            if !input.send(b"y") {
                closed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(closed);
    }
}
