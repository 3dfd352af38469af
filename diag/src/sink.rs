//! 출력 싱크
//!
//! 터미널, 일반 텍스트 파일, HTML 파일 핸들과 이벤트 종류별 라우팅을 담당합니다.
//! 각 핸들은 뮤텍스로 보호되며, 이벤트 하나는 잠금을 잡은 채 한 번에 기록되므로
//! 동시에 기록해도 한 싱크 안에서 줄이 섞이지 않습니다.

use parking_lot::Mutex;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::SinkKind;
use crate::error::{DiagError, DiagResult};
use crate::formatter::{FormatStyle, LogEvent, LogFormatter};

/// 로그 디렉토리 권한 (rwxrwxr-x)
pub const DIR_MODE: u32 = 0o775;

/// 싱크 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkTarget {
    Terminal,
    File(SinkKind),
}

/// 로그 디렉토리 생성 (상위 디렉토리 포함)
pub fn create_log_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir)
}

/// 터미널 싱크
pub struct TerminalSink {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl TerminalSink {
    /// 표준 출력으로 기록하는 싱크
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    /// 임의의 작성기로 기록하는 싱크
    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
        }
    }

    /// 비활성 싱크
    pub fn disabled() -> Self {
        Self {
            writer: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// 한 줄 기록, 비활성 상태면 아무 것도 하지 않음
    pub fn write_line(&self, line: &str) -> std::io::Result<bool> {
        let mut guard = self.writer.lock();
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(terminated(line).as_bytes())?;
                writer.flush()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// 파일 기반 싱크
///
/// 핸들이 `None`이면 싱크가 꺼진 상태이며 기록은 조용히 무시됩니다.
pub struct FileSink {
    kind: SinkKind,
    dir: PathBuf,
    path: Mutex<Option<PathBuf>>,
    file: Mutex<Option<File>>,
}

impl FileSink {
    /// 디렉토리를 만들고 `dir/filename` 파일을 새로 생성
    pub fn open(kind: SinkKind, dir: PathBuf, filename: &str) -> DiagResult<Self> {
        create_log_dir(&dir).map_err(|e| {
            DiagError::config_io(format!("cannot create log directory {}", dir.display()), e)
        })?;

        let path = dir.join(filename);
        let file = File::create(&path).map_err(|e| {
            DiagError::config_io(format!("cannot create log file {}", path.display()), e)
        })?;

        debug!(sink = kind.as_str(), path = %path.display(), "로그 파일 생성됨");

        Ok(Self {
            kind,
            dir,
            path: Mutex::new(Some(path)),
            file: Mutex::new(Some(file)),
        })
    }

    /// 비활성 싱크
    pub fn disabled(kind: SinkKind) -> Self {
        Self {
            kind,
            dir: PathBuf::new(),
            path: Mutex::new(None),
            file: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    /// 싱크 디렉토리 (비활성 싱크는 빈 경로)
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 현재 열린 파일 경로
    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.file.lock().is_some()
    }

    /// 한 줄 기록, 비활성 상태면 `Ok(false)`
    pub fn write_line(&self, line: &str) -> DiagResult<bool> {
        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => {
                file.write_all(terminated(line).as_bytes())
                    .map_err(|source| DiagError::SinkIo {
                        path: self.path().unwrap_or_else(|| self.dir.clone()),
                        source,
                    })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 활성 핸들을 떼어냄, 이후 기록은 무시됨
    pub fn detach(&self) -> Option<(File, PathBuf)> {
        let file = self.file.lock().take()?;
        let path = self.path.lock().take()?;
        Some((file, path))
    }

    /// 새 핸들을 활성 싱크로 연결
    pub fn attach(&self, file: File, path: PathBuf) {
        *self.path.lock() = Some(path);
        *self.file.lock() = Some(file);
    }

    /// 핸들을 닫고 싱크를 끔, 열려 있었으면 `true`
    pub fn close(&self) -> bool {
        match self.detach() {
            Some((mut file, _)) => {
                let _ = file.flush();
                true
            }
            None => false,
        }
    }
}

fn terminated(line: &str) -> String {
    if line.ends_with('\n') {
        line.to_string()
    } else {
        format!("{}\n", line)
    }
}

/// 세 출력 싱크 묶음
pub struct SinkSet {
    pub terminal: TerminalSink,
    pub plain: FileSink,
    pub html: FileSink,
    xterm_fmt: LogFormatter,
    plain_fmt: LogFormatter,
    html_fmt: LogFormatter,
}

impl SinkSet {
    pub fn new(terminal: TerminalSink, plain: FileSink, html: FileSink) -> Self {
        Self {
            terminal,
            plain,
            html,
            xterm_fmt: LogFormatter::new(FormatStyle::Xterm),
            plain_fmt: LogFormatter::new(FormatStyle::Plain),
            html_fmt: LogFormatter::new(FormatStyle::Html),
        }
    }

    /// 터미널만 사용하는 싱크 묶음
    pub fn terminal_only(terminal: TerminalSink) -> Self {
        Self::new(
            terminal,
            FileSink::disabled(SinkKind::Plain),
            FileSink::disabled(SinkKind::Html),
        )
    }

    pub fn file(&self, kind: SinkKind) -> &FileSink {
        match kind {
            SinkKind::Plain => &self.plain,
            SinkKind::Html => &self.html,
        }
    }

    /// 이벤트를 터미널, 일반 파일, HTML 파일 순으로 기록
    ///
    /// 한 싱크의 실패는 다른 싱크 기록을 막지 않으며, 실패 목록으로 반환됩니다.
    pub fn dispatch(&self, event: &LogEvent) -> Vec<(SinkTarget, DiagError)> {
        let mut failures = Vec::new();

        if let Some(line) = self.xterm_fmt.format(event) {
            if let Err(e) = self.terminal.write_line(&line) {
                failures.push((
                    SinkTarget::Terminal,
                    DiagError::SinkIo {
                        path: PathBuf::from("<terminal>"),
                        source: e,
                    },
                ));
            }
        }

        for (sink, formatter) in [(&self.plain, &self.plain_fmt), (&self.html, &self.html_fmt)] {
            if !sink.is_active() {
                continue;
            }
            if let Some(line) = formatter.format(event) {
                if let Err(e) = sink.write_line(&line) {
                    failures.push((SinkTarget::File(sink.kind()), e));
                }
            }
        }

        failures
    }

    /// 파일 싱크를 모두 닫음
    pub fn close_files(&self) {
        self.plain.close();
        self.html.close();
    }
}

/// 메모리 내 작성기 (테스트 및 터미널 대체용)
#[derive(Clone, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 기록된 내용
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
