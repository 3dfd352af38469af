//! diag 진단 로깅
//!
//! 사람이 읽기 좋은 색상 터미널 출력과 일반/HTML 파일 로그를 함께 남기는 로깅 라이브러리입니다.
//!
//! # 주요 기능
//! - **심각도별 기록**: DEBUG, NOTE, NOTE2, WARNING, ERROR, SOS, 가공 없는 PRINT
//! - **싱크 분리**: 터미널(xterm 색상), `plain/` 텍스트 파일, `html/` 파일
//! - **일일 순환**: 세션 시작 다음 날 정오에 일반 로그를 타임스탬프 이름으로 보관
//! - **자동 보관 정책**: 최근 `history_size + 1`개 파일만 유지
//! - **SOS 이메일**: 심각한 오류는 이메일로 즉시 알림 (전송 실패는 ERROR로 기록)
//!
//! # 사용 예시
//! ```rust,no_run
//! use diag::{Diag, Fields};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let log = Diag::start("./logs", "server{}.log", true, true, false)?;
//!
//!     log.debug("db", "연결됨", Fields::pairs([("host", "localhost")]));
//!     log.sos("db", "연결 끊김", Fields::from_flat(["err", "stack"]));
//!
//!     log.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod email;
pub mod error;
pub mod formatter;
pub mod retention;
pub mod rotation;
pub mod sink;
pub mod system;

pub use config::{DiagConfig, SinkKind};
pub use email::{identity, Email, EmailNotifier, Identity, MailTransport, SendProc};
pub use error::{DiagError, DiagResult};
pub use formatter::{EventKind, Fields, FormatStyle, LogEvent, LogFormatter};
pub use retention::{prune_logs, PruneReport};
pub use rotation::{RotationReport, SinkRotation};
pub use system::{
    close, debug, error, global, init_global, install, note, note2, print, printf,
    set_history_size, sos, sos_with_stack, start, warning, Diag, DiagState,
};

/// 환경변수 설정으로 전역 diag 초기화
///
/// `DIAG_*` 환경변수(`.env` 포함)를 읽어 시작하고 전역 인스턴스로 설치합니다.
///
/// # Examples
/// ```rust,no_run
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let log = diag::init_from_env()?;
///     log.note("서버 시작됨", diag::Fields::none());
///     Ok(())
/// }
/// ```
pub fn init_from_env() -> DiagResult<Diag> {
    init_global(DiagConfig::from_env())
}
