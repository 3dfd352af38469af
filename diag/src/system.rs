//! diag 로깅 시스템
//!
//! 모든 구성 요소(싱크, 순환 스케줄러, 이메일 알림기)를 묶는 `Diag` 핸들입니다.
//! 기록 함수는 호출자를 막지 않으며(실제 파일 I/O 제외), 어떤 실패도 호출자에게
//! 전달하지 않습니다.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt::{Arguments, Display};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::config::{DiagConfig, SinkKind};
use crate::email::{EmailNotifier, Identity, MailTransport};
use crate::error::{DiagError, DiagResult};
use crate::formatter::{EventKind, Fields, LogEvent, STACK_MARKER};
use crate::rotation::{active_filename, Escalation, RotationReport, RotationScheduler, RotationTarget};
use crate::sink::{FileSink, SinkSet, TerminalSink};

/// 로깅 시스템 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagState {
    /// 기록 중
    Running,
    /// `close()` 이후, 파일 싱크 꺼짐 (터미널은 계속 동작)
    Closed,
}

/// 현재 호출 스택 캡처
pub fn capture_stack() -> String {
    std::backtrace::Backtrace::force_capture().to_string()
}

struct DiagInner {
    self_ref: Weak<DiagInner>,
    sinks: SinkSet,
    scheduler: Option<RotationScheduler>,
    history_size: AtomicI64,
    notifier: RwLock<Option<EmailNotifier>>,
    state: RwLock<DiagState>,
}

/// diag 로깅 핸들
///
/// 복제 비용이 작으며, 복제본은 모두 같은 싱크와 순환 타이머를 공유합니다.
#[derive(Clone)]
pub struct Diag {
    inner: Arc<DiagInner>,
}

impl Diag {
    /// 디렉토리, 파일 이름 템플릿, 싱크 플래그로 시작
    ///
    /// 파일 싱크는 `{directory}/plain/`, `{directory}/html/` 아래에 만들어집니다.
    pub fn start<P: Into<PathBuf>, S: Into<String>>(
        directory: P,
        filename_template: S,
        terminal: bool,
        plain: bool,
        html: bool,
    ) -> DiagResult<Self> {
        Self::from_config(DiagConfig::new(directory, filename_template, terminal, plain, html))
    }

    /// 설정으로 시작 (터미널은 표준 출력)
    pub fn from_config(config: DiagConfig) -> DiagResult<Self> {
        let terminal = if config.terminal {
            TerminalSink::stdout()
        } else {
            TerminalSink::disabled()
        };
        Self::build(config, terminal)
    }

    /// 설정과 임의의 터미널 작성기로 시작
    pub fn with_terminal_writer(
        config: DiagConfig,
        writer: Box<dyn Write + Send>,
    ) -> DiagResult<Self> {
        let terminal = if config.terminal {
            TerminalSink::with_writer(writer)
        } else {
            TerminalSink::disabled()
        };
        Self::build(config, terminal)
    }

    /// 설정 없이 사용될 때의 터미널 전용 구성
    ///
    /// 대체 구성을 사용한다는 경고를 한 번 남깁니다.
    pub fn minimal() -> Self {
        Self::minimal_with(TerminalSink::stdout())
    }

    fn minimal_with(terminal: TerminalSink) -> Self {
        let diag = Self::assemble(SinkSet::terminal_only(terminal), None, DiagConfig::default().history_size);
        warn!("diag 설정이 없어 터미널 출력만 사용");
        diag.warning(
            "diag",
            "package diag config not provided, assuming screen only output",
            Fields::none(),
        );
        diag
    }

    fn build(config: DiagConfig, terminal: TerminalSink) -> DiagResult<Self> {
        config.validate()?;

        if !config.wants_files() {
            return Ok(Self::assemble(SinkSet::terminal_only(terminal), None, config.history_size));
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DiagError::NoRuntime(format!("log rotation timer cannot be armed: {}", e))
        })?;

        let filename = active_filename(&config.filename_template);
        let open = |kind: SinkKind| -> DiagResult<FileSink> {
            if config.sink_enabled(kind) {
                FileSink::open(kind, config.sink_dir(kind), &filename)
            } else {
                Ok(FileSink::disabled(kind))
            }
        };
        let sinks = SinkSet::new(terminal, open(SinkKind::Plain)?, open(SinkKind::Html)?);

        let scheduler = RotationScheduler::new(config.filename_template.clone(), Local::now());
        let diag = Self::assemble(sinks, Some(scheduler), config.history_size);

        if let Some(scheduler) = &diag.inner.scheduler {
            scheduler.arm(&runtime, Arc::downgrade(&diag.inner));
        }

        info!(
            directory = %config.directory.display(),
            template = %config.filename_template,
            plain = config.plain,
            html = config.html,
            history_size = config.history_size,
            "diag 로깅 시작"
        );

        Ok(diag)
    }

    fn assemble(sinks: SinkSet, scheduler: Option<RotationScheduler>, history_size: i64) -> Self {
        let inner = Arc::new_cyclic(|self_ref| DiagInner {
            self_ref: self_ref.clone(),
            sinks,
            scheduler,
            history_size: AtomicI64::new(history_size),
            notifier: RwLock::new(None),
            state: RwLock::new(DiagState::Running),
        });
        Self { inner }
    }

    /// 다음 순환부터 적용될 보관 개수 변경 (음수면 정리 안 함)
    pub fn set_history_size(&self, size: i64) {
        self.inner.history_size.store(size, Ordering::SeqCst);
    }

    pub fn history_size(&self) -> i64 {
        self.inner.history_size.load(Ordering::SeqCst)
    }

    /// 메일 전송 구현체로 SOS 이메일 알림 설정
    pub fn set_email_notification<S: Into<String>>(
        &self,
        sender: Identity,
        recipient: Identity,
        subject_prefix: S,
        transport: Arc<dyn MailTransport>,
    ) {
        *self.inner.notifier.write() = Some(EmailNotifier::with_transport(
            sender,
            recipient,
            subject_prefix,
            transport,
        ));
    }

    /// 사용자 정의 전송 함수로 SOS 이메일 알림 설정
    pub fn set_email_notification_with_callback<S, F>(
        &self,
        sender: Identity,
        recipient: Identity,
        subject_prefix: S,
        send_proc: F,
    ) where
        S: Into<String>,
        F: Fn(&Identity, &Identity, &str, &str) + Send + Sync + 'static,
    {
        *self.inner.notifier.write() = Some(EmailNotifier::with_callback(
            sender,
            recipient,
            subject_prefix,
            Arc::new(send_proc),
        ));
    }

    /// 가공 없이 모든 싱크에 출력
    pub fn print<T: Display>(&self, message: T) {
        self.inner.emit(LogEvent::new(EventKind::Print, "", message.to_string(), Fields::none()));
    }

    /// `format_args!` 결과를 모든 싱크에 출력
    pub fn printf(&self, args: Arguments<'_>) {
        self.print(args);
    }

    pub fn debug(&self, name: &str, title: &str, fields: Fields) {
        self.inner.debug(name, title, fields);
    }

    pub fn note(&self, msg: &str, fields: Fields) {
        self.inner.emit(LogEvent::new(EventKind::Note, "", msg, fields));
    }

    /// 반전 색상 메모
    pub fn note2(&self, msg: &str, fields: Fields) {
        self.inner.emit(LogEvent::new(EventKind::Note2, "", msg, fields));
    }

    pub fn warning(&self, name: &str, title: &str, fields: Fields) {
        self.inner.emit(LogEvent::new(EventKind::Warning, name, title, fields));
    }

    pub fn error(&self, name: &str, title: &str, fields: Fields) {
        self.inner.error(name, title, fields);
    }

    /// 사람에게 즉시 알림 (이메일 후 ERROR 기록)
    ///
    /// 마지막 값이 `"stack"`이면 호출 스택으로 교체됩니다.
    pub fn sos(&self, name: &str, title: &str, fields: Fields) {
        self.inner.sos(name, title, fields);
    }

    /// 항상 호출 스택을 붙여서 SOS 기록
    pub fn sos_with_stack(&self, name: &str, title: &str, fields: Fields) {
        self.inner
            .escalate(name, title, fields.with_pair(STACK_MARKER, capture_stack()));
    }

    /// 파일 싱크 출력 종료 (터미널 출력은 유지)
    ///
    /// 대기 중인 순환 타이머도 취소합니다. 여러 번 호출해도 안전합니다.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.write();
            if *state == DiagState::Closed {
                return;
            }
            *state = DiagState::Closed;
        }

        self.debug("diag", "Closing log file output", Fields::none());

        match &self.inner.scheduler {
            Some(scheduler) => scheduler.shut_down(|| self.inner.sinks.close_files()),
            None => self.inner.sinks.close_files(),
        }

        debug!("diag 파일 출력 종료됨");
    }

    /// 즉시 로그 순환 실행
    ///
    /// 파일 싱크가 구성되지 않았거나 이미 닫혔으면 `None`을 반환합니다.
    pub async fn rotate_now(&self) -> Option<RotationReport> {
        if self.state() == DiagState::Closed {
            return None;
        }
        let scheduler = self.inner.scheduler.as_ref()?;
        let history_size = self.history_size();
        scheduler.rotate(&self.inner.sinks, history_size, &*self.inner).await
    }

    pub fn state(&self) -> DiagState {
        *self.inner.state.read()
    }

    /// 현재 로그 세션 시작 시각 (파일 싱크가 없으면 `None`)
    pub fn session_start(&self) -> Option<DateTime<Local>> {
        self.inner.scheduler.as_ref().map(|s| s.session_start())
    }

    /// 다음 순환 예정 시각
    pub fn next_rotation(&self) -> Option<DateTime<Local>> {
        if self.state() == DiagState::Closed {
            return None;
        }
        self.inner.scheduler.as_ref().map(|s| s.next_deadline())
    }

    /// 순환 타이머가 대기 중인지 여부
    pub fn rotation_armed(&self) -> bool {
        self.inner
            .scheduler
            .as_ref()
            .map_or(false, |s| s.is_armed())
    }

    /// 파일 싱크가 현재 기록 중인지 여부
    pub fn sink_active(&self, kind: SinkKind) -> bool {
        self.inner.sinks.file(kind).is_active()
    }

    /// 파일 싱크의 디렉토리
    pub fn sink_dir(&self, kind: SinkKind) -> &Path {
        self.inner.sinks.file(kind).dir()
    }
}

impl DiagInner {
    fn emit(&self, event: LogEvent) {
        for (target, err) in self.sinks.dispatch(&event) {
            warn!(sink = ?target, kind = event.kind.as_str(), error = %err, "로그 기록 실패");
        }
    }

    fn debug(&self, name: &str, title: &str, fields: Fields) {
        self.emit(LogEvent::new(EventKind::Debug, name, title, fields));
    }

    fn error(&self, name: &str, title: &str, fields: Fields) {
        self.emit(LogEvent::new(EventKind::Error, name, title, fields));
    }

    fn sos(&self, name: &str, title: &str, fields: Fields) {
        self.escalate(name, title, fields.replace_stack_marker(capture_stack));
    }

    fn escalate(&self, name: &str, title: &str, fields: Fields) {
        self.notify_email(name, title, &fields);
        self.emit(LogEvent::new(EventKind::Sos, name, title, fields));
    }

    fn notify_email(&self, name: &str, title: &str, fields: &Fields) {
        let notifier = self.notifier.read();
        let Some(notifier) = notifier.as_ref() else {
            return;
        };

        let self_ref = self.self_ref.clone();
        notifier.notify(name, title, fields, move |err| {
            let title = match err {
                DiagError::EmailValidation(_) => "Error validating email. Email send aborted.",
                _ => "Error sending email. Email send aborted.",
            };
            warn!(error = %err, "SOS 이메일 전송 실패");
            if let Some(inner) = self_ref.upgrade() {
                inner.error("diag", title, Fields::pairs([("err", err)]));
            }
        });
    }
}

impl Escalation for DiagInner {
    fn debug(&self, name: &str, title: &str, fields: Fields) {
        DiagInner::debug(self, name, title, fields);
    }

    fn sos(&self, name: &str, title: &str, fields: Fields) {
        DiagInner::sos(self, name, title, fields);
    }
}

#[async_trait]
impl RotationTarget for DiagInner {
    fn scheduler(&self) -> Option<&RotationScheduler> {
        self.scheduler.as_ref()
    }

    async fn run_rotation(&self, expected_start: DateTime<Local>) -> Option<RotationReport> {
        let scheduler = self.scheduler.as_ref()?;
        let history_size = self.history_size.load(Ordering::SeqCst);
        scheduler
            .rotate_session(Some(expected_start), &self.sinks, history_size, self)
            .await
    }
}

/// 전역 diag 인스턴스
static GLOBAL_DIAG: Lazy<RwLock<Option<Diag>>> = Lazy::new(|| RwLock::new(None));

/// 전역 인스턴스 설치 (이전 인스턴스는 파일 출력을 닫음)
pub fn install(diag: Diag) {
    let previous = GLOBAL_DIAG.write().replace(diag.clone());
    if let Some(previous) = previous {
        if !Arc::ptr_eq(&previous.inner, &diag.inner) {
            previous.close();
        }
    }
}

/// 전역 인스턴스를 설정으로 시작
pub fn init_global(config: DiagConfig) -> DiagResult<Diag> {
    let diag = Diag::from_config(config)?;
    install(diag.clone());
    Ok(diag)
}

/// 전역 인스턴스 가져오기
///
/// 설정된 적이 없으면 터미널 전용 구성으로 자동 초기화합니다.
pub fn global() -> Diag {
    if let Some(diag) = GLOBAL_DIAG.read().as_ref() {
        return diag.clone();
    }

    let mut slot = GLOBAL_DIAG.write();
    match slot.as_ref() {
        Some(diag) => diag.clone(),
        None => {
            let diag = Diag::minimal();
            *slot = Some(diag.clone());
            diag
        }
    }
}

/// 전역 인스턴스 시작 (디렉토리, 템플릿, 싱크 플래그)
pub fn start<P: Into<PathBuf>, S: Into<String>>(
    directory: P,
    filename_template: S,
    terminal: bool,
    plain: bool,
    html: bool,
) -> DiagResult<()> {
    init_global(DiagConfig::new(directory, filename_template, terminal, plain, html)).map(|_| ())
}

pub fn set_history_size(size: i64) {
    global().set_history_size(size);
}

pub fn print<T: Display>(message: T) {
    global().print(message);
}

pub fn printf(args: Arguments<'_>) {
    global().printf(args);
}

pub fn debug(name: &str, title: &str, fields: Fields) {
    global().debug(name, title, fields);
}

pub fn note(msg: &str, fields: Fields) {
    global().note(msg, fields);
}

pub fn note2(msg: &str, fields: Fields) {
    global().note2(msg, fields);
}

pub fn warning(name: &str, title: &str, fields: Fields) {
    global().warning(name, title, fields);
}

pub fn error(name: &str, title: &str, fields: Fields) {
    global().error(name, title, fields);
}

pub fn sos(name: &str, title: &str, fields: Fields) {
    global().sos(name, title, fields);
}

pub fn sos_with_stack(name: &str, title: &str, fields: Fields) {
    global().sos_with_stack(name, title, fields);
}

/// 전역 인스턴스의 파일 출력 종료
pub fn close() {
    if let Some(diag) = GLOBAL_DIAG.read().as_ref() {
        diag.close();
    }
}
