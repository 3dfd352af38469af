//! 로그 파일 순환 관리
//!
//! 세션 시작 다음 날 정오(로컬 시간)에 로그를 순환합니다.
//! 순환은 한 번에 하나만 실행되며, 전체 순서가 끝난 뒤에 다음 타이머가 설정됩니다.
//!
//! 순환 순서:
//! 1. 닫는 시각 DEBUG 기록
//! 2. 일반 파일 싱크 분리 → 닫기 → 타임스탬프 이름으로 변경
//! 3. 기본 이름으로 새 파일 생성 후 다시 연결
//! 4. HTML 싱크 닫기 (다시 열지 않음)
//! 5. 새 세션 시작 시각 기록, 타이머 재설정
//! 6. 여는 시각 DEBUG 기록
//! 7. 일반/HTML 디렉토리 보관 정리

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::TEMPLATE_PLACEHOLDER;
use crate::error::DiagError;
use crate::formatter::{ansic, Fields};
use crate::retention::{prune_logs, PruneReport};
use crate::sink::{FileSink, SinkSet};

/// 보관 파일 이름에 붙는 타임스탬프 형식
pub const ARCHIVE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// 순환 시각 (로컬 시간 기준 시)
pub const ROTATION_HOUR: u32 = 12;

/// 순환 중 발생한 일을 기록하는 통로
pub trait Escalation: Send + Sync {
    fn debug(&self, name: &str, title: &str, fields: Fields);
    fn sos(&self, name: &str, title: &str, fields: Fields);
}

/// 타이머가 순환을 요청하는 대상
#[async_trait]
pub trait RotationTarget: Send + Sync {
    fn scheduler(&self) -> Option<&RotationScheduler>;
    /// `expected_start` 세션이 아직 현재 세션일 때만 순환
    async fn run_rotation(&self, expected_start: DateTime<Local>) -> Option<RotationReport>;
}

/// 현재(활성) 로그 파일 이름
pub fn active_filename(template: &str) -> String {
    template.replacen(TEMPLATE_PLACEHOLDER, "", 1)
}

/// 보관 로그 파일 이름
pub fn archive_filename(template: &str, session_start: &DateTime<Local>) -> String {
    let stamp = format!("_{}", session_start.format(ARCHIVE_STAMP_FORMAT));
    template.replacen(TEMPLATE_PLACEHOLDER, &stamp, 1)
}

/// 다음 순환 시각: 세션 시작 24시간 뒤 날짜의 정오
pub fn next_rotation_deadline(start: &DateTime<Local>) -> DateTime<Local> {
    let next = *start + chrono::Duration::hours(24);
    next.date_naive()
        .and_hms_opt(ROTATION_HOUR, 0, 0)
        .and_then(|noon| Local.from_local_datetime(&noon).earliest())
        .unwrap_or(next)
}

/// 지금부터 기한까지 남은 시간 (지났으면 0)
pub fn delay_until(deadline: &DateTime<Local>, now: &DateTime<Local>) -> Duration {
    (*deadline - *now).to_std().unwrap_or(Duration::ZERO)
}

/// 싱크별 순환 결과
#[derive(Debug)]
pub enum SinkRotation {
    /// 순환 전부터 꺼져 있던 싱크
    Inactive,
    /// 보관 파일로 이름을 바꾸고 새 파일을 다시 열었음
    Reopened { archived: PathBuf, active: PathBuf },
    /// 닫기만 했음 (HTML)
    Closed,
    /// 실패로 싱크가 꺼졌음
    Stopped(DiagError),
}

/// 순환 한 번의 결과
#[derive(Debug)]
pub struct RotationReport {
    pub closed_at: DateTime<Local>,
    pub opened_at: DateTime<Local>,
    pub plain: SinkRotation,
    pub html: SinkRotation,
    pub plain_pruned: PruneReport,
    pub html_pruned: PruneReport,
}

/// 로그 순환 스케줄러
pub struct RotationScheduler {
    template: String,
    session_start: Mutex<DateTime<Local>>,
    in_flight: tokio::sync::Mutex<()>,
    rearm: Arc<Notify>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// 종료 여부, 싱크 재연결과 종료 처리가 이 잠금으로 서로 배제됨
    closed: Mutex<bool>,
}

impl RotationScheduler {
    /// 새 스케줄러 생성 (타이머는 `arm`으로 따로 시작)
    pub fn new<S: Into<String>>(template: S, session_start: DateTime<Local>) -> Self {
        Self {
            template: template.into(),
            session_start: Mutex::new(session_start),
            in_flight: tokio::sync::Mutex::new(()),
            rearm: Arc::new(Notify::new()),
            timer: Mutex::new(None),
            closed: Mutex::new(false),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// 현재 세션 시작 시각
    pub fn session_start(&self) -> DateTime<Local> {
        *self.session_start.lock()
    }

    /// 현재 세션 기준 다음 순환 시각
    pub fn next_deadline(&self) -> DateTime<Local> {
        next_rotation_deadline(&self.session_start())
    }

    /// 타이머가 설정되어 있는지 여부
    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// 순환 타이머 시작
    ///
    /// 대상이 해제되면 타이머도 스스로 끝납니다.
    pub fn arm<T: RotationTarget + 'static>(&self, handle: &tokio::runtime::Handle, target: Weak<T>) {
        let task = handle.spawn(timer_loop(target));
        if let Some(previous) = self.timer.lock().replace(task) {
            previous.abort();
        }
        debug!(deadline = %self.next_deadline(), "로그 순환 타이머 설정됨");
    }

    /// 대기 중인 타이머 취소
    pub fn cancel(&self) {
        if let Some(task) = self.timer.lock().take() {
            task.abort();
            debug!("로그 순환 타이머 취소됨");
        }
    }

    /// 타이머를 멈추고 `close_files`로 파일 싱크를 닫음
    ///
    /// 이후 진행 중이던 순환은 싱크를 다시 연결하지 않고, 새 순환은 시작되지 않습니다.
    pub fn shut_down<F: FnOnce()>(&self, close_files: F) {
        let mut closed = self.closed.lock();
        *closed = true;
        self.cancel();
        close_files();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// 순환 한 번 실행
    ///
    /// 싱크 하나의 실패는 해당 싱크만 끄고, 다른 싱크의 순환이나
    /// 타이머 재설정을 막지 않습니다. 종료된 뒤에는 `None`을 반환합니다.
    pub async fn rotate(
        &self,
        sinks: &SinkSet,
        history_size: i64,
        escalation: &dyn Escalation,
    ) -> Option<RotationReport> {
        self.rotate_session(None, sinks, history_size, escalation).await
    }

    /// `expected_start` 세션이 현재 세션일 때만 순환
    ///
    /// 기다리는 동안 다른 순환이 먼저 끝났으면 `None`을 반환합니다.
    pub async fn rotate_session(
        &self,
        expected_start: Option<DateTime<Local>>,
        sinks: &SinkSet,
        history_size: i64,
        escalation: &dyn Escalation,
    ) -> Option<RotationReport> {
        let _in_flight = self.in_flight.lock().await;

        if self.is_closed() {
            return None;
        }

        let closed_at = self.session_start();
        if let Some(expected) = expected_start {
            if expected != closed_at {
                debug!(expected = %expected, current = %closed_at, "이미 순환된 세션, 건너뜀");
                return None;
            }
        }

        escalation.debug(
            "diag",
            "Rotating logs",
            Fields::pairs([("closing time stamp", ansic(&closed_at))]),
        );

        let plain = self.rotate_plain(&sinks.plain, &closed_at, escalation).await;

        let html = if sinks.html.close() {
            SinkRotation::Closed
        } else {
            SinkRotation::Inactive
        };

        let opened_at = Local::now();
        *self.session_start.lock() = opened_at;
        self.rearm.notify_waiters();

        escalation.debug(
            "diag",
            "New log started",
            Fields::pairs([("opening time stamp", ansic(&opened_at))]),
        );

        let plain_pruned = prune_logs(sinks.plain.dir(), history_size).await;
        let html_pruned = prune_logs(sinks.html.dir(), history_size).await;
        for failure in plain_pruned.failures.iter().chain(html_pruned.failures.iter()) {
            let title = match failure {
                DiagError::DirectoryList { .. } => "Error cleaning log directory",
                _ => "Error deleting old log file",
            };
            escalation.sos("diag", title, Fields::pairs([("err", failure)]));
        }

        info!(
            closed_at = %closed_at,
            opened_at = %opened_at,
            plain_deleted = plain_pruned.deleted.len(),
            html_deleted = html_pruned.deleted.len(),
            "로그 순환 완료"
        );

        Some(RotationReport {
            closed_at,
            opened_at,
            plain,
            html,
            plain_pruned,
            html_pruned,
        })
    }

    async fn rotate_plain(
        &self,
        sink: &FileSink,
        closed_at: &DateTime<Local>,
        escalation: &dyn Escalation,
    ) -> SinkRotation {
        let Some((file, path)) = sink.detach() else {
            return SinkRotation::Inactive;
        };
        drop(file);

        let archived = sink.dir().join(archive_filename(&self.template, closed_at));
        if let Err(source) = fs::rename(&path, &archived).await {
            escalation.sos(
                "diag",
                "Error renaming plain log file. Plain logging stopped.",
                Fields::pairs([("msg", &source)]),
            );
            return SinkRotation::Stopped(DiagError::SinkIo { path, source });
        }

        let active = sink.dir().join(active_filename(&self.template));
        self.reopen_plain(sink, archived, active, escalation).await
    }

    /// 새 활성 파일을 만들어 싱크에 다시 연결
    async fn reopen_plain(
        &self,
        sink: &FileSink,
        archived: PathBuf,
        active: PathBuf,
        escalation: &dyn Escalation,
    ) -> SinkRotation {
        match fs::File::create(&active).await {
            Ok(file) => {
                let file = file.into_std().await;
                let closed = self.closed.lock();
                if *closed {
                    return SinkRotation::Closed;
                }
                sink.attach(file, active.clone());
                drop(closed);

                debug!(archived = %archived.display(), active = %active.display(), "일반 로그 파일 순환됨");
                SinkRotation::Reopened { archived, active }
            }
            Err(source) => {
                escalation.sos(
                    "diag",
                    "Error creating plain log file. Plain logging stopped.",
                    Fields::pairs([("msg", &source)]),
                );
                SinkRotation::Stopped(DiagError::SinkIo {
                    path: active,
                    source,
                })
            }
        }
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.timer.get_mut().take() {
            task.abort();
        }
    }
}

async fn timer_loop<T: RotationTarget + 'static>(target: Weak<T>) {
    loop {
        let Some(strong) = target.upgrade() else {
            return;
        };
        let Some(scheduler) = strong.scheduler() else {
            return;
        };
        let rearm = scheduler.rearm.clone();
        let notified = rearm.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let expected_start = scheduler.session_start();
        let deadline = next_rotation_deadline(&expected_start);
        drop(strong);

        let delay = delay_until(&deadline, &Local::now());
        debug!(deadline = %deadline, delay_secs = delay.as_secs(), "다음 로그 순환 대기");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut notified => continue,
        }

        let Some(strong) = target.upgrade() else {
            return;
        };
        strong.run_rotation(expected_start).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("Test assertion failed")
    }

    #[test]
    fn test_filenames() {
        let start = Local
            .with_ymd_and_hms(2026, 10, 17, 9, 5, 3)
            .single()
            .expect("Test assertion failed");
        assert_eq!(active_filename("app{}.log"), "app.log");
        assert_eq!(archive_filename("app{}.log", &start), "app_20261017_090503_000.log");
        // 첫 번째 토큰만 치환
        assert_eq!(active_filename("a{}b{}"), "ab{}");
    }

    #[test]
    fn test_deadline_is_noon_next_day() {
        let cases = [
            (local(2026, 10, 17, 9, 5), local(2026, 10, 18, 12, 0)),
            (local(2026, 10, 17, 23, 30), local(2026, 10, 18, 12, 0)),
            (local(2026, 10, 17, 12, 0), local(2026, 10, 18, 12, 0)),
            (local(2026, 10, 17, 0, 1), local(2026, 10, 18, 12, 0)),
            (local(2026, 12, 31, 18, 0), local(2027, 1, 1, 12, 0)),
        ];
        for (start, expected) in cases {
            let deadline = next_rotation_deadline(&start);
            assert_eq!(deadline, expected, "start = {}", start);
            assert_eq!(deadline.hour(), 12);
            assert_eq!(deadline.minute(), 0);
        }
    }

    #[test]
    fn test_delay_until() {
        let now = local(2026, 10, 17, 9, 0);
        let deadline = next_rotation_deadline(&now);
        assert_eq!(delay_until(&deadline, &now), Duration::from_secs(27 * 3600));
        assert_eq!(delay_until(&now, &deadline), Duration::ZERO);
    }

    use crate::config::SinkKind;
    use crate::sink::TerminalSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// 순환 중 기록 요청을 모아두는 통로
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, String)>>,
    }

    impl Recorder {
        fn titles(&self, kind: &str) -> Vec<String> {
            self.events
                .lock()
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    impl Escalation for Recorder {
        fn debug(&self, _name: &str, title: &str, _fields: Fields) {
            self.events.lock().push(("debug", title.to_string()));
        }

        fn sos(&self, _name: &str, title: &str, _fields: Fields) {
            self.events.lock().push(("sos", title.to_string()));
        }
    }

    fn no_files() -> SinkSet {
        SinkSet::terminal_only(TerminalSink::disabled())
    }

    /// 타이머가 호출하는 순환 대상
    struct TimedTarget {
        scheduler: RotationScheduler,
        sinks: SinkSet,
        recorder: Recorder,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl RotationTarget for TimedTarget {
        fn scheduler(&self) -> Option<&RotationScheduler> {
            Some(&self.scheduler)
        }

        async fn run_rotation(&self, expected_start: DateTime<Local>) -> Option<RotationReport> {
            let report = self
                .scheduler
                .rotate_session(Some(expected_start), &self.sinks, -1, &self.recorder)
                .await;
            if report.is_some() {
                self.runs.fetch_add(1, Ordering::SeqCst);
            }
            report
        }
    }

    #[tokio::test]
    async fn test_timer_fires_and_rearms_from_new_session() {
        let past = Local::now() - chrono::Duration::days(3);
        let target = Arc::new(TimedTarget {
            scheduler: RotationScheduler::new("app{}.log", past),
            sinks: no_files(),
            recorder: Recorder::default(),
            runs: AtomicUsize::new(0),
        });

        // 지난 마감 시각이므로 바로 순환
        target
            .scheduler
            .arm(&tokio::runtime::Handle::current(), Arc::downgrade(&target));
        for _ in 0..200 {
            if target.runs.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(target.runs.load(Ordering::SeqCst), 1);
        let new_start = target.scheduler.session_start();
        assert!(new_start > past);
        assert_eq!(target.scheduler.next_deadline(), next_rotation_deadline(&new_start));
        assert!(target.scheduler.next_deadline() > Local::now());
        assert!(target.scheduler.is_armed());
        assert_eq!(target.recorder.titles("debug"), vec!["Rotating logs", "New log started"]);

        // 수동 순환은 타이머를 깨워 새 마감 시각으로 다시 대기시킴
        target
            .scheduler
            .rotate(&target.sinks, -1, &target.recorder)
            .await
            .expect("Test assertion failed");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(target.runs.load(Ordering::SeqCst), 1);
        assert!(target.scheduler.is_armed());

        target.scheduler.cancel();
        assert!(!target.scheduler.is_armed());
    }

    #[tokio::test]
    async fn test_superseded_session_is_skipped() {
        let start = Local::now() - chrono::Duration::days(1);
        let scheduler = RotationScheduler::new("app{}.log", start);
        let sinks = no_files();
        let recorder = Recorder::default();

        scheduler
            .rotate(&sinks, -1, &recorder)
            .await
            .expect("Test assertion failed");
        let current = scheduler.session_start();

        // 마감 직전에 수동 순환이 먼저 끝난 경우
        assert!(scheduler
            .rotate_session(Some(start), &sinks, -1, &recorder)
            .await
            .is_none());
        assert_eq!(scheduler.session_start(), current);
        assert_eq!(recorder.titles("debug").len(), 2);

        assert!(scheduler
            .rotate_session(Some(current), &sinks, -1, &recorder)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_reopen_failure_stops_plain() {
        let temp_dir = TempDir::new().expect("Test assertion failed");
        let plain_dir = temp_dir.path().join("plain");
        let sink = FileSink::open(SinkKind::Plain, plain_dir.clone(), "app.log")
            .expect("Test assertion failed");
        let scheduler = RotationScheduler::new("app{}.log", Local::now());
        let recorder = Recorder::default();

        let (file, path) = sink.detach().expect("Test assertion failed");
        drop(file);
        let archived = plain_dir.join("app_archived.log");
        std::fs::rename(&path, &archived).expect("Test assertion failed");

        let unreachable = temp_dir.path().join("missing").join("app.log");
        let result = scheduler
            .reopen_plain(&sink, archived.clone(), unreachable, &recorder)
            .await;

        assert!(matches!(result, SinkRotation::Stopped(DiagError::SinkIo { .. })));
        assert!(!sink.is_active());
        assert!(archived.exists());
        assert_eq!(
            recorder.titles("sos"),
            vec!["Error creating plain log file. Plain logging stopped."]
        );
    }

    #[tokio::test]
    async fn test_shut_down_blocks_reattach() {
        let temp_dir = TempDir::new().expect("Test assertion failed");
        let plain_dir = temp_dir.path().join("plain");
        let sink = FileSink::open(SinkKind::Plain, plain_dir.clone(), "app.log")
            .expect("Test assertion failed");
        let scheduler = RotationScheduler::new("app{}.log", Local::now());
        let recorder = Recorder::default();

        // 순환이 핸들을 분리한 사이에 종료됨
        let (file, path) = sink.detach().expect("Test assertion failed");
        drop(file);
        scheduler.shut_down(|| {
            sink.close();
        });
        assert!(scheduler.is_closed());

        let result = scheduler
            .reopen_plain(&sink, plain_dir.join("app_archived.log"), path, &recorder)
            .await;

        assert!(matches!(result, SinkRotation::Closed));
        assert!(!sink.is_active());
        assert!(scheduler
            .rotate(&SinkSet::terminal_only(TerminalSink::disabled()), -1, &recorder)
            .await
            .is_none());
    }

    #[test]
    fn test_session_start_tracking() {
        let start = local(2026, 10, 17, 9, 0);
        let scheduler = RotationScheduler::new("app{}.log", start);
        assert_eq!(scheduler.session_start(), start);
        assert_eq!(scheduler.next_deadline(), local(2026, 10, 18, 12, 0));
        assert!(!scheduler.is_armed());
        scheduler.cancel();
    }
}
