//! diag 설정 관리
//!
//! 출력 싱크 구성, 로그 파일 이름 템플릿, 보관 개수 설정을 담당합니다.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{DiagError, DiagResult};

/// 파일 이름 템플릿의 치환 토큰
pub const TEMPLATE_PLACEHOLDER: &str = "{}";

/// 기본 보관 개수
pub const DEFAULT_HISTORY_SIZE: i64 = 3;

/// 파일 기반 싱크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkKind {
    /// 일반 텍스트 로그 파일
    Plain,
    /// HTML 로그 파일
    Html,
}

impl SinkKind {
    /// 싱크 이름 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Plain => "plain",
            SinkKind::Html => "html",
        }
    }

    /// 로그 디렉토리 아래 하위 디렉토리 이름
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }
}

/// diag 로깅 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagConfig {
    /// 로그 기본 디렉토리 (비어 있으면 파일 싱크 사용 안 함)
    pub directory: PathBuf,

    /// 파일 이름 템플릿, 예: "app{}.log"
    pub filename_template: String,

    /// 터미널 컬러 출력 여부 (기본값: true)
    pub terminal: bool,

    /// 일반 텍스트 파일 출력 여부 (기본값: false)
    pub plain: bool,

    /// HTML 파일 출력 여부 (기본값: false)
    pub html: bool,

    /// 순환 후 남길 이전 로그 개수 (기본값: 3, 음수면 정리 안 함)
    pub history_size: i64,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            filename_template: String::new(),
            terminal: true,
            plain: false,
            html: false,
            history_size: DEFAULT_HISTORY_SIZE,
        }
    }
}

impl DiagConfig {
    /// 디렉토리/템플릿과 싱크 플래그로 설정 생성
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        directory: P,
        filename_template: S,
        terminal: bool,
        plain: bool,
        html: bool,
    ) -> Self {
        Self {
            directory: directory.into(),
            filename_template: filename_template.into(),
            terminal,
            plain,
            html,
            ..Default::default()
        }
    }

    /// 터미널 전용 최소 설정
    pub fn terminal_only() -> Self {
        Self::default()
    }

    /// 환경변수에서 설정 로드
    ///
    /// `.env` 파일이 있으면 먼저 읽습니다.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(val) = std::env::var("DIAG_LOG_DIR") {
            config.directory = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("DIAG_LOG_FILENAME") {
            config.filename_template = val;
        }

        if let Ok(val) = std::env::var("DIAG_HISTORY_SIZE") {
            if let Ok(size) = val.parse() {
                config.history_size = size;
            }
        }

        if let Ok(val) = std::env::var("DIAG_TERMINAL") {
            config.terminal = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("DIAG_PLAIN") {
            config.plain = val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("DIAG_HTML") {
            config.html = val.to_lowercase() == "true";
        }

        config
    }

    /// 파일 싱크가 실제로 열려야 하는지 여부
    ///
    /// 디렉토리나 템플릿이 비어 있으면 파일 싱크는 조용히 꺼집니다.
    pub fn wants_files(&self) -> bool {
        (self.plain || self.html)
            && !self.directory.as_os_str().is_empty()
            && !self.filename_template.is_empty()
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> DiagResult<()> {
        if !self.wants_files() {
            return Ok(());
        }

        if !self.filename_template.contains(TEMPLATE_PLACEHOLDER) {
            return Err(DiagError::config(format!(
                "filename template must contain '{}': {}",
                TEMPLATE_PLACEHOLDER, self.filename_template
            )));
        }

        if self.directory.is_file() {
            return Err(DiagError::config(format!(
                "log directory is a regular file: {}",
                self.directory.display()
            )));
        }

        Ok(())
    }

    /// 지정된 싱크의 디렉토리 경로
    pub fn sink_dir(&self, kind: SinkKind) -> PathBuf {
        self.directory.join(kind.dir_name())
    }

    /// 지정된 싱크가 활성화되었는지 여부
    pub fn sink_enabled(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::Plain => self.plain,
            SinkKind::Html => self.html,
        }
    }
}
