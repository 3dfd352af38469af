//! diag 에러 정의
//!
//! 설정 오류만 호출자에게 전달되고, 나머지는 모두 내부에서 복구됩니다.
//! (에스컬레이션 로그 기록 또는 해당 싱크 비활성화)

use std::path::PathBuf;
use thiserror::Error;

/// diag 크레이트 통합 에러 타입
#[derive(Error, Debug)]
pub enum DiagError {
    /// 시작 시 디렉토리/경로 설정 오류
    #[error("설정 오류: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// 파일 싱크 생성/이름 변경/쓰기 실패
    #[error("싱크 I/O 오류 ({}): {source}", path.display())]
    SinkIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 보관 정리 중 디렉토리 목록 읽기 실패
    #[error("디렉토리 읽기 실패 ({}): {source}", dir.display())]
    DirectoryList {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 보관 정리 중 파일 삭제 실패
    #[error("파일 삭제 실패 ({}): {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 이메일 발신자/수신자 정보 누락
    #[error("이메일 유효성 검사 실패: {0}")]
    EmailValidation(String),

    /// 이메일 전송 실패
    #[error("이메일 전송 실패: {0}")]
    EmailDelivery(String),

    /// 평면 key/value 목록의 길이가 홀수
    #[error("key/value 목록 길이가 홀수임: {0}")]
    OddFieldCount(usize),

    /// 순환 타이머를 실행할 tokio 런타임이 없음
    #[error("tokio 런타임이 필요함: {0}")]
    NoRuntime(String),
}

impl DiagError {
    /// 원인 없는 설정 오류 생성
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// I/O 원인이 있는 설정 오류 생성
    pub fn config_io<S: Into<String>>(message: S, source: std::io::Error) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source),
        }
    }

    /// 호출자에게 전달되어야 하는 에러인지 여부
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::NoRuntime(_) | Self::OddFieldCount(_)
        )
    }
}

/// Result 타입 별칭
pub type DiagResult<T> = Result<T, DiagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DiagError::config("bad dir").is_fatal());
        assert!(DiagError::OddFieldCount(3).is_fatal());
        assert!(!DiagError::EmailValidation("no sender".into()).is_fatal());

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = DiagError::Delete {
            path: PathBuf::from("/tmp/app.log"),
            source: io,
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("/tmp/app.log"));
    }
}
