//! 로그 보관 정리
//!
//! 디렉토리의 파일을 수정 시간 역순으로 정렬하고 최근 `history_size + 1`개만 남깁니다.
//! (방금 순환된 파일과 새로 열린 파일이 함께 남도록 하나를 더 보관)

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::DiagError;

/// 정리 결과
#[derive(Debug, Default)]
pub struct PruneReport {
    /// 남겨진 파일 수
    pub kept: usize,
    /// 삭제된 파일 경로
    pub deleted: Vec<PathBuf>,
    /// 개별 실패 (목록 읽기 실패 또는 삭제 실패)
    pub failures: Vec<DiagError>,
}

impl PruneReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 보관 개수를 넘는 오래된 로그 파일 삭제
///
/// `dir`이 비어 있거나 `history_size`가 음수면 아무 것도 하지 않습니다.
/// 삭제 하나가 실패해도 나머지 삭제는 계속 시도합니다.
pub async fn prune_logs(dir: &Path, history_size: i64) -> PruneReport {
    let mut report = PruneReport::default();

    if dir.as_os_str().is_empty() || history_size < 0 {
        return report;
    }

    let entries = match list_by_modified(dir).await {
        Ok(entries) => entries,
        Err(source) => {
            warn!(dir = %dir.display(), error = %source, "로그 디렉토리 읽기 실패");
            report.failures.push(DiagError::DirectoryList {
                dir: dir.to_path_buf(),
                source,
            });
            return report;
        }
    };

    let keep = usize::try_from(history_size)
        .unwrap_or(usize::MAX)
        .saturating_add(1);

    for (index, path) in entries.into_iter().enumerate() {
        if index < keep {
            report.kept += 1;
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(_) => {
                debug!(path = %path.display(), "오래된 로그 파일 삭제됨");
                report.deleted.push(path);
            }
            Err(source) => {
                warn!(path = %path.display(), error = %source, "로그 파일 삭제 실패");
                report.failures.push(DiagError::Delete { path, source });
            }
        }
    }

    report
}

/// 디렉토리 항목을 최근 수정 순으로 나열
///
/// 수정 시간이 같으면 디렉토리 나열 순서를 유지합니다.
pub async fn list_by_modified(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let modified = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, entry.path()));
    }

    files.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// 수정 시간이 `age_secs`초 전인 파일 생성
    fn touch(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).expect("Test assertion failed");
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(mtime).expect("Test assertion failed");
        path
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("Test assertion failed")
            .map(|e| e.expect("Test assertion failed").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_keeps_history_plus_one_newest() {
        let temp_dir = TempDir::new().expect("Test assertion failed");
        for (i, name) in ["a.log", "b.log", "c.log", "d.log", "e.log", "f.log"].iter().enumerate() {
            // a가 가장 최근, f가 가장 오래됨
            touch(temp_dir.path(), name, (i as u64 + 1) * 3600);
        }

        let report = prune_logs(temp_dir.path(), 2).await;

        assert!(report.is_clean());
        assert_eq!(report.kept, 3);
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(remaining(temp_dir.path()), vec!["a.log", "b.log", "c.log"]);
    }

    #[tokio::test]
    async fn test_fewer_files_than_history() {
        let temp_dir = TempDir::new().expect("Test assertion failed");
        touch(temp_dir.path(), "a.log", 10);
        touch(temp_dir.path(), "b.log", 20);

        let report = prune_logs(temp_dir.path(), 3).await;

        assert_eq!(report.kept, 2);
        assert!(report.deleted.is_empty());
        assert_eq!(remaining(temp_dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_zero_history_keeps_only_newest() {
        let temp_dir = TempDir::new().expect("Test assertion failed");
        touch(temp_dir.path(), "new.log", 1);
        touch(temp_dir.path(), "old.log", 7200);
        touch(temp_dir.path(), "older.log", 9000);

        prune_logs(temp_dir.path(), 0).await;

        assert_eq!(remaining(temp_dir.path()), vec!["new.log"]);
    }

    #[tokio::test]
    async fn test_negative_history_disables_pruning() {
        let temp_dir = TempDir::new().expect("Test assertion failed");
        for i in 0..5 {
            touch(temp_dir.path(), &format!("{}.log", i), i * 100);
        }

        let report = prune_logs(temp_dir.path(), -1).await;

        assert_eq!(report.kept, 0);
        assert!(report.deleted.is_empty());
        assert_eq!(remaining(temp_dir.path()).len(), 5);
    }

    #[tokio::test]
    async fn test_empty_dir_path_is_noop() {
        let report = prune_logs(Path::new(""), 3).await;
        assert!(report.is_clean());
        assert_eq!(report.kept, 0);
    }

    #[tokio::test]
    async fn test_missing_directory_reports_failure() {
        let temp_dir = TempDir::new().expect("Test assertion failed");
        let report = prune_logs(&temp_dir.path().join("missing"), 3).await;

        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], DiagError::DirectoryList { .. }));
    }
}
