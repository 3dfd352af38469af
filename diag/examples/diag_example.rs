//! diag 로깅 사용 예제
//!
//! 터미널/파일 기록, SOS 이메일, 수동 순환을 차례로 보여줍니다.

use anyhow::Result;
use diag::{identity, Diag, DiagConfig, Fields};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("diag=debug")),
        )
        .init();

    println!("📝 예제 1: 심각도별 기록");
    let log = severity_example()?;

    println!("\n🚨 예제 2: SOS 이메일 알림");
    sos_example(&log).await;

    println!("\n🔄 예제 3: 수동 로그 순환");
    rotation_example(&log).await;

    println!("\n🌐 예제 4: 전역 함수");
    global_example();

    log.close();
    println!("\n✅ 완료! logs/plain, logs/html 디렉토리를 확인하세요.");
    Ok(())
}

/// 예제 1: 모든 심각도로 기록
fn severity_example() -> Result<Diag> {
    let mut config = DiagConfig::new("./logs", "example{}.log", true, true, true);
    config.history_size = 5;

    let log = Diag::from_config(config)?;

    log.print("가공 없는 한 줄");
    log.printf(format_args!("포트 {}에서 대기", 50051));
    log.debug("db", "연결됨", Fields::pairs([("host", "localhost"), ("port", "5432")]));
    log.note("배포 시작", Fields::value("v1.2.3"));
    log.note2("눈에 띄는 메모", Fields::none());
    log.warning("disk", "남은 공간 부족", Fields::pairs([("free", "8%")]));
    log.error("api", "요청 실패", Fields::from_flat(["status", "503", "retry", "3"]));

    Ok(log)
}

/// 예제 2: 사용자 정의 전송 함수로 SOS 이메일 받기
async fn sos_example(log: &Diag) {
    log.set_email_notification_with_callback(
        identity("diag", "diag@example.com"),
        identity("운영팀", "ops@example.com"),
        "example",
        |_sender, recipient, subject, _body| {
            println!("   ✉ {:?} 에게 메일: {}", recipient.get("email"), subject);
        },
    );

    log.sos("worker", "작업 중단", Fields::from_flat(["job", "42", "trace", "stack"]));
    log.sos_with_stack("worker", "복구 불가", Fields::none());

    // 이메일 전송은 백그라운드에서 실행됨
    sleep(Duration::from_millis(200)).await;
}

/// 예제 3: 정오를 기다리지 않고 순환
async fn rotation_example(log: &Diag) {
    if let Some(next) = log.next_rotation() {
        println!("   다음 자동 순환: {}", next);
    }

    if let Some(report) = log.rotate_now().await {
        println!("   일반 로그: {:?}", report.plain);
        println!("   HTML 로그: {:?}", report.html);
        println!("   삭제된 보관 파일: {}", report.plain_pruned.deleted.len());
    }
}

/// 예제 4: 전역 인스턴스 (설정 전이면 터미널 전용으로 자동 초기화)
fn global_example() {
    diag::note("전역 메모", Fields::none());
    diag::warning("global", "전역 경고", Fields::value("설정 없이 사용됨"));
}
