//! SOS 이메일 알림
//!
//! SOS 이벤트를 HTML 이메일로 만들어 비동기로 전송합니다.
//! 전송은 호출자를 막지 않으며, 실패는 호출자에게 전달되지 않고 콜백으로 보고됩니다.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::error::{DiagError, DiagResult};
use crate::formatter::{FieldLine, Fields};

/// 발신자/수신자 정보 ("identity", "email" 키 사용)
pub type Identity = HashMap<String, String>;

/// 사용자 정의 전송 함수: (발신자, 수신자, 제목, 본문)
pub type SendProc = Arc<dyn Fn(&Identity, &Identity, &str, &str) + Send + Sync>;

pub const IDENTITY_KEY: &str = "identity";
pub const EMAIL_KEY: &str = "email";

/// 이름과 주소로 Identity 생성
pub fn identity<N: Into<String>, E: Into<String>>(name: N, email: E) -> Identity {
    let mut id = Identity::new();
    id.insert(IDENTITY_KEY.to_string(), name.into());
    id.insert(EMAIL_KEY.to_string(), email.into());
    id
}

/// 메일 전송 구현체 (SMTP 클라이언트, HTTP API 등)
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

/// 전송할 이메일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub html_body: String,
    pub sender: Identity,
    /// (이름, 주소)
    pub reply_to: Option<(String, String)>,
    /// (이름, 주소) 목록
    pub to: Vec<(String, String)>,
}

impl Email {
    pub fn new<S: Into<String>, B: Into<String>>(subject: S, html_body: B) -> Self {
        Self {
            subject: subject.into(),
            html_body: html_body.into(),
            sender: Identity::new(),
            reply_to: None,
            to: Vec::new(),
        }
    }

    pub fn set_sender(&mut self, sender: &Identity) {
        self.sender = sender.clone();
    }

    pub fn set_reply_to(&mut self, name: &str, email: &str) {
        self.reply_to = Some((name.to_string(), email.to_string()));
    }

    pub fn add_to(&mut self, name: &str, email: &str) {
        self.to.push((name.to_string(), email.to_string()));
    }

    /// 발신자/수신자 정보가 모두 있는지 검사
    pub fn validate(&self) -> DiagResult<()> {
        if self.sender.get(EMAIL_KEY).map_or(true, |e| e.trim().is_empty()) {
            return Err(DiagError::EmailValidation("sender email is missing".into()));
        }
        if self.to.is_empty() {
            return Err(DiagError::EmailValidation("no recipients".into()));
        }
        for (name, email) in &self.to {
            if email.trim().is_empty() || !email.contains('@') {
                return Err(DiagError::EmailValidation(format!(
                    "invalid recipient address for '{}': '{}'",
                    name, email
                )));
            }
        }
        if self.subject.is_empty() {
            return Err(DiagError::EmailValidation("subject is empty".into()));
        }
        Ok(())
    }
}

enum Delivery {
    Callback(SendProc),
    Transport(Arc<dyn MailTransport>),
}

/// SOS 이메일 알림기
pub struct EmailNotifier {
    sender: Identity,
    recipient: Identity,
    subject_prefix: String,
    delivery: Delivery,
}

impl EmailNotifier {
    /// 메일 전송 구현체를 사용하는 알림기
    pub fn with_transport<S: Into<String>>(
        sender: Identity,
        recipient: Identity,
        subject_prefix: S,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            sender,
            recipient,
            subject_prefix: subject_prefix.into(),
            delivery: Delivery::Transport(transport),
        }
    }

    /// 사용자 정의 전송 함수를 사용하는 알림기
    pub fn with_callback<S: Into<String>>(
        sender: Identity,
        recipient: Identity,
        subject_prefix: S,
        send_proc: SendProc,
    ) -> Self {
        Self {
            sender,
            recipient,
            subject_prefix: subject_prefix.into(),
            delivery: Delivery::Callback(send_proc),
        }
    }

    /// "[prefix] name : title" 형식의 제목
    pub fn subject(&self, name: &str, title: &str) -> String {
        format!("[{}] {} : {}", self.subject_prefix, name, title)
    }

    /// 알림 전송 (비동기, 호출자를 막지 않음)
    ///
    /// 유효성 검사 실패와 전송 실패는 `on_failure`로 보고됩니다.
    pub fn notify<F>(&self, name: &str, title: &str, fields: &Fields, on_failure: F)
    where
        F: FnOnce(DiagError) + Send + 'static,
    {
        let subject = self.subject(name, title);
        let body = render_html_body(name, title, fields);

        match &self.delivery {
            Delivery::Callback(send_proc) => {
                let send_proc = send_proc.clone();
                let sender = self.sender.clone();
                let recipient = self.recipient.clone();
                detach(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        send_proc(&sender, &recipient, &subject, &body)
                    })
                    .await;
                    if let Err(e) = result {
                        warn!(error = %e, "이메일 전송 함수 실행 실패");
                    }
                });
            }
            Delivery::Transport(transport) => {
                let recipient_name = self.recipient.get(IDENTITY_KEY).cloned().unwrap_or_default();
                let recipient_email = self.recipient.get(EMAIL_KEY).cloned().unwrap_or_default();

                let mut email = Email::new(subject, body);
                email.set_sender(&self.sender);
                email.set_reply_to(&recipient_name, &recipient_email);
                email.add_to(&recipient_name, &recipient_email);

                if let Err(e) = email.validate() {
                    on_failure(e);
                    return;
                }

                let transport = transport.clone();
                detach(async move {
                    let subject = email.subject.clone();
                    match transport.send(email).await {
                        Ok(()) => debug!(subject = %subject, "SOS 이메일 전송됨"),
                        Err(e) => on_failure(DiagError::EmailDelivery(format!("{:#}", e))),
                    }
                });
            }
        }
    }
}

/// 런타임 밖에서 보내는 이메일이 함께 쓰는 런타임
static FALLBACK_RUNTIME: Lazy<Option<Runtime>> = Lazy::new(|| {
    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(4)
        .thread_name(FALLBACK_THREAD_NAME)
        .enable_all()
        .build()
    {
        Ok(rt) => Some(rt),
        Err(e) => {
            warn!(error = %e, "이메일 전송용 런타임 생성 실패");
            None
        }
    }
});

const FALLBACK_THREAD_NAME: &str = "diag-email";

/// 호출자를 막지 않고 작업 실행
///
/// tokio 런타임 안이면 그 런타임의 태스크로, 밖이면 공유 런타임에서 실행합니다.
fn detach<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => match FALLBACK_RUNTIME.as_ref() {
            Some(rt) => {
                rt.spawn(fut);
            }
            None => warn!("이메일 전송 런타임이 없어 전송 생략"),
        },
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_value(s: &str) -> String {
    escape_html(s).replace('\n', "<br>")
}

/// SOS 이메일 HTML 본문 생성
pub fn render_html_body(name: &str, title: &str, fields: &Fields) -> String {
    let mut params = String::new();
    for line in fields.lines() {
        match line {
            FieldLine::Single(v) => params.push_str(&html_value(v)),
            FieldLine::Pair(k, v) => params.push_str(&format!(
                "<strong>{}</strong> = {}<br>",
                html_value(k),
                html_value(v)
            )),
            FieldLine::Bullet => params.push('*'),
        }
        params.push_str("<br>\n");
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
</head>
<body>
<div style="font-family: monospace; font-size: 13px; color: maroon;">
{}<br><strong>{}</strong>
</div>
<hr>
<div style="font-family: monospace; font-size: 11px;">
{}</div>
</body>
</html>
"#,
        escape_html(name),
        escape_html(title),
        params
    )
}
