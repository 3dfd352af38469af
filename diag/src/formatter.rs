//! 로그 포매터
//!
//! 이벤트를 싱크별 문자열(일반 텍스트, ANSI 컬러 터미널)로 변환합니다.
//! 모든 함수는 순수 함수이며 실패하지 않습니다.

use chrono::{DateTime, Local};
use std::fmt::Display;

use crate::error::{DiagError, DiagResult};

/// ANSI-C 형식 타임스탬프 (예: "Sat Oct 17 12:00:00 2026")
pub const ANSIC_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

const SEP: &str = "------------------------------------------------------------";
const SEP_SOS: &str = "============================================================";

/// 터미널 색상 코드
pub mod ansi {
    pub const WHITE: &str = "\x1b[37m";
    pub const CYAN: &str = "\x1b[36m";
    pub const BLUE: &str = "\x1b[94m";
    pub const YELLOW: &str = "\x1b[93m";
    pub const CLEAR: &str = "\x1b[0m";

    pub const INVERSE_WHITE: &str = "\x1b[7m\x1b[37m";
    pub const INVERSE_BLUE: &str = "\x1b[7m\x1b[94m";
    pub const INVERSE_YELLOW: &str = "\x1b[7m\x1b[93m";
    pub const INVERSE_RED: &str = "\x1b[7m\x1b[91m";
}

/// 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// 가공 없는 텍스트 출력
    Print,
    Debug,
    /// 짧은 메모
    Note,
    /// 반전 색상 메모
    Note2,
    Warning,
    Error,
    /// 사람에게 즉시 알려야 하는 오류 (이메일 + ERROR 기록)
    Sos,
}

impl EventKind {
    /// 이벤트 종류를 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Print => "PRINT",
            EventKind::Debug => "DEBUG",
            EventKind::Note => "NOTE",
            EventKind::Note2 => "NOTE2",
            EventKind::Warning => "WARNING",
            EventKind::Error => "ERROR",
            EventKind::Sos => "SOS",
        }
    }
}

/// 이벤트에 붙는 추가 값 목록
///
/// 값이 하나면 자유 형식 값으로, 그 외에는 (key, value) 쌍으로 출력됩니다.
/// key와 value가 모두 빈 문자열인 쌍은 빈 구분 줄(`*`)로 출력됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Fields {
    #[default]
    None,
    Value(String),
    Pairs(Vec<(String, String)>),
}

impl Fields {
    pub fn none() -> Self {
        Fields::None
    }

    /// 단일 자유 형식 값
    pub fn value<V: Display>(value: V) -> Self {
        Fields::Value(value.to_string())
    }

    /// 명시적인 (key, value) 쌍 목록
    pub fn pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        let pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if pairs.is_empty() {
            Fields::None
        } else {
            Fields::Pairs(pairs)
        }
    }

    /// 평면 값 목록을 변환 (레거시 호환)
    ///
    /// 길이 1이면 단일 값, 2 이상이면 0/1, 2/3 ... 순서로 쌍을 만들고
    /// 짝이 없는 마지막 값은 버립니다.
    pub fn from_flat<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        let mut values: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        match values.len() {
            0 => Fields::None,
            1 => Fields::Value(values.remove(0)),
            _ => {
                let mut pairs = Vec::with_capacity(values.len() / 2);
                let mut iter = values.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    pairs.push((k, v));
                }
                Fields::Pairs(pairs)
            }
        }
    }

    /// 평면 값 목록을 엄격하게 변환
    ///
    /// 길이가 1이 아닌 홀수면 `DiagError::OddFieldCount`를 반환합니다.
    pub fn try_from_flat<I, V>(values: I) -> DiagResult<Self>
    where
        I: IntoIterator<Item = V>,
        V: Display,
    {
        let values: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        if values.len() > 1 && values.len() % 2 == 1 {
            return Err(DiagError::OddFieldCount(values.len()));
        }
        Ok(Self::from_flat(values))
    }

    /// 쌍 하나를 뒤에 추가
    ///
    /// 단일 값이 있으면 `value` 키를 가진 쌍으로 바꾼 뒤 추가합니다.
    pub fn with_pair<K: Display, V: Display>(self, key: K, value: V) -> Self {
        let pair = (key.to_string(), value.to_string());
        match self {
            Fields::None => Fields::Pairs(vec![pair]),
            Fields::Value(v) => Fields::Pairs(vec![("value".to_string(), v), pair]),
            Fields::Pairs(mut pairs) => {
                pairs.push(pair);
                Fields::Pairs(pairs)
            }
        }
    }

    /// 마지막 값이 "stack" 이면 주어진 스택 트레이스로 교체 (레거시 호환)
    pub fn replace_stack_marker(self, trace: impl FnOnce() -> String) -> Self {
        match self {
            Fields::Value(v) if v == STACK_MARKER => Fields::Value(trace()),
            Fields::Pairs(mut pairs) => {
                if let Some(last) = pairs.last_mut() {
                    if last.1 == STACK_MARKER {
                        last.1 = trace();
                    }
                }
                Fields::Pairs(pairs)
            }
            other => other,
        }
    }

    /// 모든 값에 변환 함수 적용
    pub fn map_values<F: Fn(&str) -> String>(&self, f: F) -> Self {
        match self {
            Fields::None => Fields::None,
            Fields::Value(v) => Fields::Value(f(v)),
            Fields::Pairs(pairs) => {
                Fields::Pairs(pairs.iter().map(|(k, v)| (f(k), f(v))).collect())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Fields::None)
    }

    /// 출력용 줄 목록
    pub fn lines(&self) -> Vec<FieldLine<'_>> {
        match self {
            Fields::None => Vec::new(),
            Fields::Value(v) => vec![FieldLine::Single(v)],
            Fields::Pairs(pairs) => pairs
                .iter()
                .map(|(k, v)| {
                    if k.is_empty() && v.is_empty() {
                        FieldLine::Bullet
                    } else {
                        FieldLine::Pair(k, v)
                    }
                })
                .collect(),
        }
    }
}

/// SOS 값 목록에서 스택 트레이스를 요청하는 레거시 표식
pub const STACK_MARKER: &str = "stack";

/// 출력 단위로 분해된 값
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLine<'a> {
    Single(&'a str),
    Pair(&'a str, &'a str),
    /// 빈 구분 줄
    Bullet,
}

/// 구조화된 로그 이벤트
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// 발생 시각 (로컬 시간)
    pub timestamp: DateTime<Local>,
    pub kind: EventKind,
    /// 하위 시스템 이름 (NOTE/PRINT는 빈 문자열)
    pub name: String,
    /// 제목, NOTE는 메시지, PRINT는 출력할 텍스트
    pub title: String,
    pub fields: Fields,
}

impl LogEvent {
    /// 현재 시각으로 새 이벤트 생성
    pub fn new<N: Into<String>, T: Into<String>>(
        kind: EventKind,
        name: N,
        title: T,
        fields: Fields,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            name: name.into(),
            title: title.into(),
            fields,
        }
    }

    /// 타임스탬프 지정 (테스트용)
    pub fn at(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// 포매팅 스타일
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStyle {
    /// 일반 텍스트 파일
    Plain,
    /// ANSI 컬러 터미널
    Xterm,
    /// HTML 파일 (PRINT 외에는 아직 출력하지 않음)
    Html,
}

/// 로그 포매터
#[derive(Debug, Clone, Copy)]
pub struct LogFormatter {
    style: FormatStyle,
}

impl LogFormatter {
    /// 새 포매터 생성
    pub fn new(style: FormatStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> FormatStyle {
        self.style
    }

    /// 이벤트를 문자열로 포매팅
    ///
    /// 이 스타일에서 출력하지 않는 이벤트 종류면 `None`을 반환합니다.
    /// SOS는 ERROR 형식으로 기록됩니다.
    pub fn format(&self, event: &LogEvent) -> Option<String> {
        let t = &event.timestamp;
        let (name, title, fields) = (event.name.as_str(), event.title.as_str(), &event.fields);

        match (self.style, event.kind) {
            (_, EventKind::Print) => Some(event.title.clone()),
            (FormatStyle::Html, _) => None,

            (FormatStyle::Plain, EventKind::Debug) => Some(plain::debug(t, name, title, fields)),
            (FormatStyle::Plain, EventKind::Note | EventKind::Note2) => {
                Some(plain::note(t, title, fields))
            }
            (FormatStyle::Plain, EventKind::Warning) => {
                Some(plain::warning(t, name, title, fields))
            }
            (FormatStyle::Plain, EventKind::Error | EventKind::Sos) => {
                Some(plain::error(t, name, title, fields))
            }

            (FormatStyle::Xterm, EventKind::Debug) => Some(xterm::debug(name, title, fields)),
            (FormatStyle::Xterm, EventKind::Note) => Some(xterm::note(title, fields)),
            (FormatStyle::Xterm, EventKind::Note2) => Some(xterm::note2(title, fields)),
            (FormatStyle::Xterm, EventKind::Warning) => Some(xterm::warning(name, title, fields)),
            (FormatStyle::Xterm, EventKind::Error | EventKind::Sos) => {
                Some(xterm::error(name, title, fields))
            }
        }
    }
}

/// ANSI-C 형식 타임스탬프 문자열
pub fn ansic(t: &DateTime<Local>) -> String {
    t.format(ANSIC_FORMAT).to_string()
}

/// 일반 텍스트 파일용 포매팅
pub mod plain {
    use super::*;

    fn titled(t: &DateTime<Local>, sep: &str, header: String, fields: &Fields) -> String {
        let mut out = vec![sep.to_string(), ansic(t), header];

        for line in fields.lines() {
            match line {
                FieldLine::Single(v) => out.push(format!(" {}", v)),
                FieldLine::Pair(k, v) => out.push(format!("    * {} = {}", k, v)),
                FieldLine::Bullet => out.push("    *".to_string()),
            }
        }

        out.join("\n")
    }

    pub fn debug(t: &DateTime<Local>, name: &str, title: &str, fields: &Fields) -> String {
        titled(t, SEP, format!("\"{}\"\n{}", name, title), fields)
    }

    pub fn warning(t: &DateTime<Local>, name: &str, title: &str, fields: &Fields) -> String {
        titled(t, SEP_SOS, format!("\"{}\"\n!!! WARNING: {}", name, title), fields)
    }

    pub fn error(t: &DateTime<Local>, name: &str, title: &str, fields: &Fields) -> String {
        titled(t, SEP_SOS, format!("\"{}\"\n!!! ERROR: {}", name, title), fields)
    }

    pub fn note(t: &DateTime<Local>, msg: &str, fields: &Fields) -> String {
        let mut out = vec![
            SEP.to_string(),
            ansic(t),
            "\n".to_string(),
            format!(">>> {}:\n", msg),
        ];

        for line in fields.lines() {
            match line {
                FieldLine::Single(v) => out.push(format!(" {}", v)),
                FieldLine::Pair(k, v) => out.push(format!("* {} = {}\n", k, v)),
                FieldLine::Bullet => out.push("*\n".to_string()),
            }
        }

        out.concat()
    }
}

/// ANSI 컬러 터미널용 포매팅
pub mod xterm {
    use super::ansi::*;
    use super::*;

    fn titled(name: &str, title_color: &str, title: &str, fields: &Fields) -> String {
        let mut out = vec![format!(
            "\n{}{}\n{}{}{}",
            CYAN, name, title_color, title, CLEAR
        )];

        let lines = fields.lines();
        let paired = !matches!(fields, Fields::Value(_)) && !lines.is_empty();
        for line in lines {
            match line {
                FieldLine::Single(v) => out.push(format!(" {}{}{}", WHITE, v, CLEAR)),
                FieldLine::Pair(k, v) => {
                    out.push(format!("    {}* {}{} = {}{}", WHITE, BLUE, k, WHITE, v))
                }
                FieldLine::Bullet => out.push(format!("    {}*", WHITE)),
            }
        }
        if paired {
            out.push(CLEAR.to_string());
        }

        out.join("\n")
    }

    fn inline(header: String, fields: &Fields) -> String {
        let mut out = vec![header];

        match fields {
            Fields::None => {}
            Fields::Value(v) => out.push(format!(" {}{}{}", WHITE, v, CLEAR)),
            Fields::Pairs(_) => {
                for line in fields.lines() {
                    match line {
                        FieldLine::Pair(k, v) => {
                            out.push(format!(" {}{} = {}{}", BLUE, k, WHITE, v))
                        }
                        FieldLine::Bullet => out.push(format!("    {}*", WHITE)),
                        FieldLine::Single(_) => {}
                    }
                }
                out.push(CLEAR.to_string());
            }
        }

        out.concat()
    }

    pub fn debug(name: &str, title: &str, fields: &Fields) -> String {
        titled(name, YELLOW, title, fields)
    }

    pub fn warning(name: &str, title: &str, fields: &Fields) -> String {
        titled(name, INVERSE_YELLOW, title, fields)
    }

    pub fn error(name: &str, title: &str, fields: &Fields) -> String {
        titled(name, INVERSE_RED, title, fields)
    }

    pub fn note(msg: &str, fields: &Fields) -> String {
        inline(format!("{}{}{}", INVERSE_WHITE, msg, CLEAR), fields)
    }

    pub fn note2(msg: &str, fields: &Fields) -> String {
        inline(format!("{}{}{}:", INVERSE_BLUE, msg, CLEAR), fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 10, 17, 9, 5, 3)
            .single()
            .expect("Test assertion failed")
    }

    #[test]
    fn test_from_flat_grouping() {
        assert_eq!(Fields::from_flat(Vec::<String>::new()), Fields::None);
        assert_eq!(Fields::from_flat(["only"]), Fields::Value("only".into()));
        assert_eq!(
            Fields::from_flat(["a", "1", "b", "2"]),
            Fields::Pairs(vec![("a".into(), "1".into()), ("b".into(), "2".into())])
        );
    }

    #[test]
    fn test_from_flat_drops_trailing_value() {
        let fields = Fields::from_flat(["a", "1", "b", "2", "orphan"]);
        assert_eq!(
            fields,
            Fields::Pairs(vec![("a".into(), "1".into()), ("b".into(), "2".into())])
        );

        let fields = Fields::from_flat(vec![1, 2, 3]);
        assert_eq!(fields, Fields::Pairs(vec![("1".into(), "2".into())]));
    }

    #[test]
    fn test_try_from_flat_rejects_odd() {
        assert!(matches!(
            Fields::try_from_flat(["a", "1", "b"]),
            Err(DiagError::OddFieldCount(3))
        ));
        assert!(Fields::try_from_flat(["single"]).is_ok());
        assert!(Fields::try_from_flat(["a", "1"]).is_ok());
    }

    #[test]
    fn test_replace_stack_marker() {
        let fields = Fields::from_flat(["key", "stack"]).replace_stack_marker(|| "TRACE".into());
        assert_eq!(fields, Fields::Pairs(vec![("key".into(), "TRACE".into())]));

        let fields = Fields::value("stack").replace_stack_marker(|| "TRACE".into());
        assert_eq!(fields, Fields::Value("TRACE".into()));

        let fields = Fields::pairs([("stack", "other")]).replace_stack_marker(|| "TRACE".into());
        assert_eq!(fields, Fields::Pairs(vec![("stack".into(), "other".into())]));
    }

    #[test]
    fn test_with_pair_promotes_single_value() {
        let fields = Fields::value("boom").with_pair("stack", "trace");
        assert_eq!(
            fields,
            Fields::Pairs(vec![
                ("value".into(), "boom".into()),
                ("stack".into(), "trace".into())
            ])
        );
    }

    #[test]
    fn test_plain_debug_layout() {
        let out = plain::debug(&fixed_time(), "db", "Connected", &Fields::pairs([("host", "localhost")]));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], SEP);
        assert_eq!(lines[1], "Sat Oct 17 09:05:03 2026");
        assert_eq!(lines[2], "\"db\"");
        assert_eq!(lines[3], "Connected");
        assert_eq!(lines[4], "    * host = localhost");
    }

    #[test]
    fn test_plain_single_value_and_empty() {
        let out = plain::error(&fixed_time(), "db", "Lost", &Fields::value("timeout"));
        assert!(out.starts_with(SEP_SOS));
        assert!(out.ends_with("!!! ERROR: Lost\n timeout"));

        let out = plain::warning(&fixed_time(), "db", "Slow", &Fields::none());
        assert!(out.ends_with("\"db\"\n!!! WARNING: Slow"));
    }

    #[test]
    fn test_bullet_marker() {
        let fields = Fields::pairs([("a", "1"), ("", ""), ("b", "2")]);
        let out = plain::debug(&fixed_time(), "n", "t", &fields);
        assert!(out.contains("    * a = 1\n    *\n    * b = 2"));

        let out = xterm::debug("n", "t", &fields);
        assert!(out.contains(&format!("    {}*\n", ansi::WHITE)));
    }

    #[test]
    fn test_plain_note() {
        let out = plain::note(&fixed_time(), "hello", &Fields::pairs([("k", "v")]));
        assert_eq!(
            out,
            format!("{}Sat Oct 17 09:05:03 2026\n>>> hello:\n* k = v\n", SEP)
        );
    }

    #[test]
    fn test_xterm_colors() {
        let out = xterm::error("db", "Lost", &Fields::none());
        assert!(out.contains(ansi::CYAN));
        assert!(out.contains(ansi::INVERSE_RED));
        assert!(out.ends_with(ansi::CLEAR));

        let out = xterm::note2("msg", &Fields::pairs([("k", "v")]));
        assert!(out.starts_with(&format!("{}msg{}:", ansi::INVERSE_BLUE, ansi::CLEAR)));
        assert!(out.contains(&format!(" {}k = {}v", ansi::BLUE, ansi::WHITE)));
    }

    #[test]
    fn test_formatter_routing() {
        let event = LogEvent::new(EventKind::Debug, "n", "t", Fields::none()).at(fixed_time());
        assert!(LogFormatter::new(FormatStyle::Plain).format(&event).is_some());
        assert!(LogFormatter::new(FormatStyle::Xterm).format(&event).is_some());
        assert!(LogFormatter::new(FormatStyle::Html).format(&event).is_none());

        let print = LogEvent::new(EventKind::Print, "", "raw text", Fields::none());
        assert_eq!(
            LogFormatter::new(FormatStyle::Html).format(&print).as_deref(),
            Some("raw text")
        );

        let sos = LogEvent::new(EventKind::Sos, "n", "t", Fields::none()).at(fixed_time());
        let out = LogFormatter::new(FormatStyle::Plain)
            .format(&sos)
            .expect("Test assertion failed");
        assert!(out.contains("!!! ERROR: t"));
    }
}
