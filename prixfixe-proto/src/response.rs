//! C1: status-code + text framing, per RFC 5321 §4.2.

use std::borrow::Cow;
use std::fmt;

/// A single- or multi-line SMTP reply.
///
/// The last line is always separated from its code with a space; every
/// preceding line uses `-`. Every line is `CRLF`-terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    lines: Vec<Cow<'static, str>>,
}

impl Response {
    #[must_use]
    pub fn new(code: u16, line: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            lines: vec![line.into()],
        }
    }

    #[must_use]
    pub fn multiline(code: u16, lines: Vec<Cow<'static, str>>) -> Self {
        debug_assert!(!lines.is_empty(), "a response must have at least one line");
        Self { code, lines }
    }

    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[must_use]
    pub fn lines(&self) -> &[Cow<'static, str>] {
        &self.lines
    }

    #[must_use]
    pub const fn is_permanent_failure(&self) -> bool {
        self.code >= 500
    }

    #[must_use]
    pub const fn is_transient_failure(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 400
    }

    /// Serialize into `buf`, appending rather than clearing it first.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let last = self.lines.len() - 1;
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { b' ' } else { b'-' };
            buf.extend_from_slice(self.code.to_string().as_bytes());
            buf.push(sep);
            buf.extend_from_slice(line.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    // --- Named constructors: the catalog of codes actually emitted ---

    #[must_use]
    pub fn greeting(domain: &str) -> Self {
        Self::new(220, format!("{domain} ESMTP Service ready"))
    }

    #[must_use]
    pub fn closing(domain: &str) -> Self {
        Self::new(221, format!("{domain} closing connection"))
    }

    #[must_use]
    pub fn ok(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(250, text)
    }

    /// Multi-line EHLO reply: greeting line followed by one capability per line.
    #[must_use]
    pub fn ehlo(domain: &str, capabilities: &[String]) -> Self {
        let mut lines: Vec<Cow<'static, str>> = Vec::with_capacity(1 + capabilities.len());
        lines.push(Cow::Owned(format!("{domain} Hello")));
        lines.extend(capabilities.iter().cloned().map(Cow::Owned));
        Self::multiline(250, lines)
    }

    #[must_use]
    pub fn start_mail_input() -> Self {
        Self::new(354, "Start mail input; end with <CRLF>.<CRLF>")
    }

    #[must_use]
    pub fn service_unavailable(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(421, text)
    }

    #[must_use]
    pub fn local_error(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(451, text)
    }

    #[must_use]
    pub fn syntax_error(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(500, text)
    }

    #[must_use]
    pub fn syntax_error_in_parameters(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(501, text)
    }

    #[must_use]
    pub fn not_implemented(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(502, text)
    }

    #[must_use]
    pub fn bad_sequence(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(503, text)
    }

    #[must_use]
    pub fn mailbox_unavailable(text: impl Into<Cow<'static, str>>) -> Self {
        Self::new(550, text)
    }

    #[must_use]
    pub fn too_many_recipients() -> Self {
        Self::new(452, "Too many recipients")
    }

    #[must_use]
    pub fn size_exceeded() -> Self {
        Self::new(552, "Message size exceeds fixed limit")
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        f.write_str(&String::from_utf8_lossy(&bytes))
    }
}
