//! C2: tokenize a single wire line (already stripped of CRLF) into a `Command`.
//!
//! Parsing never fails; anything that doesn't match a known shape becomes
//! `Command::Unknown`, and it's the state machine's job to turn that into a
//! response.

/// Trailing ESMTP parameters after a path, e.g. `SIZE=1024`. Accepted
/// syntactically, not interpreted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Parameters(Option<String>);

impl Parameters {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    MailFrom {
        reverse_path: Option<String>,
        params: Parameters,
    },
    RcptTo {
        forward_path: Option<String>,
        params: Parameters,
    },
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
    Vrfy(String),
    Unknown(String),
}

impl Command {
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (verb, remainder) = split_verb(line);
        match verb.to_ascii_uppercase().as_str() {
            "HELO" => parse_domain(verb, remainder, Command::Helo),
            "EHLO" => parse_domain(verb, remainder, Command::Ehlo),
            "MAIL" => parse_mail_or_rcpt(remainder, "FROM:").map_or_else(
                || Command::Unknown(verb.to_string()),
                |(path, params)| Command::MailFrom {
                    reverse_path: path,
                    params,
                },
            ),
            "RCPT" => parse_mail_or_rcpt(remainder, "TO:").map_or_else(
                || Command::Unknown(verb.to_string()),
                |(path, params)| Command::RcptTo {
                    forward_path: path,
                    params,
                },
            ),
            "DATA" => Command::Data,
            "RSET" => Command::Rset,
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            "STARTTLS" => Command::StartTls,
            "VRFY" => Command::Vrfy(remainder.to_string()),
            _ => Command::Unknown(verb.to_string()),
        }
    }
}

fn split_verb(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim_start()),
        None => (line, ""),
    }
}

fn parse_domain(verb: &str, remainder: &str, make: impl FnOnce(String) -> Command) -> Command {
    let domain = remainder.trim();
    if domain.is_empty() {
        Command::Unknown(verb.to_string())
    } else {
        make(domain.to_string())
    }
}

/// Parses the `FROM:<path> [params]` / `TO:<path> [params]` remainder of
/// `MAIL`/`RCPT`. Returns `None` if the prefix doesn't match, which the
/// caller turns into `Unknown`.
fn parse_mail_or_rcpt(remainder: &str, prefix: &str) -> Option<(Option<String>, Parameters)> {
    if remainder.len() < prefix.len()
        || !remainder[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        return None;
    }
    let after_prefix = &remainder[prefix.len()..];
    Some(extract_path_and_params(after_prefix))
}

/// Path extraction rule: `<...>` form takes the text between the first `<`
/// and the first subsequent `>`; anything else takes the whole next token.
/// Empty text in either form is the null path.
fn extract_path_and_params(remainder: &str) -> (Option<String>, Parameters) {
    let remainder = remainder.trim_start();
    if let Some(rest) = remainder.strip_prefix('<') {
        if let Some(close) = rest.find('>') {
            let path = &rest[..close];
            let after = rest[close + 1..].trim_start();
            let path = if path.is_empty() {
                None
            } else {
                Some(path.to_string())
            };
            let params = if after.is_empty() {
                Parameters(None)
            } else {
                Parameters(Some(after.to_string()))
            };
            return (path, params);
        }
    }

    let mut parts = remainder.splitn(2, char::is_whitespace);
    let token = parts.next().unwrap_or("");
    let params = parts
        .next()
        .map(str::trim_start)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);
    let path = if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    };
    (path, Parameters(params))
}
