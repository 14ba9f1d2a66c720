//! Reply parsing (RFC 5321 section 4.2).

use std::fmt;

use super::error::{ClientError, Result};

/// A complete reply, with continuation lines folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

/// One physical reply line: the code, whether another line follows, and
/// the text after the separator.
fn split_line(line: &str) -> Result<(u16, bool, &str)> {
    let malformed = || ClientError::Malformed(format!("bad reply line {line:?}"));

    let (code, rest) = line.split_at_checked(3).ok_or_else(malformed)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let code = code.parse().map_err(|_| malformed())?;

    match rest.as_bytes().first() {
        None => Ok((code, false, "")),
        Some(b' ') => Ok((code, false, &rest[1..])),
        Some(b'-') => Ok((code, true, &rest[1..])),
        Some(_) => Err(malformed()),
    }
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, 200..=299)
    }

    /// `3xx`, as sent in reply to DATA.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        matches!(self.code, 300..=399)
    }

    /// Whether an EHLO reply lists `keyword` as an extension.
    #[must_use]
    pub fn advertises(&self, keyword: &str) -> bool {
        self.lines
            .iter()
            .filter_map(|line| line.split_whitespace().next())
            .any(|extension| extension.eq_ignore_ascii_case(keyword))
    }

    /// Passes the reply through if `accept` holds for it.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] carrying the code and text otherwise.
    pub fn expect(self, accept: fn(&Self) -> bool) -> Result<Self> {
        if accept(&self) {
            return Ok(self);
        }
        Err(ClientError::Rejected {
            code: self.code,
            message: self.message(),
        })
    }

    /// Parses one reply from the front of `buffer`, returning it with the
    /// number of bytes it occupied. `None` means the reply is incomplete.
    ///
    /// # Errors
    ///
    /// [`ClientError::Malformed`] if a line is not a reply line or the lines
    /// of one reply disagree on the code.
    pub(super) fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut response: Option<Self> = None;
        let mut offset = 0;

        for raw in buffer.split_inclusive(|&b| b == b'\n') {
            let Some(raw) = raw.strip_suffix(b"\n") else {
                break;
            };
            offset += raw.len() + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let (code, more, text) = split_line(std::str::from_utf8(raw)?)?;
            let reply = response.get_or_insert_with(|| Self::new(code, Vec::new()));
            if reply.code != code {
                return Err(ClientError::Malformed(format!(
                    "reply started with {} but continued with {code}",
                    reply.code
                )));
            }
            reply.lines.push(text.to_string());

            if !more {
                return Ok(response.map(|reply| (reply, offset)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" / "))
    }
}
