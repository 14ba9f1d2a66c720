//! Transparency encoding for the DATA phase (RFC 5321 section 4.5.2).

/// Normalises bare LF to CRLF and doubles a dot that starts a line.
///
/// State is carried between calls so a body may be written in arbitrary
/// chunks.
#[derive(Debug)]
pub(super) struct DataEncoder {
    line_start: bool,
    prev_cr: bool,
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self {
            line_start: true,
            prev_cr: false,
        }
    }
}

impl DataEncoder {
    pub(super) fn encode(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(chunk.len() + chunk.len() / 32 + 2);

        for &byte in chunk {
            if byte == b'\n' {
                if !self.prev_cr {
                    out.push(b'\r');
                }
                out.push(b'\n');
                self.line_start = true;
                self.prev_cr = false;
                continue;
            }

            if self.line_start && byte == b'.' {
                out.push(b'.');
            }

            out.push(byte);
            self.prev_cr = byte == b'\r';
            self.line_start = false;
        }

        out
    }

    /// The bytes that close the transfer: a line break if the content did
    /// not end with one, then the lone dot.
    pub(super) fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5);
        if self.prev_cr {
            out.push(b'\n');
        } else if !self.line_start {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b".\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(chunks: &[&[u8]]) -> Vec<u8> {
        let mut encoder = DataEncoder::default();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(encoder.encode(chunk));
        }
        out.extend(encoder.finish());
        out
    }

    #[test]
    fn terminates_unterminated_content() {
        assert_eq!(encode_all(&[b"hello"]), b"hello\r\n.\r\n");
    }

    #[test]
    fn keeps_existing_crlf() {
        assert_eq!(encode_all(&[b"hello\r\n"]), b"hello\r\n.\r\n");
    }

    #[test]
    fn bare_lf_becomes_crlf() {
        assert_eq!(encode_all(&[b"a\nb\n"]), b"a\r\nb\r\n.\r\n");
    }

    #[test]
    fn leading_dots_are_stuffed() {
        assert_eq!(
            encode_all(&[b".start\r\nmid.dle\r\n.\r\n"]),
            b"..start\r\nmid.dle\r\n..\r\n.\r\n"
        );
    }

    #[test]
    fn state_survives_chunk_boundaries() {
        assert_eq!(
            encode_all(&[b"line\r", b"\n.dot", b"\n"]),
            b"line\r\n..dot\r\n.\r\n"
        );
    }

    #[test]
    fn empty_body() {
        assert_eq!(encode_all(&[]), b".\r\n");
    }
}
