//! Where recipients come from.

use std::{collections::VecDeque, io, path::Path};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
};

/// A finite, forward-only sequence of recipient addresses.
#[async_trait]
pub trait RecipientSource: Send {
    /// The next recipient, or `None` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// If the underlying reader fails. The source should not be read again.
    async fn next_recipient(&mut self) -> io::Result<Option<String>>;
}

/// One address per line. Surrounding whitespace is trimmed and blank lines
/// are skipped.
#[derive(Debug)]
pub struct LineSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl LineSource<BufReader<File>> {
    /// Read recipients from the file at `path`.
    ///
    /// # Errors
    ///
    /// If the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> RecipientSource for LineSource<R> {
    async fn next_recipient(&mut self) -> io::Result<Option<String>> {
        while let Some(line) = self.lines.next_line().await? {
            let address = line.trim();
            if !address.is_empty() {
                return Ok(Some(address.to_string()));
            }
        }

        Ok(None)
    }
}

/// Recipients held in memory.
#[derive(Debug, Default, Clone)]
pub struct VecSource(VecDeque<String>);

impl<T: Into<String>> FromIterator<T> for VecSource {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl RecipientSource for VecSource {
    async fn next_recipient(&mut self) -> io::Result<Option<String>> {
        Ok(self.0.pop_front())
    }
}
