//! Line-oriented statement streaming from a workload file.

use crate::error::SourceError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

/// Default bound for a single workload line (2 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 2 * 1024 * 1024;

/// One workload line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// 1-based physical line number.
    pub index: u64,
    /// Line text with surrounding whitespace removed.
    pub text: String,
}

impl Statement {
    pub fn new(index: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }

    pub fn kind(&self) -> StatementKind {
        StatementKind::classify(&self.text)
    }
}

/// Coarse statement class derived from the leading keyword.
///
/// Only the first word is inspected (plus the presence of `WHERE` for
/// `DELETE`); nothing here validates SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// `INSERT` or `REPLACE`. Affected rows are added to the expected count,
    /// so upserts that report two rows per replaced row overstate it.
    Insert,
    Ddl,
    /// `TRUNCATE`, or a `DELETE` without a `WHERE` clause.
    Truncate,
    Delete,
    Update,
    Query,
    Other,
}

impl StatementKind {
    pub fn classify(text: &str) -> Self {
        let mut words = text.split_whitespace();
        let keyword = words
            .next()
            .and_then(|w| w.split(|c: char| !c.is_ascii_alphabetic()).find(|s| !s.is_empty()))
            .unwrap_or("")
            .to_ascii_uppercase();

        match keyword.as_str() {
            "INSERT" | "REPLACE" => StatementKind::Insert,
            "CREATE" | "DROP" | "ALTER" | "RENAME" => StatementKind::Ddl,
            "TRUNCATE" => StatementKind::Truncate,
            "DELETE" => {
                let has_where = words.any(|w| {
                    w.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                        .any(|word| word.eq_ignore_ascii_case("where"))
                });
                if has_where {
                    StatementKind::Delete
                } else {
                    StatementKind::Truncate
                }
            }
            "UPDATE" => StatementKind::Update,
            "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESCRIBE" => StatementKind::Query,
            _ => StatementKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Insert => "insert",
            StatementKind::Ddl => "ddl",
            StatementKind::Truncate => "truncate",
            StatementKind::Delete => "delete",
            StatementKind::Update => "update",
            StatementKind::Query => "query",
            StatementKind::Other => "other",
        }
    }

    /// Timing label used for executing a statement of this kind.
    pub fn execute_label(&self) -> &'static str {
        match self {
            StatementKind::Insert => "execute.insert",
            StatementKind::Ddl => "execute.ddl",
            StatementKind::Truncate => "execute.truncate",
            StatementKind::Delete => "execute.delete",
            StatementKind::Update => "execute.update",
            StatementKind::Query => "execute.query",
            StatementKind::Other => "execute.other",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lazy, forward-only stream of statements read from a workload file.
///
/// The file handle is dropped as soon as the stream ends, fails, or the
/// source itself is dropped. After an error every call returns `Ok(None)`.
pub struct StatementSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    max_line_bytes: usize,
    lines_read: u64,
    buf: Vec<u8>,
}

enum LineRead {
    Line,
    TooLong,
    Eof,
}

impl StatementSource {
    /// Open a workload file.
    pub async fn open(path: impl AsRef<Path>, max_line_bytes: usize) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;

        debug!(
            "Opened workload file {} (max line size {} bytes)",
            path.display(),
            max_line_bytes
        );

        Ok(Self {
            path,
            reader: Some(BufReader::new(file)),
            max_line_bytes,
            lines_read: 0,
            buf: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines returned so far.
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Whether the underlying file has been released.
    pub fn is_finished(&self) -> bool {
        self.reader.is_none()
    }

    /// Read the next statement, or `None` at end of stream.
    pub async fn next_statement(&mut self) -> Result<Option<Statement>, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let line = self.lines_read + 1;

        let read = read_bounded_line(reader, &mut self.buf, self.max_line_bytes).await;
        match read {
            Ok(LineRead::Eof) => {
                self.finish();
                Ok(None)
            }
            Ok(LineRead::TooLong) => {
                self.finish();
                Err(SourceError::LineTooLong {
                    line,
                    limit: self.max_line_bytes,
                })
            }
            Ok(LineRead::Line) => {
                let text = match std::str::from_utf8(&self.buf) {
                    Ok(text) => text.trim().to_string(),
                    Err(_) => {
                        self.finish();
                        return Err(SourceError::InvalidUtf8 { line });
                    }
                };
                self.lines_read = line;
                Ok(Some(Statement::new(line, text)))
            }
            Err(source) => {
                self.finish();
                Err(SourceError::Read { line, source })
            }
        }
    }

    fn finish(&mut self) {
        self.reader = None;
        self.buf = Vec::new();
    }
}

/// Read one line into `buf` without its terminator (`\n` or `\r\n`).
///
/// Never copies more than `limit + 2` bytes of a line: `limit` bytes of
/// content, a possible `\r`, and one byte to detect overflow.
async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut saw_bytes = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if !saw_bytes {
                return Ok(LineRead::Eof);
            }
            break;
        }
        saw_bytes = true;

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if buf.len() + pos > limit + 1 {
                    return Ok(LineRead::TooLong);
                }
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                break;
            }
            None => {
                let room = (limit + 2).saturating_sub(buf.len());
                let take = available.len().min(room);
                buf.extend_from_slice(&available[..take]);
                reader.consume(take);
                if buf.len() > limit + 1 {
                    return Ok(LineRead::TooLong);
                }
            }
        }
    }

    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > limit {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn workload(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    async fn collect(source: &mut StatementSource) -> Vec<Statement> {
        let mut out = Vec::new();
        while let Some(statement) = source.next_statement().await.unwrap() {
            out.push(statement);
        }
        out
    }

    #[tokio::test]
    async fn test_reads_lines_in_order() {
        let file = workload(b"CREATE TABLE t(id INT)\nINSERT INTO t VALUES (1)\nINSERT INTO t VALUES (2)\n");
        let mut source = StatementSource::open(file.path(), 1024).await.unwrap();

        let statements = collect(&mut source).await;
        assert_eq!(
            statements,
            vec![
                Statement::new(1, "CREATE TABLE t(id INT)"),
                Statement::new(2, "INSERT INTO t VALUES (1)"),
                Statement::new(3, "INSERT INTO t VALUES (2)"),
            ]
        );
        assert!(source.is_finished());
        assert_eq!(source.lines_read(), 3);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let file = workload(b"a\nb");
        let mut source = StatementSource::open(file.path(), 16).await.unwrap();
        let texts: Vec<String> = collect(&mut source).await.into_iter().map(|s| s.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_blank_lines_are_kept_and_text_trimmed() {
        let file = workload(b"  SELECT 1  \r\n\n\t\nSELECT 2\r\n");
        let mut source = StatementSource::open(file.path(), 64).await.unwrap();
        let statements = collect(&mut source).await;

        assert_eq!(statements.len(), 4);
        assert_eq!(statements[0].text, "SELECT 1");
        assert!(statements[1].is_blank());
        assert!(statements[2].is_blank());
        assert_eq!(statements[3], Statement::new(4, "SELECT 2"));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let file = workload(b"");
        let mut source = StatementSource::open(file.path(), 64).await.unwrap();
        assert!(source.next_statement().await.unwrap().is_none());
        assert!(source.is_finished());
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let line = "x".repeat(32);
        let file = workload(format!("{line}\r\n{line}").as_bytes());
        let mut source = StatementSource::open(file.path(), 32).await.unwrap();

        let statements = collect(&mut source).await;
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].text, line);
        assert_eq!(statements[1].text, line);
    }

    #[tokio::test]
    async fn test_line_too_long_terminates_stream() {
        let long = "y".repeat(33);
        let file = workload(format!("ok\n{long}\nnever\n").as_bytes());
        let mut source = StatementSource::open(file.path(), 32).await.unwrap();

        assert_eq!(source.next_statement().await.unwrap().unwrap().text, "ok");
        let err = source.next_statement().await.unwrap_err();
        assert!(matches!(err, SourceError::LineTooLong { line: 2, limit: 32 }));
        assert!(source.is_finished());
        assert!(source.next_statement().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_too_long_across_buffer_refills() {
        // Larger than the default BufReader capacity, so the line spans several fills.
        let long = "z".repeat(20_000);
        let file = workload(long.as_bytes());
        let mut source = StatementSource::open(file.path(), 10_000).await.unwrap();

        let err = source.next_statement().await.unwrap_err();
        assert!(matches!(err, SourceError::LineTooLong { line: 1, .. }));
    }

    #[tokio::test]
    async fn test_long_line_within_limit_across_refills() {
        let long = "w".repeat(20_000);
        let file = workload(format!("{long}\nnext\n").as_bytes());
        let mut source = StatementSource::open(file.path(), DEFAULT_MAX_LINE_BYTES)
            .await
            .unwrap();

        let statements = collect(&mut source).await;
        assert_eq!(statements[0].text.len(), 20_000);
        assert_eq!(statements[1].text, "next");
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let file = workload(b"fine\n\xff\xfe\n");
        let mut source = StatementSource::open(file.path(), 64).await.unwrap();
        source.next_statement().await.unwrap();
        let err = source.next_statement().await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidUtf8 { line: 2 }));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = StatementSource::open("/nonexistent/workload.sql", 64).await;
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[test]
    fn test_classify() {
        assert_eq!(StatementKind::classify("INSERT INTO t VALUES (1)"), StatementKind::Insert);
        assert_eq!(StatementKind::classify("insert into t values (1)"), StatementKind::Insert);
        assert_eq!(StatementKind::classify("CREATE TABLE t(id INT)"), StatementKind::Ddl);
        assert_eq!(StatementKind::classify("TRUNCATE TABLE t"), StatementKind::Truncate);
        assert_eq!(StatementKind::classify("DELETE FROM t"), StatementKind::Truncate);
        assert_eq!(StatementKind::classify("DELETE FROM t WHERE id = 1"), StatementKind::Delete);
        assert_eq!(StatementKind::classify("REPLACE INTO t VALUES (1)"), StatementKind::Insert);
        assert_eq!(StatementKind::classify("UPDATE t SET id = 2"), StatementKind::Update);
        assert_eq!(StatementKind::classify("SELECT * FROM t"), StatementKind::Query);
        assert_eq!(StatementKind::classify("(SELECT 1)"), StatementKind::Query);
        assert_eq!(StatementKind::classify("VACUUM"), StatementKind::Other);
        assert_eq!(StatementKind::classify(""), StatementKind::Other);
    }

    #[test]
    fn test_delete_where_is_a_whole_word() {
        assert_eq!(
            StatementKind::classify("DELETE FROM whereabouts"),
            StatementKind::Truncate
        );
        assert_eq!(
            StatementKind::classify("delete from t_where_log"),
            StatementKind::Truncate
        );
        assert_eq!(
            StatementKind::classify("DELETE FROM t WHERE(id = 1)"),
            StatementKind::Delete
        );
        assert_eq!(
            StatementKind::classify("DELETE FROM t\twhere id = 1"),
            StatementKind::Delete
        );
    }

    #[test]
    fn test_execute_labels() {
        assert_eq!(StatementKind::Insert.execute_label(), "execute.insert");
        assert_eq!(StatementKind::Other.execute_label(), "execute.other");
    }
}
