use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};
use thiserror::Error;

pub const DEFAULT_EXPORT_TOOL: &str = "mdb-export";
pub const DEFAULT_TABLES_TOOL: &str = "mdb-tables";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("`{tool}` not found; install mdbtools or set the tool path")]
    ToolUnavailable { tool: String },
    #[error("database file not found: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("table `{0}` not found in database")]
    TableNotFound(String),
    #[error("`{tool}` failed with {status}: {stderr}")]
    ToolFailed { tool: String, status: String, stderr: String },
    #[error("`{tool}` did not finish within {secs}s")]
    Timeout { tool: String, secs: u64 },
    #[error("failed to parse export of `{table}`: {source}")]
    Parse {
        table: String,
        #[source]
        source: csv::Error,
    },
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// One extracted record, column name to raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow(BTreeMap<String, String>);

impl RawRow {
    /// Trimmed value of `column`, `None` when the column is absent or empty.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.0
            .get(column)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        RawRow(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Anything that can hand out the rows of a named table.
pub trait TableSource {
    fn tables(&self) -> Result<Vec<String>, ExtractionError>;

    fn extract(&self, table: &str) -> Result<Vec<RawRow>, ExtractionError>;
}

/// Extracts every table in `tables`, stopping at the first failure.
pub fn extract_all<S>(source: &S, tables: &[&str]) -> Result<BTreeMap<String, Vec<RawRow>>, ExtractionError>
where
    S: TableSource + ?Sized,
{
    tables
        .iter()
        .map(|table| Ok(((*table).to_owned(), source.extract(table)?)))
        .collect()
}

/// Parses CSV with a header line into rows.
pub fn parse_csv<R: Read>(table: &str, reader: R) -> Result<Vec<RawRow>, ExtractionError> {
    let parse_error = |source| ExtractionError::Parse {
        table: table.to_owned(),
        source,
    };

    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers().map_err(parse_error)?.clone();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(parse_error)?;
        rows.push(headers.iter().zip(record.iter()).collect());
    }

    Ok(rows)
}

/// Reads tables out of an Access database through the mdbtools binaries.
///
/// The database is only ever opened by the child processes, read-only, and
/// each invocation is killed once `timeout` expires.
#[derive(Debug, Clone)]
pub struct MdbExport {
    database: PathBuf,
    export_tool: String,
    tables_tool: String,
    timeout: Duration,
}

impl MdbExport {
    pub fn new(database: impl Into<PathBuf>) -> MdbExport {
        MdbExport {
            database: database.into(),
            export_tool: DEFAULT_EXPORT_TOOL.to_owned(),
            tables_tool: DEFAULT_TABLES_TOOL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_tools(mut self, export_tool: impl Into<String>, tables_tool: impl Into<String>) -> MdbExport {
        self.export_tool = export_tool.into();
        self.tables_tool = tables_tool.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> MdbExport {
        self.timeout = timeout;
        self
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    fn ensure_source(&self) -> Result<(), ExtractionError> {
        if !self.database.is_file() {
            return Err(ExtractionError::SourceMissing(self.database.clone()));
        }

        Ok(())
    }

    fn run(&self, tool: &str, args: &[&OsStr]) -> Result<Vec<u8>, ExtractionError> {
        debug!("running {} {:?}", tool, args);

        let mut child = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => ExtractionError::ToolUnavailable { tool: tool.to_owned() },
                _ => ExtractionError::Io(err),
            })?;

        // Drain both pipes so a large export can't block on a full buffer.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExtractionError::Timeout {
                    tool: tool.to_owned(),
                    secs: self.timeout.as_secs(),
                });
            }

            thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if !status.success() {
            return Err(ExtractionError::ToolFailed {
                tool: tool.to_owned(),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_owned(),
            });
        }

        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buffer)?;
        }
        Ok(buffer)
    })
}

fn collect(handle: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>, ExtractionError> {
    let buffer = handle.join().map_err(|_| io::Error::other("pipe reader panicked"))??;
    Ok(buffer)
}

impl TableSource for MdbExport {
    fn tables(&self) -> Result<Vec<String>, ExtractionError> {
        self.ensure_source()?;

        let output = self.run(&self.tables_tool, &[OsStr::new("-1"), self.database.as_os_str()])?;
        Ok(String::from_utf8_lossy(&output)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn extract(&self, table: &str) -> Result<Vec<RawRow>, ExtractionError> {
        if !self.tables()?.iter().any(|name| name == table) {
            return Err(ExtractionError::TableNotFound(table.to_owned()));
        }

        let output = self.run(&self.export_tool, &[self.database.as_os_str(), OsStr::new(table)])?;
        let rows = parse_csv(table, output.as_slice())?;

        info!("extracted table={} rows={}", table, rows.len());
        Ok(rows)
    }
}

/// In-memory tables, for tests and for feeding pre-exported CSV.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: BTreeMap<String, Vec<RawRow>>,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<RawRow>) -> MemorySource {
        self.tables.insert(name.into(), rows);
        self
    }

    pub fn with_csv(self, name: &str, csv: &str) -> Result<MemorySource, ExtractionError> {
        let rows = parse_csv(name, csv.as_bytes())?;
        Ok(self.with_table(name, rows))
    }
}

impl TableSource for MemorySource {
    fn tables(&self) -> Result<Vec<String>, ExtractionError> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn extract(&self, table: &str) -> Result<Vec<RawRow>, ExtractionError> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| ExtractionError::TableNotFound(table.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    const SALES_CSV: &str = "\
INV_NO,ITEMS,CATOGERY,QTY,AMOUNT,DATE
1,Cola,Drinks,2,6.00,01/05/24 00:00:00
2, Burger ,Food,1,10.00,01/05/24 00:00:00
3,Water,,1,1.50,01/05/24 00:00:00
";

    #[test]
    fn test_parse_csv() -> Result<()> {
        let rows = parse_csv("SALE", SALES_CSV.as_bytes())?;

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].value("ITEMS"), Some("Burger"));
        assert_eq!(rows[2].value("CATOGERY"), None);
        assert_eq!(rows[0].columns().count(), 6);

        Ok(())
    }

    #[test]
    fn test_parse_csv_ragged_row() {
        let err = parse_csv("SALE", "A,B\n1,2,3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, ExtractionError::Parse { ref table, .. } if table == "SALE"));
    }

    #[test]
    fn test_memory_source() -> Result<()> {
        let source = MemorySource::new().with_csv("SALE", SALES_CSV)?;

        assert_eq!(source.tables()?, vec!["SALE".to_owned()]);
        assert_eq!(source.extract("SALE")?.len(), 3);
        assert!(matches!(source.extract("INVOICE"), Err(ExtractionError::TableNotFound(_))));

        Ok(())
    }

    #[test]
    fn test_extract_all_stops_on_missing_table() -> Result<()> {
        let source = MemorySource::new().with_csv("SALE", SALES_CSV)?;

        let tables = extract_all(&source, &["SALE"])?;
        assert_eq!(tables["SALE"].len(), 3);

        let err = extract_all(&source, &["SALE", "INVOICE"]).unwrap_err();
        assert!(matches!(err, ExtractionError::TableNotFound(table) if table == "INVOICE"));

        Ok(())
    }

    #[test]
    fn test_mdb_export_missing_database() {
        let source = MdbExport::new("/nonexistent/resturant.mdb");

        let err = source.extract("SALE").unwrap_err();
        assert!(matches!(err, ExtractionError::SourceMissing(_)));
    }

    #[test]
    fn test_mdb_export_missing_tool() -> Result<()> {
        let database = tempfile::NamedTempFile::new()?;
        let source = MdbExport::new(database.path()).with_tools("pos-digest-no-such-export", "pos-digest-no-such-tables");

        let err = source.extract("SALE").unwrap_err();
        assert!(matches!(err, ExtractionError::ToolUnavailable { ref tool } if tool == "pos-digest-no-such-tables"));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_mdb_export_tool_failure() -> Result<()> {
        let database = tempfile::NamedTempFile::new()?;
        let source = MdbExport::new(database.path());

        let err = source
            .run("sh", &[OsStr::new("-c"), OsStr::new("echo 'not an access file' >&2; exit 3")])
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::ToolFailed { ref tool, ref stderr, .. } if tool == "sh" && stderr == "not an access file"
        ));

        let failing = source.with_tools("mdb-export", "false");
        let err = failing.extract("SALE").unwrap_err();
        assert!(matches!(err, ExtractionError::ToolFailed { ref tool, .. } if tool == "false"));

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_mdb_export_timeout() -> Result<()> {
        let database = tempfile::NamedTempFile::new()?;
        let source = MdbExport::new(database.path()).with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = source
            .run("sh", &[OsStr::new("-c"), OsStr::new("exec sleep 5")])
            .unwrap_err();

        assert!(matches!(err, ExtractionError::Timeout { ref tool, .. } if tool == "sh"));
        assert!(started.elapsed() < Duration::from_secs(5));

        Ok(())
    }
}
