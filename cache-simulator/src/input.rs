//! Input data handling for trace replay
//!
//! Parses request logs from CSV files, one request per line:
//!
//! ```text
//! timestamp,key,size,ttl[,op]
//! ```
//!
//! `timestamp` is unix seconds, `ttl` is seconds (0 = never expires) and the
//! optional `op` is one of `get`, `set` or `delete`. Lines without an op are
//! replayed lookaside: GET, then SET on a miss. Files are streamed so memory
//! stays proportional to the cache, not the trace.

use crate::models::{Request, TraceOp};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Error types for log parsing
#[derive(Debug)]
pub enum LogParseError {
    /// Reading a log file failed
    Io(io::Error),
    /// A line did not match the log format
    Parse { line: usize, message: String },
}

impl fmt::Display for LogParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogParseError::Io(err) => write!(f, "i/o error: {err}"),
            LogParseError::Parse { line, message } => write!(f, "line {line}: {message}"),
        }
    }
}

impl std::error::Error for LogParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogParseError::Io(err) => Some(err),
            LogParseError::Parse { .. } => None,
        }
    }
}

impl From<io::Error> for LogParseError {
    fn from(err: io::Error) -> Self {
        LogParseError::Io(err)
    }
}

/// Reader for request logs
#[derive(Debug)]
pub struct LogReader {
    input_dir: PathBuf,
}

impl LogReader {
    /// Create a new reader for the given input directory
    pub fn new<P: AsRef<Path>>(input_dir: P) -> Self {
        Self {
            input_dir: input_dir.as_ref().to_path_buf(),
        }
    }

    /// Get all log files in the input directory, sorted by name
    pub fn get_log_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut log_files = Vec::new();
        for entry in fs::read_dir(&self.input_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(ext) = path.extension() {
                if ext == "log" || ext == "csv" || ext == "txt" {
                    log_files.push(path);
                }
            }
        }

        // Hourly files sort chronologically by name
        log_files.sort();
        Ok(log_files)
    }

    /// Parse a single line into a Request
    pub fn parse_line(line: &str, line_num: usize) -> Result<Option<Request>, LogParseError> {
        let line = line.trim();

        // Skip empty lines, comments, and header rows
        if line.is_empty() || line.starts_with('#') || line.starts_with("timestamp") {
            return Ok(None);
        }

        let err = |message: String| LogParseError::Parse {
            line: line_num + 1,
            message,
        };

        let mut parts = line.splitn(5, ',');

        let ts_str = parts.next().unwrap_or_default().trim();
        let timestamp = ts_str
            .parse::<u32>()
            .map_err(|_| err(format!("invalid timestamp '{ts_str}'")))?;

        let key = parts
            .next()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| err("missing key".to_string()))?
            .to_string();

        let size_str = parts
            .next()
            .ok_or_else(|| err("missing size".to_string()))?
            .trim();
        let size = size_str
            .parse::<usize>()
            .map_err(|_| err(format!("invalid size '{size_str}'")))?;

        // TTL is optional, default to 0
        let ttl = match parts.next().map(str::trim) {
            Some(ttl_str) if !ttl_str.is_empty() => ttl_str
                .parse::<u32>()
                .map_err(|_| err(format!("invalid ttl '{ttl_str}'")))?,
            _ => 0,
        };

        let op = match parts.next() {
            Some(op_str) => op_str.parse::<TraceOp>().map_err(err)?,
            None => TraceOp::Lookaside,
        };

        let mut request = Request::new(timestamp, key, size, ttl);
        request.op = op;
        Ok(Some(request))
    }

    /// Parse a single log file into memory
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Request>, LogParseError> {
        let reader = BufReader::new(File::open(path)?);
        let mut requests = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            if let Some(request) = Self::parse_line(&line?, line_num)? {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    /// Create a streaming iterator over all requests in all log files.
    pub fn stream_requests(&self) -> Result<RequestIterator, LogParseError> {
        let log_files = self.get_log_files()?;
        Ok(RequestIterator::new(log_files))
    }
}

/// Iterator that streams requests from multiple log files without loading all into memory
#[derive(Debug)]
pub struct RequestIterator {
    files: Vec<PathBuf>,
    current_file_index: usize,
    current_reader: Option<BufReader<File>>,
    current_line_num: usize,
    line_buffer: String,
}

impl RequestIterator {
    fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            current_file_index: 0,
            current_reader: None,
            current_line_num: 0,
            line_buffer: String::with_capacity(256),
        }
    }

    /// Open the next file for reading
    fn open_next_file(&mut self) -> io::Result<bool> {
        let Some(path) = self.files.get(self.current_file_index) else {
            return Ok(false);
        };
        let file = File::open(path)?;
        // 1MB buffer for better I/O performance
        self.current_reader = Some(BufReader::with_capacity(1024 * 1024, file));
        self.current_line_num = 0;
        self.current_file_index += 1;
        Ok(true)
    }
}

impl Iterator for RequestIterator {
    type Item = Result<Request, LogParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current_reader.is_none() {
                match self.open_next_file() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(LogParseError::Io(e))),
                }
            }

            let reader = self.current_reader.as_mut()?;
            self.line_buffer.clear();
            match reader.read_line(&mut self.line_buffer) {
                Ok(0) => {
                    // EOF on current file, move to next
                    self.current_reader = None;
                }
                Ok(_) => {
                    let line_num = self.current_line_num;
                    self.current_line_num += 1;
                    match LogReader::parse_line(&self.line_buffer, line_num) {
                        Ok(Some(request)) => return Some(Ok(request)),
                        Ok(None) => {}
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => return Some(Err(LogParseError::Io(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "slabcache_sim_input_{name}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_line_without_op() {
        let request = LogReader::parse_line("1700000000,key_1,512,60", 1)
            .unwrap()
            .unwrap();
        assert_eq!(request.timestamp, 1_700_000_000);
        assert_eq!(request.key, "key_1");
        assert_eq!(request.size, 512);
        assert_eq!(request.ttl, 60);
        assert_eq!(request.op, TraceOp::Lookaside);
    }

    #[test]
    fn test_parse_line_with_op_and_missing_ttl() {
        let request = LogReader::parse_line("5,k,10,,delete", 1).unwrap().unwrap();
        assert_eq!(request.ttl, 0);
        assert_eq!(request.op, TraceOp::Delete);

        let request = LogReader::parse_line("5,k,10", 1).unwrap().unwrap();
        assert_eq!(request.ttl, 0);
    }

    #[test]
    fn test_parse_line_skips_header_and_comments() {
        assert!(LogReader::parse_line("timestamp,key,size,ttl", 0)
            .unwrap()
            .is_none());
        assert!(LogReader::parse_line("# comment", 3).unwrap().is_none());
        assert!(LogReader::parse_line("   ", 4).unwrap().is_none());
    }

    #[test]
    fn test_parse_line_errors_carry_line_number() {
        match LogReader::parse_line("abc,k,1,0", 6) {
            Err(LogParseError::Parse { line, .. }) => assert_eq!(line, 7),
            other => panic!("unexpected {other:?}"),
        }
        assert!(LogReader::parse_line("1,k", 0).is_err());
        assert!(LogReader::parse_line("1,k,1,0,touch", 0).is_err());
    }

    #[test]
    fn test_stream_spans_files_in_name_order() {
        let dir = temp_dir("stream");
        for (name, ts) in [("b.csv", 20), ("a.csv", 10)] {
            let mut file = File::create(dir.join(name)).unwrap();
            writeln!(file, "timestamp,key,size,ttl").unwrap();
            writeln!(file, "{ts},key_{ts},100,0").unwrap();
            writeln!(file, "{},key_{ts},100,0,set", ts + 1).unwrap();
        }
        File::create(dir.join("ignored.json")).unwrap();

        let reader = LogReader::new(&dir);
        let timestamps: Vec<u32> = reader
            .stream_requests()
            .unwrap()
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(timestamps, vec![10, 11, 20, 21]);
        assert_eq!(reader.parse_file(dir.join("a.csv")).unwrap().len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }
}
