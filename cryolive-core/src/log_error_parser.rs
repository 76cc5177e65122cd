use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Bounded tail read, in KiB, applied to both stdout and stderr before
/// classification (§4.7).
const TAIL_KIB: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorCategory {
    Oom,
    SegFault,
    CudaError,
    MissingInput,
    PermissionDenied,
    SchedulerTimeout,
    RelionAssertion,
    Unknown,
}

impl ErrorCategory {
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorCategory::Oom => {
                "The job exceeded its allotted memory. Request more memory or reduce batch size."
            }
            ErrorCategory::SegFault => {
                "The compute process crashed with a segmentation fault. Check input file integrity."
            }
            ErrorCategory::CudaError => {
                "A CUDA error was reported. Verify GPU availability and driver/toolkit versions."
            }
            ErrorCategory::MissingInput => {
                "An expected input file was not found. Check upstream stage outputs."
            }
            ErrorCategory::PermissionDenied => {
                "The process could not access a required file or directory. Check permissions."
            }
            ErrorCategory::SchedulerTimeout => {
                "The scheduler terminated the job for exceeding its time limit. Increase the time limit."
            }
            ErrorCategory::RelionAssertion => {
                "An internal assertion failed. This usually indicates malformed input parameters."
            }
            ErrorCategory::Unknown => "No specific cause could be identified from the job's logs.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LogSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParsedIssue {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub source: LogSource,
    pub line_number: usize,
    pub message: String,
}

impl ParsedIssue {
    pub fn summary_line(&self) -> String {
        format!(
            "[{:?}] {} ({})",
            self.category,
            self.message,
            self.category.suggestion()
        )
    }
}

fn classify_line(line: &str) -> Option<ErrorCategory> {
    let lower = line.to_lowercase();
    if lower.contains("out of memory") || lower.contains("oom-kill") || lower.contains("cuda out of memory") {
        Some(ErrorCategory::Oom)
    } else if lower.contains("segmentation fault") || lower.contains("sigsegv") {
        Some(ErrorCategory::SegFault)
    } else if lower.contains("cuda error") || lower.contains("cuda driver") {
        Some(ErrorCategory::CudaError)
    } else if lower.contains("no such file or directory") || lower.contains("cannot find input") {
        Some(ErrorCategory::MissingInput)
    } else if lower.contains("permission denied") {
        Some(ErrorCategory::PermissionDenied)
    } else if lower.contains("cancelled for time limit") || lower.contains("due to time limit") {
        Some(ErrorCategory::SchedulerTimeout)
    } else if lower.contains("error::relion") || lower.contains("caught exception") {
        Some(ErrorCategory::RelionAssertion)
    } else if lower.contains("error") {
        Some(ErrorCategory::Unknown)
    } else {
        None
    }
}

fn tail_bytes(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

/// Scans the last `TAIL_KIB` KiB of `stdout_path`/`stderr_path` and returns a
/// structured list of issues, most severe / most recent first.
pub fn parse_job_logs(stdout_path: &Path, stderr_path: &Path) -> Vec<ParsedIssue> {
    let mut issues = Vec::new();
    for (path, source) in [(stdout_path, LogSource::Stdout), (stderr_path, LogSource::Stderr)] {
        let Ok(contents) = tail_bytes(path, TAIL_KIB * 1024) else {
            continue;
        };
        for (idx, line) in contents.lines().enumerate() {
            if let Some(category) = classify_line(line) {
                let severity = if matches!(category, ErrorCategory::Unknown) {
                    Severity::Warning
                } else {
                    Severity::Error
                };
                issues.push(ParsedIssue {
                    category,
                    severity,
                    source,
                    line_number: idx + 1,
                    message: line.trim().to_string(),
                });
            }
        }
    }
    issues
}

/// Convenience used by the Monitor when enriching a Job's error message: the
/// single top issue's one-line summary, or `None` if nothing was parsed.
pub fn top_issue_summary(issues: &[ParsedIssue]) -> Option<String> {
    issues
        .iter()
        .find(|i| i.severity == Severity::Error)
        .or_else(|| issues.first())
        .map(ParsedIssue::summary_line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn classifies_oom() {
        let stderr = write_tmp("step 1 ok\nFatal: CUDA out of memory trying to allocate buffer\n");
        let stdout = write_tmp("");
        let issues = parse_job_logs(stdout.path(), stderr.path());
        assert!(issues.iter().any(|i| i.category == ErrorCategory::Oom));
    }

    #[test]
    fn classifies_missing_input() {
        let stderr = write_tmp("ERROR: No such file or directory: micrographs.star\n");
        let stdout = write_tmp("");
        let issues = parse_job_logs(stdout.path(), stderr.path());
        assert!(issues
            .iter()
            .any(|i| i.category == ErrorCategory::MissingInput));
    }

    #[test]
    fn top_issue_summary_prefers_errors_over_warnings() {
        let stderr = write_tmp("warning: deprecated flag used\nERROR: permission denied opening output\n");
        let stdout = write_tmp("");
        let issues = parse_job_logs(stdout.path(), stderr.path());
        let summary = top_issue_summary(&issues).unwrap();
        assert!(summary.contains("PermissionDenied"));
    }
}
