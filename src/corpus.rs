//! Splitting a JSONL corpus into numbered batch files and merging per-batch
//! label outputs back into one file.
//!
//! File naming is shared with the labeler: `batch_NN.jsonl` goes in,
//! `seeds_batch_NN.jsonl` and `errors_batch_NN.log` come out.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Default batch file prefix.
pub const BATCH_PREFIX: &str = "batch";
/// Default number of records per batch file.
pub const DEFAULT_LINES_PER_FILE: usize = 3000;

/// Errors from corpus partitioning and merging.
#[derive(Debug, Error, Diagnostic)]
pub enum CorpusError {
    #[error("I/O error on {path}")]
    #[diagnostic(
        code(absa::corpus::io),
        help("Check that the path exists, is readable, and that the disk is not full.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lines per batch must be at least 1")]
    #[diagnostic(
        code(absa::corpus::batch_size),
        help("Pass a positive value to --lines.")
    )]
    InvalidBatchSize,
}

pub type CorpusResult<T> = std::result::Result<T, CorpusError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CorpusError + '_ {
    move |source| CorpusError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `batch_07.jsonl` for prefix `batch`, index 7.
pub fn batch_file_name(prefix: &str, index: usize) -> String {
    format!("{prefix}_{index:02}.jsonl")
}

/// Labeled output for a batch stem, e.g. `seeds_batch_07.jsonl`.
pub fn seeds_file_name(batch_stem: &str) -> String {
    format!("seeds_{batch_stem}.jsonl")
}

/// Error log for a batch stem, e.g. `errors_batch_07.log`.
pub fn errors_file_name(batch_stem: &str) -> String {
    format!("errors_{batch_stem}.log")
}

/// Files in `dir` named `{prefix}*{suffix}`, sorted by file name.
pub fn list_matching(dir: &Path, prefix: &str, suffix: &str) -> CorpusResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(io_err(dir))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(prefix) && name.ends_with(suffix))
        })
        .map(|e| e.path())
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Split `in_file` into `{prefix}_NN.jsonl` files of at most
/// `lines_per_file` non-blank lines each. The last file may be shorter.
/// Returns the written paths in order.
pub fn split_corpus(
    in_file: &Path,
    out_dir: &Path,
    lines_per_file: usize,
    prefix: &str,
) -> CorpusResult<Vec<PathBuf>> {
    if lines_per_file == 0 {
        return Err(CorpusError::InvalidBatchSize);
    }
    fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;

    let reader = BufReader::new(File::open(in_file).map_err(io_err(in_file))?);
    let mut written = Vec::new();
    let mut buf: Vec<String> = Vec::with_capacity(lines_per_file);

    for line in reader.lines() {
        let line = line.map_err(io_err(in_file))?;
        if line.trim().is_empty() {
            continue;
        }
        buf.push(line.trim_end_matches('\r').to_string());
        if buf.len() >= lines_per_file {
            written.push(flush_batch(out_dir, prefix, written.len() + 1, &buf)?);
            buf.clear();
        }
    }
    if !buf.is_empty() {
        written.push(flush_batch(out_dir, prefix, written.len() + 1, &buf)?);
    }

    tracing::info!(
        input = %in_file.display(),
        batches = written.len(),
        lines_per_file,
        "corpus split"
    );
    Ok(written)
}

fn flush_batch(out_dir: &Path, prefix: &str, index: usize, lines: &[String]) -> CorpusResult<PathBuf> {
    let path = out_dir.join(batch_file_name(prefix, index));
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(&path, content).map_err(io_err(&path))?;
    tracing::debug!(path = %path.display(), lines = lines.len(), "wrote batch");
    Ok(path)
}

/// Concatenate every `seeds_batch_*.jsonl` in `in_dir`, in file-name order,
/// into `out_file`, dropping blank lines. Returns the number of lines written.
pub fn merge_outputs(in_dir: &Path, out_file: &Path) -> CorpusResult<usize> {
    let inputs = list_matching(in_dir, &format!("seeds_{BATCH_PREFIX}_"), ".jsonl")?;

    let out = File::create(out_file).map_err(io_err(out_file))?;
    let mut writer = BufWriter::new(out);
    let mut count = 0usize;

    for path in &inputs {
        let reader = BufReader::new(File::open(path).map_err(io_err(path))?);
        for line in reader.lines() {
            let line = line.map_err(io_err(path))?;
            if line.trim().is_empty() {
                continue;
            }
            writeln!(writer, "{}", line.trim_end_matches('\r')).map_err(io_err(out_file))?;
            count += 1;
        }
    }
    writer.flush().map_err(io_err(out_file))?;

    tracing::info!(files = inputs.len(), lines = count, out = %out_file.display(), "merged outputs");
    Ok(count)
}
