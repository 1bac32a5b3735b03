//! Batch labeling: turn a `batch_NN.jsonl` file into an append-only
//! `seeds_batch_NN.jsonl` plus an `errors_batch_NN.log`.
//!
//! Per record: validate → skip if already done → ask the [`AspectSource`] →
//! repair each candidate into a canonical [`Aspect`] → append one line.
//! Every rejected record leaves exactly one line in the error log, and a
//! labeled record is written as soon as it is complete, so an interrupted
//! run loses at most the record in flight and a re-run picks up where it
//! stopped.

pub mod done;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use miette::Diagnostic;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::category::Category;
use crate::config::LabelingConfig;
use crate::corpus::{self, BATCH_PREFIX, CorpusError};
use crate::llm::AspectSource;
use crate::model::{Aspect, ErrorEntry, ErrorKind, LabeledRecord, ParsedLine, Polarity, Record};
use crate::span::find_span;

pub use done::DoneSet;

/// Errors that abort a labeling run. Per-record problems never surface here;
/// they go to the batch error log.
#[derive(Debug, Error, Diagnostic)]
pub enum LabelError {
    #[error("no batch_*.jsonl found in {dir}")]
    #[diagnostic(
        code(absa::label::no_batches),
        help("Create batches first with `absa-seed split`, or check --batches-dir.")
    )]
    NoBatches { dir: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Corpus(#[from] CorpusError),

    #[error("I/O error on {path}")]
    #[diagnostic(
        code(absa::label::io),
        help("Check that the output directory is writable and the disk is not full.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {message}")]
    #[diagnostic(code(absa::label::serialize))]
    Serialize { what: &'static str, message: String },
}

pub type LabelResult<T> = std::result::Result<T, LabelError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LabelError + '_ {
    move |source| LabelError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub batch: String,
    /// Records newly written to the output stream.
    pub labeled: usize,
    /// Records skipped because their id was already in the output.
    pub already_done: usize,
    /// Error-log lines written, by kind.
    pub errors: HashMap<ErrorKind, usize>,
    /// The run was stopped before reaching the end of the batch.
    pub interrupted: bool,
}

impl BatchReport {
    fn new(batch: &str) -> Self {
        Self {
            batch: batch.to_string(),
            ..Default::default()
        }
    }

    pub fn error_count(&self, kind: ErrorKind) -> usize {
        self.errors.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_errors(&self) -> usize {
        self.errors.values().sum()
    }
}

/// Drives the per-record labeling loop over batch files.
pub struct BatchLabeler<'a, S: AspectSource + ?Sized> {
    source: &'a S,
    config: LabelingConfig,
    annotator: String,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a, S: AspectSource + ?Sized> BatchLabeler<'a, S> {
    pub fn new(source: &'a S, config: LabelingConfig) -> Self {
        let annotator = source.annotator();
        Self {
            source,
            config,
            annotator,
            stop: None,
        }
    }

    /// Stop cleanly between records once `flag` is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Label every `batch_*.jsonl` in `batches_dir`, in file-name order.
    pub fn label_dir(&self, batches_dir: &Path, out_dir: &Path) -> LabelResult<Vec<BatchReport>> {
        let batches = corpus::list_matching(batches_dir, &format!("{BATCH_PREFIX}_"), ".jsonl")?;
        if batches.is_empty() {
            return Err(LabelError::NoBatches {
                dir: batches_dir.display().to_string(),
            });
        }

        let mut reports = Vec::with_capacity(batches.len());
        for batch in &batches {
            let report = self.label_batch(batch, out_dir)?;
            let interrupted = report.interrupted;
            reports.push(report);
            if interrupted {
                tracing::warn!("stop requested, leaving remaining batches for the next run");
                break;
            }
        }
        Ok(reports)
    }

    /// Label one batch file into `out_dir`, resuming from any existing output.
    pub fn label_batch(&self, batch_file: &Path, out_dir: &Path) -> LabelResult<BatchReport> {
        fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;
        let stem = batch_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| BATCH_PREFIX.to_string());
        let out_path = out_dir.join(corpus::seeds_file_name(&stem));
        let log_path = out_dir.join(corpus::errors_file_name(&stem));

        let mut done = DoneSet::load(&out_path).map_err(io_err(&out_path))?;
        let input = BufReader::new(File::open(batch_file).map_err(io_err(batch_file))?);
        let mut out = append(&out_path)?;
        let mut log = append(&log_path)?;

        tracing::info!(batch = %stem, already_done = done.len(), "labeling batch");
        let report = self
            .label_records(&stem, input, &mut done, &mut out, &mut log)
            .map_err(|e| match e {
                RecordsError::Input(source) => LabelError::Io {
                    path: batch_file.display().to_string(),
                    source,
                },
                RecordsError::Output(source) => LabelError::Io {
                    path: out_path.display().to_string(),
                    source,
                },
                RecordsError::Log(source) => LabelError::Io {
                    path: log_path.display().to_string(),
                    source,
                },
                RecordsError::Serialize { what, message } => LabelError::Serialize { what, message },
            })?;

        tracing::info!(
            batch = %stem,
            labeled = report.labeled,
            already_done = report.already_done,
            errors = report.total_errors(),
            out = %out_path.display(),
            "batch complete"
        );
        Ok(report)
    }

    /// Filesystem-free core: read batch lines from `input`, append labeled
    /// records to `out` and error entries to `log`. `done` is updated as
    /// records are written.
    pub fn label_records<R: BufRead, W: Write, L: Write>(
        &self,
        batch: &str,
        input: R,
        done: &mut DoneSet,
        out: &mut W,
        log: &mut L,
    ) -> Result<BatchReport, RecordsError> {
        let mut report = BatchReport::new(batch);

        for line in input.lines() {
            if self.stop_requested() {
                report.interrupted = true;
                break;
            }
            let line = line.map_err(RecordsError::Input)?;
            if line.trim().is_empty() {
                continue;
            }

            let record = match Record::parse_line(&line) {
                ParsedLine::Record(record) => record,
                ParsedLine::Rejected(entry) => {
                    write_error(log, &entry, &mut report)?;
                    continue;
                }
            };

            if done.contains(record.rid) {
                report.already_done += 1;
                continue;
            }

            let outcome = self.label_one(&record);
            if self.config.delay_ms > 0 {
                std::thread::sleep(Duration::from_millis(self.config.delay_ms));
            }

            match outcome {
                Ok(labeled) => {
                    write_line(out, &labeled, "labeled record", RecordsError::Output)?;
                    done.insert(labeled.rid);
                    report.labeled += 1;
                    if self.config.progress_every > 0
                        && report.labeled % self.config.progress_every == 0
                    {
                        tracing::info!(batch, labeled = report.labeled, "progress");
                    }
                }
                Err(entry) => write_error(log, &entry, &mut report)?,
            }
        }

        Ok(report)
    }

    /// Ask the source about one record and repair the answer.
    fn label_one(&self, record: &Record) -> Result<LabeledRecord, ErrorEntry> {
        let response = self.source.extract_aspects(&record.text);

        let Some(candidates) = response
            .as_ref()
            .and_then(|v| v.get("aspects"))
            .and_then(Value::as_array)
        else {
            tracing::debug!(rid = record.rid, "response has no aspects list");
            return Err(ErrorEntry::new(record.rid, ErrorKind::InvalidResponse)
                .with_raw(response.clone().unwrap_or(Value::Null)));
        };

        let aspects = build_aspects(
            candidates,
            &record.text,
            &self.annotator,
            self.config.confidence,
        );
        if aspects.is_empty() {
            return Err(ErrorEntry::new(record.rid, ErrorKind::EmptyAspects));
        }

        Ok(LabeledRecord {
            rid: record.rid,
            sentence: record.text.clone(),
            aspects,
        })
    }
}

/// Repair raw aspect candidates into canonical aspects, dropping those
/// without a usable term.
pub fn build_aspects(
    candidates: &[Value],
    sentence: &str,
    annotator: &str,
    confidence: f64,
) -> Vec<Aspect> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let term = value_text(candidate.get("term")?);
            let term = term.trim();
            if term.is_empty() {
                return None;
            }
            let claimed = candidate.get("category").map(value_text).unwrap_or_default();
            let polarity = candidate
                .get("polarity")
                .map(Polarity::coerce)
                .unwrap_or(Polarity::Neutral);

            Some(Aspect {
                term: term.to_string(),
                category: Category::normalize(term, &claimed),
                polarity,
                evidence: term.to_string(),
                evidence_span: find_span(sentence, term),
                annotator: annotator.to_string(),
                confidence,
            })
        })
        .collect()
}

/// String form of an untrusted JSON scalar: strings as-is, `null` as empty,
/// anything else in its JSON rendering.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Failure inside [`BatchLabeler::label_records`], tagged by stream.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("reading batch input failed")]
    Input(#[source] std::io::Error),
    #[error("writing labeled output failed")]
    Output(#[source] std::io::Error),
    #[error("writing error log failed")]
    Log(#[source] std::io::Error),
    #[error("failed to serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },
}

/// Serialize `value` and write it as one complete line in a single write.
/// `on_io` tags a write failure with the stream it happened on.
fn write_line<W: Write, T: Serialize>(
    w: &mut W,
    value: &T,
    what: &'static str,
    on_io: fn(std::io::Error) -> RecordsError,
) -> Result<(), RecordsError> {
    let mut line = serde_json::to_string(value).map_err(|e| RecordsError::Serialize {
        what,
        message: e.to_string(),
    })?;
    line.push('\n');
    w.write_all(line.as_bytes()).map_err(on_io)?;
    w.flush().map_err(on_io)
}

fn write_error<L: Write>(
    log: &mut L,
    entry: &ErrorEntry,
    report: &mut BatchReport,
) -> Result<(), RecordsError> {
    tracing::debug!(rid = %entry.rid, error = %entry.error, "record rejected");
    write_line(log, entry, "error entry", RecordsError::Log)?;
    *report.errors.entry(entry.error).or_default() += 1;
    Ok(())
}

fn append(path: &Path) -> LabelResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::CharSpan;
    use serde_json::json;
    use std::cell::Cell;

    /// Source answering every sentence with the same payload.
    struct Fixed {
        reply: Option<Value>,
        calls: Cell<usize>,
    }

    impl Fixed {
        fn new(reply: Option<Value>) -> Self {
            Self {
                reply,
                calls: Cell::new(0),
            }
        }
    }

    impl AspectSource for Fixed {
        fn extract_aspects(&self, _sentence: &str) -> Option<Value> {
            self.calls.set(self.calls.get() + 1);
            self.reply.clone()
        }

        fn annotator(&self) -> String {
            "ollama:test".into()
        }
    }

    fn quiet() -> LabelingConfig {
        LabelingConfig {
            delay_ms: 0,
            ..Default::default()
        }
    }

    fn run(source: &Fixed, input: &str, done: &mut DoneSet) -> (BatchReport, Vec<Value>, Vec<Value>) {
        let labeler = BatchLabeler::new(source, quiet());
        let mut out = Vec::new();
        let mut log = Vec::new();
        let report = labeler
            .label_records("batch_01", input.as_bytes(), done, &mut out, &mut log)
            .unwrap();
        (report, parse_lines(&out), parse_lines(&log))
    }

    fn parse_lines(bytes: &[u8]) -> Vec<Value> {
        String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn valid_record_is_labeled_with_span_and_stamp() {
        let source = Fixed::new(Some(json!({
            "aspects": [{"term": "사이즈", "category": "사이즈/핏", "polarity": 1}]
        })));
        let (report, out, log) = run(
            &source,
            "{\"rid\": 1, \"sentence\": \"사이즈가 커요\"}\n",
            &mut DoneSet::new(),
        );
        assert_eq!(report.labeled, 1);
        assert!(log.is_empty());
        assert_eq!(
            out[0],
            json!({
                "rid": 1,
                "sentence": "사이즈가 커요",
                "aspects": [{
                    "term": "사이즈",
                    "category": "사이즈/핏",
                    "polarity": 1,
                    "evidence": "사이즈",
                    "evidence_span": [0, 3],
                    "annotator": "ollama:test",
                    "confidence": 1.0
                }]
            })
        );
    }

    #[test]
    fn sentence_is_written_verbatim_and_spans_index_it() {
        let source = Fixed::new(Some(json!({
            "aspects": [{"term": "사이즈", "category": "사이즈/핏", "polarity": -1}]
        })));
        let (_, out, _) = run(
            &source,
            "{\"rid\": 1, \"sentence\": \"  사이즈가 커요\"}\n",
            &mut DoneSet::new(),
        );
        assert_eq!(out[0]["sentence"], "  사이즈가 커요");
        assert_eq!(out[0]["aspects"][0]["evidence_span"], json!([2, 5]));
        let span: CharSpan = serde_json::from_value(out[0]["aspects"][0]["evidence_span"].clone()).unwrap();
        assert_eq!(span.slice("  사이즈가 커요"), Some("사이즈"));
    }

    #[test]
    fn empty_term_yields_empty_aspects_entry() {
        let source = Fixed::new(Some(json!({
            "aspects": [{"term": "", "category": "색상", "polarity": 1}]
        })));
        let (report, out, log) = run(&source, "{\"rid\": 7, \"sentence\": \"색이 예뻐요\"}", &mut DoneSet::new());
        assert!(out.is_empty());
        assert_eq!(log, vec![json!({"rid": 7, "error": "empty_aspects"})]);
        assert_eq!(report.error_count(ErrorKind::EmptyAspects), 1);
    }

    #[test]
    fn missing_aspects_list_is_invalid_response_with_raw() {
        let source = Fixed::new(Some(json!({"aspects": "none"})));
        let (_, out, log) = run(&source, "{\"rid\": 2, \"sentence\": \"좋아요\"}", &mut DoneSet::new());
        assert!(out.is_empty());
        assert_eq!(
            log,
            vec![json!({"rid": 2, "error": "invalid_response", "raw": {"aspects": "none"}})]
        );
    }

    #[test]
    fn source_giving_up_logs_null_raw() {
        let source = Fixed::new(None);
        let (_, _, log) = run(&source, "{\"rid\": 3, \"sentence\": \"좋아요\"}", &mut DoneSet::new());
        assert_eq!(log, vec![json!({"rid": 3, "error": "invalid_response", "raw": null})]);
    }

    #[test]
    fn done_ids_are_skipped_without_calling_source() {
        let source = Fixed::new(Some(json!({"aspects": [{"term": "핏"}]})));
        let mut done: DoneSet = [1].into_iter().collect();
        let input = "{\"rid\": 1, \"sentence\": \"핏 좋아요\"}\n{\"rid\": 2, \"sentence\": \"핏 별로\"}\n";
        let (report, out, _) = run(&source, input, &mut done);
        assert_eq!(report.already_done, 1);
        assert_eq!(report.labeled, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["rid"], 2);
        assert_eq!(source.calls.get(), 1);
        assert!(done.contains(2));
    }

    #[test]
    fn duplicate_rid_within_batch_is_labeled_once() {
        let source = Fixed::new(Some(json!({"aspects": [{"term": "핏"}]})));
        let input = "{\"rid\": 1, \"sentence\": \"핏\"}\n{\"rid\": 1, \"sentence\": \"핏\"}\n";
        let (report, out, _) = run(&source, input, &mut DoneSet::new());
        assert_eq!(out.len(), 1);
        assert_eq!(report.already_done, 1);
    }

    #[test]
    fn input_rejections_are_logged_and_do_not_stop_the_batch() {
        let source = Fixed::new(Some(json!({"aspects": [{"term": "가격", "polarity": "1"}]})));
        let input = "garbage\n{\"sentence\": \"no id\"}\n{\"rid\": 4, \"text\": \"\"}\n\n{\"rid\": 5, \"text\": \"가격 착해요\"}\n";
        let (report, out, log) = run(&source, input, &mut DoneSet::new());
        let kinds: Vec<_> = log.iter().map(|e| e["error"].as_str().unwrap().to_string()).collect();
        assert_eq!(kinds, ["malformed_line", "missing_or_invalid_rid", "empty_sentence"]);
        assert_eq!(report.total_errors(), 3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["aspects"][0]["category"], "가격");
        assert_eq!(out[0]["aspects"][0]["polarity"], 1);
    }

    #[test]
    fn stop_flag_halts_before_next_record() {
        let source = Fixed::new(Some(json!({"aspects": [{"term": "핏"}]})));
        let flag = Arc::new(AtomicBool::new(true));
        let labeler = BatchLabeler::new(&source, quiet()).with_stop_flag(flag);
        let mut out = Vec::new();
        let mut log = Vec::new();
        let report = labeler
            .label_records(
                "batch_01",
                "{\"rid\": 1, \"sentence\": \"핏\"}\n".as_bytes(),
                &mut DoneSet::new(),
                &mut out,
                &mut log,
            )
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.labeled, 0);
        assert_eq!(source.calls.get(), 0);
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_are_tagged_by_stream() {
        let source = Fixed::new(Some(json!({"aspects": [{"term": "핏"}]})));
        let labeler = BatchLabeler::new(&source, quiet());

        let err = labeler
            .label_records(
                "batch_01",
                "{\"rid\": 1, \"sentence\": \"핏\"}\n".as_bytes(),
                &mut DoneSet::new(),
                &mut Broken,
                &mut Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, RecordsError::Output(_)));

        let mut done = DoneSet::new();
        let err = labeler
            .label_records("batch_01", "garbage\n".as_bytes(), &mut done, &mut Vec::new(), &mut Broken)
            .unwrap_err();
        assert!(matches!(err, RecordsError::Log(_)));
        assert!(done.is_empty());
    }

    #[test]
    fn build_aspects_repairs_each_field() {
        let candidates = vec![
            json!({"term": "  길이 ", "category": "size", "polarity": "abc"}),
            json!({"term": "원단", "category": "재질/원단", "polarity": 7}),
            json!({"term": "배송", "polarity": -1}),
            json!({"category": "색상", "polarity": 1}),
            json!({"term": null}),
            json!("just a string"),
        ];
        let aspects = build_aspects(&candidates, "바지 길이가 좀 짧은거 같아요", "ollama:m", 0.5);
        assert_eq!(aspects.len(), 3);

        assert_eq!(aspects[0].term, "길이");
        assert_eq!(aspects[0].category, Category::SizeFit);
        assert_eq!(aspects[0].polarity, Polarity::Neutral);
        assert_eq!(aspects[0].evidence, "길이");
        assert_eq!(
            aspects[0].evidence_span.and_then(|s| s.slice("바지 길이가 좀 짧은거 같아요")),
            Some("길이")
        );

        assert_eq!(aspects[1].category, Category::Material);
        assert_eq!(aspects[1].polarity, Polarity::Neutral);
        assert_eq!(aspects[1].evidence_span, None);

        assert_eq!(aspects[2].category, Category::Delivery);
        assert_eq!(aspects[2].polarity, Polarity::Negative);
        assert_eq!(aspects[2].confidence, 0.5);
        assert_eq!(aspects[2].annotator, "ollama:m");
    }

    #[test]
    fn numeric_term_uses_json_rendering() {
        let aspects = build_aspects(&[json!({"term": 95, "category": "사이즈/핏"})], "95 사이즈", "a", 1.0);
        assert_eq!(aspects[0].term, "95");
        assert_eq!(aspects[0].evidence_span.map(|s| (s.start(), s.end())), Some((0, 2)));
    }
}
