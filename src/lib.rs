// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # absa-seed
//!
//! Weak-label seeding for aspect-based sentiment analysis (ABSA) of Korean
//! fashion-product reviews. A locally hosted Ollama model proposes aspects
//! for every review; this crate repairs its output into a fixed schema and
//! writes resumable, append-only JSONL streams for later human review.
//!
//! ## Pipeline
//!
//! - **Partition** (`corpus`): raw corpus → `batch_NN.jsonl`
//! - **Label** (`labeling`): each batch → `seeds_batch_NN.jsonl` + `errors_batch_NN.log`,
//!   driven by an [`llm::AspectSource`] and repaired through
//!   [`category`], [`span`] and [`response`]
//! - **Merge** (`corpus`): all `seeds_batch_*.jsonl` → one labeled corpus
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::Path;
//! use absa_seed::config::AppConfig;
//! use absa_seed::labeling::BatchLabeler;
//! use absa_seed::llm::OllamaClient;
//!
//! let config = AppConfig::default();
//! let client = OllamaClient::new(config.ollama.clone());
//! let labeler = BatchLabeler::new(&client, config.labeling.clone());
//! let reports = labeler
//!     .label_dir(Path::new("batches"), Path::new("seeds"))
//!     .unwrap();
//! println!("{} batches labeled", reports.len());
//! ```

pub mod category;
pub mod config;
pub mod corpus;
pub mod error;
pub mod labeling;
pub mod llm;
pub mod model;
pub mod response;
pub mod span;
