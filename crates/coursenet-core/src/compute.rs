//! Delegated computations: keyword search and similarity links
//!
//! Both run as external worker scripts. Search takes its input as arguments,
//! similarity takes a single framed line on stdin.

use crate::config::ComputeConfig;
use crate::error::{CoreError, Result};
use crate::process::{Invocation, ProcessDelegate};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// Result count used when the caller does not ask for one
pub const DEFAULT_TOPK: usize = 10;

/// Separates the threshold from the slug list in the stdin frame
const FRAME_DELIMITER: char = '#';
const SLUG_SEPARATOR: &str = ",";

/// Free-text course search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub topk: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, topk: Option<usize>) -> Self {
        Self {
            query: query.into(),
            topk: topk.unwrap_or(DEFAULT_TOPK),
        }
    }

    /// Whitespace-separated query words, each passed as its own argument
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.query.split_whitespace()
    }
}

/// Pairwise similarity links between a set of courses
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityRequest {
    pub threshold: f64,
    pub slugs: Vec<String>,
}

impl SimilarityRequest {
    pub fn new(threshold: f64, slugs: Vec<String>) -> Self {
        Self { threshold, slugs }
    }

    /// `threshold#slug1,slug2,...`
    pub fn frame(&self) -> String {
        format!(
            "{}{}{}",
            self.threshold,
            FRAME_DELIMITER,
            self.slugs.join(SLUG_SEPARATOR)
        )
    }
}

/// Runs worker scripts and turns their output into JSON
#[derive(Debug, Clone)]
pub struct Computations {
    config: ComputeConfig,
    delegate: ProcessDelegate,
}

impl Computations {
    pub fn new(config: ComputeConfig) -> Self {
        let delegate = ProcessDelegate::with_default_timeout(config.timeout());
        Self { config, delegate }
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }

    /// Top-k courses matching `query`
    pub async fn search(&self, query: &SearchQuery) -> Result<Value> {
        let invocation = self
            .script(&self.config.search_script)
            .arg(query.topk.to_string())
            .args(query.tokens());

        info!(query = %query.query, topk = query.topk, "Delegating course search");
        self.run_json(&self.config.search_script, &invocation).await
    }

    /// Similarity links among `request.slugs` above `request.threshold`
    pub async fn simlinks(&self, request: &SimilarityRequest) -> Result<Value> {
        let frame = request.frame();
        let invocation = self.script(&self.config.simlinks_script).stdin(frame.clone());

        info!(frame = %frame, slugs = request.slugs.len(), "Delegating similarity links");
        self.run_json(&self.config.simlinks_script, &invocation).await
    }

    fn script(&self, script: &Path) -> Invocation {
        Invocation::new(&self.config.interpreter)
            .arg(script.to_string_lossy())
            .current_dir(&self.config.scripts_dir)
    }

    async fn run_json(&self, script: &Path, invocation: &Invocation) -> Result<Value> {
        let program = script.display().to_string();
        let output = self.delegate.run(invocation).await?;

        info!(
            program = %program,
            exit_code = ?output.exit_code,
            stdout = %output.stdout_lossy(),
            stderr = %output.stderr_lossy(),
            "Worker finished"
        );

        if let Some(stderr) = output.failure(self.config.exit_policy) {
            warn!(program = %program, stderr = %stderr, "Worker reported failure");
            return Err(CoreError::Computation { program, stderr });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|source| CoreError::OutputParse { program, source })
    }
}
