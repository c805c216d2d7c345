//! Claude Code headless provider.
//!
//! [`ClaudeHeadless`] runs the `claude` CLI in non-interactive mode (`-p`)
//! with JSON output. [`ClaudeBackend`] builds the planning, solving and
//! synthesis prompts on top of it and implements the capability traits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::core::task::TaskId;
use crate::error::{CapabilityError, Error, Result};
use crate::orchestration::capability::{
    format_hits, CapabilityResult, Plan, Planner, SearchTool, SolveRequest, Synthesizer,
    TaskSolver,
};
use crate::orchestration::planner::parse_plan;

/// Default timeout for one Claude invocation (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Search round trips a solver may request before it must answer.
pub const DEFAULT_MAX_SEARCH_ROUNDS: usize = 3;

const SEARCH_PREFIX: &str = "SEARCH:";

/// The result type from a Claude execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Success { output: String },
    Error { message: String },
}

/// Response from a Claude headless execution.
#[derive(Debug, Clone)]
pub struct ClaudeResponse {
    pub session_id: Option<String>,
    pub result: ResultType,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
}

impl ClaudeResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.result, ResultType::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { output } => Some(output),
            ResultType::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { .. } => None,
            ResultType::Error { message } => Some(message),
        }
    }

    fn from_error(message: String) -> Self {
        Self {
            session_id: None,
            result: ResultType::Error { message },
            cost_usd: None,
            duration_ms: None,
            num_turns: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClaudeResponse {
    subtype: Option<String>,
    result: Option<String>,
    session_id: Option<String>,
    total_cost_usd: Option<f64>,
    duration_ms: Option<u64>,
    num_turns: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// Runs `claude -p <prompt> --output-format json` as a subprocess.
///
/// The child is killed if the invocation is dropped, so cancelling a
/// worker also stops its model call.
///
/// # Example
///
/// ```ignore
/// let claude = ClaudeHeadless::new("claude")?;
/// let response = claude.execute("Say hello").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ClaudeHeadless {
    binary: PathBuf,
    timeout: Duration,
}

impl ClaudeHeadless {
    /// Locate `command` on `PATH`.
    ///
    /// # Errors
    /// `BinaryNotFound` if the command cannot be found.
    pub fn new(command: impl AsRef<Path>) -> Result<Self> {
        let command = command.as_ref();
        let binary = which::which(command)
            .map_err(|_| Error::BinaryNotFound(command.display().to_string()))?;
        Ok(Self::with_binary(binary))
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute one prompt.
    ///
    /// # Errors
    /// `Io` if the command fails to spawn, `Timeout` if it runs too long.
    /// A non-zero exit is reported as an error response, not an `Err`.
    pub async fn execute(&self, prompt: &str) -> Result<ClaudeResponse> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .arg("-p")
                .arg(prompt)
                .arg("--output-format")
                .arg("json")
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))?
        .map_err(Error::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(response) = Self::parse_json_response(&stdout) {
            return Ok(response);
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "claude exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(ClaudeResponse::from_error(message));
        }

        Ok(ClaudeResponse {
            session_id: None,
            result: ResultType::Success {
                output: stdout.trim().to_string(),
            },
            cost_usd: None,
            duration_ms: None,
            num_turns: None,
        })
    }

    /// Parse the JSON document printed by `--output-format json`.
    pub fn parse_json_response(json_str: &str) -> Result<ClaudeResponse> {
        let raw: RawClaudeResponse = serde_json::from_str(json_str)?;

        let result = match raw.subtype.as_deref() {
            Some("success") => ResultType::Success {
                output: raw.result.unwrap_or_default(),
            },
            Some(subtype) if subtype.starts_with("error") => ResultType::Error {
                message: raw.error.or(raw.result).unwrap_or_else(|| subtype.to_string()),
            },
            _ => match (raw.error, raw.result) {
                (Some(error), _) => ResultType::Error { message: error },
                (None, Some(result)) => ResultType::Success { output: result },
                (None, None) => ResultType::Error {
                    message: "Unknown response format".to_string(),
                },
            },
        };

        Ok(ClaudeResponse {
            session_id: raw.session_id,
            result,
            cost_usd: raw.total_cost_usd,
            duration_ms: raw.duration_ms,
            num_turns: raw.num_turns,
        })
    }
}

/// Planner, solver and synthesizer backed by one [`ClaudeHeadless`].
#[derive(Debug, Clone)]
pub struct ClaudeBackend {
    headless: ClaudeHeadless,
    max_search_rounds: usize,
}

impl ClaudeBackend {
    pub fn new(headless: ClaudeHeadless) -> Self {
        Self {
            headless,
            max_search_rounds: DEFAULT_MAX_SEARCH_ROUNDS,
        }
    }

    pub fn with_max_search_rounds(mut self, rounds: usize) -> Self {
        self.max_search_rounds = rounds;
        self
    }

    pub fn headless(&self) -> &ClaudeHeadless {
        &self.headless
    }

    /// Run `prompt` and return the model's text, or a message describing
    /// why there is none.
    async fn ask(&self, prompt: &str) -> std::result::Result<String, String> {
        let response = self.headless.execute(prompt).await.map_err(|e| e.to_string())?;
        debug!(
            cost_usd = response.cost_usd.unwrap_or_default(),
            turns = response.num_turns.unwrap_or_default(),
            "claude responded"
        );
        match response.result {
            ResultType::Success { output } => Ok(output),
            ResultType::Error { message } => Err(message),
        }
    }
}

#[async_trait]
impl Planner for ClaudeBackend {
    async fn plan(&self, query: &str) -> CapabilityResult<Plan> {
        let text = self
            .ask(&planning_prompt(query))
            .await
            .map_err(CapabilityError::Planning)?;
        parse_plan(&text).map_err(|e| CapabilityError::Planning(e.to_string()))
    }
}

#[async_trait]
impl TaskSolver for ClaudeBackend {
    async fn solve(
        &self,
        request: &SolveRequest,
        search: Option<&dyn SearchTool>,
    ) -> CapabilityResult<String> {
        let mut prompt = solving_prompt(request, search.is_some());
        let mut rounds = 0;
        loop {
            let reply = self.ask(&prompt).await.map_err(CapabilityError::Solver)?;
            let tool = match search {
                Some(tool) if rounds < self.max_search_rounds => tool,
                _ => return Ok(reply),
            };
            let Some(query) = search_request(&reply) else {
                return Ok(reply);
            };

            rounds += 1;
            debug!(task_id = %request.task_id, %query, round = rounds, "solver requested search");
            let hits = tool.search(query).await?;
            prompt = format!(
                "{}\n\nSearch results for \"{}\":\n{}\n\n{}",
                prompt,
                query,
                format_hits(&hits),
                if rounds < self.max_search_rounds {
                    "Answer the task now, or request one more search."
                } else {
                    "Answer the task now. No more searches are available."
                }
            );
        }
    }
}

#[async_trait]
impl Synthesizer for ClaudeBackend {
    async fn synthesize(
        &self,
        query: &str,
        results: &BTreeMap<TaskId, String>,
    ) -> CapabilityResult<String> {
        self.ask(&synthesis_prompt(query, results))
            .await
            .map_err(CapabilityError::Synthesis)
    }
}

fn planning_prompt(query: &str) -> String {
    format!(
        "You are a planner. Break the request below into a small set of atomic tasks \
that can be carried out independently once their inputs are available.\n\n\
Respond with a single JSON object and nothing else:\n\
{{\"goal\": \"<restated goal>\", \"plan\": [{{\"id\": \"task-001\", \"instructions\": \"...\", \
\"success_criteria\": \"...\", \"inputs\": [\"<ids of tasks whose results this task needs>\"], \
\"notes\": \"...\"}}]}}\n\n\
Rules: ids are unique; inputs only name earlier tasks; there are no cycles.\n\n\
Request:\n{}",
        query
    )
}

fn solving_prompt(request: &SolveRequest, can_search: bool) -> String {
    let mut prompt = String::from("You are a worker completing one task of a larger plan.\n\n");
    prompt.push_str(&request.prompt());
    if can_search {
        prompt.push_str(&format!(
            "\n\nIf the task needs current information, reply with exactly one line \
`{} <search query>` and nothing else. Otherwise reply with the task result.",
            SEARCH_PREFIX
        ));
    }
    prompt
}

fn synthesis_prompt(query: &str, results: &BTreeMap<TaskId, String>) -> String {
    let sections = results
        .iter()
        .map(|(id, result)| format!("[{}]\n{}", id, result))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Combine the task results below into one coherent answer to the original request. \
Do not mention the tasks themselves.\n\nOriginal request:\n{}\n\nTask results:\n{}",
        query, sections
    )
}

/// The query of a `SEARCH: <query>` reply, if that is what the model sent.
fn search_request(reply: &str) -> Option<&str> {
    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;
    let query = line.strip_prefix(SEARCH_PREFIX)?.trim();
    (!query.is_empty()).then_some(query)
}
