use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ClusterClient, CommandOutput};
use crate::error::{EagleError, Result};

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub context: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl Call {
    pub fn line(&self) -> String {
        self.args.join(" ")
    }
}

#[derive(Debug, Clone)]
struct Reply {
    success: bool,
    stdout: Option<String>,
}

impl Reply {
    fn ok() -> Self {
        Self {
            success: true,
            stdout: None,
        }
    }

    fn fail() -> Self {
        Self {
            success: false,
            stdout: None,
        }
    }
}

struct Rule {
    context: Option<String>,
    needle: String,
    /// Scripted replies consumed in order; `then` applies once exhausted.
    script: VecDeque<Reply>,
    then: Reply,
}

/// Recording cluster. Every command succeeds unless a rule says otherwise.
/// Namespace and pod phase queries answer `Active` / `Succeeded` by default.
#[derive(Default)]
pub(crate) struct FakeCluster {
    calls: Mutex<Vec<Call>>,
    rules: Mutex<Vec<Rule>>,
    missing: Option<String>,
    panic_on: Option<String>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn missing_prerequisite(reason: &str) -> Self {
        Self {
            missing: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// Panic on any command whose args contain `needle`.
    pub fn panic_on(mut self, needle: &str) -> Self {
        self.panic_on = Some(needle.to_string());
        self
    }

    /// Commands in `context` whose args contain `needle` always fail.
    pub fn fail(self, context: &str, needle: &str) -> Self {
        self.push(Some(context), needle, VecDeque::new(), Reply::fail())
    }

    /// Commands anywhere whose args contain `needle` always fail.
    pub fn fail_everywhere(self, needle: &str) -> Self {
        self.push(None, needle, VecDeque::new(), Reply::fail())
    }

    /// Fail `n` times, then succeed.
    pub fn succeed_after(self, context: &str, needle: &str, n: usize) -> Self {
        let script = std::iter::repeat(Reply::fail()).take(n).collect();
        self.push(Some(context), needle, script, Reply::ok())
    }

    /// Succeed with the given stdout values in order, then with `then`.
    pub fn stdout_sequence(self, needle: &str, outputs: &[&str], then: &str) -> Self {
        let script = outputs
            .iter()
            .map(|s| Reply {
                success: true,
                stdout: Some(s.to_string()),
            })
            .collect();
        let then = Reply {
            success: true,
            stdout: Some(then.to_string()),
        };
        self.push(None, needle, script, then)
    }

    fn push(self, context: Option<&str>, needle: &str, script: VecDeque<Reply>, then: Reply) -> Self {
        self.rules.lock().unwrap().push(Rule {
            context: context.map(str::to_string),
            needle: needle.to_string(),
            script,
            then,
        });
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.line().contains(needle))
            .collect()
    }

    fn reply(&self, context: &str, line: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            let ctx_ok = rule.context.as_deref().map_or(true, |c| c == context);
            if ctx_ok && line.contains(&rule.needle) {
                return rule.script.pop_front().unwrap_or_else(|| rule.then.clone());
            }
        }
        Reply::ok()
    }
}

fn default_stdout(line: &str) -> String {
    if line.starts_with("get namespace") {
        "Active".to_string()
    } else if line.starts_with("get pod") {
        "Succeeded".to_string()
    } else {
        String::new()
    }
}

impl ClusterClient for FakeCluster {
    async fn preflight(&self, _contexts: &[String]) -> Result<()> {
        match &self.missing {
            Some(reason) => Err(EagleError::PrerequisiteMissing(reason.clone())),
            None => Ok(()),
        }
    }

    async fn run(
        &self,
        context: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput> {
        let call = Call {
            context: context.to_string(),
            args: args.to_vec(),
            stdin: stdin.map(str::to_string),
        };
        let line = call.line();
        self.calls.lock().unwrap().push(call);
        if let Some(needle) = &self.panic_on {
            if line.contains(needle.as_str()) {
                panic!("cluster client panicked on '{line}'");
            }
        }

        let reply = self.reply(context, &line);
        if reply.success {
            Ok(CommandOutput {
                success: true,
                stdout: reply.stdout.unwrap_or_else(|| default_stdout(&line)),
                stderr: String::new(),
            })
        } else {
            Ok(CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("error: scripted failure for '{line}'"),
            })
        }
    }
}
