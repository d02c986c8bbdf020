//! Pipeline templates and resolved step plans

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::deployment::Deployment;
use crate::models::service::Service;

/// Phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Build,
    Deploy,
    Verify,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Build => "build",
            PhaseKind::Deploy => "deploy",
            PhaseKind::Verify => "verify",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure signature of a step whose target may legitimately be absent.
///
/// Matches only a non-zero exit whose code is listed AND whose captured
/// stderr contains at least one of the patterns (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenignSignature {
    #[serde(default)]
    pub exit_codes: Vec<i32>,

    #[serde(default)]
    pub stderr_patterns: Vec<String>,
}

/// A step as written in a pipeline template, before substitution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Extra attempts after a non-benign failure
    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub benign: Option<BenignSignature>,
}

/// Ordered step templates for each phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTemplate {
    #[serde(default)]
    pub build: Vec<StepTemplate>,

    #[serde(default)]
    pub deploy: Vec<StepTemplate>,

    #[serde(default)]
    pub verify: Vec<StepTemplate>,
}

impl PipelineTemplate {
    /// Built-in container pipeline used when a runtime has no configured template
    pub fn container_default() -> Self {
        Self {
            build: vec![step(
                "pull artifact",
                "docker",
                &["pull", "{service}:{version}"],
            )],
            deploy: vec![
                StepTemplate {
                    benign: Some(BenignSignature {
                        exit_codes: vec![1],
                        stderr_patterns: vec!["No such container".to_string()],
                    }),
                    ..step("stop previous instance", "docker", &["rm", "-f", "{service}"])
                },
                step(
                    "start instance",
                    "docker",
                    &[
                        "run",
                        "-d",
                        "--name",
                        "{service}",
                        "--restart",
                        "unless-stopped",
                        "{service}:{version}",
                    ],
                ),
            ],
            verify: vec![step(
                "check instance",
                "docker",
                &["container", "inspect", "{service}"],
            )],
        }
    }

    /// Substitute placeholders and merge service environment into every step
    pub fn render(&self, ctx: &TemplateContext) -> Pipeline {
        let render_phase = |kind: PhaseKind, steps: &[StepTemplate]| Phase {
            kind,
            steps: steps.iter().map(|s| s.render(ctx)).collect(),
        };

        Pipeline {
            phases: vec![
                render_phase(PhaseKind::Build, &self.build),
                render_phase(PhaseKind::Deploy, &self.deploy),
                render_phase(PhaseKind::Verify, &self.verify),
            ],
        }
    }
}

/// Pipeline templates keyed by service runtime
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
    templates: BTreeMap<String, PipelineTemplate>,
    fallback: PipelineTemplate,
}

impl PipelineCatalog {
    pub fn new(templates: BTreeMap<String, PipelineTemplate>) -> Self {
        Self {
            templates,
            fallback: PipelineTemplate::container_default(),
        }
    }

    pub fn for_runtime(&self, runtime: &str) -> &PipelineTemplate {
        self.templates.get(runtime).unwrap_or(&self.fallback)
    }
}

fn step(name: &str, command: &str, args: &[&str]) -> StepTemplate {
    StepTemplate {
        name: name.to_string(),
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: BTreeMap::new(),
        retries: 0,
        benign: None,
    }
}

impl StepTemplate {
    fn render(&self, ctx: &TemplateContext) -> StepSpec {
        let mut env = ctx.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), ctx.substitute(v))));

        StepSpec {
            name: self.name.clone(),
            command: StepCommand {
                program: ctx.substitute(&self.command),
                args: self.args.iter().map(|a| ctx.substitute(a)).collect(),
                env,
            },
            retries: self.retries,
            benign: self.benign.clone(),
        }
    }
}

/// Values available to template placeholders
#[derive(Debug, Clone)]
pub struct TemplateContext {
    vars: Vec<(&'static str, String)>,
    env: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new(service: &Service, deployment: &Deployment) -> Self {
        let vars = vec![
            ("{service}", service.name.clone()),
            ("{service_id}", service.id.clone()),
            ("{project_id}", service.project_id.clone()),
            ("{deployment_id}", deployment.id.clone()),
            (
                "{version}",
                deployment.version.clone().unwrap_or_else(|| "latest".to_string()),
            ),
            ("{commit}", deployment.commit_hash.clone().unwrap_or_default()),
            ("{replicas}", service.replicas.to_string()),
        ];
        Self {
            vars,
            env: service.env.clone(),
        }
    }

    pub fn substitute(&self, input: &str) -> String {
        self.vars
            .iter()
            .fold(input.to_string(), |acc, (key, value)| acc.replace(key, value))
    }
}

/// A fully resolved external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl StepCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }
}

impl fmt::Display for StepCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A resolved step ready for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub name: String,
    pub command: StepCommand,
    pub retries: u32,
    pub benign: Option<BenignSignature>,
}

/// A resolved phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub kind: PhaseKind,
    pub steps: Vec<StepSpec>,
}

/// Resolved phases in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub phases: Vec<Phase>,
}

impl Pipeline {
    pub fn phase(&self, kind: PhaseKind) -> Option<&Phase> {
        self.phases.iter().find(|p| p.kind == kind)
    }
}
