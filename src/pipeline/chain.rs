//! Declared step graphs.
//!
//! A [`ChainBuilder`] describes steps and branches; [`ChainBuilder::build`]
//! flattens them into an immutable [`Chain`] template. Every
//! [`Chain::instantiate`] yields a [`ChainRun`] with its own executed flags
//! and branch slots, so one template can be run any number of times.

use std::sync::Arc;

use strum::Display;
use tracing::{debug, info};

use super::{parse_yes_no, SUMMARY_PROMPT};
use crate::engine::ConversationEngine;
use crate::error::KestrelError;
use crate::types::Turn;

/// Handle to a step inside a [`Chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepId(usize);

/// Branch chosen by an If step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Branch {
    Then,
    Else,
}

#[derive(Debug)]
enum NodeKind {
    Basic {
        prompt: String,
    },
    If {
        prompt: String,
        then_head: Option<usize>,
        else_head: Option<usize>,
    },
    Summary,
    Terminal,
}

#[derive(Debug)]
struct Node {
    name: Option<String>,
    kind: NodeKind,
    engine: Option<Arc<ConversationEngine>>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Node {
    fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("#{index}"))
    }
}

enum PendingKind {
    Basic(String),
    If {
        prompt: String,
        then: ChainBuilder,
        otherwise: ChainBuilder,
    },
    Summary,
    Terminal,
}

impl PendingKind {
    fn is_closing(&self) -> bool {
        !matches!(self, Self::Basic(_))
    }

    fn needs_engine(&self) -> bool {
        !matches!(self, Self::Terminal)
    }
}

struct PendingStep {
    name: Option<String>,
    kind: PendingKind,
    engine: Option<Arc<ConversationEngine>>,
}

/// Declares a chain of steps.
///
/// Nothing may follow an If, Summary or Terminal step; the violation is
/// reported by [`build`](Self::build).
#[derive(Default)]
pub struct ChainBuilder {
    default_engine: Option<Arc<ConversationEngine>>,
    steps: Vec<PendingStep>,
    error: Option<KestrelError>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine for steps that do not name their own. Branches inherit it.
    pub fn with_default_engine(mut self, engine: Arc<ConversationEngine>) -> Self {
        self.default_engine = Some(engine);
        self
    }

    pub fn then(self, prompt: impl Into<String>) -> Self {
        self.push(PendingKind::Basic(prompt.into()), None)
    }

    pub fn then_with(self, prompt: impl Into<String>, engine: Arc<ConversationEngine>) -> Self {
        self.push(PendingKind::Basic(prompt.into()), Some(engine))
    }

    /// Gate on a yes/no answer and continue in `then` or `otherwise`.
    pub fn then_if(
        self,
        prompt: impl Into<String>,
        then: ChainBuilder,
        otherwise: ChainBuilder,
    ) -> Self {
        self.push(
            PendingKind::If {
                prompt: prompt.into(),
                then,
                otherwise,
            },
            None,
        )
    }

    /// Close the chain with a synthesis of what was done.
    pub fn summary(self) -> Self {
        self.push(PendingKind::Summary, None)
    }

    /// Close the chain, returning the previous output unchanged.
    pub fn terminal(self) -> Self {
        self.push(PendingKind::Terminal, None)
    }

    /// Name the most recently added step.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.name = Some(name.into());
        }
        self
    }

    /// Bind the most recently added step to `engine`.
    pub fn on(mut self, engine: Arc<ConversationEngine>) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.engine = Some(engine);
        }
        self
    }

    fn push(mut self, kind: PendingKind, engine: Option<Arc<ConversationEngine>>) -> Self {
        if self.error.is_none() && self.steps.last().is_some_and(|s| s.kind.is_closing()) {
            self.error = Some(KestrelError::Workflow(
                "no step may follow an if, summary or terminal step".into(),
            ));
        }
        self.steps.push(PendingStep {
            name: None,
            kind,
            engine,
        });
        self
    }

    pub fn build(self) -> Result<Chain, KestrelError> {
        if self.steps.is_empty() {
            return Err(KestrelError::Configuration("chain has no steps".into()));
        }
        let mut nodes = Vec::new();
        let (head, tail) = flatten(self, None, None, &mut nodes)?.ok_or_else(|| {
            KestrelError::Configuration("chain has no steps".into())
        })?;
        debug_assert_eq!(head, 0);
        Ok(Chain {
            nodes: Arc::new(nodes),
            tail,
        })
    }
}

/// Append `builder`'s steps to `nodes`; returns (head, tail) indices.
fn flatten(
    builder: ChainBuilder,
    prev: Option<usize>,
    inherited: Option<Arc<ConversationEngine>>,
    nodes: &mut Vec<Node>,
) -> Result<Option<(usize, usize)>, KestrelError> {
    if let Some(error) = builder.error {
        return Err(error);
    }
    let default_engine = builder.default_engine.or(inherited);
    let mut head = None;
    let mut last: Option<usize> = None;

    for step in builder.steps {
        let index = nodes.len();
        let engine = step.engine.or_else(|| default_engine.clone());
        if step.kind.needs_engine() && engine.is_none() {
            let label = step.name.clone().unwrap_or_else(|| format!("#{index}"));
            return Err(KestrelError::Configuration(format!(
                "step {label} has no engine and the chain has no default engine"
            )));
        }

        nodes.push(Node {
            name: step.name,
            kind: NodeKind::Terminal,
            engine,
            prev: last.or(prev),
            next: None,
        });
        if let Some(last) = last {
            nodes[last].next = Some(index);
        }

        let kind = match step.kind {
            PendingKind::Basic(prompt) => NodeKind::Basic { prompt },
            PendingKind::If {
                prompt,
                then,
                otherwise,
            } => {
                let then_head = flatten(then, Some(index), default_engine.clone(), nodes)?;
                let else_head = flatten(otherwise, Some(index), default_engine.clone(), nodes)?;
                NodeKind::If {
                    prompt,
                    then_head: then_head.map(|(h, _)| h),
                    else_head: else_head.map(|(h, _)| h),
                }
            }
            PendingKind::Summary => NodeKind::Summary,
            PendingKind::Terminal => NodeKind::Terminal,
        };
        nodes[index].kind = kind;

        head.get_or_insert(index);
        last = Some(index);
    }

    Ok(head.zip(last))
}

/// Immutable chain template.
#[derive(Debug, Clone)]
pub struct Chain {
    nodes: Arc<Vec<Node>>,
    tail: usize,
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    /// Look up a named step, branches included.
    pub fn step(&self, name: &str) -> Option<StepId> {
        self.nodes
            .iter()
            .position(|n| n.name.as_deref() == Some(name))
            .map(StepId)
    }

    pub fn head(&self) -> StepId {
        StepId(0)
    }

    /// Last step of the top-level chain.
    pub fn tail(&self) -> StepId {
        StepId(self.tail)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fresh run state over this template.
    pub fn instantiate(&self) -> ChainRun {
        ChainRun {
            nodes: Arc::clone(&self.nodes),
            tail: self.tail,
            executed: vec![false; self.nodes.len()],
            branches: vec![None; self.nodes.len()],
            history: Vec::new(),
        }
    }
}

/// One execution of a [`Chain`]. Every step runs at most once.
#[derive(Debug)]
pub struct ChainRun {
    nodes: Arc<Vec<Node>>,
    tail: usize,
    executed: Vec<bool>,
    branches: Vec<Option<Branch>>,
    history: Vec<Turn>,
}

impl ChainRun {
    /// Run the chain from its head with `data` as the first input.
    pub async fn execute(&mut self, data: Option<String>) -> Result<Option<String>, KestrelError> {
        self.execute_step(StepId(self.tail), data).await
    }

    /// Execute from `id`.
    ///
    /// Back-chains to the earliest step that has not run yet, hands it
    /// `data`, then runs forward to the end of the chain, following the
    /// branches the If steps pick. Returns the last output.
    pub async fn execute_step(
        &mut self,
        id: StepId,
        data: Option<String>,
    ) -> Result<Option<String>, KestrelError> {
        let StepId(target) = id;
        if target >= self.nodes.len() {
            return Err(KestrelError::InvalidArgument(format!(
                "no step with index {target}"
            )));
        }
        if self.executed[target] {
            return Err(KestrelError::InvalidState(format!(
                "step {} has already executed",
                self.nodes[target].label(target)
            )));
        }

        let mut start = target;
        while let Some(prev) = self.nodes[start].prev {
            if self.executed[prev] {
                break;
            }
            start = prev;
        }
        if start != target {
            debug!(
                from = %self.nodes[target].label(target),
                to = %self.nodes[start].label(start),
                "Back-chaining to earliest pending step"
            );
        }

        let mut current = Some(start);
        let mut data = data;
        while let Some(index) = current {
            data = self.run_node(index, data).await?;
            self.executed[index] = true;
            current = self.successor(index);
        }
        Ok(data)
    }

    fn successor(&self, index: usize) -> Option<usize> {
        match &self.nodes[index].kind {
            NodeKind::If {
                then_head,
                else_head,
                ..
            } => match self.branches[index] {
                Some(Branch::Then) => *then_head,
                Some(Branch::Else) => *else_head,
                None => None,
            },
            _ => self.nodes[index].next,
        }
    }

    async fn run_node(
        &mut self,
        index: usize,
        data: Option<String>,
    ) -> Result<Option<String>, KestrelError> {
        let nodes = Arc::clone(&self.nodes);
        let node = &nodes[index];
        let label = node.label(index);
        info!(step = %label, "Running chain step");
        let shown = data.as_deref().unwrap_or("none");

        match &node.kind {
            NodeKind::Basic { prompt } => {
                let prompt = format!("user prompt: {prompt}\n data from prev steps: {shown}");
                let text = self.send(node, &label, &prompt).await?;
                Ok(Some(text))
            }
            NodeKind::If { prompt, .. } => {
                let prompt = format!(
                    "The user expects the following prompt to compute to a boolean yes/no answer. \
                     Return True/False and nothing else in your response. Prompt: {prompt}\n \
                     data from prev steps: {shown}.\n\n remember you can ONLY return True/False"
                );
                let answer = self.send(node, &label, &prompt).await?;
                let branch = if parse_yes_no(&answer)? {
                    Branch::Then
                } else {
                    Branch::Else
                };
                if self.branches[index].replace(branch).is_some() {
                    return Err(KestrelError::InvalidState(format!(
                        "branch of step {label} already resolved"
                    )));
                }
                debug!(step = %label, %branch, "Branch resolved");
                Ok(data)
            }
            NodeKind::Summary => {
                let prompt = format!("{SUMMARY_PROMPT}\n Prev data from prev step: {shown}.");
                let text = self.send(node, &label, &prompt).await?;
                Ok(Some(text))
            }
            NodeKind::Terminal => Ok(data),
        }
    }

    async fn send(&mut self, node: &Node, label: &str, prompt: &str) -> Result<String, KestrelError> {
        let engine = node.engine.as_ref().ok_or_else(|| {
            KestrelError::Configuration(format!("step {label} has no engine"))
        })?;
        let result = engine.send(prompt, None).await?;
        self.history.extend(result.history);
        Ok(result.text)
    }

    pub fn is_executed(&self, id: StepId) -> bool {
        self.executed.get(id.0).copied().unwrap_or(false)
    }

    /// Branch an If step picked during this run.
    pub fn branch(&self, id: StepId) -> Option<Branch> {
        self.branches.get(id.0).copied().flatten()
    }

    /// Turns appended by every step of this run.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }
}
