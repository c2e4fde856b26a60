//! Plan definitions, validation, and the factory that turns a goal into a
//! running [`ExecutionGraph`].
//!
//! A [`PlanDefinition`] is the static, author-written shape of a workflow:
//! an ordered set of steps with dependencies, input templates, and the
//! conditions under which the plan applies to an incoming goal.
//! [`PlanFactory`] resolves a goal to a definition, merges variables,
//! substitutes them into each step's input template, and materializes the
//! result as a `langgraph_core::exec_graph::ExecutionGraph`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use langgraph_core::exec_graph::{
    ExecutionGraph, ExecutionGraphDefinition, NodeHandler, NodeRetryPolicy, NodeSpec, NodeType,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PlanError, Result};
use crate::expression;

/// Variable names that must never be resolved from the variables map, even
/// if present there, because they could be used to pollute a JS-style
/// prototype chain if this template ever round-trips through JSON into a
/// dynamically-typed consumer. `${__proto__}`, `${constructor}` and
/// `${prototype}` are always left as literal text.
const RESERVED_SUBSTITUTION_NAMES: [&str; 3] = ["__proto__", "constructor", "prototype"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Alerts,
    Analytics,
    Automation,
    Coding,
    Chat,
}

/// One way a goal can be matched to a plan. The highest-priority condition
/// that matches across all candidate plans wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputCondition {
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub priority: i64,
}

impl InputCondition {
    fn matches(&self, goal: &str, variables: &Map<String, Value>) -> Result<bool> {
        if let Some(pattern) = &self.pattern {
            let re = Regex::new(pattern)?;
            if re.is_match(goal) {
                return Ok(true);
            }
        }
        if !self.keywords.is_empty() {
            let tokens: HashSet<&str> = goal.split_whitespace().collect();
            if self.keywords.iter().any(|kw| tokens.contains(kw.as_str())) {
                return Ok(true);
            }
        }
        if let Some(expr) = &self.expression {
            if expression::evaluate(expr, variables)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStepDefinition {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub capability_label: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub retry_policy: Option<NodeRetryPolicy>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default = "default_node_type")]
    pub node_type: NodeType,
}

fn default_node_type() -> NodeType {
    NodeType::Task
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub id: String,
    pub name: String,
    pub workflow_type: WorkflowType,
    pub steps: Vec<PlanStepDefinition>,
    #[serde(default)]
    pub entry_steps: Vec<String>,
    #[serde(default)]
    pub input_conditions: Vec<InputCondition>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub version: u32,
}

fn default_true() -> bool {
    true
}

/// Lookup table of well-known capability strings to a human label, used to
/// fill in `capabilityLabel` when a step's author didn't specify one.
fn known_capability_label(capability: &str) -> Option<&'static str> {
    match capability {
        "repo.read" => Some("Read repository"),
        "repo.write" => Some("Modify repository"),
        "shell.exec" => Some("Execute shell command"),
        "http.fetch" => Some("Fetch HTTP resource"),
        "llm.complete" => Some("LLM completion"),
        "alert.notify" => Some("Send alert notification"),
        _ => None,
    }
}

/// Validates plan definitions against the structural invariants: unique
/// step ids, reference integrity, acyclicity, and at least one entry step.
pub struct PlanValidator;

impl PlanValidator {
    /// Validate and normalize a single plan, filling in `capabilityLabel`
    /// and `entrySteps` when the author left them unspecified.
    pub fn validate(plan: &mut PlanDefinition) -> Result<()> {
        let plan_id = plan.id.clone();
        let invalid = |reason: String| PlanError::InvalidPlan {
            plan_id: plan_id.clone(),
            reason,
        };

        if plan.steps.is_empty() {
            return Err(invalid("plan has no steps".to_string()));
        }

        let mut seen = HashSet::with_capacity(plan.steps.len());
        for step in &plan.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
        }

        let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &plan.steps {
            for dep in &step.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
            for target in &step.transitions {
                if !ids.contains(target.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' transitions to unknown step '{}'",
                        step.id, target
                    )));
                }
            }
        }

        detect_cycle(plan).map_err(&invalid)?;

        if plan.entry_steps.is_empty() {
            plan.entry_steps = plan
                .steps
                .iter()
                .filter(|s| s.dependencies.is_empty())
                .map(|s| s.id.clone())
                .collect();
        }
        if plan.entry_steps.is_empty() {
            return Err(invalid(
                "plan has no entry steps and none could be inferred".to_string(),
            ));
        }

        for step in &mut plan.steps {
            if step.capability_label.is_none() {
                if let Some(cap) = &step.capability {
                    step.capability_label = known_capability_label(cap).map(str::to_string);
                }
            }
        }

        Ok(())
    }

    /// Enforce plan-id uniqueness across a collection loaded from one file.
    pub fn validate_collection(plans: &[PlanDefinition]) -> Result<()> {
        let mut seen = HashSet::with_capacity(plans.len());
        for plan in plans {
            if !seen.insert(plan.id.as_str()) {
                return Err(PlanError::DuplicatePlanId(plan.id.clone()));
            }
        }
        Ok(())
    }
}

fn detect_cycle(plan: &PlanDefinition) -> std::result::Result<(), String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let deps: HashMap<&str, &Vec<String>> = plan
        .steps
        .iter()
        .map(|s| (s.id.as_str(), &s.dependencies))
        .collect();
    let mut colors: HashMap<&str, Color> =
        plan.steps.iter().map(|s| (s.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        deps: &HashMap<&'a str, &'a Vec<String>>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> std::result::Result<(), String> {
        match colors.get(id) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => return Err(format!("cycle detected at step '{id}'")),
            _ => {}
        }
        colors.insert(id, Color::Gray);
        if let Some(dependencies) = deps.get(id) {
            for dep in dependencies.iter() {
                visit(dep.as_str(), deps, colors)?;
            }
        }
        colors.insert(id, Color::Black);
        Ok(())
    }

    for step in &plan.steps {
        visit(step.id.as_str(), &deps, &mut colors)?;
    }
    Ok(())
}

/// Replace every `${name}` occurrence in a string with the stringified
/// value of `variables[name]`, except for the reserved names
/// `__proto__`, `constructor`, and `prototype`, which are always left
/// untouched regardless of what the variables map contains.
fn substitute_string(template: &str, variables: &Map<String, Value>) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.-]+)\}").unwrap());

    re.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        if RESERVED_SUBSTITUTION_NAMES.contains(&name) {
            return caps[0].to_string();
        }
        match variables.get(name) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Recursively substitute `${name}` references into every string leaf of
/// `value`. Non-string leaves pass through untouched.
pub fn substitute(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_string(s, variables)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Caller-supplied parameters for [`PlanFactory::create_plan`].
#[derive(Debug, Clone, Default)]
pub struct CreatePlanOptions {
    pub goal: String,
    pub plan_id: Option<String>,
    pub workflow_type: Option<WorkflowType>,
    pub variables: Map<String, Value>,
    pub subject: Option<String>,
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub concurrency_limit: Option<usize>,
}

/// The materialized result of resolving a goal (or explicit plan id) to a
/// running execution graph.
pub struct PlanInstance {
    pub execution_id: String,
    pub definition: PlanDefinition,
    pub goal: String,
    pub variables: Map<String, Value>,
    pub graph: Arc<ExecutionGraph>,
}

/// Resolves goals to plan definitions and materializes them into
/// [`ExecutionGraph`]s, installing whatever node handlers were registered
/// via [`PlanFactory::register_handler`].
pub struct PlanFactory {
    plans: DashMap<String, PlanDefinition>,
    handlers: DashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl PlanFactory {
    /// Validate and register every plan in `plans`. Fails on the first
    /// invalid plan or on a duplicate id within the collection.
    pub fn new(plans: Vec<PlanDefinition>) -> Result<Self> {
        PlanValidator::validate_collection(&plans)?;
        let mut validated = Vec::with_capacity(plans.len());
        for mut plan in plans {
            PlanValidator::validate(&mut plan)?;
            validated.push(plan);
        }
        let map = DashMap::with_capacity(validated.len());
        for plan in validated {
            map.insert(plan.id.clone(), plan);
        }
        Ok(Self {
            plans: map,
            handlers: DashMap::new(),
        })
    }

    /// Install a handler applied to every node of `node_type` in graphs
    /// built after this call.
    pub fn register_handler(&self, node_type: NodeType, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type, handler);
    }

    /// Resolve a plan by goal (or explicit `planId`), merge variables, and
    /// materialize an `ExecutionGraph`.
    pub async fn create_plan(&self, options: CreatePlanOptions) -> Result<PlanInstance> {
        let definition = match &options.plan_id {
            Some(id) => self
                .plans
                .get(id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| PlanError::PlanNotFound(id.clone()))?,
            None => self.select_plan(&options)?,
        };
        self.materialize(definition, options).await
    }

    /// Resolve a plan directly by id, bypassing goal matching. `goal`
    /// defaults to the plan's name if not supplied.
    pub async fn create_plan_by_id(
        &self,
        plan_id: &str,
        mut options: CreatePlanOptions,
    ) -> Result<PlanInstance> {
        let definition = self
            .plans
            .get(plan_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))?;
        if options.goal.is_empty() {
            options.goal = definition.name.clone();
        }
        self.materialize(definition, options).await
    }

    fn select_plan(&self, options: &CreatePlanOptions) -> Result<PlanDefinition> {
        let mut best: Option<(i64, PlanDefinition)> = None;
        for entry in self.plans.iter() {
            let plan = entry.value();
            if !plan.enabled {
                continue;
            }
            if let Some(wanted) = options.workflow_type {
                if plan.workflow_type != wanted {
                    continue;
                }
            }
            for condition in &plan.input_conditions {
                if condition.matches(&options.goal, &options.variables)? {
                    let better = match &best {
                        Some((priority, _)) => condition.priority > *priority,
                        None => true,
                    };
                    if better {
                        best = Some((condition.priority, plan.clone()));
                    }
                }
            }
        }
        best.map(|(_, plan)| plan).ok_or(PlanError::NoMatchingPlan)
    }

    async fn materialize(
        &self,
        definition: PlanDefinition,
        options: CreatePlanOptions,
    ) -> Result<PlanInstance> {
        let execution_id = uuid::Uuid::new_v4().to_string();

        let mut variables = definition.variables.clone();
        for (k, v) in options.variables.clone() {
            variables.insert(k, v);
        }
        variables.insert("goal".to_string(), Value::String(options.goal.clone()));
        variables.insert("planId".to_string(), Value::String(definition.id.clone()));
        variables.insert("executionId".to_string(), Value::String(execution_id.clone()));
        if let Some(tenant_id) = &options.tenant_id {
            variables.insert("tenantId".to_string(), Value::String(tenant_id.clone()));
        }
        if let Some(user_id) = &options.user_id {
            variables.insert("userId".to_string(), Value::String(user_id.clone()));
        }
        if let Some(session_id) = &options.session_id {
            variables.insert("sessionId".to_string(), Value::String(session_id.clone()));
        }
        if let Some(subject) = &options.subject {
            variables.insert("subject".to_string(), Value::String(subject.clone()));
        }

        let nodes = definition
            .steps
            .iter()
            .map(|step| NodeSpec {
                id: step.id.clone(),
                node_type: step.node_type,
                dependencies: step.dependencies.clone(),
                config: {
                    let mut config = Map::new();
                    config.insert("input".to_string(), substitute(&step.input, &variables));
                    if let Some(tool) = &step.tool {
                        config.insert("tool".to_string(), Value::String(tool.clone()));
                    }
                    config.insert("action".to_string(), Value::String(step.action.clone()));
                    Value::Object(config)
                },
                timeout: step
                    .timeout_seconds
                    .map(|secs| std::time::Duration::from_secs(secs)),
                retry_policy: step.retry_policy.clone(),
                continue_on_error: step.continue_on_error,
            })
            .collect();

        let graph_definition = ExecutionGraphDefinition {
            graph_id: execution_id.clone(),
            nodes,
            entry_nodes: definition.entry_steps.clone(),
        };

        let concurrency_limit = options.concurrency_limit.unwrap_or(0);
        let graph = ExecutionGraph::with_concurrency(graph_definition, concurrency_limit).map_err(|source| {
            PlanError::PlanMaterializationFailed {
                plan_id: definition.id.clone(),
                source,
            }
        })?;

        for entry in self.handlers.iter() {
            graph.register_handler(*entry.key(), entry.value().clone()).await;
        }

        tracing::info!(
            plan_id = %definition.id,
            execution_id = %execution_id,
            goal = %options.goal,
            "plan.created"
        );

        Ok(PlanInstance {
            execution_id,
            definition,
            goal: options.goal,
            variables,
            graph: Arc::new(graph),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, deps: &[&str]) -> PlanStepDefinition {
        PlanStepDefinition {
            id: id.to_string(),
            action: "noop".to_string(),
            tool: None,
            capability: None,
            capability_label: None,
            labels: vec![],
            timeout_seconds: Some(30),
            approval_required: false,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            transitions: vec![],
            input: json!({}),
            retry_policy: None,
            continue_on_error: false,
            node_type: NodeType::Task,
        }
    }

    fn plan(id: &str, steps: Vec<PlanStepDefinition>) -> PlanDefinition {
        PlanDefinition {
            id: id.to_string(),
            name: id.to_string(),
            workflow_type: WorkflowType::Automation,
            steps,
            entry_steps: vec![],
            input_conditions: vec![],
            variables: Map::new(),
            enabled: true,
            version: 1,
        }
    }

    #[test]
    fn validator_rejects_duplicate_step_ids() {
        let mut p = plan("p1", vec![step("a", &[]), step("a", &[])]);
        assert!(PlanValidator::validate(&mut p).is_err());
    }

    #[test]
    fn validator_rejects_unknown_dependency() {
        let mut p = plan("p1", vec![step("a", &["missing"])]);
        assert!(PlanValidator::validate(&mut p).is_err());
    }

    #[test]
    fn validator_rejects_cycles() {
        let mut p = plan(
            "p1",
            vec![step("a", &["b"]), step("b", &["a"])],
        );
        assert!(PlanValidator::validate(&mut p).is_err());
    }

    #[test]
    fn validator_infers_entry_steps() {
        let mut p = plan("p1", vec![step("a", &[]), step("b", &["a"])]);
        PlanValidator::validate(&mut p).unwrap();
        assert_eq!(p.entry_steps, vec!["a".to_string()]);
    }

    #[test]
    fn validator_fills_capability_label() {
        let mut s = step("a", &[]);
        s.capability = Some("repo.read".to_string());
        let mut p = plan("p1", vec![s]);
        PlanValidator::validate(&mut p).unwrap();
        assert_eq!(p.steps[0].capability_label.as_deref(), Some("Read repository"));
    }

    #[test]
    fn validator_detects_duplicate_plan_ids_in_collection() {
        let plans = vec![plan("dup", vec![step("a", &[])]), plan("dup", vec![step("b", &[])])];
        assert!(PlanValidator::validate_collection(&plans).is_err());
    }

    #[test]
    fn substitute_replaces_known_variables() {
        let mut variables = Map::new();
        variables.insert("name".to_string(), json!("alice"));
        let template = json!({"greeting": "hello ${name}", "count": 3});
        let result = substitute(&template, &variables);
        assert_eq!(result["greeting"], json!("hello alice"));
        assert_eq!(result["count"], json!(3));
    }

    #[test]
    fn substitute_leaves_unknown_variables_literal() {
        let variables = Map::new();
        let result = substitute(&json!("hi ${missing}"), &variables);
        assert_eq!(result, json!("hi ${missing}"));
    }

    #[test]
    fn substitute_never_resolves_reserved_prototype_names() {
        let mut variables = Map::new();
        // Even if an attacker-controlled variables map defines these keys
        // directly, they must never be substituted.
        variables.insert("__proto__".to_string(), json!("polluted"));
        variables.insert("constructor".to_string(), json!("polluted"));
        variables.insert("prototype".to_string(), json!("polluted"));

        let template = json!("${__proto__} ${constructor} ${prototype}");
        let result = substitute(&template, &variables);
        assert_eq!(result, json!("${__proto__} ${constructor} ${prototype}"));
    }

    #[test]
    fn substitute_recurses_into_nested_structures() {
        let mut variables = Map::new();
        variables.insert("id".to_string(), json!("42"));
        let template = json!({"nested": {"list": ["item-${id}", "static"]}});
        let result = substitute(&template, &variables);
        assert_eq!(result["nested"]["list"][0], json!("item-42"));
        assert_eq!(result["nested"]["list"][1], json!("static"));
    }
}
