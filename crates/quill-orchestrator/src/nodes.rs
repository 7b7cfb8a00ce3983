use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use quill_core::agent::{provider_error_code, truncate_text};
use quill_core::{Agent, AgentError, RecursionLimit, WorkflowConfig};
use quill_observability::{emit_event, ObservabilityEvent, ProcessKind};
use quill_providers::{Provider, ProviderRegistry};
use quill_runtime::{extract_mcp_settings, load_role_tools};
use quill_tools::{SearchOutcome, Tool, ToolRegistry};
use quill_types::ChatMessage;

use crate::error::WorkflowError;
use crate::extractor::extract_plan;
use crate::feedback::{parse_feedback, Feedback, REVIEW_PROMPT};
use crate::plan::{CurrentPlan, Plan, PlanError, StepType};
use crate::prompts::{PromptTemplates, PromptVars};
use crate::role::{AgentRole, PromptKey, Toolbox};
use crate::signals::{first_signal, first_signal_in_messages, handoff_schema, HandoffTool};
use crate::state::{NodeId, RunState};

pub const NO_PLAN_REPORT: &str = "No plan available to generate report.";
const EMPTY_STEP_RESULT: &str = "The agent finished this step without producing any findings.";

const REPORT_FORMAT_REMINDER: &str = "IMPORTANT: Structure your report according to the format in the prompt. Remember to include:\n\n1. Key Points - A bulleted list of the most important findings\n2. Overview - A brief introduction to the topic\n3. Detailed Analysis - Organized into logical sections\n4. Survey Note (optional) - For more comprehensive reports\n5. Key Citations - List all references at the end\n\nFor citations, DO NOT include inline citations in the text. Instead, place all citations in the 'Key Citations' section at the end using the format: `- [Source Title](URL)`. Include an empty line between each citation for better readability.\n\nPRIORITIZE USING MARKDOWN TABLES for data presentation and comparison. Use tables whenever presenting comparative data, statistics, features, or options. Structure tables with clear headers and aligned columns. Example table format:\n\n| Feature | Description | Pros | Cons |\n|---------|-------------|------|------|\n| Feature 1 | Description 1 | Pros 1 | Cons 1 |\n| Feature 2 | Description 2 | Pros 2 | Cons 2 |";

const CITATION_REMINDER: &str = "IMPORTANT: DO NOT include inline citations in the text. Instead, track all sources and include a References section at the end using link reference format. Include an empty line between each citation for better readability. Use this format for each reference:\n- [Source Title](URL)\n\n- [Another Source](URL)";

/// Shared, read-only dependencies of every node.
#[derive(Clone)]
pub struct WorkflowServices {
    pub config: Arc<WorkflowConfig>,
    pub providers: ProviderRegistry,
    pub prompts: Arc<PromptTemplates>,
    pub toolbox: Toolbox,
    recursion_limit: Option<RecursionLimit>,
}

impl WorkflowServices {
    pub fn new(
        config: WorkflowConfig,
        providers: ProviderRegistry,
        prompts: PromptTemplates,
        toolbox: Toolbox,
    ) -> Self {
        Self {
            config: Arc::new(config),
            providers,
            prompts: Arc::new(prompts),
            toolbox,
            recursion_limit: None,
        }
    }

    /// Services backed by the configured HTTP providers, search engine and
    /// prompt directory.
    pub async fn from_config(config: WorkflowConfig) -> anyhow::Result<Self> {
        let providers = ProviderRegistry::new(&config.llm);
        let prompts = PromptTemplates::load(config.prompts_dir.as_deref()).await?;
        let toolbox = Toolbox::from_config(&config);
        Ok(Self::new(config, providers, prompts, toolbox))
    }

    /// Pins the agent step budget instead of reading `AGENT_RECURSION_LIMIT`
    /// for every step.
    pub fn with_recursion_limit(mut self, limit: RecursionLimit) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    fn recursion_limit(&self) -> RecursionLimit {
        self.recursion_limit
            .clone()
            .unwrap_or_else(RecursionLimit::from_env)
    }

    async fn provider_for(&self, role: AgentRole) -> anyhow::Result<Arc<dyn Provider>> {
        self.providers
            .select_provider(role.model_class(&self.config))
            .await
    }

    fn vars(&self, locale: &str) -> PromptVars {
        PromptVars::now(locale, &self.config)
    }
}

/// Per-run view handed to a node.
pub struct NodeContext<'a> {
    pub services: &'a WorkflowServices,
    pub run_id: &'a str,
    pub cancel: &'a CancellationToken,
}

impl NodeContext<'_> {
    fn node_failed(&self, node: NodeId, code: &str, detail: &str) {
        let detail = truncate_text(detail, 500);
        emit_event(
            Level::WARN,
            ProcessKind::Engine,
            ObservabilityEvent {
                run_id: Some(self.run_id),
                node: Some(node.as_str()),
                status: Some("failed"),
                error_code: Some(code),
                detail: Some(&detail),
                ..ObservabilityEvent::new("workflow.node.failed", "orchestrator")
            },
        );
    }

    /// Cancellation aborts the run; every other agent failure is recorded and
    /// left to the caller's fallback.
    fn agent_failed(&self, node: NodeId, err: AgentError) -> Result<(), WorkflowError> {
        if let AgentError::Cancelled { .. } = err {
            return Err(WorkflowError::Cancelled(self.run_id.to_string()));
        }
        tracing::error!(run_id = self.run_id, node = %node, "agent failed: {err}");
        self.node_failed(node, err.code(), &err.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Advance,
    Resume { feedback: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Goto(NodeId),
    Interrupt(String),
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: RunState,
    pub next: Next,
}

impl Transition {
    fn goto(state: RunState, node: NodeId) -> Self {
        Self {
            state,
            next: Next::Goto(node),
        }
    }

    fn end(state: RunState) -> Self {
        Self {
            state,
            next: Next::End,
        }
    }
}

/// Runs one node against `state`. Only `human_feedback` accepts a resume event.
pub async fn transition(
    ctx: &NodeContext<'_>,
    state: RunState,
    node: NodeId,
    event: Event,
) -> Result<Transition, WorkflowError> {
    if node != NodeId::HumanFeedback && matches!(event, Event::Resume { .. }) {
        return Err(WorkflowError::UnexpectedResume { node });
    }
    match node {
        NodeId::Coordinator => coordinator(ctx, state).await,
        NodeId::BackgroundInvestigator => background_investigator(ctx, state).await,
        NodeId::Planner => planner(ctx, state).await,
        NodeId::HumanFeedback => human_feedback(state, event),
        NodeId::ResearchTeam => {
            let next = route_research_team(&state);
            Ok(Transition::goto(state, next))
        }
        NodeId::Researcher => execute_step(ctx, state, AgentRole::Researcher).await,
        NodeId::Coder => execute_step(ctx, state, AgentRole::Coder).await,
        NodeId::Reporter => reporter(ctx, state).await,
        NodeId::End => Ok(Transition::end(state)),
    }
}

async fn coordinator(ctx: &NodeContext<'_>, mut state: RunState) -> Result<Transition, WorkflowError> {
    tracing::info!(run_id = ctx.run_id, "coordinator talking");
    let services = ctx.services;
    let role_servers = extract_mcp_settings(
        services.config.mcp_settings.as_ref(),
        AgentRole::Coordinator.as_str(),
    );

    let signal = if role_servers.is_empty() {
        let provider = match services.provider_for(AgentRole::Coordinator).await {
            Ok(provider) => provider,
            Err(err) => {
                ctx.node_failed(NodeId::Coordinator, "PROVIDER_UNAVAILABLE", &err.to_string());
                return Ok(Transition::end(state));
            }
        };
        let messages = services.prompts.apply(
            PromptKey::Coordinator,
            &services.vars(&state.locale),
            &state.messages,
        );
        match provider.chat(&messages, &[handoff_schema()]).await {
            Ok(response) => first_signal(response.tool_calls.iter()),
            Err(err) => {
                let message = err.to_string();
                ctx.node_failed(NodeId::Coordinator, provider_error_code(&message), &message);
                return Ok(Transition::end(state));
            }
        }
    } else {
        tracing::info!(run_id = ctx.run_id, "using tool-augmented coordinator");
        let remote = match load_role_tools(&role_servers).await {
            Ok(tools) => tools,
            Err(err) => {
                ctx.node_failed(NodeId::Coordinator, "TOOL_DISCOVERY_FAILED", &format!("{err:#}"));
                return Ok(Transition::end(state));
            }
        };
        let provider = match services.provider_for(AgentRole::Coordinator).await {
            Ok(provider) => provider,
            Err(err) => {
                ctx.node_failed(NodeId::Coordinator, "PROVIDER_UNAVAILABLE", &err.to_string());
                return Ok(Transition::end(state));
            }
        };
        let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(HandoffTool)];
        tools.extend(remote);
        let agent = Agent::new(
            PromptKey::McpCoordinator.as_str(),
            provider,
            ToolRegistry::from_tools(tools),
        );
        let input = services.prompts.apply(
            PromptKey::McpCoordinator,
            &services.vars(&state.locale),
            &state.messages,
        );
        match agent
            .invoke(input, &services.recursion_limit(), ctx.cancel)
            .await
        {
            Ok(run) => {
                let signal = first_signal_in_messages(&run.messages);
                state.messages.extend(run.messages);
                signal
            }
            Err(err) => {
                ctx.agent_failed(NodeId::Coordinator, err)?;
                return Ok(Transition::end(state));
            }
        }
    };

    let Some(signal) = signal else {
        tracing::warn!(
            run_id = ctx.run_id,
            "Coordinator response contains no tool calls. Terminating workflow execution."
        );
        return Ok(Transition::end(state));
    };
    if let Some(locale) = signal.locale() {
        state.locale = locale.to_string();
    }
    let next = if state.enable_background_investigation {
        NodeId::BackgroundInvestigator
    } else {
        NodeId::Planner
    };
    Ok(Transition::goto(state, next))
}

async fn background_investigator(
    ctx: &NodeContext<'_>,
    mut state: RunState,
) -> Result<Transition, WorkflowError> {
    tracing::info!(run_id = ctx.run_id, "background investigation node is running");
    let services = ctx.services;
    let query = state
        .latest_user_message()
        .map(|message| message.content.clone())
        .unwrap_or_default();
    match services
        .toolbox
        .search
        .search(&query, services.config.max_search_results)
        .await
    {
        Ok(outcome) => {
            state.background_investigation_results = Some(background_payload(&outcome));
        }
        Err(err) => {
            tracing::error!(run_id = ctx.run_id, "background search failed: {err:#}");
            ctx.node_failed(NodeId::BackgroundInvestigator, "SEARCH_FAILED", &err.to_string());
        }
    }
    Ok(Transition::goto(state, NodeId::Planner))
}

#[derive(Serialize)]
struct BackgroundHit<'a> {
    title: &'a str,
    content: &'a str,
}

/// Hit lists keep only title and content; anything else is passed through.
fn background_payload(outcome: &SearchOutcome) -> String {
    match outcome {
        SearchOutcome::Hits(hits) => {
            let trimmed = hits
                .iter()
                .map(|hit| BackgroundHit {
                    title: &hit.title,
                    content: &hit.content,
                })
                .collect::<Vec<_>>();
            serde_json::to_string(&trimmed).unwrap_or_else(|_| "[]".to_string())
        }
        SearchOutcome::Native(value) => value.to_string(),
    }
}

async fn planner(ctx: &NodeContext<'_>, mut state: RunState) -> Result<Transition, WorkflowError> {
    tracing::info!(run_id = ctx.run_id, "planner generating full plan");
    let services = ctx.services;
    if state.plan_iterations >= services.config.max_plan_iterations {
        tracing::info!(
            run_id = ctx.run_id,
            iterations = state.plan_iterations,
            "plan iteration limit reached"
        );
        return Ok(Transition::goto(state, NodeId::Reporter));
    }

    let mut messages = services.prompts.apply(
        PromptKey::Planner,
        &services.vars(&state.locale),
        &state.messages,
    );
    if state.plan_iterations == 0 && state.enable_background_investigation {
        if let Some(results) = &state.background_investigation_results {
            messages.push(ChatMessage::user(format!(
                "background investigation results of user query:\n{results}\n"
            )));
        }
    }

    let class = AgentRole::Planner.model_class(&services.config);
    let extraction = match services.provider_for(AgentRole::Planner).await {
        Ok(provider) => extract_plan(provider.as_ref(), class, &messages).await,
        Err(err) => Err(PlanError::Provider {
            code: "PROVIDER_UNAVAILABLE",
            message: err.to_string(),
        }),
    };
    let extraction = match extraction {
        Ok(extraction) => extraction,
        Err(err) => {
            tracing::warn!(run_id = ctx.run_id, "Plan extraction failed: {err}");
            ctx.node_failed(NodeId::Planner, err.code(), &err.to_string());
            return Ok(if state.plan_iterations > 0 {
                Transition::goto(state, NodeId::Reporter)
            } else {
                Transition::end(state)
            });
        }
    };

    let rendered = extraction.render();
    tracing::debug!(run_id = ctx.run_id, "planner response: {rendered}");
    state
        .messages
        .push(ChatMessage::assistant(rendered.clone()).with_name(AgentRole::Planner.as_str()));
    if extraction.plan.has_enough_context {
        tracing::info!(run_id = ctx.run_id, "planner response has enough context");
        state.current_plan = CurrentPlan::Validated(extraction.plan);
        Ok(Transition::goto(state, NodeId::Reporter))
    } else {
        state.current_plan = CurrentPlan::RawText(rendered);
        Ok(Transition::goto(state, NodeId::HumanFeedback))
    }
}

fn human_feedback(mut state: RunState, event: Event) -> Result<Transition, WorkflowError> {
    if !state.auto_accepted_plan {
        match event {
            Event::Advance => {
                return Ok(Transition {
                    state,
                    next: Next::Interrupt(REVIEW_PROMPT.to_string()),
                });
            }
            Event::Resume { feedback } => match parse_feedback(&feedback)? {
                Feedback::EditPlan(text) => {
                    state.messages.push(ChatMessage::user(text).with_name("feedback"));
                    return Ok(Transition::goto(state, NodeId::Planner));
                }
                Feedback::Accepted => tracing::info!("Plan is accepted by user."),
            },
        }
    }

    let parsed = match &state.current_plan {
        CurrentPlan::Validated(plan) => Ok(plan.clone()),
        CurrentPlan::RawText(text) => Plan::parse_text(text),
        CurrentPlan::Empty => Err(PlanError::Missing),
    };
    match parsed {
        Ok(plan) => {
            state.plan_iterations = state.plan_iterations.saturating_add(1);
            state.locale = plan.locale.clone();
            let next = if plan.has_enough_context {
                NodeId::Reporter
            } else {
                NodeId::ResearchTeam
            };
            state.current_plan = CurrentPlan::Validated(plan);
            Ok(Transition::goto(state, next))
        }
        // acceptance counts as an iteration; the stored counter is not bumped
        Err(err) => {
            tracing::warn!("accepted plan could not be parsed: {err}");
            Ok(Transition::goto(state, NodeId::Reporter))
        }
    }
}

/// Next node for the research team. Never picks a step that already has a result.
pub fn route_research_team(state: &RunState) -> NodeId {
    let Some(plan) = state.current_plan.as_validated() else {
        return NodeId::Planner;
    };
    match plan.first_pending() {
        None => NodeId::Planner,
        Some((_, step)) => match step.step_type {
            StepType::Research => NodeId::Researcher,
            StepType::Processing => NodeId::Coder,
        },
    }
}

/// Input turns for the agent working on step `index`: earlier findings, the
/// task itself and, for researchers, the citation rules.
pub fn step_input(plan: &Plan, index: usize, locale: &str, role: AgentRole) -> Vec<ChatMessage> {
    let mut content = String::new();
    let completed = plan.steps.iter().take(index).collect::<Vec<_>>();
    if !completed.is_empty() {
        content.push_str("# Existing Research Findings\n\n");
        for (i, step) in completed.iter().enumerate() {
            content.push_str(&format!("## Existing Finding {}: {}\n\n", i + 1, step.title));
            content.push_str(&format!(
                "<finding>\n{}\n</finding>\n\n",
                step.execution_res.as_deref().unwrap_or_default()
            ));
        }
    }
    if let Some(step) = plan.steps.get(index) {
        content.push_str(&format!(
            "# Current Task\n\n## Title\n\n{}\n\n## Description\n\n{}\n\n## Locale\n\n{}",
            step.title, step.description, locale
        ));
    }
    let mut messages = vec![ChatMessage::user(content)];
    if role == AgentRole::Researcher {
        messages.push(ChatMessage::user(CITATION_REMINDER).with_name("system"));
    }
    messages
}

async fn role_tools(
    services: &WorkflowServices,
    role: AgentRole,
) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
    let mut tools = role.default_tools(&services.toolbox);
    let role_servers = extract_mcp_settings(services.config.mcp_settings.as_ref(), role.as_str());
    if !role_servers.is_empty() {
        tools.extend(load_role_tools(&role_servers).await?);
    }
    Ok(tools)
}

async fn execute_step(
    ctx: &NodeContext<'_>,
    mut state: RunState,
    role: AgentRole,
) -> Result<Transition, WorkflowError> {
    let node = role.node();
    let services = ctx.services;
    let Some(plan) = state.current_plan.as_validated() else {
        tracing::warn!(run_id = ctx.run_id, "no valid plan found for agent execution");
        return Ok(Transition::goto(state, NodeId::ResearchTeam));
    };
    let Some((index, step)) = plan.first_pending() else {
        tracing::warn!(run_id = ctx.run_id, "no unexecuted step found");
        return Ok(Transition::goto(state, NodeId::ResearchTeam));
    };
    tracing::info!(run_id = ctx.run_id, role = role.as_str(), "executing step: {}", step.title);
    let input = step_input(plan, index, &state.locale, role);

    let tools = match role_tools(services, role).await {
        Ok(tools) => tools,
        Err(err) => {
            ctx.node_failed(node, "TOOL_DISCOVERY_FAILED", &format!("{err:#}"));
            return Ok(Transition::goto(state, NodeId::Reporter));
        }
    };
    let provider = match services.provider_for(role).await {
        Ok(provider) => provider,
        Err(err) => {
            ctx.node_failed(node, "PROVIDER_UNAVAILABLE", &err.to_string());
            return Ok(Transition::goto(state, NodeId::Reporter));
        }
    };
    let agent = Agent::new(role.as_str(), provider, ToolRegistry::from_tools(tools));
    let messages = services
        .prompts
        .apply(role.prompt_key(), &services.vars(&state.locale), &input);

    let run = match agent
        .invoke(messages, &services.recursion_limit(), ctx.cancel)
        .await
    {
        Ok(run) => run,
        Err(err) => {
            ctx.agent_failed(node, err)?;
            return Ok(Transition::goto(state, NodeId::Reporter));
        }
    };

    let mut result = run.final_text().trim().to_string();
    if result.is_empty() {
        tracing::warn!(run_id = ctx.run_id, role = role.as_str(), "agent returned an empty result");
        result = EMPTY_STEP_RESULT.to_string();
    }
    if let Some(plan) = state.current_plan.as_validated_mut() {
        if let Err(err) = plan.record_result(index, result.clone()) {
            tracing::warn!(run_id = ctx.run_id, "could not record step result: {err}");
        }
    }
    tracing::info!(run_id = ctx.run_id, role = role.as_str(), steps = run.steps, "step completed");
    state
        .messages
        .push(ChatMessage::user(result.clone()).with_name(role.as_str()));
    state.observations.push(result);
    Ok(Transition::goto(state, NodeId::ResearchTeam))
}

async fn reporter(ctx: &NodeContext<'_>, mut state: RunState) -> Result<Transition, WorkflowError> {
    tracing::info!(run_id = ctx.run_id, "reporter writing final report");
    let services = ctx.services;
    let Some(plan) = state.current_plan.as_validated() else {
        tracing::warn!(run_id = ctx.run_id, "no valid plan found for reporter node");
        state.final_report = NO_PLAN_REPORT.to_string();
        return Ok(Transition::end(state));
    };

    let seed = ChatMessage::user(format!(
        "# Research Requirements\n\n## Task\n\n{}\n\n## Description\n\n{}",
        plan.title, plan.thought
    ));
    let mut messages = services.prompts.apply(
        PromptKey::Reporter,
        &services.vars(&state.locale),
        std::slice::from_ref(&seed),
    );
    messages.push(ChatMessage::user(REPORT_FORMAT_REMINDER).with_name("system"));
    for observation in &state.observations {
        messages.push(
            ChatMessage::user(format!(
                "Below are some observations for the research task:\n\n{observation}"
            ))
            .with_name("observation"),
        );
    }

    let provider = services
        .provider_for(AgentRole::Reporter)
        .await
        .map_err(|err| WorkflowError::Reporter {
            code: "PROVIDER_UNAVAILABLE",
            message: err.to_string(),
        })?;
    let response = provider.chat(&messages, &[]).await.map_err(|err| {
        let message = err.to_string();
        ctx.node_failed(NodeId::Reporter, provider_error_code(&message), &message);
        WorkflowError::Reporter {
            code: provider_error_code(&message),
            message,
        }
    })?;
    state.final_report = response.content.text();
    tracing::info!(run_id = ctx.run_id, "reporter response completed");
    Ok(Transition::end(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    fn step(title: &str, step_type: StepType, result: Option<&str>) -> Step {
        Step {
            title: title.to_string(),
            description: format!("{title} description"),
            step_type,
            execution_res: result.map(str::to_string),
        }
    }

    fn state_with(steps: Vec<Step>) -> RunState {
        let mut state = RunState::new("q");
        state.current_plan = CurrentPlan::Validated(Plan {
            locale: "en-US".to_string(),
            has_enough_context: false,
            thought: "t".to_string(),
            title: "T".to_string(),
            steps,
        });
        state
    }

    #[test]
    fn research_team_routes_to_the_first_pending_step() {
        let state = state_with(vec![
            step("a", StepType::Research, Some("done")),
            step("b", StepType::Processing, None),
        ]);
        assert_eq!(route_research_team(&state), NodeId::Coder);

        let state = state_with(vec![
            step("a", StepType::Processing, Some("done")),
            step("b", StepType::Research, None),
            step("c", StepType::Processing, None),
        ]);
        assert_eq!(route_research_team(&state), NodeId::Researcher);
    }

    #[test]
    fn research_team_returns_to_planner_when_done_or_unvalidated() {
        let state = state_with(vec![step("a", StepType::Research, Some("done"))]);
        assert_eq!(route_research_team(&state), NodeId::Planner);

        let mut raw = RunState::new("q");
        raw.current_plan = CurrentPlan::RawText("{}".to_string());
        assert_eq!(route_research_team(&raw), NodeId::Planner);
        assert_eq!(route_research_team(&RunState::new("q")), NodeId::Planner);
    }

    #[test]
    fn step_input_lists_findings_then_the_current_task() {
        let state = state_with(vec![
            step("Sales", StepType::Research, Some("Sales grew")),
            step("Growth", StepType::Processing, None),
        ]);
        let plan = state.current_plan.as_validated().expect("plan");
        let input = step_input(plan, 1, "fr-FR", AgentRole::Coder);
        assert_eq!(input.len(), 1);
        assert_eq!(
            input[0].content,
            "# Existing Research Findings\n\n## Existing Finding 1: Sales\n\n<finding>\nSales grew\n</finding>\n\n# Current Task\n\n## Title\n\nGrowth\n\n## Description\n\nGrowth description\n\n## Locale\n\nfr-FR"
        );

        let input = step_input(plan, 0, "en-US", AgentRole::Researcher);
        assert_eq!(input.len(), 2);
        assert!(input[0].content.starts_with("# Current Task"));
        assert!(input[1].is_named("system"));
    }

    #[test]
    fn feedback_without_review_is_skipped_when_auto_accepted() {
        let mut state = state_with(vec![step("a", StepType::Research, None)]);
        state.auto_accepted_plan = true;
        let transition = human_feedback(state, Event::Advance).expect("transition");
        assert_eq!(transition.next, Next::Goto(NodeId::ResearchTeam));
        assert_eq!(transition.state.plan_iterations, 1);
    }

    #[test]
    fn unparseable_accepted_plan_goes_to_reporter() {
        let mut state = RunState::new("q");
        state.current_plan = CurrentPlan::RawText("not json at all".to_string());
        let first = human_feedback(
            state.clone(),
            Event::Resume {
                feedback: "[ACCEPTED]".to_string(),
            },
        )
        .expect("transition");
        assert_eq!(first.next, Next::Goto(NodeId::Reporter));
        assert_eq!(first.state.plan_iterations, 0);
        assert_eq!(first.state.current_plan, state.current_plan);

        state.plan_iterations = 1;
        state.auto_accepted_plan = true;
        state.current_plan = CurrentPlan::Empty;
        let later = human_feedback(state, Event::Advance).expect("transition");
        assert_eq!(later.next, Next::Goto(NodeId::Reporter));
        assert_eq!(later.state.plan_iterations, 1);
    }

    #[test]
    fn background_hits_keep_title_and_content_only() {
        let outcome = SearchOutcome::Hits(vec![quill_tools::SearchHit {
            title: "Wiki".to_string(),
            url: "https://example.com".to_string(),
            content: "Über".to_string(),
        }]);
        assert_eq!(
            background_payload(&outcome),
            r#"[{"title":"Wiki","content":"Über"}]"#
        );
        let native = SearchOutcome::Native(serde_json::json!("plain text"));
        assert_eq!(background_payload(&native), r#""plain text""#);
    }
}
