//! End-to-end pipeline tests
//!
//! The math router (classifier guard, router, math expert) against a scripted
//! model: acceptance and handoff, rejection, guard short-circuiting, delegate
//! guards, cancellation, concurrent runs and the tool loop.

use agent_handoff::agent::{Agent, ModelSettings, Runner, RunnerSettings, TraceEvent};
use agent_handoff::config::{AppConfig, RouterSection, SelectionPolicy};
use agent_handoff::console::BatchError;
use agent_handoff::error::AgentError;
use agent_handoff::llm::{LlmError, MessageRole};
use agent_handoff::presets::{
    self, CLASSIFIER_NAME, MATH_EXPERT_NAME, MATH_GUARD_NAME, ROUTER_NAME,
};
use agent_handoff::testing::mocks::{
    last_user_message, MockToolSession, ScriptedLlmProvider, ScriptedReply, StaticGuard,
};
use agent_handoff::tools::{ToolDescription, ToolError, ToolSet};
use futures::future::join_all;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::block_on;
use tokio_util::sync::CancellationToken;

const EXPERT_ANSWER: &str = "2 + 2 = 4. Sumamos dos unidades a dos unidades.";

fn looks_like_math(input: &str) -> bool {
    input.chars().any(|c| c.is_ascii_digit() || c == '+' || c == '=')
        || ["ecuación", "derivada", "integral"]
            .iter()
            .any(|w| input.contains(w))
}

fn classification(is_math: bool) -> String {
    json!({
        "is_target_category": is_math,
        "rationale": if is_math { "Es una pregunta de matemáticas" } else { "No trata de matemáticas" }
    })
    .to_string()
}

fn handoff_to(delegate: Option<&str>) -> String {
    json!({ "delegate": delegate, "reasoning": "El tema es matemático" }).to_string()
}

/// Classifier judging by the input, router always choosing the math expert
fn math_provider() -> ScriptedLlmProvider {
    ScriptedLlmProvider::new()
        .with_responder(|request| {
            if request.agent_name() != Some(CLASSIFIER_NAME) {
                return None;
            }
            let input = last_user_message(request)?;
            Some(ScriptedReply::Text(classification(looks_like_math(input))))
        })
        .reply(ROUTER_NAME, handoff_to(Some(MATH_EXPERT_NAME)))
        .reply(MATH_EXPERT_NAME, EXPERT_ANSWER)
}

fn model() -> ModelSettings {
    ModelSettings::new("gpt-4o-mini")
}

#[tokio::test]
async fn test_math_question_is_handed_to_the_expert() {
    let provider = Arc::new(math_provider());
    let runner = Runner::new(provider.clone());
    let math = presets::math_router(&runner, &model()).unwrap();

    let result = runner.run(&math.router, "¿Cuánto es 2+2?").await.unwrap();

    assert_eq!(result.final_output, EXPERT_ANSWER);
    assert_eq!(result.last_agent, MATH_EXPERT_NAME);
    assert_eq!(result.delegate(), Some(MATH_EXPERT_NAME));

    let verdicts = result.trace.guard_verdicts();
    assert_eq!(verdicts.len(), 1);
    assert_eq!(verdicts[0].guard, MATH_GUARD_NAME);
    assert!(!verdicts[0].tripwire_triggered);
    assert!(verdicts[0].classification().unwrap().is_target_category);

    assert_eq!(provider.calls_for(CLASSIFIER_NAME).await, 1);
    assert_eq!(provider.calls_for(ROUTER_NAME).await, 1);
    assert_eq!(provider.calls_for(MATH_EXPERT_NAME).await, 1);
}

#[tokio::test]
async fn test_trace_records_the_run_in_order() {
    let runner = Runner::new(Arc::new(math_provider()));
    let math = presets::math_router(&runner, &model()).unwrap();

    let result = runner.run(&math.router, "¿Cuál es la derivada de x^3?").await.unwrap();
    let events: Vec<&TraceEvent> = result.trace.events().collect();

    assert_eq!(events.len(), 5);
    assert!(matches!(events[0], TraceEvent::AgentStarted { agent } if agent == ROUTER_NAME));
    assert!(matches!(events[1], TraceEvent::GuardEvaluated { agent, .. } if agent == ROUTER_NAME));
    assert!(matches!(
        events[2],
        TraceEvent::DelegateSelected { router, delegate, .. }
            if router == ROUTER_NAME && delegate == MATH_EXPERT_NAME
    ));
    assert!(matches!(events[3], TraceEvent::AgentStarted { agent } if agent == MATH_EXPERT_NAME));
    assert!(matches!(events[4], TraceEvent::AgentAnswered { agent } if agent == MATH_EXPERT_NAME));

    let first = serde_json::to_value(&result.trace.entries()[0]).unwrap();
    assert_eq!(first["event"], "agent_started");
    assert!(first.get("at").is_some());
}

#[tokio::test]
async fn test_off_topic_question_is_rejected_before_routing() {
    let provider = Arc::new(math_provider());
    let runner = Runner::new(provider.clone());
    let math = presets::math_router(&runner, &model()).unwrap();

    let error = runner
        .run(&math.router, "¿Quién es LeBron James?")
        .await
        .unwrap_err();

    assert!(error.is_guard_rejection());
    let verdict = error.rejection_verdict().unwrap();
    assert_eq!(verdict.guard, MATH_GUARD_NAME);
    assert!(verdict.tripwire_triggered);
    assert!(!verdict.classification().unwrap().is_target_category);

    assert_eq!(provider.calls_for(CLASSIFIER_NAME).await, 1);
    assert_eq!(provider.calls_for(ROUTER_NAME).await, 0);
    assert_eq!(provider.calls_for(MATH_EXPERT_NAME).await, 0);
}

#[tokio::test]
async fn test_first_tripwire_stops_later_guards() {
    let provider = Arc::new(ScriptedLlmProvider::new().reply("Asistente", "hola"));
    let first = Arc::new(StaticGuard::tripping("primero"));
    let second = Arc::new(StaticGuard::passing("segundo"));

    let agent = Agent::builder("Asistente")
        .model(model())
        .guard(first.clone())
        .guard(second.clone())
        .build()
        .unwrap();

    let error = Runner::new(provider.clone())
        .run(&agent, "hola")
        .await
        .unwrap_err();

    assert!(matches!(error, AgentError::GuardRejection { ref guard, .. } if guard == "primero"));
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
    assert_eq!(provider.total_calls().await, 0);
}

#[tokio::test]
async fn test_all_guards_run_in_order_when_passing() {
    let provider = Arc::new(ScriptedLlmProvider::new().reply("Asistente", "hola"));
    let agent = Agent::builder("Asistente")
        .model(model())
        .guard(Arc::new(StaticGuard::passing("uno")))
        .guard(Arc::new(StaticGuard::passing("dos")))
        .build()
        .unwrap();

    let result = Runner::new(provider).run(&agent, "hola").await.unwrap();
    let names: Vec<&str> = result
        .trace
        .guard_verdicts()
        .iter()
        .map(|v| v.guard.as_str())
        .collect();

    assert_eq!(names, vec!["uno", "dos"]);
}

#[tokio::test]
async fn test_delegate_guards_are_evaluated_after_handoff() {
    let provider = Arc::new(
        ScriptedLlmProvider::new()
            .reply("Enrutador", handoff_to(Some("Experto")))
            .reply("Experto", "nunca"),
    );
    let delegate_guard = Arc::new(StaticGuard::tripping("solo_expertos"));
    let expert = Agent::builder("Experto")
        .model(model())
        .guard(delegate_guard.clone())
        .build_shared()
        .unwrap();
    let router = Agent::builder("Enrutador")
        .model(model())
        .delegate(expert)
        .build()
        .unwrap();

    let error = Runner::new(provider.clone())
        .run(&router, "pregunta")
        .await
        .unwrap_err();

    assert!(error.is_guard_rejection());
    assert_eq!(delegate_guard.calls(), 1);
    assert_eq!(provider.calls_for("Enrutador").await, 1);
    assert_eq!(provider.calls_for("Experto").await, 0);
}

#[tokio::test]
async fn test_router_choosing_nobody_is_no_matching_delegate() {
    let provider = Arc::new(
        ScriptedLlmProvider::new()
            .with_responder(|r| {
                (r.agent_name() == Some(CLASSIFIER_NAME)).then(|| ScriptedReply::Text(classification(true)))
            })
            .reply(ROUTER_NAME, handoff_to(None)),
    );
    let runner = Runner::new(provider.clone());
    let math = presets::math_router(&runner, &model()).unwrap();

    let error = runner.run(&math.router, "¿Cuánto es 2+2?").await.unwrap_err();

    assert!(matches!(error, AgentError::NoMatchingDelegate { ref router, .. } if router == ROUTER_NAME));
    assert_eq!(provider.calls_for(MATH_EXPERT_NAME).await, 0);
}

#[tokio::test]
async fn test_router_naming_a_stranger_is_no_matching_delegate() {
    let provider = Arc::new(
        ScriptedLlmProvider::new()
            .with_responder(|r| {
                (r.agent_name() == Some(CLASSIFIER_NAME)).then(|| ScriptedReply::Text(classification(true)))
            })
            .reply(ROUTER_NAME, handoff_to(Some("Experto en Historia"))),
    );
    let runner = Runner::new(provider.clone());
    let math = presets::math_router(&runner, &model()).unwrap();

    let error = runner.run(&math.router, "¿Cuánto es 2+2?").await.unwrap_err();

    match error {
        AgentError::NoMatchingDelegate { reason, .. } => assert!(reason.contains("Experto en Historia")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_delegate_names_match_case_insensitively() {
    let provider = Arc::new(
        ScriptedLlmProvider::new()
            .with_responder(|r| {
                (r.agent_name() == Some(CLASSIFIER_NAME)).then(|| ScriptedReply::Text(classification(true)))
            })
            .reply(ROUTER_NAME, handoff_to(Some("experto en matemáticas")))
            .reply(MATH_EXPERT_NAME, EXPERT_ANSWER),
    );
    let runner = Runner::new(provider);
    let math = presets::math_router(&runner, &model()).unwrap();

    let result = runner.run(&math.router, "¿Cuánto es 2+2?").await.unwrap();
    assert_eq!(result.last_agent, MATH_EXPERT_NAME);
}

#[tokio::test]
async fn test_malformed_classification_is_schema_violation() {
    let provider = Arc::new(
        ScriptedLlmProvider::new()
            .reply(CLASSIFIER_NAME, "Sí, es una pregunta de matemáticas")
            .reply(ROUTER_NAME, handoff_to(Some(MATH_EXPERT_NAME)))
            .reply(MATH_EXPERT_NAME, EXPERT_ANSWER),
    );
    let runner = Runner::new(provider.clone());
    let math = presets::math_router(&runner, &model()).unwrap();

    let error = runner.run(&math.router, "¿Cuánto es 2+2?").await.unwrap_err();

    assert!(matches!(error, AgentError::SchemaViolation { .. }));
    assert!(!error.is_guard_rejection());
    assert_eq!(provider.calls_for(CLASSIFIER_NAME).await, 1);
    assert_eq!(provider.calls_for(MATH_EXPERT_NAME).await, 0);
}

#[tokio::test]
async fn test_classification_missing_a_field_is_schema_violation() {
    let provider = Arc::new(
        ScriptedLlmProvider::new().reply(CLASSIFIER_NAME, r#"{"is_target_category": true}"#),
    );
    let runner = Runner::new(provider);
    let math = presets::math_router(&runner, &model()).unwrap();

    let error = runner.run(&math.router, "¿Cuánto es 2+2?").await.unwrap_err();
    assert!(matches!(error, AgentError::SchemaViolation { .. }));
}

#[tokio::test]
async fn test_cancellation_during_classification() {
    let provider = Arc::new(math_provider().with_delay(Duration::from_millis(500)));
    let runner = Runner::new(provider.clone());
    let math = presets::math_router(&runner, &model()).unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let error = runner
        .run_cancellable(&math.router, "¿Cuánto es 2+2?", &cancel)
        .await
        .unwrap_err();

    match error {
        AgentError::Cancelled { stage } => assert_eq!(stage, "guard evaluation"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(provider.calls_for(ROUTER_NAME).await, 0);
    assert_eq!(provider.calls_for(MATH_EXPERT_NAME).await, 0);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_interfere() {
    let runner = Runner::new(Arc::new(math_provider()));
    let math = presets::math_router(&runner, &model()).unwrap();

    let questions: Vec<String> = (0..8)
        .map(|i| {
            if i % 2 == 0 {
                format!("¿Cuánto es {i}+{i}?")
            } else {
                format!("¿Quién ganó el partido número {}?", "uno".repeat(i))
            }
        })
        .collect();

    let results = join_all(questions.iter().map(|q| runner.run(&math.router, q))).await;

    for (i, result) in results.into_iter().enumerate() {
        if i % 2 == 0 {
            let result = result.unwrap();
            assert_eq!(result.last_agent, MATH_EXPERT_NAME);
            assert_eq!(result.trace.len(), 5);
        } else {
            assert!(result.unwrap_err().is_guard_rejection());
        }
    }
}

#[tokio::test]
async fn test_same_input_same_outcome() {
    let runner = Runner::new(Arc::new(math_provider()));
    let math = presets::math_router(&runner, &model()).unwrap();

    let first = runner.run(&math.router, "¿Cómo resuelvo la ecuación x^2 - 4 = 0?").await.unwrap();
    let second = runner.run(&math.router, "¿Cómo resuelvo la ecuación x^2 - 4 = 0?").await.unwrap();

    assert_eq!(first.final_output, second.final_output);
    assert_eq!(first.last_agent, second.last_agent);
    assert_eq!(first.trace.handoffs(), second.trace.handoffs());
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_rule_selection_skips_the_router_model() {
    let provider = Arc::new(math_provider());
    let config = AppConfig {
        router: RouterSection {
            selection: SelectionPolicy::Rules,
            rules: BTreeMap::from([(MATH_GUARD_NAME.to_string(), MATH_EXPERT_NAME.to_string())]),
            ..RouterSection::default()
        },
        ..AppConfig::default()
    };
    let runner = Runner::from_config(provider.clone(), &config);
    let math = presets::math_router(&runner, &model()).unwrap();

    let result = runner.run(&math.router, "¿Cuánto es 2+2?").await.unwrap();

    assert_eq!(result.last_agent, MATH_EXPERT_NAME);
    assert_eq!(provider.calls_for(ROUTER_NAME).await, 0);
    assert_eq!(provider.calls_for(CLASSIFIER_NAME).await, 1);
}

#[tokio::test]
async fn test_console_batch_prints_rejections() {
    let runner = Runner::new(Arc::new(math_provider()));
    let math = presets::math_router(&runner, &model()).unwrap();
    let questions = vec!["¿Cuánto es 2+2?".to_string(), "¿Quién es LeBron James?".to_string()];

    let mut output = Vec::new();
    let summary = agent_handoff::console::run_questions(
        &runner,
        &math.router,
        &questions,
        false,
        presets::MATH_REJECTION_MESSAGE,
        &mut output,
    )
    .await
    .unwrap();
    let output = String::from_utf8(output).unwrap();

    assert_eq!(summary.answered, 1);
    assert_eq!(summary.rejected, 1);
    assert!(output.contains("=== Pregunta: ¿Quién es LeBron James? ===\nLo siento, solo puedo responder preguntas de matemáticas."));
}

#[tokio::test]
async fn test_console_batch_surfaces_model_failures() {
    let provider = ScriptedLlmProvider::new().with_fallback(ScriptedReply::Fail(
        LlmError::NetworkError("connection refused".to_string()),
    ));
    let runner = Runner::new(Arc::new(provider));
    let math = presets::math_router(&runner, &model()).unwrap();
    let questions = vec!["¿Cuánto es 2+2?".to_string(), "¿Cuánto es 3x3?".to_string()];

    let mut output = Vec::new();
    let result = agent_handoff::console::run_questions(
        &runner,
        &math.router,
        &questions,
        false,
        presets::MATH_REJECTION_MESSAGE,
        &mut output,
    )
    .await;
    let output = String::from_utf8(output).unwrap();

    match result {
        Err(BatchError::Run(AgentError::ModelUnavailable { message })) => {
            assert!(message.contains("connection refused"))
        }
        other => panic!("expected a model failure, got {other:?}"),
    }
    assert!(output.contains("=== Pregunta: ¿Cuánto es 2+2? ===\nError: "));
    assert!(!output.contains("¿Cuánto es 3x3?"));
    assert!(!output.contains(presets::MATH_REJECTION_MESSAGE));
}

fn navigate_tool() -> ToolDescription {
    ToolDescription {
        name: "browser_navigate".to_string(),
        description: "Navigate to a URL".to_string(),
        parameters: json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        }),
    }
}

fn browser() -> Agent {
    Agent::builder("Navegador").model(model()).build().unwrap()
}

#[tokio::test]
async fn test_tool_loop_is_bounded() {
    let provider = Arc::new(ScriptedLlmProvider::new().reply_with(
        "Navegador",
        ScriptedReply::tool_call("call_1", "browser_navigate", json!({ "url": "https://example.com" })),
    ));
    let session = Arc::new(MockToolSession::new(vec![navigate_tool()]));
    let tool_set = ToolSet::new(session.clone(), vec![navigate_tool()]);
    let runner = Runner::new(provider.clone()).with_settings(RunnerSettings {
        max_tool_iterations: 3,
        ..RunnerSettings::default()
    });

    let error = runner
        .run_with_tools(&browser(), "Navega sin parar", &tool_set)
        .await
        .unwrap_err();

    assert!(matches!(error, AgentError::ToolLoopExceeded { max: 3 }));
    assert_eq!(provider.calls_for("Navegador").await, 3);
    assert_eq!(session.invocations().await.len(), 3);
}

#[tokio::test]
async fn test_bad_tool_arguments_are_reported_to_the_model() {
    let provider = Arc::new(
        ScriptedLlmProvider::new()
            .reply_with(
                "Navegador",
                ScriptedReply::tool_call("call_1", "browser_navigate", json!({ "url": 7 })),
            )
            .reply("Navegador", "No pude abrir la página"),
    );
    let session = Arc::new(MockToolSession::new(vec![navigate_tool()]));
    let tool_set = ToolSet::new(session.clone(), vec![navigate_tool()]);
    let runner = Runner::new(provider.clone());

    let result = runner
        .run_with_tools(&browser(), "Abre la página", &tool_set)
        .await
        .unwrap();

    assert_eq!(result.final_output, "No pude abrir la página");
    assert!(session.invocations().await.is_empty());
    assert!(matches!(
        result.trace.events().find(|e| matches!(e, TraceEvent::ToolInvoked { .. })),
        Some(TraceEvent::ToolInvoked { succeeded: false, .. })
    ));

    let requests = provider.requests().await;
    let follow_up = last_user_message(&requests[1]).unwrap();
    assert!(follow_up.starts_with("Tool results:\nTool browser_navigate failed: Parameter validation failed"));

    let history = &requests[1].messages;
    let call_turn = &history[history.len() - 2];
    assert_eq!(call_turn.role, MessageRole::Assistant);
    assert_eq!(call_turn.content, r#"Calling tools: browser_navigate({"url":7})"#);
}

#[tokio::test]
async fn test_session_fault_aborts_the_run() {
    let provider = Arc::new(ScriptedLlmProvider::new().reply_with(
        "Navegador",
        ScriptedReply::tool_call("call_1", "browser_navigate", json!({ "url": "https://example.com" })),
    ));
    let session = Arc::new(
        MockToolSession::new(vec![navigate_tool()])
            .with_failure("browser_navigate", ToolError::Transport("broken pipe".to_string())),
    );
    let tool_set = ToolSet::new(session, vec![navigate_tool()]);

    let error = Runner::new(provider.clone())
        .run_with_tools(&browser(), "Abre la página", &tool_set)
        .await
        .unwrap_err();

    assert!(matches!(error, AgentError::ToolSessionFault { .. }));
    assert_eq!(provider.calls_for("Navegador").await, 1);
}

#[tokio::test]
async fn test_routed_run_with_tools_uses_them_in_the_delegate() {
    let provider = Arc::new(
        ScriptedLlmProvider::new()
            .reply("Enrutador", handoff_to(Some("Navegador")))
            .reply_with(
                "Navegador",
                ScriptedReply::tool_call("call_1", "browser_navigate", json!({ "url": "https://example.com" })),
            )
            .reply("Navegador", "Hecho"),
    );
    let session = Arc::new(MockToolSession::new(vec![navigate_tool()]));
    let tool_set = ToolSet::new(session.clone(), vec![navigate_tool()]);
    let router = Agent::builder("Enrutador")
        .model(model())
        .delegate(Arc::new(browser()))
        .build()
        .unwrap();

    let result = Runner::new(provider.clone())
        .run_with_tools(&router, "Abre example.com", &tool_set)
        .await
        .unwrap();

    assert_eq!(result.final_output, "Hecho");
    assert_eq!(result.delegate(), Some("Navegador"));
    assert_eq!(session.invocations().await.len(), 1);

    let requests = provider.requests().await;
    assert!(requests[0].tools.is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn arithmetic_questions_reach_the_expert(a in 0u32..1000, b in 0u32..1000) {
        let outcome = block_on(async {
            let runner = Runner::new(Arc::new(math_provider()));
            let math = presets::math_router(&runner, &model()).unwrap();
            runner.run(&math.router, &format!("¿Cuánto es {a}+{b}?")).await
        });

        let result = outcome.unwrap();
        prop_assert_eq!(result.last_agent, MATH_EXPERT_NAME);
        prop_assert_eq!(result.trace.handoffs(), vec![MATH_EXPERT_NAME]);
    }

    #[test]
    fn off_topic_text_never_reaches_a_delegate(question in "[a-zA-Z ¿?]{1,40}") {
        let provider = Arc::new(math_provider());
        let outcome = block_on({
            let provider = provider.clone();
            let question = question.clone();
            async move {
                let runner = Runner::new(provider);
                let math = presets::math_router(&runner, &model()).unwrap();
                runner.run(&math.router, &question).await
            }
        });

        prop_assert!(outcome.unwrap_err().is_guard_rejection());
        prop_assert_eq!(block_on(provider.calls_for(MATH_EXPERT_NAME)), 0);
        prop_assert_eq!(block_on(provider.calls_for(ROUTER_NAME)), 0);
    }
}
