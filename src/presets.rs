//! Ready-made agents for the command-line front ends
//!
//! The math router (classifier guard, router, math expert), the plain chat
//! assistant and the browser agent. Prompts are in Spanish, like the
//! conversations they serve.

use crate::agent::{Agent, ModelSettings, Runner};
use crate::error::AgentResult;
use crate::guard::{Classifier, ClassifierGuard};
use std::sync::Arc;

pub const CLASSIFIER_NAME: &str = "Clasificador de Preguntas";
pub const MATH_GUARD_NAME: &str = "solo_matematicas";
pub const MATH_EXPERT_NAME: &str = "Experto en Matemáticas";
pub const ROUTER_NAME: &str = "Enrutador de Preguntas";
pub const ASSISTANT_NAME: &str = "Asistente";
pub const BROWSER_AGENT_NAME: &str = "Navegador";

const CLASSIFIER_INSTRUCTIONS: &str = "Clasifica la pregunta como matemática o no matemática.
Devuelve un JSON con:
- is_target_category: true si es sobre matemáticas, false en caso contrario
- rationale: una explicación breve de tu decisión";

const MATH_EXPERT_INSTRUCTIONS: &str = "Eres un tutor de matemáticas. Ayuda a resolver problemas \
con explicaciones claras y paso a paso.";

const ROUTER_INSTRUCTIONS: &str = "Dirige las preguntas al experto adecuado según el tema.
No respondas preguntas directamente.";

const ASSISTANT_INSTRUCTIONS: &str = "Eres un asistente útil y amable que responde preguntas \
y proporciona información detallada. Sé conciso pero completo en tus respuestas.
Si no estás seguro de algo, admítelo en lugar de inventar información.";

const BROWSER_INSTRUCTIONS: &str = "Eres un agente que controla un navegador web mediante \
herramientas. Usa las herramientas disponibles para navegar, leer e interactuar con páginas \
hasta completar la tarea. Cuando termines, responde con un resumen breve de lo que encontraste.";

/// Message shown when the math guard rejects a question
pub const MATH_REJECTION_MESSAGE: &str =
    "Lo siento, solo puedo responder preguntas de matemáticas.";

/// Questions the demo runs when none is given
pub const SAMPLE_QUESTIONS: [&str; 6] = [
    "¿Cuánto es 2+2?",
    "¿Quién es LeBron James?",
    "¿Cómo resuelvo la ecuación x^2 - 4 = 0?",
    "¿Cuándo fue la Segunda Guerra Mundial?",
    "¿Cuál es la derivada de x^3?",
    "¿Qué es la fotosíntesis?",
];

/// The agents of the math routing pipeline
#[derive(Debug, Clone)]
pub struct MathRouter {
    pub router: Arc<Agent>,
    pub math_expert: Arc<Agent>,
    pub classifier: Arc<Agent>,
}

/// Build the math router
///
/// The classifier guard issues its requests through `runner`, so classification
/// shares the runner's provider and limits.
pub fn math_router(runner: &Runner, model: &ModelSettings) -> AgentResult<MathRouter> {
    let classifier = Classifier::from_instructions(
        CLASSIFIER_NAME,
        CLASSIFIER_INSTRUCTIONS,
        model.clone(),
        runner.clone(),
    )?;
    let classifier_agent = classifier.agent().clone();

    let math_expert = Agent::builder(MATH_EXPERT_NAME)
        .instructions(MATH_EXPERT_INSTRUCTIONS)
        .handoff_description("Para preguntas sobre matemáticas")
        .model(model.clone())
        .build_shared()?;

    let router = Agent::builder(ROUTER_NAME)
        .instructions(ROUTER_INSTRUCTIONS)
        .model(model.clone())
        .delegate(math_expert.clone())
        .guard(Arc::new(ClassifierGuard::new(MATH_GUARD_NAME, classifier)))
        .build_shared()?;

    Ok(MathRouter {
        router,
        math_expert,
        classifier: classifier_agent,
    })
}

/// General-purpose chat assistant
pub fn assistant(model: &ModelSettings) -> AgentResult<Agent> {
    Agent::builder(ASSISTANT_NAME)
        .instructions(ASSISTANT_INSTRUCTIONS)
        .model(model.clone())
        .build()
}

/// Agent that completes tasks with browser tools
pub fn browser_agent(model: &ModelSettings) -> AgentResult<Agent> {
    Agent::builder(BROWSER_AGENT_NAME)
        .instructions(BROWSER_INSTRUCTIONS)
        .model(model.clone())
        .build()
}

/// First `max_chars` characters followed by `...`
pub fn truncate_answer(text: &str, max_chars: usize) -> String {
    let prefix: String = text.chars().take(max_chars).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::ScriptedLlmProvider;
    use proptest::prelude::*;

    fn model() -> ModelSettings {
        ModelSettings::new("gpt-4o-mini")
    }

    #[test]
    fn test_math_router_shape() {
        let runner = Runner::new(Arc::new(ScriptedLlmProvider::new()));
        let math = math_router(&runner, &model()).unwrap();

        assert_eq!(math.router.name(), ROUTER_NAME);
        assert_eq!(math.router.guards().len(), 1);
        assert_eq!(math.router.guards()[0].name(), MATH_GUARD_NAME);
        assert_eq!(math.router.delegates().len(), 1);
        assert_eq!(
            math.math_expert.handoff_description(),
            Some("Para preguntas sobre matemáticas")
        );
        assert_eq!(
            math.classifier.output_schema().unwrap().name,
            "ClassificationResult"
        );
    }

    #[test]
    fn test_truncate_answer() {
        assert_eq!(truncate_answer("2 + 2 = 4", 50), "2 + 2 = 4...");

        let long = "á".repeat(80);
        let truncated = truncate_answer(&long, 50);
        assert_eq!(truncated.chars().count(), 53);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_presets_build() {
        assert_eq!(assistant(&model()).unwrap().name(), ASSISTANT_NAME);
        assert!(!browser_agent(&model()).unwrap().is_router());
    }

    proptest! {
        #[test]
        fn truncated_answer_keeps_a_char_prefix(text in ".{0,120}") {
            let truncated = truncate_answer(&text, 50);
            let kept = text.chars().count().min(50);

            prop_assert_eq!(truncated.chars().count(), kept + 3);
            prop_assert!(text.starts_with(&truncated[..truncated.len() - 3]));
        }
    }
}
