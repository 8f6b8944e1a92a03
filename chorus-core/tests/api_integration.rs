//! Integration tests that call real generation services.
//!
//! These tests require GEMINI_API_KEY or ANTHROPIC_API_KEY to be set (via
//! .env file or environment).
//! Run with: `cargo test -p chorus-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid:
//! - API costs in CI
//! - Test failures when no API key is available
//! - Slow test runs (API calls take seconds)

use chorus_core::llm::{GenerationRequest, PersonaPrompt, SamplingParams};
use chorus_core::prelude::*;
use chrono::NaiveTime;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

fn has_key(var: &str) -> bool {
    std::env::var(var).is_ok()
}

fn persona_prompt() -> PersonaPrompt {
    PersonaPrompt {
        persona_name: "Mika".to_string(),
        instructions: "A cheerful barista who loves bad puns.".to_string(),
        human_name: "Sam".to_string(),
        context: vec!["Participants: @1 = Mika".to_string()],
        history: vec![Turn::user("[Sam]: morning!")],
        message: "[Sam]: any coffee recommendations?".to_string(),
        woken: false,
        model: None,
        sampling: SamplingParams::default(),
        safety: SafetyTier::Strict,
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test -p chorus-core --test api_integration -- --ignored
async fn test_gemini_persona_reply() {
    setup();
    if !has_key("GEMINI_API_KEY") {
        eprintln!("Skipping test: GEMINI_API_KEY not set");
        return;
    }

    let provider = GeminiProvider::from_env().expect("Failed to create provider");
    assert!(provider.validate_key().await.expect("key check should complete"));

    let response = provider
        .get_persona_reply(persona_prompt())
        .await
        .expect("Gemini should respond");
    println!("Gemini: {}", response.text);
    assert!(response.is_blocked() || !response.text.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_anthropic_plain_generation() {
    setup();
    if !has_key("ANTHROPIC_API_KEY") {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let provider = AnthropicProvider::from_env().expect("Failed to create provider");
    let request = GenerationRequest::new("Reply with the single word: pong")
        .with_system("You answer tersely.")
        .with_safety(SafetyTier::Strict);

    let response = provider.generate(request).await.expect("Claude should respond");
    println!("Claude: {}", response.text);
    assert!(response.text.to_lowercase().contains("pong"));
}

#[tokio::test]
#[ignore]
async fn test_live_group_exchange() {
    setup();
    if !has_key("GEMINI_API_KEY") {
        eprintln!("Skipping test: GEMINI_API_KEY not set");
        return;
    }

    let provider: Arc<dyn GenerationProvider> =
        Arc::new(GeminiProvider::from_env().expect("Failed to create provider"));
    let mut config = EngineConfig::default();
    config.scheduler.max_rounds = 3;
    let queues = Arc::new(QueueRegistry::new(config.queue.clone()));
    let engine = ChatEngine::new(
        config,
        ProviderRegistry::new().with_provider(provider.clone()),
        queues.clone(),
        Arc::new(LlmSummarizer::new(provider, queues)),
        Arc::new(InMemoryStore::new()),
    )
    .expect("config should be valid");

    let members = vec![
        Participant::new("mika", "Mika")
            .with_age(24)
            .with_persona("A cheerful barista who loves bad puns."),
        Participant::new("ren", "Ren")
            .with_age(27)
            .with_persona("A dry-witted librarian."),
    ];
    let room = Room::new("cafe", members.iter().map(|p| p.id.clone()).collect());
    let mut session = RoomSession::new(room, HumanProfile::new("Sam").with_age(30), members)
        .expect("roster should resolve");

    let noon = NaiveTime::from_hms_opt(12, 0, 0).expect("valid time");
    let outcome = engine
        .handle_message(&mut session, "@all what should I read today?", noon, &mut StdRng::seed_from_u64(42))
        .await;

    let map = session.mention_map();
    for message in session.transcript() {
        println!("{}: {}", session.sender_name(&message.sender), map.to_display(&message.content));
    }
    for (participant, error) in outcome.report.failures() {
        println!("  {participant} failed: {error}");
    }
    assert!(!outcome.report.rounds.is_empty());
}
