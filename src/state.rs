//! Application state: controller, session store, usage ledger, speech-to-text.
//!
//! This module owns:
//!   - the tutoring controller (prompts + completion provider + interaction log)
//!   - the in-memory session store
//!   - the usage ledger consulted by the gate
//!   - optional speech-to-text client
//!
//! If OpenAI is unavailable, the controller runs on the offline provider and
//! every reply degrades to the apology or a canned hint.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{load_tutor_config_from_env, GateConfig, Limits, Prompts};
use crate::controller::TutorController;
use crate::gate::{InMemoryUsageLedger, UsageLedger};
use crate::interaction::{InteractionLog, TracingInteractionLog};
use crate::openai::OpenAI;
use crate::provider::{CompletionProvider, OfflineProvider, SpeechToText};
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<TutorController>,
    pub sessions: SessionStore,
    pub ledger: Arc<dyn UsageLedger>,
    pub transcriber: Option<Arc<dyn SpeechToText>>,
    pub limits: Limits,
    pub gate: GateConfig,
}

impl AppState {
    /// Build state from env: load config, init OpenAI, wire controller and gate.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        // Load TOML config if provided (prompts + limits).
        let cfg = load_tutor_config_from_env().unwrap_or_default();

        // Build optional OpenAI client (if API key present).
        let openai = OpenAI::from_env().map(Arc::new);
        let (provider, transcriber): (Arc<dyn CompletionProvider>, Option<Arc<dyn SpeechToText>>) =
            match &openai {
                Some(oa) => {
                    info!(target: "tutor_backend", base_url = %oa.base_url, fast_model = %oa.fast_model, strong_model = %oa.strong_model, vision_model = %oa.vision_model, transcribe_model = %oa.transcribe_model, "OpenAI enabled.");
                    let provider: Arc<dyn CompletionProvider> = oa.clone();
                    let transcriber: Arc<dyn SpeechToText> = oa.clone();
                    (provider, Some(transcriber))
                }
                None => {
                    warn!(target: "tutor_backend", "OpenAI disabled (no OPENAI_API_KEY). Replies will degrade to fallbacks.");
                    let provider: Arc<dyn CompletionProvider> = Arc::new(OfflineProvider);
                    (provider, None)
                }
            };

        info!(
            target: "tutor_backend",
            anonymous_limit = cfg.limits.anonymous_question_limit,
            history_window = cfg.limits.history_window,
            max_upload_bytes = cfg.limits.max_upload_bytes,
            canned_hints = cfg.prompts.canned_hints.len(),
            trusted_proxy = cfg.gate.trusted_proxy_secret.is_some(),
            "Tutor limits"
        );

        let ledger = Arc::new(InMemoryUsageLedger::new(cfg.limits.anonymous_question_limit));
        Self::with_parts(provider, transcriber, ledger, Arc::new(TracingInteractionLog), cfg.prompts, cfg.limits)
            .with_gate(cfg.gate)
    }

    /// Explicit wiring; used by `new` and by tests.
    pub fn with_parts(
        provider: Arc<dyn CompletionProvider>,
        transcriber: Option<Arc<dyn SpeechToText>>,
        ledger: Arc<dyn UsageLedger>,
        log: Arc<dyn InteractionLog>,
        prompts: Prompts,
        limits: Limits,
    ) -> Self {
        let controller = TutorController::new(provider, prompts, limits.history_window, log);
        Self {
            controller: Arc::new(controller),
            sessions: SessionStore::new(),
            ledger,
            transcriber,
            limits,
            gate: GateConfig::default(),
        }
    }

    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    pub fn prompts(&self) -> &Prompts {
        self.controller.prompts()
    }
}
