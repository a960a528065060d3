//! The call dialogue state machine.
//!
//! Each webhook delivery is one turn: the controller leases the call's
//! session, decides the next step from the current step and the transcript,
//! renders the reply and writes the session back before releasing the lease.
//! Whatever happens inside a turn, the caller gets well-formed markup back.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use uuid::Uuid;

use crate::address::{AddressAccumulator, extract_final_address, merge};
use crate::collaborators::{
    AddressValidator, IntentClassifier, RequestStore, ResponseGenerator, SpeechSynthesizer,
    TraceWriter,
};
use crate::composer::ResponseComposer;
use crate::config::{DialogueConfig, GatherSettings};
use crate::error::StoreError;
use crate::intent::IntentResolver;
use crate::prompts::{
    ADDRESS_TRANSFER, LIVE_AGENT_TRANSFER, PromptContext, PromptExtras, UNCLEAR_TRANSFER,
};
use crate::records::{CallStatus, NewCustomer, TraceEntry};
use crate::session::{CallSession, CallerName, DialogueStep, Intent, TurnMemo};
use crate::session_store::SessionStore;
use crate::tiers::resolve_tiers;
use crate::twiml::{NextAction, apology_xml};

/// Consecutive address turns that add nothing before the call is handed over.
pub const MAX_ADDRESS_STALLS: u32 = 2;

/// Stored on the customer when no address was ever collected.
pub const ADDRESS_NOT_PROVIDED: &str = "Address not provided";

const AFFIRMATIVE_KEYWORDS: &[&str] = &[
    "yes", "yeah", "correct", "right", "that's", "sure", "okay", "ok",
];
const REEXPLANATION_KEYWORDS: &[&str] = &[
    "didn't get",
    "didn't receive",
    "missed",
    "delivery",
    "start",
    "stop",
    "cancel",
];

static FIRST_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)first name is\s+(.+?)(?:\s*\.|,?\s+(?:and\s+)?(?:my\s+)?last name is\b|$)",
    )
    .expect("valid first name regex")
});
static LAST_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)last name is\s+([^.]+)").expect("valid last name regex"));

#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    #[error("failed to record the completed request: {0}")]
    Persistence(#[from] StoreError),
    #[error("call is already in terminal step {0}")]
    Terminal(DialogueStep),
}

/// Split a spoken name into first and last name.
///
/// "first name is X" / "last name is Y" wins when the first name is stated
/// that way; otherwise the first word is the first name and the rest the last.
pub fn parse_name(utterance: &str) -> CallerName {
    let trimmed = utterance.trim();
    if let Some(first) = FIRST_NAME_RE.captures(trimmed).and_then(|c| c.get(1)) {
        let last = LAST_NAME_RE
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map(|m| clean_name(m.as_str()))
            .unwrap_or_default();
        let first = clean_name(first.as_str());
        if !first.is_empty() {
            return CallerName {
                first_name: first,
                last_name: last,
            };
        }
    }

    let mut words = trimmed
        .split_whitespace()
        .map(clean_name)
        .filter(|w| !w.is_empty());
    let first_name = words.next().unwrap_or_else(|| "Unknown".to_string());
    let last_name = words.collect::<Vec<_>>().join(" ");
    CallerName {
        first_name,
        last_name,
    }
}

fn clean_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() && c != '\'' && c != '-')
        .to_string()
}

/// Whether a reply to the address read-back accepts it.
///
/// Outside strict mode a caller who starts explaining their request again is
/// taken to have accepted the address.
pub fn is_confirmation(transcript: &str, strict: bool) -> bool {
    let lowered = transcript.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));
    contains_any(AFFIRMATIVE_KEYWORDS) || (!strict && contains_any(REEXPLANATION_KEYWORDS))
}

/// Prompt that repeats the question asked at `step`.
fn repeat_context(step: DialogueStep) -> Option<PromptContext> {
    match step {
        DialogueStep::Greeting => Some(PromptContext::Greeting),
        DialogueStep::AwaitIntent => Some(PromptContext::IntentClarification),
        DialogueStep::AwaitAddress => Some(PromptContext::AddressRequest),
        DialogueStep::AwaitConfirmation => Some(PromptContext::AddressConfirmation),
        DialogueStep::AwaitName => Some(PromptContext::NameRequest),
        DialogueStep::Completed | DialogueStep::Forwarded => None,
    }
}

/// External services the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn IntentClassifier>,
    pub validator: Arc<dyn AddressValidator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub traces: Arc<dyn TraceWriter>,
    pub requests: Arc<dyn RequestStore>,
}

#[derive(Debug, Clone, Copy)]
enum Inbound<'a> {
    CallStarted {
        caller_number: Option<&'a str>,
    },
    Speech {
        expected: DialogueStep,
        transcript: &'a str,
    },
}

impl Inbound<'_> {
    fn expected(&self) -> DialogueStep {
        match self {
            Inbound::CallStarted { .. } => DialogueStep::Greeting,
            Inbound::Speech { expected, .. } => *expected,
        }
    }

    fn transcript(&self) -> &str {
        match self {
            Inbound::CallStarted { .. } => "",
            Inbound::Speech { transcript, .. } => transcript.trim(),
        }
    }
}

#[derive(Debug)]
enum Ending {
    Forwarded,
    Completed(Uuid),
}

/// What a turn decided: the words to speak, what the carrier does next and
/// whether the call ends here.
#[derive(Debug)]
struct Transition {
    text: String,
    next: NextAction,
    ending: Option<Ending>,
}

impl Transition {
    fn gather(text: String, settings: &GatherSettings) -> Self {
        Self {
            text,
            next: NextAction::Gather(settings.directive()),
            ending: None,
        }
    }
}

enum TurnResult {
    /// Reply sent without touching the stored session.
    Untouched(String),
    Continue(String),
    Finished(String),
}

pub struct DialogueController {
    sessions: Arc<SessionStore>,
    resolver: IntentResolver,
    accumulator: AddressAccumulator,
    composer: ResponseComposer,
    generator: Arc<dyn ResponseGenerator>,
    traces: Arc<dyn TraceWriter>,
    requests: Arc<dyn RequestStore>,
    config: DialogueConfig,
}

impl DialogueController {
    pub fn new(config: DialogueConfig, collaborators: Collaborators) -> Self {
        let timeouts = config.timeouts;
        Self {
            sessions: Arc::new(SessionStore::new(config.session_ttl)),
            resolver: IntentResolver::new(
                collaborators.classifier,
                config.intent_threshold,
                timeouts.classifier,
            ),
            accumulator: AddressAccumulator::new(
                collaborators.validator,
                config.address_min_confidence,
                timeouts.validator,
            ),
            composer: ResponseComposer::new(
                collaborators.synthesizer,
                timeouts.synthesizer,
                config.speech_fallback.clone(),
            ),
            generator: collaborators.generator,
            traces: collaborators.traces,
            requests: collaborators.requests,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    /// Entry point for a new inbound call. Always returns carrier markup.
    ///
    /// `delivery` is the carrier's idempotency token, when it sent one.
    pub async fn handle_call_started(
        &self,
        call_id: &str,
        delivery: Option<&str>,
        caller_number: Option<&str>,
    ) -> String {
        self.run(call_id, delivery, Inbound::CallStarted { caller_number })
            .await
    }

    /// One transcript for a call the carrier believes is in `expected`.
    /// Always returns carrier markup.
    ///
    /// Only a delivery carrying the same idempotency token as the previous
    /// turn is answered from the cache. A caller repeating themselves word
    /// for word is a new turn.
    pub async fn handle_speech(
        &self,
        call_id: &str,
        delivery: Option<&str>,
        expected: DialogueStep,
        transcript: &str,
    ) -> String {
        self.run(
            call_id,
            delivery,
            Inbound::Speech {
                expected,
                transcript,
            },
        )
        .await
    }

    async fn run(&self, call_id: &str, delivery: Option<&str>, inbound: Inbound<'_>) -> String {
        let mut lease = self.sessions.lease(call_id).await;
        if let Some(reply) = self.sessions.finished_reply(call_id) {
            tracing::info!(call_id, "Call already finished, replaying final response");
            return reply;
        }

        let expected = inbound.expected();
        let transcript = inbound.transcript();
        let (stored, created) = lease.get_or_create();
        if let Some(memo) = &stored.last_turn {
            if memo.is_retry_of(delivery, expected, transcript) {
                tracing::info!(call_id, step = %expected, delivery, "Retried delivery, replaying cached response");
                return memo.reply.clone();
            }
        }
        let mut session = stored.clone();

        match self.process(&mut session, created, inbound).await {
            Ok(TurnResult::Untouched(reply)) => reply,
            Ok(TurnResult::Continue(reply)) => {
                session.last_turn = Some(TurnMemo {
                    delivery: delivery.map(str::to_string),
                    expected,
                    transcript: transcript.to_string(),
                    reply: reply.clone(),
                });
                lease.put(session);
                reply
            }
            Ok(TurnResult::Finished(reply)) => {
                lease.finish(reply.clone());
                reply
            }
            Err(err) => {
                tracing::error!(call_id, step = %session.step, error = %err, "Turn failed, answering with apology");
                if let Err(store_err) = self
                    .traces
                    .set_status(call_id, CallStatus::Failed, None)
                    .await
                {
                    tracing::warn!(call_id, error = %store_err, "Failed to mark call as failed");
                }
                let reply = apology_xml();
                lease.finish(reply.clone());
                reply
            }
        }
    }

    async fn process(
        &self,
        session: &mut CallSession,
        created: bool,
        inbound: Inbound<'_>,
    ) -> Result<TurnResult, DialogueError> {
        let call_id = session.call_id.clone();
        match inbound {
            Inbound::CallStarted { caller_number } => {
                if !created && session.step != DialogueStep::Greeting {
                    return self.reprompt(session).await.map(TurnResult::Untouched);
                }
                tracing::info!(call_id = %call_id, "Call started");
                session.caller_number = caller_number.map(str::to_string);
                self.open_trace(&call_id, caller_number).await;
                let transition = self.greet(session, None).await;
                Ok(self.emit(session, transition).await)
            }
            Inbound::Speech {
                expected,
                transcript,
            } => {
                let transcript = transcript.trim();
                if created {
                    tracing::warn!(call_id = %call_id, step = %expected, "No session for call, resuming at expected step");
                    if expected != DialogueStep::Greeting {
                        session.advance(expected);
                    }
                    self.open_trace(&call_id, None).await;
                } else if session.step != expected {
                    tracing::warn!(
                        call_id = %call_id,
                        step = %session.step,
                        expected = %expected,
                        "Out-of-order delivery, repeating current prompt"
                    );
                    self.trace(&call_id, TraceEntry::caller(session.step, transcript))
                        .await;
                    return self.reprompt(session).await.map(TurnResult::Untouched);
                }

                self.trace(&call_id, TraceEntry::caller(session.step, transcript))
                    .await;
                let transition = self.step(session, transcript).await?;
                Ok(self.emit(session, transition).await)
            }
        }
    }

    async fn step(
        &self,
        session: &mut CallSession,
        transcript: &str,
    ) -> Result<Transition, DialogueError> {
        match session.step {
            DialogueStep::Greeting => Ok(self.greet(session, Some(transcript)).await),
            DialogueStep::AwaitIntent => Ok(self.on_intent(session, transcript).await),
            DialogueStep::AwaitAddress => Ok(self.on_address(session, transcript).await),
            DialogueStep::AwaitConfirmation => Ok(self.on_confirmation(session, transcript).await),
            DialogueStep::AwaitName => self.on_name(session, transcript).await,
            step @ (DialogueStep::Completed | DialogueStep::Forwarded) => {
                Err(DialogueError::Terminal(step))
            }
        }
    }

    async fn greet(&self, session: &mut CallSession, utterance: Option<&str>) -> Transition {
        let text = self
            .prompt(PromptContext::Greeting, utterance, &PromptExtras::default())
            .await;
        session.advance(DialogueStep::AwaitIntent);
        Transition::gather(text, &self.config.intent_gather)
    }

    async fn on_intent(&self, session: &mut CallSession, transcript: &str) -> Transition {
        let classification = self.resolver.resolve(transcript).await;
        session.intent = Some(classification.intent);

        if !classification.is_serviceable() {
            let text = if classification.intent == Intent::LiveAgent {
                LIVE_AGENT_TRANSFER
            } else {
                UNCLEAR_TRANSFER
            };
            return self.forward(session, text.to_string());
        }

        session.advance(DialogueStep::AwaitAddress);
        let extras = PromptExtras {
            intent: Some(classification.intent),
            ..Default::default()
        };
        let text = self
            .prompt(PromptContext::AddressRequest, Some(transcript), &extras)
            .await;
        Transition::gather(text, &self.config.address_gather)
    }

    async fn on_address(&self, session: &mut CallSession, transcript: &str) -> Transition {
        session.address_attempts += 1;
        let previous = session.address.clone().unwrap_or_default();
        let merged = merge(session.address.as_deref(), transcript);
        if merged == previous {
            session.address_stalls += 1;
        } else {
            session.address_stalls = 0;
            session.address = Some(merged);
        }

        if session.address_stalls >= MAX_ADDRESS_STALLS {
            tracing::warn!(call_id = %session.call_id, stalls = session.address_stalls, "Address collection stalled");
            return self.forward(session, ADDRESS_TRANSFER.to_string());
        }

        if let Some(address) = session.address.clone() {
            let candidate = self.accumulator.assess(&address).await;
            tracing::debug!(
                call_id = %session.call_id,
                complete = candidate.is_complete,
                confidence = candidate.confidence,
                source = candidate.source,
                "Address assessed"
            );
            if candidate.is_complete {
                session.advance(DialogueStep::AwaitConfirmation);
                let extras = PromptExtras {
                    address: Some(address),
                    ..Default::default()
                };
                let text = self
                    .prompt(PromptContext::AddressConfirmation, Some(transcript), &extras)
                    .await;
                return Transition::gather(text, &self.config.confirm_gather);
            }
        }

        if session.address_attempts >= self.config.max_address_attempts {
            tracing::warn!(call_id = %session.call_id, attempts = session.address_attempts, "Address still incomplete after maximum attempts");
            return self.forward(session, ADDRESS_TRANSFER.to_string());
        }

        session.advance(DialogueStep::AwaitAddress);
        let extras = PromptExtras {
            address: session.address.clone(),
            intent: session.intent,
            ..Default::default()
        };
        let text = self
            .prompt(PromptContext::AddressRequest, Some(transcript), &extras)
            .await;
        Transition::gather(text, &self.config.address_gather)
    }

    async fn on_confirmation(&self, session: &mut CallSession, transcript: &str) -> Transition {
        if is_confirmation(transcript, self.config.strict_confirmation) {
            session.advance(DialogueStep::AwaitName);
            let text = self
                .prompt(PromptContext::NameRequest, Some(transcript), &PromptExtras::default())
                .await;
            return Transition::gather(text, &self.config.name_gather);
        }

        tracing::info!(call_id = %session.call_id, "Address not confirmed, asking again");
        session.address_stalls = 0;
        session.advance(DialogueStep::AwaitAddress);
        let extras = PromptExtras {
            intent: session.intent,
            ..Default::default()
        };
        let text = self
            .prompt(PromptContext::AddressRequest, Some(transcript), &extras)
            .await;
        Transition::gather(text, &self.config.address_gather)
    }

    async fn on_name(
        &self,
        session: &mut CallSession,
        transcript: &str,
    ) -> Result<Transition, DialogueError> {
        let Some(intent) = session.intent.filter(|i| i.is_service_intent()) else {
            tracing::warn!(call_id = %session.call_id, "Reached name step without a service intent");
            return Ok(self.forward(session, LIVE_AGENT_TRANSFER.to_string()));
        };

        let name = parse_name(transcript);
        let address = session
            .address
            .as_deref()
            .map(extract_final_address)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| ADDRESS_NOT_PROVIDED.to_string());

        let (customer, request) = self
            .requests
            .create_customer_with_request(
                NewCustomer {
                    first_name: name.first_name.clone(),
                    last_name: name.last_name.clone(),
                    address: address.clone(),
                    phone_number: session.caller_number.clone(),
                },
                intent,
            )
            .await?;
        tracing::info!(
            call_id = %session.call_id,
            customer_id = %customer.id,
            request_id = %request.id,
            intent = %intent,
            "Service request created"
        );

        let extras = PromptExtras {
            address: Some(address),
            intent: Some(intent),
            first_name: Some(name.first_name.clone()),
        };
        session.caller_name = Some(name);
        session.advance(DialogueStep::Completed);
        let text = self
            .prompt(PromptContext::Completion, Some(transcript), &extras)
            .await;
        Ok(Transition {
            text,
            next: NextAction::Hangup,
            ending: Some(Ending::Completed(customer.id)),
        })
    }

    fn forward(&self, session: &mut CallSession, text: String) -> Transition {
        tracing::info!(call_id = %session.call_id, from = %session.step, "Forwarding call to live agent");
        session.advance(DialogueStep::Forwarded);
        Transition {
            text,
            next: NextAction::Dial(self.config.live_agent_number.clone()),
            ending: Some(Ending::Forwarded),
        }
    }

    /// Repeat the prompt of the current step without changing anything.
    async fn reprompt(&self, session: &CallSession) -> Result<String, DialogueError> {
        let step = session.step;
        let (Some(context), Some(settings)) = (repeat_context(step), self.config.gather_for(step))
        else {
            return Err(DialogueError::Terminal(step));
        };
        let extras = PromptExtras {
            address: session.address.clone(),
            intent: session.intent,
            ..Default::default()
        };
        let text = self.prompt(context, None, &extras).await;
        self.trace(&session.call_id, TraceEntry::agent(session.step, &text))
            .await;
        let response = self
            .composer
            .compose(&text, NextAction::Gather(settings.directive()))
            .await;
        Ok(response.to_xml())
    }

    async fn emit(&self, session: &CallSession, transition: Transition) -> TurnResult {
        let call_id = session.call_id.as_str();
        self.trace(call_id, TraceEntry::agent(session.step, &transition.text))
            .await;
        let reply = self
            .composer
            .compose(&transition.text, transition.next)
            .await
            .to_xml();

        let (status, customer_id) = match transition.ending {
            None => return TurnResult::Continue(reply),
            Some(Ending::Forwarded) => (CallStatus::Forwarded, None),
            Some(Ending::Completed(customer_id)) => (CallStatus::Completed, Some(customer_id)),
        };
        if let Err(err) = self.traces.set_status(call_id, status, customer_id).await {
            tracing::warn!(call_id, status = status.as_str(), error = %err, "Failed to update call status");
        }
        TurnResult::Finished(reply)
    }

    /// Natural-language prompt, or the fixed text for the context when the
    /// generator cannot answer.
    async fn prompt(
        &self,
        context: PromptContext,
        last_utterance: Option<&str>,
        extras: &PromptExtras,
    ) -> String {
        resolve_tiers(
            "response_generator",
            self.config.timeouts.generator,
            self.generator.render(context, last_utterance, extras),
            |text: &String| !text.trim().is_empty(),
            || Some(context.fallback_text(extras)),
        )
        .await
        .into_value()
        .unwrap_or_else(|| context.fallback_text(extras))
    }

    async fn open_trace(&self, call_id: &str, caller_number: Option<&str>) {
        if let Err(err) = self.traces.open_call(call_id, caller_number).await {
            tracing::warn!(call_id, error = %err, "Failed to open call log");
        }
    }

    async fn trace(&self, call_id: &str, entry: TraceEntry) {
        if let Err(err) = self.traces.append(call_id, entry).await {
            tracing::warn!(call_id, error = %err, "Failed to append conversation trace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AudioRef, ClassifierVerdict, Entities, Unconfigured};
    use crate::error::CollaboratorError;
    use crate::memory::MemoryRecords;
    use crate::prompts::APOLOGY;
    use crate::records::{RequestStatus, Speaker};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const START: &[&str] = &[
        "I want to start delivery",
        "123 Main Street Springfield IL 62704",
        "yes that's right",
        "first name is Jane last name is Doe",
    ];

    struct Harness {
        controller: Arc<DialogueController>,
        records: Arc<MemoryRecords>,
    }

    fn harness(config: DialogueConfig) -> Harness {
        harness_with(config, Arc::new(Unconfigured("classifier")), Arc::new(Unconfigured("tts")))
    }

    fn harness_with(
        config: DialogueConfig,
        classifier: Arc<dyn IntentClassifier>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Harness {
        let records = Arc::new(MemoryRecords::new());
        let controller = DialogueController::new(
            config,
            Collaborators {
                classifier,
                validator: Arc::new(Unconfigured("geocoder")),
                synthesizer,
                generator: Arc::new(Unconfigured("generator")),
                traces: records.clone(),
                requests: records.clone(),
            },
        );
        Harness {
            controller: Arc::new(controller),
            records,
        }
    }

    async fn step_of(h: &Harness, call_id: &str) -> Option<DialogueStep> {
        h.controller.sessions().get(call_id).await.map(|s| s.step)
    }

    struct FailingClassifier;

    #[async_trait]
    impl IntentClassifier for FailingClassifier {
        fn method(&self) -> &'static str {
            "failing"
        }

        async fn classify(&self, _text: &str) -> Result<ClassifierVerdict, CollaboratorError> {
            Err(CollaboratorError::Transport("connection refused".to_string()))
        }
    }

    struct CountingSynthesizer(AtomicUsize);

    #[async_trait]
    impl SpeechSynthesizer for CountingSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<AudioRef, CollaboratorError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(AudioRef {
                url: format!("https://calls.example.com/audio/speech_{n}.mp3"),
            })
        }
    }

    struct ConfidentClassifier(Intent);

    #[async_trait]
    impl IntentClassifier for ConfidentClassifier {
        fn method(&self) -> &'static str {
            "scripted"
        }

        async fn classify(&self, _text: &str) -> Result<ClassifierVerdict, CollaboratorError> {
            Ok(ClassifierVerdict {
                intent: self.0,
                confidence: 0.95,
                entities: Entities::new(),
            })
        }
    }

    #[test]
    fn explicit_name_pattern_is_preferred() {
        let name = parse_name("first name is Jane last name is Doe");
        assert_eq!(name.first_name, "Jane");
        assert_eq!(name.last_name, "Doe");

        let name = parse_name("My first name is Mary Ann. My last name is Smith.");
        assert_eq!(name.first_name, "Mary Ann");
        assert_eq!(name.last_name, "Smith");
    }

    #[test]
    fn commas_inside_stated_names_are_kept() {
        let name = parse_name("first name is John, last name is Smith, Jr");
        assert_eq!(name.first_name, "John");
        assert_eq!(name.last_name, "Smith, Jr");

        let name = parse_name("My first name is Mary-Kate, and my last name is O'Brien, Jr.");
        assert_eq!(name.first_name, "Mary-Kate");
        assert_eq!(name.last_name, "O'Brien, Jr");
    }

    #[test]
    fn plain_names_split_on_whitespace() {
        let name = parse_name("John Paul Jones.");
        assert_eq!(name.first_name, "John");
        assert_eq!(name.last_name, "Paul Jones");

        let name = parse_name("   ");
        assert_eq!(name.first_name, "Unknown");
        assert_eq!(name.last_name, "");
    }

    #[test]
    fn confirmation_accepts_affirmatives_and_reexplanations() {
        assert!(is_confirmation("Yes that's right", false));
        assert!(is_confirmation("I just want my delivery started", false));
        assert!(!is_confirmation("no, it's 124", false));
        assert!(!is_confirmation("I just want my delivery started", true));
        assert!(is_confirmation("okay", true));
    }

    #[tokio::test]
    async fn start_dialogue_completes_with_one_pending_request() {
        let h = harness(DialogueConfig::default());
        let greeting = h
            .controller
            .handle_call_started("CA1", None, Some("+15550100"))
            .await;
        assert!(greeting.contains(r#"action="/webhook/gather""#));
        assert_eq!(step_of(&h, "CA1").await, Some(DialogueStep::AwaitIntent));

        let expected = [
            DialogueStep::AwaitIntent,
            DialogueStep::AwaitAddress,
            DialogueStep::AwaitConfirmation,
            DialogueStep::AwaitName,
        ];
        let mut last = String::new();
        for (utterance, step) in START.iter().zip(expected) {
            assert_eq!(step_of(&h, "CA1").await, Some(step));
            last = h.controller.handle_speech("CA1", None, step, utterance).await;
        }

        assert!(last.contains("Thank you, Jane"));
        assert!(last.ends_with("<Hangup/></Response>"));
        assert!(step_of(&h, "CA1").await.is_none());

        let requests = h.records.service_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].intent, Intent::Start);
        assert_eq!(requests[0].status, RequestStatus::Pending);

        let customers = h.records.customers();
        assert_eq!(customers[0].first_name, "Jane");
        assert_eq!(customers[0].last_name, "Doe");
        assert_eq!(customers[0].address, "123 Main Street Springfield IL 62704");
        assert_eq!(customers[0].phone_number.as_deref(), Some("+15550100"));

        let call = h.records.call("CA1").expect("call log");
        assert_eq!(call.call_status, CallStatus::Completed);
        assert_eq!(call.customer_id, Some(customers[0].id));
        let caller_lines: Vec<&str> = call
            .conversation_log
            .iter()
            .filter(|e| e.speaker == Speaker::Caller)
            .map(|e| e.text.as_str())
            .collect();
        assert_eq!(caller_lines, START.to_vec());
    }

    #[tokio::test]
    async fn gibberish_is_forwarded_with_a_dial() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA2", None, None).await;
        let reply = h
            .controller
            .handle_speech("CA2", None, DialogueStep::AwaitIntent, "asdkjfh")
            .await;

        assert!(reply.contains("<Dial>+1234567890</Dial>"));
        assert!(!reply.contains("<Gather"));
        assert!(step_of(&h, "CA2").await.is_none());
        assert_eq!(
            h.records.call("CA2").expect("call log").call_status,
            CallStatus::Forwarded
        );
    }

    #[tokio::test]
    async fn live_agent_request_is_forwarded() {
        let h = harness_with(
            DialogueConfig::default(),
            Arc::new(ConfidentClassifier(Intent::LiveAgent)),
            Arc::new(Unconfigured("tts")),
        );
        h.controller.handle_call_started("CA3", None, None).await;
        let reply = h
            .controller
            .handle_speech("CA3", None, DialogueStep::AwaitIntent, "put me through")
            .await;
        assert!(reply.contains(LIVE_AGENT_TRANSFER));
        assert!(reply.contains("<Dial>"));
    }

    #[tokio::test]
    async fn every_collaborator_failing_still_yields_markup() {
        let h = harness_with(
            DialogueConfig::default(),
            Arc::new(FailingClassifier),
            Arc::new(Unconfigured("tts")),
        );
        h.records.fail_writes(true);

        let mut replies = vec![h.controller.handle_call_started("CA4", None, None).await];
        let steps = [
            DialogueStep::AwaitIntent,
            DialogueStep::AwaitAddress,
            DialogueStep::AwaitConfirmation,
            DialogueStep::AwaitName,
        ];
        for (utterance, step) in START.iter().zip(steps) {
            replies.push(h.controller.handle_speech("CA4", None, step, utterance).await);
        }

        for reply in &replies {
            assert!(reply.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#));
            assert!(reply.ends_with("</Response>"));
        }
        let last = replies.last().expect("final reply");
        assert!(last.contains(APOLOGY));
        assert!(last.ends_with("<Hangup/></Response>"));
        assert!(h.records.service_requests().is_empty());
        assert_eq!(
            h.records.call("CA4").expect("call log").call_status,
            CallStatus::Failed
        );
    }

    #[tokio::test]
    async fn failed_request_write_leaves_no_orphan_customer() {
        let h = harness(DialogueConfig::default());
        h.records.fail_requests(true);
        h.controller.handle_call_started("CA17", None, None).await;
        let steps = [
            DialogueStep::AwaitIntent,
            DialogueStep::AwaitAddress,
            DialogueStep::AwaitConfirmation,
            DialogueStep::AwaitName,
        ];
        let mut last = String::new();
        for (utterance, step) in START.iter().zip(steps) {
            last = h.controller.handle_speech("CA17", None, step, utterance).await;
        }

        assert!(last.contains(APOLOGY));
        assert!(h.records.customers().is_empty());
        assert!(h.records.service_requests().is_empty());
        assert_eq!(
            h.records.call("CA17").expect("call log").call_status,
            CallStatus::Failed
        );
    }

    #[tokio::test]
    async fn duplicate_delivery_replays_without_side_effects() {
        let synthesizer = Arc::new(CountingSynthesizer(AtomicUsize::new(0)));
        let h = harness_with(
            DialogueConfig::default(),
            Arc::new(Unconfigured("classifier")),
            synthesizer.clone(),
        );
        h.controller.handle_call_started("CA5", None, None).await;
        let first = h
            .controller
            .handle_speech("CA5", Some("idem-5"), DialogueStep::AwaitIntent, START[0])
            .await;
        let calls = synthesizer.0.load(Ordering::SeqCst);
        let again = h
            .controller
            .handle_speech("CA5", Some("idem-5"), DialogueStep::AwaitIntent, START[0])
            .await;

        assert_eq!(first, again);
        assert_eq!(synthesizer.0.load(Ordering::SeqCst), calls);
        assert_eq!(step_of(&h, "CA5").await, Some(DialogueStep::AwaitAddress));
    }

    #[tokio::test]
    async fn stale_delivery_repeats_the_current_prompt() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA6", None, None).await;
        h.controller
            .handle_speech("CA6", None, DialogueStep::AwaitIntent, START[0])
            .await;

        let reply = h
            .controller
            .handle_speech("CA6", None, DialogueStep::AwaitName, "Jane Doe")
            .await;
        assert!(reply.contains(r#"action="/webhook/address""#));
        let session = h.controller.sessions().get("CA6").await.expect("session");
        assert_eq!(session.step, DialogueStep::AwaitAddress);
        assert_eq!(session.address_attempts, 0);
        assert!(h.records.customers().is_empty());
    }

    #[tokio::test]
    async fn retry_after_completion_replays_the_final_reply() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA7", None, None).await;
        let steps = [
            DialogueStep::AwaitIntent,
            DialogueStep::AwaitAddress,
            DialogueStep::AwaitConfirmation,
            DialogueStep::AwaitName,
        ];
        let mut last = String::new();
        for (utterance, step) in START.iter().zip(steps) {
            last = h.controller.handle_speech("CA7", None, step, utterance).await;
        }
        let retried = h
            .controller
            .handle_speech("CA7", None, DialogueStep::AwaitName, START[3])
            .await;

        assert_eq!(retried, last);
        assert_eq!(h.records.service_requests().len(), 1);
    }

    #[tokio::test]
    async fn unknown_call_resumes_at_the_expected_step() {
        let h = harness(DialogueConfig::default());
        let reply = h
            .controller
            .handle_speech("CA8", None, DialogueStep::AwaitAddress, "123 Main Street")
            .await;
        assert!(reply.contains(r#"action="/webhook/address""#));
        let session = h.controller.sessions().get("CA8").await.expect("session");
        assert_eq!(session.step, DialogueStep::AwaitAddress);
        assert_eq!(session.address.as_deref(), Some("123 Main Street"));
    }

    #[tokio::test]
    async fn partial_addresses_accumulate_until_complete() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA9", None, None).await;
        h.controller
            .handle_speech("CA9", None, DialogueStep::AwaitIntent, "I want to stop my delivery")
            .await;
        h.controller
            .handle_speech("CA9", None, DialogueStep::AwaitAddress, "123 Main Street")
            .await;
        assert_eq!(step_of(&h, "CA9").await, Some(DialogueStep::AwaitAddress));

        let reply = h
            .controller
            .handle_speech("CA9", None, DialogueStep::AwaitAddress, "Springfield IL 62704")
            .await;
        assert!(reply.contains("123 Main Street, Springfield IL 62704"));
        assert_eq!(
            step_of(&h, "CA9").await,
            Some(DialogueStep::AwaitConfirmation)
        );
    }

    #[tokio::test]
    async fn repeated_stalls_forward_the_call() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA10", None, None).await;
        h.controller
            .handle_speech("CA10", None, DialogueStep::AwaitIntent, START[0])
            .await;
        h.controller
            .handle_speech("CA10", None, DialogueStep::AwaitAddress, "123 Main Street")
            .await;

        let first_stall = h
            .controller
            .handle_speech("CA10", None, DialogueStep::AwaitAddress, "Main Street")
            .await;
        assert!(first_stall.contains(r#"action="/webhook/address""#));

        let second_stall = h
            .controller
            .handle_speech("CA10", None, DialogueStep::AwaitAddress, "123 Main")
            .await;
        assert!(second_stall.contains(ADDRESS_TRANSFER));
        assert!(second_stall.contains("<Dial>"));
        assert!(step_of(&h, "CA10").await.is_none());
    }

    #[tokio::test]
    async fn same_fragment_repeated_by_the_caller_forwards_the_call() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA15", None, None).await;
        h.controller
            .handle_speech("CA15", None, DialogueStep::AwaitIntent, START[0])
            .await;

        let mut replies = Vec::new();
        for _ in 0..6 {
            let reply = h
                .controller
                .handle_speech("CA15", None, DialogueStep::AwaitAddress, "123 Main Street")
                .await;
            let forwarded = reply.contains("<Dial>");
            replies.push(reply);
            if forwarded {
                break;
            }
        }

        assert_eq!(replies.len(), 1 + MAX_ADDRESS_STALLS as usize);
        let last = replies.last().expect("at least one reply");
        assert!(last.contains(ADDRESS_TRANSFER));
        assert!(step_of(&h, "CA15").await.is_none());
        assert_eq!(
            h.records.call("CA15").expect("call log").call_status,
            CallStatus::Forwarded
        );
    }

    #[tokio::test]
    async fn new_token_with_identical_speech_is_processed() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA16", None, None).await;
        h.controller
            .handle_speech("CA16", None, DialogueStep::AwaitIntent, START[0])
            .await;
        for token in ["idem-a", "idem-a", "idem-b"] {
            h.controller
                .handle_speech("CA16", Some(token), DialogueStep::AwaitAddress, "123 Main Street")
                .await;
        }

        let session = h.controller.sessions().get("CA16").await.expect("session");
        assert_eq!(session.address_attempts, 2);
        assert_eq!(session.address_stalls, 1);
    }

    #[tokio::test]
    async fn too_many_address_attempts_forward_the_call() {
        let config = DialogueConfig {
            max_address_attempts: 2,
            ..Default::default()
        };
        let h = harness(config);
        h.controller.handle_call_started("CA11", None, None).await;
        h.controller
            .handle_speech("CA11", None, DialogueStep::AwaitIntent, START[0])
            .await;
        h.controller
            .handle_speech("CA11", None, DialogueStep::AwaitAddress, "123 Main Street")
            .await;
        let reply = h
            .controller
            .handle_speech("CA11", None, DialogueStep::AwaitAddress, "near the park")
            .await;
        assert!(reply.contains("<Dial>"));
    }

    #[tokio::test]
    async fn rejected_confirmation_asks_for_the_address_again() {
        let h = harness(DialogueConfig::default());
        h.controller.handle_call_started("CA12", None, None).await;
        for (utterance, step) in START[..2]
            .iter()
            .zip([DialogueStep::AwaitIntent, DialogueStep::AwaitAddress])
        {
            h.controller.handle_speech("CA12", None, step, utterance).await;
        }
        let reply = h
            .controller
            .handle_speech("CA12", None, DialogueStep::AwaitConfirmation, "no")
            .await;
        assert!(reply.contains(r#"action="/webhook/address""#));
        assert_eq!(step_of(&h, "CA12").await, Some(DialogueStep::AwaitAddress));
    }

    #[tokio::test]
    async fn resumed_call_without_intent_is_forwarded_at_name_step() {
        let h = harness(DialogueConfig::default());
        let reply = h
            .controller
            .handle_speech("CA13", None, DialogueStep::AwaitName, "Jane Doe")
            .await;
        assert!(reply.contains("<Dial>"));
        assert!(h.records.customers().is_empty());
    }

    #[tokio::test]
    async fn synthesized_audio_is_played_inside_gather() {
        let h = harness_with(
            DialogueConfig::default(),
            Arc::new(Unconfigured("classifier")),
            Arc::new(CountingSynthesizer(AtomicUsize::new(0))),
        );
        let reply = h.controller.handle_call_started("CA14", None, None).await;
        assert!(reply.contains("<Play>https://calls.example.com/audio/speech_0.mp3</Play></Gather>"));
    }

    #[tokio::test]
    async fn concurrent_calls_do_not_interfere() {
        let h = harness(DialogueConfig::default());
        let mut handles = Vec::new();
        for i in 0..8 {
            let controller = h.controller.clone();
            handles.push(tokio::spawn(async move {
                let call_id = format!("CA-par-{i}");
                controller.handle_call_started(&call_id, None, None).await;
                controller
                    .handle_speech(&call_id, None, DialogueStep::AwaitIntent, START[0])
                    .await
            }));
        }
        for handle in handles {
            let reply = handle.await.expect("task should finish");
            assert!(reply.contains(r#"action="/webhook/address""#));
        }
        assert_eq!(h.controller.sessions().len(), 8);
    }
}
