use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    image_gen::ImageBackend,
    models::{Field, GeneratedImage, RecommendationResult, Session, Stage, UserRequest},
    recommendation::TextGenerator,
};

pub const IMAGE_FAILED_WARNING: &str = "示意圖生成失敗，但文字建議已完成";
pub const INTERRUPTED_ERROR: &str = "generation was interrupted before a recommendation arrived";

/// In-memory sessions. Sessions idle for longer than `idle_ttl` are dropped the next time
/// a session is created; a session with a run in flight is never dropped.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
    idle_ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self { inner: Arc::default(), idle_ttl }
    }

    pub fn create(&self) -> Session {
        let session = Session::new();
        let mut guard = self.inner.write();
        evict_idle(&mut guard, session.created_at, self.idle_ttl);
        guard.insert(session.id, session.clone());
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.inner.read().get(&id).cloned()
    }

    /// Runs `f` against the session under the write lock. The lock is never held across an await.
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut guard = self.inner.write();
        let session = guard.get_mut(&id)?;
        let result = f(session);
        session.touch();
        Some(result)
    }
}

fn evict_idle(sessions: &mut HashMap<Uuid, Session>, now: DateTime<Utc>, ttl: Duration) {
    let before = sessions.len();
    sessions.retain(|_, s| {
        // A clock step backwards yields a negative age, which counts as fresh.
        s.stage.is_generating() || (now - s.updated_at).to_std().map_or(true, |age| age <= ttl)
    });
    let evicted = before - sessions.len();
    if evicted > 0 {
        info!("🧹 Evicted {} idle session(s), {} remaining", evicted, sessions.len());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    NotFound,
    /// A generation for this session is already in flight.
    Busy,
    Invalid(Vec<Field>),
    TextFailed(String),
    Complete { image: bool },
}

/// AwaitingInput/Complete -> GeneratingText, clearing the previous run's outputs.
pub fn begin(session: &mut Session) -> Result<UserRequest, PipelineOutcome> {
    if session.stage.is_generating() {
        return Err(PipelineOutcome::Busy);
    }
    let request = session.inputs.validate().map_err(|missing| {
        session.error = Some(format!(
            "missing required field(s): {}",
            missing.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        ));
        PipelineOutcome::Invalid(missing)
    })?;
    session.recommendation = None;
    session.image = None;
    session.warning = None;
    session.error = None;
    session.stage = Stage::GeneratingText;
    Ok(request)
}

/// GeneratingText -> GeneratingImage. Returns the prompt for the image stage.
pub fn finish_text(session: &mut Session, result: RecommendationResult) -> String {
    let prompt = result.image_prompt.clone();
    session.recommendation = Some(result);
    session.stage = Stage::GeneratingImage;
    prompt
}

/// GeneratingText -> AwaitingInput. Inputs stay; `begin` already cleared the image.
pub fn fail_text(session: &mut Session, message: String) {
    session.recommendation = None;
    session.error = Some(message);
    session.stage = Stage::AwaitingInput;
}

/// GeneratingImage -> Complete, with or without an image.
pub fn finish_image(session: &mut Session, url: Option<String>) -> bool {
    let generated = url.is_some();
    session.image = url.map(GeneratedImage::new);
    if !generated {
        session.warning = Some(IMAGE_FAILED_WARNING.to_string());
    }
    session.stage = Stage::Complete;
    generated
}

/// Drops the previous recommendation and image ahead of a fresh run.
pub fn reset_for_regenerate(session: &mut Session) -> Result<(), PipelineOutcome> {
    if session.stage.is_generating() {
        return Err(PipelineOutcome::Busy);
    }
    session.recommendation = None;
    session.image = None;
    session.warning = None;
    session.error = None;
    session.stage = Stage::AwaitingInput;
    Ok(())
}

/// Settles a run whose future was dropped before it finished: an unfinished text stage
/// fails back to AwaitingInput, an unfinished image stage completes without an image.
pub fn interrupt(session: &mut Session) {
    match session.stage {
        Stage::GeneratingText => fail_text(session, INTERRUPTED_ERROR.to_string()),
        Stage::GeneratingImage => {
            finish_image(session, None);
        }
        Stage::AwaitingInput | Stage::Complete => {}
    }
}

struct RunGuard<'a> {
    store: &'a SessionStore,
    id: Uuid,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(store: &'a SessionStore, id: Uuid) -> Self {
        Self { store, id, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("⚠️ Session {}: run dropped mid-flight, releasing the session", self.id);
            self.store.update(self.id, interrupt);
        }
    }
}

pub struct Pipeline<'a> {
    pub text: &'a dyn TextGenerator,
    pub image: &'a dyn ImageBackend,
}

impl<'a> Pipeline<'a> {
    pub fn new(text: &'a dyn TextGenerator, image: &'a dyn ImageBackend) -> Self {
        Self { text, image }
    }

    pub async fn run(&self, store: &SessionStore, id: Uuid) -> PipelineOutcome {
        let request = match store.update(id, begin) {
            None => return PipelineOutcome::NotFound,
            Some(Err(outcome)) => {
                warn!("⚠️ Session {} not started: {:?}", id, outcome);
                return outcome;
            }
            Some(Ok(request)) => request,
        };
        let mut guard = RunGuard::new(store, id);

        info!("🚀 Session {}: generating recommendation", id);
        let prompt = match self.text.generate(&request).await {
            Ok(result) => store.update(id, |s| finish_text(s, result)),
            Err(e) => {
                let message = e.to_string();
                store.update(id, |s| fail_text(s, message.clone()));
                guard.disarm();
                return PipelineOutcome::TextFailed(message);
            }
        };
        let Some(prompt) = prompt else {
            guard.disarm();
            return PipelineOutcome::NotFound;
        };

        info!("🎨 Session {}: generating image", id);
        let url = self.image.generate(&prompt).await;
        guard.disarm();
        match store.update(id, |s| finish_image(s, url)) {
            Some(image) => {
                info!("✅ Session {} complete (image={})", id, image);
                PipelineOutcome::Complete { image }
            }
            None => PipelineOutcome::NotFound,
        }
    }

    pub async fn regenerate(&self, store: &SessionStore, id: Uuid) -> PipelineOutcome {
        match store.update(id, reset_for_regenerate) {
            None => PipelineOutcome::NotFound,
            Some(Err(outcome)) => outcome,
            Some(Ok(())) => self.run(store, id).await,
        }
    }
}
