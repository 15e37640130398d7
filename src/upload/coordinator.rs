use super::classify::{FailureClass, FailureClassifier};
use super::endpoint::{ProcessingEndpoint, UploadRequest};
use super::session::{AttemptOutcome, AttemptRecord, PipelineState, RequestKind, UploadSession};
use crate::{
    config::UploadConfig,
    error::{PipelineError, Result},
    events::{EventBus, PipelineEvent},
    media::{MediaAsset, MediaKind, ProcessedResult},
    presenter::ResultPresenter,
    storage::{LocalMediaStore, PurgeReport},
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct CoordinatorInner {
    state: PipelineState,
    /// Bumped by every reset; in-flight work compares it after each await
    generation: u64,
    reference: Option<MediaAsset>,
    clip: Option<MediaAsset>,
    session: Option<UploadSession>,
    /// The session that last reached `Success` or `Failed`
    closed: Option<UploadSession>,
    last_result: Option<ProcessedResult>,
    last_error: Option<String>,
}

/// Validates a staged clip/reference pair, transmits it and applies the
/// single fallback policy.
///
/// All session state lives behind one lock that is never held across an
/// await. Each await is followed by a generation check so that work started
/// before a reset can never touch the session that replaced it.
pub struct UploadCoordinator {
    config: UploadConfig,
    discard_inputs_on_success: bool,
    classifier: FailureClassifier,
    store: Arc<LocalMediaStore>,
    endpoint: Arc<dyn ProcessingEndpoint>,
    presenter: Arc<ResultPresenter>,
    event_bus: Arc<EventBus>,
    inner: Arc<Mutex<CoordinatorInner>>,
}

impl UploadCoordinator {
    pub fn new(
        config: UploadConfig,
        store: Arc<LocalMediaStore>,
        endpoint: Arc<dyn ProcessingEndpoint>,
        presenter: Arc<ResultPresenter>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let classifier = FailureClassifier::new(config.retry_signatures.clone());
        Self {
            config,
            discard_inputs_on_success: false,
            classifier,
            store,
            endpoint,
            presenter,
            event_bus,
            inner: Arc::new(Mutex::new(CoordinatorInner::default())),
        }
    }

    /// Delete cached inputs once an upload succeeds
    pub fn with_input_discard(mut self, discard: bool) -> Self {
        self.discard_inputs_on_success = discard;
        self
    }

    /// Stage a captured asset. A session opens once both kinds are staged.
    ///
    /// Re-staging a kind before the session opens replaces it. Once a session
    /// exists, or the pipeline has left `Idle`, a reset is required first.
    pub fn attach(&self, asset: MediaAsset) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != PipelineState::Idle || inner.session.is_some() {
            return Err(PipelineError::SessionActive);
        }

        debug!("Staging {} {}", asset.kind, asset.display_name);
        match asset.kind {
            MediaKind::Image => inner.reference = Some(asset),
            MediaKind::Video => inner.clip = Some(asset),
        }

        if let (Some(reference), Some(clip)) = (&inner.reference, &inner.clip) {
            let session = UploadSession::new(reference.clone(), clip.clone());
            info!("Upload session {} ready", session.id);
            inner.session = Some(session);
        }
        Ok(())
    }

    /// Whether a new capture may be staged without a reset
    pub fn accepts_captures(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == PipelineState::Idle && inner.session.is_none()
    }

    /// Validate and transmit the active session.
    ///
    /// A second call while one is in flight fails with `AlreadyInProgress`
    /// and changes nothing. `Success` and `Failed` are only left by `reset`.
    pub async fn upload(&self) -> Result<ProcessedResult> {
        let (generation, staged) = {
            let mut inner = self.inner.lock();
            match inner.state {
                state if state.is_in_flight() => return Err(PipelineError::AlreadyInProgress),
                state if state.is_terminal() => {
                    return Err(PipelineError::InvalidState {
                        state,
                        operation: "upload",
                    })
                }
                _ => {}
            }
            inner.state = PipelineState::Validating;
            let staged = match &inner.session {
                Some(session) => Ok((
                    session.id,
                    session.reference.clone(),
                    session.clip.clone(),
                )),
                None => Err(Self::missing_description(&inner)),
            };
            (inner.generation, staged)
        };
        self.publish_state(PipelineState::Idle, PipelineState::Validating);

        let (session_id, reference, clip) = match staged {
            Ok(staged) => staged,
            Err(what) => return Err(self.fail(generation, PipelineError::missing_input(what))),
        };

        // Re-check disk state; cached metadata is not trusted
        for asset in [&reference, &clip] {
            let verified = self.store.verify(asset).await;
            self.ensure_current(generation)?;
            if let Err(e) = verified {
                return Err(self.fail(generation, e));
            }
        }

        let reference_bytes = self.read_input(generation, &reference).await?;
        let clip_bytes = self.read_input(generation, &clip).await?;

        self.transition(generation, PipelineState::Transmitting)?;
        let mut request = UploadRequest::primary(
            clip.display_name.clone(),
            clip_bytes,
            reference.display_name.clone(),
            reference_bytes.clone(),
        );

        loop {
            if let Some(result) = self.transmit(generation, request).await? {
                self.finish_success(generation, &result, &reference, &clip)
                    .await?;
                return Ok(result);
            }

            self.transition(generation, PipelineState::RetryPending)?;
            self.transition(generation, PipelineState::Transmitting)?;
            request = UploadRequest::fallback(
                session_id,
                reference.display_name.clone(),
                reference_bytes.clone(),
            );
        }
    }

    /// Abandon the session and return to `Idle`.
    ///
    /// The state change is immediate; responses still in flight are dropped
    /// when they arrive. Session files are purged afterwards.
    pub async fn reset(&self) -> Result<PurgeReport> {
        let from = {
            let mut inner = self.inner.lock();
            let generation = inner.generation + 1;
            let from = inner.state;
            *inner = CoordinatorInner {
                generation,
                ..CoordinatorInner::default()
            };
            from
        };

        if from != PipelineState::Idle {
            self.publish_state(from, PipelineState::Idle);
        }
        self.event_bus.publish(PipelineEvent::SessionReset);
        info!("Session reset (was {})", from);

        self.presenter.reset().await
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().state
    }

    pub fn has_active_session(&self) -> bool {
        self.inner.lock().session.is_some()
    }

    /// The open session, or the one that last finished
    pub fn session(&self) -> Option<UploadSession> {
        let inner = self.inner.lock();
        inner.session.clone().or_else(|| inner.closed.clone())
    }

    /// Attempt history of the open or last finished session
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.session()
            .map(|s| s.attempts.as_slice().to_vec())
            .unwrap_or_default()
    }

    pub fn staged(&self, kind: MediaKind) -> Option<MediaAsset> {
        let inner = self.inner.lock();
        match kind {
            MediaKind::Image => inner.reference.clone(),
            MediaKind::Video => inner.clip.clone(),
        }
    }

    pub fn last_result(&self) -> Option<ProcessedResult> {
        self.inner.lock().last_result.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Send one request and interpret the response.
    ///
    /// `Ok(None)` asks for the fallback transmission; only a retryable
    /// primary attempt produces it.
    async fn transmit(
        &self,
        generation: u64,
        request: UploadRequest,
    ) -> Result<Option<ProcessedResult>> {
        let kind = request.kind;
        info!("Sending {} upload", kind);
        let response = self.endpoint.submit(request).await;
        self.ensure_current(generation)?;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.record_attempt(
                    generation,
                    kind,
                    None,
                    Some(e.to_string()),
                    AttemptOutcome::Fatal,
                )?;
                return Err(self.fail(generation, e));
            }
        };

        if response.is_success() {
            return self
                .accept_payload(generation, kind, response.status, &response.body)
                .await
                .map(Some);
        }

        let body = String::from_utf8_lossy(&response.body).into_owned();
        let retryable = kind == RequestKind::Primary
            && self.config.fallback_enabled
            && self.classifier.classify(&body) == FailureClass::Retryable;

        if retryable {
            info!(
                "HTTP {} matched a transient processing failure; using fallback",
                response.status
            );
            self.record_attempt(
                generation,
                kind,
                Some(response.status),
                Some(body),
                AttemptOutcome::Retryable,
            )?;
            return Ok(None);
        }

        self.record_attempt(
            generation,
            kind,
            Some(response.status),
            Some(body.clone()),
            AttemptOutcome::Fatal,
        )?;
        Err(self.fail(
            generation,
            PipelineError::UploadFailed {
                status: Some(response.status),
                detail: body,
            },
        ))
    }

    /// Stage a 2xx payload and commit it only while the session is current.
    ///
    /// The commit happens under the session lock together with the attempt
    /// record, so a reset either precedes both or follows both.
    async fn accept_payload(
        &self,
        generation: u64,
        kind: RequestKind,
        status: u16,
        body: &Bytes,
    ) -> Result<ProcessedResult> {
        let result = match self.presenter.stage(body).await {
            Ok(result) => result,
            Err(e) => {
                self.record_attempt(
                    generation,
                    kind,
                    Some(status),
                    Some(e.to_string()),
                    AttemptOutcome::Fatal,
                )?;
                return Err(self.fail(generation, e));
            }
        };

        let committed = self.record_attempt_then(
            generation,
            kind,
            Some(status),
            None,
            AttemptOutcome::Success,
            || self.presenter.commit(&result),
        );

        if let Err(e) = committed {
            warn!("Discarding result for a session that was reset");
            if let Err(discard_error) = self.presenter.discard(&result).await {
                warn!("Failed to discard stale result: {}", discard_error);
            }
            return Err(e);
        }
        Ok(result)
    }

    async fn finish_success(
        &self,
        generation: u64,
        result: &ProcessedResult,
        reference: &MediaAsset,
        clip: &MediaAsset,
    ) -> Result<()> {
        let from = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(PipelineError::SessionReset);
            }
            let from = inner.state;
            inner.state = PipelineState::Success;
            inner.closed = inner.session.take();
            inner.last_result = Some(result.clone());
            from
        };
        self.publish_state(from, PipelineState::Success);

        if self.discard_inputs_on_success {
            let cache_dir = self.store.cache_path();
            for asset in [clip, reference] {
                if !asset.storage_uri.starts_with(&cache_dir) {
                    continue;
                }
                if let Err(e) = self.store.discard(&asset.storage_uri).await {
                    warn!("Failed to discard {}: {}", asset.storage_uri.display(), e);
                }
            }
        }
        Ok(())
    }

    async fn read_input(&self, generation: u64, asset: &MediaAsset) -> Result<Bytes> {
        let read = self.store.read(asset).await;
        self.ensure_current(generation)?;
        read.map_err(|e| self.fail(generation, e))
    }

    fn record_attempt(
        &self,
        generation: u64,
        request_kind: RequestKind,
        http_status: Option<u16>,
        error_body: Option<String>,
        outcome: AttemptOutcome,
    ) -> Result<()> {
        self.record_attempt_then(
            generation,
            request_kind,
            http_status,
            error_body,
            outcome,
            || {},
        )
    }

    /// Append an attempt record, running `apply` under the same lock
    fn record_attempt_then(
        &self,
        generation: u64,
        request_kind: RequestKind,
        http_status: Option<u16>,
        error_body: Option<String>,
        outcome: AttemptOutcome,
        apply: impl FnOnce(),
    ) -> Result<()> {
        let ordinal = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(PipelineError::SessionReset);
            }
            let session = inner
                .session
                .as_mut()
                .ok_or_else(|| PipelineError::missing_input("upload session"))?;
            let ordinal = session
                .attempts
                .push(request_kind, http_status, error_body, outcome)
                .ordinal;
            apply();
            ordinal
        };

        info!(
            "Attempt {} ({}) completed: {}",
            ordinal, request_kind, outcome
        );
        self.event_bus.publish(PipelineEvent::AttemptCompleted {
            ordinal,
            request_kind,
            http_status,
            outcome,
        });
        Ok(())
    }

    /// Move to `Failed` and close the session. Returns the error to surface,
    /// or `SessionReset` if the session is already gone.
    fn fail(&self, generation: u64, error: PipelineError) -> PipelineError {
        let detail = error.to_string();
        let from = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return PipelineError::SessionReset;
            }
            let from = inner.state;
            inner.state = PipelineState::Failed;
            inner.closed = inner.session.take();
            inner.last_error = Some(detail.clone());
            from
        };

        self.publish_state(from, PipelineState::Failed);
        self.event_bus
            .publish(PipelineEvent::UploadFailed { detail });
        error
    }

    fn transition(&self, generation: u64, to: PipelineState) -> Result<()> {
        let from = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(PipelineError::SessionReset);
            }
            std::mem::replace(&mut inner.state, to)
        };
        self.publish_state(from, to);
        Ok(())
    }

    fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.is_current(generation) {
            Ok(())
        } else {
            debug!("Session generation {} is stale", generation);
            Err(PipelineError::SessionReset)
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }

    fn publish_state(&self, from: PipelineState, to: PipelineState) {
        info!("Upload state {} -> {}", from, to);
        self.event_bus
            .publish(PipelineEvent::StateChanged { from, to });
    }

    fn missing_description(inner: &CoordinatorInner) -> String {
        match (&inner.reference, &inner.clip) {
            (None, None) => "reference image and video clip".to_string(),
            (None, Some(_)) => "reference image".to_string(),
            _ => "video clip".to_string(),
        }
    }
}

impl Clone for UploadCoordinator {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            discard_inputs_on_success: self.discard_inputs_on_success,
            classifier: self.classifier.clone(),
            store: Arc::clone(&self.store),
            endpoint: Arc::clone(&self.endpoint),
            presenter: Arc::clone(&self.presenter),
            event_bus: Arc::clone(&self.event_bus),
            inner: Arc::clone(&self.inner),
        }
    }
}
