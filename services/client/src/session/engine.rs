//! The session state machine.
//!
//! All session state is owned by one long-lived task; the [`SessionHandle`]
//! sends it commands over a channel and reads queries from a shared view
//! snapshot the task alone writes. The select loop multiplexes UI commands,
//! inbound frames from the transport reader, and encoded microphone chunks
//! from the capture pipeline, so speech in either direction never blocks
//! control-frame handling or the UI.

use crate::audio::{CapturePipeline, PlaybackPipeline};
use crate::auth::TokenProvider;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics::{MetricsAggregator, SessionMetrics};
use crate::session::connection::{Connection, Inbound};
use crate::session::protocol::ClientMessage;
use crate::session::router::{self, Dispatch};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tutor_core::activity::{ActivityContext, LessonContext, LessonSeed};
use tutor_core::context::ContextBuilder;
use tutor_core::conversation::{ConversationTurn, Role};
use tutor_core::curriculum::CurriculumService;
use tutor_core::evaluation::EvaluationService;
use uuid::Uuid;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Open,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
        };
        write!(f, "{label}")
    }
}

/// What kind of session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Idle,
    Standalone,
    Lesson,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionMode::Idle => "idle",
            SessionMode::Standalone => "standalone",
            SessionMode::Lesson => "lesson",
        };
        write!(f, "{label}")
    }
}

/// Hint escalation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintLevel {
    Gentle,
    Guiding,
    Direct,
}

impl HintLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            HintLevel::Gentle => 1,
            HintLevel::Guiding => 2,
            HintLevel::Direct => 3,
        }
    }

    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            1 => Some(HintLevel::Gentle),
            2 => Some(HintLevel::Guiding),
            3 => Some(HintLevel::Direct),
            _ => None,
        }
    }
}

/// Notifications pushed to the UI layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    /// A turn was appended to the conversation log.
    Turn(ConversationTurn),
    /// The active activity changed (optimistically or by server correction).
    ActivityChanged { instance_id: String },
    /// The connection was recovered and the context replayed.
    Reconnected,
    /// The session ended deliberately or by a clean server close.
    Disconnected,
    /// Recovery was exhausted; the session is back to idle.
    FatalError { message: String },
    /// The service reported a non-fatal error.
    ServiceError { message: String },
    /// An audio device failed; the session continues text-only.
    VoiceDisabled { reason: String },
}

/// External collaborators the engine queries but never owns.
#[derive(Clone)]
pub struct SessionDeps {
    pub tokens: Arc<dyn TokenProvider>,
    pub curriculum: Arc<dyn CurriculumService>,
    pub evaluation: Arc<dyn EvaluationService>,
}

type Reply = oneshot::Sender<Result<(), EngineError>>;

enum Command {
    Connect {
        activity: ActivityContext,
        reply: Reply,
    },
    ConnectLesson {
        seed: LessonSeed,
        reply: Reply,
    },
    SwitchActivity {
        activity: ActivityContext,
        reply: Reply,
    },
    SendText {
        text: String,
        reply: Reply,
    },
    RequestHint {
        level: HintLevel,
        reply: Reply,
    },
    SetVoice {
        enabled: bool,
        reply: Reply,
    },
    Disconnect {
        reply: Reply,
    },
}

/// Query snapshot shared between the engine task (sole writer) and handles.
#[derive(Default)]
struct ViewState {
    connection: ConnectionState,
    mode: SessionMode,
    active_activity_id: Option<String>,
    conversation: Vec<ConversationTurn>,
    metrics: MetricsAggregator,
}

/// Commands and queries against a running session engine.
///
/// Clones share the same engine task; the task tears everything down when
/// the last handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    view: Arc<Mutex<ViewState>>,
}

impl SessionHandle {
    /// Spawns a session engine on the current tokio runtime. The returned
    /// receiver yields [`SessionEvent`]s for the UI layer.
    pub fn spawn(
        config: EngineConfig,
        deps: SessionDeps,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let view = Arc::new(Mutex::new(ViewState::default()));

        let engine = SessionEngine {
            config,
            deps,
            cmd_rx,
            inbound_tx,
            inbound_rx,
            chunk_tx,
            chunk_rx,
            event_tx,
            view: view.clone(),
            state: ConnectionState::Disconnected,
            mode: SessionMode::Idle,
            active_activity_id: None,
            lesson: None,
            last_context: None,
            last_context_activity: None,
            generation: 0,
            conn: None,
            reconnect_timer: None,
            capture: CapturePipeline::new(),
            playback: PlaybackPipeline::new(),
            voice_enabled: false,
            client_session_id: Uuid::new_v4(),
        };
        tokio::spawn(engine.run());

        (SessionHandle { cmd_tx, view }, event_rx)
    }

    async fn command(&self, build: impl FnOnce(Reply) -> Command) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::Terminated)?;
        reply_rx.await.map_err(|_| EngineError::Terminated)?
    }

    /// Opens a standalone session scoped to one activity.
    pub async fn connect(&self, activity: ActivityContext) -> Result<(), EngineError> {
        self.command(|reply| Command::Connect { activity, reply })
            .await
    }

    /// Opens a lesson session spanning an ordered activity sequence.
    pub async fn connect_lesson(&self, seed: LessonSeed) -> Result<(), EngineError> {
        self.command(|reply| Command::ConnectLesson { seed, reply })
            .await
    }

    /// Moves the tutor's attention to another activity of the lesson over
    /// the existing connection. Idempotent for the already-active target.
    pub async fn switch_activity(&self, activity: ActivityContext) -> Result<(), EngineError> {
        self.command(|reply| Command::SwitchActivity { activity, reply })
            .await
    }

    /// Sends a typed learner message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), EngineError> {
        let text = text.into();
        self.command(|reply| Command::SendText { text, reply }).await
    }

    /// Asks the tutor for a hint.
    pub async fn request_hint(&self, level: HintLevel) -> Result<(), EngineError> {
        self.command(|reply| Command::RequestHint { level, reply })
            .await
    }

    /// Enables or disables the voice pipelines.
    pub async fn set_voice(&self, enabled: bool) -> Result<(), EngineError> {
        self.command(|reply| Command::SetVoice { enabled, reply })
            .await
    }

    /// Ends the session deliberately and returns the engine to idle.
    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.command(|reply| Command::Disconnect { reply }).await
    }

    fn read_view<R>(&self, read: impl FnOnce(&ViewState) -> R) -> R {
        let guard = self.view.lock().unwrap_or_else(|poison| poison.into_inner());
        read(&guard)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.read_view(|v| v.connection)
    }

    pub fn mode(&self) -> SessionMode {
        self.read_view(|v| v.mode)
    }

    pub fn active_activity_id(&self) -> Option<String> {
        self.read_view(|v| v.active_activity_id.clone())
    }

    pub fn conversation(&self) -> Vec<ConversationTurn> {
        self.read_view(|v| v.conversation.clone())
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.read_view(|v| v.metrics.snapshot())
    }
}

struct SessionEngine {
    config: EngineConfig,
    deps: SessionDeps,
    cmd_rx: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    chunk_tx: mpsc::Sender<String>,
    chunk_rx: mpsc::Receiver<String>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    view: Arc<Mutex<ViewState>>,
    state: ConnectionState,
    mode: SessionMode,
    active_activity_id: Option<String>,
    lesson: Option<LessonContext>,
    /// Serialized context frame, replayed byte-for-byte after reconnection.
    last_context: Option<String>,
    /// Which activity that frame names, to detect drift after replay.
    last_context_activity: Option<String>,
    generation: u64,
    conn: Option<Connection>,
    reconnect_timer: Option<JoinHandle<()>>,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    voice_enabled: bool,
    client_session_id: Uuid,
}

impl SessionEngine {
    async fn run(mut self) {
        info!(session = %self.client_session_id, "session engine started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    // Last handle dropped: tear everything down.
                    None => break,
                },
                Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound).await,
                Some(chunk) = self.chunk_rx.recv() => self.forward_audio(chunk).await,
            }
        }
        self.shutdown().await;
        info!("session engine stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { activity, reply } => {
                let _ = reply.send(self.do_connect(activity).await);
            }
            Command::ConnectLesson { seed, reply } => {
                let _ = reply.send(self.do_connect_lesson(seed).await);
            }
            Command::SwitchActivity { activity, reply } => {
                let _ = reply.send(self.do_switch(activity).await);
            }
            Command::SendText { text, reply } => {
                let _ = reply.send(self.do_send_text(text).await);
            }
            Command::RequestHint { level, reply } => {
                let _ = reply.send(self.do_request_hint(level).await);
            }
            Command::SetVoice { enabled, reply } => {
                let _ = reply.send(self.do_set_voice(enabled));
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.do_disconnect().await);
            }
        }
    }

    // --- Connect ---

    async fn do_connect(&mut self, activity: ActivityContext) -> Result<(), EngineError> {
        self.ensure_idle("connect")?;
        let active_id = activity.instance_id.clone();
        let frame = router::encode(&ClientMessage::Context {
            activity,
            lesson: None,
        })?;
        match self.establish_session(&frame).await {
            Ok(()) => {
                self.finish_connect(SessionMode::Standalone, frame, active_id, None);
                Ok(())
            }
            Err(e) => {
                self.set_connection_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn do_connect_lesson(&mut self, seed: LessonSeed) -> Result<(), EngineError> {
        self.ensure_idle("connect_lesson")?;
        let lesson =
            ContextBuilder::lesson(&*self.deps.curriculum, &*self.deps.evaluation, &seed)
                .await
                .map_err(|e| EngineError::Context(e.to_string()))?;
        let activity = ContextBuilder::current_activity(&lesson)
            .map_err(|e| EngineError::Context(e.to_string()))?;
        let active_id = activity.instance_id.clone();
        let frame = router::encode(&ClientMessage::Context {
            activity,
            lesson: Some(lesson.clone()),
        })?;
        match self.establish_session(&frame).await {
            Ok(()) => {
                self.finish_connect(SessionMode::Lesson, frame, active_id, Some(lesson));
                Ok(())
            }
            Err(e) => {
                self.set_connection_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Opens the transport, authenticates, and sends the context frame.
    /// On success `self.conn` holds the established connection.
    async fn establish_session(&mut self, context_frame: &str) -> Result<(), EngineError> {
        let reconnecting = self.state == ConnectionState::Reconnecting;
        if !reconnecting {
            self.set_connection_state(ConnectionState::Connecting);
        }
        let token = self
            .deps
            .tokens
            .fresh_token()
            .await
            .map_err(|e| EngineError::Token(e.to_string()))?;
        let auth_frame = router::encode(&ClientMessage::Authenticate {
            token,
            client_session_id: self.client_session_id,
        })?;

        let ws = Connection::open(&self.config.service_url, self.config.connect_timeout).await?;
        if !reconnecting {
            self.set_connection_state(ConnectionState::Authenticating);
        }
        let ws = Connection::authenticate(ws, auth_frame, self.config.auth_timeout).await?;

        self.generation += 1;
        let mut conn = Connection::establish(ws, self.generation, self.inbound_tx.clone());
        conn.send_frame(context_frame.to_string()).await?;
        self.conn = Some(conn);
        Ok(())
    }

    fn finish_connect(
        &mut self,
        mode: SessionMode,
        context_frame: String,
        active_id: String,
        lesson: Option<LessonContext>,
    ) {
        self.lesson = lesson;
        self.last_context = Some(context_frame);
        self.last_context_activity = Some(active_id.clone());
        self.set_mode(mode);
        self.set_active(Some(active_id));
        self.set_connection_state(ConnectionState::Open);
        self.with_view(|v| v.metrics.mark_connected());
    }

    // --- Commands while open ---

    async fn do_switch(&mut self, activity: ActivityContext) -> Result<(), EngineError> {
        if self.state != ConnectionState::Open || self.mode != SessionMode::Lesson {
            return Err(self.invalid_state("switch_activity"));
        }
        let instance_id = activity.instance_id.clone();
        if self.active_activity_id.as_deref() == Some(instance_id.as_str()) {
            debug!(%instance_id, "switch target is already active");
            return Ok(());
        }
        let Some(index) = self
            .lesson
            .as_ref()
            .and_then(|lesson| lesson.position(&instance_id))
        else {
            return Err(EngineError::UnknownActivity(instance_id));
        };

        let frame = router::encode(&ClientMessage::SwitchPrimitive { activity })?;
        self.open_conn("switch_activity")?.send_frame(frame).await?;

        if let Some(lesson) = self.lesson.as_mut() {
            lesson.current_index = index;
        }
        // Optimistic: reconciled against the acknowledgement frame.
        self.set_active(Some(instance_id.clone()));
        self.emit(SessionEvent::ActivityChanged { instance_id });
        Ok(())
    }

    async fn do_send_text(&mut self, text: String) -> Result<(), EngineError> {
        let frame = router::encode(&ClientMessage::Text { text: text.clone() })?;
        self.open_conn("send_text")?.send_frame(frame).await?;
        self.push_turn(ConversationTurn::learner(text, false));
        self.with_view(|v| v.metrics.record_text());
        Ok(())
    }

    async fn do_request_hint(&mut self, level: HintLevel) -> Result<(), EngineError> {
        let frame = router::encode(&ClientMessage::RequestHint {
            level: level.as_u8(),
        })?;
        self.open_conn("request_hint")?.send_frame(frame).await?;
        self.with_view(|v| v.metrics.record_hint(level));
        Ok(())
    }

    fn do_set_voice(&mut self, enabled: bool) -> Result<(), EngineError> {
        if !enabled {
            self.voice_enabled = false;
            self.capture.stop();
            self.playback.stop();
            return Ok(());
        }
        if self.state != ConnectionState::Open {
            return Err(self.invalid_state("set_voice"));
        }
        self.playback.start(self.config.playback_sample_rate)?;
        if let Err(e) = self
            .capture
            .start(self.chunk_tx.clone(), self.config.capture_sample_rate)
        {
            self.playback.stop();
            return Err(e);
        }
        self.voice_enabled = true;
        Ok(())
    }

    async fn do_disconnect(&mut self) -> Result<(), EngineError> {
        if self.mode == SessionMode::Idle && self.state == ConnectionState::Disconnected {
            return Err(self.invalid_state("disconnect"));
        }
        // Order matters: timer, pipelines, then transport, so nothing can
        // write into a socket that is already gone.
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.voice_enabled = false;
        self.capture.stop();
        self.playback.stop();
        if let Some(conn) = self.conn.take() {
            conn.close_gracefully().await;
        }
        self.with_view(|v| v.metrics.mark_disconnected());
        self.reset_to_idle();
        self.emit(SessionEvent::Disconnected);
        Ok(())
    }

    // --- Inbound ---

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Frame { generation, raw } => {
                if generation != self.generation || self.conn.is_none() {
                    debug!(generation, "ignoring frame from superseded connection");
                    return;
                }
                if let Some(msg) = router::parse(&raw) {
                    self.apply(router::dispatch(msg));
                }
            }
            Inbound::Closed { generation, clean } => {
                if generation != self.generation || self.conn.is_none() {
                    debug!(generation, "ignoring closure of superseded connection");
                    return;
                }
                self.on_transport_closed(clean);
            }
            Inbound::ReconnectDue { generation } => self.on_reconnect_due(generation).await,
        }
    }

    fn apply(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Ready => debug!("ignoring duplicate readiness frame"),
            Dispatch::Turn(turn) => {
                if turn.role == Role::Learner && turn.is_audio_origin {
                    self.with_view(|v| v.metrics.record_voice_interaction());
                }
                self.push_turn(turn);
            }
            Dispatch::Audio { seq, data } => {
                if self.voice_enabled {
                    self.playback.push(seq, &data);
                } else {
                    debug!(seq, "dropping audio frame; voice is disabled");
                }
            }
            Dispatch::SwitchAck { instance_id } => self.on_switch_ack(instance_id),
            Dispatch::Metrics {
                interactions,
                turns,
                voice_interactions,
            } => {
                self.with_view(|v| v.metrics.apply_update(interactions, turns, voice_interactions));
            }
            Dispatch::ServiceError { message } => {
                warn!(%message, "service reported an error");
                self.emit(SessionEvent::ServiceError { message });
            }
        }
    }

    fn on_switch_ack(&mut self, instance_id: String) {
        if self.active_activity_id.as_deref() == Some(instance_id.as_str()) {
            debug!(%instance_id, "switch acknowledged");
            return;
        }
        // The optimistic update disagrees with the service; the service's
        // view wins, provided it names an activity the lesson contains.
        warn!(
            %instance_id,
            active = ?self.active_activity_id,
            "switch acknowledgement mismatch; adopting server value"
        );
        match self
            .lesson
            .as_ref()
            .and_then(|lesson| lesson.position(&instance_id))
        {
            Some(index) => {
                if let Some(lesson) = self.lesson.as_mut() {
                    lesson.current_index = index;
                }
                self.set_active(Some(instance_id.clone()));
                self.emit(SessionEvent::ActivityChanged { instance_id });
            }
            None => {
                warn!(%instance_id, "acknowledged activity is not in the lesson; keeping local value");
            }
        }
    }

    // --- Closure and recovery ---

    fn on_transport_closed(&mut self, clean: bool) {
        if let Some(conn) = self.conn.take() {
            conn.abandon();
        }
        self.with_view(|v| v.metrics.mark_disconnected());

        if clean {
            info!("service closed the session; returning to idle");
            self.voice_enabled = false;
            self.capture.stop();
            self.playback.stop();
            self.reset_to_idle();
            self.emit(SessionEvent::Disconnected);
            return;
        }

        warn!("transport closed abnormally; scheduling one reconnection attempt");
        // The microphone must not keep producing frames against a dead
        // socket; playback may drain what it already has.
        self.capture.stop();
        self.set_connection_state(ConnectionState::Reconnecting);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() {
            warn!("reconnection already scheduled; ignoring");
            return;
        }
        let tx = self.inbound_tx.clone();
        let generation = self.generation;
        let delay = self.config.reconnect_delay;
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Inbound::ReconnectDue { generation }).await;
        }));
    }

    async fn on_reconnect_due(&mut self, generation: u64) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if self.state != ConnectionState::Reconnecting || generation != self.generation {
            debug!("stale reconnection timer; ignoring");
            return;
        }
        match self.try_reconnect().await {
            Ok(()) => {
                self.set_connection_state(ConnectionState::Open);
                self.with_view(|v| v.metrics.mark_connected());
                self.emit(SessionEvent::Reconnected);
                if self.voice_enabled {
                    if let Err(e) = self
                        .capture
                        .start(self.chunk_tx.clone(), self.config.capture_sample_rate)
                    {
                        warn!(error = %e, "could not re-acquire microphone after reconnect");
                        self.voice_enabled = false;
                        self.playback.stop();
                        self.emit(SessionEvent::VoiceDisabled {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "reconnection failed; giving up");
                self.fatal_teardown(format!("reconnection failed: {e}"));
            }
        }
    }

    /// The single reconnection attempt: re-authenticate, replay the
    /// recorded context verbatim, then restore the active activity if the
    /// learner moved since the context was recorded.
    async fn try_reconnect(&mut self) -> Result<(), EngineError> {
        let context_frame = self
            .last_context
            .clone()
            .ok_or_else(|| EngineError::Context("no recorded context to replay".to_string()))?;
        self.establish_session(&context_frame).await?;

        if self.active_activity_id != self.last_context_activity {
            if let Some(lesson) = &self.lesson {
                let activity = ContextBuilder::current_activity(lesson)
                    .map_err(|e| EngineError::Context(e.to_string()))?;
                let frame = router::encode(&ClientMessage::SwitchPrimitive { activity })?;
                if let Some(conn) = self.conn.as_mut() {
                    conn.send_frame(frame).await?;
                }
            }
        }
        Ok(())
    }

    fn fatal_teardown(&mut self, message: String) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.voice_enabled = false;
        self.capture.stop();
        self.playback.stop();
        if let Some(conn) = self.conn.take() {
            conn.abandon();
        }
        self.with_view(|v| v.metrics.mark_disconnected());
        self.reset_to_idle();
        self.emit(SessionEvent::FatalError { message });
    }

    // --- Outbound audio ---

    async fn forward_audio(&mut self, data: String) {
        if self.state != ConnectionState::Open {
            warn!("dropping captured audio; connection is not open");
            return;
        }
        let frame = match router::encode(&ClientMessage::Audio { data }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "could not encode audio frame");
                return;
            }
        };
        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = conn.send_frame(frame).await {
                warn!(error = %e, "failed to send audio frame");
            }
        }
    }

    // --- Teardown ---

    async fn shutdown(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        self.capture.stop();
        self.playback.stop();
        if let Some(conn) = self.conn.take() {
            conn.close_gracefully().await;
        }
        self.with_view(|v| v.metrics.mark_disconnected());
    }

    // --- State bookkeeping ---

    fn ensure_idle(&self, command: &'static str) -> Result<(), EngineError> {
        if self.mode != SessionMode::Idle || self.state != ConnectionState::Disconnected {
            return Err(self.invalid_state(command));
        }
        Ok(())
    }

    fn invalid_state(&self, command: &'static str) -> EngineError {
        EngineError::InvalidState {
            command,
            state: format!("{}/{}", self.mode, self.state),
        }
    }

    fn open_conn(&mut self, command: &'static str) -> Result<&mut Connection, EngineError> {
        let state = format!("{}/{}", self.mode, self.state);
        if self.state != ConnectionState::Open {
            return Err(EngineError::InvalidState { command, state });
        }
        match self.conn.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(EngineError::InvalidState { command, state }),
        }
    }

    fn reset_to_idle(&mut self) {
        self.lesson = None;
        self.last_context = None;
        self.last_context_activity = None;
        self.set_mode(SessionMode::Idle);
        self.set_active(None);
        self.with_view(|v| {
            v.conversation.clear();
            v.metrics.reset();
        });
        self.set_connection_state(ConnectionState::Disconnected);
    }

    fn push_turn(&mut self, turn: ConversationTurn) {
        self.with_view(|v| {
            v.conversation.push(turn.clone());
            v.metrics.record_turn();
        });
        self.emit(SessionEvent::Turn(turn));
    }

    fn set_connection_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.with_view(|v| v.connection = state);
        self.emit(SessionEvent::ConnectionStateChanged(state));
    }

    fn set_mode(&mut self, mode: SessionMode) {
        self.mode = mode;
        self.with_view(|v| v.mode = mode);
    }

    fn set_active(&mut self, instance_id: Option<String>) {
        self.active_activity_id = instance_id.clone();
        self.with_view(|v| v.active_activity_id = instance_id);
    }

    fn with_view<R>(&self, write: impl FnOnce(&mut ViewState) -> R) -> R {
        let mut guard = self.view.lock().unwrap_or_else(|poison| poison.into_inner());
        write(&mut guard)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}
