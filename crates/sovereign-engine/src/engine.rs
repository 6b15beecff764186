use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use sovereign_capture::{CaptureService, RoomCapture, TokioShell};
use sovereign_core::config::SovereignConfig;
use sovereign_core::gateway::ChatGateway;
use sovereign_core::types::{Metadata, Tier};
use sovereign_core::Result;
use sovereign_discord::{InboundChat, InboundReaction, SovereignHost};
use sovereign_drafts::{compose_tweet, DraftBrain, DraftOrigin, DraftQueue, LocalDrafter, TweetPublisher};
use sovereign_grid::{
    render_board, DriftDetector, GridEventLog, GridEventType, PressureGrid, CELLS,
};
use sovereign_journal::TaskJournal;
use sovereign_poller::OutputPoller;
use sovereign_registry::{CrossChannelRouter, RoomRegistry};
use sovereign_steering::{SovereigntySource, SteeringLoop};
use sovereign_transparency::TransparencyReporter;

use crate::executor::TaskExecutor;
use sovereign_authority::HandleAuthority;

/// The assembled coordination core. One instance per process.
pub struct Engine {
    config: SovereignConfig,
    gateway: Arc<dyn ChatGateway>,
    journal: Arc<TaskJournal>,
    registry: Arc<RoomRegistry>,
    router: Arc<CrossChannelRouter>,
    authority: Arc<HandleAuthority>,
    steering: Arc<SteeringLoop>,
    grid: Arc<PressureGrid>,
    drafts: Arc<DraftQueue>,
    transparency: Arc<TransparencyReporter>,
    publisher: Option<Arc<dyn TweetPublisher>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    /// Build the engine with production collaborators: a tokio shell behind
    /// the capture service and the local LLM drafter.
    pub async fn launch(
        config: SovereignConfig,
        gateway: Arc<dyn ChatGateway>,
        sovereignty: Option<Arc<dyn SovereigntySource>>,
        publisher: Option<Arc<dyn TweetPublisher>>,
    ) -> Result<Arc<Self>> {
        let shell = Arc::new(TokioShell::new(config.poller.capture_timeout_ms));
        let arbiter = Arc::new(sovereign_clipboard::global().clone());
        let capture: Arc<dyn RoomCapture> =
            Arc::new(CaptureService::new(&config.rooms, shell, arbiter));
        let brain: Arc<dyn DraftBrain> = Arc::new(LocalDrafter::new(config.drafts.clone()));
        Self::assemble(config, gateway, capture, brain, sovereignty, publisher).await
    }

    /// Assemble the engine from explicit collaborators. Spawns every
    /// background loop.
    pub async fn assemble(
        config: SovereignConfig,
        gateway: Arc<dyn ChatGateway>,
        capture: Arc<dyn RoomCapture>,
        brain: Arc<dyn DraftBrain>,
        sovereignty: Option<Arc<dyn SovereigntySource>>,
        publisher: Option<Arc<dyn TweetPublisher>>,
    ) -> Result<Arc<Self>> {
        let journal = Arc::new(TaskJournal::open(&config.data_dir)?);

        let room_names: Vec<String> = config.rooms.iter().map(|r| r.name.clone()).collect();
        let registry = Arc::new(
            RoomRegistry::init(
                gateway.as_ref(),
                &config.discord.guild_id,
                &config.discord.category,
                &room_names,
                &config.data_dir,
            )
            .await?,
        );

        let authority = Arc::new(HandleAuthority::new(
            config.handles.clone(),
            SovereignConfig::admin_external_ids(),
        ));

        let grid_log = Arc::new(GridEventLog::open(&config.data_dir)?);
        let grid = Arc::new(PressureGrid::new(Arc::clone(&grid_log)));
        grid.update();

        let drafts = Arc::new(DraftQueue::new(
            config.drafts.clone(),
            brain,
            Arc::clone(&gateway),
            registry.x_posts_channel().map(str::to_string),
        ));

        let transparency = TransparencyReporter::new(
            config.transparency.clone(),
            Arc::clone(&gateway),
            registry.trust_debt_channel().map(str::to_string),
        );
        transparency.start();

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&journal),
            Arc::clone(&capture),
            Arc::clone(&registry),
            Arc::clone(&gateway),
        ));
        let steering = SteeringLoop::new(
            config.steering.clone(),
            Arc::clone(&gateway),
            executor,
            sovereignty,
        );

        let router = CrossChannelRouter::new(Arc::clone(&registry), Arc::clone(&gateway));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Completed tasks feed the pressure grid.
        let hook_log = Arc::clone(&grid_log);
        let hook_grid = Arc::clone(&grid);
        let poller = Arc::new(
            OutputPoller::new(
                Arc::clone(&journal),
                Arc::clone(&capture),
                Arc::clone(&registry),
                Arc::clone(&gateway),
                config.poller.clone(),
            )
            .with_completion_hook(Arc::new(move |task| {
                let cell = CELLS.iter().find(|c| c.room == task.room);
                if let Some(cell) = cell {
                    hook_log.emit_for_cell(
                        GridEventType::CellActivate,
                        cell.id,
                        Some(task.id.clone()),
                        None,
                        Metadata::new(),
                    );
                    hook_grid.update();
                }
            })),
        );
        tokio::spawn(Arc::clone(&poller).run(shutdown_rx.clone()));

        let detector = Arc::new(DriftDetector::new(
            config.drift.clone(),
            Arc::new(TokioShell::new(config.poller.capture_timeout_ms)),
        ));
        tokio::spawn(detector.run(
            Arc::clone(&gateway),
            registry.tesseract_channel().map(str::to_string),
            shutdown_rx,
        ));

        info!(rooms = config.rooms.len(), "sovereign engine assembled");
        Ok(Arc::new(Self {
            config,
            gateway,
            journal,
            registry,
            router,
            authority,
            steering,
            grid,
            drafts,
            transparency,
            publisher,
            shutdown_tx,
        }))
    }

    /// Stop every background loop and cancel all pending predictions.
    pub fn shutdown(&self) {
        info!("sovereign engine shutting down");
        let _ = self.shutdown_tx.send(true);
        self.transparency.stop();
        self.steering.abort_all();
    }

    pub fn config(&self) -> &SovereignConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<CrossChannelRouter> {
        &self.router
    }

    pub fn journal(&self) -> &Arc<TaskJournal> {
        &self.journal
    }

    pub fn steering(&self) -> &Arc<SteeringLoop> {
        &self.steering
    }

    /// Redirect a room's pending prediction from a voice memo transcript.
    pub async fn redirect_from_voice(&self, room: &str, prompt: &str) -> bool {
        self.steering.redirect(room, prompt, "voice-memo").await.is_some()
    }

    /// Redirect a room's pending prediction by operator fiat.
    pub async fn admin_override(&self, room: &str, prompt: &str) -> bool {
        self.steering
            .redirect(room, prompt, "admin-override")
            .await
            .is_some()
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    async fn handle_chat(&self, msg: InboundChat) {
        if self.registry.is_x_posts_channel(&msg.channel_id) {
            self.handle_x_posts_message(&msg).await;
            return;
        }
        if self.registry.is_ops_board_channel(&msg.channel_id) {
            self.handle_ops_message(&msg).await;
            return;
        }
        let Some(room) = self.registry.room_for_channel(&msg.channel_id) else {
            return;
        };
        let room = room.to_string();
        self.handle_room_message(&room, msg).await;
    }

    async fn handle_room_message(&self, room: &str, msg: InboundChat) {
        let tier = self
            .authority
            .resolve_tier(&msg.author_username, room, Some(&msg.author_id));

        if let Some(command) = msg.content.strip_prefix('!') {
            self.handle_command(room, command.trim(), tier, &msg).await;
            return;
        }

        // A plain message while the room is gated is a text redirect; general
        // authors cannot steer someone else's countdown.
        if self.steering.has_pending_prediction(room) && tier != Tier::General {
            self.steering.redirect(room, &msg.content, "text").await;
            return;
        }

        let categories = aligned_categories(room);
        self.steering
            .handle_message(
                tier,
                room,
                &msg.channel_id,
                &msg.content,
                &msg.author_username,
                categories,
            )
            .await;
    }

    async fn handle_command(&self, room: &str, command: &str, tier: Tier, msg: &InboundChat) {
        let (verb, rest) = match command.split_once(char::is_whitespace) {
            Some((v, r)) => (v, r.trim()),
            None => (command, ""),
        };

        match verb {
            "kill" => {
                if tier != Tier::Admin {
                    self.deny(&msg.author_username, room, "kill requires admin").await;
                    return;
                }
                let killed = self.journal.kill_room(room);
                let text = if killed {
                    format!("🛑 Killed the running task in {room}")
                } else {
                    format!("Nothing is running in {room}")
                };
                let _ = self.gateway.send_to_channel(&msg.channel_id, &text).await;
            }
            "abort-all" => {
                if tier != Tier::Admin {
                    self.deny(&msg.author_username, room, "abort-all requires admin").await;
                    return;
                }
                let count = self.steering.abort_all();
                let _ = self
                    .gateway
                    .send_to_channel(&msg.channel_id, &format!("🛑 Aborted {count} pending prediction(s)"))
                    .await;
            }
            "redirect" => {
                if tier == Tier::General {
                    self.deny(&msg.author_username, room, "redirect requires a handle").await;
                    return;
                }
                if self.steering.redirect(room, rest, "text").await.is_none() {
                    let _ = self
                        .gateway
                        .send_to_channel(&msg.channel_id, &format!("No pending prediction in {room}"))
                        .await;
                }
            }
            "board" => {
                self.post_board(&msg.channel_id).await;
            }
            "recent" => {
                let lines: Vec<String> = self
                    .journal
                    .recent(5)
                    .into_iter()
                    .map(|t| format!("{} {} [{}] {}", t.status.emoji(), t.id, t.room, t.prompt))
                    .collect();
                let text = if lines.is_empty() {
                    "No tasks yet".to_string()
                } else {
                    lines.join("\n")
                };
                let _ = self.gateway.send_to_channel(&msg.channel_id, &text).await;
            }
            "context" => {
                let context = self.registry.get_room_context(room);
                let text = if context.is_empty() {
                    format!("No context recorded for {room}")
                } else {
                    format!("```\n{context}\n```")
                };
                let _ = self.gateway.send_to_channel(&msg.channel_id, &text).await;
            }
            "clear-context" => {
                if tier != Tier::Admin {
                    self.deny(&msg.author_username, room, "clear-context requires admin").await;
                    return;
                }
                self.registry.clear_room_context(room);
                let _ = self
                    .gateway
                    .send_to_channel(&msg.channel_id, &format!("Context cleared for {room}"))
                    .await;
            }
            other => {
                warn!(command = other, room, "unknown command ignored");
            }
        }
    }

    async fn handle_x_posts_message(&self, msg: &InboundChat) {
        // Replies to a staged draft carry rewrite feedback.
        if let Some(ref_id) = &msg.referenced_message_id {
            if self.drafts.find_draft_by_message_id(ref_id).is_some() {
                self.drafts.rewrite_with_feedback(ref_id, &msg.content).await;
                return;
            }
        }

        if !self
            .authority
            .is_authorized_by_either(&msg.author_username, Some(&msg.author_id))
        {
            self.deny(&msg.author_username, "x-posts", "drafting requires a handle")
                .await;
            return;
        }
        self.drafts
            .create_draft(&msg.content, DraftOrigin::Command)
            .await;
    }

    async fn handle_ops_message(&self, msg: &InboundChat) {
        let text = msg.content.trim_start_matches('!');
        if text.eq_ignore_ascii_case("board") || text.eq_ignore_ascii_case("status") {
            self.post_board(&msg.channel_id).await;
        }
    }

    async fn post_board(&self, channel_id: &str) {
        self.grid.update();
        let board = render_board(&self.grid.pressures());
        let hot = self.grid.hot_cells(0.7);
        let recommendation = self.grid.route_to_room(&hot);
        let text = format!(
            "```\n{board}```\nHot: [{}]\n{}",
            hot.join(", "),
            recommendation.explanation
        );
        let _ = self.gateway.send_to_channel(channel_id, &text).await;
    }

    async fn handle_reaction_event(&self, reaction: InboundReaction) {
        let is_admin_reactor = reaction.is_admin_role
            || self.authority.can_execute_in_room(
                &reaction.reactor_username,
                "", // any-room admin: the all-rooms scope covers this
                Some(&reaction.reactor_id),
            );

        // Draft approval path.
        if let Some(draft) = self.drafts.find_draft_by_message_id(&reaction.message_id) {
            if !is_admin_reactor {
                self.deny(&reaction.reactor_username, "x-posts", "draft approval requires admin")
                    .await;
                return;
            }
            match reaction.emoji.as_str() {
                "👍" => {
                    if self.drafts.mark_posted(&reaction.message_id).is_none() {
                        return;
                    }
                    let tweet = compose_tweet(&draft);
                    let published = match &self.publisher {
                        Some(publisher) => publisher.publish(&tweet).await,
                        None => {
                            warn!("no publisher bound; tweet not sent externally");
                            false
                        }
                    };
                    let note = if published {
                        format!("📬 Draft {} published at {}", draft.id, Utc::now().to_rfc3339())
                    } else {
                        format!("📪 Draft {} approved (external publish unavailable)", draft.id)
                    };
                    let _ = self
                        .gateway
                        .edit_message(&reaction.channel_id, &reaction.message_id, &note)
                        .await;
                }
                "🗑" | "🗑️" => {
                    self.drafts.remove_draft(&reaction.message_id);
                    let _ = self
                        .gateway
                        .edit_message(
                            &reaction.channel_id,
                            &reaction.message_id,
                            &format!("🗑 Draft {} discarded", draft.id),
                        )
                        .await;
                }
                _ => {}
            }
            return;
        }

        // Suggestion blessing path.
        if matches!(reaction.emoji.as_str(), "👍" | "✅") && is_admin_reactor {
            self.steering
                .admin_bless(&reaction.message_id, &reaction.reactor_username)
                .await;
        }
    }

    async fn deny(&self, author: &str, room: &str, reason: &str) {
        info!(author, room, reason, "request denied");
        self.transparency.record_denial(author, room, reason).await;
    }
}

#[async_trait]
impl SovereignHost for Engine {
    async fn on_chat_message(&self, message: InboundChat) {
        self.handle_chat(message).await;
    }

    async fn on_reaction(&self, reaction: InboundReaction) {
        self.handle_reaction_event(reaction).await;
    }
}

/// Aligned categories shown on a prediction: the labels of the grid cells
/// bound to the room.
fn aligned_categories(room: &str) -> Vec<String> {
    CELLS
        .iter()
        .filter(|c| c.room == room)
        .map(|c| c.label.to_string())
        .collect()
}
