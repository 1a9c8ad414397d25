use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sigrelay_core::{
    chat::{ChatDefaults, ChatStore},
    config::Config,
    domain::{BotInstance, ChatId, ChatRef},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
        types::IncomingMessage,
    },
    model::Dispatcher,
    relay::{ChatRelay, Outcome, RelaySettings},
    Result,
};

use crate::{
    events::{self, BotIdentity, InboundEvent},
    lookup_uuid, receiver, SignalMessenger,
};

const FRAME_BUFFER: usize = 256;

/// Anything that can process one inbound message for a chat.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, msg: IncomingMessage) -> Result<Outcome>;
}

#[async_trait]
impl EventHandler for ChatRelay {
    async fn handle(&self, msg: IncomingMessage) -> Result<Outcome> {
        ChatRelay::handle(self, msg).await
    }
}

/// One single-consumer queue (and worker task) per chat.
///
/// Events for one chat are handled strictly in arrival order; different chats
/// run concurrently.
pub struct ChatQueues<H: EventHandler> {
    bot: String,
    handler: Arc<H>,
    shutdown: CancellationToken,
    queues: HashMap<ChatId, mpsc::UnboundedSender<IncomingMessage>>,
    workers: JoinSet<()>,
}

impl<H: EventHandler> ChatQueues<H> {
    pub fn new(bot: impl Into<String>, handler: Arc<H>, shutdown: CancellationToken) -> Self {
        Self {
            bot: bot.into(),
            handler,
            shutdown,
            queues: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    pub fn push(&mut self, msg: IncomingMessage) {
        let chat = msg.chat.id.clone();
        let msg = match self.queues.get(&chat) {
            Some(tx) => match tx.send(msg) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => msg,
            },
            None => msg,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.workers.spawn(worker(
            self.bot.clone(),
            self.handler.clone(),
            rx,
            self.shutdown.clone(),
        ));
        // A fresh receiver is alive, so this send cannot fail.
        let _ = tx.send(msg);
        self.queues.insert(chat, tx);
    }

    /// Close every queue and wait up to `grace` for in-flight events.
    pub async fn drain(mut self, grace: Duration) {
        self.queues.clear();
        let all_done = async { while self.workers.join_next().await.is_some() {} };
        if tokio::time::timeout(grace, all_done).await.is_err() {
            warn!(bot = %self.bot, "workers still busy after grace period; aborting");
            self.workers.abort_all();
        }
    }
}

async fn worker<H: EventHandler>(
    bot: String,
    handler: Arc<H>,
    mut rx: mpsc::UnboundedReceiver<IncomingMessage>,
    shutdown: CancellationToken,
) {
    while let Some(msg) = rx.recv().await {
        if shutdown.is_cancelled() {
            debug!(bot = %bot, chat = %msg.chat.id.0, "dropping queued event on shutdown");
            continue;
        }
        let chat = msg.chat.id.0.clone();
        let handler = handler.clone();
        // Separate task so a panic in one event cannot take the worker down.
        match tokio::spawn(async move { handler.handle(msg).await }).await {
            Ok(Ok(outcome)) => debug!(bot = %bot, chat = %chat, ?outcome, "event handled"),
            Ok(Err(e)) => error!(bot = %bot, chat = %chat, "event failed: {e}"),
            Err(e) => error!(bot = %bot, chat = %chat, "event handler panicked: {e}"),
        }
    }
}

/// Run one bot instance until `shutdown` fires.
pub async fn run_bot(
    cfg: Arc<Config>,
    bot: BotInstance,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let signal = Arc::new(SignalMessenger::new(
        cfg.signal_http_url.clone(),
        bot.phone_number.clone(),
        cfg.message_chunk_len,
    )?);

    if let Err(e) = signal.set_profile_name(&bot.name).await {
        warn!(bot = %bot.name, "could not set profile name: {e}");
    }

    let uuid = match (&bot.uuid, &cfg.signal_accounts_file) {
        (Some(uuid), _) => Some(uuid.clone()),
        (None, Some(path)) => lookup_uuid(path, &bot.phone_number).await,
        (None, None) => None,
    };
    if uuid.is_none() {
        warn!(bot = %bot.name, "bot uuid unknown; mentions are matched by number only");
    }
    let identity = BotIdentity {
        number: bot.phone_number.clone(),
        uuid,
    };

    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        signal.clone(),
        ThrottleConfig::default(),
    ));
    let defaults = ChatDefaults {
        privacy_mode: cfg.default_privacy_mode,
        model: bot.default_model.clone(),
        prompt: bot.default_prompt.clone(),
        image_size: cfg.catalog.default_size(),
        max_history: cfg.max_history_messages,
    };
    let store = ChatStore::new(bot.id(), defaults, cfg.chat_state_dir.as_deref());
    let relay = Arc::new(ChatRelay::new(
        bot.clone(),
        RelaySettings::from_config(&cfg),
        store,
        dispatcher,
        messenger,
        shutdown.clone(),
    ));

    let (frames_tx, mut frames_rx) = mpsc::channel::<String>(FRAME_BUFFER);
    let receiver = tokio::spawn(receiver::run(
        cfg.signal_ws_url.clone(),
        bot.phone_number.clone(),
        frames_tx,
        shutdown.clone(),
    ));

    info!(bot = %bot.name, number = %bot.phone_number, model = %bot.default_model, "bot started");
    let mut queues = ChatQueues::new(bot.name.clone(), relay, shutdown.clone());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames_rx.recv() => {
                let Some(raw) = frame else { break };
                let event = match events::decode(&raw, &identity) {
                    Ok(Some(ev)) => ev,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(bot = %bot.name, "undecodable frame: {e}");
                        continue;
                    }
                };
                queues.push(to_incoming(event));
            }
        }
    }

    info!(bot = %bot.name, "shutting down");
    let _ = receiver.await;
    // Provider calls get the grace period; sends after that need a little more.
    queues.drain(cfg.shutdown_grace + Duration::from_secs(5)).await;
    info!(bot = %bot.name, "bot stopped");
    Ok(())
}

/// Groups are keyed by the envelope's internal id, which never changes;
/// the messenger maps it to a sendable id when replying.
fn to_incoming(ev: InboundEvent) -> IncomingMessage {
    let chat = match ev.group_internal_id {
        Some(internal) => ChatRef::group(internal),
        None => ChatRef::direct(ev.sender.clone()),
    };
    IncomingMessage {
        chat,
        sender: ev.sender,
        sender_name: ev.sender_name,
        text: ev.text,
        timestamp: ev.timestamp,
        mentions_bot: ev.mentions_bot,
        attachments: ev.attachments,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use sigrelay_core::errors::Error;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, msg: IncomingMessage) -> Result<Outcome> {
            // Earlier messages in a chat sleep longer, so reordering would show.
            if let Some(ms) = msg.text.strip_prefix("slow") {
                let ms: u64 = ms.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if msg.text == "boom" {
                return Err(Error::External("boom".to_string()));
            }
            if msg.text == "panic" {
                panic!("handler bug");
            }
            self.seen
                .lock()
                .unwrap()
                .push((msg.chat.id.0.clone(), msg.text.clone()));
            Ok(Outcome::Recorded)
        }
    }

    fn msg(chat: &str, text: &str) -> IncomingMessage {
        IncomingMessage {
            chat: ChatRef::group(chat),
            sender: "+1".to_string(),
            sender_name: None,
            text: text.to_string(),
            timestamp: Utc::now(),
            mentions_bot: false,
            attachments: Vec::new(),
        }
    }

    fn event(group: Option<&str>) -> InboundEvent {
        InboundEvent {
            sender: "+15553334444".to_string(),
            sender_name: Some("Alice".to_string()),
            text: "hi".to_string(),
            timestamp: Utc::now(),
            group_internal_id: group.map(str::to_string),
            mentions_bot: false,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn chats_are_keyed_without_gateway_lookups() {
        let group = to_incoming(event(Some("abc==")));
        assert_eq!(group.chat, ChatRef::group("abc=="));
        let direct = to_incoming(event(None));
        assert_eq!(direct.chat, ChatRef::direct("+15553334444"));
    }

    #[tokio::test(start_paused = true)]
    async fn same_chat_keeps_arrival_order() {
        let rec = Arc::new(Recorder::default());
        let mut queues = ChatQueues::new("bot", rec.clone(), CancellationToken::new());
        queues.push(msg("G1", "slow50"));
        queues.push(msg("G1", "slow10"));
        queues.push(msg("G1", "fast"));
        queues.drain(Duration::from_secs(5)).await;

        let seen: Vec<String> = rec.seen.lock().unwrap().iter().map(|(_, t)| t.clone()).collect();
        assert_eq!(seen, vec!["slow50", "slow10", "fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_chat_does_not_block_others() {
        let rec = Arc::new(Recorder::default());
        let mut queues = ChatQueues::new("bot", rec.clone(), CancellationToken::new());
        queues.push(msg("G1", "slow1000"));
        queues.push(msg("G2", "fast"));
        queues.drain(Duration::from_secs(5)).await;

        let seen = rec.seen.lock().unwrap().clone();
        assert_eq!(seen[0], ("G2".to_string(), "fast".to_string()));
        assert_eq!(seen[1].0, "G1");
    }

    #[tokio::test]
    async fn failures_and_panics_stay_inside_one_event() {
        let rec = Arc::new(Recorder::default());
        let mut queues = ChatQueues::new("bot", rec.clone(), CancellationToken::new());
        queues.push(msg("G1", "boom"));
        queues.push(msg("G1", "panic"));
        queues.push(msg("G1", "after"));
        queues.drain(Duration::from_secs(5)).await;

        assert_eq!(
            rec.seen.lock().unwrap().clone(),
            vec![("G1".to_string(), "after".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn queued_events_are_dropped_after_shutdown() {
        let rec = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();
        let mut queues = ChatQueues::new("bot", rec.clone(), shutdown.clone());
        queues.push(msg("G1", "slow100"));
        queues.push(msg("G1", "queued"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.cancel();
        queues.drain(Duration::from_secs(5)).await;

        assert_eq!(
            rec.seen.lock().unwrap().clone(),
            vec![("G1".to_string(), "slow100".to_string())]
        );
    }
}
