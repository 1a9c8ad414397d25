//! Per-bot message relay: privacy filter, command execution and chat turns.
//!
//! One [`ChatRelay`] exists per bot instance. The router calls
//! [`ChatRelay::handle`] once per inbound message, serialised per chat, and
//! every event that produces output results in exactly one logical send.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    catalog::model_label,
    chat::{
        privacy::{self, Decision},
        ChatState, ChatStore, Override,
    },
    commands::{self, Command, Parsed},
    config::Config,
    domain::{BotInstance, ChatId, Message, Role, SystemPrompt},
    errors::Error,
    formatting::{clean_inbound, detect_mentions, strip_reply_prefix},
    messaging::{
        port::MessagingPort,
        types::{Attachment, IncomingMessage},
    },
    model::{
        image,
        types::{
            ChatTurn, CompletionRequest, DispatchRequest, InlineImage, Reply, DEFAULT_MAX_TOKENS,
        },
        Dispatcher,
    },
    Result,
};

/// Stands in for the text of a message that only carried images.
const IMAGE_ONLY_TEXT: &str = "(sent an image)";

/// Relay knobs taken from [`Config`].
#[derive(Clone, Debug, Default)]
pub struct RelaySettings {
    pub trusted_numbers: Vec<String>,
    pub lora_path_to_url: BTreeMap<String, String>,
    pub prompt_replace: BTreeMap<String, String>,
    pub default_image_endpoint: String,
    /// Direct chats idle longer than this start a fresh conversation.
    pub session_timeout: Duration,
    /// How long an in-flight provider call may run once shutdown starts.
    pub shutdown_grace: Duration,
    /// `(name, number)` of every configured bot.
    pub bots: Vec<(String, String)>,
}

impl RelaySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            trusted_numbers: cfg.trusted_numbers.clone(),
            lora_path_to_url: cfg.lora_path_to_url.clone(),
            prompt_replace: cfg.prompt_replace.clone(),
            default_image_endpoint: cfg.default_image_endpoint.clone(),
            session_timeout: cfg.session_timeout,
            shutdown_grace: cfg.shutdown_grace,
            bots: cfg.bot_directory(),
        }
    }

    fn is_trusted(&self, sender: &str) -> bool {
        self.trusted_numbers.iter().any(|n| n == sender)
    }
}

/// What happened to one inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Filtered out: nothing stored, nothing sent.
    Dropped,
    /// Stored in history without a reply.
    Recorded,
    /// One reply (answer, command result or error) was sent.
    Replied,
    /// Shutdown overtook the provider call; nothing stored, nothing sent.
    Abandoned,
}

pub struct ChatRelay {
    bot: BotInstance,
    settings: RelaySettings,
    store: ChatStore,
    dispatcher: Arc<Dispatcher>,
    messenger: Arc<dyn MessagingPort>,
    /// Group participants seen per chat: display name -> number.
    participants: Mutex<HashMap<ChatId, BTreeMap<String, String>>>,
    shutdown: CancellationToken,
}

impl ChatRelay {
    pub fn new(
        bot: BotInstance,
        settings: RelaySettings,
        store: ChatStore,
        dispatcher: Arc<Dispatcher>,
        messenger: Arc<dyn MessagingPort>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bot,
            settings,
            store,
            dispatcher,
            messenger,
            participants: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn bot(&self) -> &BotInstance {
        &self.bot
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub async fn handle(&self, msg: IncomingMessage) -> Result<Outcome> {
        let text = clean_inbound(&msg.text);
        let has_images = msg.attachments.iter().any(Attachment::is_image);
        if text.is_empty() && !has_images {
            return Ok(Outcome::Dropped);
        }

        let state = self.store.get_or_create(&msg.chat).await?;
        let mut state = state.lock().await;

        // Commands are recognised on the text as sent, so ".!cm 2" is chat.
        let parsed = commands::parse(&text, self.dispatcher.catalog());

        // The privacy filter is a group policy; direct chats are always kept and answered.
        let (text, reply) = if msg.chat.is_group() {
            match privacy::evaluate(state.privacy_mode, &text, msg.mentions_bot) {
                Decision::Drop => {
                    debug!(bot = %self.bot.name, chat = %msg.chat.id.0, mode = %state.privacy_mode, "message filtered");
                    return Ok(Outcome::Dropped);
                }
                Decision::Keep { text, reply } => (text, reply),
            }
        } else {
            (text, true)
        };
        if text.is_empty() && !has_images {
            return Ok(Outcome::Dropped);
        }

        if msg.chat.is_group() {
            self.remember_participant(&msg).await;
        }

        match parsed {
            Parsed::Command(cmd) => self.execute(&mut state, &msg, cmd).await,
            Parsed::Invalid(err) => {
                debug!(bot = %self.bot.name, chat = %msg.chat.id.0, "command rejected: {err}");
                self.send(&msg, &err.reply(self.dispatcher.catalog())).await?;
                Ok(Outcome::Replied)
            }
            Parsed::NotCommand => self.chat_turn(&mut state, &msg, text, reply).await,
        }
    }

    async fn execute(
        &self,
        state: &mut ChatState,
        msg: &IncomingMessage,
        cmd: Command,
    ) -> Result<Outcome> {
        info!(bot = %self.bot.name, chat = %msg.chat.id.0, command = cmd.name(), "executing command");

        let reply = match cmd {
            Command::Help => commands::help_text(self.dispatcher.catalog(), state.privacy_mode),
            Command::ChangePrompt(prompt) => {
                let reply = format!("System prompt changed to \"{}\"", prompt.name);
                self.apply(state, Override::Prompt(prompt)).await;
                reply
            }
            Command::ChangeModel(model) => {
                let reply = format!("AI model changed to: \"{model}\"");
                self.apply(state, Override::Model(model)).await;
                reply
            }
            Command::CustomPrompt(text) => {
                let reply = format!("System prompt changed to:\n{text}");
                self.apply(state, Override::Prompt(SystemPrompt::custom(text)))
                    .await;
                reply
            }
            Command::ImageSize(size) => {
                let reply = format!(
                    "Image size changed to: \"{}\" ({}x{})",
                    size.name, size.width, size.height
                );
                self.apply(state, Override::ImageSize(size)).await;
                reply
            }
            Command::Privacy(mode) => {
                let reply = format!("Privacy mode changed to: \"{mode}\"");
                self.apply(state, Override::Privacy(mode)).await;
                reply
            }
            Command::ImageGen(prompt) => return self.generate_image(state, msg, &prompt).await,
        };

        self.send(msg, &reply).await?;
        Ok(Outcome::Replied)
    }

    async fn generate_image(
        &self,
        state: &ChatState,
        msg: &IncomingMessage,
        prompt: &str,
    ) -> Result<Outcome> {
        if !self.settings.is_trusted(&msg.sender) {
            info!(bot = %self.bot.name, sender = %msg.sender, "untrusted sender asked for an image");
            self.send(msg, "Sorry, image generation is only available to trusted users.")
                .await?;
            return Ok(Outcome::Replied);
        }

        let req = image::build_request(
            prompt,
            state.image_size.clone(),
            &self.settings.default_image_endpoint,
            &self.settings.prompt_replace,
            &self.settings.lora_path_to_url,
        );
        info!(bot = %self.bot.name, endpoint = %req.endpoint, loras = req.loras.len(), "generating image");

        let Some(result) = self.call_provider(DispatchRequest::Image(req)).await else {
            return Ok(Outcome::Abandoned);
        };
        match result {
            Ok(Reply::Image(img)) => self.messenger.send_image(&msg.chat, &img).await?,
            Ok(Reply::Text(text)) => self.send(msg, &text).await?,
            Err(e) => {
                warn!(bot = %self.bot.name, chat = %msg.chat.id.0, "image generation failed: {e}");
                self.send(msg, &e.user_message()).await?;
            }
        }
        Ok(Outcome::Replied)
    }

    async fn chat_turn(
        &self,
        state: &mut ChatState,
        msg: &IncomingMessage,
        text: String,
        reply: bool,
    ) -> Result<Outcome> {
        let now = Utc::now();
        let fresh = !msg.chat.is_group() && state.is_idle(now, self.settings.session_timeout);
        let text = if text.is_empty() {
            IMAGE_ONLY_TEXT.to_string()
        } else {
            text
        };
        let user_turn = Message::user(msg.display_sender(), text, msg.timestamp);

        if !reply {
            if fresh {
                state.clear_history();
            }
            state.append_message(user_turn);
            state.touch(now);
            self.persist(state).await;
            return Ok(Outcome::Recorded);
        }

        let system = self.system_prompt(state, msg).await;
        let group = msg.chat.is_group();
        let mut messages: Vec<ChatTurn> = if fresh {
            Vec::new()
        } else {
            state.history().iter().map(|m| render_turn(m, group)).collect()
        };
        let images = self.fetch_images(msg).await;
        messages.push(render_turn(&user_turn, group).with_images(images));
        let req = CompletionRequest {
            model: state.active_model.clone(),
            system,
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
        };

        debug!(bot = %self.bot.name, chat = %msg.chat.id.0, model = %req.model, turns = req.messages.len(), "requesting completion");
        let Some(result) = self.call_provider(DispatchRequest::Chat(req)).await else {
            info!(bot = %self.bot.name, chat = %msg.chat.id.0, "completion abandoned on shutdown");
            return Ok(Outcome::Abandoned);
        };

        let answer = match expect_text(result) {
            Ok(text) => strip_reply_prefix(&text),
            Err(e) => {
                warn!(bot = %self.bot.name, chat = %msg.chat.id.0, model = %state.active_model, "completion failed: {e}");
                self.send(msg, &e.user_message()).await?;
                return Ok(Outcome::Replied);
            }
        };

        if fresh {
            debug!(bot = %self.bot.name, chat = %msg.chat.id.0, "session expired, starting fresh");
            state.clear_history();
        }
        let label = model_label(&state.active_model).to_string();
        state.append_message(user_turn);
        state.append_message(Message::bot(label, answer.clone(), Utc::now()));
        state.touch(now);
        self.persist(state).await;

        if msg.chat.is_group() {
            let directory = self.mention_directory(&msg.chat.id).await;
            let (body, mentions) = detect_mentions(&answer, &directory);
            self.messenger.send_text(&msg.chat, &body, &mentions).await?;
        } else {
            self.send(msg, &answer).await?;
        }
        Ok(Outcome::Replied)
    }

    /// Active prompt, plus a description of the room for group chats.
    async fn system_prompt(&self, state: &ChatState, msg: &IncomingMessage) -> Option<String> {
        let base = state.active_prompt.text.clone();
        if !msg.chat.is_group() {
            return base;
        }

        let others: Vec<&str> = self
            .settings
            .bots
            .iter()
            .filter(|(_, number)| *number != self.bot.phone_number)
            .map(|(name, _)| name.as_str())
            .collect();
        let users: Vec<String> = {
            let participants = self.participants.lock().await;
            participants
                .get(&msg.chat.id)
                .map(|p| {
                    p.keys()
                        .filter(|name| !self.settings.bots.iter().any(|(bot, _)| bot == *name))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut who = Vec::new();
        if !others.is_empty() {
            who.push(format!("Other bots: {}", others.join(", ")));
        }
        if !users.is_empty() {
            who.push(format!("Users: {}", users.join(", ")));
        }
        let who = if who.is_empty() {
            "other participants".to_string()
        } else {
            who.join(". ")
        };

        let context = format!(
            "You are [{}]. You are in a group chat with users and other AI bots. \
             Messages are prefixed with [participant] to indicate the participant. \
             Be parsimonious, if you wish to directly address another participant \
             (which will notify them), mention their name in your response. {who}.",
            model_label(&state.active_model)
        );
        Some(match base {
            Some(prompt) => format!("{prompt}\n\n{context}"),
            None => context,
        })
    }

    /// Races a provider call against shutdown plus the grace period.
    async fn call_provider(&self, req: DispatchRequest) -> Option<Result<Reply>> {
        let call = self.dispatcher.dispatch(req);
        tokio::pin!(call);
        let deadline = async {
            self.shutdown.cancelled().await;
            tokio::time::sleep(self.settings.shutdown_grace).await;
        };

        tokio::select! {
            biased;
            res = &mut call => Some(res),
            _ = deadline => None,
        }
    }

    /// Download the message's image attachments; failures are logged and skipped.
    async fn fetch_images(&self, msg: &IncomingMessage) -> Vec<InlineImage> {
        let mut images = Vec::new();
        for att in msg.attachments.iter().filter(|a| a.is_image()) {
            match self.messenger.fetch_attachment(&att.id).await {
                Ok(bytes) => match InlineImage::detect(bytes, att.content_type.as_deref()) {
                    Some(image) => images.push(image),
                    None => debug!(bot = %self.bot.name, attachment = %att.id, "attachment is not an image"),
                },
                Err(e) => {
                    warn!(bot = %self.bot.name, attachment = %att.id, "attachment download failed: {e}")
                }
            }
        }
        images
    }

    async fn apply(&self, state: &mut ChatState, value: Override) {
        state.set_override(value);
        self.persist(state).await;
    }

    async fn persist(&self, state: &ChatState) {
        if let Err(e) = self.store.persist(state).await {
            warn!(bot = %self.bot.name, chat = %state.chat.id.0, "failed to persist chat state: {e}");
        }
    }

    async fn send(&self, msg: &IncomingMessage, text: &str) -> Result<()> {
        self.messenger.send_text(&msg.chat, text, &[]).await
    }

    async fn remember_participant(&self, msg: &IncomingMessage) {
        let Some(name) = msg.sender_name.as_deref().map(str::trim).filter(|n| !n.is_empty())
        else {
            return;
        };
        let mut participants = self.participants.lock().await;
        participants
            .entry(msg.chat.id.clone())
            .or_default()
            .insert(name.to_string(), msg.sender.clone());
    }

    /// Names that become mentions in a group reply: other bots and known users.
    async fn mention_directory(&self, chat: &ChatId) -> Vec<(String, String)> {
        let mut directory: Vec<(String, String)> = self
            .settings
            .bots
            .iter()
            .filter(|(_, number)| *number != self.bot.phone_number)
            .cloned()
            .collect();
        if let Some(users) = self.participants.lock().await.get(chat) {
            directory.extend(
                users
                    .iter()
                    .filter(|(_, number)| **number != self.bot.phone_number)
                    .map(|(n, p)| (n.clone(), p.clone())),
            );
        }
        directory
    }
}

fn expect_text(result: Result<Reply>) -> Result<String> {
    match result {
        Ok(Reply::Text(text)) => Ok(text),
        Ok(Reply::Image(_)) => Err(Error::Provider(
            "text model returned an image".to_string(),
        )),
        Err(e) => Err(e),
    }
}

fn render_turn(m: &Message, group: bool) -> ChatTurn {
    let content = if group {
        format!("[{}]: {}", m.sender, m.text)
    } else {
        m.text.clone()
    };
    match m.role {
        Role::User => ChatTurn::user(content),
        Role::Bot => ChatTurn::assistant(content),
    }
}
