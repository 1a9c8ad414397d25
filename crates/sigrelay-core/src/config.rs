use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    catalog::{Catalog, ModelFamily, TextProvider, DEFAULT_MODEL, IMAGE_ENDPOINT_FLUX_PRO},
    domain::{BotInstance, PrivacyMode},
    errors::Error,
    Result,
};

/// Typed configuration for the relay.
///
/// Static bot definitions come from a JSON file; secrets (phone numbers, API
/// keys) come from the environment, with phone numbers correlated to bots by
/// position.
#[derive(Clone, Debug)]
pub struct Config {
    // Signal gateway
    pub signal_http_url: String,
    pub signal_ws_url: String,
    pub signal_accounts_file: Option<PathBuf>,

    // Bots
    pub bots: Vec<BotInstance>,
    pub catalog: Catalog,

    // Providers
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub fal_key: Option<String>,
    pub provider_timeout: Duration,

    // Image generation
    pub trusted_numbers: Vec<String>,
    pub lora_path_to_url: BTreeMap<String, String>,
    pub prompt_replace: BTreeMap<String, String>,
    pub default_image_endpoint: String,

    // Chat state
    pub max_history_messages: usize,
    pub session_timeout: Duration,
    pub default_privacy_mode: PrivacyMode,
    pub chat_state_dir: Option<PathBuf>,

    // Delivery / runtime
    pub message_chunk_len: usize,
    pub shutdown_grace: Duration,
}

#[derive(Deserialize)]
struct BotFile {
    bots: Vec<BotEntry>,
    #[serde(default)]
    prompts: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct BotEntry {
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_env(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (process env in production).
    pub fn from_env(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = PathBuf::from(get("BOT_CONFIG_FILE").unwrap_or("config.json".to_string()));
        let contents = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read bot config {}: {e}", path.display()))
        })?;
        Self::build(get, &contents)
    }

    fn build(get: impl Fn(&str) -> Option<String>, bot_file: &str) -> Result<Self> {
        let env_str = |key: &str| get(key).and_then(non_empty);
        let env_parse = |key: &str| env_str(key).and_then(|s| s.trim().parse::<u64>().ok());

        let file: BotFile = serde_json::from_str(bot_file)
            .map_err(|e| Error::Config(format!("malformed bot config: {e}")))?;
        if file.bots.is_empty() {
            return Err(Error::Config(
                "no bot instances configured in bot config".to_string(),
            ));
        }

        // Phone numbers are positionally correlated with bot entries.
        let numbers = parse_csv(
            env_str("SIGNAL_PHONE_NUMBERS").or_else(|| env_str("SIGNAL_PHONE_NUMBER")),
        );
        if numbers.len() != file.bots.len() {
            return Err(Error::Config(format!(
                "SIGNAL_PHONE_NUMBERS lists {} number(s) but {} bot(s) are configured",
                numbers.len(),
                file.bots.len()
            )));
        }

        let catalog = Catalog::builtin().with_extra_prompts(file.prompts);

        let anthropic_api_key = env_str("ANTHROPIC_API_KEY");
        let google_api_key = env_str("GOOGLE_AI_STUDIO_API");
        let fal_key = env_str("FAL_KEY");

        let mut bots = Vec::with_capacity(file.bots.len());
        for (entry, phone_number) in file.bots.into_iter().zip(numbers) {
            let model_key = entry.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
            let model = catalog.resolve_model(&model_key).ok_or_else(|| {
                Error::Config(format!("bot {}: unknown model {model_key:?}", entry.name))
            })?;

            let key_present = match model.provider {
                TextProvider::Anthropic => anthropic_api_key.is_some(),
                TextProvider::Gemini => google_api_key.is_some(),
            };
            if !key_present {
                return Err(Error::Config(format!(
                    "bot {}: model {} needs {}",
                    entry.name,
                    model.id,
                    provider_key_name(model.provider)
                )));
            }

            let default_prompt = match entry.prompt.as_deref() {
                Some(key) => catalog.resolve_prompt(key).cloned().ok_or_else(|| {
                    Error::Config(format!("bot {}: unknown prompt {key:?}", entry.name))
                })?,
                None => catalog.default_prompt(),
            };

            bots.push(BotInstance {
                name: entry.name,
                phone_number,
                uuid: entry.uuid.and_then(non_empty),
                default_model: model.id.to_string(),
                default_prompt,
            });
        }

        let default_privacy_mode = match env_str("GROUP_PRIVACY_MODE") {
            Some(v) => v.parse::<PrivacyMode>().map_err(|_| {
                Error::Config(format!(
                    "GROUP_PRIVACY_MODE must be opt-in or opt-out, got {v:?}"
                ))
            })?,
            None => PrivacyMode::OptIn,
        };

        let default_image_endpoint = env_str("DEFAULT_IMG_API_ENDPOINT")
            .unwrap_or(IMAGE_ENDPOINT_FLUX_PRO.to_string());
        if catalog.family(&default_image_endpoint) != Some(ModelFamily::Image) {
            return Err(Error::Config(format!(
                "DEFAULT_IMG_API_ENDPOINT {default_image_endpoint:?} is not a known image endpoint"
            )));
        }

        let lora_path_to_url = parse_json_map(env_str("LORA_PATH_TO_URL"), "LORA_PATH_TO_URL")?;
        let prompt_replace = parse_json_map(env_str("PROMPT_REPLACE_DICT"), "PROMPT_REPLACE_DICT")?;

        let signal_accounts_file = env_str("SIGNAL_ACCOUNTS_FILE").map(PathBuf::from).or_else(|| {
            get("HOME").map(|h| PathBuf::from(h).join(".local/share/signal-api/data/accounts.json"))
        });

        Ok(Self {
            signal_http_url: env_str("SIGNAL_HTTP_URL")
                .unwrap_or("http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            signal_ws_url: env_str("SIGNAL_WS_URL")
                .unwrap_or("ws://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            signal_accounts_file,
            bots,
            catalog,
            anthropic_api_key,
            google_api_key,
            fal_key,
            provider_timeout: Duration::from_secs(env_parse("PROVIDER_TIMEOUT_SECS").unwrap_or(120)),
            trusted_numbers: parse_csv(env_str("TRUSTED_PHONE_NUMBERS")),
            lora_path_to_url,
            prompt_replace,
            default_image_endpoint,
            max_history_messages: env_parse("MAX_HISTORY_MESSAGES").unwrap_or(50).max(1) as usize,
            session_timeout: Duration::from_secs(
                60 * env_parse("SESSION_TIMEOUT_MINUTES").unwrap_or(30),
            ),
            default_privacy_mode,
            chat_state_dir: env_str("CHAT_STATE_DIR").map(PathBuf::from),
            message_chunk_len: env_parse("MESSAGE_CHUNK_LEN").unwrap_or(400).max(16) as usize,
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS").unwrap_or(10)),
        })
    }

    /// `(display name, phone number)` of every configured bot.
    pub fn bot_directory(&self) -> Vec<(String, String)> {
        self.bots
            .iter()
            .map(|b| (b.name.clone(), b.phone_number.clone()))
            .collect()
    }
}

fn provider_key_name(provider: TextProvider) -> &'static str {
    match provider {
        TextProvider::Anthropic => "ANTHROPIC_API_KEY",
        TextProvider::Gemini => "GOOGLE_AI_STUDIO_API",
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn parse_json_map(v: Option<String>, key: &str) -> Result<BTreeMap<String, String>> {
    let Some(raw) = v else {
        return Ok(BTreeMap::new());
    };
    serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("{key} must be a JSON object of strings: {e}")))
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
