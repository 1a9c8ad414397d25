//! Bang-command parsing (`!help`, `!cm 3`, ...).
//!
//! One function turns message text into a closed [`Command`] value; argument
//! validation against the catalog happens here so handlers only see valid input.

use crate::{
    catalog::{Catalog, ImageSize},
    domain::{PrivacyMode, SystemPrompt},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    ChangePrompt(SystemPrompt),
    /// Validated text model id.
    ChangeModel(String),
    CustomPrompt(String),
    ImageGen(String),
    ImageSize(ImageSize),
    Privacy(PrivacyMode),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Help => "!help",
            Command::ChangePrompt(_) => "!cp",
            Command::ChangeModel(_) => "!cm",
            Command::CustomPrompt(_) => "!cup",
            Command::ImageGen(_) => "!im",
            Command::ImageSize(_) => "!is",
            Command::Privacy(_) => "!privacy",
        }
    }
}

/// A recognised command whose argument failed validation, or an unknown bang token.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}. Send !help for the list of commands.")]
    Unknown(String),

    #[error("No such system prompt: {0:?}.")]
    NoSuchPrompt(String),

    #[error("No such model: {0:?}.")]
    NoSuchModel(String),

    #[error("No such image size: {0:?}.")]
    NoSuchSize(String),

    #[error("Please provide a custom prompt.")]
    EmptyCustomPrompt,

    #[error("Please provide an image prompt, e.g. !im a lighthouse at dusk")]
    EmptyImagePrompt,

    #[error("Invalid privacy mode. Use 'opt-in' or 'opt-out'.")]
    InvalidPrivacy(String),
}

impl CommandError {
    /// Usage reply for the chat: the error plus the valid choices where relevant.
    pub fn reply(&self, catalog: &Catalog) -> String {
        let listing = match self {
            CommandError::NoSuchPrompt(_) => {
                Some(("Available system prompts", catalog.prompts_listing()))
            }
            CommandError::NoSuchModel(_) => Some(("Available AI models", catalog.models_listing())),
            CommandError::NoSuchSize(_) => {
                Some(("Available image sizes", catalog.sizes_listing()))
            }
            _ => None,
        };
        match listing {
            Some((title, items)) => format!("{self}\n{title}:\n{}", items.join("\n")),
            None => self.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parsed {
    /// Plain chat text; handled as a conversation turn.
    NotCommand,
    Command(Command),
    Invalid(CommandError),
}

/// Parse message text (already stripped of privacy prefixes and mention placeholders).
pub fn parse(text: &str, catalog: &Catalog) -> Parsed {
    let text = text.trim();
    let (token, args) = match text.split_once(char::is_whitespace) {
        Some((t, rest)) => (t, rest.trim()),
        None => (text, ""),
    };

    let Some(name) = token.strip_prefix('!') else {
        return Parsed::NotCommand;
    };
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Parsed::NotCommand;
    }

    let result = match name.to_lowercase().as_str() {
        "help" => Ok(Command::Help),
        "cp" => catalog
            .resolve_prompt(args)
            .cloned()
            .map(Command::ChangePrompt)
            .ok_or_else(|| CommandError::NoSuchPrompt(args.to_string())),
        "cm" => args
            .parse::<usize>()
            .ok()
            .and_then(|i| catalog.model_by_index(i))
            .map(|m| Command::ChangeModel(m.id.to_string()))
            .ok_or_else(|| CommandError::NoSuchModel(args.to_string())),
        "cup" if args.is_empty() => Err(CommandError::EmptyCustomPrompt),
        "cup" => Ok(Command::CustomPrompt(args.to_string())),
        "im" if args.is_empty() => Err(CommandError::EmptyImagePrompt),
        "im" => Ok(Command::ImageGen(args.to_string())),
        "is" => args
            .parse::<usize>()
            .ok()
            .and_then(|i| catalog.size_by_index(i))
            .cloned()
            .map(Command::ImageSize)
            .ok_or_else(|| CommandError::NoSuchSize(args.to_string())),
        "privacy" => args
            .parse::<PrivacyMode>()
            .map(Command::Privacy)
            .map_err(|_| CommandError::InvalidPrivacy(args.to_string())),
        _ => Err(CommandError::Unknown(token.to_string())),
    };

    match result {
        Ok(cmd) => Parsed::Command(cmd),
        Err(e) => Parsed::Invalid(e),
    }
}

/// `!help` text; the group-usage section depends on the chat's privacy mode.
pub fn help_text(catalog: &Catalog, mode: PrivacyMode) -> String {
    let privacy_help = match mode {
        PrivacyMode::OptIn => {
            "💬 Group Chat Usage (Opt-In Mode):\n\
             - @mention the bot to use commands or get responses\n\
             - Prefix messages with . (dot) to include in conversation history without response\n\
             - Messages without mention or . prefix are ignored (privacy-first)"
        }
        PrivacyMode::OptOut => {
            "💬 Group Chat Usage (Opt-Out Mode):\n\
             - @mention the bot to use commands or get responses\n\
             - Bot sees and learns from all group messages\n\
             - Prefix messages with . (dot) to exclude from conversation history"
        }
    };

    format!(
        "📋 Available Commands:\n\
         - !help: Show this help message\n\
         - !cp <number|name>: Change system prompt\n\
         - !cm <number>: Change AI model\n\
         - !cup <text>: Set a custom system prompt\n\
         - !im <prompt>: Generate an image\n\
         - !is <number>: Change image size\n\
         - !privacy <opt-in|opt-out>: Change privacy mode for this chat\n\
         \n\
         {privacy_help}\n\
         \n\
         🤖 Available Models:\n  {}\n\
         \n\
         💭 System Prompts:\n  {}\n\
         \n\
         📐 Image Sizes:\n  {}",
        catalog.models_listing().join("\n  "),
        catalog.prompts_listing().join("\n  "),
        catalog.sizes_listing().join("\n  "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Parsed {
        parse(text, &Catalog::builtin())
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(p("hello there"), Parsed::NotCommand);
        assert_eq!(p("!!"), Parsed::NotCommand);
        assert_eq!(p("! hello"), Parsed::NotCommand);
        assert_eq!(p("wow!help"), Parsed::NotCommand);
        assert_eq!(p(""), Parsed::NotCommand);
    }

    #[test]
    fn recognises_every_command() {
        assert_eq!(p("!help"), Parsed::Command(Command::Help));
        assert_eq!(p("  !HELP  "), Parsed::Command(Command::Help));
        assert!(matches!(p("!cp 2"), Parsed::Command(Command::ChangePrompt(sp)) if sp.name == "Smileys"));
        assert!(matches!(p("!cp wittgenstein"), Parsed::Command(Command::ChangePrompt(sp)) if sp.name == "Wittgenstein"));
        assert_eq!(
            p("!cm 2"),
            Parsed::Command(Command::ChangeModel("gemini-1.5-flash-002".to_string()))
        );
        assert_eq!(
            p("!cup Be   brief."),
            Parsed::Command(Command::CustomPrompt("Be   brief.".to_string()))
        );
        assert_eq!(
            p("!im a red fox"),
            Parsed::Command(Command::ImageGen("a red fox".to_string()))
        );
        assert!(matches!(p("!is 1"), Parsed::Command(Command::ImageSize(s)) if s.name == "square"));
        assert_eq!(
            p("!privacy Opt-Out"),
            Parsed::Command(Command::Privacy(PrivacyMode::OptOut))
        );
    }

    #[test]
    fn out_of_range_model_is_a_usage_error() {
        assert_eq!(
            p("!cm 999"),
            Parsed::Invalid(CommandError::NoSuchModel("999".to_string()))
        );
        assert_eq!(
            p("!cm two"),
            Parsed::Invalid(CommandError::NoSuchModel("two".to_string()))
        );
        assert_eq!(
            p("!cm 0"),
            Parsed::Invalid(CommandError::NoSuchModel("0".to_string()))
        );
    }

    #[test]
    fn argument_errors() {
        assert_eq!(p("!cup"), Parsed::Invalid(CommandError::EmptyCustomPrompt));
        assert_eq!(p("!im   "), Parsed::Invalid(CommandError::EmptyImagePrompt));
        assert_eq!(
            p("!privacy maybe"),
            Parsed::Invalid(CommandError::InvalidPrivacy("maybe".to_string()))
        );
        assert_eq!(
            p("!privacy"),
            Parsed::Invalid(CommandError::InvalidPrivacy(String::new()))
        );
        assert_eq!(
            p("!is 7"),
            Parsed::Invalid(CommandError::NoSuchSize("7".to_string()))
        );
        assert_eq!(
            p("!cp"),
            Parsed::Invalid(CommandError::NoSuchPrompt(String::new()))
        );
    }

    #[test]
    fn unknown_bang_token_is_reported() {
        assert_eq!(
            p("!frobnicate now"),
            Parsed::Invalid(CommandError::Unknown("!frobnicate".to_string()))
        );
    }

    #[test]
    fn usage_reply_lists_choices() {
        let catalog = Catalog::builtin();
        let reply = CommandError::NoSuchModel("999".to_string()).reply(&catalog);
        assert!(reply.starts_with("No such model"));
        assert!(reply.contains("(1) gemini-1.5-flash-8b"));
        assert!(reply.contains("claude-opus-4-1-20250805"));

        let reply = CommandError::InvalidPrivacy("x".to_string()).reply(&catalog);
        assert_eq!(reply, "Invalid privacy mode. Use 'opt-in' or 'opt-out'.");
    }

    #[test]
    fn help_mentions_mode_specific_usage() {
        let catalog = Catalog::builtin();
        assert!(help_text(&catalog, PrivacyMode::OptIn).contains("Opt-In Mode"));
        let out = help_text(&catalog, PrivacyMode::OptOut);
        assert!(out.contains("Opt-Out Mode"));
        assert!(out.contains("!privacy <opt-in|opt-out>"));
        assert!(out.contains("(5) portrait_3_4"));
    }
}
