//! Privacy filter: decides, before any mutation, whether an inbound message is
//! recorded and whether it may trigger a reply.
//!
//! The dot prefix is asymmetric on purpose: in opt-in mode `.` means "include
//! this message", in opt-out mode it means "exclude this message".

use crate::domain::PrivacyMode;

pub const DOT_PREFIX: char = '.';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Not stored, not replied to, no side effects.
    Drop,
    /// Stored (unless it turns out to be a command). `text` has the opt-in dot removed.
    Keep { text: String, reply: bool },
}

/// Group messages only. `addressed` is true when the bot is mentioned or quoted.
pub fn evaluate(mode: PrivacyMode, text: &str, addressed: bool) -> Decision {
    let dotted = text.starts_with(DOT_PREFIX);
    match mode {
        PrivacyMode::OptIn => {
            if !dotted && !addressed {
                return Decision::Drop;
            }
            let text = if dotted {
                text[DOT_PREFIX.len_utf8()..].trim_start().to_string()
            } else {
                text.to_string()
            };
            // A mention wins over the dot: the message is recorded *and* answered.
            Decision::Keep {
                text,
                reply: addressed,
            }
        }
        PrivacyMode::OptOut => {
            if dotted {
                return Decision::Drop;
            }
            Decision::Keep {
                text: text.to_string(),
                reply: addressed,
            }
        }
    }
}
