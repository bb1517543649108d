//! The bridge's own in-band command handling (spec §4.5 supplement):
//! `!help` and `!help @nick`.

use crate::config::{BRIDGE_NICKNAME, HELP_TEMPLATE};

/// Collapses whitespace and lowercases a nickname for ping comparison, the
/// same normalization Heim clients use when resolving an `@mention`.
fn normalize_nick(nick: &str) -> String {
    nick.split_whitespace().collect::<String>().to_lowercase()
}

/// Whether `ping` (an `@mention` token, including the leading `@`) refers
/// to `nick`.
pub fn ping_matches(ping: &str, nick: &str) -> bool {
    match ping.strip_prefix('@') {
        Some(rest) => normalize_nick(rest) == normalize_nick(nick),
        None => false,
    }
}

/// Splits a command line the way `!command arg1 arg2` messages are parsed:
/// whitespace-separated tokens, first token intact including its `!`.
pub fn parse_command(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

/// Dispatches a parsed command line, calling `reply` with the response
/// text if the command was recognized. Currently only `!help` (optionally
/// addressed to the bridge by name) is handled.
pub fn dispatch(tokens: &[&str], euphoria_room: &str, instant_room: &str, reply: impl FnOnce(String)) {
    if tokens.is_empty() || tokens[0] != "!help" {
        return;
    }
    if tokens.len() > 1 && !ping_matches(tokens[1], BRIDGE_NICKNAME) {
        return;
    }
    let text = HELP_TEMPLATE
        .replace("{euphoria}", euphoria_room)
        .replace("{instant}", instant_room);
    reply(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_matches_case_and_whitespace_insensitive() {
        assert!(ping_matches("@Bridge", "bridge"));
        assert!(ping_matches("@B r i d g e", "bridge"));
        assert!(!ping_matches("@someone", "bridge"));
        assert!(!ping_matches("bridge", "bridge"));
    }

    #[test]
    fn bare_help_replies() {
        let mut got = None;
        dispatch(&["!help"], "euphoria-room", "instant-room", |text| got = Some(text));
        assert!(got.unwrap().contains("euphoria-room"));
    }

    #[test]
    fn addressed_help_replies_only_when_nick_matches() {
        let mut got = None;
        dispatch(&["!help", "@bridge"], "e", "i", |text| got = Some(text));
        assert!(got.is_some());

        let mut got2 = None;
        dispatch(&["!help", "@someoneelse"], "e", "i", |text| got2 = Some(text));
        assert!(got2.is_none());
    }

    #[test]
    fn unrecognized_command_is_ignored() {
        let mut got = None;
        dispatch(&["!ping"], "e", "i", |text| got = Some(text));
        assert!(got.is_none());
    }
}
