//! Text rendering of server list entries.
//!
//! Server names arrive with in-game colour codes and emoticon tags embedded;
//! stripping them is a presentation concern, so it lives here rather than in
//! the browser core.

use std::time::Duration;

use browser::ServerInfo;

/// Widest a server name gets before truncation.
pub const MAX_SERVER_NAME_CHARS: usize = 60;

/// Widest a map name gets before truncation.
pub const MAX_MAP_NAME_CHARS: usize = 20;

/// Removes in-game colour codes.
///
/// `^` swallows the following character; `^#` additionally swallows the six
/// hex digits of a 24-bit colour.
pub fn strip_colors(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(current) = chars.next() {
        if current == '^' {
            match chars.next() {
                Some('#') => {
                    for _ in 0..6 {
                        chars.next();
                    }
                }
                Some(_) => {}
                None => stripped.push('^'),
            }
        } else {
            stripped.push(current);
        }
    }

    stripped
}

/// Removes `[emoticon]` tags and normalizes whitespace.
pub fn strip_emoticons(text: &str) -> String {
    let mut replaced = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        match rest[open..].find(']') {
            Some(close) => {
                replaced.push_str(&rest[..open]);
                replaced.push(' ');
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    replaced.push_str(rest);

    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates to `limit` characters, ending in an ellipsis when cut.
pub fn limit_to(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut limited: String = text.chars().take(limit.saturating_sub(1)).collect();
        limited.push('…');
        limited
    }
}

/// Display name of a server: colour codes and emoticons stripped.
pub fn clean_name(entry: &ServerInfo) -> String {
    strip_emoticons(&strip_colors(&entry.name))
}

fn format_ping(ping: Option<Duration>) -> String {
    match ping {
        Some(ping) => format!("{:3.0}", ping.as_secs_f64() * 1000.0),
        None => "inf".to_string(),
    }
}

/// One-line summary in the style `2+1 on Server Name (atcs, 40 ms)`.
pub fn describe_server(entry: &ServerInfo) -> String {
    format!(
        "{}+{} on {} ({}, {} ms)",
        entry.players.num_playing(),
        entry.players.num_spectating(),
        limit_to(&clean_name(entry), MAX_SERVER_NAME_CHARS),
        limit_to(&entry.map_name, MAX_MAP_NAME_CHARS),
        format_ping(entry.ping).trim(),
    )
}

/// Fixed-width table row for one server.
pub fn format_server_row(entry: &ServerInfo) -> String {
    let stats = entry.players;
    let map_name: String = entry.map_name.chars().take(15).collect();

    format!(
        "{:>21} | {} ms | {}:{}+{} players | {}:{} bots | {:>15} | {}",
        entry.address.to_string(),
        format_ping(entry.ping),
        stats.alien_players,
        stats.human_players,
        stats.spectators,
        stats.alien_bots,
        stats.human_bots,
        map_name,
        clean_name(entry),
    )
}

/// The full server table, one row per entry.
pub fn format_table(entries: &[ServerInfo]) -> String {
    entries
        .iter()
        .map(format_server_row)
        .collect::<Vec<_>>()
        .join("\n")
}
