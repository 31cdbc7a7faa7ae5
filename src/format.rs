//! Text helpers for turning daemon values into Telegram HTML.

/// Telegram's hard limit for a single text message.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// qBittorrent reports this eta for torrents that will never finish.
const ETA_INFINITY: i64 = 8_640_000;

const FULL: char = '●';
const EMPTY: char = '○';

/// `1536` -> `"1.50 kb"`. Base 1024, two decimals.
pub fn human_readable(bytes: i64) -> String {
    const SUFFIXES: [&str; 5] = ["b", "kb", "mb", "gb", "tb"];

    let mut size = bytes as f64;
    let mut idx = 0;
    while size > 1024.0 && idx < SUFFIXES.len() - 1 {
        idx += 1;
        size /= 1024.0;
    }
    format!("{:.2} {}", size, SUFFIXES[idx])
}

/// Ten-step bar for a progress in `0.0..=1.0`.
pub fn progress_bar(progress: f64) -> String {
    let steps = 10usize;
    let done = ((progress.clamp(0.0, 1.0) * steps as f64).round() as usize).min(steps);

    let mut bar = String::with_capacity(steps * FULL.len_utf8());
    bar.extend(std::iter::repeat_n(FULL, done));
    bar.extend(std::iter::repeat_n(EMPTY, steps - done));
    bar
}

/// `3725` -> `"1:02:05"`, `90061` -> `"1 day, 1:01:01"`.
pub fn eta(seconds: i64) -> String {
    if seconds >= ETA_INFINITY {
        return "∞".to_string();
    }
    let seconds = seconds.max(0);

    let days = seconds / 86_400;
    let rest = seconds % 86_400;
    let hms = format!("{}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);

    match days {
        0 => hms,
        1 => format!("1 day, {}", hms),
        n => format!("{} days, {}", n, hms),
    }
}

/// Escape the characters Telegram's HTML parse mode cares about.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Names longer than 80 characters are cut and suffixed with `...`.
pub fn short_name(name: &str) -> String {
    if name.chars().count() <= 80 {
        name.to_string()
    } else {
        let cut: String = name.chars().take(81).collect();
        format!("{}...", cut)
    }
}

/// Join lines into as few messages as possible, each within the Telegram
/// limit. A single oversized line is truncated.
pub fn split_text(lines: &[String]) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        let line = if line.chars().count() > MAX_MESSAGE_LENGTH {
            line.chars().take(MAX_MESSAGE_LENGTH).collect()
        } else {
            line.clone()
        };

        let needed = if current.is_empty() { line.len() } else { current.len() + 1 + line.len() };
        if needed > MAX_MESSAGE_LENGTH && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_readable() {
        assert_eq!(human_readable(0), "0.00 b");
        assert_eq!(human_readable(1024), "1024.00 b");
        assert_eq!(human_readable(1536), "1.50 kb");
        assert_eq!(human_readable(5 * 1024 * 1024 * 1024), "5.00 gb");
        assert_eq!(human_readable(3 * 1024_i64.pow(5)), "3072.00 tb");
    }

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), "○○○○○○○○○○");
        assert_eq!(progress_bar(0.46), "●●●●●○○○○○");
        assert_eq!(progress_bar(1.0), "●●●●●●●●●●");
        assert_eq!(progress_bar(1.7), "●●●●●●●●●●");
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta(0), "0:00:00");
        assert_eq!(eta(3725), "1:02:05");
        assert_eq!(eta(90061), "1 day, 1:01:01");
        assert_eq!(eta(2 * 86_400 + 5), "2 days, 0:00:05");
        assert_eq!(eta(8_640_000), "∞");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a<b> & \"c\""), "a&lt;b&gt; &amp; &quot;c&quot;");
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("ubuntu.iso"), "ubuntu.iso");
        let long = "x".repeat(100);
        let short = short_name(&long);
        assert_eq!(short.len(), 84);
        assert!(short.ends_with("..."));
    }

    #[test]
    fn test_split_text() {
        let lines: Vec<String> = (0..300).map(|i| format!("line {:>40}", i)).collect();
        let chunks = split_text(&lines);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= MAX_MESSAGE_LENGTH));
        assert_eq!(chunks.join("\n"), lines.join("\n"));
    }

    #[test]
    fn test_split_text_empty() {
        assert!(split_text(&[]).is_empty());
    }
}
