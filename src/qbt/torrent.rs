//! Torrent records as returned by `/api/v2/torrents/info`.

use chrono::DateTime;
use serde::Deserialize;

use crate::format::{escape_html, eta, human_readable, progress_bar, short_name};

/// One torrent. Only the fields the bot renders are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct Torrent {
    pub hash: String,
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub dlspeed: i64,
    #[serde(default)]
    pub upspeed: i64,
    #[serde(default)]
    pub num_leechs: i64,
    #[serde(default)]
    pub num_seeds: i64,
    #[serde(default)]
    pub eta: i64,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub force_start: bool,
    #[serde(default)]
    pub state: String,
    /// Comma separated, as qBittorrent sends it.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub ratio: f64,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub completion_on: i64,
}

/// Human description of a qBittorrent state string.
pub fn state_description(state: &str) -> &str {
    match state {
        "error" => "error",
        "missingFiles" => "missing files",
        "pausedUP" | "stoppedUP" => "paused - download finished",
        "pausedDL" | "stoppedDL" => "paused - download not finished",
        "queuedUP" => "queued for upload",
        "queuedDL" => "queued for download",
        "forcedDL" => "forced download",
        "forcedUP" => "forced upload",
        "uploading" => "uploading",
        "stalledUP" => "stalled (uploading)",
        "checkingUP" => "checking file (download completed)",
        "checkingDL" => "checking file (downloading)",
        "checkingResumeData" => "checking resume data",
        "downloading" => "downloading",
        "stalledDL" => "stalled (downloading)",
        "metaDL" | "forcedMetaDL" => "fetching metadata",
        "moving" => "moving",
        other => other,
    }
}

impl Torrent {
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }

    /// Tags split on commas, trimmed, optionally lowercased.
    pub fn tags_list(&self, lower: bool) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| if lower { t.to_lowercase() } else { t.to_string() })
            .collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags_list(true).iter().any(|t| *t == tag)
    }

    pub fn progress_percent(&self) -> u32 {
        (self.progress.clamp(0.0, 1.0) * 100.0).round() as u32
    }

    /// Completed torrents have nothing left to wait for.
    pub fn eta_pretty(&self) -> String {
        if self.is_complete() { eta(0) } else { eta(self.eta) }
    }

    pub fn state_pretty(&self) -> &str {
        state_description(&self.state)
    }

    /// Detailed multi-line card used for single torrent views.
    pub fn card(&self) -> String {
        let mut text = format!(
            "• <code>{}</code>\n  {} {}%\n  <b>state</b>: {}\n  <b>size</b>: {}\n  \
             <b>dl/up speed</b>: {}/s, {}/s\n  <b>leechs/seeds</b> {}/{}\n  <b>eta</b>: {}\n  \
             <b>ratio</b>: {:.2}\n  <b>priority</b>: {}\n  <b>force start</b>: {}\n  \
             <b>save path</b>: <code>{}</code>",
            escape_html(&self.name),
            progress_bar(self.progress),
            self.progress_percent(),
            self.state_pretty(),
            human_readable(self.size),
            human_readable(self.dlspeed),
            human_readable(self.upspeed),
            self.num_leechs,
            self.num_seeds,
            self.eta_pretty(),
            self.ratio,
            self.priority,
            if self.force_start { "yes" } else { "no" },
            escape_html(&self.save_path),
        );

        if self.completion_on > 0
            && let Some(done) = DateTime::from_timestamp(self.completion_on, 0)
        {
            text.push_str(&format!("\n  <b>completed on</b>: {}", done.format("%Y-%m-%d %H:%M")));
        }
        if !self.tags.is_empty() {
            text.push_str(&format!("\n  <b>tags</b>: {}", escape_html(&self.tags)));
        }
        text.push_str(&format!("\n  <b>hash</b>: <code>{}</code>", self.hash));
        text
    }

    /// One-line entry used in lists.
    pub fn line(&self) -> String {
        if self.is_complete() {
            return format!("• <code>{}</code> ({})", escape_html(&short_name(&self.name)), human_readable(self.size));
        }

        format!(
            "• <code>{}</code> ({}% of {}, {}, <b>{}/s</b>)",
            escape_html(&short_name(&self.name)),
            self.progress_percent(),
            human_readable(self.size),
            self.state_pretty(),
            human_readable(self.dlspeed),
        )
    }
}
