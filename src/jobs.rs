//! Background job announcing newly completed torrents.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::BotState;
use crate::bot::BotError;
use crate::format::{escape_html, human_readable};
use crate::qbt::{QbtClient, Torrent, TorrentFilter};
use crate::storage::{SeenHashes, StoreError};

/// Completed torrents to announce, plus the first failure to persist them.
pub struct Pending {
    pub announce: Vec<Torrent>,
    pub save_error: Option<StoreError>,
}

/// Record every completed torrent not seen before and return the ones that
/// should be announced. Torrents carrying `skip_tag` are recorded but not
/// returned.
///
/// A failed save does not stop the pass: the hash is already seen in memory,
/// so it is announced now or never.
pub fn pending_notifications(seen: &mut SeenHashes, completed: Vec<Torrent>, skip_tag: Option<&str>) -> Pending {
    let mut pending = Pending { announce: Vec::new(), save_error: None };

    for torrent in completed {
        match seen.is_new(&torrent.hash) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                warn!("Could not persist completed hash {}: {e}", torrent.hash);
                pending.save_error.get_or_insert(e);
            }
        }
        info!("New completed torrent: {} ({})", torrent.hash, torrent.name);

        if let Some(tag) = skip_tag
            && torrent.has_tag(tag)
        {
            info!("The torrent has been tagged \"{}\": no notification will be sent", tag);
            continue;
        }
        pending.announce.push(torrent);
    }

    pending
}

pub fn completed_notice(torrent: &Torrent, free_space: &str) -> String {
    format!(
        "<code>{}</code> completed ({}, free space: {})",
        escape_html(&torrent.name),
        human_readable(torrent.size),
        free_space
    )
}

/// Absorb the torrents already complete at startup so they are never
/// announced.
pub async fn seed_completed(state: &BotState) -> Result<usize, BotError> {
    let completed = state.qbt.online()?.torrents(TorrentFilter::Completed).await?;
    let hashes: Vec<String> = completed.into_iter().map(|t| t.hash).collect();
    Ok(state.completed.lock().await.seed(hashes)?)
}

/// One pass of the job. Returns how many notifications were sent.
pub async fn notify_completed(state: &BotState) -> Result<usize, BotError> {
    debug!("Executing completed job...");
    let qbt = state.qbt.online()?;
    let completed = qbt.torrents(TorrentFilter::Completed).await?;

    let Pending { announce, save_error } = {
        let mut seen = state.completed.lock().await;
        let skip_tag = state.config.notifications.no_notification_tag.as_deref();
        pending_notifications(&mut seen, completed, skip_tag)
    };

    let sent = announce_completed(state, qbt, &announce).await;
    if let Some(e) = save_error {
        return Err(e.into());
    }

    debug!("...completed job executed ({} sent)", sent);
    Ok(sent)
}

async fn announce_completed(state: &BotState, qbt: &QbtClient, announce: &[Torrent]) -> usize {
    if announce.is_empty() {
        return 0;
    }

    let Some(chat_id) = state.config.notifications.completed_torrents else {
        info!("Notifications chat not set in the config file");
        return 0;
    };

    let free_space = match qbt.free_space().await {
        Ok(bytes) => human_readable(bytes),
        Err(e) => {
            warn!("Could not read free space: {e}");
            "unknown".to_string()
        }
    };

    let mut sent = 0;
    for torrent in announce {
        let text = completed_notice(torrent, &free_space);
        if state.config.dry_run {
            info!("[DRY RUN] Would notify {}: {}", chat_id, text);
            continue;
        }
        // the hash is already recorded, a failed send is not retried
        match state.telegram.send_silent(chat_id, &text).await {
            Ok(_) => sent += 1,
            Err(e) => warn!("Failed to notify completion of {}: {e}", torrent.hash),
        }
    }
    sent
}

/// Run one pass, reporting failures to the primary admin. An unreachable
/// daemon is only logged.
async fn run_once(state: &BotState) {
    let err = match notify_completed(state).await {
        Ok(_) => return,
        Err(e) => e,
    };

    if let BotError::Qbt(ref q) = err
        && q.is_offline()
    {
        warn!("Completed job skipped: {err}");
        return;
    }

    warn!("Error while running completed job: {err}");
    if let Some(admin) = state.config.primary_admin() {
        let text = format!(
            "An error occurred while running a job: <code>{}</code>",
            escape_html(&err.to_string())
        );
        state.telegram.send_message(admin.into(), &text, None, None).await.ok();
    }
}

/// Poll on the configured interval, first run one interval after start.
pub fn spawn_completed_job(state: Arc<BotState>) -> JoinHandle<()> {
    let period = state.config.completed_poll_interval;
    info!("Registering completed job (every {}s)", period.as_secs());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            run_once(&state).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn torrent(hash: &str, tags: &str) -> Torrent {
        serde_json::from_value(serde_json::json!({
            "hash": hash,
            "name": format!("name-{hash}"),
            "size": 2048,
            "progress": 1.0,
            "tags": tags,
        }))
        .unwrap()
    }

    fn hashes(pending: &Pending) -> Vec<&str> {
        pending.announce.iter().map(|t| t.hash.as_str()).collect()
    }

    #[test]
    fn test_pending_notifications_once() {
        let dir = TempDir::new().unwrap();
        let mut seen = SeenHashes::open(dir.path().join("completed.json")).unwrap();
        seen.seed(["old"]).unwrap();

        let first = pending_notifications(&mut seen, vec![torrent("old", ""), torrent("new", "")], None);
        assert_eq!(hashes(&first), vec!["new"]);
        assert!(first.save_error.is_none());

        let second = pending_notifications(&mut seen, vec![torrent("old", ""), torrent("new", "")], None);
        assert!(second.announce.is_empty());
    }

    #[test]
    fn test_tagged_torrents_recorded_but_silent() {
        let dir = TempDir::new().unwrap();
        let mut seen = SeenHashes::open(dir.path().join("completed.json")).unwrap();

        let out = pending_notifications(
            &mut seen,
            vec![torrent("a", "Movies, NoNotify"), torrent("b", "movies")],
            Some("nonotify"),
        );

        assert_eq!(hashes(&out), vec!["b"]);
        assert!(seen.contains("a"));
    }

    #[test]
    fn test_failed_saves_still_announce() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("completed.json");
        let mut seen = SeenHashes::open(&path).unwrap();
        seen.seed(["old"]).unwrap();

        // a directory in place of the file makes every write fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let failed = pending_notifications(
            &mut seen,
            vec![torrent("old", ""), torrent("a", ""), torrent("b", "")],
            None,
        );
        assert_eq!(hashes(&failed), vec!["a", "b"]);
        assert!(matches!(failed.save_error, Some(StoreError::Io { .. })));

        std::fs::remove_dir(&path).unwrap();
        let next = pending_notifications(&mut seen, vec![torrent("a", ""), torrent("b", "")], None);
        assert!(next.announce.is_empty());
        assert!(next.save_error.is_none());
    }

    #[test]
    fn test_completed_notice() {
        let mut t = torrent("h", "");
        t.name = "a <b>".into();
        assert_eq!(completed_notice(&t, "10.00 gb"), "<code>a &lt;b&gt;</code> completed (2.00 kb, free space: 10.00 gb)");
    }
}
