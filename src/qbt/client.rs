//! qBittorrent Web API v2 client.

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{QbtError, Torrent, TorrentFilter};

/// Global rates in bytes per second and session totals in bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferInfo {
    pub dl_info_speed: i64,
    pub up_info_speed: i64,
    #[serde(default)]
    pub dl_info_data: i64,
    #[serde(default)]
    pub up_info_data: i64,
}

impl TransferInfo {
    /// Uploaded over downloaded this session, 0 before any download.
    pub fn session_ratio(&self) -> f64 {
        if self.dl_info_data > 0 {
            self.up_info_data as f64 / self.dl_info_data as f64
        } else {
            0.0
        }
    }
}

#[derive(Deserialize)]
struct MainData {
    server_state: ServerState,
}

#[derive(Deserialize)]
struct ServerState {
    #[serde(default)]
    free_space_on_disk: i64,
}

/// Alternative speed limits as the bot shows them. `None` means unlimited.
#[derive(Debug, Clone, PartialEq)]
pub struct AltSpeed {
    pub enabled: bool,
    pub dl_limit: Option<i64>,
    pub up_limit: Option<i64>,
}

/// Authenticated session with a qBittorrent instance.
pub struct QbtClient {
    base_url: String,
    login: String,
    secret: String,
    http: reqwest::Client,
}

impl QbtClient {
    /// Build the HTTP client and log in.
    pub async fn connect(url: &str, login: &str, secret: &str, timeout: Duration) -> Result<Self, QbtError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| QbtError::Http(e.to_string()))?;

        let client = Self {
            base_url: url.trim_end_matches('/').to_string(),
            login: login.to_string(),
            secret: secret.to_string(),
            http,
        };
        client.authenticate().await?;

        info!("Connected to qBittorrent at {}", client.base_url);
        Ok(client)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path)
    }

    async fn authenticate(&self) -> Result<(), QbtError> {
        let response = self
            .http
            .post(self.endpoint("auth/login"))
            // qBittorrent rejects logins without a matching Referer
            .header("Referer", &self.base_url)
            .form(&[("username", self.login.as_str()), ("password", self.secret.as_str())])
            .send()
            .await
            .map_err(QbtError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(QbtError::from_reqwest)?;
        if status.is_success() && body.trim() == "Ok." {
            debug!("qBittorrent login ok");
            Ok(())
        } else {
            Err(QbtError::Auth(format!("{status}: {}", body.trim())))
        }
    }

    /// Send a request built by `build`, logging in again once if the
    /// session cookie was rejected.
    async fn send<F>(&self, path: &str, build: F) -> Result<reqwest::Response, QbtError>
    where
        F: Fn(&reqwest::Client, String) -> reqwest::RequestBuilder,
    {
        let mut response = build(&self.http, self.endpoint(path))
            .send()
            .await
            .map_err(QbtError::from_reqwest)?;

        if response.status() == StatusCode::FORBIDDEN {
            warn!("qBittorrent session expired, logging in again");
            self.authenticate().await?;
            response = build(&self.http, self.endpoint(path))
                .send()
                .await
                .map_err(QbtError::from_reqwest)?;
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(QbtError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QbtError::Api(format!("{status}: {}", body.trim())));
        }
        Ok(response)
    }

    async fn get_text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, QbtError> {
        self.send(path, |http, url| http.get(url).query(query))
            .await?
            .text()
            .await
            .map_err(QbtError::from_reqwest)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, QbtError> {
        let body = self.get_text(path, query).await?;
        serde_json::from_str(&body).map_err(|e| QbtError::Parse(format!("{path}: {e}")))
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<String, QbtError> {
        self.send(path, |http, url| http.post(url).form(form))
            .await?
            .text()
            .await
            .map_err(QbtError::from_reqwest)
    }

    /// Post to `path`, falling back to `fallback` on servers that renamed
    /// the endpoint (v5 calls pause/resume stop/start).
    async fn post_renamed(&self, path: &str, fallback: &str, form: &[(&str, &str)]) -> Result<String, QbtError> {
        match self.post(path, form).await {
            Err(QbtError::NotFound(_)) => self.post(fallback, form).await,
            other => other,
        }
    }

    pub async fn version(&self) -> Result<String, QbtError> {
        self.get_text("app/version", &[]).await
    }

    pub async fn torrents(&self, filter: TorrentFilter) -> Result<Vec<Torrent>, QbtError> {
        self.get_json("torrents/info", &[("filter", filter.as_str()), ("sort", "dlspeed")]).await
    }

    pub async fn torrent(&self, hash: &str) -> Result<Torrent, QbtError> {
        let found: Vec<Torrent> = self.get_json("torrents/info", &[("hashes", hash)]).await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| QbtError::Api(format!("no torrent with hash {hash}")))
    }

    /// Torrents whose name contains `query`, case-insensitively.
    pub async fn search(&self, query: &str) -> Result<Vec<Torrent>, QbtError> {
        let query = query.to_lowercase();
        let all = self.torrents(TorrentFilter::All).await?;
        Ok(all.into_iter().filter(|t| t.name.to_lowercase().contains(&query)).collect())
    }

    pub async fn pause(&self, hashes: &[&str]) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        self.post_renamed("torrents/pause", "torrents/stop", &[("hashes", &hashes)]).await?;
        Ok(())
    }

    pub async fn resume(&self, hashes: &[&str]) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        self.post_renamed("torrents/resume", "torrents/start", &[("hashes", &hashes)]).await?;
        Ok(())
    }

    pub async fn pause_all(&self) -> Result<(), QbtError> {
        self.pause(&["all"]).await
    }

    pub async fn resume_all(&self) -> Result<(), QbtError> {
        self.resume(&["all"]).await
    }

    pub async fn delete(&self, hashes: &[&str], delete_files: bool) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        let delete_files = if delete_files { "true" } else { "false" };
        self.post("torrents/delete", &[("hashes", &hashes), ("deleteFiles", delete_files)]).await?;
        Ok(())
    }

    pub async fn recheck(&self, hashes: &[&str]) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        self.post("torrents/recheck", &[("hashes", &hashes)]).await?;
        Ok(())
    }

    pub async fn set_force_start(&self, hashes: &[&str], value: bool) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        let value = if value { "true" } else { "false" };
        self.post("torrents/setForceStart", &[("hashes", &hashes), ("value", value)]).await?;
        Ok(())
    }

    pub async fn top_priority(&self, hashes: &[&str]) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        self.post("torrents/topPrio", &[("hashes", &hashes)]).await?;
        Ok(())
    }

    pub async fn add_tags(&self, hashes: &[&str], tags: &[&str]) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        let tags = tags.join(",");
        self.post("torrents/addTags", &[("hashes", &hashes), ("tags", &tags)]).await?;
        Ok(())
    }

    pub async fn remove_tags(&self, hashes: &[&str], tags: &[&str]) -> Result<(), QbtError> {
        let hashes = join_hashes(hashes);
        let tags = tags.join(",");
        self.post("torrents/removeTags", &[("hashes", &hashes), ("tags", &tags)]).await?;
        Ok(())
    }

    /// Add torrents by magnet link or http(s) URL. qBittorrent answers
    /// `Fails.` when the torrent is already there or the link is invalid.
    pub async fn add_urls(&self, urls: &str) -> Result<(), QbtError> {
        let urls = urls.to_string();
        let body = self
            .send("torrents/add", |http, url| {
                http.post(url).multipart(Form::new().text("urls", urls.clone()))
            })
            .await?
            .text()
            .await
            .map_err(QbtError::from_reqwest)?;

        check_ok(&body, "torrent already added or invalid link")
    }

    /// Upload a `.torrent` file as the `torrents` multipart part.
    pub async fn add_torrent_file(&self, file_name: &str, data: Vec<u8>) -> Result<(), QbtError> {
        let file_name = file_name.to_string();
        let body = self
            .send("torrents/add", |http, url| {
                let part = Part::bytes(data.clone()).file_name(file_name.clone());
                http.post(url).multipart(Form::new().part("torrents", part))
            })
            .await?
            .text()
            .await
            .map_err(QbtError::from_reqwest)?;

        check_ok(&body, "torrent already added or invalid file")
    }

    pub async fn preferences(&self) -> Result<Map<String, Value>, QbtError> {
        self.get_json("app/preferences", &[]).await
    }

    pub async fn set_preferences(&self, prefs: &Map<String, Value>) -> Result<(), QbtError> {
        let json = serde_json::to_string(prefs).map_err(|e| QbtError::Parse(e.to_string()))?;
        self.post("app/setPreferences", &[("json", &json)]).await?;
        Ok(())
    }

    /// Change a single preference, refusing keys the daemon does not know.
    pub async fn set_preference(&self, key: &str, value: Value) -> Result<(), QbtError> {
        let current = self.preferences().await?;
        if !current.contains_key(key) {
            return Err(QbtError::Api(format!("unknown preference '{key}'")));
        }

        let mut prefs = Map::new();
        prefs.insert(key.to_string(), value);
        self.set_preferences(&prefs).await
    }

    pub async fn speed_limits_mode(&self) -> Result<bool, QbtError> {
        Ok(self.get_text("transfer/speedLimitsMode", &[]).await?.trim() == "1")
    }

    /// Switch the alternative speed limits on or off. Returns whether the
    /// mode actually changed.
    pub async fn set_alt_speed(&self, enabled: bool) -> Result<bool, QbtError> {
        if self.speed_limits_mode().await? == enabled {
            return Ok(false);
        }
        self.post("transfer/toggleSpeedLimitsMode", &[]).await?;
        Ok(true)
    }

    pub async fn alt_speed(&self) -> Result<AltSpeed, QbtError> {
        let prefs = self.preferences().await?;
        let limit = |key: &str| prefs.get(key).and_then(Value::as_i64).filter(|l| *l > 0);

        Ok(AltSpeed {
            enabled: self.speed_limits_mode().await?,
            dl_limit: limit("alt_dl_limit"),
            up_limit: limit("alt_up_limit"),
        })
    }

    /// Set an alternative limit in kb/s (`alt_dl_limit` / `alt_up_limit`).
    pub async fn set_alt_limit(&self, key: AltLimit, kbs: u32) -> Result<(), QbtError> {
        let mut prefs = Map::new();
        // the API takes bytes per second
        prefs.insert(key.as_str().to_string(), Value::from(u64::from(kbs) * 1024));
        self.set_preferences(&prefs).await
    }

    pub async fn transfer_info(&self) -> Result<TransferInfo, QbtError> {
        self.get_json("transfer/info", &[]).await
    }

    /// Free space in bytes on the disk holding the default save path.
    pub async fn free_space(&self) -> Result<i64, QbtError> {
        let data: MainData = self.get_json("sync/maindata", &[("rid", "0")]).await?;
        Ok(data.server_state.free_space_on_disk)
    }

    pub async fn default_save_path(&self) -> Result<String, QbtError> {
        self.get_text("app/defaultSavePath", &[]).await
    }
}

/// Which alternative limit to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltLimit {
    Download,
    Upload,
}

impl AltLimit {
    pub fn as_str(&self) -> &'static str {
        match self {
            AltLimit::Download => "alt_dl_limit",
            AltLimit::Upload => "alt_up_limit",
        }
    }
}

fn join_hashes(hashes: &[&str]) -> String {
    hashes.join("|")
}

fn check_ok(body: &str, failure: &str) -> Result<(), QbtError> {
    match body.trim() {
        "Fails." => Err(QbtError::Api(failure.to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_hashes() {
        assert_eq!(join_hashes(&["a", "b", "c"]), "a|b|c");
        assert_eq!(join_hashes(&["all"]), "all");
    }

    #[test]
    fn test_check_ok() {
        assert!(check_ok("Ok.", "x").is_ok());
        assert!(check_ok("", "x").is_ok());
        let err = check_ok("Fails.\n", "already there").unwrap_err();
        assert!(matches!(err, QbtError::Api(ref m) if m == "already there"));
    }

    #[test]
    fn test_alt_limit_keys() {
        assert_eq!(AltLimit::Download.as_str(), "alt_dl_limit");
        assert_eq!(AltLimit::Upload.as_str(), "alt_up_limit");
    }

    #[test]
    fn test_maindata_free_space() {
        let data: MainData = serde_json::from_str(
            r#"{"rid": 1, "server_state": {"free_space_on_disk": 123456, "dl_info_speed": 0}}"#,
        )
        .unwrap();
        assert_eq!(data.server_state.free_space_on_disk, 123456);
    }

    #[test]
    fn test_transfer_info() {
        let info: TransferInfo =
            serde_json::from_str(r#"{"dl_info_speed": 10, "up_info_speed": 20, "connection_status": "connected"}"#)
                .unwrap();
        assert_eq!(info.dl_info_speed, 10);
        assert_eq!(info.up_info_speed, 20);
        assert_eq!(info.session_ratio(), 0.0);

        let info: TransferInfo = serde_json::from_str(
            r#"{"dl_info_speed": 0, "up_info_speed": 0, "dl_info_data": 400, "up_info_data": 100}"#,
        )
        .unwrap();
        assert_eq!(info.session_ratio(), 0.25);
    }
}
