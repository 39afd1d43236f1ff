//! Supabase persistence adapter.
//!
//! A blocking REST client plus a dedicated worker thread. The tick loop never
//! performs HTTP itself: it enqueues [`PersistJob`]s over an `mpsc` channel
//! and the worker replies through the server message channel where a reply
//! matters (token verification). Every HTTP or JSON failure is logged and
//! degrades to an empty result; in-memory state stays canonical and the
//! server never aborts because persistence misbehaved.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;

use crate::net::{AuthOutcome, ServerMessage};
use crate::world::{self, Computer, Mission, World};

/// Row shape of the `players` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerProfile {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub auth_id: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub uplink_rating: i16,
    #[serde(default)]
    pub neuromancer_rating: i16,
}

/// Row shape of the `computers` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComputerRow {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub company_id: i32,
    #[serde(default)]
    pub computer_type: i16,
    #[serde(default)]
    pub security_level: i16,
    #[serde(default)]
    pub is_running: bool,
}

/// Row shape of the `missions` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionRow {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub mission_type: i16,
    #[serde(default)]
    pub target_ip: String,
    #[serde(default)]
    pub employer_id: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payment: i32,
    #[serde(default)]
    pub max_payment: i32,
    #[serde(default)]
    pub difficulty: i16,
    #[serde(default)]
    pub min_rating: i16,
    #[serde(default)]
    pub claimed_by: Option<i32>,
    #[serde(default)]
    pub completed: bool,
}

/// Blocking HTTPS client for the Supabase REST and auth endpoints.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    http: reqwest::blocking::Client,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http,
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        bearer: &str,
    ) -> reqwest::blocking::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Content-Type", "application/json")
    }

    /// Verifies a JWT against the auth endpoint. Returns the auth id on
    /// HTTP 200, `None` for anything else.
    pub fn verify_token(&self, jwt: &str) -> Option<String> {
        let response = self
            .request(reqwest::Method::GET, "/auth/v1/user", jwt)
            .send()
            .map_err(|e| log::warn!("verify_token request failed: {e}"))
            .ok()?;

        if response.status() != reqwest::StatusCode::OK {
            log::warn!("verify_token rejected: {}", response.status());
            return None;
        }

        let body: serde_json::Value = response
            .json()
            .map_err(|e| log::warn!("verify_token parse error: {e}"))
            .ok()?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Password login; returns the access token.
    pub fn login(&self, email: &str, password: &str) -> Option<String> {
        let response = self
            .request(
                reqwest::Method::POST,
                "/auth/v1/token?grant_type=password",
                &self.anon_key,
            )
            .json(&json!({ "email": email, "password": password }))
            .send()
            .map_err(|e| log::warn!("login request failed: {e}"))
            .ok()?;

        if response.status() != reqwest::StatusCode::OK {
            log::warn!("login failed: {}", response.status());
            return None;
        }

        let body: serde_json::Value = response
            .json()
            .map_err(|e| log::warn!("login parse error: {e}"))
            .ok()?;
        body.get("access_token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Account signup; returns the new auth id.
    pub fn sign_up(&self, email: &str, password: &str, handle: &str) -> Option<String> {
        let response = self
            .request(reqwest::Method::POST, "/auth/v1/signup", &self.anon_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "handle": handle },
            }))
            .send()
            .map_err(|e| log::warn!("sign_up request failed: {e}"))
            .ok()?;

        if response.status() != reqwest::StatusCode::OK {
            log::warn!("sign_up failed: {}", response.status());
            return None;
        }

        let body: serde_json::Value = response
            .json()
            .map_err(|e| log::warn!("sign_up parse error: {e}"))
            .ok()?;
        // The id is sometimes nested under "user".
        body.get("id")
            .or_else(|| body.get("user").and_then(|u| u.get("id")))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn get_player_profile(&self, auth_id: &str, bearer: &str) -> Option<PlayerProfile> {
        let path = format!("/rest/v1/players?auth_id=eq.{auth_id}&select=*");
        let response = self
            .request(reqwest::Method::GET, &path, bearer)
            .send()
            .map_err(|e| log::warn!("get_player_profile request failed: {e}"))
            .ok()?;

        if response.status() != reqwest::StatusCode::OK {
            log::warn!("get_player_profile failed: {}", response.status());
            return None;
        }

        let rows: Vec<PlayerProfile> = response
            .json()
            .map_err(|e| log::warn!("get_player_profile parse error: {e}"))
            .ok()?;
        rows.into_iter().next()
    }

    pub fn create_player_profile(&self, auth_id: &str, handle: &str, bearer: &str) -> bool {
        let body = json!({
            "auth_id": auth_id,
            "handle": handle,
            "credits": crate::session::DEFAULT_CREDITS,
            "uplink_rating": crate::session::DEFAULT_UPLINK_RATING,
            "neuromancer_rating": crate::session::DEFAULT_NEUROMANCER_RATING,
        });
        let bearer = if bearer.is_empty() { &self.anon_key } else { bearer };
        match self
            .request(reqwest::Method::POST, "/rest/v1/players", bearer)
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
        {
            Ok(response) if response.status() == reqwest::StatusCode::CREATED => true,
            Ok(response) => {
                log::warn!("create_player_profile failed: {}", response.status());
                false
            }
            Err(e) => {
                log::warn!("create_player_profile request failed: {e}");
                false
            }
        }
    }

    pub fn update_player_profile(&self, profile: &PlayerProfile, bearer: Option<&str>) -> bool {
        if profile.id == 0 {
            return false;
        }
        let path = format!("/rest/v1/players?id=eq.{}", profile.id);
        let body = json!({
            "credits": profile.credits,
            "uplink_rating": profile.uplink_rating,
            "neuromancer_rating": profile.neuromancer_rating,
        });
        let bearer = bearer.filter(|t| !t.is_empty()).unwrap_or(&self.anon_key);
        self.patch(&path, body, bearer)
    }

    pub fn get_all_computers(&self) -> Vec<ComputerRow> {
        self.fetch_rows("/rest/v1/computers?select=*")
    }

    pub fn get_all_missions(&self) -> Vec<MissionRow> {
        self.fetch_rows("/rest/v1/missions?select=*")
    }

    pub fn get_unclaimed_missions(&self) -> Vec<MissionRow> {
        self.fetch_rows("/rest/v1/missions?claimed_by=is.null&completed=eq.false")
    }

    pub fn update_computer(&self, id: i32, is_running: bool, security_level: i16) -> bool {
        let path = format!("/rest/v1/computers?id=eq.{id}");
        let body = json!({ "is_running": is_running, "security_level": security_level });
        self.patch(&path, body, &self.anon_key)
    }

    pub fn update_mission(&self, id: i32, claimed_by: i32, completed: bool) -> bool {
        let path = format!("/rest/v1/missions?id=eq.{id}");
        let claimed: serde_json::Value = if claimed_by == 0 {
            serde_json::Value::Null
        } else {
            claimed_by.into()
        };
        let body = json!({ "claimed_by": claimed, "completed": completed });
        self.patch(&path, body, &self.anon_key)
    }

    fn fetch_rows<T: serde::de::DeserializeOwned>(&self, path: &str) -> Vec<T> {
        let response = match self.request(reqwest::Method::GET, path, &self.anon_key).send() {
            Ok(response) => response,
            Err(e) => {
                log::warn!("GET {path} failed: {e}");
                return Vec::new();
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            log::warn!("GET {path} failed: {}", response.status());
            return Vec::new();
        }
        response.json().unwrap_or_else(|e| {
            log::warn!("GET {path} parse error: {e}");
            Vec::new()
        })
    }

    fn patch(&self, path: &str, body: serde_json::Value, bearer: &str) -> bool {
        match self
            .request(reqwest::Method::PATCH, path, bearer)
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
        {
            Ok(response)
                if response.status() == reqwest::StatusCode::OK
                    || response.status() == reqwest::StatusCode::NO_CONTENT =>
            {
                true
            }
            Ok(response) => {
                log::warn!("PATCH {path} failed: {}", response.status());
                false
            }
            Err(e) => {
                log::warn!("PATCH {path} request failed: {e}");
                false
            }
        }
    }
}

/// Startup bulk load: computers and missions into a fresh world store.
pub fn load_world(client: &SupabaseClient) -> World {
    let mut world = World::new();

    let computers = client.get_all_computers();
    for row in computers {
        let Some(ip) = world::parse_ip(&row.ip) else {
            log::warn!("skipping computer {} with bad ip {:?}", row.id, row.ip);
            continue;
        };
        world.insert_computer(Computer {
            id: row.id,
            ip,
            ip_string: row.ip,
            name: row.name,
            company_id: row.company_id,
            kind: row.computer_type,
            security_level: row.security_level,
            running: row.is_running,
            proxy_bypassed: false,
            firewall_bypassed: false,
            monitor_disabled: false,
            connected_sessions: Vec::new(),
        });
    }
    log::info!("loaded {} computers", world.computers().len());

    let missions = client.get_all_missions();
    let mission_count = missions.len();
    for row in missions {
        let target_ip = world::parse_ip(&row.target_ip).unwrap_or(0);
        world.insert_mission(Mission {
            id: row.id,
            kind: row.mission_type,
            target_ip,
            employer_id: row.employer_id,
            description: row.description,
            payment: row.payment,
            max_payment: row.max_payment,
            difficulty: row.difficulty,
            min_rating: row.min_rating,
            claimed_by: row.claimed_by.unwrap_or(0),
            completed: row.completed,
        });
    }
    log::info!("loaded {mission_count} missions");

    world.mark_clean();
    world
}

/// A unit of work for the persistence worker.
#[derive(Debug)]
pub enum PersistJob {
    /// Verify a handshake token and fetch the player's profile. The worker
    /// answers with [`ServerMessage::AuthResult`].
    VerifyToken { conn_id: u32, token: String },
    CreateProfile {
        auth_id: String,
        handle: String,
        token: String,
    },
    UpdateProfile {
        profile: PlayerProfile,
        token: Option<String>,
    },
    UpdateComputer {
        id: i32,
        is_running: bool,
        security_level: i16,
    },
    UpdateMission {
        id: i32,
        claimed_by: i32,
        completed: bool,
    },
    Shutdown,
}

/// Handle for the persistence worker thread.
///
/// The tick loop enqueues jobs and continues immediately; nothing here ever
/// blocks the caller except the final join on shutdown.
pub struct PersistWorker {
    tx: mpsc::Sender<PersistJob>,
    handle: Option<JoinHandle<()>>,
}

impl PersistWorker {
    /// Spawns the worker. With no client configured the worker still answers
    /// verification jobs (always rejected) so the tick loop never waits on a
    /// reply that cannot come.
    pub fn spawn(client: Option<SupabaseClient>, replies: UnboundedSender<ServerMessage>) -> Self {
        let (tx, rx) = mpsc::channel::<PersistJob>();

        let handle = thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    PersistJob::VerifyToken { conn_id, token } => {
                        let outcome = match &client {
                            Some(client) => match client.verify_token(&token) {
                                Some(auth_id) => {
                                    let profile = client.get_player_profile(&auth_id, &token);
                                    AuthOutcome::Verified { auth_id, profile }
                                }
                                None => AuthOutcome::Rejected,
                            },
                            None => AuthOutcome::Rejected,
                        };
                        let _ = replies.send(ServerMessage::AuthResult { conn_id, outcome });
                    }
                    PersistJob::CreateProfile {
                        auth_id,
                        handle,
                        token,
                    } => {
                        if let Some(client) = &client {
                            client.create_player_profile(&auth_id, &handle, &token);
                        }
                    }
                    PersistJob::UpdateProfile { profile, token } => {
                        if let Some(client) = &client {
                            client.update_player_profile(&profile, token.as_deref());
                        }
                    }
                    PersistJob::UpdateComputer {
                        id,
                        is_running,
                        security_level,
                    } => {
                        if let Some(client) = &client {
                            client.update_computer(id, is_running, security_level);
                        }
                    }
                    PersistJob::UpdateMission {
                        id,
                        claimed_by,
                        completed,
                    } => {
                        if let Some(client) = &client {
                            client.update_mission(id, claimed_by, completed);
                        }
                    }
                    PersistJob::Shutdown => break,
                }
            }
        });

        Self {
            tx,
            handle: Some(handle),
        }
    }

    pub fn send(&self, job: PersistJob) {
        if self.tx.send(job).is_err() {
            log::error!("persistence worker is gone, dropping job");
        }
    }

    /// Drains the queue and joins the worker thread.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(PersistJob::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
