//! Read-only views over a donation session
//!
//! Clients poll [`DonationStatus`]; nothing here writes to storage. Live
//! accrual figures are evaluated at projection time, while `queue_results`
//! is the snapshot frozen when the queue was stopped and is never recomputed.

use crate::clock::format_hms;
use crate::db::models::Donation;
use crate::db::QueueRow;
use crate::donation::accrual::accrual_at;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Builds avatar image links from Habbo nicknames
#[derive(Debug, Clone)]
pub struct AvatarResolver {
    base: Url,
}

impl AvatarResolver {
    /// `base_url` is the imaging endpoint, e.g.
    /// `https://www.habbo.es/habbo-imaging/avatarimage`
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| crate::errors::AppError::Configuration {
            message: format!("invalid avatar base url {}: {}", base_url, e),
        })?;
        Ok(Self { base })
    }

    pub fn avatar_url(&self, nickname: &str) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("user", nickname)
            .append_pair("direction", "2")
            .append_pair("head_direction", "3")
            .append_pair("headonly", "1")
            .append_pair("size", "m");
        url.into()
    }
}

/// A participant currently waiting in the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryView {
    pub position: u32,
    pub user_id: Uuid,
    pub nickname: String,
    pub avatar_url: String,
    pub joined_at: DateTime<Utc>,
    pub cambios_earned: i64,
    pub next_cambio_in: i64,
}

/// Final position of a participant when the queue closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub position: u32,
    pub user_id: Uuid,
    pub nickname: String,
    pub avatar_url: String,
    pub cambios_earned: i64,
    pub queued_seconds: i64,
    /// Session running time at the moment the queue closed
    pub session_elapsed: String,
}

/// Everything a polling client needs to render the donation page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationStatus {
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<String>,
    pub queue_stopped: bool,
    pub queue_paused: bool,
    pub queue: Vec<QueueEntryView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_results: Option<Vec<Standing>>,
}

impl DonationStatus {
    /// Status when no session is running
    pub fn offline() -> Self {
        Self {
            is_live: false,
            session_id: None,
            start_time: None,
            elapsed_time: None,
            queue_stopped: false,
            queue_paused: false,
            queue: Vec::new(),
            current_code: None,
            queue_results: None,
        }
    }

    /// Participant-facing copy with the redemption code removed
    pub fn without_code(mut self) -> Self {
        self.current_code = None;
        self
    }
}

/// Assemble the status of `donation` at `now`
pub fn project(
    donation: &Donation,
    queue: &[QueueRow],
    now: DateTime<Utc>,
    avatars: &AvatarResolver,
) -> Result<DonationStatus> {
    let start_time = donation.start_time.with_timezone(&Utc);

    let queue = queue
        .iter()
        .enumerate()
        .map(|(index, row)| entry_view(row, index as u32 + 1, now, avatars))
        .collect();

    let queue_results = if donation.queue_stopped {
        Some(stored_standings(donation)?)
    } else {
        None
    };

    Ok(DonationStatus {
        is_live: donation.is_active,
        session_id: Some(donation.id),
        start_time: Some(start_time),
        elapsed_time: Some(format_hms(now - start_time)),
        queue_stopped: donation.queue_stopped,
        queue_paused: donation.queue_paused,
        queue,
        current_code: donation.current_code.clone(),
        queue_results,
    })
}

/// View of a single queued participant at `position`
pub fn entry_view(
    row: &QueueRow,
    position: u32,
    now: DateTime<Utc>,
    avatars: &AvatarResolver,
) -> QueueEntryView {
    let joined_at = row.entry.joined_at.with_timezone(&Utc);
    let accrual = accrual_at(joined_at, now);
    let nickname = row.nickname();
    QueueEntryView {
        position,
        user_id: row.entry.user_id,
        avatar_url: avatars.avatar_url(&nickname),
        nickname,
        joined_at,
        cambios_earned: accrual.earned,
        next_cambio_in: accrual.seconds_to_next,
    }
}

/// Standings for every row of `queue`, ranked by join order, at `now`
pub fn compute_standings(
    donation: &Donation,
    queue: &[QueueRow],
    now: DateTime<Utc>,
    avatars: &AvatarResolver,
) -> Vec<Standing> {
    let session_elapsed = format_hms(now - donation.start_time.with_timezone(&Utc));

    queue
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let joined_at = row.entry.joined_at.with_timezone(&Utc);
            let nickname = row.nickname();
            Standing {
                position: index as u32 + 1,
                user_id: row.entry.user_id,
                avatar_url: avatars.avatar_url(&nickname),
                nickname,
                cambios_earned: accrual_at(joined_at, now).earned,
                queued_seconds: (now - joined_at).num_seconds().max(0),
                session_elapsed: session_elapsed.clone(),
            }
        })
        .collect()
}

/// The snapshot stored at stop time; empty when none was recorded
pub fn stored_standings(donation: &Donation) -> Result<Vec<Standing>> {
    match &donation.queue_results {
        Some(json) => Ok(serde_json::from_value(json.clone())?),
        None => Ok(Vec::new()),
    }
}
