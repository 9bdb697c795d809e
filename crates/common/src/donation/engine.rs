//! Donation session lifecycle
//!
//! `NoActiveSession -> Active -> Active(queue stopped) -> Ended`
//!
//! Each operation checks its preconditions and performs its writes inside a
//! single transaction, so a failure at any point leaves storage untouched.
//! Participation credit happens in the same transaction that deletes the
//! queue rows it was computed from; a later EndSession therefore finds an
//! empty queue and cannot credit anyone twice.

use crate::clock::Clock;
use crate::db::models::*;
use crate::db::{repository, Repository};
use crate::donation::code;
use crate::donation::status::{self, AvatarResolver, DonationStatus, QueueEntryView, Standing};
use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, IntoActiveModel, Set};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs donation sessions, their queue and the redemption code
#[derive(Clone)]
pub struct DonationEngine {
    repo: Repository,
    clock: Arc<dyn Clock>,
    avatars: AvatarResolver,
}

impl DonationEngine {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>, avatars: AvatarResolver) -> Self {
        Self {
            repo,
            clock,
            avatars,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn stamp(now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.into()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Open a new donation session
    pub async fn start_session(&self) -> Result<Donation> {
        let now = self.now();
        let txn = self.repo.begin().await?;

        if repository::active_donation(&txn, true).await?.is_some() {
            return Err(AppError::SessionAlreadyRunning);
        }

        let donation = DonationActiveModel {
            id: Set(Uuid::new_v4()),
            start_time: Set(Self::stamp(now)),
            end_time: Set(None),
            is_active: Set(true),
            current_code: Set(None),
            queue_stopped: Set(false),
            queue_paused: Set(false),
            queue_results: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::from_unique_violation(e, AppError::SessionAlreadyRunning))?;

        txn.commit().await?;

        metrics::record_session_started();
        info!(donation_id = %donation.id, "Donation session started");
        Ok(donation)
    }

    /// Issue a fresh redemption code, replacing any unredeemed one
    pub async fn generate_code(&self) -> Result<String> {
        let txn = self.repo.begin().await?;

        let donation = repository::active_donation(&txn, true)
            .await?
            .ok_or(AppError::NoActiveSession)?;

        let taken: HashSet<String> = repository::active_codes_excluding(&txn, donation.id)
            .await?
            .into_iter()
            .collect();
        let code = {
            let mut rng = rand::thread_rng();
            code::generate_unique_code(&mut rng, |candidate| taken.contains(candidate))
        };

        let donation_id = donation.id;
        let mut active = donation.into_active_model();
        active.current_code = Set(Some(code.clone()));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(donation_id = %donation_id, "Redemption code issued");
        Ok(code)
    }

    /// Pause or resume joining. Entries already queued keep accruing.
    pub async fn pause_queue(&self, paused: bool) -> Result<()> {
        let txn = self.repo.begin().await?;

        let donation = repository::active_donation(&txn, true)
            .await?
            .ok_or(AppError::NoActiveSession)?;

        if donation.queue_stopped {
            return Err(AppError::QueueAlreadyStopped);
        }

        if donation.queue_paused != paused {
            let donation_id = donation.id;
            let mut active = donation.into_active_model();
            active.queue_paused = Set(paused);
            active.update(&txn).await?;
            txn.commit().await?;
            info!(donation_id = %donation_id, paused, "Queue pause toggled");
        }

        Ok(())
    }

    // ========================================================================
    // Queue membership
    // ========================================================================

    /// Put `user_id` at the back of the queue
    pub async fn join_queue(&self, user_id: Uuid) -> Result<QueueEntry> {
        let now = self.now();
        let txn = self.repo.begin().await?;

        let donation = repository::active_donation(&txn, true)
            .await?
            .ok_or(AppError::NoActiveSession)?;

        if donation.queue_stopped {
            return Err(AppError::QueueClosed);
        }
        if donation.queue_paused {
            return Err(AppError::QueuePaused);
        }

        UserEntity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource_type: "user".to_string(),
                id: user_id.to_string(),
            })?;

        if repository::find_entry(&txn, donation.id, user_id).await?.is_some() {
            return Err(AppError::AlreadyInQueue);
        }

        let entry = QueueEntryActiveModel {
            id: Set(Uuid::new_v4()),
            donation_id: Set(donation.id),
            user_id: Set(user_id),
            joined_at: Set(Self::stamp(now)),
            cambios_earned: Set(0),
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::from_unique_violation(e, AppError::AlreadyInQueue))?;

        txn.commit().await?;

        metrics::record_queue_join();
        info!(donation_id = %donation.id, user_id = %user_id, "Joined donation queue");
        Ok(entry)
    }

    /// Leave the queue. Whatever was accrued is forfeited.
    pub async fn leave_queue(&self, user_id: Uuid) -> Result<()> {
        let txn = self.repo.begin().await?;

        let donation = repository::active_donation(&txn, true)
            .await?
            .ok_or(AppError::NoActiveSession)?;

        if !repository::delete_entry(&txn, donation.id, user_id).await? {
            return Err(AppError::NotInQueue);
        }

        txn.commit().await?;

        metrics::record_queue_leave();
        info!(donation_id = %donation.id, user_id = %user_id, "Left donation queue");
        Ok(())
    }

    // ========================================================================
    // Redemption
    // ========================================================================

    /// Redeem the active code for one participation
    pub async fn redeem_code(&self, user_id: Uuid, submitted: &str) -> Result<()> {
        if submitted.trim().is_empty() {
            return Err(AppError::MissingField {
                field: "code".to_string(),
            });
        }

        let txn = self.repo.begin().await?;

        let donation = repository::active_donation(&txn, true)
            .await?
            .ok_or(AppError::NoActiveSession)?;

        let active_code = donation.current_code.as_deref().ok_or(AppError::NoActiveCode)?;
        if !code::codes_match(active_code, submitted) {
            return Err(AppError::InvalidCode);
        }

        // Conditional clear: a concurrent redemption that got there first
        // leaves nothing to consume.
        if !repository::consume_code(&txn, donation.id, active_code).await? {
            return Err(AppError::NoActiveCode);
        }

        if repository::credit_participations(&txn, &[user_id]).await? == 0 {
            return Err(AppError::NotFound {
                resource_type: "user".to_string(),
                id: user_id.to_string(),
            });
        }

        txn.commit().await?;

        metrics::record_code_redeemed();
        info!(donation_id = %donation.id, user_id = %user_id, "Redemption code redeemed");
        Ok(())
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Freeze the standings, credit every participant once and empty the queue
    pub async fn stop_queue(&self) -> Result<Vec<Standing>> {
        let now = self.now();
        let txn = self.repo.begin().await?;

        let donation = repository::active_donation(&txn, true)
            .await?
            .ok_or(AppError::NoActiveSession)?;

        if donation.queue_stopped {
            return Err(AppError::QueueAlreadyStopped);
        }

        let standings = self.close_queue(&txn, &donation, now).await?;

        let donation_id = donation.id;
        let mut active = donation.into_active_model();
        active.queue_stopped = Set(true);
        active.queue_paused = Set(false);
        active.queue_results = Set(Some(serde_json::to_value(&standings)?));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(
            donation_id = %donation_id,
            participants = standings.len(),
            "Donation queue stopped"
        );
        Ok(standings)
    }

    /// Close the session. Stops the queue first if that has not happened;
    /// otherwise returns the standings frozen by the earlier stop.
    pub async fn end_session(&self) -> Result<Vec<Standing>> {
        let now = self.now();
        let txn = self.repo.begin().await?;

        let donation = repository::active_donation(&txn, true)
            .await?
            .ok_or(AppError::NoActiveSession)?;

        let already_stopped = donation.queue_stopped;
        let standings = if already_stopped {
            status::stored_standings(&donation)?
        } else {
            self.close_queue(&txn, &donation, now).await?
        };

        let donation_id = donation.id;
        let mut active = donation.into_active_model();
        if !already_stopped {
            active.queue_results = Set(Some(serde_json::to_value(&standings)?));
        }
        active.queue_stopped = Set(true);
        active.queue_paused = Set(false);
        active.is_active = Set(false);
        active.end_time = Set(Some(Self::stamp(now)));
        active.current_code = Set(None);
        active.update(&txn).await?;

        txn.commit().await?;

        info!(
            donation_id = %donation_id,
            participants = standings.len(),
            already_stopped,
            "Donation session ended"
        );
        Ok(standings)
    }

    /// Compute standings from the current queue, credit each participant and
    /// delete the rows. Must run inside the caller's transaction.
    async fn close_queue<C: ConnectionTrait>(
        &self,
        conn: &C,
        donation: &Donation,
        now: DateTime<Utc>,
    ) -> Result<Vec<Standing>> {
        let queue = repository::queue_with_users(conn, donation.id).await?;
        let standings = status::compute_standings(donation, &queue, now, &self.avatars);

        let user_ids: Vec<Uuid> = queue.iter().map(|row| row.entry.user_id).collect();
        let credited = repository::credit_participations(conn, &user_ids).await?;
        if credited != user_ids.len() as u64 {
            warn!(
                donation_id = %donation.id,
                expected = user_ids.len(),
                credited,
                "Some queued participants no longer exist"
            );
        }

        repository::clear_queue(conn, donation.id).await?;

        metrics::record_participations_credited(credited);
        Ok(standings)
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Current status, including the redemption code
    pub async fn status(&self) -> Result<DonationStatus> {
        let now = self.now();
        let txn = self.repo.begin_snapshot().await?;

        let donation = match repository::active_donation(&txn, false).await? {
            Some(donation) => donation,
            None => return Ok(DonationStatus::offline()),
        };

        let queue = repository::queue_with_users(&txn, donation.id).await?;
        txn.commit().await?;
        metrics::set_queue_size(queue.len());

        status::project(&donation, &queue, now, &self.avatars)
    }

    /// The caller's own queue entry, if queued
    pub async fn my_entry(&self, user_id: Uuid) -> Result<Option<QueueEntryView>> {
        let now = self.now();
        let txn = self.repo.begin_snapshot().await?;

        let donation = match repository::active_donation(&txn, false).await? {
            Some(donation) => donation,
            None => return Ok(None),
        };

        let row = match repository::find_row(&txn, donation.id, user_id).await? {
            Some(row) => row,
            None => return Ok(None),
        };
        let ahead = repository::entries_ahead(&txn, &row.entry).await?;
        txn.commit().await?;

        Ok(Some(status::entry_view(&row, ahead as u32 + 1, now, &self.avatars)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::testing::memory_pool;
    use crate::errors::ErrorKind;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        engine: DonationEngine,
        clock: ManualClock,
    }

    impl Harness {
        async fn new() -> Self {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap());
            let repo = Repository::new(memory_pool().await);
            let avatars =
                AvatarResolver::new("https://www.habbo.es/habbo-imaging/avatarimage").unwrap();
            let engine = DonationEngine::new(repo, Arc::new(clock.clone()), avatars);
            Self { engine, clock }
        }

        async fn user(&self, nickname: &str) -> User {
            self.engine.repository().create_user(nickname).await.unwrap()
        }

        async fn participations(&self, user: &User) -> i32 {
            self.engine
                .repository()
                .find_user_by_id(user.id)
                .await
                .unwrap()
                .unwrap()
                .donation_participations
        }
    }

    #[tokio::test]
    async fn test_single_active_session() {
        let h = Harness::new().await;
        assert_ok!(h.engine.start_session().await);

        let err = assert_err!(h.engine.start_session().await);
        assert!(matches!(err, AppError::SessionAlreadyRunning));
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_ok!(h.engine.end_session().await);
        assert_ok!(h.engine.start_session().await);
    }

    #[tokio::test]
    async fn test_operations_without_session_are_not_found() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;

        assert_eq!(h.engine.generate_code().await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(h.engine.join_queue(alice.id).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            h.engine.redeem_code(alice.id, "AB12C3").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(h.engine.stop_queue().await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(h.engine.end_session().await.unwrap_err().kind(), ErrorKind::NotFound);

        let status = h.engine.status().await.unwrap();
        assert!(!status.is_live);
        assert!(status.queue.is_empty());
    }

    #[tokio::test]
    async fn test_accrual_visible_in_status() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        h.engine.start_session().await.unwrap();

        h.clock.advance_secs(10);
        h.engine.join_queue(alice.id).await.unwrap();

        h.clock.advance_secs(179);
        let entry = h.engine.my_entry(alice.id).await.unwrap().unwrap();
        assert_eq!(entry.cambios_earned, 0);
        assert_eq!(entry.next_cambio_in, 1);

        h.clock.advance_secs(1);
        let status = h.engine.status().await.unwrap();
        assert_eq!(status.elapsed_time.as_deref(), Some("00:03:10"));
        assert_eq!(status.queue[0].cambios_earned, 1);
        assert_eq!(status.queue[0].next_cambio_in, 180);
        assert_eq!(status.queue[0].nickname, "Alice");
    }

    #[tokio::test]
    async fn test_join_twice_is_conflict() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        h.engine.start_session().await.unwrap();

        h.engine.join_queue(alice.id).await.unwrap();
        let err = h.engine.join_queue(alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyInQueue));
    }

    #[tokio::test]
    async fn test_join_unknown_user_is_not_found() {
        let h = Harness::new().await;
        h.engine.start_session().await.unwrap();

        let err = h.engine.join_queue(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_pause_blocks_joins_only() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        let bob = h.user("Bob").await;
        h.engine.start_session().await.unwrap();
        h.engine.join_queue(alice.id).await.unwrap();

        h.engine.pause_queue(true).await.unwrap();
        h.engine.pause_queue(true).await.unwrap();
        let err = h.engine.join_queue(bob.id).await.unwrap_err();
        assert!(matches!(err, AppError::QueuePaused));

        h.clock.advance_secs(360);
        let status = h.engine.status().await.unwrap();
        assert!(status.queue_paused);
        assert_eq!(status.queue[0].cambios_earned, 2);

        h.engine.pause_queue(false).await.unwrap();
        h.engine.join_queue(bob.id).await.unwrap();
        assert_eq!(h.engine.status().await.unwrap().queue.len(), 2);
    }

    #[tokio::test]
    async fn test_leave_forfeits_reward() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        h.engine.start_session().await.unwrap();
        h.engine.join_queue(alice.id).await.unwrap();

        h.clock.advance_secs(200);
        h.engine.leave_queue(alice.id).await.unwrap();

        assert_eq!(h.participations(&alice).await, 0);
        assert!(h.engine.status().await.unwrap().queue.is_empty());

        let err = h.engine.leave_queue(alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotInQueue));

        // leaving banked nothing for the later stop either
        let standings = h.engine.stop_queue().await.unwrap();
        assert!(standings.is_empty());
        assert_eq!(h.participations(&alice).await, 0);
    }

    #[tokio::test]
    async fn test_redeem_is_single_use_and_case_insensitive() {
        let h = Harness::new().await;
        let bob = h.user("Bob").await;
        h.engine.start_session().await.unwrap();

        let err = h.engine.redeem_code(bob.id, "AB12C3").await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveCode));

        let code = h.engine.generate_code().await.unwrap();
        assert_eq!(code.len(), code::CODE_LENGTH);
        assert_eq!(h.engine.status().await.unwrap().current_code.as_deref(), Some(code.as_str()));

        let err = h.engine.redeem_code(bob.id, "").await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));

        let wrong = if code == "ZZZZZZ" { "YYYYYY" } else { "ZZZZZZ" };
        let err = h.engine.redeem_code(bob.id, wrong).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCode));
        assert_eq!(h.participations(&bob).await, 0);

        h.engine.redeem_code(bob.id, &code.to_lowercase()).await.unwrap();
        assert_eq!(h.participations(&bob).await, 1);
        assert!(h.engine.status().await.unwrap().current_code.is_none());

        let err = h.engine.redeem_code(bob.id, &code).await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveCode));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.participations(&bob).await, 1);
    }

    #[tokio::test]
    async fn test_redeem_by_unknown_user_keeps_code() {
        let h = Harness::new().await;
        h.engine.start_session().await.unwrap();
        let code = h.engine.generate_code().await.unwrap();

        let err = h.engine.redeem_code(Uuid::new_v4(), &code).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // the failed transaction rolled back the clear
        assert_eq!(h.engine.status().await.unwrap().current_code, Some(code));
    }

    #[tokio::test]
    async fn test_my_entry_matches_status_positions() {
        let h = Harness::new().await;
        assert!(h.engine.my_entry(Uuid::new_v4()).await.unwrap().is_none());

        h.engine.start_session().await.unwrap();
        let alice = h.user("Alice").await;
        let bob = h.user("Bob").await;
        let carol = h.user("Carol").await;

        h.engine.join_queue(alice.id).await.unwrap();
        // same instant: ties fall back to entry id
        h.engine.join_queue(bob.id).await.unwrap();
        h.engine.join_queue(carol.id).await.unwrap();
        h.clock.advance_secs(200);

        let status = h.engine.status().await.unwrap();
        for view in &status.queue {
            let own = h.engine.my_entry(view.user_id).await.unwrap().unwrap();
            assert_eq!(&own, view);
        }

        h.engine.leave_queue(status.queue[0].user_id).await.unwrap();
        let status = h.engine.status().await.unwrap();
        let first = h.engine.my_entry(status.queue[0].user_id).await.unwrap().unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(first.cambios_earned, 1);
        assert_eq!(first.next_cambio_in, 160);

        let outsider = h.user("Dave").await;
        assert!(h.engine.my_entry(outsider.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_queue_freezes_standings() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        let bob = h.user("Bob").await;
        h.engine.start_session().await.unwrap();

        h.engine.join_queue(alice.id).await.unwrap();
        h.clock.advance_secs(60);
        h.engine.join_queue(bob.id).await.unwrap();
        h.clock.advance_secs(400);

        let standings = h.engine.stop_queue().await.unwrap();
        assert_eq!(standings.len(), 2);
        assert_eq!(standings[0].nickname, "Alice");
        assert_eq!(standings[0].position, 1);
        assert_eq!(standings[0].cambios_earned, 2);
        assert_eq!(standings[1].nickname, "Bob");
        assert_eq!(standings[1].position, 2);
        assert_eq!(standings[1].cambios_earned, 2);
        assert_eq!(standings[1].session_elapsed, "00:07:40");

        assert_eq!(h.participations(&alice).await, 1);
        assert_eq!(h.participations(&bob).await, 1);

        h.clock.advance_secs(3_600);
        let status = h.engine.status().await.unwrap();
        assert!(status.is_live);
        assert!(status.queue_stopped);
        assert!(status.queue.is_empty());
        assert_eq!(status.queue_results, Some(standings));

        let err = h.engine.join_queue(alice.id).await.unwrap_err();
        assert!(matches!(err, AppError::QueueClosed));
        let err = h.engine.stop_queue().await.unwrap_err();
        assert!(matches!(err, AppError::QueueAlreadyStopped));
        let err = h.engine.pause_queue(true).await.unwrap_err();
        assert!(matches!(err, AppError::QueueAlreadyStopped));
    }

    #[tokio::test]
    async fn test_end_after_stop_does_not_double_credit() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        let bob = h.user("Bob").await;
        h.engine.start_session().await.unwrap();
        h.engine.join_queue(alice.id).await.unwrap();
        h.engine.join_queue(bob.id).await.unwrap();
        h.clock.advance_secs(200);

        let stopped = h.engine.stop_queue().await.unwrap();
        h.clock.advance_secs(600);
        let ended = h.engine.end_session().await.unwrap();

        assert_eq!(ended, stopped);
        assert_eq!(h.participations(&alice).await, 1);
        assert_eq!(h.participations(&bob).await, 1);

        let status = h.engine.status().await.unwrap();
        assert!(!status.is_live);
        let err = h.engine.end_session().await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveSession));
    }

    #[tokio::test]
    async fn test_end_without_stop_credits_once() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        let started = h.engine.start_session().await.unwrap();
        h.engine.generate_code().await.unwrap();
        h.engine.join_queue(alice.id).await.unwrap();
        h.clock.advance_secs(540);

        let standings = h.engine.end_session().await.unwrap();
        assert_eq!(standings.len(), 1);
        assert_eq!(standings[0].cambios_earned, 3);
        assert_eq!(h.participations(&alice).await, 1);

        let stored = h
            .engine
            .repository()
            .find_donation_by_id(started.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_active);
        assert!(stored.end_time.is_some());
        assert!(stored.current_code.is_none());
        assert_eq!(status::stored_standings(&stored).unwrap(), standings);
        assert!(h.engine.repository().queue(started.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regenerate_replaces_code() {
        let h = Harness::new().await;
        let alice = h.user("Alice").await;
        h.engine.start_session().await.unwrap();

        let first = h.engine.generate_code().await.unwrap();
        let second = h.engine.generate_code().await.unwrap();
        assert_eq!(
            h.engine.status().await.unwrap().current_code.as_deref(),
            Some(second.as_str())
        );

        if first != second {
            let err = h.engine.redeem_code(alice.id, &first).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidCode));
        }
        h.engine.redeem_code(alice.id, &second).await.unwrap();
    }
}
