//! Repository pattern for database operations
//!
//! `Repository` covers the non-transactional reads and writes. The lifecycle
//! operations run several statements inside one transaction, so the queries
//! they need are also exposed as free functions generic over
//! `ConnectionTrait`, which accept both a pooled connection and a
//! `DatabaseTransaction`.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use sea_orm::sea_query::Expr;
use sea_orm::{
    AccessMode, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, IsolationLevel, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

/// A queue entry joined with its participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub entry: QueueEntry,
    pub user: Option<User>,
}

impl QueueRow {
    /// Participant nickname, falling back to the user id when the row is gone
    pub fn nickname(&self) -> String {
        self.user
            .as_ref()
            .map(|u| u.nickname.clone())
            .unwrap_or_else(|| self.entry.user_id.to_string())
    }
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Open a transaction on the primary. Dropping it without `commit`
    /// rolls everything back.
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        self.write_conn().begin().await.map_err(Into::into)
    }

    /// Read-only transaction on the primary whose statements all see the
    /// same snapshot, so a poll never mixes state from either side of a
    /// concurrent commit.
    pub async fn begin_snapshot(&self) -> Result<DatabaseTransaction> {
        self.write_conn()
            .begin_with_config(
                Some(IsolationLevel::RepeatableRead),
                Some(AccessMode::ReadOnly),
            )
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    /// Register a community member with empty counters
    pub async fn create_user(&self, nickname: &str) -> Result<User> {
        let user = UserActiveModel {
            id: Set(Uuid::new_v4()),
            nickname: Set(nickname.to_string()),
            points: Set(0),
            donation_participations: Set(0),
            created_at: Set(chrono::Utc::now().into()),
        };

        user.insert(self.write_conn()).await.map_err(|e| {
            AppError::from_unique_violation(
                e,
                AppError::Conflict {
                    message: format!("nickname {} is taken", nickname),
                },
            )
        })
    }

    /// Find user by ID
    pub async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Donation Operations
    // ========================================================================

    /// Find a donation session by ID, active or historical
    pub async fn find_donation_by_id(&self, id: Uuid) -> Result<Option<Donation>> {
        DonationEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Queue of a session in join order
    pub async fn queue(&self, donation_id: Uuid) -> Result<Vec<QueueRow>> {
        queue_with_users(self.read_conn(), donation_id).await
    }
}

// ============================================================================
// Transactional helpers
// ============================================================================

/// Load the active donation. With `lock` set the row is read `FOR UPDATE`,
/// serializing concurrent lifecycle operations on backends with row locks.
pub async fn active_donation<C: ConnectionTrait>(conn: &C, lock: bool) -> Result<Option<Donation>> {
    let mut query = DonationEntity::find().filter(DonationColumn::IsActive.eq(true));
    if lock {
        query = query.lock_exclusive();
    }
    query.one(conn).await.map_err(Into::into)
}

/// Codes currently held by active donations other than `exclude`
pub async fn active_codes_excluding<C: ConnectionTrait>(
    conn: &C,
    exclude: Uuid,
) -> Result<Vec<String>> {
    let donations = DonationEntity::find()
        .filter(DonationColumn::IsActive.eq(true))
        .filter(DonationColumn::Id.ne(exclude))
        .filter(DonationColumn::CurrentCode.is_not_null())
        .all(conn)
        .await?;

    Ok(donations.into_iter().filter_map(|d| d.current_code).collect())
}

/// Queue entries with their participants, oldest join first
pub async fn queue_with_users<C: ConnectionTrait>(conn: &C, donation_id: Uuid) -> Result<Vec<QueueRow>> {
    let rows = QueueEntryEntity::find()
        .filter(QueueEntryColumn::DonationId.eq(donation_id))
        .order_by_asc(QueueEntryColumn::JoinedAt)
        .order_by_asc(QueueEntryColumn::Id)
        .find_also_related(UserEntity)
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(entry, user)| QueueRow { entry, user })
        .collect())
}

/// A participant's entry in a donation queue
pub async fn find_entry<C: ConnectionTrait>(
    conn: &C,
    donation_id: Uuid,
    user_id: Uuid,
) -> Result<Option<QueueEntry>> {
    QueueEntryEntity::find()
        .filter(QueueEntryColumn::DonationId.eq(donation_id))
        .filter(QueueEntryColumn::UserId.eq(user_id))
        .one(conn)
        .await
        .map_err(Into::into)
}

/// A participant's entry joined with the participant
pub async fn find_row<C: ConnectionTrait>(
    conn: &C,
    donation_id: Uuid,
    user_id: Uuid,
) -> Result<Option<QueueRow>> {
    let row = QueueEntryEntity::find()
        .filter(QueueEntryColumn::DonationId.eq(donation_id))
        .filter(QueueEntryColumn::UserId.eq(user_id))
        .find_also_related(UserEntity)
        .one(conn)
        .await?;

    Ok(row.map(|(entry, user)| QueueRow { entry, user }))
}

/// Entries ahead of `entry` in join order, with ties broken by id as in
/// [`queue_with_users`]
pub async fn entries_ahead<C: ConnectionTrait>(conn: &C, entry: &QueueEntry) -> Result<u64> {
    QueueEntryEntity::find()
        .filter(QueueEntryColumn::DonationId.eq(entry.donation_id))
        .filter(
            Condition::any()
                .add(QueueEntryColumn::JoinedAt.lt(entry.joined_at))
                .add(
                    Condition::all()
                        .add(QueueEntryColumn::JoinedAt.eq(entry.joined_at))
                        .add(QueueEntryColumn::Id.lt(entry.id)),
                ),
        )
        .count(conn)
        .await
        .map_err(Into::into)
}

/// Remove a participant's entry; returns whether one existed
pub async fn delete_entry<C: ConnectionTrait>(
    conn: &C,
    donation_id: Uuid,
    user_id: Uuid,
) -> Result<bool> {
    let result = QueueEntryEntity::delete_many()
        .filter(QueueEntryColumn::DonationId.eq(donation_id))
        .filter(QueueEntryColumn::UserId.eq(user_id))
        .exec(conn)
        .await?;

    Ok(result.rows_affected > 0)
}

/// Remove every entry of a donation queue
pub async fn clear_queue<C: ConnectionTrait>(conn: &C, donation_id: Uuid) -> Result<u64> {
    let result = QueueEntryEntity::delete_many()
        .filter(QueueEntryColumn::DonationId.eq(donation_id))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// Add one participation to each listed user; returns the rows touched
pub async fn credit_participations<C: ConnectionTrait>(conn: &C, user_ids: &[Uuid]) -> Result<u64> {
    if user_ids.is_empty() {
        return Ok(0);
    }

    let result = UserEntity::update_many()
        .col_expr(
            UserColumn::DonationParticipations,
            Expr::col(UserColumn::DonationParticipations).add(1),
        )
        .filter(UserColumn::Id.is_in(user_ids.iter().copied()))
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// Clear the redemption code only if it is still `expected`. Returns false
/// when another redemption consumed or replaced it first.
pub async fn consume_code<C: ConnectionTrait>(
    conn: &C,
    donation_id: Uuid,
    expected: &str,
) -> Result<bool> {
    let result = DonationEntity::update_many()
        .col_expr(DonationColumn::CurrentCode, Expr::value(Option::<String>::None))
        .filter(DonationColumn::Id.eq(donation_id))
        .filter(DonationColumn::CurrentCode.eq(expected))
        .exec(conn)
        .await?;

    Ok(result.rows_affected == 1)
}
