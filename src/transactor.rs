use std::fmt::Display;

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, error};

/// Opens transaction scopes, or joins the caller's when one is already open.
#[derive(Debug, Clone)]
pub struct Transactor {
    pool: PgPool,
}

/// A unit of work that business writes and outbox inserts share.
///
/// An `Owned` scope began its own transaction and decides commit or
/// rollback in [`TxScope::finish`]. A `Joined` scope runs inside a
/// transaction the caller already holds; finishing it is a no-op and the
/// outer scope keeps the boundary.
pub enum TxScope<'a> {
    Owned(Transaction<'static, Postgres>),
    Joined(&'a mut Transaction<'static, Postgres>),
}

impl Transactor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Joins `ambient` if given, otherwise begins a new transaction.
    /// Begin errors propagate immediately.
    pub async fn begin<'a>(
        &self,
        ambient: Option<&'a mut Transaction<'static, Postgres>>,
    ) -> Result<TxScope<'a>, sqlx::Error> {
        match ambient {
            Some(tx) => Ok(TxScope::Joined(tx)),
            None => Ok(TxScope::Owned(self.pool.begin().await?)),
        }
    }
}

impl TxScope<'_> {
    pub fn is_owner(&self) -> bool {
        matches!(self, TxScope::Owned(_))
    }

    /// The open transaction, for handing to nested use cases.
    pub fn transaction(&mut self) -> &mut Transaction<'static, Postgres> {
        match self {
            TxScope::Owned(tx) => tx,
            TxScope::Joined(tx) => &mut **tx,
        }
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        &mut **self.transaction()
    }

    /// Commits an owned scope when `result` is `Ok` and rolls it back
    /// otherwise. A rollback failure is only logged so the original error
    /// reaches the caller; a commit failure is returned.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<sqlx::Error> + Display,
    {
        let tx = match self {
            TxScope::Owned(tx) => tx,
            TxScope::Joined(_) => return result,
        };

        match result {
            Ok(value) => {
                if let Err(e) = tx.commit().await {
                    error!(error = %e, "failed to commit transaction");
                    return Err(E::from(e));
                }
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "rolling back transaction");
                if let Err(e) = tx.rollback().await {
                    error!(error = %e, "failed to rollback transaction");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::apply_schema;

    async fn author_count(pool: &PgPool) -> i64 {
        sqlx::query_scalar("SELECT count(*) FROM author")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn insert_author(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO author (id, name) VALUES ($1, 'Frank Herbert')")
            .bind(uuid::Uuid::new_v4())
            .execute(conn)
            .await?;
        Ok(())
    }

    #[sqlx::test(migrations = false)]
    async fn owned_scope_commits_on_success(pool: PgPool) {
        apply_schema(&pool).await.unwrap();
        let transactor = Transactor::new(pool.clone());

        let mut scope = transactor.begin(None).await.unwrap();
        assert!(scope.is_owner());
        let result = insert_author(scope.conn()).await;
        scope.finish(result).await.unwrap();

        assert_eq!(author_count(&pool).await, 1);
    }

    #[sqlx::test(migrations = false)]
    async fn owned_scope_rolls_back_and_keeps_the_original_error(pool: PgPool) {
        apply_schema(&pool).await.unwrap();
        let transactor = Transactor::new(pool.clone());

        let mut scope = transactor.begin(None).await.unwrap();
        insert_author(scope.conn()).await.unwrap();
        let err = scope
            .finish::<(), sqlx::Error>(Err(sqlx::Error::RowNotFound))
            .await
            .unwrap_err();

        assert!(matches!(err, sqlx::Error::RowNotFound));
        assert_eq!(author_count(&pool).await, 0);
    }

    #[sqlx::test(migrations = false)]
    async fn joined_scope_leaves_the_boundary_to_the_outer_scope(pool: PgPool) {
        apply_schema(&pool).await.unwrap();
        let transactor = Transactor::new(pool.clone());

        let mut outer = transactor.begin(None).await.unwrap();
        {
            let mut inner = transactor.begin(Some(outer.transaction())).await.unwrap();
            assert!(!inner.is_owner());
            let result = insert_author(inner.conn()).await;
            inner.finish(result).await.unwrap();
        }

        // The inner finish must not have committed anything.
        assert_eq!(author_count(&pool).await, 0);

        outer
            .finish::<(), sqlx::Error>(Err(sqlx::Error::RowNotFound))
            .await
            .unwrap_err();
        assert_eq!(author_count(&pool).await, 0);
    }

    #[sqlx::test(migrations = false)]
    async fn joined_scope_commits_with_the_callers_transaction(pool: PgPool) {
        apply_schema(&pool).await.unwrap();
        let transactor = Transactor::new(pool.clone());

        let mut tx = pool.begin().await.unwrap();
        let mut scope = transactor.begin(Some(&mut tx)).await.unwrap();
        let result = insert_author(scope.conn()).await;
        scope.finish(result).await.unwrap();
        assert_eq!(author_count(&pool).await, 0);

        tx.commit().await.unwrap();
        assert_eq!(author_count(&pool).await, 1);
    }
}
