//! Author and book use cases.
//!
//! Every mutation writes the entity and enqueues its snapshot in one
//! transaction scope, so either both persist or neither does.

use sqlx::{PgConnection, Postgres, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::LibraryError;
use crate::models::{Author, Book, Entity};
use crate::outbox::OutboxRepository;
use crate::repository;
use crate::transactor::Transactor;

#[derive(Clone)]
pub struct Library {
    transactor: Transactor,
    outbox: OutboxRepository,
}

impl Library {
    pub fn new(transactor: Transactor, outbox: OutboxRepository) -> Self {
        Self { transactor, outbox }
    }

    /// Registers an author. Pass `ambient` to join a transaction the
    /// caller already holds; it must be committed for the write to persist.
    #[instrument(skip(self, ambient))]
    pub async fn register_author(
        &self,
        ambient: Option<&mut Transaction<'static, Postgres>>,
        name: &str,
        trace_id: Option<&str>,
    ) -> Result<Author, LibraryError> {
        let mut scope = self.transactor.begin(ambient).await?;
        let result = async {
            let author = repository::insert_author(&mut *scope.conn(), name).await?;
            self.announce(scope.conn(), &author, author.creation_key(), trace_id)
                .await?;
            Ok::<_, LibraryError>(author)
        }
        .await;
        let author = scope.finish(result).await?;

        info!(author_id = %author.id, "Author registered.");
        Ok(author)
    }

    #[instrument(skip(self, ambient))]
    pub async fn change_author(
        &self,
        ambient: Option<&mut Transaction<'static, Postgres>>,
        author_id: Uuid,
        name: &str,
        trace_id: Option<&str>,
    ) -> Result<Author, LibraryError> {
        let mut scope = self.transactor.begin(ambient).await?;
        let result = async {
            let author = repository::update_author(&mut *scope.conn(), author_id, name)
                .await
                .map_err(|e| LibraryError::from_query(e, LibraryError::AuthorNotFound))?;
            let key = author.update_key(author.updated_at);
            self.announce(scope.conn(), &author, key, trace_id).await?;
            Ok::<_, LibraryError>(author)
        }
        .await;

        scope.finish(result).await
    }

    #[instrument(skip(self, ambient))]
    pub async fn add_book(
        &self,
        ambient: Option<&mut Transaction<'static, Postgres>>,
        name: &str,
        author_ids: &[Uuid],
        trace_id: Option<&str>,
    ) -> Result<Book, LibraryError> {
        let mut scope = self.transactor.begin(ambient).await?;
        let result = async {
            let book = repository::insert_book(scope.conn(), name, author_ids)
                .await
                .map_err(|e| LibraryError::from_query(e, LibraryError::AuthorNotFound))?;
            self.announce(scope.conn(), &book, book.creation_key(), trace_id)
                .await?;
            Ok::<_, LibraryError>(book)
        }
        .await;
        let book = scope.finish(result).await?;

        info!(book_id = %book.id, "Book added.");
        Ok(book)
    }

    #[instrument(skip(self, ambient))]
    pub async fn update_book(
        &self,
        ambient: Option<&mut Transaction<'static, Postgres>>,
        book_id: Uuid,
        name: &str,
        author_ids: &[Uuid],
        trace_id: Option<&str>,
    ) -> Result<Book, LibraryError> {
        let mut scope = self.transactor.begin(ambient).await?;
        let result = async {
            let book = repository::update_book(scope.conn(), book_id, name, author_ids)
                .await
                .map_err(|e| match e {
                    sqlx::Error::RowNotFound => LibraryError::BookNotFound,
                    e => LibraryError::from_query(e, LibraryError::AuthorNotFound),
                })?;
            let key = book.update_key(book.updated_at);
            self.announce(scope.conn(), &book, key, trace_id).await?;
            Ok::<_, LibraryError>(book)
        }
        .await;

        scope.finish(result).await
    }

    pub async fn get_author(&self, author_id: Uuid) -> Result<Author, LibraryError> {
        repository::get_author(self.transactor.pool(), author_id)
            .await
            .map_err(|e| LibraryError::from_query(e, LibraryError::AuthorNotFound))
    }

    pub async fn get_book(&self, book_id: Uuid) -> Result<Book, LibraryError> {
        repository::get_book(self.transactor.pool(), book_id)
            .await
            .map_err(|e| LibraryError::from_query(e, LibraryError::BookNotFound))
    }

    pub async fn get_author_books(&self, author_id: Uuid) -> Result<Vec<Book>, LibraryError> {
        Ok(repository::get_author_books(self.transactor.pool(), author_id).await?)
    }

    async fn announce<E: Entity>(
        &self,
        conn: &mut PgConnection,
        entity: &E,
        idempotency_key: String,
        trace_id: Option<&str>,
    ) -> Result<(), LibraryError> {
        let snapshot = serde_json::to_vec(entity)?;
        self.outbox
            .enqueue(conn, &idempotency_key, E::KIND, &snapshot, trace_id)
            .await?;
        Ok(())
    }
}
