//! Postgres access for authors and books.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::models::{Author, Book};

const BOOK_COLUMNS: &str = r#"
    book.id,
    book.name,
    book.created_at,
    book.updated_at,
    COALESCE(
        array_agg(author_book.author_id) FILTER (WHERE author_book.author_id IS NOT NULL),
        '{}'
    ) AS author_ids
"#;

pub async fn insert_author<'e, E>(executor: E, name: &str) -> Result<Author, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Author>(
        r#"
        INSERT INTO author (id, name)
        VALUES ($1, $2)
        RETURNING id, name, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(executor)
    .await
}

pub async fn get_author<'e, E>(executor: E, author_id: Uuid) -> Result<Author, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Author>(
        r#"
        SELECT id, name, created_at, updated_at
        FROM author
        WHERE id = $1
        "#,
    )
    .bind(author_id)
    .fetch_one(executor)
    .await
}

/// Renames an author. Fails with `RowNotFound` for an unknown id.
pub async fn update_author<'e, E>(
    executor: E,
    author_id: Uuid,
    name: &str,
) -> Result<Author, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Author>(
        r#"
        UPDATE author
        SET name = $1, updated_at = clock_timestamp()
        WHERE id = $2
        RETURNING id, name, created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(author_id)
    .fetch_one(executor)
    .await
}

/// Inserts a book and links it to its authors. An unknown author id
/// surfaces as a foreign key violation.
pub async fn insert_book(
    conn: &mut PgConnection,
    name: &str,
    author_ids: &[Uuid],
) -> Result<Book, sqlx::Error> {
    let (id, created_at, updated_at) = sqlx::query_as::<_, (Uuid, DateTime<Utc>, DateTime<Utc>)>(
        r#"
        INSERT INTO book (id, name)
        VALUES ($1, $2)
        RETURNING id, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO author_book (author_id, book_id)
        SELECT unnest($1::uuid[]), $2
        "#,
    )
    .bind(author_ids)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(Book {
        id,
        name: name.to_string(),
        author_ids: author_ids.to_vec(),
        created_at,
        updated_at,
    })
}

/// Renames a book and replaces its author links.
pub async fn update_book(
    conn: &mut PgConnection,
    book_id: Uuid,
    name: &str,
    author_ids: &[Uuid],
) -> Result<Book, sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE book
        SET name = $1, updated_at = clock_timestamp()
        WHERE id = $2
        "#,
    )
    .bind(name)
    .bind(book_id)
    .execute(&mut *conn)
    .await
    .and_then(|result| match result.rows_affected() {
        0 => Err(sqlx::Error::RowNotFound),
        _ => Ok(()),
    })?;

    sqlx::query(
        r#"
        WITH inserted AS (
            INSERT INTO author_book (author_id, book_id)
            SELECT unnest($1::uuid[]), $2
            ON CONFLICT (author_id, book_id) DO NOTHING
        )
        DELETE FROM author_book
        WHERE book_id = $2
            AND author_id <> ALL($1::uuid[])
        "#,
    )
    .bind(author_ids)
    .bind(book_id)
    .execute(&mut *conn)
    .await?;

    get_book(&mut *conn, book_id).await
}

pub async fn get_book<'e, E>(executor: E, book_id: Uuid) -> Result<Book, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let query = format!(
        r#"
        SELECT {BOOK_COLUMNS}
        FROM book
        LEFT JOIN author_book ON book.id = author_book.book_id
        WHERE book.id = $1
        GROUP BY book.id
        "#
    );

    sqlx::query_as::<_, Book>(&query)
        .bind(book_id)
        .fetch_one(executor)
        .await
}

pub async fn get_author_books<'e, E>(executor: E, author_id: Uuid) -> Result<Vec<Book>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let query = format!(
        r#"
        SELECT {BOOK_COLUMNS}
        FROM book
        LEFT JOIN author_book ON book.id = author_book.book_id
        WHERE book.id IN (
            SELECT book_id FROM author_book WHERE author_id = $1
        )
        GROUP BY book.id
        ORDER BY book.created_at
        "#
    );

    sqlx::query_as::<_, Book>(&query)
        .bind(author_id)
        .fetch_all(executor)
        .await
}
