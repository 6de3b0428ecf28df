use std::io::ErrorKind;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::{DbError, DbErrorCode};
use crate::manager::TransactionManager;
use crate::propagation::IsolationLevel;

/// PostgreSQL-backed transaction manager.
#[derive(Debug, Clone)]
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    /// Creates a new manager over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Tx, DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), DbError> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), DbError> {
        tx.rollback().await?;
        Ok(())
    }
}

/// Maps a PostgreSQL SQLSTATE onto the stable error codes.
fn code_for_sqlstate(state: &str) -> DbErrorCode {
    match state {
        "40P01" => DbErrorCode::Deadlock,
        "40001" => DbErrorCode::SerializationFailure,
        "55P03" => DbErrorCode::LockNotAvailable,
        "57P01" | "57P02" | "57P03" | "53300" => DbErrorCode::ConnectionFailure,
        s if s.starts_with("08") => DbErrorCode::ConnectionFailure,
        "23505" => DbErrorCode::UniqueViolation,
        "23503" => DbErrorCode::ForeignKeyViolation,
        "23502" => DbErrorCode::NotNullViolation,
        "23514" => DbErrorCode::CheckViolation,
        s if s.starts_with("22") => DbErrorCode::Validation,
        _ => DbErrorCode::Other,
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::Database(db) => db
                .code()
                .map_or(DbErrorCode::Other, |state| code_for_sqlstate(&state)),
            sqlx::Error::PoolTimedOut => DbErrorCode::PoolTimeout,
            sqlx::Error::PoolClosed => DbErrorCode::ConnectionFailure,
            sqlx::Error::Io(io) => match io.kind() {
                ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionRefused
                | ErrorKind::TimedOut
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof => DbErrorCode::Network,
                _ => DbErrorCode::Other,
            },
            sqlx::Error::RowNotFound => DbErrorCode::NotFound,
            _ => DbErrorCode::Other,
        };
        DbError::new(code, err.to_string())
    }
}
