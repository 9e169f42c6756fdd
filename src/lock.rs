use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait, Value,
};

use crate::config::{AdvisoryLockKey, AdvisoryLockStrategy};
use crate::error::Result;

/// A transaction that holds the hierarchy's advisory lock until it ends.
///
/// The lock is transaction scoped, so PostgreSQL releases it on commit and on
/// rollback alike.
pub struct LockedTransaction {
    txn: DatabaseTransaction,
    key: Option<AdvisoryLockKey>,
}

impl LockedTransaction {
    pub async fn acquire(strategy: &AdvisoryLockStrategy, db: &DatabaseConnection) -> Result<Self> {
        let key = strategy.key().cloned();
        let txn = db.begin().await?;

        if let Some(ref key) = key {
            if let Err(err) = acquire_lock(&txn, key).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
            tracing::debug!(key = key.as_str(), "advisory lock acquired");
        }

        Ok(Self { txn, key })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<()> {
        self.txn.commit().await?;
        if let Some(key) = self.key {
            tracing::debug!(key = key.as_str(), "advisory lock released on commit");
        }
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.txn.rollback().await?;
        if let Some(key) = self.key {
            tracing::debug!(key = key.as_str(), "advisory lock released on rollback");
        }
        Ok(())
    }
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &AdvisoryLockKey) -> Result<()> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1), 0)",
        vec![Value::from(key.as_str())],
    ))
    .await?;
    Ok(())
}
