//! Transaction-scoped advisory locks keyed by entity.

use sha2::{Digest, Sha256};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use sharepack_core::EntityKind;

/// Stable 64-bit key for `(kind, business_id)`.
pub fn lock_key(kind: EntityKind, business_id: Uuid) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(business_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Block until this transaction holds the entity's write lock. Released on
/// commit or rollback.
pub async fn lock_entity(
    tx: &mut Transaction<'_, Postgres>,
    kind: EntityKind,
    business_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(lock_key(kind, business_id))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_kind_scoped() {
        let id = Uuid::now_v7();
        assert_eq!(lock_key(EntityKind::Share, id), lock_key(EntityKind::Share, id));
        assert_ne!(lock_key(EntityKind::Share, id), lock_key(EntityKind::Pipeline, id));
        assert_ne!(
            lock_key(EntityKind::Share, id),
            lock_key(EntityKind::Share, Uuid::now_v7())
        );
    }
}
