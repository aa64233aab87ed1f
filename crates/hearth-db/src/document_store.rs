//! Player documents as JSONB rows.
//!
//! Each collection is one table keyed by `player_id` with the whole
//! document in a `document` column. Reads extract a sub-path with `#>`;
//! writes lock the row, apply the field operations in memory with the same
//! command semantics as every other backend, and write the document back
//! inside one transaction.

use hearth_core::error::StoreError;
use hearth_core::store::{Collection, DocumentStore, FieldOp, apply_field_op};
use hearth_types::{GameValue, PlayerId};

use crate::error::DbError;
use crate::postgres::PgStore;

fn unknown(player: &PlayerId) -> DbError {
    DbError::Store(StoreError::UnknownPlayer {
        player: player.to_string(),
    })
}

impl DocumentStore for PgStore {
    fn player_exists(&self, player: &PlayerId) -> Result<bool, StoreError> {
        self.block_on(async {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM players WHERE player_id = $1)")
                    .bind(player.as_str())
                    .fetch_one(&self.pool)
                    .await?;
            Ok(exists)
        })
    }

    fn create_player(&self, player: &PlayerId, document: GameValue) -> Result<(), StoreError> {
        self.block_on(async {
            sqlx::query(
                r"INSERT INTO players (player_id, document) VALUES ($1, $2)
                  ON CONFLICT (player_id) DO UPDATE SET document = EXCLUDED.document",
            )
            .bind(player.as_str())
            .bind(document.to_json())
            .execute(&self.pool)
            .await?;
            tracing::debug!(player = %player, "player document created");
            Ok(())
        })
    }

    fn read(
        &self,
        collection: Collection,
        player: &PlayerId,
        path: &[&str],
    ) -> Result<Option<GameValue>, StoreError> {
        let sql = format!(
            "SELECT document #> $2 FROM {} WHERE player_id = $1",
            collection.as_str()
        );
        let path: Vec<String> = path.iter().map(|s| (*s).to_owned()).collect();
        self.block_on(async {
            let row: Option<Option<serde_json::Value>> = sqlx::query_scalar(&sql)
                .bind(player.as_str())
                .bind(&path)
                .fetch_optional(&self.pool)
                .await?;
            match row {
                Some(value) => Ok(value.map(GameValue::from_json)),
                None if collection == Collection::Players => Err(unknown(player)),
                None => Ok(None),
            }
        })
    }

    fn apply(
        &self,
        collection: Collection,
        player: &PlayerId,
        ops: &[FieldOp],
    ) -> Result<Vec<GameValue>, StoreError> {
        let table = collection.as_str();
        let ensure = format!(
            "INSERT INTO {table} (player_id, document) VALUES ($1, '{{}}'::jsonb) \
             ON CONFLICT (player_id) DO NOTHING"
        );
        let select = format!("SELECT document FROM {table} WHERE player_id = $1 FOR UPDATE");
        let write = format!("UPDATE {table} SET document = $2 WHERE player_id = $1");

        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            if collection == Collection::Statistics {
                sqlx::query(&ensure)
                    .bind(player.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
            let current: Option<serde_json::Value> = sqlx::query_scalar(&select)
                .bind(player.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            let Some(current) = current else {
                return Err(unknown(player));
            };

            let mut document = GameValue::from_json(current);
            let results = ops
                .iter()
                .map(|op| apply_field_op(&mut document, op))
                .collect::<Result<Vec<_>, _>>()?;

            sqlx::query(&write)
                .bind(player.as_str())
                .bind(document.to_json())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(results)
        })
    }
}
