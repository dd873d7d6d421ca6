use chrono::{DateTime, Utc};
use relay_crypto::SecretKey;
use relay_storage::{ApiKey, GroupId, KeyStore, StoreError, Team};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

type KeyRow = (String, String, Vec<u8>, i64);

const SELECT_KEYS: &str = "SELECT team, group_id, key, created_at FROM api_keys";

pub struct SqliteKeyStore {
    pool: SqlitePool,
}

impl SqliteKeyStore {
    /// `~/.relay/keys.db` (creates dir with 0700 perms on unix)
    pub async fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::home_dir()
            .ok_or_else(|| StoreError::Backend("no home dir".into()))?
            .join(".relay");
        std::fs::create_dir_all(&dir).map_err(backend)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(backend)?;
        }
        let path = dir.join("keys.db");
        let url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
        Self::open(&url).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        // One connection serializes writers, which is what makes rotation atomic
        // for readers on the same pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(backend)?;

        MIGRATOR.run(&pool).await.map_err(backend)?;

        Ok(Self { pool })
    }
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn row_to_key((team, group_id, key, created_at): KeyRow) -> Result<ApiKey, StoreError> {
    let key = SecretKey::from_bytes(key).map_err(backend)?;
    let created_at = DateTime::<Utc>::from_timestamp(created_at, 0)
        .ok_or_else(|| StoreError::Backend(format!("bad created_at: {created_at}")))?;
    Ok(ApiKey {
        team: Team(team),
        group_id: GroupId(group_id),
        key,
        created_at,
    })
}

async fn insert_key<'e, E>(executor: E, key: &ApiKey) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query("INSERT INTO api_keys(team, group_id, key, created_at) VALUES(?,?,?,?)")
        .bind(key.team.as_str())
        .bind(key.group_id.as_str())
        .bind(key.key.as_bytes())
        .bind(key.created_at.timestamp())
        .execute(executor)
        .await
        .map_err(backend)?;
    Ok(())
}

#[async_trait::async_trait]
impl KeyStore for SqliteKeyStore {
    async fn read_by_team(&self, team: &Team) -> Result<Vec<ApiKey>, StoreError> {
        let rows = sqlx::query_as::<_, KeyRow>(&format!(
            "{SELECT_KEYS} WHERE team=? ORDER BY id DESC"
        ))
        .bind(team.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        rows.into_iter().map(row_to_key).collect()
    }

    async fn read_by_group(&self, group: &GroupId) -> Result<Vec<ApiKey>, StoreError> {
        let rows = sqlx::query_as::<_, KeyRow>(&format!(
            "{SELECT_KEYS} WHERE group_id=? ORDER BY team ASC, id DESC"
        ))
        .bind(group.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(row_to_key).collect()
    }

    async fn write_initial(
        &self,
        team: &Team,
        group: &GroupId,
        secret: &SecretKey,
    ) -> Result<ApiKey, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM api_keys WHERE team=?")
            .bind(team.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
        if existing > 0 {
            return Err(StoreError::AlreadyExists);
        }

        let key = ApiKey::new(team.clone(), group.clone(), secret.clone());
        insert_key(&mut *tx, &key).await?;
        tx.commit().await.map_err(backend)?;
        Ok(key)
    }

    async fn rotate(
        &self,
        team: &Team,
        group: &GroupId,
        new_secret: &SecretKey,
    ) -> Result<ApiKey, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM api_keys WHERE team=?")
            .bind(team.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
        if existing == 0 {
            return Err(StoreError::NotFound);
        }

        let key = ApiKey::new(team.clone(), group.clone(), new_secret.clone());
        insert_key(&mut *tx, &key).await?;
        tx.commit().await.map_err(backend)?;
        Ok(key)
    }

    async fn purge(&self, team: &Team) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let newest: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM api_keys WHERE team=? ORDER BY id DESC LIMIT 1")
                .bind(team.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
        let (newest,) = newest.ok_or(StoreError::NotFound)?;

        let result = sqlx::query("DELETE FROM api_keys WHERE team=? AND id<>?")
            .bind(team.as_str())
            .bind(newest)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        Ok(result.rows_affected() as usize)
    }
}
