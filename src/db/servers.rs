use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::{Row, SqlitePool};

use crate::error::AppError;
use crate::models::server::{CreateServer, Server, UpdateServer};
use crate::snowflake;

fn row_to_server(row: sqlx::sqlite::SqliteRow) -> Server {
    Server {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        owner_id: row.get("owner_id"),
        invite_code: row.get("invite_code"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_SERVERS: &str =
    "SELECT id, name, description, owner_id, invite_code, created_at, updated_at FROM servers";

fn generate_invite_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

pub async fn get_server(pool: &SqlitePool, server_id: &str) -> Result<Server, AppError> {
    let row = sqlx::query(&format!("{SELECT_SERVERS} WHERE id = ?"))
        .bind(server_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("unknown_server".to_string()))?;

    Ok(row_to_server(row))
}

/// Create a server owned by `owner_id`. The owner becomes its first member
/// and a `general` channel is created with it.
pub async fn create_server(
    pool: &SqlitePool,
    owner_id: &str,
    input: &CreateServer,
) -> Result<Server, AppError> {
    let id = snowflake::generate();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO servers (id, name, description, owner_id, invite_code) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&input.name)
    .bind(input.description.as_deref().unwrap_or(""))
    .bind(owner_id)
    .bind(generate_invite_code())
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO server_members (server_id, user_id) VALUES (?, ?)")
        .bind(&id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO channels (id, server_id, name, position) VALUES (?, ?, 'general', 0)")
        .bind(snowflake::generate())
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    get_server(pool, &id).await
}

pub async fn update_server(
    pool: &SqlitePool,
    server_id: &str,
    input: &UpdateServer,
) -> Result<Server, AppError> {
    let mut sets = Vec::new();
    let mut values: Vec<&str> = Vec::new();

    if let Some(ref name) = input.name {
        sets.push("name = ?");
        values.push(name);
    }
    if let Some(ref description) = input.description {
        sets.push("description = ?");
        values.push(description);
    }

    if sets.is_empty() {
        return get_server(pool, server_id).await;
    }

    sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')");
    let query = format!("UPDATE servers SET {} WHERE id = ?", sets.join(", "));
    let mut q = sqlx::query(&query);
    for v in values {
        q = q.bind(v);
    }
    q.bind(server_id).execute(pool).await?;

    get_server(pool, server_id).await
}

pub async fn list_servers_for_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<Server>, AppError> {
    let rows = sqlx::query(&format!(
        "{SELECT_SERVERS} WHERE id IN (SELECT server_id FROM server_members WHERE user_id = ?) ORDER BY created_at, id"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_server).collect())
}

/// Add `user_id` to the server behind `invite_code`. Joining twice is a
/// no-op; the flag is `true` only when a membership was created.
pub async fn join_by_invite(
    pool: &SqlitePool,
    invite_code: &str,
    user_id: &str,
) -> Result<(Server, bool), AppError> {
    let row = sqlx::query(&format!("{SELECT_SERVERS} WHERE invite_code = ?"))
        .bind(invite_code)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("unknown_invite".to_string()))?;
    let server = row_to_server(row);

    let result =
        sqlx::query("INSERT OR IGNORE INTO server_members (server_id, user_id) VALUES (?, ?)")
            .bind(&server.id)
            .bind(user_id)
            .execute(pool)
            .await?;

    Ok((server, result.rows_affected() > 0))
}

pub async fn leave_server(pool: &SqlitePool, server_id: &str, user_id: &str) -> Result<(), AppError> {
    let server = get_server(pool, server_id).await?;
    if server.owner_id == user_id {
        return Err(AppError::Forbidden("the owner cannot leave their server".to_string()));
    }
    sqlx::query("DELETE FROM server_members WHERE server_id = ? AND user_id = ?")
        .bind(server_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn is_member(pool: &SqlitePool, server_id: &str, user_id: &str) -> Result<bool, AppError> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM server_members WHERE server_id = ? AND user_id = ?",
    )
    .bind(server_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}

pub async fn list_member_ids(pool: &SqlitePool, server_id: &str) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT user_id FROM server_members WHERE server_id = ? ORDER BY joined_at, user_id",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Everyone sharing at least one server with `user_id`, excluding the user.
pub async fn list_co_member_ids(pool: &SqlitePool, user_id: &str) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT DISTINCT other.user_id FROM server_members mine \
         JOIN server_members other ON other.server_id = mine.server_id \
         WHERE mine.user_id = ? AND other.user_id != ?",
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, channels, users};

    async fn setup() -> (SqlitePool, String, String) {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        let alice = users::create_user(&pool, "alice", "h").await.unwrap().id;
        let bob = users::create_user(&pool, "bob", "h").await.unwrap().id;
        (pool, alice, bob)
    }

    fn input(name: &str) -> CreateServer {
        CreateServer {
            name: name.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_create_adds_owner_and_general_channel() {
        let (pool, alice, _) = setup().await;
        let server = create_server(&pool, &alice, &input("guild")).await.unwrap();
        assert_eq!(server.owner_id, alice);
        assert_eq!(server.invite_code.len(), 8);
        assert!(is_member(&pool, &server.id, &alice).await.unwrap());

        let chans = channels::list_channels(&pool, &server.id).await.unwrap();
        assert_eq!(chans.len(), 1);
        assert_eq!(chans[0].name, "general");
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let (pool, alice, bob) = setup().await;
        let server = create_server(&pool, &alice, &input("guild")).await.unwrap();

        let (joined, created) = join_by_invite(&pool, &server.invite_code, &bob).await.unwrap();
        assert_eq!(joined.id, server.id);
        assert!(created);
        let (_, created) = join_by_invite(&pool, &server.invite_code, &bob).await.unwrap();
        assert!(!created);
        assert_eq!(list_member_ids(&pool, &server.id).await.unwrap().len(), 2);
        assert_eq!(list_servers_for_user(&pool, &bob).await.unwrap().len(), 1);

        leave_server(&pool, &server.id, &bob).await.unwrap();
        assert!(!is_member(&pool, &server.id, &bob).await.unwrap());
        assert!(matches!(
            leave_server(&pool, &server.id, &alice).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            join_by_invite(&pool, "nope", &bob).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_co_members_span_servers() {
        let (pool, alice, bob) = setup().await;
        let carol = users::create_user(&pool, "carol", "h").await.unwrap().id;
        let loner = users::create_user(&pool, "loner", "h").await.unwrap().id;

        let one = create_server(&pool, &alice, &input("one")).await.unwrap();
        let two = create_server(&pool, &alice, &input("two")).await.unwrap();
        join_by_invite(&pool, &one.invite_code, &bob).await.unwrap();
        join_by_invite(&pool, &two.invite_code, &bob).await.unwrap();
        join_by_invite(&pool, &two.invite_code, &carol).await.unwrap();

        let mut co = list_co_member_ids(&pool, &alice).await.unwrap();
        co.sort();
        let mut expected = vec![bob.clone(), carol.clone()];
        expected.sort();
        assert_eq!(co, expected);
        assert!(list_co_member_ids(&pool, &loner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_server() {
        let (pool, alice, _) = setup().await;
        let server = create_server(&pool, &alice, &input("guild")).await.unwrap();
        let updated = update_server(
            &pool,
            &server.id,
            &UpdateServer {
                name: Some("renamed".to_string()),
                description: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.description, "");
    }
}
