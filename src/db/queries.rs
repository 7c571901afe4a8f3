use sqlx::{PgPool, Postgres, Result, Transaction};
use uuid::Uuid;

use crate::models::{Game, GameStatus, GameType, User, UserGame};

pub async fn get_users_by_ids(pool: &PgPool, user_ids: &[i64]) -> Result<Vec<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = ANY($1)")
        .bind(user_ids)
        .fetch_all(pool)
        .await
}

/// Persist one finished two-player game: the Game row, both UserGame rows
/// (with post-game rank snapshots and cross opponent references) and, for
/// ranked games, the already-adjusted ranks. One transaction, so a crash
/// never leaves half a game behind.
pub async fn save_multiplayer_game(
    pool: &PgPool,
    game_type: GameType,
    update_ranks: bool,
    user1: &User,
    user1_status: GameStatus,
    user2: &User,
    user2_status: GameStatus,
) -> Result<(Game, UserGame, UserGame)> {
    let mut tx = pool.begin().await?;

    let game = sqlx::query_as::<_, Game>(
        "INSERT INTO games (game_id, game_type) VALUES ($1, $2) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(game_type)
    .fetch_one(&mut *tx)
    .await?;

    if update_ranks {
        for user in [user1, user2] {
            sqlx::query("UPDATE users SET rank = $1 WHERE user_id = $2")
                .bind(user.rank)
                .bind(user.user_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    let user1_game =
        insert_user_game(&mut tx, game.game_id, user1, user1_status, user2.user_id).await?;
    let user2_game =
        insert_user_game(&mut tx, game.game_id, user2, user2_status, user1.user_id).await?;

    tx.commit().await?;
    Ok((game, user1_game, user2_game))
}

async fn insert_user_game(
    tx: &mut Transaction<'_, Postgres>,
    game_id: Uuid,
    user: &User,
    status: GameStatus,
    opponent_id: i64,
) -> Result<UserGame> {
    sqlx::query_as::<_, UserGame>(
        r#"
        INSERT INTO user_games (game_id, user_id, opponent_id, status, rank)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(game_id)
    .bind(user.user_id)
    .bind(opponent_id)
    .bind(status)
    .bind(user.rank)
    .fetch_one(&mut **tx)
    .await
}
