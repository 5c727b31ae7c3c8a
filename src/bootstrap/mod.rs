use anyhow::{anyhow, Context};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use log::{debug, info};

use crate::auth::password::hash_password;
use crate::config::AdminSeed;
use crate::shared::models::schema::users;
use crate::shared::models::UserRole;
use crate::shared::utils::DbPool;

/// Apply the schema. Every statement is `IF NOT EXISTS`, so this runs on
/// every startup.
pub async fn run_schema(pool: &DbPool) -> Result<(), anyhow::Error> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .context("Failed to get connection for schema setup")?;
        conn.batch_execute(include_str!("../../migrations/schema.sql"))
            .context("Failed to apply database schema")?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .map_err(|e| anyhow!("schema task failed: {e}"))??;

    info!("Database schema is up to date");
    Ok(())
}

/// Create the admin account configured in the environment. Does nothing when
/// the email is already taken, so a changed password on a live deployment is
/// never clobbered.
pub async fn seed_admin(pool: &DbPool, seed: &AdminSeed) -> Result<(), anyhow::Error> {
    let pool = pool.clone();
    let email = seed.email.trim().to_lowercase();
    let password = seed.password.clone();

    let inserted = tokio::task::spawn_blocking(move || {
        let password_hash = hash_password(&password)?;
        let mut conn = pool
            .get()
            .context("Failed to get connection for admin seeding")?;

        let rows = diesel::insert_into(users::table)
            .values((
                users::email.eq(&email),
                users::password_hash.eq(&password_hash),
                users::display_name.eq("Administrator"),
                users::role.eq(UserRole::Admin.as_str()),
                users::onboarded.eq(true),
                users::is_active.eq(true),
            ))
            .on_conflict(users::email)
            .do_nothing()
            .execute(&mut conn)
            .context("Failed to seed admin account")?;

        Ok::<_, anyhow::Error>((rows, email))
    })
    .await
    .map_err(|e| anyhow!("admin seed task failed: {e}"))??;

    let (rows, email) = inserted;
    if rows > 0 {
        info!("Seeded admin account {email}");
    } else {
        debug!("Admin account {email} already present");
    }
    Ok(())
}
