//! Operator tooling: direct store seeding for test accounts.
//!
//! Backs the `add_test_user` binary. Credentials are stored exactly as the
//! server would store them: the KDF applied to the SHA-256 digest a client
//! would send, so seeded accounts log in through the normal protocol path.

use crate::db::DbPool;
use crate::repositories::accounts::{self, CreateAccountOutcome};
use crate::security::crypto;
use anyhow::Context;
use chrono::Utc;

/// KDF cost for seeded test credentials; lighter than the registration cost
/// since these are throwaway accounts.
const SEED_HASH_COST: u32 = 10;

/// What happened to a seeded account.
#[derive(Debug, PartialEq, Eq)]
pub enum SeedOutcome {
    /// A new account with this ID was created.
    Created(i64),
    /// The account existed; its credential was replaced.
    Updated(i64),
}

/// Creates the account, or replaces the stored credential when it already
/// exists, so seeding can be re-run after a forgotten test password.
pub async fn seed_user(
    pool: &DbPool,
    username: &str,
    password: &str,
) -> anyhow::Result<SeedOutcome> {
    let digest = crypto::sha256_hex(password.as_bytes());
    let credential = crypto::hash_password(digest.as_bytes(), SEED_HASH_COST)
        .context("failed to hash password")?;

    if let Some(existing) = accounts::get_account_by_username(pool, username).await? {
        accounts::update_password(pool, existing.account_id, &credential).await?;
        return Ok(SeedOutcome::Updated(existing.account_id));
    }

    match accounts::create_account(pool, username, &credential, None, Utc::now().timestamp())
        .await?
    {
        CreateAccountOutcome::Created(account_id) => Ok(SeedOutcome::Created(account_id)),
        CreateAccountOutcome::UsernameTaken => {
            anyhow::bail!("username {username} was taken by a concurrent writer")
        }
    }
}

/// Seeds the numbered matchmaking test accounts `test1`..`testN`, each with
/// a password equal to its username. Returns one outcome per account in
/// order.
pub async fn seed_test_batch(
    pool: &DbPool,
    count: u32,
) -> anyhow::Result<Vec<(String, SeedOutcome)>> {
    let mut outcomes = Vec::with_capacity(count as usize);

    for i in 1..=count {
        let name = format!("test{i}");
        let outcome = seed_user(pool, &name, &name).await?;
        outcomes.push((name, outcome));
    }

    Ok(outcomes)
}
