//! Operator tool: inserts (or re-keys) test accounts directly in the store.
//!
//! Usage: `add_test_user [dbPath] [username] [password]`
//!        `add_test_user --batch [dbPath] [count]`
//!
//! With no username, seeds the default `testuser / password123` account.
//! `--batch` seeds the numbered matchmaking accounts `test1`..`testN`
//! (two by default), each with a password equal to its username. Existing
//! accounts get their credential replaced instead of failing, so the tool
//! can be re-run after a forgotten test password.

use anyhow::Context;
use auth_server::db;
use auth_server::tools::{self, SeedOutcome};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1).peekable();

    let batch = args.peek().map(|arg| arg == "--batch").unwrap_or(false);
    if batch {
        args.next();
    }

    let db_path = args.next().unwrap_or_else(|| "auth.db".to_string());
    let pool = db::create_pool(&db_path)
        .await
        .with_context(|| format!("failed to open {db_path}"))?;

    if batch {
        let count: u32 = match args.next() {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid account count: {raw}"))?,
            None => 2,
        };

        for (name, outcome) in tools::seed_test_batch(&pool, count).await? {
            report(&name, &name, &outcome);
        }
        println!("Done! Batch accounts use their username as password.");
        return Ok(());
    }

    let username = args.next().unwrap_or_else(|| "testuser".to_string());
    let password = args.next().unwrap_or_else(|| "password123".to_string());

    let outcome = tools::seed_user(&pool, &username, &password).await?;
    report(&username, &password, &outcome);
    Ok(())
}

fn report(username: &str, password: &str, outcome: &SeedOutcome) {
    match outcome {
        SeedOutcome::Created(id) => println!("User {username} created (ID: {id})"),
        SeedOutcome::Updated(id) => {
            println!("User {username} exists - password updated (ID: {id})")
        }
    }
    println!("  Login credentials: {username} / {password}");
}
