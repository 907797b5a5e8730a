mod cli;

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use carlease::api::{ApiError, CarQuery, SignupForm, SignupOutcome};
use carlease::config::{Config, ConfigStore};
use carlease::notice::LogNotifier;
use carlease::realtime::ConnectionState;
use carlease::session::AuthMode;
use carlease::storage::FileStore;
use carlease::{init_tracing, AppContext};
use clap::Parser;
use serde::Serialize;

use cli::{Cli, Command, FavoriteCommand};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let config = ConfigStore::open(config_path)?;
    let state_path = cli
        .state
        .clone()
        .unwrap_or_else(|| config.get().storage.resolved_path());
    let storage = FileStore::open(state_path.clone())
        .with_context(|| format!("Failed to open state file {}", state_path.display()))?;

    let ctx = AppContext::bootstrap(config, Arc::new(storage), Arc::new(LogNotifier))?;
    run(&ctx, cli.command).await
}

async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let user = ctx.auth.login(&email, &password).await.map_err(|e| report(&e))?;
            println!("Signed in as {} <{}>", user.name, user.email);
        }
        Command::Signup {
            name,
            email,
            password,
        } => {
            let form = SignupForm {
                name,
                email,
                confirm_password: password.clone(),
                password,
            };
            match ctx.auth.signup(&form).await.map_err(|e| report(&e))? {
                SignupOutcome::SignedIn(user) => println!("Signed in as {}", user.name),
                SignupOutcome::VerificationRequired { message } => println!(
                    "{}",
                    message.unwrap_or_else(|| "Check your email for a code".to_string())
                ),
            }
        }
        Command::Verify { email, otp } => {
            let user = ctx
                .auth
                .verify_email(&email, &otp)
                .await
                .map_err(|e| report(&e))?;
            match user {
                Some(user) => println!("Verified and signed in as {}", user.name),
                None => println!("Verified. You can sign in now."),
            }
        }
        Command::Guest => {
            ctx.session.continue_as_guest();
            println!("Continuing as guest");
        }
        Command::Logout => {
            // Local sign-out already happened even if this fails.
            ctx.auth.logout().await.map_err(|e| report(&e))?;
            println!("Signed out");
        }
        Command::Status => {
            let state = ctx.session.snapshot();
            println!("mode: {}", state.mode());
            if let Some(user) = state.user() {
                println!("user: {} <{}> ({})", user.name, user.email, user.id);
            }
            println!("favorites: {}", state.favorites().len());
        }
        Command::Revalidate => {
            let outcome = ctx.auth.revalidate_session().await.map_err(|e| report(&e))?;
            println!("{:?}", outcome);
        }
        Command::Cars { brand, search } => {
            let cars = ctx
                .catalog
                .cars(&CarQuery { brand, search })
                .await
                .map_err(|e| report(&e))?;
            print_json(&*cars)?;
        }
        Command::Car { id } => {
            let car = ctx.catalog.car(&id).await.map_err(|e| report(&e))?;
            print_json(&*car)?;
        }
        Command::Brands => {
            let brands = ctx.catalog.brands().await.map_err(|e| report(&e))?;
            print_json(&*brands)?;
        }
        Command::Leases => {
            let user_id = signed_in_user(ctx)?;
            let leases = ctx.lease.leases(&user_id).await.map_err(|e| report(&e))?;
            print_json(&*leases)?;
        }
        Command::Lease { id } => {
            let lease = ctx.lease.lease(&id).await.map_err(|e| report(&e))?;
            print_json(&*lease)?;
        }
        Command::Payments => {
            let user_id = signed_in_user(ctx)?;
            let payments = ctx
                .lease
                .payment_history(&user_id)
                .await
                .map_err(|e| report(&e))?;
            print_json(&*payments)?;
        }
        Command::Favorite(FavoriteCommand::Add { car_id }) => ctx.session.add_favorite(car_id),
        Command::Favorite(FavoriteCommand::Remove { car_id }) => {
            ctx.session.remove_favorite(&car_id)
        }
        Command::Favorite(FavoriteCommand::List) => {
            for car_id in ctx.session.favorites() {
                println!("{}", car_id);
            }
        }
        Command::Watch => watch(ctx).await?,
    }
    Ok(())
}

async fn watch(ctx: &AppContext) -> Result<()> {
    if ctx.session.mode() != AuthMode::Authenticated {
        bail!("Sign in first; only signed-in sessions are watched");
    }
    let (channel, watcher) = ctx.connect_realtime()?;
    let mut connection = channel.watch_state();
    let mut session = ctx.session.subscribe();

    println!("Watching events, Ctrl-C to stop");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                if state == ConnectionState::Connected {
                    println!("Connected");
                }
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                if session.borrow_and_update().mode() != AuthMode::Authenticated {
                    println!("Session ended");
                    break;
                }
            }
        }
    }

    watcher.stop();
    channel.shutdown().await;
    Ok(())
}

fn signed_in_user(ctx: &AppContext) -> Result<String> {
    ctx.session
        .user()
        .map(|user| user.id)
        .ok_or_else(|| anyhow!("Not signed in"))
}

/// Turn an API failure into the message a user would see.
fn report(e: &ApiError) -> anyhow::Error {
    tracing::debug!(error = %e, error_type = e.error_type(), "Command failed");
    anyhow!(e.user_message())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
