//! Terminal front end for wagerbook.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use tracing::info;
use wagerbook_client::{Client, HouseBoard, RetryPolicy};
use wagerbook_types::{Amount, BetSlip, Multiplier, Outcome, PlayerId};

#[derive(Parser, Debug)]
#[command(author, version, about = "Track wagers against a wagerbook server")]
struct Args {
    /// Wagerbook server base URL (http(s)://host:port)
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Attempts per read request; reads answered 5xx, 408 or 429 are retried with backoff
    #[arg(long, default_value_t = 3)]
    max_attempts: usize,

    /// Player email (falls back to WAGERBOOK_EMAIL)
    #[arg(long)]
    email: Option<String>,

    /// Player password (falls back to WAGERBOOK_PASSWORD)
    #[arg(long)]
    password: Option<String>,

    /// Existing player session token; skips signing in
    #[arg(long, env = "WAGERBOOK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Admin secret (falls back to ADMIN_SECRET)
    #[arg(long)]
    admin_secret: Option<String>,

    /// Existing admin session token; skips the admin login
    #[arg(long, env = "WAGERBOOK_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and print its session token.
    SignUp,
    /// Sign in and print the session token.
    SignIn,
    /// Show the signed-in player's balance.
    Balance,
    /// Record a bet. Stakes above the max bet are clamped.
    Bet {
        amount: Amount,
        /// win or loss
        outcome: Outcome,
        /// Payout multiplier (1 or 2)
        #[arg(long, default_value_t = 1)]
        multiplier: u8,
    },
    /// Open an admin session and print its token.
    AdminLogin,
    /// Set the house max bet.
    SetMaxBet { amount: Amount },
    /// List every player balance and the house total.
    House,
    /// Apply a signed correction to a player's balance.
    Adjust {
        player: String,
        #[arg(allow_hyphen_values = true)]
        change: Amount,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args = Args::parse();
    let mut client = Client::new(&args.url)
        .context("Invalid server URL")?
        .with_retry_policy(RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        });

    match args.command {
        Command::SignUp => {
            let (email, password) = credentials(args.email, args.password)?;
            let player = client
                .sign_up(&email, &password)
                .await
                .context("Sign up failed")?;
            println!("signed up as {player}");
            print_token(client.session_token());
        }
        Command::SignIn => {
            let (email, password) = credentials(args.email, args.password)?;
            let player = client
                .sign_in(&email, &password)
                .await
                .context("Sign in failed")?;
            println!("signed in as {player}");
            print_token(client.session_token());
        }
        Command::Balance => {
            player_session(&mut client, args.token, args.email, args.password).await?;
            let account = client.me().await.context("Failed to load balance")?;
            println!("{}: {}", account.id, account.balance);
        }
        Command::Bet {
            amount,
            outcome,
            multiplier,
        } => {
            let multiplier = Multiplier::try_from(multiplier)?;
            player_session(&mut client, args.token, args.email, args.password).await?;
            let receipt = client
                .place_bet(BetSlip {
                    amount,
                    multiplier,
                    outcome,
                })
                .await
                .context("Failed to place bet")?;
            if receipt.stake != amount {
                println!("stake clamped to max bet {}", receipt.stake);
            }
            let verb = if receipt.outcome.is_win() { "won" } else { "lost" };
            println!(
                "You {verb} ${} at {}. Balance: {}",
                receipt.delta.abs(),
                receipt.multiplier,
                receipt.balance
            );
        }
        Command::AdminLogin => {
            let secret = require_arg_or_env(args.admin_secret, "ADMIN_SECRET")?;
            client
                .admin_login(&secret)
                .await
                .context("Admin login failed")?;
            print_token(client.admin_token());
        }
        Command::SetMaxBet { amount } => {
            admin_session(&mut client, args.admin_token, args.admin_secret).await?;
            let max_bet = client
                .set_max_bet(amount)
                .await
                .context("Failed to set max bet")?;
            println!("max bet: {max_bet}");
        }
        Command::House => {
            admin_session(&mut client, args.admin_token, args.admin_secret).await?;
            let board = HouseBoard::load(&client)
                .await
                .context("Failed to load house")?;
            for row in board.rows() {
                println!("{:<24} {:>12}", row.account.id, row.account.balance);
            }
            println!("{:<24} {:>12}", "house total", board.total());
        }
        Command::Adjust { player, change } => {
            admin_session(&mut client, args.admin_token, args.admin_secret).await?;
            let player = PlayerId::new(player)?;
            let mut board = HouseBoard::load(&client)
                .await
                .context("Failed to load house")?;
            board.stage_change(&player, change)?;
            let account = board
                .commit(&client, &player)
                .await
                .context("Failed to adjust balance")?;
            info!(%player, %change, "adjustment committed");
            println!("{}: {}", account.id, account.balance);
            println!("house total: {}", board.total());
        }
    }

    Ok(())
}

fn require_arg_or_env(value: Option<String>, env_key: &str) -> Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    env::var(env_key).map_err(|_| anyhow!("Missing {env_key} (flag or env var)"))
}

fn credentials(email: Option<String>, password: Option<String>) -> Result<(String, String)> {
    Ok((
        require_arg_or_env(email, "WAGERBOOK_EMAIL")?,
        require_arg_or_env(password, "WAGERBOOK_PASSWORD")?,
    ))
}

async fn player_session(
    client: &mut Client,
    token: Option<String>,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    if token.is_some() {
        client.set_session_token(token);
        return Ok(());
    }
    let (email, password) = credentials(email, password)?;
    client
        .sign_in(&email, &password)
        .await
        .context("Sign in failed")?;
    Ok(())
}

async fn admin_session(
    client: &mut Client,
    token: Option<String>,
    secret: Option<String>,
) -> Result<()> {
    if token.is_some() {
        client.set_admin_token(token);
        return Ok(());
    }
    let secret = require_arg_or_env(secret, "ADMIN_SECRET")?;
    client
        .admin_login(&secret)
        .await
        .context("Admin login failed")?;
    Ok(())
}

fn print_token(token: Option<&str>) {
    if let Some(token) = token {
        println!("token: {token}");
    }
}
