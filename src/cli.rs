//! Command-line arguments for the `carlease` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Exercise the car-leasing client core from a terminal
#[derive(Parser, Debug)]
#[command(name = "carlease")]
#[command(version)]
pub struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Local state file, overrides `storage.path`
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in with email and password
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Create an account
    Signup {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Confirm a new account with the mailed code
    Verify {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        otp: String,
    },
    /// Browse without an account
    Guest,
    /// Sign out
    Logout,
    /// Show the current session
    Status,
    /// Check the stored token with the server
    Revalidate,
    /// List cars
    Cars {
        #[arg(short, long)]
        brand: Option<String>,
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show one car
    Car { id: String },
    /// List brands
    Brands,
    /// List the signed-in user's leases
    Leases,
    /// Show one lease
    Lease { id: String },
    /// List the signed-in user's payments
    Payments,
    /// Manage favorite cars
    #[command(subcommand)]
    Favorite(FavoriteCommand),
    /// Stay connected to the event channel until Ctrl-C or sign-out
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum FavoriteCommand {
    Add { car_id: String },
    Remove { car_id: String },
    List,
}
