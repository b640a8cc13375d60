use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use edgeserve::config::Config;
use edgeserve::store::{StoreError, UserStore, random_password};

const PASSWORD_LEN: usize = 12;

#[derive(Parser)]
#[command(name = "useradd")]
#[command(about = "Create a user, or reset the password of an existing one", long_about = None)]
struct Cli {
    /// User name, 1 to 64 characters of [-_.0-9A-Za-z]
    name: String,

    /// Users file; defaults to the one in the server config
    #[arg(short, long)]
    users_file: Option<PathBuf>,

    /// Also issue a new login cookie, logging out every session of the user
    #[arg(long)]
    reset_cookie: bool,

    /// bcrypt cost; defaults to the one in the server config
    #[arg(long)]
    cost: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load()?;
    let path = cli.users_file.unwrap_or(cfg.users_file);
    let cost = cli.cost.unwrap_or(cfg.bcrypt_cost);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let store = UserStore::open(&path, cost)
        .with_context(|| format!("opening user store {}", path.display()))?;

    let password = random_password(PASSWORD_LEN);
    match store.create_user(&cli.name, &password) {
        Ok(_) => println!("created user"),
        Err(StoreError::DuplicateName(_)) => {
            store.reset_password(&cli.name, &password)?;
            println!("password reset");
        }
        Err(e) => return Err(e.into()),
    }
    println!("username: {}", cli.name);
    println!("password: {password}");

    if cli.reset_cookie {
        store.reset_cookie(&cli.name)?;
        println!("cookie reset");
    }
    Ok(())
}
