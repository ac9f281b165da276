//! Mints bearer tokens for operators and test clients.
//!
//! Login itself happens elsewhere; this signs a token with the configured
//! secret for an existing user.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use agrimart_api::{
    auth::AuthService,
    config,
    db,
    entities::{user, User, UserRole},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Customer,
    Admin,
}

impl From<RoleArg> for UserRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Customer => UserRole::Customer,
            RoleArg::Admin => UserRole::Admin,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "issue-token", about = "Issue a bearer token for an AgriMart user")]
struct Cli {
    /// Email of the user the token is issued for
    #[arg(long)]
    email: String,

    /// Skip the database lookup and use this user id
    #[arg(long)]
    user_id: Option<Uuid>,

    /// Role to embed when --user-id is given; otherwise the stored role is used
    #[arg(long, value_enum, default_value = "customer")]
    role: RoleArg,

    /// Print the token and its claims as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    let auth = AuthService::from_config(&cfg);

    let (user_id, role) = match cli.user_id {
        Some(id) => (id, UserRole::from(cli.role)),
        None => {
            let pool = db::establish_connection_from_app_config(&cfg)
                .await
                .context("failed to connect to database")?;
            let found = User::find()
                .filter(user::Column::Email.eq(cli.email.trim()))
                .one(&pool)
                .await
                .context("user lookup failed")?
                .ok_or_else(|| anyhow!("no user with email {}", cli.email))?;
            if !found.is_active {
                return Err(anyhow!("user {} is inactive", cli.email));
            }
            (found.id, found.role)
        }
    };

    let token = auth
        .issue_token(user_id, &cli.email, role)
        .context("failed to sign token")?;

    if cli.json {
        let body = json!({
            "token": token,
            "user_id": user_id,
            "email": cli.email,
            "role": role,
            "expires_in": cfg.jwt_expiration,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("{}", token);
    }
    Ok(())
}
