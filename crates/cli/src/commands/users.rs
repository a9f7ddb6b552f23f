//! Users and API tokens.
//!
//! ```bash
//! larder user create -e ada@example.com -n "Ada Lovelace" -r admin
//! larder token issue -e ada@example.com -l "laptop"
//! larder token revoke --id 7
//! ```

use larder_api::db::{RepositoryError, UserRepository};
use larder_api::services::auth;
use larder_core::{ApiTokenId, Email, UserRole};

use super::{CliError, connect};

/// Create a user.
///
/// # Returns
///
/// The ID of the created user.
pub async fn create(email: &str, name: &str, role: &str) -> Result<i32, CliError> {
    let role: UserRole = role.parse().map_err(CliError::Invalid)?;
    let email = Email::parse(email).map_err(|e| CliError::Invalid(e.to_string()))?;
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(CliError::Invalid("name must be 1-100 characters".to_string()));
    }

    let pool = connect().await?;
    tracing::info!("Creating user: {} ({})", email, role);
    let user = UserRepository::new(&pool).create(&email, name, role).await?;

    tracing::info!(user_id = %user.id, "User created");
    Ok(user.id.as_i32())
}

/// Issue a token and print it. It is shown once and only its hash is kept.
#[allow(clippy::print_stdout)]
pub async fn issue_token(email: &str, label: Option<&str>) -> Result<(), CliError> {
    let email = Email::parse(email).map_err(|e| CliError::Invalid(e.to_string()))?;
    let pool = connect().await?;
    let users = UserRepository::new(&pool);

    let issued = auth::issue_token(&users, &email, label)
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => {
                CliError::Invalid(format!("no user with email {email}"))
            }
            other => other.into(),
        })?;

    tracing::info!(token_id = %issued.token.id, "Token issued; it will not be shown again");
    println!("{}", issued.plaintext);
    Ok(())
}

/// Revoke a token by ID.
pub async fn revoke_token(id: i32) -> Result<(), CliError> {
    let pool = connect().await?;
    UserRepository::new(&pool)
        .revoke_token(ApiTokenId::new(id))
        .await
        .map_err(|e| match e {
            RepositoryError::NotFound => {
                CliError::Invalid(format!("no active token with id {id}"))
            }
            other => other.into(),
        })?;
    tracing::info!(token_id = id, "Token revoked");
    Ok(())
}
