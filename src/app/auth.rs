use std::sync::Arc;

use anyhow::{anyhow, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use pasetors::claims::{Claims, ClaimsValidationRules};
use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::{local, version4::V4, Local};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::account::{Account, AccountPrivacy};
use crate::infra::store::{AccountStore, NewAccount};

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub account_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    key: [u8; 32],
    access_ttl_minutes: u64,
}

impl AuthService {
    pub fn new(accounts: Arc<dyn AccountStore>, key: [u8; 32], access_ttl_minutes: u64) -> Self {
        Self {
            accounts,
            key,
            access_ttl_minutes,
        }
    }

    /// Creates the account and signs the caller straight in. Handle and
    /// email are lowercased before they hit the store.
    pub async fn signup(
        &self,
        handle: String,
        email: String,
        display_name: String,
        password: String,
        privacy: AccountPrivacy,
    ) -> Result<(Account, IssuedToken)> {
        let password_hash = hash_password(&password)?;
        let account = self
            .accounts
            .insert_account(NewAccount {
                handle: handle.to_lowercase(),
                email: email.to_lowercase(),
                display_name,
                privacy,
                password_hash,
            })
            .await?;

        let token = self.issue_access_token(account.id)?;
        Ok((account, token))
    }

    pub async fn login(&self, identifier: &str, password: &str) -> Result<Option<IssuedToken>> {
        let credentials = match self.accounts.credentials(identifier).await? {
            Some(credentials) => credentials,
            None => return Ok(None),
        };
        if credentials.password_hash.is_empty() {
            return Ok(None);
        }
        if !verify_password(password, &credentials.password_hash)? {
            return Ok(None);
        }

        let token = self.issue_access_token(credentials.account_id)?;
        Ok(Some(token))
    }

    pub async fn authenticate_access_token(&self, token: &str) -> Result<Option<AuthSession>> {
        let claims = match self.decrypt_claims(token)? {
            Some(claims) => claims,
            None => return Ok(None),
        };
        if !has_token_type(&claims, "access") {
            return Ok(None);
        }
        let account_id = claim_uuid(&claims, "sub")?;
        Ok(Some(AuthSession { account_id }))
    }

    pub async fn current_account(&self, account_id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.account_by_id(account_id).await?)
    }

    fn issue_access_token(&self, account_id: Uuid) -> Result<IssuedToken> {
        let (claims, expires_at) = self.build_access_claims(account_id)?;
        let key = SymmetricKey::<V4>::from(&self.key)?;
        let access_token = local::encrypt(&key, &claims, None, None)?;
        Ok(IssuedToken {
            access_token,
            expires_at,
        })
    }

    fn decrypt_claims(&self, token: &str) -> Result<Option<Claims>> {
        let key = SymmetricKey::<V4>::from(&self.key)?;
        let mut rules = ClaimsValidationRules::new();
        rules.validate_issuer_with("kith");
        rules.validate_audience_with("kith");

        let untrusted = match UntrustedToken::<Local, V4>::try_from(token) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        let trusted = match local::decrypt(&key, &untrusted, &rules, None, None) {
            Ok(token) => token,
            Err(_) => return Ok(None),
        };
        Ok(trusted.payload_claims().cloned())
    }

    fn build_access_claims(&self, account_id: Uuid) -> Result<(Claims, OffsetDateTime)> {
        let duration = std::time::Duration::from_secs(self.access_ttl_minutes * 60);
        let mut claims = Claims::new_expires_in(&duration)?;
        claims.issuer("kith")?;
        claims.audience("kith")?;
        claims.subject(&account_id.to_string())?;
        claims.add_additional("typ", "access")?;
        let expires_at =
            OffsetDateTime::now_utc() + Duration::minutes(self.access_ttl_minutes as i64);
        Ok((claims, expires_at))
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {}", err))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|err| anyhow!("failed to parse password hash: {}", err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn claim_uuid(claims: &Claims, name: &str) -> Result<Uuid> {
    let value = claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("missing {} claim", name))?;
    Ok(Uuid::parse_str(value)?)
}

fn has_token_type(claims: &Claims, expected: &str) -> bool {
    claims
        .get_claim("typ")
        .and_then(|value| value.as_str())
        .map(|value| value == expected)
        .unwrap_or(false)
}
