use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountPrivacy {
    Public,
    Private,
}

impl AccountPrivacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountPrivacy::Public => "public",
            AccountPrivacy::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(AccountPrivacy::Public),
            "private" => Some(AccountPrivacy::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub handle: String,
    pub email: String,
    pub display_name: String,
    pub privacy: AccountPrivacy,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Profile shape returned to anyone other than the account owner.
#[derive(Debug, Clone, Serialize)]
pub struct PublicAccount {
    pub id: Uuid,
    pub handle: String,
    pub display_name: String,
    pub privacy: AccountPrivacy,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Account> for PublicAccount {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            handle: account.handle,
            display_name: account.display_name,
            privacy: account.privacy,
            created_at: account.created_at,
        }
    }
}

impl From<&Account> for PublicAccount {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            handle: account.handle.clone(),
            display_name: account.display_name.clone(),
            privacy: account.privacy,
            created_at: account.created_at,
        }
    }
}
