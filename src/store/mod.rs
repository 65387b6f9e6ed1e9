//! Storage collaborators.
//!
//! # Data Flow
//! ```text
//! security/auth.rs        → UserStore::get_for_token (scope + token hash)
//! security/permissions.rs → PermissionStore::get_all_for_user
//! http/handlers.rs        → MovieStore CRUD, UserStore::insert
//! ```
//!
//! # Design Decisions
//! - The pipeline only sees these traits; the backing store is swappable
//! - Plaintext tokens never cross this boundary, only their SHA-256 hash
//! - Every lookup may fail transiently; callers bound them with a timeout

pub mod memory;

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use memory::MemoryStore;

/// Length of every plaintext token handed to clients.
pub const TOKEN_PLAINTEXT_LEN: usize = 26;

/// Errors returned by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No matching record (including expired tokens).
    #[error("record not found")]
    NotFound,

    /// Optimistic version check failed on update.
    #[error("edit conflict")]
    EditConflict,

    /// A record with the same unique key already exists.
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    /// The lookup did not finish within its deadline.
    #[error("lookup timed out after {0} ms")]
    Timeout(u128),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    Activation,
    Authentication,
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenScope::Activation => f.write_str("activation"),
            TokenScope::Authentication => f.write_str("authentication"),
        }
    }
}

/// SHA-256 digest of a plaintext token. The only form tokens are stored in.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenHash([u8; 32]);

impl TokenHash {
    pub fn of(plaintext: &str) -> Self {
        Self(Sha256::digest(plaintext.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First four bytes are enough to correlate log lines.
        write!(
            f,
            "TokenHash({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub activated: bool,
}

/// Fields needed to register an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

/// Permission codes held by a single user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(BTreeSet<String>);

impl Permissions {
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub year: i32,
    /// Running time in minutes, `"<n> mins"` on the wire.
    #[serde(with = "runtime_mins")]
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

/// Serde format for runtimes: `"102 mins"`.
pub mod runtime_mins {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(runtime: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{runtime} mins"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom("invalid runtime format"))
    }

    pub fn parse(raw: &str) -> Option<i32> {
        match raw.split(' ').collect::<Vec<_>>().as_slice() {
            [minutes, "mins"] => minutes.parse().ok(),
            _ => None,
        }
    }
}

/// Column a movie listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Id,
    Title,
    Year,
    Runtime,
}

/// Filtering, ordering and paging for movie listings.
#[derive(Debug, Clone)]
pub struct MovieQuery {
    pub title: Option<String>,
    pub genres: Vec<String>,
    pub sort: SortColumn,
    pub descending: bool,
    pub page: u32,
    pub page_size: u32,
}

impl Default for MovieQuery {
    fn default() -> Self {
        Self {
            title: None,
            genres: Vec::new(),
            sort: SortColumn::Id,
            descending: false,
            page: 1,
            page_size: 20,
        }
    }
}

/// Resolves users by token and persists new accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find the owner of an unexpired token with the given scope.
    async fn get_for_token(&self, scope: TokenScope, hash: &TokenHash) -> Result<User, StoreError>;

    /// Persist a new, non-activated user.
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
}

/// Resolves the permission codes a user holds.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, StoreError>;

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), StoreError>;
}

/// Mints tokens for a user. Plaintext is returned once and never stored.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(
        &self,
        user_id: i64,
        scope: TokenScope,
        ttl: std::time::Duration,
    ) -> Result<String, StoreError>;
}

/// Movie catalogue persistence.
#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn insert(
        &self,
        title: String,
        year: i32,
        runtime: i32,
        genres: Vec<String>,
    ) -> Result<Movie, StoreError>;

    async fn get(&self, id: i64) -> Result<Movie, StoreError>;

    /// Replace a movie if its stored version still matches `movie.version`.
    async fn update(&self, movie: Movie) -> Result<Movie, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Matching movies for the requested page, plus the total match count.
    async fn list(&self, query: &MovieQuery) -> Result<(Vec<Movie>, usize), StoreError>;
}
