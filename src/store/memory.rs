//! In-process storage backend.
//!
//! Implements every store trait over concurrent maps. Used by the binary
//! when no database is wired in, and by tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;

use crate::store::{
    Movie, MovieQuery, MovieStore, NewUser, PermissionStore, Permissions, SortColumn, StoreError,
    TokenHash, TokenIssuer, TokenScope, User, UserStore, TOKEN_PLAINTEXT_LEN,
};

const TOKEN_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Clone)]
struct StoredToken {
    user_id: i64,
    scope: TokenScope,
    expiry: DateTime<Utc>,
}

/// Thread-safe in-memory store, cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    users: DashMap<i64, User>,
    emails: DashMap<String, i64>,
    /// Expired entries are dropped on lookup and whenever a token is issued.
    tokens: DashMap<TokenHash, StoredToken>,
    permissions: DashMap<i64, BTreeSet<String>>,
    movies: Mutex<BTreeMap<i64, Movie>>,
    next_user_id: AtomicI64,
    next_movie_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user as activated.
    pub fn activate(&self, user_id: i64) -> Result<(), StoreError> {
        let mut user = self.inner.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.activated = true;
        Ok(())
    }

    /// Number of stored tokens, including expired ones not yet pruned.
    pub fn token_count(&self) -> usize {
        self.inner.tokens.len()
    }

    fn movies(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, Movie>>, StoreError> {
        self.inner
            .movies
            .lock()
            .map_err(|_| StoreError::Backend("movie table lock poisoned".into()))
    }
}

fn generate_plaintext() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_PLAINTEXT_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_for_token(&self, scope: TokenScope, hash: &TokenHash) -> Result<User, StoreError> {
        let now = Utc::now();
        let token = self.inner.tokens.get(hash).ok_or(StoreError::NotFound)?;
        if token.expiry <= now {
            drop(token);
            self.inner.tokens.remove_if(hash, |_, t| t.expiry <= now);
            return Err(StoreError::NotFound);
        }
        if token.scope != scope {
            return Err(StoreError::NotFound);
        }
        let user_id = token.user_id;
        drop(token);

        self.inner
            .users
            .get(&user_id)
            .map(|u| u.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let email = user.email.to_lowercase();
        match self.inner.emails.entry(email.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Duplicate("email")),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let id = self.inner.next_user_id.fetch_add(1, Ordering::Relaxed) + 1;
                let record = User {
                    id,
                    name: user.name,
                    email,
                    activated: false,
                };
                self.inner.users.insert(id, record.clone());
                slot.insert(id);
                Ok(record)
            }
        }
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        Ok(self
            .inner
            .permissions
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: i64, codes: &[&str]) -> Result<(), StoreError> {
        if !self.inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        self.inner
            .permissions
            .entry(user_id)
            .or_default()
            .extend(codes.iter().map(|c| c.to_string()));
        Ok(())
    }
}

#[async_trait]
impl TokenIssuer for MemoryStore {
    async fn issue(&self, user_id: i64, scope: TokenScope, ttl: Duration) -> Result<String, StoreError> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StoreError::Backend(e.to_string()))?;
        let now = Utc::now();
        self.inner.tokens.retain(|_, t| t.expiry > now);

        let plaintext = generate_plaintext();
        self.inner.tokens.insert(
            TokenHash::of(&plaintext),
            StoredToken {
                user_id,
                scope,
                expiry: now + ttl,
            },
        );
        Ok(plaintext)
    }
}

#[async_trait]
impl MovieStore for MemoryStore {
    async fn insert(
        &self,
        title: String,
        year: i32,
        runtime: i32,
        genres: Vec<String>,
    ) -> Result<Movie, StoreError> {
        let id = self.inner.next_movie_id.fetch_add(1, Ordering::Relaxed) + 1;
        let movie = Movie {
            id,
            title,
            year,
            runtime,
            genres,
            version: 1,
        };
        self.movies()?.insert(id, movie.clone());
        Ok(movie)
    }

    async fn get(&self, id: i64) -> Result<Movie, StoreError> {
        self.movies()?.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update(&self, mut movie: Movie) -> Result<Movie, StoreError> {
        let mut movies = self.movies()?;
        let stored = movies.get_mut(&movie.id).ok_or(StoreError::EditConflict)?;
        if stored.version != movie.version {
            return Err(StoreError::EditConflict);
        }
        movie.version += 1;
        *stored = movie.clone();
        Ok(movie)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.movies()?.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn list(&self, query: &MovieQuery) -> Result<(Vec<Movie>, usize), StoreError> {
        let title = query.title.as_deref().map(str::to_lowercase);
        let mut matched: Vec<Movie> = self
            .movies()?
            .values()
            .filter(|m| {
                title
                    .as_deref()
                    .map_or(true, |t| m.title.to_lowercase().contains(t))
            })
            .filter(|m| query.genres.iter().all(|g| m.genres.contains(g)))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            let primary = match query.sort {
                SortColumn::Id => a.id.cmp(&b.id),
                SortColumn::Title => a.title.cmp(&b.title),
                SortColumn::Year => a.year.cmp(&b.year),
                SortColumn::Runtime => a.runtime.cmp(&b.runtime),
            };
            let primary = if query.descending { primary.reverse() } else { primary };
            // Stable tie-break on id, always ascending.
            primary.then(a.id.cmp(&b.id))
        });

        let total = matched.len();
        let offset = (query.page.saturating_sub(1) as usize).saturating_mul(query.page_size as usize);
        let page = matched
            .into_iter()
            .skip(offset)
            .take(query.page_size as usize)
            .collect();
        Ok((page, total))
    }
}
