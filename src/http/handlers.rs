//! Business handlers.
//!
//! A small movies catalogue and user registration, enough for the pipeline
//! to have something to protect. Handlers receive everything explicitly:
//! application state, path and query parameters, and the request context
//! where identity matters.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::http::context::RequestContext;
use crate::http::error::ApiError;
use crate::http::server::AppState;
use crate::mailer::WelcomeMail;
use crate::resilience::bounded;
use crate::store::{runtime_mins, MovieQuery, NewUser, SortColumn, StoreError, TokenScope};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Permission codes checked by the movie routes.
pub const MOVIES_READ: &str = "movies:read";
pub const MOVIES_WRITE: &str = "movies:write";

const SORT_SAFELIST: [&str; 8] = ["id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime"];
const ACTIVATION_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Collects field errors, keeping the first message per field.
#[derive(Debug, Default)]
struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.errors
                .entry(field.to_string())
                .or_insert_with(|| message.to_string());
        }
    }

    fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::FailedValidation(self.errors))
        }
    }
}

// ============================================================================
// Health and diagnostics
// ============================================================================

pub async fn healthcheck(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": state.env,
            "version": VERSION,
        },
    }))
}

pub async fn debug_vars(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "version": VERSION,
        "metrics": state.metrics.snapshot(),
        "background_tasks": state.tasks.in_flight(),
        "rate_limiter_clients": state.limiter.tracked_clients(),
        "panics_recovered": state.panics.recovered(),
        "timestamp": Utc::now().timestamp(),
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

pub async fn method_not_allowed(method: Method) -> ApiError {
    ApiError::MethodNotAllowed(method)
}

// ============================================================================
// Movies
// ============================================================================

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ApiError::NotFound),
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn deserialize_runtime<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i32>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|raw| runtime_mins::parse(&raw).ok_or_else(|| serde::de::Error::custom("invalid runtime format")))
        .transpose()
}

/// Movie fields as sent by clients. Every field is optional so create and
/// partial update share one shape; validation decides what is required.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovieInput {
    pub title: Option<String>,
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_runtime")]
    pub runtime: Option<i32>,
    pub genres: Option<Vec<String>>,
}

/// Year component of the current UTC date.
fn current_year() -> i32 {
    Utc::now().year()
}

fn validate_movie(v: &mut Validator, title: &str, year: i32, runtime: i32, genres: Option<&[String]>) {
    v.check(!title.is_empty(), "title", "must be provided");
    v.check(title.len() <= 500, "title", "must not be more than 500 bytes long");

    v.check(year != 0, "year", "must be provided");
    v.check(year >= 1888, "year", "must be greater than 1888");
    v.check(year <= current_year(), "year", "must not be in the future");

    v.check(runtime != 0, "runtime", "must be provided");
    v.check(runtime > 0, "runtime", "must be a positive integer");

    match genres {
        None => v.check(false, "genres", "must be provided"),
        Some(genres) => {
            v.check(!genres.is_empty(), "genres", "must contain at least 1 genre");
            v.check(genres.len() <= 5, "genres", "must not contain more than 5 genres");
            let unique: HashSet<&String> = genres.iter().collect();
            v.check(unique.len() == genres.len(), "genres", "must not contain duplicate values");
        }
    }
}

pub async fn create_movie(
    State(state): State<AppState>,
    payload: Result<Json<MovieInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = body(payload)?;

    let title = input.title.unwrap_or_default();
    let year = input.year.unwrap_or_default();
    let runtime = input.runtime.unwrap_or_default();

    let mut v = Validator::default();
    validate_movie(&mut v, &title, year, runtime, input.genres.as_deref());
    v.finish()?;

    let genres = input.genres.unwrap_or_default();
    let movie = bounded(state.lookup_timeout, state.movies.insert(title, year, runtime, genres)).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&format!("/v1/movies/{}", movie.id)) {
        headers.insert(header::LOCATION, location);
    }

    Ok((StatusCode::CREATED, headers, Json(json!({ "movie": movie }))).into_response())
}

pub async fn show_movie(State(state): State<AppState>, Path(raw_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&raw_id)?;
    let movie = bounded(state.lookup_timeout, state.movies.get(id)).await?;
    Ok(Json(json!({ "movie": movie })))
}

pub async fn update_movie(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(raw_id): Path<String>,
    payload: Result<Json<MovieInput>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&raw_id)?;
    let input = body(payload)?;

    let mut movie = bounded(state.lookup_timeout, state.movies.get(id)).await?;

    if let Some(title) = input.title {
        movie.title = title;
    }
    if let Some(year) = input.year {
        movie.year = year;
    }
    if let Some(runtime) = input.runtime {
        movie.runtime = runtime;
    }
    if let Some(genres) = input.genres {
        movie.genres = genres;
    }

    let mut v = Validator::default();
    validate_movie(&mut v, &movie.title, movie.year, movie.runtime, Some(movie.genres.as_slice()));
    v.finish()?;

    let movie = bounded(state.lookup_timeout, state.movies.update(movie)).await?;
    tracing::debug!(
        movie_id = movie.id,
        version = movie.version,
        user_id = ctx.principal().user().map(|u| u.id),
        "Movie updated"
    );
    Ok(Json(json!({ "movie": movie })))
}

pub async fn delete_movie(State(state): State<AppState>, Path(raw_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&raw_id)?;
    bounded(state.lookup_timeout, state.movies.delete(id)).await?;
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}

/// Raw listing parameters; everything is validated by hand so that every
/// problem is reported at once.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub title: Option<String>,
    pub genres: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort: Option<String>,
}

fn parse_sort(raw: &str) -> Option<(SortColumn, bool)> {
    if !SORT_SAFELIST.contains(&raw) {
        return None;
    }
    let descending = raw.starts_with('-');
    let column = match raw.trim_start_matches('-') {
        "id" => SortColumn::Id,
        "title" => SortColumn::Title,
        "year" => SortColumn::Year,
        "runtime" => SortColumn::Runtime,
        _ => return None,
    };
    Some((column, descending))
}

fn read_int(v: &mut Validator, raw: Option<&str>, field: &str, default: i64) -> i64 {
    match raw {
        None | Some("") => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            v.check(false, field, "must be an integer value");
            default
        }),
    }
}

/// Build a [`MovieQuery`] from raw parameters, reporting every violation.
pub fn movie_query(params: &ListParams) -> Result<MovieQuery, ApiError> {
    let mut v = Validator::default();

    let page = read_int(&mut v, params.page.as_deref(), "page", 1);
    let page_size = read_int(&mut v, params.page_size.as_deref(), "page_size", 20);
    let sort = params.sort.as_deref().filter(|s| !s.is_empty()).unwrap_or("id");

    v.check(page > 0, "page", "must be greater than zero");
    v.check(page <= 10_000_000, "page", "must be a maximum of 10 million");
    v.check(page_size > 0, "page_size", "must be greater than zero");
    v.check(page_size <= 100, "page_size", "must be a maximum of 100");

    let parsed_sort = parse_sort(sort);
    v.check(parsed_sort.is_some(), "sort", "invalid sort value");
    v.finish()?;

    let (sort, descending) = parsed_sort.unwrap_or((SortColumn::Id, false));
    let genres = params
        .genres
        .as_deref()
        .map(|g| {
            g.split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(MovieQuery {
        title: params.title.clone().filter(|t| !t.is_empty()),
        genres,
        sort,
        descending,
        // Both bounded above by validation.
        page: page as u32,
        page_size: page_size as u32,
    })
}

fn page_metadata(total: usize, page: u32, page_size: u32) -> Value {
    if total == 0 {
        return json!({});
    }
    let last_page = total.div_ceil(page_size as usize);
    json!({
        "current_page": page,
        "page_size": page_size,
        "first_page": 1,
        "last_page": last_page,
        "total_records": total,
    })
}

pub async fn list_movies(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let query = movie_query(&params)?;

    let (movies, total) = bounded(state.lookup_timeout, state.movies.list(&query)).await?;
    Ok(Json(json!({
        "movies": movies,
        "metadata": page_metadata(total, query.page, query.page_size),
    })))
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = body(payload)?;

    let mut v = Validator::default();
    v.check(!input.name.is_empty(), "name", "must be provided");
    v.check(input.name.len() <= 500, "name", "must not be more than 500 bytes long");
    v.check(!input.email.is_empty(), "email", "must be provided");
    v.check(looks_like_email(&input.email), "email", "must be a valid email address");
    v.finish()?;

    let user = match bounded(
        state.lookup_timeout,
        state.users.insert(NewUser {
            name: input.name,
            email: input.email,
        }),
    )
    .await
    {
        Ok(user) => user,
        Err(StoreError::Duplicate("email")) => {
            let mut fields = BTreeMap::new();
            fields.insert(
                "email".to_string(),
                "a user with this email address already exists".to_string(),
            );
            return Err(ApiError::FailedValidation(fields));
        }
        Err(e) => return Err(e.into()),
    };

    bounded(state.lookup_timeout, state.permissions.add_for_user(user.id, &[MOVIES_READ])).await?;

    let token = bounded(
        state.lookup_timeout,
        state.tokens.issue(user.id, TokenScope::Activation, ACTIVATION_TTL),
    )
    .await?;

    let mailer = state.mailer.clone();
    let recipient = user.email.clone();
    let mail = WelcomeMail {
        user_id: user.id,
        name: user.name.clone(),
        activation_token: token,
    };
    state.tasks.spawn("welcome-mail", async move {
        if let Err(e) = mailer.send_welcome(&recipient, &mail).await {
            tracing::error!(error = %e, user_id = mail.user_id, "Failed to send welcome mail");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ListParams {
        let mut p = ListParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "title" => p.title = value,
                "genres" => p.genres = value,
                "page" => p.page = value,
                "page_size" => p.page_size = value,
                "sort" => p.sort = value,
                _ => unreachable!(),
            }
        }
        p
    }

    fn field_errors(err: ApiError) -> BTreeMap<String, String> {
        match err {
            ApiError::FailedValidation(fields) => fields,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn query_defaults() {
        let q = movie_query(&ListParams::default()).unwrap();
        assert_eq!((q.page, q.page_size, q.sort, q.descending), (1, 20, SortColumn::Id, false));
        assert!(q.genres.is_empty());
        assert!(q.title.is_none());
    }

    #[test]
    fn query_parses_filters_and_descending_sort() {
        let q = movie_query(&params(&[
            ("title", "godfather"),
            ("genres", "crime, drama"),
            ("sort", "-year"),
            ("page", "2"),
            ("page_size", "5"),
        ]))
        .unwrap();
        assert_eq!(q.title.as_deref(), Some("godfather"));
        assert_eq!(q.genres, ["crime", "drama"]);
        assert_eq!((q.sort, q.descending), (SortColumn::Year, true));
        assert_eq!((q.page, q.page_size), (2, 5));
    }

    #[test]
    fn query_reports_every_violation() {
        let err = movie_query(&params(&[("page", "0"), ("page_size", "101"), ("sort", "rating")])).unwrap_err();
        let fields = field_errors(err);
        assert_eq!(fields["page"], "must be greater than zero");
        assert_eq!(fields["page_size"], "must be a maximum of 100");
        assert_eq!(fields["sort"], "invalid sort value");
    }

    #[test]
    fn query_rejects_non_integer_page() {
        let fields = field_errors(movie_query(&params(&[("page", "two")])).unwrap_err());
        assert_eq!(fields["page"], "must be an integer value");
    }

    #[test]
    fn movie_validation_rules() {
        let mut v = Validator::default();
        let genres = vec!["drama".to_string(), "drama".to_string()];
        validate_movie(&mut v, "", 1800, -5, Some(genres.as_slice()));
        let fields = field_errors(v.finish().unwrap_err());
        assert_eq!(fields["title"], "must be provided");
        assert_eq!(fields["year"], "must be greater than 1888");
        assert_eq!(fields["runtime"], "must be a positive integer");
        assert_eq!(fields["genres"], "must not contain duplicate values");

        let mut v = Validator::default();
        validate_movie(&mut v, "Casablanca", 1942, 102, None);
        assert_eq!(field_errors(v.finish().unwrap_err())["genres"], "must be provided");

        let mut v = Validator::default();
        let genres = vec!["drama".to_string()];
        validate_movie(&mut v, "Casablanca", current_year() + 1, 102, Some(genres.as_slice()));
        assert_eq!(field_errors(v.finish().unwrap_err())["year"], "must not be in the future");
    }

    #[test]
    fn current_year_follows_the_clock() {
        let year = current_year();
        assert_eq!(year, Utc::now().year());
        assert!(year > 1888);
    }

    #[test]
    fn ids_must_be_positive_integers() {
        assert_eq!(parse_id("7").unwrap(), 7);
        assert!(matches!(parse_id("0"), Err(ApiError::NotFound)));
        assert!(matches!(parse_id("-3"), Err(ApiError::NotFound)));
        assert!(matches!(parse_id("abc"), Err(ApiError::NotFound)));
    }

    #[test]
    fn metadata_is_empty_without_records() {
        assert_eq!(page_metadata(0, 1, 20), json!({}));
        let meta = page_metadata(41, 2, 20);
        assert_eq!(meta["last_page"], 3);
        assert_eq!(meta["total_records"], 41);
    }

    #[test]
    fn runtime_input_uses_minutes_format() {
        let input: MovieInput = serde_json::from_str(r#"{"runtime": "102 mins"}"#).unwrap();
        assert_eq!(input.runtime, Some(102));
        assert!(serde_json::from_str::<MovieInput>(r#"{"runtime": 102}"#).is_err());
        assert!(serde_json::from_str::<MovieInput>(r#"{"rating": 5}"#).is_err());
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("alice@example.com"));
        assert!(!looks_like_email("alice"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("alice@localhost"));
    }
}
