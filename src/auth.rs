use std::future::{ready, Ready};

use actix_web::{web, FromRequest};
use argon2::{
	password_hash::{rand_core::OsRng, PasswordHasher, PasswordVerifier, SaltString},
	Argon2, PasswordHash,
};
use log::{debug, info};
use once_cell::sync::Lazy;
use sqlx::{Pool, Sqlite};

use crate::{
	db,
	error::AppError,
	model::{Identity, User, UserId},
	sessions::SessionAuthority,
	util, validation,
};

pub const SESSION_COOKIE: &str = "token";

const INVALID_CREDENTIALS: &str = "invalid username or password";

// Verified against when the username is unknown, so both failure paths cost one argon2 run.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| {
	hash_password("not-a-real-password").unwrap_or_default()
});

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
	let argon2 = Argon2::default();
	let salt = SaltString::generate(&mut OsRng);

	let hash = argon2
		.hash_password(password.as_bytes(), &salt)?
		.to_string();

	let parsed_hash = PasswordHash::new(&hash)?;

	// Verify hash immediately after creation
	argon2.verify_password(password.as_bytes(), &parsed_hash)?;

	Ok(hash)
}

pub fn verify_password(password: &str, hash: &str) -> Result<(), argon2::password_hash::Error> {
	Argon2::default().verify_password(password.as_bytes(), &PasswordHash::new(hash)?)
}

/// User records and password checks.
#[derive(Clone)]
pub struct CredentialStore {
	sql: Pool<Sqlite>,
}

impl CredentialStore {
	pub fn new(sql: Pool<Sqlite>) -> Self {
		CredentialStore { sql }
	}

	pub async fn register(
		&self,
		username: &str,
		email: &str,
		password: &str,
	) -> Result<UserId, AppError> {
		let username = username.trim();
		let email = email.trim();

		validation::username(username).map_err(AppError::validation)?;
		validation::email(email).map_err(AppError::validation)?;
		validation::password(password).map_err(AppError::validation)?;

		let password = password.to_owned();
		let hash = web::block(move || hash_password(&password))
			.await
			.map_err(AppError::internal)??;

		// the UNIQUE constraints decide concurrent registrations
		let result = sqlx::query(
			"INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
		)
		.bind(username)
		.bind(email)
		.bind(hash)
		.bind(util::now_micros())
		.execute(&self.sql)
		.await;

		match result {
			Ok(x) => {
				info!("registered user {username}");
				Ok(x.last_insert_rowid())
			}
			Err(x) if db::is_unique_violation(&x) => {
				debug!("registration conflict for {username}: {x}");
				Err(AppError::Conflict("username or email already exists".into()))
			}
			Err(x) => Err(x.into()),
		}
	}

	/// Unknown usernames and wrong passwords fail identically.
	pub async fn verify(&self, username: &str, password: &str) -> Result<Identity, AppError> {
		let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
			.bind(username.trim())
			.fetch_optional(&self.sql)
			.await?;

		let (hash, identity) = match user {
			Some(x) => (
				x.password_hash,
				Some(Identity {
					user_id: x.id,
					username: x.username,
				}),
			),
			None => (DUMMY_HASH.clone(), None),
		};

		let password = password.to_owned();
		let matches = web::block(move || verify_password(&password, &hash).is_ok())
			.await
			.map_err(AppError::internal)?;

		match identity {
			Some(identity) if matches => Ok(identity),
			_ => Err(AppError::Auth(INVALID_CREDENTIALS.into())),
		}
	}

	#[cfg(test)]
	pub async fn find_by_id(&self, id: UserId) -> Result<Option<User>, AppError> {
		Ok(
			sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
				.bind(id)
				.fetch_optional(&self.sql)
				.await?,
		)
	}
}

/// The caller's authenticated identity, taken from the session cookie.
pub struct Session {
	pub token: String,
	pub user: Identity,
}

impl FromRequest for Session {
	type Error = AppError;
	type Future = Ready<Result<Self, Self::Error>>;

	fn from_request(
		req: &actix_web::HttpRequest,
		_payload: &mut actix_web::dev::Payload,
	) -> Self::Future {
		let sessions = if let Some(x) = req.app_data::<web::Data<SessionAuthority>>() {
			x
		} else {
			return ready(Err(AppError::internal("session authority not configured")));
		};

		let token = if let Some(x) = req.cookie(SESSION_COOKIE) {
			x.value().to_owned()
		} else {
			return ready(Err(AppError::Auth("not logged in".into())));
		};

		ready(match sessions.validate(&token) {
			Some(user) => Ok(Session { token, user }),
			None => Err(AppError::Auth("session expired".into())),
		})
	}
}
