//! Account entity: credentials, session tokens, and lifecycle status.
//!
//! One [`Account`] belongs to exactly one [`crate::Client`] for the duration
//! of a session. All status transitions are driven by response
//! classification; the only caller-initiated transition is the explicit
//! status probe.

use std::fmt;
use std::io::Write;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

static AUTH_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{40}$").expect("invalid auth token regex"));

/// Lifecycle status of an account, as last observed by the request engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountStatus {
    #[default]
    Unknown,
    Good,
    /// `auth_token` rejected (401, code 32). Recoverable via relogin.
    BadToken,
    /// Suspended (code 141/37 in a 200, code 64 in a 403). Terminal.
    Suspended,
    /// Locked behind a captcha challenge (code 326). Recoverable via unlock.
    Locked,
    /// Locked behind a manual consent flow. Terminal for automation.
    ConsentLocked,
    /// The platform no longer knows the account (404, or 400 code 399).
    NotFound,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountStatus::Unknown => "UNKNOWN",
            AccountStatus::Good => "GOOD",
            AccountStatus::BadToken => "BAD_TOKEN",
            AccountStatus::Suspended => "SUSPENDED",
            AccountStatus::Locked => "LOCKED",
            AccountStatus::ConsentLocked => "CONSENT_LOCKED",
            AccountStatus::NotFound => "NOT_FOUND",
        };
        f.write_str(name)
    }
}

/// Redact a secret down to its first and last three characters.
pub fn hidden_value(value: &str) -> String {
    let start: String = value.chars().take(3).collect();
    let end: String = value
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{start}**{end}")
}

/// Validation failure while building or mutating an account.
#[derive(Debug, Error)]
pub enum InvalidAccountField {
    #[error("auth_token `{0}` does not match ^[a-f0-9]{{40}}$")]
    AuthToken(String),
}

/// TOTP derivation failure.
#[derive(Debug, Error)]
pub enum TotpError {
    #[error("account has no totp_secret")]
    MissingSecret,
    #[error("totp_secret is not valid base32: {0}")]
    BadSecret(String),
    #[error("system clock error: {0}")]
    Clock(String),
}

/// A platform identity plus the credentials needed to recover it.
#[derive(Debug, Clone, Default)]
pub struct Account {
    auth_token: Option<String>,
    ct0: Option<String>,
    id: Option<u64>,
    name: Option<String>,
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
    totp_secret: Option<String>,
    backup_code: Option<String>,
    status: AccountStatus,
}

impl Account {
    /// Account from an `auth_token` alone. The token is validated against
    /// the platform's 40-hex shape.
    pub fn new(auth_token: impl Into<String>) -> Result<Self, InvalidAccountField> {
        Account::builder().auth_token(auth_token).build()
    }

    pub fn builder() -> AccountBuilder {
        AccountBuilder::default()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn ct0(&self) -> Option<&str> {
        self.ct0.as_deref()
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn totp_secret(&self) -> Option<&str> {
        self.totp_secret.as_deref()
    }

    pub fn backup_code(&self) -> Option<&str> {
        self.backup_code.as_deref()
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    /// Replace the session token. Rejects values that do not look like a
    /// platform auth token.
    pub fn set_auth_token(&mut self, auth_token: impl Into<String>) -> Result<(), InvalidAccountField> {
        let auth_token = auth_token.into();
        if !AUTH_TOKEN_RE.is_match(&auth_token) {
            return Err(InvalidAccountField::AuthToken(auth_token));
        }
        self.auth_token = Some(auth_token);
        Ok(())
    }

    pub fn set_ct0(&mut self, ct0: impl Into<String>) {
        self.ct0 = Some(ct0.into());
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    pub fn set_totp_secret(&mut self, totp_secret: impl Into<String>) {
        self.totp_secret = Some(totp_secret.into());
    }

    pub fn set_backup_code(&mut self, backup_code: impl Into<String>) {
        self.backup_code = Some(backup_code.into());
    }

    pub(crate) fn set_status(&mut self, status: AccountStatus) {
        self.status = status;
    }

    pub fn hidden_auth_token(&self) -> Option<String> {
        self.auth_token.as_deref().map(hidden_value)
    }

    pub fn hidden_password(&self) -> Option<String> {
        self.password.as_deref().map(hidden_value)
    }

    pub fn hidden_totp_secret(&self) -> Option<String> {
        self.totp_secret.as_deref().map(hidden_value)
    }

    pub fn hidden_backup_code(&self) -> Option<String> {
        self.backup_code.as_deref().map(hidden_value)
    }

    /// Current TOTP value for the 2FA challenge (RFC 6238: SHA-1, 6 digits,
    /// 30 second step).
    pub fn totp_code(&self) -> Result<String, TotpError> {
        let secret = self.totp_secret.as_deref().ok_or(TotpError::MissingSecret)?;
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|err| TotpError::BadSecret(format!("{err:?}")))?;
        let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, bytes);
        totp.generate_current()
            .map_err(|err| TotpError::Clock(err.to_string()))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Account(auth_token={}, id={}, username={})",
            self.hidden_auth_token().as_deref().unwrap_or("-"),
            self.id.map(|id| id.to_string()).as_deref().unwrap_or("-"),
            self.username.as_deref().unwrap_or("-"),
        )
    }
}

/// Fluent account constructor; validation happens at [`AccountBuilder::build`].
#[derive(Debug, Default)]
pub struct AccountBuilder {
    auth_token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
    totp_secret: Option<String>,
    backup_code: Option<String>,
}

impl AccountBuilder {
    pub fn auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn totp_secret(mut self, totp_secret: impl Into<String>) -> Self {
        self.totp_secret = Some(totp_secret.into());
        self
    }

    pub fn backup_code(mut self, backup_code: impl Into<String>) -> Self {
        self.backup_code = Some(backup_code.into());
        self
    }

    pub fn build(self) -> Result<Account, InvalidAccountField> {
        if let Some(ref auth_token) = self.auth_token
            && !AUTH_TOKEN_RE.is_match(auth_token)
        {
            return Err(InvalidAccountField::AuthToken(auth_token.clone()));
        }

        Ok(Account {
            auth_token: self.auth_token,
            username: self.username,
            password: self.password,
            email: self.email,
            totp_secret: self.totp_secret,
            backup_code: self.backup_code,
            ..Default::default()
        })
    }
}

/// Named fields of the line-oriented account file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountField {
    AuthToken,
    Password,
    Email,
    Username,
    TotpSecret,
    BackupCode,
}

/// Default field order: `auth_token:password:email:username`.
pub const DEFAULT_ACCOUNT_FIELDS: [AccountField; 4] = [
    AccountField::AuthToken,
    AccountField::Password,
    AccountField::Email,
    AccountField::Username,
];

/// Failure while reading or writing an account file.
#[derive(Debug, Error)]
pub enum AccountFileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Invalid {
        line: usize,
        source: InvalidAccountField,
    },
}

/// Load accounts from a line-oriented file: one account per line, fields
/// joined by `separator` in the order given by `fields`. Empty fields are
/// treated as absent.
pub fn load_accounts_from_file(
    filepath: impl AsRef<Path>,
    separator: &str,
    fields: &[AccountField],
) -> Result<Vec<Account>, AccountFileError> {
    let content = std::fs::read_to_string(filepath)?;
    let mut accounts = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut builder = Account::builder();
        for (field, value) in fields.iter().zip(line.split(separator)) {
            if value.is_empty() {
                continue;
            }
            builder = match field {
                AccountField::AuthToken => builder.auth_token(value),
                AccountField::Password => builder.password(value),
                AccountField::Email => builder.email(value),
                AccountField::Username => builder.username(value),
                AccountField::TotpSecret => builder.totp_secret(value),
                AccountField::BackupCode => builder.backup_code(value),
            };
        }

        let account = builder.build().map_err(|source| AccountFileError::Invalid {
            line: index + 1,
            source,
        })?;
        accounts.push(account);
    }

    Ok(accounts)
}

/// Write accounts back out in the same line-oriented format. Absent fields
/// serialize as empty strings between separators.
pub fn extract_accounts_to_file<'a>(
    filepath: impl AsRef<Path>,
    accounts: impl IntoIterator<Item = &'a Account>,
    separator: &str,
    fields: &[AccountField],
) -> Result<(), AccountFileError> {
    let mut file = std::fs::File::create(filepath)?;
    for account in accounts {
        let values: Vec<&str> = fields
            .iter()
            .map(|field| {
                match field {
                    AccountField::AuthToken => account.auth_token(),
                    AccountField::Password => account.password(),
                    AccountField::Email => account.email(),
                    AccountField::Username => account.username(),
                    AccountField::TotpSecret => account.totp_secret(),
                    AccountField::BackupCode => account.backup_code(),
                }
                .unwrap_or("")
            })
            .collect();
        writeln!(file, "{}", values.join(separator))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn hidden_value_keeps_edges_only() {
        assert_eq!(hidden_value("abcdef0123456789"), "abc**789");
        assert_eq!(hidden_value(TOKEN), "012**567");
    }

    #[test]
    fn rejects_malformed_auth_token() {
        assert!(Account::new("not-hex").is_err());
        assert!(Account::new("ABCDEF0123456789ABCDEF0123456789ABCDEF01").is_err());
        assert!(Account::new(TOKEN).is_ok());
    }

    #[test]
    fn set_auth_token_validates_too() {
        let mut account = Account::new(TOKEN).unwrap();
        assert!(account.set_auth_token("short").is_err());
        assert_eq!(account.auth_token(), Some(TOKEN));
    }

    #[test]
    fn status_starts_unknown() {
        let account = Account::new(TOKEN).unwrap();
        assert_eq!(account.status(), AccountStatus::Unknown);
    }

    #[test]
    fn totp_code_requires_secret() {
        let account = Account::new(TOKEN).unwrap();
        assert!(matches!(account.totp_code(), Err(TotpError::MissingSecret)));
    }

    #[test]
    fn totp_code_is_six_digits() {
        let account = Account::builder()
            .auth_token(TOKEN)
            .totp_secret("JBSWY3DPEHPK3PXP")
            .build()
            .unwrap();
        let code = account.totp_code().unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn account_file_round_trip() {
        let dir = std::env::temp_dir().join("twclient-account-io-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accounts.txt");

        let account = Account::builder()
            .auth_token(TOKEN)
            .username("alice")
            .build()
            .unwrap();
        extract_accounts_to_file(&path, [&account], ":", &DEFAULT_ACCOUNT_FIELDS).unwrap();

        let loaded = load_accounts_from_file(&path, ":", &DEFAULT_ACCOUNT_FIELDS).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].auth_token(), Some(TOKEN));
        assert_eq!(loaded[0].username(), Some("alice"));
        assert_eq!(loaded[0].password(), None);
    }
}
