//! Kiro 凭证加载与回写
//!
//! 支持三种来源：
//! - Kiro 桌面端 / AWS SSO cache 的 JSON 文件（camelCase，兼容 snake_case）
//! - kiro-cli 的 SQLite 数据库 (`auth_kv` 表)
//! - 仅有 refresh token（首次使用时立即刷新）

use crate::config::CredentialsConfig;
use crate::error::GatewayError;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// SQLite 中依次尝试的 (token, 设备注册) 键
pub const SQLITE_KEY_SCHEMES: &[(&str, &str)] = &[
    ("kirocli:social:token", "kirocli:odic:device-registration"),
    ("codewhisperer:odic:token", "codewhisperer:odic:device-registration"),
];

/// 凭证加载错误
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("未配置任何凭证来源")]
    NoSource,

    #[error("读取凭证文件失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析凭证失败: {0}")]
    Parse(String),

    #[error("SQLite 错误: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("凭证缺少字段: {0}")]
    MissingField(&'static str),
}

impl From<CredentialError> for GatewayError {
    fn from(err: CredentialError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

/// 刷新方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// Kiro 桌面端刷新接口
    KiroDesktop,
    /// AWS SSO OIDC（需要 clientId / clientSecret）
    AwsSsoOidc,
}

/// 凭证来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    JsonFile(PathBuf),
    Sqlite(PathBuf),
    RefreshToken(String),
}

impl CredentialSource {
    /// 按 SQLite > JSON 文件 > refresh token 的优先级选择来源
    pub fn from_config(config: &CredentialsConfig) -> Result<Self, CredentialError> {
        if let Some(path) = &config.sqlite_db {
            return Ok(Self::Sqlite(path.clone()));
        }
        if let Some(path) = &config.creds_file {
            return Ok(Self::JsonFile(path.clone()));
        }
        match config.refresh_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(Self::RefreshToken(token.to_string())),
            _ => Err(CredentialError::NoSource),
        }
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self, Self::Sqlite(_))
    }

    /// 加载凭证，`default_region` 用于来源中没有区域信息的情况
    pub fn load(&self, default_region: &str) -> Result<KiroCredentials, CredentialError> {
        let creds = match self {
            Self::JsonFile(path) => load_from_json_file(path, default_region)?,
            Self::Sqlite(path) => load_from_sqlite(path, default_region)?,
            Self::RefreshToken(token) => KiroCredentials::from_refresh_token(token, default_region),
        };
        tracing::info!(
            "[KIRO_AUTH] 凭证已加载: source={}, auth_type={:?}, region={}, has_access={}",
            self.kind(),
            creds.auth_type(),
            creds.region,
            !creds.access_token.is_empty()
        );
        Ok(creds)
    }

    /// 刷新成功后回写，refresh token 来源无需回写
    pub fn save(&self, creds: &KiroCredentials) -> Result<(), CredentialError> {
        match self {
            Self::JsonFile(path) => save_to_json_file(path, creds),
            Self::Sqlite(path) => save_to_sqlite(path, creds),
            Self::RefreshToken(_) => Ok(()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::JsonFile(_) => "json",
            Self::Sqlite(_) => "sqlite",
            Self::RefreshToken(_) => "refresh_token",
        }
    }
}

/// Kiro 凭证
#[derive(Clone, PartialEq)]
pub struct KiroCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub profile_arn: Option<String>,
    /// 认证（SSO）区域
    pub region: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for KiroCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiroCredentials")
            .field("has_access_token", &!self.access_token.is_empty())
            .field("expires_at", &self.expires_at)
            .field("profile_arn", &self.profile_arn)
            .field("region", &self.region)
            .field("auth_type", &self.auth_type())
            .finish()
    }
}

impl KiroCredentials {
    pub fn from_refresh_token(refresh_token: &str, region: &str) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: refresh_token.to_string(),
            expires_at: None,
            profile_arn: None,
            region: region.to_string(),
            client_id: None,
            client_secret: None,
        }
    }

    pub fn auth_type(&self) -> AuthType {
        if self.client_id.is_some() && self.client_secret.is_some() {
            AuthType::AwsSsoOidc
        } else {
            AuthType::KiroDesktop
        }
    }

    /// 是否需要刷新：没有 access token，或剩余有效期不足 `threshold`
    pub fn needs_refresh(&self, threshold: Duration) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => expires_at - Utc::now() <= threshold,
            None => false,
        }
    }

    /// 是否已真正过期
    pub fn is_expired(&self) -> bool {
        self.access_token.is_empty() || self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// 解析 RFC3339 时间，接受结尾的 `Z`
pub fn parse_expires_at(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// 依次读取 camelCase / snake_case 键
fn get_str(obj: &Map<String, Value>, camel: &str, snake: &str) -> Option<String> {
    obj.get(camel)
        .or_else(|| obj.get(snake))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 写入时沿用文件中已有的键风格
fn set_str(obj: &mut Map<String, Value>, camel: &str, snake: &str, value: String) {
    let key = if obj.contains_key(snake) && !obj.contains_key(camel) {
        snake
    } else {
        camel
    };
    obj.insert(key.to_string(), Value::String(value));
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>, CredentialError> {
    let content = fs::read_to_string(path).map_err(|source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => Err(CredentialError::Parse(format!("{:?} 不是 JSON 对象", path))),
        Err(e) => Err(CredentialError::Parse(format!("{:?}: {}", path, e))),
    }
}

fn credentials_from_object(
    obj: &Map<String, Value>,
    default_region: &str,
) -> Result<KiroCredentials, CredentialError> {
    let refresh_token = get_str(obj, "refreshToken", "refresh_token")
        .ok_or(CredentialError::MissingField("refreshToken"))?;
    Ok(KiroCredentials {
        access_token: get_str(obj, "accessToken", "access_token").unwrap_or_default(),
        refresh_token,
        expires_at: get_str(obj, "expiresAt", "expires_at").and_then(|s| parse_expires_at(&s)),
        profile_arn: get_str(obj, "profileArn", "profile_arn"),
        region: get_str(obj, "region", "region").unwrap_or_else(|| default_region.to_string()),
        client_id: get_str(obj, "clientId", "client_id"),
        client_secret: get_str(obj, "clientSecret", "client_secret"),
    })
}

/// 从 JSON 文件加载
///
/// 文件只有 `clientIdHash` 时，从同目录的 `{clientIdHash}.json` 读取设备注册信息
pub fn load_from_json_file(
    path: &Path,
    default_region: &str,
) -> Result<KiroCredentials, CredentialError> {
    let obj = read_json_object(path)?;
    let mut creds = credentials_from_object(&obj, default_region)?;

    if creds.client_id.is_none() {
        if let Some(hash) = get_str(&obj, "clientIdHash", "client_id_hash") {
            let registration = path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!("{}.json", hash));
            match read_json_object(&registration) {
                Ok(reg) => {
                    creds.client_id = get_str(&reg, "clientId", "client_id");
                    creds.client_secret = get_str(&reg, "clientSecret", "client_secret");
                    tracing::debug!("[KIRO_AUTH] 已读取设备注册文件: {:?}", registration);
                }
                Err(e) => tracing::warn!("[KIRO_AUTH] 读取设备注册文件失败: {}", e),
            }
        }
    }

    Ok(creds)
}

/// 写回 JSON 文件，保留文件中的其它字段
pub fn save_to_json_file(path: &Path, creds: &KiroCredentials) -> Result<(), CredentialError> {
    let mut obj = read_json_object(path)?;
    update_token_object(&mut obj, creds);

    let content = serde_json::to_string_pretty(&Value::Object(obj))
        .map_err(|e| CredentialError::Parse(e.to_string()))?;
    fs::write(path, content).map_err(|source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("[KIRO_AUTH] 凭证已写回 {:?}", path);
    Ok(())
}

fn update_token_object(obj: &mut Map<String, Value>, creds: &KiroCredentials) {
    set_str(obj, "accessToken", "access_token", creds.access_token.clone());
    set_str(obj, "refreshToken", "refresh_token", creds.refresh_token.clone());
    if let Some(expires_at) = creds.expires_at {
        set_str(obj, "expiresAt", "expires_at", expires_at.to_rfc3339());
    }
    if let Some(profile_arn) = &creds.profile_arn {
        set_str(obj, "profileArn", "profile_arn", profile_arn.clone());
    }
}

fn read_kv(conn: &Connection, key: &str) -> Result<Option<String>, CredentialError> {
    Ok(conn
        .query_row(
            "SELECT value FROM auth_kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

/// 值不是 JSON 对象时返回空对象，对应字段保持未设置
fn parse_kv_object(key: &str, raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => obj,
        _ => {
            tracing::warn!("[KIRO_AUTH] auth_kv[{}] 不是 JSON 对象，已忽略", key);
            Map::new()
        }
    }
}

/// 找到第一个存在 token 的键方案
fn find_token_key(conn: &Connection) -> Result<Option<(&'static str, &'static str, String)>, CredentialError> {
    for &(token_key, registration_key) in SQLITE_KEY_SCHEMES {
        if let Some(raw) = read_kv(conn, token_key)? {
            return Ok(Some((token_key, registration_key, raw)));
        }
    }
    Ok(None)
}

/// 从 kiro-cli 的 SQLite 数据库加载
pub fn load_from_sqlite(path: &Path, default_region: &str) -> Result<KiroCredentials, CredentialError> {
    if !path.exists() {
        return Err(CredentialError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "数据库不存在"),
        });
    }
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;

    let (token_key, registration_key, raw) =
        find_token_key(&conn)?.ok_or(CredentialError::MissingField("auth_kv token"))?;
    let obj = parse_kv_object(token_key, &raw);
    let mut creds = credentials_from_object(&obj, default_region)?;

    if let Some(raw) = read_kv(&conn, registration_key)? {
        let reg = parse_kv_object(registration_key, &raw);
        creds.client_id = get_str(&reg, "clientId", "client_id");
        creds.client_secret = get_str(&reg, "clientSecret", "client_secret");
    }

    tracing::debug!("[KIRO_AUTH] 从 SQLite 键 {} 加载凭证", token_key);
    Ok(creds)
}

/// 写回 SQLite，更新原有 token 键
pub fn save_to_sqlite(path: &Path, creds: &KiroCredentials) -> Result<(), CredentialError> {
    let conn = Connection::open(path)?;
    let (token_key, raw) = match find_token_key(&conn)? {
        Some((key, _, raw)) => (key, raw),
        None => (SQLITE_KEY_SCHEMES[0].0, "{}".to_string()),
    };
    let mut obj = parse_kv_object(token_key, &raw);
    update_token_object(&mut obj, creds);

    conn.execute(
        "INSERT OR REPLACE INTO auth_kv (key, value) VALUES (?1, ?2)",
        params![token_key, Value::Object(obj).to_string()],
    )?;
    tracing::debug!("[KIRO_AUTH] 凭证已写回 SQLite 键 {}", token_key);
    Ok(())
}
