//! Credential discovery for the three backends.
//!
//! Service bindings come from the `VCAP_SERVICES` environment variable or,
//! when it is absent, from a local `vcap_services.json` file with the same
//! shape. Either way the result is one validated [`Credentials`] value; the
//! stores never look at where it came from.

use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use std::{
    env, fmt, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const VCAP_ENV: &str = "VCAP_SERVICES";
pub const DEFAULT_VCAP_FILE: &str = "vcap_services.json";

const POSTGRES_SERVICE: &str = "databases-for-postgresql";
const MONGODB_SERVICE: &str = "databases-for-mongodb";
const COS_SERVICE: &str = "cloud-object-storage";
const DEFAULT_COS_REGION: &str = "us-south";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("{VCAP_ENV} not found in environment and no file at {0}")]
    NotFound(String),
    #[error("`{service}` binding is malformed: {message}")]
    Malformed { service: String, message: String },
    #[error("service credentials are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type CredentialsResult<T> = Result<T, CredentialsError>;

#[derive(Clone, PartialEq, Eq)]
pub struct PostgresCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub ca_cert_path: Option<PathBuf>,
}

impl fmt::Debug for PostgresCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ca_cert_path", &self.ca_cert_path)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct MongoCredentials {
    pub uri: String,
    pub ca_cert_path: Option<PathBuf>,
}

impl fmt::Debug for MongoCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoCredentials")
            .field("uri", &"<redacted>")
            .field("ca_cert_path", &self.ca_cert_path)
            .finish()
    }
}

/// HMAC credentials plus endpoint for an S3-compatible service.
#[derive(Clone, PartialEq, Eq)]
pub struct CosCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub resource_instance_id: Option<String>,
}

impl fmt::Debug for CosCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("resource_instance_id", &self.resource_instance_id)
            .finish()
    }
}

/// Credentials for every bound service. A service without a usable binding
/// is `None`.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub postgres: Option<PostgresCredentials>,
    pub mongodb: Option<MongoCredentials>,
    pub object_storage: Option<CosCredentials>,
}

// --- VCAP binding shapes ---

#[derive(Deserialize)]
struct Binding<C> {
    credentials: C,
}

#[derive(Deserialize, Default)]
struct VcapServices {
    #[serde(rename = "databases-for-postgresql", default)]
    postgres: Vec<Binding<PgBinding>>,
    #[serde(rename = "databases-for-mongodb", default)]
    mongodb: Vec<Binding<MongoBinding>>,
    #[serde(rename = "cloud-object-storage", default)]
    cos: Vec<Binding<CosBinding>>,
}

#[derive(Deserialize)]
struct PgBinding {
    connection: PgConnection,
}

#[derive(Deserialize)]
struct PgConnection {
    postgres: PgConnectionInfo,
}

#[derive(Deserialize)]
struct PgConnectionInfo {
    hosts: Vec<HostPort>,
    authentication: Authentication,
    database: String,
    #[serde(default)]
    certificate: Option<Certificate>,
}

#[derive(Deserialize)]
struct HostPort {
    hostname: String,
    port: u16,
}

#[derive(Deserialize)]
struct Authentication {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct Certificate {
    certificate_base64: String,
}

#[derive(Deserialize)]
struct MongoBinding {
    connection: MongoConnection,
}

#[derive(Deserialize)]
struct MongoConnection {
    mongodb: MongoConnectionInfo,
}

#[derive(Deserialize)]
struct MongoConnectionInfo {
    composed: Vec<String>,
    #[serde(default)]
    certificate: Option<Certificate>,
}

#[derive(Deserialize)]
struct CosBinding {
    #[serde(default)]
    resource_instance_id: Option<String>,
    #[serde(default)]
    cos_hmac_keys: Option<HmacKeys>,
}

#[derive(Deserialize)]
struct HmacKeys {
    access_key_id: String,
    secret_access_key: String,
}

/// Environment overrides applied on top of the bindings.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    /// `POSTGRESQL_ROOT_CRT`
    pub postgres_ca: Option<PathBuf>,
    /// `NOSQL_ROOT_CRT`
    pub mongodb_ca: Option<PathBuf>,
    /// `COS_ENDPOINT`
    pub cos_endpoint: Option<String>,
    /// `COS_REGION`
    pub cos_region: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            postgres_ca: env::var_os("POSTGRESQL_ROOT_CRT").map(PathBuf::from),
            mongodb_ca: env::var_os("NOSQL_ROOT_CRT").map(PathBuf::from),
            cos_endpoint: env::var("COS_ENDPOINT").ok(),
            cos_region: env::var("COS_REGION").ok(),
        }
    }
}

impl Credentials {
    /// Load bindings from `VCAP_SERVICES`, falling back to `file`.
    ///
    /// CA certificates embedded in the bindings are written beneath
    /// `cert_dir` so the clients can verify TLS.
    pub fn discover(file: &Path, cert_dir: &Path) -> CredentialsResult<Self> {
        let raw = match env::var(VCAP_ENV) {
            Ok(raw) => {
                info!("found {} in environment", VCAP_ENV);
                raw
            }
            Err(_) if file.is_file() => {
                info!("found local service credentials at {}", file.display());
                fs::read_to_string(file)?
            }
            Err(_) => return Err(CredentialsError::NotFound(file.display().to_string())),
        };
        Self::from_vcap_json(&raw, cert_dir, &Overrides::from_env())
    }

    /// Parse a `VCAP_SERVICES` document.
    pub fn from_vcap_json(
        raw: &str,
        cert_dir: &Path,
        overrides: &Overrides,
    ) -> CredentialsResult<Self> {
        let vcap: VcapServices = serde_json::from_str(raw)?;

        let postgres = match vcap.postgres.into_iter().next() {
            Some(binding) => {
                let info = binding.credentials.connection.postgres;
                let host = info.hosts.into_iter().next().ok_or_else(|| CredentialsError::Malformed {
                    service: POSTGRES_SERVICE.into(),
                    message: "no hosts listed".into(),
                })?;
                let ca_cert_path = match &overrides.postgres_ca {
                    Some(path) => Some(path.clone()),
                    None => write_certificate(cert_dir, POSTGRES_SERVICE, info.certificate.as_ref())?,
                };
                Some(PostgresCredentials {
                    host: host.hostname,
                    port: host.port,
                    username: info.authentication.username,
                    password: info.authentication.password,
                    database: info.database,
                    ca_cert_path,
                })
            }
            None => None,
        };

        let mongodb = match vcap.mongodb.into_iter().next() {
            Some(binding) => {
                let info = binding.credentials.connection.mongodb;
                let uri = info.composed.into_iter().next().ok_or_else(|| CredentialsError::Malformed {
                    service: MONGODB_SERVICE.into(),
                    message: "no composed connection string".into(),
                })?;
                let ca_cert_path = match &overrides.mongodb_ca {
                    Some(path) => Some(path.clone()),
                    None => write_certificate(cert_dir, MONGODB_SERVICE, info.certificate.as_ref())?,
                };
                Some(MongoCredentials { uri, ca_cert_path })
            }
            None => None,
        };

        let object_storage = match vcap.cos.into_iter().next() {
            Some(binding) => cos_credentials(binding.credentials, overrides),
            None => None,
        };

        debug!(
            postgres = postgres.is_some(),
            mongodb = mongodb.is_some(),
            object_storage = object_storage.is_some(),
            "parsed service bindings"
        );

        Ok(Self {
            postgres,
            mongodb,
            object_storage,
        })
    }
}

/// HMAC keys are required for S3 signing; a binding that only carries an
/// API key leaves the object store disabled.
fn cos_credentials(binding: CosBinding, overrides: &Overrides) -> Option<CosCredentials> {
    let Some(keys) = binding.cos_hmac_keys else {
        warn!(
            "`{}` binding has no cos_hmac_keys; object store disabled",
            COS_SERVICE
        );
        return None;
    };
    let region = overrides
        .cos_region
        .clone()
        .unwrap_or_else(|| DEFAULT_COS_REGION.into());
    let endpoint = overrides
        .cos_endpoint
        .clone()
        .unwrap_or_else(|| regional_cos_endpoint(&region));
    Some(CosCredentials {
        access_key_id: keys.access_key_id,
        secret_access_key: keys.secret_access_key,
        endpoint: Some(endpoint),
        region,
        resource_instance_id: binding.resource_instance_id,
    })
}

/// Public endpoint of the object storage service in `region`.
pub fn regional_cos_endpoint(region: &str) -> String {
    format!("https://s3.{}.cloud-object-storage.appdomain.cloud", region)
}

/// Decode a base64 CA certificate into `dir/<service>.crt`.
fn write_certificate(
    dir: &Path,
    service: &str,
    certificate: Option<&Certificate>,
) -> CredentialsResult<Option<PathBuf>> {
    let Some(certificate) = certificate else {
        return Ok(None);
    };
    let pem = general_purpose::STANDARD
        .decode(certificate.certificate_base64.trim())
        .map_err(|err| CredentialsError::Malformed {
            service: service.into(),
            message: format!("certificate is not valid base64: {}", err),
        })?;
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.crt", service));
    fs::write(&path, pem)?;
    debug!("wrote {} CA certificate to {}", service, path.display());
    Ok(Some(path))
}
