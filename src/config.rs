use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the photobank service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// DynamoDB catalog configuration
    pub dynamodb: DynamoDbConfig,
    /// Upload event queue configuration
    pub events: EventQueueConfig,
    /// Label detection configuration
    pub rekognition: RekognitionConfig,
    /// Bearer-token verification configuration
    pub auth: AuthConfig,
    /// API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 photo bucket configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket holding raw photos and thumbnails
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// DynamoDB catalog table configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DynamoDbConfig {
    /// Table holding catalog entries
    pub table: String,
    /// Custom endpoint URL (for DynamoDB Local)
    pub endpoint_url: Option<String>,
}

/// SQS queue wired to the bucket's ObjectCreated notifications
#[derive(Debug, Clone, Deserialize)]
pub struct EventQueueConfig {
    /// Queue URL to long-poll for upload events
    pub queue_url: String,
    /// Long-poll wait time in seconds
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: i32,
    /// Maximum messages per receive call
    #[serde(default = "default_max_messages")]
    pub max_messages: i32,
    /// Custom endpoint URL (for LocalStack)
    pub endpoint_url: Option<String>,
}

/// Label detection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RekognitionConfig {
    /// Maximum labels requested per image
    #[serde(default = "default_max_labels")]
    pub max_labels: i32,
    /// Minimum confidence threshold (percent)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

/// Bearer-token verification against a Cognito user pool
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Cognito user pool ID
    pub user_pool_id: String,
    /// App client ID expected in the token audience
    pub client_id: String,
    /// Region the user pool lives in
    #[serde(default = "default_region")]
    pub region: String,
}

impl AuthConfig {
    /// Issuer URL the token must carry.
    pub fn issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.region, self.user_pool_id
        )
    }

    /// Well-known JWKS URL, fetched once at process start.
    pub fn jwks_url(&self) -> String {
        format!("{}/.well-known/jwks.json", self.issuer())
    }
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Allowed CORS origins (typically the two dashboard deployments)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "photobank".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    300
}

fn default_wait_time_secs() -> i32 {
    20
}

fn default_max_messages() -> i32 {
    10
}

fn default_max_labels() -> i32 {
    10
}

fn default_min_confidence() -> f32 {
    70.0
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "photobank")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/photobank").required(false))
            .add_source(config::File::with_name("/etc/photobank/config").required(false))
            // Override with environment variables
            // PHOTOBANK__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("PHOTOBANK")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_presigned_url_expiry_secs(), 300);
        assert_eq!(default_max_labels(), 10);
        assert_eq!(default_min_confidence(), 70.0);
        assert_eq!(default_wait_time_secs(), 20);
    }

    #[test]
    fn test_auth_urls() {
        let auth = AuthConfig {
            user_pool_id: "ap-southeast-2_abc123".to_string(),
            client_id: "client".to_string(),
            region: "ap-southeast-2".to_string(),
        };
        assert_eq!(
            auth.issuer(),
            "https://cognito-idp.ap-southeast-2.amazonaws.com/ap-southeast-2_abc123"
        );
        assert_eq!(
            auth.jwks_url(),
            "https://cognito-idp.ap-southeast-2.amazonaws.com/ap-southeast-2_abc123/.well-known/jwks.json"
        );
    }
}
