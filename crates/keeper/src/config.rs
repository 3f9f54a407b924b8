use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tranche_types::serde_helpers::pubkey_serde;

use crate::error::{KeeperError, KeeperResult};

/// Program id used by the generated example configuration
pub const DEFAULT_PROGRAM_ID: Pubkey = pubkey!("EpochKeeper111111111111111111111111111111111");

/// Prefix of environment variables that override file settings,
/// e.g. `TRANCHE_KEEPER_CHAIN__RPC_URL`
pub const ENV_PREFIX: &str = "TRANCHE_KEEPER";

/// Keeper configuration loaded from a TOML file and the environment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeeperConfig {
    /// Compute plans but never submit transactions
    #[serde(default)]
    pub dry_run: bool,

    /// Upper bound on pools processed concurrently within a sweep
    #[serde(default = "default_max_concurrent_pools")]
    pub max_concurrent_pools: usize,

    pub chain: ChainConfig,

    pub signer: SignerConfig,

    pub registry: RegistryConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub status: StatusConfig,
}

/// Ledger endpoint and transaction settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of the cluster
    pub rpc_url: String,

    /// Lending program that owns pool and order accounts
    #[serde(with = "pubkey_serde")]
    pub program_id: Pubkey,

    /// Commitment used for reads and confirmation (processed, confirmed, finalized)
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Bound on a single epoch state read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// How long a submission waits for confirmation
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    /// Delay between signature status polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Signer credential
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignerConfig {
    /// Path of the keypair JSON file
    pub keypair_path: String,

    /// Minimum SOL balance to maintain (in lamports)
    #[serde(default = "default_min_balance_lamports")]
    pub min_balance_lamports: u64,
}

/// Content-addressed pool registry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// IPFS HTTP gateway base URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Content identifier of the registry document
    pub cid: String,

    /// Per-request timeout
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Timer configuration, six-field cron expressions with seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_refresh_cron")]
    pub refresh_cron: String,

    #[serde(default = "default_sweep_cron")]
    pub sweep_cron: String,

    /// Run the node and balance health check every N sweeps
    #[serde(default = "default_health_check_every")]
    pub health_check_every: u64,
}

/// Admin status surface
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatusConfig {
    /// Serve the status board over HTTP when set, e.g. `127.0.0.1:8090`
    #[serde(default)]
    pub bind_address: Option<String>,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_concurrent_pools() -> usize {
    8
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

fn default_confirmation_timeout_ms() -> u64 {
    50_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_min_balance_lamports() -> u64 {
    10_000_000 // 0.01 SOL
}

fn default_gateway_url() -> String {
    "https://ipfs.io".to_string()
}

fn default_registry_timeout_ms() -> u64 {
    15_000
}

fn default_refresh_cron() -> String {
    "0 */30 * * * *".to_string()
}

fn default_sweep_cron() -> String {
    "0 */5 * * * *".to_string()
}

fn default_health_check_every() -> u64 {
    12
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn invalid(parameter: &str, value: &str, expected: &str) -> KeeperError {
    KeeperError::InvalidConfig(format!(
        "'{}': got '{}', expected {}",
        parameter, value, expected
    ))
}

fn validate_http_url(parameter: &str, url: &str) -> KeeperResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(invalid(parameter, url, "an http(s) URL"))
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: &str) -> KeeperResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| KeeperError::InvalidConfig(format!("Failed to read config file {}: {}", path, e)))?;

        Self::from_settings(settings)
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml_str(content: &str) -> KeeperResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()
            .map_err(|e| KeeperError::InvalidConfig(e.to_string()))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> KeeperResult<Self> {
        let config: KeeperConfig = settings
            .try_deserialize()
            .map_err(|e| KeeperError::InvalidConfig(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &str) -> KeeperResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KeeperError::SerializationError(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> KeeperResult<()> {
        if self.max_concurrent_pools == 0 {
            return Err(invalid("max_concurrent_pools", "0", "greater than 0"));
        }

        self.chain.validate()?;
        self.signer.validate()?;
        self.registry.validate()?;
        self.schedule.validate()?;
        self.status.validate()?;

        Ok(())
    }
}

impl ChainConfig {
    fn validate(&self) -> KeeperResult<()> {
        validate_http_url("chain.rpc_url", &self.rpc_url)?;

        if self.program_id == Pubkey::default() {
            return Err(invalid("chain.program_id", &self.program_id.to_string(), "the lending program id"));
        }

        CommitmentConfig::from_str(&self.commitment)
            .map_err(|_| invalid("chain.commitment", &self.commitment, "processed, confirmed or finalized"))?;

        if self.read_timeout_ms == 0 {
            return Err(invalid("chain.read_timeout_ms", "0", "greater than 0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(invalid("chain.poll_interval_ms", "0", "greater than 0"));
        }

        if self.confirmation_timeout_ms <= self.poll_interval_ms {
            return Err(invalid(
                "chain.confirmation_timeout_ms",
                &self.confirmation_timeout_ms.to_string(),
                &format!("greater than poll_interval_ms ({})", self.poll_interval_ms),
            ));
        }

        Ok(())
    }

    pub fn commitment(&self) -> CommitmentConfig {
        CommitmentConfig::from_str(&self.commitment).unwrap_or_else(|_| CommitmentConfig::confirmed())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl SignerConfig {
    fn validate(&self) -> KeeperResult<()> {
        if self.keypair_path.trim().is_empty() {
            return Err(invalid("signer.keypair_path", "empty", "a keypair file path"));
        }

        if self.min_balance_lamports < 1_000_000 {
            return Err(invalid(
                "signer.min_balance_lamports",
                &self.min_balance_lamports.to_string(),
                "at least 1000000 (0.001 SOL)",
            ));
        }

        Ok(())
    }
}

impl RegistryConfig {
    fn validate(&self) -> KeeperResult<()> {
        validate_http_url("registry.gateway_url", &self.gateway_url)?;

        if self.cid.trim().is_empty() {
            return Err(invalid("registry.cid", "empty", "a content identifier"));
        }

        if self.timeout_ms == 0 {
            return Err(invalid("registry.timeout_ms", "0", "greater than 0"));
        }

        self.retry.validate()
    }

    /// Full URL of the registry document
    pub fn document_url(&self) -> String {
        format!("{}/ipfs/{}", self.gateway_url.trim_end_matches('/'), self.cid)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ScheduleConfig {
    fn validate(&self) -> KeeperResult<()> {
        self.refresh_schedule()?;
        self.sweep_schedule()?;

        if self.health_check_every == 0 {
            return Err(invalid("schedule.health_check_every", "0", "greater than 0"));
        }

        Ok(())
    }

    pub fn refresh_schedule(&self) -> KeeperResult<cron::Schedule> {
        parse_cron("schedule.refresh_cron", &self.refresh_cron)
    }

    pub fn sweep_schedule(&self) -> KeeperResult<cron::Schedule> {
        parse_cron("schedule.sweep_cron", &self.sweep_cron)
    }
}

fn parse_cron(parameter: &str, expression: &str) -> KeeperResult<cron::Schedule> {
    cron::Schedule::from_str(expression)
        .map_err(|e| invalid(parameter, expression, &format!("a cron expression with seconds ({})", e)))
}

impl StatusConfig {
    fn validate(&self) -> KeeperResult<()> {
        self.socket_addr().map(|_| ())
    }

    pub fn socket_addr(&self) -> KeeperResult<Option<SocketAddr>> {
        match &self.bind_address {
            None => Ok(None),
            Some(addr) => addr
                .parse::<SocketAddr>()
                .map(Some)
                .map_err(|_| invalid("status.bind_address", addr, "host:port")),
        }
    }
}

impl RetryConfig {
    /// Validate retry configuration
    fn validate(&self) -> KeeperResult<()> {
        if self.base_delay_ms == 0 {
            return Err(invalid("retry.base_delay_ms", "0", "greater than 0"));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(invalid(
                "retry.max_delay_ms",
                &self.max_delay_ms.to_string(),
                &format!("greater than or equal to base_delay_ms ({})", self.base_delay_ms),
            ));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                &self.backoff_multiplier.to_string(),
                "at least 1.0",
            ));
        }

        Ok(())
    }

    /// Total attempts, the first one included
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate delay for retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return self.base_delay_ms;
        }

        let exponential_delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        (exponential_delay as u64).min(self.max_delay_ms)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_cron: default_refresh_cron(),
            sweep_cron: default_sweep_cron(),
            health_check_every: default_health_check_every(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Configuration written by `--write-example-config`
pub fn example_config() -> KeeperConfig {
    KeeperConfig {
        dry_run: false,
        max_concurrent_pools: default_max_concurrent_pools(),
        chain: ChainConfig {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            program_id: DEFAULT_PROGRAM_ID,
            commitment: default_commitment(),
            read_timeout_ms: default_read_timeout_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        },
        signer: SignerConfig {
            keypair_path: "keeper-keypair.json".to_string(),
            min_balance_lamports: default_min_balance_lamports(),
        },
        registry: RegistryConfig {
            gateway_url: default_gateway_url(),
            cid: "QmPoolRegistryDocumentCid".to_string(),
            timeout_ms: default_registry_timeout_ms(),
            retry: RetryConfig::default(),
        },
        schedule: ScheduleConfig::default(),
        status: StatusConfig {
            bind_address: Some("127.0.0.1:8090".to_string()),
        },
    }
}

/// Create example configuration file
pub fn create_example_config(path: &str) -> KeeperResult<()> {
    example_config().save(path)
}
