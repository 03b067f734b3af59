use clap::Parser;
use std::net::SocketAddr;
use url::Url;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "parleyd")]
#[command(about = "Presence and call-signaling relay")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8000", env = "PARLEY_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "PARLEY_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Bot token used to verify Web App init data. Without it every
    /// connection is refused.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,
    /// Public URL the mini app is served from.
    #[arg(long, env = "WEB_APP_URL")]
    pub web_app_url: Option<Url>,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "1000", env = "PARLEY_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum inbound messages per minute per connection.
    #[arg(long, default_value = "600", env = "PARLEY_MSG_RATE")]
    pub msg_rate: u32,
    /// Maximum WebSocket message size in bytes.
    #[arg(long, default_value = "65536", env = "PARLEY_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,
    /// Outbound frames buffered per connection before new ones are dropped.
    #[arg(long, default_value = "256", env = "PARLEY_SEND_QUEUE")]
    pub send_queue: usize,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "PARLEY_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    #[arg(long, default_value = "120", env = "PARLEY_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
///
/// The bot token is not part of it; it only ever lives inside the verifier.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Public URL the mini app is served from.
    pub web_app_url: Option<Url>,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum inbound messages per minute per connection.
    pub msg_rate: u32,
    /// Maximum WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound frames buffered per connection.
    pub send_queue: usize,
    /// Interval between WebSocket pings in seconds.
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    pub idle_timeout: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 100_000 {
            return Err("max_conns exceeds reasonable limit (100,000)".to_string());
        }

        if self.msg_rate == 0 {
            return Err("msg_rate must be greater than 0".to_string());
        }
        if self.msg_rate > 100_000 {
            return Err("msg_rate exceeds reasonable limit (100,000 msg/min)".to_string());
        }

        // SDP offers run to a few KiB; anything under 1 KiB cannot carry one
        if self.max_message_size < 1024 {
            return Err("max_message_size must be at least 1024 bytes".to_string());
        }
        if self.max_message_size > 16 * 1024 * 1024 {
            return Err("max_message_size exceeds reasonable limit (16 MiB)".to_string());
        }

        if self.send_queue == 0 {
            return Err("send_queue must be greater than 0".to_string());
        }
        if self.send_queue > 65_536 {
            return Err("send_queue exceeds reasonable limit (65,536 frames)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err(
                "idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }
        if self.idle_timeout < self.ping_interval {
            return Err("idle_timeout must not be shorter than ping_interval".to_string());
        }

        if let Some(url) = &self.web_app_url {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(format!(
                    "web_app_url must be http or https, got {}",
                    url.scheme()
                ));
            }
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            web_app_url: args.web_app_url,
            max_conns: args.max_conns,
            msg_rate: args.msg_rate,
            max_message_size: args.max_message_size,
            send_queue: args.send_queue,
            ping_interval: args.ping_interval,
            idle_timeout: args.idle_timeout,
        }
    }
}
