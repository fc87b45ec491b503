//! Reservation options recognised by the engine.

use std::time::Duration;

/// What happens to active holds when a shopper goes back from payment to the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnToCartPolicy {
    /// Give every active reservation a fresh TTL.
    ExtendReservations,
    /// Leave expiry untouched.
    KeepExpiry,
}

/// Reservation engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RESERVATION_TTL_MS`: hold lifetime (default: 15 minutes)
/// - `RESERVATION_CLEANUP_INTERVAL_MS`: sweep interval (default: 60 seconds)
/// - `RESERVATION_EXTEND_ON_RETURN_TO_CART`: (default: `true`)
/// - `RESERVATION_LOCK_TIMEOUT_MS`: stock-unit lock wait bound (default: 5 seconds)
/// - `RESERVATION_DISTRIBUTED_LOCK`: (default: `false`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    pub reservation_ttl: Duration,
    pub cleanup_interval: Duration,
    pub extend_on_return_to_cart: bool,
    pub lock_timeout: Duration,
    /// Declares that several processes share one store. Only database-backed
    /// stores provide cross-process locking; setting this flag does not add it.
    pub distributed_lock: bool,
}

impl ReservationConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup. Absent or
    /// unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => Some(true),
                    "0" | "false" | "no" | "off" => Some(false),
                    _ => None,
                })
                .unwrap_or(default)
        };

        Self {
            reservation_ttl: millis("RESERVATION_TTL_MS", defaults.reservation_ttl),
            cleanup_interval: millis("RESERVATION_CLEANUP_INTERVAL_MS", defaults.cleanup_interval),
            extend_on_return_to_cart: flag(
                "RESERVATION_EXTEND_ON_RETURN_TO_CART",
                defaults.extend_on_return_to_cart,
            ),
            lock_timeout: millis("RESERVATION_LOCK_TIMEOUT_MS", defaults.lock_timeout),
            distributed_lock: flag("RESERVATION_DISTRIBUTED_LOCK", defaults.distributed_lock),
        }
    }

    pub fn return_to_cart_policy(&self) -> ReturnToCartPolicy {
        if self.extend_on_return_to_cart {
            ReturnToCartPolicy::ExtendReservations
        } else {
            ReturnToCartPolicy::KeepExpiry
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_secs(15 * 60),
            cleanup_interval: Duration::from_secs(60),
            extend_on_return_to_cart: true,
            lock_timeout: Duration::from_secs(5),
            distributed_lock: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_values() {
        let config = ReservationConfig::default();
        assert_eq!(config.reservation_ttl, Duration::from_secs(900));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert!(config.extend_on_return_to_cart);
        assert!(!config.distributed_lock);
        assert_eq!(
            config.return_to_cart_policy(),
            ReturnToCartPolicy::ExtendReservations
        );
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("RESERVATION_TTL_MS", "1000"),
            ("RESERVATION_CLEANUP_INTERVAL_MS", "250"),
            ("RESERVATION_EXTEND_ON_RETURN_TO_CART", "false"),
            ("RESERVATION_DISTRIBUTED_LOCK", "yes"),
        ]);
        let config = ReservationConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.reservation_ttl, Duration::from_millis(1000));
        assert_eq!(config.cleanup_interval, Duration::from_millis(250));
        assert_eq!(config.return_to_cart_policy(), ReturnToCartPolicy::KeepExpiry);
        assert!(config.distributed_lock);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = ReservationConfig::from_lookup(|k| match k {
            "RESERVATION_TTL_MS" => Some("fifteen minutes".to_string()),
            "RESERVATION_EXTEND_ON_RETURN_TO_CART" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config, ReservationConfig::default());
    }
}
