//! Service units managed for a configuration.

use crate::config::StackConfig;

/// PHP-FPM unit serving the webmail pool.
pub const PHP_FPM_UNIT: &str = "php8.1-fpm";

/// Units restarted after the start pass so they load freshly rendered files.
pub const RESTART_UNITS: &[&str] = &["postfix", "dovecot", "rspamd", "nginx"];

/// Units whose drop-ins order them after the cache.
const AFTER_REDIS: &[&str] = &["postfix", "dovecot", "rspamd"];

/// Units to enable and start, dependencies first.
#[must_use]
pub fn start_order(config: &StackConfig) -> Vec<&'static str> {
    let mut units = vec!["redis", "rspamd", "postfix", "dovecot", "nginx"];
    if config.webmail_enabled() {
        units.push(PHP_FPM_UNIT);
    }
    if config.services.antivirus {
        units.extend(["clamav-freshclam", "clamav-daemon"]);
    }
    if config.services.fetchmail {
        units.push("fetchmail");
    }
    if config.services.webdav {
        units.push("radicale");
    }
    units
}

/// Units expected to be active once the installation has settled.
#[must_use]
pub fn health_units(config: &StackConfig) -> Vec<&'static str> {
    start_order(config)
        .into_iter()
        .filter(|unit| *unit != "clamav-freshclam")
        .collect()
}

/// Units that receive a restart-policy drop-in.
#[must_use]
pub fn override_units(config: &StackConfig) -> Vec<&'static str> {
    let mut units = vec!["postfix", "dovecot", "rspamd", "nginx", "redis"];
    if config.webmail_enabled() {
        units.push(PHP_FPM_UNIT);
    }
    if config.services.antivirus {
        units.extend(["clamav-daemon", "clamav-freshclam"]);
    }
    units
}

/// Drop-in content for a unit.
#[must_use]
pub fn override_fragment(unit: &str) -> String {
    let after = if AFTER_REDIS.contains(&unit) {
        "network-online.target redis.service"
    } else {
        "network-online.target"
    };
    format!(
        "[Unit]\nAfter={after}\nWants=network-online.target\n\n[Service]\nRestart=always\nRestartSec=10s\n"
    )
}

/// Drop-in path for a unit, relative to the host root.
#[must_use]
pub fn override_path(unit: &str) -> String {
    format!("/etc/systemd/system/{unit}.service.d/override.conf")
}

/// Ports that must be listening, with the protocol they carry.
#[must_use]
pub fn required_ports(config: &StackConfig) -> Vec<(u16, &'static str)> {
    let mut ports = vec![(25, "SMTP"), (143, "IMAP"), (993, "IMAPS"), (80, "HTTP")];
    if config.tls_flavor().is_enabled() {
        ports.push((443, "HTTPS"));
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TlsFlavor, WebmailVariant};

    #[test]
    fn test_minimal_units() {
        let config = StackConfig::default();
        assert_eq!(
            start_order(&config),
            vec!["redis", "rspamd", "postfix", "dovecot", "nginx"]
        );
        assert_eq!(health_units(&config), start_order(&config));
        assert_eq!(required_ports(&config).len(), 4);
    }

    #[test]
    fn test_optional_units() {
        let mut config = StackConfig::default();
        config.services.webmail = WebmailVariant::Roundcube;
        config.services.antivirus = true;
        config.tls.flavor = Some(TlsFlavor::Letsencrypt);

        let order = start_order(&config);
        assert_eq!(order[5], PHP_FPM_UNIT);
        assert!(order.contains(&"clamav-freshclam"));
        assert!(!health_units(&config).contains(&"clamav-freshclam"));
        assert!(override_units(&config).contains(&"clamav-daemon"));
        assert!(required_ports(&config).contains(&(443, "HTTPS")));
    }

    #[test]
    fn test_override_fragment_orders_after_redis() {
        assert!(override_fragment("postfix").contains("After=network-online.target redis.service\n"));
        assert!(override_fragment("nginx").contains("After=network-online.target\n"));
        assert!(override_fragment("redis").contains("Restart=always\nRestartSec=10s\n"));
        assert_eq!(
            override_path("dovecot"),
            "/etc/systemd/system/dovecot.service.d/override.conf"
        );
    }
}
