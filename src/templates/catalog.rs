//! The embedded template catalog.
//!
//! Each entry pairs a template with its destination on the host. The table is
//! static data: the installer never derives a destination path itself.

use std::collections::BTreeSet;

use crate::config::{StackConfig, WebmailVariant};
use crate::error::RenderError;

use super::context::ContextKey;
use super::parser::Template;

/// Feature predicate deciding whether an entry is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Always rendered.
    Always,
    /// Antivirus enabled.
    Antivirus,
    /// Any webmail variant selected.
    Webmail,
    /// Roundcube selected.
    Roundcube,
    /// `SnappyMail` selected.
    Snappymail,
    /// Fetchmail enabled.
    Fetchmail,
    /// `WebDAV` enabled.
    Webdav,
    /// Oletools enabled.
    Oletools,
}

impl Gate {
    /// Evaluates the predicate against a configuration.
    #[must_use]
    pub fn enabled(self, config: &StackConfig) -> bool {
        match self {
            Self::Always => true,
            Self::Antivirus => config.services.antivirus,
            Self::Webmail => config.webmail_enabled(),
            Self::Roundcube => config.services.webmail == WebmailVariant::Roundcube,
            Self::Snappymail => config.services.webmail == WebmailVariant::Snappymail,
            Self::Fetchmail => config.services.fetchmail,
            Self::Webdav => config.services.webdav,
            Self::Oletools => config.services.oletools,
        }
    }
}

/// A catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct TemplateEntry {
    /// Template identifier, e.g. `postfix/main.cf`.
    pub id: &'static str,
    /// Embedded template source.
    pub source: &'static str,
    /// Absolute destination on the host.
    pub destination: &'static str,
    /// Permission bits of the written file.
    pub mode: u32,
    /// Feature predicate.
    pub gate: Gate,
}

macro_rules! entry {
    ($id:literal, $destination:literal, $mode:literal, $gate:ident) => {
        TemplateEntry {
            id: $id,
            source: include_str!(concat!("../../templates/", $id)),
            destination: $destination,
            mode: $mode,
            gate: Gate::$gate,
        }
    };
}

/// Every template, in render order.
pub static CATALOG: &[TemplateEntry] = &[
    entry!("postfix/main.cf", "/etc/postfix/main.cf", 0o644, Always),
    entry!("postfix/master.cf", "/etc/postfix/master.cf", 0o644, Always),
    entry!("postfix/sasl_passwd", "/etc/postfix/sasl_passwd", 0o600, Always),
    entry!(
        "postfix/outclean_header_filter.cf",
        "/etc/postfix/outclean_header_filter.cf",
        0o644,
        Always
    ),
    entry!("postfix/mta-sts-daemon.yml", "/etc/mta-sts-daemon.yml", 0o644, Always),
    entry!("postfix/logrotate.conf", "/etc/logrotate.d/postfix", 0o644, Always),
    entry!("dovecot/dovecot.conf", "/etc/dovecot/dovecot.conf", 0o644, Always),
    entry!("dovecot/auth.conf", "/etc/dovecot/conf.d/auth.conf", 0o640, Always),
    entry!("dovecot/report-spam.sieve", "/etc/dovecot/report-spam.sieve", 0o644, Always),
    entry!("dovecot/report-ham.sieve", "/etc/dovecot/report-ham.sieve", 0o644, Always),
    entry!("dovecot/spam.script", "/etc/dovecot/spam.script", 0o755, Always),
    entry!("dovecot/ham.script", "/etc/dovecot/ham.script", 0o755, Always),
    entry!("rspamd/options.inc", "/etc/rspamd/local.d/options.inc", 0o644, Always),
    entry!("rspamd/logging.inc", "/etc/rspamd/local.d/logging.inc", 0o644, Always),
    entry!("rspamd/redis.conf", "/etc/rspamd/local.d/redis.conf", 0o644, Always),
    entry!("rspamd/dkim_signing.conf", "/etc/rspamd/local.d/dkim_signing.conf", 0o644, Always),
    entry!("rspamd/arc.conf", "/etc/rspamd/local.d/arc.conf", 0o644, Always),
    entry!("rspamd/milter_headers.conf", "/etc/rspamd/local.d/milter_headers.conf", 0o644, Always),
    entry!("rspamd/classifier-bayes.conf", "/etc/rspamd/local.d/classifier-bayes.conf", 0o644, Always),
    entry!("rspamd/history_redis.conf", "/etc/rspamd/local.d/history_redis.conf", 0o644, Always),
    entry!("rspamd/force_actions.conf", "/etc/rspamd/local.d/force_actions.conf", 0o644, Always),
    entry!("rspamd/multimap.conf", "/etc/rspamd/local.d/multimap.conf", 0o644, Always),
    entry!("rspamd/local_subnet.map", "/etc/rspamd/local.d/local_subnet.map", 0o644, Always),
    entry!("rspamd/worker-controller.inc", "/etc/rspamd/local.d/worker-controller.inc", 0o640, Always),
    entry!("rspamd/worker-normal.inc", "/etc/rspamd/local.d/worker-normal.inc", 0o644, Always),
    entry!("rspamd/worker-proxy.inc", "/etc/rspamd/local.d/worker-proxy.inc", 0o644, Always),
    entry!("rspamd/antivirus.conf", "/etc/rspamd/local.d/antivirus.conf", 0o644, Antivirus),
    entry!(
        "rspamd/external_services.conf",
        "/etc/rspamd/local.d/external_services.conf",
        0o644,
        Oletools
    ),
    entry!("nginx/nginx.conf", "/etc/nginx/nginx.conf", 0o644, Always),
    entry!("nginx/proxy.conf", "/etc/nginx/proxy.conf", 0o644, Always),
    entry!("nginx/tls.conf", "/etc/nginx/tls.conf", 0o644, Always),
    entry!(
        "webmails/nginx-webmail.conf",
        "/etc/nginx/sites-available/webmail.conf",
        0o644,
        Webmail
    ),
    entry!(
        "webmails/php-webmail.conf",
        "/etc/php/8.1/fpm/pool.d/webmail.conf",
        0o644,
        Webmail
    ),
    entry!("webmails/php.ini", "/etc/php/8.1/fpm/conf.d/99-mailstack.ini", 0o644, Webmail),
    entry!("webmails/snuffleupagus.rules", "/etc/snuffleupagus.rules", 0o640, Webmail),
    entry!(
        "webmails/roundcube/config.inc.php",
        "/var/www/roundcube/config/config.inc.php",
        0o640,
        Roundcube
    ),
    entry!(
        "webmails/roundcube/config.inc.carddav.php",
        "/var/www/roundcube/config/config.inc.carddav.php",
        0o640,
        Roundcube
    ),
    entry!(
        "webmails/snappymail/application.ini",
        "/var/www/snappymail/data/_data_/_default_/configs/application.ini",
        0o640,
        Snappymail
    ),
    entry!(
        "webmails/snappymail/default.json",
        "/var/www/snappymail/data/_data_/_default_/domains/default.json",
        0o640,
        Snappymail
    ),
    entry!("fetchmail/fetchmailrc", "/etc/fetchmailrc", 0o600, Fetchmail),
    entry!("radicale/config", "/etc/radicale/config", 0o644, Webdav),
];

/// Looks up a template by identifier.
///
/// # Errors
///
/// Returns `RenderError::NotFound` for an unknown identifier.
pub fn lookup(id: &str) -> Result<&'static TemplateEntry, RenderError> {
    CATALOG
        .iter()
        .find(|entry| entry.id == id)
        .ok_or_else(|| RenderError::NotFound { id: id.to_string() })
}

/// Identifiers starting with `prefix`, in catalog order.
pub fn list(prefix: &str) -> impl Iterator<Item = &'static str> + Clone + '_ {
    CATALOG
        .iter()
        .map(|entry| entry.id)
        .filter(move |id| id.starts_with(prefix))
}

/// Entries whose gate is open for this configuration.
pub fn entries_for(config: &StackConfig) -> impl Iterator<Item = &'static TemplateEntry> + '_ {
    CATALOG.iter().filter(move |entry| entry.gate.enabled(config))
}

/// Context keys a template needs, derived from its parsed form.
///
/// # Errors
///
/// Returns an error if the template is unknown or malformed.
pub fn required_keys(id: &str) -> Result<BTreeSet<ContextKey>, RenderError> {
    let entry = lookup(id)?;
    Ok(Template::parse(entry.id, entry.source)?.referenced_keys())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_and_destinations_are_unique() {
        let ids: HashSet<_> = CATALOG.iter().map(|e| e.id).collect();
        let destinations: HashSet<_> = CATALOG.iter().map(|e| e.destination).collect();
        assert_eq!(ids.len(), CATALOG.len());
        assert_eq!(destinations.len(), CATALOG.len());
        assert!(CATALOG.iter().all(|e| e.destination.starts_with('/')));
    }

    #[test]
    fn test_every_template_parses() {
        for entry in CATALOG {
            if let Err(e) = Template::parse(entry.id, entry.source) {
                panic!("{} failed to parse: {e}", entry.id);
            }
        }
    }

    #[test]
    fn test_lookup_and_list() {
        assert_eq!(lookup("postfix/main.cf").unwrap().destination, "/etc/postfix/main.cf");
        assert!(matches!(
            lookup("postfix/nope.cf"),
            Err(RenderError::NotFound { .. })
        ));

        let dovecot = list("dovecot/");
        assert_eq!(dovecot.clone().count(), 6);
        assert_eq!(dovecot.count(), 6);
        assert_eq!(list("nothing/").count(), 0);
    }

    #[test]
    fn test_gates_follow_webmail_variant() {
        let mut config = StackConfig::default();
        let ids = |config: &StackConfig| entries_for(config).map(|e| e.id).collect::<Vec<_>>();

        assert!(!ids(&config).contains(&"webmails/php.ini"));

        config.services.webmail = WebmailVariant::Roundcube;
        let roundcube = ids(&config);
        assert!(roundcube.contains(&"webmails/php.ini"));
        assert!(roundcube.contains(&"webmails/roundcube/config.inc.php"));
        assert!(!roundcube.contains(&"webmails/snappymail/application.ini"));
    }

    #[test]
    fn test_required_keys() {
        let keys = required_keys("rspamd/redis.conf").unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![ContextKey::RedisHost, ContextKey::RedisPort]
        );
    }
}
