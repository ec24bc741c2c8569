//! Renders catalog templates against a configuration and writes the results.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{ConfigHasher, StackConfig};
use crate::error::{RenderError, Result};
use crate::host::fs::{mode_of, set_mode, write_atomic};

use super::catalog::{TemplateEntry, lookup};
use super::context::RenderContext;
use super::parser::Template;

/// Outcome of writing one rendered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    /// Destination path as written.
    pub path: PathBuf,
    /// SHA-256 of the rendered bytes.
    pub digest: String,
    /// False when the file already held identical bytes.
    pub changed: bool,
}

/// Renders templates for one configuration.
///
/// Nothing is cached: each call projects the configuration afresh.
#[derive(Debug, Clone, Copy)]
pub struct Renderer<'a> {
    config: &'a StackConfig,
}

impl<'a> Renderer<'a> {
    /// Creates a renderer bound to a configuration.
    #[must_use]
    pub const fn new(config: &'a StackConfig) -> Self {
        Self { config }
    }

    /// Renders a template by identifier.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::NotFound` or `RenderError::Syntax`.
    pub fn render(&self, id: &str) -> Result<Vec<u8>> {
        let entry = lookup(id)?;
        Ok(self.render_entry(entry)?)
    }

    /// Renders a catalog entry.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Syntax` if the embedded source is malformed.
    pub fn render_entry(&self, entry: &TemplateEntry) -> std::result::Result<Vec<u8>, RenderError> {
        let template = Template::parse(entry.id, entry.source)?;
        let context = RenderContext::from_config(self.config);
        Ok(template.execute(&context).into_bytes())
    }

    /// Renders a template and atomically replaces `destination` with it.
    ///
    /// When the destination already holds identical bytes it is left alone
    /// unless `force` is set; its mode is enforced either way.
    ///
    /// # Errors
    ///
    /// Returns a render error, or `RenderError::Write` if the file cannot be
    /// written.
    pub async fn render_to_file(
        &self,
        id: &str,
        destination: &Path,
        mode: u32,
        force: bool,
    ) -> Result<FileWrite> {
        let content = self.render(id)?;
        let digest = ConfigHasher::new().content_digest(&content);
        let write_error = |e: std::io::Error| RenderError::Write {
            path: destination.to_path_buf(),
            message: e.to_string(),
        };

        let unchanged = !force
            && tokio::fs::read(destination)
                .await
                .is_ok_and(|existing| existing == content);

        if unchanged {
            if mode_of(destination).await != Some(mode) {
                set_mode(destination, mode).await.map_err(write_error)?;
            }
            debug!(template = id, path = %destination.display(), "unchanged");
        } else {
            write_atomic(destination, &content, mode)
                .await
                .map_err(write_error)?;
            debug!(template = id, path = %destination.display(), "rendered");
        }

        Ok(FileWrite {
            path: destination.to_path_buf(),
            digest,
            changed: !unchanged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TlsFlavor, WebmailVariant, apply_defaults};
    use crate::error::MailstackError;
    use crate::templates::catalog::{CATALOG, entries_for};
    use tempfile::TempDir;

    fn config(flavor: TlsFlavor, webmail: WebmailVariant) -> StackConfig {
        let mut config = StackConfig::default();
        config.domain = String::from("example.com");
        config.hostname = String::from("mail.example.com");
        config.admin.email = String::from("admin@example.com");
        config.admin.password = String::from("correct-horse");
        config.tls.flavor = Some(flavor);
        config.tls.email = String::from("ops@example.com");
        config.services.webmail = webmail;
        config.services.antivirus = true;
        config.services.webdav = true;
        config.services.fetchmail = true;
        config.services.oletools = true;
        config.mail.relay_host = String::from("[smtp.relay.net]:587");
        config.mail.relay_user = String::from("relay");
        config.mail.relay_password = String::from("s3cret");
        apply_defaults(&mut config);
        config
    }

    #[test]
    fn test_every_template_renders_deterministically() {
        for (flavor, webmail) in [
            (TlsFlavor::Notls, WebmailVariant::None),
            (TlsFlavor::Letsencrypt, WebmailVariant::Roundcube),
            (TlsFlavor::Cert, WebmailVariant::Snappymail),
        ] {
            let config = config(flavor, webmail);
            let renderer = Renderer::new(&config);
            for entry in CATALOG {
                let first = renderer.render(entry.id).unwrap();
                let second = renderer.render(entry.id).unwrap();
                assert_eq!(first, second, "{} is not deterministic", entry.id);
            }
        }
    }

    #[test]
    fn test_main_cf_projects_config() {
        let config = config(TlsFlavor::Letsencrypt, WebmailVariant::None);
        let main_cf = String::from_utf8(Renderer::new(&config).render("postfix/main.cf").unwrap())
            .unwrap();
        assert!(main_cf.contains("myhostname = mail.example.com\n"));
        assert!(main_cf.contains("message_size_limit = 50000000\n"));
        assert!(main_cf.contains("relayhost = [smtp.relay.net]:587\n"));
        assert!(main_cf.contains("smtpd_tls_cert_file = /var/lib/mailstack/certs/cert.pem\n"));
    }

    #[test]
    fn test_dkim_signing_path_placeholders() {
        let config = config(TlsFlavor::Notls, WebmailVariant::None);
        let rendered =
            String::from_utf8(Renderer::new(&config).render("rspamd/dkim_signing.conf").unwrap())
                .unwrap();
        assert!(rendered.starts_with("enabled = true;"));
        assert!(rendered.contains("path = \"/var/lib/mailstack/dkim/$domain.$selector.key\";"));
        assert!(rendered.contains("selector = \"dkim\";"));
    }

    #[test]
    fn test_sasl_passwd_and_local_subnet() {
        let mut config = config(TlsFlavor::Notls, WebmailVariant::None);
        let renderer = Renderer::new(&config);
        assert_eq!(
            renderer.render("postfix/sasl_passwd").unwrap(),
            b"[smtp.relay.net]:587 relay:s3cret\n"
        );
        assert_eq!(
            renderer.render("rspamd/local_subnet.map").unwrap(),
            b"127.0.0.0/8\n[::1]/128\n192.168.203.0/24\n"
        );

        config.mail.relay_user.clear();
        assert_eq!(Renderer::new(&config).render("postfix/sasl_passwd").unwrap(), b"");
    }

    #[test]
    fn test_unknown_template() {
        let config = config(TlsFlavor::Notls, WebmailVariant::None);
        let err = Renderer::new(&config).render("postfix/missing.cf").unwrap_err();
        assert!(matches!(err, MailstackError::Render(RenderError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_render_to_file_skips_identical_content() {
        let dir = TempDir::new().unwrap();
        let config = config(TlsFlavor::Notls, WebmailVariant::None);
        let renderer = Renderer::new(&config);
        let path = dir.path().join("etc/postfix/main.cf");

        let first = renderer
            .render_to_file("postfix/main.cf", &path, 0o644, false)
            .await
            .unwrap();
        assert!(first.changed);

        set_mode(&path, 0o600).await.unwrap();
        let second = renderer
            .render_to_file("postfix/main.cf", &path, 0o644, false)
            .await
            .unwrap();
        assert!(!second.changed);
        assert_eq!(second.digest, first.digest);
        assert_eq!(mode_of(&path).await, Some(0o644));

        let forced = renderer
            .render_to_file("postfix/main.cf", &path, 0o644, true)
            .await
            .unwrap();
        assert!(forced.changed);
    }

    #[test]
    fn test_gated_entries_render_for_their_features() {
        let config = config(TlsFlavor::Mail, WebmailVariant::Snappymail);
        let renderer = Renderer::new(&config);
        let ids: Vec<_> = entries_for(&config).map(|e| e.id).collect();
        assert!(ids.contains(&"webmails/snappymail/default.json"));

        let json = renderer.render("webmails/snappymail/default.json").unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed["IMAP"]["port"], 993);
    }
}
