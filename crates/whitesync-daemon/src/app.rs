//! Assembly of a [`Reconciler`] from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use whitesync_core::Config;

use crate::feishu::{BitableClient, TokenCache};
use crate::http::build_client;
use crate::mcsm::{McsmClient, McsmConsole};
use crate::onebot::OneBotClient;
use crate::reconcile::{LogNotifier, NotificationSink, ReconcileOptions, Reconciler};

/// Validate `config` and wire the remote clients into a [`Reconciler`].
///
/// Without an `[onebot]` section notifications only go to the log.
pub fn build_reconciler(config: &Config) -> anyhow::Result<Reconciler> {
    config.validate_feishu()?;
    config.validate_mcsm()?;
    config.validate_reconcile()?;

    let http = build_client(Duration::from_secs(config.http.timeout_secs))
        .context("Failed to build HTTP client")?;

    let tokens = Arc::new(TokenCache::new(
        http.clone(),
        &config.feishu.base_url,
        config.feishu.app_id.clone(),
        config.feishu.app_secret.clone(),
        config.token_cache_path(),
    ));
    let records = Arc::new(BitableClient::new(http.clone(), tokens, &config.feishu));
    let console = Arc::new(McsmConsole::new(
        McsmClient::new(http.clone(), &config.mcsm),
        &config.mcsm,
    ));

    let group = config
        .onebot
        .as_ref()
        .map(|onebot| Arc::new(OneBotClient::new(http, onebot)));
    let notifier: Arc<dyn NotificationSink> = match &group {
        Some(group) => group.clone(),
        None => {
            info!("No chat group configured, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let reconciler = Reconciler::new(records, console, notifier, ReconcileOptions::from_config(config));
    Ok(match group {
        Some(group) => reconciler.with_membership(group),
        None => reconciler,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn complete() -> Config {
        let mut config = Config::default();
        config.feishu.app_id = "cli_a".into();
        config.feishu.app_secret = "secret".into();
        config.feishu.base_id = "bascn".into();
        config.feishu.table_id = "tbl".into();
        config.feishu.token_cache_path = Some(std::env::temp_dir().join("whitesync-app-test.json"));
        config.mcsm.api_url = "http://127.0.0.1:23333".into();
        config.mcsm.api_key = "k".into();
        config.mcsm.uuid = "u".into();
        config.mcsm.daemon_id = "d".into();
        config.reconcile.membership_check = false;
        config
    }

    #[test]
    fn builds_without_chat_group() {
        assert!(build_reconciler(&complete()).is_ok());
    }

    #[test]
    fn membership_check_requires_chat_group() {
        let mut config = complete();
        config.reconcile.membership_check = true;
        let err = build_reconciler(&config).unwrap_err();
        assert!(err.to_string().contains("onebot"), "{err}");
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let mut config = complete();
        config.feishu.app_secret.clear();
        assert!(build_reconciler(&config).is_err());
    }
}
