pub mod clock;
pub mod error;
mod http;
pub mod mail;
pub mod notification;
pub mod opportunities;
pub mod poller;
pub mod state;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;

use error::WatchError;
use mail::MailEvent;
use opportunities::OpportunityEvent;
use state::AppState;

/// Run the watchers until Ctrl-C.
///
/// The first command-line argument, if any, is the config file path.
pub fn run() -> Result<(), WatchError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_until_shutdown(config_path))
}

async fn run_until_shutdown(config_path: Option<PathBuf>) -> Result<(), WatchError> {
    let config = state::load_config(config_path.as_deref())?;
    let state = AppState::from_config(config)?;

    if let Some(watcher) = &state.opportunities {
        watcher.add_listener(log_opportunity_event);
        watcher.add_error_listener(|failure| {
            log::debug!("Opportunity cycle failed ({:?}): {}", failure.error_type, failure.message);
        });
    }
    if let Some(watcher) = &state.mail {
        watcher.add_listener(log_mail_event);
        watcher.add_error_listener(|failure| {
            if failure.error_type == error::ErrorType::RequiresUserAction {
                log::error!("Mail token rejected; update mail.accessToken or {}", mail::TOKEN_ENV_VAR);
            }
        });
    }

    if state.opportunities.is_none() && state.mail.is_none() {
        log::warn!("No watcher enabled, nothing to do");
        return Ok(());
    }

    state.start();
    log::info!("crmwatch running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    state.stop();
    Ok(())
}

fn log_opportunity_event(event: &OpportunityEvent) {
    match event {
        OpportunityEvent::CriticalAlert(batch) => {
            for opp in &batch.notifications {
                log::warn!(
                    "CRITICAL: opportunity {} ({}) stalled {} days",
                    opp.id(),
                    opp.record.company_name.as_deref().unwrap_or("unknown company"),
                    opp.age_days
                );
            }
        }
        OpportunityEvent::Update(batch) => {
            log::info!("{} critical opportunities", batch.count);
        }
    }
}

fn log_mail_event(event: &MailEvent) {
    let MailEvent::NewItems(batch) = event;
    for item in &batch.emails {
        log::info!(
            "New mail from {}: {}",
            item.sender().unwrap_or("unknown sender"),
            item.subject.as_deref().unwrap_or("(no subject)")
        );
    }
}
