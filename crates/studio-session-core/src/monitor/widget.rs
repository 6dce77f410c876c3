use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::auth::{RefreshOutcome, SessionState, TokenManager};
use crate::utils::format_countdown;

/// What the countdown widget shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct WidgetView {
    pub visible: bool,
    pub status: SessionState,
    /// Remaining time as `m:ss`
    pub countdown: String,
}

impl Default for WidgetView {
    fn default() -> Self {
        Self {
            visible: false,
            status: SessionState::Expired,
            countdown: format_countdown(Duration::zero()),
        }
    }
}

/// Non-blocking countdown shown while the session is about to expire.
pub struct SessionStatusWidget {
    tokens: TokenManager,
    window: Duration,
    interval: StdDuration,
    view: watch::Sender<WidgetView>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionStatusWidget {
    pub fn new(tokens: TokenManager, window: Duration, interval: StdDuration) -> Self {
        let (view, _) = watch::channel(WidgetView::default());
        Self {
            tokens,
            window,
            interval,
            view,
            task: Mutex::new(None),
        }
    }

    pub fn view(&self) -> WidgetView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WidgetView> {
        self.view.subscribe()
    }

    /// Re-derive the view from the current session status.
    pub fn refresh_view(&self) -> WidgetView {
        let status = self.tokens.get_session_status();
        let visible =
            status.status == SessionState::Expiring && status.time_left() <= self.window;
        let next = WidgetView {
            visible,
            status: status.status,
            countdown: format_countdown(status.time_left()),
        };

        let store = self.tokens.store();
        if visible != store.snapshot().activity.session_warning_shown {
            store.set_warning_shown(visible);
        }

        self.view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.visible != next.visible {
                info!(visible = next.visible, countdown = %next.countdown, "Session warning visibility changed");
            }
            *current = next.clone();
            true
        });
        next
    }

    /// The manual "extend" action: refresh now and re-derive visibility.
    pub async fn extend(&self) -> (WidgetView, RefreshOutcome) {
        self.tokens.store().record_activity();
        let outcome = self.tokens.refresh_token().await;
        if let Err(e) = &outcome {
            debug!(error = %e, "Extend session failed");
        }
        (self.refresh_view(), outcome)
    }

    /// Start polling. Calling again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let widget = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(widget.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                widget.refresh_view();
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
