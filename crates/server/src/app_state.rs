use control_api::ControlContext;
use tokio::sync::watch;

use crate::session::SessionTracker;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) control: ControlContext,
    pub(crate) sessions: SessionTracker,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
