use axum::extract::FromRef;

use crate::{
    db::{DbPool, OrmConn},
    notify::Notifier,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub notifier: Notifier,
}

// Manual FromRef impls so handlers that only touch one side of the store can
// take `State<DbPool>` or `State<OrmConn>` directly.
impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for OrmConn {
    fn from_ref(state: &AppState) -> Self {
        state.orm.clone()
    }
}

impl FromRef<AppState> for Notifier {
    fn from_ref(state: &AppState) -> Self {
        state.notifier.clone()
    }
}
