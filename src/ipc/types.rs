use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::model::Data;
use crate::session::Session;
use crate::store::{Full, Registry};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub session: Session,
    /// Last successful collection or store load.
    pub cache: Option<Data>,
    pub registry: Registry,
    pub store: Option<Box<dyn Full>>,
    pub store_conn: Option<String>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let mut state = Self {
            session: Session::new(config.portal),
            cache: None,
            registry: Registry::standard(),
            store: None,
            store_conn: None,
        };
        if let Some(conn) = config.store {
            if state.open_store(&conn).is_none() {
                warn!(conn = %conn, "configured store ignored");
            }
        }
        state
    }

    /// Replace the open store. `None` when no backend accepts `conn`.
    pub fn open_store(&mut self, conn: &str) -> Option<&mut Box<dyn Full>> {
        let store = self.registry.open(conn)?;
        self.store_conn = Some(conn.to_string());
        Some(self.store.insert(store))
    }
}
