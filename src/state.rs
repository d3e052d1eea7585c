use anyhow::{Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::AuthClient;
use crate::chat::ChatService;
use crate::client::CornCareClient;
use crate::config::Config;
use crate::domain::conversation::ConversationStore;
use crate::domain::settings::SettingsService;
use crate::forwarder;
use crate::storage::{KvStore, SqliteStore};

/// Shared state of the forwarding server.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    client: Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let client = forwarder::build_client(config.request_timeout).context("failed to build backend HTTP client")?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Everything the chat client needs, wired to one persisted store.
#[derive(Clone)]
pub struct ClientState {
    db_path: PathBuf,
    store: Arc<dyn KvStore>,
    pub settings: SettingsService,
    pub conversations: ConversationStore,
    pub auth: AuthClient,
    pub chat: ChatService<CornCareClient>,
}

impl ClientState {
    /// Opens the store under `config.data_dir` and points the services at the
    /// forwarding server at `server_url`.
    pub fn open(config: &Config, server_url: &str) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
        let db_path = config.data_dir.join("corncare.db");
        let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open(&db_path).context("failed to open client store")?);
        let client = CornCareClient::new(server_url, config.request_timeout).context("failed to build client")?;
        Ok(Self::assemble(db_path, store, client))
    }

    pub fn assemble(db_path: PathBuf, store: Arc<dyn KvStore>, client: CornCareClient) -> Self {
        let settings = SettingsService::new(store.clone());
        let conversations = ConversationStore::new(store.clone());
        let auth = AuthClient::new(client.clone(), store.clone());
        let chat = ChatService::new(conversations.clone(), settings.clone(), client);
        Self {
            db_path,
            store,
            settings,
            conversations,
            auth,
            chat,
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }
}
