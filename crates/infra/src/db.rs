use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

impl DbConfig {
    /// Host and port as the websocket engine expects them, without a scheme.
    pub fn socket_address(&self) -> &str {
        let endpoint = self.endpoint.trim();
        endpoint
            .strip_prefix("ws://")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> DbConfig {
        DbConfig {
            endpoint: endpoint.to_string(),
            namespace: "rapport".to_string(),
            database: "ledgers".to_string(),
            username: "root".to_string(),
            password: "root".to_string(),
        }
    }

    #[test]
    fn socket_address_drops_the_ws_scheme() {
        assert_eq!(config("ws://127.0.0.1:8000").socket_address(), "127.0.0.1:8000");
        assert_eq!(config("db.internal:8000/").socket_address(), "db.internal:8000");
    }
}
