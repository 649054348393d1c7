pub mod config_watcher;
pub mod http_client;
pub mod http_handler;
pub mod middleware;

pub use config_watcher::ConfigWatcher;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
