#![allow(dead_code)]

use axum::Router;
use tokio::net::TcpListener;

use airwave_daemon::fetch::Fetcher;
use airwave_proto::config::NetworkConfig;
use airwave_proto::protocol::StationRecord;

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local test server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
pub async fn dead_base() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

pub fn fetcher() -> Fetcher {
    Fetcher::new(&NetworkConfig::default()).expect("build fetcher")
}

pub fn station(id: &str, name: &str) -> StationRecord {
    StationRecord {
        id: id.to_string(),
        name: name.to_string(),
        stream_url: format!("http://stream.test/{id}"),
        icon_url: format!("http://stream.test/{id}.png"),
        ..Default::default()
    }
}
