//! TCP listen loop and protocol detector (spec.md §4.4): peeks one byte to
//! route a freshly accepted connection to the GT06 or SimpleJSON login
//! handshake, then resolves the device through the registry and config
//! fetcher and hands it its first connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gt06_protocol::gt06;
use gt06_protocol::simplejson;
use gt06_protocol::ProtocolKind;
use tokio::net::{TcpListener, TcpStream};

use crate::config::DeviceConfig;
use crate::conn::{ReadError, SharedConn, WrappedConn};
use crate::device::gt06::Gt06Device;
use crate::device::simplejson::SimpleJsonDevice;
use crate::location_store::LocationStore;
use crate::misc_store::MiscStore;
use crate::proxyproto;
use crate::registry::{ConfigFetcher, DeviceHandler, DeviceRegistry, Protocol};
use crate::serial::{Nsn, SnType, TrackerId};
use crate::sublist::SublistMap;

const LOGIN_READ_DEADLINE: Duration = Duration::from_secs(2);

pub struct AcceptorDeps<F: ConfigFetcher> {
    pub registry: Arc<DeviceRegistry>,
    pub config_fetcher: Arc<F>,
    pub sublist_map: Arc<SublistMap>,
    pub location_store: Arc<LocationStore>,
    pub misc_store: Arc<MiscStore>,
    pub proxy_protocol_enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("io_error: {0}")]
    Io(#[from] std::io::Error),
    #[error("login_rejected: {0}")]
    LoginRejected(String),
    #[error("malformed_frame: {0}")]
    MalformedFrame(String),
}

/// Accepts connections on `listener` forever, handing each to a dedicated
/// task so one slow or hostile login handshake never blocks later arrivals.
pub async fn run_acceptor<F: ConfigFetcher>(listener: TcpListener, deps: Arc<AcceptorDeps<F>>) {
    let next_conn_id = Arc::new(AtomicU64::new(1));
    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "io_error: accept failed");
                continue;
            }
        };
        let deps = deps.clone();
        let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(err) = accept_one(stream, conn_id, deps).await {
                tracing::debug!(conn_id, error = %err, "login handshake failed");
            }
        });
    }
}

async fn accept_one<F: ConfigFetcher>(mut stream: TcpStream, conn_id: u64, deps: Arc<AcceptorDeps<F>>) -> Result<(), AcceptError> {
    let remote_override = if deps.proxy_protocol_enabled {
        proxyproto::peel(&mut stream).await.map_err(|e| AcceptError::LoginRejected(e.to_string()))?.map(|p| p.source)
    } else {
        None
    };

    let conn = Arc::new(WrappedConn::new_with_remote(stream, conn_id, remote_override)?);
    let mut peek_buf = [0u8; 1];
    let n = conn.peek(&mut peek_buf).await?;
    if n == 0 {
        conn.close();
        return Err(AcceptError::LoginRejected("peer closed before sending any bytes".into()));
    }

    match ProtocolKind::detect(peek_buf[0]) {
        Some(ProtocolKind::Gt06) => gt06_login(conn, deps).await,
        Some(ProtocolKind::SimpleJson) => simplejson_login(conn, deps).await,
        None => {
            conn.close();
            Err(AcceptError::LoginRejected(format!("unrecognized leading byte {:#04x}", peek_buf[0])))
        }
    }
}

fn read_err_to_login_rejected(e: ReadError) -> AcceptError {
    match e {
        ReadError::Timeout => AcceptError::LoginRejected("timed out waiting for login frame".into()),
        ReadError::Closed | ReadError::Io => AcceptError::LoginRejected("connection closed before login completed".into()),
    }
}

enum AttachOutcome {
    ReplacedExisting,
    CreatedNew,
}

/// Shared registry resolution step: an existing, non-purged device for this
/// NSN gets the connection handed off via [`DeviceHandler::replace_conn`];
/// otherwise `build` mints a new handler and the registry adopts it.
async fn resolve_and_attach<F, B>(
    conn: SharedConn,
    nsn: Nsn,
    deps: &Arc<AcceptorDeps<F>>,
    protocol: Protocol,
    build: B,
) -> Result<AttachOutcome, AcceptError>
where
    F: ConfigFetcher,
    B: FnOnce(TrackerId, DeviceConfig, SharedConn) -> Arc<dyn DeviceHandler>,
{
    if let Some(existing) = deps.registry.device_by_nsn(nsn) {
        if !existing.is_purged() {
            existing.handler.clone().replace_conn(conn);
            return Ok(AttachOutcome::ReplacedExisting);
        }
    }

    let (tracker_id, config, _attributes) = deps
        .config_fetcher
        .register_and_fetch(nsn)
        .await
        .map_err(|e| AcceptError::LoginRejected(e.to_string()))?;

    if !config.allow_connect {
        conn.close();
        return Err(AcceptError::LoginRejected("allow_connect is false for this device".into()));
    }

    let handler = build(tracker_id, config, conn);
    deps.registry.add(nsn, tracker_id, handler.clone(), protocol);
    handler.start();
    Ok(AttachOutcome::CreatedNew)
}

async fn gt06_login<F: ConfigFetcher>(conn: SharedConn, deps: Arc<AcceptorDeps<F>>) -> Result<(), AcceptError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    let (login_body, serial) = loop {
        match gt06::try_decode(&buf) {
            Ok(Some((frame, consumed))) => {
                buf.drain(..consumed);
                if frame.protocol != gt06::codes::LOGIN {
                    conn.close();
                    return Err(AcceptError::LoginRejected("first frame was not a login".into()));
                }
                break (frame.body, frame.serial);
            }
            Ok(None) => {
                let n = conn.read(&mut chunk, Some(LOGIN_READ_DEADLINE)).await.map_err(read_err_to_login_rejected)?;
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                conn.close();
                return Err(AcceptError::MalformedFrame(e.to_string()));
            }
        }
    };

    let Some(login) = gt06::LoginMessage::parse(&login_body) else {
        conn.close();
        return Err(AcceptError::LoginRejected("malformed login body".into()));
    };
    let imei: u64 = login
        .imei_decimal()
        .parse()
        .map_err(|_| AcceptError::LoginRejected("imei is not decimal".into()))?;
    let nsn = Nsn::combine(SnType::Imei, imei);
    let offset_minutes = login.time_offset_minutes.unwrap_or(0);

    let response = gt06::encode_short(gt06::codes::LOGIN, &[], serial);
    conn.write_all(&response).await?;

    let deps_for_build = deps.clone();
    resolve_and_attach(conn, nsn, &deps, Protocol::Gt06, move |tracker_id, config, conn| {
        Gt06Device::new(
            tracker_id,
            nsn,
            conn,
            config,
            offset_minutes,
            deps_for_build.sublist_map.clone(),
            deps_for_build.location_store.clone(),
            deps_for_build.misc_store.clone(),
        ) as Arc<dyn DeviceHandler>
    })
    .await?;
    Ok(())
}

async fn simplejson_login<F: ConfigFetcher>(conn: SharedConn, deps: Arc<AcceptorDeps<F>>) -> Result<(), AcceptError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    let body = loop {
        match simplejson::try_decode(&buf) {
            Ok(Some((frame, consumed))) => {
                buf.drain(..consumed);
                if frame.protocol != simplejson::codes::LOGIN {
                    conn.close();
                    return Err(AcceptError::LoginRejected("first frame was not a login".into()));
                }
                break frame.body;
            }
            Ok(None) => {
                let n = conn.read(&mut chunk, Some(LOGIN_READ_DEADLINE)).await.map_err(read_err_to_login_rejected)?;
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                conn.close();
                return Err(AcceptError::MalformedFrame(e.to_string()));
            }
        }
    };

    let login: simplejson::LoginMessage =
        serde_json::from_slice(&body).map_err(|e| AcceptError::LoginRejected(e.to_string()))?;
    let sn_type = match login.sn_type.to_ascii_lowercase().as_str() {
        "imei" => SnType::Imei,
        "mac" => SnType::Mac,
        "aid" => SnType::Aid,
        other => {
            conn.close();
            return Err(AcceptError::LoginRejected(format!("unrecognized sn_type {other}")));
        }
    };
    let serial = if sn_type == SnType::Imei {
        login.serial.parse::<u64>().map_err(|_| AcceptError::LoginRejected("serial is not decimal".into()))?
    } else {
        u64::from_str_radix(login.serial.trim_start_matches("0x"), 16)
            .map_err(|_| AcceptError::LoginRejected("serial is not hex".into()))?
    };
    let nsn = Nsn::combine(sn_type, serial);

    let deps_for_build = deps.clone();
    resolve_and_attach(conn, nsn, &deps, Protocol::SimpleJson, move |tracker_id, config, conn| {
        SimpleJsonDevice::new(
            tracker_id,
            nsn,
            conn,
            config,
            deps_for_build.sublist_map.clone(),
            deps_for_build.location_store.clone(),
            deps_for_build.misc_store.clone(),
        ) as Arc<dyn DeviceHandler>
    })
    .await?;
    Ok(())
}
