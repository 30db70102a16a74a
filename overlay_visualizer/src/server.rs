use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::{ControlHandle, OverlayBus, ServerConfig};

#[derive(Clone)]
struct AppState {
    bus: OverlayBus,
    control: ControlHandle,
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><title>Pavement Overlay</title></head>
<body style="font-family:sans-serif; background:#111; color:#ddd;">
    <h2>Pavement Overlay</h2>
    <div style="margin: 8px 0; display:flex; gap:12px; align-items:center;">
        <button id="btn-play" style="padding:6px 12px;">Play</button>
        <button id="btn-pause" style="padding:6px 12px;">Pause</button>
        <input id="seek" type="number" step="0.1" min="0" value="0" style="width:80px;">
        <button id="btn-seek" style="padding:6px 12px;">Seek</button>
        <span id="status" style="font-family:monospace; font-size:12px; color:#777">idle</span>
    </div>
    <div style="font-family:monospace;">frame <span id="frame">0</span> | detections <span id="count">0</span></div>
    <canvas id="overlay" width="1280" height="720" style="border:1px solid #444; background:#000"></canvas>
    <ol id="log" style="font-family:monospace; font-size:12px;"></ol>
    <pre id="summary" style="display:none;"></pre>
    <script src="/client.js"></script>
</body>
</html>"#;

const CLIENT_JS: &str = r#"(function(){
    const $ = (id)=>document.getElementById(id);
    const status = (t)=>{ $('status').textContent = t; };
    $('btn-play').onclick = ()=> fetch('/control/play', { method:'POST' });
    $('btn-pause').onclick = ()=> fetch('/control/pause', { method:'POST' });
    $('btn-seek').onclick = ()=> fetch('/control/seek/' + encodeURIComponent($('seek').value), { method:'POST' });
    const canvas = $('overlay');
    const ctx = canvas.getContext('2d');
    const ws = new WebSocket((location.protocol==='https:'?'wss://':'ws://')+location.host+'/ws/overlay');
    ws.binaryType = 'arraybuffer';
    ws.onopen = ()=> status('connected');
    ws.onclose = ()=> status('disconnected');
    ws.onmessage = async (ev)=>{
        if(ev.data instanceof ArrayBuffer){
            const bmp = await createImageBitmap(new Blob([ev.data], {type:'image/png'}));
            ctx.clearRect(0, 0, canvas.width, canvas.height);
            ctx.drawImage(bmp, 0, 0, canvas.width, canvas.height);
            return;
        }
        const snap = JSON.parse(ev.data);
        status(snap.phase);
        $('frame').textContent = snap.counters.current_frame;
        $('count').textContent = snap.counters.detection_count;
        $('log').innerHTML = snap.log.map(e =>
            '<li>' + e.timestamp_display + ' frame ' + e.frame + ': ' + e.detections.length + ' detection(s)</li>').join('');
        if(snap.summary_visible && snap.summary){
            $('summary').style.display = 'block';
            $('summary').textContent = JSON.stringify(snap.summary, null, 2);
        }
    };
})();"#;

pub(crate) async fn start(
    bus: OverlayBus,
    cfg: ServerConfig,
    control: ControlHandle,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let state = AppState { bus, control };
    let app = Router::new()
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/client.js", get(client_js))
        .route("/snapshot", get(snapshot))
        .route("/ws/overlay", get(overlay_ws))
        .route("/control/play", post(play))
        .route("/control/pause", post(pause))
        .route("/control/seek/:secs", post(seek))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(bind_addr = %cfg.bind_addr, "visualizer server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "visualizer server stopped");
        }
    });
    Ok(server)
}

async fn client_js() -> Response {
    let mut resp = Response::new(axum::body::Body::from(CLIENT_JS));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/javascript"),
    );
    resp
}

fn control_status(result: anyhow::Result<()>) -> StatusCode {
    match result {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            warn!(error = %e, "control request failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn play(State(state): State<AppState>) -> StatusCode {
    control_status(state.control.play().await)
}

async fn pause(State(state): State<AppState>) -> StatusCode {
    control_status(state.control.pause().await)
}

async fn seek(State(state): State<AppState>, Path(secs): Path<f64>) -> StatusCode {
    if !secs.is_finite() || secs < 0.0 {
        return StatusCode::BAD_REQUEST;
    }
    control_status(state.control.seek(secs).await)
}

async fn snapshot(State(state): State<AppState>) -> Response {
    match state.control.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            warn!(error = %e, "snapshot request failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

async fn overlay_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| overlay_conn(socket, state.bus))
}

/// Streams PNG overlays as binary messages and snapshots as JSON text.
async fn overlay_conn(socket: WebSocket, bus: OverlayBus) {
    let mut frames_rx = bus.frames_tx.subscribe();
    let mut meta_rx = bus.meta_tx.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            frame = frames_rx.recv() => match frame {
                Ok(packet) => {
                    if ws_tx.send(Message::Binary(packet.data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "overlay socket lagged on frames"),
                Err(RecvError::Closed) => break,
            },
            meta = meta_rx.recv() => match meta {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialise snapshot"),
                },
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "overlay socket lagged on meta"),
                Err(RecvError::Closed) => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("overlay socket closed");
}
