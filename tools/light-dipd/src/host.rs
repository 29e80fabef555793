//! Host-side helpers: watch status frames, send one command.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use lightdip_protocol::{
    FrameHeader, MAX_DATAGRAM_LEN, StatusAssembler, StatusFrame, decode_status_frame,
};
use serde_json::json;
use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::clock::wall_iso;
use crate::display::render;
use crate::telemetry::MAX_FRAME_LEN;

/// Print every status report received on `bind` until Ctrl-C. Reports
/// split over several frames are printed once all parts are in.
pub async fn monitor(bind: SocketAddr, as_json: bool) -> Result<()> {
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(%bind, "waiting for status frames");
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    let mut assembler = StatusAssembler::new();
    loop {
        tokio::select! {
            res = socket.recv_from(&mut buf) => {
                let (n, peer) = res.context("receive status frame")?;
                match decode_status_frame(&buf[..n]) {
                    Ok((header, part)) => {
                        let Some(frame) = assembler.push(&header, part) else {
                            continue;
                        };
                        let line = if as_json {
                            format_json(Local::now(), &header, &frame)
                        } else {
                            format_text(Local::now(), &header, &frame)
                        };
                        print!("{line}");
                    }
                    Err(e) => warn!(%peer, len = n, "dropping bad frame: {e:?}"),
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

pub fn format_text(now: DateTime<Local>, header: &FrameHeader, frame: &StatusFrame) -> String {
    format!(
        "{} seq={:>3} up={}ms\n{}",
        wall_iso(now),
        header.seq,
        frame.uptime_ms,
        render(&frame.to_snapshot())
    )
}

pub fn format_json(now: DateTime<Local>, header: &FrameHeader, frame: &StatusFrame) -> String {
    let period = frame.period.map(|p| {
        json!({
            "min_ms": p.min_ms,
            "max_ms": p.max_ms,
            "avg_ms": p.avg_ms,
            "periods": p.periods,
        })
    });
    let value = json!({
        "ts": wall_iso(now),
        "seq": header.seq,
        "uptime_ms": frame.uptime_ms,
        "samples": frame.samples,
        "led_hz": frame.led_hz,
        "avg_light_v": frame.avg_light_v,
        "dips": frame.dips,
        "period": period,
        "history": frame.history,
    });
    format!("{value}\n")
}

/// Send `command` to the daemon and collect replies until `idle` passes
/// without another datagram.
pub async fn send(target: SocketAddr, command: &str, idle: Duration) -> Result<Vec<String>> {
    let local: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await.context("bind command socket")?;
    socket
        .send_to(command.as_bytes(), target)
        .await
        .with_context(|| format!("send to {target}"))?;

    let mut replies = Vec::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    while let Ok(res) = tokio::time::timeout(idle, socket.recv_from(&mut buf)).await {
        let (n, peer) = res.context("receive reply")?;
        if peer != target {
            continue;
        }
        replies.push(String::from_utf8_lossy(&buf[..n]).into_owned());
    }
    Ok(replies)
}
