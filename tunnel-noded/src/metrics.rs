use std::fmt::{self, Write as _};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use log::info;
use tokio::net::TcpListener;

use tunnel_core::gateway::TunnelGateway;
use tunnel_core::stats::{PacketStats, StatsSnapshot};

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Gateway counters in the Prometheus text exposition format
pub fn render_metrics(stats: &StatsSnapshot) -> String {
    let mut out = String::new();
    // writing into a String does not fail
    let _ = write_metrics(&mut out, stats);
    out
}

fn write_metrics(out: &mut String, stats: &StatsSnapshot) -> fmt::Result {
    let counters: [(&str, &str, fn(&PacketStats) -> u64); 3] = [
        ("tunnel_packets_routed_total", "Packets routed through the section", |st| st.routed),
        ("tunnel_packets_sent_total", "Packets sent out of the section", |st| st.sent),
        ("tunnel_packets_received_total", "Packets received by the section", |st| st.received),
    ];
    for (name, help, value) in counters {
        writeln!(out, "# HELP {} {}", name, help)?;
        writeln!(out, "# TYPE {} counter", name)?;
        for (section, st) in stats {
            writeln!(out, "{}{{section=\"{}\"}} {}", name, section, value(st))?;
        }
    }

    let name = "tunnel_prepaid_packets";
    writeln!(out, "# HELP {} Packets still prepaid, by direction", name)?;
    writeln!(out, "# TYPE {} gauge", name)?;
    for (section, st) in stats {
        for (hop, prepaid) in st.prepaid_packets_route.iter().enumerate() {
            writeln!(
                out,
                "{}{{section=\"{}\",direction=\"route\",hop=\"{}\"}} {}",
                name, section, hop, prepaid
            )?;
        }
        let directions = [("out", st.prepaid_packets_out), ("in", st.prepaid_packets_in)];
        for (direction, prepaid) in directions {
            writeln!(
                out,
                "{}{{section=\"{}\",direction=\"{}\"}} {}",
                name, section, direction, prepaid
            )?;
        }
    }
    Ok(())
}

async fn metrics(State(gateway): State<Arc<dyn TunnelGateway>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], render_metrics(&gateway.packets_stats()))
}

pub fn router(gateway: Arc<dyn TunnelGateway>) -> Router {
    Router::new().route("/metrics", get(metrics)).with_state(gateway)
}

/// Serve `/metrics` on `addr`; returns only on failure
pub async fn serve_metrics(addr: SocketAddr, gateway: Arc<dyn TunnelGateway>) -> Result<()> {
    let listener = TcpListener::bind(addr).await.with_context(|| format!("bind metrics {}", addr))?;
    info!("metrics listening on {}", addr);
    axum::serve(listener, router(gateway)).await.context("metrics server")
}
