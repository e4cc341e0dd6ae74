use std::fmt::Write;

use salvo::http::header::{CONTENT_TYPE, HeaderValue};
use salvo::prelude::*;

use crate::sync::RunHistory;
use crate::web::{render_unavailable, web_state};

/// Prometheus text exposition of the cumulative run totals.
pub fn format_prometheus(history: &RunHistory, uptime_secs: u64) -> String {
    let totals = &history.totals;
    let series: [(&str, &str, &str, u64); 11] = [
        ("sync_uptime_seconds", "gauge", "Seconds since the server started", uptime_secs),
        ("sync_runs_total", "counter", "Completed sync runs", history.runs),
        ("sync_failed_runs_total", "counter", "Runs aborted before touching a channel", history.failed_runs),
        ("sync_messages_total", "counter", "Messages posted to Mattermost", totals.messages),
        ("sync_files_total", "counter", "Files uploaded to Mattermost", totals.files),
        ("sync_users_total", "counter", "Mattermost users created", totals.users),
        ("sync_channels_total", "counter", "Channels processed", totals.channels),
        ("sync_pins_total", "counter", "Pins added or removed", totals.pins),
        ("sync_errors_total", "counter", "Items that failed to migrate", totals.errors),
        ("sync_skipped_total", "counter", "Messages already present on Mattermost", totals.skipped),
        ("sync_profiles_updated_total", "counter", "User profiles updated", totals.updated),
    ];

    let mut out = String::new();
    for (name, kind, help, value) in series {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} {kind}");
        let _ = writeln!(out, "{name} {value}");
        out.push('\n');
    }
    out
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    let Some(state) = web_state() else {
        render_unavailable(res);
        return;
    };
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    res.body(format_prometheus(
        &state.engine.history(),
        state.started_at.elapsed().as_secs(),
    ));
}
