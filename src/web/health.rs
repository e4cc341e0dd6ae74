use salvo::prelude::*;
use serde_json::json;

use crate::web::{render_unavailable, web_state};

#[handler]
pub async fn health_check(res: &mut Response) {
    res.render("OK");
}

#[handler]
pub async fn get_status(res: &mut Response) {
    let Some(state) = web_state() else {
        render_unavailable(res);
        return;
    };
    let history = state.engine.history();

    let status = json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "runs": history.runs,
        "failed_runs": history.failed_runs,
        "last_run": history.last,
        "last_finished_at": history.last_finished_at,
    });

    res.render(Json(status));
}
