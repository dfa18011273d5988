use std::sync::Arc;

use axum::{extract::State, response::Html};
use bullpen_core::JobStatus;
use minijinja::{Environment, context};

use crate::{
    boards::Dashboard,
    infra::errors::{AppError, AppResult},
};

const SHELL_HTML: &str = include_str!("../../templates/shell.html");

/// Render the board page. Queue names come from discovery only, so an
/// unreachable backend still renders.
pub fn render_shell(dashboard: &Dashboard) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("shell.html", SHELL_HTML)?;
    let tmpl = env.get_template("shell.html")?;

    let statuses: Vec<&str> =
        JobStatus::ALL.iter().map(|status| status.as_str()).collect();
    tmpl.render(context!(
        mount_path => dashboard.mount_path(),
        read_only => dashboard.read_only(),
        queues => dashboard.queue_names(),
        statuses => statuses,
    ))
}

pub async fn shell_handler(
    State(dashboard): State<Arc<Dashboard>>,
) -> AppResult<Html<String>> {
    render_shell(&dashboard).map(Html).map_err(|err| {
        tracing::error!(error = %err, "failed to render board shell");
        AppError::internal("Failed to render board page")
    })
}
