use crate::dates::{self, DateRange};
use crate::report::{build_detailed, rows_from_linked};
use crate::AppState;
use axum::http::StatusCode;

pub async fn root(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::response::Html<String>, (StatusCode, String)> {
    let today = dates::today(state.settings.timezone);
    render_report(&state, &DateRange::last_business_day(today)).await
}

/// The detailed report of `range` from what is stored, as a page.
pub async fn render_report(
    state: &AppState,
    range: &DateRange,
) -> Result<axum::response::Html<String>, (StatusCode, String)> {
    let entries = state
        .database
        .get_entries_between(range, state.settings.timezone, state.settings.toggl_group)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "could not read entries");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        })?;

    let doc = build_detailed(rows_from_linked(&entries), range);

    Ok(axum::response::Html(format!(
        r#"
        <!DOCTYPE html>
        <html>
            <body>
                <pre>{}</pre>
            </body>
        </html>
        "#,
        escape_html(&doc.to_string())
    )))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
