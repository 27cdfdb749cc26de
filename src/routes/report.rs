use crate::dates::{parse_toggl_date, DateRange};
use crate::routes::root::render_report;
use crate::AppState;
use axum::http::StatusCode;

pub async fn report(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path((since, until)): axum::extract::Path<(String, String)>,
) -> Result<axum::response::Html<String>, (StatusCode, String)> {
    let range = parse_range(&since, &until)?;
    render_report(&state, &range).await
}

fn parse_range(since: &str, until: &str) -> Result<DateRange, (StatusCode, String)> {
    let parse = |value: &str| {
        parse_toggl_date(value).map_err(|err| {
            (
                StatusCode::BAD_REQUEST,
                format!("Invalid date {}: {}", value, err),
            )
        })
    };
    let range = DateRange::new(parse(since)?, parse(until)?);
    if range.since > range.until {
        return Err((StatusCode::BAD_REQUEST, format!("{} is after {}", since, until)));
    }
    Ok(range)
}
