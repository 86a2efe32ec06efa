//! Public availability endpoints
//!
//! In child mode every answer comes from the master site.

use axum::extract::{Query, State};
use chrono::{Datelike, Utc};
use serde::Deserialize;

use super::{failure, ok, AppState, Reply};
use crate::booking::{resolve_duration, Scheduler, UserChoice};
use crate::error::ScheduleError;
use crate::holidays::{self, Holiday};
use crate::models::{DayOption, MonthOption, TimeOption};
use crate::scheduling::query::{self, Candidate};
use crate::services::Service;
use crate::sync::client::RemoteQuery;
use crate::validation::{parse_date, parse_month};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
    pub month: Option<String>,
    pub duration_seconds: Option<i64>,
    pub service: Option<String>,
    pub user: Option<String>,
}

impl AvailabilityQuery {
    fn remote(&self) -> RemoteQuery {
        RemoteQuery {
            duration_seconds: self.duration_seconds,
            service: self.service.clone(),
            user: self.user.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HolidayQuery {
    pub year: Option<i32>,
}

/// Duration and candidate users of a query
async fn resolve_query(
    scheduler: &Scheduler,
    params: &AvailabilityQuery,
) -> Result<(i64, Vec<Candidate>), ScheduleError> {
    let (duration, service) = resolve_duration(
        scheduler.catalog(),
        params.service.as_deref(),
        params.duration_seconds,
    )?;
    let candidates = scheduler
        .candidates(&UserChoice::parse(params.user.as_deref()), service.as_ref())
        .await?;
    Ok((duration, candidates))
}

pub async fn local_times(
    state: &AppState,
    params: &AvailabilityQuery,
) -> Result<Vec<TimeOption>, ScheduleError> {
    let date = parse_date(params.date.as_deref().unwrap_or_default())?;
    let scheduler = state.scheduler().await?;
    let (duration, candidates) = resolve_query(&scheduler, params).await?;
    let times = query::available_times(
        scheduler.engine().store(),
        &candidates,
        date,
        duration,
        scheduler.now_local(),
    )
    .await?;
    Ok(query::time_options(&times))
}

pub async fn local_days(
    state: &AppState,
    params: &AvailabilityQuery,
) -> Result<Vec<DayOption>, ScheduleError> {
    let month = parse_month(params.month.as_deref().unwrap_or_default())?;
    let scheduler = state.scheduler().await?;
    let (duration, candidates) = resolve_query(&scheduler, params).await?;
    let days = query::available_days(
        scheduler.engine().store(),
        &candidates,
        month,
        duration,
        scheduler.now_local(),
    )
    .await?;
    Ok(query::day_options(&days))
}

pub async fn local_months(
    state: &AppState,
    params: &AvailabilityQuery,
) -> Result<Vec<MonthOption>, ScheduleError> {
    let scheduler = state.scheduler().await?;
    let (duration, candidates) = resolve_query(&scheduler, params).await?;
    let months = query::available_months(
        scheduler.engine().store(),
        &candidates,
        duration,
        scheduler.now_local(),
    )
    .await?;
    Ok(query::month_options(&months))
}

pub async fn local_services(state: &AppState) -> Result<Vec<Service>, ScheduleError> {
    let scheduler = state.scheduler().await?;
    Ok(scheduler.catalog().services().to_vec())
}

/// Open start times on a date
pub async fn get_available_times(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityQuery>,
) -> Reply<Vec<TimeOption>> {
    let result = match state.master() {
        Some(master) => {
            master
                .available_times(params.date.as_deref().unwrap_or_default(), &params.remote())
                .await
        }
        None => local_times(&state, &params).await,
    };
    match result {
        Ok(times) => ok(times),
        Err(e) => failure(&state, e),
    }
}

/// Days of a month with at least one open start
pub async fn get_available_days(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityQuery>,
) -> Reply<Vec<DayOption>> {
    let result = match state.master() {
        Some(master) => {
            master
                .available_days(params.month.as_deref().unwrap_or_default(), &params.remote())
                .await
        }
        None => local_days(&state, &params).await,
    };
    match result {
        Ok(days) => ok(days),
        Err(e) => failure(&state, e),
    }
}

/// Upcoming months with at least one open start
pub async fn get_available_months(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityQuery>,
) -> Reply<Vec<MonthOption>> {
    let result = match state.master() {
        Some(master) => master.available_months(&params.remote()).await,
        None => local_months(&state, &params).await,
    };
    match result {
        Ok(months) => ok(months),
        Err(e) => failure(&state, e),
    }
}

/// Configured services
pub async fn get_services(State(state): State<AppState>) -> Reply<Vec<Service>> {
    let result = match state.master() {
        Some(master) => master.services().await,
        None => local_services(&state).await,
    };
    match result {
        Ok(services) => ok(services),
        Err(e) => failure(&state, e),
    }
}

/// Observed holidays of a year
pub async fn get_holidays(Query(params): Query<HolidayQuery>) -> Reply<Vec<Holiday>> {
    let year = params.year.unwrap_or_else(|| Utc::now().year());
    ok(holidays::holidays_for_year(year))
}
